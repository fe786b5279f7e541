use expect_test::expect;

use super::*;
use crate::error::LoweringError;
use crate::interpreter::{Interpreter, Observation, Value};
use crate::parser::parse_body;
use crate::printer::print_statements;
use crate::services::DefaultServices;

fn parse(source: &str) -> Vec<Statement> {
    parse_body(source).unwrap()
}

fn lower_normal(source: &str) -> Vec<Statement> {
    rewrite_normal_function(parse(source), &mut DefaultServices::new()).unwrap()
}

fn lower_iterator(source: &str) -> (IteratorBlock, DefaultServices) {
    let mut services = DefaultServices::new();
    let block = rewrite_iterator_block(parse(source), &mut services).unwrap();
    (block, services)
}

fn lower_async(source: &str) -> Vec<Statement> {
    rewrite_async_function(parse(source), &mut DefaultServices::new()).unwrap()
}

/// Runs `source` before and after lowering and asserts both runs agree.
fn check_normal(source: &str) -> Observation {
    let expected = Interpreter::new().run_body(&parse(source));
    let lowered = lower_normal(source);
    let actual = Interpreter::new().run_body(&lowered);
    assert_eq!(actual, expected, "lowered:\n{}", print_statements(&lowered));
    expected
}

fn check_iterator(source: &str, take: Option<usize>) -> Observation {
    let expected = Interpreter::new().run_iterator(&parse(source), take);
    let (block, services) = lower_iterator(source);
    let actual = Interpreter::new().drive_iterator(&block, services.current_name(), take);
    assert_eq!(actual, expected, "lowered:\n{}", print_statements(&block.body));
    expected
}

fn check_async(source: &str) -> Observation {
    let mut structured = Interpreter::new();
    structured.define_global("t", Value::Null);
    let expected = structured.run_async(&parse(source));

    let lowered = lower_async(source);
    let mut driven = Interpreter::new();
    driven.define_global("t", Value::Null);
    let actual = driven.drive_async(&lowered);
    assert_eq!(actual, expected, "lowered:\n{}", print_statements(&lowered));
    expected
}

#[test]
fn body_without_labels_is_unchanged() {
    let source = "var x = 1; while (x < 5) { x++; if (x == 3) break; } return x;";
    assert_eq!(lower_normal(source), parse(source));
}

#[test]
fn labels_split_a_block() {
    let lowered = lower_normal("{ a; b; lbl1: c; d; lbl2: e; f; }");
    expect![[r#"
        var $state1 = 0;
        $loop1: for (;;) {
            switch ($state1) {
                case 0: {
                    a;
                    b;
                    $state1 = 1;
                    continue $loop1;
                }
                case 1: {
                    lbl1: c;
                    d;
                    $state1 = 2;
                    continue $loop1;
                }
                case 2: {
                    lbl2: e;
                    f;
                    $state1 = -1;
                    break $loop1;
                }
                default: {
                    break $loop1;
                }
            }
        }
    "#]]
    .assert_eq(&print_statements(&lowered));
}

#[test]
fn iterator_finally_becomes_handler_and_disposer() {
    let (block, _) = lower_iterator(
        "log('start');\n\
         try { yield return 1; yield return 2; } finally { log('cleanup'); }",
    );
    assert_eq!(block.finally_handlers.len(), 1);
    assert_eq!(block.finally_handlers[0].name, "$finally1");
    assert_eq!(
        print_statements(&block.finally_handlers[0].function.body),
        "log(\"cleanup\");\n"
    );
    assert_eq!(block.variables.len(), 1);
    assert_eq!(block.variables[0].name, "$state1");
    expect![[r#"
        try {
            $loop1: for (;;) {
                switch ($state1) {
                    case 0: {
                        log("start");
                        $state1 = 1;
                        continue $loop1;
                    }
                    case 1: {
                        $current = 1;
                        $state1 = 2;
                        return true;
                    }
                    case 2: {
                        $current = 2;
                        $state1 = 3;
                        return true;
                    }
                    case 3: {
                        $state1 = -1;
                        $finally1.call(this);
                        $state1 = -1;
                        break $loop1;
                    }
                    default: {
                        break $loop1;
                    }
                }
            }
        } catch ($tmp1) {
            try {
                switch ($state1) {
                    case 1:
                    case 2:
                    case 3:
                        $finally1.call(this);
                        break;
                }
            } finally {
                $state1 = -1;
            }
            throw $tmp1;
        }
        return false;
    "#]]
    .assert_eq(&print_statements(&block.body));
}

#[test]
fn iterator_without_finally_has_no_disposer() {
    let (block, _) = lower_iterator("yield return 1; yield return 2;");
    assert!(block.disposer.is_none());
    assert!(block.finally_handlers.is_empty());
    assert!(matches!(block.body.as_slice(), [Statement::Labeled(..), Statement::Return(_)]));
}

#[test]
fn async_guard_skips_finally_on_suspension() {
    let lowered = lower_async("try { await t; log('b'); } finally { log('f'); }\nreturn 1;");
    expect![[r#"
        var $state1 = 0, $tcs = new TaskCompletionSource(), $tmp1;
        $tmp1 = function() {
            var $tmp2 = true;
            try {
                $loop1: for (;;) {
                    switch ($state1) {
                        case 0:
                        case 1: {
                            try {
                                $loop2: for (;;) {
                                    switch ($state1) {
                                        case 0: {
                                            $state1 = 1;
                                            t.onCompleted($tmp1);
                                            $tmp2 = false;
                                            return;
                                        }
                                        case 1: {
                                            log("b");
                                            $state1 = -1;
                                            break $loop2;
                                        }
                                        default: {
                                            break $loop2;
                                        }
                                    }
                                }
                            } finally {
                                if ($tmp2) {
                                    log("f");
                                }
                            }
                            {
                                $tcs.setResult(1);
                                return;
                            }
                        }
                        default: {
                            break $loop1;
                        }
                    }
                }
                $tcs.setResult();
            } catch ($tmp3) {
                $tcs.setException($tmp3);
            }
        };
        $tmp1();
        return $tcs.task;
    "#]]
    .assert_eq(&print_statements(&lowered));
}

#[test]
fn goto_loops_back_to_label() {
    let obs = check_normal(
        "var i = 0;\n\
         top: log(i);\n\
         i++;\n\
         if (i < 3) goto top;\n\
         return i;",
    );
    assert_eq!(obs.log, vec!["0", "1", "2"]);
    assert_eq!(obs.outcome, "return 3");
}

#[test]
fn labeled_continue_across_split_loops() {
    let obs = check_normal(
        "var n = 0;\n\
         outer: while (n < 3) {\n\
           n++;\n\
           inner: for (var j = 0; j < 3; j++) {\n\
             if (j == 1) continue outer;\n\
             log(n, j);\n\
             mark: log('m');\n\
           }\n\
         }\n\
         return n;",
    );
    assert_eq!(obs.log, vec!["1 0", "m", "2 0", "m", "3 0", "m"]);
    assert_eq!(obs.outcome, "return 3");
}

#[test]
fn do_while_with_label_in_body() {
    let obs = check_normal(
        "var i = 0;\n\
         do { i++; if (i == 2) continue; lbl: log(i); } while (i < 3);\n\
         return i;",
    );
    assert_eq!(obs.log, vec!["1", "3"]);
}

#[test]
fn switch_clauses_become_states() {
    let obs = check_normal(
        "var r = [];\n\
         for (var i = 0; i < 4; i++) {\n\
           switch (i) {\n\
             case 0: r.push('zero');\n\
             case 1: r.push('one'); break;\n\
             case 2: lbl: r.push('two'); goto done;\n\
             default: r.push('other');\n\
           }\n\
         }\n\
         done: return r;",
    );
    assert_eq!(obs.outcome, "return zero,one,one,two");
}

#[test]
fn for_in_keys_are_snapshotted() {
    let obs = check_normal(
        "var a = [10, 20, 30]; var s = 0;\n\
         for (var k in a) { if (k == 1) continue; s += a[k]; lbl: log(k); }\n\
         return s;",
    );
    assert_eq!(obs.log, vec!["0", "2"]);
    assert_eq!(obs.outcome, "return 40");
}

#[test]
fn labeled_block_break_leaves_split_region() {
    let obs = check_normal(
        "var x = 0;\n\
         blk: { x = 1; if (x) break blk; inner: x = 2; }\n\
         return x;",
    );
    assert_eq!(obs.outcome, "return 1");
}

#[test]
fn nested_functions_are_lowered_separately() {
    let source = "var f = function() { var k = 0; again: k++; if (k < 3) goto again; return k; };\n\
                  return f();";
    let lowered = lower_normal(source);
    let Statement::Variable(decl) = &lowered[0] else {
        panic!("expected declaration, got {lowered:?}");
    };
    let Some(Expression::Function(f)) = &decl.declarations[0].init else {
        panic!("expected function literal");
    };
    assert!(matches!(f.body.as_slice(), [Statement::Variable(_), Statement::Labeled(..)]));
    assert_eq!(check_normal(source).outcome, "return 3");
}

#[test]
fn try_finally_around_goto_runs_once() {
    let obs = check_normal(
        "var i = 0;\n\
         again: try { i++; if (i < 3) goto again; } finally { log('f', i); }\n\
         return i;",
    );
    assert_eq!(obs.log, vec!["f 1", "f 2", "f 3"]);
}

#[test]
fn iterator_produces_in_order() {
    let source = "var i = 0;\n\
                  while (true) { i++; if (i > 3) yield break; yield return i * 10; }";
    let obs = check_iterator(source, None);
    assert_eq!(obs.produced, vec!["10", "20", "30"]);
    assert_eq!(obs.outcome, "done");
}

#[test]
fn iterator_goto_between_yields() {
    let obs = check_iterator(
        "var i = 0;\ntop: yield return i;\ni++;\nif (i < 3) goto top;",
        None,
    );
    assert_eq!(obs.produced, vec!["0", "1", "2"]);
}

#[test]
fn iterator_finally_runs_exactly_once() {
    let source = "log('start');\n\
                  try { yield return 1; log('mid'); yield return 2; } finally { log('cleanup'); }\n\
                  yield return 3;";
    let obs = check_iterator(source, None);
    assert_eq!(obs.log, vec!["start", "mid", "cleanup"]);
    assert_eq!(obs.produced, vec!["1", "2", "3"]);

    let obs = check_iterator(source, Some(1));
    assert_eq!(obs.log, vec!["start", "cleanup"]);
    assert_eq!(obs.outcome, "disposed");

    let obs = check_iterator(source, Some(3));
    assert_eq!(obs.log, vec!["start", "mid", "cleanup"]);
}

#[test]
fn iterator_break_out_of_guarded_loop() {
    let source = "for (var i = 0; i < 3; i++) {\n\
                    try { yield return i; if (i == 1) break; } finally { log('f', i); }\n\
                  }\n\
                  log('end');";
    let obs = check_iterator(source, None);
    assert_eq!(obs.log, vec!["f 0", "f 1", "end"]);
    assert_eq!(obs.produced, vec!["0", "1"]);

    let obs = check_iterator(source, Some(1));
    assert_eq!(obs.log, vec!["f 0"]);
}

#[test]
fn nested_finally_handlers_dispose_inner_first() {
    let source = "try {\n\
                    yield return 1;\n\
                    try { yield return 2; } finally { log('inner'); }\n\
                    yield return 3;\n\
                  } finally { log('outer'); }";
    let obs = check_iterator(source, Some(2));
    assert_eq!(obs.log, vec!["inner", "outer"]);
    let obs = check_iterator(source, Some(3));
    assert_eq!(obs.log, vec!["inner", "outer"]);
    let obs = check_iterator(source, None);
    assert_eq!(obs.produced, vec!["1", "2", "3"]);
}

#[test]
fn jump_out_of_inner_finally_runs_it_before_outer() {
    let obs = check_iterator(
        "try { yield return 1; try { yield break; } finally { log('inner'); } }\n\
         finally { log('outer'); }",
        None,
    );
    assert_eq!(obs.log, vec!["inner", "outer"]);
    assert_eq!(obs.produced, vec!["1"]);

    let source = "while (true) {\n\
                    try { yield return 1; try { break; } finally { log('inner'); } }\n\
                    finally { log('outer'); }\n\
                  }\n\
                  log('end');";
    let obs = check_iterator(source, None);
    assert_eq!(obs.log, vec!["inner", "outer", "end"]);
    let obs = check_iterator(source, Some(1));
    assert_eq!(obs.log, vec!["outer"]);
}

#[test]
fn jump_out_of_inner_try_catch_finally() {
    let obs = check_iterator(
        "for (var i = 0; i < 2; i++) {\n\
           try {\n\
             yield return i;\n\
             try { if (i == 1) break; throw 'x'; }\n\
             catch (e) { log('caught', i); }\n\
             finally { log('inner', i); }\n\
           } finally { log('outer', i); }\n\
         }\n\
         log('end');",
        None,
    );
    assert_eq!(
        obs.log,
        vec!["caught 0", "inner 0", "outer 0", "inner 1", "outer 1", "end"]
    );
    assert_eq!(obs.produced, vec!["0", "1"]);
}

#[test]
fn reused_label_names_get_their_own_states() {
    let obs = check_normal("var i = 0; { l: i++; } { l: i += 10; } return i;");
    assert_eq!(obs.outcome, "return 11");

    let obs = check_normal(
        "var n = 0;\n\
         { l: n++; if (n < 2) goto l; }\n\
         { l: n += 10; if (n < 20) goto l; }\n\
         return n;",
    );
    assert_eq!(obs.outcome, "return 22");
}

#[test]
fn async_resumes_after_each_await() {
    let obs = check_async(
        "log('a');\n\
         try { await t; log('b'); } finally { log('f'); }\n\
         log('c');\n\
         return 7;",
    );
    assert_eq!(obs.log, vec!["a", "b", "f", "c"]);
    assert_eq!(obs.outcome, "resolved 7");
}

#[test]
fn async_loop_and_catch() {
    let obs = check_async(
        "var total = 0;\n\
         for (var i = 0; i < 3; i++) { await t; total += i; }\n\
         try { await t; throw 'boom'; } catch (e) { log('caught', e); }\n\
         return total;",
    );
    assert_eq!(obs.log, vec!["caught boom"]);
    assert_eq!(obs.outcome, "resolved 3");
}

#[test]
fn async_failure_rejects() {
    let obs = check_async("await t; throw 'bad';");
    assert_eq!(obs.outcome, "rejected \"bad\"");
}

#[test]
fn unsupported_shapes_are_reported() {
    let mut services = DefaultServices::new();
    assert_eq!(
        rewrite_iterator_block(parse("try { yield return 1; } catch (e) { }"), &mut services),
        Err(LoweringError::YieldInsideTryCatch)
    );
    assert_eq!(
        rewrite_iterator_block(parse("return 1;"), &mut services),
        Err(LoweringError::ReturnValueInIterator)
    );
    assert_eq!(
        rewrite_async_function(parse("try { a; } finally { await t; }"), &mut services),
        Err(LoweringError::SuspensionInHandler {
            kind: "await",
            clause: "finally",
        })
    );
    assert_eq!(
        rewrite_normal_function(parse("goto nowhere;"), &mut services),
        Err(LoweringError::UnresolvedLabel("nowhere".into()))
    );
}

/// Case ids of every `$loopN: for (;;) switch (..)` dispatch loop in `stmts`.
fn dispatch_cases(stmts: &[Statement], out: &mut Vec<(String, Vec<i32>)>) {
    for stmt in stmts {
        dispatch_cases_in(stmt, out);
    }
}

fn dispatch_cases_in(stmt: &Statement, out: &mut Vec<(String, Vec<i32>)>) {
    match stmt {
        Statement::Labeled(label, body) => {
            if let Statement::For(f) = body.as_ref()
                && let Statement::Block(inner) = f.body.as_ref()
                && let [Statement::Switch(switch)] = inner.as_slice()
            {
                let ids = switch
                    .cases
                    .iter()
                    .flat_map(|case| case.tests.iter().flatten())
                    .filter_map(|test| match test {
                        Expression::Literal(Literal::Number(n)) => Some(*n as i32),
                        _ => None,
                    })
                    .collect();
                out.push((label.clone(), ids));
            }
            dispatch_cases_in(body, out);
        }
        Statement::Block(stmts) => dispatch_cases(stmts, out),
        Statement::Expression(expr) => function_cases(expr, out),
        Statement::Variable(decl) => {
            for init in decl.declarations.iter().filter_map(|d| d.init.as_ref()) {
                function_cases(init, out);
            }
        }
        Statement::If(s) => {
            dispatch_cases_in(&s.consequent, out);
            if let Some(alternate) = &s.alternate {
                dispatch_cases_in(alternate, out);
            }
        }
        Statement::While(s) => dispatch_cases_in(&s.body, out),
        Statement::DoWhile(s) => dispatch_cases_in(&s.body, out),
        Statement::For(s) => dispatch_cases_in(&s.body, out),
        Statement::ForIn(s) => dispatch_cases_in(&s.body, out),
        Statement::Try(s) => {
            dispatch_cases(&s.block, out);
            if let Some(handler) = &s.handler {
                dispatch_cases(&handler.body, out);
            }
            if let Some(finalizer) = &s.finalizer {
                dispatch_cases(finalizer, out);
            }
        }
        Statement::Switch(s) => {
            for case in &s.cases {
                dispatch_cases(&case.consequent, out);
            }
        }
        _ => {}
    }
}

fn function_cases(expr: &Expression, out: &mut Vec<(String, Vec<i32>)>) {
    match expr {
        Expression::Function(f) => dispatch_cases(&f.body, out),
        Expression::Assign(_, _, value) => function_cases(value, out),
        _ => {}
    }
}

fn assert_unique_states(stmts: &[Statement]) -> Vec<(String, Vec<i32>)> {
    let mut loops = Vec::new();
    dispatch_cases(stmts, &mut loops);
    assert!(!loops.is_empty(), "no dispatch loop in:\n{}", print_statements(stmts));
    for (label, ids) in &loops {
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len(), "duplicate case in {label}: {ids:?}");
    }
    loops
}

#[test]
fn do_while_without_break_has_no_merge_state() {
    let loops = assert_unique_states(&lower_normal("{ do { a; lbl1: b; } while (c); d; }"));
    assert_eq!(loops.len(), 1);
    let mut ids = loops[0].1.clone();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn states_are_unique_per_dispatch_loop() {
    assert_unique_states(&lower_normal(
        "var i = 0;\n\
         top: i++;\n\
         switch (i) { case 1: one: log(1); break; default: log(2); }\n\
         try { if (i < 3) goto top; } finally { log('f'); }\n\
         for (var k in [1, 2]) { inner: log(k); }",
    ));
    let (block, _) = lower_iterator(
        "try { yield return 1; try { yield return 2; } finally { log('a'); } }\n\
         finally { log('b'); }",
    );
    assert_unique_states(&block.body);
    assert_unique_states(&lower_async(
        "try { await t; log(1); } finally { log(2); }\n\
         lbl: await t;",
    ));
}
