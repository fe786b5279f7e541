//! Boolean visitors over statement trees. None of them look inside function
//! literals, which are lowered on their own.

use crate::ast::Statement;

/// Direct child statements of `stmt`.
pub fn children(stmt: &Statement) -> Vec<&Statement> {
    match stmt {
        Statement::Block(stmts) => stmts.iter().collect(),
        Statement::If(s) => {
            let mut out = vec![s.consequent.as_ref()];
            out.extend(s.alternate.as_deref());
            out
        }
        Statement::While(s) => vec![s.body.as_ref()],
        Statement::DoWhile(s) => vec![s.body.as_ref()],
        Statement::For(s) => vec![s.body.as_ref()],
        Statement::ForIn(s) => vec![s.body.as_ref()],
        Statement::Labeled(_, body) => vec![body.as_ref()],
        Statement::Try(s) => {
            let mut out: Vec<&Statement> = s.block.iter().collect();
            if let Some(handler) = &s.handler {
                out.extend(handler.body.iter());
            }
            if let Some(finalizer) = &s.finalizer {
                out.extend(finalizer.iter());
            }
            out
        }
        Statement::Switch(s) => s.cases.iter().flat_map(|c| c.consequent.iter()).collect(),
        _ => Vec::new(),
    }
}

/// Whether `pred` holds for `stmt` or any statement nested in it.
pub fn any_statement(stmt: &Statement, pred: &mut impl FnMut(&Statement) -> bool) -> bool {
    pred(stmt) || children(stmt).into_iter().any(|child| any_statement(child, pred))
}

pub fn any_in(stmts: &[Statement], pred: &mut impl FnMut(&Statement) -> bool) -> bool {
    stmts.iter().any(|stmt| any_statement(stmt, pred))
}

fn is_suspension(stmt: &Statement) -> bool {
    matches!(stmt, Statement::Yield(Some(_)) | Statement::Await(_))
}

/// A region needs its own sections when it holds a label or a suspension
/// point; otherwise it is emitted whole through the jump rewriter.
pub fn requires_splitting(stmt: &Statement) -> bool {
    any_statement(stmt, &mut |s| {
        matches!(s, Statement::Labeled(..)) || is_suspension(s)
    })
}

pub fn block_requires_splitting(stmts: &[Statement]) -> bool {
    stmts.iter().any(requires_splitting)
}

pub fn contains_suspension(stmts: &[Statement]) -> bool {
    any_in(stmts, &mut is_suspension)
}

/// Whether a body uses labels or `goto` and needs a dispatch loop.
pub fn contains_labels_or_goto(stmts: &[Statement]) -> bool {
    any_in(stmts, &mut |s| {
        matches!(s, Statement::Labeled(..) | Statement::Goto(_))
    })
}

/// Whether some `break` in `body` leaves the statement labelled `label`
/// (or, for a loop, breaks out of it unlabeled).
pub fn contains_break_to_label(body: &Statement, label: Option<&str>, is_loop: bool) -> bool {
    fn visit(stmt: &Statement, label: Option<&str>, unlabeled_reaches: bool) -> bool {
        match stmt {
            Statement::Break(None) => unlabeled_reaches,
            Statement::Break(Some(target)) => Some(target.as_str()) == label,
            Statement::While(_)
            | Statement::DoWhile(_)
            | Statement::For(_)
            | Statement::ForIn(_)
            | Statement::Switch(_) => children(stmt)
                .into_iter()
                .any(|child| visit(child, label, false)),
            _ => children(stmt)
                .into_iter()
                .any(|child| visit(child, label, unlabeled_reaches)),
        }
    }
    visit(body, label, is_loop)
}

/// Whether `stmts` hold a `break`, `continue`, `goto`, `return` or
/// `yield break`, any of which may leave an enclosing try.
pub fn contains_jump(stmts: &[Statement]) -> bool {
    any_in(stmts, &mut |s| {
        matches!(
            s,
            Statement::Break(_)
                | Statement::Continue(_)
                | Statement::Goto(_)
                | Statement::Return(_)
                | Statement::Yield(None)
        )
    })
}

/// Whether `stmt` holds a try with a finally clause whose block may jump.
pub fn contains_jumping_finally(stmt: &Statement) -> bool {
    any_statement(stmt, &mut |s| match s {
        Statement::Try(t) => t.finalizer.is_some() && contains_jump(&t.block),
        _ => false,
    })
}

/// Whether control never runs past `stmt`.
pub fn always_exits(stmt: &Statement) -> bool {
    match stmt {
        Statement::Return(_) | Statement::Throw(_) | Statement::Jump(_) => true,
        Statement::Block(stmts) => stmts.last().is_some_and(always_exits),
        Statement::If(s) => {
            always_exits(&s.consequent) && s.alternate.as_deref().is_some_and(always_exits)
        }
        _ => false,
    }
}

/// Whether a suspension point sits in the guarded block of a try that has
/// a finally clause.
pub fn has_suspend_inside_try_with_finally(stmts: &[Statement]) -> bool {
    any_in(stmts, &mut |s| match s {
        Statement::Try(t) => t.finalizer.is_some() && contains_suspension(&t.block),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;

    fn first(src: &str) -> Statement {
        parse_body(src).unwrap().remove(0)
    }

    #[test]
    fn splitting_needed_for_labels_and_suspensions() {
        assert!(requires_splitting(&first("{ a; lbl: b; }")));
        assert!(requires_splitting(&first("while (x) { yield return 1; }")));
        assert!(requires_splitting(&first("if (x) await t;")));
        assert!(!requires_splitting(&first("while (x) { if (y) break; }")));
        assert!(!requires_splitting(&first("yield break;")));
    }

    #[test]
    fn nested_functions_are_opaque() {
        let body = parse_body("var f = function() { lbl: a; goto lbl; };").unwrap();
        assert!(!block_requires_splitting(&body));
        assert!(!contains_labels_or_goto(&body));
    }

    #[test]
    fn break_to_loop_detection() {
        let body = first("{ a; lbl1: b; }");
        assert!(!contains_break_to_label(&body, None, true));

        let body = first("{ if (x) break; }");
        assert!(contains_break_to_label(&body, None, true));

        // Unlabeled breaks inside inner loops and switches stay local.
        let body = first("{ while (y) break; switch (z) { case 1: break; } }");
        assert!(!contains_break_to_label(&body, None, true));

        let body = first("{ while (y) { break outer; } }");
        assert!(contains_break_to_label(&body, Some("outer"), true));
        assert!(!contains_break_to_label(&body, Some("other"), true));

        // A labeled block only sees labeled breaks.
        let body = first("{ if (x) break; }");
        assert!(!contains_break_to_label(&body, Some("blk"), false));
    }

    #[test]
    fn jumps_inside_finally_guarded_blocks() {
        assert!(contains_jumping_finally(&first(
            "while (x) { try { if (y) break; } finally { a; } }"
        )));
        assert!(contains_jumping_finally(&first("try { yield break; } finally { a; }")));
        assert!(!contains_jumping_finally(&first("try { yield return 1; } finally { a; }")));
        assert!(!contains_jumping_finally(&first("try { break; } catch (e) { a; }")));
        assert!(!contains_jumping_finally(&first(
            "try { var f = function() { return 1; }; } finally { a; }"
        )));
    }

    #[test]
    fn exits_through_every_branch() {
        assert!(always_exits(&first("{ a; return 1; }")));
        assert!(always_exits(&first("if (x) throw e; else { return; }")));
        assert!(!always_exits(&first("if (x) return;")));
        assert!(!always_exits(&first("{ return 1; a; }")));
        assert!(!always_exits(&first("while (x) return;")));
    }

    #[test]
    fn suspend_inside_try_with_finally() {
        let body = parse_body("try { await t; } finally { a; }").unwrap();
        assert!(has_suspend_inside_try_with_finally(&body));

        let body = parse_body("try { await t; } catch (e) { a; }").unwrap();
        assert!(!has_suspend_inside_try_with_finally(&body));

        let body = parse_body("await t; try { a; } finally { b; }").unwrap();
        assert!(!has_suspend_inside_try_with_finally(&body));
    }
}
