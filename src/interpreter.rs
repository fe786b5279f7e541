//! Reference evaluator for statement trees.
//!
//! Runs a body in its structured form (where `yield return` appends to a
//! list, `await` completes immediately and `goto` transfers within the
//! enclosing statement list) as well as in its lowered form, so both can be
//! compared by what they observably do.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ast::*;
use crate::lower::IteratorBlock;

mod eval;
mod exec;
mod value;

pub use value::{Builtin, Closure, TaskState, Value};

const DEFAULT_STEP_LIMIT: usize = 100_000;

#[derive(Clone, Debug)]
pub enum Completion {
    Normal(Value),
    Return(Value),
    Throw(Value),
    Break(Option<String>),
    Continue(Option<String>),
    Goto(String),
    /// An iterator was disposed at a `yield return`; only `finally` blocks run.
    Halt,
}

impl Completion {
    pub(crate) fn is_abrupt(&self) -> bool {
        !matches!(self, Completion::Normal(_))
    }
}

pub(crate) type EnvRef = Rc<RefCell<Environment>>;

pub struct Environment {
    bindings: FxHashMap<String, Value>,
    parent: Option<EnvRef>,
    /// Receives `var` declarations.
    is_function_scope: bool,
}

impl Environment {
    pub fn new(parent: Option<EnvRef>, is_function_scope: bool) -> EnvRef {
        Rc::new(RefCell::new(Environment {
            bindings: FxHashMap::default(),
            parent,
            is_function_scope,
        }))
    }

    pub fn declare(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        match self.bindings.get(name) {
            Some(v) => Some(v.clone()),
            None => self.parent.as_ref().and_then(|p| p.borrow().get(name)),
        }
    }

    /// Assigns to the nearest binding, falling back to the outermost scope.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            return;
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().set(name, value),
            None => self.declare(name, value),
        }
    }
}

/// Nearest scope that owns `var` bindings.
fn function_scope(env: &EnvRef) -> EnvRef {
    let mut current = env.clone();
    loop {
        let parent = {
            let e = current.borrow();
            if e.is_function_scope {
                return current.clone();
            }
            e.parent.clone()
        };
        match parent {
            Some(p) => current = p,
            None => return current,
        }
    }
}

/// What a run of a body left behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// Lines written by `log(...)`.
    pub log: Vec<String>,
    /// Values produced by an iterator, in order.
    pub produced: Vec<String>,
    pub outcome: String,
}

pub struct Interpreter {
    global: EnvRef,
    log: Vec<String>,
    produced: Vec<Value>,
    /// Continuations registered through `onCompleted`.
    jobs: VecDeque<Value>,
    /// Values after which a structured iterator is disposed.
    take: Option<usize>,
    steps: usize,
    step_limit: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let global = Environment::new(None, true);
        {
            let mut g = global.borrow_mut();
            g.declare("log", Value::Builtin(Builtin::Log));
            g.declare(
                "TaskCompletionSource",
                Value::Builtin(Builtin::TaskCompletionSource),
            );
        }
        Interpreter {
            global,
            log: Vec::new(),
            produced: Vec::new(),
            jobs: VecDeque::new(),
            take: None,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Declares a global binding visible to every body run afterwards.
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.global.borrow_mut().declare(name, value);
    }

    fn observation(&mut self, outcome: String) -> Observation {
        Observation {
            log: std::mem::take(&mut self.log),
            produced: self.produced.drain(..).map(|v| v.to_string()).collect(),
            outcome,
        }
    }

    fn function_env(&self) -> EnvRef {
        Environment::new(Some(self.global.clone()), true)
    }

    /// Runs a synchronous body as the body of a function call.
    pub fn run_body(&mut self, body: &[Statement]) -> Observation {
        let env = self.function_env();
        self.hoist_declarations(body, &env);
        let outcome = match self.exec_statements(body, &env) {
            Completion::Normal(_) => "return undefined".to_string(),
            Completion::Return(v) => format!("return {v:?}"),
            Completion::Throw(v) => format!("throw {v:?}"),
            other => format!("error: escaped {other:?}"),
        };
        self.observation(outcome)
    }

    /// Runs a structured iterator body to completion, or until `take` values
    /// have been produced.
    pub fn run_iterator(&mut self, body: &[Statement], take: Option<usize>) -> Observation {
        self.take = take;
        let env = self.function_env();
        self.hoist_declarations(body, &env);
        let completion = self.exec_statements(body, &env);
        self.take = None;
        let outcome = match completion {
            Completion::Normal(_) | Completion::Return(_) => "done".to_string(),
            Completion::Halt => "disposed".to_string(),
            Completion::Throw(v) => format!("throw {v:?}"),
            other => format!("error: escaped {other:?}"),
        };
        self.observation(outcome)
    }

    /// Drives a lowered iterator: calls the resume routine until it reports
    /// exhaustion, and runs the disposer once `take` values were produced.
    pub fn drive_iterator(
        &mut self,
        block: &IteratorBlock,
        current: &str,
        take: Option<usize>,
    ) -> Observation {
        let env = self.function_env();
        env.borrow_mut().declare(current, Value::Undefined);
        for declarator in &block.variables {
            env.borrow_mut().declare(&declarator.name, Value::Undefined);
        }
        for declarator in &block.variables {
            if let Some(init) = &declarator.init {
                match self.eval_expr(init, &env) {
                    Ok(v) => env.borrow_mut().declare(&declarator.name, v),
                    Err(e) => return self.observation(format!("throw {e:?}")),
                }
            }
        }
        for handler in &block.finally_handlers {
            let closure = Value::Function(Rc::new(Closure {
                function: handler.function.clone(),
                env: env.clone(),
            }));
            env.borrow_mut().declare(&handler.name, closure);
        }
        self.hoist_declarations(&block.body, &env);

        loop {
            let resumed = match self.exec_statements(&block.body, &env) {
                Completion::Return(v) => v.is_truthy(),
                Completion::Normal(_) => false,
                Completion::Throw(v) => return self.observation(format!("throw {v:?}")),
                other => return self.observation(format!("error: escaped {other:?}")),
            };
            if !resumed {
                return self.observation("done".to_string());
            }
            let value = env.borrow().get(current).unwrap_or(Value::Undefined);
            trace!(target: "interpreter", value = %value, "iterator produced");
            self.produced.push(value);
            if take.is_some_and(|n| self.produced.len() >= n) {
                if let Some(disposer) = &block.disposer {
                    match self.exec_statement(disposer, &env) {
                        Completion::Normal(_) => {}
                        Completion::Throw(v) => {
                            return self.observation(format!("throw {v:?}"));
                        }
                        other => return self.observation(format!("error: escaped {other:?}")),
                    }
                }
                return self.observation("disposed".to_string());
            }
        }
    }

    /// Runs a structured async body; every `await` completes immediately.
    pub fn run_async(&mut self, body: &[Statement]) -> Observation {
        let env = self.function_env();
        self.hoist_declarations(body, &env);
        let outcome = match self.exec_statements(body, &env) {
            Completion::Normal(_) => "resolved undefined".to_string(),
            Completion::Return(v) => format!("resolved {v:?}"),
            Completion::Throw(v) => format!("rejected {v:?}"),
            other => format!("error: escaped {other:?}"),
        };
        self.observation(outcome)
    }

    /// Runs a lowered async body, then every continuation it registers, and
    /// reports the state of the task it returned.
    pub fn drive_async(&mut self, body: &[Statement]) -> Observation {
        let env = self.function_env();
        self.hoist_declarations(body, &env);
        let task = match self.exec_statements(body, &env) {
            Completion::Return(v) => v,
            Completion::Normal(_) => Value::Undefined,
            Completion::Throw(v) => return self.observation(format!("throw {v:?}")),
            other => return self.observation(format!("error: escaped {other:?}")),
        };
        while let Some(job) = self.jobs.pop_front() {
            if let Err(e) = self.call_value(&job, Value::Undefined, Vec::new()) {
                return self.observation(format!("throw {e:?}"));
            }
        }
        let outcome = match &task {
            Value::Task(state) => match &*state.borrow() {
                TaskState::Pending => "pending".to_string(),
                TaskState::Resolved(v) => format!("resolved {v:?}"),
                TaskState::Rejected(v) => format!("rejected {v:?}"),
            },
            other => format!("error: not a task: {other:?}"),
        };
        self.observation(outcome)
    }

    /// Counts one executed statement; errors once the limit is exceeded.
    fn tick(&mut self) -> Result<(), Value> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(Value::string("step limit exceeded"));
        }
        Ok(())
    }

    /// Declares every `var` of a body up front, without entering nested
    /// functions.
    fn hoist_declarations(&self, stmts: &[Statement], env: &EnvRef) {
        for stmt in stmts {
            self.hoist_statement(stmt, env);
        }
    }

    fn hoist_statement(&self, stmt: &Statement, env: &EnvRef) {
        let declare = |name: &str| {
            if !env.borrow().has_binding(name) {
                env.borrow_mut().declare(name, Value::Undefined);
            }
        };
        match stmt {
            Statement::Variable(decl) => decl.declarations.iter().for_each(|d| declare(&d.name)),
            Statement::Block(stmts) => self.hoist_declarations(stmts, env),
            Statement::If(s) => {
                self.hoist_statement(&s.consequent, env);
                if let Some(alt) = &s.alternate {
                    self.hoist_statement(alt, env);
                }
            }
            Statement::While(WhileStatement { body, .. })
            | Statement::DoWhile(DoWhileStatement { body, .. })
            | Statement::Labeled(_, body) => self.hoist_statement(body, env),
            Statement::For(s) => {
                if let Some(ForInit::Variable(decl)) = &s.init {
                    decl.declarations.iter().for_each(|d| declare(&d.name));
                }
                self.hoist_statement(&s.body, env);
            }
            Statement::ForIn(s) => {
                if let ForInLeft::Variable(name) = &s.left {
                    declare(name);
                }
                self.hoist_statement(&s.body, env);
            }
            Statement::Try(s) => {
                self.hoist_declarations(&s.block, env);
                if let Some(handler) = &s.handler {
                    self.hoist_declarations(&handler.body, env);
                }
                if let Some(finalizer) = &s.finalizer {
                    self.hoist_declarations(finalizer, env);
                }
            }
            Statement::Switch(s) => {
                for case in &s.cases {
                    self.hoist_declarations(&case.consequent, env);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;

    fn run(source: &str) -> Observation {
        Interpreter::new().run_body(&parse_body(source).unwrap())
    }

    #[test]
    fn arithmetic_and_log() {
        let obs = run("var x = 2; log('x', x * 3 + 1); return x - 5;");
        assert_eq!(obs.log, vec!["x 7"]);
        assert_eq!(obs.outcome, "return -3");
    }

    #[test]
    fn log_formats_numbers_like_javascript() {
        let obs = run("log(1e21, 1e-7, 0.1 + 0.2, 1 / 0);");
        assert_eq!(obs.log, vec!["1e+21 1e-7 0.30000000000000004 Infinity"]);
    }

    #[test]
    fn goto_moves_within_statement_list() {
        let obs = run("var i = 0; top: log(i); i++; if (i < 3) goto top; return i;");
        assert_eq!(obs.log, vec!["0", "1", "2"]);
        assert_eq!(obs.outcome, "return 3");
    }

    #[test]
    fn goto_leaves_loops_and_runs_finally() {
        let obs = run(
            "while (true) { try { goto out; } finally { log('f'); } }\n\
             out: log('out');",
        );
        assert_eq!(obs.log, vec!["f", "out"]);
    }

    #[test]
    fn labeled_continue_targets_outer_loop() {
        let obs = run(
            "outer: for (var i = 0; i < 3; i++) { for (var j = 0; j < 3; j++) {\n\
               if (j == 1) continue outer; log(i, j); } }",
        );
        assert_eq!(obs.log, vec!["0 0", "1 0", "2 0"]);
    }

    #[test]
    fn structured_iterator_collects_values() {
        let body = parse_body(
            "try { yield return 1; yield return 2; } finally { log('cleanup'); }\n\
             yield return 3;",
        )
        .unwrap();
        let obs = Interpreter::new().run_iterator(&body, None);
        assert_eq!(obs.produced, vec!["1", "2", "3"]);
        assert_eq!(obs.log, vec!["cleanup"]);
        assert_eq!(obs.outcome, "done");

        let obs = Interpreter::new().run_iterator(&body, Some(1));
        assert_eq!(obs.produced, vec!["1"]);
        assert_eq!(obs.log, vec!["cleanup"]);
        assert_eq!(obs.outcome, "disposed");
    }

    #[test]
    fn catch_does_not_see_disposal() {
        let body = parse_body("try { yield return 1; } catch (e) { log('caught'); }").unwrap();
        let obs = Interpreter::new().run_iterator(&body, Some(1));
        assert!(obs.log.is_empty());
        assert_eq!(obs.outcome, "disposed");
    }

    #[test]
    fn structured_async_settles() {
        let body = parse_body("await t; log('after'); return 5;").unwrap();
        let mut interp = Interpreter::new();
        interp.define_global("t", Value::Null);
        let obs = interp.run_async(&body);
        assert_eq!(obs.log, vec!["after"]);
        assert_eq!(obs.outcome, "resolved 5");

        let body = parse_body("throw 'bad';").unwrap();
        assert_eq!(Interpreter::new().run_async(&body).outcome, "rejected \"bad\"");
    }

    #[test]
    fn runaway_loops_are_cut_off() {
        let body = parse_body("while (true) {}").unwrap();
        let obs = Interpreter::new().with_step_limit(50).run_body(&body);
        assert_eq!(obs.outcome, "throw \"step limit exceeded\"");
    }
}
