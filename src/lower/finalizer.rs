//! Resolves pending jumps once every label has a state: assigns the state
//! variable, runs the finally handlers being left, and re-enters or leaves
//! the dispatch loop.

use rustc_hash::FxHashMap;

use super::state::State;
use crate::ast::*;
use crate::error::{LoweringError, LoweringResult};

pub(super) struct Finalizer<'a> {
    state_var: &'a str,
    labels: &'a FxHashMap<String, State>,
}

impl<'a> Finalizer<'a> {
    pub(super) fn new(state_var: &'a str, labels: &'a FxHashMap<String, State>) -> Self {
        Finalizer { state_var, labels }
    }

    fn set_state(&self, id: i32) -> Statement {
        Statement::Expression(Expression::assign(
            Expression::ident(self.state_var),
            Expression::number(id as f64),
        ))
    }

    pub(super) fn resolve_all(&self, stmts: Vec<Statement>) -> LoweringResult<Vec<Statement>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            out.extend(self.resolve(stmt)?);
        }
        Ok(out)
    }

    /// Resolves a statement in a single-statement position.
    pub(super) fn resolve_one(&self, stmt: Statement) -> LoweringResult<Statement> {
        let mut stmts = self.resolve(stmt)?;
        if stmts.len() == 1 {
            Ok(stmts.remove(0))
        } else {
            Ok(Statement::Block(stmts))
        }
    }

    fn resolve_boxed(&self, stmt: Box<Statement>) -> LoweringResult<Box<Statement>> {
        self.resolve_one(*stmt).map(Box::new)
    }

    fn resolve(&self, stmt: Statement) -> LoweringResult<Vec<Statement>> {
        let stmt = match stmt {
            Statement::Jump(jump) => return self.jump(jump),
            Statement::SetNextState(id) => self.set_state(id),
            Statement::Block(stmts) => Statement::Block(self.resolve_all(stmts)?),
            Statement::If(s) => Statement::If(IfStatement {
                test: s.test,
                consequent: self.resolve_boxed(s.consequent)?,
                alternate: s.alternate.map(|alt| self.resolve_boxed(alt)).transpose()?,
            }),
            Statement::While(s) => Statement::While(WhileStatement {
                test: s.test,
                body: self.resolve_boxed(s.body)?,
            }),
            Statement::DoWhile(s) => Statement::DoWhile(DoWhileStatement {
                test: s.test,
                body: self.resolve_boxed(s.body)?,
            }),
            Statement::For(s) => Statement::For(ForStatement {
                body: self.resolve_boxed(s.body)?,
                ..s
            }),
            Statement::ForIn(s) => Statement::ForIn(ForInStatement {
                body: self.resolve_boxed(s.body)?,
                ..s
            }),
            Statement::Labeled(label, body) => Statement::Labeled(label, self.resolve_boxed(body)?),
            Statement::Switch(s) => Statement::Switch(SwitchStatement {
                discriminant: s.discriminant,
                cases: s
                    .cases
                    .into_iter()
                    .map(|case| {
                        Ok(SwitchCase {
                            tests: case.tests,
                            consequent: self.resolve_all(case.consequent)?,
                        })
                    })
                    .collect::<LoweringResult<_>>()?,
            }),
            Statement::Try(s) => Statement::Try(TryStatement {
                block: self.resolve_all(s.block)?,
                handler: s
                    .handler
                    .map(|h| {
                        Ok::<_, LoweringError>(CatchClause {
                            param: h.param,
                            body: self.resolve_all(h.body)?,
                        })
                    })
                    .transpose()?,
                finalizer: s.finalizer.map(|f| self.resolve_all(f)).transpose()?,
            }),
            other => other,
        };
        Ok(vec![stmt])
    }

    fn jump(&self, jump: Jump) -> LoweringResult<Vec<Statement>> {
        let target = match jump.target {
            JumpTarget::State(state) => state,
            JumpTarget::Label(label) => match self.labels.get(&label) {
                Some(state) => state.clone(),
                None => return Err(LoweringError::UnresolvedLabel(label)),
            },
        };

        let origin_frames = jump.origin.frames_outer_to_inner();
        let target_frames = target.frames_outer_to_inner();
        let common = origin_frames
            .iter()
            .zip(&target_frames)
            .take_while(|(a, b)| a == b)
            .count();

        let mut out = Vec::new();
        for depth in (common..origin_frames.len()).rev() {
            let enclosing = match depth {
                0 => State::EXIT_ID,
                _ => origin_frames[depth - 1].state_id,
            };
            out.push(self.set_state(enclosing));
            out.push(Statement::Expression(Expression::method_call(
                Expression::ident(origin_frames[depth].handler.as_ref()),
                "call",
                vec![Expression::This],
            )));
        }

        let label = target.loop_label.to_string();
        if target.is_exit() {
            // Leaving a nested machine still inside a frame keeps that frame owed.
            let id = target
                .finally_stack
                .peek()
                .map_or(State::EXIT_ID, |frame| frame.state_id);
            out.push(self.set_state(id));
            out.push(Statement::Break(Some(label)));
        } else {
            out.push(self.set_state(target.id));
            out.push(Statement::Continue(Some(label)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::state::{FinallyFrame, Stack};
    use crate::printer::print_statements;
    use std::rc::Rc;

    fn frames(ids: &[(i32, &str)]) -> Stack<FinallyFrame> {
        ids.iter().fold(Stack::new(), |stack, (id, handler)| {
            stack.push(FinallyFrame {
                state_id: *id,
                handler: Rc::from(*handler),
            })
        })
    }

    fn state(id: i32, stack: Stack<FinallyFrame>) -> State {
        State {
            id,
            loop_label: Rc::from("$loop1"),
            finally_stack: stack,
        }
    }

    fn resolve(target: JumpTarget, origin: State, labels: &FxHashMap<String, State>) -> String {
        let finalizer = Finalizer::new("$state1", labels);
        let stmts = finalizer
            .resolve_all(vec![Statement::Jump(Jump { target, origin })])
            .unwrap();
        print_statements(&stmts)
    }

    #[test]
    fn plain_jump_continues_loop() {
        let labels = FxHashMap::default();
        let out = resolve(
            JumpTarget::State(state(4, Stack::new())),
            state(1, Stack::new()),
            &labels,
        );
        assert_eq!(out, "$state1 = 4;\ncontinue $loop1;\n");
    }

    #[test]
    fn leaving_frames_runs_handlers_innermost_first() {
        let labels = FxHashMap::default();
        let origin = state(5, frames(&[(2, "$finally1"), (4, "$finally2")]));
        let out = resolve(JumpTarget::State(state(6, Stack::new())), origin, &labels);
        assert_eq!(
            out,
            "$state1 = 2;\n$finally2.call(this);\n\
             $state1 = -1;\n$finally1.call(this);\n\
             $state1 = 6;\ncontinue $loop1;\n"
        );
    }

    #[test]
    fn shared_frames_are_not_left() {
        let labels = FxHashMap::default();
        let origin = state(5, frames(&[(2, "$finally1"), (4, "$finally2")]));
        let target = state(3, frames(&[(2, "$finally1")]));
        let out = resolve(JumpTarget::State(target), origin, &labels);
        assert_eq!(
            out,
            "$state1 = 2;\n$finally2.call(this);\n$state1 = 3;\ncontinue $loop1;\n"
        );
    }

    #[test]
    fn exit_inside_frame_keeps_frame_owed() {
        let labels = FxHashMap::default();
        let stack = frames(&[(2, "$finally1")]);
        let target = State::exit(Rc::from("$loop2"), stack.clone());
        let out = resolve(JumpTarget::State(target), state(7, stack), &labels);
        assert_eq!(out, "$state1 = 2;\nbreak $loop2;\n");
    }

    #[test]
    fn labels_resolve_through_table() {
        let mut labels = FxHashMap::default();
        labels.insert("lbl".to_string(), state(2, Stack::new()));
        let out = resolve(JumpTarget::Label("lbl".into()), state(0, Stack::new()), &labels);
        assert_eq!(out, "$state1 = 2;\ncontinue $loop1;\n");

        let finalizer = Finalizer::new("$state1", &labels);
        let missing = Statement::Jump(Jump {
            target: JumpTarget::Label("nope".into()),
            origin: state(0, Stack::new()),
        });
        assert_eq!(
            finalizer.resolve_all(vec![missing]),
            Err(LoweringError::UnresolvedLabel("nope".into()))
        );
    }

    #[test]
    fn jumps_in_branch_position_get_a_block() {
        let labels = FxHashMap::default();
        let finalizer = Finalizer::new("$state1", &labels);
        let stmt = Statement::If(IfStatement {
            test: Expression::ident("c"),
            consequent: Box::new(Statement::Jump(Jump {
                target: JumpTarget::State(state(0, Stack::new())),
                origin: state(1, Stack::new()),
            })),
            alternate: None,
        });
        let out = finalizer.resolve_one(stmt).unwrap();
        assert_eq!(
            print_statements(&[out]),
            "if (c) {\n    $state1 = 0;\n    continue $loop1;\n}\n"
        );
        let out = finalizer.resolve_one(Statement::SetNextState(3)).unwrap();
        assert_eq!(print_statements(&[out]), "$state1 = 3;\n");
    }
}
