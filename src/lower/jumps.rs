//! Rewrites branches that leave a region which needs no further splitting
//! into pending jumps. Loops, switches and labels local to the region keep
//! their native `break`/`continue`.

use super::StateMachineKind;
use super::state::{BranchTarget, Stack, State, find_target};
use crate::ast::*;
use crate::error::{LoweringError, LoweringResult};
use crate::services::LoweringServices;

pub(super) struct JumpRewriter<'r, S: LoweringServices + ?Sized> {
    services: &'r mut S,
    kind: StateMachineKind,
    break_targets: &'r Stack<BranchTarget>,
    continue_targets: &'r Stack<BranchTarget>,
    current: &'r State,
    exhausted: &'r State,
    loop_depth: usize,
    breakable_depth: usize,
    local_labels: Vec<String>,
}

impl<'r, S: LoweringServices + ?Sized> JumpRewriter<'r, S> {
    pub(super) fn new(
        services: &'r mut S,
        kind: StateMachineKind,
        break_targets: &'r Stack<BranchTarget>,
        continue_targets: &'r Stack<BranchTarget>,
        current: &'r State,
        exhausted: &'r State,
    ) -> Self {
        JumpRewriter {
            services,
            kind,
            break_targets,
            continue_targets,
            current,
            exhausted,
            loop_depth: 0,
            breakable_depth: 0,
            local_labels: Vec::new(),
        }
    }

    /// Rewrites `stmt` with `labels` treated as labels of `stmt` itself; the
    /// labels are emitted around the result so they stay native.
    pub(super) fn rewrite_labeled(
        &mut self,
        stmt: &Statement,
        labels: &[String],
    ) -> LoweringResult<Statement> {
        self.local_labels.extend(labels.iter().cloned());
        let mut result = self.rewrite(stmt)?;
        self.local_labels.truncate(self.local_labels.len() - labels.len());
        for label in labels.iter().rev() {
            result = Statement::Labeled(label.clone(), Box::new(result));
        }
        Ok(result)
    }

    pub(super) fn rewrite_all(&mut self, stmts: &[Statement]) -> LoweringResult<Vec<Statement>> {
        stmts.iter().map(|stmt| self.rewrite(stmt)).collect()
    }

    fn rewrite_boxed(&mut self, stmt: &Statement) -> LoweringResult<Box<Statement>> {
        self.rewrite(stmt).map(Box::new)
    }

    fn jump(&self, target: JumpTarget) -> Statement {
        Statement::Jump(Jump {
            target,
            origin: self.current.clone(),
        })
    }

    fn escape(
        &self,
        targets: &Stack<BranchTarget>,
        keyword: &str,
        label: Option<&str>,
    ) -> LoweringResult<Statement> {
        match find_target(targets, label) {
            Some(state) => Ok(self.jump(JumpTarget::State(state.clone()))),
            None => Err(LoweringError::MissingBranchTarget(match label {
                Some(label) => format!("{keyword} {label}"),
                None => keyword.to_string(),
            })),
        }
    }

    fn is_local(&self, label: &str) -> bool {
        self.local_labels.iter().any(|l| l == label)
    }

    fn in_loop<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.loop_depth += 1;
        self.breakable_depth += 1;
        let result = f(self);
        self.loop_depth -= 1;
        self.breakable_depth -= 1;
        result
    }

    pub(super) fn rewrite(&mut self, stmt: &Statement) -> LoweringResult<Statement> {
        match stmt {
            Statement::Break(None) if self.breakable_depth > 0 => Ok(stmt.clone()),
            Statement::Break(Some(label)) if self.is_local(label) => Ok(stmt.clone()),
            Statement::Break(label) => self.escape(self.break_targets, "break", label.as_deref()),
            Statement::Continue(None) if self.loop_depth > 0 => Ok(stmt.clone()),
            Statement::Continue(Some(label)) if self.is_local(label) => Ok(stmt.clone()),
            Statement::Continue(label) => {
                self.escape(self.continue_targets, "continue", label.as_deref())
            }
            Statement::Goto(label) => Ok(self.jump(JumpTarget::Label(label.clone()))),
            Statement::Yield(None) => Ok(self.jump(JumpTarget::State(self.exhausted.clone()))),
            Statement::Yield(Some(_)) => Err(LoweringError::UnexpectedYield),
            Statement::Await(_) => Err(LoweringError::UnexpectedAwait),
            Statement::Return(value) => match self.kind {
                StateMachineKind::Normal => Ok(stmt.clone()),
                StateMachineKind::Iterator => match value {
                    None => Ok(self.jump(JumpTarget::State(self.exhausted.clone()))),
                    Some(_) => Err(LoweringError::ReturnValueInIterator),
                },
                StateMachineKind::Async => Ok(Statement::Block(vec![
                    Statement::Expression(self.services.set_result(value.clone())),
                    Statement::Return(None),
                ])),
            },
            Statement::Block(stmts) => Ok(Statement::Block(self.rewrite_all(stmts)?)),
            Statement::If(s) => Ok(Statement::If(IfStatement {
                test: s.test.clone(),
                consequent: self.rewrite_boxed(&s.consequent)?,
                alternate: s
                    .alternate
                    .as_deref()
                    .map(|alt| self.rewrite_boxed(alt))
                    .transpose()?,
            })),
            Statement::While(s) => {
                let body = self.in_loop(|r| r.rewrite_boxed(&s.body))?;
                Ok(Statement::While(WhileStatement {
                    test: s.test.clone(),
                    body,
                }))
            }
            Statement::DoWhile(s) => {
                let body = self.in_loop(|r| r.rewrite_boxed(&s.body))?;
                Ok(Statement::DoWhile(DoWhileStatement {
                    test: s.test.clone(),
                    body,
                }))
            }
            Statement::For(s) => {
                let body = self.in_loop(|r| r.rewrite_boxed(&s.body))?;
                Ok(Statement::For(ForStatement {
                    init: s.init.clone(),
                    test: s.test.clone(),
                    update: s.update.clone(),
                    body,
                }))
            }
            Statement::ForIn(s) => {
                let body = self.in_loop(|r| r.rewrite_boxed(&s.body))?;
                Ok(Statement::ForIn(ForInStatement {
                    left: s.left.clone(),
                    right: s.right.clone(),
                    body,
                }))
            }
            Statement::Switch(s) => {
                self.breakable_depth += 1;
                let cases = s
                    .cases
                    .iter()
                    .map(|case| {
                        Ok(SwitchCase {
                            tests: case.tests.clone(),
                            consequent: self.rewrite_all(&case.consequent)?,
                        })
                    })
                    .collect::<LoweringResult<Vec<_>>>();
                self.breakable_depth -= 1;
                Ok(Statement::Switch(SwitchStatement {
                    discriminant: s.discriminant.clone(),
                    cases: cases?,
                }))
            }
            Statement::Labeled(label, body) => {
                self.local_labels.push(label.clone());
                let body = self.rewrite_boxed(body);
                self.local_labels.pop();
                Ok(Statement::Labeled(label.clone(), body?))
            }
            Statement::Try(s) => Ok(Statement::Try(TryStatement {
                block: self.rewrite_all(&s.block)?,
                handler: s
                    .handler
                    .as_ref()
                    .map(|h| {
                        Ok::<_, LoweringError>(CatchClause {
                            param: h.param.clone(),
                            body: self.rewrite_all(&h.body)?,
                        })
                    })
                    .transpose()?,
                finalizer: s
                    .finalizer
                    .as_deref()
                    .map(|f| self.rewrite_all(f))
                    .transpose()?,
            })),
            Statement::Empty
            | Statement::Expression(_)
            | Statement::Variable(_)
            | Statement::Throw(_)
            | Statement::Jump(_)
            | Statement::SetNextState(_) => Ok(stmt.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;
    use crate::services::DefaultServices;
    use std::rc::Rc;

    fn state(id: i32) -> State {
        State {
            id,
            loop_label: Rc::from("$loop1"),
            finally_stack: Stack::new(),
        }
    }

    fn rewrite(src: &str, kind: StateMachineKind) -> LoweringResult<Vec<Statement>> {
        let mut services = DefaultServices::new();
        let breaks = Stack::new()
            .push(BranchTarget::new(None, state(7)))
            .push(BranchTarget::labeled_only("outer", state(8)));
        let continues = Stack::new().push(BranchTarget::new(Some("outer"), state(9)));
        let current = state(3);
        let exhausted = State::exit(Rc::from("$loop1"), Stack::new());
        let body = parse_body(src).unwrap();
        JumpRewriter::new(&mut services, kind, &breaks, &continues, &current, &exhausted)
            .rewrite_all(&body)
    }

    fn jump_id(stmt: &Statement) -> i32 {
        match stmt {
            Statement::Jump(Jump {
                target: JumpTarget::State(state),
                origin,
            }) => {
                assert_eq!(origin.id, 3);
                state.id
            }
            other => panic!("expected jump, got {other:?}"),
        }
    }

    #[test]
    fn escaping_branches_become_jumps() {
        let out = rewrite("break; break outer; continue; continue outer;", StateMachineKind::Normal)
            .unwrap();
        let ids: Vec<i32> = out.iter().map(jump_id).collect();
        assert_eq!(ids, vec![7, 8, 9, 9]);
    }

    #[test]
    fn local_loops_keep_native_branches() {
        let src = "while (x) { if (y) break; continue; } switch (z) { case 1: break; }";
        let body = parse_body(src).unwrap();
        let out = rewrite(src, StateMachineKind::Normal).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn local_labels_stay_native() {
        let src = "inner: { if (x) break inner; } while (y) { break outer; }";
        let out = rewrite(src, StateMachineKind::Normal).unwrap();
        assert!(matches!(&out[0], Statement::Labeled(..)));
        let Statement::While(w) = &out[1] else {
            panic!("expected while");
        };
        let Statement::Block(body) = w.body.as_ref() else {
            panic!("expected block");
        };
        assert_eq!(jump_id(&body[0]), 8);
    }

    #[test]
    fn goto_keeps_its_label() {
        let out = rewrite("goto somewhere;", StateMachineKind::Normal).unwrap();
        assert!(matches!(
            &out[0],
            Statement::Jump(Jump { target: JumpTarget::Label(l), .. }) if l == "somewhere"
        ));
    }

    #[test]
    fn returns_depend_on_kind() {
        let out = rewrite("return 1;", StateMachineKind::Normal).unwrap();
        assert!(matches!(&out[0], Statement::Return(Some(_))));

        let out = rewrite("return; yield break;", StateMachineKind::Iterator).unwrap();
        assert_eq!(jump_id(&out[0]), -1);
        assert_eq!(jump_id(&out[1]), -1);
        assert_eq!(
            rewrite("return 1;", StateMachineKind::Iterator),
            Err(LoweringError::ReturnValueInIterator)
        );

        let out = rewrite("return 1;", StateMachineKind::Async).unwrap();
        let Statement::Block(stmts) = &out[0] else {
            panic!("expected block");
        };
        assert_eq!(stmts[1], Statement::Return(None));
    }

    #[test]
    fn suspensions_are_rejected() {
        assert_eq!(
            rewrite("yield return 1;", StateMachineKind::Iterator),
            Err(LoweringError::UnexpectedYield)
        );
        assert_eq!(
            rewrite("await t;", StateMachineKind::Async),
            Err(LoweringError::UnexpectedAwait)
        );
    }

    #[test]
    fn missing_target_is_reported() {
        let mut services = DefaultServices::new();
        let empty = Stack::new();
        let current = state(0);
        let exhausted = State::exit(Rc::from("$loop1"), Stack::new());
        let mut rewriter = JumpRewriter::new(
            &mut services,
            StateMachineKind::Normal,
            &empty,
            &empty,
            &current,
            &exhausted,
        );
        assert_eq!(
            rewriter.rewrite(&Statement::Continue(Some("nowhere".into()))),
            Err(LoweringError::MissingBranchTarget("continue nowhere".into()))
        );
    }

    #[test]
    fn function_literals_are_untouched() {
        let src = "f = function() { break; };";
        let out = rewrite(src, StateMachineKind::Normal).unwrap();
        assert_eq!(out, parse_body(src).unwrap());
    }
}
