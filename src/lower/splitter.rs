//! The state splitter: turns a body into dispatch sections by consuming a
//! worklist of pending blocks.

use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::StateMachineKind;
use super::analysis::{
    always_exits, block_requires_splitting, contains_break_to_label, contains_jump,
    contains_jumping_finally, contains_labels_or_goto, contains_suspension, requires_splitting,
};
use super::finalizer::Finalizer;
use super::jumps::JumpRewriter;
use super::labels::make_labels_unique;
use super::state::*;
use crate::ast::*;
use crate::error::{LoweringError, LoweringResult};
use crate::services::LoweringServices;

#[derive(Clone)]
struct Context {
    break_targets: Stack<BranchTarget>,
    continue_targets: Stack<BranchTarget>,
    state: State,
    fallthrough: State,
}

impl Context {
    fn item(&self, stack: Stack<Cursor>, state: State, fallthrough: State) -> RemainingBlock {
        RemainingBlock {
            stack,
            break_targets: self.break_targets.clone(),
            continue_targets: self.continue_targets.clone(),
            state,
            fallthrough_state: fallthrough,
        }
    }
}

/// Where the walker stands: the statement under `cursor`, the enclosing
/// blocks in `rest`, and what runs after the statement.
struct Position {
    cursor: Cursor,
    rest: Stack<Cursor>,
    after: Stack<Cursor>,
    is_first: bool,
}

impl Position {
    fn here(&self) -> Stack<Cursor> {
        self.rest.push(self.cursor.clone())
    }
}

enum Step {
    /// Continue with the statement after this one.
    Next,
    /// Continue with the given stack, still at the same position in the section.
    Enter(Stack<Cursor>),
    /// The section is complete.
    End,
}

fn single(stmt: Statement) -> Stack<Cursor> {
    push_block(&Stack::new(), vec![stmt])
}

fn push_targets(stack: &Stack<BranchTarget>, labels: &[String], state: &State) -> Stack<BranchTarget> {
    labels.iter().fold(
        stack.push(BranchTarget::new(None, state.clone())),
        |targets, label| targets.push(BranchTarget::labeled_only(label, state.clone())),
    )
}

fn breaks_out_of_loop(body: &Statement, labels: &[String]) -> bool {
    contains_break_to_label(body, None, true)
        || labels
            .iter()
            .any(|label| contains_break_to_label(body, Some(label), true))
}

fn is_loop(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::While(_) | Statement::DoWhile(_) | Statement::For(_) | Statement::ForIn(_)
    )
}

pub(super) struct Splitter<'a, S: LoweringServices + ?Sized> {
    services: &'a mut S,
    kind: StateMachineKind,
    pub(super) state_var: String,
    next_state_id: i32,
    worklist: VecDeque<RemainingBlock>,
    enqueued: FxHashSet<(Rc<str>, i32)>,
    label_states: FxHashMap<String, State>,
    enqueued_labels: FxHashSet<String>,
    /// Handler names owed by every produced state, for the disposer.
    pub(super) all_states: Vec<(i32, Vec<Rc<str>>)>,
    pub(super) finally_handlers: Vec<(String, FunctionExpr)>,
    pub(super) temp_vars: Vec<String>,
    exhausted: State,
    suspend_guard: Option<String>,
    driver: Option<String>,
    pending_nested: Vec<i32>,
}

impl<'a, S: LoweringServices + ?Sized> Splitter<'a, S> {
    pub(super) fn new(services: &'a mut S, kind: StateMachineKind) -> Self {
        let state_var = services.allocate_state_variable();
        Splitter {
            services,
            kind,
            state_var,
            next_state_id: 0,
            worklist: VecDeque::new(),
            enqueued: FxHashSet::default(),
            label_states: FxHashMap::default(),
            enqueued_labels: FxHashSet::default(),
            all_states: Vec::new(),
            finally_handlers: Vec::new(),
            temp_vars: Vec::new(),
            exhausted: State::exit(Rc::from(""), Stack::new()),
            suspend_guard: None,
            driver: None,
            pending_nested: Vec::new(),
        }
    }

    /// Names the function that resumes an async body, and the flag that
    /// tells finally clauses whether the body is really leaving them.
    pub(super) fn with_async_driver(mut self, driver: String, guard: Option<String>) -> Self {
        self.driver = Some(driver);
        self.suspend_guard = guard;
        self
    }

    /// Lowers `body` into one labeled dispatch loop with every jump resolved.
    pub(super) fn split(&mut self, mut body: Vec<Statement>) -> LoweringResult<Statement> {
        make_labels_unique(&mut body);
        let loop_label: Rc<str> = Rc::from(self.services.allocate_loop_label());
        let entry = State {
            id: self.next_id(),
            loop_label: loop_label.clone(),
            finally_stack: Stack::new(),
        };
        self.exhausted = State::exit(loop_label.clone(), Stack::new());
        let initial = RemainingBlock {
            stack: push_block(&Stack::new(), body),
            break_targets: Stack::new(),
            continue_targets: Stack::new(),
            state: entry,
            fallthrough_state: self.exhausted.clone(),
        };
        let sections = self.run_machine(initial)?;
        let machine = self.assemble(&loop_label, sections);
        Finalizer::new(&self.state_var, &self.label_states).resolve_one(machine)
    }

    fn next_id(&mut self) -> i32 {
        let id = self.next_state_id;
        self.next_state_id += 1;
        id
    }

    fn new_state(&mut self, ctx: &Context) -> State {
        State {
            id: self.next_id(),
            loop_label: ctx.state.loop_label.clone(),
            finally_stack: ctx.state.finally_stack.clone(),
        }
    }

    fn state_for_label(&mut self, label: &str, ctx: &Context) -> State {
        if let Some(state) = self.label_states.get(label) {
            return state.clone();
        }
        let state = self.new_state(ctx);
        trace!(target: "state_machine", label, state = state.id, "label bound");
        self.label_states.insert(label.to_string(), state.clone());
        state
    }

    fn enqueue(&mut self, item: RemainingBlock) -> LoweringResult<()> {
        let key = (item.state.loop_label.clone(), item.state.id);
        if !self.enqueued.insert(key) {
            return Err(LoweringError::StateEnqueuedTwice {
                id: item.state.id,
                loop_label: item.state.loop_label.to_string(),
            });
        }
        self.worklist.push_back(item);
        Ok(())
    }

    /// Drains a fresh worklist seeded with `initial`, leaving any enclosing
    /// machine's pending work untouched.
    fn run_machine(&mut self, initial: RemainingBlock) -> LoweringResult<Vec<Section>> {
        let saved_worklist = mem::take(&mut self.worklist);
        let saved_nested = mem::take(&mut self.pending_nested);
        self.enqueue(initial)?;
        let mut sections = Vec::new();
        while let Some(item) = self.worklist.pop_front() {
            sections.push(self.process(item)?);
        }
        self.worklist = saved_worklist;
        self.pending_nested = saved_nested;
        Ok(sections)
    }

    fn process(&mut self, item: RemainingBlock) -> LoweringResult<Section> {
        let ctx = Context {
            break_targets: item.break_targets,
            continue_targets: item.continue_targets,
            state: item.state,
            fallthrough: item.fallthrough_state,
        };
        let mut statements = Vec::new();
        if self.walk(item.stack, &ctx, &mut statements, true)? {
            statements.push(self.jump(&ctx.state, &ctx.fallthrough));
        }
        let section = Section {
            state: ctx.state,
            statements,
            nested_states: mem::take(&mut self.pending_nested),
        };
        trace!(
            target: "state_machine",
            state = section.state.id,
            loop_label = %section.state.loop_label,
            statements = section.statements.len(),
            "section produced"
        );
        if !section.state.finally_stack.is_empty() {
            for id in section.case_ids() {
                self.all_states.push((id, section.state.handler_names()));
            }
        }
        Ok(section)
    }

    fn assemble(&self, loop_label: &str, sections: Vec<Section>) -> Statement {
        let mut cases: Vec<SwitchCase> = sections
            .into_iter()
            .map(|section| SwitchCase {
                tests: section
                    .case_ids()
                    .into_iter()
                    .map(|id| Some(Expression::number(id as f64)))
                    .collect(),
                consequent: vec![Statement::Block(section.statements)],
            })
            .collect();
        cases.push(SwitchCase {
            tests: vec![None],
            consequent: vec![Statement::Block(vec![Statement::Break(Some(
                loop_label.to_string(),
            ))])],
        });
        Statement::Labeled(
            loop_label.to_string(),
            Box::new(Statement::For(ForStatement {
                init: None,
                test: None,
                update: None,
                body: Box::new(Statement::Block(vec![Statement::Switch(SwitchStatement {
                    discriminant: Expression::ident(self.state_var.as_str()),
                    cases,
                })])),
            })),
        )
    }

    fn jump(&self, from: &State, to: &State) -> Statement {
        Statement::Jump(Jump {
            target: JumpTarget::State(to.clone()),
            origin: from.clone(),
        })
    }

    /// Walks the cursor stack, appending to `out`. Returns whether control
    /// falls off the end of the stack and so still needs a jump.
    fn walk(
        &mut self,
        mut stack: Stack<Cursor>,
        ctx: &Context,
        out: &mut Vec<Statement>,
        mut is_first: bool,
    ) -> LoweringResult<bool> {
        loop {
            let (cursor, rest) = match stack.pop() {
                Some((cursor, rest)) => (cursor.clone(), rest),
                None => return Ok(!out.last().is_some_and(always_exits)),
            };
            let after = match cursor.next() {
                Some(next) => rest.push(next),
                None => rest.clone(),
            };
            let pos = Position {
                cursor,
                rest,
                after,
                is_first,
            };
            let stmt = pos.cursor.statement().clone();
            match self.statement(&stmt, &[], &pos, ctx, out)? {
                Step::Next => {
                    stack = pos.after;
                    is_first = false;
                }
                Step::Enter(inner) => stack = inner,
                Step::End => return Ok(false),
            }
        }
    }

    fn statement(
        &mut self,
        stmt: &Statement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        match stmt {
            Statement::Labeled(label, body) if !pos.cursor.after_loop_initializer => {
                self.labeled(label, body, labels, pos, ctx, out)
            }
            Statement::Labeled(label, body) => {
                let mut labels = labels.to_vec();
                labels.push(label.clone());
                self.statement(body, &labels, pos, ctx, out)
            }
            _ if !self.requires_splitting(stmt, ctx) => {
                out.push(self.rewrite(stmt, labels, ctx)?);
                Ok(Step::Next)
            }
            _ if !is_loop(stmt)
                && !matches!(stmt, Statement::Switch(_))
                && labels
                    .iter()
                    .any(|label| contains_break_to_label(stmt, Some(label), false)) =>
            {
                self.break_scope(stmt, labels, pos, ctx, out)
            }
            Statement::Block(stmts) => Ok(Step::Enter(push_block(&pos.after, stmts.clone()))),
            Statement::If(s) => self.if_statement(s, pos, ctx, out),
            Statement::While(s) => self.while_statement(s, labels, pos, ctx, out),
            Statement::DoWhile(s) => self.do_while_statement(s, labels, pos, ctx, out),
            Statement::For(s) => self.for_statement(s, labels, pos, ctx, out),
            Statement::ForIn(s) => self.for_in_statement(s, labels, pos, ctx, out),
            Statement::Switch(s) => self.switch_statement(s, labels, pos, ctx, out),
            Statement::Try(s) => self.try_statement(s, pos, ctx, out),
            Statement::Yield(Some(value)) => self.yield_statement(value, pos, ctx, out),
            Statement::Await(s) => self.await_statement(s, pos, ctx, out),
            _ => {
                out.push(self.rewrite(stmt, labels, ctx)?);
                Ok(Step::Next)
            }
        }
    }

    /// Inside an iterator frame, a native finally that a jump leaves would
    /// run after the handlers resolved for that jump, so such a try is split
    /// and its finally becomes a handler too.
    fn finally_needs_frame(&self, ctx: &Context) -> bool {
        self.kind == StateMachineKind::Iterator && !ctx.state.finally_stack.is_empty()
    }

    fn requires_splitting(&self, stmt: &Statement, ctx: &Context) -> bool {
        requires_splitting(stmt) || (self.finally_needs_frame(ctx) && contains_jumping_finally(stmt))
    }

    fn rewrite(&mut self, stmt: &Statement, labels: &[String], ctx: &Context) -> LoweringResult<Statement> {
        JumpRewriter::new(
            &mut *self.services,
            self.kind,
            &ctx.break_targets,
            &ctx.continue_targets,
            &ctx.state,
            &self.exhausted,
        )
        .rewrite_labeled(stmt, labels)
    }

    fn rewrite_block(&mut self, stmts: &[Statement], ctx: &Context) -> LoweringResult<Vec<Statement>> {
        JumpRewriter::new(
            &mut *self.services,
            self.kind,
            &ctx.break_targets,
            &ctx.continue_targets,
            &ctx.state,
            &self.exhausted,
        )
        .rewrite_all(stmts)
    }

    /// Moves the statement under the cursor, with everything after it, into
    /// a state of its own.
    fn defer(&mut self, stack: Stack<Cursor>, ctx: &Context, out: &mut Vec<Statement>) -> LoweringResult<Step> {
        if stack.is_empty() {
            return Err(LoweringError::EmptyCursorStack);
        }
        let state = self.new_state(ctx);
        self.enqueue(ctx.item(stack, state.clone(), ctx.fallthrough.clone()))?;
        out.push(self.jump(&ctx.state, &state));
        Ok(Step::End)
    }

    /// State that runs `after`: the enclosing fallthrough when nothing is
    /// left, the label's state when a label comes next, a new state otherwise.
    fn state_after(&mut self, after: &Stack<Cursor>, ctx: &Context) -> LoweringResult<State> {
        let Some(top) = after.peek() else {
            return Ok(ctx.fallthrough.clone());
        };
        if let Statement::Labeled(label, _) = top.statement() {
            let state = self.state_for_label(label, ctx);
            if self.enqueued_labels.insert(label.clone()) {
                self.enqueue(ctx.item(after.clone(), state.clone(), ctx.fallthrough.clone()))?;
            }
            return Ok(state);
        }
        let state = self.new_state(ctx);
        self.enqueue(ctx.item(after.clone(), state.clone(), ctx.fallthrough.clone()))?;
        Ok(state)
    }

    fn labeled(
        &mut self,
        label: &str,
        body: &Statement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let bound_here = self
            .label_states
            .get(label)
            .is_none_or(|state| state.id == ctx.state.id && state.loop_label == ctx.state.loop_label);
        if pos.is_first && bound_here {
            if !self.label_states.contains_key(label) {
                trace!(target: "state_machine", label, state = ctx.state.id, "label bound");
                self.label_states.insert(label.to_string(), ctx.state.clone());
            }
            self.enqueued_labels.insert(label.to_string());
            let mut labels = labels.to_vec();
            labels.push(label.to_string());
            return self.statement(body, &labels, pos, ctx, out);
        }

        let target = self.state_for_label(label, ctx);
        if self.enqueued_labels.insert(label.to_string()) {
            let stack = push_block(
                &pos.after,
                vec![Statement::Labeled(label.to_string(), Box::new(body.clone()))],
            );
            self.enqueue(ctx.item(stack, target.clone(), ctx.fallthrough.clone()))?;
        }
        out.push(self.jump(&ctx.state, &target));
        Ok(Step::End)
    }

    /// A labeled non-loop statement that some `break label` leaves.
    fn break_scope(
        &mut self,
        stmt: &Statement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let merge = self.state_after(&pos.after, ctx)?;
        let break_targets = labels.iter().fold(ctx.break_targets.clone(), |targets, label| {
            targets.push(BranchTarget::labeled_only(label, merge.clone()))
        });
        let inner = Context {
            break_targets,
            continue_targets: ctx.continue_targets.clone(),
            state: ctx.state.clone(),
            fallthrough: merge.clone(),
        };
        if self.walk(single(stmt.clone()), &inner, out, pos.is_first)? {
            out.push(self.jump(&ctx.state, &merge));
        }
        Ok(Step::End)
    }

    fn branch(&mut self, stmt: &Statement, ctx: &Context) -> LoweringResult<Statement> {
        let mut out = Vec::new();
        if self.walk(single(stmt.clone()), ctx, &mut out, false)? {
            out.push(self.jump(&ctx.state, &ctx.fallthrough));
        }
        Ok(Statement::Block(out))
    }

    fn if_statement(
        &mut self,
        s: &IfStatement,
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let merge = self.state_after(&pos.after, ctx)?;
        let branch_ctx = Context {
            fallthrough: merge.clone(),
            ..ctx.clone()
        };
        let consequent = self.branch(&s.consequent, &branch_ctx)?;
        let alternate = match &s.alternate {
            Some(alternate) => Some(Box::new(self.branch(alternate, &branch_ctx)?)),
            None => None,
        };
        let has_alternate = alternate.is_some();
        out.push(Statement::If(IfStatement {
            test: s.test.clone(),
            consequent: Box::new(consequent),
            alternate,
        }));
        if !has_alternate {
            out.push(self.jump(&ctx.state, &merge));
        }
        Ok(Step::End)
    }

    /// `if (!test) <jump to exit>`, omitted for a constant `true`.
    fn loop_test(&self, test: Option<&Expression>, ctx: &Context, exit: &State, out: &mut Vec<Statement>) {
        if let Some(test) = test.filter(|test| !test.is_true_literal()) {
            out.push(Statement::If(IfStatement {
                test: Expression::not(test.clone()),
                consequent: Box::new(self.jump(&ctx.state, exit)),
                alternate: None,
            }));
        }
    }

    fn loop_body(
        &mut self,
        body: &Statement,
        labels: &[String],
        ctx: &Context,
        break_state: Option<&State>,
        continue_state: &State,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let break_targets = match break_state {
            Some(state) => push_targets(&ctx.break_targets, labels, state),
            None => ctx.break_targets.clone(),
        };
        let body_ctx = Context {
            break_targets,
            continue_targets: push_targets(&ctx.continue_targets, labels, continue_state),
            state: ctx.state.clone(),
            fallthrough: continue_state.clone(),
        };
        if self.walk(single(body.clone()), &body_ctx, out, false)? {
            out.push(self.jump(&ctx.state, continue_state));
        }
        Ok(Step::End)
    }

    fn while_statement(
        &mut self,
        s: &WhileStatement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        if !pos.is_first {
            return self.defer(pos.here(), ctx, out);
        }
        let exit = self.state_after(&pos.after, ctx)?;
        self.loop_test(Some(&s.test), ctx, &exit, out);
        self.loop_body(&s.body, labels, ctx, Some(&exit), &ctx.state, out)
    }

    fn do_while_statement(
        &mut self,
        s: &DoWhileStatement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        if !pos.is_first {
            return self.defer(pos.here(), ctx, out);
        }
        let cond_state = self.new_state(ctx);
        let break_state = if breaks_out_of_loop(&s.body, labels) {
            Some(self.state_after(&pos.after, ctx)?)
        } else {
            None
        };
        let condition = Statement::If(IfStatement {
            test: s.test.clone(),
            consequent: Box::new(self.jump(&cond_state, &ctx.state)),
            alternate: None,
        });
        let cond_item = match &break_state {
            Some(exit) => ctx.item(single(condition), cond_state.clone(), exit.clone()),
            None => ctx.item(
                push_block(&pos.after, vec![condition]),
                cond_state.clone(),
                ctx.fallthrough.clone(),
            ),
        };
        self.enqueue(cond_item)?;
        self.loop_body(&s.body, labels, ctx, break_state.as_ref(), &cond_state, out)
    }

    fn for_statement(
        &mut self,
        s: &ForStatement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        if let Some(init) = &s.init
            && !pos.cursor.after_loop_initializer
        {
            out.push(match init {
                ForInit::Variable(decl) => Statement::Variable(decl.clone()),
                ForInit::Expression(expr) => Statement::Expression(expr.clone()),
            });
            let stack = pos.rest.push(pos.cursor.with_loop_initializer_done());
            return self.defer(stack, ctx, out);
        }
        if !pos.is_first {
            return self.defer(pos.here(), ctx, out);
        }
        let exit = self.state_after(&pos.after, ctx)?;
        let iteration = match &s.update {
            Some(update) => {
                let state = self.new_state(ctx);
                let item = ctx.item(
                    single(Statement::Expression(update.clone())),
                    state.clone(),
                    ctx.state.clone(),
                );
                self.enqueue(item)?;
                state
            }
            None => ctx.state.clone(),
        };
        self.loop_test(s.test.as_ref(), ctx, &exit, out);
        self.loop_body(&s.body, labels, ctx, Some(&exit), &iteration, out)
    }

    /// Snapshots the keys, then iterates them with an indexed `for`.
    fn for_in_statement(
        &mut self,
        s: &ForInStatement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let keys = self.services.allocate_temp();
        let index = self.services.allocate_temp();
        self.temp_vars.push(keys.clone());
        self.temp_vars.push(index.clone());
        let keys_expr = || Expression::ident(keys.as_str());
        let index_expr = || Expression::ident(index.as_str());

        out.push(Statement::Expression(Expression::assign(
            keys_expr(),
            Expression::Array(Vec::new()),
        )));
        out.push(Statement::ForIn(ForInStatement {
            left: ForInLeft::Identifier(index.clone()),
            right: s.right.clone(),
            body: Box::new(Statement::Expression(Expression::method_call(
                keys_expr(),
                "push",
                vec![index_expr()],
            ))),
        }));
        out.push(Statement::Expression(Expression::assign(
            index_expr(),
            Expression::number(0.0),
        )));

        let mut body = vec![Statement::Expression(Expression::assign(
            Expression::ident(s.left.name()),
            Expression::Member(
                Box::new(keys_expr()),
                MemberProperty::Computed(Box::new(index_expr())),
            ),
        ))];
        body.extend(s.body.as_ref().clone().into_statements());
        let mut looped = Statement::For(ForStatement {
            init: None,
            test: Some(Expression::binary(
                BinaryOp::Lt,
                index_expr(),
                Expression::member(keys_expr(), "length"),
            )),
            update: Some(Expression::Update(UpdateOp::Increment, false, Box::new(index_expr()))),
            body: Box::new(Statement::Block(body)),
        });
        for label in labels.iter().rev() {
            looped = Statement::Labeled(label.clone(), Box::new(looped));
        }
        let cursor = Cursor::start(vec![looped])
            .ok_or(LoweringError::EmptyCursorStack)?
            .with_loop_initializer_done();
        self.defer(pos.after.push(cursor), ctx, out)
    }

    fn switch_statement(
        &mut self,
        s: &SwitchStatement,
        labels: &[String],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let discriminant = if self.services.is_expression_complex(&s.discriminant) {
            let temp = self.services.allocate_temp();
            self.temp_vars.push(temp.clone());
            out.push(Statement::Expression(Expression::assign(
                Expression::ident(temp.as_str()),
                s.discriminant.clone(),
            )));
            Expression::ident(temp)
        } else {
            s.discriminant.clone()
        };

        let exit = self.state_after(&pos.after, ctx)?;
        let case_ctx = Context {
            break_targets: push_targets(&ctx.break_targets, labels, &exit),
            ..ctx.clone()
        };

        let mut entries: Vec<Option<State>> = Vec::with_capacity(s.cases.len());
        let mut fresh = Vec::with_capacity(s.cases.len());
        for case in &s.cases {
            let entry = match case.consequent.first() {
                None => None,
                Some(Statement::Labeled(label, _)) => {
                    let state = self.state_for_label(label, ctx);
                    fresh.push(self.enqueued_labels.insert(label.clone()));
                    Some(state)
                }
                Some(_) => {
                    fresh.push(true);
                    Some(self.new_state(ctx))
                }
            };
            entries.push(entry);
        }
        let target_from = |i: usize| -> State {
            entries[i..]
                .iter()
                .flatten()
                .next()
                .cloned()
                .unwrap_or_else(|| exit.clone())
        };

        let mut fresh = fresh.into_iter();
        for (i, case) in s.cases.iter().enumerate() {
            let Some(entry) = &entries[i] else {
                continue;
            };
            if fresh.next() != Some(true) {
                continue;
            }
            let item = case_ctx.item(
                push_block(&Stack::new(), case.consequent.clone()),
                entry.clone(),
                target_from(i + 1),
            );
            self.enqueue(item)?;
        }

        let default_target = match s.cases.iter().position(SwitchCase::is_default) {
            Some(i) => target_from(i),
            None => exit.clone(),
        };
        let mut ladder = self.jump(&ctx.state, &default_target);
        for (i, case) in s.cases.iter().enumerate().rev() {
            if case.is_default() {
                continue;
            }
            let test = case
                .tests
                .iter()
                .flatten()
                .map(|value| Expression::binary(BinaryOp::StrictEq, discriminant.clone(), value.clone()))
                .reduce(|left, right| Expression::Logical(LogicalOp::Or, Box::new(left), Box::new(right)));
            let Some(test) = test else {
                continue;
            };
            ladder = Statement::If(IfStatement {
                test,
                consequent: Box::new(self.jump(&ctx.state, &target_from(i))),
                alternate: Some(Box::new(ladder)),
            });
        }
        out.push(ladder);
        Ok(Step::End)
    }

    fn try_statement(
        &mut self,
        s: &TryStatement,
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let suspension = match self.kind {
            StateMachineKind::Normal => None,
            StateMachineKind::Iterator => Some("yield"),
            StateMachineKind::Async => Some("await"),
        };
        if let Some(kind) = suspension {
            if s.handler.as_ref().is_some_and(|h| contains_suspension(&h.body)) {
                return Err(LoweringError::SuspensionInHandler {
                    kind,
                    clause: "catch",
                });
            }
            if s.finalizer.as_deref().is_some_and(contains_suspension) {
                return Err(LoweringError::SuspensionInHandler {
                    kind,
                    clause: "finally",
                });
            }
        }

        if self.kind == StateMachineKind::Iterator && contains_suspension(&s.block) {
            if s.handler.is_some() {
                return Err(LoweringError::YieldInsideTryCatch);
            }
            let Some(finalizer) = &s.finalizer else {
                return Ok(Step::Enter(push_block(&pos.after, s.block.clone())));
            };
            return self.guarded_finally(&s.block, finalizer, pos, ctx, out);
        }
        if let Some(finalizer) = &s.finalizer
            && self.finally_needs_frame(ctx)
            && contains_jump(&s.block)
        {
            let block = match &s.handler {
                Some(handler) => vec![Statement::Try(TryStatement {
                    block: s.block.clone(),
                    handler: Some(handler.clone()),
                    finalizer: None,
                })],
                None => s.block.clone(),
            };
            return self.guarded_finally(&block, finalizer, pos, ctx, out);
        }

        if !pos.is_first {
            return self.defer(pos.here(), ctx, out);
        }

        let block = if block_requires_splitting(&s.block) {
            let label: Rc<str> = Rc::from(self.services.allocate_loop_label());
            // The nested machine starts where this section stands.
            let entry = State {
                id: ctx.state.id,
                loop_label: label.clone(),
                finally_stack: ctx.state.finally_stack.clone(),
            };
            vec![self.nested_machine(&s.block, label, entry, ctx)?]
        } else {
            self.rewrite_block(&s.block, ctx)?
        };

        let handler = match &s.handler {
            Some(handler) => {
                let body = if block_requires_splitting(&handler.body) {
                    let label: Rc<str> = Rc::from(self.services.allocate_loop_label());
                    let entry = State {
                        id: self.next_id(),
                        loop_label: label.clone(),
                        finally_stack: ctx.state.finally_stack.clone(),
                    };
                    let entry_id = entry.id;
                    vec![
                        Statement::SetNextState(entry_id),
                        self.nested_machine(&handler.body, label, entry, ctx)?,
                    ]
                } else {
                    self.rewrite_block(&handler.body, ctx)?
                };
                Some(CatchClause {
                    param: handler.param.clone(),
                    body,
                })
            }
            None => None,
        };

        let finalizer = match &s.finalizer {
            Some(finalizer) => {
                let mut body = self.lower_independent(finalizer)?;
                if let Some(guard) = &self.suspend_guard
                    && contains_suspension(&s.block)
                {
                    body = vec![Statement::If(IfStatement {
                        test: Expression::ident(guard.as_str()),
                        consequent: Box::new(Statement::Block(body)),
                        alternate: None,
                    })];
                }
                Some(body)
            }
            None => None,
        };

        out.push(Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
        }));
        Ok(Step::Next)
    }

    /// Lowers `body` into a nested dispatch loop that exits into the code
    /// following it in the current section.
    fn nested_machine(
        &mut self,
        body: &[Statement],
        label: Rc<str>,
        entry: State,
        ctx: &Context,
    ) -> LoweringResult<Statement> {
        let exit = State::exit(label.clone(), ctx.state.finally_stack.clone());
        let item = ctx.item(push_block(&Stack::new(), body.to_vec()), entry, exit);
        let sections = self.run_machine(item)?;
        self.pending_nested
            .extend(sections.iter().flat_map(Section::case_ids));
        Ok(self.assemble(&label, sections))
    }

    /// Iterator try/finally split into states: the finally becomes a handler
    /// owed by every state inside the try.
    fn guarded_finally(
        &mut self,
        block: &[Statement],
        finalizer: &[Statement],
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let handler = self.services.allocate_finally_handler();
        let function = FunctionExpr {
            name: None,
            params: Vec::new(),
            body: self.lower_independent(finalizer)?,
            kind: FunctionKind::Normal,
        };
        self.finally_handlers.push((handler.clone(), function));

        let exit = self.state_after(&pos.after, ctx)?;
        let id = self.next_id();
        let inner = State {
            id,
            loop_label: ctx.state.loop_label.clone(),
            finally_stack: ctx.state.finally_stack.push(FinallyFrame {
                state_id: id,
                handler: Rc::from(handler),
            }),
        };
        self.enqueue(ctx.item(push_block(&Stack::new(), block.to_vec()), inner.clone(), exit))?;
        out.push(self.jump(&ctx.state, &inner));
        Ok(Step::End)
    }

    /// Lowers a finally body on its own, with its own state variable.
    fn lower_independent(&mut self, body: &[Statement]) -> LoweringResult<Vec<Statement>> {
        if !contains_labels_or_goto(body) {
            return Ok(body.to_vec());
        }
        let mut splitter = Splitter::new(&mut *self.services, StateMachineKind::Normal);
        let machine = splitter.split(body.to_vec())?;
        let declarations = splitter.variables(Vec::new());
        Ok(vec![
            Statement::Variable(VariableDeclaration { declarations }),
            machine,
        ])
    }

    fn yield_statement(
        &mut self,
        value: &Expression,
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        if self.kind != StateMachineKind::Iterator {
            return Err(LoweringError::UnexpectedYield);
        }
        let next = self.new_state(ctx);
        self.enqueue(ctx.item(pos.after.clone(), next.clone(), ctx.fallthrough.clone()))?;
        out.push(Statement::Expression(self.services.yield_value(value.clone())));
        out.push(Statement::SetNextState(next.id));
        out.push(Statement::Return(Some(Expression::boolean(true))));
        Ok(Step::End)
    }

    fn await_statement(
        &mut self,
        s: &AwaitStatement,
        pos: &Position,
        ctx: &Context,
        out: &mut Vec<Statement>,
    ) -> LoweringResult<Step> {
        let Some(driver) = self.driver.clone().filter(|_| self.kind == StateMachineKind::Async)
        else {
            return Err(LoweringError::UnexpectedAwait);
        };
        let next = self.new_state(ctx);
        self.enqueue(ctx.item(pos.after.clone(), next.clone(), ctx.fallthrough.clone()))?;
        out.push(Statement::SetNextState(next.id));
        out.push(Statement::Expression(Expression::method_call(
            s.awaiter.clone(),
            &s.on_completed,
            vec![Expression::ident(driver)],
        )));
        if let Some(guard) = &self.suspend_guard {
            out.push(Statement::Expression(Expression::assign(
                Expression::ident(guard.as_str()),
                Expression::boolean(false),
            )));
        }
        out.push(Statement::Return(None));
        Ok(Step::End)
    }

    /// Declarations shared by every section: the state variable, then
    /// `hoisted`, then the temporaries the splitter allocated.
    pub(super) fn variables(&self, hoisted: Vec<String>) -> Vec<VariableDeclarator> {
        let mut declarations = vec![VariableDeclarator {
            name: self.state_var.clone(),
            init: Some(Expression::number(0.0)),
        }];
        for name in hoisted.into_iter().chain(self.temp_vars.iter().cloned()) {
            if !declarations.iter().any(|d| d.name == name) {
                declarations.push(VariableDeclarator { name, init: None });
            }
        }
        declarations
    }

    pub(super) fn state_count(&self) -> i32 {
        self.next_state_id
    }
}
