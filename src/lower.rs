//! Control-flow lowering: rewrites a function body that uses labels,
//! `goto`, `yield` or `await` into a single dispatch loop over an integer
//! state variable.

use tracing::debug;

use crate::ast::*;
use crate::error::LoweringResult;
use crate::services::LoweringServices;

pub mod analysis;
mod disposer;
mod finalizer;
pub mod hoist;
mod jumps;
mod labels;
mod splitter;
pub mod state;

#[cfg(test)]
mod tests;

use analysis::{contains_labels_or_goto, has_suspend_inside_try_with_finally};
use hoist::hoist;
use splitter::Splitter;

/// How a body suspends, if at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMachineKind {
    Normal,
    Iterator,
    Async,
}

/// A `finally` clause extracted into a closure.
#[derive(Clone, Debug, PartialEq)]
pub struct FinallyHandler {
    pub name: String,
    pub function: FunctionExpr,
}

/// A lowered iterator body.
#[derive(Clone, Debug, PartialEq)]
pub struct IteratorBlock {
    /// State that must survive between resumptions, state variable first.
    pub variables: Vec<VariableDeclarator>,
    /// The resume routine: returns `true` after producing a value and
    /// `false` once exhausted.
    pub body: Vec<Statement>,
    pub finally_handlers: Vec<FinallyHandler>,
    /// Runs the handlers owed by the current state and exhausts the body.
    pub disposer: Option<Statement>,
}

/// Lowers a synchronous body. Bodies without labels or `goto` come back
/// unchanged, apart from their nested function literals.
pub fn rewrite_normal_function<S: LoweringServices + ?Sized>(
    mut body: Vec<Statement>,
    services: &mut S,
) -> LoweringResult<Vec<Statement>> {
    lower_nested_functions(&mut body, services)?;
    if !contains_labels_or_goto(&body) {
        return Ok(body);
    }
    let (body, hoisted) = hoist(body);
    let mut splitter = Splitter::new(services, StateMachineKind::Normal);
    let machine = splitter.split(body)?;
    debug!(
        target: "state_machine",
        kind = "normal",
        states = splitter.state_count(),
        "lowered body"
    );
    let declarations = splitter.variables(hoisted);
    Ok(vec![
        Statement::Variable(VariableDeclaration { declarations }),
        machine,
    ])
}

pub fn rewrite_iterator_block<S: LoweringServices + ?Sized>(
    mut body: Vec<Statement>,
    services: &mut S,
) -> LoweringResult<IteratorBlock> {
    lower_nested_functions(&mut body, services)?;
    let (body, hoisted) = hoist(body);
    let mut splitter = Splitter::new(services, StateMachineKind::Iterator);
    let machine = splitter.split(body)?;
    let disposer = disposer::generate(&splitter.state_var, &splitter.all_states);
    let variables = splitter.variables(hoisted);
    let finally_handlers: Vec<FinallyHandler> = splitter
        .finally_handlers
        .drain(..)
        .map(|(name, function)| FinallyHandler { name, function })
        .collect();
    debug!(
        target: "state_machine",
        kind = "iterator",
        states = splitter.state_count(),
        handlers = finally_handlers.len(),
        "lowered body"
    );

    let mut resume = match &disposer {
        Some(disposer) if !finally_handlers.is_empty() => {
            let error = services.allocate_temp();
            vec![Statement::Try(TryStatement {
                block: vec![machine],
                handler: Some(CatchClause {
                    param: error.clone(),
                    body: vec![disposer.clone(), Statement::Throw(Expression::ident(error))],
                }),
                finalizer: None,
            })]
        }
        _ => vec![machine],
    };
    resume.push(Statement::Return(Some(Expression::boolean(false))));

    Ok(IteratorBlock {
        variables,
        body: resume,
        finally_handlers,
        disposer,
    })
}

/// Lowers an async body into a driver function that resumes the dispatch
/// loop each time an awaited operation completes.
pub fn rewrite_async_function<S: LoweringServices + ?Sized>(
    mut body: Vec<Statement>,
    services: &mut S,
) -> LoweringResult<Vec<Statement>> {
    lower_nested_functions(&mut body, services)?;
    let (body, hoisted) = hoist(body);
    let driver = services.allocate_temp();
    let guard = has_suspend_inside_try_with_finally(&body).then(|| services.allocate_temp());

    let mut splitter = Splitter::new(services, StateMachineKind::Async)
        .with_async_driver(driver.clone(), guard.clone());
    let machine = splitter.split(body)?;
    debug!(
        target: "state_machine",
        kind = "async",
        states = splitter.state_count(),
        guarded = guard.is_some(),
        "lowered body"
    );
    let mut variables = splitter.variables(hoisted);

    if let Some((name, init)) = services.completion_source() {
        variables.push(VariableDeclarator {
            name,
            init: Some(init),
        });
    }
    variables.push(VariableDeclarator {
        name: driver.clone(),
        init: None,
    });

    let error = services.allocate_temp();
    let mut driver_body = Vec::new();
    if let Some(guard) = guard {
        driver_body.push(Statement::Variable(VariableDeclaration {
            declarations: vec![VariableDeclarator {
                name: guard,
                init: Some(Expression::boolean(true)),
            }],
        }));
    }
    driver_body.push(Statement::Try(TryStatement {
        block: vec![machine, Statement::Expression(services.set_result(None))],
        handler: Some(CatchClause {
            param: error.clone(),
            body: vec![Statement::Expression(
                services.set_exception(Expression::ident(error)),
            )],
        }),
        finalizer: None,
    }));

    let mut out = vec![
        Statement::Variable(VariableDeclaration {
            declarations: variables,
        }),
        Statement::Expression(Expression::assign(
            Expression::ident(driver.as_str()),
            Expression::Function(FunctionExpr {
                name: None,
                params: Vec::new(),
                body: driver_body,
                kind: FunctionKind::Normal,
            }),
        )),
        Statement::Expression(Expression::call(Expression::ident(driver), Vec::new())),
    ];
    if let Some(handle) = services.completion_handle() {
        out.push(Statement::Return(Some(handle)));
    }
    Ok(out)
}

/// Lowers every nested `function` literal on its own. Iterator and async
/// literals are left for the host.
fn lower_nested_functions<S: LoweringServices + ?Sized>(
    stmts: &mut [Statement],
    services: &mut S,
) -> LoweringResult<()> {
    for stmt in stmts {
        lower_in_statement(stmt, services)?;
    }
    Ok(())
}

fn lower_in_statement<S: LoweringServices + ?Sized>(
    stmt: &mut Statement,
    services: &mut S,
) -> LoweringResult<()> {
    match stmt {
        Statement::Expression(expr) | Statement::Throw(expr) => lower_in_expression(expr, services),
        Statement::Return(value) | Statement::Yield(value) => match value {
            Some(expr) => lower_in_expression(expr, services),
            None => Ok(()),
        },
        Statement::Variable(decl) => {
            for d in &mut decl.declarations {
                if let Some(init) = &mut d.init {
                    lower_in_expression(init, services)?;
                }
            }
            Ok(())
        }
        Statement::Block(stmts) => lower_nested_functions(stmts, services),
        Statement::If(s) => {
            lower_in_expression(&mut s.test, services)?;
            lower_in_statement(&mut s.consequent, services)?;
            match &mut s.alternate {
                Some(alt) => lower_in_statement(alt, services),
                None => Ok(()),
            }
        }
        Statement::While(s) => {
            lower_in_expression(&mut s.test, services)?;
            lower_in_statement(&mut s.body, services)
        }
        Statement::DoWhile(s) => {
            lower_in_statement(&mut s.body, services)?;
            lower_in_expression(&mut s.test, services)
        }
        Statement::For(s) => {
            match &mut s.init {
                Some(ForInit::Expression(expr)) => lower_in_expression(expr, services)?,
                Some(ForInit::Variable(decl)) => {
                    for d in &mut decl.declarations {
                        if let Some(init) = &mut d.init {
                            lower_in_expression(init, services)?;
                        }
                    }
                }
                None => {}
            }
            for expr in s.test.iter_mut().chain(s.update.iter_mut()) {
                lower_in_expression(expr, services)?;
            }
            lower_in_statement(&mut s.body, services)
        }
        Statement::ForIn(s) => {
            lower_in_expression(&mut s.right, services)?;
            lower_in_statement(&mut s.body, services)
        }
        Statement::Try(s) => {
            lower_nested_functions(&mut s.block, services)?;
            if let Some(handler) = &mut s.handler {
                lower_nested_functions(&mut handler.body, services)?;
            }
            match &mut s.finalizer {
                Some(finalizer) => lower_nested_functions(finalizer, services),
                None => Ok(()),
            }
        }
        Statement::Switch(s) => {
            lower_in_expression(&mut s.discriminant, services)?;
            for case in &mut s.cases {
                for test in case.tests.iter_mut().flatten() {
                    lower_in_expression(test, services)?;
                }
                lower_nested_functions(&mut case.consequent, services)?;
            }
            Ok(())
        }
        Statement::Labeled(_, body) => lower_in_statement(body, services),
        Statement::Await(s) => lower_in_expression(&mut s.awaiter, services),
        Statement::Empty
        | Statement::Break(_)
        | Statement::Continue(_)
        | Statement::Goto(_)
        | Statement::Jump(_)
        | Statement::SetNextState(_) => Ok(()),
    }
}

fn lower_in_expression<S: LoweringServices + ?Sized>(
    expr: &mut Expression,
    services: &mut S,
) -> LoweringResult<()> {
    match expr {
        Expression::Function(function) => {
            if function.kind == FunctionKind::Normal {
                let body = std::mem::take(&mut function.body);
                function.body = rewrite_normal_function(body, services)?;
            }
            Ok(())
        }
        Expression::Array(items) | Expression::Sequence(items) => {
            for item in items {
                lower_in_expression(item, services)?;
            }
            Ok(())
        }
        Expression::Unary(_, operand) | Expression::Update(_, _, operand) => {
            lower_in_expression(operand, services)
        }
        Expression::Binary(_, left, right)
        | Expression::Logical(_, left, right)
        | Expression::Assign(_, left, right) => {
            lower_in_expression(left, services)?;
            lower_in_expression(right, services)
        }
        Expression::Conditional(test, consequent, alternate) => {
            lower_in_expression(test, services)?;
            lower_in_expression(consequent, services)?;
            lower_in_expression(alternate, services)
        }
        Expression::Call(callee, args) | Expression::New(callee, args) => {
            lower_in_expression(callee, services)?;
            for arg in args {
                lower_in_expression(arg, services)?;
            }
            Ok(())
        }
        Expression::Member(object, property) => {
            lower_in_expression(object, services)?;
            match property {
                MemberProperty::Computed(key) => lower_in_expression(key, services),
                MemberProperty::Dot(_) => Ok(()),
            }
        }
        Expression::Literal(_) | Expression::Identifier(_) | Expression::This => Ok(()),
    }
}
