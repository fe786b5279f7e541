//! Variable hoisting. Every section shares one function scope, so
//! declarations move to a single list and initializers become assignments
//! where the declaration stood.

use crate::ast::{
    Expression, ForInLeft, ForInStatement, ForInit, ForStatement, Statement, VariableDeclaration,
};

/// Rewrites `stmts` and returns the declared names in first-seen order.
pub fn hoist(stmts: Vec<Statement>) -> (Vec<Statement>, Vec<String>) {
    let mut names = Vec::new();
    let stmts = hoist_list(stmts, &mut names);
    (stmts, names)
}

fn declare(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

fn hoist_list(stmts: Vec<Statement>, names: &mut Vec<String>) -> Vec<Statement> {
    stmts
        .into_iter()
        .map(|stmt| hoist_statement(stmt, names))
        .filter(|stmt| !matches!(stmt, Statement::Empty))
        .collect()
}

fn hoist_boxed(stmt: Box<Statement>, names: &mut Vec<String>) -> Box<Statement> {
    Box::new(hoist_statement(*stmt, names))
}

/// The assignments a declaration performs, or `None` when it has no
/// initializers.
fn declaration_to_expression(
    decl: VariableDeclaration,
    names: &mut Vec<String>,
) -> Option<Expression> {
    let mut assignments: Vec<Expression> = decl
        .declarations
        .into_iter()
        .filter_map(|d| {
            declare(names, &d.name);
            d.init.map(|init| Expression::assign(Expression::ident(d.name), init))
        })
        .collect();
    match assignments.len() {
        0 => None,
        1 => assignments.pop(),
        _ => Some(Expression::Sequence(assignments)),
    }
}

fn hoist_statement(stmt: Statement, names: &mut Vec<String>) -> Statement {
    match stmt {
        Statement::Variable(decl) => match declaration_to_expression(decl, names) {
            Some(expr) => Statement::Expression(expr),
            None => Statement::Empty,
        },
        Statement::Block(stmts) => Statement::Block(hoist_list(stmts, names)),
        Statement::If(mut s) => {
            s.consequent = hoist_boxed(s.consequent, names);
            s.alternate = s.alternate.map(|alt| hoist_boxed(alt, names));
            Statement::If(s)
        }
        Statement::While(mut s) => {
            s.body = hoist_boxed(s.body, names);
            Statement::While(s)
        }
        Statement::DoWhile(mut s) => {
            s.body = hoist_boxed(s.body, names);
            Statement::DoWhile(s)
        }
        Statement::For(ForStatement {
            init,
            test,
            update,
            body,
        }) => {
            let init = match init {
                Some(ForInit::Variable(decl)) => {
                    declaration_to_expression(decl, names).map(ForInit::Expression)
                }
                other => other,
            };
            Statement::For(ForStatement {
                init,
                test,
                update,
                body: hoist_boxed(body, names),
            })
        }
        Statement::ForIn(ForInStatement { left, right, body }) => {
            let left = match left {
                ForInLeft::Variable(name) => {
                    declare(names, &name);
                    ForInLeft::Identifier(name)
                }
                other => other,
            };
            Statement::ForIn(ForInStatement {
                left,
                right,
                body: hoist_boxed(body, names),
            })
        }
        Statement::Labeled(label, body) => {
            // A labeled declaration without initializer still needs a target.
            match hoist_statement(*body, names) {
                Statement::Empty => Statement::Labeled(label, Box::new(Statement::Block(Vec::new()))),
                body => Statement::Labeled(label, Box::new(body)),
            }
        }
        Statement::Try(mut s) => {
            s.block = hoist_list(s.block, names);
            if let Some(handler) = s.handler.as_mut() {
                handler.body = hoist_list(std::mem::take(&mut handler.body), names);
            }
            s.finalizer = s.finalizer.map(|f| hoist_list(f, names));
            Statement::Try(s)
        }
        Statement::Switch(mut s) => {
            for case in &mut s.cases {
                case.consequent = hoist_list(std::mem::take(&mut case.consequent), names);
            }
            Statement::Switch(s)
        }
        other => other,
    }
}
