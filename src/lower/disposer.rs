//! Early-termination routine for iterator bodies.

use std::rc::Rc;

use crate::ast::*;

struct HandlerNode {
    handler: Rc<str>,
    /// Every state id whose frame stack passes through this node.
    states: Vec<i32>,
    children: Vec<HandlerNode>,
}

fn insert(nodes: &mut Vec<HandlerNode>, id: i32, handlers: &[Rc<str>]) {
    let Some((first, rest)) = handlers.split_first() else {
        return;
    };
    let index = match nodes.iter().position(|node| node.handler == *first) {
        Some(index) => index,
        None => {
            nodes.push(HandlerNode {
                handler: first.clone(),
                states: Vec::new(),
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };
    let node = &mut nodes[index];
    if !node.states.contains(&id) {
        node.states.push(id);
    }
    insert(&mut node.children, id, rest);
}

fn call_handler(handler: &str) -> Statement {
    Statement::Expression(Expression::method_call(
        Expression::ident(handler),
        "call",
        vec![Expression::This],
    ))
}

fn emit(state_var: &str, nodes: &[HandlerNode]) -> Vec<Statement> {
    nodes
        .iter()
        .map(|node| {
            let run = if node.children.is_empty() {
                call_handler(&node.handler)
            } else {
                Statement::Try(TryStatement {
                    block: emit(state_var, &node.children),
                    handler: None,
                    finalizer: Some(vec![call_handler(&node.handler)]),
                })
            };
            Statement::Switch(SwitchStatement {
                discriminant: Expression::ident(state_var),
                cases: vec![SwitchCase {
                    tests: node
                        .states
                        .iter()
                        .map(|&id| Some(Expression::number(id as f64)))
                        .collect(),
                    consequent: vec![run, Statement::Break(None)],
                }],
            })
        })
        .collect()
}

/// Builds the disposer from each state's handlers, ordered outer to inner.
/// Returns `None` when no state owes a handler.
pub fn generate(state_var: &str, states: &[(i32, Vec<Rc<str>>)]) -> Option<Statement> {
    let mut roots = Vec::new();
    for (id, handlers) in states {
        insert(&mut roots, *id, handlers);
    }
    if roots.is_empty() {
        return None;
    }
    Some(Statement::Try(TryStatement {
        block: emit(state_var, &roots),
        handler: None,
        finalizer: Some(vec![Statement::Expression(Expression::assign(
            Expression::ident(state_var),
            Expression::number(-1.0),
        ))]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_statements;
    use expect_test::expect;

    fn names(list: &[&str]) -> Vec<Rc<str>> {
        list.iter().map(|&n| Rc::from(n)).collect()
    }

    #[test]
    fn no_frames_no_disposer() {
        assert!(generate("$state1", &[(0, Vec::new()), (1, Vec::new())]).is_none());
    }

    #[test]
    fn nested_handlers_share_prefix() {
        let states = [
            (0, Vec::new()),
            (1, names(&["$finally1"])),
            (2, names(&["$finally1", "$finally2"])),
            (3, names(&["$finally1", "$finally2"])),
            (4, names(&["$finally3"])),
        ];
        let disposer = generate("$state1", &states).unwrap();
        expect![[r#"
            try {
                switch ($state1) {
                    case 1:
                    case 2:
                    case 3:
                        try {
                            switch ($state1) {
                                case 2:
                                case 3:
                                    $finally2.call(this);
                                    break;
                            }
                        } finally {
                            $finally1.call(this);
                        }
                        break;
                }
                switch ($state1) {
                    case 4:
                        $finally3.call(this);
                        break;
                }
            } finally {
                $state1 = -1;
            }
        "#]]
        .assert_eq(&print_statements(&[disposer]));
    }
}
