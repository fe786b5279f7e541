//! Callbacks the lowering pass needs from its host: name allocation, the
//! temporary heuristic, and the expressions that report produced values and
//! results.

use crate::ast::Expression;

pub trait LoweringServices {
    /// Whether `expr` must be stored in a temporary before being read twice.
    fn is_expression_complex(&self, expr: &Expression) -> bool;

    fn allocate_temp(&mut self) -> String;

    fn allocate_loop_label(&mut self) -> String;

    fn allocate_finally_handler(&mut self) -> String;

    fn allocate_state_variable(&mut self) -> String {
        self.allocate_temp()
    }

    /// Records `value` as the current element of an iterator.
    fn yield_value(&mut self, value: Expression) -> Expression;

    /// Resolves the async completion, with `value` when the body returned one.
    fn set_result(&mut self, value: Option<Expression>) -> Expression;

    fn set_exception(&mut self, error: Expression) -> Expression;

    /// Variable holding the async completion source, with its initializer.
    fn completion_source(&mut self) -> Option<(String, Expression)> {
        None
    }

    /// Value an async body returns to its caller.
    fn completion_handle(&mut self) -> Option<Expression> {
        None
    }
}

/// Counter-based names and a `TaskCompletionSource`-style async protocol.
#[derive(Debug, Clone)]
pub struct DefaultServices {
    temps: u32,
    loops: u32,
    handlers: u32,
    states: u32,
    current_name: String,
    completion_name: String,
}

impl DefaultServices {
    pub fn new() -> Self {
        DefaultServices {
            temps: 0,
            loops: 0,
            handlers: 0,
            states: 0,
            current_name: "$current".to_string(),
            completion_name: "$tcs".to_string(),
        }
    }

    /// Name of the variable receiving produced iterator values.
    pub fn current_name(&self) -> &str {
        &self.current_name
    }

    fn completion(&self) -> Expression {
        Expression::ident(self.completion_name.as_str())
    }
}

impl Default for DefaultServices {
    fn default() -> Self {
        Self::new()
    }
}

fn next_name(counter: &mut u32, prefix: &str) -> String {
    *counter += 1;
    format!("{prefix}{counter}")
}

impl LoweringServices for DefaultServices {
    fn is_expression_complex(&self, expr: &Expression) -> bool {
        !matches!(
            expr,
            Expression::Identifier(_) | Expression::Literal(_) | Expression::This
        )
    }

    fn allocate_temp(&mut self) -> String {
        next_name(&mut self.temps, "$tmp")
    }

    fn allocate_loop_label(&mut self) -> String {
        next_name(&mut self.loops, "$loop")
    }

    fn allocate_finally_handler(&mut self) -> String {
        next_name(&mut self.handlers, "$finally")
    }

    fn allocate_state_variable(&mut self) -> String {
        next_name(&mut self.states, "$state")
    }

    fn yield_value(&mut self, value: Expression) -> Expression {
        Expression::assign(Expression::ident(self.current_name.as_str()), value)
    }

    fn set_result(&mut self, value: Option<Expression>) -> Expression {
        Expression::method_call(self.completion(), "setResult", value.into_iter().collect())
    }

    fn set_exception(&mut self, error: Expression) -> Expression {
        Expression::method_call(self.completion(), "setException", vec![error])
    }

    fn completion_source(&mut self) -> Option<(String, Expression)> {
        let init = Expression::New(
            Box::new(Expression::ident("TaskCompletionSource")),
            Vec::new(),
        );
        Some((self.completion_name.clone(), init))
    }

    fn completion_handle(&mut self) -> Option<Expression> {
        Some(Expression::member(self.completion(), "task"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    #[test]
    fn names_are_numbered_per_kind() {
        let mut services = DefaultServices::new();
        assert_eq!(services.allocate_state_variable(), "$state1");
        assert_eq!(services.allocate_loop_label(), "$loop1");
        assert_eq!(services.allocate_loop_label(), "$loop2");
        assert_eq!(services.allocate_temp(), "$tmp1");
        assert_eq!(services.allocate_finally_handler(), "$finally1");
    }

    #[test]
    fn only_simple_operands_skip_temporaries() {
        let services = DefaultServices::new();
        assert!(!services.is_expression_complex(&Expression::ident("x")));
        assert!(!services.is_expression_complex(&Expression::Literal(Literal::Null)));
        assert!(services.is_expression_complex(&Expression::call(Expression::ident("f"), vec![])));
    }
}
