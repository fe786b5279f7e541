use super::*;

#[derive(Clone, Copy)]
enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl<'a> Parser<'a> {
    /// Runs `parse` with `in` treated as an operator again.
    fn with_in_allowed<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let result = parse(self);
        self.no_in = saved;
        result
    }

    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let expr = self.parse_assignment_expression()?;
        if self.current == Token::Comma {
            let mut exprs = vec![expr];
            while self.current == Token::Comma {
                self.advance()?;
                exprs.push(self.parse_assignment_expression()?);
            }
            Ok(Expression::Sequence(exprs))
        } else {
            Ok(expr)
        }
    }

    fn is_assignment_target(expr: &Expression) -> bool {
        matches!(expr, Expression::Identifier(_) | Expression::Member(..))
    }

    fn validate_assignment_target(&self, expr: &Expression) -> Result<(), ParseError> {
        if Self::is_assignment_target(expr) {
            Ok(())
        } else {
            Err(self.error("Invalid left-hand side in assignment"))
        }
    }

    pub(super) fn parse_assignment_expression(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_conditional_expression()?;

        let op = match &self.current {
            Token::Assign => Some(AssignOp::Assign),
            Token::PlusAssign => Some(AssignOp::AddAssign),
            Token::MinusAssign => Some(AssignOp::SubAssign),
            Token::StarAssign => Some(AssignOp::MulAssign),
            _ => None,
        };

        if let Some(op) = op {
            self.validate_assignment_target(&left)?;
            self.advance()?;
            let right = self.parse_assignment_expression()?;
            Ok(Expression::Assign(op, Box::new(left), Box::new(right)))
        } else {
            Ok(left)
        }
    }

    fn parse_conditional_expression(&mut self) -> Result<Expression, ParseError> {
        let test = self.parse_binary(1)?;
        if self.current != Token::Question {
            return Ok(test);
        }
        self.advance()?;
        let consequent = self.with_in_allowed(Self::parse_assignment_expression)?;
        self.eat(&Token::Colon)?;
        let alternate = self.parse_assignment_expression()?;
        Ok(Expression::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    /// Binding power of the current token as an infix operator.
    fn infix_operator(&self) -> Option<(u8, Infix)> {
        let (prec, op) = match &self.current {
            Token::LogicalOr => return Some((1, Infix::Logical(LogicalOp::Or))),
            Token::LogicalAnd => return Some((2, Infix::Logical(LogicalOp::And))),
            Token::Pipe => (3, BinaryOp::BitOr),
            Token::Caret => (4, BinaryOp::BitXor),
            Token::Ampersand => (5, BinaryOp::BitAnd),
            Token::Equal => (6, BinaryOp::Eq),
            Token::NotEqual => (6, BinaryOp::NotEq),
            Token::StrictEqual => (6, BinaryOp::StrictEq),
            Token::StrictNotEqual => (6, BinaryOp::StrictNotEq),
            Token::LessThan => (7, BinaryOp::Lt),
            Token::GreaterThan => (7, BinaryOp::Gt),
            Token::LessThanEqual => (7, BinaryOp::LtEq),
            Token::GreaterThanEqual => (7, BinaryOp::GtEq),
            Token::Keyword(Keyword::Instanceof) => (7, BinaryOp::Instanceof),
            Token::Keyword(Keyword::In) if !self.no_in => (7, BinaryOp::In),
            Token::Plus => (8, BinaryOp::Add),
            Token::Minus => (8, BinaryOp::Sub),
            Token::Star => (9, BinaryOp::Mul),
            Token::Slash => (9, BinaryOp::Div),
            Token::Percent => (9, BinaryOp::Mod),
            _ => return None,
        };
        Some((prec, Infix::Binary(op)))
    }

    /// Precedence climbing over every left-associative binary operator.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some((prec, op)) = self.infix_operator()
            && prec >= min_prec
        {
            self.advance()?;
            let right = self.parse_binary(prec + 1)?;
            left = match op {
                Infix::Binary(op) => Expression::binary(op, left, right),
                Infix::Logical(op) => Expression::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn update_operator(&self) -> Option<UpdateOp> {
        match self.current {
            Token::Increment => Some(UpdateOp::Increment),
            Token::Decrement => Some(UpdateOp::Decrement),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if let Some(op) = self.update_operator() {
            self.advance()?;
            let target = self.parse_unary()?;
            self.validate_assignment_target(&target)?;
            return Ok(Expression::Update(op, true, Box::new(target)));
        }
        let op = match &self.current {
            Token::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            Token::Tilde => UnaryOp::BitNot,
            Token::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        let operand = self.parse_unary()?;
        Ok(Expression::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let expr = self.parse_left_hand_side_expression()?;
        // A line break before `++`/`--` ends the statement instead.
        match self.update_operator() {
            Some(op) if !self.prev_line_terminator => {
                self.validate_assignment_target(&expr)?;
                self.advance()?;
                Ok(Expression::Update(op, false, Box::new(expr)))
            }
            _ => Ok(expr),
        }
    }

    /// Applies `.name`, `[key]` and, when `calls` is set, `(args)` suffixes.
    fn parse_member_suffixes(
        &mut self,
        mut expr: Expression,
        calls: bool,
    ) -> Result<Expression, ParseError> {
        loop {
            expr = match &self.current {
                Token::Dot => {
                    self.advance()?;
                    // Keywords are valid property names.
                    let name = match self.advance()? {
                        Token::Identifier(name) => name,
                        Token::Keyword(kw) => kw.to_string(),
                        other => {
                            return Err(self.error(format!("Expected property name, got {other:?}")));
                        }
                    };
                    Expression::Member(Box::new(expr), MemberProperty::Dot(name))
                }
                Token::LeftBracket => {
                    self.advance()?;
                    let key = self.with_in_allowed(Self::parse_expression)?;
                    self.eat(&Token::RightBracket)?;
                    Expression::Member(Box::new(expr), MemberProperty::Computed(Box::new(key)))
                }
                Token::LeftParen if calls => {
                    let args = self.parse_arguments()?;
                    Expression::Call(Box::new(expr), args)
                }
                _ => return Ok(expr),
            };
        }
    }

    pub(super) fn parse_left_hand_side_expression(&mut self) -> Result<Expression, ParseError> {
        let base = if self.current == Token::Keyword(Keyword::New) {
            self.parse_new_expression()?
        } else {
            self.parse_primary_expression()?
        };
        self.parse_member_suffixes(base, true)
    }

    /// `new callee(args)`; the callee is a member chain without calls and
    /// the argument list is optional.
    fn parse_new_expression(&mut self) -> Result<Expression, ParseError> {
        self.eat_keyword(Keyword::New)?;
        let base = if self.current == Token::Keyword(Keyword::New) {
            self.parse_new_expression()?
        } else {
            self.parse_primary_expression()?
        };
        let callee = self.parse_member_suffixes(base, false)?;
        let args = match self.current {
            Token::LeftParen => self.parse_arguments()?,
            _ => Vec::new(),
        };
        Ok(Expression::New(Box::new(callee), args))
    }

    /// Comma-separated items up to `close`; the opening token is current.
    fn parse_list<T>(
        &mut self,
        close: Token,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.advance()?;
        let mut items = Vec::new();
        while self.current != close {
            items.push(item(self)?);
            if self.current != close {
                self.eat(&Token::Comma)?;
            }
        }
        self.eat(&close)?;
        Ok(items)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.with_in_allowed(|p| p.parse_list(Token::RightParen, Self::parse_assignment_expression))
    }

    fn parse_primary_expression(&mut self) -> Result<Expression, ParseError> {
        let literal = match &self.current {
            Token::Identifier(_) => return self.identifier().map(Expression::Identifier),
            Token::LeftBracket => {
                let elements = self.parse_list(Token::RightBracket, Self::parse_assignment_expression)?;
                return Ok(Expression::Array(elements));
            }
            Token::LeftParen => {
                self.advance()?;
                let expr = self.with_in_allowed(Self::parse_expression)?;
                self.eat(&Token::RightParen)?;
                return Ok(expr);
            }
            Token::Keyword(Keyword::Function) => return self.parse_function_expression(false),
            Token::Keyword(Keyword::Async) => {
                self.advance()?;
                if self.current != Token::Keyword(Keyword::Function) || self.prev_line_terminator {
                    return Err(self.error("Expected 'function' after 'async'"));
                }
                return self.parse_function_expression(true);
            }
            Token::NumericLiteral(n) => Expression::number(*n),
            Token::StringLiteral(s) => Expression::Literal(Literal::String(s.clone())),
            Token::BooleanLiteral(b) => Expression::boolean(*b),
            Token::NullLiteral => Expression::Literal(Literal::Null),
            Token::Keyword(Keyword::This) => Expression::This,
            other => return Err(self.error(format!("Unexpected token {other:?}"))),
        };
        self.advance()?;
        Ok(literal)
    }

    /// `function name?(params) { body }`, `function*` for an iterator body.
    fn parse_function_expression(&mut self, is_async: bool) -> Result<Expression, ParseError> {
        self.eat_keyword(Keyword::Function)?;
        let is_iterator = self.current == Token::Star;
        if is_iterator {
            self.advance()?;
        }
        let kind = match (is_async, is_iterator) {
            (false, false) => FunctionKind::Normal,
            (false, true) => FunctionKind::Iterator,
            (true, false) => FunctionKind::Async,
            (true, true) => return Err(self.error("Async iterator functions are not supported")),
        };
        let name = match self.current {
            Token::Identifier(_) => Some(self.identifier()?),
            _ => None,
        };
        if self.current != Token::LeftParen {
            return Err(self.error(format!("Expected LeftParen, got {:?}", self.current)));
        }
        let params = self.parse_list(Token::RightParen, Self::identifier)?;
        let body = self.with_in_allowed(Self::parse_braced)?;
        Ok(Expression::Function(FunctionExpr {
            name,
            params,
            body,
            kind,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expression {
        match parse_body(src).unwrap().remove(0) {
            Statement::Expression(e) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn precedence() {
        let e = expr("a + b * c;");
        let Expression::Binary(BinaryOp::Add, _, right) = e else {
            panic!("expected addition");
        };
        assert!(matches!(*right, Expression::Binary(BinaryOp::Mul, ..)));

        let e = expr("a || b && c;");
        assert!(matches!(e, Expression::Logical(LogicalOp::Or, ..)));

        let e = expr("x === 1 || x === 2;");
        let Expression::Logical(LogicalOp::Or, left, _) = e else {
            panic!("expected or");
        };
        assert!(matches!(*left, Expression::Binary(BinaryOp::StrictEq, ..)));
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = expr("a = b += 1;");
        let Expression::Assign(AssignOp::Assign, _, right) = e else {
            panic!("expected assignment");
        };
        assert!(matches!(*right, Expression::Assign(AssignOp::AddAssign, ..)));
    }

    #[test]
    fn invalid_assignment_target() {
        assert!(parse_body("1 = a;").is_err());
        assert!(parse_body("f()++;").is_err());
    }

    #[test]
    fn calls_members_and_new() {
        let e = expr("$tcs.task.onCompleted(f)[0];");
        assert!(matches!(e, Expression::Member(_, MemberProperty::Computed(_))));

        let e = expr("new TaskCompletionSource();");
        assert!(matches!(e, Expression::New(_, ref args) if args.is_empty()));

        let e = expr("h.call(this);");
        let Expression::Call(callee, args) = e else {
            panic!("expected call");
        };
        assert_eq!(args, vec![Expression::This]);
        assert_eq!(*callee, Expression::member(Expression::ident("h"), "call"));
    }

    #[test]
    fn keyword_property_names() {
        let e = expr("x.default;");
        assert_eq!(e, Expression::member(Expression::ident("x"), "default"));
    }

    #[test]
    fn unary_and_update() {
        assert!(matches!(expr("typeof x;"), Expression::Unary(UnaryOp::Typeof, _)));
        assert!(matches!(expr("!x;"), Expression::Unary(UnaryOp::Not, _)));
        assert!(matches!(expr("++i;"), Expression::Update(UpdateOp::Increment, true, _)));
        assert!(matches!(expr("i--;"), Expression::Update(UpdateOp::Decrement, false, _)));
    }

    #[test]
    fn immediately_invoked_function() {
        let e = expr("(function() {})();");
        let Expression::Call(callee, _) = e else {
            panic!("expected call");
        };
        assert!(matches!(*callee, Expression::Function(_)));
    }

    #[test]
    fn arrays_and_conditionals() {
        assert!(matches!(expr("[1, 'two', [3]];"), Expression::Array(ref e) if e.len() == 3));
        assert!(matches!(expr("a ? b : c;"), Expression::Conditional(..)));
    }

    #[test]
    fn in_operator_outside_for_head() {
        assert!(matches!(expr("k in o;"), Expression::Binary(BinaryOp::In, ..)));
    }
}
