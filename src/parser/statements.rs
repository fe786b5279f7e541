use super::*;

impl<'a> Parser<'a> {
    pub(super) fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let keyword = match &self.current {
            Token::LeftBrace => return Ok(Statement::Block(self.parse_braced()?)),
            Token::Semicolon => {
                self.advance()?;
                return Ok(Statement::Empty);
            }
            Token::Keyword(kw) => *kw,
            _ => return self.parse_expression_statement_or_labeled(),
        };
        match keyword {
            Keyword::Var => {
                let decl = self.parse_variable_declaration()?;
                self.eat_semicolon()?;
                Ok(Statement::Variable(decl))
            }
            Keyword::If => self.parse_if_statement(),
            Keyword::While => {
                self.advance()?;
                let test = self.parse_paren_expression()?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::While(WhileStatement { test, body }))
            }
            Keyword::Do => self.parse_do_while_statement(),
            Keyword::For => self.parse_for_statement(),
            Keyword::Return => {
                self.advance()?;
                let value = self.parse_statement_tail()?;
                Ok(Statement::Return(value))
            }
            Keyword::Break | Keyword::Continue => {
                self.advance()?;
                let label = self.parse_jump_label()?;
                Ok(match keyword {
                    Keyword::Break => Statement::Break(label),
                    _ => Statement::Continue(label),
                })
            }
            Keyword::Throw => {
                self.advance()?;
                if self.prev_line_terminator {
                    return Err(self.error("Illegal newline after throw"));
                }
                let value = self.parse_statement_tail()?;
                value
                    .map(Statement::Throw)
                    .ok_or_else(|| self.error("Expected expression after throw"))
            }
            Keyword::Try => self.parse_try_statement(),
            Keyword::Switch => self.parse_switch_statement(),
            Keyword::Goto => {
                self.advance()?;
                let label = self.identifier()?;
                self.eat_semicolon()?;
                Ok(Statement::Goto(label))
            }
            Keyword::Yield => self.parse_yield_statement(),
            Keyword::Await => self.parse_await_statement(),
            _ => self.parse_expression_statement_or_labeled(),
        }
    }

    /// Optional expression running to the end of the statement.
    fn parse_statement_tail(&mut self) -> Result<Option<Expression>, ParseError> {
        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.eat_semicolon()?;
        Ok(value)
    }

    /// Optional label after `break`/`continue` on the same line.
    fn parse_jump_label(&mut self) -> Result<Option<String>, ParseError> {
        let label = match &self.current {
            Token::Identifier(_) if !self.prev_line_terminator => Some(self.identifier()?),
            _ => None,
        };
        self.eat_semicolon()?;
        Ok(label)
    }

    fn parse_expression_statement_or_labeled(&mut self) -> Result<Statement, ParseError> {
        if let Token::Identifier(name) = &self.current {
            let label = name.clone();
            let had_lt = self.prev_line_terminator;
            let token = self.advance()?;
            if self.eat_if(&Token::Colon)? {
                let body = self.parse_statement()?;
                return Ok(Statement::Labeled(label, Box::new(body)));
            }
            // Not a label; the identifier starts an expression.
            self.push_back(token, had_lt);
        }
        let expr = self.parse_expression()?;
        self.eat_semicolon()?;
        Ok(Statement::Expression(expr))
    }

    fn parse_variable_declaration(&mut self) -> Result<VariableDeclaration, ParseError> {
        self.eat_keyword(Keyword::Var)?;
        let mut declarations = Vec::new();
        loop {
            let name = self.identifier()?;
            let init = match self.eat_if(&Token::Assign)? {
                true => Some(self.parse_assignment_expression()?),
                false => None,
            };
            declarations.push(VariableDeclarator { name, init });
            if !self.eat_if(&Token::Comma)? {
                return Ok(VariableDeclaration { declarations });
            }
        }
    }

    fn parse_paren_expression(&mut self) -> Result<Expression, ParseError> {
        self.eat(&Token::LeftParen)?;
        let expr = self.parse_expression()?;
        self.eat(&Token::RightParen)?;
        Ok(expr)
    }

    /// An expression unless `end` comes first; `end` is consumed either way.
    fn parse_optional_until(&mut self, end: &Token) -> Result<Option<Expression>, ParseError> {
        let expr = match &self.current == end {
            true => None,
            false => Some(self.parse_expression()?),
        };
        self.eat(end)?;
        Ok(expr)
    }

    fn parse_if_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::If)?;
        let test = self.parse_paren_expression()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = match self.eat_if(&Token::Keyword(Keyword::Else))? {
            true => Some(Box::new(self.parse_statement()?)),
            false => None,
        };
        Ok(Statement::If(IfStatement {
            test,
            consequent,
            alternate,
        }))
    }

    fn parse_do_while_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::Do)?;
        let body = Box::new(self.parse_statement()?);
        self.eat_keyword(Keyword::While)?;
        let test = self.parse_paren_expression()?;
        // The trailing semicolon is optional even on the same line.
        self.eat_if(&Token::Semicolon)?;
        Ok(Statement::DoWhile(DoWhileStatement { test, body }))
    }

    fn parse_for_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::For)?;
        self.eat(&Token::LeftParen)?;

        let outer_no_in = std::mem::replace(&mut self.no_in, true);
        let init = match self.current {
            Token::Semicolon => Ok(None),
            Token::Keyword(Keyword::Var) => self
                .parse_variable_declaration()
                .map(|decl| Some(ForInit::Variable(decl))),
            _ => self.parse_expression().map(|expr| Some(ForInit::Expression(expr))),
        };
        self.no_in = outer_no_in;
        let init = init?;

        if self.eat_if(&Token::Keyword(Keyword::In))? {
            let left = match init {
                Some(ForInit::Variable(mut decl))
                    if decl.declarations.len() == 1 && decl.declarations[0].init.is_none() =>
                {
                    decl.declarations.pop().map(|d| ForInLeft::Variable(d.name))
                }
                Some(ForInit::Expression(Expression::Identifier(name))) => {
                    Some(ForInLeft::Identifier(name))
                }
                _ => None,
            }
            .ok_or_else(|| self.error("Invalid left-hand side in for-in"))?;
            let right = self.parse_expression()?;
            self.eat(&Token::RightParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::ForIn(ForInStatement { left, right, body }));
        }

        self.eat(&Token::Semicolon)?;
        let test = self.parse_optional_until(&Token::Semicolon)?;
        let update = self.parse_optional_until(&Token::RightParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::For(ForStatement {
            init,
            test,
            update,
            body,
        }))
    }

    /// `yield return value;` or `yield break;`
    fn parse_yield_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::Yield)?;
        if self.eat_if(&Token::Keyword(Keyword::Break))? {
            self.eat_semicolon()?;
            return Ok(Statement::Yield(None));
        }
        if !self.eat_if(&Token::Keyword(Keyword::Return))? {
            return Err(self.error(format!(
                "Expected 'return' or 'break' after yield, got {:?}",
                self.current
            )));
        }
        let value = self.parse_expression()?;
        self.eat_semicolon()?;
        Ok(Statement::Yield(Some(value)))
    }

    /// `await awaiter;` or `await awaiter:method;`
    fn parse_await_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::Await)?;
        let awaiter = self.parse_left_hand_side_expression()?;
        let on_completed = match self.eat_if(&Token::Colon)? {
            true => self.identifier()?,
            false => "onCompleted".to_string(),
        };
        self.eat_semicolon()?;
        Ok(Statement::Await(AwaitStatement {
            awaiter,
            on_completed,
        }))
    }

    fn parse_try_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::Try)?;
        let block = self.parse_braced()?;
        let mut handler = None;
        if self.eat_if(&Token::Keyword(Keyword::Catch))? {
            self.eat(&Token::LeftParen)?;
            let param = self.identifier()?;
            self.eat(&Token::RightParen)?;
            handler = Some(CatchClause {
                param,
                body: self.parse_braced()?,
            });
        }
        let finalizer = match self.eat_if(&Token::Keyword(Keyword::Finally))? {
            true => Some(self.parse_braced()?),
            false => None,
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
        }))
    }

    fn at_clause_end(&self) -> bool {
        matches!(
            self.current,
            Token::Keyword(Keyword::Case | Keyword::Default) | Token::RightBrace | Token::Eof
        )
    }

    fn parse_switch_statement(&mut self) -> Result<Statement, ParseError> {
        self.eat_keyword(Keyword::Switch)?;
        let discriminant = self.parse_paren_expression()?;
        self.eat(&Token::LeftBrace)?;
        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut seen_default = false;
        while !self.eat_if(&Token::RightBrace)? {
            let test = if self.eat_if(&Token::Keyword(Keyword::Case))? {
                Some(self.parse_expression()?)
            } else if self.eat_if(&Token::Keyword(Keyword::Default))? {
                if std::mem::replace(&mut seen_default, true) {
                    return Err(self.error("More than one default clause in switch statement"));
                }
                None
            } else {
                return Err(self.error(format!("Expected case or default, got {:?}", self.current)));
            };
            self.eat(&Token::Colon)?;
            let mut consequent = Vec::new();
            while !self.at_clause_end() {
                consequent.push(self.parse_statement()?);
            }
            // Labels with no statements share the next clause's body.
            match cases.last_mut() {
                Some(last) if last.consequent.is_empty() => {
                    last.tests.push(test);
                    last.consequent = consequent;
                }
                _ => cases.push(SwitchCase {
                    tests: vec![test],
                    consequent,
                }),
            }
        }
        Ok(Statement::Switch(SwitchStatement {
            discriminant,
            cases,
        }))
    }
}
