use crate::ast::*;
use crate::lexer::{Keyword, LexError, Lexer, SourceLocation, Token};
use thiserror::Error;

mod expressions;
mod statements;

#[derive(Debug, Clone, Error)]
#[error("SyntaxError: {message} ({}:{})", location.line, location.column)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            location: e.location,
        }
    }
}

/// Parses a function body: a list of statements up to end of input.
pub fn parse_body(source: &str) -> Result<Vec<Statement>, ParseError> {
    Parser::new(source)?.parse_statements()
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    prev_line_terminator: bool,
    pushback: Option<(Token, bool)>, // (token, had_line_terminator_before)
    /// Set while parsing a `for` head, where `in` ends the left side.
    no_in: bool,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(source);
        let mut had_lt = false;
        let current = loop {
            let tok = lexer.next_token()?;
            if tok == Token::LineTerminator {
                had_lt = true;
                continue;
            }
            break tok;
        };
        Ok(Self {
            lexer,
            current,
            prev_line_terminator: had_lt,
            pushback: None,
            no_in: false,
        })
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let old = std::mem::replace(&mut self.current, Token::Eof);
        if let Some((tok, lt)) = self.pushback.take() {
            self.current = tok;
            self.prev_line_terminator = lt;
        } else {
            self.prev_line_terminator = false;
            loop {
                let tok = self.lexer.next_token()?;
                if tok == Token::LineTerminator {
                    self.prev_line_terminator = true;
                    continue;
                }
                self.current = tok;
                break;
            }
        }
        Ok(old)
    }

    /// Makes `token` current again; the displaced token is read next.
    fn push_back(&mut self, token: Token, had_lt: bool) {
        let old_current = std::mem::replace(&mut self.current, token);
        let old_lt = std::mem::replace(&mut self.prev_line_terminator, had_lt);
        self.pushback = Some((old_current, old_lt));
    }

    fn eat(&mut self, expected: &Token) -> Result<(), ParseError> {
        if &self.current == expected {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("Expected {expected:?}, got {:?}", self.current)))
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        self.eat(&Token::Keyword(keyword))
    }

    /// Consumes the current token when it is `token`.
    fn eat_if(&mut self, token: &Token) -> Result<bool, ParseError> {
        if &self.current != token {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    /// Whether a statement may end here without an explicit semicolon.
    fn at_statement_end(&self) -> bool {
        self.prev_line_terminator
            || matches!(self.current, Token::Semicolon | Token::RightBrace | Token::Eof)
    }

    fn eat_semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat_if(&Token::Semicolon)? || self.at_statement_end() {
            return Ok(());
        }
        Err(self.error(format!("Expected semicolon, got {:?}", self.current)))
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match self.advance()? {
            Token::Identifier(name) => Ok(name),
            other => Err(self.error(format!("Expected identifier, got {other:?}"))),
        }
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError {
            message: msg.into(),
            location: self.lexer.location(),
        }
    }

    pub fn parse_statements(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut body = Vec::new();
        while self.current != Token::Eof {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /// `{ statements }`
    fn parse_braced(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.eat(&Token::LeftBrace)?;
        let mut stmts = Vec::new();
        while self.current != Token::RightBrace {
            if self.current == Token::Eof {
                return Err(self.error("Unexpected end of input"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.eat(&Token::RightBrace)?;
        Ok(stmts)
    }
}
