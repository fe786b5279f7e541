use std::fmt;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Identifier(String),
    Keyword(Keyword),

    NumericLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NullLiteral,

    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Dot,
    Semicolon,
    Comma,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Increment,
    Decrement,
    Ampersand,
    Pipe,
    Caret,
    Bang,
    Tilde,
    LogicalAnd,
    LogicalOr,
    Question,
    Colon,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,

    LineTerminator,
    Eof,
}

/// Punctuators, longest spelling first so a prefix scan finds the longest match.
const PUNCTUATORS: &[(&str, Token)] = &[
    ("===", Token::StrictEqual),
    ("!==", Token::StrictNotEqual),
    ("==", Token::Equal),
    ("!=", Token::NotEqual),
    ("<=", Token::LessThanEqual),
    (">=", Token::GreaterThanEqual),
    ("&&", Token::LogicalAnd),
    ("||", Token::LogicalOr),
    ("++", Token::Increment),
    ("--", Token::Decrement),
    ("+=", Token::PlusAssign),
    ("-=", Token::MinusAssign),
    ("*=", Token::StarAssign),
    ("{", Token::LeftBrace),
    ("}", Token::RightBrace),
    ("(", Token::LeftParen),
    (")", Token::RightParen),
    ("[", Token::LeftBracket),
    ("]", Token::RightBracket),
    (".", Token::Dot),
    (";", Token::Semicolon),
    (",", Token::Comma),
    ("<", Token::LessThan),
    (">", Token::GreaterThan),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("&", Token::Ampersand),
    ("|", Token::Pipe),
    ("^", Token::Caret),
    ("!", Token::Bang),
    ("~", Token::Tilde),
    ("?", Token::Question),
    (":", Token::Colon),
    ("=", Token::Assign),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Async,
    Await,
    Break,
    Case,
    Catch,
    Continue,
    Default,
    Do,
    Else,
    Finally,
    For,
    Function,
    Goto,
    If,
    In,
    Instanceof,
    New,
    Return,
    Switch,
    This,
    Throw,
    Try,
    Typeof,
    Var,
    While,
    Yield,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("async", Keyword::Async),
    ("await", Keyword::Await),
    ("break", Keyword::Break),
    ("case", Keyword::Case),
    ("catch", Keyword::Catch),
    ("continue", Keyword::Continue),
    ("default", Keyword::Default),
    ("do", Keyword::Do),
    ("else", Keyword::Else),
    ("finally", Keyword::Finally),
    ("for", Keyword::For),
    ("function", Keyword::Function),
    ("goto", Keyword::Goto),
    ("if", Keyword::If),
    ("in", Keyword::In),
    ("instanceof", Keyword::Instanceof),
    ("new", Keyword::New),
    ("return", Keyword::Return),
    ("switch", Keyword::Switch),
    ("this", Keyword::This),
    ("throw", Keyword::Throw),
    ("try", Keyword::Try),
    ("typeof", Keyword::Typeof),
    ("var", Keyword::Var),
    ("while", Keyword::While),
    ("yield", Keyword::Yield),
];

impl Keyword {
    pub fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS
            .iter()
            .find(|(spelling, _)| *spelling == word)
            .map(|&(_, kw)| kw)
    }

    pub fn as_str(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|&&(_, kw)| kw == self)
            .map_or("?", |&(spelling, _)| spelling)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

#[derive(Clone, Debug, Error)]
#[error("{}:{}: {message}", location.line, location.column)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

fn is_line_terminator(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_identifier_start(ch: char) -> bool {
    matches!(ch, '_' | '$') || ch.is_ascii_alphabetic() || unicode_ident::is_xid_start(ch)
}

fn is_identifier_continue(ch: char) -> bool {
    matches!(ch, '_' | '$') || unicode_ident::is_xid_continue(ch)
}

/// Tokenizer over a borrowed source. Line terminators are reported as
/// tokens so the parser can apply automatic semicolon insertion.
pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.offset += ch.len_utf8();
        self.column += 1;
        Some(ch)
    }

    /// Consumes `prefix` when the remaining source starts with it.
    fn eat(&mut self, prefix: &str) -> bool {
        if !self.rest().starts_with(prefix) {
            return false;
        }
        self.offset += prefix.len();
        self.column += prefix.chars().count() as u32;
        true
    }

    /// Consumes characters while `pred` holds and returns them as a slice.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.offset;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.source[start..self.offset]
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            offset: self.offset,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            location: self.location(),
        }
    }

    /// Consumes one line terminator, treating `\r\n` as a single line break.
    fn newline(&mut self, ch: char) {
        self.bump();
        if ch == '\r' {
            self.eat("\n");
        }
        self.line += 1;
        self.column = 0;
    }

    /// Skips a `/* */` comment, reporting whether it spanned a line break.
    fn block_comment(&mut self) -> Result<bool, LexError> {
        let mut crossed_line = false;
        loop {
            if self.eat("*/") {
                return Ok(crossed_line);
            }
            match self.peek() {
                Some(ch) if is_line_terminator(ch) => {
                    crossed_line = true;
                    self.newline(ch);
                }
                Some(_) => {
                    self.bump();
                }
                None => return Err(self.error("Unterminated block comment")),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, LexError> {
        let mut value = String::new();
        loop {
            let ch = match self.bump() {
                Some(ch) if !is_line_terminator(ch) => ch,
                _ => return Err(self.error("Unterminated string literal")),
            };
            match ch {
                _ if ch == quote => return Ok(value),
                '\\' => self.escape(&mut value)?,
                _ => value.push(ch),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), LexError> {
        let Some(ch) = self.peek() else {
            return Err(self.error("Unterminated escape sequence"));
        };
        if is_line_terminator(ch) {
            self.newline(ch);
            return Ok(());
        }
        self.bump();
        let decoded = match ch {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'u' => {
                let digits = self
                    .rest()
                    .get(..4)
                    .filter(|d| d.chars().all(|c| c.is_ascii_hexdigit()))
                    .ok_or_else(|| self.error("Invalid Unicode escape"))?;
                let code = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("Invalid Unicode code point"))?;
                self.eat(digits);
                code
            }
            other => other,
        };
        out.push(decoded);
        Ok(())
    }

    fn number(&mut self) -> Result<Token, LexError> {
        if self.eat("0x") || self.eat("0X") {
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            return u64::from_str_radix(digits, 16)
                .map(|v| Token::NumericLiteral(v as f64))
                .map_err(|_| self.error("Invalid hexadecimal literal"));
        }

        let start = self.offset;
        self.take_while(|c| c.is_ascii_digit() || c == '_');
        let mut fraction = self.rest().chars();
        if fraction.next() == Some('.') && fraction.next().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.take_while(|c| c.is_ascii_digit() || c == '_');
        }
        if self.eat("e") || self.eat("E") {
            let _ = self.eat("+") || self.eat("-");
            self.take_while(|c| c.is_ascii_digit());
        }
        let text: String = self.source[start..self.offset]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        text.parse()
            .map(Token::NumericLiteral)
            .map_err(|_| self.error("Invalid numeric literal"))
    }

    fn word(&mut self) -> Token {
        let word = self.take_while(is_identifier_continue);
        match word {
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            "null" => Token::NullLiteral,
            _ => Keyword::lookup(word)
                .map_or_else(|| Token::Identifier(word.to_string()), Token::Keyword),
        }
    }

    fn punctuator(&mut self) -> Result<Token, LexError> {
        let matched = PUNCTUATORS
            .iter()
            .find(|(spelling, _)| self.rest().starts_with(spelling));
        match matched {
            Some((spelling, token)) => {
                self.eat(spelling);
                Ok(token.clone())
            }
            None => {
                let ch = self.peek().unwrap_or_default();
                Err(self.error(format!("Unexpected character: {ch}")))
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            self.take_while(|c| c.is_whitespace() && !is_line_terminator(c));
            let Some(ch) = self.peek() else {
                return Ok(Token::Eof);
            };
            if is_line_terminator(ch) {
                self.newline(ch);
                return Ok(Token::LineTerminator);
            }
            if self.eat("//") {
                self.take_while(|c| !is_line_terminator(c));
                continue;
            }
            if self.eat("/*") {
                if self.block_comment()? {
                    return Ok(Token::LineTerminator);
                }
                continue;
            }
            return match ch {
                '\'' | '"' => {
                    self.bump();
                    self.string(ch).map(Token::StringLiteral)
                }
                '0'..='9' => self.number(),
                _ if is_identifier_start(ch) => Ok(self.word()),
                _ => self.punctuator(),
            };
        }
    }

    pub fn tokenize_all(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if token == Token::Eof {
                tokens.push(token);
                return Ok(tokens);
            }
            tokens.push(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize_all().unwrap()
    }

    fn lex_no_lt(src: &str) -> Vec<Token> {
        lex(src)
            .into_iter()
            .filter(|t| *t != Token::LineTerminator)
            .collect()
    }

    #[test]
    fn empty_source() {
        assert_eq!(lex(""), vec![Token::Eof]);
    }

    #[test]
    fn keyword_table_round_trips() {
        for &(spelling, kw) in KEYWORDS {
            assert_eq!(Keyword::lookup(spelling), Some(kw));
            assert_eq!(kw.to_string(), spelling);
        }
        assert_eq!(Keyword::lookup("let"), None);
    }

    #[test]
    fn identifiers_and_keywords() {
        assert_eq!(
            lex_no_lt("var $state1 = 42;"),
            vec![
                Token::Keyword(Keyword::Var),
                Token::Identifier("$state1".into()),
                Token::Assign,
                Token::NumericLiteral(42.0),
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn fixture_keywords() {
        assert_eq!(
            lex_no_lt("goto lbl; yield return 1; yield break;"),
            vec![
                Token::Keyword(Keyword::Goto),
                Token::Identifier("lbl".into()),
                Token::Semicolon,
                Token::Keyword(Keyword::Yield),
                Token::Keyword(Keyword::Return),
                Token::NumericLiteral(1.0),
                Token::Semicolon,
                Token::Keyword(Keyword::Yield),
                Token::Keyword(Keyword::Break),
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_literals() {
        assert_eq!(
            lex_no_lt(r#""hello""#),
            vec![Token::StringLiteral("hello".into()), Token::Eof]
        );
        assert_eq!(
            lex_no_lt(r"'he\nllo'"),
            vec![Token::StringLiteral("he\nllo".into()), Token::Eof]
        );
        assert_eq!(
            lex_no_lt(r#""A""#),
            vec![Token::StringLiteral("A".into()), Token::Eof]
        );
        assert!(Lexer::new("'open").tokenize_all().is_err());
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(lex_no_lt("0xff"), vec![Token::NumericLiteral(255.0), Token::Eof]);
        assert_eq!(lex_no_lt("1_000"), vec![Token::NumericLiteral(1000.0), Token::Eof]);
        assert_eq!(lex_no_lt("1e3"), vec![Token::NumericLiteral(1000.0), Token::Eof]);
        assert_eq!(lex_no_lt("2.5"), vec![Token::NumericLiteral(2.5), Token::Eof]);
        assert_eq!(
            lex_no_lt("a.length"),
            vec![
                Token::Identifier("a".into()),
                Token::Dot,
                Token::Identifier("length".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn punctuators_take_the_longest_match() {
        assert_eq!(lex_no_lt("==="), vec![Token::StrictEqual, Token::Eof]);
        assert_eq!(lex_no_lt("!=="), vec![Token::StrictNotEqual, Token::Eof]);
        assert_eq!(
            lex_no_lt("a++ <= b"),
            vec![
                Token::Identifier("a".into()),
                Token::Increment,
                Token::LessThanEqual,
                Token::Identifier("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_line_terminators() {
        assert_eq!(
            lex_no_lt("// comment\n42"),
            vec![Token::NumericLiteral(42.0), Token::Eof]
        );
        assert_eq!(
            lex("/* a\n b */ 42"),
            vec![Token::LineTerminator, Token::NumericLiteral(42.0), Token::Eof]
        );
    }

    #[test]
    fn error_location() {
        let err = Lexer::new("a\n  #").tokenize_all().unwrap_err();
        assert_eq!(err.location.line, 2);
        assert_eq!(err.to_string(), "2:2: Unexpected character: #");
    }
}
