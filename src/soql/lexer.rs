//! Tokenizer for the object query language.
//!
//! Every token carries the position of its first character. Date macros and
//! date/datetime literals are recognized here so the parser never has to
//! reassemble them from identifiers and numbers.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use once_cell::sync::Lazy;

use super::dates::{DateMacro, DynamicDate, StaticDate};
use crate::error::{ParseError, QueryResult};
use crate::types::Position;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Clauses
    Select,
    From,
    Where,
    With,
    Group,
    Order,
    By,
    Having,
    Limit,
    Offset,
    For,
    Update,
    As,
    Asc,
    Desc,

    // Logical and predicates
    And,
    Or,
    Not,
    In,
    Like,
    Is,

    // Constants
    Null,
    True,
    False,

    // Polymorphic projection
    Typeof,
    When,
    Then,
    Else,
    End,

    // Literals and identifiers
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    DateMacro(DateMacro),

    // Operators
    Equal,         // =
    NotEqual,      // != or <>
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    Plus,          // +
    Minus,         // -
    Star,          // *
    Slash,         // /
    Percent,       // %
    Concat,        // ||

    // Delimiters
    Comma,
    Dot,
    LeftParen,
    RightParen,

    Eof,
}

static KEYWORDS: Lazy<HashMap<&'static str, Token>> = Lazy::new(|| {
    HashMap::from([
        ("SELECT", Token::Select),
        ("FROM", Token::From),
        ("WHERE", Token::Where),
        ("WITH", Token::With),
        ("GROUP", Token::Group),
        ("ORDER", Token::Order),
        ("BY", Token::By),
        ("HAVING", Token::Having),
        ("LIMIT", Token::Limit),
        ("OFFSET", Token::Offset),
        ("FOR", Token::For),
        ("UPDATE", Token::Update),
        ("AS", Token::As),
        ("ASC", Token::Asc),
        ("DESC", Token::Desc),
        ("AND", Token::And),
        ("OR", Token::Or),
        ("NOT", Token::Not),
        ("IN", Token::In),
        ("LIKE", Token::Like),
        ("IS", Token::Is),
        ("NULL", Token::Null),
        ("TRUE", Token::True),
        ("FALSE", Token::False),
        ("TYPEOF", Token::Typeof),
        ("WHEN", Token::When),
        ("THEN", Token::Then),
        ("ELSE", Token::Else),
        ("END", Token::End),
    ])
});

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
            Token::Integer(n) => write!(f, "number {}", n),
            Token::Float(n) => write!(f, "number {}", n),
            Token::String(s) => write!(f, "string '{}'", s),
            Token::Date(d) => write!(f, "date {}", d),
            Token::DateTime(d) => write!(f, "datetime {}", d.to_rfc3339()),
            Token::DateMacro(m) => write!(f, "date macro {}", m),
            Token::Eof => f.write_str("end of input"),
            other => write!(f, "'{}'", other.symbol()),
        }
    }
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Select => "SELECT",
            Token::From => "FROM",
            Token::Where => "WHERE",
            Token::With => "WITH",
            Token::Group => "GROUP",
            Token::Order => "ORDER",
            Token::By => "BY",
            Token::Having => "HAVING",
            Token::Limit => "LIMIT",
            Token::Offset => "OFFSET",
            Token::For => "FOR",
            Token::Update => "UPDATE",
            Token::As => "AS",
            Token::Asc => "ASC",
            Token::Desc => "DESC",
            Token::And => "AND",
            Token::Or => "OR",
            Token::Not => "NOT",
            Token::In => "IN",
            Token::Like => "LIKE",
            Token::Is => "IS",
            Token::Null => "NULL",
            Token::True => "TRUE",
            Token::False => "FALSE",
            Token::Typeof => "TYPEOF",
            Token::When => "WHEN",
            Token::Then => "THEN",
            Token::Else => "ELSE",
            Token::End => "END",
            Token::Equal => "=",
            Token::NotEqual => "!=",
            Token::LessThan => "<",
            Token::LessThanEq => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanEq => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Concat => "||",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            _ => "",
        }
    }
}

/// A token and where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: Position,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column, self.position)
    }

    fn advance(&mut self) {
        if self.current_char == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn char_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn error(&self, expected: &str, got: impl Into<String>) -> ParseError {
        ParseError::new(self.pos(), expected, got)
    }

    fn got_char(&self) -> String {
        match self.current_char {
            Some(ch) => format!("'{}'", ch),
            None => "end of input".to_string(),
        }
    }

    /// Skip whitespace and comments. Fails on an unterminated block comment.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.current_char {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('-') if self.peek() == Some('-') => {
                    while let Some(ch) = self.current_char {
                        self.advance();
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek() == Some('*') => {
                    let start = self.pos();
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                            None => {
                                return Err(ParseError::new(start, "'*/'", "end of input"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Whether the input at the cursor looks like `YYYY-MM-DD`.
    fn at_date_literal(&self) -> bool {
        let digit = |i: usize| self.char_at(i).is_some_and(|c| c.is_ascii_digit());
        (0..4).all(digit)
            && self.char_at(4) == Some('-')
            && (5..7).all(digit)
            && self.char_at(7) == Some('-')
            && (8..10).all(digit)
            && !digit(10)
    }

    fn read_date_or_datetime(&mut self) -> Result<Token, ParseError> {
        let start = self.pos();
        let mut text = String::new();
        for _ in 0..10 {
            if let Some(ch) = self.current_char {
                text.push(ch);
            }
            self.advance();
        }

        let has_time = self.current_char == Some('T') && self.peek().is_some_and(|c| c.is_ascii_digit());
        if !has_time {
            return NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(Token::Date)
                .map_err(|_| ParseError::new(start, "valid date", format!("'{}'", text)));
        }

        // Time part: Thh:mm:ss[.fff] then Z or +hh:mm / -hh:mm
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() || matches!(ch, 'T' | ':' | '.') {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match self.current_char {
            Some('Z') | Some('z') => {
                text.push('Z');
                self.advance();
            }
            Some(sign @ ('+' | '-')) => {
                text.push(sign);
                self.advance();
                while let Some(ch) = self.current_char {
                    if ch.is_ascii_digit() || ch == ':' {
                        text.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            _ => {
                return Err(self.error("timezone designator 'Z' or offset", self.got_char()));
            }
        }

        DateTime::parse_from_rfc3339(&text)
            .map(Token::DateTime)
            .map_err(|_| ParseError::new(start, "valid datetime", format!("'{}'", text)))
    }

    fn read_number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos();
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if has_dot {
            num_str
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| ParseError::new(start, "number", num_str.clone()))
        } else {
            num_str
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| ParseError::new(start, "integer within 64-bit range", num_str.clone()))
        }
    }

    fn read_string(&mut self) -> Result<Token, ParseError> {
        let start = self.pos();
        self.advance(); // opening quote

        let mut string = String::new();
        while let Some(ch) = self.current_char {
            match ch {
                '\'' if self.peek() == Some('\'') => {
                    string.push('\'');
                    self.advance();
                    self.advance();
                }
                '\'' => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                '\\' => {
                    self.advance();
                    match self.current_char {
                        Some(escaped) => {
                            string.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                            self.advance();
                        }
                        None => break,
                    }
                }
                _ => {
                    string.push(ch);
                    self.advance();
                }
            }
        }

        Err(ParseError::new(start, "closing quote", "end of input"))
    }

    fn read_word(&mut self) -> Result<Token, ParseError> {
        let mut ident = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let upper = ident.to_uppercase();
        if let Some(kind) = DynamicDate::from_name(&upper) {
            return self.read_dynamic_macro(kind, &upper);
        }
        if let Some(m) = StaticDate::from_name(&upper) {
            return Ok(Token::DateMacro(DateMacro::Static(m)));
        }
        if let Some(keyword) = KEYWORDS.get(upper.as_str()) {
            return Ok(keyword.clone());
        }
        Ok(Token::Identifier(ident))
    }

    fn read_dynamic_macro(&mut self, kind: DynamicDate, name: &str) -> Result<Token, ParseError> {
        if self.current_char != Some(':') {
            return Err(self.error(&format!("':' after {}", name), self.got_char()));
        }
        self.advance();

        let start = self.pos();
        let mut digits = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(self.error(&format!("number after {}:", name), self.got_char()));
        }
        let n = digits
            .parse::<u32>()
            .map_err(|_| ParseError::new(start, "smaller macro argument", digits.clone()))?;
        Ok(Token::DateMacro(DateMacro::Dynamic(kind, n)))
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        self.skip_trivia()?;
        let pos = self.pos();

        let token = match self.current_char {
            None => Token::Eof,
            Some(ch) if ch.is_ascii_digit() => {
                if self.at_date_literal() {
                    self.read_date_or_datetime()?
                } else {
                    self.read_number()?
                }
            }
            Some('\'') => self.read_string()?,
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_word()?,
            Some('=') => self.single(Token::Equal),
            Some('!') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::NotEqual)
                } else {
                    return Err(self.error("'!='", self.got_char()));
                }
            }
            Some('<') => {
                self.advance();
                match self.current_char {
                    Some('=') => self.single(Token::LessThanEq),
                    Some('>') => self.single(Token::NotEqual),
                    _ => Token::LessThan,
                }
            }
            Some('>') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::GreaterThanEq)
                } else {
                    Token::GreaterThan
                }
            }
            Some('|') => {
                if self.peek() == Some('|') {
                    self.advance();
                    self.single(Token::Concat)
                } else {
                    return Err(self.error("'||'", "'|'"));
                }
            }
            Some('+') => self.single(Token::Plus),
            Some('-') => self.single(Token::Minus),
            Some('*') => self.single(Token::Star),
            Some('/') => self.single(Token::Slash),
            Some('%') => self.single(Token::Percent),
            Some(',') => self.single(Token::Comma),
            Some('.') => self.single(Token::Dot),
            Some('(') => self.single(Token::LeftParen),
            Some(')') => self.single(Token::RightParen),
            Some(ch) => return Err(self.error("token", format!("'{}'", ch))),
        };

        Ok(SpannedToken { token, pos })
    }

    pub fn tokenize(&mut self) -> QueryResult<Vec<SpannedToken>> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}
