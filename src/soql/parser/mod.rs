//! Recursive-descent parser for object queries.
//!
//! Converts the token stream produced by [`Lexer`] into a [`Query`]. The
//! parser never repairs input: the first token that does not fit the grammar
//! is reported with its line and column.

mod clauses;
mod expressions;

use super::ast::*;
use super::lexer::{Lexer, SpannedToken, Token};
use crate::config::Limits;
use crate::error::{LimitError, LimitKind, ParseError, QueryError, QueryResult};
use crate::types::Position;

/// Parse a complete statement with the default limits.
pub fn parse(input: &str) -> QueryResult<Query> {
    parse_with_limits(input, &Limits::default())
}

/// Parse a complete statement, bounding expression nesting by `limits`.
pub fn parse_with_limits(input: &str, limits: &Limits) -> QueryResult<Query> {
    let mut parser = Parser::new(input)?.with_max_depth(limits.max_expression_depth);
    parser.parse()
}

/// Parser for object queries
pub struct Parser {
    pub(crate) tokens: Vec<SpannedToken>,
    pub(crate) position: usize,
    next_id: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    /// Create a new parser from an input string
    pub fn new(input: &str) -> QueryResult<Self> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;

        Ok(Self {
            tokens,
            position: 0,
            next_id: 0,
            depth: 0,
            max_depth: Limits::default().max_expression_depth,
        })
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parse a statement and require the input to end after it
    pub fn parse(&mut self) -> QueryResult<Query> {
        let query = self.parse_query()?;
        if !matches!(self.current_token(), Token::Eof) {
            return Err(self.error_expected("end of query"));
        }
        tracing::debug!(
            "[SOQL] Parsed query on {} with {} select items",
            query.from.name,
            query.select.len()
        );
        Ok(query)
    }

    pub(crate) fn current_token(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    pub(crate) fn peek_token(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    /// Position of the current token
    pub(crate) fn current_pos(&self) -> Position {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or_default()
    }

    pub(crate) fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    pub(crate) fn error_expected(&self, expected: &str) -> QueryError {
        ParseError::new(self.current_pos(), expected, self.current_token().to_string()).into()
    }

    /// Consume `expected` or fail; returns the consumed token's position.
    pub(crate) fn expect(&mut self, expected: Token, description: &str) -> QueryResult<Position> {
        if self.current_token() == &expected {
            let pos = self.current_pos();
            self.advance();
            Ok(pos)
        } else {
            Err(self.error_expected(description))
        }
    }

    pub(crate) fn expect_identifier(&mut self, description: &str) -> QueryResult<Ident> {
        if let Token::Identifier(name) = self.current_token() {
            let ident = Ident {
                name: name.clone(),
                pos: self.current_pos(),
            };
            self.advance();
            Ok(ident)
        } else {
            Err(self.error_expected(description))
        }
    }

    /// Whether the current token is the contextual word `word` (e.g. NULLS).
    pub(crate) fn at_word(&self, word: &str) -> bool {
        matches!(self.current_token(), Token::Identifier(name) if name.eq_ignore_ascii_case(word))
    }

    /// Enter one level of expression nesting. Recursion stops here, before
    /// the stack does.
    pub(crate) fn descend(&mut self) -> QueryResult<()> {
        self.depth += 1;
        LimitError::check(LimitKind::ExpressionDepth, self.max_depth, self.depth)?;
        Ok(())
    }

    pub(crate) fn ascend(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    pub(crate) fn next_node_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
