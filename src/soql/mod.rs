//! Object query language front end.
//!
//! Text goes through four stages:
//! - lexer: tokens with positions
//! - parser: [`ast::Query`]
//! - validator: metadata resolution, access and type checks
//! - compiler: PostgreSQL text, bound parameters and a result shape

pub mod ast;
pub mod compiler;
pub mod dates;
pub mod lexer;
pub mod parser;
pub mod validator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use compiler::{compile, CompiledQuery, PagedStatement, ParamValue, ResultShape, Row};
pub use parser::{parse, parse_with_limits};
pub use validator::{ValidatedQuery, Validator};
