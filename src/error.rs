//! Error types for the query pipeline.
//!
//! Every stage reports through [`QueryError`]. The variants mirror the kinds a
//! caller needs to tell apart: a malformed query, a query the user may not run,
//! a query that is too expensive, and a cursor that cannot be trusted.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::Position;

/// Top-level error for parsing, validation, compilation and pagination.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Access(#[from] AccessError),

    #[error("{0}")]
    Limit(#[from] LimitError),

    #[error("{0}")]
    Cursor(#[from] CursorError),

    /// A collaborator (metadata, access policy, secret or date source) failed.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Stable machine-readable kind, used by callers to pick a response class.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Parse(_) => "parse",
            QueryError::Validation(_) => "validation",
            QueryError::Access(_) => "access",
            QueryError::Limit(_) => "limit",
            QueryError::Cursor(_) => "cursor",
            QueryError::Provider(_) => "provider",
            QueryError::Internal(_) => "internal",
        }
    }

    /// Source position of the offending token, when one is known.
    pub fn position(&self) -> Option<Position> {
        match self {
            QueryError::Parse(e) => Some(Position {
                line: e.line,
                column: e.column,
                offset: e.offset,
            }),
            QueryError::Validation(e) => e.position,
            QueryError::Access(e) => e.position,
            _ => None,
        }
    }
}

impl Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Syntax error with the exact location of the unexpected token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Parse error at line {line}, column {column}: expected {expected}, got {got}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub expected: String,
    pub got: String,
}

impl ParseError {
    pub fn new(position: Position, expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self {
            line: position.line,
            column: position.column,
            offset: position.offset,
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Closed set of semantic failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    UnknownObject,
    UnknownField,
    TypeMismatch,
    FieldNotFilterable,
    FieldNotSortable,
    FieldNotGroupable,
    FieldNotAggregatable,
    UnknownLookup,
    UnknownRelationship,
    PolymorphicTraversal,
    NestedSubqueryNotAllowed,
    WhereSubqueryMustBeSingleField,
    MissingRequiredClause,
    FieldNotGrouped,
    UnknownFunction,
    InvalidTypeof,
    UnsupportedClause,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::UnknownObject => "UNKNOWN_OBJECT",
            ValidationCode::UnknownField => "UNKNOWN_FIELD",
            ValidationCode::TypeMismatch => "TYPE_MISMATCH",
            ValidationCode::FieldNotFilterable => "FIELD_NOT_FILTERABLE",
            ValidationCode::FieldNotSortable => "FIELD_NOT_SORTABLE",
            ValidationCode::FieldNotGroupable => "FIELD_NOT_GROUPABLE",
            ValidationCode::FieldNotAggregatable => "FIELD_NOT_AGGREGATABLE",
            ValidationCode::UnknownLookup => "UNKNOWN_LOOKUP",
            ValidationCode::UnknownRelationship => "UNKNOWN_RELATIONSHIP",
            ValidationCode::PolymorphicTraversal => "POLYMORPHIC_TRAVERSAL",
            ValidationCode::NestedSubqueryNotAllowed => "NESTED_SUBQUERY_NOT_ALLOWED",
            ValidationCode::WhereSubqueryMustBeSingleField => "WHERE_SUBQUERY_MUST_BE_SINGLE_FIELD",
            ValidationCode::MissingRequiredClause => "MISSING_REQUIRED_CLAUSE",
            ValidationCode::FieldNotGrouped => "FIELD_NOT_GROUPED",
            ValidationCode::UnknownFunction => "UNKNOWN_FUNCTION",
            ValidationCode::InvalidTypeof => "INVALID_TYPEOF",
            ValidationCode::UnsupportedClause => "UNSUPPORTED_CLAUSE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic error raised while resolving the query against metadata.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Validation error [{code}]: {message}{}", fmt_position(.position))]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
    pub object: Option<String>,
    pub field: Option<String>,
    pub position: Option<Position>,
}

impl ValidationError {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            object: None,
            field: None,
            position: None,
        }
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn at(mut self, position: Option<Position>) -> Self {
        if self.position.is_none() {
            self.position = position;
        }
        self
    }
}

/// The access controller refused an object or field.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Access denied to {}{}", describe_target(.object, .field), fmt_position(.position))]
pub struct AccessError {
    pub object: String,
    pub field: Option<String>,
    pub position: Option<Position>,
}

/// Which structural limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    FieldCount,
    SubqueryCount,
    LookupDepth,
    ExpressionDepth,
    StatementLength,
    Limit,
    Offset,
    PageSize,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::FieldCount => "field count",
            LimitKind::SubqueryCount => "subquery count",
            LimitKind::LookupDepth => "lookup depth",
            LimitKind::ExpressionDepth => "expression depth",
            LimitKind::StatementLength => "statement length",
            LimitKind::Limit => "LIMIT",
            LimitKind::Offset => "OFFSET",
            LimitKind::PageSize => "page size",
        };
        f.write_str(name)
    }
}

/// The query is well formed but too expensive to run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Limit exceeded: {kind} is {actual}, maximum is {limit}")]
pub struct LimitError {
    pub kind: LimitKind,
    pub limit: usize,
    pub actual: usize,
}

impl LimitError {
    pub fn check(kind: LimitKind, limit: usize, actual: usize) -> Result<(), LimitError> {
        if actual > limit {
            Err(LimitError {
                kind,
                limit,
                actual,
            })
        } else {
            Ok(())
        }
    }
}

/// A pagination cursor was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("Invalid cursor: signature mismatch")]
    InvalidSignature,

    #[error("Invalid cursor: issued for a different object or user")]
    ContextMismatch,

    #[error("Invalid cursor: sort keys changed since the cursor was issued")]
    SortKeyMismatch,

    #[error("Invalid cursor: {0}")]
    Malformed(String),

    #[error("Invalid cursor: query does not support pagination")]
    NotPaginated,
}

fn fmt_position(position: &Option<Position>) -> String {
    match position {
        Some(p) => format!(" at line {}, column {}", p.line, p.column),
        None => String::new(),
    }
}

fn describe_target(object: &str, field: &Option<String>) -> String {
    match field {
        Some(field) => format!("field '{}.{}'", object, field),
        None => format!("object '{}'", object),
    }
}
