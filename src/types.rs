//! Shared primitive types: source positions and the wire-visible field type taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a token in the query text (1-based line and column, 0-based char offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Semantic type of a field or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Id,
    Object,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Id)
    }

    /// Whether values of the two types may be compared with each other.
    pub fn comparable_with(&self, other: &FieldType) -> bool {
        self == other
            || (self.is_numeric() && other.is_numeric())
            || (self.is_temporal() && other.is_temporal())
            || (self.is_textual() && other.is_textual())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Id => "id",
            FieldType::Object => "object",
        };
        f.write_str(name)
    }
}

/// A field type as it appears in a result shape; `array` marks relationship results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeType {
    #[serde(rename = "type")]
    pub base: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub array: bool,
}

impl ShapeType {
    pub fn scalar(base: FieldType) -> Self {
        Self { base, array: false }
    }

    pub fn array_of(base: FieldType) -> Self {
        Self { base, array: true }
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "array<{}>", self.base)
        } else {
            write!(f, "{}", self.base)
        }
    }
}
