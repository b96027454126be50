//! Decode plan for compiled queries.
//!
//! A [`ResultShape`] maps the column aliases of a result row back to the
//! logical names used in the query. Relationship subqueries and TYPEOF
//! projections nest a shape of their own.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::ShapeType;

/// A raw result row keyed by column alias.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultShape {
    pub object: String,
    pub fields: Vec<ShapeField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeField {
    /// Logical name, e.g. `Account.Owner.Name` or an explicit alias
    pub name: String,
    /// Column alias in the result row, or key inside a nested JSON object
    pub column: String,
    #[serde(flatten)]
    pub ty: ShapeType,
    /// Added for pagination only; not part of the caller's projection
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<ResultShape>>,
}

impl ShapeField {
    pub(crate) fn new(name: impl Into<String>, column: impl Into<String>, ty: ShapeType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty,
            hidden: false,
            nested: None,
        }
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub(crate) fn with_nested(mut self, shape: ResultShape) -> Self {
        self.nested = Some(Box::new(shape));
        self
    }
}

impl ResultShape {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            fields: Vec::new(),
        }
    }

    /// Find a field by logical name, case-insensitively.
    pub fn field(&self, name: &str) -> Option<&ShapeField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Fields the caller asked for, in projection order.
    pub fn visible(&self) -> impl Iterator<Item = &ShapeField> {
        self.fields.iter().filter(|f| !f.hidden)
    }

    /// Re-key a raw row by logical field name, dropping hidden columns and
    /// decoding nested relationship arrays and TYPEOF objects.
    pub fn decode_row(&self, row: &Row) -> Row {
        let mut out = Map::with_capacity(self.fields.len());
        for field in self.visible() {
            let value = row.get(&field.column).cloned().unwrap_or(Value::Null);
            out.insert(field.name.clone(), field.decode_value(value));
        }
        out
    }
}

impl ShapeField {
    fn decode_value(&self, value: Value) -> Value {
        let Some(nested) = &self.nested else {
            return value;
        };
        // Drivers may hand json columns back as text
        let value = match value {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        };
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(obj) => Value::Object(nested.decode_row(&obj)),
                        other => other,
                    })
                    .collect(),
            ),
            Value::Object(obj) => Value::Object(nested.decode_present(&obj)),
            other => other,
        }
    }
}

impl ResultShape {
    /// Like `decode_row`, but keeps only keys present in `row`. TYPEOF
    /// branches project different subsets of the nested shape.
    fn decode_present(&self, row: &Row) -> Row {
        let mut out = Map::new();
        for field in self.visible() {
            if let Some(value) = row.get(&field.column) {
                out.insert(field.name.clone(), field.decode_value(value.clone()));
            }
        }
        out
    }
}
