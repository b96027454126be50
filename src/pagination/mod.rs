//! Keyset pagination.
//!
//! A paginated query is ordered by its sort keys, the last of which makes the
//! order total. The next page is the set of rows strictly after the last row
//! of the current one under that order, expressed as a WHERE predicate over
//! the same key expressions:
//!
//! - every key shares one direction and default NULL placement, no cursor
//!   value is NULL, and no later row can hold a NULL key: a single row
//!   comparison `(k1, k2) < ($1, $2)`. Descending keys put NULLs first, so
//!   any direction-uniform descending order qualifies. Ascending keys put
//!   NULLs last, where a row comparison would drop them, so the ascending
//!   form needs every key to be non-nullable.
//! - otherwise: the expanded form, one disjunct per key position, each an
//!   equality prefix followed by a NULL-aware strict inequality

pub mod cursor;

use serde::Serialize;

pub use cursor::{CursorCodec, CursorState, SecretProvider, StaticSecret};

use crate::access::QueryContext;
use crate::error::{CursorError, QueryError, QueryResult};
use crate::soql::compiler::{ParamValue, Row};
use crate::types::FieldType;

/// One ORDER BY key of a paginated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    /// Logical name, e.g. `CreatedDate` or `Account.Name`
    pub name: String,
    /// Column alias carrying the key's value in result rows
    pub column: String,
    /// SQL expression the key orders by
    #[serde(skip)]
    pub expr: String,
    pub field_type: FieldType,
    pub descending: bool,
    /// Effective NULL placement (PostgreSQL puts NULLs last in ascending order)
    pub nulls_first: bool,
    /// False only for keys that can never be NULL, such as the root identity
    pub nullable: bool,
}

impl SortKey {
    /// Stable description of the key used to bind cursors to an ORDER BY.
    pub fn descriptor(&self) -> String {
        format!(
            "{}:{}:{}",
            self.name.to_lowercase(),
            if self.descending { "desc" } else { "asc" },
            if self.nulls_first { "nulls_first" } else { "nulls_last" }
        )
    }

    fn default_nulls(&self) -> bool {
        self.nulls_first == self.descending
    }
}

/// Pagination plan compiled once per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationInfo {
    pub object: String,
    /// ORDER BY keys followed by the tie-breakers
    pub sort_keys: Vec<SortKey>,
    /// Names of keys appended to make the order total
    pub tie_breakers: Vec<String>,
    pub page_size: usize,
    /// Total rows the query may return across all pages (its own LIMIT)
    pub row_limit: Option<usize>,
}

/// One page of rows, still keyed by column alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next_cursor: Option<String>,
    pub done: bool,
}

impl PaginationInfo {
    pub fn descriptors(&self) -> Vec<String> {
        self.sort_keys.iter().map(SortKey::descriptor).collect()
    }

    /// Rows the page after `returned` delivered rows may hold.
    pub fn page_rows(&self, returned: usize) -> usize {
        match self.row_limit {
            Some(limit) => self.page_size.min(limit.saturating_sub(returned)),
            None => self.page_size,
        }
    }

    /// SQL LIMIT for that page: one lookahead row beyond it, unless the row
    /// limit ends the iteration there anyway.
    pub fn fetch_limit(&self, returned: usize) -> usize {
        let rows = self.page_rows(returned);
        if self.exhausted_after(returned + rows) {
            rows
        } else {
            rows + 1
        }
    }

    fn exhausted_after(&self, returned: usize) -> bool {
        self.row_limit.is_some_and(|limit| returned >= limit)
    }

    /// Predicate selecting rows after `values`, with placeholders numbered
    /// from `first_param`. Returns the SQL and the parameters it binds.
    pub fn keyset_predicate(
        &self,
        values: &[ParamValue],
        first_param: usize,
    ) -> QueryResult<(String, Vec<ParamValue>)> {
        if values.len() != self.sort_keys.len() {
            return Err(CursorError::Malformed(format!(
                "expected {} sort values, got {}",
                self.sort_keys.len(),
                values.len()
            ))
            .into());
        }

        let mut params = Vec::new();
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            if value.is_null() {
                placeholders.push(None);
            } else {
                placeholders.push(Some(format!("${}", first_param + params.len())));
                params.push(value.clone());
            }
        }

        let Some(first) = self.sort_keys.first() else {
            return Err(QueryError::Internal("pagination without sort keys".to_string()));
        };
        let uniform = self
            .sort_keys
            .iter()
            .all(|k| k.descending == first.descending && k.default_nulls())
            && (first.descending || self.sort_keys.iter().all(|k| !k.nullable));

        let predicate = match placeholders.iter().cloned().collect::<Option<Vec<String>>>() {
            Some(bound) if uniform => {
                let columns: Vec<&str> = self.sort_keys.iter().map(|k| k.expr.as_str()).collect();
                format!(
                    "({}) {} ({})",
                    columns.join(", "),
                    if first.descending { "<" } else { ">" },
                    bound.join(", ")
                )
            }
            _ => self.expanded_predicate(&placeholders),
        };
        Ok((predicate, params))
    }

    fn expanded_predicate(&self, placeholders: &[Option<String>]) -> String {
        let mut disjuncts = Vec::new();
        for (i, key) in self.sort_keys.iter().enumerate() {
            let Some(after) = after_term(key, placeholders[i].as_deref()) else {
                continue;
            };
            let mut terms: Vec<String> = self.sort_keys[..i]
                .iter()
                .zip(placeholders)
                .map(|(k, p)| equal_term(k, p.as_deref()))
                .collect();
            terms.push(after);
            disjuncts.push(if terms.len() == 1 {
                terms.remove(0)
            } else {
                format!("({})", terms.join(" AND "))
            });
        }

        if disjuncts.is_empty() {
            "FALSE".to_string()
        } else {
            format!("({})", disjuncts.join(" OR "))
        }
    }

    /// Sort-key values of a result row.
    pub fn cursor_values(&self, row: &Row) -> QueryResult<Vec<ParamValue>> {
        self.sort_keys
            .iter()
            .map(|key| {
                let value = row.get(&key.column).ok_or_else(|| {
                    QueryError::Internal(format!("result row lacks sort column {}", key.column))
                })?;
                ParamValue::from_json(value, key.field_type).map_err(|e| {
                    QueryError::Internal(format!("sort column {}: {}", key.column, e))
                })
            })
            .collect()
    }

    /// Detect the page boundary in rows fetched with
    /// [`fetch_limit`](Self::fetch_limit), after `returned` rows were
    /// delivered by earlier pages. The lookahead row is discarded and a cursor is
    /// minted from the last kept row. A short fetch, or reaching the row
    /// limit, ends the iteration.
    pub fn finish_page(
        &self,
        mut rows: Vec<Row>,
        returned: usize,
        codec: &CursorCodec,
        ctx: &QueryContext,
    ) -> QueryResult<Page> {
        let page_rows = self.page_rows(returned);
        let total = returned + page_rows;
        if rows.len() <= page_rows || self.exhausted_after(total) {
            rows.truncate(page_rows);
            return Ok(Page {
                rows,
                next_cursor: None,
                done: true,
            });
        }

        rows.truncate(page_rows);
        let last = rows
            .last()
            .ok_or_else(|| QueryError::Internal("page size must be positive".to_string()))?;
        let values = self.cursor_values(last)?;
        let cursor = codec.encode(self, ctx, &values, total)?;
        Ok(Page {
            rows,
            next_cursor: Some(cursor),
            done: false,
        })
    }
}

fn equal_term(key: &SortKey, placeholder: Option<&str>) -> String {
    match placeholder {
        Some(p) => format!("{} = {}", key.expr, p),
        None => format!("{} IS NULL", key.expr),
    }
}

/// Rows strictly after `placeholder` on this key alone; `None` when no row
/// can follow (a NULL that sorts last).
fn after_term(key: &SortKey, placeholder: Option<&str>) -> Option<String> {
    let op = if key.descending { "<" } else { ">" };
    match (placeholder, key.nulls_first) {
        (Some(p), true) => Some(format!("{} {} {}", key.expr, op, p)),
        (Some(p), false) if !key.nullable => Some(format!("{} {} {}", key.expr, op, p)),
        (Some(p), false) => Some(format!("({} {} {} OR {} IS NULL)", key.expr, op, p, key.expr)),
        (None, true) => Some(format!("{} IS NOT NULL", key.expr)),
        (None, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str, descending: bool, nulls_first: bool) -> SortKey {
        SortKey {
            name: name.to_string(),
            column: name.to_string(),
            expr: format!("t0.\"{}\"", name.to_lowercase()),
            field_type: FieldType::String,
            descending,
            nulls_first,
            nullable: name != "Id",
        }
    }

    fn plan(keys: Vec<SortKey>) -> PaginationInfo {
        PaginationInfo {
            object: "Account".to_string(),
            sort_keys: keys,
            tie_breakers: vec!["Id".to_string()],
            page_size: 2,
            row_limit: None,
        }
    }

    fn text(s: &str) -> ParamValue {
        ParamValue::Text(s.to_string())
    }

    #[test]
    fn test_uniform_direction_uses_row_comparison() {
        let info = plan(vec![key("CreatedDate", true, true), key("Id", true, true)]);
        let (sql, params) = info.keyset_predicate(&[text("2024"), text("001")], 3).unwrap();
        assert_eq!(sql, "(t0.\"createddate\", t0.\"id\") < ($3, $4)");
        assert_eq!(params, vec![text("2024"), text("001")]);

        let info = plan(vec![key("Id", false, false)]);
        let (sql, _) = info.keyset_predicate(&[text("001")], 1).unwrap();
        assert_eq!(sql, "(t0.\"id\") > ($1)");
    }

    #[test]
    fn test_ascending_nullable_key_keeps_null_rows() {
        // NULLs sort last in ascending order; a row comparison would skip them
        let info = plan(vec![key("Industry", false, false), key("Id", false, false)]);
        let (sql, params) = info.keyset_predicate(&[text("Tech"), text("001")], 1).unwrap();
        assert_eq!(
            sql,
            "((t0.\"industry\" > $1 OR t0.\"industry\" IS NULL) \
             OR (t0.\"industry\" = $1 AND t0.\"id\" > $2))"
        );
        assert_eq!(params, vec![text("Tech"), text("001")]);
    }

    #[test]
    fn test_mixed_direction_uses_expanded_form() {
        let info = plan(vec![key("Name", false, false), key("Id", true, true)]);
        let (sql, params) = info.keyset_predicate(&[text("a"), text("001")], 1).unwrap();
        assert_eq!(
            sql,
            "((t0.\"name\" > $1 OR t0.\"name\" IS NULL) OR (t0.\"name\" = $1 AND t0.\"id\" < $2))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_null_cursor_value() {
        // Ascending NULLS LAST: after a NULL only the tie-breaker can advance
        let info = plan(vec![key("Phone", false, false), key("Id", false, false)]);
        let (sql, params) = info.keyset_predicate(&[ParamValue::Null, text("001")], 1).unwrap();
        assert_eq!(sql, "((t0.\"phone\" IS NULL AND t0.\"id\" > $1))");
        assert_eq!(params, vec![text("001")]);

        // Descending NULLS FIRST: every non-NULL value follows
        let info = plan(vec![key("Phone", true, true), key("Id", true, true)]);
        let (sql, _) = info.keyset_predicate(&[ParamValue::Null, text("001")], 1).unwrap();
        assert_eq!(
            sql,
            "(t0.\"phone\" IS NOT NULL OR (t0.\"phone\" IS NULL AND t0.\"id\" < $1))"
        );
    }

    #[test]
    fn test_explicit_nulls_placement_forces_expanded_form() {
        let info = plan(vec![key("Name", false, true), key("Id", false, false)]);
        let (sql, _) = info.keyset_predicate(&[text("a"), text("001")], 1).unwrap();
        assert!(sql.starts_with("(t0.\"name\" > $1 OR"));
    }

    #[test]
    fn test_value_count_mismatch() {
        let info = plan(vec![key("Id", false, false)]);
        let err = info.keyset_predicate(&[], 1).unwrap_err();
        assert!(matches!(err, QueryError::Cursor(CursorError::Malformed(_))));
    }

    #[test]
    fn test_cursor_values_from_row() {
        let mut info = plan(vec![key("Name", false, false), key("Id", false, false)]);
        info.sort_keys[0].field_type = FieldType::Integer;
        let row = json!({"Name": 7, "Id": "001"});
        let values = info.cursor_values(row.as_object().unwrap()).unwrap();
        assert_eq!(values, vec![ParamValue::Int(7), text("001")]);

        let row = json!({"Name": 7});
        assert!(info.cursor_values(row.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_row_limit_budget() {
        let mut info = plan(vec![key("Id", false, false)]);
        info.page_size = 2;
        info.row_limit = Some(5);

        assert_eq!((info.page_rows(0), info.fetch_limit(0)), (2, 3));
        assert_eq!((info.page_rows(2), info.fetch_limit(2)), (2, 3));
        assert_eq!((info.page_rows(4), info.fetch_limit(4)), (1, 1));

        info.row_limit = Some(2);
        assert_eq!((info.page_rows(0), info.fetch_limit(0)), (2, 2));

        info.row_limit = None;
        assert_eq!(info.fetch_limit(1_000), 3);
    }

    #[test]
    fn test_finish_page_stops_at_row_limit() {
        let codec = CursorCodec::new(std::sync::Arc::new(StaticSecret::new("secret")));
        let ctx = QueryContext::new("u1");
        let mut info = plan(vec![key("Id", false, false)]);
        info.row_limit = Some(3);
        let rows = |ids: &[&str]| -> Vec<Row> {
            ids.iter()
                .filter_map(|id| json!({ "Id": id }).as_object().cloned())
                .collect()
        };

        let first = info.finish_page(rows(&["1", "2", "3"]), 0, &codec, &ctx).unwrap();
        assert_eq!(first.rows.len(), 2);
        assert!(!first.done);

        // One row left in the budget: extra rows end the iteration
        let last = info.finish_page(rows(&["3", "4"]), 2, &codec, &ctx).unwrap();
        assert_eq!(last.rows.len(), 1);
        assert!(last.done);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_descriptors() {
        let info = plan(vec![key("Account.Name", true, false), key("Id", true, true)]);
        assert_eq!(
            info.descriptors(),
            vec!["account.name:desc:nulls_last", "id:desc:nulls_first"]
        );
    }
}
