//! SQL generation for validated queries.
//!
//! Lowers a [`ValidatedQuery`] to PostgreSQL text with positional `$n`
//! parameters. Every user-supplied literal becomes a bound parameter; table
//! and column identifiers come from metadata only and are always quoted.
//!
//! Clause order of emission, which also fixes parameter numbering:
//! 1. SELECT list (relationship subqueries, TYPEOF)
//! 2. WHERE (including semi-join subqueries)
//! 3. GROUP BY / HAVING
//! 4. ORDER BY, then the pagination tie-breakers and hidden sort columns

mod expressions;
mod joins;
mod select;
mod shape;
#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use shape::{ResultShape, Row, ShapeField};

use self::joins::JoinPlan;
use self::select::Projection;
use super::ast::{path_key, NullsOrder};
use super::dates::{DateMacro, DateResolver};
use super::validator::{ResolvedRef, ValidatedQuery};
use crate::access::QueryContext;
use crate::config::Limits;
use crate::error::{CursorError, LimitError, LimitKind, QueryError, QueryResult};
use crate::pagination::{CursorState, PaginationInfo, SortKey};
use crate::types::{FieldType, ShapeType};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Convert a column value read back from a result row, using the
    /// declared type of the column.
    pub fn from_json(value: &Value, field_type: FieldType) -> Result<Self, String> {
        if value.is_null() {
            return Ok(ParamValue::Null);
        }
        let unexpected = || format!("expected {} value, got {}", field_type, value);

        match field_type {
            FieldType::Boolean => value.as_bool().map(ParamValue::Bool).ok_or_else(unexpected),
            FieldType::Integer => value.as_i64().map(ParamValue::Int).ok_or_else(unexpected),
            FieldType::Float => value.as_f64().map(ParamValue::Float).ok_or_else(unexpected),
            FieldType::Date => {
                let text = value.as_str().ok_or_else(unexpected)?;
                let prefix = text.get(..10).unwrap_or(text);
                NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
                    .map(ParamValue::Date)
                    .map_err(|_| unexpected())
            }
            FieldType::DateTime => {
                let text = value.as_str().ok_or_else(unexpected)?;
                parse_timestamp(text)
                    .map(ParamValue::Timestamp)
                    .ok_or_else(unexpected)
            }
            FieldType::String | FieldType::Id | FieldType::Object => match value {
                Value::String(s) => Ok(ParamValue::Text(s.clone())),
                Value::Number(n) if n.is_i64() => n.as_i64().map(ParamValue::Int).ok_or_else(unexpected),
                _ => Err(unexpected()),
            },
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A parameter slot reserved for a date macro, filled at execution time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateParam {
    /// Zero-based index into `CompiledQuery::params`
    pub index: usize,
    pub date_macro: DateMacro,
}

/// Parameters collected across the whole statement, subqueries included.
#[derive(Debug, Default)]
pub(crate) struct Params {
    values: Vec<ParamValue>,
    dates: Vec<DateParam>,
}

impl Params {
    pub(crate) fn push(&mut self, value: ParamValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub(crate) fn push_date(&mut self, date_macro: DateMacro) -> String {
        self.dates.push(DateParam {
            index: self.values.len(),
            date_macro,
        });
        self.push(ParamValue::Null)
    }
}

/// Clause texts kept apart so a later page can splice in a keyset predicate.
#[derive(Debug, Clone)]
struct StatementParts {
    head: String,
    where_clause: Option<String>,
    grouping: Option<String>,
    order_by: Option<String>,
    limit: Option<usize>,
    offset: Option<u64>,
    lock: Option<String>,
}

impl StatementParts {
    fn render(&self, keyset: Option<&str>, with_offset: bool) -> String {
        let mut parts = vec![self.head.clone()];
        match (&self.where_clause, keyset) {
            (Some(filter), Some(keyset)) => parts.push(format!("WHERE ({}) AND {}", filter, keyset)),
            (Some(filter), None) => parts.push(format!("WHERE {}", filter)),
            (None, Some(keyset)) => parts.push(format!("WHERE {}", keyset)),
            (None, None) => {}
        }
        if let Some(grouping) = &self.grouping {
            parts.push(grouping.clone());
        }
        if let Some(order_by) = &self.order_by {
            parts.push(format!("ORDER BY {}", order_by));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {}", limit));
        }
        if with_offset {
            if let Some(offset) = self.offset {
                parts.push(format!("OFFSET {}", offset));
            }
        }
        if let Some(lock) = &self.lock {
            parts.push(lock.clone());
        }
        parts.join(" ")
    }
}

/// Output of compilation. Immutable once built, except for late date binding.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
    pub date_params: Vec<DateParam>,
    pub shape: ResultShape,
    pub pagination: Option<PaginationInfo>,
    /// Every object the statement touches, for cache invalidation
    pub dependencies: BTreeSet<String>,
    pub for_update: bool,
    pub security_enforced: bool,
    parts: StatementParts,
}

/// SQL and parameters ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedStatement {
    pub sql: String,
    pub params: Vec<ParamValue>,
    /// Rows delivered by the pages before this one
    pub returned: usize,
}

impl CompiledQuery {
    /// Fill every date-macro slot with a concrete timestamp for `ctx`.
    pub fn resolve_dates(&mut self, resolver: &dyn DateResolver, ctx: &QueryContext) -> QueryResult<()> {
        for slot in &self.date_params {
            let value = resolver.resolve(ctx, &slot.date_macro)?;
            let param = self.params.get_mut(slot.index).ok_or_else(|| {
                QueryError::Internal(format!("date parameter {} out of range", slot.index))
            })?;
            *param = ParamValue::Timestamp(value);
        }
        Ok(())
    }

    /// Same statement with a caller-chosen page size. Cursors stay valid
    /// across page sizes since they only bind the sort keys.
    pub fn with_page_size(mut self, page_size: usize, limits: &Limits) -> QueryResult<Self> {
        LimitError::check(LimitKind::PageSize, limits.max_page_size, page_size)?;
        let pagination = self.pagination.as_mut().ok_or(CursorError::NotPaginated)?;
        if page_size == 0 {
            return Err(LimitError {
                kind: LimitKind::PageSize,
                limit: limits.max_page_size,
                actual: 0,
            }
            .into());
        }

        pagination.page_size = page_size;
        self.parts.limit = Some(pagination.fetch_limit(0));
        self.sql = self.parts.render(None, true);
        Ok(self)
    }

    /// First page statement.
    pub fn statement(&self) -> PagedStatement {
        PagedStatement {
            sql: self.sql.clone(),
            params: self.params.clone(),
            returned: 0,
        }
    }

    /// Statement for the page after a decoded cursor. The keyset predicate
    /// is AND-ed into WHERE, OFFSET is dropped and LIMIT shrinks to what is
    /// left of the query's own row limit.
    pub fn resume(&self, state: &CursorState) -> QueryResult<PagedStatement> {
        let pagination = self.pagination.as_ref().ok_or(CursorError::NotPaginated)?;
        let (predicate, extra) = pagination.keyset_predicate(&state.values, self.params.len() + 1)?;

        let mut params = self.params.clone();
        params.extend(extra);
        let mut parts = self.parts.clone();
        parts.limit = Some(pagination.fetch_limit(state.returned));
        Ok(PagedStatement {
            sql: parts.render(Some(&predicate), false),
            params,
            returned: state.returned,
        })
    }
}

/// Column aliases already handed out in one SELECT list.
#[derive(Debug, Default)]
pub(crate) struct AliasSet {
    used: HashSet<String>,
}

impl AliasSet {
    /// `base`, or `base_2`, `base_3`, ... when taken (case-insensitive).
    pub(crate) fn unique(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while !self.used.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        candidate
    }
}

/// Lowering state for one SELECT statement; subqueries get their own.
pub(crate) struct Statement<'q> {
    validated: &'q ValidatedQuery,
    joins: JoinPlan,
    aliases: AliasSet,
}

/// An ORDER BY item after lowering.
pub(crate) struct OrderTerm {
    sql: String,
    descending: bool,
    nulls: Option<NullsOrder>,
}

impl OrderTerm {
    fn render(&self) -> String {
        let mut out = format!("{} {}", self.sql, if self.descending { "DESC" } else { "ASC" });
        match self.nulls {
            Some(NullsOrder::First) => out.push_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => out.push_str(" NULLS LAST"),
            None => {}
        }
        out
    }
}

impl<'q> Statement<'q> {
    pub(crate) fn new(validated: &'q ValidatedQuery, prefix: &str) -> Self {
        Self {
            validated,
            joins: JoinPlan::new(prefix),
            aliases: AliasSet::default(),
        }
    }

    pub(crate) fn order_terms(&mut self, params: &mut Params) -> QueryResult<Vec<OrderTerm>> {
        let mut terms = Vec::with_capacity(self.validated.query.order_by.len());
        for item in &self.validated.query.order_by {
            terms.push(OrderTerm {
                sql: self.expr(params, &item.expr)?,
                descending: item.descending,
                nulls: item.nulls,
            });
        }
        Ok(terms)
    }
}

/// Compile a validated query.
pub fn compile(validated: &ValidatedQuery) -> QueryResult<CompiledQuery> {
    let query = &validated.query;
    let mut params = Params::default();
    let mut stmt = Statement::new(validated, "");

    let mut projection = stmt.projection(&mut params)?;

    let where_clause = match &query.where_clause {
        Some(filter) => Some(stmt.expr(&mut params, filter)?),
        None => None,
    };

    let mut group_keys = Vec::with_capacity(query.group_by.len());
    for key in &query.group_by {
        group_keys.push(stmt.expr(&mut params, key)?);
    }
    let having = match &query.having {
        Some(having) => Some(stmt.expr(&mut params, having)?),
        None => None,
    };

    let mut order = stmt.order_terms(&mut params)?;
    let pagination = plan_pagination(&mut stmt, &mut projection, &mut order, &group_keys)?;

    let limit = match (&pagination, query.limit) {
        (Some(info), _) => Some(info.fetch_limit(0)),
        (None, Some(limit)) => Some(usize::try_from(limit).unwrap_or(usize::MAX)),
        (None, None) => None,
    };

    let mut grouping = Vec::new();
    if !group_keys.is_empty() {
        grouping.push(format!("GROUP BY {}", group_keys.join(", ")));
    }
    if let Some(having) = having {
        grouping.push(format!("HAVING {}", having));
    }

    let parts = StatementParts {
        head: format!(
            "SELECT {} {}",
            projection.columns.join(", "),
            stmt.joins.from_clause(&validated.root.table_name)
        ),
        where_clause,
        grouping: (!grouping.is_empty()).then(|| grouping.join(" ")),
        order_by: (!order.is_empty()).then(|| {
            order
                .iter()
                .map(OrderTerm::render)
                .collect::<Vec<_>>()
                .join(", ")
        }),
        limit,
        offset: query.offset,
        lock: query
            .for_update
            .then(|| format!("FOR UPDATE OF {}", stmt.joins.root())),
    };

    let sql = parts.render(None, true);
    tracing::debug!(
        "[SOQL] Compiled query on {}: {} joins, {} params, {} date params, paginated: {}",
        validated.root.api_name,
        stmt.joins.len(),
        params.values.len(),
        params.dates.len(),
        pagination.is_some()
    );

    Ok(CompiledQuery {
        sql,
        params: params.values,
        date_params: params.dates,
        shape: projection.shape,
        pagination,
        dependencies: validated.dependencies.clone(),
        for_update: query.for_update,
        security_enforced: query.security_enforced,
        parts,
    })
}

/// Derive keyset sort keys, append tie-breakers to ORDER BY and project any
/// sort column the caller did not select.
///
/// Ungrouped queries break ties on the identity field. Grouped queries break
/// ties on their GROUP BY keys and are only paginated when no ORDER BY item
/// is an aggregate. Ungrouped aggregates return one row and are never paged.
fn plan_pagination(
    stmt: &mut Statement<'_>,
    projection: &mut Projection,
    order: &mut Vec<OrderTerm>,
    group_keys: &[String],
) -> QueryResult<Option<PaginationInfo>> {
    let validated = stmt.validated;
    let query = &validated.query;

    if query.limit == Some(0) {
        return Ok(None);
    }
    let grouped = !query.group_by.is_empty();
    if validated.aggregated
        && (!grouped || query.order_by.iter().any(|item| item.expr.contains_aggregate()))
    {
        return Ok(None);
    }

    let mut keys = Vec::with_capacity(order.len() + 1);
    let mut ordered_paths = HashSet::new();

    for (index, (item, term)) in query.order_by.iter().zip(order.iter()).enumerate() {
        let path = item.expr.unwrap_parens().as_field();
        let (name, column, nullable) = match path {
            Some(path) => {
                let key = path_key(path);
                ordered_paths.insert(key.clone());
                let name = validated
                    .reference(path)
                    .map(|r| r.path.join("."))
                    .unwrap_or_else(|| key.clone());
                let natural = validated
                    .reference(path)
                    .map(|r| r.natural_alias())
                    .unwrap_or_else(|| format!("sort{}", index));
                let ty = item.expr.ty.unwrap_or(FieldType::String);
                let column = projection.sort_column(stmt, &key, &name, &natural, &term.sql, ty);
                let nullable = !validated
                    .reference(path)
                    .is_some_and(|r| is_root_identity(validated, r));
                (name, column, nullable)
            }
            None => {
                let ty = item.expr.ty.unwrap_or(FieldType::String);
                let alias = format!("sort{}", index);
                let column = projection.hidden_column(stmt, &alias, &alias, &term.sql, ty);
                (column.clone(), column, true)
            }
        };
        keys.push(SortKey {
            name,
            column,
            expr: term.sql.clone(),
            field_type: item.expr.ty.unwrap_or(FieldType::String),
            descending: item.descending,
            nulls_first: item
                .nulls
                .map(|n| n == NullsOrder::First)
                .unwrap_or(item.descending),
            nullable,
        });
    }

    let descending = keys.first().map(|k| k.descending).unwrap_or(false);
    let mut tie_breakers = Vec::new();

    if grouped {
        for (key_expr, sql) in query.group_by.iter().zip(group_keys) {
            let Some(path) = key_expr.as_field() else {
                continue;
            };
            let key = path_key(path);
            if !ordered_paths.insert(key.clone()) {
                continue;
            }
            let reference = validated.reference(path).ok_or_else(|| {
                QueryError::Internal(format!("GROUP BY path {} was not resolved", key))
            })?;
            let name = reference.path.join(".");
            let ty = reference.field.field_type;
            let column = projection.sort_column(stmt, &key, &name, &reference.natural_alias(), sql, ty);
            tie_breakers.push(name.clone());
            order.push(OrderTerm {
                sql: sql.clone(),
                descending,
                nulls: None,
            });
            keys.push(SortKey {
                name,
                column,
                expr: sql.clone(),
                field_type: ty,
                descending,
                nulls_first: descending,
                nullable: !is_root_identity(validated, reference),
            });
        }
    } else {
        let id = validated.root.id().ok_or_else(|| {
            QueryError::Provider(format!(
                "Metadata for {} has no identity column {}",
                validated.root.api_name, validated.root.id_field
            ))
        })?;
        let key = id.name.to_lowercase();
        if !ordered_paths.contains(&key) {
            let sql = format!("{}.{}", stmt.joins.root(), quote_ident(&id.column));
            let column = projection.sort_column(stmt, &key, &id.name, &id.name, &sql, id.field_type);
            tie_breakers.push(id.name.clone());
            order.push(OrderTerm {
                sql: sql.clone(),
                descending,
                nulls: None,
            });
            keys.push(SortKey {
                name: id.name.clone(),
                column,
                expr: sql,
                field_type: id.field_type,
                descending,
                nulls_first: descending,
                nullable: false,
            });
        }
    }

    let limits = &validated.limits;
    let row_limit = query.limit.map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));
    let page_size = match row_limit {
        Some(limit) => limit.min(limits.max_page_size),
        None => limits.default_page_size,
    };

    Ok(Some(PaginationInfo {
        object: validated.root.api_name.clone(),
        sort_keys: keys,
        tie_breakers,
        page_size,
        row_limit,
    }))
}

/// The root object's own identity column, which is never NULL. The same
/// field reached through a lookup can be, since lookups are LEFT JOINs.
fn is_root_identity(validated: &ValidatedQuery, reference: &ResolvedRef) -> bool {
    reference.joins.is_empty() && reference.field.name.eq_ignore_ascii_case(&validated.root.id_field)
}

/// Quote an identifier taken from metadata.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string constant taken from metadata.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Projection {
    /// Column alias carrying the value of a sort key: the caller's own
    /// column when the path is already selected, else a hidden one.
    fn sort_column(
        &mut self,
        stmt: &mut Statement<'_>,
        key: &str,
        name: &str,
        natural: &str,
        sql: &str,
        ty: FieldType,
    ) -> String {
        match self.by_path.get(key) {
            Some(alias) => alias.clone(),
            None => {
                let column = self.hidden_column(stmt, name, natural, sql, ty);
                self.by_path.insert(key.to_string(), column.clone());
                column
            }
        }
    }

    fn hidden_column(
        &mut self,
        stmt: &mut Statement<'_>,
        name: &str,
        natural: &str,
        sql: &str,
        ty: FieldType,
    ) -> String {
        let alias = stmt.aliases.unique(natural);
        self.columns.push(format!("{} AS {}", sql, quote_ident(&alias)));
        self.shape
            .fields
            .push(ShapeField::new(name, alias.clone(), ShapeType::scalar(ty)).hidden());
        alias
    }
}
