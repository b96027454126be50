//! Semantic validation for object queries.
//!
//! This module resolves a parsed [`Query`] against live metadata and access
//! policy:
//! - paths: dot-path resolution into joins and concrete fields
//! - expressions: type inference and clause capability checks
//! - subqueries: relationship and WHERE semi-join subqueries
//! - polymorphic: TYPEOF projection
//!
//! The result is a [`ValidatedQuery`] the compiler can lower without touching
//! metadata again.

mod expressions;
mod paths;
mod polymorphic;
mod subqueries;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::ast::*;
use crate::access::{AccessController, QueryContext};
use crate::config::Limits;
use crate::error::{
    AccessError, LimitError, LimitKind, QueryResult, ValidationCode, ValidationError,
};
use crate::metadata::{FieldMeta, LookupMeta, MetadataProvider, ObjectMeta, RelationshipMeta};
use crate::types::{FieldType, Position};

/// A LEFT JOIN needed to reach a field through a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Canonical key, e.g. `account.owner`, or `what[account]` for a TYPEOF branch
    pub path: String,
    /// Key of the join this one starts from; `None` means the root object
    pub parent: Option<String>,
    pub source_object: String,
    pub source_field: String,
    pub source_column: String,
    pub target_object: String,
    pub target_table: String,
    pub target_column: String,
    pub discriminator: Option<Discriminator>,
}

/// Extra join condition for polymorphic lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub column: String,
    pub type_name: String,
}

/// A dot path resolved to its terminal field and the joins that reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRef {
    /// Canonical segment names as spelled in metadata
    pub path: Vec<String>,
    pub object: String,
    pub field: FieldMeta,
    pub joins: Vec<Join>,
}

impl ResolvedRef {
    /// Key of the join owning the terminal field, `None` for root fields.
    pub fn join_path(&self) -> Option<&str> {
        self.joins.last().map(|j| j.path.as_str())
    }

    /// `Account.Owner.Name` becomes `Account_Owner_Name`.
    pub fn natural_alias(&self) -> String {
        self.path.join("_")
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedSubquery {
    pub relationship: RelationshipMeta,
    pub child_column: String,
    pub parent_column: String,
    pub query: ValidatedQuery,
}

#[derive(Debug, Clone)]
pub struct ValidatedWhereSubquery {
    pub field: FieldMeta,
    pub query: ValidatedQuery,
}

#[derive(Debug, Clone)]
pub struct TypeOfBranch {
    pub object: String,
    pub join: Join,
    pub fields: Vec<FieldMeta>,
    /// Branch produced by the ELSE list for a type not named in any WHEN
    pub from_else: bool,
}

#[derive(Debug, Clone)]
pub struct ValidatedTypeOf {
    pub lookup: LookupMeta,
    pub type_column: String,
    pub branches: Vec<TypeOfBranch>,
}

/// Output of validation, consumed by the compiler.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    /// The statement with `Expr::ty` filled in
    pub query: Query,
    pub root: Arc<ObjectMeta>,
    /// Resolved paths keyed by lowercase dot path
    pub refs: HashMap<String, ResolvedRef>,
    pub subqueries: HashMap<usize, ValidatedSubquery>,
    pub where_subqueries: HashMap<usize, ValidatedWhereSubquery>,
    pub typeofs: HashMap<usize, ValidatedTypeOf>,
    pub field_count: usize,
    /// GROUP BY present or aggregates selected
    pub aggregated: bool,
    pub dependencies: BTreeSet<String>,
    pub limits: Limits,
}

impl ValidatedQuery {
    pub fn reference(&self, path: &[Ident]) -> Option<&ResolvedRef> {
        self.refs.get(&path_key(path))
    }
}

/// Clause an expression appears in; decides which capability a field needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clause {
    Select,
    Where,
    GroupBy,
    Having,
    OrderBy,
}

impl Clause {
    fn allows_aggregates(&self) -> bool {
        matches!(self, Clause::Select | Clause::Having | Clause::OrderBy)
    }

    fn name(&self) -> &'static str {
        match self {
            Clause::Select => "SELECT",
            Clause::Where => "WHERE",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::OrderBy => "ORDER BY",
        }
    }
}

/// Per-statement resolution state. Subqueries get their own scope.
pub(crate) struct Scope {
    root: Arc<ObjectMeta>,
    nested: bool,
    refs: HashMap<String, ResolvedRef>,
    subqueries: HashMap<usize, ValidatedSubquery>,
    where_subqueries: HashMap<usize, ValidatedWhereSubquery>,
    typeofs: HashMap<usize, ValidatedTypeOf>,
    dependencies: BTreeSet<String>,
    field_count: usize,
    subquery_count: usize,
}

impl Scope {
    fn new(root: Arc<ObjectMeta>, nested: bool) -> Self {
        let mut dependencies = BTreeSet::new();
        dependencies.insert(root.api_name.clone());
        Self {
            root,
            nested,
            refs: HashMap::new(),
            subqueries: HashMap::new(),
            where_subqueries: HashMap::new(),
            typeofs: HashMap::new(),
            dependencies,
            field_count: 0,
            subquery_count: 0,
        }
    }

    /// Fold a finished child scope's counters into this one.
    fn absorb(&mut self, child: &Scope, count_fields: bool) {
        if count_fields {
            self.field_count += child.field_count;
        }
        self.subquery_count += 1 + child.subquery_count;
        self.dependencies.extend(child.dependencies.iter().cloned());
    }

    fn finish(self, query: Query, aggregated: bool, limits: &Limits) -> ValidatedQuery {
        ValidatedQuery {
            query,
            root: self.root,
            refs: self.refs,
            subqueries: self.subqueries,
            where_subqueries: self.where_subqueries,
            typeofs: self.typeofs,
            field_count: self.field_count,
            aggregated,
            dependencies: self.dependencies,
            limits: limits.clone(),
        }
    }
}

/// Validates parsed queries for one request.
pub struct Validator<'a> {
    metadata: &'a dyn MetadataProvider,
    access: &'a dyn AccessController,
    ctx: &'a QueryContext,
    limits: &'a Limits,
}

impl<'a> Validator<'a> {
    pub fn new(
        metadata: &'a dyn MetadataProvider,
        access: &'a dyn AccessController,
        ctx: &'a QueryContext,
        limits: &'a Limits,
    ) -> Self {
        Self {
            metadata,
            access,
            ctx,
            limits,
        }
    }

    /// Validate a statement, consuming the AST and returning it annotated.
    pub fn validate(&self, mut query: Query) -> QueryResult<ValidatedQuery> {
        let root = self.resolve_object(&query.from.name, query.from.pos)?;
        let mut scope = Scope::new(root, false);

        let aggregated = self.validate_body(&mut scope, &mut query)?;

        LimitError::check(
            LimitKind::FieldCount,
            self.limits.max_select_fields,
            scope.field_count,
        )?;
        LimitError::check(
            LimitKind::SubqueryCount,
            self.limits.max_subqueries,
            scope.subquery_count,
        )?;

        tracing::debug!(
            "[SOQL] Validated query on {}: {} fields, {} paths, {} subqueries",
            scope.root.api_name,
            scope.field_count,
            scope.refs.len(),
            scope.subquery_count
        );
        Ok(scope.finish(query, aggregated, self.limits))
    }

    /// Validate every clause of `query` in `scope`. Returns whether the
    /// statement is aggregated.
    pub(crate) fn validate_body(&self, scope: &mut Scope, query: &mut Query) -> QueryResult<bool> {
        if let Some(limit) = query.limit {
            LimitError::check(LimitKind::Limit, self.limits.max_limit, saturate(limit))?;
        }
        if let Some(offset) = query.offset {
            LimitError::check(LimitKind::Offset, self.limits.max_offset, saturate(offset))?;
        }

        for item in query.select.iter_mut() {
            match item {
                SelectItem::Expr { expr, .. } => {
                    self.validate_expr(scope, expr, Clause::Select, false)?;
                    scope.field_count += 1;
                }
                SelectItem::Subquery(sub) => self.validate_relationship_subquery(scope, sub)?,
                SelectItem::Typeof(t) => self.validate_typeof(scope, t)?,
            }
        }

        if let Some(where_clause) = query.where_clause.as_mut() {
            let ty = self.validate_expr(scope, where_clause, Clause::Where, false)?;
            expect_condition(ty, where_clause.pos, Clause::Where)?;
        }

        for key in query.group_by.iter_mut() {
            if key.as_field().is_none() {
                return Err(ValidationError::new(
                    ValidationCode::UnsupportedClause,
                    "GROUP BY accepts field paths only",
                )
                .at(Some(key.pos))
                .into());
            }
            self.validate_expr(scope, key, Clause::GroupBy, false)?;
        }

        if let Some(having) = query.having.as_mut() {
            if query.group_by.is_empty() {
                return Err(ValidationError::new(
                    ValidationCode::MissingRequiredClause,
                    "HAVING requires GROUP BY",
                )
                .at(Some(having.pos))
                .into());
            }
            let ty = self.validate_expr(scope, having, Clause::Having, false)?;
            expect_condition(ty, having.pos, Clause::Having)?;
        }

        for item in query.order_by.iter_mut() {
            self.validate_expr(scope, &mut item.expr, Clause::OrderBy, false)?;
        }

        let aggregated = !query.group_by.is_empty()
            || query.select.iter().any(|item| {
                matches!(item, SelectItem::Expr { expr, .. } if expr.contains_aggregate())
            })
            || query.order_by.iter().any(|item| item.expr.contains_aggregate());
        if aggregated {
            check_grouping(query)?;
        }

        Ok(aggregated)
    }

    /// Existence and readability of an object.
    pub(crate) fn resolve_object(&self, name: &str, pos: Position) -> QueryResult<Arc<ObjectMeta>> {
        let meta = self.metadata.get_object(name)?.ok_or_else(|| {
            ValidationError::new(
                ValidationCode::UnknownObject,
                format!("Unknown object '{}'", name),
            )
            .with_object(name)
            .at(Some(pos))
        })?;

        if !self.access.can_access_object(self.ctx, &meta.api_name)? {
            tracing::debug!("[SOQL] Object {} denied for user {}", meta.api_name, self.ctx.user_id);
            return Err(AccessError {
                object: meta.api_name.clone(),
                field: None,
                position: Some(pos),
            }
            .into());
        }
        Ok(meta)
    }

    /// Readability of a field on an already resolved object.
    pub(crate) fn check_field_access(
        &self,
        object: &ObjectMeta,
        field: &FieldMeta,
        pos: Position,
    ) -> QueryResult<()> {
        if self
            .access
            .can_access_field(self.ctx, &object.api_name, &field.name)?
        {
            Ok(())
        } else {
            Err(AccessError {
                object: object.api_name.clone(),
                field: Some(field.name.clone()),
                position: Some(pos),
            }
            .into())
        }
    }

    /// Look up a concrete field on `object`, failing with UnknownField.
    pub(crate) fn concrete_field(
        &self,
        object: &ObjectMeta,
        ident: &Ident,
    ) -> QueryResult<FieldMeta> {
        match object.field(&ident.name) {
            Some(field) => {
                self.check_field_access(object, field, ident.pos)?;
                Ok(field.clone())
            }
            None => {
                let message = if object.lookup(&ident.name).is_some() {
                    format!(
                        "'{}' is a lookup on {}; select one of its fields instead",
                        ident.name, object.api_name
                    )
                } else {
                    format!("No field '{}' on {}", ident.name, object.api_name)
                };
                Err(ValidationError::new(ValidationCode::UnknownField, message)
                    .with_object(object.api_name.clone())
                    .with_field(ident.name.clone())
                    .at(Some(ident.pos))
                    .into())
            }
        }
    }
}

fn saturate(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn expect_condition(ty: Option<FieldType>, pos: Position, clause: Clause) -> QueryResult<()> {
    match ty {
        None | Some(FieldType::Boolean) => Ok(()),
        Some(other) => Err(ValidationError::new(
            ValidationCode::TypeMismatch,
            format!("{} condition must be boolean, found {}", clause.name(), other),
        )
        .at(Some(pos))
        .into()),
    }
}

/// Every non-aggregated reference in an aggregated statement must be a
/// GROUP BY key.
fn check_grouping(query: &Query) -> QueryResult<()> {
    let keys: HashSet<String> = query
        .group_by
        .iter()
        .filter_map(|e| e.as_field())
        .map(path_key)
        .collect();

    let ungrouped = |expr: &Expr| -> QueryResult<()> {
        for path in expr.bare_field_paths() {
            if !keys.contains(&path_key(path)) {
                let name = path
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                return Err(ValidationError::new(
                    ValidationCode::FieldNotGrouped,
                    format!("'{}' must be grouped or aggregated", name),
                )
                .with_field(name)
                .at(path.first().map(|i| i.pos))
                .into());
            }
        }
        Ok(())
    };

    for item in &query.select {
        match item {
            SelectItem::Expr { expr, .. } => ungrouped(expr)?,
            other => {
                return Err(ValidationError::new(
                    ValidationCode::UnsupportedClause,
                    "Subqueries and TYPEOF cannot be combined with aggregation",
                )
                .at(Some(other.pos()))
                .into())
            }
        }
    }
    if let Some(having) = &query.having {
        ungrouped(having)?;
    }
    for item in &query.order_by {
        ungrouped(&item.expr)?;
    }

    if query.for_update {
        return Err(ValidationError::new(
            ValidationCode::UnsupportedClause,
            "FOR UPDATE cannot be used with aggregation",
        )
        .at(Some(query.pos))
        .into());
    }
    Ok(())
}

/// Reject a clause a nested statement may not carry.
pub(crate) fn reject_clauses(query: &Query, context: &str) -> QueryResult<()> {
    let offending = if !query.group_by.is_empty() {
        Some("GROUP BY")
    } else if query.having.is_some() {
        Some("HAVING")
    } else if query.offset.is_some() {
        Some("OFFSET")
    } else if query.for_update {
        Some("FOR UPDATE")
    } else if query.security_enforced {
        Some("WITH SECURITY_ENFORCED")
    } else {
        None
    };

    match offending {
        Some(clause) => Err(ValidationError::new(
            ValidationCode::UnsupportedClause,
            format!("{} is not supported in {}", clause, context),
        )
        .at(Some(query.pos))
        .into()),
        None => Ok(()),
    }
}

fn nested_error(pos: Position, what: &str) -> crate::error::QueryError {
    ValidationError::new(
        ValidationCode::NestedSubqueryNotAllowed,
        format!("{} cannot appear inside a subquery", what),
    )
    .at(Some(pos))
    .into()
}
