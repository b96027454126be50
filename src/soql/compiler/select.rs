//! SELECT list lowering: plain expressions, relationship subqueries,
//! TYPEOF projections and WHERE semi-join subqueries.

use std::collections::HashMap;

use super::{quote_ident, quote_literal, Params, ResultShape, ShapeField, Statement};
use crate::error::{QueryError, QueryResult};
use crate::soql::ast::*;
use crate::types::{FieldType, ShapeType};

/// Lowered select list of one statement.
pub(crate) struct Projection {
    /// `expr AS "alias"` items, hidden sort columns last
    pub(crate) columns: Vec<String>,
    pub(crate) shape: ResultShape,
    /// Alias of each plain field item, keyed by lowercase path
    pub(crate) by_path: HashMap<String, String>,
    /// SQL of the first item, the default ordering of relationship subqueries
    pub(crate) first_expr: Option<String>,
}

impl Statement<'_> {
    pub(crate) fn projection(&mut self, params: &mut Params) -> QueryResult<Projection> {
        let validated = self.validated;
        let mut projection = Projection {
            columns: Vec::with_capacity(validated.query.select.len()),
            shape: ResultShape::new(validated.root.api_name.clone()),
            by_path: HashMap::new(),
            first_expr: None,
        };

        for (index, item) in validated.query.select.iter().enumerate() {
            let (sql, field) = match item {
                SelectItem::Expr { expr, alias } => {
                    let sql = self.expr(params, expr)?;
                    let path = expr.unwrap_parens().as_field();
                    let base = match alias {
                        Some(alias) => alias.name.clone(),
                        None => self.natural_alias(expr, index),
                    };
                    let column = self.aliases.unique(&base);
                    let name = match (alias, path) {
                        (Some(alias), _) => alias.name.clone(),
                        (None, Some(path)) => validated
                            .reference(path)
                            .map(|r| r.path.join("."))
                            .unwrap_or_else(|| column.clone()),
                        (None, None) => column.clone(),
                    };
                    if let Some(path) = path {
                        projection
                            .by_path
                            .entry(path_key(path))
                            .or_insert_with(|| column.clone());
                    }
                    let ty = ShapeType::scalar(expr.ty.unwrap_or(FieldType::String));
                    (sql, ShapeField::new(name, column, ty))
                }
                SelectItem::Subquery(sub) => {
                    let (sql, nested) = self.relationship_subquery(params, sub)?;
                    let name = validated
                        .subqueries
                        .get(&sub.id)
                        .map(|s| s.relationship.name.clone())
                        .unwrap_or_else(|| sub.query.from.name.clone());
                    let column = self.aliases.unique(&name);
                    let field = ShapeField::new(name, column, ShapeType::array_of(FieldType::Object))
                        .with_nested(nested);
                    (sql, field)
                }
                SelectItem::Typeof(t) => {
                    let (sql, nested) = self.typeof_projection(t)?;
                    let name = nested.object.clone();
                    let column = self.aliases.unique(&name);
                    let field = ShapeField::new(name, column, ShapeType::scalar(FieldType::Object))
                        .with_nested(nested);
                    (sql, field)
                }
            };

            if projection.first_expr.is_none() {
                projection.first_expr = Some(sql.clone());
            }
            projection
                .columns
                .push(format!("{} AS {}", sql, quote_ident(&field.column)));
            projection.shape.fields.push(field);
        }

        Ok(projection)
    }

    /// `Account_Owner_Name` for paths, `SUM_Amount` / `COUNT` for
    /// aggregates, `expr{index}` for anything else.
    fn natural_alias(&self, expr: &Expr, index: usize) -> String {
        let path_alias = |path: &[Ident]| {
            self.validated
                .reference(path)
                .map(|r| r.natural_alias())
                .unwrap_or_else(|| path.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join("_"))
        };

        match &expr.unwrap_parens().kind {
            ExprKind::Field(path) => path_alias(path),
            ExprKind::Function { name, args } => {
                let upper = name.to_uppercase();
                match args.as_slice() {
                    [] => upper,
                    [arg] => match arg.unwrap_parens().as_field() {
                        Some(path) => format!("{}_{}", upper, path_alias(path)),
                        None => format!("expr{}", index),
                    },
                    _ => format!("expr{}", index),
                }
            }
            _ => format!("expr{}", index),
        }
    }

    /// Correlated scalar subquery aggregating child rows into a JSON array.
    fn relationship_subquery(&mut self, params: &mut Params, sub: &Subquery) -> QueryResult<(String, ResultShape)> {
        let parent = self.validated;
        let validated = parent.subqueries.get(&sub.id).ok_or_else(|| {
            QueryError::Internal(format!("relationship subquery {} was not validated", sub.id))
        })?;
        let child = &validated.query;
        let mut inner = Statement::new(child, &format!("sq{}_", sub.id));

        let projection = inner.projection(params)?;
        let mut conditions = vec![format!(
            "{}.{} = {}.{}",
            inner.joins.root(),
            quote_ident(&validated.child_column),
            self.joins.root(),
            quote_ident(&validated.parent_column)
        )];
        if let Some(filter) = &child.query.where_clause {
            conditions.push(format!("({})", inner.expr(params, filter)?));
        }

        let order = inner.order_terms(params)?;
        let order_by = if order.is_empty() {
            projection.first_expr.clone().map(|sql| format!("{} ASC", sql))
        } else {
            Some(order.iter().map(|t| t.render()).collect::<Vec<_>>().join(", "))
        };

        let mut parts = vec![
            format!("SELECT {}", projection.columns.join(", ")),
            inner.joins.from_clause(&child.root.table_name),
            format!("WHERE {}", conditions.join(" AND ")),
        ];
        if let Some(order_by) = order_by {
            parts.push(format!("ORDER BY {}", order_by));
        }
        if let Some(limit) = child.query.limit {
            parts.push(format!("LIMIT {}", limit));
        }

        let pairs = projection
            .shape
            .fields
            .iter()
            .map(|f| format!("{}, r.{}", quote_literal(&f.column), quote_ident(&f.column)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "(SELECT COALESCE(json_agg(json_build_object({})), '[]'::json) FROM ({}) AS r)",
            pairs,
            parts.join(" ")
        );

        let mut shape = projection.shape;
        shape.object = child.root.api_name.clone();
        Ok((sql, shape))
    }

    /// `CASE WHEN <type column> = 'Type' THEN json_build_object(...) ... END`
    fn typeof_projection(&mut self, typeof_: &TypeOf) -> QueryResult<(String, ResultShape)> {
        let parent = self.validated;
        let validated = parent.typeofs.get(&typeof_.id).ok_or_else(|| {
            QueryError::Internal(format!("TYPEOF {} was not validated", typeof_.id))
        })?;

        let mut shape = ResultShape::new(validated.lookup.name.clone());
        let mut whens = Vec::with_capacity(validated.branches.len());
        for branch in &validated.branches {
            let alias = self.joins.ensure(std::slice::from_ref(&branch.join))?;
            let pairs = branch
                .fields
                .iter()
                .map(|f| format!("{}, {}.{}", quote_literal(&f.name), alias, quote_ident(&f.column)))
                .collect::<Vec<_>>()
                .join(", ");
            whens.push(format!(
                "WHEN {}.{} = {} THEN json_build_object({})",
                self.joins.root(),
                quote_ident(&validated.type_column),
                quote_literal(&branch.object),
                pairs
            ));

            for field in &branch.fields {
                if shape.field(&field.name).is_none() {
                    shape.fields.push(ShapeField::new(
                        field.name.clone(),
                        field.name.clone(),
                        ShapeType::scalar(field.field_type),
                    ));
                }
            }
        }

        Ok((format!("CASE {} ELSE NULL END", whens.join(" ")), shape))
    }

    /// `SELECT <col> FROM <table> [WHERE ...] [ORDER BY ...] [LIMIT n]`
    pub(crate) fn where_subquery(&mut self, params: &mut Params, sub: &Subquery) -> QueryResult<String> {
        let parent = self.validated;
        let validated = parent.where_subqueries.get(&sub.id).ok_or_else(|| {
            QueryError::Internal(format!("WHERE subquery {} was not validated", sub.id))
        })?;
        let child = &validated.query;
        let mut inner = Statement::new(child, &format!("w{}_", sub.id));

        let column = format!("{}.{}", inner.joins.root(), quote_ident(&validated.field.column));
        let filter = match &child.query.where_clause {
            Some(filter) => Some(inner.expr(params, filter)?),
            None => None,
        };
        let order = inner.order_terms(params)?;

        let mut parts = vec![
            format!("SELECT {}", column),
            inner.joins.from_clause(&child.root.table_name),
        ];
        if let Some(filter) = filter {
            parts.push(format!("WHERE {}", filter));
        }
        if !order.is_empty() {
            parts.push(format!(
                "ORDER BY {}",
                order.iter().map(|t| t.render()).collect::<Vec<_>>().join(", ")
            ));
        }
        if let Some(limit) = child.query.limit {
            parts.push(format!("LIMIT {}", limit));
        }
        Ok(parts.join(" "))
    }
}
