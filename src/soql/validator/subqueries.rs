//! Relationship subqueries and WHERE semi-join subqueries.
//!
//! Both are validated in a child [`Scope`] rooted at the subquery's object,
//! with its own resolved-path map. Neither may nest another subquery.

use super::{nested_error, reject_clauses, Scope, ValidatedSubquery, ValidatedWhereSubquery, Validator};
use crate::error::{QueryResult, ValidationCode, ValidationError};
use crate::soql::ast::*;
use crate::types::FieldType;

impl Validator<'_> {
    pub(crate) fn validate_relationship_subquery(
        &self,
        scope: &mut Scope,
        sub: &mut Subquery,
    ) -> QueryResult<()> {
        if scope.nested {
            return Err(nested_error(sub.pos, "A relationship subquery"));
        }

        let from = sub.query.from.clone();
        let relationship = scope.root.relationship(&from.name).cloned().ok_or_else(|| {
            ValidationError::new(
                ValidationCode::UnknownRelationship,
                format!("No relationship '{}' on {}", from.name, scope.root.api_name),
            )
            .with_object(scope.root.api_name.clone())
            .with_field(from.name.clone())
            .at(Some(from.pos))
        })?;

        reject_clauses(&sub.query, "relationship subqueries")?;

        let child = self.resolve_object(&relationship.child_object, from.pos)?;
        let child_field = child.field(&relationship.child_field).ok_or_else(|| {
            crate::error::QueryError::Provider(format!(
                "Relationship {} points at missing field {}.{}",
                relationship.name, child.api_name, relationship.child_field
            ))
        })?;
        let parent_field = scope.root.field(&relationship.parent_field).ok_or_else(|| {
            crate::error::QueryError::Provider(format!(
                "Relationship {} points at missing field {}.{}",
                relationship.name, scope.root.api_name, relationship.parent_field
            ))
        })?;
        let child_column = child_field.column.clone();
        let parent_column = parent_field.column.clone();

        let mut child_scope = Scope::new(child, true);
        let aggregated = self.validate_body(&mut child_scope, &mut sub.query)?;
        if aggregated {
            return Err(ValidationError::new(
                ValidationCode::UnsupportedClause,
                "Aggregate functions are not supported in relationship subqueries",
            )
            .at(Some(sub.pos))
            .into());
        }

        scope.absorb(&child_scope, true);
        let validated = child_scope.finish((*sub.query).clone(), false, self.limits);
        scope.subqueries.insert(
            sub.id,
            ValidatedSubquery {
                relationship,
                child_column,
                parent_column,
                query: validated,
            },
        );
        Ok(())
    }

    /// Validate `IN (SELECT field FROM Object ...)`; returns the selected
    /// field's type for comparison with the left operand.
    pub(crate) fn validate_where_subquery(
        &self,
        scope: &mut Scope,
        sub: &mut Subquery,
    ) -> QueryResult<FieldType> {
        if scope.nested {
            return Err(nested_error(sub.pos, "A WHERE subquery"));
        }

        reject_clauses(&sub.query, "WHERE subqueries")?;
        single_field(&sub.query)?;

        let object = self.resolve_object(&sub.query.from.name, sub.query.from.pos)?;
        let mut child_scope = Scope::new(object, true);
        let aggregated = self.validate_body(&mut child_scope, &mut sub.query)?;
        if aggregated {
            return Err(single_field_error(sub.query.pos));
        }

        let field = match sub.query.select.first() {
            Some(SelectItem::Expr { expr, .. }) => {
                let path = expr
                    .unwrap_parens()
                    .as_field()
                    .ok_or_else(|| single_field_error(expr.pos))?;
                child_scope
                    .refs
                    .get(&path_key(path))
                    .map(|r| r.field.clone())
                    .ok_or_else(|| single_field_error(expr.pos))?
            }
            _ => return Err(single_field_error(sub.query.pos)),
        };

        scope.absorb(&child_scope, false);
        let ty = field.field_type;
        let validated = child_scope.finish((*sub.query).clone(), false, self.limits);
        scope.where_subqueries.insert(
            sub.id,
            ValidatedWhereSubquery {
                field,
                query: validated,
            },
        );
        Ok(ty)
    }
}

/// The select list must be exactly one un-aliased, single-segment field,
/// optionally wrapped in parentheses. Lookups, arithmetic, functions and
/// literals are rejected.
fn single_field(query: &Query) -> QueryResult<()> {
    if query.select.len() != 1 {
        return Err(single_field_error(query.pos));
    }
    match &query.select[0] {
        SelectItem::Expr { expr, alias: None } => match expr.unwrap_parens().as_field() {
            Some(path) if path.len() == 1 => Ok(()),
            _ => Err(single_field_error(expr.pos)),
        },
        other => Err(single_field_error(other.pos())),
    }
}

fn single_field_error(pos: crate::types::Position) -> crate::error::QueryError {
    ValidationError::new(
        ValidationCode::WhereSubqueryMustBeSingleField,
        "A WHERE subquery must select exactly one field of its object",
    )
    .at(Some(pos))
    .into()
}
