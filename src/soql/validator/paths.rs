//! Dot-path resolution.
//!
//! Every segment but the last must be a lookup on the current object; the
//! last must be a concrete field. Results are memoized per scope by lowercase
//! path so a path used in several clauses resolves (and is access-checked)
//! once, and its joins share one alias key.

use super::{Clause, Join, ResolvedRef, Scope, Validator};
use crate::error::{LimitError, LimitKind, QueryError, QueryResult, ValidationCode, ValidationError};
use crate::soql::ast::{path_key, Ident};
use crate::types::Position;

impl Validator<'_> {
    pub(crate) fn resolve_path(&self, scope: &mut Scope, path: &[Ident]) -> QueryResult<ResolvedRef> {
        let key = path_key(path);
        if let Some(resolved) = scope.refs.get(&key) {
            return Ok(resolved.clone());
        }

        let (last, lookups) = path
            .split_last()
            .ok_or_else(|| QueryError::Internal("empty field path".to_string()))?;

        let mut current = scope.root.clone();
        let mut joins: Vec<Join> = Vec::new();
        let mut canonical = Vec::with_capacity(path.len());

        for (depth, segment) in lookups.iter().enumerate() {
            LimitError::check(LimitKind::LookupDepth, self.limits.max_lookup_depth, depth + 1)?;

            let lookup = current.lookup(&segment.name).ok_or_else(|| {
                ValidationError::new(
                    ValidationCode::UnknownLookup,
                    format!("No lookup '{}' on {}", segment.name, current.api_name),
                )
                .with_object(current.api_name.clone())
                .with_field(segment.name.clone())
                .at(Some(segment.pos))
            })?;

            if lookup.is_polymorphic() {
                return Err(ValidationError::new(
                    ValidationCode::PolymorphicTraversal,
                    format!(
                        "'{}' on {} is polymorphic; use TYPEOF to select its fields",
                        lookup.name, current.api_name
                    ),
                )
                .with_object(current.api_name.clone())
                .with_field(lookup.name.clone())
                .at(Some(segment.pos))
                .into());
            }

            let target_name = lookup
                .targets
                .first()
                .ok_or_else(|| inconsistent(&current.api_name, &lookup.name, "has no target"))?;
            let target = self.resolve_object(target_name, segment.pos)?;

            let fk = current.field(&lookup.field).ok_or_else(|| {
                inconsistent(&current.api_name, &lookup.name, "points at a missing key field")
            })?;
            let target_id = target
                .id()
                .ok_or_else(|| inconsistent(&target.api_name, &target.id_field, "is not a column"))?;

            let parent = joins.last().map(|j| j.path.clone());
            let join_key = match &parent {
                Some(p) => format!("{}.{}", p, lookup.name.to_lowercase()),
                None => lookup.name.to_lowercase(),
            };

            joins.push(Join {
                path: join_key,
                parent,
                source_object: current.api_name.clone(),
                source_field: fk.name.clone(),
                source_column: fk.column.clone(),
                target_object: target.api_name.clone(),
                target_table: target.table_name.clone(),
                target_column: target_id.column.clone(),
                discriminator: None,
            });
            canonical.push(lookup.name.clone());
            scope.dependencies.insert(target.api_name.clone());
            current = target;
        }

        let field = self.concrete_field(&current, last)?;
        canonical.push(field.name.clone());

        let resolved = ResolvedRef {
            path: canonical,
            object: current.api_name.clone(),
            field,
            joins,
        };
        scope.refs.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Capability the clause requires of a referenced field.
    pub(crate) fn check_capability(
        &self,
        resolved: &ResolvedRef,
        clause: Clause,
        pos: Position,
    ) -> QueryResult<()> {
        let field = &resolved.field;
        let (allowed, code, verb) = match clause {
            Clause::Select => return Ok(()),
            Clause::Where | Clause::Having => {
                (field.filterable, ValidationCode::FieldNotFilterable, "filtered")
            }
            Clause::GroupBy => (field.groupable, ValidationCode::FieldNotGroupable, "grouped"),
            Clause::OrderBy => (field.sortable, ValidationCode::FieldNotSortable, "sorted"),
        };

        if allowed {
            Ok(())
        } else {
            Err(ValidationError::new(
                code,
                format!("{}.{} cannot be {}", resolved.object, field.name, verb),
            )
            .with_object(resolved.object.clone())
            .with_field(field.name.clone())
            .at(Some(pos))
            .into())
        }
    }
}

fn inconsistent(object: &str, name: &str, problem: &str) -> QueryError {
    QueryError::Provider(format!("Metadata for {}.{} {}", object, name, problem))
}
