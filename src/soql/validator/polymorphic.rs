//! TYPEOF projection over polymorphic lookups.

use std::collections::HashSet;

use super::{nested_error, Discriminator, Join, Scope, TypeOfBranch, ValidatedTypeOf, Validator};
use crate::error::{QueryError, QueryResult, ValidationCode, ValidationError};
use crate::metadata::{LookupMeta, ObjectMeta};
use crate::soql::ast::{Ident, TypeOf};
use crate::types::Position;

impl Validator<'_> {
    pub(crate) fn validate_typeof(&self, scope: &mut Scope, typeof_: &mut TypeOf) -> QueryResult<()> {
        if scope.nested {
            return Err(nested_error(typeof_.pos, "TYPEOF"));
        }

        let root = scope.root.clone();
        let lookup = root.lookup(&typeof_.field.name).cloned().ok_or_else(|| {
            ValidationError::new(
                ValidationCode::UnknownLookup,
                format!("No lookup '{}' on {}", typeof_.field.name, root.api_name),
            )
            .with_object(root.api_name.clone())
            .with_field(typeof_.field.name.clone())
            .at(Some(typeof_.field.pos))
        })?;

        let type_field = match (&lookup.type_field, lookup.is_polymorphic()) {
            (Some(name), true) => name.clone(),
            _ => {
                return Err(invalid(
                    typeof_.field.pos,
                    format!("TYPEOF requires a polymorphic lookup; '{}' is not one", lookup.name),
                ))
            }
        };

        let fk = root.field(&lookup.field).ok_or_else(|| {
            QueryError::Provider(format!(
                "Lookup {}.{} points at a missing key field",
                root.api_name, lookup.name
            ))
        })?;
        self.check_field_access(&root, fk, typeof_.field.pos)?;
        let type_meta = root.field(&type_field).ok_or_else(|| {
            QueryError::Provider(format!(
                "Lookup {}.{} has no type field {}",
                root.api_name, lookup.name, type_field
            ))
        })?;
        self.check_field_access(&root, type_meta, typeof_.field.pos)?;
        let fk_column = fk.column.clone();
        let fk_name = fk.name.clone();
        let type_column = type_meta.column.clone();

        let mut branches = Vec::new();
        let mut named: HashSet<String> = HashSet::new();

        for when in &typeof_.whens {
            if !lookup.targets_object(&when.object.name) {
                return Err(invalid(
                    when.object.pos,
                    format!("{} is not a possible type of {}", when.object.name, lookup.name),
                ));
            }
            if !named.insert(when.object.name.to_lowercase()) {
                return Err(invalid(
                    when.object.pos,
                    format!("{} appears in more than one WHEN", when.object.name),
                ));
            }
            let target = self.resolve_object(&when.object.name, when.object.pos)?;
            let branch = self.branch(&root, &lookup, &fk_name, &fk_column, &type_column, &target, &when.fields, false)?;
            branches.push(branch);
        }

        if !typeof_.else_fields.is_empty() {
            let remaining: Vec<&String> = lookup
                .targets
                .iter()
                .filter(|t| !named.contains(&t.to_lowercase()))
                .collect();
            if remaining.is_empty() {
                let at = typeof_.else_fields.first().map(|i| i.pos).unwrap_or(typeof_.pos);
                return Err(invalid(at, "ELSE has no remaining types to apply to".to_string()));
            }
            for name in remaining {
                let target = self.resolve_object(name, typeof_.field.pos)?;
                let branch = self.branch(
                    &root,
                    &lookup,
                    &fk_name,
                    &fk_column,
                    &type_column,
                    &target,
                    &typeof_.else_fields,
                    true,
                )?;
                branches.push(branch);
            }
        }

        for branch in &branches {
            scope.dependencies.insert(branch.object.clone());
        }
        scope.field_count += typeof_.whens.iter().map(|w| w.fields.len()).sum::<usize>()
            + typeof_.else_fields.len();

        scope.typeofs.insert(
            typeof_.id,
            ValidatedTypeOf {
                lookup,
                type_column,
                branches,
            },
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn branch(
        &self,
        root: &ObjectMeta,
        lookup: &LookupMeta,
        fk_name: &str,
        fk_column: &str,
        type_column: &str,
        target: &ObjectMeta,
        fields: &[Ident],
        from_else: bool,
    ) -> QueryResult<TypeOfBranch> {
        let target_id = target.id().ok_or_else(|| {
            QueryError::Provider(format!("Metadata for {} has no identity column", target.api_name))
        })?;

        let mut resolved = Vec::with_capacity(fields.len());
        for ident in fields {
            resolved.push(self.concrete_field(target, ident)?);
        }

        Ok(TypeOfBranch {
            object: target.api_name.clone(),
            join: Join {
                path: format!(
                    "{}[{}]",
                    lookup.name.to_lowercase(),
                    target.api_name.to_lowercase()
                ),
                parent: None,
                source_object: root.api_name.clone(),
                source_field: fk_name.to_string(),
                source_column: fk_column.to_string(),
                target_object: target.api_name.clone(),
                target_table: target.table_name.clone(),
                target_column: target_id.column.clone(),
                discriminator: Some(Discriminator {
                    column: type_column.to_string(),
                    type_name: target.api_name.clone(),
                }),
            },
            fields: resolved,
            from_else,
        })
    }
}

fn invalid(pos: Position, message: String) -> QueryError {
    ValidationError::new(ValidationCode::InvalidTypeof, message)
        .at(Some(pos))
        .into()
}
