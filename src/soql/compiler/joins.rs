//! LEFT JOIN planning.
//!
//! Aliases are handed out in first-use order (`t1`, `t2`, ...) and cached by
//! canonical join path, so a lookup reached from several clauses is joined
//! exactly once. Statements nested in subqueries get a prefix (`sq0_t0`).

use std::collections::HashMap;

use super::{quote_ident, quote_literal};
use crate::error::{QueryError, QueryResult};
use crate::soql::validator::Join;

#[derive(Debug)]
pub(crate) struct JoinPlan {
    prefix: String,
    root: String,
    aliases: HashMap<String, String>,
    clauses: Vec<String>,
}

impl JoinPlan {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            root: format!("{}t0", prefix),
            aliases: HashMap::new(),
            clauses: Vec::new(),
        }
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    /// Materialize every join of a resolved path; returns the alias owning
    /// the terminal field.
    pub(crate) fn ensure(&mut self, joins: &[Join]) -> QueryResult<String> {
        let mut alias = self.root.clone();
        for join in joins {
            alias = self.alias_for(join)?;
        }
        Ok(alias)
    }

    fn alias_for(&mut self, join: &Join) -> QueryResult<String> {
        if let Some(alias) = self.aliases.get(&join.path) {
            return Ok(alias.clone());
        }

        let source = match &join.parent {
            Some(parent) => self.aliases.get(parent).cloned().ok_or_else(|| {
                QueryError::Internal(format!("join {} planned before its parent {}", join.path, parent))
            })?,
            None => self.root.clone(),
        };

        let alias = format!("{}t{}", self.prefix, self.clauses.len() + 1);
        let mut clause = format!(
            "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            quote_ident(&join.target_table),
            alias,
            alias,
            quote_ident(&join.target_column),
            source,
            quote_ident(&join.source_column)
        );
        if let Some(discriminator) = &join.discriminator {
            clause.push_str(&format!(
                " AND {}.{} = {}",
                source,
                quote_ident(&discriminator.column),
                quote_literal(&discriminator.type_name)
            ));
        }

        tracing::debug!("[SOQL] Join {} -> {} as {}", join.path, join.target_object, alias);
        self.clauses.push(clause);
        self.aliases.insert(join.path.clone(), alias.clone());
        Ok(alias)
    }

    pub(crate) fn len(&self) -> usize {
        self.clauses.len()
    }

    /// `FROM "table" AS t0 LEFT JOIN ...`
    pub(crate) fn from_clause(&self, table: &str) -> String {
        let mut parts = vec![format!("FROM {} AS {}", quote_ident(table), self.root)];
        parts.extend(self.clauses.iter().cloned());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soql::validator::Discriminator;

    fn join(path: &str, parent: Option<&str>, table: &str, column: &str) -> Join {
        Join {
            path: path.to_string(),
            parent: parent.map(|p| p.to_string()),
            source_object: "Source".to_string(),
            source_field: "Fk".to_string(),
            source_column: column.to_string(),
            target_object: "Target".to_string(),
            target_table: table.to_string(),
            target_column: "id".to_string(),
            discriminator: None,
        }
    }

    #[test]
    fn test_joins_are_reused() {
        let mut plan = JoinPlan::new("");
        let account = join("account", None, "accounts", "account_id");
        let owner = join("account.owner", Some("account"), "users", "owner_id");

        assert_eq!(plan.ensure(&[account.clone()]).unwrap(), "t1");
        assert_eq!(plan.ensure(&[account.clone(), owner]).unwrap(), "t2");
        assert_eq!(plan.ensure(&[account]).unwrap(), "t1");
        assert_eq!(plan.ensure(&[]).unwrap(), "t0");
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.from_clause("contacts"),
            "FROM \"contacts\" AS t0 \
             LEFT JOIN \"accounts\" AS t1 ON t1.\"id\" = t0.\"account_id\" \
             LEFT JOIN \"users\" AS t2 ON t2.\"id\" = t1.\"owner_id\""
        );
    }

    #[test]
    fn test_prefixed_plan_with_discriminator() {
        let mut plan = JoinPlan::new("sq3_");
        let mut what = join("what[account]", None, "accounts", "what_id");
        what.discriminator = Some(Discriminator {
            column: "what_type".to_string(),
            type_name: "Account".to_string(),
        });

        assert_eq!(plan.root(), "sq3_t0");
        assert_eq!(plan.ensure(&[what]).unwrap(), "sq3_t1");
        assert_eq!(
            plan.from_clause("tasks"),
            "FROM \"tasks\" AS sq3_t0 LEFT JOIN \"accounts\" AS sq3_t1 \
             ON sq3_t1.\"id\" = sq3_t0.\"what_id\" AND sq3_t0.\"what_type\" = 'Account'"
        );
    }

    #[test]
    fn test_missing_parent_is_internal_error() {
        let mut plan = JoinPlan::new("");
        let orphan = join("account.owner", Some("account"), "users", "owner_id");
        assert!(matches!(plan.ensure(&[orphan]), Err(QueryError::Internal(_))));
    }
}
