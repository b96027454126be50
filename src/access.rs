//! Request context and the read-access contract.

use std::collections::HashSet;

use chrono_tz::Tz;

use crate::error::QueryResult;

/// Per-request facts: who is asking and in which timezone "today" is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub user_id: String,
    pub timezone: Tz,
}

impl QueryContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            timezone: Tz::UTC,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}

/// Object- and field-level read checks.
///
/// Implementations may do I/O; errors are propagated, never retried.
pub trait AccessController: Send + Sync {
    fn can_access_object(&self, ctx: &QueryContext, object: &str) -> QueryResult<bool>;

    fn can_access_field(&self, ctx: &QueryContext, object: &str, field: &str) -> QueryResult<bool>;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessController for AllowAll {
    fn can_access_object(&self, _ctx: &QueryContext, _object: &str) -> QueryResult<bool> {
        Ok(true)
    }

    fn can_access_field(&self, _ctx: &QueryContext, _object: &str, _field: &str) -> QueryResult<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DenyRule {
    user: Option<String>,
    object: String,
    field: Option<String>,
}

/// Fixed deny lists, optionally scoped to a single user.
#[derive(Debug, Default, Clone)]
pub struct StaticAccessPolicy {
    rules: HashSet<DenyRule>,
}

impl StaticAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_object(self, object: &str) -> Self {
        self.with_rule(None, object, None)
    }

    pub fn deny_field(self, object: &str, field: &str) -> Self {
        self.with_rule(None, object, Some(field))
    }

    pub fn deny_object_for(self, user_id: &str, object: &str) -> Self {
        self.with_rule(Some(user_id), object, None)
    }

    pub fn deny_field_for(self, user_id: &str, object: &str, field: &str) -> Self {
        self.with_rule(Some(user_id), object, Some(field))
    }

    fn with_rule(mut self, user: Option<&str>, object: &str, field: Option<&str>) -> Self {
        self.rules.insert(DenyRule {
            user: user.map(str::to_string),
            object: object.to_lowercase(),
            field: field.map(str::to_lowercase),
        });
        self
    }

    fn denies(&self, ctx: &QueryContext, object: &str, field: Option<&str>) -> bool {
        let object = object.to_lowercase();
        let field = field.map(str::to_lowercase);
        [None, Some(ctx.user_id.clone())].into_iter().any(|user| {
            self.rules.contains(&DenyRule {
                user,
                object: object.clone(),
                field: field.clone(),
            })
        })
    }
}

impl AccessController for StaticAccessPolicy {
    fn can_access_object(&self, ctx: &QueryContext, object: &str) -> QueryResult<bool> {
        Ok(!self.denies(ctx, object, None))
    }

    fn can_access_field(&self, ctx: &QueryContext, object: &str, field: &str) -> QueryResult<bool> {
        Ok(!self.denies(ctx, object, None) && !self.denies(ctx, object, Some(field)))
    }
}
