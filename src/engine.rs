//! Query engine: parse, validate and compile behind a cache.

use std::sync::Arc;

use chrono_tz::Tz;

use crate::access::{AccessController, QueryContext};
use crate::cache::QueryCache;
use crate::config::{Limits, QueryConfig};
use crate::error::{CursorError, LimitError, LimitKind, QueryError, QueryResult};
use crate::metadata::MetadataProvider;
use crate::pagination::{CursorCodec, Page, SecretProvider};
use crate::soql::dates::{CalendarDateResolver, DateResolver};
use crate::soql::{compile, parse_with_limits, CompiledQuery, PagedStatement, Row, Validator};

/// Entry point for callers: owns the collaborators and the compiled-query cache.
pub struct QueryEngine {
    metadata: Arc<dyn MetadataProvider>,
    access: Arc<dyn AccessController>,
    dates: Arc<dyn DateResolver>,
    cursors: Option<CursorCodec>,
    limits: Limits,
    default_timezone: Tz,
    cache: QueryCache,
}

impl QueryEngine {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        access: Arc<dyn AccessController>,
        config: &QueryConfig,
    ) -> Self {
        let default_timezone = config.default_timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "[SOQL] Unknown default timezone {}, using UTC",
                config.default_timezone
            );
            Tz::UTC
        });

        Self {
            metadata,
            access,
            dates: Arc::new(CalendarDateResolver::new()),
            cursors: None,
            limits: config.limits.clone(),
            default_timezone,
            cache: QueryCache::from_config(&config.cache),
        }
    }

    pub fn with_date_resolver(mut self, dates: Arc<dyn DateResolver>) -> Self {
        self.dates = dates;
        self
    }

    /// Enable cursor pagination with the given signing key source.
    pub fn with_cursor_secret(mut self, secret: Arc<dyn SecretProvider>) -> Self {
        self.cursors = Some(CursorCodec::new(secret));
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Request context in the configured default timezone.
    pub fn context(&self, user_id: impl Into<String>) -> QueryContext {
        QueryContext::new(user_id).with_timezone(self.default_timezone)
    }

    /// Parse, validate and compile `text`, reusing a cached compilation for
    /// the same user and text. Date macros are left unresolved.
    pub fn prepare(&self, ctx: &QueryContext, text: &str) -> QueryResult<Arc<CompiledQuery>> {
        LimitError::check(
            LimitKind::StatementLength,
            self.limits.max_query_length,
            text.chars().count(),
        )?;

        let key = QueryCache::key(&ctx.user_id, text);
        if let Some(compiled) = self.cache.get(&key) {
            tracing::debug!("[SOQL cache] Hit for user {}", ctx.user_id);
            return Ok(compiled);
        }
        tracing::debug!("[SOQL cache] Miss for user {}", ctx.user_id);

        let query = parse_with_limits(text, &self.limits)?;
        let validated = Validator::new(
            self.metadata.as_ref(),
            self.access.as_ref(),
            ctx,
            &self.limits,
        )
        .validate(query)?;
        let compiled = Arc::new(compile(&validated)?);

        self.cache.set(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// [`prepare`](Self::prepare) followed by date-macro resolution for `ctx`.
    pub fn prepare_and_resolve(&self, ctx: &QueryContext, text: &str) -> QueryResult<CompiledQuery> {
        let mut compiled = (*self.prepare(ctx, text)?).clone();
        compiled.resolve_dates(self.dates.as_ref(), ctx)?;
        Ok(compiled)
    }

    /// Statement for the page after `cursor`.
    pub fn resume(&self, ctx: &QueryContext, compiled: &CompiledQuery, cursor: &str) -> QueryResult<PagedStatement> {
        let info = compiled
            .pagination
            .as_ref()
            .ok_or(CursorError::NotPaginated)?;
        let state = self.codec()?.decode(cursor, info, ctx)?;
        compiled.resume(&state)
    }

    /// Trim the lookahead row of the first page and mint the next cursor.
    pub fn finish_page(&self, ctx: &QueryContext, compiled: &CompiledQuery, rows: Vec<Row>) -> QueryResult<Page> {
        self.finish_from(ctx, compiled, 0, rows)
    }

    /// Same as [`finish_page`](Self::finish_page) for rows fetched with a
    /// statement from [`resume`](Self::resume).
    pub fn finish_page_after(
        &self,
        ctx: &QueryContext,
        compiled: &CompiledQuery,
        statement: &PagedStatement,
        rows: Vec<Row>,
    ) -> QueryResult<Page> {
        self.finish_from(ctx, compiled, statement.returned, rows)
    }

    fn finish_from(&self, ctx: &QueryContext, compiled: &CompiledQuery, returned: usize, rows: Vec<Row>) -> QueryResult<Page> {
        match &compiled.pagination {
            Some(info) => info.finish_page(rows, returned, self.codec()?, ctx),
            None => Ok(Page {
                rows,
                next_cursor: None,
                done: true,
            }),
        }
    }

    /// Drop cached queries touching `api_name` after a schema change.
    pub fn invalidate_object(&self, api_name: &str) -> usize {
        self.cache.invalidate_object(api_name)
    }

    fn codec(&self) -> QueryResult<&CursorCodec> {
        self.cursors
            .as_ref()
            .ok_or_else(|| QueryError::Provider("no cursor secret configured".to_string()))
    }
}
