//! Configuration for the query engine
//!
//! Settings live in a `soql.toml` file. A `.env` file next to it is loaded
//! first, then the following environment variables override file values:
//!
//! - `SOQL_MAX_LOOKUP_DEPTH`
//! - `SOQL_MAX_SELECT_FIELDS`
//! - `SOQL_MAX_SUBQUERIES`
//! - `SOQL_MAX_LIMIT`
//! - `SOQL_MAX_OFFSET`
//! - `SOQL_MAX_QUERY_LENGTH`
//! - `SOQL_MAX_EXPRESSION_DEPTH`
//! - `SOQL_DEFAULT_PAGE_SIZE`
//! - `SOQL_MAX_PAGE_SIZE`
//! - `SOQL_CACHE_MAX_ENTRIES`
//! - `SOQL_DEFAULT_TIMEZONE`

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "soql.toml";

pub const ENV_MAX_LOOKUP_DEPTH: &str = "SOQL_MAX_LOOKUP_DEPTH";
pub const ENV_MAX_SELECT_FIELDS: &str = "SOQL_MAX_SELECT_FIELDS";
pub const ENV_MAX_SUBQUERIES: &str = "SOQL_MAX_SUBQUERIES";
pub const ENV_MAX_LIMIT: &str = "SOQL_MAX_LIMIT";
pub const ENV_MAX_OFFSET: &str = "SOQL_MAX_OFFSET";
pub const ENV_MAX_QUERY_LENGTH: &str = "SOQL_MAX_QUERY_LENGTH";
pub const ENV_MAX_EXPRESSION_DEPTH: &str = "SOQL_MAX_EXPRESSION_DEPTH";
pub const ENV_DEFAULT_PAGE_SIZE: &str = "SOQL_DEFAULT_PAGE_SIZE";
pub const ENV_MAX_PAGE_SIZE: &str = "SOQL_MAX_PAGE_SIZE";
pub const ENV_CACHE_MAX_ENTRIES: &str = "SOQL_CACHE_MAX_ENTRIES";
pub const ENV_DEFAULT_TIMEZONE: &str = "SOQL_DEFAULT_TIMEZONE";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub cache: CacheConfig,
    /// IANA timezone used when a request does not carry its own
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

/// Structural limits applied during validation and compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_lookup_depth")]
    pub max_lookup_depth: usize,
    #[serde(default = "default_max_select_fields")]
    pub max_select_fields: usize,
    #[serde(default = "default_max_subqueries")]
    pub max_subqueries: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_max_offset")]
    pub max_offset: usize,
    /// Maximum query length in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    /// Nesting of parentheses, NOT, unary minus, function arguments and
    /// subqueries, plus the operands of AND/OR/arithmetic chains
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

/// Compiled-query cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_max_lookup_depth() -> usize {
    5
}

fn default_max_select_fields() -> usize {
    200
}

fn default_max_subqueries() -> usize {
    20
}

fn default_max_limit() -> usize {
    50_000
}

fn default_max_offset() -> usize {
    2_000
}

fn default_max_query_length() -> usize {
    100_000
}

fn default_max_expression_depth() -> usize {
    128
}

fn default_page_size() -> usize {
    200
}

fn default_max_page_size() -> usize {
    2_000
}

fn default_cache_entries() -> usize {
    1_000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            cache: CacheConfig::default(),
            default_timezone: default_timezone(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_lookup_depth: default_max_lookup_depth(),
            max_select_fields: default_max_select_fields(),
            max_subqueries: default_max_subqueries(),
            max_limit: default_max_limit(),
            max_offset: default_max_offset(),
            max_query_length: default_max_query_length(),
            max_expression_depth: default_max_expression_depth(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

impl QueryConfig {
    /// Load configuration from a directory containing `soql.toml`.
    ///
    /// A missing file yields the defaults; environment overrides still apply.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: QueryConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.limits.default_page_size == 0 {
            anyhow::bail!("limits.default_page_size must be greater than zero");
        }
        if self.limits.default_page_size > self.limits.max_page_size {
            anyhow::bail!(
                "limits.default_page_size ({}) exceeds limits.max_page_size ({})",
                self.limits.default_page_size,
                self.limits.max_page_size
            );
        }
        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!("Unknown timezone: {}", self.default_timezone);
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        let limits = &mut self.limits;
        override_usize(ENV_MAX_LOOKUP_DEPTH, &mut limits.max_lookup_depth);
        override_usize(ENV_MAX_SELECT_FIELDS, &mut limits.max_select_fields);
        override_usize(ENV_MAX_SUBQUERIES, &mut limits.max_subqueries);
        override_usize(ENV_MAX_LIMIT, &mut limits.max_limit);
        override_usize(ENV_MAX_OFFSET, &mut limits.max_offset);
        override_usize(ENV_MAX_QUERY_LENGTH, &mut limits.max_query_length);
        override_usize(ENV_MAX_EXPRESSION_DEPTH, &mut limits.max_expression_depth);
        override_usize(ENV_DEFAULT_PAGE_SIZE, &mut limits.default_page_size);
        override_usize(ENV_MAX_PAGE_SIZE, &mut limits.max_page_size);
        override_usize(ENV_CACHE_MAX_ENTRIES, &mut self.cache.max_entries);

        if let Ok(tz) = std::env::var(ENV_DEFAULT_TIMEZONE) {
            if !tz.is_empty() {
                self.default_timezone = tz;
            }
        }
    }
}

fn override_usize(var: &str, target: &mut usize) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<usize>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("[SOQL] Ignoring {}={:?}: not a number", var, raw),
        }
    }
}
