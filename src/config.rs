use crate::client::IsolationLevel;
use crate::error::{Result, ValidationError};
use std::time::Duration;

/// SQL dialect identifier handed to the selector builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }
}

/// Per-page clamps applied by `Pageable::sanitize`.
#[derive(Debug, Clone)]
pub struct PageableConfig {
    /// Maximum number of items allowed per page.
    pub max_limit: i64,
    /// Default number of items per page if none is specified.
    pub default_limit: i64,
}

impl Default for PageableConfig {
    fn default() -> Self {
        Self {
            max_limit: 100,
            default_limit: 25,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SortConfig {
    /// Maximum allowed nesting depth for sorting fields
    /// (number of relationship hops + field segments).
    pub max_sort_relations_depth: usize,
}

/// Limits on filtering expressions. A zero value disables the cap.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Maximum number of Filter nodes allowed in a single filter tree.
    pub max_filter_tree_count: usize,
    /// Maximum depth allowed per filter, counting both relation
    /// segments and field segments.
    pub max_relation_chain_depth: usize,
    /// Total number of relation segments permitted across the
    /// entire filter tree.
    pub max_relation_total_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateConfig {
    /// Maximum depth (field chain segments) allowed for an
    /// aggregate's target field.
    pub max_aggregate_relations_depth: usize,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Default)]
pub struct IncludeConfig {
    /// Total number of Include nodes allowed in one include tree.
    pub max_include_tree_count: usize,
    /// Maximum depth of the relation chain accumulated across
    /// nested Includes.
    pub max_include_relations_depth: usize,
    pub filter: FilterConfig,
    pub aggregate: AggregateConfig,
    pub pageable: PageableConfig,
}

/// Transaction policy for the bundle executor.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Default isolation level for transactional groups.
    pub isolation_level: IsolationLevel,
    /// Couple paginated searches with a transaction by default, so
    /// the data query and its count query share a snapshot.
    pub enable_paginate_query: bool,
    /// Accept a per-request isolation level override.
    pub allow_client_isolation_level: bool,
    /// Accept user-declared transactional groups in the bundle.
    pub enable_client_groups_input: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::Default,
            enable_paginate_query: true,
            allow_client_isolation_level: true,
            enable_client_groups_input: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dialect: Dialect,
    /// Upper bound on one `execute` call. `None` disables the bound.
    pub request_timeout: Option<Duration>,
    /// Maximum scalar subqueries batched into one SELECT.
    pub scalar_queries_chunk_size: usize,
    /// Concurrency cap for the per-request task group. Zero means
    /// unbounded.
    pub max_parallel_workers_per_request: usize,
    /// Hard caps across the whole bundle. Zero disables the cap.
    pub max_aggregates_per_request: usize,
    pub max_searches_per_request: usize,
    pub transaction: TransactionConfig,
    pub pageable: PageableConfig,
    pub sort: SortConfig,
    pub filter: FilterConfig,
    pub include: IncludeConfig,
    pub aggregate: AggregateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            request_timeout: None,
            scalar_queries_chunk_size: 5,
            max_parallel_workers_per_request: 0,
            max_aggregates_per_request: 0,
            max_searches_per_request: 0,
            transaction: TransactionConfig::default(),
            pageable: PageableConfig::default(),
            sort: SortConfig::default(),
            filter: FilterConfig::default(),
            include: IncludeConfig::default(),
            aggregate: AggregateConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("QUERYHUB_REQUEST_TIMEOUT_MS") {
            let ms: u64 = raw.parse().map_err(|e| {
                ValidationError::new("ConfigEnv", format!("invalid request timeout: {e}"))
            })?;
            config.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Ok(raw) = std::env::var("QUERYHUB_SCALAR_CHUNK_SIZE") {
            config.scalar_queries_chunk_size = raw.parse().map_err(|e| {
                ValidationError::new("ConfigEnv", format!("invalid scalar chunk size: {e}"))
            })?;
        }

        if let Ok(raw) = std::env::var("QUERYHUB_MAX_PARALLEL_WORKERS") {
            config.max_parallel_workers_per_request = raw.parse().map_err(|e| {
                ValidationError::new("ConfigEnv", format!("invalid worker limit: {e}"))
            })?;
        }

        Ok(config)
    }

    pub fn check_max_aggregates(&self, count: usize) -> Result<()> {
        if self.max_aggregates_per_request != 0 && count > self.max_aggregates_per_request {
            return Err(ValidationError::new(
                "MaxAggregatesPerBundle",
                format!(
                    "found {count} aggregates in bundle, but the maximum allowed is {}",
                    self.max_aggregates_per_request
                ),
            )
            .into());
        }
        Ok(())
    }

    pub fn check_max_searches(&self, count: usize) -> Result<()> {
        if self.max_searches_per_request != 0 && count > self.max_searches_per_request {
            return Err(ValidationError::new(
                "MaxSearchesPerBundle",
                format!(
                    "found {count} searches in bundle, but the maximum allowed is {}",
                    self.max_searches_per_request
                ),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_least_restrictive_profile() {
        let config = Config::default();
        assert_eq!(config.pageable.max_limit, 100);
        assert_eq!(config.pageable.default_limit, 25);
        assert_eq!(config.scalar_queries_chunk_size, 5);
        assert_eq!(config.max_parallel_workers_per_request, 0);
        assert!(config.transaction.enable_paginate_query);
        assert!(!config.transaction.enable_client_groups_input);
    }

    #[test]
    fn bundle_caps_disabled_at_zero() {
        let config = Config::default();
        assert!(config.check_max_aggregates(10_000).is_ok());
        assert!(config.check_max_searches(10_000).is_ok());
    }

    #[test]
    fn bundle_caps_enforced() {
        let config = Config {
            max_aggregates_per_request: 2,
            max_searches_per_request: 1,
            ..Config::default()
        };
        let err = config.check_max_aggregates(3).unwrap_err();
        assert_eq!(err.rule(), Some("MaxAggregatesPerBundle"));
        let err = config.check_max_searches(2).unwrap_err();
        assert_eq!(err.rule(), Some("MaxSearchesPerBundle"));
    }
}
