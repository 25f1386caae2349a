use super::named::{NamedQuery, NamedQueryBuild};
use super::transaction::TxQueryGroupBuild;
use crate::client::{Client, IsolationLevel};
use crate::config::Config;
use crate::dsl::aggregate::OverallAggregate;
use crate::error::{Result, ValidationError};
use crate::executor::{with_timeout, TaskGroup};
use crate::graph::Graph;
use crate::policy::PolicyContext;
use crate::response::{GroupResponse, GroupResponseSync};
use crate::scalar::ScalarQuery;
use serde::Deserialize;
use std::sync::Arc;

/// Ordered searches plus overall aggregates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryGroup {
    pub searches: Vec<NamedQuery>,
    pub aggregates: Vec<OverallAggregate>,
}

/// Compiled group: named search builds plus aggregate scalars.
#[derive(Debug, Clone, Default)]
pub struct QueryGroupBuild {
    pub searches: Vec<NamedQueryBuild>,
    pub aggregates: Vec<ScalarQuery>,
}

impl QueryGroup {
    /// Validate both halves, returning (aggregates, searches) counts
    /// for the bundle totals.
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<(usize, usize)> {
        if cfg.max_aggregates_per_request != 0 && self.aggregates.len() > cfg.max_aggregates_per_request
        {
            return Err(ValidationError::new(
                "MaxAggregatesPerRequest",
                format!(
                    "found {} aggregates, but the maximum allowed is {}",
                    self.aggregates.len(),
                    cfg.max_aggregates_per_request
                ),
            )
            .into());
        }
        if cfg.max_searches_per_request != 0 && self.searches.len() > cfg.max_searches_per_request {
            return Err(ValidationError::new(
                "MaxSearchesPerRequest",
                format!(
                    "found {} searches, but the maximum allowed is {}",
                    self.searches.len(),
                    cfg.max_searches_per_request
                ),
            )
            .into());
        }

        for aggregate in &mut self.aggregates {
            aggregate.validate_and_preprocess(cfg)?;
        }
        for search in &mut self.searches {
            search.validate_and_preprocess(cfg)?;
        }
        Ok((self.aggregates.len(), self.searches.len()))
    }

    pub fn build(
        &self,
        key_seq: &mut usize,
        ctx: &PolicyContext,
        cfg: &Config,
        graph: &Graph,
    ) -> Result<QueryGroupBuild> {
        let mut build = QueryGroupBuild {
            searches: Vec::with_capacity(self.searches.len()),
            aggregates: Vec::with_capacity(self.aggregates.len()),
        };
        for search in &self.searches {
            build.searches.push(search.build(key_seq, ctx, cfg, graph)?);
        }
        for aggregate in &self.aggregates {
            build.aggregates.push(aggregate.build_scalar(ctx, graph)?);
        }
        Ok(build)
    }
}

/// A user-declared atomic bundle: searches and aggregates that must
/// share one read-only transaction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TxQueryGroup {
    pub transaction_isolation_level: Option<i32>,
    #[serde(flatten)]
    pub group: QueryGroup,
}

impl TxQueryGroup {
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<(usize, usize)> {
        if self.group.searches.len() + self.group.aggregates.len() <= 1 {
            return Err(ValidationError::new(
                "TransactionUnnecessary",
                "transaction with a single search or one aggregate is unnecessary",
            )
            .into());
        }
        if self.transaction_isolation_level.is_some()
            && !cfg.transaction.allow_client_isolation_level
        {
            return Err(ValidationError::new(
                "TransactionClientIsolationLevelDisallow",
                "transaction_isolation_level parameter is not allowed",
            )
            .into());
        }
        self.group.validate_and_preprocess(cfg)
    }

    /// Resolve the group isolation level and compile its members.
    /// Searches absorbed here run at the group's level; their own
    /// overrides apply only when they execute standalone.
    pub fn build(
        &self,
        key_seq: &mut usize,
        ctx: &PolicyContext,
        cfg: &Config,
        graph: &Graph,
    ) -> Result<TxQueryGroupBuild> {
        let isolation_level = self
            .transaction_isolation_level
            .map(IsolationLevel::from_level)
            .unwrap_or(cfg.transaction.isolation_level);
        let group = self.group.build(key_seq, ctx, cfg, graph)?;
        Ok(TxQueryGroupBuild {
            isolation_level,
            searches: group.searches,
            aggregates: group.aggregates,
        })
    }
}

/// Standalone path: validate, build and run a set of transactional
/// groups concurrently, merging their responses.
pub async fn execute_tx_groups(
    groups: Vec<TxQueryGroup>,
    client: Arc<dyn Client>,
    graph: &Graph,
    cfg: &Config,
) -> Result<GroupResponse> {
    with_timeout(cfg.request_timeout, async {
        let mut groups = groups;
        let mut total_searches = 0;
        let mut total_aggregates = 0;
        for group in &mut groups {
            let (aggregates, searches) = group.validate_and_preprocess(cfg)?;
            total_aggregates += aggregates;
            total_searches += searches;
        }
        cfg.check_max_aggregates(total_aggregates)?;
        cfg.check_max_searches(total_searches)?;

        let ctx = PolicyContext::in_request();
        let mut key_seq = 0;
        let mut builds = Vec::with_capacity(groups.len());
        for group in &groups {
            builds.push(Arc::new(group.build(&mut key_seq, &ctx, cfg, graph)?));
        }

        let response = Arc::new(GroupResponseSync::with_capacity(
            total_searches,
            total_aggregates,
        ));
        let mut tasks = TaskGroup::new(cfg.max_parallel_workers_per_request);
        let chunk_size = cfg.scalar_queries_chunk_size;

        for build in builds {
            let client = Arc::clone(&client);
            let response = Arc::clone(&response);
            tasks.spawn(async move {
                let group_response = build.execute(client.as_ref(), chunk_size).await?;
                response.searches.merge(group_response.searches);
                if let Some(meta) = group_response.meta {
                    response.aggregates.merge(meta.aggregates);
                }
                Ok(())
            });
        }
        tasks.wait().await?;

        // all writers joined, so the collector is uniquely held
        Ok(match Arc::try_unwrap(response) {
            Ok(sync) => sync.into_response(),
            Err(shared) => shared.snapshot_response(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::named::TargetedQuery;
    use crate::query::options::QueryOptions;

    fn search(from: &str) -> NamedQuery {
        NamedQuery {
            key: String::new(),
            query: TargetedQuery {
                from: from.to_string(),
                options: QueryOptions::default(),
            },
        }
    }

    #[test]
    fn transaction_size_gate() {
        let cfg = Config::default();

        let mut group = TxQueryGroup::default();
        let err = group.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("TransactionUnnecessary"));

        let mut group = TxQueryGroup {
            group: QueryGroup {
                searches: vec![search("User")],
                aggregates: vec![],
            },
            ..TxQueryGroup::default()
        };
        let err = group.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("TransactionUnnecessary"));

        let mut group = TxQueryGroup {
            group: QueryGroup {
                searches: vec![search("User"), search("User")],
                aggregates: vec![],
            },
            ..TxQueryGroup::default()
        };
        assert!(group.validate_and_preprocess(&cfg).is_ok());
    }

    #[test]
    fn group_isolation_override_gate() {
        let mut cfg = Config::default();
        cfg.transaction.allow_client_isolation_level = false;
        let mut group = TxQueryGroup {
            transaction_isolation_level: Some(4),
            group: QueryGroup {
                searches: vec![search("User"), search("User")],
                aggregates: vec![],
            },
        };
        let err = group.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("TransactionClientIsolationLevelDisallow"));
    }

    #[test]
    fn per_group_caps() {
        let cfg = Config {
            max_searches_per_request: 1,
            ..Config::default()
        };
        let mut group = QueryGroup {
            searches: vec![search("User"), search("User")],
            aggregates: vec![],
        };
        let err = group.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("MaxSearchesPerRequest"));
    }
}
