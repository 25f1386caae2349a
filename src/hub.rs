//! Engine facade.
//!
//! A [`Hub`] owns the three process-wide collaborators (the entity
//! graph, the database client and the configuration) and exposes
//! the execution entry points. Each call validates and compiles its
//! request, runs the resulting builds concurrently and assembles the
//! response. On any error the whole request aborts; partial results
//! are never returned.

use crate::client::Client;
use crate::config::Config;
use crate::dsl::aggregate::OverallAggregate;
use crate::error::Result;
use crate::executor::{with_timeout, TaskGroup};
use crate::graph::Graph;
use crate::policy::PolicyContext;
use crate::query::group::execute_tx_groups;
use crate::query::{NamedQuery, QueryBundle, QueryGroup, TargetedQuery, TxQueryGroup};
use crate::response::{GroupResponse, MapSync, SearchResponse};
use crate::scalar::{schedule_scalar_groups, split_in_chunks};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct Hub {
    graph: Arc<Graph>,
    client: Arc<dyn Client>,
    config: Config,
}

impl Hub {
    pub fn new(graph: Graph, client: Arc<dyn Client>, config: Config) -> Self {
        debug!(
            nodes = graph.len(),
            dialect = config.dialect.name(),
            "query hub initialized"
        );
        Self {
            graph: Arc::new(graph),
            client,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute a full query bundle: validate and preprocess the
    /// tree, compile and classify every member, run the builds
    /// concurrently and stitch pagination.
    #[instrument(skip_all)]
    pub async fn execute(&self, bundle: QueryBundle) -> Result<GroupResponse> {
        with_timeout(self.config.request_timeout, async {
            let mut bundle = bundle;
            let (total_aggregates, total_searches) =
                bundle.validate_and_preprocess(&self.config)?;
            debug!(
                aggregates = total_aggregates,
                searches = total_searches,
                "bundle validated"
            );

            let ctx = PolicyContext::in_request();
            let builds = bundle.build_classified(&ctx, &self.config, &self.graph)?;
            builds.execute(Arc::clone(&self.client), &self.config).await
        })
        .await
    }

    /// Run one targeted search on its own.
    #[instrument(skip_all, fields(from = %query.from))]
    pub async fn execute_search(&self, query: TargetedQuery) -> Result<SearchResponse> {
        query
            .execute(self.client.as_ref(), &self.graph, &self.config)
            .await
    }

    /// Run a list of named searches concurrently, without aggregates.
    #[instrument(skip_all, fields(count = searches.len()))]
    pub async fn execute_searches(
        &self,
        searches: Vec<NamedQuery>,
    ) -> Result<HashMap<String, SearchResponse>> {
        let bundle = QueryBundle {
            group: QueryGroup {
                searches,
                aggregates: Vec::new(),
            },
            ..QueryBundle::default()
        };
        Ok(self.execute(bundle).await?.searches)
    }

    /// Run overall aggregates on their own, chunked into batched
    /// scalar selects.
    #[instrument(skip_all, fields(count = aggregates.len()))]
    pub async fn execute_overall_aggregates(
        &self,
        aggregates: Vec<OverallAggregate>,
    ) -> Result<HashMap<String, Value>> {
        with_timeout(self.config.request_timeout, async {
            let mut aggregates = aggregates;
            for aggregate in &mut aggregates {
                aggregate.validate_and_preprocess(&self.config)?;
            }
            self.config.check_max_aggregates(aggregates.len())?;
            if aggregates.is_empty() {
                return Ok(HashMap::new());
            }

            let ctx = PolicyContext::in_request();
            let mut scalars = Vec::with_capacity(aggregates.len());
            for aggregate in &aggregates {
                scalars.push(aggregate.build_scalar(&ctx, &self.graph)?);
            }

            let results: Arc<MapSync<Value>> = Arc::new(MapSync::with_capacity(scalars.len()));
            let mut tasks = TaskGroup::new(self.config.max_parallel_workers_per_request);
            let chunks = split_in_chunks(&scalars, self.config.scalar_queries_chunk_size);
            schedule_scalar_groups(
                &mut tasks,
                Arc::clone(&self.client),
                Arc::clone(&results),
                chunks,
            );
            tasks.wait().await?;

            Ok(match Arc::try_unwrap(results) {
                Ok(map) => map.into_inner(),
                Err(shared) => shared.snapshot(),
            })
        })
        .await
    }

    /// Run user-declared transactional groups on their own.
    #[instrument(skip_all, fields(count = groups.len()))]
    pub async fn execute_transaction_groups(
        &self,
        groups: Vec<TxQueryGroup>,
    ) -> Result<GroupResponse> {
        execute_tx_groups(groups, Arc::clone(&self.client), &self.graph, &self.config).await
    }
}
