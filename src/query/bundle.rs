use super::group::{QueryGroup, TxQueryGroup};
use super::named::NamedQueryBuild;
use super::transaction::TxQueryGroupBuild;
use crate::client::Client;
use crate::config::Config;
use crate::dsl::aggregate::OverallAggregate;
use crate::error::{ExecError, Result, ValidationError};
use crate::graph::Graph;
use crate::paginate::PaginateInfo;
use crate::policy::PolicyContext;
use crate::response::{GroupResponse, MapSync, MetaResponse, SearchResponse};
use crate::scalar::{schedule_scalar_groups, split_in_chunks, ScalarQuery};
use crate::executor::TaskGroup;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The full request: user-declared transactional groups, forced
/// parallel aggregate groups, and the main group of searches and
/// overall aggregates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryBundle {
    pub transactions: Vec<TxQueryGroup>,
    #[serde(rename = "parallel_aggregates_groups")]
    pub parallel_groups: Vec<Vec<OverallAggregate>>,
    #[serde(flatten)]
    pub group: QueryGroup,
}

impl QueryBundle {
    /// Walk the whole bundle: validate every member and return the
    /// bundle-wide (aggregates, searches) totals.
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<(usize, usize)> {
        if !self.transactions.is_empty() && !cfg.transaction.enable_client_groups_input {
            return Err(ValidationError::new(
                "TransactionGroupsInputDisable",
                "transactions groups usage is not allowed",
            )
            .into());
        }

        let (mut total_aggregates, mut total_searches) =
            self.group.validate_and_preprocess(cfg)?;

        for tx in &mut self.transactions {
            let (aggregates, searches) = tx.validate_and_preprocess(cfg)?;
            total_aggregates += aggregates;
            total_searches += searches;
        }

        for group in &mut self.parallel_groups {
            for aggregate in group.iter_mut() {
                aggregate.validate_and_preprocess(cfg)?;
                total_aggregates += 1;
            }
        }

        cfg.check_max_aggregates(total_aggregates)?;
        cfg.check_max_searches(total_searches)?;

        Ok((total_aggregates, total_searches))
    }

    /// Compile and classify every member by execution mode.
    pub fn build_classified(
        &self,
        ctx: &PolicyContext,
        cfg: &Config,
        graph: &Graph,
    ) -> Result<ClassifiedBuilds> {
        let mut key_seq = 0;
        let mut builds = ClassifiedBuilds::default();

        let group = self.group.build(&mut key_seq, ctx, cfg, graph)?;
        for search in group.searches {
            if search.is_paginated_with_tx() {
                builds.transactions.push(TxQueryGroupBuild::singleton(search));
            } else {
                builds.searches.push(search);
            }
        }
        builds.aggregates = group.aggregates;

        for tx in &self.transactions {
            builds
                .transactions
                .push(tx.build(&mut key_seq, ctx, cfg, graph)?);
        }

        for group in &self.parallel_groups {
            let mut scalars = Vec::with_capacity(group.len());
            for aggregate in group {
                scalars.push(aggregate.build_scalar(ctx, graph)?);
            }
            builds.grouped_aggregates.push(scalars);
        }

        Ok(builds)
    }
}

/// Builds organized by execution mode, ready to schedule.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBuilds {
    pub transactions: Vec<TxQueryGroupBuild>,
    pub searches: Vec<NamedQueryBuild>,
    pub aggregates: Vec<ScalarQuery>,
    pub grouped_aggregates: Vec<Vec<ScalarQuery>>,
}

struct BuildSizes {
    searches: usize,
    paginated: usize,
    scalars: usize,
}

impl ClassifiedBuilds {
    fn sizes(&self) -> BuildSizes {
        let mut searches = self.searches.len();
        for tx in &self.transactions {
            searches += tx.searches.len();
        }
        let paginated = self.searches.iter().filter(|s| s.is_paginated()).count();
        let grouped: usize = self.grouped_aggregates.iter().map(Vec::len).sum();
        BuildSizes {
            searches,
            paginated,
            scalars: paginated + self.aggregates.len() + grouped,
        }
    }

    /// Execute everything on a bounded task group: one task per
    /// standalone search, one per scalar chunk, one per forced
    /// parallel group, one per transactional group. Pagination for
    /// standalone searches is stitched after the group joins.
    pub async fn execute(self, client: Arc<dyn Client>, cfg: &Config) -> Result<GroupResponse> {
        let sizes = self.sizes();
        debug!(
            searches = sizes.searches,
            paginated = sizes.paginated,
            scalars = sizes.scalars,
            transactions = self.transactions.len(),
            "executing classified builds"
        );

        let searches_sync: Arc<MapSync<SearchResponse>> =
            Arc::new(MapSync::with_capacity(sizes.searches));
        let aggregates_sync: Arc<MapSync<Value>> =
            Arc::new(MapSync::with_capacity(sizes.scalars));
        let mut tasks = TaskGroup::new(cfg.max_parallel_workers_per_request);

        // standalone searches, remembering each pagination snapshot;
        // the count scalar shares the search key
        let mut paginations: HashMap<String, PaginateInfo> =
            HashMap::with_capacity(sizes.paginated);
        let mut flat_scalars: Vec<ScalarQuery> =
            Vec::with_capacity(sizes.paginated + self.aggregates.len());

        for search in self.searches {
            if let Some(paginate) = &search.build.paginate {
                flat_scalars.push(paginate.to_scalar_query(&search.key));
                paginations.insert(search.key.clone(), paginate.clone());
            }
            let client = Arc::clone(&client);
            let searches_sync = Arc::clone(&searches_sync);
            let search = Arc::new(search);
            tasks.spawn(async move {
                let result = search.execute_search_only(client.as_ref()).await?;
                searches_sync.set(search.key.clone(), result);
                Ok(())
            });
        }

        // the flat pool (pagination counts + ungrouped aggregates) is
        // chunked by size; user-declared parallel groups are always
        // their own batch, never mixed into the chunks
        flat_scalars.extend(self.aggregates);
        let mut scalar_groups = split_in_chunks(&flat_scalars, cfg.scalar_queries_chunk_size);
        scalar_groups.extend(self.grouped_aggregates);
        schedule_scalar_groups(
            &mut tasks,
            Arc::clone(&client),
            Arc::clone(&aggregates_sync),
            scalar_groups,
        );

        let chunk_size = cfg.scalar_queries_chunk_size;
        for tx in self.transactions {
            let client = Arc::clone(&client);
            let searches_sync = Arc::clone(&searches_sync);
            let aggregates_sync = Arc::clone(&aggregates_sync);
            let tx = Arc::new(tx);
            tasks.spawn(async move {
                let group_response = tx.execute(client.as_ref(), chunk_size).await?;
                searches_sync.merge(group_response.searches);
                if let Some(meta) = group_response.meta {
                    aggregates_sync.merge(meta.aggregates);
                }
                Ok(())
            });
        }

        tasks.wait().await?;

        attach_pagination(&searches_sync, &aggregates_sync, &paginations)?;

        // all writers joined, so both collectors are uniquely held
        let searches = match Arc::try_unwrap(searches_sync) {
            Ok(map) => map.into_inner(),
            Err(shared) => shared.snapshot(),
        };
        let aggregates = match Arc::try_unwrap(aggregates_sync) {
            Ok(map) => map.into_inner(),
            Err(shared) => shared.snapshot(),
        };
        Ok(GroupResponse {
            searches,
            meta: if aggregates.is_empty() {
                None
            } else {
                Some(MetaResponse { aggregates })
            },
        })
    }
}

/// Read each pagination count from the aggregates map, compute the
/// window, attach it to the matching search response and drop the
/// count entry.
fn attach_pagination(
    searches: &MapSync<SearchResponse>,
    aggregates: &MapSync<Value>,
    paginations: &HashMap<String, PaginateInfo>,
) -> Result<()> {
    for (key, paginate) in paginations {
        let raw = aggregates.remove(key).ok_or_else(|| {
            ExecError::message(
                "attach_pagination",
                format!("missing paginate count for {key:?}"),
            )
        })?;
        let total = match &raw {
            Value::Number(n) => n.as_i64(),
            Value::Null => Some(0),
            _ => None,
        }
        .ok_or_else(|| {
            ExecError::message(
                "attach_pagination",
                format!("paginate count wrong type for {key:?}: {raw}"),
            )
        })?;

        let attached = searches.update(key, |search| {
            search.meta.paginate = Some(paginate.calculate(total, search.meta.count as i64));
        });
        if !attached {
            return Err(ExecError::message(
                "attach_pagination",
                format!("search response not found for paginate on key {key:?}"),
            )
            .into());
        }
    }
    Ok(())
}
