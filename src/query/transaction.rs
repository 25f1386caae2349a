use super::named::NamedQueryBuild;
use crate::client::{Client, ClientTransaction, IsolationLevel, TxOptions};
use crate::error::{ExecError, Result};
use crate::paginate::PaginateInfo;
use crate::response::{GroupResponse, MetaResponse, SearchResponse};
use crate::scalar::{execute_scalars, split_in_chunks, ScalarQuery};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// A compiled transactional group: searches plus aggregate scalars
/// that must share one read-only transaction.
#[derive(Debug, Clone)]
pub struct TxQueryGroupBuild {
    pub isolation_level: IsolationLevel,
    pub searches: Vec<NamedQueryBuild>,
    pub aggregates: Vec<ScalarQuery>,
}

impl TxQueryGroupBuild {
    /// Promote a single paginated search into its own group.
    pub fn singleton(search: NamedQueryBuild) -> Self {
        Self {
            isolation_level: search.build.isolation_level,
            searches: vec![search],
            aggregates: Vec::new(),
        }
    }

    /// Execute the group inside one read-only transaction: searches
    /// and scalar chunks run sequentially in declaration order, the
    /// transaction commits, then pagination is stitched locally. On
    /// any error the transaction is rolled back; a panic unwinds
    /// through the drop of the uncommitted transaction, which rolls
    /// it back as well.
    pub async fn execute<C: Client + ?Sized>(
        &self,
        client: &C,
        scalar_chunk_size: usize,
    ) -> Result<GroupResponse> {
        let (scalars, paginations) = self.prepare_scalars();

        debug!(
            searches = self.searches.len(),
            scalars = scalars.len(),
            isolation = ?self.isolation_level,
            "executing transactional group"
        );

        let tx = client
            .begin(TxOptions::read_only(self.isolation_level))
            .await?;

        let mut response = match self.run_in_tx(tx.as_ref(), &scalars, scalar_chunk_size).await {
            Ok(response) => {
                tx.commit().await?;
                response
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    return Err(ExecError::message(
                        "TxQueryGroup.execute",
                        format!("{err}: rolling back transaction: {rollback_err}"),
                    )
                    .into());
                }
                return Err(err);
            }
        };

        self.attach_pagination(&mut response, &paginations)?;
        Ok(response)
    }

    async fn run_in_tx(
        &self,
        tx: &dyn ClientTransaction,
        scalars: &[ScalarQuery],
        scalar_chunk_size: usize,
    ) -> Result<GroupResponse> {
        let client: &dyn Client = tx;

        let mut searches = HashMap::with_capacity(self.searches.len());
        for search in &self.searches {
            let (data, count) = search.build.execute(client).await?;
            searches.insert(search.key.clone(), SearchResponse::new(data, count));
        }

        let mut aggregates = HashMap::with_capacity(scalars.len());
        for chunk in split_in_chunks(scalars, scalar_chunk_size) {
            aggregates.extend(execute_scalars(client, &chunk).await?);
        }

        Ok(GroupResponse {
            searches,
            meta: if aggregates.is_empty() {
                None
            } else {
                Some(MetaResponse { aggregates })
            },
        })
    }

    /// Pagination counts of this group's searches plus its own
    /// aggregate scalars, all executed inside the transaction.
    fn prepare_scalars(&self) -> (Vec<ScalarQuery>, HashMap<String, PaginateInfo>) {
        let mut paginations = HashMap::new();
        let mut scalars = Vec::with_capacity(self.aggregates.len() + self.searches.len());
        for search in &self.searches {
            if let Some(paginate) = &search.build.paginate {
                scalars.push(paginate.to_scalar_query(&search.key));
                paginations.insert(search.key.clone(), paginate.clone());
            }
        }
        scalars.extend(self.aggregates.iter().cloned());
        (scalars, paginations)
    }

    fn attach_pagination(
        &self,
        response: &mut GroupResponse,
        paginations: &HashMap<String, PaginateInfo>,
    ) -> Result<()> {
        for (key, paginate) in paginations {
            let meta = response.meta.as_mut().ok_or_else(|| {
                ExecError::message(
                    "TxQueryGroup.attach_pagination",
                    format!("missing paginate count for {key:?}"),
                )
            })?;
            let raw = meta.aggregates.remove(key).ok_or_else(|| {
                ExecError::message(
                    "TxQueryGroup.attach_pagination",
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
                    "TxQueryGroup.attach_pagination",
                    format!("paginate count wrong type for {key:?}: {raw}"),
                )
            })?;
            let search = response.searches.get_mut(key).ok_or_else(|| {
                ExecError::message(
                    "TxQueryGroup.attach_pagination",
                    format!("search response not found for paginate on key {key:?}"),
                )
            })?;
            search.meta.paginate = Some(paginate.calculate(total, search.meta.count as i64));
        }

        if let Some(meta) = &response.meta {
            if meta.aggregates.is_empty() {
                response.meta = None;
            }
        }
        Ok(())
    }
}
