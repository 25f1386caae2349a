use super::options::{QueryOptions, QueryOptionsBuild};
use crate::client::Client;
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::executor::with_timeout;
use crate::graph::Graph;
use crate::policy::PolicyContext;
use crate::response::SearchResponse;
use serde::Deserialize;

/// A search rooted at one graph node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetedQuery {
    pub from: String,
    #[serde(flatten)]
    pub options: QueryOptions,
}

impl TargetedQuery {
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<()> {
        self.options.validate_and_preprocess(cfg)
    }

    pub fn build(
        &self,
        ctx: &PolicyContext,
        cfg: &Config,
        graph: &Graph,
    ) -> Result<QueryOptionsBuild> {
        let node = graph.get(&self.from).ok_or_else(|| {
            ValidationError::new("UnknownRootNode", format!("node named {:?} not found", self.from))
        })?;
        self.options.build(ctx, cfg, node)
    }

    /// Standalone path: validate, build and run this one search.
    pub async fn execute<C: Client + ?Sized>(
        mut self,
        client: &C,
        graph: &Graph,
        cfg: &Config,
    ) -> Result<SearchResponse> {
        with_timeout(cfg.request_timeout, async {
            self.validate_and_preprocess(cfg)?;
            let ctx = PolicyContext::in_request();
            let build = self.build(&ctx, cfg, graph)?;
            let (data, count) = build.execute(client).await?;
            Ok(SearchResponse::new(data, count))
        })
        .await
    }
}

/// A keyed search inside a group. An empty key is auto-assigned
/// `search_{N}` from its bundle-wide position.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedQuery {
    #[serde(default)]
    pub key: String,
    #[serde(flatten)]
    pub query: TargetedQuery,
}

impl NamedQuery {
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<()> {
        self.query.validate_and_preprocess(cfg)
    }

    /// Compile, assigning the key from the bundle-wide sequence when
    /// none was supplied.
    pub fn build(
        &self,
        key_seq: &mut usize,
        ctx: &PolicyContext,
        cfg: &Config,
        graph: &Graph,
    ) -> Result<NamedQueryBuild> {
        *key_seq += 1;
        let key = if self.key.is_empty() {
            format!("search_{key_seq}")
        } else {
            self.key.clone()
        };
        let build = self.query.build(ctx, cfg, graph)?;
        Ok(NamedQueryBuild { key, build })
    }
}

/// Compiled named search, ready for classification.
#[derive(Debug, Clone)]
pub struct NamedQueryBuild {
    pub key: String,
    pub build: QueryOptionsBuild,
}

impl NamedQueryBuild {
    pub fn is_paginated(&self) -> bool {
        self.build.paginate.is_some()
    }

    /// Paginated searches coupled to a transaction are promoted to a
    /// singleton transactional group so the data and count queries
    /// share a snapshot.
    pub fn is_paginated_with_tx(&self) -> bool {
        self.is_paginated() && self.build.enable_transaction
    }

    /// Run the data query alone; pagination stitching happens later
    /// from the separately scheduled count scalar.
    pub async fn execute_search_only<C: Client + ?Sized>(
        &self,
        client: &C,
    ) -> Result<SearchResponse> {
        let (data, count) = self.build.execute(client).await?;
        Ok(SearchResponse::new(data, count))
    }
}
