use crate::client::{Client, IsolationLevel, Row};
use crate::config::Config;
use crate::dsl::aggregate::{self, Aggregate};
use crate::dsl::filter::{self, Filter};
use crate::dsl::include::{self, Include, IncludePlan};
use crate::dsl::pageable::Pageable;
use crate::dsl::select::Select;
use crate::dsl::sort::{self, Sort};
use crate::error::{Result, ValidationError};
use crate::graph::Node;
use crate::paginate::PaginateInfo;
use crate::policy::{enforce_policy, PolicyContext, QueryOp};
use crate::scalar::extract_row_aggregates;
use crate::selector::Selector;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// The per-search DSL surface: projection, filters, includes, sort,
/// per-row aggregates, pagination and transaction overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub select: Select,
    pub filters: Vec<Filter>,
    pub includes: Vec<Include>,
    pub sort: Vec<Sort>,
    pub aggregates: Vec<Aggregate>,
    pub with_pagination: bool,
    pub enable_transaction: Option<bool>,
    pub transaction_isolation_level: Option<i32>,
    #[serde(flatten)]
    pub pageable: Pageable,
}

impl QueryOptions {
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<()> {
        filter::validate_and_preprocess(&mut self.filters, &cfg.filter)?;
        include::validate_and_preprocess(&mut self.includes, &cfg.include)?;
        aggregate::validate_aggregates(&mut self.aggregates, &cfg.aggregate)?;
        sort::validate_and_preprocess(&mut self.sort, &cfg.sort)?;

        if self.transaction_isolation_level.is_some()
            && !cfg.transaction.allow_client_isolation_level
        {
            return Err(ValidationError::new(
                "TransactionClientIsolationLevelDisallow",
                "transaction_isolation_level parameter is not allowed",
            )
            .into());
        }

        self.pageable.sanitize(&cfg.pageable);
        Ok(())
    }

    /// Compile into an executable build. Build order: root policy,
    /// filters, the pagination count snapshot (policy + filters
    /// only), per-row aggregates, sort, pagination, projection and
    /// includes.
    pub fn build(
        &self,
        ctx: &PolicyContext,
        cfg: &Config,
        node: &Arc<Node>,
    ) -> Result<QueryOptionsBuild> {
        let policy_pred = enforce_policy(ctx, node, QueryOp::RootQuery)?;
        let filter_preds = filter::predicates(&self.filters, node)?;

        let paginate = if self.with_pagination {
            let mut count = Selector::new(node.table());
            count.select_fields(vec!["COUNT(*)".to_string()]);
            if let Some(pred) = enforce_policy(ctx, node, QueryOp::CountPaginate)? {
                pred(&mut count);
            }
            for pred in &filter_preds {
                pred(&mut count);
            }
            Some(PaginateInfo {
                count_selector: count,
                page: self.pageable.page,
                limit: self.pageable.limit.limit,
            })
        } else {
            None
        };

        let (agg_preds, agg_aliases) = aggregate::predicates(&self.aggregates, ctx, node)?;
        let sort_preds = sort::predicates(&self.sort, node)?;

        let mut selector = Selector::new(node.table());
        let base_alias = selector.from_alias().to_string();

        if let Some(columns) = self.select.resolve(node)? {
            let fields = columns
                .iter()
                .map(|c| format!("{base_alias}.{c}"))
                .collect();
            selector.select_fields(fields);
        } else if !agg_aliases.is_empty() {
            selector.append_expr(format!("{base_alias}.*"));
        }

        if let Some(pred) = &policy_pred {
            pred(&mut selector);
        }
        for pred in &agg_preds {
            pred(&mut selector);
        }
        for pred in &filter_preds {
            pred(&mut selector);
        }
        for pred in &sort_preds {
            pred(&mut selector);
        }
        self.pageable.predicate(true)(&mut selector);

        let includes = include::plans(&self.includes, ctx, node)?;

        Ok(QueryOptionsBuild {
            selector,
            agg_aliases,
            includes,
            paginate,
            enable_transaction: self
                .enable_transaction
                .unwrap_or(cfg.transaction.enable_paginate_query),
            isolation_level: self
                .transaction_isolation_level
                .map(IsolationLevel::from_level)
                .unwrap_or(cfg.transaction.isolation_level),
        })
    }
}

/// Compiled search: a fully built selector plus include plans and
/// aggregate metadata wiring, ready to run against any client.
#[derive(Debug, Clone)]
pub struct QueryOptionsBuild {
    pub selector: Selector,
    pub agg_aliases: Vec<String>,
    pub includes: Vec<IncludePlan>,
    pub paginate: Option<PaginateInfo>,
    pub enable_transaction: bool,
    pub isolation_level: IsolationLevel,
}

impl QueryOptionsBuild {
    /// Materialize the entities: run the selector, load includes,
    /// extract per-row aggregate metadata.
    pub async fn execute<C: Client + ?Sized>(&self, client: &C) -> Result<(Vec<Row>, usize)> {
        let sql = self.selector.build_sql();
        debug!(sql = %sql, "executing search");
        let mut rows = client.fetch_rows(&sql).await?;

        for plan in &self.includes {
            plan.load(client, &mut rows).await?;
        }

        if !self.agg_aliases.is_empty() {
            for row in &mut rows {
                extract_row_aggregates(row, &self.agg_aliases);
            }
        }

        let count = rows.len();
        Ok((rows, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::pageable::Limit;
    use crate::graph::{Graph, GraphBuilder, NodeDef};
    use serde_json::json;

    fn graph() -> Graph {
        GraphBuilder::new()
            .node(
                NodeDef::new("User", "users")
                    .field("id", "id")
                    .field("age", "age")
                    .field("name", "name")
                    .pk("id"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn build_order_produces_expected_sql() {
        let graph = graph();
        let node = graph.get("User").unwrap();
        let cfg = Config::default();
        let mut options = QueryOptions {
            filters: vec![Filter {
                field: "age".to_string(),
                operator: ">".to_string(),
                value: Some(json!(18)),
                ..Filter::default()
            }],
            sort: vec![Sort {
                field: "name".to_string(),
                direction: "DESC".to_string(),
                ..Sort::default()
            }],
            pageable: Pageable {
                page: 2,
                limit: Limit { limit: 10 },
            },
            ..QueryOptions::default()
        };
        options.validate_and_preprocess(&cfg).unwrap();
        let build = options
            .build(&PolicyContext::default(), &cfg, node)
            .unwrap();
        assert_eq!(
            build.selector.build_sql(),
            "SELECT t0.* FROM users AS t0 WHERE t0.age > 18 ORDER BY t0.name DESC \
             LIMIT 10 OFFSET 10"
        );
        assert!(build.paginate.is_none());
    }

    #[test]
    fn pagination_snapshots_count_with_filters_only() {
        let graph = graph();
        let node = graph.get("User").unwrap();
        let cfg = Config::default();
        let mut options = QueryOptions {
            with_pagination: true,
            filters: vec![Filter {
                field: "age".to_string(),
                operator: ">".to_string(),
                value: Some(json!(18)),
                ..Filter::default()
            }],
            sort: vec![Sort {
                field: "name".to_string(),
                ..Sort::default()
            }],
            ..QueryOptions::default()
        };
        options.validate_and_preprocess(&cfg).unwrap();
        let build = options
            .build(&PolicyContext::default(), &cfg, node)
            .unwrap();
        let paginate = build.paginate.expect("count selector");
        // no sort, limit or aggregates leak into the count snapshot
        assert_eq!(
            paginate.count_selector.build_sql(),
            "SELECT COUNT(*) FROM users AS t0 WHERE t0.age > 18"
        );
        assert_eq!(paginate.limit, 25);
        assert_eq!(paginate.page, 1);
    }

    #[test]
    fn transaction_overrides_fall_back_to_config() {
        let graph = graph();
        let node = graph.get("User").unwrap();
        let cfg = Config::default();

        let mut options = QueryOptions::default();
        options.validate_and_preprocess(&cfg).unwrap();
        let build = options.build(&PolicyContext::default(), &cfg, node).unwrap();
        assert!(build.enable_transaction);
        assert_eq!(build.isolation_level, IsolationLevel::Default);

        let mut options = QueryOptions {
            enable_transaction: Some(false),
            transaction_isolation_level: Some(6),
            ..QueryOptions::default()
        };
        options.validate_and_preprocess(&cfg).unwrap();
        let build = options.build(&PolicyContext::default(), &cfg, node).unwrap();
        assert!(!build.enable_transaction);
        assert_eq!(build.isolation_level, IsolationLevel::Serializable);
    }

    #[test]
    fn client_isolation_override_can_be_forbidden() {
        let mut cfg = Config::default();
        cfg.transaction.allow_client_isolation_level = false;
        let mut options = QueryOptions {
            transaction_isolation_level: Some(2),
            ..QueryOptions::default()
        };
        let err = options.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("TransactionClientIsolationLevelDisallow"));
    }
}
