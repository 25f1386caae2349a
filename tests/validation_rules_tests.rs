//! Request-level validation: configured caps and gates surface as
//! stable rule identifiers before any I/O happens.

mod common;

use common::{config, graph, MockClient};
use queryhub::dsl::aggregate::{Aggregate, BaseAggregate, OverallAggregate};
use queryhub::dsl::filter::Filter;
use queryhub::dsl::include::Include;
use queryhub::dsl::sort::Sort;
use queryhub::query::options::QueryOptions;
use queryhub::query::{NamedQuery, QueryBundle, QueryGroup, TargetedQuery, TxQueryGroup};
use queryhub::Hub;
use serde_json::json;

fn search(from: &str, options: QueryOptions) -> NamedQuery {
    NamedQuery {
        key: String::new(),
        query: TargetedQuery {
            from: from.to_string(),
            options,
        },
    }
}

fn overall(field: &str, alias: &str) -> OverallAggregate {
    OverallAggregate {
        base: BaseAggregate {
            field: field.to_string(),
            agg: "count".to_string(),
            alias: alias.to_string(),
            ..BaseAggregate::default()
        },
    }
}

fn single_search_bundle(options: QueryOptions) -> QueryBundle {
    QueryBundle {
        group: QueryGroup {
            searches: vec![search("User", options)],
            aggregates: vec![],
        },
        ..QueryBundle::default()
    }
}

async fn expect_rule(bundle: QueryBundle, cfg: queryhub::Config, rule: &str) {
    let client = MockClient::empty();
    let hub = Hub::new(graph(), client.clone(), cfg);
    let err = hub.execute(bundle).await.unwrap_err();
    assert_eq!(err.rule(), Some(rule), "unexpected error: {err}");
    assert!(client.queries().is_empty(), "validation must precede I/O");
}

#[tokio::test]
async fn filter_tree_count_cap() {
    let mut cfg = config();
    cfg.filter.max_filter_tree_count = 1;
    let bundle = single_search_bundle(QueryOptions {
        filters: vec![
            Filter {
                field: "age".to_string(),
                operator: "=".to_string(),
                value: Some(json!(1)),
                ..Filter::default()
            },
            Filter {
                field: "age".to_string(),
                operator: "=".to_string(),
                value: Some(json!(2)),
                ..Filter::default()
            },
        ],
        ..QueryOptions::default()
    });
    expect_rule(bundle, cfg, "MaxFilterTreeCount").await;
}

#[tokio::test]
async fn include_tree_count_cap() {
    let mut cfg = config();
    cfg.include.max_include_tree_count = 1;
    let bundle = single_search_bundle(QueryOptions {
        includes: vec![
            Include {
                relation: "articles".to_string(),
                ..Include::default()
            },
            Include {
                relation: "employee".to_string(),
                ..Include::default()
            },
        ],
        ..QueryOptions::default()
    });
    expect_rule(bundle, cfg, "MaxIncludeTreeCount").await;
}

#[tokio::test]
async fn include_relations_depth_cap() {
    let mut cfg = config();
    cfg.include.max_include_relations_depth = 1;
    let bundle = single_search_bundle(QueryOptions {
        includes: vec![Include {
            relation: "a.b".to_string(),
            ..Include::default()
        }],
        ..QueryOptions::default()
    });
    expect_rule(bundle, cfg, "MaxIncludeRelationsDepth").await;
}

#[tokio::test]
async fn sort_relations_depth_cap() {
    let mut cfg = config();
    cfg.sort.max_sort_relations_depth = 1;
    let bundle = single_search_bundle(QueryOptions {
        sort: vec![Sort {
            field: "articles.tags.name".to_string(),
            ..Sort::default()
        }],
        ..QueryOptions::default()
    });
    expect_rule(bundle, cfg, "MaxSortRelationsDepth").await;
}

#[tokio::test]
async fn searches_per_request_cap() {
    let mut cfg = config();
    cfg.max_searches_per_request = 1;
    let bundle = QueryBundle {
        group: QueryGroup {
            searches: vec![
                search("User", QueryOptions::default()),
                search("Article", QueryOptions::default()),
            ],
            aggregates: vec![],
        },
        ..QueryBundle::default()
    };
    expect_rule(bundle, cfg, "MaxSearchesPerRequest").await;
}

#[tokio::test]
async fn aggregates_per_request_cap() {
    let mut cfg = config();
    cfg.max_aggregates_per_request = 1;
    let bundle = QueryBundle {
        group: QueryGroup {
            searches: vec![],
            aggregates: vec![overall("User", "c1"), overall("User", "c2")],
        },
        ..QueryBundle::default()
    };
    expect_rule(bundle, cfg, "MaxAggregatesPerRequest").await;
}

#[tokio::test]
async fn bundle_wide_aggregate_total_cap() {
    let mut cfg = config();
    cfg.max_aggregates_per_request = 2;
    // one in the main group, two in a parallel group: each group is
    // within the per-group cap, the bundle total is not
    let bundle = QueryBundle {
        parallel_groups: vec![vec![overall("User", "g1"), overall("User", "g2")]],
        group: QueryGroup {
            searches: vec![],
            aggregates: vec![overall("User", "c1")],
        },
        ..QueryBundle::default()
    };
    expect_rule(bundle, cfg, "MaxAggregatesPerBundle").await;
}

#[tokio::test]
async fn client_transaction_groups_are_gated() {
    let bundle = QueryBundle {
        transactions: vec![TxQueryGroup {
            transaction_isolation_level: None,
            group: QueryGroup {
                searches: vec![
                    search("User", QueryOptions::default()),
                    search("Article", QueryOptions::default()),
                ],
                aggregates: vec![],
            },
        }],
        ..QueryBundle::default()
    };
    // groups are disabled in the default config
    expect_rule(bundle, config(), "TransactionGroupsInputDisable").await;
}

#[tokio::test]
async fn undersized_transaction_group_is_rejected() {
    let mut cfg = config();
    cfg.transaction.enable_client_groups_input = true;
    let bundle = QueryBundle {
        transactions: vec![TxQueryGroup {
            transaction_isolation_level: None,
            group: QueryGroup {
                searches: vec![search("User", QueryOptions::default())],
                aggregates: vec![],
            },
        }],
        ..QueryBundle::default()
    };
    expect_rule(bundle, cfg, "TransactionUnnecessary").await;
}

#[tokio::test]
async fn forbidden_isolation_override_is_rejected() {
    let mut cfg = config();
    cfg.transaction.enable_client_groups_input = true;
    cfg.transaction.allow_client_isolation_level = false;
    let bundle = QueryBundle {
        transactions: vec![TxQueryGroup {
            transaction_isolation_level: Some(4),
            group: QueryGroup {
                searches: vec![
                    search("User", QueryOptions::default()),
                    search("Article", QueryOptions::default()),
                ],
                aggregates: vec![],
            },
        }],
        ..QueryBundle::default()
    };
    expect_rule(bundle, cfg, "TransactionClientIsolationLevelDisallow").await;
}

#[tokio::test]
async fn unknown_root_node_aborts_the_build() {
    let bundle = QueryBundle {
        group: QueryGroup {
            searches: vec![search("Ghost", QueryOptions::default())],
            aggregates: vec![],
        },
        ..QueryBundle::default()
    };
    expect_rule(bundle, config(), "UnknownRootNode").await;
}

#[tokio::test]
async fn distinct_wildcard_fails_at_build_without_io() {
    let client = MockClient::empty();
    let hub = Hub::new(graph(), client.clone(), config());
    let bundle = single_search_bundle(QueryOptions {
        aggregates: vec![Aggregate {
            base: BaseAggregate {
                agg: "count".to_string(),
                distinct: true,
                ..BaseAggregate::default()
            },
        }],
        ..QueryOptions::default()
    });
    let err = hub.execute(bundle).await.unwrap_err();
    assert_eq!(err.build_op(), Some("BaseAggregate.build_expr"));
    assert!(err.to_string().contains("DISTINCT with wildcard"));
    assert!(client.queries().is_empty());
}

#[tokio::test]
async fn request_shape_deserializes_from_json() {
    let bundle: QueryBundle = serde_json::from_value(json!({
        "searches": [
            {
                "key": "adults",
                "from": "User",
                "filters": [
                    {"field": "age", "operator": ">=", "value": 18}
                ],
                "sort": [{"field": "name", "direction": "DESC"}],
                "with_pagination": true,
                "page": 2,
                "limit": 10
            }
        ],
        "aggregates": [
            {"field": "User.age", "type": "avg", "alias": "avg_age"}
        ],
        "parallel_aggregates_groups": [
            [{"field": "User", "type": "count"}]
        ]
    }))
    .unwrap();

    assert_eq!(bundle.group.searches.len(), 1);
    assert_eq!(bundle.group.searches[0].key, "adults");
    assert_eq!(bundle.group.searches[0].query.from, "User");
    assert!(bundle.group.searches[0].query.options.with_pagination);
    assert_eq!(bundle.group.searches[0].query.options.pageable.page, 2);
    assert_eq!(bundle.group.searches[0].query.options.pageable.limit.limit, 10);
    assert_eq!(bundle.group.aggregates.len(), 1);
    assert_eq!(bundle.parallel_groups.len(), 1);
}
