use crate::chain::{resolve_chain, split_chain};
use crate::config::SortConfig;
use crate::dsl::aggregate::AggKind;
use crate::error::{QueryBuildError, Result, ValidationError};
use crate::graph::{Bridge, Node, RelationKind};
use crate::selector::{Predicate, Selector};
use serde::Deserialize;
use std::sync::Arc;

/// An ordering directive: a field or relation-qualified field, a
/// direction, and optionally an aggregate applied across the
/// relation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Sort {
    pub field: String,
    pub direction: String,
    pub aggregate: String,
    #[serde(skip)]
    pub field_parts: Vec<String>,
    #[serde(skip)]
    pub preprocessed: bool,
}

pub fn validate_and_preprocess(sorts: &mut [Sort], cfg: &SortConfig) -> Result<()> {
    for sort in sorts.iter_mut() {
        sort.validate_and_preprocess(cfg)?;
    }
    Ok(())
}

pub fn predicates(sorts: &[Sort], node: &Arc<Node>) -> Result<Vec<Predicate>> {
    let mut preds = Vec::with_capacity(sorts.len());
    for sort in sorts {
        preds.push(sort.predicate(node)?);
    }
    Ok(preds)
}

impl Sort {
    pub fn validate_and_preprocess(&mut self, cfg: &SortConfig) -> Result<()> {
        match self.direction.as_str() {
            "" | "ASC" | "DESC" => {}
            other => {
                return Err(ValidationError::new(
                    "SortDirection",
                    format!("unsupported direction {other:?}"),
                )
                .into());
            }
        }

        if !self.aggregate.is_empty() && AggKind::parse(&self.aggregate).is_none() {
            return Err(ValidationError::new(
                "SortAggregate",
                format!("unsupported aggregate {:?}", self.aggregate),
            )
            .into());
        }

        if !self.field.is_empty() {
            let parts = split_chain(&self.field).map_err(|pos| {
                ValidationError::new(
                    "InvalidSortFieldFormat",
                    format!("invalid empty field segment at character {pos}: {}", self.field),
                )
            })?;
            let depth = parts.len() - 1;
            if cfg.max_sort_relations_depth > 0 && depth > cfg.max_sort_relations_depth {
                return Err(ValidationError::new(
                    "MaxSortRelationsDepth",
                    format!(
                        "sort relation depth of {depth} exceeds max {}",
                        cfg.max_sort_relations_depth
                    ),
                )
                .into());
            }
            self.field_parts = parts;
        }

        self.preprocessed = true;
        Ok(())
    }

    pub fn predicate(&self, node: &Arc<Node>) -> Result<Predicate> {
        if !self.preprocessed {
            panic!("Sort.predicate: called before preprocess");
        }

        let direction: &'static str = if self.direction == "DESC" { "DESC" } else { "ASC" };
        let agg = if self.aggregate.is_empty() {
            None
        } else {
            AggKind::parse(&self.aggregate)
        };

        let (final_node, field, bridges) = resolve_chain(node, &self.field_parts)
            .map_err(|e| QueryBuildError::new("Sort.predicate", e.to_string()))?;

        let storage = match field {
            Some(name) => Some(
                final_node
                    .field_by_name(&name)
                    .map(|f| f.storage_name.clone())
                    .unwrap_or(name),
            ),
            None => {
                if agg != Some(AggKind::Count) {
                    return Err(QueryBuildError::new(
                        "Sort.predicate",
                        "field must be specified",
                    )
                    .into());
                }
                None
            }
        };

        if agg.is_some() && bridges.is_empty() {
            return Err(QueryBuildError::new(
                "Sort.predicate",
                format!("aggregate {:?} without relations", self.aggregate),
            )
            .into());
        }

        if bridges.is_empty() {
            let column = storage.expect("plain sort resolves a field");
            return Ok(Box::new(move |s: &mut Selector| {
                let expr = format!("{} {}", s.c(&column), direction);
                s.order_by(expr);
            }));
        }

        match agg {
            None => self.joined_predicate(bridges, storage, direction),
            Some(kind) => self.grouped_predicate(bridges, storage, kind, direction),
        }
    }

    /// Direct ORDER BY over the joined path; only M2O hops keep the
    /// row set unchanged, so anything else is rejected.
    fn joined_predicate(
        &self,
        bridges: Vec<Arc<Bridge>>,
        storage: Option<String>,
        direction: &'static str,
    ) -> Result<Predicate> {
        for bridge in &bridges {
            if bridge.kind() != RelationKind::M2O {
                return Err(QueryBuildError::new(
                    "Sort.predicate",
                    format!(
                        "non-aggregate sort through {} not allowed",
                        bridge.kind().name()
                    ),
                )
                .into());
            }
        }
        let column = storage.ok_or_else(|| {
            QueryBuildError::new("Sort.predicate", "field must be specified")
        })?;

        Ok(Box::new(move |s: &mut Selector| {
            let mut prev = s.from_alias().to_string();
            for bridge in &bridges {
                prev = bridge.join(s, &prev);
            }
            s.order_by(format!("{prev}.{column} {direction}"));
        }))
    }

    /// Derived grouped subquery: aggregate the target per join key,
    /// LEFT JOIN it onto the outer query and order by the aggregated
    /// column. The derived table joins backward through inverse
    /// bridges, so each traversed bridge past the first must expose
    /// one.
    fn grouped_predicate(
        &self,
        bridges: Vec<Arc<Bridge>>,
        storage: Option<String>,
        kind: AggKind,
        direction: &'static str,
    ) -> Result<Predicate> {
        let mut inverses = Vec::with_capacity(bridges.len().saturating_sub(1));
        for bridge in bridges[1..].iter().rev() {
            let inverse = bridge.inverse().ok_or_else(|| {
                QueryBuildError::new(
                    "Sort.predicate",
                    format!(
                        "relation to {:?} has no inverse to join through",
                        bridge.child().name()
                    ),
                )
            })?;
            inverses.push(inverse);
        }

        let target = Arc::clone(bridges[bridges.len() - 1].child());
        let first = Arc::clone(&bridges[0]);
        let target_table = target.table().to_string();

        // deterministic alias: lower(agg)_table_field, or
        // lower(agg)_table when counting rows
        let alias = match &storage {
            Some(column) => format!("{}_{}_{}", kind.name(), target_table, column).to_lowercase(),
            None => format!("{}_{}", kind.name(), target_table).to_lowercase(),
        };

        Ok(Box::new(move |s: &mut Selector| {
            let mut sub = Selector::new(&target_table);
            let base_alias = sub.from_alias().to_string();

            let mut prev = base_alias.clone();
            for inverse in &inverses {
                prev = inverse.join(&mut sub, &prev);
            }

            let info = first.info();
            let key_col = format!("{prev}.{}", info.right_column);
            let agg_col = match &storage {
                Some(column) => format!("{base_alias}.{column}"),
                None => "*".to_string(),
            };
            sub.select_fields(vec![
                format!("{key_col} AS {}", info.right_column),
                format!("{} AS {alias}", kind.apply(&agg_col)),
            ]);
            sub.group_by(key_col);

            let derived = s.fresh_alias();
            let on = format!(
                "{} = {derived}.{}",
                s.c(&info.left_column),
                info.right_column
            );
            s.left_join_derived(&sub, &derived, on);
            s.order_by(format!("{derived}.{alias} {direction}"));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphBuilder, NodeDef, RelationDef};

    fn graph() -> Graph {
        GraphBuilder::new()
            .node(
                NodeDef::new("User", "users")
                    .field("id", "id")
                    .field("name", "name")
                    .pk("id"),
            )
            .node(
                NodeDef::new("Article", "articles")
                    .field("id", "id")
                    .field("views", "views")
                    .field("author", "author_id")
                    .pk("id"),
            )
            .relation(
                RelationDef::new("User", "articles", "Article", RelationKind::O2M, "id", "author_id")
                    .inverse("author"),
            )
            .build()
            .unwrap()
    }

    fn lower(sort: &mut Sort, root: &str) -> String {
        let graph = graph();
        let node = graph.get(root).unwrap();
        sort.validate_and_preprocess(&SortConfig::default()).unwrap();
        let pred = sort.predicate(node).unwrap();
        let mut sel = Selector::new(node.table());
        pred(&mut sel);
        sel.build_sql()
    }

    #[test]
    fn plain_field_sort() {
        let mut sort = Sort {
            field: "name".to_string(),
            direction: "DESC".to_string(),
            ..Sort::default()
        };
        assert_eq!(
            lower(&mut sort, "User"),
            "SELECT t0.* FROM users AS t0 ORDER BY t0.name DESC"
        );
    }

    #[test]
    fn empty_direction_defaults_to_asc() {
        let mut sort = Sort {
            field: "name".to_string(),
            ..Sort::default()
        };
        assert!(lower(&mut sort, "User").ends_with("ORDER BY t0.name ASC"));
    }

    #[test]
    fn m2o_chain_sorts_over_joined_path() {
        let mut sort = Sort {
            field: "author.name".to_string(),
            ..Sort::default()
        };
        assert_eq!(
            lower(&mut sort, "Article"),
            "SELECT t0.* FROM articles AS t0 JOIN users AS t1 ON t1.id = t0.author_id \
             ORDER BY t1.name ASC"
        );
    }

    #[test]
    fn non_m2o_chain_without_aggregate_is_rejected() {
        let graph = graph();
        let node = graph.get("User").unwrap();
        let mut sort = Sort {
            field: "articles.views".to_string(),
            ..Sort::default()
        };
        sort.validate_and_preprocess(&SortConfig::default()).unwrap();
        let err = sort.predicate(node).err().unwrap();
        assert!(err.to_string().contains("non-aggregate sort through O2M"));
    }

    #[test]
    fn aggregate_sort_builds_grouped_derived_table() {
        let mut sort = Sort {
            field: "articles.views".to_string(),
            direction: "DESC".to_string(),
            aggregate: "sum".to_string(),
            ..Sort::default()
        };
        assert_eq!(
            lower(&mut sort, "User"),
            "SELECT t0.* FROM users AS t0 LEFT JOIN (SELECT t0.author_id AS author_id, \
             SUM(t0.views) AS sum_articles_views FROM articles AS t0 GROUP BY t0.author_id) \
             AS t1 ON t0.id = t1.author_id ORDER BY t1.sum_articles_views DESC"
        );
    }

    #[test]
    fn count_aggregate_allows_missing_field() {
        let mut sort = Sort {
            field: "articles".to_string(),
            aggregate: "count".to_string(),
            ..Sort::default()
        };
        let sql = lower(&mut sort, "User");
        assert!(sql.contains("COUNT(*) AS count_articles"));
        assert!(sql.ends_with("ORDER BY t1.count_articles ASC"));
    }

    #[test]
    fn aggregate_without_relations_is_rejected() {
        let graph = graph();
        let node = graph.get("User").unwrap();
        let mut sort = Sort {
            field: "name".to_string(),
            aggregate: "sum".to_string(),
            ..Sort::default()
        };
        sort.validate_and_preprocess(&SortConfig::default()).unwrap();
        let err = sort.predicate(node).err().unwrap();
        assert!(err.to_string().contains("without relations"));
    }

    #[test]
    fn direction_and_aggregate_are_validated() {
        let mut sort = Sort {
            field: "name".to_string(),
            direction: "SIDEWAYS".to_string(),
            ..Sort::default()
        };
        let err = sort.validate_and_preprocess(&SortConfig::default()).unwrap_err();
        assert_eq!(err.rule(), Some("SortDirection"));

        let mut sort = Sort {
            field: "name".to_string(),
            aggregate: "median".to_string(),
            ..Sort::default()
        };
        let err = sort.validate_and_preprocess(&SortConfig::default()).unwrap_err();
        assert_eq!(err.rule(), Some("SortAggregate"));
    }

    #[test]
    fn depth_cap() {
        let cfg = SortConfig {
            max_sort_relations_depth: 1,
        };
        let mut sort = Sort {
            field: "articles.author.name".to_string(),
            ..Sort::default()
        };
        let err = sort.validate_and_preprocess(&cfg).unwrap_err();
        assert_eq!(err.rule(), Some("MaxSortRelationsDepth"));
    }
}
