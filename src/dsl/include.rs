use crate::chain::split_chain;
use crate::client::{Client, Row};
use crate::config::{IncludeConfig, SortConfig};
use crate::dsl::aggregate::{self, Aggregate};
use crate::dsl::filter::{self, Filter};
use crate::dsl::pageable::Limit;
use crate::dsl::select::Select;
use crate::dsl::sort::{self, Sort};
use crate::error::{QueryBuildError, Result, ValidationError};
use crate::executor::BoxFuture;
use crate::graph::{Node, RelationKind};
use crate::policy::{enforce_policy, PolicyContext, QueryOp};
use crate::scalar::extract_row_aggregates;
use crate::selector::{Condition, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column carrying the parent key on M2M child rows, projected from
/// the pivot and stripped before rows are attached.
const PARENT_REF: &str = "__parent_ref";

/// A request to pre-load a related entity set, optionally with its
/// own filters, sort, per-row aggregates, nested includes and a row
/// cap.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Include {
    pub relation: String,
    pub select: Select,
    pub filters: Vec<Filter>,
    pub includes: Vec<Include>,
    pub sort: Vec<Sort>,
    pub aggregates: Vec<Aggregate>,
    #[serde(flatten)]
    pub limit: Limit,
    #[serde(skip)]
    pub relation_parts: Vec<String>,
    #[serde(skip)]
    pub preprocessed: bool,
}

/// Validate an include tree: the Include node total and the
/// accumulated relation depth are capped, and every inner DSL
/// fragment is validated with its embedded config.
pub fn validate_and_preprocess(includes: &mut [Include], cfg: &IncludeConfig) -> Result<()> {
    let mut total = 0;
    for include in includes.iter_mut() {
        include.walk_validate(cfg, 0, &mut total)?;
    }
    if cfg.max_include_tree_count > 0 && total > cfg.max_include_tree_count {
        return Err(ValidationError::new(
            "MaxIncludeTreeCount",
            format!("includes count exceeds max {}", cfg.max_include_tree_count),
        )
        .into());
    }
    Ok(())
}

pub fn plans(
    includes: &[Include],
    ctx: &PolicyContext,
    node: &Arc<Node>,
) -> Result<Vec<IncludePlan>> {
    let mut out = Vec::with_capacity(includes.len());
    for include in includes {
        out.push(include.plan(ctx, node)?);
    }
    Ok(out)
}

impl Include {
    fn walk_validate(&mut self, cfg: &IncludeConfig, depth: usize, total: &mut usize) -> Result<()> {
        let parts = split_chain(&self.relation).map_err(|pos| {
            ValidationError::new(
                "InvalidIncludeRelationFormat",
                format!(
                    "invalid empty relation segment at character {pos}: {}",
                    self.relation
                ),
            )
        })?;
        *total += parts.len();
        let depth = depth + parts.len();
        if cfg.max_include_relations_depth > 0 && depth > cfg.max_include_relations_depth {
            return Err(ValidationError::new(
                "MaxIncludeRelationsDepth",
                format!("includes depth exceeds max {}", cfg.max_include_relations_depth),
            )
            .into());
        }
        self.relation_parts = parts;

        for nested in &mut self.includes {
            nested.walk_validate(cfg, depth, total)?;
        }

        filter::validate_and_preprocess(&mut self.filters, &cfg.filter)?;
        aggregate::validate_aggregates(&mut self.aggregates, &cfg.aggregate)?;
        sort::validate_and_preprocess(&mut self.sort, &SortConfig::default())?;
        self.limit.sanitize(&cfg.pageable);

        self.preprocessed = true;
        Ok(())
    }

    /// Lower this include into a load plan rooted at `node`: one
    /// step per bridge of the relation path, with the inner DSL
    /// fragments compiled onto the final step's child query.
    pub fn plan(&self, ctx: &PolicyContext, node: &Arc<Node>) -> Result<IncludePlan> {
        if !self.preprocessed {
            panic!("Include.plan: called before preprocess");
        }

        let mut current = Arc::clone(node);
        let mut bridges = Vec::with_capacity(self.relation_parts.len());
        for relation in &self.relation_parts {
            let bridge = current.bridge(relation).ok_or_else(|| {
                QueryBuildError::new(
                    "Include.predicate",
                    format!(
                        "relation {relation:?} not found on node {:?}",
                        current.name()
                    ),
                )
            })?;
            current = Arc::clone(bridge.child());
            bridges.push((relation.clone(), bridge));
        }

        let nested = plans(&self.includes, ctx, &current)?;
        let nested_link_columns: Vec<String> = nested
            .iter()
            .filter_map(|p| p.steps.first().map(|s| s.left_column.clone()))
            .collect();

        let mut steps = Vec::with_capacity(bridges.len());
        let last_index = bridges.len() - 1;

        for (i, (relation, bridge)) in bridges.into_iter().enumerate() {
            let child = Arc::clone(bridge.child());
            let info = bridge.info().clone();
            let mut template = Selector::new(child.table());
            let base_alias = template.from_alias().to_string();

            let (link_expr, parent_ref, strip_ref) = match (&info.kind, &info.pivot) {
                (RelationKind::M2M, Some(pivot)) => {
                    let pivot_alias = template.fresh_alias();
                    template.join(
                        &pivot.table,
                        &pivot_alias,
                        format!(
                            "{}.{} = {}.{}",
                            pivot_alias, pivot.right_column, base_alias, info.right_column
                        ),
                    );
                    template.append_expr(format!("{base_alias}.*"));
                    template.append_expr(format!(
                        "{}.{} AS {PARENT_REF}",
                        pivot_alias, pivot.left_column
                    ));
                    (
                        format!("{}.{}", pivot_alias, pivot.left_column),
                        PARENT_REF.to_string(),
                        true,
                    )
                }
                _ => (
                    format!("{base_alias}.{}", info.right_column),
                    info.right_column.clone(),
                    false,
                ),
            };

            if let Some(pred) = enforce_policy(ctx, &child, QueryOp::IncludeQuery)? {
                pred(&mut template);
            }

            let mut agg_aliases = Vec::new();
            if i == last_index {
                if let Some(mut columns) = self.select.resolve(&child)? {
                    if !strip_ref && !columns.contains(&parent_ref) {
                        columns.push(parent_ref.clone());
                    }
                    for link in &nested_link_columns {
                        if !columns.contains(link) {
                            columns.push(link.clone());
                        }
                    }
                    let mut fields: Vec<String> = columns
                        .iter()
                        .map(|c| format!("{base_alias}.{c}"))
                        .collect();
                    if strip_ref {
                        // keep the pivot ref projected alongside the selection
                        fields.push(format!("{link_expr} AS {PARENT_REF}"));
                    }
                    template.select_fields(fields);
                } else if !self.aggregates.is_empty() && !strip_ref {
                    template.append_expr(format!("{base_alias}.*"));
                }

                let (agg_preds, aliases) = aggregate::predicates(&self.aggregates, ctx, &child)?;
                agg_aliases = aliases;
                for pred in &agg_preds {
                    pred(&mut template);
                }
                for pred in filter::predicates(&self.filters, &child)? {
                    pred(&mut template);
                }
                for pred in sort::predicates(&self.sort, &child)? {
                    pred(&mut template);
                }
            }

            self.limit.predicate()(&mut template);

            steps.push(IncludeStep {
                relation,
                single: matches!(info.kind, RelationKind::O2O | RelationKind::M2O),
                left_column: info.left_column,
                link_expr,
                parent_ref,
                strip_ref,
                selector: template,
                agg_aliases: if i == last_index { agg_aliases } else { Vec::new() },
            });
        }

        Ok(IncludePlan { steps, nested })
    }
}

/// One bridge hop of an include: the child query template plus the
/// columns wiring children back to their parents.
#[derive(Debug, Clone)]
pub struct IncludeStep {
    relation: String,
    single: bool,
    left_column: String,
    link_expr: String,
    parent_ref: String,
    strip_ref: bool,
    selector: Selector,
    agg_aliases: Vec<String>,
}

/// Compiled include: executed after the parent rows materialize,
/// loading each hop with one key-batched query and attaching child
/// rows under the relation name.
#[derive(Debug, Clone)]
pub struct IncludePlan {
    steps: Vec<IncludeStep>,
    nested: Vec<IncludePlan>,
}

impl IncludePlan {
    pub fn load<'a, C: Client + ?Sized>(
        &'a self,
        client: &'a C,
        parents: &'a mut Vec<Row>,
    ) -> BoxFuture<'a, Result<()>> {
        self.load_step(client, parents, 0)
    }

    #[cfg(test)]
    pub(crate) fn first_step_sql(&self) -> String {
        self.steps[0].selector.build_sql()
    }

    fn load_step<'a, C: Client + ?Sized>(
        &'a self,
        client: &'a C,
        parents: &'a mut Vec<Row>,
        idx: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if parents.is_empty() {
                return Ok(());
            }
            let step = &self.steps[idx];

            let mut keys: Vec<Value> = Vec::new();
            for parent in parents.iter() {
                if let Some(value) = parent.get(&step.left_column) {
                    if !value.is_null() && !keys.contains(value) {
                        keys.push(value.clone());
                    }
                }
            }

            let mut children: Vec<Row> = if keys.is_empty() {
                Vec::new()
            } else {
                let mut selector = step.selector.clone();
                selector.and_where(Condition::In {
                    column: step.link_expr.clone(),
                    values: keys,
                });
                client.fetch_rows(&selector.build_sql()).await?
            };

            let is_last = idx + 1 == self.steps.len();
            if is_last {
                if !step.agg_aliases.is_empty() {
                    for row in &mut children {
                        extract_row_aggregates(row, &step.agg_aliases);
                    }
                }
                for nested in &self.nested {
                    nested.load(client, &mut children).await?;
                }
            } else {
                self.load_step(client, &mut children, idx + 1).await?;
            }

            let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
            for mut row in children {
                let key = row.get(&step.parent_ref).cloned().unwrap_or(Value::Null);
                if step.strip_ref {
                    row.remove(&step.parent_ref);
                }
                grouped.entry(key.to_string()).or_default().push(row);
            }

            for parent in parents.iter_mut() {
                let key = parent
                    .get(&step.left_column)
                    .cloned()
                    .unwrap_or(Value::Null)
                    .to_string();
                let matched = grouped.get(&key).cloned().unwrap_or_default();
                let value = if step.single {
                    matched
                        .into_iter()
                        .next()
                        .map(Value::Object)
                        .unwrap_or(Value::Null)
                } else {
                    Value::Array(matched.into_iter().map(Value::Object).collect())
                };
                parent.insert(step.relation.clone(), value);
            }
            Ok(())
        })
    }
}
