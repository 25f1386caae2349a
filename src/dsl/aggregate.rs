use crate::chain::{resolve_chain, split_chain};
use crate::config::{AggregateConfig, Config, FilterConfig};
use crate::dsl::filter::{self, Filter};
use crate::error::{QueryBuildError, Result, ValidationError};
use crate::graph::{Bridge, Graph, Node};
use crate::policy::{enforce_policy, PolicyContext, QueryOp};
use crate::scalar::{ScalarDest, ScalarQuery};
use crate::selector::{Condition, Predicate, Selector};
use serde::Deserialize;
use std::sync::Arc;

/// The five supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

impl AggKind {
    pub fn parse(s: &str) -> Option<AggKind> {
        match s {
            "avg" => Some(AggKind::Avg),
            "sum" => Some(AggKind::Sum),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "count" => Some(AggKind::Count),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggKind::Avg => "avg",
            AggKind::Sum => "sum",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Count => "count",
        }
    }

    pub fn apply(&self, expr: &str) -> String {
        match self {
            AggKind::Avg => format!("AVG({expr})"),
            AggKind::Sum => format!("SUM({expr})"),
            AggKind::Min => format!("MIN({expr})"),
            AggKind::Max => format!("MAX({expr})"),
            AggKind::Count => format!("COUNT({expr})"),
        }
    }

    /// COUNT scans into a nullable integer, the rest into a nullable
    /// float: SQL nulls and integer overflow map differently.
    pub fn dest(&self) -> ScalarDest {
        match self {
            AggKind::Count => ScalarDest::Int,
            _ => ScalarDest::Float,
        }
    }
}

const MAX_ALIAS_LEN: usize = 60;

/// Shared shape of per-row and overall aggregates: a field path, an
/// optional alias, the aggregate type, a DISTINCT flag and optional
/// filters applied to the aggregated rows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BaseAggregate {
    pub field: String,
    pub alias: String,
    #[serde(rename = "type")]
    pub agg: String,
    pub distinct: bool,
    pub filters: Vec<Filter>,
    #[serde(skip)]
    pub field_parts: Vec<String>,
    #[serde(skip)]
    pub kind: Option<AggKind>,
    #[serde(skip)]
    pub preprocessed: bool,
}

impl BaseAggregate {
    fn preprocess(&mut self, filter_cfg: &FilterConfig, allow_empty_field: bool) -> Result<()> {
        if self.field.is_empty() && !allow_empty_field {
            return Err(ValidationError::new(
                "AggregateFieldNotEmpty",
                "aggregate field must not be empty",
            )
            .into());
        }

        if !self.field.is_empty() {
            let parts = split_chain(&self.field).map_err(|pos| {
                ValidationError::new(
                    "AggregateFieldSyntax",
                    format!("invalid empty segment at char {pos} in {:?}", self.field),
                )
            })?;
            self.field_parts = parts;
        }

        let kind = AggKind::parse(&self.agg).ok_or_else(|| {
            ValidationError::new(
                "AggregateTypeUnsupported",
                format!("unsupported aggregate type {:?}", self.agg),
            )
        })?;

        if self.distinct && !matches!(kind, AggKind::Count | AggKind::Sum | AggKind::Avg) {
            return Err(ValidationError::new(
                "AggregateDistinctNotAllowed",
                format!("DISTINCT not supported for aggregate type {:?}", self.agg),
            )
            .into());
        }

        filter::validate_and_preprocess(&mut self.filters, filter_cfg)?;

        self.kind = Some(kind);
        self.preprocessed = true;
        Ok(())
    }

    fn kind(&self) -> AggKind {
        if !self.preprocessed {
            panic!("BaseAggregate.build_expr: called before preprocess");
        }
        self.kind.expect("preprocessed aggregate has a kind")
    }

    /// Check the wildcard rules before any expression is rendered.
    fn validate_expr(&self, resolved: Option<&str>) -> Result<()> {
        let kind = self.kind();
        if resolved.is_none() {
            if self.distinct {
                return Err(QueryBuildError::new(
                    "BaseAggregate.build_expr",
                    "cannot use DISTINCT with wildcard '*'; specify a column",
                )
                .into());
            }
            if kind != AggKind::Count {
                return Err(QueryBuildError::new(
                    "BaseAggregate.build_expr",
                    format!("aggregate {:?} on '*' is invalid; only COUNT(*) is allowed", self.agg),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Render the aggregate expression against a table alias.
    /// `validate_expr` must have accepted the same resolution.
    fn render_expr(&self, table_alias: &str, resolved: Option<&str>) -> String {
        let kind = self.kind();
        match resolved {
            None => kind.apply("*"),
            Some(column) => {
                let col = format!("{table_alias}.{column}");
                if self.distinct {
                    kind.apply(&format!("DISTINCT {col}"))
                } else {
                    kind.apply(&col)
                }
            }
        }
    }

    /// Alias defaults to `lower(type)[_distinct]_<field with dots
    /// replaced>`, clamped for identifier limits.
    fn gen_alias(&self) -> String {
        if !self.alias.is_empty() {
            return self.alias.clone();
        }
        let mut prefix = self.kind().name().to_string();
        if self.distinct {
            prefix.push_str("_distinct");
        }
        let safe = self.field.replace('.', "_");
        let mut raw = format!("{prefix}_{safe}");
        raw.truncate(MAX_ALIAS_LEN);
        raw
    }
}

/// Pre-resolve the inverse bridges needed to join a chain backward,
/// from the aggregation target toward the first hop.
fn inverse_bridges(op: &'static str, bridges: &[Arc<Bridge>]) -> Result<Vec<Arc<Bridge>>> {
    let mut inverses = Vec::with_capacity(bridges.len().saturating_sub(1));
    for bridge in bridges[1..].iter().rev() {
        let inverse = bridge.inverse().ok_or_else(|| {
            QueryBuildError::new(
                op,
                format!(
                    "relation to {:?} has no inverse to join through",
                    bridge.child().name()
                ),
            )
        })?;
        inverses.push(inverse);
    }
    Ok(inverses)
}

/// Per-row aggregate: a correlated scalar subquery appended as a
/// SELECT expression on each outer row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Aggregate {
    #[serde(flatten)]
    pub base: BaseAggregate,
}

impl Aggregate {
    pub fn validate_and_preprocess(&mut self, cfg: &AggregateConfig) -> Result<()> {
        self.base.preprocess(&cfg.filter, true)?;

        let depth = self.base.field_parts.len().saturating_sub(1);
        if cfg.max_aggregate_relations_depth > 0 && depth > cfg.max_aggregate_relations_depth {
            return Err(ValidationError::new(
                "MaxAggregateRelationsDepth",
                format!(
                    "aggregate relation depth of {depth} exceeds max {}",
                    cfg.max_aggregate_relations_depth
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Lower into a selector mutator appending the correlated
    /// subquery, returning it with the aggregate's column alias.
    pub fn predicate(
        &self,
        ctx: &PolicyContext,
        root: &Arc<Node>,
    ) -> Result<(Predicate, String)> {
        if !self.base.preprocessed {
            panic!("Aggregate.predicate: called before preprocess");
        }

        let (node, field, bridges) = resolve_chain(root, &self.base.field_parts)
            .map_err(|e| QueryBuildError::new("Aggregate.predicate", e.to_string()))?;

        // policy applies on the last nested node only
        let policy_pred = match bridges.last() {
            Some(last) => enforce_policy(ctx, last.child(), QueryOp::Aggregate)?,
            None => None,
        };

        let storage = match field {
            Some(name) => node.field_by_name(&name).map(|f| f.storage_name.clone()),
            None => None,
        };
        self.base.validate_expr(storage.as_deref())?;
        let alias = self.base.gen_alias();

        let inverses = inverse_bridges("Aggregate.predicate", &bridges)?;
        let filter_preds = filter::predicates(&self.base.filters, &node)?;

        let base = self.base.clone();
        let target_table = node.table().to_string();
        let pks: Vec<String> = node.pks().iter().map(|f| f.storage_name.clone()).collect();
        let first_info = bridges.first().map(|b| b.info().clone());
        let out_alias = alias.clone();

        let pred: Predicate = Box::new(move |s: &mut Selector| {
            let outer_alias = s.from_alias().to_string();
            let mut sub = s.sub_select(&target_table);
            let base_alias = sub.from_alias().to_string();
            sub.select_fields(vec![base.render_expr(&base_alias, storage.as_deref())]);

            // join backward through the inverse bridges
            let mut prev = base_alias.clone();
            for inverse in &inverses {
                prev = inverse.join(&mut sub, &prev);
            }

            if let Some(p) = &policy_pred {
                p(&mut sub);
            }
            for p in &filter_preds {
                p(&mut sub);
            }

            // correlate on the first bridge, or on the root's
            // primary keys when the chain has none
            match &first_info {
                Some(info) => {
                    sub.and_where(Condition::columns_eq(
                        Selector::qualify(&outer_alias, &info.left_column),
                        format!("{prev}.{}", info.right_column),
                    ));
                }
                None => {
                    for pk in &pks {
                        sub.and_where(Condition::columns_eq(
                            Selector::qualify(&outer_alias, pk),
                            format!("{base_alias}.{pk}"),
                        ));
                    }
                }
            }

            s.append_subquery_expr(&sub, &out_alias);
        });

        Ok((pred, alias))
    }
}

/// Lower a list of per-row aggregates, returning the selector
/// mutators and the metadata column aliases they project.
pub fn predicates(
    aggregates: &[Aggregate],
    ctx: &PolicyContext,
    root: &Arc<Node>,
) -> Result<(Vec<Predicate>, Vec<String>)> {
    let mut preds = Vec::with_capacity(aggregates.len());
    let mut aliases = Vec::with_capacity(aggregates.len());
    for aggregate in aggregates {
        let (pred, alias) = aggregate.predicate(ctx, root)?;
        preds.push(pred);
        aliases.push(alias);
    }
    Ok((preds, aliases))
}

pub fn validate_aggregates(aggregates: &mut [Aggregate], cfg: &AggregateConfig) -> Result<()> {
    for aggregate in aggregates.iter_mut() {
        aggregate.validate_and_preprocess(cfg)?;
    }
    Ok(())
}

/// Per-request standalone aggregate over a node (`Node`) or a node
/// field (`Node.field`), executed as one scalar query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverallAggregate {
    #[serde(flatten)]
    pub base: BaseAggregate,
}

impl OverallAggregate {
    pub fn validate_and_preprocess(&mut self, cfg: &Config) -> Result<()> {
        self.base.preprocess(&cfg.filter, false)?;

        let segments = self.base.field_parts.len();
        if !(1..=2).contains(&segments) {
            return Err(ValidationError::new(
                "OverallAggregateFieldFormat",
                format!(
                    "overall aggregate field {:?} must be [entity] or [entity.field]",
                    self.base.field
                ),
            )
            .into());
        }
        Ok(())
    }

    fn resolve_field(&self, graph: &Graph) -> Result<(Arc<Node>, Option<String>)> {
        let node = graph.get(&self.base.field_parts[0]).ok_or_else(|| {
            QueryBuildError::new(
                "OverallAggregate.resolve_field",
                format!("node named {:?} does not exist", self.base.field_parts[0]),
            )
        })?;

        let field = match self.base.field_parts.get(1) {
            None => None,
            Some(name) => Some(
                node.field_by_name(name)
                    .ok_or_else(|| {
                        QueryBuildError::new(
                            "OverallAggregate.resolve_field",
                            format!(
                                "node {:?} has no field named {name:?}",
                                node.name()
                            ),
                        )
                    })?
                    .storage_name
                    .clone(),
            ),
        };
        Ok((Arc::clone(node), field))
    }

    /// Build a standalone single-column selector for this aggregate.
    pub fn build(&self, ctx: &PolicyContext, graph: &Graph) -> Result<(Selector, String)> {
        if !self.base.preprocessed {
            panic!("OverallAggregate.build: called before preprocess");
        }

        let (node, field) = self.resolve_field(graph)?;
        let policy_pred = enforce_policy(ctx, &node, QueryOp::AggregateOverall)?;

        self.base.validate_expr(field.as_deref())?;
        let alias = self.base.gen_alias();

        let mut sel = Selector::new(node.table());
        let table_alias = sel.from_alias().to_string();
        sel.select_fields(vec![self.base.render_expr(&table_alias, field.as_deref())]);

        if let Some(p) = &policy_pred {
            p(&mut sel);
        }
        for p in filter::predicates(&self.base.filters, &node)? {
            p(&mut sel);
        }

        Ok((sel, alias))
    }

    pub fn build_scalar(&self, ctx: &PolicyContext, graph: &Graph) -> Result<ScalarQuery> {
        let (selector, alias) = self.build(ctx, graph)?;
        Ok(ScalarQuery {
            selector,
            key: alias,
            dest: self.base.kind().dest(),
        })
    }
}
