use crate::chain::{resolve_chain, split_chain};
use crate::config::FilterConfig;
use crate::error::{QueryBuildError, Result, ValidationError};
use crate::graph::Node;
use crate::selector::{
    combine_predicates, not_predicate, or_predicates, Condition, Predicate, Selector,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Comparison operators accepted in filter leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Operator> {
        match s {
            "=" => Some(Operator::Eq),
            "!=" => Some(Operator::Neq),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            "LIKE" => Some(Operator::Like),
            "NOT LIKE" => Some(Operator::NotLike),
            "IN" => Some(Operator::In),
            "NOT IN" => Some(Operator::NotIn),
            _ => None,
        }
    }

    fn needs_slice(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

/// One node of the boolean filter tree: conditional branches
/// (`not` / `and` / `or`), an optional relation prefix, and an
/// optional `(field, operator, value)` leaf.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub not: Option<Box<Filter>>,
    pub and: Vec<Filter>,
    pub or: Vec<Filter>,
    pub relation: String,
    pub field: String,
    pub operator: String,
    pub value: Option<Value>,
    #[serde(skip)]
    pub relation_parts: Vec<String>,
    #[serde(skip)]
    pub field_parts: Vec<String>,
    #[serde(skip)]
    pub op: Option<Operator>,
    #[serde(skip)]
    pub preprocessed: bool,
}

/// Validate a filter tree and cache its split path segments.
///
/// Two counters accumulate across the whole tree: every filter node
/// (conditional wrappers included) and every relation segment,
/// whether it comes from a `relation` prefix or a dotted field chain.
pub fn validate_and_preprocess(filters: &mut [Filter], cfg: &FilterConfig) -> Result<()> {
    let mut total_filters = 0;
    let mut total_relations = 0;
    for filter in filters.iter_mut() {
        filter.walk_validate(
            cfg.max_relation_chain_depth,
            0,
            &mut total_filters,
            &mut total_relations,
        )?;
    }
    if cfg.max_filter_tree_count > 0 && total_filters > cfg.max_filter_tree_count {
        return Err(ValidationError::new(
            "MaxFilterTreeCount",
            format!("filters count exceeds max {}", cfg.max_filter_tree_count),
        )
        .into());
    }
    if cfg.max_relation_total_count > 0 && total_relations > cfg.max_relation_total_count {
        return Err(ValidationError::new(
            "MaxFilterRelationsPerTree",
            format!("relations count exceeds max {}", cfg.max_relation_total_count),
        )
        .into());
    }
    Ok(())
}

/// Lower every filter of a tree into its own predicate.
pub fn predicates(filters: &[Filter], node: &Arc<Node>) -> Result<Vec<Predicate>> {
    let mut preds = Vec::with_capacity(filters.len());
    for filter in filters {
        preds.push(filter.predicate(node)?);
    }
    Ok(preds)
}

/// Composition wrapper threading a local predicate through the
/// relation-subquery filters of a resolved chain.
type Compose = Box<dyn FnOnce(Predicate) -> Predicate>;

/// Resolve a relation chain, returning the final node and a wrapper
/// applying a predicate at the correct depth. The bridge list is
/// walked tail to head so the innermost predicate lands on the final
/// node.
fn resolve_filter_chain(
    node: &Arc<Node>,
    rels: &[String],
) -> std::result::Result<(Arc<Node>, Compose), crate::chain::ChainError> {
    let (final_node, _, bridges) = resolve_chain(node, rels)?;
    let mut compose: Compose = Box::new(|p| p);
    for bridge in bridges.into_iter().rev() {
        let prev = compose;
        compose = Box::new(move |p| bridge.filter_with(prev(p)));
    }
    Ok((final_node, compose))
}

impl Filter {
    pub fn validate_and_preprocess(&mut self, cfg: &FilterConfig) -> Result<()> {
        validate_and_preprocess(std::slice::from_mut(self), cfg)
    }

    /// Lower this filter into one selector predicate rooted at `node`.
    pub fn predicate(&self, node: &Arc<Node>) -> Result<Predicate> {
        if !self.preprocessed {
            panic!("Filter.predicate: called before preprocess");
        }
        if !self.relation_parts.is_empty() {
            let (final_node, compose) = resolve_filter_chain(node, &self.relation_parts)
                .map_err(|e| QueryBuildError::new("Filter.predicate", e.to_string()))?;
            let local = self.local_predicate(&final_node)?;
            return Ok(compose(local));
        }
        self.local_predicate(node)
    }

    /// Conjunction of the Not branch (negated), the Or branch
    /// (disjoined), the And branch (conjoined) and the leaf condition.
    fn local_predicate(&self, node: &Arc<Node>) -> Result<Predicate> {
        let mut preds: Vec<Predicate> = Vec::new();

        if let Some(not) = &self.not {
            preds.push(not_predicate(not.predicate(node)?));
        }
        if !self.or.is_empty() {
            preds.push(or_predicates(predicates(&self.or, node)?));
        }
        if !self.and.is_empty() {
            preds.push(combine_predicates(predicates(&self.and, node)?));
        }
        if !self.field.is_empty() {
            preds.push(self.build_condition(node)?);
        }

        if preds.len() == 1 {
            Ok(preds.remove(0))
        } else {
            Ok(combine_predicates(preds))
        }
    }

    fn build_condition(&self, node: &Arc<Node>) -> Result<Predicate> {
        let relations = &self.field_parts[..self.field_parts.len() - 1];
        let leaf = &self.field_parts[self.field_parts.len() - 1];

        if relations.is_empty() {
            return self.base_predicate(node, leaf);
        }

        let (final_node, compose) = resolve_filter_chain(node, relations)
            .map_err(|e| QueryBuildError::new("Filter.build_condition", e.to_string()))?;
        let base = self.base_predicate(&final_node, leaf)?;
        Ok(compose(base))
    }

    fn base_predicate(&self, node: &Arc<Node>, field: &str) -> Result<Predicate> {
        let column = node
            .field_by_name(field)
            .ok_or_else(|| {
                QueryBuildError::new(
                    "Filter.build_condition",
                    format!("node {:?} has no field named {:?}", node.name(), field),
                )
            })?
            .storage_name
            .clone();

        let op = self.op.ok_or_else(|| {
            QueryBuildError::new("Filter.build_condition", format!("invalid operator {:?}", self.operator))
        })?;
        let value = self.value.clone().unwrap_or(Value::Null);

        let pred: Predicate = match op {
            Operator::Eq => cmp_predicate(column, "=", value),
            Operator::Neq => cmp_predicate(column, "!=", value),
            Operator::Gt => cmp_predicate(column, ">", value),
            Operator::Gte => cmp_predicate(column, ">=", value),
            Operator::Lt => cmp_predicate(column, "<", value),
            Operator::Lte => cmp_predicate(column, "<=", value),
            Operator::Like => {
                let pattern = like_pattern(&value);
                Box::new(move |s: &mut Selector| {
                    let cond = Condition::Like {
                        column: s.c(&column),
                        pattern: pattern.clone(),
                    };
                    s.and_where(cond);
                })
            }
            Operator::NotLike => {
                let pattern = like_pattern(&value);
                Box::new(move |s: &mut Selector| {
                    let cond = Condition::NotLike {
                        column: s.c(&column),
                        pattern: pattern.clone(),
                    };
                    s.and_where(cond);
                })
            }
            Operator::In => {
                let values = slice_values(&value);
                Box::new(move |s: &mut Selector| {
                    let cond = Condition::In {
                        column: s.c(&column),
                        values: values.clone(),
                    };
                    s.and_where(cond);
                })
            }
            Operator::NotIn => {
                let values = slice_values(&value);
                Box::new(move |s: &mut Selector| {
                    let cond = Condition::NotIn {
                        column: s.c(&column),
                        values: values.clone(),
                    };
                    s.and_where(cond);
                })
            }
        };
        Ok(pred)
    }

    fn walk_validate(
        &mut self,
        max_depth: usize,
        mut current_depth: usize,
        total_filters: &mut usize,
        total_relations: &mut usize,
    ) -> Result<()> {
        *total_filters += 1;

        if !self.relation.is_empty() {
            let parts = split_chain(&self.relation).map_err(|pos| {
                ValidationError::new(
                    "InvalidFilterRelationFormat",
                    format!(
                        "invalid empty relation segment at character {pos}: {}",
                        self.relation
                    ),
                )
            })?;
            current_depth += parts.len();
            *total_relations += parts.len();
            self.relation_parts = parts;
        }

        if !self.field.is_empty() {
            let parts = split_chain(&self.field).map_err(|pos| {
                ValidationError::new(
                    "InvalidFilterFieldFormat",
                    format!("invalid empty field segment at character {pos}: {}", self.field),
                )
            })?;
            if parts.len() > 1 {
                current_depth += parts.len() - 1;
                *total_relations += parts.len() - 1;
            }
            self.field_parts = parts;
        }

        if !self.field.is_empty() || !self.operator.is_empty() {
            let op = Operator::parse(&self.operator).ok_or_else(|| {
                ValidationError::new(
                    "InvalidOperator",
                    format!("invalid operator {:?}", self.operator),
                )
            })?;
            let value = self.value.as_ref().unwrap_or(&Value::Null);
            if op.needs_slice() {
                if !is_slice_of_primitives(value) {
                    return Err(ValidationError::new(
                        "OperatorPrimitiveSliceValue",
                        format!(
                            "{:?} operator needs a slice value of primitive types",
                            self.operator
                        ),
                    )
                    .into());
                }
            } else if !is_primitive(value) {
                return Err(ValidationError::new(
                    "OperatorPrimitiveValue",
                    format!("{:?} operator needs a primitive type value", self.operator),
                )
                .into());
            }
            self.op = Some(op);
        }

        if max_depth > 0 && current_depth > max_depth {
            return Err(ValidationError::new(
                "MaxRelationChainDepth",
                format!("filters nesting depth exceeds max {max_depth}"),
            )
            .into());
        }

        if let Some(not) = &mut self.not {
            not.walk_validate(max_depth, current_depth, total_filters, total_relations)?;
        }
        for child in &mut self.and {
            child.walk_validate(max_depth, current_depth, total_filters, total_relations)?;
        }
        for child in &mut self.or {
            child.walk_validate(max_depth, current_depth, total_filters, total_relations)?;
        }

        self.preprocessed = true;
        Ok(())
    }
}

fn cmp_predicate(column: String, op: &'static str, value: Value) -> Predicate {
    Box::new(move |s: &mut Selector| {
        let cond = Condition::simple(s.c(&column), op, value.clone());
        s.and_where(cond);
    })
}

fn like_pattern(value: &Value) -> String {
    format!("%{}%", plain_string(value))
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn slice_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn is_primitive(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

fn is_slice_of_primitives(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(is_primitive),
        _ => false,
    }
}
