//! Scalar query execution.
//!
//! A scalar query is a SELECT returning exactly one value in exactly
//! one row. Many scalars are batched into a single statement of the
//! form `SELECT (sub1) AS a1, (sub2) AS a2, …`; a flat list is split
//! into chunks of at most the configured size.

use crate::client::Client;
use crate::error::{ExecError, Result};
use crate::executor::TaskGroup;
use crate::response::MapSync;
use crate::selector::Selector;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Typed destination of a scalar scan: COUNT produces a nullable
/// 64-bit integer, the numeric aggregates a nullable float.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarDest {
    Int,
    Float,
}

/// One scalar subquery with its unique SQL alias.
#[derive(Debug, Clone)]
pub struct ScalarQuery {
    pub selector: Selector,
    pub key: String,
    pub dest: ScalarDest,
}

/// Execute one scalar query and normalize the scanned value.
pub async fn execute_scalar<C: Client + ?Sized>(client: &C, scalar: &ScalarQuery) -> Result<Value> {
    let sql = format!("SELECT ({}) AS {}", scalar.selector.build_sql(), scalar.key);
    let rows = client.fetch_rows(&sql).await?;
    let row = rows
        .first()
        .ok_or_else(|| ExecError::message("ExecuteScalar", "no rows returned"))?;
    scan_value(row.get(&scalar.key), scalar)
}

/// Execute many scalar queries in one SELECT. Empty input returns an
/// empty result without touching the database.
pub async fn execute_scalars<C: Client + ?Sized>(
    client: &C,
    scalars: &[ScalarQuery],
) -> Result<HashMap<String, Value>> {
    match scalars.len() {
        0 => Ok(HashMap::new()),
        1 => {
            let value = execute_scalar(client, &scalars[0]).await?;
            Ok(HashMap::from([(scalars[0].key.clone(), value)]))
        }
        _ => {
            let fields: Vec<String> = scalars
                .iter()
                .map(|q| format!("({}) AS {}", q.selector.build_sql(), q.key))
                .collect();
            let sql = format!("SELECT {}", fields.join(", "));
            let rows = client.fetch_rows(&sql).await?;
            let row = rows
                .first()
                .ok_or_else(|| ExecError::message("ExecuteScalars", "no rows returned"))?;

            let mut out = HashMap::with_capacity(scalars.len());
            for scalar in scalars {
                out.insert(scalar.key.clone(), scan_value(row.get(&scalar.key), scalar)?);
            }
            Ok(out)
        }
    }
}

/// Schedule one task per scalar group, each running the appropriate
/// single- or multi-scalar variant and merging results into the
/// shared response map.
pub fn schedule_scalar_groups(
    tasks: &mut TaskGroup,
    client: Arc<dyn Client>,
    response: Arc<MapSync<Value>>,
    groups: Vec<Vec<ScalarQuery>>,
) {
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let client = Arc::clone(&client);
        let response = Arc::clone(&response);
        tasks.spawn(async move {
            let values = execute_scalars(client.as_ref(), &group).await?;
            response.merge(values);
            Ok(())
        });
    }
}

/// Split a flat list into chunks of at most `size`. Non-positive or
/// oversized `size` keeps the input as a single chunk.
pub fn split_in_chunks<T: Clone>(input: &[T], size: usize) -> Vec<Vec<T>> {
    if input.is_empty() {
        return Vec::new();
    }
    if size == 0 || size >= input.len() {
        return vec![input.to_vec()];
    }
    input.chunks(size).map(|c| c.to_vec()).collect()
}

fn scan_value(raw: Option<&Value>, scalar: &ScalarQuery) -> Result<Value> {
    let value = raw.unwrap_or(&Value::Null);
    if value.is_null() {
        return Ok(Value::Null);
    }
    match scalar.dest {
        ScalarDest::Int => match value {
            Value::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or_default() as i64)),
            Value::String(s) => s.parse::<i64>().map(Value::from).map_err(|_| {
                ExecError::message(
                    "ExecuteScalar",
                    format!("scalar {:?} is not an integer: {s:?}", scalar.key),
                )
                .into()
            }),
            other => Err(ExecError::message(
                "ExecuteScalar",
                format!("scalar {:?} has unexpected type: {other}", scalar.key),
            )
            .into()),
        },
        ScalarDest::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    ExecError::message(
                        "ExecuteScalar",
                        format!("scalar {:?} is not numeric: {s:?}", scalar.key),
                    )
                    .into()
                }),
            other => Err(ExecError::message(
                "ExecuteScalar",
                format!("scalar {:?} has unexpected type: {other}", scalar.key),
            )
            .into()),
        },
    }
}

/// Move projected aggregate columns off an entity row into its
/// `meta.aggregates` object, normalizing each value.
pub(crate) fn extract_row_aggregates(row: &mut crate::client::Row, aliases: &[String]) {
    let mut aggregates = serde_json::Map::with_capacity(aliases.len());
    for alias in aliases {
        let value = row.remove(alias).unwrap_or(Value::Null);
        aggregates.insert(alias.clone(), normalize_aggregate_value(&value));
    }
    let meta = serde_json::json!({ "aggregates": aggregates });
    row.insert("meta".to_string(), meta);
}

/// Normalize a driver value surfaced in per-row aggregate metadata:
/// numbers pass through, numeric strings parse to floats, SQL NULL
/// stays null.
pub fn normalize_aggregate_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Number(_) | Value::Bool(_) => value.clone(),
        Value::String(s) => match s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => value.clone(),
        },
        other => other.clone(),
    }
}
