//! Dotted-chain resolution over the entity graph.

use crate::graph::{Bridge, Node};
use std::fmt;
use std::sync::Arc;

/// Split a dotted path into non-empty segments. On failure, returns
/// the byte position of the first empty segment.
pub fn split_chain(path: &str) -> Result<Vec<String>, usize> {
    let parts: Vec<String> = path.split('.').map(str::to_string).collect();
    let mut pos = 0;
    for part in &parts {
        if part.is_empty() {
            return Err(pos);
        }
        pos += part.len() + 1;
    }
    Ok(parts)
}

/// Failure while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A field segment appeared before the end of the chain.
    Broken { field: String, table: String },
    /// A segment is neither a relation nor a field of the current node.
    UnknownLink { segment: String, table: String },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Broken { field, table } => write!(
                f,
                "chain broken: the {field:?} field of {table:?} cannot be in the middle of the chain"
            ),
            ChainError::UnknownLink { segment, table } => {
                write!(f, "{segment:?} isn't field or bridge of {table:?}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

/// Walk `parts` from `start`: each segment is tried as a relation
/// first, then as a field. A field segment is accepted only as the
/// last segment. Returns the final node, the terminal field name (or
/// `None`) and the bridges traversed in order.
pub fn resolve_chain(
    start: &Arc<Node>,
    parts: &[String],
) -> Result<(Arc<Node>, Option<String>, Vec<Arc<Bridge>>), ChainError> {
    let mut current = Arc::clone(start);
    let mut bridges = Vec::with_capacity(parts.len());
    let mut field = None;

    for (i, segment) in parts.iter().enumerate() {
        if let Some(bridge) = current.bridge(segment) {
            current = Arc::clone(bridge.child());
            bridges.push(bridge);
        } else if current.field_by_name(segment).is_some() {
            if i != parts.len() - 1 {
                return Err(ChainError::Broken {
                    field: segment.clone(),
                    table: current.table().to_string(),
                });
            }
            field = Some(segment.clone());
        } else {
            return Err(ChainError::UnknownLink {
                segment: segment.clone(),
                table: current.table().to_string(),
            });
        }
    }

    Ok((current, field, bridges))
}
