//! Entity graph abstractions.
//!
//! A [`Graph`] maps node names to [`Node`]s describing tables,
//! columns and primary keys; [`Bridge`]s describe directed relations
//! between nodes in one of four kinds (O2O, O2M, M2O, M2M, the last
//! carrying pivot metadata). The graph is built once from schema
//! metadata by [`GraphBuilder`] and shared read-only by all requests.

pub mod bridge;
pub mod builder;
pub mod node;

pub use bridge::{Bridge, PivotInfo, RelationInfo, RelationKind};
pub use builder::{GraphBuilder, NodeDef, RelationDef};
pub use node::{Field, Node};

use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from node name to node; process-wide and immutable after
/// construction.
pub type Graph = HashMap<String, Arc<Node>>;
