//! Declarative query-bundle orchestration over a relational entity
//! graph.
//!
//! A request is a JSON-shaped [`query::QueryBundle`] describing
//! entity searches and scalar aggregates. The engine validates it
//! against configurable limits, compiles it into SQL selectors using
//! the process-wide [`graph::Graph`], executes the pieces
//! concurrently with optional transactional grouping, and returns a
//! structured response of searches and aggregate values.

pub mod chain;
pub mod client;
pub mod config;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hub;
pub mod logging;
pub mod paginate;
pub mod policy;
pub mod query;
pub mod response;
pub mod scalar;
pub mod selector;

pub use config::Config;
pub use error::{Error, Result};
pub use hub::Hub;
