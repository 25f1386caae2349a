//! Query compilation and bundle execution.
//!
//! [`QueryOptions`] compiles the DSL fragments of one search into an
//! executable build; [`NamedQuery`] adds key assignment and
//! transaction classification; [`QueryGroup`] and [`TxQueryGroup`]
//! assemble searches and overall aggregates; [`QueryBundle`] is the
//! full request, classified and executed concurrently.

pub mod bundle;
pub mod group;
pub mod named;
pub mod options;
pub mod transaction;

pub use bundle::{ClassifiedBuilds, QueryBundle};
pub use group::{QueryGroup, TxQueryGroup};
pub use named::{NamedQuery, NamedQueryBuild, TargetedQuery};
pub use options::{QueryOptions, QueryOptionsBuild};
pub use transaction::TxQueryGroupBuild;
