//! Database client seam.
//!
//! The engine talks to the database exclusively through the
//! [`Client`] trait: execute one SQL statement, get rows back as
//! dynamic JSON objects, and open read-only transactions. A
//! PostgreSQL binding over `sqlx` lives in [`pg`]; tests substitute
//! an in-memory recording client.

pub mod pg;

use crate::error::Result;
use async_trait::async_trait;

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Standard transaction isolation levels, wire-compatible with the
/// integer levels accepted in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Map the request-level integer to a level. Unknown values fall
    /// back to the engine default.
    pub fn from_level(level: i32) -> Self {
        match level {
            1 => IsolationLevel::ReadUncommitted,
            2 => IsolationLevel::ReadCommitted,
            4 => IsolationLevel::RepeatableRead,
            6 => IsolationLevel::Serializable,
            _ => IsolationLevel::Default,
        }
    }

    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Options for opening a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: true,
        }
    }
}

/// Executes SQL and scans rows. Implementations must be shareable
/// across the request's concurrent tasks.
#[async_trait]
pub trait Client: Send + Sync {
    /// Execute `sql` and return all rows as JSON objects.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>>;

    /// Open a transaction with the given options.
    async fn begin(&self, opts: TxOptions) -> Result<Box<dyn ClientTransaction>>;
}

/// An open transaction. Queries issued through it share the
/// transaction's snapshot; it must be explicitly committed or
/// rolled back.
#[async_trait]
pub trait ClientTransaction: Client {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_levels_map_from_wire_integers() {
        assert_eq!(IsolationLevel::from_level(2), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::from_level(6), IsolationLevel::Serializable);
        assert_eq!(IsolationLevel::from_level(99), IsolationLevel::Default);
    }

    #[test]
    fn default_level_has_no_sql_clause() {
        assert!(IsolationLevel::Default.as_sql().is_none());
        assert_eq!(
            IsolationLevel::RepeatableRead.as_sql(),
            Some("REPEATABLE READ")
        );
    }
}
