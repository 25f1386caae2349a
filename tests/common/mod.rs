//! Shared test fixtures: an in-memory recording client and the
//! blog/HR entity graph used across the integration suite.

use async_trait::async_trait;
use queryhub::client::{Client, ClientTransaction, Row, TxOptions};
use queryhub::config::Config;
use queryhub::error::{ExecError, Result};
use queryhub::graph::{Graph, GraphBuilder, NodeDef, RelationDef, RelationKind};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub type Handler = dyn Fn(&str) -> std::result::Result<Vec<Row>, String> + Send + Sync;

/// Records every statement and transaction event, answering queries
/// through a test-supplied handler.
pub struct MockClient {
    inner: Arc<MockInner>,
}

pub struct MockInner {
    pub queries: Mutex<Vec<String>>,
    pub tx_events: Mutex<Vec<String>>,
    handler: Box<Handler>,
}

impl MockClient {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str) -> std::result::Result<Vec<Row>, String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            inner: Arc::new(MockInner {
                queries: Mutex::new(Vec::new()),
                tx_events: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            }),
        })
    }

    /// Client answering every query with no rows... except scalar
    /// wrappers, which get a single empty row.
    pub fn empty() -> Arc<Self> {
        Self::new(|sql| {
            if sql.starts_with("SELECT (") {
                Ok(vec![Row::new()])
            } else {
                Ok(Vec::new())
            }
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.inner.queries.lock().unwrap().clone()
    }

    pub fn tx_events(&self) -> Vec<String> {
        self.inner.tx_events.lock().unwrap().clone()
    }
}

impl MockInner {
    fn run(&self, sql: &str) -> Result<Vec<Row>> {
        self.queries.lock().unwrap().push(sql.to_string());
        (self.handler)(sql).map_err(|msg| ExecError::message("MockClient.fetch_rows", msg).into())
    }
}

#[async_trait]
impl Client for MockClient {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        self.inner.run(sql)
    }

    async fn begin(&self, opts: TxOptions) -> Result<Box<dyn ClientTransaction>> {
        self.inner
            .tx_events
            .lock()
            .unwrap()
            .push(format!("begin read_only={} {:?}", opts.read_only, opts.isolation));
        Ok(Box::new(MockTx {
            inner: Arc::clone(&self.inner),
        }))
    }
}

pub struct MockTx {
    inner: Arc<MockInner>,
}

#[async_trait]
impl Client for MockTx {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        self.inner.run(sql)
    }

    async fn begin(&self, _opts: TxOptions) -> Result<Box<dyn ClientTransaction>> {
        Err(ExecError::message("MockTx.begin", "nested transactions are not supported").into())
    }
}

#[async_trait]
impl ClientTransaction for MockTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.tx_events.lock().unwrap().push("commit".to_string());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.tx_events.lock().unwrap().push("rollback".to_string());
        Ok(())
    }
}

/// The seeded schema from the end-to-end dataset: users with
/// articles, M2M tags, departments and employees with a
/// self-relation manager/reports pair.
pub fn graph() -> Graph {
    GraphBuilder::new()
        .node(
            NodeDef::new("User", "users")
                .field("id", "id")
                .field("name", "name")
                .field("email", "email")
                .field("age", "age")
                .field("is_active", "is_active")
                .pk("id"),
        )
        .node(
            NodeDef::new("Article", "articles")
                .field("id", "id")
                .field("title", "title")
                .field("author", "author_id")
                .pk("id"),
        )
        .node(
            NodeDef::new("Tag", "tags")
                .field("id", "id")
                .field("name", "name")
                .pk("id"),
        )
        .node(
            NodeDef::new("Department", "departments")
                .field("id", "id")
                .field("name", "name")
                .pk("id"),
        )
        .node(
            NodeDef::new("Employee", "employees")
                .field("id", "id")
                .field("user_id", "user_id")
                .field("department_id", "department_id")
                .field("manager_id", "manager_id")
                .pk("id"),
        )
        .relation(
            RelationDef::new("User", "articles", "Article", RelationKind::O2M, "id", "author_id")
                .inverse("author"),
        )
        .relation(
            RelationDef::new("Article", "tags", "Tag", RelationKind::M2M, "id", "id")
                .pivot("article_tags", "article_id", "tag_id")
                .inverse("articles"),
        )
        .relation(
            RelationDef::new(
                "Department",
                "employees",
                "Employee",
                RelationKind::O2M,
                "id",
                "department_id",
            )
            .inverse("department"),
        )
        .relation(
            RelationDef::new("Employee", "user", "User", RelationKind::O2O, "user_id", "id")
                .inverse("employee"),
        )
        .relation(
            RelationDef::new(
                "Employee",
                "manager",
                "Employee",
                RelationKind::M2O,
                "manager_id",
                "id",
            )
            .inverse("reports"),
        )
        .build()
        .expect("test graph builds")
}

pub fn config() -> Config {
    Config::default()
}

/// Build a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {other}"),
    }
}
