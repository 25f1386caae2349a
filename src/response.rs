use crate::client::Row;
use crate::paginate::PaginateResponse;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Concurrency-safe string-keyed map used to collect results from
/// parallel tasks. Exposes both snapshot and consuming accessors so
/// the final response can be returned without a redundant copy once
/// all writers have joined.
#[derive(Debug, Default)]
pub struct MapSync<V> {
    inner: RwLock<HashMap<String, V>>,
}

impl<V> MapSync<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.inner.write().expect("map lock poisoned").insert(key.into(), value);
    }

    pub fn merge(&self, other: HashMap<String, V>) {
        let mut guard = self.inner.write().expect("map lock poisoned");
        guard.extend(other);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.write().expect("map lock poisoned").remove(key)
    }

    /// Mutate the value under `key` in place; returns whether it existed.
    pub fn update<F: FnOnce(&mut V)>(&self, key: &str, f: F) -> bool {
        let mut guard = self.inner.write().expect("map lock poisoned");
        match guard.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("map lock poisoned").is_empty()
    }

    /// Consume the collector once all writers have joined.
    pub fn into_inner(self) -> HashMap<String, V> {
        self.inner.into_inner().expect("map lock poisoned")
    }
}

impl<V: Clone> MapSync<V> {
    pub fn get_cloned(&self, key: &str) -> Option<V> {
        self.inner.read().expect("map lock poisoned").get(key).cloned()
    }

    /// Shallow copy for safe iteration without holding the lock.
    pub fn snapshot(&self) -> HashMap<String, V> {
        self.inner.read().expect("map lock poisoned").clone()
    }
}

/// Per-search response metadata.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SearchMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paginate: Option<PaginateResponse>,
    pub count: usize,
}

/// One search result: materialized entities plus metadata.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub data: Vec<Row>,
    pub meta: SearchMeta,
}

impl SearchResponse {
    pub fn new(data: Vec<Row>, count: usize) -> Self {
        Self {
            data,
            meta: SearchMeta {
                paginate: None,
                count,
            },
        }
    }
}

/// Request-level metadata: the aggregate values keyed by alias.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetaResponse {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub aggregates: HashMap<String, Value>,
}

/// The full bundle response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupResponse {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub searches: HashMap<String, SearchResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaResponse>,
}

/// Concurrency-safe collectors backing a [`GroupResponse`] while the
/// bundle executes.
#[derive(Debug, Default)]
pub struct GroupResponseSync {
    pub searches: MapSync<SearchResponse>,
    pub aggregates: MapSync<Value>,
}

impl GroupResponseSync {
    pub fn with_capacity(searches: usize, aggregates: usize) -> Self {
        Self {
            searches: MapSync::with_capacity(searches),
            aggregates: MapSync::with_capacity(aggregates),
        }
    }

    /// Consume the collectors into the final response, avoiding a
    /// copy. Only call after every writer has joined.
    pub fn into_response(self) -> GroupResponse {
        let searches = self.searches.into_inner();
        let aggregates = self.aggregates.into_inner();
        GroupResponse {
            searches,
            meta: if aggregates.is_empty() {
                None
            } else {
                Some(MetaResponse { aggregates })
            },
        }
    }

    /// Snapshot copy, safe while writers may still be running.
    pub fn snapshot_response(&self) -> GroupResponse {
        let aggregates = self.aggregates.snapshot();
        GroupResponse {
            searches: self.searches.snapshot(),
            meta: if aggregates.is_empty() {
                None
            } else {
                Some(MetaResponse { aggregates })
            },
        }
    }
}
