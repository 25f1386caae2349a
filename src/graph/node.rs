use super::bridge::Bridge;
use crate::policy::QueryPolicy;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// One entity field: logical name and the column it is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub storage_name: String,
}

/// A named entity in the graph. Owns its table name, primary-key
/// fields, field map and outgoing bridges, and may carry a policy
/// hook consulted at query build time.
pub struct Node {
    name: String,
    table: String,
    pks: Vec<Field>,
    fields: HashMap<String, Field>,
    bridges: OnceLock<HashMap<String, Arc<Bridge>>>,
    policy: Option<Arc<dyn QueryPolicy>>,
}

impl Node {
    pub(super) fn new(
        name: String,
        table: String,
        pks: Vec<Field>,
        fields: HashMap<String, Field>,
        policy: Option<Arc<dyn QueryPolicy>>,
    ) -> Self {
        Self {
            name,
            table,
            pks,
            fields,
            bridges: OnceLock::new(),
            policy,
        }
    }

    pub(super) fn install_bridges(&self, bridges: HashMap<String, Arc<Bridge>>) {
        // single assignment during graph construction
        let _ = self.bridges.set(bridges);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pks(&self) -> &[Field] {
        &self.pks
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn bridge(&self, relation: &str) -> Option<Arc<Bridge>> {
        self.bridges.get().and_then(|m| m.get(relation).cloned())
    }

    pub fn policy(&self) -> Option<&Arc<dyn QueryPolicy>> {
        self.policy.as_ref()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("pks", &self.pks)
            .finish_non_exhaustive()
    }
}
