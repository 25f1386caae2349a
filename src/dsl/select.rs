use crate::error::{QueryBuildError, Result};
use crate::graph::Node;
use serde::Deserialize;

/// Column projection: logical field names resolved to storage
/// columns at build time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Select(pub Vec<String>);

impl Select {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve each logical field to its storage column name.
    /// Returns `None` when no projection was requested.
    pub fn resolve(&self, node: &Node) -> Result<Option<Vec<String>>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        let mut columns = Vec::with_capacity(self.0.len());
        for name in &self.0 {
            let field = node.field_by_name(name).ok_or_else(|| {
                QueryBuildError::new(
                    "Select.predicate",
                    format!("node {:?} has no field named {:?}", node.name(), name),
                )
            })?;
            columns.push(field.storage_name.clone());
        }
        Ok(Some(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, NodeDef};

    fn node() -> crate::graph::Graph {
        GraphBuilder::new()
            .node(
                NodeDef::new("User", "users")
                    .field("id", "id")
                    .field("isActive", "is_active")
                    .pk("id"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_storage_names() {
        let graph = node();
        let user = graph.get("User").unwrap();
        let select = Select(vec!["id".to_string(), "isActive".to_string()]);
        assert_eq!(
            select.resolve(user).unwrap(),
            Some(vec!["id".to_string(), "is_active".to_string()])
        );
    }

    #[test]
    fn unknown_field_is_a_build_error() {
        let graph = node();
        let user = graph.get("User").unwrap();
        let select = Select(vec!["nope".to_string()]);
        let err = select.resolve(user).unwrap_err();
        assert_eq!(err.build_op(), Some("Select.predicate"));
    }

    #[test]
    fn empty_projection_resolves_to_none() {
        let graph = node();
        let user = graph.get("User").unwrap();
        assert_eq!(Select::default().resolve(user).unwrap(), None);
    }
}
