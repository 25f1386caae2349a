use super::bridge::{Bridge, PivotInfo, RelationInfo, RelationKind};
use super::node::{Field, Node};
use super::Graph;
use crate::error::{QueryBuildError, Result};
use crate::policy::QueryPolicy;
use std::collections::HashMap;
use std::sync::Arc;

/// Declarative node description fed to [`GraphBuilder`].
pub struct NodeDef {
    pub name: String,
    pub table: String,
    /// (logical name, storage column) pairs.
    pub fields: Vec<(String, String)>,
    /// Logical names of the primary-key fields, in key order.
    pub pks: Vec<String>,
    pub policy: Option<Arc<dyn QueryPolicy>>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            pks: Vec::new(),
            policy: None,
        }
    }

    pub fn field(mut self, name: &str, storage: &str) -> Self {
        self.fields.push((name.to_string(), storage.to_string()));
        self
    }

    pub fn pk(mut self, name: &str) -> Self {
        self.pks.push(name.to_string());
        self
    }

    pub fn policy(mut self, policy: Arc<dyn QueryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Declarative relation description. The inverse bridge, when a
/// relation name for it is given, is derived automatically with the
/// paired kind and swapped columns.
pub struct RelationDef {
    pub node: String,
    pub relation: String,
    pub target: String,
    pub kind: RelationKind,
    /// Column on the parent table.
    pub left_column: String,
    /// Column on the child table.
    pub right_column: String,
    pub pivot: Option<PivotInfo>,
    /// Relation name of the inverse bridge on the target node.
    pub inverse: Option<String>,
}

impl RelationDef {
    pub fn new(
        node: &str,
        relation: &str,
        target: &str,
        kind: RelationKind,
        left_column: &str,
        right_column: &str,
    ) -> Self {
        Self {
            node: node.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
            kind,
            left_column: left_column.to_string(),
            right_column: right_column.to_string(),
            pivot: None,
            inverse: None,
        }
    }

    pub fn pivot(mut self, table: &str, left_column: &str, right_column: &str) -> Self {
        self.pivot = Some(PivotInfo {
            table: table.to_string(),
            left_column: left_column.to_string(),
            right_column: right_column.to_string(),
        });
        self
    }

    pub fn inverse(mut self, relation: &str) -> Self {
        self.inverse = Some(relation.to_string());
        self
    }
}

/// Builds the process-wide [`Graph`] from node and relation
/// definitions. This is the runtime half of the codegen contract:
/// one node per schema entity, one forward bridge and one inverse
/// bridge per schema edge (the inverse of a self-relation may be
/// omitted).
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeDef>,
    relations: Vec<RelationDef>,
}

const OP: &str = "Graph.build";

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, def: NodeDef) -> Self {
        self.nodes.push(def);
        self
    }

    pub fn relation(mut self, def: RelationDef) -> Self {
        self.relations.push(def);
        self
    }

    pub fn build(self) -> Result<Graph> {
        let mut graph: Graph = HashMap::with_capacity(self.nodes.len());

        for def in self.nodes {
            if graph.contains_key(&def.name) {
                return Err(QueryBuildError::new(
                    OP,
                    format!("duplicate node {:?}", def.name),
                )
                .into());
            }

            let fields: HashMap<String, Field> = def
                .fields
                .iter()
                .map(|(name, storage)| {
                    (
                        name.clone(),
                        Field {
                            name: name.clone(),
                            storage_name: storage.clone(),
                        },
                    )
                })
                .collect();

            let mut pks = Vec::with_capacity(def.pks.len());
            for pk in &def.pks {
                let field = fields.get(pk).ok_or_else(|| {
                    QueryBuildError::new(
                        OP,
                        format!("primary key {:?} is not a field of node {:?}", pk, def.name),
                    )
                })?;
                pks.push(field.clone());
            }

            graph.insert(
                def.name.clone(),
                Arc::new(Node::new(def.name, def.table, pks, fields, def.policy)),
            );
        }

        let mut bridges: HashMap<String, HashMap<String, Arc<Bridge>>> = HashMap::new();

        for def in &self.relations {
            let parent = graph.get(&def.node).ok_or_else(|| {
                QueryBuildError::new(OP, format!("unknown node {:?}", def.node))
            })?;
            let child = graph.get(&def.target).ok_or_else(|| {
                QueryBuildError::new(OP, format!("unknown node {:?}", def.target))
            })?;

            if def.kind == RelationKind::M2M && def.pivot.is_none() {
                return Err(QueryBuildError::new(
                    OP,
                    format!(
                        "M2M relation {:?} on node {:?} requires pivot metadata",
                        def.relation, def.node
                    ),
                )
                .into());
            }

            let info = RelationInfo {
                kind: def.kind,
                left_column: def.left_column.clone(),
                right_column: def.right_column.clone(),
                pivot: def.pivot.clone(),
            };

            let forward = Arc::new(Bridge::new(info.clone(), parent, Arc::clone(child)));

            if let Some(inverse_name) = &def.inverse {
                let inverse = Arc::new(Bridge::new(info.inverted(), child, Arc::clone(parent)));
                forward.set_inverse(&inverse);
                inverse.set_inverse(&forward);
                Self::register(&mut bridges, &def.target, inverse_name, inverse)?;
            }

            Self::register(&mut bridges, &def.node, &def.relation, forward)?;
        }

        for (node_name, node_bridges) in bridges {
            if let Some(node) = graph.get(&node_name) {
                node.install_bridges(node_bridges);
            }
        }

        Ok(graph)
    }

    fn register(
        bridges: &mut HashMap<String, HashMap<String, Arc<Bridge>>>,
        node: &str,
        relation: &str,
        bridge: Arc<Bridge>,
    ) -> Result<()> {
        let entry = bridges.entry(node.to_string()).or_default();
        if entry.insert(relation.to_string(), bridge).is_some() {
            return Err(QueryBuildError::new(
                OP,
                format!("duplicate relation {:?} on node {:?}", relation, node),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> Graph {
        GraphBuilder::new()
            .node(
                NodeDef::new("User", "users")
                    .field("id", "id")
                    .field("name", "name")
                    .pk("id"),
            )
            .node(
                NodeDef::new("Article", "articles")
                    .field("id", "id")
                    .field("title", "title")
                    .field("author", "author_id")
                    .pk("id"),
            )
            .relation(
                RelationDef::new("User", "articles", "Article", RelationKind::O2M, "id", "author_id")
                    .inverse("author"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn builds_forward_and_inverse_bridges() {
        let graph = two_node_graph();
        let user = graph.get("User").unwrap();
        let article = graph.get("Article").unwrap();

        let forward = user.bridge("articles").unwrap();
        assert_eq!(forward.kind(), RelationKind::O2M);
        assert_eq!(forward.child().name(), "Article");

        let inverse = article.bridge("author").unwrap();
        assert_eq!(inverse.kind(), RelationKind::M2O);
        assert_eq!(inverse.info().left_column, "author_id");
        assert_eq!(inverse.info().right_column, "id");

        // the weak back-references resolve to each other
        assert_eq!(forward.inverse().unwrap().child().name(), "User");
        assert_eq!(inverse.inverse().unwrap().child().name(), "Article");
    }

    #[test]
    fn self_relation_inverse_may_be_omitted() {
        let graph = GraphBuilder::new()
            .node(
                NodeDef::new("Employee", "employees")
                    .field("id", "id")
                    .field("manager", "manager_id")
                    .pk("id"),
            )
            .relation(RelationDef::new(
                "Employee",
                "manager",
                "Employee",
                RelationKind::M2O,
                "manager_id",
                "id",
            ))
            .build()
            .unwrap();

        let bridge = graph.get("Employee").unwrap().bridge("manager").unwrap();
        assert!(bridge.inverse().is_none());
    }

    #[test]
    fn m2m_without_pivot_is_rejected() {
        let err = GraphBuilder::new()
            .node(NodeDef::new("Article", "articles").field("id", "id").pk("id"))
            .node(NodeDef::new("Tag", "tags").field("id", "id").pk("id"))
            .relation(RelationDef::new(
                "Article",
                "tags",
                "Tag",
                RelationKind::M2M,
                "id",
                "id",
            ))
            .build()
            .unwrap_err();
        assert_eq!(err.build_op(), Some("Graph.build"));
    }

    #[test]
    fn unknown_pk_is_rejected() {
        let err = GraphBuilder::new()
            .node(NodeDef::new("User", "users").field("id", "id").pk("uuid"))
            .build()
            .unwrap_err();
        assert_eq!(err.build_op(), Some("Graph.build"));
    }
}
