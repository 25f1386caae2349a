use super::node::Node;
use crate::selector::{Condition, Predicate, Selector};
use std::sync::{Arc, OnceLock, Weak};

/// The four relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    O2O,
    O2M,
    M2O,
    M2M,
}

impl RelationKind {
    /// Kind of the inverse relation: O2M pairs with M2O, O2O and
    /// M2M pair with themselves.
    pub fn inverse(&self) -> RelationKind {
        match self {
            RelationKind::O2O => RelationKind::O2O,
            RelationKind::O2M => RelationKind::M2O,
            RelationKind::M2O => RelationKind::O2M,
            RelationKind::M2M => RelationKind::M2M,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelationKind::O2O => "O2O",
            RelationKind::O2M => "O2M",
            RelationKind::M2O => "M2O",
            RelationKind::M2M => "M2M",
        }
    }
}

/// Pivot table metadata, carried by M2M relations only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotInfo {
    pub table: String,
    pub left_column: String,
    pub right_column: String,
}

impl PivotInfo {
    fn inverted(&self) -> PivotInfo {
        PivotInfo {
            table: self.table.clone(),
            left_column: self.right_column.clone(),
            right_column: self.left_column.clone(),
        }
    }
}

/// Column wiring of one directed relation: `left_column` lives on
/// the parent table, `right_column` on the child table. For M2M both
/// sides go through the pivot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub kind: RelationKind,
    pub left_column: String,
    pub right_column: String,
    pub pivot: Option<PivotInfo>,
}

impl RelationInfo {
    pub(super) fn inverted(&self) -> RelationInfo {
        RelationInfo {
            kind: self.kind.inverse(),
            left_column: self.right_column.clone(),
            right_column: self.left_column.clone(),
            pivot: self.pivot.as_ref().map(PivotInfo::inverted),
        }
    }
}

/// A directed relation from a parent node to a child node. The
/// forward link owns the child; the inverse bridge is held weakly
/// and resolved during graph construction (the bridge graph is
/// cyclic by construction).
pub struct Bridge {
    info: RelationInfo,
    parent: Weak<Node>,
    child: Arc<Node>,
    inverse: OnceLock<Weak<Bridge>>,
}

impl Bridge {
    pub(super) fn new(info: RelationInfo, parent: &Arc<Node>, child: Arc<Node>) -> Self {
        Self {
            info,
            parent: Arc::downgrade(parent),
            child,
            inverse: OnceLock::new(),
        }
    }

    pub(super) fn set_inverse(&self, inverse: &Arc<Bridge>) {
        let _ = self.inverse.set(Arc::downgrade(inverse));
    }

    pub fn info(&self) -> &RelationInfo {
        &self.info
    }

    pub fn kind(&self) -> RelationKind {
        self.info.kind
    }

    pub fn child(&self) -> &Arc<Node> {
        &self.child
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    /// The inverse bridge, if one was registered. The inverse of a
    /// self-relation may be omitted.
    pub fn inverse(&self) -> Option<Arc<Bridge>> {
        self.inverse.get().and_then(Weak::upgrade)
    }

    /// Join the child table onto a selector whose `outer_alias`
    /// carries this bridge's parent columns. Returns the alias of
    /// the joined child table.
    pub fn join(&self, sel: &mut Selector, outer_alias: &str) -> String {
        match (&self.info.kind, &self.info.pivot) {
            (RelationKind::M2M, Some(pivot)) => {
                let pivot_alias = sel.fresh_alias();
                sel.join(
                    &pivot.table,
                    &pivot_alias,
                    format!(
                        "{}.{} = {}.{}",
                        pivot_alias, pivot.left_column, outer_alias, self.info.left_column
                    ),
                );
                let child_alias = sel.fresh_alias();
                sel.join(
                    self.child.table(),
                    &child_alias,
                    format!(
                        "{}.{} = {}.{}",
                        child_alias, self.info.right_column, pivot_alias, pivot.right_column
                    ),
                );
                child_alias
            }
            _ => {
                let child_alias = sel.fresh_alias();
                sel.join(
                    self.child.table(),
                    &child_alias,
                    format!(
                        "{}.{} = {}.{}",
                        child_alias, self.info.right_column, outer_alias, self.info.left_column
                    ),
                );
                child_alias
            }
        }
    }

    /// Relation-subquery filter: restrict the enclosing rows to
    /// those having at least one related child matching `pred`.
    pub fn filter_with(self: &Arc<Self>, pred: Predicate) -> Predicate {
        let bridge = Arc::clone(self);
        Box::new(move |s: &mut Selector| {
            let outer_alias = s.from_alias().to_string();
            let mut sub = s.sub_select(bridge.child.table());
            sub.select_fields(vec!["1".to_string()]);

            match (&bridge.info.kind, &bridge.info.pivot) {
                (RelationKind::M2M, Some(pivot)) => {
                    let pivot_alias = sub.fresh_alias();
                    let child_alias = sub.from_alias().to_string();
                    sub.join(
                        &pivot.table,
                        &pivot_alias,
                        format!(
                            "{}.{} = {}.{}",
                            pivot_alias, pivot.right_column, child_alias, bridge.info.right_column
                        ),
                    );
                    sub.and_where(Condition::columns_eq(
                        Selector::qualify(&pivot_alias, &pivot.left_column),
                        Selector::qualify(&outer_alias, &bridge.info.left_column),
                    ));
                }
                _ => {
                    let cond = Condition::columns_eq(
                        sub.c(&bridge.info.right_column),
                        Selector::qualify(&outer_alias, &bridge.info.left_column),
                    );
                    sub.and_where(cond);
                }
            }

            pred(&mut sub);
            let subquery = sub.build_sql();
            s.and_where(Condition::Exists { subquery });
        })
    }

    /// Existence filter with no inner predicate.
    pub fn filter(self: &Arc<Self>) -> Predicate {
        self.filter_with(Box::new(|_| {}))
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("info", &self.info)
            .field("child", &self.child.name())
            .finish_non_exhaustive()
    }
}
