//! Per-node policy hook.
//!
//! A node may carry a policy consulted at well-defined build phases.
//! The policy sees the operation being built and may inject an
//! additional WHERE predicate, skip, or abort the build. Policies
//! are only consulted for contexts minted by the engine while a
//! request is in flight; outside of one they degrade to skip.

use crate::error::{Error, Result};
use crate::graph::Node;
use crate::selector::Predicate;

/// The build phase a policy is consulted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    RootQuery,
    IncludeQuery,
    Aggregate,
    AggregateOverall,
    CountPaginate,
}

/// Outcome of a policy evaluation.
pub enum PolicyDecision {
    /// No opinion; continue without a policy predicate.
    Skip,
    /// Accept, optionally injecting a selector predicate.
    Allow(Option<Predicate>),
    /// Abort the build with this error.
    Deny(Error),
}

/// Hook implemented by nodes that restrict what queries may see.
pub trait QueryPolicy: Send + Sync {
    fn enforce(&self, ctx: &PolicyContext, op: QueryOp) -> PolicyDecision;
}

/// Request-scoped token. Only the engine constructs an in-request
/// context; the default context makes every policy skip.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyContext {
    in_request: bool,
}

impl PolicyContext {
    /// Context minted by the engine for an in-flight request.
    pub(crate) fn in_request() -> Self {
        Self { in_request: true }
    }

    pub fn is_in_request(&self) -> bool {
        self.in_request
    }
}

/// Evaluate the node's policy for `op`, returning the optional
/// predicate to install.
pub fn enforce_policy(
    ctx: &PolicyContext,
    node: &Node,
    op: QueryOp,
) -> Result<Option<Predicate>> {
    if !ctx.in_request {
        return Ok(None);
    }
    match node.policy() {
        None => Ok(None),
        Some(policy) => match policy.enforce(ctx, op) {
            PolicyDecision::Skip => Ok(None),
            PolicyDecision::Allow(modifier) => Ok(modifier),
            PolicyDecision::Deny(err) => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryBuildError;
    use crate::graph::{GraphBuilder, NodeDef};
    use crate::selector::{Condition, Selector};
    use std::sync::Arc;

    struct DenyAggregates;

    impl QueryPolicy for DenyAggregates {
        fn enforce(&self, _ctx: &PolicyContext, op: QueryOp) -> PolicyDecision {
            match op {
                QueryOp::Aggregate | QueryOp::AggregateOverall => PolicyDecision::Deny(
                    QueryBuildError::new("Policy.enforce", "aggregates forbidden").into(),
                ),
                QueryOp::RootQuery => PolicyDecision::Allow(Some(Box::new(|s: &mut Selector| {
                    let cond = Condition::simple(s.c("tenant_id"), "=", serde_json::json!(7));
                    s.and_where(cond);
                }))),
                _ => PolicyDecision::Skip,
            }
        }
    }

    fn guarded_node() -> crate::graph::Graph {
        GraphBuilder::new()
            .node(
                NodeDef::new("User", "users")
                    .field("id", "id")
                    .pk("id")
                    .policy(Arc::new(DenyAggregates)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn policy_skips_outside_requests() {
        let graph = guarded_node();
        let node = graph.get("User").unwrap();
        let ctx = PolicyContext::default();
        assert!(enforce_policy(&ctx, node, QueryOp::Aggregate)
            .unwrap()
            .is_none());
    }

    #[test]
    fn policy_denies_and_allows_in_request() {
        let graph = guarded_node();
        let node = graph.get("User").unwrap();
        let ctx = PolicyContext::in_request();

        assert!(enforce_policy(&ctx, node, QueryOp::Aggregate).is_err());

        let pred = enforce_policy(&ctx, node, QueryOp::RootQuery)
            .unwrap()
            .expect("root query modifier");
        let mut sel = Selector::new("users");
        pred(&mut sel);
        assert!(sel.build_sql().contains("t0.tenant_id = 7"));
    }
}
