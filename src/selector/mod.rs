//! SQL selector builder.
//!
//! A `Selector` assembles one SELECT statement: projection, joins,
//! WHERE conditions, grouping, ordering and limits, plus the two
//! composition devices the DSL compiler leans on, correlated
//! sub-selects appended to the projection and derived-table joins.
//!
//! Lowering a DSL fragment produces [`Predicate`] values: small
//! callbacks that mutate a selector. The compile step opens a fresh
//! selector per query and applies every predicate in order.

pub mod builder;
pub mod condition;
pub mod join;

pub use builder::Selector;
pub use condition::Condition;
pub use join::{Join, JoinKind};

/// A selector-mutating callback produced by DSL lowering.
pub type Predicate = Box<dyn Fn(&mut Selector) + Send + Sync>;

/// Fold many selector mutators into one.
pub fn combine_predicates(preds: Vec<Predicate>) -> Predicate {
    Box::new(move |s: &mut Selector| {
        for p in &preds {
            p(s);
        }
    })
}

/// Negate a predicate: its conditions are captured, conjoined and
/// wrapped in NOT.
pub fn not_predicate(pred: Predicate) -> Predicate {
    Box::new(move |s: &mut Selector| {
        let conditions = s.capture_conditions(&pred);
        if !conditions.is_empty() {
            s.and_where(Condition::Not(Box::new(Condition::And(conditions))));
        }
    })
}

/// Disjoin predicates: each predicate's conditions form one OR branch.
pub fn or_predicates(preds: Vec<Predicate>) -> Predicate {
    Box::new(move |s: &mut Selector| {
        let mut branches = Vec::with_capacity(preds.len());
        for pred in &preds {
            branches.push(Condition::And(s.capture_conditions(pred)));
        }
        if !branches.is_empty() {
            s.and_where(Condition::Or(branches));
        }
    })
}
