//! Theory variants: the per-policy containers of facts and rules.
//!
//! A policy's content lives in exactly one [`Theory`], a closed enum
//! over the four variants. All variants share one capability surface
//! (insert/delete/select/content/arity); what differs is how much
//! derivation each one performs and when.

mod action;
mod database;
mod eval;
mod materialized;
mod nonrecursive;
mod store;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::formula::{Atom, Formula, Rule, TableKey};

pub use action::ActionTheory;
pub use database::Database;
pub use eval::{ExternalPolicies, NoExternalPolicies};
pub use materialized::MaterializedTheory;
pub use nonrecursive::NonrecursiveTheory;

pub(crate) use eval::{derive, derive_goal};

/// The evaluation discipline of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryKind {
    /// Ground facts only.
    Database,
    /// Facts and rules, no local recursion, evaluated on demand.
    Nonrecursive,
    /// Facts and rules, local recursion allowed, derived state cached.
    Materialized,
    /// Action descriptions consumed by simulation.
    Action,
}

/// One policy's content.
#[derive(Debug, Clone)]
pub enum Theory {
    /// See [`Database`].
    Database(Database),
    /// See [`NonrecursiveTheory`].
    Nonrecursive(NonrecursiveTheory),
    /// See [`MaterializedTheory`].
    Materialized(MaterializedTheory),
    /// See [`ActionTheory`].
    Action(ActionTheory),
}

impl Theory {
    /// An empty theory of the given kind.
    #[must_use]
    pub fn new(kind: TheoryKind) -> Self {
        match kind {
            TheoryKind::Database => Self::Database(Database::new()),
            TheoryKind::Nonrecursive => Self::Nonrecursive(NonrecursiveTheory::new()),
            TheoryKind::Materialized => Self::Materialized(MaterializedTheory::new()),
            TheoryKind::Action => Self::Action(ActionTheory::new()),
        }
    }

    /// This theory's kind.
    #[must_use]
    pub const fn kind(&self) -> TheoryKind {
        match self {
            Self::Database(_) => TheoryKind::Database,
            Self::Nonrecursive(_) => TheoryKind::Nonrecursive,
            Self::Materialized(_) => TheoryKind::Materialized,
            Self::Action(_) => TheoryKind::Action,
        }
    }

    /// Inserts a formula; returns whether the content changed.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        match self {
            Self::Database(t) => t.insert(formula),
            Self::Nonrecursive(t) => t.insert(formula),
            Self::Materialized(t) => t.insert(formula),
            Self::Action(t) => t.insert(formula),
        }
    }

    /// Deletes a formula; returns whether the content changed.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        match self {
            Self::Database(t) => t.delete(formula),
            Self::Nonrecursive(t) => t.delete(formula),
            Self::Materialized(t) => t.delete(formula),
            Self::Action(t) => t.delete(formula),
        }
    }

    /// Instances of `query` this theory derives, resolving cross-policy
    /// references through `resolver`.
    #[must_use]
    pub fn select(&self, query: &Atom, resolver: &dyn ExternalPolicies) -> BTreeSet<Atom> {
        match self {
            Self::Database(t) => t.select(query),
            Self::Nonrecursive(t) => t.select(query, resolver),
            Self::Materialized(t) => t.select(query, resolver),
            Self::Action(t) => t.select(query, resolver),
        }
    }

    /// Every stored formula, in no particular order.
    #[must_use]
    pub fn content(&self) -> Vec<Formula> {
        match self {
            Self::Database(t) => t.content(),
            Self::Nonrecursive(t) => t.content(),
            Self::Materialized(t) => t.content(),
            Self::Action(t) => t.content(),
        }
    }

    /// Deterministic one-formula-per-line rendering of the content.
    #[must_use]
    pub fn content_string(&self) -> String {
        let mut lines: Vec<String> = self.content().iter().map(ToString::to_string).collect();
        lines.sort();
        lines.join("\n")
    }

    /// Arity of a table, from stored facts and rule heads.
    #[must_use]
    pub fn get_arity(&self, table: &str) -> Option<usize> {
        match self {
            Self::Database(t) => t.arity(table),
            Self::Nonrecursive(t) => t.arity(table),
            Self::Materialized(t) => t.arity(table),
            Self::Action(t) => t.arity(table),
        }
    }

    /// Recomputes cached derived state. No-op for uncached variants.
    pub fn refresh(&mut self, resolver: &dyn ExternalPolicies) {
        if let Self::Materialized(t) = self {
            t.refresh(resolver);
        }
    }

    /// The action view of this theory, if it is one.
    #[must_use]
    pub const fn as_action(&self) -> Option<&ActionTheory> {
        match self {
            Self::Action(t) => Some(t),
            _ => None,
        }
    }

    /// The nonrecursive view of this theory, mutable, if it is one.
    pub fn as_nonrecursive_mut(&mut self) -> Option<&mut NonrecursiveTheory> {
        match self {
            Self::Nonrecursive(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn collect_visible(
        &self,
        facts: &mut HashMap<TableKey, BTreeSet<Atom>>,
        rules: &mut Vec<Rule>,
    ) {
        match self {
            Self::Database(t) => {
                for formula in t.content() {
                    if let Formula::Fact(atom) = formula {
                        facts.entry(atom.key()).or_default().insert(atom);
                    }
                }
            }
            Self::Nonrecursive(t) => t.collect_visible(facts, rules),
            Self::Materialized(t) => t.collect_visible(facts, rules),
            Self::Action(t) => t.collect_visible(facts, rules),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Literal;
    use crate::term::Term;

    #[test]
    fn kind_round_trips_through_new() {
        for kind in [
            TheoryKind::Database,
            TheoryKind::Nonrecursive,
            TheoryKind::Materialized,
            TheoryKind::Action,
        ] {
            assert_eq!(Theory::new(kind).kind(), kind);
        }
    }

    #[test]
    fn content_string_is_sorted_and_deterministic() {
        let mut th = Theory::new(TheoryKind::Nonrecursive);
        th.insert(&Formula::fact(Atom::new("q", vec![Term::int(2)])));
        th.insert(&Formula::fact(Atom::new("p", vec![Term::int(1)])));
        th.insert(&Formula::rule(
            Atom::new("r", vec![Term::var("x")]),
            vec![Literal::pos(Atom::new("p", vec![Term::var("x")]))],
        ));
        assert_eq!(th.content_string(), "p(1)\nq(2)\nr(x) :- p(x)");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&TheoryKind::Nonrecursive).unwrap();
        assert_eq!(json, "\"nonrecursive\"");
    }
}
