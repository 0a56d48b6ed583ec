//! Facts-only theory.

use std::collections::BTreeSet;

use crate::formula::{Atom, Formula};
use crate::theory::eval::select_from;
use crate::theory::store::RuleSet;

/// A theory holding ground facts only. `select` is pure pattern
/// matching; rules are rejected.
#[derive(Debug, Clone, Default)]
pub struct Database {
    facts: RuleSet,
}

impl Database {
    /// An empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fact; rules are refused. Returns whether the content
    /// changed.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        if formula.is_rule() {
            return false;
        }
        self.facts.insert(formula)
    }

    /// Deletes a fact; returns whether the content changed.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        if formula.is_rule() {
            return false;
        }
        self.facts.delete(formula)
    }

    /// Instances of `query` among the stored facts.
    #[must_use]
    pub fn select(&self, query: &Atom) -> BTreeSet<Atom> {
        select_from(self.facts.facts(), query)
    }

    /// Every stored fact.
    #[must_use]
    pub fn content(&self) -> Vec<Formula> {
        self.facts.content()
    }

    /// Arity of a stored table.
    #[must_use]
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.facts.arity(table)
    }
}
