//! Nonrecursive rule theory.

use std::collections::{BTreeSet, HashMap};

use crate::formula::{Atom, Formula, Rule, TableKey};
use crate::theory::eval::{derive_goal, select_from, ExternalPolicies};
use crate::theory::store::RuleSet;
use crate::theory::Theory;

/// Facts plus rules, evaluated on demand. Recursion is kept out of this
/// variant by runtime validation, so one dependency-ordered bottom-up
/// pass yields the exact fixpoint.
///
/// Included theories contribute their facts and rules as if they were
/// local. Inclusion is by value: the included theory is owned, and
/// later mutations go through this theory, not the original.
#[derive(Debug, Clone, Default)]
pub struct NonrecursiveTheory {
    content: RuleSet,
    includes: Vec<Theory>,
}

impl NonrecursiveTheory {
    /// An empty theory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a formula; returns whether the content changed.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        self.content.insert(formula)
    }

    /// Deletes a formula; returns whether the content changed.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        self.content.delete(formula)
    }

    /// Makes another theory's content visible as if local.
    pub fn include(&mut self, theory: Theory) {
        self.includes.push(theory);
    }

    /// Instances of `query` derivable from the visible facts and rules.
    /// Only rules in the query's dependency cone are evaluated.
    #[must_use]
    pub fn select(&self, query: &Atom, resolver: &dyn ExternalPolicies) -> BTreeSet<Atom> {
        let (facts, rules) = self.visible();
        let store = derive_goal(&facts, &rules, &query.key(), resolver);
        select_from(&store, query)
    }

    /// Locally stored formulas (includes excluded).
    #[must_use]
    pub fn content(&self) -> Vec<Formula> {
        self.content.content()
    }

    /// Arity of a visible table.
    #[must_use]
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.content
            .arity(table)
            .or_else(|| self.includes.iter().find_map(|t| t.get_arity(table)))
    }

    /// Own content merged with every included theory's, recursively.
    pub(crate) fn visible(&self) -> (HashMap<TableKey, BTreeSet<Atom>>, Vec<Rule>) {
        let mut facts: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        let mut rules = Vec::new();
        self.collect_visible(&mut facts, &mut rules);
        (facts, rules)
    }

    pub(crate) fn collect_visible(
        &self,
        facts: &mut HashMap<TableKey, BTreeSet<Atom>>,
        rules: &mut Vec<Rule>,
    ) {
        for (key, bucket) in self.content.facts() {
            facts.entry(key.clone()).or_default().extend(bucket.iter().cloned());
        }
        rules.extend(self.content.rules().cloned());
        for theory in &self.includes {
            theory.collect_visible(facts, rules);
        }
    }
}
