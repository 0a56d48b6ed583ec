//! Materialized rule theory.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::formula::{Atom, Formula, Rule, TableKey};
use crate::theory::eval::{derive, derive_goal, select_from, ExternalPolicies};
use crate::theory::store::RuleSet;

/// Facts plus rules with a cached derived state. Local recursion is
/// allowed; [`MaterializedTheory::refresh`] recomputes the cache one
/// stratum at a time, recursive components iterating to quiescence.
/// `select` reads the cache when it is current and derives on the fly
/// otherwise, so reads stay correct between mutation and refresh.
#[derive(Debug, Clone, Default)]
pub struct MaterializedTheory {
    content: RuleSet,
    cache: HashMap<TableKey, BTreeSet<Atom>>,
    fresh: bool,
}

impl MaterializedTheory {
    /// An empty theory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a formula and marks the cache stale on change.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        let changed = self.content.insert(formula);
        if changed {
            self.fresh = false;
        }
        changed
    }

    /// Deletes a formula and marks the cache stale on change.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        let changed = self.content.delete(formula);
        if changed {
            self.fresh = false;
        }
        changed
    }

    /// Recomputes the derived state from scratch.
    pub fn refresh(&mut self, resolver: &dyn ExternalPolicies) {
        let rules: Vec<Rule> = self.content.rules().cloned().collect();
        debug!("materialized refresh over {} rules", rules.len());
        self.cache = derive(self.content.facts(), &rules, resolver);
        self.fresh = true;
    }

    /// Instances of `query` in the derived state.
    #[must_use]
    pub fn select(&self, query: &Atom, resolver: &dyn ExternalPolicies) -> BTreeSet<Atom> {
        if self.fresh {
            return select_from(&self.cache, query);
        }
        let rules: Vec<Rule> = self.content.rules().cloned().collect();
        let store = derive_goal(self.content.facts(), &rules, &query.key(), resolver);
        select_from(&store, query)
    }

    /// Stored formulas (the base content, not the derived cache).
    #[must_use]
    pub fn content(&self) -> Vec<Formula> {
        self.content.content()
    }

    /// Arity of a stored table.
    #[must_use]
    pub fn arity(&self, table: &str) -> Option<usize> {
        self.content.arity(table)
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Literal;
    use crate::term::Term;
    use crate::theory::eval::NoExternalPolicies;

    fn fact2(table: &str, a: i64, b: i64) -> Formula {
        Formula::fact(Atom::new(table, vec![Term::int(a), Term::int(b)]))
    }

    #[test]
    fn recursive_rules_materialize_to_fixpoint() {
        let mut th = MaterializedTheory::new();
        th.insert(&Formula::rule(
            Atom::new("path", vec![Term::var("x"), Term::var("y")]),
            vec![Literal::pos(Atom::new(
                "edge",
                vec![Term::var("x"), Term::var("y")],
            ))],
        ));
        th.insert(&Formula::rule(
            Atom::new("path", vec![Term::var("x"), Term::var("z")]),
            vec![
                Literal::pos(Atom::new("path", vec![Term::var("x"), Term::var("y")])),
                Literal::pos(Atom::new("edge", vec![Term::var("y"), Term::var("z")])),
            ],
        ));
        th.insert(&fact2("edge", 1, 2));
        th.insert(&fact2("edge", 2, 3));
        th.refresh(&NoExternalPolicies);

        let result = th.select(
            &Atom::new("path", vec![Term::int(1), Term::var("y")]),
            &NoExternalPolicies,
        );
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn stale_cache_still_answers_correctly() {
        let mut th = MaterializedTheory::new();
        th.insert(&Formula::rule(
            Atom::new("p", vec![Term::var("x")]),
            vec![Literal::pos(Atom::new("q", vec![Term::var("x")]))],
        ));
        th.refresh(&NoExternalPolicies);
        th.insert(&Formula::fact(Atom::new("q", vec![Term::int(1)])));
        // No refresh since the insert: the read must not see stale data.
        let result = th.select(&Atom::new("p", vec![Term::var("x")]), &NoExternalPolicies);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn refresh_drops_retracted_consequences() {
        let mut th = MaterializedTheory::new();
        th.insert(&Formula::rule(
            Atom::new("p", vec![Term::var("x")]),
            vec![Literal::pos(Atom::new("q", vec![Term::var("x")]))],
        ));
        let q1 = Formula::fact(Atom::new("q", vec![Term::int(1)]));
        th.insert(&q1);
        th.refresh(&NoExternalPolicies);
        assert_eq!(
            th.select(&Atom::new("p", vec![Term::var("x")]), &NoExternalPolicies).len(),
            1
        );
        th.delete(&q1);
        th.refresh(&NoExternalPolicies);
        assert!(th
            .select(&Atom::new("p", vec![Term::var("x")]), &NoExternalPolicies)
            .is_empty());
    }
}
