//! Action description theory.

use std::collections::{BTreeSet, HashMap};

use crate::formula::{Atom, Formula, Rule, TableKey};
use crate::term::{Term, Value};
use crate::theory::eval::{derive_goal, select_from, ExternalPolicies};
use crate::theory::store::RuleSet;
use crate::theory::Theory;

/// Table whose facts declare action names.
const ACTION_TABLE: &str = "action";

/// A theory describing actions and their consequences. Evaluation is
/// the nonrecursive semantics; in addition, `action("name")` facts are
/// tracked as the set of declared actions consumed by simulation.
#[derive(Debug, Clone, Default)]
pub struct ActionTheory {
    content: RuleSet,
    actions: BTreeSet<String>,
    includes: Vec<Theory>,
}

impl ActionTheory {
    /// An empty theory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a formula; `action("name")` facts also register the
    /// declared action.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        let changed = self.content.insert(formula);
        if changed {
            if let Some(name) = Self::declared_action(formula) {
                self.actions.insert(name);
            }
        }
        changed
    }

    /// Deletes a formula, unregistering a declared action when its
    /// declaration fact is removed.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        let changed = self.content.delete(formula);
        if changed {
            if let Some(name) = Self::declared_action(formula) {
                self.actions.remove(&name);
            }
        }
        changed
    }

    /// Names declared via `action("name")` facts.
    #[must_use]
    pub fn actions(&self) -> &BTreeSet<String> {
        &self.actions
    }

    /// True if `table` is a declared action.
    #[must_use]
    pub fn declares(&self, table: &str) -> bool {
        self.actions.contains(table)
    }

    /// Makes another theory's content visible as if local. Simulation
    /// composes the action theory with the working target state this
    /// way.
    pub fn include(&mut self, theory: Theory) {
        self.includes.push(theory);
    }

    /// Instances of `query` derivable from the visible facts and rules.
    #[must_use]
    pub fn select(&self, query: &Atom, resolver: &dyn ExternalPolicies) -> BTreeSet<Atom> {
        let mut facts: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        let mut rules = Vec::new();
        self.collect_visible(&mut facts, &mut rules);
        let store = derive_goal(&facts, &rules, &query.key(), resolver);
        select_from(&store, query)
    }

    /// Every stored formula.
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
        for theory in &self.includes {
            theory.collect_visible(facts, rules);
        }
    }

    fn declared_action(formula: &Formula) -> Option<String> {
        let Formula::Fact(atom) = formula else {
            return None;
        };
        if atom.policy.is_some() || atom.modal.is_some() || atom.table != ACTION_TABLE {
            return None;
        }
        match atom.args.as_slice() {
            [Term::Constant(Value::Str(name))] => Some(name.clone()),
            _ => None,
        }
    }
}
