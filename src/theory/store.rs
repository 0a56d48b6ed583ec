//! Fact/rule storage shared by every theory variant.

use std::collections::{BTreeSet, HashMap};

use crate::formula::{Atom, Formula, Rule, TableKey};

/// A set of facts and rules keyed by the table they define.
///
/// Facts are ground atoms bucketed by their full storage key (policy
/// qualifier and modal included, so `test2:p+` and `p` never mix).
/// Rules are bucketed by head key. Insert/delete are pure set
/// operations returning whether anything changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RuleSet {
    facts: HashMap<TableKey, BTreeSet<Atom>>,
    rules: HashMap<TableKey, Vec<Rule>>,
}

impl RuleSet {
    /// Inserts a formula; returns true if the content changed.
    pub fn insert(&mut self, formula: &Formula) -> bool {
        match formula {
            Formula::Fact(atom) => self.facts.entry(atom.key()).or_default().insert(atom.clone()),
            Formula::Rule(rule) => {
                let bucket = self.rules.entry(rule.head.key()).or_default();
                if bucket.contains(rule) {
                    false
                } else {
                    bucket.push(rule.clone());
                    true
                }
            }
        }
    }

    /// Deletes a formula; returns true if the content changed.
    pub fn delete(&mut self, formula: &Formula) -> bool {
        match formula {
            Formula::Fact(atom) => {
                let key = atom.key();
                let Some(bucket) = self.facts.get_mut(&key) else {
                    return false;
                };
                let removed = bucket.remove(atom);
                if bucket.is_empty() {
                    self.facts.remove(&key);
                }
                removed
            }
            Formula::Rule(rule) => {
                let key = rule.head.key();
                let Some(bucket) = self.rules.get_mut(&key) else {
                    return false;
                };
                let before = bucket.len();
                bucket.retain(|r| r != rule);
                let removed = bucket.len() != before;
                if bucket.is_empty() {
                    self.rules.remove(&key);
                }
                removed
            }
        }
    }

    /// Facts bucketed by storage key.
    pub fn facts(&self) -> &HashMap<TableKey, BTreeSet<Atom>> {
        &self.facts
    }

    /// All stored rules, in no particular order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().flatten()
    }

    /// Every stored formula.
    pub fn content(&self) -> Vec<Formula> {
        let mut out: Vec<Formula> = self
            .facts
            .values()
            .flatten()
            .cloned()
            .map(Formula::Fact)
            .collect();
        out.extend(self.rules().cloned().map(Formula::Rule));
        out
    }

    /// Arity of a plain local table, if any stored fact or rule head
    /// defines it.
    pub fn arity(&self, table: &str) -> Option<usize> {
        let plain = |key: &TableKey| key.policy.is_none() && key.modal.is_none() && key.table == table;
        for (key, bucket) in &self.facts {
            if plain(key) {
                if let Some(atom) = bucket.iter().next() {
                    return Some(atom.arity());
                }
            }
        }
        for (key, bucket) in &self.rules {
            if plain(key) {
                if let Some(rule) = bucket.first() {
                    return Some(rule.head.arity());
                }
            }
        }
        None
    }
}
