//! Speculative evaluation: run a sequence of updates and action
//! invocations against a scratch copy of the state, answer a query,
//! and restore everything.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::formula::{Atom, Event, Formula, Modal, Rule, TableKey};
use crate::runtime::Runtime;
use crate::theory::{derive, derive_goal, Theory};

impl Runtime {
    /// Evaluates `query` in `target` as if `sequence` had been applied,
    /// then restores the pre-call state — also on error.
    ///
    /// Each step is one of:
    /// - a modal fact (`p+(2)`, possibly policy-qualified) — a direct
    ///   state update;
    /// - a ground fact naming an action declared in `action_policy` —
    ///   an invocation whose consequences are derived from the action
    ///   theory;
    /// - a rule with a modal head — its body runs against the working
    ///   target state and every derived head is a state update;
    /// - a rule with a declared-action head — its body runs against the
    ///   working target state and every derived head is an invocation.
    ///
    /// Within one step, a fact derived with both `+` and `-` is
    /// inserted (insert wins). With `delta` set, the result is the net
    /// change of the query relative to the pre-simulation state, each
    /// atom tagged `+` or `-`.
    pub fn simulate(
        &mut self,
        query: &Atom,
        target: &str,
        sequence: Vec<Formula>,
        action_policy: &str,
        delta: bool,
    ) -> EngineResult<BTreeSet<Atom>> {
        let theories = self.theories.clone();
        let graph = self.graph.clone();
        let default_target = self.default_target.clone();
        let result = self.simulate_inner(query, target, sequence, action_policy, delta);
        self.theories = theories;
        self.graph = graph;
        self.default_target = default_target;
        result
    }

    fn simulate_inner(
        &mut self,
        query: &Atom,
        target: &str,
        sequence: Vec<Formula>,
        action_policy: &str,
        delta: bool,
    ) -> EngineResult<BTreeSet<Atom>> {
        self.policy_object(target)?;
        let declared = match self.policy_object(action_policy)? {
            Theory::Action(theory) => theory.actions().clone(),
            _ => {
                return Err(EngineError::NotActionPolicy {
                    name: action_policy.to_string(),
                })
            }
        };
        let pre = if delta {
            self.select(query, target)?
        } else {
            BTreeSet::new()
        };

        for step in sequence {
            debug!("simulate step: {step}");
            let updates = match &step {
                Formula::Fact(atom) if atom.modal.is_some() => {
                    if !atom.is_ground() {
                        return Err(illegal_step(&step));
                    }
                    vec![atom.clone()]
                }
                Formula::Fact(atom) => {
                    if atom.policy.is_some()
                        || !atom.is_ground()
                        || !declared.contains(&atom.table)
                    {
                        return Err(illegal_step(&step));
                    }
                    self.invoke_action(action_policy, target, vec![atom.clone()])?
                }
                Formula::Rule(rule) if rule.head.modal.is_some() => {
                    self.derive_heads(target, rule)?
                }
                Formula::Rule(rule)
                    if rule.head.policy.is_none() && declared.contains(&rule.head.table) =>
                {
                    let invocations = self.derive_heads(target, rule)?;
                    self.invoke_action(action_policy, target, invocations)?
                }
                Formula::Rule(_) => return Err(illegal_step(&step)),
            };
            self.apply_step_updates(updates, target)?;
        }

        let post = self.select(query, target)?;
        if !delta {
            return Ok(post);
        }
        let mut out = BTreeSet::new();
        for atom in post.difference(&pre) {
            out.insert(atom.clone().with_modal(Modal::Insert));
        }
        for atom in pre.difference(&post) {
            out.insert(atom.clone().with_modal(Modal::Delete));
        }
        Ok(out)
    }

    /// Evaluates one speculative rule against the working target state
    /// and returns the ground instances of its head.
    fn derive_heads(&self, target: &str, rule: &Rule) -> EngineResult<Vec<Atom>> {
        let theory = self.policy_object(target)?;
        let mut facts: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        let mut rules = Vec::new();
        theory.collect_visible(&mut facts, &mut rules);
        rules.push(rule.clone());
        let store = derive_goal(&facts, &rules, &rule.head.key(), self);
        Ok(store
            .get(&rule.head.key())
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Runs the action theory over a set of invocation facts and
    /// returns the derived update atoms.
    ///
    /// Declared action tables take exactly the invocation facts as
    /// their extent; other unqualified tables resolve to the union of
    /// the action theory's content and the working target state;
    /// qualified tables resolve through the working runtime.
    fn invoke_action(
        &self,
        action_policy: &str,
        target: &str,
        invocations: Vec<Atom>,
    ) -> EngineResult<Vec<Atom>> {
        let Theory::Action(action) = self.policy_object(action_policy)? else {
            return Err(EngineError::NotActionPolicy {
                name: action_policy.to_string(),
            });
        };
        let declared = action.actions().clone();

        // Compose the action theory with the working target state by
        // inclusion, then evaluate the composite.
        let mut scratch = action.clone();
        if target != action_policy {
            if let Ok(theory) = self.policy_object(target) {
                scratch.include(theory.clone());
            }
        }
        let mut facts: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        let mut rules = Vec::new();
        scratch.collect_visible(&mut facts, &mut rules);
        facts.retain(|key, _| {
            !(key.policy.is_none() && key.modal.is_none() && declared.contains(&key.table))
        });
        for atom in invocations {
            facts.entry(atom.key()).or_default().insert(atom);
        }

        let store = derive(&facts, &rules, self);
        let mut updates = Vec::new();
        for (key, bucket) in &store {
            if key.modal.is_some() {
                updates.extend(bucket.iter().cloned());
            }
        }
        Ok(updates)
    }

    /// Applies one step's update atoms to the working state, insert
    /// winning over delete for the same ground fact, triggers bypassed.
    fn apply_step_updates(&mut self, updates: Vec<Atom>, target: &str) -> EngineResult<()> {
        let mut inserts: BTreeSet<(String, Atom)> = BTreeSet::new();
        let mut deletes: BTreeSet<(String, Atom)> = BTreeSet::new();
        for atom in updates {
            let policy = atom
                .policy
                .clone()
                .unwrap_or_else(|| target.to_string());
            let plain = atom.without_policy().without_modal();
            match atom.modal {
                Some(Modal::Insert) => {
                    inserts.insert((policy, plain));
                }
                Some(Modal::Delete) => {
                    deletes.insert((policy, plain));
                }
                None => {}
            }
        }
        let mut events: Vec<Event> = Vec::new();
        for (policy, atom) in &inserts {
            events.push(Event::insert(Formula::fact(atom.clone()), policy.as_str()));
        }
        for (policy, atom) in deletes {
            if !inserts.contains(&(policy.clone(), atom.clone())) {
                events.push(Event::delete(Formula::fact(atom), policy));
            }
        }
        if events.is_empty() {
            return Ok(());
        }
        let result = self.apply_events(events, false);
        match result.errors.into_iter().next() {
            None => Ok(()),
            Some(error) => Err(EngineError::Validation(error)),
        }
    }
}

fn illegal_step(step: &Formula) -> EngineError {
    EngineError::IllegalSimulationStep {
        step: step.to_string(),
    }
}
