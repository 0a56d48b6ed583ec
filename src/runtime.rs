//! The multi-policy runtime: policy lifecycle, transactional updates,
//! cross-policy query resolution, and trigger dispatch.

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};

use crate::error::{EngineError, EngineResult, ValidationError};
use crate::formula::{Atom, Event, Formula, Modal, QualifiedTable};
use crate::graph::DependencyGraph;
use crate::registry::{TriggerCallback, TriggerId, TriggerRegistry};
use crate::term::Term;
use crate::theory::{ExternalPolicies, Theory, TheoryKind};

/// Whether `delete_policy` refuses to remove a policy that other
/// policies' rules still reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingRefs {
    /// Delete regardless; referencing rules resolve to the empty set.
    Allow,
    /// Fail with [`EngineError::DanglingReference`] when referenced.
    Forbid,
}

/// Outcome of an update batch. A rejected batch leaves no trace: every
/// theory and the dependency graph are exactly as before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    /// True when the batch was applied.
    pub permitted: bool,
    /// Validation failures explaining a rejection; empty on success.
    pub errors: Vec<ValidationError>,
}

impl UpdateResult {
    fn ok() -> Self {
        Self {
            permitted: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<ValidationError>) -> Self {
        Self {
            permitted: false,
            errors,
        }
    }
}

/// The policy engine runtime: a named collection of theories, the
/// dependency graph spanning them, and the trigger registry.
#[derive(Default)]
pub struct Runtime {
    pub(crate) theories: HashMap<String, Theory>,
    pub(crate) graph: DependencyGraph,
    pub(crate) registry: TriggerRegistry,
    pub(crate) default_target: Option<String>,
    pub(crate) abbreviations: HashMap<String, String>,
}

impl ExternalPolicies for Runtime {
    fn select_external(&self, policy: &str, query: &Atom) -> BTreeSet<Atom> {
        // References may precede policy creation; unknown policies are
        // empty tables, not errors.
        match self.theories.get(policy) {
            Some(theory) => theory.select(query, self),
            None => BTreeSet::new(),
        }
    }
}

impl Runtime {
    /// An empty runtime with no policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- policy lifecycle ------------------------------------------------

    /// Creates a policy. The first policy created becomes the default
    /// target for [`Runtime::insert_default`]. The tracing abbreviation
    /// defaults to the first five characters of the name.
    pub fn create_policy(&mut self, name: &str, kind: TheoryKind) -> EngineResult<()> {
        let abbr: String = name.chars().take(5).collect();
        self.create_policy_abbr(name, &abbr, kind)
    }

    /// Creates a policy with an explicit tracing abbreviation, the short
    /// label used in update trace lines.
    pub fn create_policy_abbr(
        &mut self,
        name: &str,
        abbr: &str,
        kind: TheoryKind,
    ) -> EngineResult<()> {
        if self.theories.contains_key(name) {
            return Err(EngineError::PolicyExists {
                name: name.to_string(),
            });
        }
        debug!("create policy {name} [{abbr}] ({kind:?})");
        self.theories.insert(name.to_string(), Theory::new(kind));
        self.abbreviations.insert(name.to_string(), abbr.to_string());
        if self.default_target.is_none() {
            self.default_target = Some(name.to_string());
        }
        Ok(())
    }

    /// Removes a policy and its rules' graph edges. With
    /// [`DanglingRefs::Forbid`], fails while other policies' rules
    /// still reference its tables.
    pub fn delete_policy(&mut self, name: &str, dangling: DanglingRefs) -> EngineResult<()> {
        if !self.theories.contains_key(name) {
            return Err(EngineError::PolicyNotFound {
                name: name.to_string(),
            });
        }
        if dangling == DanglingRefs::Forbid {
            let referents = self.graph.referents_of(name);
            if !referents.is_empty() {
                return Err(EngineError::DanglingReference {
                    policy: name.to_string(),
                    referents: referents.into_iter().collect(),
                });
            }
        }
        debug!("delete policy {name}");
        if let Some(theory) = self.theories.remove(name) {
            for formula in theory.content() {
                self.graph.delete_formula(&formula, name);
            }
        }
        self.abbreviations.remove(name);
        if self.default_target.as_deref() == Some(name) {
            self.default_target = self.policy_names().into_iter().next();
        }
        Ok(())
    }

    /// The named policy's theory.
    pub fn policy_object(&self, name: &str) -> EngineResult<&Theory> {
        self.theories
            .get(name)
            .ok_or_else(|| EngineError::PolicyNotFound {
                name: name.to_string(),
            })
    }

    /// The named policy's kind.
    pub fn policy_kind(&self, name: &str) -> EngineResult<TheoryKind> {
        Ok(self.policy_object(name)?.kind())
    }

    /// All policy names, sorted.
    #[must_use]
    pub fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.theories.keys().cloned().collect();
        names.sort();
        names
    }

    /// The current default insert target.
    #[must_use]
    pub fn default_target(&self) -> Option<&str> {
        self.default_target.as_deref()
    }

    /// The tracing abbreviation recorded for a policy.
    pub fn policy_abbr(&self, name: &str) -> EngineResult<&str> {
        self.policy_object(name)?;
        match self.abbreviations.get(name) {
            Some(abbr) => Ok(abbr.as_str()),
            None => Err(EngineError::PolicyNotFound {
                name: name.to_string(),
            }),
        }
    }

    // ---- queries ---------------------------------------------------------

    /// Instances of `query` derivable in policy `target`.
    pub fn select(&self, query: &Atom, target: &str) -> EngineResult<BTreeSet<Atom>> {
        let theory = self.policy_object(target)?;
        Ok(theory.select(query, self))
    }

    /// Deterministic one-formula-per-line rendering of a policy's
    /// stored content.
    pub fn dump_policy(&self, name: &str) -> EngineResult<String> {
        Ok(self.policy_object(name)?.content_string())
    }

    // ---- updates ---------------------------------------------------------

    /// Applies a batch of events transactionally: either every event is
    /// applied and relevant triggers run, or no state changes at all and
    /// the returned errors explain why.
    pub fn update(&mut self, events: Vec<Event>) -> UpdateResult {
        self.apply_events(events, true)
    }

    /// Inserts one formula into `target`.
    pub fn insert(&mut self, formula: Formula, target: &str) -> UpdateResult {
        self.update(vec![Event::insert(formula, target)])
    }

    /// Deletes one formula from `target`.
    pub fn delete(&mut self, formula: Formula, target: &str) -> UpdateResult {
        self.update(vec![Event::delete(formula, target)])
    }

    /// Inserts into the default target policy.
    pub fn insert_default(&mut self, formula: Formula) -> UpdateResult {
        match self.default_target.clone() {
            Some(target) => self.insert(formula, &target),
            None => UpdateResult::failed(vec![ValidationError::UnknownPolicy {
                name: String::new(),
            }]),
        }
    }

    /// Deletes from the default target policy.
    pub fn delete_default(&mut self, formula: Formula) -> UpdateResult {
        match self.default_target.clone() {
            Some(target) => self.delete(formula, &target),
            None => UpdateResult::failed(vec![ValidationError::UnknownPolicy {
                name: String::new(),
            }]),
        }
    }

    pub(crate) fn apply_events(&mut self, events: Vec<Event>, dispatch: bool) -> UpdateResult {
        let errors = self.validate_events(&events);
        if !errors.is_empty() {
            return UpdateResult::failed(errors);
        }

        // Any rule event contributes its head to the change set, so
        // relevance computed on the pre-update graph already covers
        // paths the batch itself introduces.
        let changes: BTreeSet<QualifiedTable> =
            events.iter().map(Event::changed_table).collect();
        let relevant: Vec<TriggerId> = if dispatch {
            self.registry
                .relevant_for_events(&self.graph, &events)
                .iter()
                .map(|t| t.id())
                .collect()
        } else {
            Vec::new()
        };
        let old_results: HashMap<TriggerId, BTreeSet<Atom>> = relevant
            .iter()
            .map(|&id| (id, self.trigger_snapshot(id)))
            .collect();

        // Tentative apply with per-theory undo snapshots.
        let graph_snapshot = self.graph.clone();
        let mut undo: HashMap<String, Theory> = HashMap::new();
        for event in &events {
            if !undo.contains_key(&event.target) {
                if let Some(theory) = self.theories.get(&event.target) {
                    undo.insert(event.target.clone(), theory.clone());
                }
            }
            let Some(theory) = self.theories.get_mut(&event.target) else {
                continue;
            };
            let changed = if event.insert {
                theory.insert(&event.formula)
            } else {
                theory.delete(&event.formula)
            };
            trace!(
                "[{}] apply {event}: changed={changed}",
                self.abbreviations
                    .get(&event.target)
                    .map_or(event.target.as_str(), String::as_str)
            );
            // The graph only moves when the theory's content actually
            // moved, so a redundant insert or a delete of an absent
            // rule cannot skew the reference counts.
            if changed && event.formula.is_rule() {
                if event.insert {
                    self.graph.insert_formula(&event.formula, &event.target);
                } else {
                    self.graph.delete_formula(&event.formula, &event.target);
                }
            }
        }

        let errors = self.validate_graph();
        if !errors.is_empty() {
            self.graph = graph_snapshot;
            for (name, theory) in undo {
                self.theories.insert(name, theory);
            }
            return UpdateResult::failed(errors);
        }

        self.refresh_materialized(&changes);

        if dispatch {
            for id in relevant {
                let Some(old) = old_results.get(&id) else {
                    continue;
                };
                let new = self.trigger_snapshot(id);
                if *old != new {
                    if let Some(trigger) = self.registry.get(id) {
                        debug!("firing trigger {id} on {}", trigger.table());
                        trigger.call(old, &new);
                    }
                }
            }
        }
        UpdateResult::ok()
    }

    /// Pre-apply validation: targets must exist, database policies take
    /// facts only, and heads must be unqualified — except qualified
    /// update heads inserted into an action policy, which describe
    /// another policy's state change.
    fn validate_events(&self, events: &[Event]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for event in events {
            let Some(theory) = self.theories.get(&event.target) else {
                errors.push(ValidationError::UnknownPolicy {
                    name: event.target.clone(),
                });
                continue;
            };
            if event.formula.is_rule() && theory.kind() == TheoryKind::Database {
                errors.push(ValidationError::RuleInDatabase {
                    policy: event.target.clone(),
                });
                continue;
            }
            let head = event.formula.head();
            if head.policy.is_some() {
                let action_update =
                    theory.kind() == TheoryKind::Action && head.modal.is_some();
                if !action_update {
                    errors.push(ValidationError::CrossPolicyHead {
                        head: head.to_string(),
                        policy: event.target.clone(),
                    });
                }
            }
        }
        errors
    }

    /// Post-apply validation of the dependency graph: recursion across
    /// policies is never allowed; recursion inside one policy only in a
    /// materialized theory, and there only when stratifiable.
    fn validate_graph(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(policies) = self.graph.cross_policy_cycle() {
            errors.push(ValidationError::Recursion { policies });
        }
        for (policy, component) in self.graph.local_cycles() {
            let materialized = self
                .theories
                .get(&policy)
                .is_some_and(|t| t.kind() == TheoryKind::Materialized);
            if !materialized {
                errors.push(ValidationError::Recursion {
                    policies: vec![policy],
                });
            } else if let Some(table) = self.graph.negated_edge_in_component(&component) {
                errors.push(ValidationError::Unstratifiable {
                    policy,
                    table: table.table,
                });
            }
        }
        errors
    }

    /// Refreshes materialized caches made stale by the batch. Only
    /// theories holding a table downstream of a changed table are
    /// recomputed; the rest keep their caches.
    pub(crate) fn refresh_materialized(&mut self, changes: &BTreeSet<QualifiedTable>) {
        let mut affected: BTreeSet<QualifiedTable> = changes.clone();
        for change in changes {
            affected.extend(self.graph.dependents(change));
        }
        let names: Vec<String> = self
            .theories
            .iter()
            .filter(|(name, theory)| {
                theory.kind() == TheoryKind::Materialized
                    && affected
                        .iter()
                        .any(|table| table.policy.as_str() == name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            // Taken out of the map so the refresh can resolve other
            // policies through &self.
            if let Some(mut theory) = self.theories.remove(&name) {
                theory.refresh(self);
                self.theories.insert(name, theory);
            }
        }
    }

    // ---- triggers --------------------------------------------------------

    /// Registers a callback fired whenever the derivable content of
    /// `policy:table` changes.
    pub fn register_trigger(
        &mut self,
        policy: &str,
        table: &str,
        callback: TriggerCallback,
    ) -> TriggerId {
        self.registry.register_table(policy, table, callback)
    }

    /// Removes a trigger; unknown identities are an error.
    pub fn unregister_trigger(&mut self, id: TriggerId) -> EngineResult<()> {
        self.registry.unregister(id)
    }

    /// The full current result set of a trigger's watched table.
    fn trigger_snapshot(&self, id: TriggerId) -> BTreeSet<Atom> {
        let Some(trigger) = self.registry.get(id) else {
            return BTreeSet::new();
        };
        self.table_snapshot(trigger.table())
    }

    /// Everything currently derivable for one qualified table: a
    /// select with an all-variables query of the table's arity.
    pub(crate) fn table_snapshot(&self, table: &QualifiedTable) -> BTreeSet<Atom> {
        let Some(theory) = self.theories.get(&table.policy) else {
            return BTreeSet::new();
        };
        let (base, modal) = split_modal(&table.table);
        let Some(arity) = theory.get_arity(base) else {
            return BTreeSet::new();
        };
        let args: Vec<Term> = (0..arity).map(|i| Term::var(format!("x{i}"))).collect();
        let mut query = Atom::new(base, args);
        if let Some(modal) = modal {
            query = query.with_modal(modal);
        }
        theory.select(&query, self)
    }
}

/// Splits a trailing update marker off a table name.
fn split_modal(table: &str) -> (&str, Option<Modal>) {
    match table.strip_suffix('+') {
        Some(base) => (base, Some(Modal::Insert)),
        None => match table.strip_suffix('-') {
            Some(base) => (base, Some(Modal::Delete)),
            None => (table, None),
        },
    }
}
