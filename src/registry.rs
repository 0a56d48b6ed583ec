//! Trigger registry: callbacks fired when derivable table content
//! changes.
//!
//! Identity is a generated [`TriggerId`], never the callback itself, so
//! registering the same closure twice yields two independent triggers.
//! Relevance is computed against the dependency graph before an update
//! is applied; actual firing is decided afterwards by comparing each
//! trigger table's old and new result sets.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::formula::{Atom, Event, QualifiedTable};
use crate::graph::DependencyGraph;

/// Unique identity of a registered trigger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// Generates a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with the table's result set before and after the
/// update.
pub type TriggerCallback = Arc<dyn Fn(&BTreeSet<Atom>, &BTreeSet<Atom>) + Send + Sync>;

/// A registered trigger: a watched qualified table and its callback.
#[derive(Clone)]
pub struct Trigger {
    id: TriggerId,
    table: QualifiedTable,
    callback: TriggerCallback,
}

impl Trigger {
    /// The trigger's identity.
    #[must_use]
    pub const fn id(&self) -> TriggerId {
        self.id
    }

    /// The watched table.
    #[must_use]
    pub const fn table(&self) -> &QualifiedTable {
        &self.table
    }

    /// Invokes the callback with old/new result sets.
    pub fn call(&self, old: &BTreeSet<Atom>, new: &BTreeSet<Atom>) {
        (self.callback)(old, new);
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// The set of registered triggers, indexed by watched table.
#[derive(Debug, Clone, Default)]
pub struct TriggerRegistry {
    triggers: HashMap<TriggerId, Trigger>,
    by_table: HashMap<QualifiedTable, BTreeSet<TriggerId>>,
}

impl TriggerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback on `policy:table`, returning its identity.
    pub fn register_table(
        &mut self,
        policy: &str,
        table: &str,
        callback: TriggerCallback,
    ) -> TriggerId {
        let id = TriggerId::new();
        let table = QualifiedTable::new(policy, table);
        debug!("register trigger {id} on {table}");
        self.by_table.entry(table.clone()).or_default().insert(id);
        self.triggers.insert(
            id,
            Trigger {
                id,
                table,
                callback,
            },
        );
        id
    }

    /// Removes a trigger. Unknown (or already removed) identities are
    /// an error.
    pub fn unregister(&mut self, id: TriggerId) -> EngineResult<()> {
        let Some(trigger) = self.triggers.remove(&id) else {
            return Err(EngineError::TriggerNotFound { id });
        };
        if let Some(ids) = self.by_table.get_mut(trigger.table()) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_table.remove(trigger.table());
            }
        }
        Ok(())
    }

    /// The trigger with this identity, if registered.
    #[must_use]
    pub fn get(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.get(&id)
    }

    /// Number of registered triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// True when no triggers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Triggers whose watched table can be affected by a change to any
    /// of `changes`: those whose dependency closure (the watched table
    /// included) intersects the change set. The closure is computed
    /// once per watched table, not per trigger. Each trigger appears
    /// at most once, in a deterministic order.
    #[must_use]
    pub fn relevant_triggers(
        &self,
        graph: &DependencyGraph,
        changes: &BTreeSet<QualifiedTable>,
    ) -> Vec<&Trigger> {
        let mut ids: Vec<TriggerId> = Vec::new();
        for (table, watchers) in &self.by_table {
            if graph
                .dependencies(table)
                .iter()
                .any(|dep| changes.contains(dep))
            {
                ids.extend(watchers.iter().copied());
            }
        }
        ids.sort_unstable();
        ids.iter().filter_map(|id| self.triggers.get(id)).collect()
    }

    /// Relevance computed straight from an event batch: each event
    /// contributes the table its formula head changes.
    #[must_use]
    pub fn relevant_for_events(
        &self,
        graph: &DependencyGraph,
        events: &[Event],
    ) -> Vec<&Trigger> {
        let changes: BTreeSet<QualifiedTable> =
            events.iter().map(Event::changed_table).collect();
        self.relevant_triggers(graph, &changes)
    }
}
