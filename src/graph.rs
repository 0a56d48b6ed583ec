//! Cross-policy rule dependency graph.
//!
//! Nodes are qualified table names; edges run head → body and carry a
//! polarity tag. Every count is a reference count: several rules may
//! contribute the same edge, and the edge survives until the last
//! contributing rule is deleted. Nodes store names only — resolution to
//! live theories happens through the runtime's policy map, so the graph
//! never owns a theory.

use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::formula::{Formula, QualifiedTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EdgeCounts {
    positive: usize,
    negated: usize,
}

impl EdgeCounts {
    fn total(self) -> usize {
        self.positive + self.negated
    }
}

/// A directed graph over qualified table names with polarity-tagged,
/// reference-counted edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Appearance counts per node. Rule heads count even with an empty
    /// edge set; facts never create nodes.
    nodes: HashMap<QualifiedTable, usize>,
    /// head → body adjacency with per-polarity counts.
    edges: HashMap<QualifiedTable, HashMap<QualifiedTable, EdgeCounts>>,
    /// body → head reverse adjacency (counts, any polarity).
    reverse: HashMap<QualifiedTable, HashMap<QualifiedTable, usize>>,
}

impl DependencyGraph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the qualified edges implied by a rule's head → body
    /// literals. Facts are a no-op; a rule always creates its head node
    /// even with an empty body.
    pub fn insert_formula(&mut self, formula: &Formula, policy: &str) {
        let Some(rule) = formula.as_rule() else {
            return;
        };
        let head = rule.head.qualified_table(policy);
        trace!("graph: insert edges for head {head}");
        *self.nodes.entry(head.clone()).or_insert(0) += 1;
        for literal in &rule.body {
            let body = literal.atom.qualified_table(policy);
            *self.nodes.entry(body.clone()).or_insert(0) += 1;
            let counts = self
                .edges
                .entry(head.clone())
                .or_default()
                .entry(body.clone())
                .or_default();
            if literal.negated {
                counts.negated += 1;
            } else {
                counts.positive += 1;
            }
            *self
                .reverse
                .entry(body)
                .or_default()
                .entry(head.clone())
                .or_insert(0) += 1;
        }
    }

    /// Removes the edges contributed by one prior insertion of this
    /// rule. The caller only invokes this for rules that were actually
    /// stored, so counts never underflow in practice.
    pub fn delete_formula(&mut self, formula: &Formula, policy: &str) {
        let Some(rule) = formula.as_rule() else {
            return;
        };
        let head = rule.head.qualified_table(policy);
        trace!("graph: delete edges for head {head}");
        Self::release_node(&mut self.nodes, &head);
        for literal in &rule.body {
            let body = literal.atom.qualified_table(policy);
            Self::release_node(&mut self.nodes, &body);
            if let Some(adj) = self.edges.get_mut(&head) {
                if let Some(counts) = adj.get_mut(&body) {
                    if literal.negated {
                        counts.negated = counts.negated.saturating_sub(1);
                    } else {
                        counts.positive = counts.positive.saturating_sub(1);
                    }
                    if counts.total() == 0 {
                        adj.remove(&body);
                    }
                }
                if adj.is_empty() {
                    self.edges.remove(&head);
                }
            }
            if let Some(rev) = self.reverse.get_mut(&body) {
                if let Some(count) = rev.get_mut(&head) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        rev.remove(&head);
                    }
                }
                if rev.is_empty() {
                    self.reverse.remove(&body);
                }
            }
        }
    }

    fn release_node(nodes: &mut HashMap<QualifiedTable, usize>, node: &QualifiedTable) {
        if let Some(count) = nodes.get_mut(node) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                nodes.remove(node);
            }
        }
    }

    /// True if the qualified table is a node of the graph.
    #[must_use]
    pub fn node_in(&self, node: &QualifiedTable) -> bool {
        self.nodes.contains_key(node)
    }

    /// True if a direct head → body edge exists. With `negated` set,
    /// only negated-polarity edges count; otherwise only positive ones.
    #[must_use]
    pub fn edge_in(&self, head: &QualifiedTable, body: &QualifiedTable, negated: bool) -> bool {
        self.edges
            .get(head)
            .and_then(|adj| adj.get(body))
            .is_some_and(|counts| {
                if negated {
                    counts.negated > 0
                } else {
                    counts.positive > 0
                }
            })
    }

    /// All nodes transitively reachable from `start` following edges in
    /// the head → body direction, `start` included: the tables whose
    /// content can influence `start`.
    #[must_use]
    pub fn dependencies(&self, start: &QualifiedTable) -> BTreeSet<QualifiedTable> {
        self.closure(start, &self.edges_view())
    }

    /// All nodes that transitively depend on `start` (reverse edges),
    /// `start` included.
    #[must_use]
    pub fn dependents(&self, start: &QualifiedTable) -> BTreeSet<QualifiedTable> {
        let view: HashMap<&QualifiedTable, Vec<&QualifiedTable>> = self
            .reverse
            .iter()
            .map(|(node, heads)| (node, heads.keys().collect()))
            .collect();
        self.closure(start, &view)
    }

    fn edges_view(&self) -> HashMap<&QualifiedTable, Vec<&QualifiedTable>> {
        self.edges
            .iter()
            .map(|(node, adj)| (node, adj.keys().collect()))
            .collect()
    }

    fn closure(
        &self,
        start: &QualifiedTable,
        view: &HashMap<&QualifiedTable, Vec<&QualifiedTable>>,
    ) -> BTreeSet<QualifiedTable> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(next) = view.get(&node) {
                for n in next {
                    if !seen.contains(*n) {
                        stack.push((*n).clone());
                    }
                }
            }
        }
        seen
    }

    /// True if the graph currently contains any cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        !self.cyclic_components().is_empty()
    }

    /// The policies of a cycle crossing more than one policy, if any.
    #[must_use]
    pub fn cross_policy_cycle(&self) -> Option<Vec<String>> {
        for component in self.cyclic_components() {
            let policies: BTreeSet<&str> =
                component.iter().map(|n| n.policy.as_str()).collect();
            if policies.len() >= 2 {
                return Some(policies.into_iter().map(str::to_string).collect());
            }
        }
        None
    }

    /// Cyclic components confined to a single policy, keyed by that
    /// policy name.
    #[must_use]
    pub fn local_cycles(&self) -> Vec<(String, Vec<QualifiedTable>)> {
        self.cyclic_components()
            .into_iter()
            .filter_map(|component| {
                let policies: BTreeSet<&str> =
                    component.iter().map(|n| n.policy.as_str()).collect();
                if policies.len() == 1 {
                    let policy = (*policies.iter().next().expect("non-empty")).to_string();
                    Some((policy, component))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Within a cyclic component, the target of a negated edge between
    /// members, if one exists — the table that breaks stratification.
    #[must_use]
    pub fn negated_edge_in_component(
        &self,
        component: &[QualifiedTable],
    ) -> Option<QualifiedTable> {
        let members: BTreeSet<&QualifiedTable> = component.iter().collect();
        for head in component {
            if let Some(adj) = self.edges.get(head) {
                for (body, counts) in adj {
                    if counts.negated > 0 && members.contains(body) {
                        return Some(body.clone());
                    }
                }
            }
        }
        None
    }

    /// External policies that hold at least one rule edge into a table
    /// owned by `policy`.
    #[must_use]
    pub fn referents_of(&self, policy: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (head, adj) in &self.edges {
            if head.policy == policy {
                continue;
            }
            if adj.keys().any(|body| body.policy == policy) {
                out.insert(head.policy.clone());
            }
        }
        out
    }

    /// Strongly connected components that contain a cycle: size > 1, or
    /// a single node with a self-loop. Members are sorted.
    fn cyclic_components(&self) -> Vec<Vec<QualifiedTable>> {
        let index: Vec<&QualifiedTable> = self.nodes.keys().collect();
        let position: HashMap<&QualifiedTable, usize> = index
            .iter()
            .enumerate()
            .map(|(i, node)| (*node, i))
            .collect();
        let adjacency: Vec<Vec<usize>> = index
            .iter()
            .map(|node| {
                self.edges
                    .get(*node)
                    .map(|adj| adj.keys().filter_map(|n| position.get(n).copied()).collect())
                    .unwrap_or_default()
            })
            .collect();

        let mut out = Vec::new();
        for scc in tarjan_sccs(&adjacency) {
            let cyclic = scc.len() > 1
                || scc.first().is_some_and(|&v| adjacency[v].contains(&v));
            if cyclic {
                let mut members: Vec<QualifiedTable> =
                    scc.iter().map(|&v| index[v].clone()).collect();
                members.sort();
                out.push(members);
            }
        }
        out
    }
}

/// Iterative Tarjan strongly-connected-components over an index-based
/// adjacency list. Components are emitted dependencies-first: every
/// component appears after the components it has edges into.
pub(crate) fn tarjan_sccs(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        // Explicit call stack: (node, next child offset).
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];
        while !call.is_empty() {
            let (v, child) = {
                let frame = call.last_mut().expect("call stack non-empty");
                let state = *frame;
                frame.1 += 1;
                state
            };
            if child == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if child < adjacency[v].len() {
                let w = adjacency[v][child];
                if index[w] == UNVISITED {
                    call.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().expect("tarjan stack invariant");
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}
