//! Bottom-up rule evaluation shared by the theory variants.
//!
//! Evaluation works over a snapshot of base facts plus a rule list.
//! Local tables are computed to fixpoint one strongly connected
//! component at a time, dependencies first, so a negated literal is
//! only consulted once its table is complete. Qualified literals are
//! resolved through an [`ExternalPolicies`] callback instead of the
//! local snapshot.

use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::formula::{Atom, Literal, Rule, TableKey};
use crate::graph::tarjan_sccs;
use crate::unify::{apply_atom, match_atom, Bindings};

/// Resolver for cross-policy table references encountered in rule
/// bodies. Implemented by the runtime; theories evaluated standalone
/// use [`NoExternalPolicies`].
pub trait ExternalPolicies {
    /// Ground atoms of `policy` matching `query`. Unknown policies
    /// resolve to the empty set.
    fn select_external(&self, policy: &str, query: &Atom) -> BTreeSet<Atom>;
}

/// Resolver that treats every external reference as an empty table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalPolicies;

impl ExternalPolicies for NoExternalPolicies {
    fn select_external(&self, _policy: &str, _query: &Atom) -> BTreeSet<Atom> {
        BTreeSet::new()
    }
}

/// The facts visible during one evaluation: the growing local store
/// plus the external resolver.
struct View<'a> {
    store: &'a HashMap<TableKey, BTreeSet<Atom>>,
    resolver: &'a dyn ExternalPolicies,
}

impl View<'_> {
    fn facts_for(&self, pattern: &Atom) -> Vec<Atom> {
        match &pattern.policy {
            None => self
                .store
                .get(&pattern.key())
                .map(|bucket| bucket.iter().cloned().collect())
                .unwrap_or_default(),
            Some(policy) => self
                .resolver
                .select_external(policy, &pattern.without_policy())
                .into_iter()
                .collect(),
        }
    }
}

/// Evaluates a conjunction of literals, returning every satisfying
/// substitution. Positive literals are joined first; negated literals
/// then filter the candidate bindings, so negation only ever applies to
/// bound or genuinely free variables.
fn eval_body(body: &[Literal], view: &View<'_>) -> Vec<Bindings> {
    eval_body_seeded(body, None, vec![Bindings::new()], view)
}

/// Joins the body over a set of seed substitutions. `skip` marks a
/// positive literal the caller has already consumed.
fn eval_body_seeded(
    body: &[Literal],
    skip: Option<usize>,
    seed: Vec<Bindings>,
    view: &View<'_>,
) -> Vec<Bindings> {
    let mut ordered: Vec<&Literal> = body
        .iter()
        .enumerate()
        .filter(|&(i, lit)| !lit.negated && skip != Some(i))
        .map(|(_, lit)| lit)
        .collect();
    ordered.extend(body.iter().filter(|lit| lit.negated));

    let mut bindings = seed;
    for lit in ordered {
        let mut next = Vec::new();
        for b in &bindings {
            let pattern = apply_atom(&lit.atom, b);
            if lit.negated {
                let refuted = view
                    .facts_for(&pattern)
                    .iter()
                    .any(|fact| match_atom(&pattern, fact, b).is_some());
                if !refuted {
                    next.push(b.clone());
                }
            } else {
                for fact in view.facts_for(&pattern) {
                    if let Some(extended) = match_atom(&pattern, &fact, b) {
                        next.push(extended);
                    }
                }
            }
        }
        bindings = next;
        if bindings.is_empty() {
            break;
        }
    }
    bindings
}

/// Seminaive round: every derivation must pass through at least one
/// atom produced in the previous round. Each positive local literal
/// takes a turn as the pivot, seeded from the delta; the rest of the
/// body joins over the full store.
fn eval_body_delta(
    body: &[Literal],
    delta: &HashMap<TableKey, BTreeSet<Atom>>,
    view: &View<'_>,
) -> Vec<Bindings> {
    let mut out = Vec::new();
    for (pivot, lit) in body.iter().enumerate() {
        if lit.negated || lit.atom.policy.is_some() {
            continue;
        }
        let Some(changed) = delta.get(&lit.atom.key()) else {
            continue;
        };
        let seed: Vec<Bindings> = changed
            .iter()
            .filter_map(|fact| match_atom(&lit.atom, fact, &Bindings::new()))
            .collect();
        if !seed.is_empty() {
            out.extend(eval_body_seeded(body, Some(pivot), seed, view));
        }
    }
    out
}

/// Computes the full derived state: base facts plus every ground atom
/// any rule derives. Head keys are grouped into strongly connected
/// components of the local head → body relation and each component is
/// run to fixpoint in dependency order.
pub(crate) fn derive(
    base: &HashMap<TableKey, BTreeSet<Atom>>,
    rules: &[Rule],
    resolver: &dyn ExternalPolicies,
) -> HashMap<TableKey, BTreeSet<Atom>> {
    let mut store = base.clone();
    if rules.is_empty() {
        return store;
    }

    // Index every local table key touched by a rule.
    let mut keys: Vec<TableKey> = Vec::new();
    let mut position: HashMap<TableKey, usize> = HashMap::new();
    let mut intern = |key: TableKey, keys: &mut Vec<TableKey>| -> usize {
        if let Some(&i) = position.get(&key) {
            return i;
        }
        let i = keys.len();
        position.insert(key.clone(), i);
        keys.push(key);
        i
    };
    let mut adjacency: Vec<Vec<usize>> = Vec::new();
    let mut rules_by_head: HashMap<usize, Vec<&Rule>> = HashMap::new();
    for rule in rules {
        let head = intern(rule.head.key(), &mut keys);
        adjacency.resize(keys.len(), Vec::new());
        for lit in &rule.body {
            if lit.atom.policy.is_some() {
                // Resolved externally; not part of the local ordering.
                continue;
            }
            let body = intern(lit.atom.key(), &mut keys);
            adjacency.resize(keys.len(), Vec::new());
            adjacency[head].push(body);
        }
        rules_by_head.entry(head).or_default().push(rule);
    }

    for component in tarjan_sccs(&adjacency) {
        let members: BTreeSet<usize> = component.iter().copied().collect();
        let comp_rules: Vec<&Rule> = component
            .iter()
            .filter_map(|head| rules_by_head.get(head))
            .flatten()
            .copied()
            .collect();
        if comp_rules.is_empty() {
            continue;
        }
        trace!(
            "deriving component [{}]",
            members
                .iter()
                .map(|&i| keys[i].to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        // Fixpoint over the component. The first round is a full naive
        // pass; later rounds are seminaive, re-joining only through the
        // atoms the previous round added.
        let mut delta: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        let mut first = true;
        loop {
            let mut additions: Vec<Atom> = Vec::new();
            {
                let view = View {
                    store: &store,
                    resolver,
                };
                for rule in &comp_rules {
                    let bindings = if first {
                        eval_body(&rule.body, &view)
                    } else {
                        eval_body_delta(&rule.body, &delta, &view)
                    };
                    for b in bindings {
                        let derived = apply_atom(&rule.head, &b);
                        if derived.is_ground()
                            && !store
                                .get(&derived.key())
                                .is_some_and(|bucket| bucket.contains(&derived))
                        {
                            additions.push(derived);
                        }
                    }
                }
            }
            if additions.is_empty() {
                break;
            }
            first = false;
            delta.clear();
            for atom in additions {
                let key = atom.key();
                delta.entry(key.clone()).or_default().insert(atom.clone());
                store.entry(key).or_default().insert(atom);
            }
        }
    }
    store
}

/// Derives only what `goal` can depend on: rules outside the goal's
/// local head closure are dropped before derivation. This keeps a query
/// from evaluating unrelated rules whose bodies reach into other
/// policies — resolution then recurses along actual table dependencies,
/// which validation keeps acyclic across policies, so queries over
/// mutually-referencing policies stay bounded.
pub(crate) fn derive_goal(
    base: &HashMap<TableKey, BTreeSet<Atom>>,
    rules: &[Rule],
    goal: &TableKey,
    resolver: &dyn ExternalPolicies,
) -> HashMap<TableKey, BTreeSet<Atom>> {
    let mut wanted: BTreeSet<TableKey> = BTreeSet::new();
    let mut stack = vec![goal.clone()];
    while let Some(key) = stack.pop() {
        if !wanted.insert(key.clone()) {
            continue;
        }
        for rule in rules {
            if rule.head.key() != key {
                continue;
            }
            for lit in &rule.body {
                if lit.atom.policy.is_none() {
                    stack.push(lit.atom.key());
                }
            }
        }
    }
    let relevant: Vec<Rule> = rules
        .iter()
        .filter(|rule| wanted.contains(&rule.head.key()))
        .cloned()
        .collect();
    derive(base, &relevant, resolver)
}

/// Matches `query` against a derived store, returning the instances of
/// `query` witnessed by stored facts.
pub(crate) fn select_from(
    store: &HashMap<TableKey, BTreeSet<Atom>>,
    query: &Atom,
) -> BTreeSet<Atom> {
    let mut out = BTreeSet::new();
    if let Some(bucket) = store.get(&query.key()) {
        for fact in bucket {
            if match_atom(query, fact, &Bindings::new()).is_some() {
                out.insert(fact.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Literal;
    use crate::term::Term;

    fn base(facts: &[(&str, i64)]) -> HashMap<TableKey, BTreeSet<Atom>> {
        let mut out: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        for (table, v) in facts {
            let atom = Atom::new(*table, vec![Term::int(*v)]);
            out.entry(atom.key()).or_default().insert(atom);
        }
        out
    }

    fn chain_rule(head: &str, body: &str) -> Rule {
        Rule::new(
            Atom::new(head, vec![Term::var("x")]),
            vec![Literal::pos(Atom::new(body, vec![Term::var("x")]))],
        )
    }

    #[test]
    fn multi_level_derivation() {
        let rules = vec![chain_rule("p", "q"), chain_rule("q", "r")];
        let store = derive(&base(&[("r", 1), ("r", 2)]), &rules, &NoExternalPolicies);
        let query = Atom::new("p", vec![Term::var("x")]);
        let result = select_from(&store, &query);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&Atom::new("p", vec![Term::int(1)])));
    }

    #[test]
    fn join_binds_shared_variables() {
        let mut store = base(&[("q", 1), ("q", 2)]);
        let r = Atom::new(
            "r",
            vec![Term::int(1), Term::str("a")],
        );
        store.entry(r.key()).or_default().insert(r);
        let rule = Rule::new(
            Atom::new("p", vec![Term::var("y")]),
            vec![
                Literal::pos(Atom::new("q", vec![Term::var("x")])),
                Literal::pos(Atom::new("r", vec![Term::var("x"), Term::var("y")])),
            ],
        );
        let derived = derive(&store, &[rule], &NoExternalPolicies);
        let result = select_from(&derived, &Atom::new("p", vec![Term::var("y")]));
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![Atom::new("p", vec![Term::str("a")])]
        );
    }

    #[test]
    fn negation_filters_candidates() {
        let rule = Rule::new(
            Atom::new("p", vec![Term::var("x")]),
            vec![
                Literal::pos(Atom::new("q", vec![Term::var("x")])),
                Literal::neg(Atom::new("r", vec![Term::var("x")])),
            ],
        );
        let store = derive(
            &base(&[("q", 1), ("q", 2), ("r", 2)]),
            &[rule],
            &NoExternalPolicies,
        );
        let result = select_from(&store, &Atom::new("p", vec![Term::var("x")]));
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![Atom::new("p", vec![Term::int(1)])]
        );
    }

    #[test]
    fn negation_over_derived_table_sees_completed_table() {
        // s is derived, and p negates it: s must be complete before p
        // is evaluated.
        let rules = vec![
            chain_rule("s", "q"),
            Rule::new(
                Atom::new("p", vec![Term::var("x")]),
                vec![
                    Literal::pos(Atom::new("t", vec![Term::var("x")])),
                    Literal::neg(Atom::new("s", vec![Term::var("x")])),
                ],
            ),
        ];
        let store = derive(
            &base(&[("q", 1), ("t", 1), ("t", 2)]),
            &rules,
            &NoExternalPolicies,
        );
        let result = select_from(&store, &Atom::new("p", vec![Term::var("x")]));
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![Atom::new("p", vec![Term::int(2)])]
        );
    }

    #[test]
    fn recursive_component_reaches_fixpoint() {
        // Transitive closure over edge/2.
        let mut store: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        for (a, b) in [(1, 2), (2, 3), (3, 4)] {
            let atom = Atom::new("edge", vec![Term::int(a), Term::int(b)]);
            store.entry(atom.key()).or_default().insert(atom);
        }
        let rules = vec![
            Rule::new(
                Atom::new("path", vec![Term::var("x"), Term::var("y")]),
                vec![Literal::pos(Atom::new(
                    "edge",
                    vec![Term::var("x"), Term::var("y")],
                ))],
            ),
            Rule::new(
                Atom::new("path", vec![Term::var("x"), Term::var("z")]),
                vec![
                    Literal::pos(Atom::new("path", vec![Term::var("x"), Term::var("y")])),
                    Literal::pos(Atom::new("edge", vec![Term::var("y"), Term::var("z")])),
                ],
            ),
        ];
        let derived = derive(&store, &rules, &NoExternalPolicies);
        let result = select_from(
            &derived,
            &Atom::new("path", vec![Term::var("x"), Term::var("y")]),
        );
        assert_eq!(result.len(), 6);
        assert!(result.contains(&Atom::new("path", vec![Term::int(1), Term::int(4)])));
    }

    #[test]
    fn right_recursive_join_reaches_fixpoint() {
        // The recursive literal sits in the second body position, so
        // later rounds must pivot on non-leading literals too.
        let mut store: HashMap<TableKey, BTreeSet<Atom>> = HashMap::new();
        for (a, b) in [(1, 2), (2, 3), (3, 4)] {
            let atom = Atom::new("edge", vec![Term::int(a), Term::int(b)]);
            store.entry(atom.key()).or_default().insert(atom);
        }
        let rules = vec![
            Rule::new(
                Atom::new("path", vec![Term::var("x"), Term::var("y")]),
                vec![Literal::pos(Atom::new(
                    "edge",
                    vec![Term::var("x"), Term::var("y")],
                ))],
            ),
            Rule::new(
                Atom::new("path", vec![Term::var("x"), Term::var("z")]),
                vec![
                    Literal::pos(Atom::new("edge", vec![Term::var("x"), Term::var("y")])),
                    Literal::pos(Atom::new("path", vec![Term::var("y"), Term::var("z")])),
                ],
            ),
        ];
        let derived = derive(&store, &rules, &NoExternalPolicies);
        let result = select_from(
            &derived,
            &Atom::new("path", vec![Term::var("x"), Term::var("y")]),
        );
        assert_eq!(result.len(), 6);
        assert!(result.contains(&Atom::new("path", vec![Term::int(1), Term::int(4)])));
    }

    #[test]
    fn goal_directed_derivation_skips_unrelated_rules() {
        struct Unreachable;
        impl ExternalPolicies for Unreachable {
            fn select_external(&self, _policy: &str, _query: &Atom) -> BTreeSet<Atom> {
                panic!("external table consulted outside the goal cone");
            }
        }
        // r's rule reaches into another policy; a query on p must not
        // evaluate it.
        let rules = vec![
            chain_rule("p", "q"),
            Rule::new(
                Atom::new("r", vec![Term::var("x")]),
                vec![Literal::pos(
                    Atom::new("s", vec![Term::var("x")]).qualified("other"),
                )],
            ),
        ];
        let store = derive_goal(
            &base(&[("q", 1)]),
            &rules,
            &Atom::new("p", vec![Term::var("x")]).key(),
            &Unreachable,
        );
        let result = select_from(&store, &Atom::new("p", vec![Term::var("x")]));
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![Atom::new("p", vec![Term::int(1)])]
        );
    }

    #[test]
    fn external_references_use_the_resolver() {
        struct Fixed;
        impl ExternalPolicies for Fixed {
            fn select_external(&self, policy: &str, query: &Atom) -> BTreeSet<Atom> {
                let mut out = BTreeSet::new();
                if policy == "other" && query.table == "q" {
                    out.insert(Atom::new("q", vec![Term::int(7)]));
                }
                out
            }
        }
        let rule = Rule::new(
            Atom::new("p", vec![Term::var("x")]),
            vec![Literal::pos(
                Atom::new("q", vec![Term::var("x")]).qualified("other"),
            )],
        );
        let store = derive(&HashMap::new(), &[rule], &Fixed);
        let result = select_from(&store, &Atom::new("p", vec![Term::var("x")]));
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![Atom::new("p", vec![Term::int(7)])]
        );
    }

    #[test]
    fn ungrounded_heads_are_dropped() {
        // y never binds, so no p instance is derived.
        let rule = Rule::new(
            Atom::new("p", vec![Term::var("x"), Term::var("y")]),
            vec![Literal::pos(Atom::new("q", vec![Term::var("x")]))],
        );
        let store = derive(&base(&[("q", 1)]), &[rule], &NoExternalPolicies);
        let result = select_from(
            &store,
            &Atom::new("p", vec![Term::var("x"), Term::var("y")]),
        );
        assert!(result.is_empty());
    }
}
