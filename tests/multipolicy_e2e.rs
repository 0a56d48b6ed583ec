use polity::{
    Atom, DanglingRefs, EngineError, Formula, Literal, Modal, Runtime, Term, TheoryKind,
};

fn fact(table: &str, v: i64) -> Formula {
    Formula::fact(Atom::new(table, vec![Term::int(v)]))
}

fn rule(head: Atom, body: Vec<Literal>) -> Formula {
    Formula::rule(head, body)
}

fn var(name: &str) -> Term {
    Term::var(name)
}

#[test]
fn rule_body_reaches_into_another_policy() {
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("test2", TheoryKind::Nonrecursive).unwrap();

    assert!(run.insert(fact("q", 1), "test1").permitted);
    assert!(run.insert(fact("q", 2), "test1").permitted);
    assert!(run
        .insert(
            rule(
                Atom::new("p", vec![var("x")]),
                vec![Literal::pos(Atom::new("q", vec![var("x")]).qualified("test1"))],
            ),
            "test2",
        )
        .permitted);

    let result = run
        .select(&Atom::new("p", vec![var("x")]), "test2")
        .unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.contains(&Atom::new("p", vec![Term::int(1)])));
    assert!(result.contains(&Atom::new("p", vec![Term::int(2)])));
}

#[test]
fn local_table_with_same_name_is_ignored_by_qualified_literal() {
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("test2", TheoryKind::Nonrecursive).unwrap();

    run.insert(fact("q", 1), "test1");
    // The referencing policy has its own q; the qualified literal must
    // not see it.
    run.insert(fact("q", 99), "test2");
    run.insert(
        rule(
            Atom::new("p", vec![var("x")]),
            vec![Literal::pos(Atom::new("q", vec![var("x")]).qualified("test1"))],
        ),
        "test2",
    );

    let result = run
        .select(&Atom::new("p", vec![var("x")]), "test2")
        .unwrap();
    assert_eq!(
        result.into_iter().collect::<Vec<_>>(),
        vec![Atom::new("p", vec![Term::int(1)])]
    );
}

#[test]
fn unqualified_and_qualified_literals_combine_in_one_body() {
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("test2", TheoryKind::Nonrecursive).unwrap();

    run.insert(fact("q", 1), "test1");
    run.insert(fact("q", 2), "test1");
    run.insert(fact("r", 2), "test2");
    run.insert(
        rule(
            Atom::new("p", vec![var("x")]),
            vec![
                Literal::pos(Atom::new("q", vec![var("x")]).qualified("test1")),
                Literal::pos(Atom::new("r", vec![var("x")])),
            ],
        ),
        "test2",
    );

    let result = run
        .select(&Atom::new("p", vec![var("x")]), "test2")
        .unwrap();
    assert_eq!(
        result.into_iter().collect::<Vec<_>>(),
        vec![Atom::new("p", vec![Term::int(2)])]
    );
}

#[test]
fn references_chain_across_three_policies() {
    let mut run = Runtime::new();
    for name in ["a", "b", "c"] {
        run.create_policy(name, TheoryKind::Nonrecursive).unwrap();
    }
    run.insert(fact("base", 5), "c");
    run.insert(
        rule(
            Atom::new("mid", vec![var("x")]),
            vec![Literal::pos(Atom::new("base", vec![var("x")]).qualified("c"))],
        ),
        "b",
    );
    run.insert(
        rule(
            Atom::new("top", vec![var("x")]),
            vec![Literal::pos(Atom::new("mid", vec![var("x")]).qualified("b"))],
        ),
        "a",
    );
    let result = run.select(&Atom::new("top", vec![var("x")]), "a").unwrap();
    assert_eq!(
        result.into_iter().collect::<Vec<_>>(),
        vec![Atom::new("top", vec![Term::int(5)])]
    );
}

#[test]
fn mutual_policy_references_without_a_table_cycle_evaluate() {
    // Each policy reads a table of the other, but no table depends on
    // itself, so both rules are legal and both queries must terminate.
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("test2", TheoryKind::Nonrecursive).unwrap();

    assert!(run
        .insert(
            rule(
                Atom::new("p", vec![var("x")]),
                vec![Literal::pos(Atom::new("q", vec![var("x")]).qualified("test2"))],
            ),
            "test1",
        )
        .permitted);
    assert!(run
        .insert(
            rule(
                Atom::new("r", vec![var("x")]),
                vec![Literal::pos(Atom::new("s", vec![var("x")]).qualified("test1"))],
            ),
            "test2",
        )
        .permitted);
    assert!(run.insert(fact("q", 1), "test2").permitted);
    assert!(run.insert(fact("s", 2), "test1").permitted);

    let p = run.select(&Atom::new("p", vec![var("x")]), "test1").unwrap();
    assert_eq!(
        p.into_iter().collect::<Vec<_>>(),
        vec![Atom::new("p", vec![Term::int(1)])]
    );
    let r = run.select(&Atom::new("r", vec![var("x")]), "test2").unwrap();
    assert_eq!(
        r.into_iter().collect::<Vec<_>>(),
        vec![Atom::new("r", vec![Term::int(2)])]
    );
}

#[test]
fn recursion_across_policies_is_rejected_and_nothing_changes() {
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("test2", TheoryKind::Nonrecursive).unwrap();

    assert!(run
        .insert(
            rule(
                Atom::new("p", vec![var("x")]),
                vec![Literal::pos(Atom::new("q", vec![var("x")]).qualified("test2"))],
            ),
            "test1",
        )
        .permitted);

    let before1 = run.dump_policy("test1").unwrap();
    let before2 = run.dump_policy("test2").unwrap();

    let closing = rule(
        Atom::new("q", vec![var("x")]),
        vec![Literal::pos(Atom::new("p", vec![var("x")]).qualified("test1"))],
    );
    let result = run.insert(closing, "test2");
    assert!(!result.permitted);
    let msg = result.errors[0].to_string();
    assert!(msg.contains("Rules are recursive"));

    assert_eq!(run.dump_policy("test1").unwrap(), before1);
    assert_eq!(run.dump_policy("test2").unwrap(), before2);
}

#[test]
fn action_policy_owns_update_rules_for_other_policies() {
    let mut run = Runtime::new();
    run.create_policy("test1", TheoryKind::Action).unwrap();

    assert!(run
        .insert(
            rule(
                Atom::new("p", vec![var("x")])
                    .qualified("test2")
                    .with_modal(Modal::Insert),
                vec![Literal::pos(Atom::new("q", vec![var("x")]))],
            ),
            "test1",
        )
        .permitted);
    assert!(run.insert(fact("q", 1), "test1").permitted);

    let query = Atom::new("p", vec![var("x")])
        .qualified("test2")
        .with_modal(Modal::Insert);
    let result = run.select(&query, "test1").unwrap();
    let rendered: Vec<String> = result.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["test2:p+(1)"]);
}

#[test]
fn policy_lifecycle_and_dangling_reference_protection() {
    let mut run = Runtime::new();
    run.create_policy("referrer", TheoryKind::Nonrecursive).unwrap();
    run.create_policy("referee", TheoryKind::Database).unwrap();
    assert_eq!(run.policy_names(), vec!["referee", "referrer"]);
    assert_eq!(run.policy_kind("referee").unwrap(), TheoryKind::Database);

    let bridge = rule(
        Atom::new("p", vec![var("x")]),
        vec![Literal::pos(Atom::new("q", vec![var("x")]).qualified("referee"))],
    );
    assert!(run.insert(bridge.clone(), "referrer").permitted);

    let err = run
        .delete_policy("referee", DanglingRefs::Forbid)
        .unwrap_err();
    match err {
        EngineError::DanglingReference { policy, referents } => {
            assert_eq!(policy, "referee");
            assert_eq!(referents, vec!["referrer".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Allow mode removes it anyway; the reference then reads as empty.
    run.delete_policy("referee", DanglingRefs::Allow).unwrap();
    assert!(run
        .select(&Atom::new("p", vec![var("x")]), "referrer")
        .unwrap()
        .is_empty());
}

#[test]
fn get_arity_comes_from_facts_and_rule_heads() {
    let mut run = Runtime::new();
    run.create_policy("test", TheoryKind::Nonrecursive).unwrap();
    run.insert(
        Formula::fact(Atom::new("q", vec![Term::int(1), Term::str("a")])),
        "test",
    );
    run.insert(
        rule(
            Atom::new("p", vec![var("x")]),
            vec![Literal::pos(Atom::new("q", vec![var("x"), var("y")]))],
        ),
        "test",
    );
    let theory = run.policy_object("test").unwrap();
    assert_eq!(theory.get_arity("q"), Some(2));
    assert_eq!(theory.get_arity("p"), Some(1));
    assert_eq!(theory.get_arity("missing"), None);
}

#[test]
fn dump_round_trip_is_deterministic() {
    let mut run = Runtime::new();
    run.create_policy("test", TheoryKind::Nonrecursive).unwrap();
    run.insert(Formula::fact(Atom::new("p", vec![Term::str("b"), Term::float(1.5)])), "test");
    run.insert(fact("a", 1), "test");
    run.insert(
        rule(
            Atom::new("r", vec![var("x")]),
            vec![
                Literal::pos(Atom::new("a", vec![var("x")])),
                Literal::neg(Atom::new("z", vec![var("x")])),
            ],
        ),
        "test",
    );
    let dump = run.dump_policy("test").unwrap();
    assert_eq!(dump, "a(1)\np(\"b\", 1.5)\nr(x) :- a(x), not z(x)");
    assert_eq!(run.dump_policy("test").unwrap(), dump);
}
