//! Negation-as-failure: single-pattern negative nodes, negated
//! conjunctions (NCC), and liveness flips as witnesses come and go.

use trellis_core::{Action, Condition, Fact, Production, Term, TrellisEngine, Value};

fn noop(name: &str, condition: Condition) -> Production {
    Production::new(
        name,
        condition,
        Action::new(Vec::<String>::new(), |_engine, _bindings| Ok(Value::Null)),
    )
}

#[test]
fn negation_blocks_until_the_witness_is_retracted() {
    let mut engine = TrellisEngine::new();
    let condition = Condition::and([
        Condition::fact(Fact::new().with("color", "red")),
        Condition::not(Condition::fact(Fact::new().with("color", "green"))),
    ]);
    engine.add_production(noop("red-without-green", condition)).unwrap();

    engine.add_fact(Fact::new().with("color", "red")).unwrap();
    let green = engine.add_fact(Fact::new().with("color", "green")).unwrap();
    assert!(engine.matches().is_empty());

    engine.remove_fact(green).unwrap();
    assert_eq!(engine.matches().len(), 1);
}

#[test]
fn adding_a_witness_retracts_downstream_consequences() {
    let mut engine = TrellisEngine::new();
    let condition = Condition::and([
        Condition::fact(Fact::new().with("color", "red")),
        Condition::not(Condition::fact(Fact::new().with("color", "green"))),
    ]);
    engine.add_production(noop("red-without-green", condition)).unwrap();

    engine.add_fact(Fact::new().with("color", "red")).unwrap();
    assert_eq!(engine.matches().len(), 1);

    // First witness retracts; a second changes nothing; removing one of
    // two leaves the token blocked.
    let g1 = engine.add_fact(Fact::new().with("color", "green")).unwrap();
    assert!(engine.matches().is_empty());
    let g2 = engine.add_fact(Fact::new().with("color", "green")).unwrap();
    assert!(engine.matches().is_empty());

    engine.remove_fact(g1).unwrap();
    assert!(engine.matches().is_empty());
    engine.remove_fact(g2).unwrap();
    assert_eq!(engine.matches().len(), 1);
}

#[test]
fn negation_respects_earlier_bindings() {
    let mut engine = TrellisEngine::new();
    // A person with no recorded parent link.
    let condition = Condition::and([
        Condition::fact(Fact::new().with("person", Term::var("p"))),
        Condition::not(Condition::fact(Fact::new().with("child_of", Term::var("p")))),
    ]);
    engine.add_production(noop("root-ancestor", condition)).unwrap();

    engine.add_fact(Fact::new().with("person", "alice")).unwrap();
    engine.add_fact(Fact::new().with("person", "bob")).unwrap();
    engine.add_fact(Fact::new().with("child_of", "alice")).unwrap();

    let matches = engine.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].bindings.get("p"), Some(&Value::from("bob")));
}

#[test]
fn multi_attribute_negation_uses_a_subnetwork() {
    let mut engine = TrellisEngine::new();
    // Names not liked by bob: the negated pattern has two attributes, so
    // it compiles to an NCC with a private subnetwork.
    let condition = Condition::and([
        Condition::fact(Fact::new().with("name", Term::var("n"))),
        Condition::not(Condition::fact(
            Fact::new().with("likes", Term::var("n")).with("by", "bob"),
        )),
    ]);
    engine.add_production(noop("unliked", condition)).unwrap();

    engine.add_fact(Fact::new().with("name", "alice")).unwrap();
    engine.add_fact(Fact::new().with("name", "carol")).unwrap();
    assert_eq!(engine.matches().len(), 2);

    let liking = engine
        .add_fact(Fact::new().with("likes", "alice").with("by", "bob"))
        .unwrap();
    let matches = engine.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].bindings.get("n"), Some(&Value::from("carol")));

    // Someone else liking alice is not a witness for this negation.
    engine
        .add_fact(Fact::new().with("likes", "carol").with("by", "dave"))
        .unwrap();
    assert_eq!(engine.matches().len(), 1);

    engine.remove_fact(liking).unwrap();
    assert_eq!(engine.matches().len(), 2);
}

#[test]
fn negated_conjunction_over_two_patterns() {
    let mut engine = TrellisEngine::new();
    // A machine with no reported fault that is also critical.
    let condition = Condition::and([
        Condition::fact(Fact::new().with("machine", Term::var("m"))),
        Condition::not(Condition::and([
            Condition::fact(Fact::new().with("fault_on", Term::var("m")).with("code", Term::var("c"))),
            Condition::fact(Fact::new().with("severity_of", Term::var("c")).with("level", "critical")),
        ])),
    ]);
    engine.add_production(noop("healthy", condition)).unwrap();

    engine.add_fact(Fact::new().with("machine", "press-1")).unwrap();
    assert_eq!(engine.matches().len(), 1);

    // A fault alone is not critical yet.
    engine
        .add_fact(Fact::new().with("fault_on", "press-1").with("code", "E42"))
        .unwrap();
    assert_eq!(engine.matches().len(), 1);

    // The severity record completes the negated conjunction.
    let severity = engine
        .add_fact(Fact::new().with("severity_of", "E42").with("level", "critical"))
        .unwrap();
    assert!(engine.matches().is_empty());

    engine.remove_fact(severity).unwrap();
    assert_eq!(engine.matches().len(), 1);
}

#[test]
fn negated_disjunction_requires_absence_of_both() {
    let mut engine = TrellisEngine::new();
    let condition = Condition::and([
        Condition::fact(Fact::new().with("kind", "task")),
        Condition::not(Condition::or([
            Condition::fact(Fact::new().with("status", "blocked")),
            Condition::fact(Fact::new().with("status", "cancelled")),
        ])),
    ]);
    engine.add_production(noop("runnable", condition)).unwrap();

    engine.add_fact(Fact::new().with("kind", "task")).unwrap();
    assert_eq!(engine.matches().len(), 1);

    let blocked = engine.add_fact(Fact::new().with("status", "blocked")).unwrap();
    assert!(engine.matches().is_empty());

    engine.remove_fact(blocked).unwrap();
    assert_eq!(engine.matches().len(), 1);

    engine.add_fact(Fact::new().with("status", "cancelled")).unwrap();
    assert!(engine.matches().is_empty());
}

#[test]
fn negation_as_the_first_condition() {
    let mut engine = TrellisEngine::new();
    let condition = Condition::and([
        Condition::not(Condition::fact(Fact::new().with("halted", true))),
        Condition::fact(Fact::new().with("job", Term::var("j"))),
    ]);
    engine.add_production(noop("scheduler", condition)).unwrap();

    engine.add_fact(Fact::new().with("job", "a")).unwrap();
    assert_eq!(engine.matches().len(), 1);

    let halt = engine.add_fact(Fact::new().with("halted", true)).unwrap();
    assert!(engine.matches().is_empty());

    engine.remove_fact(halt).unwrap();
    assert_eq!(engine.matches().len(), 1);
}
