//! Firing actions that mutate working memory: the classic two-production
//! traffic light, where each firing retracts the match that produced it
//! and asserts the opposite one.

use trellis_core::{Action, Condition, Fact, Production, TrellisEngine, TrellisError, Value};

fn toggle_production(name: &str, from: &str, to: &str) -> Production {
    let to = to.to_string();
    Production::new(
        name,
        Condition::bound_fact("light", Fact::new().with("light_color", from)),
        Action::new(["light"], move |engine, bindings| {
            let id = bindings
                .fact("light")
                .ok_or_else(|| TrellisError::action("missing light binding"))?;
            let mut fact = engine
                .fact(id)
                .cloned()
                .ok_or_else(|| TrellisError::action("light fact disappeared"))?;
            fact.set("light_color", to.as_str());
            engine.update_fact(fact)?;
            Ok(Value::from(to.as_str()))
        }),
    )
}

#[test]
fn five_firings_alternate_the_light() {
    let mut engine = TrellisEngine::new();
    engine.add_production(toggle_production("to-green", "red", "green")).unwrap();
    engine.add_production(toggle_production("to-red", "green", "red")).unwrap();

    let light = engine.add_fact(Fact::new().with("light_color", "red")).unwrap();

    let mut observed = Vec::new();
    for _ in 0..5 {
        let m = engine
            .matches()
            .into_iter()
            .next()
            .expect("exactly one toggle should be applicable");
        observed.push(engine.fire(&m).unwrap());
    }

    let expected: Vec<Value> =
        ["green", "red", "green", "red", "green"].iter().map(|&s| Value::from(s)).collect();
    assert_eq!(observed, expected);

    // The same fact was updated in place throughout.
    assert_eq!(engine.fact_count(), 1);
    assert_eq!(
        engine.fact(light).unwrap().get(&trellis_core::AttrKey::Name("light_color".into())),
        Some(&trellis_core::Term::Value(Value::from("green")))
    );
}

#[test]
fn conflict_set_is_consistent_after_each_firing() {
    let mut engine = TrellisEngine::new();
    engine.add_production(toggle_production("to-green", "red", "green")).unwrap();
    engine.add_production(toggle_production("to-red", "green", "red")).unwrap();
    engine.add_fact(Fact::new().with("light_color", "red")).unwrap();

    for _ in 0..4 {
        let matches = engine.matches();
        assert_eq!(matches.len(), 1, "exactly one toggle applicable at a time");
        engine.fire(&matches[0]).unwrap();
    }
}

#[test]
fn actions_may_assert_new_facts() {
    let mut engine = TrellisEngine::new();
    engine
        .add_production(Production::new(
            "echo",
            Condition::bound_fact("f", Fact::new().with("ping", true)),
            Action::new(["f"], |engine, _bindings| {
                let id = engine.add_fact(Fact::new().with("pong", true))?;
                Ok(Value::FactRef(id))
            }),
        ))
        .unwrap();
    engine
        .add_production(Production::new(
            "observer",
            Condition::fact(Fact::new().with("pong", true)),
            Action::new(Vec::<String>::new(), |_engine, _bindings| Ok(Value::Null)),
        ))
        .unwrap();

    engine.add_fact(Fact::new().with("ping", true)).unwrap();
    let m = engine.matches().into_iter().next().unwrap();
    engine.fire(&m).unwrap();

    // The mutation propagated before fire returned.
    assert_eq!(engine.fact_count(), 2);
    let productions: Vec<_> = engine.matches().iter().map(|m| m.production).collect();
    assert_eq!(productions.len(), 2);
}

#[test]
fn action_errors_surface_and_keep_prior_mutations() {
    let mut engine = TrellisEngine::new();
    engine
        .add_production(Production::new(
            "half-done",
            Condition::fact(Fact::new().with("go", true)),
            Action::new(Vec::<String>::new(), |engine, _bindings| {
                engine.add_fact(Fact::new().with("partial", true))?;
                Err(TrellisError::action("deliberate failure"))
            }),
        ))
        .unwrap();

    engine.add_fact(Fact::new().with("go", true)).unwrap();
    let m = engine.matches().into_iter().next().unwrap();

    let err = engine.fire(&m).unwrap_err();
    assert!(matches!(err, TrellisError::Action { .. }));
    // The mutation performed before the failure is retained.
    assert_eq!(engine.fact_count(), 2);
}
