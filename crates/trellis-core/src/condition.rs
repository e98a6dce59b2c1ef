//! Condition normalization and lowering
//!
//! Turns the surface condition algebra into the form the network builder
//! consumes:
//!
//! 1. Double negations are eliminated and `NOT` is pushed over `OR`
//!    (`¬(a ∨ b) → ¬a ∧ ¬b`) as a byproduct of DNF construction.
//! 2. The expression is distributed to disjunctive normal form; each
//!    disjunct compiles to its own beta path.
//! 3. Fact patterns lower to WME-level triple conditions (one per
//!    constrained attribute) joined on a shared fact-id variable. The
//!    fact-binding variable is used when present, otherwise an internal
//!    `$f{n}` variable whose numbering is deterministic so identical
//!    prefixes share nodes across productions.
//! 4. Lexical scoping is validated left to right: tests and binds may only
//!    reference variables bound by a strictly earlier positive condition,
//!    and variables first bound inside a negation stay local to it.
//!
//! All of this happens before any network mutation, so compile errors leave
//! the engine untouched.

use crate::error::{TrellisError, TrellisResult};
use crate::types::{
    AttrKey, BindFn, Condition, Fact, FactPattern, INTERNAL_VAR_PREFIX, Term, TestFn,
};
use std::collections::HashSet;
use trellis_types::Value;

/// A single WME-level condition: the constant constraints handled by the
/// alpha network plus the variable slots tested at the join.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TripleCondition {
    pub attr: AttrKey,
    pub path: Vec<String>,
    pub constant: Option<Value>,
    pub id_var: String,
    pub value_var: Option<String>,
}

/// One element of a normalized disjunct.
#[derive(Debug, Clone)]
pub(crate) enum Leaf {
    /// Positive pattern, lowered to one or more triples
    Pattern(Vec<TripleCondition>),
    /// Negated single-triple pattern (a negative node)
    Negative(TripleCondition),
    /// Negated conjunction (an NCC with a private subnetwork)
    Ncc(Vec<Leaf>),
    Test(TestFn),
    Bind(BindFn),
}

/// A fully normalized and validated condition expression.
#[derive(Debug)]
pub(crate) struct CompiledCondition {
    pub disjuncts: Vec<Vec<Leaf>>,
    /// Variables bound by each disjunct, internal fact-id variables included
    pub bound: Vec<HashSet<String>>,
}

/// Intermediate item produced by DNF distribution, before triple lowering.
#[derive(Debug, Clone)]
enum Item {
    Pos(FactPattern),
    Neg(Vec<Item>),
    Test(TestFn),
    Bind(BindFn),
}

pub(crate) fn compile(condition: &Condition) -> TrellisResult<CompiledCondition> {
    let dnf = to_dnf(condition)?;

    let mut disjuncts = Vec::with_capacity(dnf.len());
    let mut bound = Vec::with_capacity(dnf.len());
    for items in &dnf {
        let mut counter = 0usize;
        let leaves = lower_items(items, &mut counter, false)?;
        let vars = validate_disjunct(&leaves)?;
        disjuncts.push(leaves);
        bound.push(vars);
    }

    Ok(CompiledCondition { disjuncts, bound })
}

/// Distribute to disjunctive normal form: `A & (B | C)` becomes
/// `(A & B) | (A & C)`. Negation is pushed over disjunction, so each `Neg`
/// item wraps a plain conjunction.
fn to_dnf(condition: &Condition) -> TrellisResult<Vec<Vec<Item>>> {
    match condition {
        Condition::Fact(pattern) => Ok(vec![vec![Item::Pos(pattern.clone())]]),
        Condition::Test(test) => Ok(vec![vec![Item::Test(test.clone())]]),
        Condition::Bind(bind) => Ok(vec![vec![Item::Bind(bind.clone())]]),
        Condition::And(children) => {
            if children.is_empty() {
                return Err(TrellisError::compile("empty conjunction"));
            }
            let mut acc: Vec<Vec<Item>> = vec![Vec::new()];
            for child in children {
                let child_dnf = to_dnf(child)?;
                let mut next = Vec::with_capacity(acc.len() * child_dnf.len());
                for prefix in &acc {
                    for suffix in &child_dnf {
                        let mut combined = prefix.clone();
                        combined.extend(suffix.iter().cloned());
                        next.push(combined);
                    }
                }
                acc = next;
            }
            Ok(acc)
        }
        Condition::Or(children) => {
            if children.is_empty() {
                return Err(TrellisError::compile("empty disjunction"));
            }
            let mut acc = Vec::new();
            for child in children {
                acc.extend(to_dnf(child)?);
            }
            Ok(acc)
        }
        Condition::Not(inner) => {
            // Double negation cancels out.
            if let Condition::Not(again) = inner.as_ref() {
                return to_dnf(again);
            }
            // ¬(d1 ∨ d2 ∨ …) = ¬d1 ∧ ¬d2 ∧ …, each di a conjunction.
            let inner_dnf = to_dnf(inner)?;
            Ok(vec![inner_dnf.into_iter().map(Item::Neg).collect()])
        }
    }
}

fn lower_items(items: &[Item], counter: &mut usize, in_negation: bool) -> TrellisResult<Vec<Leaf>> {
    let mut leaves = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Item::Pos(pattern) => {
                let triples = lower_pattern(pattern, counter, in_negation)?;
                leaves.push(Leaf::Pattern(triples));
            }
            Item::Neg(sub) => leaves.push(lower_negation(sub, counter)?),
            Item::Test(test) => leaves.push(Leaf::Test(test.clone())),
            Item::Bind(bind) => leaves.push(Leaf::Bind(bind.clone())),
        }
    }
    Ok(leaves)
}

fn lower_negation(sub: &[Item], counter: &mut usize) -> TrellisResult<Leaf> {
    if !sub.iter().any(|item| matches!(item, Item::Pos(_) | Item::Neg(_))) {
        return Err(TrellisError::compile(
            "negation requires at least one pattern; negate the predicate itself instead",
        ));
    }

    // A negated single-attribute pattern needs no subnetwork.
    if let [Item::Pos(pattern)] = sub {
        if pattern.template.len() == 1 {
            let mut triples = lower_pattern(pattern, counter, true)?;
            return Ok(Leaf::Negative(triples.remove(0)));
        }
    }

    Ok(Leaf::Ncc(lower_items(sub, counter, true)?))
}

fn lower_pattern(
    pattern: &FactPattern,
    counter: &mut usize,
    in_negation: bool,
) -> TrellisResult<Vec<TripleCondition>> {
    if pattern.template.is_empty() {
        return Err(TrellisError::compile(
            "pattern must constrain at least one attribute",
        ));
    }
    if let Some(binding) = &pattern.binding {
        if in_negation {
            return Err(TrellisError::compile_variable(
                binding,
                "a fact binding inside a negation can never be observed",
            ));
        }
        check_user_var(binding)?;
    }

    let id_var = match &pattern.binding {
        Some(binding) => binding.clone(),
        None => format!("{INTERNAL_VAR_PREFIX}f{counter}"),
    };
    *counter += 1;

    let mut triples = Vec::with_capacity(pattern.template.len());
    for (key, term) in pattern.template.attrs() {
        let (attr, path) = split_path(key)?;
        let (constant, value_var) = match term {
            Term::Value(v) => (Some(v.clone()), None),
            Term::Var(var) => match var.name() {
                Some(name) => {
                    check_user_var(name)?;
                    (None, Some(name.to_string()))
                }
                None => (None, None),
            },
        };
        triples.push(TripleCondition {
            attr,
            path,
            constant,
            id_var: id_var.clone(),
            value_var,
        });
    }
    Ok(triples)
}

/// Split a `name__sub1__sub2` attribute key into its root attribute and
/// path segments. Positional keys never carry a path.
fn split_path(key: AttrKey) -> TrellisResult<(AttrKey, Vec<String>)> {
    match key {
        AttrKey::Index(_) => Ok((key, Vec::new())),
        AttrKey::Name(name) => {
            if !name.contains("__") {
                return Ok((AttrKey::Name(name), Vec::new()));
            }
            let parts: Vec<&str> = name.split("__").collect();
            if parts.iter().any(|segment| segment.is_empty()) {
                return Err(TrellisError::compile(format!(
                    "malformed path expression '{name}'"
                )));
            }
            Ok((
                AttrKey::Name(parts[0].to_string()),
                parts[1..].iter().map(|s| (*s).to_string()).collect(),
            ))
        }
    }
}

fn check_user_var(name: &str) -> TrellisResult<()> {
    if name.starts_with(INTERNAL_VAR_PREFIX) {
        return Err(TrellisError::compile_variable(
            name,
            format!("variable names starting with '{INTERNAL_VAR_PREFIX}' are reserved"),
        ));
    }
    Ok(())
}

/// Enforce lexical scoping over the disjunct and report the variables it
/// binds. Variables first bound inside a negation are local to it.
fn validate_disjunct(leaves: &[Leaf]) -> TrellisResult<HashSet<String>> {
    let mut bound = HashSet::new();
    validate_leaves(leaves, &mut bound)?;
    Ok(bound)
}

fn validate_leaves(leaves: &[Leaf], bound: &mut HashSet<String>) -> TrellisResult<()> {
    for leaf in leaves {
        match leaf {
            Leaf::Pattern(triples) => {
                for triple in triples {
                    bound.insert(triple.id_var.clone());
                    if let Some(var) = &triple.value_var {
                        bound.insert(var.clone());
                    }
                }
            }
            Leaf::Negative(_) => {
                // Unbound variables in a negated pattern are existential
                // witnesses; they bind nothing downstream.
            }
            Leaf::Ncc(sub) => {
                let mut local = bound.clone();
                validate_leaves(sub, &mut local)?;
            }
            Leaf::Test(test) => {
                for param in test.params() {
                    check_user_var(param)?;
                    if !bound.contains(param) {
                        return Err(TrellisError::compile_variable(
                            param,
                            format!("test references unbound variable '{param}'"),
                        ));
                    }
                }
            }
            Leaf::Bind(bind) => {
                for param in bind.params() {
                    check_user_var(param)?;
                    if !bound.contains(param) {
                        return Err(TrellisError::compile_variable(
                            param,
                            format!("bind references unbound variable '{param}'"),
                        ));
                    }
                }
                check_user_var(bind.var())?;
                if bound.contains(bind.var()) {
                    return Err(TrellisError::compile_variable(
                        bind.var(),
                        format!("duplicate variable '{}'", bind.var()),
                    ));
                }
                bound.insert(bind.var().to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variable;

    fn pattern(fact: Fact) -> Condition {
        Condition::fact(fact)
    }

    #[test]
    fn and_over_or_distributes() {
        let cond = Condition::and([
            pattern(Fact::new().with("a", 1)),
            Condition::or([
                pattern(Fact::new().with("b", 2)),
                pattern(Fact::new().with("c", 3)),
            ]),
        ]);
        let compiled = compile(&cond).unwrap();
        assert_eq!(compiled.disjuncts.len(), 2);
        assert!(compiled.disjuncts.iter().all(|d| d.len() == 2));
    }

    #[test]
    fn double_negation_cancels() {
        let inner = pattern(Fact::new().with("a", 1));
        let cond = Condition::not(Condition::not(inner));
        let compiled = compile(&cond).unwrap();
        assert_eq!(compiled.disjuncts.len(), 1);
        assert!(matches!(compiled.disjuncts[0][0], Leaf::Pattern(_)));
    }

    #[test]
    fn negated_disjunction_becomes_conjunction_of_negations() {
        let cond = Condition::not(Condition::or([
            pattern(Fact::new().with("a", 1)),
            pattern(Fact::new().with("b", 2)),
        ]));
        let compiled = compile(&cond).unwrap();
        assert_eq!(compiled.disjuncts.len(), 1);
        let disjunct = &compiled.disjuncts[0];
        assert_eq!(disjunct.len(), 2);
        assert!(disjunct.iter().all(|l| matches!(l, Leaf::Negative(_))));
    }

    #[test]
    fn multi_attribute_negation_lowers_to_ncc() {
        let cond = Condition::not(pattern(
            Fact::new().with("a", 1).with("b", Term::var("x")),
        ));
        let compiled = compile(&cond).unwrap();
        match &compiled.disjuncts[0][0] {
            Leaf::Ncc(sub) => {
                assert_eq!(sub.len(), 1);
                assert!(matches!(&sub[0], Leaf::Pattern(triples) if triples.len() == 2));
            }
            other => panic!("expected NCC, got {other:?}"),
        }
    }

    #[test]
    fn path_expressions_split_on_double_underscore() {
        let cond = pattern(Fact::new().with("against__scissors", 1));
        let compiled = compile(&cond).unwrap();
        let Leaf::Pattern(triples) = &compiled.disjuncts[0][0] else {
            panic!("expected pattern");
        };
        assert_eq!(triples[0].attr, AttrKey::Name("against".into()));
        assert_eq!(triples[0].path, vec!["scissors".to_string()]);
        assert_eq!(triples[0].constant, Some(Value::Integer(1)));
    }

    #[test]
    fn malformed_path_is_a_compile_error() {
        let cond = pattern(Fact::new().with("against__", 1));
        assert!(compile(&cond).is_err());
    }

    #[test]
    fn test_on_unbound_variable_is_rejected() {
        let cond = Condition::and([
            pattern(Fact::new().with("value", Term::var("a"))),
            Condition::test(["b"], |_| true),
        ]);
        let err = compile(&cond).unwrap_err();
        assert!(matches!(err, TrellisError::Compile { .. }));
    }

    #[test]
    fn variables_inside_negation_do_not_escape() {
        let cond = Condition::and([
            pattern(Fact::new().with("value", Term::var("a"))),
            Condition::not(pattern(Fact::new().with("value", Term::var("n")))),
            Condition::test(["n"], |_| true),
        ]);
        assert!(compile(&cond).is_err());
    }

    #[test]
    fn bind_shadowing_is_rejected() {
        let cond = Condition::and([
            pattern(Fact::new().with("value", Term::var("a"))),
            Condition::bind("a", ["a"], |args| args[0].clone()),
        ]);
        assert!(compile(&cond).is_err());
    }

    #[test]
    fn reserved_variable_names_are_rejected() {
        let cond = pattern(Fact::new().with("value", Term::Var(Variable::named("$sneaky"))));
        assert!(compile(&cond).is_err());
    }

    #[test]
    fn negating_a_bare_test_is_rejected() {
        let cond = Condition::and([
            pattern(Fact::new().with("value", Term::var("a"))),
            Condition::not(Condition::test(["a"], |_| true)),
        ]);
        assert!(compile(&cond).is_err());
    }

    #[test]
    fn internal_fact_variables_are_deterministic() {
        let build = || {
            Condition::and([
                pattern(Fact::new().with("a", 1)),
                pattern(Fact::new().with("b", 2)),
            ])
        };
        let first = compile(&build()).unwrap();
        let second = compile(&build()).unwrap();

        let ids = |c: &CompiledCondition| -> Vec<String> {
            c.disjuncts[0]
                .iter()
                .filter_map(|l| match l {
                    Leaf::Pattern(t) => Some(t[0].id_var.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec!["$f0".to_string(), "$f1".to_string()]);
    }
}
