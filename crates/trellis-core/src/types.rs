//! Core data structures for the Trellis engine: facts, terms, variables,
//! the condition algebra, productions, and binding environments.

use crate::engine::TrellisEngine;
use crate::error::TrellisResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trellis_types::{FactId, Value};

/// Unique identifier for productions
pub type ProductionId = u64;

/// Variable names beginning with this prefix are reserved for the compiler's
/// internal fact-id variables and rejected in user input.
pub(crate) const INTERNAL_VAR_PREFIX: &str = "$";

/// A pattern variable: a named placeholder distinguishable from all ground
/// values. A wildcard is an unnamed variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    name: Option<String>,
}

impl Variable {
    /// Create a named variable
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()) }
    }

    /// Create the wildcard variable
    pub const fn wildcard() -> Self {
        Self { name: None }
    }

    /// The variable's name, or `None` for the wildcard
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub const fn is_wildcard(&self) -> bool {
        self.name.is_none()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "?{name}"),
            None => write!(f, "?_"),
        }
    }
}

/// A fact attribute slot: either a ground value or a pattern variable.
///
/// Ground facts contain only `Term::Value`; templates inside conditions may
/// mix values and variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Value(Value),
    Var(Variable),
}

impl Term {
    /// Shorthand for a named variable term
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(Variable::named(name))
    }

    /// Shorthand for the wildcard term
    pub const fn wildcard() -> Self {
        Self::Var(Variable::wildcard())
    }

    pub const fn is_ground(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Var(_) => None,
        }
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Variable> for Term {
    fn from(var: Variable) -> Self {
        Self::Var(var)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Self::Value(Value::from(i))
    }
}

impl From<i32> for Term {
    fn from(i: i32) -> Self {
        Self::Value(Value::from(i))
    }
}

impl From<f64> for Term {
    fn from(f: f64) -> Self {
        Self::Value(Value::from(f))
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Self::Value(Value::from(b))
    }
}

/// Unified attribute key over positional and named fields.
///
/// Positional values of a fact appear under `Index` keys; named values under
/// `Name` keys. The derived ordering (positional first, then names
/// lexicographically) gives compilation a deterministic attribute walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttrKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

/// An identified record of positional and named attribute values.
///
/// The same shape serves two roles: ground facts inserted into working
/// memory (every term a value; `add_fact` rejects anything else) and the
/// template inside a positive pattern (terms may be variables, and named
/// attributes may use the `name__sub1__sub2` path syntax to constrain
/// nested object values).
///
/// The id is assigned on insertion and carried by the caller's handle for
/// `update_fact`; two facts with equal contents inserted separately are
/// still distinct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    id: Option<FactId>,
    positional: Vec<Term>,
    named: HashMap<String, Term>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for a named attribute
    pub fn with(mut self, name: impl Into<String>, term: impl Into<Term>) -> Self {
        self.named.insert(name.into(), term.into());
        self
    }

    /// Builder-style append of a positional value
    pub fn with_pos(mut self, term: impl Into<Term>) -> Self {
        self.positional.push(term.into());
        self
    }

    /// Set a named attribute in place
    pub fn set(&mut self, name: impl Into<String>, term: impl Into<Term>) {
        self.named.insert(name.into(), term.into());
    }

    /// Look up an attribute by key
    pub fn get(&self, key: &AttrKey) -> Option<&Term> {
        match key {
            AttrKey::Index(i) => self.positional.get(*i),
            AttrKey::Name(n) => self.named.get(n),
        }
    }

    /// The fact's working-memory id, once assigned
    pub const fn id(&self) -> Option<FactId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: FactId) {
        self.id = Some(id);
    }

    /// Iterate attributes in deterministic order: positional by index, then
    /// named sorted by name.
    pub fn attrs(&self) -> impl Iterator<Item = (AttrKey, &Term)> {
        let mut named: Vec<_> = self.named.iter().collect();
        named.sort_by(|(a, _), (b, _)| a.cmp(b));
        self.positional
            .iter()
            .enumerate()
            .map(|(i, t)| (AttrKey::Index(i), t))
            .chain(
                named
                    .into_iter()
                    .map(|(n, t)| (AttrKey::Name(n.clone()), t)),
            )
    }

    /// True when every attribute holds a ground value
    pub fn is_ground(&self) -> bool {
        self.positional.iter().all(Term::is_ground) && self.named.values().all(Term::is_ground)
    }

    /// Number of attributes (positional plus named)
    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// A positive pattern: a fact template, optionally prefixed by a
/// fact-binding variable that binds the matched fact's identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactPattern {
    pub binding: Option<String>,
    pub template: Fact,
}

/// A pure predicate over previously bound variables.
///
/// Evaluated with values looked up from the token's binding environment, in
/// declared parameter order. A predicate that errors is treated as false in
/// the default lenient mode; strict mode surfaces the error from the
/// mutating call that triggered evaluation.
#[derive(Clone)]
pub struct TestFn {
    params: Vec<String>,
    func: Arc<dyn Fn(&[Value]) -> TrellisResult<bool> + Send + Sync>,
}

impl TestFn {
    /// Create a test from an infallible predicate
    pub fn new<F>(params: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            func: Arc::new(move |args| Ok(func(args))),
        }
    }

    /// Create a test from a fallible predicate
    pub fn fallible<F>(params: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&[Value]) -> TrellisResult<bool> + Send + Sync + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn eval(&self, args: &[Value]) -> TrellisResult<bool> {
        (self.func)(args)
    }
}

impl fmt::Debug for TestFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFn").field("params", &self.params).finish_non_exhaustive()
    }
}

/// A pure computation assigning a new variable from previously bound ones.
///
/// The function must be total over its declared inputs; its output augments
/// the binding environment for later conditions and the production action.
#[derive(Clone)]
pub struct BindFn {
    var: String,
    params: Vec<String>,
    func: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl BindFn {
    pub fn new<F>(
        var: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<String>>,
        func: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            var: var.into(),
            params: params.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn eval(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

impl fmt::Debug for BindFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindFn")
            .field("var", &self.var)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// An algebraic condition expression: positive patterns combined with AND,
/// OR, NOT, functional tests, and binds.
///
/// Disjunction is eliminated at compile time by distribution to disjunctive
/// normal form; variable scoping is lexical over the (normalized) condition
/// sequence.
#[derive(Debug, Clone)]
pub enum Condition {
    Fact(FactPattern),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Test(TestFn),
    Bind(BindFn),
}

impl Condition {
    /// A positive pattern without a fact binding
    pub fn fact(template: Fact) -> Self {
        Self::Fact(FactPattern { binding: None, template })
    }

    /// A positive pattern binding the matched fact's identifier
    pub fn bound_fact(binding: impl Into<String>, template: Fact) -> Self {
        Self::Fact(FactPattern {
            binding: Some(binding.into()),
            template,
        })
    }

    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::And(conditions.into_iter().collect())
    }

    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::Or(conditions.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Self::Not(Box::new(condition))
    }

    /// A test over previously bound variables
    pub fn test<F>(params: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        Self::Test(TestFn::new(params, func))
    }

    /// A bind computing a new variable from previously bound ones
    pub fn bind<F>(
        var: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<String>>,
        func: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Bind(BindFn::new(var, params, func))
    }
}

/// A binding environment: variable name to resolved value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(HashMap<String, Value>);

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Resolve a fact-binding variable to its fact handle
    pub fn fact(&self, name: &str) -> Option<FactId> {
        self.0.get(name).and_then(Value::as_fact_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, value: Value) {
        self.0.insert(name, value);
    }

    /// Copy with the compiler's internal variables stripped
    pub(crate) fn public(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(name, _)| !name.starts_with(INTERNAL_VAR_PREFIX))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }
}

/// The action half of a production.
///
/// Declared parameter names are validated against the condition's bound
/// variables at `add_production` time; at firing time the action receives
/// the engine (for working-memory mutation) and the match's full binding
/// environment.
#[derive(Clone)]
pub struct Action {
    params: Vec<String>,
    func: Arc<dyn Fn(&mut TrellisEngine, &Bindings) -> TrellisResult<Value> + Send + Sync>,
}

impl Action {
    pub fn new<F>(params: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&mut TrellisEngine, &Bindings) -> TrellisResult<Value> + Send + Sync + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn invoke(&self, engine: &mut TrellisEngine, bindings: &Bindings) -> TrellisResult<Value> {
        (self.func)(engine, bindings)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("params", &self.params).finish_non_exhaustive()
    }
}

/// A production: a condition expression paired with an action.
#[derive(Debug, Clone)]
pub struct Production {
    pub name: String,
    pub condition: Condition,
    pub action: Action,
}

impl Production {
    pub fn new(name: impl Into<String>, condition: Condition, action: Action) -> Self {
        Self { name: name.into(), condition, action }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub fact_count: usize,
    pub wme_count: usize,
    pub production_count: usize,
    pub node_count: usize,
    pub alpha_memory_count: usize,
    pub match_count: usize,
}
