//! Working memory: canonical storage of facts with stable identifiers.
//!
//! Fact ids are assigned monotonically on insertion and never reused within
//! a session. Each fact decomposes into WMEs, the `(fact-id, attribute,
//! value)` triples the match network actually sees. Nested object
//! values are not exploded into multiple WMEs; path expressions navigate
//! into them at alpha-activation time.

use crate::error::{TrellisError, TrellisResult};
use crate::types::{AttrKey, Fact};
use std::collections::HashMap;
use tracing::debug;
use trellis_types::{FactId, Value};

/// Unique identifier for working-memory elements
pub type WmeId = u64;

/// A working-memory element: one `(fact-id, attribute, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Wme {
    pub id: WmeId,
    pub fact: FactId,
    pub attr: AttrKey,
    pub value: Value,
}

/// Canonical fact storage with monotonic id assignment.
#[derive(Debug, Default)]
pub struct FactStore {
    facts: HashMap<FactId, Fact>,
    next_id: FactId,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            facts: HashMap::with_capacity(capacity),
            next_id: 0,
        }
    }

    /// Insert a new fact, assigning it a fresh id.
    ///
    /// Rejects facts containing variables and facts that already carry an
    /// id from a previous insertion.
    pub fn insert(&mut self, mut fact: Fact) -> TrellisResult<FactId> {
        if !fact.is_ground() {
            return Err(TrellisError::fact_store(
                "cannot add a fact containing unbound variables",
            ));
        }
        if let Some(existing) = fact.id() {
            return Err(TrellisError::FactStore {
                message: format!("fact already carries id {existing}; use update_fact"),
                fact_id: Some(existing),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        fact.assign_id(id);
        debug!(fact_id = id, attrs = fact.len(), "fact inserted");
        self.facts.insert(id, fact);
        Ok(id)
    }

    /// Re-insert a fact under the id it already carries (the add half of
    /// `update_fact`). The slot must be vacant.
    pub fn reinsert(&mut self, fact: Fact) -> TrellisResult<FactId> {
        if !fact.is_ground() {
            return Err(TrellisError::fact_store(
                "cannot add a fact containing unbound variables",
            ));
        }
        let id = fact
            .id()
            .ok_or_else(|| TrellisError::fact_store("fact has no id; use add_fact"))?;
        if self.facts.contains_key(&id) {
            return Err(TrellisError::FactStore {
                message: format!("fact id {id} is still present in working memory"),
                fact_id: Some(id),
            });
        }
        self.facts.insert(id, fact);
        Ok(id)
    }

    pub fn remove(&mut self, id: FactId) -> TrellisResult<Fact> {
        self.facts.remove(&id).ok_or_else(|| TrellisError::unknown_fact(id))
    }

    pub fn get(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(&id)
    }

    pub fn contains(&self, id: FactId) -> bool {
        self.facts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Ids of all facts currently present, in ascending order.
    pub fn fact_ids(&self) -> Vec<FactId> {
        let mut ids: Vec<FactId> = self.facts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Decompose a ground fact into its WME attribute/value pairs, in the
    /// fact's deterministic attribute order.
    pub fn decompose(fact: &Fact) -> Vec<(AttrKey, Value)> {
        fact.attrs()
            .filter_map(|(key, term)| term.as_value().map(|v| (key, v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Term;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut store = FactStore::new();
        let a = store.insert(Fact::new().with("x", 1)).unwrap();
        let b = store.insert(Fact::new().with("x", 2)).unwrap();
        assert_eq!((a, b), (0, 1));

        store.remove(a).unwrap();
        let c = store.insert(Fact::new().with("x", 3)).unwrap();
        assert_eq!(c, 2);
    }

    #[test]
    fn facts_with_variables_are_rejected() {
        let mut store = FactStore::new();
        let err = store.insert(Fact::new().with("x", Term::var("v"))).unwrap_err();
        assert_eq!(err.category(), "fact_store");
    }

    #[test]
    fn equal_contents_are_distinct_facts() {
        let mut store = FactStore::new();
        let a = store.insert(Fact::new().with("color", "red")).unwrap();
        let b = store.insert(Fact::new().with("color", "red")).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn removing_unknown_fact_fails() {
        let mut store = FactStore::new();
        assert!(store.remove(99).is_err());
    }

    #[test]
    fn decompose_emits_positional_indices_and_named_attrs() {
        let fact = Fact::new().with_pos("a").with_pos("b").with("name", "x");
        let mut store = FactStore::new();
        let id = store.insert(fact).unwrap();
        let wmes = FactStore::decompose(store.get(id).unwrap());
        assert_eq!(
            wmes,
            vec![
                (AttrKey::Index(0), Value::from("a")),
                (AttrKey::Index(1), Value::from("b")),
                (AttrKey::Name("name".into()), Value::from("x")),
            ]
        );
    }

    #[test]
    fn nested_objects_stay_single_wmes() {
        let fact = Fact::new().with(
            "against",
            Value::object([("scissors", Value::from(1))]),
        );
        let mut store = FactStore::new();
        let id = store.insert(fact).unwrap();
        assert_eq!(FactStore::decompose(store.get(id).unwrap()).len(), 1);
    }
}
