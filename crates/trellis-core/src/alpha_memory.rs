//! Alpha network: constant-test discrimination over single WMEs
//!
//! Paths from the conceptual discrimination root encode conjunctions of
//! constant tests; here the tree is flattened into a hash index keyed by
//! [`ConstantTest`], which preserves alpha-memory sharing (O(unique tests)
//! memories) while a WME activation only has to consult the memories
//! registered under its attribute.
//!
//! ```text
//! WME (fact-id, attr, value)
//!        │ attribute index
//!        ▼
//! candidate ConstantTests ──pass──▶ AlphaMemory ──▶ right-activate
//!        │                          (WME set)       beta successors
//!        └─fail──▶ dropped
//! ```
//!
//! Path expressions are evaluated here, against the WME's value, at
//! activation time; a WME whose value cannot be navigated never enters the
//! memory.

use crate::beta_network::NodeId;
use crate::fact_store::{Wme, WmeId};
use crate::types::AttrKey;
use std::collections::HashMap;
use tracing::debug;
use trellis_types::Value;

/// Handle to an alpha memory
pub(crate) type AlphaMemoryId = usize;

/// The conjunction of constant tests a terminal alpha node encodes:
/// attribute equality, path navigability, and (optionally) equality of the
/// navigated value against a constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ConstantTest {
    pub attr: AttrKey,
    pub path: Vec<String>,
    pub value: Option<Value>,
}

impl ConstantTest {
    pub fn matches(&self, wme: &Wme) -> bool {
        if wme.attr != self.attr {
            return false;
        }
        let Some(navigated) = wme.value.navigate(&self.path) else {
            return false;
        };
        self.value.as_ref().is_none_or(|constant| constant == navigated)
    }
}

/// Terminal alpha node: the set of WMEs satisfying one constant test, plus
/// the beta nodes it feeds.
#[derive(Debug)]
pub(crate) struct AlphaMemory {
    pub id: AlphaMemoryId,
    pub test: ConstantTest,
    pub wmes: Vec<WmeId>,
    /// Beta successors, descendants first so a WME never joins twice with
    /// a token derived from itself during one activation.
    pub successors: Vec<NodeId>,
}

/// The alpha network: shared, keyed alpha memories with an attribute index.
#[derive(Debug, Default)]
pub(crate) struct AlphaNetwork {
    memories: Vec<Option<AlphaMemory>>,
    by_test: HashMap<ConstantTest, AlphaMemoryId>,
    by_attr: HashMap<AttrKey, Vec<AlphaMemoryId>>,
}

impl AlphaNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse the memory for an identical constant test, or create it.
    /// Returns the handle and whether it was newly created (and therefore
    /// needs a backfill from working memory).
    pub fn build_or_share(&mut self, test: ConstantTest) -> (AlphaMemoryId, bool) {
        if let Some(&id) = self.by_test.get(&test) {
            return (id, false);
        }
        let id = self.memories.len();
        debug!(memory = id, test = ?test, "alpha memory created");
        self.by_attr.entry(test.attr.clone()).or_default().push(id);
        self.by_test.insert(test.clone(), id);
        self.memories.push(Some(AlphaMemory {
            id,
            test,
            wmes: Vec::new(),
            successors: Vec::new(),
        }));
        (id, true)
    }

    pub fn memory(&self, id: AlphaMemoryId) -> &AlphaMemory {
        self.memories[id].as_ref().expect("alpha memory not present")
    }

    fn memory_mut(&mut self, id: AlphaMemoryId) -> &mut AlphaMemory {
        self.memories[id].as_mut().expect("alpha memory not present")
    }

    /// Insert a WME into every memory whose test it satisfies; returns the
    /// touched memories in creation order.
    pub fn activate(&mut self, wme: &Wme) -> Vec<AlphaMemoryId> {
        let Some(candidates) = self.by_attr.get(&wme.attr) else {
            return Vec::new();
        };
        let touched: Vec<AlphaMemoryId> = candidates
            .iter()
            .copied()
            .filter(|&id| {
                self.memories[id]
                    .as_ref()
                    .is_some_and(|memory| memory.test.matches(wme))
            })
            .collect();
        for &id in &touched {
            self.memory_mut(id).wmes.push(wme.id);
        }
        touched
    }

    /// Remove a WME from every memory holding it.
    pub fn deactivate(&mut self, wme: &Wme) {
        let Some(candidates) = self.by_attr.get(&wme.attr) else {
            return;
        };
        for id in candidates.clone() {
            if let Some(memory) = self.memories[id].as_mut() {
                memory.wmes.retain(|&w| w != wme.id);
            }
        }
    }

    /// Backfill a newly created memory from the current working memory, in
    /// WME id order so propagation order stays deterministic.
    pub fn backfill(&mut self, id: AlphaMemoryId, all: &HashMap<WmeId, Wme>) {
        let mut wme_ids: Vec<WmeId> = all.keys().copied().collect();
        wme_ids.sort_unstable();
        let memory = self.memory_mut(id);
        for wme_id in wme_ids {
            if memory.test.matches(&all[&wme_id]) {
                memory.wmes.push(wme_id);
            }
        }
    }

    /// Register a beta successor. New successors are prepended: nodes are
    /// built ancestors-first, so prepending keeps descendants ahead of
    /// their ancestors in the activation order.
    pub fn register_successor(&mut self, id: AlphaMemoryId, node: NodeId) {
        self.memory_mut(id).successors.insert(0, node);
    }

    /// Unregister a successor; destroys the memory when none remain.
    pub fn unregister_successor(&mut self, id: AlphaMemoryId, node: NodeId) {
        let memory = self.memory_mut(id);
        memory.successors.retain(|&n| n != node);
        if memory.successors.is_empty() {
            let test = memory.test.clone();
            debug!(memory = id, "alpha memory destroyed");
            self.by_test.remove(&test);
            if let Some(candidates) = self.by_attr.get_mut(&test.attr) {
                candidates.retain(|&m| m != id);
            }
            self.memories[id] = None;
        }
    }

    pub fn memory_count(&self) -> usize {
        self.memories.iter().filter(|m| m.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wme(id: WmeId, attr: &str, value: Value) -> Wme {
        Wme {
            id,
            fact: 0,
            attr: AttrKey::Name(attr.to_string()),
            value,
        }
    }

    #[test]
    fn constant_test_checks_attribute_and_value() {
        let test = ConstantTest {
            attr: AttrKey::Name("color".into()),
            path: Vec::new(),
            value: Some(Value::from("red")),
        };
        assert!(test.matches(&wme(1, "color", Value::from("red"))));
        assert!(!test.matches(&wme(2, "color", Value::from("blue"))));
        assert!(!test.matches(&wme(3, "shade", Value::from("red"))));
    }

    #[test]
    fn wildcard_test_only_requires_the_attribute() {
        let test = ConstantTest {
            attr: AttrKey::Name("color".into()),
            path: Vec::new(),
            value: None,
        };
        assert!(test.matches(&wme(1, "color", Value::from("red"))));
        assert!(test.matches(&wme(2, "color", Value::from(3))));
    }

    #[test]
    fn path_tests_navigate_nested_objects() {
        let test = ConstantTest {
            attr: AttrKey::Name("against".into()),
            path: vec!["scissors".into()],
            value: Some(Value::from(1)),
        };
        let nested = Value::object([("scissors", Value::from(1))]);
        assert!(test.matches(&wme(1, "against", nested)));
        // Non-object values cannot be navigated.
        assert!(!test.matches(&wme(2, "against", Value::from(1))));
    }

    #[test]
    fn identical_tests_share_one_memory() {
        let mut network = AlphaNetwork::new();
        let test = ConstantTest {
            attr: AttrKey::Name("color".into()),
            path: Vec::new(),
            value: Some(Value::from("red")),
        };
        let (first, created_first) = network.build_or_share(test.clone());
        let (second, created_second) = network.build_or_share(test);
        assert_eq!(first, second);
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(network.memory_count(), 1);
    }

    #[test]
    fn activation_touches_only_matching_memories() {
        let mut network = AlphaNetwork::new();
        let (red, _) = network.build_or_share(ConstantTest {
            attr: AttrKey::Name("color".into()),
            path: Vec::new(),
            value: Some(Value::from("red")),
        });
        let (any, _) = network.build_or_share(ConstantTest {
            attr: AttrKey::Name("color".into()),
            path: Vec::new(),
            value: None,
        });

        let w = wme(7, "color", Value::from("red"));
        let touched = network.activate(&w);
        assert_eq!(touched, vec![red, any]);

        let w2 = wme(8, "color", Value::from("blue"));
        let touched = network.activate(&w2);
        assert_eq!(touched, vec![any]);

        network.deactivate(&w);
        assert!(network.memory(red).wmes.is_empty());
        assert_eq!(network.memory(any).wmes, vec![8]);
    }

    #[test]
    fn successors_are_kept_descendants_first() {
        let mut network = AlphaNetwork::new();
        let (id, _) = network.build_or_share(ConstantTest {
            attr: AttrKey::Name("x".into()),
            path: Vec::new(),
            value: None,
        });
        network.register_successor(id, 1); // ancestor, built first
        network.register_successor(id, 2); // descendant, built later
        assert_eq!(network.memory(id).successors, vec![2, 1]);

        network.unregister_successor(id, 2);
        network.unregister_successor(id, 1);
        assert_eq!(network.memory_count(), 0);
    }
}
