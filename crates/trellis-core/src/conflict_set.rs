//! Conflict set: the multiset of currently valid complete matches.
//!
//! Entries are keyed by `(production, supporting token)`; distinct
//! supporting tokens are distinct matches and are never deduplicated, even
//! when their binding environments are equal. The set is unordered by
//! contract, but iteration follows match insertion order and is stable for
//! identical operation histories.

use crate::beta_network::TokenId;
use crate::types::{Bindings, ProductionId};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// A conflict-set entry: a production satisfied under a binding
/// environment, supported by one complete token.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub production: ProductionId,
    pub bindings: Bindings,
    pub(crate) token: TokenId,
    pub(crate) seq: u64,
}

/// Insertion-ordered conflict set.
#[derive(Debug, Default)]
pub struct ConflictSet {
    entries: BTreeMap<u64, Match>,
    index: HashMap<(ProductionId, TokenId), u64>,
    next_seq: u64,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, production: ProductionId, token: TokenId, bindings: Bindings) {
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(production, token, seq, "match asserted");
        self.index.insert((production, token), seq);
        self.entries.insert(
            seq,
            Match {
                production,
                bindings,
                token,
                seq,
            },
        );
    }

    pub(crate) fn remove(&mut self, production: ProductionId, token: TokenId) {
        if let Some(seq) = self.index.remove(&(production, token)) {
            trace!(production, token, seq, "match retracted");
            self.entries.remove(&seq);
        }
    }

    /// Drop every entry of one production (used on `remove_production`).
    pub(crate) fn remove_production(&mut self, production: ProductionId) {
        self.index.retain(|&(p, _), _| p != production);
        self.entries.retain(|_, m| m.production != production);
    }

    /// Whether this exact entry is still valid.
    pub fn contains(&self, m: &Match) -> bool {
        self.index.get(&(m.production, m.token)) == Some(&m.seq)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_follows_insertion_order() {
        let mut set = ConflictSet::new();
        set.insert(2, 10, Bindings::default());
        set.insert(1, 11, Bindings::default());
        set.insert(2, 12, Bindings::default());

        let order: Vec<(ProductionId, TokenId)> =
            set.iter().map(|m| (m.production, m.token)).collect();
        assert_eq!(order, vec![(2, 10), (1, 11), (2, 12)]);
    }

    #[test]
    fn removal_invalidates_the_exact_entry() {
        let mut set = ConflictSet::new();
        set.insert(1, 10, Bindings::default());
        let m = set.iter().next().cloned().unwrap();
        assert!(set.contains(&m));

        set.remove(1, 10);
        assert!(!set.contains(&m));
        assert!(set.is_empty());

        // A re-asserted match is a new entry; the stale handle stays stale.
        set.insert(1, 10, Bindings::default());
        assert!(!set.contains(&m));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_production_sweeps_only_its_entries() {
        let mut set = ConflictSet::new();
        set.insert(1, 10, Bindings::default());
        set.insert(2, 11, Bindings::default());
        set.insert(1, 12, Bindings::default());

        set.remove_production(1);
        let remaining: Vec<ProductionId> = set.iter().map(|m| m.production).collect();
        assert_eq!(remaining, vec![2]);
    }
}
