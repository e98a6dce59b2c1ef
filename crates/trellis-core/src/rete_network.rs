//! Rete network construction and propagation
//!
//! Owns the alpha network, the beta network, working-memory elements, and
//! the conflict set, and orchestrates the two directions of change:
//!
//! - **Facts**: each WME insertion traverses the alpha network and
//!   right-activates the beta successors of every memory it lands in;
//!   removal is symmetric, tracing derived tokens through the incremental
//!   indices.
//! - **Productions**: a condition expression is normalized and validated
//!   first (compile errors leave the network untouched), then each DNF
//!   disjunct is built as a beta chain, reusing any existing node with the
//!   same parent, right input, and match steps. Node refcounts track how
//!   many productions depend on each node; removal tears down only nodes
//!   whose count reaches zero, so shared prefixes (and other productions'
//!   matches) are never perturbed.

use crate::alpha_memory::{AlphaMemoryId, AlphaNetwork, ConstantTest};
use crate::beta_network::{BetaNetwork, BetaNodeKind, MatchStep, NodeId, Propagation, StepSlot};
use crate::condition::{self, Leaf, TripleCondition};
use crate::conflict_set::ConflictSet;
use crate::error::{TrellisError, TrellisResult};
use crate::fact_store::{FactStore, Wme, WmeId};
use crate::types::{EngineStats, Fact, INTERNAL_VAR_PREFIX, Production, ProductionId};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use trellis_types::FactId;

#[derive(Debug)]
struct CompiledProduction {
    production: Production,
    /// Every beta node this production depends on, in build order
    /// (ancestors first), deduplicated.
    nodes: Vec<NodeId>,
}

/// The Rete match network: discrimination tree, join tree, and conflict set.
#[derive(Debug)]
pub(crate) struct ReteNetwork {
    alpha: AlphaNetwork,
    beta: BetaNetwork,
    wmes: HashMap<WmeId, Wme>,
    fact_wmes: HashMap<FactId, Vec<WmeId>>,
    next_wme_id: WmeId,
    conflicts: ConflictSet,
    productions: HashMap<ProductionId, CompiledProduction>,
    next_production_id: ProductionId,
    strict_tests: bool,
}

impl ReteNetwork {
    pub fn new(strict_tests: bool) -> Self {
        Self {
            alpha: AlphaNetwork::new(),
            beta: BetaNetwork::new(),
            wmes: HashMap::new(),
            fact_wmes: HashMap::new(),
            next_wme_id: 0,
            conflicts: ConflictSet::new(),
            productions: HashMap::new(),
            next_production_id: 0,
            strict_tests,
        }
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    pub fn production(&self, id: ProductionId) -> Option<&Production> {
        self.productions.get(&id).map(|compiled| &compiled.production)
    }

    pub fn production_count(&self) -> usize {
        self.productions.len()
    }

    pub fn stats(&self, fact_count: usize) -> EngineStats {
        EngineStats {
            fact_count,
            wme_count: self.wmes.len(),
            production_count: self.productions.len(),
            node_count: self.beta.node_count(),
            alpha_memory_count: self.alpha.memory_count(),
            match_count: self.conflicts.len(),
        }
    }

    // ---------------------------------------------------------------------
    // Fact propagation
    // ---------------------------------------------------------------------

    /// Decompose an inserted fact into WMEs and propagate each one fully
    /// before the next.
    pub fn assert_fact(&mut self, fact: &Fact) -> TrellisResult<()> {
        let fact_id = fact
            .id()
            .ok_or_else(|| TrellisError::internal("rete_network", "fact has no id"))?;
        for (attr, value) in FactStore::decompose(fact) {
            let id = self.next_wme_id;
            self.next_wme_id += 1;
            let wme = Wme { id, fact: fact_id, attr, value };
            self.insert_wme(wme)?;
        }
        Ok(())
    }

    fn insert_wme(&mut self, wme: Wme) -> TrellisResult<()> {
        let touched = self.alpha.activate(&wme);
        let wme_id = wme.id;
        self.fact_wmes.entry(wme.fact).or_default().push(wme_id);
        self.wmes.insert(wme_id, wme);

        for memory in touched {
            for successor in self.alpha.memory(memory).successors.clone() {
                let mut p = Propagation {
                    alpha: &self.alpha,
                    wmes: &self.wmes,
                    conflicts: &mut self.conflicts,
                    strict_tests: self.strict_tests,
                };
                self.beta.right_activate(successor, wme_id, &mut p)?;
            }
        }
        Ok(())
    }

    /// Retract every WME of a fact, tracing and removing all derived
    /// tokens and re-asserting negations the WMEs were blocking.
    pub fn retract_fact(&mut self, fact_id: FactId) -> TrellisResult<()> {
        let wme_ids = self.fact_wmes.remove(&fact_id).unwrap_or_default();
        for wme_id in wme_ids {
            if let Some(wme) = self.wmes.remove(&wme_id) {
                self.alpha.deactivate(&wme);
                let mut p = Propagation {
                    alpha: &self.alpha,
                    wmes: &self.wmes,
                    conflicts: &mut self.conflicts,
                    strict_tests: self.strict_tests,
                };
                self.beta.remove_wme(wme_id, &mut p)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Production compilation
    // ---------------------------------------------------------------------

    pub fn add_production(&mut self, production: Production) -> TrellisResult<ProductionId> {
        // Everything fallible happens before the first network mutation.
        let compiled = condition::compile(&production.condition)?;
        for param in production.action.params() {
            if param.starts_with(INTERNAL_VAR_PREFIX) {
                return Err(TrellisError::compile_variable(
                    param,
                    format!("variable names starting with '{INTERNAL_VAR_PREFIX}' are reserved"),
                ));
            }
            if !compiled.bound.iter().all(|vars| vars.contains(param)) {
                return Err(TrellisError::compile_variable(
                    param,
                    format!("action references variable '{param}' not bound by the condition"),
                ));
            }
        }

        let id = self.next_production_id;
        self.next_production_id += 1;
        debug!(
            production = id,
            name = %production.name,
            disjuncts = compiled.disjuncts.len(),
            "compiling production"
        );

        let mut used: Vec<NodeId> = Vec::new();
        for disjunct in &compiled.disjuncts {
            let mut bound: HashSet<String> = HashSet::new();
            let mut current = self.beta.root();
            for leaf in disjunct {
                current = self.build_leaf(current, leaf, &mut bound, &mut used, true)?;
            }
            self.build_node(
                current,
                BetaNodeKind::Production { production: id },
                &mut used,
            )?;
        }

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(used.len());
        for node in used {
            if seen.insert(node) {
                self.beta.node_mut(node).production_refs += 1;
                nodes.push(node);
            }
        }

        self.productions.insert(id, CompiledProduction { production, nodes });
        Ok(id)
    }

    pub fn remove_production(&mut self, id: ProductionId) -> TrellisResult<()> {
        let compiled = self
            .productions
            .remove(&id)
            .ok_or_else(|| TrellisError::unknown_production(id))?;
        debug!(production = id, name = %compiled.production.name, "removing production");
        self.conflicts.remove_production(id);

        // Children before parents: a node's refcount can only reach zero
        // together with everything below it.
        for &node in compiled.nodes.iter().rev() {
            if !self.beta.node_exists(node) {
                continue;
            }
            let refs = {
                let n = self.beta.node_mut(node);
                n.production_refs -= 1;
                n.production_refs
            };
            if refs > 0 {
                continue;
            }
            for token in self.beta.node_tokens(node) {
                let mut p = Propagation {
                    alpha: &self.alpha,
                    wmes: &self.wmes,
                    conflicts: &mut self.conflicts,
                    strict_tests: self.strict_tests,
                };
                self.beta.delete_token(token, &mut p)?;
            }
            match &self.beta.node(node).kind {
                BetaNodeKind::Join { alpha, .. } | BetaNodeKind::Negative { alpha, .. } => {
                    let alpha = *alpha;
                    self.alpha.unregister_successor(alpha, node);
                }
                _ => {}
            }
            self.beta.destroy_node(node);
        }
        Ok(())
    }

    /// Build (or reuse) the beta chain for one leaf; returns the chain's
    /// new bottom node.
    fn build_leaf(
        &mut self,
        parent: NodeId,
        leaf: &Leaf,
        bound: &mut HashSet<String>,
        used: &mut Vec<NodeId>,
        share: bool,
    ) -> TrellisResult<NodeId> {
        match leaf {
            Leaf::Pattern(triples) => {
                let mut current = parent;
                for triple in triples {
                    let steps = make_steps(triple, bound);
                    let alpha = self.alpha_for(triple);
                    current = self.join_like_node(
                        current,
                        BetaNodeKind::Join { alpha, steps },
                        used,
                        share,
                    )?;
                }
                Ok(current)
            }
            Leaf::Negative(triple) => {
                // Variables first occurring here are existential witnesses;
                // their bindings stay local to the match attempt.
                let mut local = bound.clone();
                let steps = make_steps(triple, &mut local);
                let alpha = self.alpha_for(triple);
                self.join_like_node(parent, BetaNodeKind::Negative { alpha, steps }, used, share)
            }
            Leaf::Ncc(sub) => {
                // The subnetwork is private: no sharing inside it.
                let mut local = bound.clone();
                let mut bottom = parent;
                for sub_leaf in sub {
                    bottom = self.build_leaf(bottom, sub_leaf, &mut local, used, false)?;
                }

                // One token level per subnetwork node, plus the partner's own.
                let mut owner_distance = 1;
                let mut walk = bottom;
                while walk != parent {
                    owner_distance += 1;
                    walk = self
                        .beta
                        .node(walk)
                        .parent
                        .ok_or_else(|| TrellisError::internal("rete_network", "subnetwork detached from parent"))?;
                }

                let partner = self.beta.alloc_node(
                    bottom,
                    BetaNodeKind::NccPartner { ncc: usize::MAX, owner_distance },
                );
                used.push(partner);
                let ncc = self.beta.alloc_node(parent, BetaNodeKind::Ncc { partner });
                used.push(ncc);
                if let BetaNodeKind::NccPartner { ncc: slot, .. } =
                    &mut self.beta.node_mut(partner).kind
                {
                    *slot = ncc;
                }

                // Partner first: owners must hold their result sets before
                // the NCC node reads liveness.
                self.backfill(partner)?;
                self.backfill(ncc)?;
                Ok(ncc)
            }
            Leaf::Test(test) => {
                self.build_node(parent, BetaNodeKind::Test { test: test.clone() }, used)
            }
            Leaf::Bind(bind) => {
                let node =
                    self.build_node(parent, BetaNodeKind::Bind { bind: bind.clone() }, used)?;
                bound.insert(bind.var().to_string());
                Ok(node)
            }
        }
    }

    /// Build or share a join/negative node and hook it to its alpha input.
    fn join_like_node(
        &mut self,
        parent: NodeId,
        kind: BetaNodeKind,
        used: &mut Vec<NodeId>,
        share: bool,
    ) -> TrellisResult<NodeId> {
        if share {
            for child in self.beta.node(parent).children.clone() {
                if kinds_share(&self.beta.node(child).kind, &kind) {
                    used.push(child);
                    return Ok(child);
                }
            }
        }
        let alpha = match &kind {
            BetaNodeKind::Join { alpha, .. } | BetaNodeKind::Negative { alpha, .. } => *alpha,
            _ => unreachable!("join_like_node only builds join and negative nodes"),
        };
        let node = self.beta.alloc_node(parent, kind);
        self.alpha.register_successor(alpha, node);
        used.push(node);
        self.backfill(node)?;
        Ok(node)
    }

    /// Allocate a never-shared node (test, bind, terminal) and backfill it.
    fn build_node(
        &mut self,
        parent: NodeId,
        kind: BetaNodeKind,
        used: &mut Vec<NodeId>,
    ) -> TrellisResult<NodeId> {
        let node = self.beta.alloc_node(parent, kind);
        used.push(node);
        self.backfill(node)?;
        Ok(node)
    }

    fn backfill(&mut self, node: NodeId) -> TrellisResult<()> {
        let mut p = Propagation {
            alpha: &self.alpha,
            wmes: &self.wmes,
            conflicts: &mut self.conflicts,
            strict_tests: self.strict_tests,
        };
        self.beta.update_with_matches_from_above(node, &mut p)
    }

    fn alpha_for(&mut self, triple: &TripleCondition) -> AlphaMemoryId {
        let test = ConstantTest {
            attr: triple.attr.clone(),
            path: triple.path.clone(),
            value: triple.constant.clone(),
        };
        let (id, created) = self.alpha.build_or_share(test);
        if created {
            self.alpha.backfill(id, &self.wmes);
        }
        id
    }
}

/// Derive the join-time variable tests for one triple, updating the set of
/// bound variables as first occurrences bind.
fn make_steps(triple: &TripleCondition, bound: &mut HashSet<String>) -> Vec<MatchStep> {
    let mut steps = Vec::with_capacity(2);
    let id_is_new = bound.insert(triple.id_var.clone());
    steps.push(MatchStep {
        slot: StepSlot::FactId,
        var: triple.id_var.clone(),
        bind: id_is_new,
    });
    if let Some(var) = &triple.value_var {
        let var_is_new = bound.insert(var.clone());
        steps.push(MatchStep {
            slot: StepSlot::Value { path: triple.path.clone() },
            var: var.clone(),
            bind: var_is_new,
        });
    }
    steps
}

fn kinds_share(existing: &BetaNodeKind, wanted: &BetaNodeKind) -> bool {
    match (existing, wanted) {
        (
            BetaNodeKind::Join { alpha: a1, steps: s1 },
            BetaNodeKind::Join { alpha: a2, steps: s2 },
        )
        | (
            BetaNodeKind::Negative { alpha: a1, steps: s1 },
            BetaNodeKind::Negative { alpha: a2, steps: s2 },
        ) => a1 == a2 && s1 == s2,
        // Test, bind, and NCC nodes carry closures and are never shared.
        _ => false,
    }
}
