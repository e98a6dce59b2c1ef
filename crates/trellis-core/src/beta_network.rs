//! Beta network: tokens, join/negation/NCC/test/bind/terminal nodes, and
//! the incremental activation protocol
//!
//! The beta network is a left-deep tree. Every node owns the beta memory of
//! tokens it has emitted; a token records its parent token, the WME consumed
//! at this level (`None` for pass-through levels), and its derived binding
//! environment.
//!
//! ```text
//!  root ──▶ join ──▶ join ──▶ test ──▶ negative ──▶ production
//!   │        ▲        ▲                   ▲              │
//! dummy      │        │                   │         conflict set
//! token   alpha     alpha               alpha
//!         memory    memory              memory
//! ```
//!
//! Activation protocol:
//! - *Right activation* (WME enters a join or negative node's alpha input):
//!   iterate the parent memory's live tokens, run the match steps, emit
//!   extended tokens (join) or grow blocker sets (negative).
//! - *Left activation* (token enters from the parent): joins iterate their
//!   alpha memory; negative/NCC nodes store a pass-through token and gate
//!   its children on liveness; tests and binds evaluate over the binding
//!   environment; terminals update the conflict set.
//! - *Removal*: tokens derived from a removed WME are traced through the
//!   `WME → token` index and deleted with their descendants; negative and
//!   NCC nodes re-assert downstream consequences when their blocker/result
//!   sets empty.
//!
//! Nodes, memories, and tokens are arena-allocated with stable integer
//! handles; membership is stored as handles rather than owning pointers.

use crate::alpha_memory::{AlphaMemoryId, AlphaNetwork};
use crate::conflict_set::ConflictSet;
use crate::error::{TrellisError, TrellisResult};
use crate::fact_store::{Wme, WmeId};
use crate::types::{BindFn, Bindings, ProductionId, TestFn};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use trellis_types::Value;

/// Handle to a beta node
pub(crate) type NodeId = usize;

/// Handle to a token
pub(crate) type TokenId = u64;

/// Which slot of a WME a match step reads.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepSlot {
    /// The owning fact's identifier, read as `Value::FactRef`
    FactId,
    /// The WME value, optionally navigated through a path expression
    Value { path: Vec<String> },
}

/// One variable test performed when matching a WME against a token.
///
/// `bind` marks the variable's first occurrence (it binds); otherwise the
/// slot is an equality constraint against the existing binding. Constant
/// constraints never appear here: the alpha network has already enforced
/// them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MatchStep {
    pub slot: StepSlot,
    pub var: String,
    pub bind: bool,
}

/// Node variants of the beta network.
#[derive(Debug, Clone)]
pub(crate) enum BetaNodeKind {
    /// Dummy top node holding exactly one empty token
    Root,
    Join {
        alpha: AlphaMemoryId,
        steps: Vec<MatchStep>,
    },
    Negative {
        alpha: AlphaMemoryId,
        steps: Vec<MatchStep>,
    },
    /// Negated conjunction; liveness is the emptiness of the parent
    /// token's result set for this node
    Ncc { partner: NodeId },
    /// Bottom of an NCC's private subnetwork; assigns each subnetwork
    /// match to its owner token `owner_distance` levels up
    NccPartner { ncc: NodeId, owner_distance: usize },
    Test { test: TestFn },
    Bind { bind: BindFn },
    Production { production: ProductionId },
}

#[derive(Debug)]
pub(crate) struct BetaNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// This node's beta memory: every token it has emitted
    pub tokens: Vec<TokenId>,
    pub kind: BetaNodeKind,
    /// Number of productions depending on this node
    pub production_refs: usize,
}

#[derive(Debug)]
pub(crate) struct Token {
    pub node: NodeId,
    pub parent: Option<TokenId>,
    pub wme: Option<WmeId>,
    pub bindings: Bindings,
    pub children: Vec<TokenId>,
    /// Negative-node state: WMEs currently falsifying this token
    pub blockers: HashSet<WmeId>,
    /// Per-NCC-node subnetwork matches owned by this token
    pub ncc_results: HashMap<NodeId, HashSet<TokenId>>,
    /// For NCC partner results: the owning token and its NCC node
    pub owner: Option<(TokenId, NodeId)>,
}

/// Borrowed context threaded through every activation.
pub(crate) struct Propagation<'a> {
    pub alpha: &'a AlphaNetwork,
    pub wmes: &'a HashMap<WmeId, Wme>,
    pub conflicts: &'a mut ConflictSet,
    pub strict_tests: bool,
}

#[derive(Debug)]
pub(crate) struct BetaNetwork {
    nodes: Vec<Option<BetaNode>>,
    tokens: HashMap<TokenId, Token>,
    next_token: TokenId,
    root: NodeId,
    /// Tokens whose own WME is the key; traced on WME removal
    wme_tokens: HashMap<WmeId, Vec<TokenId>>,
    /// Negative tokens blocked by the key WME
    wme_blocking: HashMap<WmeId, Vec<TokenId>>,
    /// Tokens currently being torn down; suppresses re-assertion into a
    /// dying subtree
    deleting: HashSet<TokenId>,
}

impl BetaNetwork {
    pub fn new() -> Self {
        let root = BetaNode {
            id: 0,
            parent: None,
            children: Vec::new(),
            tokens: vec![0],
            kind: BetaNodeKind::Root,
            production_refs: 0,
        };
        let root_token = Token {
            node: 0,
            parent: None,
            wme: None,
            bindings: Bindings::default(),
            children: Vec::new(),
            blockers: HashSet::new(),
            ncc_results: HashMap::new(),
            owner: None,
        };
        let mut tokens = HashMap::new();
        tokens.insert(0, root_token);
        Self {
            nodes: vec![Some(root)],
            tokens,
            next_token: 1,
            root: 0,
            wme_tokens: HashMap::new(),
            wme_blocking: HashMap::new(),
            deleting: HashSet::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &BetaNode {
        self.nodes[id].as_ref().expect("beta node not present")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut BetaNode {
        self.nodes[id].as_mut().expect("beta node not present")
    }

    pub fn node_exists(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(Option::is_some)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Allocate a node under `parent`. Child order is insertion order and
    /// is load-bearing: an NCC's subnetwork head must precede the NCC node
    /// itself so subnetwork results exist before liveness is read.
    pub fn alloc_node(&mut self, parent: NodeId, kind: BetaNodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(BetaNode {
            id,
            parent: Some(parent),
            children: Vec::new(),
            tokens: Vec::new(),
            kind,
            production_refs: 0,
        }));
        self.node_mut(parent).children.push(id);
        id
    }

    /// Unlink a node whose tokens have already been deleted.
    pub fn destroy_node(&mut self, id: NodeId) {
        let parent = self.node(id).parent;
        if let Some(parent) = parent {
            if self.node_exists(parent) {
                self.node_mut(parent).children.retain(|&c| c != id);
            }
        }
        self.nodes[id] = None;
    }

    /// Snapshot of a node's current token memory.
    pub fn node_tokens(&self, id: NodeId) -> Vec<TokenId> {
        self.node(id).tokens.clone()
    }

    /// Whether the token is visible downstream. Join, test, bind, and
    /// terminal tokens always are; negative tokens require an empty
    /// blocker set, NCC tokens an empty result set on their parent.
    fn token_is_live(&self, id: TokenId) -> bool {
        let token = &self.tokens[&id];
        match &self.node(token.node).kind {
            BetaNodeKind::Negative { .. } => token.blockers.is_empty(),
            BetaNodeKind::Ncc { .. } => match token.parent {
                Some(parent) => self.tokens[&parent]
                    .ncc_results
                    .get(&token.node)
                    .is_none_or(HashSet::is_empty),
                None => true,
            },
            _ => true,
        }
    }

    fn make_token(
        &mut self,
        node: NodeId,
        parent: TokenId,
        wme: Option<WmeId>,
        bindings: Bindings,
    ) -> TokenId {
        let id = self.next_token;
        self.next_token += 1;
        self.tokens.insert(
            id,
            Token {
                node,
                parent: Some(parent),
                wme,
                bindings,
                children: Vec::new(),
                blockers: HashSet::new(),
                ncc_results: HashMap::new(),
                owner: None,
            },
        );
        self.node_mut(node).tokens.push(id);
        if let Some(pt) = self.tokens.get_mut(&parent) {
            pt.children.push(id);
        }
        if let Some(w) = wme {
            self.wme_tokens.entry(w).or_default().push(id);
        }
        id
    }

    fn nth_parent(&self, token: TokenId, n: usize) -> TokenId {
        let mut current = token;
        for _ in 0..n {
            current = self.tokens[&current]
                .parent
                .expect("token ancestry shorter than expected");
        }
        current
    }

    fn find_child_at_node(&self, token: TokenId, node: NodeId) -> Option<TokenId> {
        self.tokens[&token]
            .children
            .iter()
            .copied()
            .find(|c| self.tokens[c].node == node)
    }

    fn activate_children(
        &mut self,
        node: NodeId,
        token: TokenId,
        p: &mut Propagation<'_>,
    ) -> TrellisResult<()> {
        for child in self.node(node).children.clone() {
            self.left_activate(child, token, p)?;
        }
        Ok(())
    }

    /// A token has arrived at `node` from its parent memory.
    pub fn left_activate(
        &mut self,
        node: NodeId,
        parent_token: TokenId,
        p: &mut Propagation<'_>,
    ) -> TrellisResult<()> {
        let kind = self.node(node).kind.clone();
        match kind {
            BetaNodeKind::Root => Err(TrellisError::internal(
                "beta_network",
                "root node cannot be activated",
            )),
            BetaNodeKind::Join { alpha, steps } => {
                let wmes = p.wmes;
                let base = self.tokens[&parent_token].bindings.clone();
                for wme_id in p.alpha.memory(alpha).wmes.clone() {
                    if let Some(env) = run_match_steps(&steps, &base, &wmes[&wme_id]) {
                        let token = self.make_token(node, parent_token, Some(wme_id), env);
                        self.activate_children(node, token, p)?;
                    }
                }
                Ok(())
            }
            BetaNodeKind::Negative { alpha, steps } => {
                let wmes = p.wmes;
                let env = self.tokens[&parent_token].bindings.clone();
                let token = self.make_token(node, parent_token, None, env.clone());
                for wme_id in p.alpha.memory(alpha).wmes.clone() {
                    if run_match_steps(&steps, &env, &wmes[&wme_id]).is_some()
                        && self.tokens.get_mut(&token).expect("fresh token").blockers.insert(wme_id)
                    {
                        self.wme_blocking.entry(wme_id).or_default().push(token);
                    }
                }
                if self.tokens[&token].blockers.is_empty() {
                    self.activate_children(node, token, p)?;
                }
                Ok(())
            }
            BetaNodeKind::Ncc { .. } => {
                let env = self.tokens[&parent_token].bindings.clone();
                let token = self.make_token(node, parent_token, None, env);
                if self.token_is_live(token) {
                    self.activate_children(node, token, p)?;
                }
                Ok(())
            }
            BetaNodeKind::NccPartner { ncc, owner_distance } => {
                let result = self.make_token(node, parent_token, None, Bindings::default());
                let owner = self.nth_parent(result, owner_distance);
                let owner_token = self.tokens.get_mut(&owner).expect("owner token present");
                let results = owner_token.ncc_results.entry(ncc).or_default();
                results.insert(result);
                let first_result = results.len() == 1;
                self.tokens.get_mut(&result).expect("fresh token").owner = Some((owner, ncc));

                // The first witness retracts everything downstream of the
                // owner's NCC token; later witnesses change nothing.
                if first_result && !self.deleting.contains(&owner) {
                    if let Some(ncc_token) = self.find_child_at_node(owner, ncc) {
                        self.delete_descendants(ncc_token, p)?;
                    }
                }
                Ok(())
            }
            BetaNodeKind::Test { test } => {
                let env = self.tokens[&parent_token].bindings.clone();
                let args = gather_args(&env, test.params())?;
                let passed = match test.eval(&args) {
                    Ok(result) => result,
                    Err(err) if p.strict_tests => {
                        return Err(TrellisError::test(err.to_string()));
                    }
                    Err(err) => {
                        warn!(error = %err, params = ?test.params(), "test function failed; treating as false");
                        false
                    }
                };
                if passed {
                    let token = self.make_token(node, parent_token, None, env);
                    self.activate_children(node, token, p)?;
                }
                Ok(())
            }
            BetaNodeKind::Bind { bind } => {
                let mut env = self.tokens[&parent_token].bindings.clone();
                let args = gather_args(&env, bind.params())?;
                env.insert(bind.var().to_string(), bind.eval(&args));
                let token = self.make_token(node, parent_token, None, env);
                self.activate_children(node, token, p)
            }
            BetaNodeKind::Production { production } => {
                let env = self.tokens[&parent_token].bindings.clone();
                let token = self.make_token(node, parent_token, None, env);
                let public = self.tokens[&token].bindings.public();
                p.conflicts.insert(production, token, public);
                Ok(())
            }
        }
    }

    /// A WME has entered this node's alpha input.
    pub fn right_activate(
        &mut self,
        node: NodeId,
        wme_id: WmeId,
        p: &mut Propagation<'_>,
    ) -> TrellisResult<()> {
        let kind = self.node(node).kind.clone();
        match kind {
            BetaNodeKind::Join { steps, .. } => {
                let wmes = p.wmes;
                let parent = self
                    .node(node)
                    .parent
                    .ok_or_else(|| TrellisError::internal("beta_network", "join without parent"))?;
                let parent_tokens: Vec<TokenId> = self
                    .node(parent)
                    .tokens
                    .clone()
                    .into_iter()
                    .filter(|&t| self.token_is_live(t))
                    .collect();
                for t in parent_tokens {
                    let base = self.tokens[&t].bindings.clone();
                    if let Some(env) = run_match_steps(&steps, &base, &wmes[&wme_id]) {
                        let token = self.make_token(node, t, Some(wme_id), env);
                        self.activate_children(node, token, p)?;
                    }
                }
                Ok(())
            }
            BetaNodeKind::Negative { steps, .. } => {
                let wmes = p.wmes;
                for token in self.node(node).tokens.clone() {
                    let env = self.tokens[&token].bindings.clone();
                    if run_match_steps(&steps, &env, &wmes[&wme_id]).is_some() {
                        let was_live = self.tokens[&token].blockers.is_empty();
                        if self
                            .tokens
                            .get_mut(&token)
                            .expect("token present")
                            .blockers
                            .insert(wme_id)
                        {
                            self.wme_blocking.entry(wme_id).or_default().push(token);
                        }
                        if was_live {
                            self.delete_descendants(token, p)?;
                        }
                    }
                }
                Ok(())
            }
            _ => Err(TrellisError::internal(
                "beta_network",
                "only join and negative nodes take right activations",
            )),
        }
    }

    /// Backfill a freshly built node from its parent's existing live
    /// tokens, so productions added after facts see all current matches.
    pub fn update_with_matches_from_above(
        &mut self,
        node: NodeId,
        p: &mut Propagation<'_>,
    ) -> TrellisResult<()> {
        let parent = self
            .node(node)
            .parent
            .ok_or_else(|| TrellisError::internal("beta_network", "cannot backfill the root"))?;
        let parent_tokens: Vec<TokenId> = self.node(parent).tokens.clone();
        for token in parent_tokens {
            if self.token_is_live(token) {
                self.left_activate(node, token, p)?;
            }
        }
        Ok(())
    }

    /// Remove every token derived from a WME, then re-assert negative
    /// tokens the WME was blocking.
    pub fn remove_wme(&mut self, wme_id: WmeId, p: &mut Propagation<'_>) -> TrellisResult<()> {
        while let Some(&token) = self.wme_tokens.get(&wme_id).and_then(|list| list.first()) {
            self.delete_token(token, p)?;
        }
        self.wme_tokens.remove(&wme_id);

        if let Some(blocked) = self.wme_blocking.remove(&wme_id) {
            for token in blocked {
                let unblocked_node = match self.tokens.get_mut(&token) {
                    Some(t) => {
                        t.blockers.remove(&wme_id);
                        t.blockers.is_empty().then_some(t.node)
                    }
                    None => None,
                };
                if let Some(node) = unblocked_node {
                    self.activate_children(node, token, p)?;
                }
            }
        }
        Ok(())
    }

    /// Delete all of a token's descendants, keeping the token itself.
    /// Loops instead of iterating a snapshot: NCC re-assertion may append
    /// fresh children mid-teardown and those must die too.
    pub fn delete_descendants(
        &mut self,
        token: TokenId,
        p: &mut Propagation<'_>,
    ) -> TrellisResult<()> {
        loop {
            let child = self.tokens.get(&token).and_then(|t| t.children.first().copied());
            match child {
                Some(c) => self.delete_token(c, p)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Delete a token and everything derived from it.
    pub fn delete_token(&mut self, token: TokenId, p: &mut Propagation<'_>) -> TrellisResult<()> {
        if !self.tokens.contains_key(&token) {
            return Ok(());
        }
        self.deleting.insert(token);
        self.delete_descendants(token, p)?;

        let (node, parent, wme, owner, blockers) = {
            let t = self.tokens.get_mut(&token).expect("token present");
            (
                t.node,
                t.parent,
                t.wme,
                t.owner,
                std::mem::take(&mut t.blockers),
            )
        };

        if let Some(parent) = parent {
            if let Some(pt) = self.tokens.get_mut(&parent) {
                pt.children.retain(|&c| c != token);
            }
        }
        if self.node_exists(node) {
            self.node_mut(node).tokens.retain(|&t| t != token);
            if let BetaNodeKind::Production { production } = &self.node(node).kind {
                p.conflicts.remove(*production, token);
            }
        }
        if let Some(w) = wme {
            if let Some(list) = self.wme_tokens.get_mut(&w) {
                list.retain(|&t| t != token);
                if list.is_empty() {
                    self.wme_tokens.remove(&w);
                }
            }
        }
        for w in blockers {
            if let Some(list) = self.wme_blocking.get_mut(&w) {
                list.retain(|&t| t != token);
                if list.is_empty() {
                    self.wme_blocking.remove(&w);
                }
            }
        }

        // An NCC result going away may restore its owner's liveness.
        if let Some((owner, ncc)) = owner {
            let emptied = match self.tokens.get_mut(&owner) {
                Some(owner_token) => match owner_token.ncc_results.get_mut(&ncc) {
                    Some(results) => {
                        results.remove(&token);
                        if results.is_empty() {
                            owner_token.ncc_results.remove(&ncc);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                },
                None => false,
            };
            if emptied && !self.deleting.contains(&owner) && self.node_exists(ncc) {
                if let Some(ncc_token) = self.find_child_at_node(owner, ncc) {
                    if !self.deleting.contains(&ncc_token) {
                        self.activate_children(ncc, ncc_token, p)?;
                    }
                }
            }
        }

        self.tokens.remove(&token);
        self.deleting.remove(&token);
        Ok(())
    }
}

fn gather_args(env: &Bindings, params: &[String]) -> TrellisResult<Vec<Value>> {
    params
        .iter()
        .map(|param| {
            env.get(param).cloned().ok_or_else(|| {
                TrellisError::internal(
                    "beta_network",
                    format!("parameter '{param}' missing from binding environment"),
                )
            })
        })
        .collect()
}

/// Match a WME against a token's binding environment. Bind steps extend the
/// environment; compare steps are equality constraints. Returns the
/// extended environment on success.
fn run_match_steps(steps: &[MatchStep], base: &Bindings, wme: &Wme) -> Option<Bindings> {
    let mut env = base.clone();
    for step in steps {
        let actual = match &step.slot {
            StepSlot::FactId => Value::FactRef(wme.fact),
            StepSlot::Value { path } => wme.value.navigate(path)?.clone(),
        };
        if step.bind {
            env.insert(step.var.clone(), actual);
        } else if env.get(&step.var) != Some(&actual) {
            return None;
        }
    }
    Some(env)
}
