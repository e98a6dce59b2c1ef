//! Engine facade: the public entry point owning working memory and the
//! Rete network.
//!
//! All state is owned by a single engine value; the engine is
//! single-threaded and non-reentrant. Every mutating operation propagates
//! its consequences to quiescence before returning, so `matches()` is
//! always consistent with working memory. Actions invoked from [`fire`]
//! receive the engine itself and may call the mutating API; each such call
//! completes its propagation before returning to the action.
//!
//! [`fire`]: TrellisEngine::fire

use crate::conflict_set::Match;
use crate::error::{TrellisError, TrellisResult};
use crate::fact_store::FactStore;
use crate::rete_network::ReteNetwork;
use crate::types::{EngineStats, Fact, Production, ProductionId};
use tracing::{debug, instrument};
use trellis_types::{FactId, Value};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Surface test-function errors from the triggering mutation instead
    /// of treating a failing test as false.
    pub strict_tests: bool,
    /// Capacity hint for working memory.
    pub capacity: Option<usize>,
}

/// A forward-chaining production-rule engine built on the Rete algorithm.
///
/// ```
/// use trellis_core::{Action, Condition, Fact, Production, TrellisEngine};
/// use trellis_core::Value;
///
/// let mut engine = TrellisEngine::new();
/// engine.add_production(Production::new(
///     "red-things",
///     Condition::fact(Fact::new().with("color", "red")),
///     Action::new(Vec::<String>::new(), |_engine, _bindings| Ok(Value::Null)),
/// ))?;
///
/// engine.add_fact(Fact::new().with("color", "red"))?;
/// assert_eq!(engine.matches().len(), 1);
/// # Ok::<(), trellis_core::TrellisError>(())
/// ```
#[derive(Debug)]
pub struct TrellisEngine {
    facts: FactStore,
    network: ReteNetwork,
}

impl Default for TrellisEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrellisEngine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let facts = match options.capacity {
            Some(capacity) => FactStore::with_capacity(capacity),
            None => FactStore::new(),
        };
        Self {
            facts,
            network: ReteNetwork::new(options.strict_tests),
        }
    }

    /// Insert a fact into working memory and propagate it.
    ///
    /// Rejects facts containing variables. Returns the assigned fact id,
    /// which is monotonically assigned and never reused.
    #[instrument(skip_all)]
    pub fn add_fact(&mut self, fact: Fact) -> TrellisResult<FactId> {
        let id = self.facts.insert(fact)?;
        self.network.assert_fact(self.facts.get(id).expect("fact just inserted"))?;
        debug!(fact_id = id, "fact asserted");
        Ok(id)
    }

    /// Remove a fact and retract everything derived from it.
    #[instrument(skip_all, fields(fact_id = id))]
    pub fn remove_fact(&mut self, id: FactId) -> TrellisResult<()> {
        self.facts.remove(id)?;
        self.network.retract_fact(id)?;
        debug!(fact_id = id, "fact retracted");
        Ok(())
    }

    /// Re-assert a previously added fact that was mutated in place.
    ///
    /// Defined as removal followed by re-insertion under the same id; not
    /// atomic with respect to the conflict set. Matches depending on the
    /// old values retract before matches on the new values assert.
    #[instrument(skip_all)]
    pub fn update_fact(&mut self, fact: Fact) -> TrellisResult<()> {
        let id = fact
            .id()
            .ok_or_else(|| TrellisError::fact_store("fact has no id; use add_fact"))?;
        if !self.facts.contains(id) {
            return Err(TrellisError::unknown_fact(id));
        }
        if !fact.is_ground() {
            return Err(TrellisError::fact_store(
                "cannot add a fact containing unbound variables",
            ));
        }

        self.facts.remove(id)?;
        self.network.retract_fact(id)?;
        self.facts.reinsert(fact)?;
        self.network.assert_fact(self.facts.get(id).expect("fact just re-inserted"))?;
        debug!(fact_id = id, "fact updated");
        Ok(())
    }

    /// Compile a production into the network.
    ///
    /// Compile errors (malformed conditions, unbound variables in tests,
    /// binds, or the action) leave the network unchanged.
    #[instrument(skip_all)]
    pub fn add_production(&mut self, production: Production) -> TrellisResult<ProductionId> {
        self.network.add_production(production)
    }

    /// Remove a production, tearing down the network nodes only it uses.
    /// Other productions' matches are not perturbed.
    #[instrument(skip_all, fields(production = id))]
    pub fn remove_production(&mut self, id: ProductionId) -> TrellisResult<()> {
        self.network.remove_production(id)
    }

    /// Snapshot of the conflict set, in match insertion order.
    pub fn matches(&self) -> Vec<Match> {
        self.network.conflicts().iter().cloned().collect()
    }

    /// Conflict-set entries of one production.
    pub fn matches_for(&self, production: ProductionId) -> Vec<Match> {
        self.network
            .conflicts()
            .iter()
            .filter(|m| m.production == production)
            .cloned()
            .collect()
    }

    /// Fire a match: invoke its production's action with the match's
    /// binding environment.
    ///
    /// Errors if the match is no longer in the conflict set. The action
    /// may mutate working memory through the engine; each mutation fully
    /// propagates before returning to the action. Action errors surface to
    /// the caller with all pre-error mutations retained.
    #[instrument(skip_all, fields(production = m.production))]
    pub fn fire(&mut self, m: &Match) -> TrellisResult<Value> {
        if !self.network.conflicts().contains(m) {
            return Err(TrellisError::stale_match(m.production));
        }
        let action = self
            .network
            .production(m.production)
            .ok_or_else(|| TrellisError::unknown_production(m.production))?
            .action
            .clone();
        action.invoke(self, &m.bindings)
    }

    /// Look up a fact by id.
    pub fn fact(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(id)
    }

    /// Ids of all facts currently in working memory, ascending.
    pub fn fact_ids(&self) -> Vec<FactId> {
        self.facts.fact_ids()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn production_count(&self) -> usize {
        self.network.production_count()
    }

    /// Remove every fact, keeping productions compiled.
    #[instrument(skip_all)]
    pub fn clear_facts(&mut self) -> TrellisResult<()> {
        for id in self.facts.fact_ids() {
            self.remove_fact(id)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        self.network.stats(self.facts.len())
    }
}
