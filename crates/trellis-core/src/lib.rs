//! # Trellis Core: Rete Production-Rule Engine
//!
//! A forward-chaining production-rule engine built on the Rete match
//! algorithm. The engine maintains, incrementally, the set of all ways a
//! collection of productions (pattern-guarded actions) can be satisfied by
//! a changing collection of facts, in time proportional to the *change* in
//! the match set rather than to the size of working memory.
//!
//! ## Architecture
//!
//! ```text
//! add_fact / remove_fact
//!         │
//!         ▼
//!   Working memory ──▶ WMEs ──▶ Alpha network ──▶ Beta network ──▶ Conflict set
//!   (fact store)               (constant tests)  (joins, negation,     │
//!                                                 NCC, tests, binds)   ▼
//!                                                                    fire()
//! ```
//!
//! - **Alpha network**: discrimination over single WMEs by constant
//!   constraints, including path expressions into nested values.
//! - **Beta network**: a left-deep join tree; each node owns a beta memory
//!   of partial matches (tokens). Negation is handled by witness-tracking
//!   negative nodes, negated conjunctions by NCC subnetworks.
//! - **Conflict set**: the currently valid complete matches, updated as
//!   tokens reach production terminals and as retractions trace back
//!   through the token indices.
//!
//! ## Quick start
//!
//! ```rust
//! use trellis_core::{Action, Condition, Fact, Production, Term, TrellisEngine, Value};
//!
//! let mut engine = TrellisEngine::new();
//!
//! // Two people with the same last name.
//! let condition = Condition::and([
//!     Condition::fact(Fact::new().with("first", "Chris").with("last", Term::var("L"))),
//!     Condition::fact(Fact::new().with("first", "John").with("last", Term::var("L"))),
//! ]);
//! let production = Production::new(
//!     "same-last-name",
//!     condition,
//!     Action::new(["L"], |_engine, bindings| {
//!         Ok(bindings.get("L").cloned().unwrap_or(Value::Null))
//!     }),
//! );
//! engine.add_production(production)?;
//!
//! engine.add_fact(Fact::new().with("first", "Chris").with("last", "X"))?;
//! engine.add_fact(Fact::new().with("first", "John").with("last", "X"))?;
//!
//! let matches = engine.matches();
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].bindings.get("L"), Some(&Value::from("X")));
//! # Ok::<(), trellis_core::TrellisError>(())
//! ```

/// Alpha network: constant-test discrimination and alpha memories
mod alpha_memory;
/// Beta network: tokens, joins, negation, NCC, tests, binds
mod beta_network;
/// Condition normalization: DNF, scope validation, triple lowering
mod condition;
/// Conflict set of currently valid complete matches
pub mod conflict_set;
/// Engine facade and configuration
pub mod engine;
/// Structured error handling for engine operations
pub mod error;
/// Working memory: fact storage and WME decomposition
pub mod fact_store;
/// Network construction, sharing, and propagation orchestration
mod rete_network;
/// Facts, terms, the condition algebra, productions, bindings
pub mod types;

pub use conflict_set::{ConflictSet, Match};
pub use engine::{EngineOptions, TrellisEngine};
pub use error::{TrellisError, TrellisResult};
pub use fact_store::{FactStore, Wme, WmeId};
pub use types::{
    Action, AttrKey, BindFn, Bindings, Condition, EngineStats, Fact, FactPattern, Production,
    ProductionId, Term, TestFn, Variable,
};
pub use trellis_types::{FactId, Value};
