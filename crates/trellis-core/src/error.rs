//! Error handling for the Trellis engine
//!
//! This module provides structured error types for all engine operations.
//! Compile and use errors are guaranteed to leave the network unchanged;
//! action and strict-mode test errors retain all propagation performed
//! before the failure.

use crate::types::ProductionId;
use thiserror::Error;
use trellis_types::FactId;

/// Error type for Trellis engine operations
#[derive(Error, Debug, Clone)]
pub enum TrellisError {
    /// Production compilation and validation errors
    #[error("Compile error: {message}")]
    Compile {
        message: String,
        production: Option<String>,
        variable: Option<String>,
    },

    /// Working-memory operation errors
    #[error("Fact store error: {message}")]
    FactStore { message: String, fact_id: Option<FactId> },

    /// Production registry errors
    #[error("Production error: {message}")]
    Production {
        message: String,
        production_id: Option<ProductionId>,
    },

    /// A conflict-set entry that is no longer valid was fired
    #[error("Stale match: {message}")]
    StaleMatch {
        message: String,
        production_id: ProductionId,
    },

    /// A test function failed while the engine runs in strict mode
    #[error("Test error: {message}")]
    Test { message: String },

    /// An action raised; all pre-error mutations are retained
    #[error("Action error: {message}")]
    Action {
        message: String,
        production: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        component: Option<String>,
    },
}

impl TrellisError {
    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            TrellisError::Compile { .. } => "compile",
            TrellisError::FactStore { .. } => "fact_store",
            TrellisError::Production { .. } => "production",
            TrellisError::StaleMatch { .. } => "stale_match",
            TrellisError::Test { .. } => "test",
            TrellisError::Action { .. } => "action",
            TrellisError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for engine operations
pub type TrellisResult<T> = Result<T, TrellisError>;

/// Convenience constructors for common error scenarios
impl TrellisError {
    /// Create a condition compilation error
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
            production: None,
            variable: None,
        }
    }

    /// Create a compilation error tied to a specific variable
    pub fn compile_variable(variable: &str, message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
            production: None,
            variable: Some(variable.to_string()),
        }
    }

    /// Create a fact-store error
    pub fn fact_store(message: impl Into<String>) -> Self {
        Self::FactStore { message: message.into(), fact_id: None }
    }

    /// Create an unknown-fact error
    pub fn unknown_fact(fact_id: FactId) -> Self {
        Self::FactStore {
            message: format!("no fact with id {fact_id} in working memory"),
            fact_id: Some(fact_id),
        }
    }

    /// Create an unknown-production error
    pub fn unknown_production(production_id: ProductionId) -> Self {
        Self::Production {
            message: format!("no production with id {production_id}"),
            production_id: Some(production_id),
        }
    }

    /// Create a stale-match error
    pub fn stale_match(production_id: ProductionId) -> Self {
        Self::StaleMatch {
            message: "match is no longer in the conflict set".to_string(),
            production_id,
        }
    }

    /// Create a strict-mode test error
    pub fn test(message: impl Into<String>) -> Self {
        Self::Test { message: message.into() }
    }

    /// Create an action error
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action { message: message.into(), production: None }
    }

    /// Create an internal error scoped to a component
    pub fn internal(component: &str, message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            component: Some(component.to_string()),
        }
    }
}
