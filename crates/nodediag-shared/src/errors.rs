//! # Error Types
//!
//! Umbrella error for agent-level fallibility. Module-specific errors
//! (`StoreError`, `RuntimeError`) live next to their modules and convert
//! into `AgentError` via `#[from]`; the executor crate layers its own
//! `DispatchError` on top.

use crate::runtime::RuntimeError;
use crate::store::StoreError;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl AgentError {
    /// Whether a retry inside the sync envelope could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Store(e) => e.is_conflict() || e.is_unavailable(),
            AgentError::Runtime(_) => true,
            AgentError::Config(_) => false,
            AgentError::Internal(_) => false,
        }
    }
}
