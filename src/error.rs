//! Soft error taxonomy for trade execution
//!
//! None of these stop the worker. They are logged and returned so the
//! caller can skip the asset for this cycle.

use thiserror::Error;

use crate::core::guardian::Violation;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("lock unavailable: {key}")]
    LockUnavailable { key: String },

    #[error("invariant violated: {0}")]
    InvariantViolated(#[from] Violation),

    #[error("broker rejected order: {0}")]
    BrokerRejected(String),

    #[error("broker unreachable: {0}")]
    BrokerUnreachable(String),

    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ExecutionError {
    /// Short machine-readable label for logs and status files
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::LockUnavailable { .. } => "lock_unavailable",
            ExecutionError::InvariantViolated(_) => "invariant_violated",
            ExecutionError::BrokerRejected(_) => "broker_rejected",
            ExecutionError::BrokerUnreachable(_) => "broker_unreachable",
            ExecutionError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Coordination conflicts resolve themselves next cycle
    pub fn is_contention(&self) -> bool {
        matches!(self, ExecutionError::LockUnavailable { .. })
    }
}
