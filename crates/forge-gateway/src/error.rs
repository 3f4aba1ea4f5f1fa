//! Gateway error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The workload spec cannot be materialized into a request.
    #[error("invalid workload spec: {0}")]
    InvalidSpec(String),
    /// The orchestrator endpoint could not be reached.
    #[error("orchestrator unreachable: {0}")]
    Unreachable(String),
    /// The orchestrator refused the request.
    #[error("orchestrator rejected request: {0}")]
    Rejected(String),
    /// The referenced workload does not exist.
    #[error("workload not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Whether a retry with the same request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Rejected(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
