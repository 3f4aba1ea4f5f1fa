//! Provisioning error taxonomy.
//!
//! Capacity denials (full profile, no matching template, rate limit)
//! are decisions, not errors; they surface as an empty dispatch list.
//! Errors here are what an individual provisioning unit can die of.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Broken template or workload spec. Never retried; scoped to the
    /// one unit that hit it.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Every attempt failed; carries the last orchestrator error.
    #[error("provisioning failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    /// A shutdown drain interrupted a backoff wait.
    #[error("provisioning interrupted by shutdown")]
    Interrupted,
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
