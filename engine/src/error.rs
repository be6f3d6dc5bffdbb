//! Errors the orchestrator must tell apart.
//!
//! Everything below the orchestrator uses `anyhow`; only the classes that
//! change control flow get a variant here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Repository or stories could not be resolved; nothing was persisted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The shared sandbox for a run could not be provisioned.
    #[error("sandbox provisioning failed: {0:#}")]
    SandboxProvisioning(anyhow::Error),

    /// A catalog lookup or pull request bookkeeping call failed.
    #[error("catalog error: {0:#}")]
    Catalog(anyhow::Error),

    /// A run store call failed.
    #[error("run store error: {0:#}")]
    Store(anyhow::Error),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
