use crate::gateway::GatewayError;
use thiserror::Error;

/// Run-level failure. Per-record problems never surface here, they are
/// recorded as drops instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A request the service will never accept; the run stops and can be resumed.
    #[error("fatal request error: {0}")]
    Fatal(#[from] GatewayError),

    #[error("insufficient sample: {rows} rows emitted, at least {required} required")]
    InsufficientSample { rows: usize, required: usize },

    #[error("checkpoint error: {0:#}")]
    Checkpoint(anyhow::Error),

    #[error("output error: {0:#}")]
    Output(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn is_insufficient_sample(&self) -> bool {
        matches!(self, PipelineError::InsufficientSample { .. })
    }
}
