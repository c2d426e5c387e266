// Typed error kinds crossing internal component seams (§7 of the design doc).
// Only `Fatal` is allowed to escape as a process-ending error; everything
// else is caught at the orchestrator boundary and turned into a soft
// failure or a specific decision outcome.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FraudError {
    #[error("transient io error: {0}")]
    TransientIo(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("rate limited")]
    RateLimited,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("agent output malformed: {0}")]
    AgentMalformed(String),

    #[error("duplicate event")]
    DuplicateEvent,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl FraudError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FraudError::TransientIo(_))
    }
}
