//! Error taxonomy for the orchestration core.

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found in store: {0}")]
    SessionMissing(String),
    #[error("struggle event not found in store: {0}")]
    EventMissing(String),
}

/// Failures surfaced by the orchestrator. NotFound variants are
/// caller-correctable preconditions; `Upstream` is fatal for the current
/// response cycle; `SessionNotActive` rejects work against terminal
/// sessions before any write.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("exam not found: {0}")]
    ExamNotFound(String),
    #[error("rubric missing or not parsed: {0}")]
    RubricUnparsed(String),
    #[error("session is not active: {0}")]
    SessionNotActive(String),
    #[error("language model call failed: {0}")]
    Upstream(#[from] LlmError),
    #[error("storage operation failed: {0}")]
    Store(#[from] StoreError),
}
