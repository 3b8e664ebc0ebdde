//! Typed pipeline errors.
//!
//! Most plumbing returns `anyhow::Result`. The variants here are the
//! conditions callers need to tell apart: a run that cannot start, a source
//! whose components cannot be resolved, and verdicts that break the
//! classification contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The inference backend did not answer the startup probe.
    #[error("LLM service unavailable at {api_url}; classification is required (is Ollama running and `{model}` pulled?)")]
    LlmUnavailable { api_url: String, model: String },

    #[error("unknown connector '{name}' (available: {available})")]
    UnknownConnector { name: String, available: String },

    #[error("unknown processor '{name}' (available: {available})")]
    UnknownProcessor { name: String, available: String },

    /// A verdict arrived with an empty or whitespace-only reason.
    #[error("verdict reason must not be empty")]
    EmptyReason,

    #[error("confidence {0} is outside [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
}
