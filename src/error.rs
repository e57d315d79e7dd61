//! Typed failures that decide how a run ends.
//!
//! Everything else travels as plain `anyhow` context; these variants are the
//! ones `main` downcasts to pick an exit code and print a report.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The worker engine or a required input is unusable; no stage ran.
    #[error("environment check failed: {message}")]
    Environment { message: String },

    /// A worker exited non-zero or a checkpoint presenter failed.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailed {
        stage: String,
        reason: String,
        diagnostics: String,
    },

    /// The worker exited cleanly but never wrote its completion sentinel.
    #[error("stage '{stage}' exited without writing {sentinel}")]
    MissingSentinel {
        stage: String,
        sentinel: String,
        diagnostics: String,
    },
}

impl PipelineError {
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    /// Captured worker diagnostics, when the failure came from a stage.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Environment { .. } => None,
            Self::StageFailed { diagnostics, .. } | Self::MissingSentinel { diagnostics, .. } => {
                Some(diagnostics)
            }
        }
    }
}
