//! # Error Module
//!
//! Fatal errors and non-fatal configuration warnings raised by the engine.
//! Correlation problems (late, duplicate or stray responses) are not errors;
//! see [`crate::correlate::ResponseOutcome`].

use std::fmt;

use thiserror::Error;

/// Errors that stop an operation before or during a session.
#[derive(Debug, Error)]
pub enum HearingError {
    /// A frequency, intensity, duration or grid setting is out of bounds.
    /// Raised before any audio plays.
    #[error("invalid parameter `{parameter}`: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    /// The output device is missing, unsuitable or failed mid-stream.
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// A configuration or result document could not be parsed.
    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),
}

impl HearingError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for HearingError {
    fn from(err: anyhow::Error) -> Self {
        Self::AudioDevice(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, HearingError>;

/// A recoverable configuration problem. The engine corrects the value,
/// logs the warning and carries on.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// The fade was longer than half the tone and has been shortened.
    FadeClamped { requested_s: f64, applied_s: f64 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::FadeClamped {
                requested_s,
                applied_s,
            } => write!(
                f,
                "fade duration {requested_s:.4}s exceeds half the tone, clamped to {applied_s:.4}s"
            ),
        }
    }
}
