//! Error types for the interpreter.
//!
//! `ProgramError` is the top-level error returned by loading, validating,
//! and executing a program. `InterpolationFault` is kept as its own type
//! (rather than folded into `ProgramError` directly) because `goto_map`
//! and `replace_map` need to pattern-match on it and recover via a `NULL`
//! branch instead of unwinding the task stack.

use thiserror::Error;

/// Failure raised while resolving an interpolation key.
///
/// Distinct from `ProgramError` so call sites that can recover (`goto_map`,
/// `replace_map`) see an explicit `Result<_, InterpolationFault>` instead of
/// catching a generic error and guessing whether it was recoverable.
#[derive(Debug, Clone, Error)]
pub enum InterpolationFault {
    #[error("tried to interpolate empty string ''")]
    EmptyKey,

    #[error("argument interpolation key '{key}' is used, but only {available} program argument(s) were passed")]
    MissingArg { key: String, available: usize },

    #[error("could not find variable '{key}' in interpdata. Available interpolation data keys are {available:?}.")]
    MissingKey { key: String, available: Vec<String> },

    #[error("could not find variable '{key}' in interpdata or inserts directory. Available interpolation data keys are {available:?}.")]
    MissingKeyWithDir { key: String, available: Vec<String> },

    #[error("malformed interpolation near \"{0}\"")]
    Malformed(String),

    #[error("trying to interpolate variable '{key}' of non-stringifiable type into a string")]
    WrongType { key: String },
}

/// Top-level error for all interpreter operations.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Static validation failure. Fatal; carries the offending task's
    /// traceback label when one was assignable.
    #[error("{label}: {message}")]
    Structural { label: String, message: String },

    /// Unrecoverable interpolation fault (not caught by `goto_map`/`replace_map`).
    #[error("{label}: {source}")]
    Interpolation {
        label: String,
        #[source]
        source: InterpolationFault,
    },

    /// Arithmetic evaluation failure.
    #[error("{label}: arithmetic error: {message}")]
    Arithmetic { label: String, message: String },

    /// Runtime execution failure (HTTP transport, tool errors, retries exhausted, etc).
    #[error("{label}: {message}")]
    Execution { label: String, message: String },

    /// Cooperative cancellation. Never shown to the user as an error; the
    /// top-level loop treats this as "return control to the menu" or
    /// "terminate", per spec.md §5/§7.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ProgramError {
    pub fn structural(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn execution(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn arithmetic(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Arithmetic {
            label: label.into(),
            message: message.into(),
        }
    }

    /// The traceback label, if this error carries one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Structural { label, .. }
            | Self::Interpolation { label, .. }
            | Self::Arithmetic { label, .. }
            | Self::Execution { label, .. } => Some(label),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProgramError>;
