//! Reasoner error types.

use crate::id::RuleId;

/// Errors raised by term construction, term stores and the optimizer.
///
/// Configuration and capacity errors abort the current operation; nothing
/// partially written is left behind in shared arrays.
#[derive(Clone, Debug, PartialEq)]
pub enum ReasonerError {
    /// Unrecognized or out-of-range option value
    Config { key: String, message: String },
    /// Index or size past a fixed limit
    Capacity {
        what: &'static str,
        index: usize,
        limit: usize,
    },
    /// A serialized term record could not be decoded
    CorruptRecord { offset: usize, message: String },
    /// Rule identity not present in the registry
    UnknownRule(RuleId),
    /// File or archive failure
    Io { context: String, message: String },
    /// Term access after `close()`
    StoreClosed,
    /// Variable value outside [0, 1] or not finite
    InvalidValue { index: usize, value: f32 },
    /// Optimization stopped by its cancellation flag
    Cancelled { iteration: usize },
}

impl ReasonerError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        ReasonerError::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ReasonerError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn corrupt(offset: usize, message: impl Into<String>) -> Self {
        ReasonerError::CorruptRecord {
            offset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ReasonerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasonerError::Config { key, message } => {
                write!(f, "invalid configuration for '{}': {}", key, message)
            }
            ReasonerError::Capacity { what, index, limit } => {
                write!(f, "{} {} exceeds capacity {}", what, index, limit)
            }
            ReasonerError::CorruptRecord { offset, message } => {
                write!(f, "corrupt term record at byte {}: {}", offset, message)
            }
            ReasonerError::UnknownRule(id) => write!(f, "unknown rule: {}", id),
            ReasonerError::Io { context, message } => write!(f, "{}: {}", context, message),
            ReasonerError::StoreClosed => write!(f, "term store used after close"),
            ReasonerError::InvalidValue { index, value } => {
                write!(f, "variable {} has invalid value {}", index, value)
            }
            ReasonerError::Cancelled { iteration } => {
                write!(f, "optimization cancelled at iteration {}", iteration)
            }
        }
    }
}

impl std::error::Error for ReasonerError {}

pub type ReasonerResult<T> = Result<T, ReasonerError>;
