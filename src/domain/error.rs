// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure in this crate is either fatal or silently
// downgraded to a safe default (device / transport fallback,
// see infra::device). The fatal ones are listed here.
//
// Downgrades are NOT errors. They are returned as
// FallbackWarning values and logged by the caller.
//
// The application layer wraps these in anyhow::Error with
// extra context, the same way the rest of the CLI reports
// failures.
//
// Reference: thiserror crate documentation
//            Rust Book §9 (Recoverable Errors with Result)

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Missing rank environment value, invalid flag value, etc.
    /// Raised before any training work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Snapshot file present but unreadable or schema-mismatched.
    #[error("cannot deserialize snapshot '{}': {reason}", path.display())]
    Deserialization { path: PathBuf, reason: String },

    /// A batch whose tensor shape the model cannot consume.
    #[error("batch shape {actual:?} is incompatible with model input {expected:?}")]
    BatchShape {
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },

    /// The collective-communication transport failed mid-operation.
    #[error("collective transport failure: {0}")]
    Transport(String),

    /// IDX files missing or malformed.
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn deserialization(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Deserialization { path: path.into(), reason: reason.to_string() }
    }
}

pub type TrainResult<T> = std::result::Result<T, TrainError>;

/// A non-fatal downgrade chosen during process-group setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackWarning {
    /// The accelerator transport was requested but no device exists.
    NoAcceleratorAvailable,
    /// LOCAL_RANK pointed past the last device; bound to device 0 instead.
    LocalRankOutOfRange { local_rank: usize, device_count: usize },
}

impl std::fmt::Display for FallbackWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAcceleratorAvailable => {
                write!(f, "No GPU available, falling back to CPU (gloo)")
            }
            Self::LocalRankOutOfRange { local_rank, device_count } => write!(
                f,
                "Invalid device ordinal {local_rank} ({device_count} device(s) visible). Defaulting to device 0."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_message_names_path() {
        let err = TrainError::deserialization("/tmp/snap.bin", "unexpected end of file");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/snap.bin"));
        assert!(msg.contains("unexpected end of file"));
    }

    #[test]
    fn test_fallback_warning_display() {
        let w = FallbackWarning::LocalRankOutOfRange { local_rank: 3, device_count: 2 };
        assert!(w.to_string().contains("Invalid device ordinal 3"));
    }
}
