use std::fmt;
use thiserror::Error;

/// The kind of description-service failure, used for logging and for the
/// recovery trigger (only timeouts and connection failures count toward
/// a service restart).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    Timeout,
    Connection,
    Http,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Per-file processing errors.
///
/// All of these are caught by the orchestrator and converted into a
/// terminal per-file outcome — none abort the batch. The one exception
/// is [`ProcessError::DependencyMissing`], which is raised before any
/// file is touched, and [`ProcessError::ConversionExhausted`] when the
/// `strict_conversion` policy is enabled.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Every conversion strategy failed (or was unavailable) and no
    /// sibling JPEG exists.
    #[error("all conversion strategies failed: {detail}")]
    ConversionExhausted { detail: String },

    /// The description service could not produce a usable description.
    #[error("description unavailable ({kind}): {detail}")]
    DescriptionService {
        kind: ServiceFailure,
        detail: String,
    },

    /// The metadata tool accepted the write but readback did not match,
    /// and retries were exhausted.
    #[error("metadata verification failed after {attempts} attempt(s): {detail}")]
    MetadataVerification { attempts: u32, detail: String },

    /// The target file went missing or zero-length after a write. The
    /// original bytes have been restored from backup by the time this
    /// error is returned.
    #[error("metadata write corrupted the file (original restored): {detail}")]
    MetadataCorruption { detail: String },

    /// Tracking store IO failure. Callers treat this as "untracked" —
    /// it never blocks processing.
    #[error("tracking store error: {0}")]
    TrackingStore(String),

    /// A required external dependency is absent. Fatal at run start.
    #[error("required dependency missing: {0}")]
    DependencyMissing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failure_display() {
        assert_eq!(ServiceFailure::Timeout.to_string(), "timeout");
        assert_eq!(ServiceFailure::Connection.to_string(), "connection");
        assert_eq!(ServiceFailure::Http.to_string(), "http");
    }

    #[test]
    fn process_error_messages_carry_detail() {
        let err = ProcessError::MetadataVerification {
            attempts: 3,
            detail: "DateTimeOriginal changed".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("DateTimeOriginal"));
    }
}
