//! Collaborator errors

use thiserror::Error;

/// Errors reported by external collaborators
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Packet engine rejected the options
    #[error("Packet engine apply failed: {0}")]
    EngineApply(String),

    /// System DNS could not be changed
    #[error("DNS change failed: {0}")]
    DnsChange(String),

    /// Name resolution failed
    #[error("Resolution failed for '{host}': {reason}")]
    Resolution {
        /// Host being resolved
        host: String,
        /// Failure reason
        reason: String,
    },

    /// Name resolution did not finish in time
    #[error("Resolution timed out for '{host}'")]
    ResolutionTimeout {
        /// Host being resolved
        host: String,
    },

    /// Live-testing pipeline no longer accepts work
    #[error("Re-test pipeline closed")]
    SinkClosed,

    /// Outcome probe could not run
    #[error("Probe failed: {0}")]
    Probe(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;
