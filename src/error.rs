//! Error Types
//!
//! Construction is the only fallible operation on a map.

use thiserror::Error;

/// Rejected map configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Sweep interval must be a positive duration
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// A periodic sweep needs a Tokio runtime to drive its timer
    #[error("periodic sweep requires a running Tokio runtime")]
    NoRuntime,
}
