//! Error Types
//!
//! Kinds follow the taxonomy in the write-consistency protocol's error
//! design: routing, store-write, store-read, subscription, membership, and
//! protocol-violation errors each carry distinct recovery semantics.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Routing errors (AUTHORIZE step)
    #[error("inode {inode} is not owned by this deployment (expected deployment {expected_deployment})")]
    Routing { inode: u64, expected_deployment: u32 },

    // Shared Store errors
    #[error("Shared Store write failed: {0}")]
    StoreWrite(#[from] sqlx::Error),

    #[error("Shared Store read failed: {0}")]
    StoreRead(String),

    // Event Subscriber errors
    #[error("Event subscription error: {0}")]
    Subscription(String),

    #[error("Wire serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Membership Client errors
    #[error("Membership error: {0}")]
    Membership(String),

    #[error("Membership session lost")]
    SessionLost,

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Protocol violation (fatal, indicates a bug or state corruption)
    #[error("Protocol violation: {0}")]
    Protocol(String),

    // I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Cancellation
    #[error("Operation cancelled")]
    Cancelled,

    // Catch-all
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller may retry the operation that produced this error
    /// without violating the protocol's correctness guarantees.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Membership(_)
                | Error::Subscription(_)
                | Error::StoreRead(_)
                | Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
        )
    }

    /// Whether this error must abort the write in progress rather than be
    /// retried transparently by the layer that caught it.
    pub fn should_abort(&self) -> bool {
        matches!(
            self,
            Error::Routing { .. }
                | Error::StoreWrite(_)
                | Error::Protocol(_)
                | Error::SessionLost
                | Error::Cancelled
        )
    }
}
