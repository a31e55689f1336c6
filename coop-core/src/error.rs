//! Error types for the coop core engine.

use thiserror::Error;

/// Top-level error type for all coop operations.
#[derive(Error, Debug)]
pub enum CoopError {
    /// A target user, member, role, or record is absent from the scope
    /// it was looked up in.
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A persisted document node could not be decoded into its entity.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// An entity could not be encoded into a document node.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A channel to a worker or to the gateway closed before the
    /// operation completed.
    #[error("Channel closed: {channel}")]
    ChannelClosed {
        /// Which channel went away.
        channel: &'static str,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, CoopError>;
