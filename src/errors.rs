//! LiveDoc Client Error Hierarchy
//!
//! Defines the error types surfaced by document streams and by the service
//! setup path, categorized by the layer that produced them.
//!
//! Every error is `Clone`: a multicast boundary hands the same failure to all
//! of its subscribers.

use std::sync::Arc;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The server list could not be fetched or parsed
    #[error("Failed to load LiveDoc configuration: {0}")]
    ConfigLoad(String),

    /// Settings could not be assembled from defaults, files and environment
    #[error(transparent)]
    Settings(Arc<ConfigError>),

    /// Settings were assembled but cannot be used
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// No configured server is responsible for the document
    #[error("Cannot find LiveDoc server for document {document}")]
    ServerNotFound { document: String },

    /// Handshake or socket failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The accumulated document can no longer be trusted
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Consecutive failures exceeded the forgiveness limit
    #[error("Gave up after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    /// A cache key is not a simple value
    #[error("Cannot build hash for {0}")]
    UnhashableKey(String),
}

impl Error {
    /// Whether a stream failing with this error may be resubscribed.
    ///
    /// Configuration and routing failures are handed to the caller, who has
    /// to request the document again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Patch(_))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Settings(Arc::new(e))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The server refused or aborted the STOMP handshake
    #[error("Handshake with {uri} failed: {message}")]
    HandshakeFailed { uri: String, message: String },

    /// An established connection went away
    #[error("Connection to {uri} lost: {message}")]
    ConnectionLost { uri: String, message: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PatchError {
    /// Frame body is not a JSON Patch document
    #[error("Frame for {document} is not a JSON patch: {message}")]
    InvalidBody { document: String, message: String },

    /// Patch does not apply to the accumulated document
    #[error("Patch for {document} could not be applied: {message}")]
    ApplyFailed { document: String, message: String },
}

impl Error {
    /// The error that ended the last retry attempt, or the error itself
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
