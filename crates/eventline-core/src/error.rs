//! Event sourcing error types.

use thiserror::Error;

use crate::dialect::BackendDialect;

/// Top-level error type shared by the mapper, the lazy facades and the
/// storage backends.
#[derive(Debug, Error)]
pub enum EventSourcingError {
    /// The configured connection names a dialect with no adapter.
    #[error("unsupported event store backend: {0}")]
    UnsupportedBackend(String),

    /// Raw stored data is missing a field required to build a message.
    #[error("malformed envelope for message {message_name}: missing or invalid field `{field}`")]
    MalformedEnvelope {
        /// The wire name of the message being built.
        message_name: String,
        /// The offending field.
        field: &'static str,
    },

    /// Two components disagree about which backend dialect is active.
    #[error("dialect mismatch: expected {expected}, found {found}")]
    DialectMismatch {
        /// The dialect already resolved for the event store.
        expected: BackendDialect,
        /// The dialect the other component reported.
        found: BackendDialect,
    },

    /// No connection factory is registered under the given reference name.
    #[error("no connection factory registered under reference `{0}`")]
    UnknownReference(String),

    /// The stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A stream with this name already exists.
    #[error("stream already exists: {0}")]
    StreamExists(String),

    /// A uniqueness constraint of the persistence strategy was violated.
    #[error("concurrency conflict on stream {stream}: {detail}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream: String,
        /// Backend diagnostic.
        detail: String,
    },

    /// The persistence strategy requires aggregate metadata the event lacks.
    #[error("message {message_name} is missing required metadata `{key}`")]
    MissingAggregateMetadata {
        /// The wire name of the message.
        message_name: String,
        /// The missing metadata key.
        key: &'static str,
    },

    /// The projection does not exist.
    #[error("projection not found: {0}")]
    ProjectionNotFound(String),

    /// An argument was rejected before reaching the backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be read.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other error raised by the underlying storage backend.
    #[error("backend operation failed: {0}")]
    BackendOperationFailed(String),
}

/// Convenience result alias.
pub type Result<T, E = EventSourcingError> = std::result::Result<T, E>;
