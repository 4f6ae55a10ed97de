use proven_datastore::{DataStoreError, DataStoreErrorKind};
use thiserror::Error;

/// Result type for replica group operations.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while managing replica group membership.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller cancelled the operation while it was waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// An administrative command was rejected.
    #[error("admin command '{command}' failed ({kind}): {source}")]
    Command {
        /// Name of the command.
        command: &'static str,

        /// Classification reported by the data store.
        kind: DataStoreErrorKind,

        /// The data store error.
        #[source]
        source: BoxError,
    },

    /// Options could not be loaded.
    #[error("invalid options: {0}")]
    Config(String),

    /// Not even the local node accepted a connection.
    #[error("failed to connect to the local node: {0}")]
    Connectivity(#[source] BoxError),

    /// Replica group existence could not be determined.
    #[error("replica group could not be found; no members will be removed")]
    AmbiguousGroupState,

    /// A document returned by the data store did not have the expected shape.
    #[error("malformed {0} document: {1}")]
    MalformedDocument(&'static str, #[source] serde_json::Error),

    /// No persisted replica group configuration exists.
    #[error("replica group configuration not found")]
    MissingConfig,

    /// An operation needed a connection before `connect` was called.
    #[error("not connected")]
    NotConnected,

    /// Reading a metadata collection failed.
    #[error("failed to query '{collection}' ({kind}): {source}")]
    Query {
        /// Collection that was queried.
        collection: &'static str,

        /// Classification reported by the data store.
        kind: DataStoreErrorKind,

        /// The data store error.
        #[source]
        source: BoxError,
    },

    /// A forced reconfiguration kept failing until its retry budget ran out.
    #[error("reconfiguration failed after {attempts} attempts: {source}")]
    ReconfigExhausted {
        /// Attempts made.
        attempts: usize,

        /// The last failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn command<E: DataStoreError>(command: &'static str, source: E) -> Self {
        Self::Command {
            command,
            kind: source.kind(),
            source: Box::new(source),
        }
    }

    pub(crate) fn query<E: DataStoreError>(collection: &'static str, source: E) -> Self {
        Self::Query {
            collection,
            kind: source.kind(),
            source: Box::new(source),
        }
    }

    /// The data store classification of the underlying failure, if there is one.
    #[must_use]
    pub fn data_store_kind(&self) -> Option<DataStoreErrorKind> {
        match self {
            Self::Command { kind, .. } | Self::Query { kind, .. } => Some(*kind),
            Self::ReconfigExhausted { source, .. } => source.data_store_kind(),
            _ => None,
        }
    }
}
