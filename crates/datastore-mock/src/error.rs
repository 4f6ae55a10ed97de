//! Error types for the mock data store.

use proven_datastore::{DataStoreError, DataStoreErrorKind};
use thiserror::Error;

/// Error type for the mock data store.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// None of the addresses accepted a connection.
    #[error("no servers reachable at {0}")]
    Unreachable(String),

    /// Authentication failed or the handle lacks privileges.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The server rejected a command.
    #[error("Database command '{command}' failed: {message}")]
    Command {
        /// Name of the rejected command.
        command: String,

        /// Server-provided message text.
        message: String,

        /// Structured classification, if the server reported one.
        kind: DataStoreErrorKind,
    },
}

impl DataStoreError for Error {
    fn kind(&self) -> DataStoreErrorKind {
        match self {
            Self::Unreachable(_) => DataStoreErrorKind::Connectivity,
            Self::Unauthorized(_) => DataStoreErrorKind::Unauthorized,
            Self::Command { kind, .. } => *kind,
        }
    }
}
