//! Reads replica group status and the persisted configuration.

use crate::document::{GroupConfig, StatusSnapshot};
use crate::error::{Error, Result};

use proven_datastore::{Command, DataStoreClient, Document};
use tracing::debug;

const GET_STATUS: &str = "replSetGetStatus";
const LOCAL_DATABASE: &str = "local";
const CONFIG_COLLECTION: &str = "system.replset";

/// Outcome of looking up the replica group name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GroupLookup {
    /// A configuration exists and carries this group id.
    Found(String),

    /// No configuration has been persisted on the node.
    Absent,

    /// The configuration could not be read; carries the reason.
    Unavailable(String),
}

impl GroupLookup {
    /// The group id, if one was found.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Found(name) => Some(name),
            Self::Absent | Self::Unavailable(_) => None,
        }
    }

    /// Whether a group id was found.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Reads status and configuration through a borrowed client handle.
pub struct StatusReader<'a, D> {
    client: &'a D,
}

impl<'a, D> StatusReader<'a, D>
where
    D: DataStoreClient,
{
    /// Creates a reader over `client`.
    #[must_use]
    pub const fn new(client: &'a D) -> Self {
        Self { client }
    }

    /// Issues the status command and parses its first reply document.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected or the reply is malformed.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let reply = self
            .client
            .run_admin_command(Command::new(GET_STATUS, 1))
            .await
            .map_err(|e| Error::command(GET_STATUS, e))?;

        StatusSnapshot::from_document(reply).map_err(|e| Error::MalformedDocument("status", e))
    }

    /// Reads the persisted configuration from the node-local metadata collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] if the node was never initiated or joined.
    pub async fn group_config(&self) -> Result<GroupConfig> {
        let document = self
            .client
            .query_collection(LOCAL_DATABASE, CONFIG_COLLECTION, Document::new(), 1)
            .await
            .map_err(|e| Error::query(CONFIG_COLLECTION, e))?
            .ok_or(Error::MissingConfig)?;

        GroupConfig::from_document(document).map_err(|e| Error::MalformedDocument("config", e))
    }

    /// Looks up the group id. Never fails; a missing group is an expected state.
    pub async fn group_name(&self) -> GroupLookup {
        match self.group_config().await {
            Ok(config) => GroupLookup::Found(config.id),
            Err(Error::MissingConfig) => GroupLookup::Absent,
            Err(e) => {
                debug!("replica group configuration unavailable: {}", e);
                GroupLookup::Unavailable(e.to_string())
            }
        }
    }

    /// Whether this node knows of a replica group at all.
    pub async fn has_group(&self) -> bool {
        self.group_name().await.is_found()
    }

    /// Hosts of every member reported by the status command.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be read.
    pub async fn member_names(&self) -> Result<Vec<String>> {
        Ok(self.status().await?.member_names())
    }

    /// Whether `host_key` is reported by the status command.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be read.
    pub async fn is_member(&self, host_key: &str) -> Result<bool> {
        Ok(self.status().await?.member(host_key).is_some())
    }
}
