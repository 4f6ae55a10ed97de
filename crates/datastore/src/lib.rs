//! Abstract interface for the wire client of a replicated data store.
//!
//! Connection pooling, the authentication handshake and command dispatch all
//! live behind these traits. Consumers only ever see a [`Connector`] that hands
//! out [`DataStoreClient`] handles.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document as exchanged with the data store.
pub type Document = Map<String, Value>;

/// How a connection discovers the servers behind the given addresses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMode {
    /// Talk to exactly the given address, even if it belongs to a replica group.
    #[default]
    Direct,

    /// Treat the addresses as a seed list and discover the whole replica group.
    GroupAware,
}

/// Which members reads may be routed to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    /// Only the primary.
    #[default]
    Primary,

    /// The primary if one is elected, any secondary otherwise.
    PrimaryPreferred,

    /// Only secondaries.
    Secondary,

    /// A secondary if one is available, the primary otherwise.
    SecondaryPreferred,

    /// Whichever member has the lowest latency.
    Nearest,
}

/// Options recognised by [`Connector::connect`].
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Database to authenticate against and run commands on.
    pub database: Option<String>,

    /// User to authenticate as. `None` connects without credentials.
    pub user: Option<String>,

    /// Password for `user`.
    pub password: Option<String>,

    /// How long to wait for the server selection to succeed.
    pub connect_timeout: Option<Duration>,

    /// Direct or replica-group aware connection.
    pub connect_mode: ConnectMode,

    /// Read routing.
    pub read_preference: ReadPreference,

    /// Name of the replica group the seeds must belong to.
    pub group_id: Option<String>,
}

impl Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_mode", &self.connect_mode)
            .field("read_preference", &self.read_preference)
            .field("group_id", &self.group_id)
            .finish()
    }
}

/// An administrative command: a name, its primary argument and any extra
/// top-level fields (e.g. `force` for a reconfiguration).
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    name: String,
    argument: Value,
    options: Document,
}

impl Command {
    /// Creates a command with no extra fields.
    pub fn new(name: impl Into<String>, argument: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            argument: argument.into(),
            options: Document::new(),
        }
    }

    /// Adds an extra top-level field to the command.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The command name, e.g. `replSetGetStatus`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value bound to the command name.
    #[must_use]
    pub const fn argument(&self) -> &Value {
        &self.argument
    }

    /// Extra top-level fields.
    #[must_use]
    pub const fn options(&self) -> &Document {
        &self.options
    }

    /// Looks up a single extra field.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

/// The kind of data store error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataStoreErrorKind {
    /// No server could be reached.
    Connectivity,

    /// The connection is not authorized to perform the operation.
    Unauthorized,

    /// The replica group has already been initiated.
    AlreadyInitialized,

    /// The node has not received a replica group configuration yet.
    NotYetInitialized,

    /// The server rejected the command.
    CommandFailed,

    /// Other/unknown error
    Other,
}

impl Display for DataStoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for data store errors
pub trait DataStoreError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> DataStoreErrorKind;
}

/// A live handle to one or more data store servers.
///
/// Dropping or disconnecting the handle invalidates it.
#[async_trait]
pub trait DataStoreClient
where
    Self: Send + Sync + 'static,
{
    /// The error type for this client.
    type Error: DataStoreError;

    /// Runs an administrative command against the `admin` database and returns
    /// the first reply document.
    async fn run_admin_command(&self, command: Command) -> Result<Document, Self::Error>;

    /// Returns the first document of `database.collection` matching `filter`.
    async fn query_collection(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        limit: usize,
    ) -> Result<Option<Document>, Self::Error>;

    /// Lists the collection names of a database. Requires read privileges on
    /// the database, so it doubles as a privilege probe.
    async fn list_collections(&self, database: &str) -> Result<Vec<String>, Self::Error>;

    /// Whether the handle was opened in replica-group aware mode.
    fn is_group_aware(&self) -> bool;

    /// Whether the handle completed an authentication handshake.
    async fn is_authenticated(&self) -> bool;

    /// Closes every connection held by the handle.
    async fn disconnect(self);
}

/// Opens [`DataStoreClient`] handles.
#[async_trait]
pub trait Connector
where
    Self: Send + Sync + 'static,
{
    /// The error type for this connector.
    type Error: DataStoreError;

    /// The client handle type.
    type Client: DataStoreClient<Error = Self::Error>;

    /// Connects to the given `host:port` addresses.
    async fn connect(
        &self,
        hosts: &[String],
        options: ConnectOptions,
    ) -> Result<Self::Client, Self::Error>;
}
