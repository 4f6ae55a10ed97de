//! In-memory simulation of a replica group for exercising membership management
//! without a running data store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proven_datastore::{
    Command, ConnectMode, ConnectOptions, Connector, DataStoreClient, DataStoreErrorKind, Document,
};
use serde_json::{Value, json};
use tracing::debug;

const LOCAL_DATABASE: &str = "local";
const CONFIG_COLLECTION: &str = "system.replset";

const PRIMARY: i64 = 1;
const SECONDARY: i64 = 2;

/// A connection attempt observed by the mock.
#[derive(Clone, Debug)]
pub struct ConnectRecord {
    /// Addresses passed to the connector.
    pub hosts: Vec<String>,

    /// Options passed to the connector.
    pub options: ConnectOptions,

    /// Whether the connector handed out a client.
    pub succeeded: bool,
}

#[derive(Clone, Debug)]
struct MemberHealth {
    host: String,
    state: i64,
    health: i64,
}

#[derive(Debug, Default)]
struct ClusterState {
    admin_credentials: Option<(String, String)>,
    commands: Vec<Command>,
    config: Option<Document>,
    connections: Vec<ConnectRecord>,
    disconnects: usize,
    join_state: Option<i64>,
    members: Vec<MemberHealth>,
    message_only_errors: bool,
    pending_reconfig_failures: usize,
    pending_status_failures: usize,
    reachable_seeds: HashSet<String>,
    state_scripts: HashMap<String, VecDeque<i64>>,
}

impl ClusterState {
    fn command_error(&self, command: &str, message: &str, kind: DataStoreErrorKind) -> Error {
        let kind = if self.message_only_errors {
            DataStoreErrorKind::CommandFailed
        } else {
            kind
        };

        Error::Command {
            command: command.to_string(),
            message: message.to_string(),
            kind,
        }
    }

    fn group_id(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|config| config.get("_id"))
            .and_then(Value::as_str)
    }

    fn check_credentials(&self, options: &ConnectOptions) -> Result<(), Error> {
        match (&options.user, &options.password) {
            (Some(user), password) => match &self.admin_credentials {
                Some((admin_user, admin_password))
                    if admin_user == user && Some(admin_password) == password.as_ref() =>
                {
                    Ok(())
                }
                _ => Err(Error::Unauthorized(format!("authentication failed for {user}"))),
            },
            (None, _) if self.admin_credentials.is_some() => Err(Error::Unauthorized(
                "command requires authentication".to_string(),
            )),
            // Localhost exception: no users exist yet.
            (None, _) => Ok(()),
        }
    }

    fn group_connect(&self, hosts: &[String], options: &ConnectOptions) -> Result<(), Error> {
        let Some(group_id) = self.group_id() else {
            return Err(Error::Unreachable(hosts.join(",")));
        };

        if !hosts.iter().any(|host| self.reachable_seeds.contains(host)) {
            return Err(Error::Unreachable(hosts.join(",")));
        }

        if let Some(expected) = &options.group_id {
            if expected != group_id {
                return Err(Error::Unreachable(format!(
                    "replica set {expected} not found at {}",
                    hosts.join(",")
                )));
            }
        }

        self.check_credentials(options)
    }

    fn set_member(&mut self, host: &str, state: i64, health: i64) {
        if let Some(member) = self.members.iter_mut().find(|m| m.host == host) {
            member.state = state;
            member.health = health;
        } else {
            self.members.push(MemberHealth {
                host: host.to_string(),
                state,
                health,
            });
        }
    }

    fn install_config(&mut self, config: Document) {
        self.members.clear();

        let hosts = member_hosts(&config);
        for (index, host) in hosts.iter().enumerate() {
            let state = if index == 0 { PRIMARY } else { SECONDARY };
            self.set_member(host, state, 1);
        }

        self.config = Some(config);
    }

    fn initiate(&mut self, command: &Command) -> Result<Document, Error> {
        if self.config.is_some() {
            return Err(self.command_error(
                command.name(),
                "already initialized",
                DataStoreErrorKind::AlreadyInitialized,
            ));
        }

        let Some(mut config) = command.argument().as_object().cloned() else {
            return Err(self.command_error(
                command.name(),
                "configuration must be a document",
                DataStoreErrorKind::CommandFailed,
            ));
        };

        config.entry("version").or_insert(json!(1));
        self.install_config(config);

        Ok(ok_reply())
    }

    fn reconfig(&mut self, command: &Command) -> Result<Document, Error> {
        if self.pending_reconfig_failures > 0 {
            self.pending_reconfig_failures -= 1;

            return Err(self.command_error(
                command.name(),
                "Quorum check failed because not enough voting nodes responded",
                DataStoreErrorKind::CommandFailed,
            ));
        }

        let Some(current) = &self.config else {
            return Err(self.command_error(
                command.name(),
                "no replset config has been received",
                DataStoreErrorKind::NotYetInitialized,
            ));
        };

        let Some(config) = command.argument().as_object().cloned() else {
            return Err(self.command_error(
                command.name(),
                "configuration must be a document",
                DataStoreErrorKind::CommandFailed,
            ));
        };

        if config.get("_id") != current.get("_id") {
            return Err(self.command_error(
                command.name(),
                "New and old configurations differ in replica set name",
                DataStoreErrorKind::CommandFailed,
            ));
        }

        let current_version = current.get("version").and_then(Value::as_i64).unwrap_or(0);
        let new_version = config.get("version").and_then(Value::as_i64).unwrap_or(0);
        if new_version <= current_version {
            return Err(self.command_error(
                command.name(),
                &format!(
                    "version field value of {new_version} is not greater than the current version {current_version}"
                ),
                DataStoreErrorKind::CommandFailed,
            ));
        }

        let ids: Vec<i64> = config
            .get("members")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|member| member.get("_id").and_then(Value::as_i64))
            .collect();
        let unique: HashSet<i64> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            return Err(self.command_error(
                command.name(),
                "member _id values must be unique",
                DataStoreErrorKind::CommandFailed,
            ));
        }

        let hosts = member_hosts(&config);
        self.members.retain(|member| hosts.contains(&member.host));

        let join_state = self.join_state.unwrap_or(SECONDARY);
        for host in &hosts {
            if !self.members.iter().any(|member| &member.host == host) {
                self.set_member(host, join_state, 1);
            }
        }

        self.config = Some(config);

        Ok(ok_reply())
    }

    fn status(&mut self, command: &Command) -> Result<Document, Error> {
        if self.pending_status_failures > 0 {
            self.pending_status_failures -= 1;

            return Err(self.command_error(
                command.name(),
                "node is recovering",
                DataStoreErrorKind::CommandFailed,
            ));
        }

        let Some(group_id) = self.group_id().map(ToString::to_string) else {
            return Err(self.command_error(
                command.name(),
                "no replset config has been received",
                DataStoreErrorKind::NotYetInitialized,
            ));
        };

        let scripted: Vec<(String, i64)> = self
            .state_scripts
            .iter_mut()
            .filter_map(|(host, script)| {
                let state = if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                };
                state.map(|state| (host.clone(), state))
            })
            .collect();

        for (host, state) in scripted {
            if let Some(member) = self.members.iter_mut().find(|m| m.host == host) {
                member.state = state;
            }
        }

        let members: Vec<Value> = self
            .members
            .iter()
            .map(|member| {
                json!({
                    "name": member.host,
                    "state": member.state,
                    "health": member.health,
                })
            })
            .collect();

        let mut reply = ok_reply();
        reply.insert("set".to_string(), json!(group_id));
        reply.insert("members".to_string(), Value::Array(members));

        Ok(reply)
    }

    fn create_user(&mut self, command: &Command) -> Result<Document, Error> {
        let user = command.argument().as_str();
        let password = command.option("pwd").and_then(Value::as_str);

        match (user, password) {
            (Some(user), Some(password)) => {
                self.admin_credentials = Some((user.to_string(), password.to_string()));
                Ok(ok_reply())
            }
            _ => Err(self.command_error(
                command.name(),
                "createUser requires a user name and pwd",
                DataStoreErrorKind::CommandFailed,
            )),
        }
    }
}

fn member_hosts(config: &Document) -> Vec<String> {
    config
        .get("members")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|member| member.get("host").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect()
}

fn ok_reply() -> Document {
    let mut reply = Document::new();
    reply.insert("ok".to_string(), json!(1));
    reply
}

/// Shared, inspectable state of a simulated replica group.
///
/// Every connector and client created from the same `MockCluster` observes and
/// mutates the same state.
#[derive(Clone, Debug, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Creates an uninitiated node with no users and no reachable seeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a connector bound to this cluster.
    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    /// Installs a persisted configuration document as if the group had been
    /// initiated earlier. The first member reports PRIMARY, the rest SECONDARY.
    ///
    /// # Panics
    ///
    /// Panics if `config` is not a JSON object.
    pub fn install_config(&self, config: Value) {
        let Value::Object(config) = config else {
            panic!("replica group configuration must be a JSON object");
        };

        self.state.lock().install_config(config);
    }

    /// Creates the admin user. Unauthenticated handles lose access once a user exists.
    pub fn set_admin_user(&self, user: impl Into<String>, password: impl Into<String>) {
        self.state.lock().admin_credentials = Some((user.into(), password.into()));
    }

    /// Makes group-aware connections through the given seeds succeed.
    pub fn make_reachable<I, S>(&self, seeds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .reachable_seeds
            .extend(seeds.into_iter().map(Into::into));
    }

    /// Makes every seed unreachable again.
    pub fn partition(&self) {
        self.state.lock().reachable_seeds.clear();
    }

    /// Sets the reported state code and health flag of a member.
    pub fn set_member_state(&self, host: &str, state: i64, health: i64) {
        self.state.lock().set_member(host, state, health);
    }

    /// Scripts the state codes reported for `host` by successive status reads.
    /// The last code sticks once the script runs out.
    pub fn script_states(&self, host: &str, states: impl IntoIterator<Item = i64>) {
        self.state
            .lock()
            .state_scripts
            .insert(host.to_string(), states.into_iter().collect());
    }

    /// State code given to members added by a reconfiguration (SECONDARY by default).
    pub fn set_join_state(&self, state: i64) {
        self.state.lock().join_state = Some(state);
    }

    /// Rejects the next `count` reconfigurations.
    pub fn fail_next_reconfigs(&self, count: usize) {
        self.state.lock().pending_reconfig_failures = count;
    }

    /// Fails the next `count` status reads.
    pub fn fail_next_status_reads(&self, count: usize) {
        self.state.lock().pending_status_failures = count;
    }

    /// Reports every command failure as a generic failure carrying only message
    /// text, like servers that predate structured error codes.
    pub fn use_message_only_errors(&self) {
        self.state.lock().message_only_errors = true;
    }

    /// Every command received, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    /// Every command received with the given name, in order.
    #[must_use]
    pub fn commands_named(&self, name: &str) -> Vec<Command> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|command| command.name() == name)
            .cloned()
            .collect()
    }

    /// Every connection attempt, in order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectRecord> {
        self.state.lock().connections.clone()
    }

    /// Number of client handles disconnected so far.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// The persisted configuration document, if the group was initiated.
    #[must_use]
    pub fn config(&self) -> Option<Document> {
        self.state.lock().config.clone()
    }

    /// The `(state, health)` currently reported for `host`.
    #[must_use]
    pub fn member_state(&self, host: &str) -> Option<(i64, i64)> {
        self.state
            .lock()
            .members
            .iter()
            .find(|member| member.host == host)
            .map(|member| (member.state, member.health))
    }

    /// Name of the admin user, if one was created.
    #[must_use]
    pub fn admin_user(&self) -> Option<String> {
        self.state
            .lock()
            .admin_credentials
            .as_ref()
            .map(|(user, _)| user.clone())
    }
}

/// Connector handing out clients of a [`MockCluster`].
#[derive(Clone, Debug)]
pub struct MockConnector {
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl Connector for MockConnector {
    type Error = Error;
    type Client = MockClient;

    async fn connect(
        &self,
        hosts: &[String],
        options: ConnectOptions,
    ) -> Result<Self::Client, Self::Error> {
        let result = {
            let mut state = self.state.lock();
            let result = match options.connect_mode {
                ConnectMode::GroupAware => state.group_connect(hosts, &options),
                // Direct handles connect lazily; credentials are checked on first use.
                ConnectMode::Direct => Ok(()),
            };

            state.connections.push(ConnectRecord {
                hosts: hosts.to_vec(),
                options: options.clone(),
                succeeded: result.is_ok(),
            });

            result
        };

        debug!(?hosts, ok = result.is_ok(), "mock connect");

        result.map(|()| MockClient {
            options,
            state: self.state.clone(),
        })
    }
}

/// Client handle of a [`MockCluster`].
#[derive(Debug)]
pub struct MockClient {
    options: ConnectOptions,
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl DataStoreClient for MockClient {
    type Error = Error;

    async fn run_admin_command(&self, command: Command) -> Result<Document, Self::Error> {
        let mut state = self.state.lock();
        state.commands.push(command.clone());
        state.check_credentials(&self.options)?;

        match command.name() {
            "replSetInitiate" => state.initiate(&command),
            "replSetReconfig" => state.reconfig(&command),
            "replSetGetStatus" => state.status(&command),
            "createUser" => state.create_user(&command),
            other => Err(state.command_error(
                other,
                "no such command",
                DataStoreErrorKind::CommandFailed,
            )),
        }
    }

    async fn query_collection(
        &self,
        database: &str,
        collection: &str,
        _filter: Document,
        _limit: usize,
    ) -> Result<Option<Document>, Self::Error> {
        let state = self.state.lock();
        state.check_credentials(&self.options)?;

        if database == LOCAL_DATABASE && collection == CONFIG_COLLECTION {
            Ok(state.config.clone())
        } else {
            Ok(None)
        }
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, Self::Error> {
        let state = self.state.lock();
        state.check_credentials(&self.options)?;

        if database == LOCAL_DATABASE && state.config.is_some() {
            Ok(vec![CONFIG_COLLECTION.to_string()])
        } else {
            Ok(vec!["system.version".to_string()])
        }
    }

    fn is_group_aware(&self) -> bool {
        self.options.connect_mode == ConnectMode::GroupAware
    }

    async fn is_authenticated(&self) -> bool {
        self.options.user.is_some() && self.state.lock().check_credentials(&self.options).is_ok()
    }

    async fn disconnect(self) {
        self.state.lock().disconnects += 1;
    }
}
