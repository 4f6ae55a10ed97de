use crate::config::ReplicaSetOptions;
use crate::connection::ConnectionManager;
use crate::document::StatusSnapshot;
use crate::error::{Error, Result};
use crate::initiate::{self, InitiateOutcome};
use crate::reconfig::{self, EvictionPlan, MembershipChange, Reconfigurer};
use crate::state::MemberState;
use crate::status::{GroupLookup, StatusReader};
use crate::wait::RoleWaiter;

use std::sync::Arc;

use proven_datastore::{Command, Connector, DataStoreClient};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CREATE_USER: &str = "createUser";

/// Roles granted to the admin user.
pub const ADMIN_ROLES: [&str; 4] = [
    "readWriteAnyDatabase",
    "userAdminAnyDatabase",
    "dbAdminAnyDatabase",
    "clusterAdmin",
];

/// What `ensure_joined` did.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinAction {
    /// No replica group was found, so one was initiated.
    Initiated(InitiateOutcome),

    /// The host was added to the existing replica group.
    Reconfigured(MembershipChange),

    /// The host was already a member; nothing changed.
    AlreadyMember,
}

/// Result of `ensure_joined`.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinReport {
    /// What was done.
    pub action: JoinAction,

    /// Last observed state of the host; `Unknown` if it could not be read.
    pub state: MemberState,
}

/// Manages the membership of this node in a replica group.
pub struct ReplicaSet<C>
where
    C: Connector,
{
    cancellation: CancellationToken,
    connection: ConnectionManager<C>,
    options: Arc<ReplicaSetOptions>,
    this_host_key: String,
}

impl<C> ReplicaSet<C>
where
    C: Connector,
{
    /// Creates a controller for the node reachable at `this_host_key`.
    pub fn new(connector: C, options: ReplicaSetOptions, this_host_key: impl Into<String>) -> Self {
        Self::with_cancellation(connector, options, this_host_key, CancellationToken::new())
    }

    /// Creates a controller whose waits and retries stop once `cancellation` fires.
    pub fn with_cancellation(
        connector: C,
        options: ReplicaSetOptions,
        this_host_key: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        let options = Arc::new(options);

        Self {
            connection: ConnectionManager::new(connector, options.clone(), cancellation.clone()),
            cancellation,
            options,
            this_host_key: this_host_key.into(),
        }
    }

    /// Token that aborts every pending wait when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// `host:port` of this node.
    #[must_use]
    pub fn this_host_key(&self) -> &str {
        &self.this_host_key
    }

    /// Options the controller was created with.
    #[must_use]
    pub fn options(&self) -> &ReplicaSetOptions {
        &self.options
    }

    /// (Re)connects, replacing any live handle.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&mut self) -> Result<()> {
        self.connection.connect().await.map(|_| ())
    }

    /// Closes the live handle.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    /// Makes sure `host_key` belongs to a replica group: initiates one if none
    /// exists, otherwise adds the host unless it is already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if initiation or reconfiguration fails, or if cancelled.
    /// Failing to observe the final state is not an error.
    pub async fn ensure_joined(&mut self, host_key: &str, visible: bool) -> Result<JoinReport> {
        self.connection.connect().await?;

        let reader = StatusReader::new(self.connection.client()?);
        let existing_group = match reader.group_name().await {
            GroupLookup::Found(name) => Some(name),
            GroupLookup::Absent => None,
            GroupLookup::Unavailable(reason) => {
                warn!("replica group lookup failed ({}); treating as absent", reason);
                None
            }
        };

        let already_member = match &existing_group {
            Some(name) => match reader.is_member(host_key).await {
                Ok(is_member) => is_member,
                Err(e) => {
                    warn!("could not read membership of replica group {}: {}", name, e);
                    false
                }
            },
            None => false,
        };

        let action = match existing_group {
            None => {
                info!("no replica group found; initiating {}", self.options.key);
                JoinAction::Initiated(self.initiate_with(host_key, false).await?)
            }
            Some(name) if already_member => {
                info!("{} is already a member of replica group {}", host_key, name);
                JoinAction::AlreadyMember
            }
            Some(name) => {
                info!("adding {} to replica group {}", host_key, name);
                JoinAction::Reconfigured(self.add_or_replace(host_key, visible).await?)
            }
        };

        let state = self.observed_state(host_key).await;

        Ok(JoinReport { action, state })
    }

    /// Initiates a replica group named after the options' key with this node
    /// as the only member.
    ///
    /// # Errors
    ///
    /// Returns an error if the initiate command is rejected for any reason
    /// other than the group already existing, or if cancelled while waiting.
    pub async fn initiate(&self, asynchronous: bool) -> Result<InitiateOutcome> {
        self.initiate_with(&self.this_host_key, asynchronous).await
    }

    async fn initiate_with(&self, host_key: &str, asynchronous: bool) -> Result<InitiateOutcome> {
        let waiter = RoleWaiter::new(host_key, self.options.timings.init, &self.cancellation);

        initiate::initiate(
            self.connection.client()?,
            &self.options.key,
            &waiter,
            asynchronous,
        )
        .await
    }

    /// Adds `host_key`, evicting unhealthy members in the same reconfiguration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or the forced
    /// reconfiguration keeps failing.
    pub async fn add_or_replace(
        &mut self,
        host_key: &str,
        visible: bool,
    ) -> Result<MembershipChange> {
        reconfig::add_or_replace(
            &mut self.connection,
            host_key,
            visible,
            &self.options.timings,
            &self.cancellation,
        )
        .await
    }

    /// Adds this node.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_or_replace`].
    pub async fn add_this_host(&mut self, visible: bool) -> Result<MembershipChange> {
        let host_key = self.this_host_key.clone();

        info!("attempting to add {} to replica group", host_key);

        self.add_or_replace(&host_key, visible).await
    }

    /// Creates the admin user from the options' security data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data store rejects the command.
    pub async fn create_admin_user(&self) -> Result<()> {
        let security = &self.options.security_data;
        let command = Command::new(CREATE_USER, security.admin_user.as_str())
            .with_option("pwd", security.admin_password.as_str())
            .with_option("roles", json!(ADMIN_ROLES));

        self.connection
            .client()?
            .run_admin_command(command)
            .await
            .map_err(|e| Error::command(CREATE_USER, e))?;

        info!("created admin user {}", security.admin_user);

        Ok(())
    }

    /// Current replica group status.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the status cannot be read.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        StatusReader::new(self.connection.client()?).status().await
    }

    /// Looks up the replica group id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before `connect`.
    pub async fn group_name(&self) -> Result<GroupLookup> {
        Ok(StatusReader::new(self.connection.client()?).group_name().await)
    }

    /// Whether a replica group exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before `connect`.
    pub async fn has_group(&self) -> Result<bool> {
        Ok(StatusReader::new(self.connection.client()?).has_group().await)
    }

    /// Whether `host_key` is reported as a member.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the status cannot be read.
    pub async fn is_member(&self, host_key: &str) -> Result<bool> {
        StatusReader::new(self.connection.client()?)
            .is_member(host_key)
            .await
    }

    /// Hosts of every reported member.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the status cannot be read.
    pub async fn member_names(&self) -> Result<Vec<String>> {
        StatusReader::new(self.connection.client()?)
            .member_names()
            .await
    }

    /// Members that would be evicted by the next reconfiguration, with the
    /// reason when none can be chosen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before `connect`.
    pub async fn eviction_plan(&self) -> Result<EvictionPlan> {
        let client = self.connection.client()?;

        Ok(
            Reconfigurer::new(client, self.options.timings.reconfig, &self.cancellation)
                .eviction_plan()
                .await,
        )
    }

    /// Members that would be evicted by the next reconfiguration. Empty when
    /// the replica group cannot be located.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before `connect`.
    pub async fn members_to_remove(&self) -> Result<Vec<String>> {
        Ok(self.eviction_plan().await?.hosts().to_vec())
    }

    /// Whether the live handle reached the replica group through the seeds.
    #[must_use]
    pub fn is_group_connection(&self) -> bool {
        self.connection.is_group_connection()
    }

    /// Whether the live handle authenticated as the admin user.
    pub async fn is_authenticated(&self) -> bool {
        self.connection.is_authenticated().await
    }

    async fn observed_state(&self, host_key: &str) -> MemberState {
        match self.status().await {
            Ok(status) => status.state_of(host_key).unwrap_or(MemberState::Unknown),
            Err(e) => {
                debug!("could not observe state of {}: {}", host_key, e);
                MemberState::Unknown
            }
        }
    }
}
