//! Ownership of the single live handle to the data store.

use crate::config::ReplicaSetOptions;
use crate::error::{Error, Result};
use crate::wait::pause;

use std::sync::Arc;

use proven_datastore::{
    ConnectMode, ConnectOptions, Connector, DataStoreClient, DataStoreError, DataStoreErrorKind,
    ReadPreference,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ADMIN_DATABASE: &str = "admin";

/// Establishes and replaces the connection every other component borrows.
///
/// At most one handle is live. Reconnecting always disconnects the previous one.
pub struct ConnectionManager<C>
where
    C: Connector,
{
    cancellation: CancellationToken,
    client: Option<C::Client>,
    connector: C,
    options: Arc<ReplicaSetOptions>,
}

impl<C> ConnectionManager<C>
where
    C: Connector,
{
    /// Creates a manager with no live handle.
    pub const fn new(
        connector: C,
        options: Arc<ReplicaSetOptions>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            cancellation,
            client: None,
            connector,
            options,
        }
    }

    /// Connects to the replica group through the seed list, falling back to
    /// the data store on this host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled between seed attempts, or
    /// [`Error::Connectivity`] if even the local data store refuses a connection.
    pub async fn connect(&mut self) -> Result<&C::Client> {
        self.disconnect().await;

        let options = self.options.clone();

        let client = match self.seed_connect(&options).await? {
            Some(client) => client,
            None => self.local_connect(&options).await?,
        };

        Ok(self.client.insert(client))
    }

    async fn seed_connect(&self, options: &ReplicaSetOptions) -> Result<Option<C::Client>> {
        if options.seeds.is_empty() {
            debug!("no seeds configured; connecting locally");
            return Ok(None);
        }

        let policy = options.timings.connect;
        let connect_options = ConnectOptions {
            database: None,
            user: Some(options.security_data.admin_user.clone()),
            password: Some(options.security_data.admin_password.clone()),
            connect_timeout: Some(options.timings.connect_timeout),
            connect_mode: ConnectMode::GroupAware,
            read_preference: ReadPreference::PrimaryPreferred,
            group_id: Some(options.name.clone()),
        };

        for attempt in 1..=policy.attempts {
            if self.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(
                "connecting to replica group {} via {:?} (attempt {}/{})",
                options.name, options.seeds, attempt, policy.attempts
            );

            match self
                .connector
                .connect(&options.seeds, connect_options.clone())
                .await
            {
                Ok(client) => {
                    info!("connected to replica group {}", options.name);
                    return Ok(Some(client));
                }
                Err(e) => warn!("failed to connect to replica group: {}", e),
            }

            if attempt < policy.attempts {
                pause(policy.wait, &self.cancellation).await?;
            }
        }

        warn!(
            "replica group {} unreachable after {} attempts; falling back to local connection",
            options.name, policy.attempts
        );

        Ok(None)
    }

    fn local_options(&self, authenticated: bool) -> ConnectOptions {
        let (user, password) = if authenticated {
            (
                Some(self.options.security_data.admin_user.clone()),
                Some(self.options.security_data.admin_password.clone()),
            )
        } else {
            (None, None)
        };

        ConnectOptions {
            database: Some(ADMIN_DATABASE.to_string()),
            user,
            password,
            connect_timeout: Some(self.options.timings.connect_timeout),
            connect_mode: ConnectMode::Direct,
            read_preference: ReadPreference::Primary,
            group_id: None,
        }
    }

    async fn local_connect(&self, options: &ReplicaSetOptions) -> Result<C::Client> {
        let hosts = vec![options.local_address.clone()];

        info!("connecting to {} as {}", options.local_address, options.security_data.admin_user);

        match self.connector.connect(&hosts, self.local_options(true)).await {
            Ok(client) => {
                let probe = has_admin(&client).await;

                match probe {
                    Ok(()) => return Ok(client),
                    Err(e) if e.kind() == DataStoreErrorKind::Unauthorized => {
                        info!("admin credentials rejected ({}); connecting without credentials", e);
                        client.disconnect().await;
                    }
                    Err(e) => {
                        warn!("could not verify admin privileges: {}", e);
                        return Ok(client);
                    }
                }
            }
            Err(e) if e.kind() == DataStoreErrorKind::Unauthorized => {
                info!("admin credentials rejected ({}); connecting without credentials", e);
            }
            Err(e) => return Err(Error::Connectivity(Box::new(e))),
        }

        self.connector
            .connect(&hosts, self.local_options(false))
            .await
            .map_err(|e| Error::Connectivity(Box::new(e)))
    }

    /// Closes the live handle, if there is one.
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("disconnecting from data store");
            client.disconnect().await;
        }
    }

    /// The live handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before the first `connect`.
    pub fn client(&self) -> Result<&C::Client> {
        self.client.as_ref().ok_or(Error::NotConnected)
    }

    /// Whether a handle is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the live handle reached the replica group through the seeds.
    #[must_use]
    pub fn is_group_connection(&self) -> bool {
        self.client.as_ref().is_some_and(DataStoreClient::is_group_aware)
    }

    /// Whether the live handle authenticated as the admin user.
    pub async fn is_authenticated(&self) -> bool {
        match &self.client {
            Some(client) => client.is_authenticated().await,
            None => false,
        }
    }
}

// Reading the admin database needs admin privileges.
async fn has_admin<D>(client: &D) -> std::result::Result<(), D::Error>
where
    D: DataStoreClient,
{
    client.list_collections(ADMIN_DATABASE).await.map(|_| ())
}
