use crate::error::{Error, Result};

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Port the data store listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// Attempts to reach the replica group through the seed list.
pub const CONNECT_ATTEMPTS: usize = 60;

/// Wait between seed list attempts; also the per-attempt connect timeout.
pub const CONNECT_WAIT: Duration = Duration::from_secs(10);

/// Polls for a freshly initiated member to become primary.
pub const INIT_ATTEMPTS: usize = 60;

/// Wait between initiation polls.
pub const INIT_WAIT: Duration = Duration::from_secs(3);

/// Attempts of a forced reconfiguration, and polls for a new member to converge.
pub const RECONFIG_ATTEMPTS: usize = 10;

/// Wait between reconfiguration attempts and convergence polls.
pub const RECONFIG_WAIT: Duration = Duration::from_secs(10);

/// Pause between a reconfiguration and the reconnect that follows it.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A bounded number of attempts with a fixed wait in between.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub attempts: usize,

    /// Wait between two attempts.
    pub wait: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(attempts: usize, wait: Duration) -> Self {
        Self { attempts, wait }
    }

    /// Upper bound of the time spent sleeping when every attempt fails.
    #[must_use]
    pub fn max_sleep(&self) -> Duration {
        let waits = u32::try_from(self.attempts.saturating_sub(1)).unwrap_or(u32::MAX);
        self.wait.saturating_mul(waits)
    }
}

/// Retry budgets of the membership operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Timings {
    /// Seed list connection attempts.
    pub connect: RetryPolicy,

    /// Server selection timeout passed to every connection.
    pub connect_timeout: Duration,

    /// Polling for the primary after initiation.
    pub init: RetryPolicy,

    /// Forced reconfiguration retries and convergence polling after it.
    pub reconfig: RetryPolicy,

    /// Pause before reconnecting after a reconfiguration.
    pub reconnect_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect: RetryPolicy::new(CONNECT_ATTEMPTS, CONNECT_WAIT),
            connect_timeout: CONNECT_WAIT,
            init: RetryPolicy::new(INIT_ATTEMPTS, INIT_WAIT),
            reconfig: RetryPolicy::new(RECONFIG_ATTEMPTS, RECONFIG_WAIT),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Admin credentials of the replica group.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct SecurityData {
    /// Admin user name.
    pub admin_user: String,

    /// Admin password.
    pub admin_password: String,
}

impl Debug for SecurityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityData")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

fn default_local_address() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

/// Options for configuring a `ReplicaSet`.
#[derive(Clone, Debug, Deserialize)]
pub struct ReplicaSetOptions {
    /// Group id used when this node has to initiate a new replica group.
    pub key: String,

    /// Group id an existing replica group must carry to be joined.
    pub name: String,

    /// Admin credentials.
    pub security_data: SecurityData,

    /// `host:port` seeds of an existing replica group. Empty skips straight to
    /// the local connection.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Address of the data store on this host.
    #[serde(default = "default_local_address")]
    pub local_address: String,

    /// Retry budgets. Not read from options files.
    #[serde(skip)]
    pub timings: Timings,
}

impl ReplicaSetOptions {
    /// Creates options with the default local address and timings.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        security_data: SecurityData,
        seeds: Vec<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            security_data,
            seeds,
            local_address: default_local_address(),
            timings: Timings::default(),
        }
    }

    /// Replaces the retry budgets.
    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Loads options from a JSON file written by the provisioning driver.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options file cannot be read
    /// - The options file contains invalid JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| Error::Config(format!("failed to open options file: {e}")))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::Config(format!("failed to read options file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse options file: {e}")))
    }
}
