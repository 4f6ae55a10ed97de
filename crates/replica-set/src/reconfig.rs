//! Membership reconfiguration: evicting unhealthy members and adding new ones.

use crate::config::{RetryPolicy, Timings};
use crate::connection::ConnectionManager;
use crate::document::{GroupConfig, MemberEntry};
use crate::error::{Error, Result};
use crate::state::MemberState;
use crate::status::StatusReader;
use crate::wait::{RoleWaiter, WaitOutcome, pause};

use std::fmt::{self, Display};

use proven_datastore::{Command, Connector, DataStoreClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RECONFIG: &str = "replSetReconfig";

/// States a newly added member may report once it has converged. STARTUP2 is
/// the initial sync that precedes SECONDARY.
pub const JOINED_STATES: [MemberState; 3] = [
    MemberState::Primary,
    MemberState::Secondary,
    MemberState::Startup2,
];

/// Why no members were selected for eviction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EvictionSkip {
    /// The replica group could not be located; all members may be faulty or
    /// this node may be partitioned.
    AmbiguousGroupState,

    /// Status could not be read; carries the reason.
    StatusUnavailable(String),
}

impl Display for EvictionSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousGroupState => f.write_str("replica group could not be found"),
            Self::StatusUnavailable(reason) => write!(f, "status unavailable: {reason}"),
        }
    }
}

/// Members selected for eviction, or the reason none were.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EvictionPlan {
    /// Hosts to remove; may be empty when every member is healthy.
    Evict(Vec<String>),

    /// Eviction could not be decided, so nothing is removed.
    Skipped(EvictionSkip),
}

impl EvictionPlan {
    /// Hosts to remove. Empty when skipped.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        match self {
            Self::Evict(hosts) => hosts,
            Self::Skipped(_) => &[],
        }
    }
}

/// A successful reconfiguration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconfigOutcome {
    /// Attempts it took, including the successful one.
    pub attempts: usize,
}

/// Result of adding a member.
#[derive(Clone, Debug, PartialEq)]
pub struct MembershipChange {
    /// Version of the configuration that was read before the change.
    pub previous_version: Option<i64>,

    /// The configuration that was applied.
    pub config: GroupConfig,

    /// Eviction decision taken along the way.
    pub eviction: EvictionPlan,

    /// Convergence of the added member.
    pub wait: WaitOutcome,
}

/// Computes the next configuration: bumps the version, drops `evict`ed hosts and
/// appends `host_key` unless it is already configured or itself being evicted.
///
/// The new member id is one past the highest id read, evicted members
/// included, so an id is never handed to a different host in the same change.
#[must_use]
pub fn plan_membership(
    mut config: GroupConfig,
    host_key: &str,
    visible: bool,
    evict: &[String],
) -> GroupConfig {
    config.bump_version();
    let next_id = config.next_member_id();

    if !evict.is_empty() {
        config.members.retain(|member| !evict.contains(&member.host));
    }

    let already_member = config.contains_host(host_key);
    let being_evicted = evict.iter().any(|host| host == host_key);

    if !already_member && !being_evicted {
        config
            .members
            .push(MemberEntry::joining(next_id, host_key, visible));
    }

    config
}

/// Issues reconfigurations and evaluates eviction candidates.
pub struct Reconfigurer<'a, D> {
    cancellation: &'a CancellationToken,
    client: &'a D,
    policy: RetryPolicy,
}

impl<'a, D> Reconfigurer<'a, D>
where
    D: DataStoreClient,
{
    /// Creates a reconfigurer; `policy` bounds forced retries.
    #[must_use]
    pub const fn new(client: &'a D, policy: RetryPolicy, cancellation: &'a CancellationToken) -> Self {
        Self {
            cancellation,
            client,
            policy,
        }
    }

    /// Replaces the replica group configuration.
    ///
    /// A forced reconfiguration is retried until the policy's attempts run out,
    /// since a partitioned node races with the rest of the group converging.
    ///
    /// # Errors
    ///
    /// An unforced failure is returned immediately; a forced one as
    /// [`Error::ReconfigExhausted`] once the attempts are spent.
    pub async fn reconfig(&self, config: &GroupConfig, force: bool) -> Result<ReconfigOutcome> {
        let document = config
            .to_value()
            .map_err(|e| Error::MalformedDocument("config", e))?;

        let mut attempts = 0;

        loop {
            attempts += 1;

            let command = Command::new(RECONFIG, document.clone()).with_option("force", force);

            match self.client.run_admin_command(command).await {
                Ok(_) => {
                    info!(
                        "replica group {} reconfigured to version {:?} after {} attempt(s)",
                        config.id, config.version, attempts
                    );

                    return Ok(ReconfigOutcome { attempts });
                }
                Err(e) if !force => return Err(Error::command(RECONFIG, e)),
                Err(e) => {
                    warn!(
                        "reconfiguration attempt {} of {} failed: {}",
                        attempts, self.policy.attempts, e
                    );

                    if attempts >= self.policy.attempts {
                        return Err(Error::ReconfigExhausted {
                            attempts,
                            source: Box::new(Error::command(RECONFIG, e)),
                        });
                    }

                    pause(self.policy.wait, self.cancellation).await?;
                }
            }
        }
    }

    /// Hosts that are unreachable or in a non-alive state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousGroupState`] if no replica group can be
    /// located; removing members from a configuration that cannot be found is
    /// unsafe.
    pub async fn members_to_remove(&self) -> Result<Vec<String>> {
        let reader = StatusReader::new(self.client);

        if !reader.has_group().await {
            return Err(Error::AmbiguousGroupState);
        }

        Ok(reader.status().await?.unhealthy_members())
    }

    /// Eviction candidates, resolving every failure to "remove nothing".
    pub async fn eviction_plan(&self) -> EvictionPlan {
        match self.members_to_remove().await {
            Ok(hosts) => EvictionPlan::Evict(hosts),
            Err(Error::AmbiguousGroupState) => {
                EvictionPlan::Skipped(EvictionSkip::AmbiguousGroupState)
            }
            Err(e) => EvictionPlan::Skipped(EvictionSkip::StatusUnavailable(e.to_string())),
        }
    }
}

/// Adds `host_key` to the replica group, evicting unhealthy members in the
/// same reconfiguration, then reconnects and waits for the member to converge.
///
/// # Errors
///
/// Returns an error if the configuration cannot be read or the forced
/// reconfiguration keeps failing. Convergence timing out is not an error.
pub async fn add_or_replace<C>(
    connection: &mut ConnectionManager<C>,
    host_key: &str,
    visible: bool,
    timings: &Timings,
    cancellation: &CancellationToken,
) -> Result<MembershipChange>
where
    C: Connector,
{
    let client = connection.client()?;
    let current = StatusReader::new(client).group_config().await?;
    let previous_version = current.version;

    let reconfigurer = Reconfigurer::new(client, timings.reconfig, cancellation);

    let eviction = reconfigurer.eviction_plan().await;
    match &eviction {
        EvictionPlan::Evict(hosts) if !hosts.is_empty() => {
            info!("target members to remove from replica group: {:?}", hosts);
        }
        EvictionPlan::Evict(_) => {}
        EvictionPlan::Skipped(reason) => {
            info!("no members will be removed: {}", reason);
        }
    }

    let config = plan_membership(current, host_key, visible, eviction.hosts());

    info!(
        "reconfiguring replica group {} (version {:?}): {:?}",
        config.id,
        config.version,
        config.member_hosts()
    );

    if let Err(e) = reconfigurer.reconfig(&config, true).await {
        error!("reconfiguring replica group failed: {}", e);
        return Err(e);
    }

    // The old handle may point at a node that was just demoted or removed.
    pause(timings.reconnect_delay, cancellation).await?;
    connection.connect().await?;

    let client = connection.client()?;
    let wait = RoleWaiter::new(host_key, timings.reconfig, cancellation)
        .wait_for(&StatusReader::new(client), &JOINED_STATES)
        .await?;

    if !wait.is_satisfied() {
        warn!("{} has not converged yet; continuing", host_key);
    }

    Ok(MembershipChange {
        previous_version,
        config,
        eviction,
        wait,
    })
}
