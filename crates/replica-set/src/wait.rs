//! Polling until a member reaches one of a set of states.

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::state::{MemberState, role_name};
use crate::status::StatusReader;

use std::time::Duration;

use proven_datastore::DataStoreClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sleeps for `duration` unless `cancellation` fires first.
pub(crate) async fn pause(duration: Duration, cancellation: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = cancellation.cancelled() => Err(Error::Cancelled),
    }
}

/// How a wait for member states ended. Timing out is not an error; callers
/// decide whether to escalate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The member reached an expected state.
    Satisfied(MemberState),

    /// The attempts ran out first.
    TimedOut {
        /// Polls made.
        attempts: usize,

        /// Mapped state seen by the last poll, `None` if it was unmapped.
        last_observed: Option<MemberState>,
    },
}

impl WaitOutcome {
    /// Whether an expected state was reached.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }

    /// The last state observed, if it was mapped.
    #[must_use]
    pub const fn last_state(&self) -> Option<MemberState> {
        match self {
            Self::Satisfied(state) => Some(*state),
            Self::TimedOut { last_observed, .. } => *last_observed,
        }
    }
}

/// Polls the status of one member until it reaches an expected state.
pub struct RoleWaiter<'a> {
    cancellation: &'a CancellationToken,
    host_key: &'a str,
    policy: RetryPolicy,
}

impl<'a> RoleWaiter<'a> {
    /// Creates a waiter for `host_key` bounded by `policy`.
    #[must_use]
    pub const fn new(
        host_key: &'a str,
        policy: RetryPolicy,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            cancellation,
            host_key,
            policy,
        }
    }

    /// The member being watched.
    #[must_use]
    pub const fn host_key(&self) -> &str {
        self.host_key
    }

    /// Polls until the member's state is in `expected` or the attempts run out.
    /// Read failures and a missing member count as `UNKNOWN` for that poll.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancelled between polls.
    pub async fn wait_for<D>(
        &self,
        reader: &StatusReader<'_, D>,
        expected: &[MemberState],
    ) -> Result<WaitOutcome>
    where
        D: DataStoreClient,
    {
        let expected_names: Vec<&str> = expected.iter().map(|state| state.as_str()).collect();
        let mut attempts = 0;
        let mut last_observed = None;

        while attempts < self.policy.attempts {
            if self.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let code = match reader.status().await {
                Ok(status) => status.member(self.host_key).map_or_else(
                    || {
                        debug!("{} not yet listed in replica group status", self.host_key);
                        MemberState::Unknown.code()
                    },
                    |member| member.state,
                ),
                Err(e) => {
                    debug!("failed to read replica group status: {}", e);
                    MemberState::Unknown.code()
                }
            };

            attempts += 1;
            last_observed = MemberState::from_code(code);

            info!(
                "member {} state: {} (waiting for one of {})",
                self.host_key,
                role_name(code),
                expected_names.join(", ")
            );

            if let Some(state) = last_observed.filter(|state| expected.contains(state)) {
                return Ok(WaitOutcome::Satisfied(state));
            }

            if attempts < self.policy.attempts {
                pause(self.policy.wait, self.cancellation).await?;
            }
        }

        warn!(
            "member {} did not reach one of {} after {} attempts",
            self.host_key,
            expected_names.join(", "),
            attempts
        );

        Ok(WaitOutcome::TimedOut {
            attempts,
            last_observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::INIT_WAIT;

    use assert_matches::assert_matches;
    use proven_datastore::{ConnectOptions, Connector};
    use proven_datastore_mock::{MockClient, MockCluster};
    use serde_json::json;
    use tokio::time::Instant;

    const HOST: &str = "10.0.0.1:27017";

    async fn initiated_cluster() -> (MockCluster, MockClient) {
        let cluster = MockCluster::new();
        cluster.install_config(json!({
            "_id": "rs0",
            "version": 1,
            "members": [{"_id": 0, "host": HOST}]
        }));
        let client = cluster
            .connector()
            .connect(&["127.0.0.1:27017".to_string()], ConnectOptions::default())
            .await
            .unwrap();

        (cluster, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_after_transition() {
        let (cluster, client) = initiated_cluster().await;
        cluster.script_states(HOST, [0, 5, 5, 1]);
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(60, INIT_WAIT), &cancellation);

        let started = Instant::now();
        let outcome = waiter
            .wait_for(&StatusReader::new(&client), &[MemberState::Primary])
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Satisfied(MemberState::Primary));
        assert_eq!(started.elapsed(), INIT_WAIT * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_exact_attempts() {
        let (cluster, client) = initiated_cluster().await;
        cluster.set_member_state(HOST, 3, 1);
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(5, INIT_WAIT), &cancellation);

        let started = Instant::now();
        let outcome = waiter
            .wait_for(&StatusReader::new(&client), &[MemberState::Primary])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                attempts: 5,
                last_observed: Some(MemberState::Recovering)
            }
        );
        assert_eq!(started.elapsed(), INIT_WAIT * 4);
        assert_eq!(cluster.commands_named("replSetGetStatus").len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failures_count_as_unknown() {
        let (cluster, client) = initiated_cluster().await;
        cluster.fail_next_status_reads(2);
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(10, INIT_WAIT), &cancellation);

        let outcome = waiter
            .wait_for(&StatusReader::new(&client), &[MemberState::Primary])
            .await
            .unwrap();

        assert!(outcome.is_satisfied());
        assert_eq!(cluster.commands_named("replSetGetStatus").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_member_is_unknown() {
        let (_cluster, client) = initiated_cluster().await;
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new("10.9.9.9:27017", RetryPolicy::new(2, INIT_WAIT), &cancellation);

        let outcome = waiter
            .wait_for(&StatusReader::new(&client), &[MemberState::Primary])
            .await
            .unwrap();

        assert_eq!(outcome.last_state(), Some(MemberState::Unknown));
        assert!(!outcome.is_satisfied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting() {
        let (cluster, client) = initiated_cluster().await;
        cluster.set_member_state(HOST, 5, 1);
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(60, INIT_WAIT), &cancellation);

        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(INIT_WAIT * 2).await;
            canceller.cancel();
        });

        let result = waiter
            .wait_for(&StatusReader::new(&client), &[MemberState::Primary])
            .await;

        assert_matches!(result, Err(Error::Cancelled));
        assert!(cluster.commands_named("replSetGetStatus").len() < 60);
    }
}
