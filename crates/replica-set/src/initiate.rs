//! One-time creation of a replica group.

use crate::document::GroupConfig;
use crate::error::{Error, Result};
use crate::state::MemberState;
use crate::status::StatusReader;
use crate::wait::{RoleWaiter, WaitOutcome};

use std::sync::LazyLock;

use proven_datastore::{Command, DataStoreClient, DataStoreError, DataStoreErrorKind};
use regex::Regex;
use tracing::info;

const INITIATE: &str = "replSetInitiate";

/// Message text servers without structured error codes use for a repeated
/// initiation. Message text is not a stable contract; only consulted when the
/// error carries no usable kind.
static ALREADY_INITIALIZED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\balready initiali[sz]ed\b").expect("Invalid regex pattern"));

/// Whether a failed initiation means the group already exists.
pub fn is_already_initialized<E: DataStoreError>(error: &E) -> bool {
    match error.kind() {
        DataStoreErrorKind::AlreadyInitialized => true,
        DataStoreErrorKind::CommandFailed | DataStoreErrorKind::Other => {
            ALREADY_INITIALIZED_REGEX.is_match(&error.to_string())
        }
        DataStoreErrorKind::Connectivity
        | DataStoreErrorKind::Unauthorized
        | DataStoreErrorKind::NotYetInitialized => false,
    }
}

/// How an initiation ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitiateOutcome {
    /// The group was created. Carries the wait for PRIMARY unless asynchronous.
    Initiated(Option<WaitOutcome>),

    /// The group existed already; nothing was changed.
    AlreadyInitialized,
}

/// Creates a single-member replica group `group_id` containing the waiter's host.
///
/// Unless `asynchronous`, polls until the host reports PRIMARY; a timeout is
/// returned in the outcome rather than raised.
///
/// # Errors
///
/// Returns an error if the initiate command fails for any reason other than
/// the group already existing, or if cancelled while waiting.
pub async fn initiate<D>(
    client: &D,
    group_id: &str,
    waiter: &RoleWaiter<'_>,
    asynchronous: bool,
) -> Result<InitiateOutcome>
where
    D: DataStoreClient,
{
    let config = GroupConfig::initial(group_id, waiter.host_key())
        .to_value()
        .map_err(|e| Error::MalformedDocument("config", e))?;

    info!("initiating replica group {} with {}", group_id, waiter.host_key());

    match client.run_admin_command(Command::new(INITIATE, config)).await {
        Ok(_) => {}
        Err(e) if is_already_initialized(&e) => {
            info!("replica group previously initiated: {}", e);
            return Ok(InitiateOutcome::AlreadyInitialized);
        }
        Err(e) => return Err(Error::command(INITIATE, e)),
    }

    if asynchronous {
        return Ok(InitiateOutcome::Initiated(None));
    }

    let outcome = waiter
        .wait_for(&StatusReader::new(client), &[MemberState::Primary])
        .await?;

    Ok(InitiateOutcome::Initiated(Some(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{INIT_ATTEMPTS, INIT_WAIT, RetryPolicy};

    use assert_matches::assert_matches;
    use proven_datastore::{ConnectOptions, Connector};
    use proven_datastore_mock::{Error as MockError, MockCluster};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    const HOST: &str = "10.0.0.1:27017";

    fn command_error(message: &str, kind: DataStoreErrorKind) -> MockError {
        MockError::Command {
            command: INITIATE.to_string(),
            message: message.to_string(),
            kind,
        }
    }

    #[test]
    fn test_already_initialized_by_kind() {
        let error = command_error("whatever", DataStoreErrorKind::AlreadyInitialized);
        assert!(is_already_initialized(&error));
    }

    #[test]
    fn test_already_initialized_by_message() {
        let error = command_error("already initialized", DataStoreErrorKind::CommandFailed);
        assert!(is_already_initialized(&error));

        let error = command_error("quorum check failed", DataStoreErrorKind::CommandFailed);
        assert!(!is_already_initialized(&error));

        // Structured kinds win over message text.
        let error = command_error("already initialized", DataStoreErrorKind::Unauthorized);
        assert!(!is_already_initialized(&error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiate_waits_for_primary() {
        let cluster = MockCluster::new();
        cluster.script_states(HOST, [0, 5, 1]);
        let client = cluster
            .connector()
            .connect(&["127.0.0.1:27017".to_string()], ConnectOptions::default())
            .await
            .unwrap();
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(INIT_ATTEMPTS, INIT_WAIT), &cancellation);

        let outcome = initiate(&client, "rs0", &waiter, false).await.unwrap();

        assert_eq!(
            outcome,
            InitiateOutcome::Initiated(Some(WaitOutcome::Satisfied(MemberState::Primary)))
        );

        let initiations = cluster.commands_named(INITIATE);
        assert_eq!(initiations.len(), 1);
        assert_eq!(
            initiations[0].argument(),
            &json!({"_id": "rs0", "members": [{"_id": 0, "host": HOST}]})
        );
        assert_eq!(cluster.commands_named("replSetGetStatus").len(), 3);
    }

    #[tokio::test]
    async fn test_initiate_twice_is_noop() {
        let cluster = MockCluster::new();
        cluster.use_message_only_errors();
        let client = cluster
            .connector()
            .connect(&["127.0.0.1:27017".to_string()], ConnectOptions::default())
            .await
            .unwrap();
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(INIT_ATTEMPTS, INIT_WAIT), &cancellation);

        let first = initiate(&client, "rs0", &waiter, true).await.unwrap();
        let second = initiate(&client, "rs0", &waiter, true).await.unwrap();

        assert_eq!(first, InitiateOutcome::Initiated(None));
        assert_eq!(second, InitiateOutcome::AlreadyInitialized);
        assert_eq!(cluster.config().unwrap()["version"], 1);
    }

    #[tokio::test]
    async fn test_other_failures_propagate() {
        let cluster = MockCluster::new();
        cluster.set_admin_user("admin", "secret");
        let client = cluster
            .connector()
            .connect(&["127.0.0.1:27017".to_string()], ConnectOptions::default())
            .await
            .unwrap();
        let cancellation = CancellationToken::new();
        let waiter = RoleWaiter::new(HOST, RetryPolicy::new(INIT_ATTEMPTS, INIT_WAIT), &cancellation);

        let result = initiate(&client, "rs0", &waiter, false).await;

        assert_matches!(
            result,
            Err(Error::Command { command: INITIATE, kind: DataStoreErrorKind::Unauthorized, .. })
        );
    }
}
