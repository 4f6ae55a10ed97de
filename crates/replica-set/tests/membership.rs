use assert_matches::assert_matches;
use proven_datastore::Connector;
use proven_datastore_mock::{MockCluster, MockConnector};
use proven_replica_set::{
    ADMIN_ROLES, CONNECT_ATTEMPTS, Error, EvictionPlan, EvictionSkip, InitiateOutcome, JoinAction,
    MemberState, RECONFIG_ATTEMPTS, ReplicaSet, ReplicaSetOptions, SecurityData, WaitOutcome,
};
use serde_json::{Value, json};
use tracing_test::traced_test;

const THIS_HOST: &str = "10.0.0.3:27017";
const SEEDS: [&str; 2] = ["10.0.0.1:27017", "10.0.0.2:27017"];

fn options(seeds: &[&str]) -> ReplicaSetOptions {
    let security = SecurityData {
        admin_user: "admin".to_string(),
        admin_password: "secret".to_string(),
    };

    ReplicaSetOptions::new(
        "rs0",
        "rs0",
        security,
        seeds.iter().map(ToString::to_string).collect(),
    )
}

fn replica_set(cluster: &MockCluster, seeds: &[&str]) -> ReplicaSet<MockConnector> {
    ReplicaSet::new(cluster.connector(), options(seeds), THIS_HOST)
}

/// A secured two-member group reachable through the seeds.
fn running_group(cluster: &MockCluster) {
    cluster.install_config(json!({
        "_id": "rs0",
        "version": 3,
        "members": [{"_id": 0, "host": SEEDS[0]}, {"_id": 1, "host": SEEDS[1]}]
    }));
    cluster.set_admin_user("admin", "secret");
    cluster.make_reachable(SEEDS);
}

fn version(cluster: &MockCluster) -> i64 {
    cluster.config().unwrap()["version"].as_i64().unwrap()
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_first_node_initiates_group() {
    let cluster = MockCluster::new();
    cluster.script_states(THIS_HOST, [0, 5, 1]);
    let mut replica_set = replica_set(&cluster, &[]);

    let report = replica_set.ensure_joined(THIS_HOST, true).await.unwrap();

    assert_eq!(
        report.action,
        JoinAction::Initiated(InitiateOutcome::Initiated(Some(WaitOutcome::Satisfied(
            MemberState::Primary
        ))))
    );
    assert_eq!(report.state, MemberState::Primary);

    let initiations = cluster.commands_named("replSetInitiate");
    assert_eq!(initiations.len(), 1);
    assert_eq!(
        initiations[0].argument(),
        &json!({"_id": "rs0", "members": [{"_id": 0, "host": THIS_HOST}]})
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_replaces_failed_member() {
    let cluster = MockCluster::new();
    running_group(&cluster);
    cluster.set_member_state(SEEDS[1], 8, 0);
    let mut replica_set = replica_set(&cluster, &SEEDS);

    let report = replica_set.ensure_joined(THIS_HOST, true).await.unwrap();

    let JoinAction::Reconfigured(change) = report.action else {
        panic!("expected a reconfiguration, got {:?}", report.action);
    };
    assert_eq!(change.previous_version, Some(3));
    assert_eq!(change.eviction, EvictionPlan::Evict(vec![SEEDS[1].to_string()]));
    assert_eq!(change.wait, WaitOutcome::Satisfied(MemberState::Secondary));
    assert_eq!(report.state, MemberState::Secondary);

    assert_eq!(
        Value::Object(cluster.config().unwrap()),
        json!({
            "_id": "rs0",
            "version": 4,
            "members": [
                {"_id": 0, "host": SEEDS[0]},
                {"_id": 2, "host": THIS_HOST, "priority": 1, "hidden": false}
            ]
        })
    );

    let reconfigs = cluster.commands_named("replSetReconfig");
    assert_eq!(reconfigs.len(), 1);
    assert_eq!(reconfigs[0].option("force"), Some(&Value::Bool(true)));

    assert!(replica_set.is_group_connection());
    assert!(replica_set.is_authenticated().await);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_seeds_fall_back_to_local_node() {
    let cluster = MockCluster::new();
    let mut replica_set = replica_set(&cluster, &SEEDS);

    let report = replica_set.ensure_joined(THIS_HOST, true).await.unwrap();

    assert_matches!(
        report.action,
        JoinAction::Initiated(InitiateOutcome::Initiated(Some(WaitOutcome::Satisfied(_))))
    );

    let connections = cluster.connections();
    assert_eq!(connections.len(), CONNECT_ATTEMPTS + 2);
    assert!(connections[..CONNECT_ATTEMPTS].iter().all(|c| !c.succeeded));

    let last = connections.last().unwrap();
    assert_eq!(last.hosts, vec!["127.0.0.1:27017"]);
    assert_eq!(last.options.user, None);

    assert!(!replica_set.is_group_connection());
    assert!(!replica_set.is_authenticated().await);
}

#[tokio::test]
async fn test_no_members_removed_without_group() {
    let cluster = MockCluster::new();
    let mut replica_set = replica_set(&cluster, &[]);
    replica_set.connect().await.unwrap();

    assert!(replica_set.members_to_remove().await.unwrap().is_empty());
    assert_eq!(
        replica_set.eviction_plan().await.unwrap(),
        EvictionPlan::Skipped(EvictionSkip::AmbiguousGroupState)
    );
    assert!(!replica_set.has_group().await.unwrap());
}

#[tokio::test]
async fn test_existing_member_is_left_alone() {
    let cluster = MockCluster::new();
    cluster.install_config(json!({
        "_id": "rs0",
        "version": 7,
        "members": [{"_id": 0, "host": SEEDS[0]}, {"_id": 1, "host": THIS_HOST}]
    }));
    cluster.set_admin_user("admin", "secret");
    cluster.make_reachable([SEEDS[0]]);
    let mut replica_set = replica_set(&cluster, &SEEDS);

    let report = replica_set.ensure_joined(THIS_HOST, true).await.unwrap();

    assert_eq!(report.action, JoinAction::AlreadyMember);
    assert_eq!(report.state, MemberState::Secondary);
    assert!(cluster.commands_named("replSetReconfig").is_empty());
    assert_eq!(version(&cluster), 7);
}

#[tokio::test(start_paused = true)]
async fn test_versions_increase_across_additions() {
    let cluster = MockCluster::new();
    running_group(&cluster);
    let mut replica_set = replica_set(&cluster, &SEEDS);
    replica_set.connect().await.unwrap();

    for host in ["10.0.0.4:27017", "10.0.0.5:27017", "10.0.0.6:27017"] {
        let change = replica_set.add_or_replace(host, true).await.unwrap();

        let previous = change.previous_version.unwrap();
        assert!(version(&cluster) > previous);
        assert_eq!(change.config.version, Some(previous + 1));
    }

    assert_eq!(version(&cluster), 6);
    assert_eq!(replica_set.member_names().await.unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_member() {
    let cluster = MockCluster::new();
    running_group(&cluster);
    let mut replica_set = replica_set(&cluster, &SEEDS);
    replica_set.connect().await.unwrap();

    let change = replica_set.add_this_host(false).await.unwrap();

    let added = change.config.members.last().unwrap();
    assert_eq!(added.host, THIS_HOST);
    assert_eq!(added.id, 2);
    assert_eq!(added.priority, Some(0));
    assert_eq!(added.hidden, Some(true));
    assert!(replica_set.is_member(THIS_HOST).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_slow_convergence_is_not_an_error() {
    let cluster = MockCluster::new();
    running_group(&cluster);
    cluster.set_join_state(3);
    let mut replica_set = replica_set(&cluster, &SEEDS);

    let report = replica_set.ensure_joined(THIS_HOST, true).await.unwrap();

    let JoinAction::Reconfigured(change) = report.action else {
        panic!("expected a reconfiguration, got {:?}", report.action);
    };
    assert_eq!(
        change.wait,
        WaitOutcome::TimedOut {
            attempts: RECONFIG_ATTEMPTS,
            last_observed: Some(MemberState::Recovering)
        }
    );
    assert_eq!(report.state, MemberState::Recovering);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_reconfiguration_is_raised() {
    let cluster = MockCluster::new();
    running_group(&cluster);
    cluster.fail_next_reconfigs(usize::MAX);
    let mut replica_set = replica_set(&cluster, &SEEDS);

    let result = replica_set.ensure_joined(THIS_HOST, true).await;

    assert_matches!(
        result,
        Err(Error::ReconfigExhausted { attempts: RECONFIG_ATTEMPTS, .. })
    );
    assert_eq!(version(&cluster), 3);
}

#[tokio::test]
async fn test_initiate_is_idempotent() {
    let cluster = MockCluster::new();
    let mut replica_set = replica_set(&cluster, &[]);
    replica_set.connect().await.unwrap();

    assert_eq!(
        replica_set.initiate(true).await.unwrap(),
        InitiateOutcome::Initiated(None)
    );
    assert_eq!(
        replica_set.initiate(true).await.unwrap(),
        InitiateOutcome::AlreadyInitialized
    );
    assert_eq!(replica_set.group_name().await.unwrap().name(), Some("rs0"));
}

#[tokio::test]
async fn test_create_admin_user() {
    let cluster = MockCluster::new();
    let mut replica_set = replica_set(&cluster, &[]);
    replica_set.connect().await.unwrap();
    assert!(!replica_set.is_authenticated().await);

    replica_set.create_admin_user().await.unwrap();

    assert_eq!(cluster.admin_user().as_deref(), Some("admin"));
    let commands = cluster.commands_named("createUser");
    assert_eq!(commands[0].argument(), &json!("admin"));
    assert_eq!(commands[0].option("roles"), Some(&json!(ADMIN_ROLES)));

    replica_set.connect().await.unwrap();
    assert!(replica_set.is_authenticated().await);
}

#[tokio::test]
async fn test_cancelled_before_join() {
    let cluster = MockCluster::new();
    let mut replica_set = replica_set(&cluster, &SEEDS);
    replica_set.cancellation_token().cancel();

    assert_matches!(
        replica_set.ensure_joined(THIS_HOST, true).await,
        Err(Error::Cancelled)
    );
    assert!(cluster.connections().is_empty());
}

#[tokio::test]
async fn test_operations_require_connection() {
    let cluster = MockCluster::new();
    let replica_set = replica_set(&cluster, &[]);

    assert_matches!(replica_set.status().await, Err(Error::NotConnected));
    assert_matches!(replica_set.create_admin_user().await, Err(Error::NotConnected));

    // The connector itself is usable without a controller.
    assert!(
        cluster
            .connector()
            .connect(&["127.0.0.1:27017".to_string()], Default::default())
            .await
            .is_ok()
    );
}
