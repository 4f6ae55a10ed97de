use std::time::Duration;

use proven_datastore_mock::MockCluster;
use proven_replica_set::{ReplicaSet, ReplicaSetOptions, RetryPolicy, SecurityData, Timings};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for better logging
    tracing_subscriber::fmt::init();

    // Simulate a running group where one member has died
    let cluster = MockCluster::new();
    cluster.install_config(json!({
        "_id": "rs0",
        "version": 3,
        "members": [
            {"_id": 0, "host": "10.0.0.1:27017"},
            {"_id": 1, "host": "10.0.0.2:27017"}
        ]
    }));
    cluster.set_admin_user("admin", "secret");
    cluster.set_member_state("10.0.0.2:27017", 8, 0);
    cluster.make_reachable(["10.0.0.1:27017"]);

    let security = SecurityData {
        admin_user: "admin".to_string(),
        admin_password: "secret".to_string(),
    };
    let options = ReplicaSetOptions::new(
        "rs0",
        "rs0",
        security,
        vec!["10.0.0.1:27017".to_string(), "10.0.0.2:27017".to_string()],
    )
    .with_timings(Timings {
        connect: RetryPolicy::new(3, Duration::from_secs(1)),
        ..Timings::default()
    });

    let mut replica_set = ReplicaSet::new(cluster.connector(), options, "10.0.0.3:27017");

    // Abort pending waits on Ctrl+C
    let cancellation = replica_set.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });

    let host_key = replica_set.this_host_key().to_string();
    let report = replica_set.ensure_joined(&host_key, true).await?;

    println!("Join finished: {:?}", report.action);
    println!("{} is now {}", host_key, report.state);
    println!("Members: {:?}", replica_set.member_names().await?);

    replica_set.disconnect().await;

    Ok(())
}
