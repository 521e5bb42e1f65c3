//! Concurrency tests
//!
//! - many monitors pushing at once
//! - clients reading while monitors write
//! - shutdown waits for sessions still in progress

use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use vigil::Snapshot;
use vigil::protocol::{MonitorHeader, ResponseCode};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations() {
    let broker = TestBroker::start().await;

    let addr = broker.monitor_addr;
    let registrations = (6000..6032u16).map(|port| async move {
        let snapshot = create_test_snapshot(&format!("host-{port}"), 1.0);
        register_monitor(addr, port, &snapshot).await
    });
    let mut ids = join_all(registrations).await;
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 32);
    assert_eq!(broker.registry.len(), 32);

    broker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_only_see_complete_snapshots() {
    let broker = TestBroker::start().await;
    let id = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("h", 0.0)).await;

    let writer = {
        let addr = broker.monitor_addr;
        let id = id.clone();
        tokio::spawn(async move {
            for i in 1..=50 {
                let mut message = MonitorHeader::Update { id: id.clone() }.encode();
                message.extend(snapshot_payload(&create_test_snapshot("h", i as f32)));
                monitor_exchange(addr, &message).await;
            }
        })
    };

    let mut client = broker.client().await;
    while !writer.is_finished() {
        let response = client.send(&format!("GET {id}")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Ok);

        let snapshot: Snapshot = serde_json::from_str(response.body.lines().nth(1).unwrap()).unwrap();
        // every field of one push agrees with the others
        assert_eq!(snapshot.cpus.usage, vec![snapshot.cpus.average_usage]);
    }
    writer.await.unwrap();

    let response = client.send(&format!("GET {id}")).await.unwrap();
    let last: Snapshot = serde_json::from_str(response.body.lines().nth(1).unwrap()).unwrap();
    assert_eq!(last.cpus.average_usage, 50.0);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_open_sessions() {
    let broker = TestBroker::start().await;
    let mut client = broker.client().await;
    assert_eq!(client.send("LIST").await.unwrap().code, ResponseCode::Ok);

    let stopping = tokio::spawn(broker.stop());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());

    // the session is still served after shutdown started
    assert_eq!(client.send("LIST").await.unwrap().code, ResponseCode::Ok);
    assert_eq!(client.send("QUIT").await.unwrap().detail, "Bye");

    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .unwrap()
        .unwrap();
}
