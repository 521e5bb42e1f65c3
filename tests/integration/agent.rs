//! Monitor agent against a running broker

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::oneshot;
use vigil::Snapshot;
use vigil::agent::{MonitorAgent, SnapshotSource};
use vigil::config::MonitorConfig;
use vigil::protocol::ResponseCode;

use crate::helpers::*;

/// Reports a growing counter as CPU usage, so each push is distinguishable
struct CountingSource(u32);

impl SnapshotSource for CountingSource {
    fn collect(&mut self) -> Snapshot {
        self.0 += 1;
        create_test_snapshot("agent", self.0 as f32)
    }
}

async fn usage_of(broker: &TestBroker, id: &str) -> f32 {
    broker
        .registry
        .get(id)
        .unwrap()
        .snapshot
        .map(|s| s.cpus.average_usage)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_agent_registers_and_answers_update_requests() {
    let broker = TestBroker::start().await;

    let config = MonitorConfig {
        broker: "127.0.0.1".to_string(),
        broker_port: broker.monitor_addr.port(),
        listen_port: 0,
        interval: 3600,
        connection_timeout: Duration::from_secs(3),
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let agent = tokio::spawn(MonitorAgent::new(config, CountingSource(0)).run(async {
        let _ = stop_rx.await;
    }));

    // first push happens right away
    let id = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(id) = broker.registry.list().pop() {
                if broker.registry.get(&id).unwrap().snapshot.is_some() {
                    return id;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    let before = usage_of(&broker, &id).await;

    let mut client = broker.client().await;
    let response = client.send(&format!("UPDATE {id}")).await.unwrap();
    assert_eq!(response.code, ResponseCode::Ok);
    assert_eq!(response.detail, "Update scheduled");

    // the requested push arrives well before the next interval
    tokio::time::timeout(Duration::from_secs(5), async {
        while usage_of(&broker, &id).await <= before {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    stop_tx.send(()).unwrap();
    agent.await.unwrap().unwrap();
    drop(client);
    broker.stop().await;
}
