//! Eviction of monitors that stopped reporting

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use vigil::Snapshot;
use vigil::broker::GcHandle;
use vigil::config::BrokerConfig;
use vigil::protocol::ResponseCode;
use vigil::registry::Registry;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_silent_monitor_is_gone_after_ttl_and_one_interval() {
    let config = BrokerConfig {
        data_life_time: 10.0,
        connection_timeout: 3.0,
        ..Default::default()
    };
    config.validate().unwrap();

    let registry = Arc::new(Registry::<Snapshot>::new());
    let gc = GcHandle::spawn(registry.clone(), config.data_life_time(), config.gc_interval());
    let id = registry.register(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5001);

    tokio::time::sleep(Duration::from_millis(9_900)).await;
    assert_eq!(registry.list(), vec![id.clone()]);

    tokio::time::sleep(Duration::from_millis(6_100)).await;
    assert!(registry.list().is_empty());

    gc.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broker_forgets_silent_monitor() {
    let broker = TestBroker::start_with(BrokerConfig {
        connection_timeout: 0.2,
        data_life_time: 0.4,
        ..local_config()
    })
    .await;

    let id = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("a", 1.0)).await;
    assert!(broker.registry.exists(&id));

    // ttl + gc interval, with a margin
    tokio::time::sleep(Duration::from_millis(900)).await;

    let mut client = broker.client().await;
    let response = client.send(&format!("GET {id}")).await.unwrap();
    assert_eq!(response.code, ResponseCode::NotFound);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_reporting_monitor_survives() {
    let broker = TestBroker::start_with(BrokerConfig {
        connection_timeout: 0.2,
        data_life_time: 0.4,
        ..local_config()
    })
    .await;

    let snapshot = create_test_snapshot("a", 1.0);
    let id = register_monitor(broker.monitor_addr, 5001, &snapshot).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut message = vigil::protocol::MonitorHeader::Update { id: id.clone() }.encode();
        message.extend(snapshot_payload(&snapshot));
        let output = monitor_exchange(broker.monitor_addr, &message).await;
        assert_eq!(output, "200 OK Update successful\n\n");
    }

    assert!(broker.registry.exists(&id));
    broker.stop().await;
}
