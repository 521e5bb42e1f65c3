//! Monitor protocol over real sockets
//!
//! - handshake and first snapshot on one connection
//! - later updates on fresh connections
//! - refused messages are answered with their code before the broker hangs up

use std::net::{IpAddr, Ipv4Addr};

use pretty_assertions::assert_eq;
use vigil::protocol::{MonitorHeader, ResponseCode};
use vigil::registry::monitor_id;

use crate::helpers::*;

#[tokio::test]
async fn test_handshake_answers_id_and_multicast_group() {
    let broker = TestBroker::start().await;
    let mut connection = MonitorConnection::connect(broker.monitor_addr).await;

    let handshake = connection.send(b"\x07 5001\x03").await;

    let id = monitor_id(IpAddr::V4(Ipv4Addr::LOCALHOST), 5001);
    assert_eq!(handshake.code, ResponseCode::Ok);
    assert_eq!(handshake.detail, format!("{id} 227.12.34.56 7777"));
    assert!(broker.registry.exists(&id));
    assert!(broker.registry.get(&id).unwrap().snapshot.is_none());

    let ack = connection
        .send(&snapshot_payload(&create_test_snapshot("alpha", 10.0)))
        .await;
    assert_eq!(ack.detail, "Update successful");
    assert_eq!(connection.read_rest().await, "");

    broker.stop().await;
}

#[tokio::test]
async fn test_update_replaces_snapshot() {
    let broker = TestBroker::start().await;
    let id = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("alpha", 10.0)).await;

    let newer = create_test_snapshot("alpha", 90.0);
    let mut message = MonitorHeader::Update { id: id.clone() }.encode();
    message.extend(snapshot_payload(&newer));

    let output = monitor_exchange(broker.monitor_addr, &message).await;
    assert_eq!(output, "200 OK Update successful\n\n");

    let view = broker.registry.get(&id).unwrap();
    assert_eq!(view.snapshot.as_deref(), Some(&newer));

    broker.stop().await;
}

#[tokio::test]
async fn test_update_with_unknown_id() {
    let broker = TestBroker::start().await;

    let mut message = MonitorHeader::Update {
        id: "0000".to_string(),
    }
    .encode();
    message.extend(snapshot_payload(&create_test_snapshot("alpha", 10.0)));

    let output = monitor_exchange(broker.monitor_addr, &message).await;
    assert!(output.starts_with("501 NOT_FOUND"), "{output}");
    assert!(output.ends_with("\n\n"), "{output}");
    assert!(broker.registry.is_empty());

    broker.stop().await;
}

#[tokio::test]
async fn test_handshake_with_invalid_port() {
    let broker = TestBroker::start_with(vigil::config::BrokerConfig {
        max_monitor_port: 49152,
        ..local_config()
    })
    .await;

    for port in ["80", "60000", "http"] {
        let output = monitor_exchange(broker.monitor_addr, format!("\x07 {port}\x03").as_bytes()).await;
        assert!(output.starts_with("503 BAD_MESSAGE"), "{port}: {output}");
    }
    assert!(broker.registry.is_empty());

    broker.stop().await;
}

#[tokio::test]
async fn test_unknown_header_byte() {
    let broker = TestBroker::start().await;

    let output = monitor_exchange(broker.monitor_addr, b"GET ALL\n\x03").await;
    assert!(output.starts_with("503 BAD_MESSAGE"), "{output}");

    broker.stop().await;
}

#[tokio::test]
async fn test_snapshot_that_does_not_decode() {
    let broker = TestBroker::start().await;
    let id = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("alpha", 10.0)).await;

    let mut message = MonitorHeader::Update { id: id.clone() }.encode();
    message.extend(b"{\"not\": \"a snapshot\"}\x03");

    let output = monitor_exchange(broker.monitor_addr, &message).await;
    assert!(output.starts_with("500 ERROR"), "{output}");

    // the previous snapshot is untouched
    let view = broker.registry.get(&id).unwrap();
    assert_eq!(view.snapshot.as_deref(), Some(&create_test_snapshot("alpha", 10.0)));

    broker.stop().await;
}

#[tokio::test]
async fn test_connection_closed_mid_frame() {
    let broker = TestBroker::start().await;
    let id = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("alpha", 10.0)).await;

    let mut message = MonitorHeader::Update { id }.encode();
    message.extend(b"{\"taken_at\":");

    let output = monitor_exchange(broker.monitor_addr, &message).await;
    assert!(output.starts_with("503 BAD_MESSAGE"), "{output}");

    broker.stop().await;
}

#[tokio::test]
async fn test_silent_connection_gets_no_answer() {
    let broker = TestBroker::start().await;

    let output = monitor_exchange(broker.monitor_addr, b"").await;
    assert_eq!(output, "");

    broker.stop().await;
}
