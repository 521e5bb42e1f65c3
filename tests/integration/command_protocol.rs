//! Client command sessions over real sockets

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use vigil::Snapshot;
use vigil::protocol::{Command, ResponseCode};

use crate::helpers::*;

#[tokio::test]
async fn test_get_unknown_id() {
    let broker = TestBroker::start().await;
    let mut client = broker.client().await;

    let response = client.send("GET 42\n").await.unwrap();
    assert_eq!(response.code, ResponseCode::NotFound);
    assert!(response.body.is_empty());

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_list_two_monitors() {
    let broker = TestBroker::start().await;
    let a = register_monitor(broker.monitor_addr, 5001, &create_test_snapshot("a", 1.0)).await;
    let b = register_monitor(broker.monitor_addr, 5002, &create_test_snapshot("b", 2.0)).await;

    let mut client = broker.client().await;
    let response = client.send("LIST").await.unwrap();

    assert_eq!(response.code, ResponseCode::Ok);
    let ids: Vec<&str> = response.body.lines().collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(
        ids.into_iter().collect::<HashSet<_>>(),
        HashSet::from([a.as_str(), b.as_str()])
    );

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_get_returns_address_and_snapshot() {
    let broker = TestBroker::start().await;
    let snapshot = create_test_snapshot("alpha", 12.5);
    let id = register_monitor(broker.monitor_addr, 5001, &snapshot).await;

    let mut client = broker.client().await;
    let response = client.send(&format!("GET {id}")).await.unwrap();

    assert_eq!(response.code, ResponseCode::Ok);
    let lines: Vec<&str> = response.body.lines().collect();
    assert_eq!(lines[0], "127.0.0.1 5001");
    let received: Snapshot = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(received, snapshot);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_get_all_lists_every_monitor() {
    let broker = TestBroker::start().await;
    for port in 5001..5004 {
        register_monitor(
            broker.monitor_addr,
            port,
            &create_test_snapshot(&format!("host-{port}"), 1.0),
        )
        .await;
    }

    let mut client = broker.client().await;
    let response = client.send("get all").await.unwrap();

    assert_eq!(response.detail, "3 monitors");
    let lines: Vec<&str> = response.body.lines().collect();
    assert_eq!(lines.len(), 6);

    let mut hosts = vec![];
    for pair in lines.chunks(2) {
        let snapshot: Snapshot = serde_json::from_str(pair[1]).unwrap();
        hosts.push(snapshot.system.host_name.unwrap());
    }
    hosts.sort();
    assert_eq!(hosts, vec!["host-5001", "host-5002", "host-5003"]);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_update_of_refusing_monitor() {
    let broker = TestBroker::start().await;
    // nothing listens on the advertised port once the listener is dropped
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let id = register_monitor(broker.monitor_addr, port, &create_test_snapshot("a", 1.0)).await;

    let mut client = broker.client().await;
    let response = client.send(&format!("UPDATE {id}")).await.unwrap();

    assert_eq!(response.code, ResponseCode::Unreachable);
    // the session goes on
    assert_eq!(client.send("LIST").await.unwrap().code, ResponseCode::Ok);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_update_reaches_monitor_and_relays_answer() {
    let broker = TestBroker::start().await;

    let monitor = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = monitor.local_addr().unwrap().port();
    let fake_monitor = tokio::spawn(async move {
        let (stream, _) = monitor.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        stream
            .get_mut()
            .write_all(b"200 OK Update scheduled\n\n")
            .await
            .unwrap();
        line
    });

    let id = register_monitor(broker.monitor_addr, port, &create_test_snapshot("a", 1.0)).await;
    let mut client = broker.client().await;
    let response = client.send(&format!("UPDATE {id}")).await.unwrap();

    assert_eq!(response.code, ResponseCode::Ok);
    assert_eq!(response.detail, "Update scheduled");
    assert_eq!(fake_monitor.await.unwrap(), "update\n");

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_monitor_refusing_update_is_unreachable() {
    let broker = TestBroker::start().await;

    let monitor = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = monitor.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = monitor.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        stream
            .get_mut()
            .write_all(b"500 ERROR busy\n\n")
            .await
            .unwrap();
    });

    let id = register_monitor(broker.monitor_addr, port, &create_test_snapshot("a", 1.0)).await;
    let mut client = broker.client().await;
    let response = client.send(&format!("UPDATE {id}")).await.unwrap();

    assert_eq!(response.code, ResponseCode::Unreachable);
    assert!(response.detail.contains("500 ERROR busy"), "{}", response.detail);

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_malformed_commands_keep_session_open() {
    let broker = TestBroker::start().await;
    let mut client = broker.client().await;

    assert_eq!(
        client.send("DELETE everything").await.unwrap().code,
        ResponseCode::UnknownCommand
    );
    assert_eq!(client.send("UPDATE").await.unwrap().code, ResponseCode::BadMessage);
    assert_eq!(client.send("LIST now").await.unwrap().code, ResponseCode::BadMessage);

    let help = client.send("HELP").await.unwrap();
    assert_eq!(help.code, ResponseCode::Ok);
    assert_eq!(help.body, Command::USAGE);

    let bye = client.send("quit").await.unwrap();
    assert_eq!(bye.detail, "Bye");

    drop(client);
    broker.stop().await;
}
