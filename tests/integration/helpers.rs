//! Helper functions for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use vigil::{
    CpuOverview, LoadAverage, MemoryInformation, ProcessInformation, ProcessOverview, Snapshot,
    SystemInformation,
    broker::Broker,
    client::CommandClient,
    config::BrokerConfig,
    protocol::{Response, ResponseCodec, codec::next_response, frame},
    registry::Registry,
    snapshot::encode_snapshot,
};

/// Broker on loopback with OS-assigned ports, accepting any advertised port
pub fn local_config() -> BrokerConfig {
    BrokerConfig {
        listen_ip: "127.0.0.1".parse().unwrap(),
        monitor_port: 0,
        command_port: 0,
        max_monitor_port: u16::MAX,
        ..Default::default()
    }
}

pub struct TestBroker {
    pub monitor_addr: SocketAddr,
    pub command_addr: SocketAddr,
    pub registry: Arc<Registry<Snapshot>>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::start_with(local_config()).await
    }

    pub async fn start_with(config: BrokerConfig) -> Self {
        let broker = Broker::bind(config).await.unwrap();
        let monitor_addr = broker.monitor_addr().unwrap();
        let command_addr = broker.command_addr().unwrap();
        let registry = broker.registry();

        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(broker.run(async {
            let _ = stop_rx.await;
        }));

        Self {
            monitor_addr,
            command_addr,
            registry,
            stop,
            task,
        }
    }

    pub async fn client(&self) -> CommandClient {
        CommandClient::connect(self.command_addr, Duration::from_secs(5))
            .await
            .unwrap()
    }

    /// Request shutdown and wait until the broker returned.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("broker did not stop in time")
            .unwrap()
            .unwrap();
    }
}

/// Connection on the monitor port, driven message by message
pub struct MonitorConnection {
    stream: Framed<TcpStream, ResponseCodec>,
}

impl MonitorConnection {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: Framed::new(TcpStream::connect(addr).await.unwrap(), ResponseCodec::new()),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Response {
        self.stream.send(bytes).await.unwrap();
        next_response(&mut self.stream).await.unwrap()
    }

    /// Everything the broker sends until it closes the connection
    pub async fn read_rest(self) -> String {
        let mut rest = String::from_utf8(self.stream.read_buffer().to_vec()).unwrap();
        self.stream.into_inner().read_to_string(&mut rest).await.unwrap();
        rest
    }
}

/// Send `bytes`, close our side, return everything the broker answered.
pub async fn monitor_exchange(addr: SocketAddr, bytes: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut output = String::new();
    stream.read_to_string(&mut output).await.unwrap();
    output
}

/// Register a monitor advertising `port` and push `snapshot`; returns its id.
pub async fn register_monitor(addr: SocketAddr, port: u16, snapshot: &Snapshot) -> String {
    let mut connection = MonitorConnection::connect(addr).await;

    let handshake = connection.send(format!("\x07 {port}\x03").as_bytes()).await;
    assert!(handshake.is_ok(), "{handshake:?}");
    let id = handshake.detail.split_whitespace().next().unwrap().to_string();

    let ack = connection.send(&snapshot_payload(snapshot)).await;
    assert!(ack.is_ok(), "{ack:?}");
    id
}

pub fn snapshot_payload(snapshot: &Snapshot) -> Vec<u8> {
    frame::encode_payload(encode_snapshot(snapshot).unwrap().as_bytes()).unwrap()
}

pub fn create_test_snapshot(host: &str, cpu_usage: f32) -> Snapshot {
    Snapshot {
        taken_at: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        system: SystemInformation {
            name: Some("TestOS".to_string()),
            kernel_version: Some("6.1.0".to_string()),
            os_version: Some("Test 1.0".to_string()),
            host_name: Some(host.to_string()),
        },
        memory: MemoryInformation {
            total: 16_000_000_000,
            available: 8_000_000_000,
            used: 8_000_000_000,
            free: 4_000_000_000,
            total_swap: 4_000_000_000,
            used_swap: 1_000_000_000,
            free_swap: 3_000_000_000,
        },
        cpus: CpuOverview {
            total: 1,
            arch: "x86_64".to_string(),
            average_usage: cpu_usage,
            usage: vec![cpu_usage],
            load_average: LoadAverage {
                one: 1.0,
                five: 0.5,
                fifteen: 0.25,
            },
        },
        processes: ProcessOverview {
            running: vec![ProcessInformation {
                pid: 1,
                name: "init".to_string(),
            }],
            started: vec![],
            finished: vec![],
        },
    }
}
