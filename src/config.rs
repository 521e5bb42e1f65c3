use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::trace;

use crate::error::ConfigError;
use crate::util;

/// Lowest multicast group a broker may announce
pub const MIN_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 0, 0);

/// Highest multicast group a broker may announce
pub const MAX_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 255);

/// The garbage collector runs at least this often, however long the TTL is
pub const MAX_GC_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable broker options, validated once at startup
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,

    #[serde(default = "default_monitor_port")]
    pub monitor_port: u16,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Bound for every socket operation, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: f64,

    /// Listen backlog of both TCP sockets
    #[serde(default = "default_connection_queue_size")]
    pub connection_queue_size: u32,

    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,

    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,

    /// Registry TTL in seconds
    #[serde(default = "default_data_life_time")]
    pub data_life_time: f64,

    /// Lowest port a monitor may advertise
    #[serde(default = "default_min_monitor_port")]
    pub min_monitor_port: u16,

    /// Highest port a monitor may advertise
    #[serde(default = "default_max_monitor_port")]
    pub max_monitor_port: u16,

    #[serde(default)]
    pub debug: bool,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_listen_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_monitor_port() -> u16 {
    6666
}

fn default_command_port() -> u16 {
    6665
}

fn default_connection_timeout() -> f64 {
    3.0
}

fn default_connection_queue_size() -> u32 {
    100
}

fn default_multicast_group() -> Ipv4Addr {
    Ipv4Addr::new(227, 12, 34, 56)
}

fn default_multicast_port() -> u16 {
    7777
}

fn default_multicast_ttl() -> u32 {
    16
}

fn default_data_life_time() -> f64 {
    10.0
}

fn default_min_monitor_port() -> u16 {
    512
}

fn default_max_monitor_port() -> u16 {
    49152
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            monitor_port: default_monitor_port(),
            command_port: default_command_port(),
            connection_timeout: default_connection_timeout(),
            connection_queue_size: default_connection_queue_size(),
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            multicast_ttl: default_multicast_ttl(),
            data_life_time: default_data_life_time(),
            min_monitor_port: default_min_monitor_port(),
            max_monitor_port: default_max_monitor_port(),
            debug: false,
            log_file: None,
        }
    }
}

impl BrokerConfig {
    /// Check the startup invariants. Any violation is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.connection_timeout.is_finite() || self.connection_timeout <= 0.0 {
            return Err(ConfigError::InvalidTimeout(self.connection_timeout));
        }

        for (name, seconds) in [
            ("connection_timeout", self.connection_timeout),
            ("data_life_time", self.data_life_time),
        ] {
            if Duration::try_from_secs_f64(seconds).is_err() {
                return Err(ConfigError::DurationOutOfRange { name, seconds });
            }
        }

        // a monitor must not be evicted mid handshake because of ordinary latency
        if self.data_life_time < 2.0 * self.connection_timeout {
            return Err(ConfigError::LifeTimeTooShort {
                data_life_time: self.data_life_time,
                connection_timeout: self.connection_timeout,
            });
        }

        if self.multicast_group < MIN_MULTICAST_GROUP || self.multicast_group > MAX_MULTICAST_GROUP
        {
            return Err(ConfigError::MulticastGroupOutOfRange {
                group: self.multicast_group,
                min: MIN_MULTICAST_GROUP,
                max: MAX_MULTICAST_GROUP,
            });
        }

        if self.min_monitor_port > self.max_monitor_port {
            return Err(ConfigError::EmptyPortRange {
                min: self.min_monitor_port,
                max: self.max_monitor_port,
            });
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout)
    }

    pub fn data_life_time(&self) -> Duration {
        Duration::from_secs_f64(self.data_life_time)
    }

    /// `min(ttl / 2, MAX_GC_INTERVAL)`
    pub fn gc_interval(&self) -> Duration {
        (self.data_life_time() / 2).min(MAX_GC_INTERVAL)
    }

    pub fn monitor_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.monitor_port)
    }

    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.command_port)
    }

    pub fn multicast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.multicast_group), self.multicast_port)
    }

    pub fn monitor_ports(&self) -> RangeInclusive<u16> {
        self.min_monitor_port..=self.max_monitor_port
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<BrokerConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| ConfigError::InvalidFile(e.to_string()).into())
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Command line of the broker. Explicit flags override the config file.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "vigil-broker", version)]
#[command(about = "Collects machine snapshots from monitors and serves them to clients")]
pub struct BrokerArgs {
    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    pub listen_ip: Option<IpAddr>,

    /// Port monitors connect to
    #[arg(long)]
    pub monitor_port: Option<u16>,

    /// Port clients connect to
    #[arg(long)]
    pub command_port: Option<u16>,

    /// Socket timeout in seconds
    #[arg(long)]
    pub connection_timeout: Option<f64>,

    /// Listen backlog
    #[arg(long)]
    pub connection_queue_size: Option<u32>,

    /// Multicast group used to ask every monitor for an update
    #[arg(long)]
    pub multicast_group: Option<Ipv4Addr>,

    #[arg(long)]
    pub multicast_port: Option<u16>,

    /// TTL of multicast datagrams
    #[arg(long)]
    pub multicast_ttl: Option<u32>,

    /// Seconds a monitor's data is kept without news from it
    #[arg(long)]
    pub data_life_time: Option<f64>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log at DEBUG level
    #[arg(short, long)]
    pub debug: bool,
}

impl BrokerArgs {
    /// Resolve the effective configuration and validate it.
    pub fn into_config(self) -> anyhow::Result<BrokerConfig> {
        let mut config = match &self.file {
            Some(path) => read_config_file(path)?,
            None => BrokerConfig::default(),
        };

        if let Some(ip) = self.listen_ip {
            config.listen_ip = ip;
        }
        if let Some(port) = self.monitor_port {
            config.monitor_port = port;
        }
        if let Some(port) = self.command_port {
            config.command_port = port;
        }
        if let Some(timeout) = self.connection_timeout {
            config.connection_timeout = timeout;
        }
        if let Some(size) = self.connection_queue_size {
            config.connection_queue_size = size;
        }
        if let Some(group) = self.multicast_group {
            config.multicast_group = group;
        }
        if let Some(port) = self.multicast_port {
            config.multicast_port = port;
        }
        if let Some(ttl) = self.multicast_ttl {
            config.multicast_ttl = ttl;
        }
        if let Some(life_time) = self.data_life_time {
            config.data_life_time = life_time;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

/// Settings of a monitor agent
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Broker host name or ip
    pub broker: String,
    pub broker_port: u16,
    /// Port the agent listens on for direct update requests
    pub listen_port: u16,
    /// Seconds between two unsolicited pushes
    pub interval: u64,
    pub connection_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            broker: util::get_broker(),
            broker_port: util::get_broker_port(),
            listen_port: util::get_listen_port(),
            interval: util::DEFAULT_PUSH_INTERVAL,
            connection_timeout: Duration::from_secs_f64(default_connection_timeout()),
        }
    }
}
