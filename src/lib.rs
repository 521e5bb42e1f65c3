#[cfg(feature = "agent")]
pub mod agent;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod live_set;
pub mod multicast;
pub mod protocol;
pub mod registry;
pub mod snapshot;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one machine at one point in time, as pushed by a monitor.
///
/// The broker stores and forwards snapshots without looking inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub system: SystemInformation,
    pub memory: MemoryInformation,
    pub cpus: CpuOverview,
    pub processes: ProcessOverview,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInformation {
    pub name: Option<String>,
    pub kernel_version: Option<String>,
    pub os_version: Option<String>,
    pub host_name: Option<String>,
}

/// Memory figures in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInformation {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub free_swap: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuOverview {
    pub total: usize,
    pub arch: String,
    pub average_usage: f32,
    pub usage: Vec<f32>,
    pub load_average: LoadAverage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOverview {
    pub running: Vec<ProcessInformation>,
    /// Started since the previous snapshot of the same monitor
    pub started: Vec<ProcessInformation>,
    /// Finished since the previous snapshot of the same monitor
    pub finished: Vec<ProcessInformation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessInformation {
    pub pid: u32,
    pub name: String,
}
