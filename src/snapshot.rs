//! Wire encoding of snapshots and, with the `agent` feature, their collection
//!
//! Snapshots travel as compact JSON. JSON escapes every control character
//! inside strings, so an encoded snapshot never contains the frame delimiters
//! of the monitor protocol nor a newline.

use crate::Snapshot;
use crate::error::{BrokerError, BrokerResult};

pub fn encode_snapshot(snapshot: &Snapshot) -> BrokerResult<String> {
    serde_json::to_string(snapshot)
        .map_err(|e| BrokerError::Internal(format!("failed to encode snapshot: {e}")))
}

/// Encoding used in responses for "registered but never updated".
pub fn encode_optional_snapshot(snapshot: Option<&Snapshot>) -> BrokerResult<String> {
    match snapshot {
        Some(snapshot) => encode_snapshot(snapshot),
        None => Ok("null".to_string()),
    }
}

pub fn decode_snapshot(bytes: &[u8]) -> BrokerResult<Snapshot> {
    serde_json::from_slice(bytes)
        .map_err(|e| BrokerError::Internal(format!("failed to parse snapshot: {e}")))
}

#[cfg(feature = "agent")]
pub use collector::SnapshotCollector;

#[cfg(feature = "agent")]
mod collector {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use sysinfo::System;
    use tracing::trace;

    use crate::{
        CpuOverview, LoadAverage, MemoryInformation, ProcessInformation, ProcessOverview,
        Snapshot, SystemInformation,
    };

    /// Collects snapshots of the local machine.
    ///
    /// Keeps the process list of the previous collection to report which
    /// processes started or finished in between.
    pub struct SnapshotCollector {
        sys: System,
        previous: Option<BTreeSet<ProcessInformation>>,
    }

    impl Default for SnapshotCollector {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SnapshotCollector {
        pub fn new() -> Self {
            Self {
                sys: System::new_all(),
                previous: None,
            }
        }

        /// Blocks for the minimum CPU sampling interval, call from a blocking context.
        pub fn collect(&mut self) -> Snapshot {
            self.sys.refresh_all();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            self.sys.refresh_all();

            let sys = &self.sys;
            let cpus = sys.cpus();
            let usage: Vec<f32> = cpus.iter().map(|cpu| cpu.cpu_usage()).collect();
            let average_usage = if usage.is_empty() {
                0.0
            } else {
                usage.iter().sum::<f32>() / usage.len() as f32
            };
            let load = System::load_average();

            let running: BTreeSet<ProcessInformation> = sys
                .processes()
                .iter()
                .map(|(pid, process)| ProcessInformation {
                    pid: pid.as_u32(),
                    name: process.name().to_string_lossy().into_owned(),
                })
                .collect();

            let (started, finished) = match &self.previous {
                Some(previous) => (
                    running.difference(previous).cloned().collect(),
                    previous.difference(&running).cloned().collect(),
                ),
                None => (vec![], vec![]),
            };

            trace!(
                "collected {} processes ({} started, {} finished)",
                running.len(),
                started.len(),
                finished.len()
            );

            let snapshot = Snapshot {
                taken_at: Utc::now(),
                system: SystemInformation {
                    name: System::name(),
                    kernel_version: System::kernel_version(),
                    os_version: System::os_version(),
                    host_name: System::host_name(),
                },
                memory: MemoryInformation {
                    total: sys.total_memory(),
                    available: sys.available_memory(),
                    used: sys.used_memory(),
                    free: sys.free_memory(),
                    total_swap: sys.total_swap(),
                    used_swap: sys.used_swap(),
                    free_swap: sys.free_swap(),
                },
                cpus: CpuOverview {
                    total: cpus.len(),
                    arch: System::cpu_arch(),
                    average_usage,
                    usage,
                    load_average: LoadAverage {
                        one: load.one,
                        five: load.five,
                        fifteen: load.fifteen,
                    },
                },
                processes: ProcessOverview {
                    running: running.iter().cloned().collect(),
                    started,
                    finished,
                },
            };

            self.previous = Some(running);
            snapshot
        }
    }
}
