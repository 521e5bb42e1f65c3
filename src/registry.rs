//! In-memory registry of monitors
//!
//! Maps a monitor id to the monitor's address and its last pushed snapshot.
//! Entries are never persisted; a broker restart forgets every monitor and
//! monitors re-handshake on their own schedule.
//!
//! ## Locking
//!
//! Two tiers of `RwLock`:
//!
//! - **structural**: guards insertion, removal and iteration of the map
//! - **content**: one per record, guards `snapshot` and `last_seen`
//!
//! The structural lock is always released before a content lock is taken, so
//! the two tiers can never deadlock against each other.
//!
//! ## Eviction
//!
//! Eviction marks stale records as evicted under their content lock before
//! unlinking them. An `update` racing the sweep either observes the mark and
//! fails with `NotFound`, or refreshes `last_seen` first so the sweep skips it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{BrokerError, BrokerResult};

/// Derive the id of the monitor reachable at `ip:port`.
///
/// Lowercase hex SHA-256 of the textual ip followed by the decimal port.
pub fn monitor_id(ip: IpAddr, port: u16) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.to_string().as_bytes());
    hasher.update(port.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
struct RecordState<S> {
    snapshot: Option<Arc<S>>,
    last_seen: Instant,
}

#[derive(Debug)]
struct MonitorRecord<S> {
    ip: IpAddr,
    port: u16,
    state: RwLock<RecordState<S>>,
    /// Set under the write lock of `state`, readable without it
    evicted: AtomicBool,
}

impl<S> MonitorRecord<S> {
    fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            state: RwLock::new(RecordState {
                snapshot: None,
                last_seen: Instant::now(),
            }),
            evicted: AtomicBool::new(false),
        }
    }

    fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}

/// Consistent copy of one registry entry
#[derive(Debug, Clone)]
pub struct MonitorView<S> {
    pub id: String,
    pub ip: IpAddr,
    pub port: u16,
    /// `None` until the monitor pushed its first snapshot
    pub snapshot: Option<Arc<S>>,
    pub last_seen: Instant,
}

#[derive(Debug)]
pub struct Registry<S> {
    entries: RwLock<HashMap<String, Arc<MonitorRecord<S>>>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Live record for `id`; the structural lock is released on return.
    fn record(&self, id: &str) -> BrokerResult<Arc<MonitorRecord<S>>> {
        let entries = self.entries.read();
        entries
            .get(id)
            .filter(|record| !record.is_evicted())
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))
    }

    /// Register the monitor reachable at `ip:port` and return its id.
    ///
    /// Registering a known monitor again only refreshes its `last_seen`.
    pub fn register(&self, ip: IpAddr, port: u16) -> String {
        let id = monitor_id(ip, port);

        loop {
            let record = {
                let mut entries = self.entries.write();
                match entries.get(&id) {
                    Some(record) if !record.is_evicted() => record.clone(),
                    _ => {
                        entries.insert(id.clone(), Arc::new(MonitorRecord::new(ip, port)));
                        debug!("registered new monitor {id} ({ip}:{port})");
                        return id;
                    }
                }
            };

            // an eviction may win between the two locks, then the record is replaced
            if Self::touch(&record) {
                trace!("monitor {id} registered again");
                return id;
            }
        }
    }

    /// Replace the snapshot of `id` and refresh its `last_seen`.
    pub fn update(&self, id: &str, snapshot: S) -> BrokerResult<()> {
        let record = self.record(id)?;

        let mut state = record.state.write();
        if record.is_evicted() {
            return Err(BrokerError::NotFound(id.to_string()));
        }
        state.snapshot = Some(Arc::new(snapshot));
        state.last_seen = Instant::now();

        Ok(())
    }

    pub fn get(&self, id: &str) -> BrokerResult<MonitorView<S>> {
        let record = self.record(id)?;
        Self::view(id, &record).ok_or_else(|| BrokerError::NotFound(id.to_string()))
    }

    /// Views of every live record.
    ///
    /// The map is only locked while collecting record references; each
    /// record is then read under its own lock.
    pub fn get_all(&self) -> Vec<MonitorView<S>> {
        let records: Vec<(String, Arc<MonitorRecord<S>>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect()
        };

        records
            .iter()
            .filter_map(|(id, record)| Self::view(id, record))
            .collect()
    }

    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, record)| !record.is_evicted())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Refresh `last_seen` of `id` without touching its snapshot.
    pub fn keep_alive(&self, id: &str) -> BrokerResult<()> {
        let record = self.record(id)?;
        if Self::touch(&record) {
            Ok(())
        } else {
            Err(BrokerError::NotFound(id.to_string()))
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.record(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record not seen for more than `max_age`.
    ///
    /// Returns the number of evicted monitors.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let candidates: Vec<(String, Arc<MonitorRecord<S>>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect()
        };

        let now = Instant::now();
        let stale: Vec<(String, Arc<MonitorRecord<S>>)> = candidates
            .into_iter()
            .filter(|(_, record)| {
                let state = record.state.write();
                if record.is_evicted() {
                    return true;
                }
                let expired = now.saturating_duration_since(state.last_seen) > max_age;
                if expired {
                    record.evicted.store(true, Ordering::Release);
                }
                expired
            })
            .collect();

        if stale.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        {
            let mut entries = self.entries.write();
            for (id, record) in &stale {
                // the id may have been registered again with a fresh record
                if entries
                    .get(id)
                    .is_some_and(|current| Arc::ptr_eq(current, record))
                {
                    entries.remove(id);
                    evicted += 1;
                }
            }
        }

        debug!("evicted {evicted} monitors older than {max_age:?}");
        evicted
    }

    fn touch(record: &MonitorRecord<S>) -> bool {
        let mut state = record.state.write();
        if record.is_evicted() {
            return false;
        }
        state.last_seen = Instant::now();
        true
    }

    fn view(id: &str, record: &MonitorRecord<S>) -> Option<MonitorView<S>> {
        let state = record.state.read();
        if record.is_evicted() {
            return None;
        }
        Some(MonitorView {
            id: id.to_string(),
            ip: record.ip,
            port: record.port,
            snapshot: state.snapshot.clone(),
            last_seen: state.last_seen,
        })
    }
}
