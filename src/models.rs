//! Heartbeat data models consumed by the limiter.
//!
//! These mirror the store statistics reported by each storage node on every heartbeat. Transport
//! and encoding of these values are handled elsewhere; by the time a `StoreStats` value reaches
//! this crate it is a plain structured value.

use serde::{Deserialize, Serialize};

/// The stable identifier of a store in the cluster.
pub type StoreId = u64;

/// A half-open reporting interval, expressed in unix seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

/// A named sample, such as the CPU usage of a single thread.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPair {
    pub key: String,
    pub value: u64,
}

/// One heartbeat worth of statistics reported by a store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreStats {
    /// The ID of the reporting store.
    pub store_id: StoreId,
    /// Total capacity of the store in bytes.
    pub capacity: u64,
    /// Available capacity of the store in bytes.
    pub available: u64,
    /// Bytes used by data on the store.
    pub used_size: u64,
    /// Number of data ranges the store holds.
    pub region_count: u32,

    /// Snapshots currently being sent by the store.
    pub sending_snap_count: u32,
    /// Snapshots currently being received by the store.
    pub receiving_snap_count: u32,
    /// Snapshots currently being applied by the store.
    pub applying_snap_count: u32,
    /// Whether the store reports itself as too busy to take more work.
    pub is_busy: bool,

    /// Bytes written during the reporting interval.
    pub bytes_written: u64,
    /// Bytes read during the reporting interval.
    pub bytes_read: u64,
    /// Keys written during the reporting interval.
    pub keys_written: u64,
    /// Keys read during the reporting interval.
    pub keys_read: u64,

    /// The interval which this heartbeat covers.
    pub interval: Option<TimeInterval>,
    /// CPU usage percentage per thread over the interval.
    pub cpu_usages: Vec<RecordPair>,
}

impl StoreStats {
    /// The total snapshot backlog of the store.
    pub fn snapshot_backlog(&self) -> u32 {
        self.sending_snap_count
            .saturating_add(self.receiving_snap_count)
            .saturating_add(self.applying_snap_count)
    }

    /// The ratio of available to total capacity, `1.0` when no capacity is reported.
    pub fn available_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.available as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }

    /// The summed CPU usage of all reported threads.
    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usages.iter().map(|record| record.value as f64).sum()
    }
}
