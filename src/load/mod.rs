//! Store load aggregation.
//!
//! Every heartbeat of a store is reduced to a `StatEntry` and appended to a bounded window of
//! recent entries for that store. After each append the store's load level is recomputed by the
//! installed `LoadClassifier`. Admission checks only ever read the last computed level.
//!
//! Per-store state lives in a `DashMap`, so collection for one store never contends with
//! collection or admission for stores in other shards.

mod classifier;
#[cfg(test)]
mod mod_test;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::models::{StoreId, StoreStats};

pub use classifier::{Breakpoints, LoadClassifier, ThresholdClassifier};

/// The default number of entries retained per store.
///
/// Stores heartbeat roughly every 10s, so this is about five minutes of history.
pub const DEFAULT_WINDOW_SIZE: usize = 30;
/// The default age after which an entry is dropped from the window.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(300);

/// A discrete classification of a store's current contention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Idle,
    Low,
    Normal,
    High,
}

impl LoadLevel {
    /// The numeric value of this level used for the load level gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Low => 1.0,
            Self::Normal => 2.0,
            Self::High => 3.0,
        }
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            Self::Idle => "idle",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        };
        f.write_str(val)
    }
}

/// The indicators derived from a single heartbeat.
///
/// The raw `StoreStats` is discarded once this has been built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatEntry {
    /// End of the reporting interval in unix seconds, if the store reported one.
    pub end_timestamp: Option<u64>,
    /// Summed CPU usage percentage over all reported threads.
    pub cpu_usage: f64,
    /// Snapshots being sent, received or applied.
    pub snapshot_backlog: u32,
    /// Ratio of available to total capacity.
    pub available_ratio: f64,
    /// Whether the store reported itself as busy.
    pub is_busy: bool,
}

impl From<&StoreStats> for StatEntry {
    fn from(stats: &StoreStats) -> Self {
        Self {
            end_timestamp: stats.interval.map(|interval| interval.end_timestamp),
            cpu_usage: stats.cpu_usage(),
            snapshot_backlog: stats.snapshot_backlog(),
            available_ratio: stats.available_ratio(),
            is_busy: stats.is_busy,
        }
    }
}

/// A bounded window of the most recent entries of a store.
#[derive(Clone, Debug)]
pub struct StatWindow {
    entries: VecDeque<StatEntry>,
    size: usize,
    stale_timeout: Duration,
}

impl StatWindow {
    /// Create a new window holding at most `size` entries.
    pub fn new(size: usize, stale_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            entries: VecDeque::with_capacity(size),
            size,
            stale_timeout,
        }
    }

    /// Append an entry, evicting the oldest entry when full and any entries gone stale.
    pub fn push(&mut self, entry: StatEntry) {
        if self.entries.len() == self.size {
            self.entries.pop_front();
        }
        let newest = entry.end_timestamp;
        self.entries.push_back(entry);
        if let Some(newest) = newest {
            let timeout = self.stale_timeout.as_secs();
            self.entries
                .retain(|entry| entry.end_timestamp.map(|ts| newest.saturating_sub(ts) <= timeout).unwrap_or(true));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent entry, if any.
    pub fn latest(&self) -> Option<&StatEntry> {
        self.entries.back()
    }

    /// Iterate over the retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StatEntry> {
        self.entries.iter()
    }

    /// The mean CPU usage over the window, zero when empty.
    pub fn cpu_usage(&self) -> f64 {
        self.mean(|entry| entry.cpu_usage)
    }

    fn mean(&self, f: impl Fn(&StatEntry) -> f64) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(f).sum::<f64>() / self.entries.len() as f64
    }
}

/// The load state of a single store.
#[derive(Clone, Debug)]
pub struct StoreLoadState {
    /// The number of samples ever collected for this store.
    pub total: u64,
    /// The recent entries of this store.
    pub window: StatWindow,
    /// The most recently computed load level.
    pub level: LoadLevel,
}

/// Aggregates heartbeats into a load level per store.
pub struct LoadAggregator {
    stores: DashMap<StoreId, StoreLoadState>,
    classifier: ArcSwap<Box<dyn LoadClassifier>>,
    window_size: usize,
    stale_timeout: Duration,
    total: AtomicU64,
}

impl LoadAggregator {
    /// Create a new instance.
    pub fn new(classifier: Box<dyn LoadClassifier>, window_size: usize, stale_timeout: Duration) -> Self {
        Self {
            stores: DashMap::new(),
            classifier: ArcSwap::from_pointee(classifier),
            window_size,
            stale_timeout,
            total: AtomicU64::new(0),
        }
    }

    /// Ingest one heartbeat for the given store, returning the previous and the new load level.
    ///
    /// The previous level is `None` on first contact with the store.
    pub fn collect(&self, store_id: StoreId, stats: &StoreStats) -> (Option<LoadLevel>, LoadLevel) {
        let entry = StatEntry::from(stats);
        let classifier = self.classifier.load();
        let mut state = self.stores.entry(store_id).or_insert_with(|| StoreLoadState {
            total: 0,
            window: StatWindow::new(self.window_size, self.stale_timeout),
            level: LoadLevel::High,
        });
        let previous = if state.total == 0 { None } else { Some(state.level) };

        state.total += 1;
        state.window.push(entry);
        let level = classifier.classify(&state.window, previous);
        state.level = level;
        drop(state);

        self.total.fetch_add(1, Ordering::Relaxed);
        (previous, level)
    }

    /// The last computed level of the given store.
    ///
    /// Stores which have never reported are treated as `High`.
    pub fn current_level(&self, store_id: StoreId) -> LoadLevel {
        self.stores.get(&store_id).map(|state| state.level).unwrap_or(LoadLevel::High)
    }

    /// The number of samples collected for the given store.
    pub fn total(&self, store_id: StoreId) -> u64 {
        self.stores.get(&store_id).map(|state| state.total).unwrap_or(0)
    }

    /// The number of samples collected across all stores.
    pub fn total_samples(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// A copy of the load state of the given store.
    pub fn state(&self, store_id: StoreId) -> Option<StoreLoadState> {
        self.stores.get(&store_id).map(|state| state.value().clone())
    }

    /// Install a new classifier, used from the next collected sample onward.
    pub fn replace_classifier(&self, classifier: Box<dyn LoadClassifier>) {
        self.classifier.store(Arc::new(classifier));
    }

    /// Drop all state of the given store, returning true if the store was known.
    pub fn remove(&self, store_id: StoreId) -> bool {
        self.stores.remove(&store_id).is_some()
    }
}
