//! Store limiter.
//!
//! The limiter decides whether a new peer operation may be dispatched to a store right now. The
//! decision is a plain ceiling check: the ceiling comes from the active scene of the operation
//! kind at the store's current load level, and the operation is admitted when fewer than that
//! many operations of the same kind are in flight on the store.
//!
//! Adaptivity comes entirely from `collect`, which recomputes a store's load level on every
//! heartbeat. A level change only affects future admissions; operations already admitted are
//! never evicted, so the in-flight count may transiently exceed a lowered ceiling and will
//! settle as those operations are released.
//!
//! The limiter never blocks. Callers wanting to queue or back off build that on top of
//! `try_acquire`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::load::{LoadAggregator, LoadClassifier, LoadLevel, StoreLoadState};
use crate::models::{StoreId, StoreStats};
use crate::scene::{OperationKind, Scene, SceneRegistry};

pub(crate) const METRIC_ADMISSIONS: &str = "hadron_storelimit_admissions_total";
pub(crate) const METRIC_DENIALS: &str = "hadron_storelimit_denials_total";
pub(crate) const METRIC_REDUNDANT_RELEASES: &str = "hadron_storelimit_redundant_releases_total";
pub(crate) const METRIC_IN_FLIGHT: &str = "hadron_storelimit_in_flight";
pub(crate) const METRIC_LOAD_LEVEL: &str = "hadron_storelimit_load_level";

/// A receipt for an admitted operation.
///
/// Every token must be handed back to `StoreLimiter::release` exactly once when the operation
/// completes or is abandoned. Releasing a token twice is a caller bug; the limiter tolerates it
/// but does not detect which token was duplicated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdmissionToken {
    pub store_id: StoreId,
    pub kind: OperationKind,
}

/// Adaptive per-store admission control for peer operations.
///
/// A single instance is expected to be shared by the scheduler, the heartbeat pipeline and the
/// configuration layer, usually behind an `Arc`.
pub struct StoreLimiter {
    /// The active scene of each operation kind.
    scenes: SceneRegistry,
    /// Load state of every store which has reported.
    load: LoadAggregator,
    /// Operations admitted and not yet released, per store and kind.
    in_flight: DashMap<(StoreId, OperationKind), AtomicU32>,
}

impl StoreLimiter {
    /// Create a new instance using the default threshold classifier of the given config.
    pub fn new(config: &Config) -> Self {
        Self::with_classifier(config, Box::new(config.classifier()))
    }

    /// Create a new instance using the given classifier.
    pub fn with_classifier(config: &Config, classifier: Box<dyn LoadClassifier>) -> Self {
        metrics::register_counter!(METRIC_ADMISSIONS, metrics::Unit::Count, "peer operations admitted");
        metrics::register_counter!(METRIC_DENIALS, metrics::Unit::Count, "peer operations denied admission");
        metrics::register_counter!(METRIC_REDUNDANT_RELEASES, metrics::Unit::Count, "releases with no operation in flight");
        metrics::register_gauge!(METRIC_IN_FLIGHT, metrics::Unit::Count, "peer operations currently in flight");
        metrics::register_gauge!(METRIC_LOAD_LEVEL, metrics::Unit::Count, "the current load level of the store, 0 idle to 3 high");

        let scenes = SceneRegistry::new();
        for (kind, scene) in config.scene_overrides() {
            scenes.replace(scene, kind);
        }
        Self {
            scenes,
            load: LoadAggregator::new(classifier, config.stats_window_size, config.stale_timeout()),
            in_flight: DashMap::new(),
        }
    }

    /// Attempt to admit one operation of the given kind on the given store.
    ///
    /// Returns a token when admitted. `None` means the caller must not dispatch the operation.
    pub fn try_acquire(&self, store_id: StoreId, kind: OperationKind) -> Option<AdmissionToken> {
        let level = self.load.current_level(store_id);
        let ceiling = self.scenes.get(kind).ceiling(level);
        let key = (store_id, kind);

        let res = match self.in_flight.get(&key) {
            Some(counter) => try_increment(&counter, ceiling),
            None => try_increment(&self.in_flight.entry(key).or_default(), ceiling),
        };
        match res {
            Ok(count) => {
                metrics::increment_counter!(METRIC_ADMISSIONS, "kind" => kind.as_str());
                metrics::gauge!(METRIC_IN_FLIGHT, (count + 1) as f64, "store" => store_id.to_string(), "kind" => kind.as_str());
                Some(AdmissionToken { store_id, kind })
            }
            Err(count) => {
                tracing::debug!(store_id, %kind, %level, ceiling, in_flight = count, "peer operation denied admission");
                metrics::increment_counter!(METRIC_DENIALS, "kind" => kind.as_str());
                None
            }
        }
    }

    /// Release the slot held by the given token.
    ///
    /// The in-flight count never drops below zero. A release with nothing in flight is logged
    /// and otherwise ignored.
    pub fn release(&self, token: AdmissionToken) {
        let AdmissionToken { store_id, kind } = token;
        let res = self
            .in_flight
            .get(&(store_id, kind))
            .map(|counter| counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1)));
        match res {
            Some(Ok(count)) => {
                metrics::gauge!(METRIC_IN_FLIGHT, (count - 1) as f64, "store" => store_id.to_string(), "kind" => kind.as_str());
            }
            Some(Err(_)) | None => {
                tracing::warn!(store_id, %kind, "release of a peer operation which is not in flight");
                metrics::increment_counter!(METRIC_REDUNDANT_RELEASES, "kind" => kind.as_str());
            }
        }
    }

    /// Ingest one heartbeat from the store identified within the given stats.
    pub fn collect(&self, stats: &StoreStats) {
        let store_id = stats.store_id;
        let (previous, level) = self.load.collect(store_id, stats);
        tracing::debug!(store_id, %level, total = self.load.total(store_id), "collected store statistics");
        if previous != Some(level) {
            match previous {
                Some(previous) => tracing::info!(store_id, %previous, %level, "store load level changed"),
                None => tracing::info!(store_id, %level, "store load level initialized"),
            }
        }
        metrics::gauge!(METRIC_LOAD_LEVEL, level.as_gauge(), "store" => store_id.to_string());
    }

    /// Replace the active scene of the given operation kind.
    pub fn replace_store_limit_scene(&self, scene: Scene, kind: OperationKind) {
        tracing::info!(%kind, ?scene, "replacing store limit scene");
        self.scenes.replace(scene, kind);
    }

    /// Replace the load classification policy.
    pub fn replace_classifier(&self, classifier: Box<dyn LoadClassifier>) {
        tracing::info!("replacing store load classifier");
        self.load.replace_classifier(classifier);
    }

    /// The active scene of the given operation kind.
    pub fn scene(&self, kind: OperationKind) -> Arc<Scene> {
        self.scenes.get(kind)
    }

    /// The current load level of the given store, `High` if it has never reported.
    pub fn current_level(&self, store_id: StoreId) -> LoadLevel {
        self.load.current_level(store_id)
    }

    /// The number of operations of the given kind in flight on the given store.
    pub fn in_flight(&self, store_id: StoreId, kind: OperationKind) -> u32 {
        self.in_flight
            .get(&(store_id, kind))
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// The number of heartbeats collected for the given store.
    pub fn sample_total(&self, store_id: StoreId) -> u64 {
        self.load.total(store_id)
    }

    /// A copy of the load state of the given store.
    pub fn load_state(&self, store_id: StoreId) -> Option<StoreLoadState> {
        self.load.state(store_id)
    }

    /// The load aggregator of this limiter.
    pub fn aggregator(&self) -> &LoadAggregator {
        &self.load
    }

    /// Forget a decommissioned store.
    ///
    /// Any tokens still outstanding for the store become redundant releases. The store's gauges
    /// are zeroed.
    pub fn remove_store(&self, store_id: StoreId) {
        let known = self.load.remove(store_id);
        self.in_flight.retain(|(id, _), _| *id != store_id);

        let store = store_id.to_string();
        for kind in OperationKind::ALL {
            metrics::gauge!(METRIC_IN_FLIGHT, 0.0, "store" => store.clone(), "kind" => kind.as_str());
        }
        metrics::gauge!(METRIC_LOAD_LEVEL, 0.0, "store" => store);
        tracing::info!(store_id, known, "removed store from limiter");
    }
}

/// Increment the counter if it is below the ceiling, returning the prior count either way.
fn try_increment(counter: &AtomicU32, ceiling: u32) -> Result<u32, u32> {
    counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| if count < ceiling { Some(count + 1) } else { None })
}
