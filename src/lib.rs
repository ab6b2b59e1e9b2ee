//! Adaptive per-store admission control for peer operations.
//!
//! The cluster scheduler consults a `StoreLimiter` before dispatching an operation which adds or
//! removes a replica on a store. The limiter admits the operation only while fewer operations of
//! the same kind are in flight on that store than the active `Scene` allows at the store's
//! current `LoadLevel`. Load levels are recomputed from every heartbeat the store reports.

pub mod collector;
pub mod config;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod limiter;
pub mod load;
pub mod models;
pub mod scene;

pub use crate::collector::StatsCollector;
pub use crate::config::Config;
pub use crate::error::AppError;
pub use crate::limiter::{AdmissionToken, StoreLimiter};
pub use crate::load::{Breakpoints, LoadAggregator, LoadClassifier, LoadLevel, StoreLoadState, ThresholdClassifier};
pub use crate::models::{RecordPair, StoreId, StoreStats, TimeInterval};
pub use crate::scene::{default_scene, OperationKind, Scene, SceneRegistry};
