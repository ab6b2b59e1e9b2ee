//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::error::AppError;
use crate::load::{Breakpoints, ThresholdClassifier, DEFAULT_STALE_TIMEOUT, DEFAULT_WINDOW_SIZE};
use crate::scene::{OperationKind, Scene};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The number of heartbeats retained per store.
    #[serde(default = "Config::default_stats_window_size")]
    pub stats_window_size: usize,
    /// The age in seconds after which a retained heartbeat is dropped.
    #[serde(default = "Config::default_stats_stale_timeout_secs")]
    pub stats_stale_timeout_secs: u64,

    /// CPU usage at or above which a store is at least `Low`.
    #[serde(default = "Config::default_breakpoint_low")]
    pub load_breakpoint_low: f64,
    /// CPU usage at or above which a store is at least `Normal`.
    #[serde(default = "Config::default_breakpoint_normal")]
    pub load_breakpoint_normal: f64,
    /// CPU usage at or above which a store is `High`.
    #[serde(default = "Config::default_breakpoint_high")]
    pub load_breakpoint_high: f64,
    /// The margin by which usage must clear a breakpoint before a store steps down a level.
    #[serde(default)]
    pub load_hysteresis: f64,
    /// The snapshot backlog at which a store is considered at least `Normal`.
    #[serde(default = "Config::default_snapshot_backlog_high")]
    pub snapshot_backlog_high: u32,
    /// The available space ratio below which a store is considered at least `Normal`.
    #[serde(default = "Config::default_low_space_ratio")]
    pub low_space_ratio: f64,

    /// An override of the default add peer scene, formatted as `idle,low,normal,high`.
    #[serde(default, deserialize_with = "Config::parse_scene")]
    pub scene_add_peer: Option<Scene>,
    /// An override of the default remove peer scene, formatted as `idle,low,normal,high`.
    #[serde(default, deserialize_with = "Config::parse_scene")]
    pub scene_remove_peer: Option<Scene>,
}

impl Default for Config {
    fn default() -> Self {
        let breakpoints = Breakpoints::default();
        let classifier = ThresholdClassifier::default();
        Self {
            stats_window_size: DEFAULT_WINDOW_SIZE,
            stats_stale_timeout_secs: DEFAULT_STALE_TIMEOUT.as_secs(),
            load_breakpoint_low: breakpoints.low,
            load_breakpoint_normal: breakpoints.normal,
            load_breakpoint_high: breakpoints.high,
            load_hysteresis: classifier.hysteresis,
            snapshot_backlog_high: classifier.snapshot_backlog_high,
            low_space_ratio: classifier.low_space_ratio,
            scene_add_peer: None,
            scene_remove_peer: None,
        }
    }
}

impl Config {
    /// Create a new config instance.
    ///
    /// This parses the runtime environment and builds the limiter config from that.
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate().context("invalid store limiter config")?;
        Ok(config)
    }

    /// Validate the relationships between config values.
    pub fn validate(&self) -> std::result::Result<(), AppError> {
        if self.stats_window_size == 0 {
            return Err(AppError::InvalidInput("STATS_WINDOW_SIZE must be at least 1".into()));
        }
        let bps = [self.load_breakpoint_low, self.load_breakpoint_normal, self.load_breakpoint_high];
        if bps.iter().any(|bp| !bp.is_finite() || *bp < 0.0) || bps[0] > bps[1] || bps[1] > bps[2] {
            return Err(AppError::InvalidInput(format!("load breakpoints must be non-negative and non-decreasing, got {:?}", bps)));
        }
        if !self.load_hysteresis.is_finite() || self.load_hysteresis < 0.0 {
            return Err(AppError::InvalidInput(format!("LOAD_HYSTERESIS must be non-negative, got {}", self.load_hysteresis)));
        }
        let min_gap = self.classifier().breakpoints.min_gap();
        if self.load_hysteresis > 0.0 && self.load_hysteresis >= min_gap {
            return Err(AppError::InvalidInput(format!(
                "LOAD_HYSTERESIS must be smaller than the low breakpoint and every gap between breakpoints ({}), got {}",
                min_gap, self.load_hysteresis
            )));
        }
        if self.snapshot_backlog_high == 0 {
            return Err(AppError::InvalidInput("SNAPSHOT_BACKLOG_HIGH must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.low_space_ratio) {
            return Err(AppError::InvalidInput(format!("LOW_SPACE_RATIO must be within [0, 1], got {}", self.low_space_ratio)));
        }
        for (kind, scene) in self.scene_overrides() {
            scene.validate(kind)?;
        }
        Ok(())
    }

    /// The classifier described by this config.
    pub fn classifier(&self) -> ThresholdClassifier {
        ThresholdClassifier {
            breakpoints: Breakpoints {
                low: self.load_breakpoint_low,
                normal: self.load_breakpoint_normal,
                high: self.load_breakpoint_high,
            },
            hysteresis: self.load_hysteresis,
            snapshot_backlog_high: self.snapshot_backlog_high,
            low_space_ratio: self.low_space_ratio,
        }
    }

    /// The configured scene overrides.
    pub fn scene_overrides(&self) -> Vec<(OperationKind, Scene)> {
        let mut overrides = vec![];
        if let Some(scene) = self.scene_add_peer {
            overrides.push((OperationKind::AddPeer, scene));
        }
        if let Some(scene) = self.scene_remove_peer {
            overrides.push((OperationKind::RemovePeer, scene));
        }
        overrides
    }

    /// The stale timeout of retained heartbeats.
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_stale_timeout_secs)
    }

    fn default_stats_window_size() -> usize {
        DEFAULT_WINDOW_SIZE
    }

    fn default_stats_stale_timeout_secs() -> u64 {
        DEFAULT_STALE_TIMEOUT.as_secs()
    }

    fn default_breakpoint_low() -> f64 {
        Breakpoints::default().low
    }

    fn default_breakpoint_normal() -> f64 {
        Breakpoints::default().normal
    }

    fn default_breakpoint_high() -> f64 {
        Breakpoints::default().high
    }

    fn default_snapshot_backlog_high() -> u32 {
        ThresholdClassifier::default().snapshot_backlog_high
    }

    fn default_low_space_ratio() -> f64 {
        ThresholdClassifier::default().low_space_ratio
    }

    /// Parse an optional scene from the config source.
    fn parse_scene<'de, D: Deserializer<'de>>(val: D) -> std::result::Result<Option<Scene>, D::Error> {
        let raw: Option<String> = Deserialize::deserialize(val)?;
        raw.map(|raw| raw.parse::<Scene>().map_err(|err| DeError::custom(err.to_string())))
            .transpose()
    }
}
