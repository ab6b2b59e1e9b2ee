//! Load level classification policy.

use serde::{Deserialize, Serialize};

use crate::load::{LoadLevel, StatWindow};

/// A policy mapping a store's recent statistics to a load level.
///
/// Implementations must be cheap; `classify` runs on every collected heartbeat while the
/// store's state is locked.
pub trait LoadClassifier: Send + Sync {
    /// Classify the given window. `previous` is the store's prior level, `None` on first contact.
    fn classify(&self, window: &StatWindow, previous: Option<LoadLevel>) -> LoadLevel;
}

/// CPU usage breakpoints, in percent, separating the load levels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakpoints {
    /// At or above this a store is at least `Low`.
    pub low: f64,
    /// At or above this a store is at least `Normal`.
    pub normal: f64,
    /// At or above this a store is `High`.
    pub high: f64,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            low: 5.0,
            normal: 10.0,
            high: 30.0,
        }
    }
}

impl Breakpoints {
    /// The smallest distance between zero and the breakpoints or between adjacent breakpoints.
    ///
    /// A step-down margin at or above this would lower a breakpoint onto or past the one below
    /// it, leaving a level which can never be left.
    pub fn min_gap(&self) -> f64 {
        self.low.min(self.normal - self.low).min(self.high - self.normal)
    }

    /// Map a usage value onto a level, with each breakpoint lowered by `margin`.
    fn level_of(&self, usage: f64, margin: f64) -> LoadLevel {
        if usage >= self.high - margin {
            LoadLevel::High
        } else if usage >= self.normal - margin {
            LoadLevel::Normal
        } else if usage >= self.low - margin {
            LoadLevel::Low
        } else {
            LoadLevel::Idle
        }
    }
}

/// The default classifier, driven primarily by CPU usage.
///
/// - a store reporting itself busy is `High`;
/// - otherwise the window's mean CPU usage is mapped through the breakpoints;
/// - a large snapshot backlog or a nearly full disk raise the level to at least `Normal`.
///
/// With a non-zero `hysteresis`, a store only steps down to a lower level once its usage is
/// below the breakpoint by more than the margin. A margin which is not smaller than
/// `Breakpoints::min_gap` is ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdClassifier {
    pub breakpoints: Breakpoints,
    pub hysteresis: f64,
    pub snapshot_backlog_high: u32,
    pub low_space_ratio: f64,
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self {
            breakpoints: Breakpoints::default(),
            hysteresis: 0.0,
            snapshot_backlog_high: 8,
            low_space_ratio: 0.1,
        }
    }
}

impl LoadClassifier for ThresholdClassifier {
    fn classify(&self, window: &StatWindow, previous: Option<LoadLevel>) -> LoadLevel {
        let latest = match window.latest() {
            Some(latest) => latest,
            None => return LoadLevel::Idle,
        };
        if latest.is_busy {
            return LoadLevel::High;
        }

        let usage = window.cpu_usage();
        let mut level = self.breakpoints.level_of(usage, 0.0);
        if let Some(previous) = previous {
            if level < previous && self.hysteresis > 0.0 && self.hysteresis < self.breakpoints.min_gap() {
                // Stepping down must clear the breakpoints by the margin, so take the level the
                // usage would map to with every breakpoint lowered, without exceeding `previous`.
                level = self.breakpoints.level_of(usage, self.hysteresis).min(previous);
            }
        }

        if latest.snapshot_backlog >= self.snapshot_backlog_high || latest.available_ratio < self.low_space_ratio {
            level = level.max(LoadLevel::Normal);
        }
        level
    }
}
