//! Store limit scenes.
//!
//! A scene is the table of concurrency ceilings for one kind of peer operation, one ceiling per
//! load level. The registry holds the active scene of every operation kind behind an `ArcSwap`,
//! so admission checks read it without locking and replacements swap the whole table at once.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::load::LoadLevel;

/// A kind of scheduling action which mutates the replica set of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum OperationKind {
    /// Adding a replica to a store.
    AddPeer,
    /// Removing a replica from a store.
    RemovePeer,
}

impl OperationKind {
    /// All known operation kinds.
    pub const ALL: [OperationKind; 2] = [OperationKind::AddPeer, OperationKind::RemovePeer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddPeer => "add-peer",
            Self::RemovePeer => "remove-peer",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add-peer" => Ok(Self::AddPeer),
            "remove-peer" => Ok(Self::RemovePeer),
            _ => Err(AppError::InvalidInput(format!("unknown operation kind {:?}", s))),
        }
    }
}

/// The concurrency ceilings of one operation kind, indexed by load level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scene {
    pub idle: u32,
    pub low: u32,
    pub normal: u32,
    pub high: u32,
}

impl Scene {
    /// The ceiling which applies while a store is observed at the given load level.
    pub fn ceiling(&self, level: LoadLevel) -> u32 {
        match level {
            LoadLevel::Idle => self.idle,
            LoadLevel::Low => self.low,
            LoadLevel::Normal => self.normal,
            LoadLevel::High => self.high,
        }
    }

    /// Validate this scene before it is handed to the limiter.
    ///
    /// A scene where every ceiling is zero would block the operation kind entirely and is
    /// rejected. A ceiling which grows as load grows is allowed, but logged.
    pub fn validate(&self, kind: OperationKind) -> Result<(), AppError> {
        if self.idle == 0 && self.low == 0 && self.normal == 0 && self.high == 0 {
            return Err(AppError::InvalidInput(format!("scene for {} must allow at least one operation at some load level", kind)));
        }
        if self.idle < self.low || self.low < self.normal || self.normal < self.high {
            tracing::warn!(%kind, scene = ?self, "store limit scene ceilings increase with load");
        }
        Ok(())
    }
}

impl FromStr for Scene {
    type Err = AppError;

    /// Parse a scene from its `idle,low,normal,high` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vals = s
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| AppError::InvalidInput(format!("invalid scene {:?}: {}", s, err)))?;
        match vals.as_slice() {
            [idle, low, normal, high] => Ok(Self {
                idle: *idle,
                low: *low,
                normal: *normal,
                high: *high,
            }),
            _ => Err(AppError::InvalidInput(format!("invalid scene {:?}, expected 4 comma separated ceilings", s))),
        }
    }
}

/// The built-in scene of the given operation kind.
pub fn default_scene(kind: OperationKind) -> Scene {
    let scene = Scene {
        idle: 100,
        low: 50,
        normal: 32,
        high: 12,
    };
    // Every kind currently shares the same defaults.
    match kind {
        OperationKind::AddPeer => scene,
        OperationKind::RemovePeer => scene,
    }
}

/// The active scene of each operation kind.
pub struct SceneRegistry {
    scenes: ArcSwap<HashMap<OperationKind, Arc<Scene>>>,
}

impl SceneRegistry {
    /// Create a new instance seeded with the default scene of every known kind.
    pub fn new() -> Self {
        let scenes = OperationKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(default_scene(*kind))))
            .collect::<HashMap<_, _>>();
        Self { scenes: ArcSwap::from_pointee(scenes) }
    }

    /// The active scene for the given kind, falling back to its default.
    pub fn get(&self, kind: OperationKind) -> Arc<Scene> {
        self.scenes
            .load()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(default_scene(kind)))
    }

    /// Install the given scene as the active scene of the given kind.
    ///
    /// The previous scene is discarded entirely. Operations already admitted under the previous
    /// scene are left as they are.
    pub fn replace(&self, scene: Scene, kind: OperationKind) {
        let scene = Arc::new(scene);
        self.scenes.rcu(|current| {
            let mut updated = HashMap::clone(current);
            updated.insert(kind, scene.clone());
            updated
        });
    }
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
