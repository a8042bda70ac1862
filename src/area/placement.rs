//! External Collaborator Interfaces
//!
//! The engine never touches content formats or entity internals itself. It
//! asks an [`AreaPlacer`] to materialize scripted content and report marker
//! coordinates, and a [`MobSpawner`] to create and remove mobs. Spawning is
//! fire-and-forget: confirmation arrives later through a spawn notification,
//! never as a return value, and the two are not correlated by call order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::allocator::{Coord, CoordinateRange, RegionSize};

/// Handle to a live entity, issued by the host runtime.
pub type EntityHandle = u64;

/// Category of a marker reported by the placement collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Ordinary mob spawn point.
    NormalSpawn,
    /// Mini-boss spawn point.
    MiniBoss,
    /// Final boss spawn point.
    FinalBoss,
    /// Where the owner enters the instance. Exactly one per content set.
    PlayerEntry,
}

/// Outcome of a successful content paste.
#[derive(Debug, Clone)]
pub struct PasteResult {
    /// Offset the paste was shifted by relative to the requested origin.
    pub applied_offset: Coord,
    /// Measured extent of the placed content.
    pub region_size: RegionSize,
    /// Marker coordinates by category, in world space.
    pub markers: HashMap<MarkerKind, Vec<Coord>>,
}

impl PasteResult {
    pub fn markers_of(&self, kind: MarkerKind) -> &[Coord] {
        self.markers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Error)]
pub enum PlaceError {
    #[error("unknown content '{0}'")]
    UnknownContent(String),
    #[error("paste failed: {0}")]
    Failed(String),
}

/// Materializes scripted content in the world. Implementations may block on
/// IO; the instance manager always calls `place` from the worker pool.
pub trait AreaPlacer: Send + Sync {
    fn place(&self, content_id: &str, origin: Coord) -> Result<PasteResult, PlaceError>;

    /// Remove everything previously placed inside `bounds`.
    fn clear(&self, bounds: CoordinateRange);
}

/// Role of a tracked entity within a solo instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobRole {
    Normal,
    MiniBoss,
    FinalBoss,
}

/// Opaque tag attached to spawned entities. Kill handling resolves the owning
/// instance and the entity's role from this tag alone; there is no reverse
/// index from handles to instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobTag {
    pub owner_id: String,
    pub instance_id: String,
    pub role: MobRole,
}

/// Creates and removes mobs. `spawn` carries no return value; the host
/// reports the resulting entity through the engine's spawn notification.
pub trait MobSpawner: Send + Sync {
    fn spawn(&self, mob_id: &str, at: Coord);

    fn despawn(&self, entity: EntityHandle);

    /// Attach the instance/role tag to a live entity.
    fn apply_tag(&self, entity: EntityHandle, tag: &MobTag);
}
