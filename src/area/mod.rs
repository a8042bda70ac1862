//! Solo Instance Subsystem
//!
//! Exclusive per-player working areas: grid-based slot allocation inside the
//! event arena, content placement through external collaborators, and the
//! instance lifecycle (creation, expiry, cleanup, teardown).

pub mod allocator;
pub mod instance;
pub mod manager;
pub mod placement;

pub use allocator::{Coord, CoordinateRange, RegionSize, SlotAllocator};
pub use instance::{SoloInstance, TimerKind};
pub use manager::{CreateError, InstanceManager, InstanceNotice};
pub use placement::{
    AreaPlacer, EntityHandle, MarkerKind, MobRole, MobSpawner, MobTag, PasteResult, PlaceError,
};
