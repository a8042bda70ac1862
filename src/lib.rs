//! Seasonal-Event Engine
//!
//! Core library for time-boxed game-server events: per-player quest chains
//! with concurrent progress contributions, and private "solo run" instances
//! with boss sequencing and multiple cleanup paths. Presentation layers
//! (menus, chat commands, packet handling) live outside this crate and call
//! into the types exported here.

pub mod area;
pub mod boss;
pub mod config;
pub mod db;
pub mod event;
pub mod quest;

pub use area::{
    AreaPlacer, Coord, CoordinateRange, CreateError, EntityHandle, InstanceManager,
    InstanceNotice, MarkerKind, MobRole, MobSpawner, MobTag, PasteResult, PlaceError, RegionSize,
    SoloInstance,
};
pub use boss::BossSequence;
pub use config::EventConfig;
pub use db::Database;
pub use event::SeasonalEvent;
pub use quest::{Difficulty, ItemReward, QuestCatalog, QuestDef, QuestEngine, QuestId, QuestStage};
