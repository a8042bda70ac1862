//! Event Configuration
//!
//! One TOML file per seasonal event: the arena rectangle and instance
//! capacity, lifecycle timing, mob bindings for the boss sequence, and the
//! quest list. Deserialized into raw structs, then validated into the
//! resolved [`EventConfig`] handed to the engine at event start.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::area::{Coord, CoordinateRange, RegionSize};
use crate::quest::{QuestDef, RawQuest};

#[derive(Debug, Clone, Deserialize)]
pub struct RawEventFile {
    pub event: RawEvent,
    #[serde(default)]
    pub quests: Vec<RawQuest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub id: String,
    /// Content identifier handed to the placement collaborator.
    pub content: String,
    /// Safe location players are returned to when a run ends.
    pub exit: RawCoord,
    pub area: RawArea,
    pub timing: RawTiming,
    pub mobs: RawMobs,
    /// Chance that a kill contributes quest progress. 1.0 disables the gate.
    #[serde(default = "default_progress_chance")]
    pub progress_chance: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawCoord {
    pub x: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawArea {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
    pub max_instances: u32,
    /// Nominal footprint side length, held while content is being placed.
    pub footprint: i32,
    pub spacing: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTiming {
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u64,
    /// Offsets before the deadline at which expiry warnings fire.
    #[serde(default)]
    pub reminder_offsets_secs: Vec<u64>,
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMobs {
    #[serde(default)]
    pub normal: Vec<String>,
    #[serde(default)]
    pub mini_bosses: Vec<String>,
    pub final_boss: String,
    /// Fraction of normal-spawn markers actually used.
    #[serde(default = "default_normal_fill")]
    pub normal_fill: f32,
}

fn default_progress_chance() -> f32 {
    1.0
}

fn default_expiry_minutes() -> u64 {
    12
}

fn default_cleanup_delay() -> u64 {
    60
}

fn default_normal_fill() -> f32 {
    0.5
}

// ============================================================================
// Resolved configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct AreaConfig {
    pub bounds: CoordinateRange,
    pub max_instances: u32,
    pub footprint: RegionSize,
    pub spacing: i32,
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub expiry: Duration,
    pub reminder_offsets: Vec<Duration>,
    pub cleanup_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MobConfig {
    pub normal: Vec<String>,
    pub mini_bosses: Vec<String>,
    pub final_boss: String,
    pub normal_fill: f32,
}

/// Fully resolved event definition.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub id: String,
    pub content_id: String,
    pub exit_point: Coord,
    pub area: AreaConfig,
    pub timing: TimingConfig,
    pub mobs: MobConfig,
    pub progress_chance: f32,
    pub quests: Vec<QuestDef>,
}

impl EventConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read event file {:?}: {}", path, e))?;
        let raw: RawEventFile = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse event file {:?}: {}", path, e))?;
        let config = Self::from_raw(raw)?;
        info!(
            "Loaded event '{}' ({} quests, {} instance slots)",
            config.id,
            config.quests.len(),
            config.area.max_instances
        );
        Ok(config)
    }

    pub fn from_raw(raw: RawEventFile) -> Result<Self, String> {
        let event = raw.event;

        if event.id.is_empty() {
            return Err("event id must not be empty".to_string());
        }
        if event.area.max_instances == 0 {
            return Err(format!("event '{}': max_instances must be at least 1", event.id));
        }
        if event.area.max_x <= event.area.min_x || event.area.max_z <= event.area.min_z {
            return Err(format!("event '{}': arena rectangle is empty", event.id));
        }
        if event.area.footprint <= 0 || event.area.spacing < 0 {
            return Err(format!("event '{}': bad footprint/spacing", event.id));
        }
        if !(0.0..=1.0).contains(&event.progress_chance) {
            return Err(format!(
                "event '{}': progress_chance {} outside 0..=1",
                event.id, event.progress_chance
            ));
        }
        if !(0.0..=1.0).contains(&event.mobs.normal_fill) {
            return Err(format!(
                "event '{}': normal_fill {} outside 0..=1",
                event.id, event.mobs.normal_fill
            ));
        }

        let quests = raw
            .quests
            .iter()
            .map(QuestDef::from_raw)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: event.id,
            content_id: event.content,
            exit_point: Coord::new(event.exit.x, event.exit.z),
            area: AreaConfig {
                bounds: CoordinateRange::new(
                    event.area.min_x,
                    event.area.min_z,
                    event.area.max_x,
                    event.area.max_z,
                ),
                max_instances: event.area.max_instances,
                footprint: RegionSize::square(event.area.footprint),
                spacing: event.area.spacing,
            },
            timing: TimingConfig {
                expiry: Duration::from_secs(event.timing.expiry_minutes * 60),
                reminder_offsets: event
                    .timing
                    .reminder_offsets_secs
                    .iter()
                    .map(|s| Duration::from_secs(*s))
                    .collect(),
                cleanup_delay: Duration::from_secs(event.timing.cleanup_delay_secs),
            },
            mobs: MobConfig {
                normal: event.mobs.normal,
                mini_bosses: event.mobs.mini_bosses,
                final_boss: event.mobs.final_boss,
                normal_fill: event.mobs.normal_fill,
            },
            progress_chance: event.progress_chance,
            quests,
        })
    }
}
