//! Quest Definition Structures
//!
//! Raw structs are deserialized from the event TOML file and validated into
//! the resolved [`QuestDef`] the rest of the engine works with.

use serde::{Deserialize, Serialize};

pub type QuestId = u32;

/// Difficulty constraint on progress contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    /// Any kill counts.
    Any,
    /// Only hard-mode kills count.
    HardOnly,
}

impl Difficulty {
    /// Whether a contribution with the given hardness may count.
    pub fn admits(&self, hard_kill: bool) -> bool {
        match self {
            Difficulty::Any => true,
            Difficulty::HardOnly => hard_kill,
        }
    }
}

/// Raw quest entry as it appears in the event TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: QuestId,
    pub chain: String,
    pub order: u32,
    /// Mob/item identifier this quest matches progress events against.
    pub target: String,
    pub required: i32,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
}

fn default_difficulty() -> Difficulty {
    Difficulty::Any
}

/// Item reward entry, stored per quest in the database and granted by the
/// caller when the quest is claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReward {
    pub item_id: String,
    pub count: i32,
}

/// A resolved quest definition. Immutable for the lifetime of the event;
/// reward sets live in the catalog so admins can swap them at runtime.
#[derive(Debug, Clone)]
pub struct QuestDef {
    pub id: QuestId,
    /// Chain this quest belongs to. Chains progress independently.
    pub chain: String,
    /// Position in the chain; order 0 is always unlocked.
    pub order: u32,
    pub target: String,
    pub required: i32,
    pub difficulty: Difficulty,
}

impl QuestDef {
    pub fn from_raw(raw: &RawQuest) -> Result<Self, String> {
        if raw.required <= 0 {
            return Err(format!(
                "quest {} requires a positive amount, got {}",
                raw.id, raw.required
            ));
        }
        if raw.chain.is_empty() {
            return Err(format!("quest {} has an empty chain name", raw.id));
        }
        if raw.target.is_empty() {
            return Err(format!("quest {} has an empty target key", raw.id));
        }
        Ok(Self {
            id: raw.id,
            chain: raw.chain.clone(),
            order: raw.order,
            target: raw.target.clone(),
            required: raw.required,
            difficulty: raw.difficulty,
        })
    }
}
