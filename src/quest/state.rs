//! Quest Progress State
//!
//! Per-player, per-quest mutable state. The stage a quest is in is always
//! derived from the record plus the chain unlock relation; only the counter
//! and the three flags are stored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::definition::QuestId;

/// Derived stage of a quest for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStage {
    /// The previous quest in the chain is not completed-and-claimed yet.
    Locked,
    /// Reachable but not accepted.
    Unlocked,
    Accepted,
    /// Required amount reached, reward not claimed.
    Completed,
    Claimed,
}

/// Stored state for one (player, quest) pair.
///
/// `amount` never exceeds the quest's required amount and never decreases
/// while the quest is open. The flags form a strict progression: accepted,
/// then completed (implies amount >= required), then claimed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub amount: i32,
    pub accepted: bool,
    pub completed: bool,
    pub claimed: bool,
}

impl ProgressRecord {
    /// Add progress, clamped to `required`. Returns true when the record
    /// just crossed the completion bar. Contributions after completion are
    /// absorbed without effect.
    pub fn add(&mut self, amount: i32, required: i32) -> bool {
        if self.completed {
            return false;
        }
        self.amount = (self.amount + amount).min(required);
        if self.amount >= required {
            self.completed = true;
            true
        } else {
            false
        }
    }

    pub fn stage(&self, unlocked: bool) -> QuestStage {
        if self.claimed {
            QuestStage::Claimed
        } else if self.completed {
            QuestStage::Completed
        } else if self.accepted {
            QuestStage::Accepted
        } else if unlocked {
            QuestStage::Unlocked
        } else {
            QuestStage::Locked
        }
    }
}

/// All quest records for a single player.
#[derive(Debug, Clone, Default)]
pub struct PlayerProgress {
    pub records: HashMap<QuestId, ProgressRecord>,
}

impl PlayerProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: HashMap<QuestId, ProgressRecord>) -> Self {
        Self { records }
    }

    /// Copy of the record, defaulting to an untouched one.
    pub fn record(&self, quest_id: QuestId) -> ProgressRecord {
        self.records.get(&quest_id).copied().unwrap_or_default()
    }

    pub fn record_mut(&mut self, quest_id: QuestId) -> &mut ProgressRecord {
        self.records.entry(quest_id).or_default()
    }
}
