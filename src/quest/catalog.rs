//! Quest Catalog
//!
//! Immutable per-event view of the quest chains, built once from the event
//! configuration. Reward sets are the only runtime-mutable attachment; they
//! are loaded from the database and can be swapped by admin action.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::definition::{ItemReward, QuestDef, QuestId};
use crate::db::Database;

pub struct QuestCatalog {
    event_id: String,
    quests: Vec<Arc<QuestDef>>,
    by_id: HashMap<QuestId, Arc<QuestDef>>,
    by_target: HashMap<String, Vec<QuestId>>,
    /// quest id -> the id of the quest one order step earlier in its chain.
    previous: HashMap<QuestId, QuestId>,
    rewards: RwLock<HashMap<QuestId, Vec<ItemReward>>>,
}

impl QuestCatalog {
    pub fn new(event_id: &str, defs: Vec<QuestDef>) -> Result<Self, String> {
        let mut quests: Vec<Arc<QuestDef>> = defs.into_iter().map(Arc::new).collect();
        quests.sort_by(|a, b| (&a.chain, a.order).cmp(&(&b.chain, b.order)));

        let mut by_id = HashMap::new();
        let mut by_target: HashMap<String, Vec<QuestId>> = HashMap::new();
        let mut by_chain: HashMap<&str, Vec<&Arc<QuestDef>>> = HashMap::new();

        for quest in &quests {
            if by_id.insert(quest.id, Arc::clone(quest)).is_some() {
                return Err(format!("event '{}': duplicate quest id {}", event_id, quest.id));
            }
            by_target.entry(quest.target.clone()).or_default().push(quest.id);
            by_chain.entry(quest.chain.as_str()).or_default().push(quest);
        }

        // each chain must be a linear run of order indexes starting at 0
        let mut previous = HashMap::new();
        for (chain, members) in &by_chain {
            for (i, quest) in members.iter().enumerate() {
                if quest.order != i as u32 {
                    return Err(format!(
                        "event '{}': chain '{}' has a gap or duplicate at order {} (quest {})",
                        event_id, chain, quest.order, quest.id
                    ));
                }
                if i > 0 {
                    previous.insert(quest.id, members[i - 1].id);
                }
            }
        }

        info!(
            "Built quest catalog for '{}': {} quests in {} chains",
            event_id,
            quests.len(),
            by_chain.len()
        );

        Ok(Self {
            event_id: event_id.to_string(),
            quests,
            by_id,
            by_target,
            previous,
            rewards: RwLock::new(HashMap::new()),
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn get(&self, quest_id: QuestId) -> Option<Arc<QuestDef>> {
        self.by_id.get(&quest_id).cloned()
    }

    /// Every quest tracking the given target key. A single kill can advance
    /// quests in unrelated chains, so callers always get the full match set.
    pub fn matching_target(&self, target: &str) -> Vec<Arc<QuestDef>> {
        self.by_target
            .get(target)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// The quest one order step earlier in the same chain, if any.
    pub fn previous_in_chain(&self, quest_id: QuestId) -> Option<Arc<QuestDef>> {
        self.previous.get(&quest_id).and_then(|id| self.get(*id))
    }

    pub fn all(&self) -> &[Arc<QuestDef>] {
        &self.quests
    }

    pub fn count(&self) -> usize {
        self.quests.len()
    }

    /// Hydrate the reward cache from the store. Quests without a stored set
    /// simply have no rewards until an admin configures one.
    pub async fn load_rewards(&self, db: &Database) -> Result<(), sqlx::Error> {
        let stored = db.load_rewards(&self.event_id).await?;

        for quest_id in stored.keys() {
            if !self.by_id.contains_key(quest_id) {
                warn!(
                    "Stored rewards for unknown quest {} in event '{}'",
                    quest_id, self.event_id
                );
            }
        }

        let mut rewards = self.rewards.write().await;
        *rewards = stored;
        Ok(())
    }

    pub async fn rewards(&self, quest_id: QuestId) -> Vec<ItemReward> {
        self.rewards
            .read()
            .await
            .get(&quest_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a quest's reward set: write through to the store, then update
    /// the cache. The cache is untouched when the write fails.
    pub async fn set_rewards(
        &self,
        db: &Database,
        quest_id: QuestId,
        items: Vec<ItemReward>,
    ) -> Result<(), sqlx::Error> {
        db.set_rewards(&self.event_id, quest_id, &items).await?;
        self.rewards.write().await.insert(quest_id, items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::Difficulty;

    fn quest(id: QuestId, chain: &str, order: u32, target: &str) -> QuestDef {
        QuestDef {
            id,
            chain: chain.to_string(),
            order,
            target: target.to_string(),
            required: 5,
            difficulty: Difficulty::Any,
        }
    }

    #[test]
    fn test_chain_links() {
        let catalog = QuestCatalog::new(
            "full_moon",
            vec![
                quest(1, "lunar", 0, "wolf"),
                quest(2, "lunar", 1, "wolf"),
                quest(3, "frost", 0, "wisp"),
            ],
        )
        .unwrap();

        assert!(catalog.previous_in_chain(1).is_none());
        assert_eq!(catalog.previous_in_chain(2).unwrap().id, 1);
        assert!(catalog.previous_in_chain(3).is_none());
    }

    #[test]
    fn test_matching_target_returns_all() {
        let catalog = QuestCatalog::new(
            "full_moon",
            vec![
                quest(1, "lunar", 0, "wolf"),
                quest(2, "lunar", 1, "wolf"),
                quest(3, "frost", 0, "wisp"),
            ],
        )
        .unwrap();

        let matched = catalog.matching_target("wolf");
        assert_eq!(matched.len(), 2);
        assert!(catalog.matching_target("bear").is_empty());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = QuestCatalog::new(
            "full_moon",
            vec![quest(1, "lunar", 0, "wolf"), quest(1, "frost", 0, "wisp")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_order_gap() {
        let result = QuestCatalog::new(
            "full_moon",
            vec![quest(1, "lunar", 0, "wolf"), quest(2, "lunar", 2, "wolf")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duplicate_order() {
        let result = QuestCatalog::new(
            "full_moon",
            vec![quest(1, "lunar", 0, "wolf"), quest(2, "lunar", 0, "boar")],
        );
        assert!(result.is_err());
    }
}
