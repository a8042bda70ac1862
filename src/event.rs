//! Seasonal Event Facade
//!
//! Wires one event's quest catalog, quest engine, instance manager and boss
//! sequence together, and routes host callbacks (kills, spawns, joins,
//! disconnects) to the right subsystem. Event-specific behavior like the
//! droprate gate lives here, keeping the quest engine deterministic.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::error;

use crate::area::{
    AreaPlacer, CreateError, EntityHandle, InstanceManager, InstanceNotice, MobSpawner, MobTag,
    SoloInstance,
};
use crate::boss::BossSequence;
use crate::config::EventConfig;
use crate::db::Database;
use crate::quest::{ItemReward, QuestCatalog, QuestEngine, QuestId};

pub struct SeasonalEvent {
    config: Arc<EventConfig>,
    catalog: Arc<QuestCatalog>,
    quests: QuestEngine,
    instances: Arc<InstanceManager>,
    boss: BossSequence,
}

impl SeasonalEvent {
    /// Build a running event from its configuration. The returned receiver
    /// carries instance lifecycle notices for the presentation layer.
    pub async fn new(
        config: EventConfig,
        db: Arc<Database>,
        placer: Arc<dyn AreaPlacer>,
        spawner: Arc<dyn MobSpawner>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InstanceNotice>), String> {
        let config = Arc::new(config);
        let catalog = Arc::new(QuestCatalog::new(&config.id, config.quests.clone())?);
        if let Err(e) = catalog.load_rewards(&db).await {
            // quests still run, just without configured rewards
            error!("Failed to load reward sets for '{}': {}", config.id, e);
        }

        let quests = QuestEngine::new(Arc::clone(&catalog), db);
        let (instances, notices) =
            InstanceManager::new(Arc::clone(&config), placer, Arc::clone(&spawner));
        let boss = BossSequence::new(Arc::clone(&config), Arc::clone(&instances), spawner);

        Ok((
            Self {
                config,
                catalog,
                quests,
                instances,
                boss,
            },
            notices,
        ))
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<QuestCatalog> {
        &self.catalog
    }

    pub fn quests(&self) -> &QuestEngine {
        &self.quests
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    /// Create (or return) the owner's solo run and populate it on first
    /// creation. The caller teleports the owner to `instance.entry_point`.
    pub async fn start_solo_run(
        &self,
        owner_id: &str,
    ) -> Result<(Arc<SoloInstance>, bool), CreateError> {
        let (instance, created) = self.instances.get_or_create(owner_id).await?;
        if created {
            self.boss.populate(&instance).await;
        }
        Ok((instance, created))
    }

    /// End the owner's run without completion (death, forced reset).
    pub async fn end_solo_run(&self, owner_id: &str) -> bool {
        self.instances.remove(owner_id).await
    }

    /// Spawn notification from the host runtime.
    pub async fn handle_spawned(&self, entity: EntityHandle, mob_id: &str, at: crate::area::Coord) {
        self.boss.on_spawned(entity, mob_id, at).await;
    }

    /// Route one kill: boss sequencing for tagged entities, then quest
    /// progress behind the droprate gate. Returns newly completed quest ids.
    pub async fn handle_kill(
        &self,
        player_id: &str,
        mob_id: &str,
        entity: EntityHandle,
        hard_kill: bool,
        tag: Option<&MobTag>,
    ) -> Vec<QuestId> {
        if let Some(tag) = tag {
            self.boss.on_mob_killed(tag, entity).await;
        }

        // One shared trial per kill: every quest tracking this target sees
        // the same outcome.
        if !self.roll_contribution() {
            return Vec::new();
        }
        self.quests
            .add_progress(player_id, mob_id, 1, hard_kill)
            .await
    }

    /// Claim a completed quest. Returns the reward set the caller should
    /// grant, or None when the claim is rejected.
    pub async fn claim(&self, player_id: &str, quest_id: QuestId) -> Option<Vec<ItemReward>> {
        if !self.quests.claim(player_id, quest_id).await {
            return None;
        }
        Some(self.catalog.rewards(quest_id).await)
    }

    pub async fn handle_player_join(&self, player_id: &str) {
        self.quests.load_player(player_id).await;
    }

    /// Disconnects end any active run; stored quest records are kept.
    pub async fn handle_player_exit(&self, player_id: &str) {
        self.instances.remove(player_id).await;
        self.quests.unload_player(player_id).await;
    }

    /// Tear down every active run, e.g. when the event window closes.
    pub async fn shutdown(&self) {
        self.instances.shutdown().await;
    }

    fn roll_contribution(&self) -> bool {
        let chance = self.config.progress_chance;
        chance >= 1.0 || rand::thread_rng().gen_range(0.0f32..1.0) < chance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::placement::testing::{FakePlacer, RecordingSpawner};
    use crate::area::{Coord, CoordinateRange, MobRole, RegionSize};
    use crate::config::{AreaConfig, MobConfig, TimingConfig};
    use crate::quest::{Difficulty, QuestDef, QuestStage, RawQuest};
    use std::time::Duration;
    use tempfile::TempDir;

    fn quest(id: QuestId, order: u32, target: &str, required: i32) -> QuestDef {
        QuestDef::from_raw(&RawQuest {
            id,
            chain: "lunar".to_string(),
            order,
            target: target.to_string(),
            required,
            difficulty: Difficulty::Any,
        })
        .unwrap()
    }

    fn test_config(progress_chance: f32) -> EventConfig {
        EventConfig {
            id: "full_moon".to_string(),
            content_id: "full_moon_arena".to_string(),
            exit_point: Coord::new(0, 64),
            area: AreaConfig {
                bounds: CoordinateRange::new(0, 0, 1000, 1000),
                max_instances: 4,
                footprint: RegionSize::square(96),
                spacing: 16,
            },
            timing: TimingConfig {
                expiry: Duration::from_secs(600),
                reminder_offsets: Vec::new(),
                cleanup_delay: Duration::from_secs(5),
            },
            mobs: MobConfig {
                normal: vec!["moon_wisp".to_string()],
                mini_bosses: vec!["alpha_wolf".to_string()],
                final_boss: "lunar_colossus".to_string(),
                normal_fill: 0.5,
            },
            progress_chance,
            quests: vec![quest(1, 0, "alpha_wolf", 3), quest(2, 1, "moon_wisp", 5)],
        }
    }

    async fn event_with(
        dir: &TempDir,
        progress_chance: f32,
    ) -> (SeasonalEvent, Arc<RecordingSpawner>) {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("event.db").display());
        let db = Arc::new(Database::new(&url).await.unwrap());
        let placer = Arc::new(FakePlacer::new());
        let spawner = Arc::new(RecordingSpawner::new());
        let (event, _notices) = SeasonalEvent::new(
            test_config(progress_chance),
            db,
            placer as Arc<dyn AreaPlacer>,
            Arc::clone(&spawner) as Arc<dyn MobSpawner>,
        )
        .await
        .unwrap();
        (event, spawner)
    }

    /// Deliver pending spawn notifications and return the applied tags.
    async fn notify_spawns(
        event: &SeasonalEvent,
        spawner: &RecordingSpawner,
    ) -> Vec<(EntityHandle, MobTag)> {
        let pending: Vec<(String, Coord)> = spawner.spawned.lock().unwrap().clone();
        let already = spawner.tags.lock().unwrap().len();
        for (mob_id, at) in pending.iter().skip(already) {
            let handle = spawner.next_handle();
            event.handle_spawned(handle, mob_id, *at).await;
        }
        spawner.tags.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_kill_feeds_quests_and_boss_sequence() {
        let dir = TempDir::new().unwrap();
        let (event, spawner) = event_with(&dir, 1.0).await;

        event.handle_player_join("p1").await;
        assert!(event.quests().accept("p1", 1).await);

        let (instance, created) = event.start_solo_run("p1").await.unwrap();
        assert!(created);

        let tags = notify_spawns(&event, &spawner).await;
        let minis: Vec<_> = tags
            .iter()
            .filter(|(_, tag)| tag.role == MobRole::MiniBoss)
            .cloned()
            .collect();
        assert_eq!(minis.len(), 3);

        // each mini-boss kill advances both the sequence and the quest
        for (i, (handle, tag)) in minis.iter().enumerate() {
            let completed = event
                .handle_kill("p1", "alpha_wolf", *handle, true, Some(tag))
                .await;
            if i == 2 {
                assert_eq!(completed, vec![1]);
            } else {
                assert!(completed.is_empty());
            }
        }
        assert_eq!(instance.mini_boss_kills().await, 3);
        assert!(instance.final_boss_spawned().await);
        assert_eq!(event.quests().stage("p1", 1).await, Some(QuestStage::Completed));
    }

    #[tokio::test]
    async fn test_claim_returns_configured_rewards() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("event.db").display());
        let db = Arc::new(Database::new(&url).await.unwrap());
        let placer = Arc::new(FakePlacer::new());
        let spawner = Arc::new(RecordingSpawner::new());
        let (event, _notices) = SeasonalEvent::new(
            test_config(1.0),
            Arc::clone(&db),
            placer as Arc<dyn AreaPlacer>,
            spawner as Arc<dyn MobSpawner>,
        )
        .await
        .unwrap();

        let rewards = vec![ItemReward {
            item_id: "moon_shard".to_string(),
            count: 3,
        }];
        event.catalog().set_rewards(&db, 1, rewards.clone()).await.unwrap();

        event.quests().accept("p1", 1).await;

        // not completed yet
        assert!(event.claim("p1", 1).await.is_none());

        event.quests().add_progress("p1", "alpha_wolf", 3, true).await;
        assert_eq!(event.claim("p1", 1).await.unwrap(), rewards);

        // double claim is rejected
        assert!(event.claim("p1", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_droprate_blocks_contributions() {
        let dir = TempDir::new().unwrap();
        let (event, _spawner) = event_with(&dir, 0.0).await;

        event.quests().accept("p1", 1).await;
        for _ in 0..20 {
            let completed = event.handle_kill("p1", "alpha_wolf", 5, true, None).await;
            assert!(completed.is_empty());
        }
        assert_eq!(event.quests().record("p1", 1).await.amount, 0);
    }

    #[tokio::test]
    async fn test_player_exit_ends_run_but_keeps_records() {
        let dir = TempDir::new().unwrap();
        let (event, _spawner) = event_with(&dir, 1.0).await;

        event.handle_player_join("p1").await;
        event.quests().accept("p1", 1).await;
        event.quests().add_progress("p1", "alpha_wolf", 2, true).await;
        event.start_solo_run("p1").await.unwrap();
        assert_eq!(event.instances().active_count(), 1);

        event.handle_player_exit("p1").await;
        assert_eq!(event.instances().active_count(), 0);

        // rejoin restores the stored record
        event.handle_player_join("p1").await;
        let record = event.quests().record("p1", 1).await;
        assert_eq!(record.amount, 2);
        assert!(record.accepted);
    }

    #[tokio::test]
    async fn test_second_start_returns_same_run() {
        let dir = TempDir::new().unwrap();
        let (event, spawner) = event_with(&dir, 1.0).await;

        let (first, created) = event.start_solo_run("p1").await.unwrap();
        assert!(created);
        let populated = spawner.spawned_count();
        assert!(populated > 0);

        let (second, created) = event.start_solo_run("p1").await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        // no re-population on the idempotent path
        assert_eq!(spawner.spawned_count(), populated);
    }
}
