//! Boss Sequence Controller
//!
//! Drives a solo instance from initial population through mini-bosses to the
//! final boss and the post-completion countdown. The controller keeps no
//! mutable state of its own; everything lives on the instance, and kills are
//! resolved purely from the tag the entity was given at spawn time.

use std::sync::Arc;

use tracing::{info, warn};

use crate::area::{
    Coord, EntityHandle, InstanceManager, MobRole, MobSpawner, MobTag, SoloInstance,
};
use crate::config::EventConfig;

/// Mini-bosses that must fall before the final boss appears. Content with
/// fewer markers just requires fewer kills.
const MINI_BOSS_LIMIT: usize = 3;

pub struct BossSequence {
    config: Arc<EventConfig>,
    manager: Arc<InstanceManager>,
    spawner: Arc<dyn MobSpawner>,
}

impl BossSequence {
    pub fn new(
        config: Arc<EventConfig>,
        manager: Arc<InstanceManager>,
        spawner: Arc<dyn MobSpawner>,
    ) -> Self {
        Self {
            config,
            manager,
            spawner,
        }
    }

    /// Request the initial mob set for a freshly created instance: ordinary
    /// mobs at an evenly strided subset of the normal markers, one mini-boss
    /// per marker up to the limit.
    pub async fn populate(&self, instance: &Arc<SoloInstance>) {
        let mobs = &self.config.mobs;

        if !mobs.normal.is_empty() && !instance.normal_markers.is_empty() {
            let markers = &instance.normal_markers;
            let take = ((markers.len() as f32 * mobs.normal_fill).ceil() as usize)
                .min(markers.len());
            if take > 0 {
                let stride = (markers.len() / take).max(1);
                for (i, at) in markers.iter().step_by(stride).take(take).enumerate() {
                    self.spawner.spawn(&mobs.normal[i % mobs.normal.len()], *at);
                }
            }
        }

        let mini_count = if mobs.mini_bosses.is_empty() {
            0
        } else {
            instance.mini_boss_markers.len().min(MINI_BOSS_LIMIT)
        };
        instance.set_mini_boss_total(mini_count).await;
        for (i, at) in instance.mini_boss_markers.iter().take(mini_count).enumerate() {
            self.spawner
                .spawn(&mobs.mini_bosses[i % mobs.mini_bosses.len()], *at);
        }

        info!(
            "Populated instance {}: {} mini-bosses to defeat",
            instance.id, mini_count
        );

        // nothing gates the final boss, bring it out immediately
        if mini_count == 0 {
            self.advance_to_final_boss(instance).await;
        }
    }

    /// Spawn-notification hook. Requests and notifications are decoupled in
    /// time, so the owning instance is re-derived from the spawn coordinate
    /// rather than from call order.
    pub async fn on_spawned(&self, entity: EntityHandle, mob_id: &str, at: Coord) {
        let Some(instance) = self.manager.find_by_coord(at) else {
            return;
        };
        let tag = MobTag {
            owner_id: instance.owner_id.clone(),
            instance_id: instance.id.clone(),
            role: self.role_of(mob_id),
        };
        self.spawner.apply_tag(entity, &tag);
        instance.track(entity).await;
    }

    /// Kill hook for tagged entities. Ignores tags whose instance is gone or
    /// superseded; re-reported kills of the same handle have no effect.
    pub async fn on_mob_killed(&self, tag: &MobTag, entity: EntityHandle) {
        let Some(instance) = self.manager.get(&tag.owner_id) else {
            return;
        };
        if instance.id != tag.instance_id {
            return;
        }

        match tag.role {
            MobRole::Normal => {}
            MobRole::MiniBoss => {
                let killed = instance.record_mini_boss_kill(entity).await;
                let total = instance.mini_boss_total().await;
                info!(
                    "Mini-boss down in instance {} ({}/{})",
                    instance.id, killed, total
                );
                if killed >= total {
                    self.advance_to_final_boss(&instance).await;
                }
            }
            MobRole::FinalBoss => {
                self.manager.start_completion_countdown(&instance).await;
            }
        }
    }

    async fn advance_to_final_boss(&self, instance: &Arc<SoloInstance>) {
        if !instance.mark_final_boss_spawned().await {
            return;
        }
        match instance.final_boss_marker {
            Some(at) => {
                info!("Spawning final boss in instance {}", instance.id);
                self.spawner.spawn(&self.config.mobs.final_boss, at);
            }
            None => {
                warn!(
                    "Instance {} has no final-boss marker; completing the run",
                    instance.id
                );
                self.manager.start_completion_countdown(instance).await;
            }
        }
    }

    fn role_of(&self, mob_id: &str) -> MobRole {
        let mobs = &self.config.mobs;
        if mob_id == mobs.final_boss {
            MobRole::FinalBoss
        } else if mobs.mini_bosses.iter().any(|m| m == mob_id) {
            MobRole::MiniBoss
        } else {
            MobRole::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::placement::testing::{FakePlacer, RecordingSpawner};
    use crate::area::{AreaPlacer, CoordinateRange, InstanceNotice, RegionSize, TimerKind};
    use crate::config::{AreaConfig, MobConfig, TimingConfig};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_config() -> Arc<EventConfig> {
        Arc::new(EventConfig {
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
                reminder_offsets: vec![Duration::from_secs(60)],
                cleanup_delay: Duration::from_secs(5),
            },
            mobs: MobConfig {
                normal: vec!["moon_wisp".to_string(), "night_stalker".to_string()],
                mini_bosses: vec!["alpha_wolf".to_string()],
                final_boss: "lunar_colossus".to_string(),
                normal_fill: 0.5,
            },
            progress_chance: 1.0,
            quests: Vec::new(),
        })
    }

    struct Harness {
        manager: Arc<InstanceManager>,
        boss: BossSequence,
        placer: Arc<FakePlacer>,
        spawner: Arc<RecordingSpawner>,
        notices: mpsc::UnboundedReceiver<InstanceNotice>,
    }

    fn harness_with(placer: FakePlacer) -> Harness {
        let config = test_config();
        let placer = Arc::new(placer);
        let spawner = Arc::new(RecordingSpawner::new());
        let (manager, notices) = InstanceManager::new(
            Arc::clone(&config),
            Arc::clone(&placer) as Arc<dyn AreaPlacer>,
            Arc::clone(&spawner) as Arc<dyn MobSpawner>,
        );
        let boss = BossSequence::new(
            config,
            Arc::clone(&manager),
            Arc::clone(&spawner) as Arc<dyn MobSpawner>,
        );
        Harness {
            manager,
            boss,
            placer,
            spawner,
            notices,
        }
    }

    /// Feed every pending spawn request back as a spawn notification, the
    /// way the host runtime would, and return the tags that were applied.
    async fn notify_spawns(h: &Harness) -> Vec<(EntityHandle, MobTag)> {
        let pending: Vec<(String, Coord)> = h.spawner.spawned.lock().unwrap().clone();
        let already = h.spawner.tags.lock().unwrap().len();
        for (mob_id, at) in pending.iter().skip(already) {
            let handle = h.spawner.next_handle();
            h.boss.on_spawned(handle, mob_id, *at).await;
        }
        h.spawner.tags.lock().unwrap().clone()
    }

    fn tags_with_role(tags: &[(EntityHandle, MobTag)], role: MobRole) -> Vec<(EntityHandle, MobTag)> {
        tags.iter()
            .filter(|(_, tag)| tag.role == role)
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_populate_strides_normal_markers_and_caps_minibosses() {
        let h = harness_with(FakePlacer::new());
        let (instance, _) = h.manager.get_or_create("p1").await.unwrap();
        h.boss.populate(&instance).await;

        // 8 normal markers at fill 0.5 -> 4 ordinary spawns, plus 3 mini-bosses
        assert_eq!(h.spawner.spawned_of("alpha_wolf").len(), 3);
        assert_eq!(h.spawner.spawned_count(), 7);
        assert_eq!(instance.mini_boss_total().await, 3);
        assert!(!instance.final_boss_spawned().await);
    }

    #[tokio::test]
    async fn test_fewer_mini_boss_markers_lower_the_bar() {
        let h = harness_with(FakePlacer::with_markers(1, 4, 2));
        let (instance, _) = h.manager.get_or_create("p1").await.unwrap();
        h.boss.populate(&instance).await;

        assert_eq!(instance.mini_boss_total().await, 2);
        let tags = notify_spawns(&h).await;
        let minis = tags_with_role(&tags, MobRole::MiniBoss);
        assert_eq!(minis.len(), 2);

        for (handle, tag) in &minis {
            h.boss.on_mob_killed(tag, *handle).await;
        }
        assert!(instance.final_boss_spawned().await);
        assert_eq!(h.spawner.spawned_of("lunar_colossus").len(), 1);
    }

    #[tokio::test]
    async fn test_full_sequence_mini_bosses_then_final() {
        let h = harness_with(FakePlacer::new());
        let (instance, _) = h.manager.get_or_create("p1").await.unwrap();
        h.boss.populate(&instance).await;

        let tags = notify_spawns(&h).await;
        let minis = tags_with_role(&tags, MobRole::MiniBoss);
        assert_eq!(minis.len(), 3);

        // two kills, one of them reported twice: still short of the bar
        h.boss.on_mob_killed(&minis[0].1, minis[0].0).await;
        h.boss.on_mob_killed(&minis[0].1, minis[0].0).await;
        h.boss.on_mob_killed(&minis[1].1, minis[1].0).await;
        assert_eq!(instance.mini_boss_kills().await, 2);
        assert!(!instance.final_boss_spawned().await);

        h.boss.on_mob_killed(&minis[2].1, minis[2].0).await;
        assert!(instance.final_boss_spawned().await);
        assert_eq!(h.spawner.spawned_of("lunar_colossus").len(), 1);

        // final boss notification comes in, then the kill completes the run
        let tags = notify_spawns(&h).await;
        let finals = tags_with_role(&tags, MobRole::FinalBoss);
        assert_eq!(finals.len(), 1);
        h.boss.on_mob_killed(&finals[0].1, finals[0].0).await;

        assert!(instance.is_completed().await);
        assert_eq!(instance.timer_kind(), Some(TimerKind::CompletionCleanup));
    }

    #[tokio::test]
    async fn test_stale_tag_is_ignored() {
        let h = harness_with(FakePlacer::new());
        let (instance, _) = h.manager.get_or_create("p1").await.unwrap();
        h.boss.populate(&instance).await;

        let tag = MobTag {
            owner_id: "p1".to_string(),
            instance_id: "solo_previous-run".to_string(),
            role: MobRole::MiniBoss,
        };
        h.boss.on_mob_killed(&tag, 99).await;
        assert_eq!(instance.mini_boss_kills().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_supersedes_expiry() {
        let mut h = harness_with(FakePlacer::new());
        let (instance, _) = h.manager.get_or_create("p1").await.unwrap();
        h.boss.populate(&instance).await;
        assert_eq!(instance.timer_kind(), Some(TimerKind::AutoExpiry));

        let tags = notify_spawns(&h).await;
        for (handle, tag) in tags_with_role(&tags, MobRole::MiniBoss) {
            h.boss.on_mob_killed(&tag, handle).await;
        }
        let tags = notify_spawns(&h).await;
        let (handle, tag) = tags_with_role(&tags, MobRole::FinalBoss)[0].clone();
        h.boss.on_mob_killed(&tag, handle).await;

        // the won run is on the 5s cleanup countdown; the 600s limit is dead
        assert_eq!(instance.timer_kind(), Some(TimerKind::CompletionCleanup));

        tokio::time::sleep(Duration::from_secs(10)).await;
        for _ in 0..50 {
            if h.manager.active_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.placer.cleared_count(), 1);

        // run far past the original deadline: teardown must not repeat
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(h.placer.cleared_count(), 1);

        let mut removed = 0;
        let mut expired = 0;
        while let Ok(notice) = h.notices.try_recv() {
            match notice {
                InstanceNotice::Removed { .. } => removed += 1,
                InstanceNotice::Expired { .. } => expired += 1,
                _ => {}
            }
        }
        assert_eq!(removed, 1);
        assert_eq!(expired, 0);
    }
}
