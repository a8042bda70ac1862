use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::allocator::{Coord, CoordinateRange};
use super::placement::EntityHandle;

/// Which lifecycle timer currently occupies the instance's timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Hard wall-clock deadline from creation.
    AutoExpiry,
    /// Fixed delay after the final boss falls, then teardown.
    CompletionCleanup,
}

struct TimerSlot {
    kind: TimerKind,
    handle: JoinHandle<()>,
}

/// One player's live solo run: bounds, marker-derived spawn points, boss-kill
/// tallies, and the scheduled lifecycle tasks. Created by the instance
/// manager, mutated by the boss sequence, destroyed only through
/// `InstanceManager::remove`.
pub struct SoloInstance {
    pub id: String,
    pub owner_id: String,
    /// Slot coordinate the reservation is keyed by.
    pub origin: Coord,
    /// Measured bounds of the placed content.
    pub bounds: CoordinateRange,
    /// Where the owner is teleported on entry.
    pub entry_point: Coord,
    pub normal_markers: Vec<Coord>,
    pub mini_boss_markers: Vec<Coord>,
    pub final_boss_marker: Option<Coord>,
    pub created_at: DateTime<Utc>,

    /// Entities spawned for this run, despawned at teardown.
    tracked: RwLock<HashSet<EntityHandle>>,
    killed_mini_bosses: RwLock<HashSet<EntityHandle>>,
    /// How many mini-bosses were actually spawned; the kill count required
    /// before the final boss appears.
    mini_boss_total: RwLock<usize>,
    final_boss_spawned: RwLock<bool>,
    completed: RwLock<bool>,

    /// Exactly one lifecycle timer is pending at a time: auto-expiry until the
    /// run is won, then the completion cleanup countdown. Replacing the slot
    /// always aborts the previous occupant.
    timer: StdMutex<Option<TimerSlot>>,
    reminders: StdMutex<Vec<JoinHandle<()>>>,
}

impl SoloInstance {
    pub fn new(
        owner_id: &str,
        origin: Coord,
        bounds: CoordinateRange,
        entry_point: Coord,
        normal_markers: Vec<Coord>,
        mini_boss_markers: Vec<Coord>,
        final_boss_marker: Option<Coord>,
    ) -> Self {
        Self {
            id: format!("solo_{}", Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            origin,
            bounds,
            entry_point,
            normal_markers,
            mini_boss_markers,
            final_boss_marker,
            created_at: Utc::now(),
            tracked: RwLock::new(HashSet::new()),
            killed_mini_bosses: RwLock::new(HashSet::new()),
            mini_boss_total: RwLock::new(0),
            final_boss_spawned: RwLock::new(false),
            completed: RwLock::new(false),
            timer: StdMutex::new(None),
            reminders: StdMutex::new(Vec::new()),
        }
    }

    pub async fn track(&self, entity: EntityHandle) {
        self.tracked.write().await.insert(entity);
    }

    /// Take every tracked handle for teardown.
    pub async fn drain_tracked(&self) -> Vec<EntityHandle> {
        self.tracked.write().await.drain().collect()
    }

    /// Record a mini-boss kill; re-recording the same handle has no effect.
    /// Returns the distinct kill count.
    pub async fn record_mini_boss_kill(&self, entity: EntityHandle) -> usize {
        let mut killed = self.killed_mini_bosses.write().await;
        killed.insert(entity);
        killed.len()
    }

    pub async fn mini_boss_kills(&self) -> usize {
        self.killed_mini_bosses.read().await.len()
    }

    pub async fn set_mini_boss_total(&self, total: usize) {
        *self.mini_boss_total.write().await = total;
    }

    pub async fn mini_boss_total(&self) -> usize {
        *self.mini_boss_total.read().await
    }

    /// Flip the final-boss flag. Returns false if it was already set, so the
    /// spawn happens once no matter how many kills race past the threshold.
    pub async fn mark_final_boss_spawned(&self) -> bool {
        let mut spawned = self.final_boss_spawned.write().await;
        if *spawned {
            return false;
        }
        *spawned = true;
        true
    }

    pub async fn final_boss_spawned(&self) -> bool {
        *self.final_boss_spawned.read().await
    }

    pub async fn mark_completed(&self) -> bool {
        let mut completed = self.completed.write().await;
        if *completed {
            return false;
        }
        *completed = true;
        true
    }

    pub async fn is_completed(&self) -> bool {
        *self.completed.read().await
    }

    /// Install a lifecycle timer, aborting whichever timer held the slot
    /// before. This is what makes auto-expiry and completion cleanup mutually
    /// exclusive.
    pub fn set_timer(&self, kind: TimerKind, handle: JoinHandle<()>) {
        let mut slot = self.timer.lock().unwrap();
        if let Some(old) = slot.take() {
            old.handle.abort();
        }
        *slot = Some(TimerSlot { kind, handle });
    }

    /// Empty the timer slot without aborting. A fired timer calls this on
    /// itself before acting so teardown never aborts the task that is
    /// currently performing it.
    pub fn disarm_timer(&self) {
        let _ = self.timer.lock().unwrap().take();
    }

    pub fn timer_kind(&self) -> Option<TimerKind> {
        self.timer.lock().unwrap().as_ref().map(|slot| slot.kind)
    }

    pub fn add_reminder(&self, handle: JoinHandle<()>) {
        self.reminders.lock().unwrap().push(handle);
    }

    pub fn cancel_reminders(&self) {
        for handle in self.reminders.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Abort everything still scheduled for this instance.
    pub fn cancel_tasks(&self) {
        if let Some(slot) = self.timer.lock().unwrap().take() {
            slot.handle.abort();
        }
        self.cancel_reminders();
    }
}
