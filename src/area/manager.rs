//! Instance Manager
//!
//! Owns the active-instance map and the reserved-slot set. Creation runs the
//! slow placement step on the worker pool and rolls back completely on any
//! failure; `remove` is the one path through which every termination
//! (completion, death, disconnect, timeout, forced reset) tears an instance
//! down, so placed content is cleared and space released exactly once.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use super::allocator::{Coord, CoordinateRange, RegionSize, SlotAllocator};
use super::instance::{SoloInstance, TimerKind};
use super::placement::{AreaPlacer, MarkerKind, MobSpawner, PasteResult, PlaceError};
use crate::config::EventConfig;

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("no free slot left in the event arena")]
    NoFreeSlot,
    #[error("instance limit of {0} reached")]
    Capacity(u32),
    #[error(transparent)]
    Placement(#[from] PlaceError),
    #[error("expected exactly one player-entry marker, found {0}")]
    EntryMarkers(usize),
}

/// Lifecycle notifications for the presentation layer. The engine never
/// touches world state like player positions itself; the consumer of this
/// channel performs teleports and messaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceNotice {
    ExpiryWarning { owner_id: String, remaining_secs: u64 },
    Expired { owner_id: String },
    RunCompleted { owner_id: String },
    /// Bring the owner back to the configured safe location.
    ReturnOwner { owner_id: String, to: Coord },
    Removed { owner_id: String },
}

pub struct InstanceManager {
    config: Arc<EventConfig>,
    active: DashMap<String, Arc<SoloInstance>>,
    allocator: Mutex<SlotAllocator>,
    placer: Arc<dyn AreaPlacer>,
    spawner: Arc<dyn MobSpawner>,
    notices: mpsc::UnboundedSender<InstanceNotice>,
}

impl InstanceManager {
    pub fn new(
        config: Arc<EventConfig>,
        placer: Arc<dyn AreaPlacer>,
        spawner: Arc<dyn MobSpawner>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<InstanceNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let allocator = SlotAllocator::new(
            config.area.bounds,
            config.area.max_instances,
            config.area.spacing,
        );
        let manager = Arc::new(Self {
            config,
            active: DashMap::new(),
            allocator: Mutex::new(allocator),
            placer,
            spawner,
            notices,
        });
        (manager, rx)
    }

    pub fn get(&self, owner_id: &str) -> Option<Arc<SoloInstance>> {
        self.active.get(owner_id).map(|entry| Arc::clone(entry.value()))
    }

    /// The active instance whose placed bounds contain `at`, if any. Spawn
    /// notifications are resolved through this.
    pub fn find_by_coord(&self, at: Coord) -> Option<Arc<SoloInstance>> {
        self.active
            .iter()
            .find(|entry| entry.value().bounds.contains(at))
            .map(|entry| entry.value().clone())
    }

    /// Whether this exact instance is still the registered one for its owner.
    /// Timer callbacks check this before acting so a cancelled-but-fired
    /// task is a guaranteed no-op.
    pub fn is_current(&self, instance: &SoloInstance) -> bool {
        self.active
            .get(&instance.owner_id)
            .map(|current| current.id == instance.id)
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Create the owner's instance, or hand back the existing one. Returns
    /// `(instance, created)`; creation is idempotent per owner and reserves
    /// space exactly once.
    pub async fn get_or_create(
        self: &Arc<Self>,
        owner_id: &str,
    ) -> Result<(Arc<SoloInstance>, bool), CreateError> {
        if let Some(existing) = self.get(owner_id) {
            return Ok((existing, false));
        }

        let max = self.config.area.max_instances;
        if self.active.len() as u32 >= max {
            return Err(CreateError::Capacity(max));
        }

        // Probe and hold the slot with the nominal footprint in one step, so
        // a second creation overlapping in wall time cannot pick the same
        // cell while our content is still being placed.
        let origin = {
            let mut alloc = self.allocator.lock().await;
            let Some(origin) = alloc.find_free_slot() else {
                return Err(CreateError::NoFreeSlot);
            };
            alloc.reserve(origin, self.config.area.footprint);
            origin
        };

        // Placement can be slow and IO-bound; keep it off the main context.
        let placer = Arc::clone(&self.placer);
        let content_id = self.config.content_id.clone();
        let placed = tokio::task::spawn_blocking(move || placer.place(&content_id, origin)).await;

        let paste = match placed {
            Ok(Ok(paste)) => paste,
            Ok(Err(e)) => {
                self.allocator.lock().await.release(origin);
                return Err(e.into());
            }
            Err(join_err) => {
                self.allocator.lock().await.release(origin);
                return Err(
                    PlaceError::Failed(format!("placement task died: {}", join_err)).into(),
                );
            }
        };

        let instance = match self.build_instance(owner_id, origin, &paste) {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                self.clear_region(placed_bounds(origin, &paste)).await;
                self.allocator.lock().await.release(origin);
                return Err(e);
            }
        };

        // The reservation that stays for the instance's lifetime covers the
        // measured extent of what was actually placed, not the nominal size.
        self.allocator
            .lock()
            .await
            .reserve(origin, measured_extent(&paste));

        match self.active.entry(owner_id.to_string()) {
            Entry::Occupied(entry) => {
                // lost a same-owner race; keep the registered instance
                let existing = entry.get().clone();
                drop(entry);
                self.clear_region(instance.bounds).await;
                self.allocator.lock().await.release(origin);
                return Ok((existing, false));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&instance));
            }
        }

        self.schedule_expiry(&instance);
        self.schedule_reminders(&instance);

        info!(
            "Created solo instance {} for {} at ({}, {})",
            instance.id, owner_id, origin.x, origin.z
        );
        Ok((instance, true))
    }

    fn build_instance(
        &self,
        owner_id: &str,
        origin: Coord,
        paste: &PasteResult,
    ) -> Result<SoloInstance, CreateError> {
        let entries = paste.markers_of(MarkerKind::PlayerEntry);
        if entries.len() != 1 {
            return Err(CreateError::EntryMarkers(entries.len()));
        }

        Ok(SoloInstance::new(
            owner_id,
            origin,
            placed_bounds(origin, paste),
            entries[0],
            paste.markers_of(MarkerKind::NormalSpawn).to_vec(),
            paste.markers_of(MarkerKind::MiniBoss).to_vec(),
            paste.markers_of(MarkerKind::FinalBoss).first().copied(),
        ))
    }

    /// Tear the owner's instance down: cancel its scheduled tasks, despawn
    /// tracked entities, clear placed content, release the reservation.
    /// Idempotent; returns false when the owner has no active instance.
    pub async fn remove(&self, owner_id: &str) -> bool {
        let Some((_, instance)) = self.active.remove(owner_id) else {
            return false;
        };

        instance.cancel_tasks();
        for entity in instance.drain_tracked().await {
            self.spawner.despawn(entity);
        }
        self.clear_region(instance.bounds).await;
        self.allocator.lock().await.release(instance.origin);

        info!("Removed solo instance {} of {}", instance.id, owner_id);
        let _ = self.notices.send(InstanceNotice::Removed {
            owner_id: owner_id.to_string(),
        });
        true
    }

    /// The run was won: stop the clock and schedule the delayed teardown.
    /// Installing the cleanup timer aborts the pending auto-expiry timer, so
    /// the two cleanup paths can never both fire.
    pub async fn start_completion_countdown(self: &Arc<Self>, instance: &Arc<SoloInstance>) {
        if !instance.mark_completed().await {
            return;
        }
        instance.cancel_reminders();
        let _ = self.notices.send(InstanceNotice::RunCompleted {
            owner_id: instance.owner_id.clone(),
        });

        let manager = Arc::clone(self);
        let instance_ref = Arc::clone(instance);
        let delay = self.config.timing.cleanup_delay;
        let exit = self.config.exit_point;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            instance_ref.disarm_timer();
            if !manager.is_current(&instance_ref) {
                return;
            }
            let _ = manager.notices.send(InstanceNotice::ReturnOwner {
                owner_id: instance_ref.owner_id.clone(),
                to: exit,
            });
            manager.remove(&instance_ref.owner_id).await;
        });
        instance.set_timer(TimerKind::CompletionCleanup, handle);
    }

    fn schedule_expiry(self: &Arc<Self>, instance: &Arc<SoloInstance>) {
        let manager = Arc::clone(self);
        let instance_ref = Arc::clone(instance);
        let deadline = self.config.timing.expiry;
        let exit = self.config.exit_point;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            // Empty the slot first: teardown must never abort the task that
            // is performing it.
            instance_ref.disarm_timer();
            if instance_ref.is_completed().await || !manager.is_current(&instance_ref) {
                return;
            }
            let owner_id = instance_ref.owner_id.clone();
            warn!(
                "Solo instance {} of {} hit its time limit",
                instance_ref.id, owner_id
            );
            let _ = manager.notices.send(InstanceNotice::Expired {
                owner_id: owner_id.clone(),
            });
            let _ = manager.notices.send(InstanceNotice::ReturnOwner {
                owner_id,
                to: exit,
            });
            manager.remove(&instance_ref.owner_id).await;
        });
        instance.set_timer(TimerKind::AutoExpiry, handle);
    }

    fn schedule_reminders(self: &Arc<Self>, instance: &Arc<SoloInstance>) {
        for offset in &self.config.timing.reminder_offsets {
            let Some(fire_in) = self.config.timing.expiry.checked_sub(*offset) else {
                continue;
            };
            let manager = Arc::clone(self);
            let instance_ref = Arc::clone(instance);
            let remaining_secs = offset.as_secs();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(fire_in).await;
                if instance_ref.is_completed().await || !manager.is_current(&instance_ref) {
                    return;
                }
                let _ = manager.notices.send(InstanceNotice::ExpiryWarning {
                    owner_id: instance_ref.owner_id.clone(),
                    remaining_secs,
                });
            });
            instance.add_reminder(handle);
        }
    }

    /// Remove every active instance, e.g. when the event ends.
    pub async fn shutdown(&self) {
        let owners: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        for owner_id in owners {
            self.remove(&owner_id).await;
        }
    }

    async fn clear_region(&self, bounds: CoordinateRange) {
        let placer = Arc::clone(&self.placer);
        if let Err(e) = tokio::task::spawn_blocking(move || placer.clear(bounds)).await {
            error!("Content clear task died: {}", e);
        }
    }

    #[cfg(test)]
    pub async fn reserved_count(&self) -> usize {
        self.allocator.lock().await.reserved_count()
    }
}

fn placed_bounds(origin: Coord, paste: &PasteResult) -> CoordinateRange {
    CoordinateRange::from_origin(
        origin.offset(paste.applied_offset.x, paste.applied_offset.z),
        paste.region_size,
    )
}

fn measured_extent(paste: &PasteResult) -> RegionSize {
    RegionSize::new(
        paste.applied_offset.x.max(0) + paste.region_size.width,
        paste.applied_offset.z.max(0) + paste.region_size.depth,
    )
}
