//! Background persistence work.
//!
//! The engine never mutates player state from a storage task. The service
//! describes each write as a `StorageJob`, the engine runs it on a blocking
//! thread, and the resulting `JobOutcome` is handed back to the service on
//! the engine task.

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use crate::missions::reset::{sweep_expired, SweepStats};
use crate::missions::storage::{MissionProgress, MissionRecord, MissionStorage};
use crate::missions::types::{MissionId, PlayerId};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageJob {
    /// Fetch a player's stored missions, dropping expired ones.
    Load { player: PlayerId },
    /// Write progress back. `departed` names a disconnected player whose
    /// entry is dropped once this save has run.
    Save {
        missions: Vec<MissionProgress>,
        departed: Option<PlayerId>,
    },
    Remove { ids: Vec<MissionId> },
    Complete { player: PlayerId, mission: MissionId },
    /// Initialise the store and delete every expired record.
    Sweep,
}

impl StorageJob {
    pub fn label(&self) -> &'static str {
        match self {
            StorageJob::Load { .. } => "load",
            StorageJob::Save { .. } => "save",
            StorageJob::Remove { .. } => "remove",
            StorageJob::Complete { .. } => "complete",
            StorageJob::Sweep => "sweep",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `None` when the store could not be read.
    Loaded {
        player: PlayerId,
        records: Option<Vec<MissionRecord>>,
    },
    Completed {
        player: PlayerId,
        mission: MissionId,
        persisted: bool,
    },
    Saved {
        count: usize,
        ok: bool,
        departed: Option<PlayerId>,
    },
    Removed { count: usize, ok: bool },
    Swept(Option<SweepStats>),
}

/// Run one job against the store. Never fails; errors are logged and folded
/// into the outcome.
pub fn execute_job(storage: &dyn MissionStorage, job: StorageJob, now: DateTime<Utc>) -> JobOutcome {
    match job {
        StorageJob::Load { player } => JobOutcome::Loaded {
            player,
            records: load_live(storage, player, now),
        },
        StorageJob::Save { missions, departed } => {
            let ok = match storage.update(&missions) {
                Ok(()) => true,
                Err(e) => {
                    error!("failed to save {} missions: {}", missions.len(), e);
                    false
                }
            };
            JobOutcome::Saved {
                count: missions.len(),
                ok,
                departed,
            }
        }
        StorageJob::Remove { ids } => {
            let ok = match storage.remove(&ids) {
                Ok(()) => true,
                Err(e) => {
                    error!("failed to remove missions {:?}: {}", ids, e);
                    false
                }
            };
            JobOutcome::Removed { count: ids.len(), ok }
        }
        StorageJob::Complete { player, mission } => {
            let persisted = match storage.complete(mission) {
                Ok(true) => true,
                Ok(false) => {
                    warn!("player {}: mission {} vanished before completion was stored", player, mission);
                    false
                }
                Err(e) => {
                    error!("player {}: failed to store completion of mission {}: {}", player, mission, e);
                    false
                }
            };
            JobOutcome::Completed {
                player,
                mission,
                persisted,
            }
        }
        StorageJob::Sweep => {
            let stats = storage
                .initialize()
                .and_then(|()| sweep_expired(storage, now))
                .map_err(|e| error!("startup sweep failed: {}", e))
                .ok();
            JobOutcome::Swept(stats)
        }
    }
}

fn load_live(storage: &dyn MissionStorage, player: PlayerId, now: DateTime<Utc>) -> Option<Vec<MissionRecord>> {
    let records = match storage.list_by_player(player) {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to load missions for {}: {}", player, e);
            return None;
        }
    };
    let (expired, live): (Vec<MissionRecord>, Vec<MissionRecord>) = records
        .into_iter()
        .partition(|record| record.expires_at.is_some_and(|at| at < now));
    if !expired.is_empty() {
        let ids: Vec<MissionId> = expired.iter().map(|record| record.id).collect();
        debug!("player {}: dropping {} expired missions on load", player, ids.len());
        if let Err(e) = storage.remove(&ids) {
            warn!("player {}: failed to remove expired missions: {}", player, e);
        }
    }
    Some(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::missions::storage::SledMissionStoreBuilder;
    use crate::missions::types::MissionDefinition;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store() -> (TempDir, crate::missions::storage::SledMissionStore) {
        let dir = TempDir::new().unwrap();
        let store = SledMissionStoreBuilder::new(dir.path().join("db"))
            .temporary()
            .open()
            .unwrap();
        (dir, store)
    }

    #[test]
    fn load_drops_and_deletes_expired_records() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mission = MissionDefinition::new("EventPlayerJump", "UserId", 10, "jump10").instantiate(None);
        let stale = store.add(3, &mission, Some(now - Duration::seconds(1))).unwrap();
        let live = store.add(3, &mission, Some(now + Duration::hours(1))).unwrap();

        let outcome = execute_job(&store, StorageJob::Load { player: 3 }, now);
        let JobOutcome::Loaded { records: Some(records), .. } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![live]);
        assert!(store.get(stale).is_err());
    }

    #[test]
    fn complete_of_missing_mission_is_not_persisted() {
        let (_dir, store) = store();
        let outcome = execute_job(&store, StorageJob::Complete { player: 3, mission: 404 }, Utc::now());
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                player: 3,
                mission: 404,
                persisted: false
            }
        );
    }

    #[test]
    fn save_reports_departed_player() {
        let (_dir, store) = store();
        let mission = MissionDefinition::new("EventPlayerJump", "UserId", 10, "jump10").instantiate(None);
        let id = store.add(3, &mission, None).unwrap();
        let job = StorageJob::Save {
            missions: vec![MissionProgress { id, progress: 4, completed: false }],
            departed: Some(3),
        };
        assert_eq!(
            execute_job(&store, job, Utc::now()),
            JobOutcome::Saved {
                count: 1,
                ok: true,
                departed: Some(3)
            }
        );
        assert_eq!(store.get(id).unwrap().progress, 4);
    }

    #[test]
    fn sweep_reports_stats() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mission = MissionDefinition::new("EventPlayerJump", "UserId", 10, "jump10").instantiate(None);
        store.add(3, &mission, Some(now - Duration::days(2))).unwrap();
        let outcome = execute_job(&store, StorageJob::Sweep, now);
        assert_eq!(
            outcome,
            JobOutcome::Swept(Some(SweepStats {
                expired_found: 1,
                removed: 1
            }))
        );
        assert_eq!(StorageJob::Sweep.label(), "sweep");
    }
}
