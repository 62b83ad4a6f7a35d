use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sled::IVec;

use crate::missions::errors::MissionError;
use crate::missions::types::{MissionId, PlayerId, PlayerMission, PropertyFilters};

pub const MISSION_SCHEMA_VERSION: u8 = 1;

const TREE_MISSIONS: &str = "missions";
const TREE_PLAYER_INDEX: &str = "missions_by_player";

/// Persisted shape of one assigned mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: MissionId,
    pub player_id: PlayerId,
    pub event: String,
    pub target: String,
    pub amount: u32,
    pub phrase: String,
    pub reward_phrase: String,
    /// Pipe-joined reward command templates
    pub reward_commands: String,
    pub progress: u32,
    pub completed: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// JSON-encoded property filter map
    pub event_properties: Option<String>,
    pub map_name: Option<String>,
    pub flag: Option<String>,
    pub schema_version: u8,
}

impl MissionRecord {
    pub fn from_mission(
        player_id: PlayerId,
        mission: &PlayerMission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: mission.id,
            player_id,
            event: mission.event.clone(),
            target: mission.target.clone(),
            amount: mission.amount,
            phrase: mission.phrase.clone(),
            reward_phrase: mission.reward_phrase.clone(),
            reward_commands: mission.reward_commands.join("|"),
            progress: mission.progress,
            completed: mission.completed,
            expires_at,
            event_properties: encode_filters(mission.event_properties.as_ref()),
            map_name: mission.map_name.clone(),
            flag: mission.flag.clone(),
            schema_version: MISSION_SCHEMA_VERSION,
        }
    }

    pub fn reward_command_list(&self) -> Vec<String> {
        self.reward_commands
            .split('|')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Rebuild the in-memory mission. Undecodable filters load as "no filter".
    pub fn to_mission(&self) -> PlayerMission {
        PlayerMission {
            id: self.id,
            event: self.event.clone(),
            target: self.target.clone(),
            amount: self.amount,
            phrase: self.phrase.clone(),
            reward_phrase: self.reward_phrase.clone(),
            reward_commands: self.reward_command_list(),
            event_properties: decode_filters(self.id, self.event_properties.as_deref()),
            map_name: self.map_name.clone(),
            flag: self.flag.clone(),
            progress: self.progress,
            completed: self.completed,
            expires_at: self.expires_at,
        }
    }
}

/// Progress snapshot written back on save points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionProgress {
    pub id: MissionId,
    pub progress: u32,
    pub completed: bool,
}

impl From<&PlayerMission> for MissionProgress {
    fn from(mission: &PlayerMission) -> Self {
        Self {
            id: mission.id,
            progress: mission.progress,
            completed: mission.completed,
        }
    }
}

pub fn encode_filters(filters: Option<&PropertyFilters>) -> Option<String> {
    match filters {
        Some(map) if !map.is_empty() => serde_json::to_string(map).ok(),
        _ => None,
    }
}

pub fn decode_filters(id: MissionId, json: Option<&str>) -> Option<PropertyFilters> {
    let json = json.filter(|s| !s.is_empty())?;
    match serde_json::from_str::<PropertyFilters>(json) {
        Ok(filters) => Some(filters),
        Err(e) => {
            warn!("mission {}: ignoring malformed property filters: {}", id, e);
            None
        }
    }
}

/// Persistence contract required by the engine. Implementations must be
/// callable from blocking background tasks.
pub trait MissionStorage: Send + Sync {
    fn initialize(&self) -> Result<(), MissionError>;

    fn list_by_player(&self, player_id: PlayerId) -> Result<Vec<MissionRecord>, MissionError>;

    /// Insert a new mission and return its positive id. Runs on the engine
    /// task, so implementations should not wait for a disk sync.
    fn add(
        &self,
        player_id: PlayerId,
        mission: &PlayerMission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MissionId, MissionError>;

    fn update(&self, missions: &[MissionProgress]) -> Result<(), MissionError>;

    fn remove(&self, ids: &[MissionId]) -> Result<(), MissionError>;

    /// Mark a mission completed. `Ok(false)` when the record does not exist.
    fn complete(&self, id: MissionId) -> Result<bool, MissionError>;

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<MissionRecord>, MissionError>;
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct SledMissionStoreBuilder {
    path: PathBuf,
    temporary: bool,
}

impl SledMissionStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// Delete the database when the store is dropped.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn open(self) -> Result<SledMissionStore, MissionError> {
        SledMissionStore::open_with_options(self.path, self.temporary)
    }
}

/// Sled-backed mission persistence.
pub struct SledMissionStore {
    db: sled::Db,
    missions: sled::Tree,
    by_player: sled::Tree,
}

impl SledMissionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MissionError> {
        Self::open_with_options(path, false)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, temporary: bool) -> Result<Self, MissionError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::Config::new()
            .path(path_ref)
            .temporary(temporary)
            .open()?;
        let missions = db.open_tree(TREE_MISSIONS)?;
        let by_player = db.open_tree(TREE_PLAYER_INDEX)?;
        Ok(Self {
            db,
            missions,
            by_player,
        })
    }

    fn mission_key(id: MissionId) -> Vec<u8> {
        format!("missions:{:020}", id).into_bytes()
    }

    fn player_prefix(player_id: PlayerId) -> Vec<u8> {
        format!("players:{:020}:", player_id).into_bytes()
    }

    fn player_index_key(player_id: PlayerId, id: MissionId) -> Vec<u8> {
        format!("players:{:020}:{:020}", player_id, id).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, MissionError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize(bytes: IVec) -> Result<MissionRecord, MissionError> {
        let record: MissionRecord = bincode::deserialize(&bytes)?;
        if record.schema_version != MISSION_SCHEMA_VERSION {
            return Err(MissionError::SchemaMismatch {
                entity: "mission",
                expected: MISSION_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: MissionId) -> Result<MissionRecord, MissionError> {
        let Some(bytes) = self.missions.get(Self::mission_key(id))? else {
            return Err(MissionError::NotFound(format!("mission: {}", id)));
        };
        Self::deserialize(bytes)
    }

    fn put(&self, record: &MissionRecord) -> Result<(), MissionError> {
        let bytes = Self::serialize(record)?;
        self.missions.insert(Self::mission_key(record.id), bytes)?;
        Ok(())
    }

    /// Rewrite one existing record in a single compare-and-swap step.
    ///
    /// A record removed concurrently stays removed; returns whether it existed.
    /// `edit` may run more than once when another writer wins the race.
    fn modify(&self, id: MissionId, mut edit: impl FnMut(&mut MissionRecord)) -> Result<bool, MissionError> {
        let mut failure = None;
        let mut found = false;
        self.missions.update_and_fetch(Self::mission_key(id), |current| {
            failure = None;
            found = false;
            let bytes = current?;
            found = true;
            let rewritten = Self::deserialize(IVec::from(bytes)).and_then(|mut record| {
                edit(&mut record);
                Self::serialize(&record)
            });
            match rewritten {
                Ok(updated) => Some(updated),
                Err(e) => {
                    failure = Some(e);
                    Some(bytes.to_vec())
                }
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(found),
        }
    }

    /// Count every stored record.
    pub fn count(&self) -> usize {
        self.missions.len()
    }
}

impl MissionStorage for SledMissionStore {
    fn initialize(&self) -> Result<(), MissionError> {
        // Sanity check existing records decode with the current schema.
        if let Some(entry) = self.missions.iter().next() {
            let (_, value) = entry?;
            Self::deserialize(value)?;
        }
        debug!("mission store ready ({} records)", self.missions.len());
        Ok(())
    }

    fn list_by_player(&self, player_id: PlayerId) -> Result<Vec<MissionRecord>, MissionError> {
        let mut records = Vec::new();
        for entry in self.by_player.scan_prefix(Self::player_prefix(player_id)) {
            let (_, value) = entry?;
            let id = i64::from_be_bytes(
                value
                    .as_ref()
                    .try_into()
                    .map_err(|_| MissionError::Internal("corrupt player index entry".into()))?,
            );
            match self.missions.get(Self::mission_key(id))? {
                Some(bytes) => records.push(Self::deserialize(bytes)?),
                None => warn!("player {} index points at missing mission {}", player_id, id),
            }
        }
        Ok(records)
    }

    fn add(
        &self,
        player_id: PlayerId,
        mission: &PlayerMission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MissionId, MissionError> {
        let id = self.db.generate_id()? as i64 + 1;
        let mut record = MissionRecord::from_mission(player_id, mission, expires_at);
        record.id = id;
        self.put(&record)?;
        self.by_player
            .insert(Self::player_index_key(player_id, id), &id.to_be_bytes())?;
        // runs on the engine task; later save points and sled's background
        // flusher make it durable
        Ok(id)
    }

    fn update(&self, missions: &[MissionProgress]) -> Result<(), MissionError> {
        for snapshot in missions {
            let found = self.modify(snapshot.id, |record| {
                // snapshots from parallel saves may arrive out of order
                record.progress = record.progress.max(snapshot.progress);
                // never un-complete a stored mission
                record.completed = record.completed || snapshot.completed;
            })?;
            if !found {
                debug!("skipping update for removed mission {}", snapshot.id);
            }
        }
        self.missions.flush()?;
        Ok(())
    }

    fn remove(&self, ids: &[MissionId]) -> Result<(), MissionError> {
        for id in ids {
            if let Some(bytes) = self.missions.remove(Self::mission_key(*id))? {
                let record = Self::deserialize(bytes)?;
                self.by_player
                    .remove(Self::player_index_key(record.player_id, *id))?;
            }
        }
        self.db.flush()?;
        Ok(())
    }

    fn complete(&self, id: MissionId) -> Result<bool, MissionError> {
        let found = self.modify(id, |record| {
            record.completed = true;
            record.progress = record.progress.max(record.amount);
        })?;
        if found {
            self.missions.flush()?;
        }
        Ok(found)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<MissionRecord>, MissionError> {
        let mut expired = Vec::new();
        for entry in self.missions.iter() {
            let (_, value) = entry?;
            let record = Self::deserialize(value)?;
            if record.expires_at.is_some_and(|at| at < now) {
                expired.push(record);
            }
        }
        Ok(expired)
    }
}
