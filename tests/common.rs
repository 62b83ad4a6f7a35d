//! Test utilities & fixtures.
//! A recording host, a store wrapper that can be told to fail, and a
//! ready-to-drive `MissionService` backed by a throwaway sled database.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tempfile::TempDir;

use missionkeeper::host::{
    CommandExecutor, Host, Notice, NotificationSink, PermissionOracle, PlayerDirectory, PlayerInfo, WebhookNotifier,
};
use missionkeeper::missions::errors::MissionError;
use missionkeeper::missions::storage::{MissionProgress, MissionRecord};
use missionkeeper::missions::types::{MissionId, UserId};
use missionkeeper::missions::{
    MissionCatalog, MissionDefinition, MissionService, MissionStorage, PlayerId, PlayerMission, ResetMode,
    ServiceSettings, SledMissionStore, SledMissionStoreBuilder, Team,
};

#[derive(Default)]
pub struct RecordingHost {
    pub players: DashMap<PlayerId, PlayerInfo>,
    pub flags: DashMap<PlayerId, HashSet<String>>,
    pub commands: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<(PlayerId, Notice)>>,
}

impl RecordingHost {
    pub fn add_player(&self, id: PlayerId, user_id: UserId, name: &str, team: Team) {
        self.players.insert(id, PlayerInfo::new(id, user_id, name, team));
    }

    pub fn grant(&self, id: PlayerId, flag: &str) {
        self.flags.entry(id).or_default().insert(flag.to_string());
    }

    pub fn revoke(&self, id: PlayerId, flag: &str) {
        if let Some(mut flags) = self.flags.get_mut(&id) {
            flags.remove(flag);
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn notices_for(&self, id: PlayerId) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(player, _)| *player == id)
            .map(|(_, notice)| notice.clone())
            .collect()
    }

    pub fn completed_notices(&self, id: PlayerId) -> usize {
        self.notices_for(id)
            .iter()
            .filter(|n| matches!(n, Notice::MissionCompleted { .. }))
            .count()
    }
}

impl PlayerDirectory for RecordingHost {
    fn get(&self, id: PlayerId) -> Option<PlayerInfo> {
        self.players.get(&id).map(|p| p.clone())
    }

    fn by_user_id(&self, user_id: UserId) -> Option<PlayerInfo> {
        self.players
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.value().clone())
    }
}

impl PermissionOracle for RecordingHost {
    fn has_flag(&self, player: PlayerId, flag: &str) -> bool {
        self.flags.get(&player).is_some_and(|f| f.contains(flag))
    }
}

impl CommandExecutor for RecordingHost {
    fn execute(&self, command: &str) {
        self.commands.lock().unwrap().push(command.to_string());
    }
}

impl NotificationSink for RecordingHost {
    fn send_to_player(&self, player: PlayerId, notice: Notice) {
        self.notices.lock().unwrap().push((player, notice));
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    pub completed: Mutex<Vec<(PlayerId, MissionId)>>,
    pub all_complete: Mutex<Vec<PlayerId>>,
}

impl WebhookNotifier for RecordingWebhook {
    fn on_mission_complete(&self, player: &PlayerInfo, mission: &PlayerMission) {
        self.completed.lock().unwrap().push((player.id, mission.id));
    }

    fn on_all_missions_complete(&self, player: &PlayerInfo, _missions: &[PlayerMission]) {
        self.all_complete.lock().unwrap().push(player.id);
    }
}

/// Sled store that can be switched into failure modes.
pub struct FlakyStore {
    pub inner: SledMissionStore,
    pub fail_complete: AtomicBool,
    pub fail_load: AtomicBool,
    pub fail_add: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SledMissionStore) -> Self {
        Self {
            inner,
            fail_complete: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
            fail_add: AtomicBool::new(false),
        }
    }
}

fn injected() -> MissionError {
    MissionError::Internal("injected failure".into())
}

impl MissionStorage for FlakyStore {
    fn initialize(&self) -> Result<(), MissionError> {
        self.inner.initialize()
    }

    fn list_by_player(&self, player_id: PlayerId) -> Result<Vec<MissionRecord>, MissionError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.list_by_player(player_id)
    }

    fn add(
        &self,
        player_id: PlayerId,
        mission: &PlayerMission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MissionId, MissionError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.add(player_id, mission, expires_at)
    }

    fn update(&self, missions: &[MissionProgress]) -> Result<(), MissionError> {
        self.inner.update(missions)
    }

    fn remove(&self, ids: &[MissionId]) -> Result<(), MissionError> {
        self.inner.remove(ids)
    }

    fn complete(&self, id: MissionId) -> Result<bool, MissionError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.complete(id)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<MissionRecord>, MissionError> {
        self.inner.list_expired(now)
    }
}

pub fn settings(mode: ResetMode, normal: usize, vip: usize) -> ServiceSettings {
    ServiceSettings {
        quota_normal: normal,
        quota_vip: vip,
        minimum_players: 0,
        allow_progress_during_warmup: false,
        event_debug_logs: false,
        reset_mode: mode,
        primary_command: "missions".to_string(),
        vip_flags: vec!["@missions/vip".to_string()],
        vip_name_domain: None,
    }
}

/// Kill missions of increasing size, all on the attacker.
pub fn kill_missions(count: u32) -> Vec<MissionDefinition> {
    (1..=count)
        .map(|n| {
            MissionDefinition::new("EventPlayerDeath", "Attacker", n, &format!("kill{}", n))
                .with_reward(&format!("{} credits", n * 100), &["give {steamid64} credits"])
        })
        .collect()
}

pub fn open_store(dir: &TempDir) -> SledMissionStore {
    SledMissionStoreBuilder::new(dir.path().join("missions"))
        .temporary()
        .open()
        .unwrap()
}

pub struct Fixture {
    pub dir: TempDir,
    pub host: Arc<RecordingHost>,
    pub webhook: Arc<RecordingWebhook>,
    pub store: Arc<FlakyStore>,
    pub service: MissionService,
}

impl Fixture {
    pub fn new(definitions: Vec<MissionDefinition>, settings: ServiceSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::new(open_store(&dir)));
        Self::with_store(dir, store, definitions, settings)
    }

    pub fn with_store(
        dir: TempDir,
        store: Arc<FlakyStore>,
        definitions: Vec<MissionDefinition>,
        settings: ServiceSettings,
    ) -> Self {
        let host = Arc::new(RecordingHost::default());
        let webhook = Arc::new(RecordingWebhook::default());
        let catalog = Arc::new(MissionCatalog::new(definitions).unwrap());
        let service = MissionService::new(
            settings,
            catalog,
            store.clone(),
            Host::from_shared(host.clone()).with_webhook(webhook.clone()),
        )
        .with_seed(7);
        Self {
            dir,
            host,
            webhook,
            store,
            service,
        }
    }

    /// Add the player to the host, register them and run their load.
    pub fn connect(&mut self, id: PlayerId, user_id: UserId, team: Team) {
        self.host.add_player(id, user_id, &format!("player{}", user_id), team);
        assert!(self.service.player_connected(id));
        self.service.flush_jobs_blocking();
    }

    pub fn missions(&self, id: PlayerId) -> Vec<PlayerMission> {
        self.service
            .registry()
            .snapshot(id)
            .map(|state| state.missions)
            .unwrap_or_default()
    }

    pub fn mission_with_phrase(&self, id: PlayerId, phrase: &str) -> Option<PlayerMission> {
        self.missions(id).into_iter().find(|m| m.phrase == phrase)
    }
}
