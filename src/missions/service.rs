//! Mission service: the thread-confined core.
//!
//! `MissionService` owns every mutation of player mission state. It is driven
//! by one caller at a time (the engine task, or a test calling it directly)
//! and never blocks on storage except for the synchronous `add` during
//! assignment. All other writes are queued as [`StorageJob`]s and their
//! outcomes come back through [`MissionService::apply_outcome`].

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::host::{Host, Notice, PlayerInfo};
use crate::logutil::{escape_log, format_property_bag};
use crate::missions::assignment::{self, AssignmentContext, QuotaOutcome};
use crate::missions::catalog::MissionCatalog;
use crate::missions::completion;
use crate::missions::events::{resolve_actor, route_round_end, EventRouter, GameEvent};
use crate::missions::jobs::{execute_job, JobOutcome, StorageJob};
use crate::missions::matcher;
use crate::missions::reset::{take_expired, time_until_expiration, ResetMode, TimeRemaining};
use crate::missions::registry::PlayerRegistry;
use crate::missions::storage::{MissionProgress, MissionRecord, MissionStorage};
use crate::missions::types::{
    MissionId, PlayerId, PlayerState, PropertyBag, PLAYTIME_EVENT, ROUND_END_EVENT,
};

/// Runtime knobs the service needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub quota_normal: usize,
    pub quota_vip: usize,
    pub minimum_players: usize,
    pub allow_progress_during_warmup: bool,
    pub event_debug_logs: bool,
    pub reset_mode: ResetMode,
    /// Command named in "new missions" notices
    pub primary_command: String,
    pub vip_flags: Vec<String>,
    pub vip_name_domain: Option<String>,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        let missions = &config.missions;
        Self {
            quota_normal: missions.amount_normal,
            quota_vip: missions.amount_vip,
            minimum_players: missions.minimum_players,
            allow_progress_during_warmup: missions.allow_progress_during_warmup,
            event_debug_logs: missions.event_debug_logs,
            reset_mode: missions.reset_mode,
            primary_command: missions.primary_command().to_string(),
            vip_flags: config.vip.flags.clone(),
            vip_name_domain: config.vip.name_domain.clone().filter(|d| !d.trim().is_empty()),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One row of the missions overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionEntry {
    pub number: usize,
    pub id: MissionId,
    pub phrase: String,
    pub reward_phrase: String,
    pub progress: u32,
    pub amount: u32,
    pub percent: u32,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResetInfo {
    PerMap,
    Instant,
    Remaining {
        days: i64,
        hours: i64,
        minutes: i64,
        show_days: bool,
    },
    /// Interval mode but nothing assigned yet
    Unavailable,
}

/// Data behind the player-facing missions command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionOverview {
    pub player: PlayerId,
    pub vip: bool,
    pub entries: Vec<MissionEntry>,
    pub locked_vip_slots: usize,
    pub below_minimum: bool,
    pub minimum_players: usize,
    pub reset: ResetInfo,
}

pub struct MissionService {
    settings: ServiceSettings,
    catalog: Arc<MissionCatalog>,
    router: EventRouter,
    storage: Arc<dyn MissionStorage>,
    host: Host,
    registry: PlayerRegistry,
    current_map: String,
    warmup: bool,
    rng: StdRng,
    pending: Vec<StorageJob>,
}

impl MissionService {
    pub fn new(
        settings: ServiceSettings,
        catalog: Arc<MissionCatalog>,
        storage: Arc<dyn MissionStorage>,
        host: Host,
    ) -> Self {
        let router = EventRouter::from_catalog(&catalog);
        Self {
            settings,
            catalog,
            router,
            storage,
            host,
            registry: PlayerRegistry::new(),
            current_map: String::new(),
            warmup: false,
            rng: StdRng::from_entropy(),
            pending: Vec::new(),
        }
    }

    /// Deterministic mission selection, for tests and replays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn storage(&self) -> Arc<dyn MissionStorage> {
        Arc::clone(&self.storage)
    }

    pub fn current_map(&self) -> &str {
        &self.current_map
    }

    /// Set the map without running any map-change reset.
    pub fn set_current_map(&mut self, map: &str) {
        self.current_map = map.to_string();
    }

    pub fn is_warmup(&self) -> bool {
        self.warmup
    }

    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    pub fn queue_startup_sweep(&mut self) {
        self.pending.push(StorageJob::Sweep);
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_jobs(&mut self) -> Vec<StorageJob> {
        std::mem::take(&mut self.pending)
    }

    /// Run queued jobs inline until none are left. Returns the number executed.
    pub fn flush_jobs_blocking(&mut self) -> usize {
        let mut executed = 0;
        loop {
            let jobs = self.take_jobs();
            if jobs.is_empty() {
                return executed;
            }
            for job in jobs {
                let outcome = execute_job(self.storage.as_ref(), job, Utc::now());
                self.apply_outcome(outcome);
                executed += 1;
            }
        }
    }

    // ---- player lifecycle ----

    /// Register a connecting player and queue the load of their missions.
    /// Returns false for unknown players, bots and already connected players.
    ///
    /// A player who rejoins before their disconnect save was stored keeps the
    /// in-memory entry instead of loading again.
    pub fn player_connected(&mut self, player: PlayerId) -> bool {
        let Some(info) = self.host.players.get(player) else {
            debug!("connect for unknown player {}", player);
            return false;
        };
        if !info.is_valid() {
            return false;
        }
        if self.registry.insert_if_absent(player) {
            info!("player {} ({}) registered", player, escape_log(info.display_name()));
            self.pending.push(StorageJob::Load { player });
            return true;
        }
        let rejoined = self
            .registry
            .with_mut(player, |state| !std::mem::replace(&mut state.valid, true))
            .unwrap_or(false);
        if rejoined {
            info!("player {} rejoined before their save was stored", player);
            self.refresh_vip(player);
            self.ensure_quota(player);
        }
        rejoined
    }

    /// Mark the player gone and queue their final save. Loaded entries stay
    /// in the registry until that save has run.
    pub fn player_disconnected(&mut self, player: PlayerId) {
        let Some(missions) = self.registry.with_mut(player, |state| {
            state.valid = false;
            if state.loaded {
                state.missions.iter().map(MissionProgress::from).collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        }) else {
            return;
        };
        if missions.is_empty() {
            self.registry.remove(player);
            debug!("player {} removed", player);
        } else {
            self.pending.push(StorageJob::Save {
                missions,
                departed: Some(player),
            });
        }
    }

    pub fn apply_outcome(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Loaded { player, records } => self.finish_load(player, records),
            JobOutcome::Completed {
                player,
                mission,
                persisted,
            } => {
                if persisted {
                    self.finish_completion(player, mission);
                } else {
                    warn!(
                        "player {}: completion of mission {} not stored; reward withheld",
                        player, mission
                    );
                }
            }
            JobOutcome::Saved { count, ok, departed } => {
                debug!("saved {} missions (ok={})", count, ok);
                if let Some(player) = departed {
                    if self.registry.remove_departed(player) {
                        debug!("player {} removed", player);
                    }
                }
            }
            JobOutcome::Removed { count, ok } => debug!("removed {} missions (ok={})", count, ok),
            JobOutcome::Swept(Some(stats)) => debug!(
                "startup sweep: {} expired, {} removed",
                stats.expired_found, stats.removed
            ),
            JobOutcome::Swept(None) => {}
        }
    }

    fn finish_load(&mut self, player: PlayerId, records: Option<Vec<MissionRecord>>) {
        let updated = self.registry.with_mut(player, |state| {
            // a reconnect queues a second load; only the first result may land
            if state.loaded {
                return false;
            }
            if let Some(records) = records {
                state.missions = records.iter().map(MissionRecord::to_mission).collect();
            }
            // a failed read still counts as loaded so the player gets a fresh quota
            state.loaded = true;
            true
        });
        match updated {
            None => {
                debug!("player {} left before their missions loaded", player);
                return;
            }
            Some(false) => {
                debug!("player {}: ignoring load result for an already loaded player", player);
                return;
            }
            Some(true) => {}
        }
        if !self.is_valid(player) {
            return;
        }
        self.refresh_vip(player);
        self.ensure_quota(player);
    }

    fn is_valid(&self, player: PlayerId) -> bool {
        self.registry.with(player, |state| state.valid).unwrap_or(false)
            && self
                .host
                .players
                .get(player)
                .is_some_and(|info| info.is_valid())
    }

    fn refresh_vip(&mut self, player: PlayerId) {
        let Some(info) = self.host.players.get(player) else {
            return;
        };
        let by_flag = self
            .settings
            .vip_flags
            .iter()
            .any(|flag| self.host.permissions.has_flag(player, flag));
        let by_name = self.settings.vip_name_domain.as_deref().is_some_and(|domain| {
            info.display_name()
                .to_lowercase()
                .contains(&domain.to_lowercase())
        });
        self.registry
            .with_mut(player, |state| state.vip = by_flag || by_name);
    }

    fn notify(&self, player: PlayerId, notice: Notice) {
        if self.is_valid(player) {
            self.host.notifications.send_to_player(player, notice);
        }
    }

    /// Active (valid, non-spectator) players below the configured minimum.
    pub fn below_minimum(&self) -> bool {
        self.registry.active_count(self.host.players.as_ref()) < self.settings.minimum_players
    }

    // ---- quota ----

    /// Run `f` with the player's state locked. Assignment calls
    /// `MissionStorage::add` inline here, so `add` has to stay a plain insert
    /// without a disk sync.
    fn with_assignment<R>(
        &mut self,
        player: PlayerId,
        f: impl FnOnce(&mut PlayerState, &AssignmentContext<'_>, &mut StdRng) -> R,
    ) -> Option<R> {
        let ctx = AssignmentContext {
            catalog: self.catalog.as_ref(),
            storage: self.storage.as_ref(),
            permissions: self.host.permissions.as_ref(),
            reset_mode: self.settings.reset_mode,
            current_map: &self.current_map,
            quota_normal: self.settings.quota_normal,
            quota_vip: self.settings.quota_vip,
            now: Utc::now(),
        };
        let rng = &mut self.rng;
        self.registry.with_mut(player, |state| f(state, &ctx, rng))
    }

    /// Bring one player back to quota.
    pub fn ensure_quota(&mut self, player: PlayerId) {
        let Some(outcome) =
            self.with_assignment(player, |state, ctx, rng| assignment::ensure_quota(state, ctx, rng))
        else {
            return;
        };
        self.apply_quota_outcome(player, outcome);
    }

    fn apply_quota_outcome(&mut self, player: PlayerId, outcome: QuotaOutcome) {
        if !outcome.removed.is_empty() {
            self.pending.push(StorageJob::Remove {
                ids: outcome.removed,
            });
        }
        if outcome.added > 0 {
            self.notify(
                player,
                Notice::NewMissions {
                    count: outcome.added,
                    command: self.settings.primary_command.clone(),
                },
            );
        }
    }

    // ---- events ----

    pub fn handle_event(&mut self, event: &GameEvent) {
        let name = event.name();
        let properties = event.properties();

        if let GameEvent::EventRoundEnd(round) = event {
            self.debug_log(name, &properties);
            self.handle_round_end(round.winner, &properties);
            return;
        }

        if self.warmup && !self.settings.allow_progress_during_warmup {
            trace!("{} ignored during warmup", name);
            return;
        }

        let Some(targets) = self.router.targets_for(name).map(<[String]>::to_vec) else {
            return;
        };
        for target in &targets {
            let Some(actor) = resolve_actor(event, target, &properties, self.host.players.as_ref()) else {
                continue;
            };
            self.debug_log(name, &properties);
            self.process_event(name, target, actor.id, &properties);
        }
    }

    fn debug_log(&self, name: &str, properties: &PropertyBag) {
        if self.settings.event_debug_logs {
            info!("[{}] {}", name, format_property_bag(properties));
        }
    }

    /// Match one event against one player's missions and advance every hit.
    pub fn process_event(&mut self, event_type: &str, target: &str, player: PlayerId, properties: &PropertyBag) {
        if self.below_minimum() {
            return;
        }
        let current_map = &self.current_map;
        let reached: Vec<MissionId> = self
            .registry
            .with_mut(player, |state| {
                if !state.loaded {
                    return Vec::new();
                }
                state
                    .missions
                    .iter_mut()
                    .filter(|m| matcher::matches(m, event_type, target, current_map, properties))
                    .filter_map(|m| m.increment().then_some(m.id))
                    .collect()
            })
            .unwrap_or_default();
        for mission in reached {
            self.complete_mission(player, mission);
        }
    }

    /// Round end matches the synthetic winner/loser targets, then saves everyone.
    /// Warmup never suppresses it.
    fn handle_round_end(&mut self, winner: i32, properties: &PropertyBag) {
        if self.router.is_registered(ROUND_END_EVENT) && !self.below_minimum() {
            let players: Vec<PlayerInfo> = self
                .registry
                .ids()
                .into_iter()
                .filter(|id| self.registry.with(*id, |state| state.valid).unwrap_or(false))
                .filter_map(|id| self.host.players.get(id))
                .collect();
            for (player, target) in route_round_end(winner, &players) {
                self.process_event(ROUND_END_EVENT, target, player, properties);
            }
        }
        self.save_all();
    }

    /// Advance every time-driven mission by one step.
    pub fn playtime_tick(&mut self) {
        if self.below_minimum() {
            trace!("playtime tick skipped: below minimum players");
            return;
        }
        for player in self.registry.loaded_ids() {
            if !self.is_valid(player) {
                continue;
            }
            let reached: Vec<MissionId> = self
                .registry
                .with_mut(player, |state| {
                    state
                        .missions
                        .iter_mut()
                        .filter(|m| !m.completed && m.event.eq_ignore_ascii_case(PLAYTIME_EVENT))
                        .filter_map(|m| m.increment().then_some(m.id))
                        .collect()
                })
                .unwrap_or_default();
            for mission in reached {
                self.complete_mission(player, mission);
            }
        }
    }

    // ---- completion ----

    /// Complete a mission once. Rewards follow when the store confirms.
    pub fn complete_mission(&mut self, player: PlayerId, mission: MissionId) {
        let started = self
            .registry
            .with_mut(player, |state| {
                state
                    .mission_mut(mission)
                    .map_or(false, completion::begin_completion)
            })
            .unwrap_or(false);
        if started {
            self.pending.push(StorageJob::Complete { player, mission });
        }
    }

    fn finish_completion(&mut self, player: PlayerId, mission_id: MissionId) {
        let snapshot = self
            .registry
            .with(player, |state| {
                state
                    .mission(mission_id)
                    .cloned()
                    .map(|mission| (mission, state.missions.clone()))
            })
            .flatten();
        let Some((mission, all_missions)) = snapshot else {
            debug!("player {} gone before mission {} rewards", player, mission_id);
            return;
        };
        if !self.is_valid(player) {
            return;
        }
        let Some(info) = self.host.players.get(player) else {
            return;
        };
        completion::dispatch_rewards(&self.host, &info, &mission, &all_missions);

        if self.settings.reset_mode == ResetMode::Instant {
            self.replace_mission(player, mission_id);
        }
    }

    /// Instant reset: swap a completed mission for exactly one new one.
    ///
    /// The replacement is drawn while the completed mission is still held, so
    /// the same objective is never handed straight back.
    fn replace_mission(&mut self, player: PlayerId, mission_id: MissionId) {
        let Some((removed, added)) = self.with_assignment(player, |state, ctx, rng| {
            let added = assignment::assign_random(state, ctx, 1, rng);
            let removed = state.take_missions(&[mission_id]);
            (removed, added)
        }) else {
            return;
        };
        let outcome = QuotaOutcome {
            added,
            removed: removed.iter().map(|m| m.id).collect(),
        };
        self.apply_quota_outcome(player, outcome);
    }

    // ---- reset lifecycle ----

    /// Drop expired missions of loaded players and backfill.
    ///
    /// `cancel` is checked between players; a player's pass is never split.
    pub fn expiration_scan(&mut self, cancel: &CancellationToken) -> usize {
        let now = Utc::now();
        let mut affected = 0;
        for player in self.registry.loaded_ids() {
            if cancel.is_cancelled() {
                debug!("expiration scan cancelled after {} players", affected);
                break;
            }
            let expired = self
                .registry
                .with_mut(player, |state| take_expired(&mut state.missions, now))
                .unwrap_or_default();
            if expired.is_empty() {
                continue;
            }
            affected += 1;
            self.pending.push(StorageJob::Remove {
                ids: expired.iter().map(|m| m.id).collect(),
            });
            self.notify(player, Notice::MissionsExpired);
            self.ensure_quota(player);
        }
        if affected > 0 {
            info!("expired missions pruned for {} players", affected);
        }
        affected
    }

    /// Apply a new map: per-map wipe when configured, then VIP recheck and
    /// quota backfill for every loaded player.
    pub fn map_changed(&mut self, map: &str) {
        info!("map changed to {}", map);
        self.current_map = map.to_string();
        let players = self.registry.loaded_ids();

        if self.settings.reset_mode == ResetMode::PerMap {
            for &player in &players {
                let removed: Vec<MissionId> = self
                    .registry
                    .with_mut(player, |state| state.missions.drain(..).map(|m| m.id).collect())
                    .unwrap_or_default();
                if !removed.is_empty() {
                    self.pending.push(StorageJob::Remove { ids: removed });
                    self.notify(player, Notice::MissionsReset);
                }
            }
        }

        for player in players {
            if !self.is_valid(player) {
                continue;
            }
            self.refresh_vip(player);
            self.ensure_quota(player);
        }
    }

    /// Queue a progress save for every loaded player.
    pub fn save_all(&mut self) -> usize {
        let missions: Vec<MissionProgress> = self
            .registry
            .loaded_ids()
            .into_iter()
            .filter_map(|player| {
                self.registry
                    .with(player, |state| state.missions.iter().map(MissionProgress::from).collect::<Vec<_>>())
            })
            .flatten()
            .collect();
        let count = missions.len();
        if count > 0 {
            self.pending.push(StorageJob::Save {
                missions,
                departed: None,
            });
        }
        count
    }

    // ---- queries ----

    pub fn overview(&self, player: PlayerId) -> Option<MissionOverview> {
        let state = self.registry.snapshot(player)?;
        if !state.loaded || !state.valid {
            return None;
        }
        let entries: Vec<MissionEntry> = state
            .missions
            .iter()
            .enumerate()
            .map(|(index, m)| MissionEntry {
                number: index + 1,
                id: m.id,
                phrase: m.phrase.clone(),
                reward_phrase: m.reward_phrase.clone(),
                progress: m.progress,
                amount: m.amount,
                percent: m.percent(),
                completed: m.completed,
            })
            .collect();

        let locked_vip_slots = if !state.vip
            && !entries.is_empty()
            && self.settings.quota_vip > self.settings.quota_normal
        {
            self.settings.quota_vip.saturating_sub(entries.len())
        } else {
            0
        };

        let mode = self.settings.reset_mode;
        let reset = match mode {
            ResetMode::PerMap => ResetInfo::PerMap,
            ResetMode::Instant => ResetInfo::Instant,
            _ => match state.missions.first().and_then(|m| m.expires_at) {
                Some(expires_at) => {
                    let TimeRemaining { days, hours, minutes } = time_until_expiration(expires_at, Utc::now());
                    ResetInfo::Remaining {
                        days,
                        hours,
                        minutes,
                        show_days: mode.shows_days(),
                    }
                }
                None => ResetInfo::Unavailable,
            },
        };

        Some(MissionOverview {
            player,
            vip: state.vip,
            entries,
            locked_vip_slots,
            below_minimum: self.below_minimum(),
            minimum_players: self.settings.minimum_players,
            reset,
        })
    }
}
