//! Mission engine actor
//!
//! One tokio task owns the [`MissionService`] and is the only place player
//! mission state is mutated. Everything else talks to it through an
//! [`EngineHandle`]:
//!
//! * Host callbacks (connect, disconnect, events, map changes) become
//!   [`EngineCommand`]s on an unbounded channel and are processed in order.
//! * Storage jobs queued by the service run on blocking threads inside a
//!   `JoinSet`; the actor polls the set and feeds each outcome back to the
//!   service, so completion side effects always happen on the actor task.
//! * The playtime tick and the expiration scan are timer tasks that only send
//!   commands. Both stop on their `CancellationToken`; the expiration timer is
//!   restarted on every map change.
//! * Shutdown cancels the timers, saves every loaded player and waits for all
//!   outstanding jobs before acknowledging.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleConfig;
use crate::missions::events::GameEvent;
use crate::missions::jobs::{execute_job, JobOutcome};
use crate::missions::service::{MissionOverview, MissionService};
use crate::missions::storage::MissionStorage;
use crate::missions::types::PlayerId;

/// Timer settings for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub playtime_tick: Duration,
    pub expiration_check: Duration,
    pub map_change_delay: Duration,
}

impl EngineConfig {
    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self {
            playtime_tick: Duration::from_secs(schedule.playtime_tick_seconds.max(1)),
            expiration_check: Duration::from_secs(schedule.expiration_check_seconds.max(1)),
            map_change_delay: Duration::from_millis(schedule.map_change_delay_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_schedule(&ScheduleConfig::default())
    }
}

pub enum EngineCommand {
    PlayerConnected(PlayerId),
    PlayerDisconnected(PlayerId),
    Event(Box<GameEvent>),
    Warmup(bool),
    /// Host reported a new map; applied after `map_change_delay`.
    MapLoaded(String),
    ApplyMapChange(String),
    PlaytimeTick,
    ExpirationScan,
    SaveAll,
    Overview(PlayerId, oneshot::Sender<Option<MissionOverview>>),
    Snapshot(oneshot::Sender<EngineStats>),
    Shutdown(oneshot::Sender<()>),
}

impl EngineCommand {
    fn label(&self) -> &'static str {
        match self {
            EngineCommand::PlayerConnected(_) => "connect",
            EngineCommand::PlayerDisconnected(_) => "disconnect",
            EngineCommand::Event(_) => "event",
            EngineCommand::Warmup(_) => "warmup",
            EngineCommand::MapLoaded(_) => "map_loaded",
            EngineCommand::ApplyMapChange(_) => "map_change",
            EngineCommand::PlaytimeTick => "playtime_tick",
            EngineCommand::ExpirationScan => "expiration_scan",
            EngineCommand::SaveAll => "save_all",
            EngineCommand::Overview(..) => "overview",
            EngineCommand::Snapshot(_) => "snapshot",
            EngineCommand::Shutdown(_) => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub players: usize,
    pub loaded_players: usize,
    pub events_processed: u64,
    pub jobs_started: u64,
    pub jobs_failed: u64,
    pub jobs_in_flight: usize,
    pub playtime_ticks: u64,
    pub expiration_scans: u64,
}

#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    fn send(&self, cmd: EngineCommand) {
        let label = cmd.label();
        if self.tx.send(cmd).is_err() {
            debug!("engine stopped; dropping {} command", label);
        }
    }

    pub fn player_connected(&self, player: PlayerId) {
        self.send(EngineCommand::PlayerConnected(player));
    }

    pub fn player_disconnected(&self, player: PlayerId) {
        self.send(EngineCommand::PlayerDisconnected(player));
    }

    pub fn dispatch_event(&self, event: GameEvent) {
        self.send(EngineCommand::Event(Box::new(event)));
    }

    pub fn set_warmup(&self, warmup: bool) {
        self.send(EngineCommand::Warmup(warmup));
    }

    pub fn map_loaded(&self, map: &str) {
        self.send(EngineCommand::MapLoaded(map.to_string()));
    }

    pub fn trigger_playtime_tick(&self) {
        self.send(EngineCommand::PlaytimeTick);
    }

    pub fn trigger_expiration_scan(&self) {
        self.send(EngineCommand::ExpirationScan);
    }

    pub fn save_all(&self) {
        self.send(EngineCommand::SaveAll);
    }

    pub async fn overview(&self, player: PlayerId) -> Option<MissionOverview> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Overview(player, tx)).is_ok() {
            rx.await.ok().flatten()
        } else {
            None
        }
    }

    pub async fn snapshot(&self) -> Option<EngineStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Stop the engine once every outstanding save is durable.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(EngineCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

/// Repeating timer that feeds `make()` into the engine until cancelled.
fn spawn_timer(
    tx: mpsc::UnboundedSender<EngineCommand>,
    period: Duration,
    cancel: CancellationToken,
    make: fn() -> EngineCommand,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(make()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

struct Actor {
    service: MissionService,
    storage: Arc<dyn MissionStorage>,
    jobs: JoinSet<JobOutcome>,
    stats: EngineStats,
}

impl Actor {
    fn spawn_pending(&mut self) {
        for job in self.service.take_jobs() {
            let storage = Arc::clone(&self.storage);
            debug!("storage job: {}", job.label());
            self.jobs
                .spawn_blocking(move || execute_job(storage.as_ref(), job, Utc::now()));
            self.stats.jobs_started += 1;
        }
    }

    fn finish_job(&mut self, joined: Result<JobOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => self.service.apply_outcome(outcome),
            Err(e) => {
                self.stats.jobs_failed += 1;
                error!("storage job panicked or was cancelled: {}", e);
            }
        }
    }

    /// Drain every job, including ones spawned by outcomes of earlier jobs.
    async fn drain_jobs(&mut self) {
        loop {
            self.spawn_pending();
            match self.jobs.join_next().await {
                Some(joined) => self.finish_job(joined),
                None => break,
            }
        }
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            players: self.service.registry().len(),
            loaded_players: self.service.registry().loaded_ids().len(),
            jobs_in_flight: self.jobs.len(),
            ..self.stats.clone()
        }
    }
}

/// Start the engine on the current tokio runtime.
///
/// Queues the startup expiry sweep and starts both timers.
pub fn start_engine(mut service: MissionService, cfg: EngineConfig) -> EngineHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();
    let handle = EngineHandle { tx: tx.clone() };

    service.queue_startup_sweep();
    let root = CancellationToken::new();
    spawn_timer(tx.clone(), cfg.playtime_tick, root.child_token(), || EngineCommand::PlaytimeTick);
    let mut expiration_token = root.child_token();
    spawn_timer(
        tx.clone(),
        cfg.expiration_check,
        expiration_token.clone(),
        || EngineCommand::ExpirationScan,
    );

    tokio::spawn(async move {
        let storage = service.storage();
        let mut actor = Actor {
            service,
            storage,
            jobs: JoinSet::new(),
            stats: EngineStats::default(),
        };
        actor.spawn_pending();

        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    match cmd {
                        EngineCommand::PlayerConnected(player) => {
                            actor.service.player_connected(player);
                        }
                        EngineCommand::PlayerDisconnected(player) => actor.service.player_disconnected(player),
                        EngineCommand::Event(event) => {
                            actor.stats.events_processed += 1;
                            actor.service.handle_event(&event);
                        }
                        EngineCommand::Warmup(warmup) => actor.service.set_warmup(warmup),
                        EngineCommand::MapLoaded(map) => {
                            expiration_token.cancel();
                            expiration_token = root.child_token();
                            spawn_timer(tx.clone(), cfg.expiration_check, expiration_token.clone(), || EngineCommand::ExpirationScan);
                            let delayed = tx.clone();
                            let delay = cfg.map_change_delay;
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = delayed.send(EngineCommand::ApplyMapChange(map));
                            });
                        }
                        EngineCommand::ApplyMapChange(map) => actor.service.map_changed(&map),
                        EngineCommand::PlaytimeTick => {
                            actor.stats.playtime_ticks += 1;
                            actor.service.playtime_tick();
                        }
                        EngineCommand::ExpirationScan => {
                            actor.stats.expiration_scans += 1;
                            actor.service.expiration_scan(&expiration_token);
                        }
                        EngineCommand::SaveAll => {
                            actor.service.save_all();
                        }
                        EngineCommand::Overview(player, resp) => {
                            let _ = resp.send(actor.service.overview(player));
                        }
                        EngineCommand::Snapshot(resp) => {
                            let _ = resp.send(actor.snapshot());
                        }
                        EngineCommand::Shutdown(done) => {
                            root.cancel();
                            let saved = actor.service.save_all();
                            actor.drain_jobs().await;
                            info!("mission engine stopped ({} missions saved)", saved);
                            let _ = done.send(());
                            break;
                        }
                    }
                }
                Some(joined) = actor.jobs.join_next(), if !actor.jobs.is_empty() => {
                    actor.finish_job(joined);
                }
                else => {
                    warn!("engine channel closed; saving and stopping");
                    root.cancel();
                    actor.service.save_all();
                    actor.drain_jobs().await;
                    break;
                }
            }
            actor.spawn_pending();
        }
        debug!("engine loop terminated");
    });

    handle
}
