//! Host integration seams
//!
//! The mission engine never talks to a game server directly. Everything it needs
//! from the outside world (live player handles, permission checks, server
//! commands, chat notices, webhooks) comes through the narrow traits below.
//! `stdio` implements them over a JSON-lines pipe for the CLI harness and
//! `webhook` provides the optional HTTP notifier.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::missions::types::{PlayerId, PlayerMission, Team, UserId};

pub mod stdio;
#[cfg(feature = "webhook")]
pub mod webhook;

/// Live attributes of a connected player as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub user_id: UserId,
    #[serde(default)]
    pub slot: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default = "default_connected")]
    pub connected: bool,
}

fn default_connected() -> bool {
    true
}

impl PlayerInfo {
    pub fn new(id: PlayerId, user_id: UserId, name: &str, team: Team) -> Self {
        Self {
            id,
            user_id,
            slot: user_id,
            name: Some(name.to_string()),
            team,
            is_bot: false,
            connected: true,
        }
    }

    /// Still connected and not a bot.
    pub fn is_valid(&self) -> bool {
        self.connected && !self.is_bot
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Resolves live player handles.
pub trait PlayerDirectory: Send + Sync {
    fn get(&self, id: PlayerId) -> Option<PlayerInfo>;
    fn by_user_id(&self, user_id: UserId) -> Option<PlayerInfo>;
}

pub trait PermissionOracle: Send + Sync {
    fn has_flag(&self, player: PlayerId, flag: &str) -> bool;
}

/// Fire-and-forget server console command.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str);
}

/// What the engine wants a player to be told. Localisation happens on the host;
/// the engine only picks the phrase key and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NewMissions { count: usize, command: String },
    MissionCompleted { phrase: String, reward_phrase: String },
    MissionsExpired,
    MissionsReset,
}

impl Notice {
    pub fn phrase_key(&self) -> &'static str {
        match self {
            Notice::NewMissions { .. } => "missions.new_mission",
            Notice::MissionCompleted { .. } => "missions.complete_mission",
            Notice::MissionsExpired => "missions.dailyreset",
            Notice::MissionsReset => "missions.mapreset",
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn send_to_player(&self, player: PlayerId, notice: Notice);
}

/// Best-effort completion notifier. Implementations must not block.
pub trait WebhookNotifier: Send + Sync {
    fn on_mission_complete(&self, player: &PlayerInfo, mission: &PlayerMission);
    fn on_all_missions_complete(&self, player: &PlayerInfo, missions: &[PlayerMission]);
}

/// Bundle of collaborators handed to the mission service.
#[derive(Clone)]
pub struct Host {
    pub players: Arc<dyn PlayerDirectory>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub commands: Arc<dyn CommandExecutor>,
    pub notifications: Arc<dyn NotificationSink>,
    pub webhook: Option<Arc<dyn WebhookNotifier>>,
}

impl Host {
    /// Build a host from one object implementing every required trait.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: PlayerDirectory + PermissionOracle + CommandExecutor + NotificationSink + 'static,
    {
        Self {
            players: shared.clone(),
            permissions: shared.clone(),
            commands: shared.clone(),
            notifications: shared,
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookNotifier>) -> Self {
        self.webhook = Some(webhook);
        self
    }
}
