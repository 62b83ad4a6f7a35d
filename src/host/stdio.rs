//! JSON-lines host for `missionkeeper start`.
//!
//! A game-server bridge writes one JSON object per line to our stdin
//! (connects, team changes, events, map loads, ...) and reads one JSON
//! object per line from our stdout (server commands to run, notices to show,
//! overview replies). The bridge is the source of truth for live player
//! attributes and permission flags; this module mirrors them so the engine
//! can query them synchronously.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::missions::engine::EngineHandle;
use crate::host::{CommandExecutor, Notice, NotificationSink, PermissionOracle, PlayerDirectory, PlayerInfo};
use crate::logutil::escape_log;
use crate::missions::events::GameEvent;
use crate::missions::service::MissionOverview;
use crate::missions::types::{PlayerId, Team, UserId};

fn granted_default() -> bool {
    true
}

/// One line from the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostInput {
    Connect { player: PlayerInfo },
    Disconnect { id: PlayerId },
    Team { id: PlayerId, team: Team },
    Permission {
        id: PlayerId,
        flag: String,
        #[serde(default = "granted_default")]
        granted: bool,
    },
    Warmup { active: bool },
    Map { name: String },
    Event { event: GameEvent },
    Missions { id: PlayerId },
    Save,
    Shutdown,
}

/// One line to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostOutput {
    Command { command: String },
    Notice { player: PlayerId, phrase: String, notice: Notice },
    Overview { id: PlayerId, overview: Option<MissionOverview> },
    Error { message: String },
}

pub struct StdioHost {
    players: DashMap<PlayerId, PlayerInfo>,
    flags: DashMap<PlayerId, HashSet<String>>,
    out: mpsc::UnboundedSender<HostOutput>,
}

impl StdioHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostOutput>) {
        let (out, rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            players: DashMap::new(),
            flags: DashMap::new(),
            out,
        });
        (host, rx)
    }

    fn emit(&self, output: HostOutput) {
        if self.out.send(output).is_err() {
            debug!("host output closed");
        }
    }

    /// Apply one parsed input. Returns false once the bridge asked to stop.
    pub async fn apply(&self, input: HostInput, engine: &EngineHandle) -> bool {
        match input {
            HostInput::Connect { player } => {
                let id = player.id;
                self.players.insert(id, player);
                engine.player_connected(id);
            }
            HostInput::Disconnect { id } => {
                // engine must see the disconnect before the handle disappears
                engine.player_disconnected(id);
                self.players.remove(&id);
                self.flags.remove(&id);
            }
            HostInput::Team { id, team } => {
                if let Some(mut player) = self.players.get_mut(&id) {
                    player.team = team;
                }
            }
            HostInput::Permission { id, flag, granted } => {
                let mut flags = self.flags.entry(id).or_default();
                if granted {
                    flags.insert(flag);
                } else {
                    flags.remove(&flag);
                }
            }
            HostInput::Warmup { active } => engine.set_warmup(active),
            HostInput::Map { name } => engine.map_loaded(&name),
            HostInput::Event { event } => engine.dispatch_event(event),
            HostInput::Missions { id } => {
                let overview = engine.overview(id).await;
                self.emit(HostOutput::Overview { id, overview });
            }
            HostInput::Save => engine.save_all(),
            HostInput::Shutdown => return false,
        }
        true
    }

    /// Parse and apply one raw line. Malformed lines are reported back, not fatal.
    pub async fn handle_line(&self, line: &str, engine: &EngineHandle) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        match serde_json::from_str::<HostInput>(line) {
            Ok(input) => self.apply(input, engine).await,
            Err(e) => {
                warn!("ignoring malformed host line '{}': {}", escape_log(line), e);
                self.emit(HostOutput::Error {
                    message: format!("malformed input: {}", e),
                });
                true
            }
        }
    }

    /// Read the bridge until EOF or a shutdown message.
    pub async fn run<R>(&self, reader: R, engine: &EngineHandle) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if !self.handle_line(&line, engine).await {
                info!("host requested shutdown");
                return Ok(());
            }
        }
        info!("host input closed");
        Ok(())
    }
}

/// Serialize outputs as JSON lines until every sender is gone.
pub async fn write_outputs<W>(mut rx: mpsc::UnboundedReceiver<HostOutput>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(output) = rx.recv().await {
        let mut line = serde_json::to_string(&output)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

impl PlayerDirectory for StdioHost {
    fn get(&self, id: PlayerId) -> Option<PlayerInfo> {
        self.players.get(&id).map(|entry| entry.value().clone())
    }

    fn by_user_id(&self, user_id: UserId) -> Option<PlayerInfo> {
        self.players
            .iter()
            .find(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
    }
}

impl PermissionOracle for StdioHost {
    fn has_flag(&self, player: PlayerId, flag: &str) -> bool {
        self.flags
            .get(&player)
            .is_some_and(|flags| flags.contains(flag))
    }
}

impl CommandExecutor for StdioHost {
    fn execute(&self, command: &str) {
        self.emit(HostOutput::Command {
            command: command.to_string(),
        });
    }
}

impl NotificationSink for StdioHost {
    fn send_to_player(&self, player: PlayerId, notice: Notice) {
        self.emit(HostOutput::Notice {
            player,
            phrase: notice.phrase_key().to_string(),
            notice,
        });
    }
}
