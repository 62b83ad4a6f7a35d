//! Completion pipeline
//!
//! Completion is split in two halves around the store write:
//! 1. `begin_completion` flips the in-memory flag exactly once and tells the
//!    caller to persist.
//! 2. `dispatch_rewards` runs once the store confirmed the write: reward
//!    commands, the player notice and the webhook calls.
//!
//! The flag is set before persistence is confirmed. A failed write leaves the
//! mission completed in memory without a reward; that divergence is accepted.

use log::{debug, info};

use crate::host::{Host, Notice, PlayerInfo};
use crate::logutil::escape_log;
use crate::missions::types::PlayerMission;

/// Mark `mission` completed. Returns false when it already was, in which case
/// nothing further must happen.
pub fn begin_completion(mission: &mut PlayerMission) -> bool {
    if mission.completed {
        return false;
    }
    mission.completed = true;
    true
}

/// Substitute player placeholders in a reward command template.
pub fn render_reward_command(template: &str, player: &PlayerInfo) -> String {
    let steam_id = player.id.to_string();
    let replacements = [
        ("{slot}", player.slot.to_string()),
        ("{userid}", player.user_id.to_string()),
        ("{name}", player.display_name().to_string()),
        ("{steamid64}", steam_id.clone()),
        ("{steamid}", steam_id),
        ("u0022", "\"".to_string()),
    ];
    replacements
        .iter()
        .fold(template.to_string(), |command, (key, value)| command.replace(key, value))
}

/// Side effects of a confirmed completion.
///
/// `all_missions` is the player's full set after the completion, used for the
/// "all missions complete" webhook.
pub fn dispatch_rewards(host: &Host, player: &PlayerInfo, mission: &PlayerMission, all_missions: &[PlayerMission]) {
    for template in &mission.reward_commands {
        let command = render_reward_command(template, player);
        debug!("reward for {}: {}", player.id, escape_log(&command));
        host.commands.execute(&command);
    }

    host.notifications.send_to_player(
        player.id,
        Notice::MissionCompleted {
            phrase: mission.phrase.clone(),
            reward_phrase: mission.reward_phrase.clone(),
        },
    );
    info!(
        "player {} ({}) completed mission {} '{}'",
        player.id,
        escape_log(player.display_name()),
        mission.id,
        mission.phrase
    );

    if let Some(webhook) = &host.webhook {
        webhook.on_mission_complete(player, mission);
        if !all_missions.is_empty() && all_missions.iter().all(|m| m.completed) {
            webhook.on_all_missions_complete(player, all_missions);
        }
    }
}
