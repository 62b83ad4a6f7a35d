//! HTTP webhook notifier for mission completions.
//!
//! Posts a small Discord-style JSON payload for every completed mission and
//! one more when a player has finished their whole set. Delivery is
//! best-effort: each post runs on its own tokio task and failures are only
//! logged.

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Serialize;
use tokio::time::timeout;

use crate::config::WebhookConfig;
use crate::host::{PlayerInfo, WebhookNotifier};
use crate::logutil::escape_log;
use crate::missions::types::PlayerMission;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub username: String,
    pub content: String,
}

pub struct HttpWebhook {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl HttpWebhook {
    /// `None` when the webhook is disabled or has no url.
    pub fn from_config(config: &WebhookConfig) -> Option<Self> {
        if !config.enabled || config.url.trim().is_empty() {
            return None;
        }
        Some(Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        })
    }

    pub fn mission_complete_payload(&self, player: &PlayerInfo, mission: &PlayerMission) -> WebhookPayload {
        let reward = if mission.reward_phrase.is_empty() {
            String::new()
        } else {
            format!(" (reward: {})", mission.reward_phrase)
        };
        WebhookPayload {
            username: self.config.username.clone(),
            content: format!(
                "{} [{}] completed mission \"{}\"{}",
                player.display_name(),
                player.id,
                mission.phrase,
                reward
            ),
        }
    }

    pub fn all_complete_payload(&self, player: &PlayerInfo, missions: &[PlayerMission]) -> WebhookPayload {
        WebhookPayload {
            username: self.config.username.clone(),
            content: format!(
                "{} [{}] completed all {} missions!",
                player.display_name(),
                player.id,
                missions.len()
            ),
        }
    }

    fn post(&self, payload: WebhookPayload) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("webhook skipped: no tokio runtime");
            return;
        };
        let client = self.client.clone();
        let url = self.config.url.clone();
        let limit = Duration::from_secs(self.config.timeout_seconds.max(1));
        runtime.spawn(async move {
            match send(&client, &url, &payload, limit).await {
                Ok(()) => debug!("webhook delivered: {}", escape_log(&payload.content)),
                Err(e) => warn!("webhook delivery failed: {}", e),
            }
        });
    }
}

async fn send(client: &reqwest::Client, url: &str, payload: &WebhookPayload, limit: Duration) -> Result<()> {
    let response = timeout(limit, client.post(url).json(payload).send())
        .await
        .map_err(|_| anyhow!("Request timeout after {}s", limit.as_secs()))?
        .map_err(|e| anyhow!("HTTP request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(anyhow!("Webhook returned status: {}", response.status()));
    }
    Ok(())
}

impl WebhookNotifier for HttpWebhook {
    fn on_mission_complete(&self, player: &PlayerInfo, mission: &PlayerMission) {
        self.post(self.mission_complete_payload(player, mission));
    }

    fn on_all_missions_complete(&self, player: &PlayerInfo, missions: &[PlayerMission]) {
        self.post(self.all_complete_payload(player, missions));
    }
}
