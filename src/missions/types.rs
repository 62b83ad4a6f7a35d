//! Core mission data model: catalog definitions, assigned player missions,
//! per-player state and the tagged values used for property filtering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 64-bit platform identity of a player (stable across sessions).
pub type PlayerId = u64;

/// Per-session user id carried by game events.
pub type UserId = i32;

/// Persisted mission id. Positive once stored.
pub type MissionId = i64;

/// Id carried by a mission that has not been persisted yet.
pub const UNASSIGNED_MISSION_ID: MissionId = -1;

/// Pseudo-event advanced by the time-driven ticker instead of game events.
pub const PLAYTIME_EVENT: &str = "PlayTime";

/// Round-end event; its targets are synthesized from team comparison.
pub const ROUND_END_EVENT: &str = "EventRoundEnd";

pub const TARGET_WINNER: &str = "winner";
pub const TARGET_LOSER: &str = "loser";

/// Team slot as reported by the host. Ordering follows the engine's team indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    #[default]
    None,
    Spectator,
    #[serde(alias = "t")]
    Terrorist,
    #[serde(alias = "ct")]
    CounterTerrorist,
}

impl Team {
    pub fn index(self) -> i32 {
        match self {
            Team::None => 0,
            Team::Spectator => 1,
            Team::Terrorist => 2,
            Team::CounterTerrorist => 3,
        }
    }

    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Team::Spectator,
            2 => Team::Terrorist,
            3 => Team::CounterTerrorist,
            _ => Team::None,
        }
    }

    /// True for teams that actually play a round (not unassigned, not spectating).
    pub fn is_playing(self) -> bool {
        self > Team::Spectator
    }
}

/// Threshold stored on a mission for one event property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type PropertyFilters = BTreeMap<String, FilterValue>;

/// Value observed on an event field.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::UInt(u) => write!(f, "{}", u),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::UInt(value)
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        PropertyValue::Float(f64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

/// Flattened event payload, field name to observed value.
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// Identity used to prevent assigning the same objective twice to one player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub event: String,
    pub target: String,
    pub amount: u32,
    pub phrase: String,
}

/// Catalog template for an objective. Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDefinition {
    #[serde(alias = "Event")]
    pub event: String,
    #[serde(default, alias = "EventProperties", skip_serializing_if = "Option::is_none")]
    pub event_properties: Option<PropertyFilters>,
    #[serde(alias = "Target")]
    pub target: String,
    #[serde(default, alias = "RewardCommands")]
    pub reward_commands: Vec<String>,
    #[serde(alias = "Amount")]
    pub amount: u32,
    #[serde(alias = "Phrase")]
    pub phrase: String,
    #[serde(default, alias = "RewardPhrase")]
    pub reward_phrase: String,
    #[serde(default, alias = "Flag", skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, alias = "MapName", skip_serializing_if = "Option::is_none")]
    pub map_name: Option<String>,
}

impl MissionDefinition {
    pub fn new(event: &str, target: &str, amount: u32, phrase: &str) -> Self {
        Self {
            event: event.to_string(),
            event_properties: None,
            target: target.to_string(),
            reward_commands: Vec::new(),
            amount,
            phrase: phrase.to_string(),
            reward_phrase: String::new(),
            flag: None,
            map_name: None,
        }
    }

    pub fn with_reward(mut self, phrase: &str, commands: &[&str]) -> Self {
        self.reward_phrase = phrase.to_string();
        self.reward_commands = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_filter(mut self, key: &str, value: FilterValue) -> Self {
        self.event_properties
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn with_map(mut self, map_name: &str) -> Self {
        self.map_name = Some(map_name.to_string());
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flag = Some(flag.to_string());
        self
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            event: self.event.clone(),
            target: self.target.clone(),
            amount: self.amount,
            phrase: self.phrase.clone(),
        }
    }

    /// Fresh, unpersisted instance with zero progress.
    pub fn instantiate(&self, expires_at: Option<DateTime<Utc>>) -> PlayerMission {
        PlayerMission {
            id: UNASSIGNED_MISSION_ID,
            event: self.event.clone(),
            target: self.target.clone(),
            amount: self.amount,
            phrase: self.phrase.clone(),
            reward_phrase: self.reward_phrase.clone(),
            reward_commands: self.reward_commands.clone(),
            event_properties: self.event_properties.clone(),
            map_name: self.map_name.clone(),
            flag: self.flag.clone(),
            progress: 0,
            completed: false,
            expires_at,
        }
    }
}

/// A mission assigned to one player, with live progress.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMission {
    pub id: MissionId,
    pub event: String,
    pub target: String,
    pub amount: u32,
    pub phrase: String,
    pub reward_phrase: String,
    pub reward_commands: Vec<String>,
    pub event_properties: Option<PropertyFilters>,
    pub map_name: Option<String>,
    pub flag: Option<String>,
    pub progress: u32,
    pub completed: bool,
    /// None for per-map and instant reset modes
    pub expires_at: Option<DateTime<Utc>>,
}

impl PlayerMission {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            event: self.event.clone(),
            target: self.target.clone(),
            amount: self.amount,
            phrase: self.phrase.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Advance progress by one step. Returns true once the required amount is reached.
    pub fn increment(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.progress = self.progress.saturating_add(1);
        self.progress >= self.amount
    }

    pub fn percent(&self) -> u32 {
        if self.completed {
            return 100;
        }
        if self.amount == 0 {
            return 0;
        }
        ((u64::from(self.progress.min(self.amount)) * 100) / u64::from(self.amount)) as u32
    }
}

/// Everything the engine tracks for one connected player.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub missions: Vec<PlayerMission>,
    /// Set once persisted missions have been fetched (or the fetch failed).
    pub loaded: bool,
    pub vip: bool,
    /// Cleared on disconnect; the entry lingers until its final save is stored.
    pub valid: bool,
}

impl PlayerState {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            missions: Vec::new(),
            loaded: false,
            vip: false,
            valid: true,
        }
    }

    pub fn all_completed(&self) -> bool {
        !self.missions.is_empty() && self.missions.iter().all(|m| m.completed)
    }

    pub fn mission(&self, id: MissionId) -> Option<&PlayerMission> {
        self.missions.iter().find(|m| m.id == id)
    }

    pub fn mission_mut(&mut self, id: MissionId) -> Option<&mut PlayerMission> {
        self.missions.iter_mut().find(|m| m.id == id)
    }

    /// Remove and return the missions with the given ids.
    pub fn take_missions(&mut self, ids: &[MissionId]) -> Vec<PlayerMission> {
        let mut taken = Vec::new();
        self.missions.retain(|m| {
            if ids.contains(&m.id) {
                taken.push(m.clone());
                false
            } else {
                true
            }
        });
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn increment_reports_completion_threshold() {
        let mut mission = MissionDefinition::new("EventPlayerDeath", "Attacker", 2, "kills").instantiate(None);
        assert!(!mission.increment());
        assert!(mission.increment());
        assert_eq!(mission.progress, 2);
    }

    #[test]
    fn completed_missions_do_not_advance() {
        let mut mission = MissionDefinition::new("EventPlayerDeath", "Attacker", 1, "kills").instantiate(None);
        mission.completed = true;
        assert!(!mission.increment());
        assert_eq!(mission.progress, 0);
        assert_eq!(mission.percent(), 100);
    }

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = Utc::now();
        let mission = MissionDefinition::new("PlayTime", "UserId", 10, "play")
            .instantiate(Some(now - Duration::seconds(1)));
        assert!(mission.is_expired(now));
        let fresh = MissionDefinition::new("PlayTime", "UserId", 10, "play").instantiate(None);
        assert!(!fresh.is_expired(now));
    }

    #[test]
    fn team_ordering_matches_indices() {
        assert!(!Team::Spectator.is_playing());
        assert!(!Team::None.is_playing());
        assert!(Team::Terrorist.is_playing());
        assert_eq!(Team::from_index(3), Team::CounterTerrorist);
        assert_eq!(Team::from_index(42), Team::None);
    }

    #[test]
    fn filter_values_parse_by_json_type() {
        let parsed: PropertyFilters =
            serde_json::from_str(r#"{"Headshot":true,"Distance":12.5,"Penetrated":1,"Weapon":"awp"}"#)
                .unwrap();
        assert_eq!(parsed["Headshot"], FilterValue::Bool(true));
        assert_eq!(parsed["Distance"], FilterValue::Float(12.5));
        assert_eq!(parsed["Penetrated"], FilterValue::Int(1));
        assert_eq!(parsed["Weapon"], FilterValue::Text("awp".into()));
    }

    #[test]
    fn definitions_accept_pascal_case_fields() {
        let def: MissionDefinition = serde_json::from_str(
            r#"{"Event":"EventBombPlanted","Target":"UserId","Amount":1,"Phrase":"plant","RewardPhrase":"100 credits","RewardCommands":["give {steamid64} 100"],"MapName":"de_dust2"}"#,
        )
        .unwrap();
        assert_eq!(def.event, "EventBombPlanted");
        assert_eq!(def.map_name.as_deref(), Some("de_dust2"));
        assert_eq!(def.reward_commands.len(), 1);
        assert!(def.flag.is_none());
    }
}
