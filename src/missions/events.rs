//! Game events and routing
//!
//! Events arrive as typed values tagged with their game-event identifier.
//! `EVENT_TABLE` lists every identifier the router understands together with the
//! player-reference fields it carries; catalog entries naming anything else are
//! reported once when the router is built and never registered.
//!
//! Property bags use the PascalCase field names catalog filters are written against
//! (`Headshot`, `Weapon`, `Distance`, ...).

use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::host::{PlayerDirectory, PlayerInfo};
use crate::missions::catalog::MissionCatalog;
use crate::missions::types::{
    PlayerId, PropertyBag, PropertyValue, Team, UserId, PLAYTIME_EVENT, ROUND_END_EVENT, TARGET_LOSER,
    TARGET_WINNER,
};

/// Static description of one supported game event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: &'static str,
    /// Lower-case field names holding a player user id.
    pub player_fields: &'static [&'static str],
}

pub const EVENT_TABLE: &[EventDescriptor] = &[
    EventDescriptor { name: "EventPlayerDeath", player_fields: &["userid", "attacker", "assister"] },
    EventDescriptor { name: "EventPlayerHurt", player_fields: &["userid", "attacker"] },
    EventDescriptor { name: "EventRoundEnd", player_fields: &[] },
    EventDescriptor { name: "EventRoundMvp", player_fields: &["userid"] },
    EventDescriptor { name: "EventBombPlanted", player_fields: &["userid"] },
    EventDescriptor { name: "EventBombDefused", player_fields: &["userid"] },
    EventDescriptor { name: "EventBombExploded", player_fields: &["userid"] },
    EventDescriptor { name: "EventHostageRescued", player_fields: &["userid"] },
    EventDescriptor { name: "EventWeaponFire", player_fields: &["userid"] },
    EventDescriptor { name: "EventItemPurchase", player_fields: &["userid"] },
    EventDescriptor { name: "EventPlayerBlind", player_fields: &["userid", "attacker"] },
    EventDescriptor { name: "EventGrenadeThrown", player_fields: &["userid"] },
    EventDescriptor { name: "EventPlayerJump", player_fields: &["userid"] },
];

/// Case-insensitive lookup in `EVENT_TABLE`.
pub fn describe(name: &str) -> Option<&'static EventDescriptor> {
    EVENT_TABLE.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

/// Player references given directly as platform ids, keyed by field name
/// (`{"Attacker": 76561198000000001}`). Hosts that cannot map players to user
/// ids send these instead; they surface in the property bag as
/// `<Field>Player`.
pub type PlayerRefs = BTreeMap<String, PlayerId>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerDeath {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub attacker: Option<UserId>,
    pub assister: Option<UserId>,
    pub assistedflash: bool,
    pub weapon: String,
    pub headshot: bool,
    pub dominated: i32,
    pub revenge: i32,
    pub wipe: i32,
    pub penetrated: i32,
    pub noscope: bool,
    pub thrusmoke: bool,
    pub attackerblind: bool,
    pub attackerinair: bool,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerHurt {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub attacker: Option<UserId>,
    pub health: i32,
    pub armor: i32,
    pub weapon: String,
    pub dmg_health: i32,
    pub dmg_armor: i32,
    pub hitgroup: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundEnd {
    /// Winning team index (2 = T, 3 = CT)
    pub winner: i32,
    pub reason: i32,
    pub message: String,
    pub player_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundMvp {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub reason: i32,
    pub value: i64,
}

/// Shared shape of the bomb events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BombSite {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub site: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostageRescued {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub hostage: i32,
    pub site: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponFire {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub weapon: String,
    pub silenced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemPurchase {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub team: i32,
    pub loadout: i32,
    pub weapon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerBlind {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub attacker: Option<UserId>,
    pub entityid: i32,
    pub blind_duration: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrenadeThrown {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
    pub weapon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerJump {
    pub userid: Option<UserId>,
    #[serde(skip_serializing_if = "PlayerRefs::is_empty")]
    pub players: PlayerRefs,
}

/// A game event delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum GameEvent {
    EventPlayerDeath(PlayerDeath),
    EventPlayerHurt(PlayerHurt),
    EventRoundEnd(RoundEnd),
    EventRoundMvp(RoundMvp),
    EventBombPlanted(BombSite),
    EventBombDefused(BombSite),
    EventBombExploded(BombSite),
    EventHostageRescued(HostageRescued),
    EventWeaponFire(WeaponFire),
    EventItemPurchase(ItemPurchase),
    EventPlayerBlind(PlayerBlind),
    EventGrenadeThrown(GrenadeThrown),
    EventPlayerJump(PlayerJump),
}

fn bag<const N: usize>(entries: [(&str, PropertyValue); N]) -> PropertyBag {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::EventPlayerDeath(_) => "EventPlayerDeath",
            GameEvent::EventPlayerHurt(_) => "EventPlayerHurt",
            GameEvent::EventRoundEnd(_) => ROUND_END_EVENT,
            GameEvent::EventRoundMvp(_) => "EventRoundMvp",
            GameEvent::EventBombPlanted(_) => "EventBombPlanted",
            GameEvent::EventBombDefused(_) => "EventBombDefused",
            GameEvent::EventBombExploded(_) => "EventBombExploded",
            GameEvent::EventHostageRescued(_) => "EventHostageRescued",
            GameEvent::EventWeaponFire(_) => "EventWeaponFire",
            GameEvent::EventItemPurchase(_) => "EventItemPurchase",
            GameEvent::EventPlayerBlind(_) => "EventPlayerBlind",
            GameEvent::EventGrenadeThrown(_) => "EventGrenadeThrown",
            GameEvent::EventPlayerJump(_) => "EventPlayerJump",
        }
    }

    /// Structured accessor: the user id stored in a player-reference field.
    pub fn player_ref(&self, field: &str) -> Option<UserId> {
        let field = field.to_ascii_lowercase();
        match (self, field.as_str()) {
            (GameEvent::EventPlayerDeath(e), "userid") => e.userid,
            (GameEvent::EventPlayerDeath(e), "attacker") => e.attacker,
            (GameEvent::EventPlayerDeath(e), "assister") => e.assister,
            (GameEvent::EventPlayerHurt(e), "userid") => e.userid,
            (GameEvent::EventPlayerHurt(e), "attacker") => e.attacker,
            (GameEvent::EventPlayerBlind(e), "userid") => e.userid,
            (GameEvent::EventPlayerBlind(e), "attacker") => e.attacker,
            (GameEvent::EventRoundMvp(e), "userid") => e.userid,
            (GameEvent::EventBombPlanted(e), "userid")
            | (GameEvent::EventBombDefused(e), "userid")
            | (GameEvent::EventBombExploded(e), "userid") => e.userid,
            (GameEvent::EventHostageRescued(e), "userid") => e.userid,
            (GameEvent::EventWeaponFire(e), "userid") => e.userid,
            (GameEvent::EventItemPurchase(e), "userid") => e.userid,
            (GameEvent::EventGrenadeThrown(e), "userid") => e.userid,
            (GameEvent::EventPlayerJump(e), "userid") => e.userid,
            _ => None,
        }
    }

    /// Platform-id references carried by the event, if any.
    pub fn player_refs(&self) -> Option<&PlayerRefs> {
        match self {
            GameEvent::EventPlayerDeath(e) => Some(&e.players),
            GameEvent::EventPlayerHurt(e) => Some(&e.players),
            GameEvent::EventRoundEnd(_) => None,
            GameEvent::EventRoundMvp(e) => Some(&e.players),
            GameEvent::EventBombPlanted(e) | GameEvent::EventBombDefused(e) | GameEvent::EventBombExploded(e) => {
                Some(&e.players)
            }
            GameEvent::EventHostageRescued(e) => Some(&e.players),
            GameEvent::EventWeaponFire(e) => Some(&e.players),
            GameEvent::EventItemPurchase(e) => Some(&e.players),
            GameEvent::EventPlayerBlind(e) => Some(&e.players),
            GameEvent::EventGrenadeThrown(e) => Some(&e.players),
            GameEvent::EventPlayerJump(e) => Some(&e.players),
        }
    }

    /// Flatten the readable fields into a property bag, plus one
    /// `<Field>Player` entry per platform-id reference.
    pub fn properties(&self) -> PropertyBag {
        let mut properties = self.field_properties();
        for (field, id) in self.player_refs().into_iter().flatten() {
            properties.insert(format!("{}Player", field), PropertyValue::UInt(*id));
        }
        properties
    }

    fn field_properties(&self) -> PropertyBag {
        match self {
            GameEvent::EventPlayerDeath(e) => bag([
                ("UserId", e.userid.into()),
                ("Attacker", e.attacker.into()),
                ("Assister", e.assister.into()),
                ("AssistedFlash", e.assistedflash.into()),
                ("Weapon", e.weapon.as_str().into()),
                ("Headshot", e.headshot.into()),
                ("Dominated", e.dominated.into()),
                ("Revenge", e.revenge.into()),
                ("Wipe", e.wipe.into()),
                ("Penetrated", e.penetrated.into()),
                ("NoScope", e.noscope.into()),
                ("ThruSmoke", e.thrusmoke.into()),
                ("AttackerBlind", e.attackerblind.into()),
                ("AttackerInAir", e.attackerinair.into()),
                ("Distance", e.distance.into()),
            ]),
            GameEvent::EventPlayerHurt(e) => bag([
                ("UserId", e.userid.into()),
                ("Attacker", e.attacker.into()),
                ("Health", e.health.into()),
                ("Armor", e.armor.into()),
                ("Weapon", e.weapon.as_str().into()),
                ("DmgHealth", e.dmg_health.into()),
                ("DmgArmor", e.dmg_armor.into()),
                ("Hitgroup", e.hitgroup.into()),
            ]),
            GameEvent::EventRoundEnd(e) => bag([
                ("Winner", e.winner.into()),
                ("Reason", e.reason.into()),
                ("Message", e.message.as_str().into()),
                ("PlayerCount", e.player_count.into()),
            ]),
            GameEvent::EventRoundMvp(e) => bag([
                ("UserId", e.userid.into()),
                ("Reason", e.reason.into()),
                ("Value", e.value.into()),
            ]),
            GameEvent::EventBombPlanted(e) | GameEvent::EventBombDefused(e) | GameEvent::EventBombExploded(e) => {
                bag([("UserId", e.userid.into()), ("Site", e.site.into())])
            }
            GameEvent::EventHostageRescued(e) => bag([
                ("UserId", e.userid.into()),
                ("Hostage", e.hostage.into()),
                ("Site", e.site.into()),
            ]),
            GameEvent::EventWeaponFire(e) => bag([
                ("UserId", e.userid.into()),
                ("Weapon", e.weapon.as_str().into()),
                ("Silenced", e.silenced.into()),
            ]),
            GameEvent::EventItemPurchase(e) => bag([
                ("UserId", e.userid.into()),
                ("Team", e.team.into()),
                ("Loadout", e.loadout.into()),
                ("Weapon", e.weapon.as_str().into()),
            ]),
            GameEvent::EventPlayerBlind(e) => bag([
                ("UserId", e.userid.into()),
                ("Attacker", e.attacker.into()),
                ("EntityId", e.entityid.into()),
                ("BlindDuration", e.blind_duration.into()),
            ]),
            GameEvent::EventGrenadeThrown(e) => {
                bag([("UserId", e.userid.into()), ("Weapon", e.weapon.as_str().into())])
            }
            GameEvent::EventPlayerJump(e) => bag([("UserId", e.userid.into())]),
        }
    }
}

/// Event identifier to interested targets, built once from the catalog.
#[derive(Debug, Clone, Default)]
pub struct EventRouter {
    registrations: BTreeMap<&'static str, Vec<String>>,
    unknown: Vec<String>,
}

impl EventRouter {
    pub fn from_catalog(catalog: &MissionCatalog) -> Self {
        let mut router = EventRouter::default();
        for def in catalog.definitions() {
            if def.event.eq_ignore_ascii_case(PLAYTIME_EVENT) {
                continue;
            }
            let Some(descriptor) = describe(&def.event) else {
                if !router.unknown.iter().any(|e| e.eq_ignore_ascii_case(&def.event)) {
                    warn!("Event type {} is not supported; its missions will never progress", def.event);
                    router.unknown.push(def.event.clone());
                }
                continue;
            };
            let targets = router.registrations.entry(descriptor.name).or_default();
            if !targets.iter().any(|t| t.eq_ignore_ascii_case(&def.target)) {
                targets.push(def.target.clone());
            }
        }
        info!("Registered {} mission event types.", router.registrations.len());
        router
    }

    pub fn targets_for(&self, event: &str) -> Option<&[String]> {
        describe(event)
            .and_then(|d| self.registrations.get(d.name))
            .map(Vec::as_slice)
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.targets_for(event).is_some()
    }

    pub fn registered_events(&self) -> impl Iterator<Item = (&'static str, &[String])> + '_ {
        self.registrations.iter().map(|(name, targets)| (*name, targets.as_slice()))
    }

    pub fn unknown_events(&self) -> &[String] {
        &self.unknown
    }
}

/// Resolve who performed `target` in `event`.
///
/// The structured accessor is tried first; otherwise a `<Target>Player` entry
/// in the property bag holding a platform id is used. Invalid players and bots
/// never resolve.
pub fn resolve_actor(
    event: &GameEvent,
    target: &str,
    properties: &PropertyBag,
    directory: &dyn PlayerDirectory,
) -> Option<PlayerInfo> {
    let player = event
        .player_ref(target)
        .and_then(|user_id| directory.by_user_id(user_id))
        .or_else(|| {
            let key = format!("{}Player", target);
            let value = properties.get(&key).or_else(|| {
                properties
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&key))
                    .map(|(_, value)| value)
            })?;
            let id: PlayerId = match value {
                PropertyValue::UInt(id) => *id,
                PropertyValue::Int(id) => u64::try_from(*id).ok()?,
                _ => return None,
            };
            directory.get(id)
        })?;
    player.is_valid().then_some(player)
}

/// Winner/loser targets for a finished round.
///
/// Returns nothing when no real team won. Players on no team or spectating are
/// skipped.
pub fn route_round_end(winner: i32, players: &[PlayerInfo]) -> Vec<(PlayerId, &'static str)> {
    if winner <= Team::Spectator.index() {
        return Vec::new();
    }
    players
        .iter()
        .filter(|p| p.is_valid() && p.team.is_playing())
        .map(|p| {
            let target = if p.team.index() == winner { TARGET_WINNER } else { TARGET_LOSER };
            (p.id, target)
        })
        .collect()
}
