//! Quota maintenance: fill a player's mission set up to the quota from the
//! catalog, or trim it back down when the quota shrinks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;

use crate::host::PermissionOracle;
use crate::missions::catalog::MissionCatalog;
use crate::missions::reset::ResetMode;
use crate::missions::storage::MissionStorage;
use crate::missions::types::{MissionDefinition, MissionId, NaturalKey, PlayerState};

/// Everything quota maintenance reads besides the player itself.
pub struct AssignmentContext<'a> {
    pub catalog: &'a MissionCatalog,
    pub storage: &'a dyn MissionStorage,
    pub permissions: &'a dyn PermissionOracle,
    pub reset_mode: ResetMode,
    pub current_map: &'a str,
    pub quota_normal: usize,
    pub quota_vip: usize,
    pub now: DateTime<Utc>,
}

impl AssignmentContext<'_> {
    pub fn required(&self, vip: bool) -> usize {
        if vip {
            self.quota_vip
        } else {
            self.quota_normal
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub added: usize,
    /// Ids dropped from memory that still have to be deleted from storage.
    pub removed: Vec<MissionId>,
}

/// Bring `state` to its quota. No-op until the player's missions are loaded.
pub fn ensure_quota<R: Rng + ?Sized>(
    state: &mut PlayerState,
    ctx: &AssignmentContext<'_>,
    rng: &mut R,
) -> QuotaOutcome {
    if !state.loaded {
        return QuotaOutcome::default();
    }
    let required = ctx.required(state.vip);
    let current = state.missions.len();
    if current > required {
        QuotaOutcome {
            added: 0,
            removed: trim_excess(state, current - required),
        }
    } else if current < required {
        QuotaOutcome {
            added: assign_random(state, ctx, required - current, rng),
            removed: Vec::new(),
        }
    } else {
        QuotaOutcome::default()
    }
}

/// Drop the `count` most recently assigned missions (highest ids first).
pub fn trim_excess(state: &mut PlayerState, count: usize) -> Vec<MissionId> {
    let mut ids: Vec<MissionId> = state.missions.iter().map(|m| m.id).collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.truncate(count);
    state.take_missions(&ids);
    debug!("player {}: trimmed {} missions over quota", state.id, ids.len());
    ids
}

/// Assign up to `count` random eligible missions. Returns how many were added.
///
/// Candidates must pass the flag check, match the current map when restricted,
/// and not share a natural key with anything the player already has. Store
/// failures skip the candidate without retrying.
pub fn assign_random<R: Rng + ?Sized>(
    state: &mut PlayerState,
    ctx: &AssignmentContext<'_>,
    count: usize,
    rng: &mut R,
) -> usize {
    let mut existing: HashSet<NaturalKey> = state.missions.iter().map(|m| m.natural_key()).collect();
    let player_id = state.id;
    let mut candidates: Vec<&MissionDefinition> = ctx
        .catalog
        .available_for(ctx.current_map, |flag| ctx.permissions.has_flag(player_id, flag))
        .into_iter()
        .filter(|def| !existing.contains(&def.natural_key()))
        .collect();

    let mut added = 0;
    while added < count && !candidates.is_empty() {
        let index = rng.gen_range(0..candidates.len());
        let definition = candidates.swap_remove(index);
        // catalogs may repeat an objective verbatim
        if !existing.insert(definition.natural_key()) {
            continue;
        }
        let expires_at = ctx.reset_mode.expiration_for(ctx.now);
        let mut mission = definition.instantiate(expires_at);

        match ctx.storage.add(player_id, &mission, expires_at) {
            Ok(id) if id > 0 => {
                mission.id = id;
                state.missions.push(mission);
                added += 1;
            }
            Ok(id) => warn!(
                "player {}: store returned invalid id {} for mission '{}'",
                player_id, id, definition.phrase
            ),
            Err(e) => warn!(
                "player {}: failed to persist mission '{}': {}",
                player_id, definition.phrase, e
            ),
        }
    }

    if added < count {
        debug!(
            "player {}: assigned {} of {} requested missions (candidates exhausted)",
            player_id, added, count
        );
    }
    added
}
