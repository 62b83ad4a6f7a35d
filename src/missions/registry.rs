//! Concurrent player registry (identity to mission state).
//!
//! Lookups and inserts are lock-free from the engine task. Closures passed to
//! `with`/`with_mut` run while a shard guard is held, so they must never reach
//! back into the registry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::host::PlayerDirectory;
use crate::missions::types::{PlayerId, PlayerState};

#[derive(Clone, Default)]
pub struct PlayerRegistry {
    players: Arc<DashMap<PlayerId, PlayerState>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player. Returns true when the entry is new.
    pub fn insert_if_absent(&self, id: PlayerId) -> bool {
        let mut inserted = false;
        self.players.entry(id).or_insert_with(|| {
            inserted = true;
            PlayerState::new(id)
        });
        inserted
    }

    pub fn remove(&self, id: PlayerId) -> Option<PlayerState> {
        self.players.remove(&id).map(|(_, state)| state)
    }

    /// Drop a departed player's entry unless they reconnected meanwhile.
    pub fn remove_departed(&self, id: PlayerId) -> bool {
        self.players.remove_if(&id, |_, state| !state.valid).is_some()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&self) {
        self.players.clear();
    }

    pub fn with<R>(&self, id: PlayerId, f: impl FnOnce(&PlayerState) -> R) -> Option<R> {
        self.players.get(&id).map(|entry| f(entry.value()))
    }

    pub fn with_mut<R>(&self, id: PlayerId, f: impl FnOnce(&mut PlayerState) -> R) -> Option<R> {
        self.players.get_mut(&id).map(|mut entry| f(entry.value_mut()))
    }

    /// Cloned copy of one player's state, safe to hand to background work.
    pub fn snapshot(&self, id: PlayerId) -> Option<PlayerState> {
        self.with(id, PlayerState::clone)
    }

    pub fn is_loaded(&self, id: PlayerId) -> bool {
        self.with(id, |state| state.loaded).unwrap_or(false)
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Connected players whose missions have been loaded.
    pub fn loaded_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|entry| entry.loaded && entry.valid)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Registered players that are valid and on a playing team.
    pub fn active_count(&self, directory: &dyn PlayerDirectory) -> usize {
        let valid: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| *entry.key())
            .collect();
        valid
            .into_iter()
            .filter_map(|id| directory.get(id))
            .filter(|info| info.is_valid() && info.team.is_playing())
            .count()
    }
}
