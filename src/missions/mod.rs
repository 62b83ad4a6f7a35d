//! Mission engine
//!
//! Tracks a per-player quota of gameplay objectives, advances them from game
//! events and a playtime ticker, pays out rewards on completion and expires or
//! replaces missions according to the configured reset policy.

pub mod assignment;
pub mod catalog;
pub mod completion;
pub mod engine;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod matcher;
pub mod registry;
pub mod reset;
pub mod service;
pub mod storage;
pub mod types;

pub use catalog::MissionCatalog;
pub use engine::{start_engine, EngineConfig, EngineHandle, EngineStats};
pub use errors::MissionError;
pub use events::{EventRouter, GameEvent};
pub use reset::ResetMode;
pub use service::{MissionOverview, MissionService, ResetInfo, ServiceSettings};
pub use storage::{MissionStorage, SledMissionStore, SledMissionStoreBuilder};
pub use types::{
    FilterValue, MissionDefinition, PlayerId, PlayerMission, PlayerState, PropertyBag, PropertyValue, Team,
};
