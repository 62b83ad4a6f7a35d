//! # Missionkeeper - Per-Player Mission Engine for Game Servers
//!
//! Missionkeeper hands every connected player a small set of gameplay
//! objectives ("get 10 kills", "plant the bomb 3 times", "play for 30
//! minutes"), advances them from game events, pays out reward commands on
//! completion and resets them on a configurable schedule.
//!
//! ## Features
//!
//! - **Catalog driven**: missions come from a JSON catalog with optional property filters, map and permission restrictions.
//! - **Quotas**: normal and VIP players get separately sized mission sets; VIP status is re-evaluated on every assignment.
//! - **Event routing**: typed game events are flattened into property bags and matched against each player's missions.
//! - **Reset policies**: per-map, instant replacement, daily, weekly and monthly expiry.
//! - **Persistence**: missions live in an embedded sled database; all storage work runs off the engine task.
//! - **Webhooks**: optional HTTP notification on mission completion (`webhook` feature).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use missionkeeper::config::Config;
//! use missionkeeper::host::{stdio::StdioHost, Host};
//! use missionkeeper::missions::{
//!     start_engine, EngineConfig, MissionCatalog, MissionService, ServiceSettings, SledMissionStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let catalog = Arc::new(MissionCatalog::load_from_file(&config.missions.catalog_path)?);
//!     let store = Arc::new(SledMissionStore::open(config.storage.missions_db_path())?);
//!     let (stdio, _outputs) = StdioHost::new();
//!     let service = MissionService::new(
//!         ServiceSettings::from_config(&config),
//!         catalog,
//!         store,
//!         Host::from_shared(stdio),
//!     );
//!     let engine = start_engine(service, EngineConfig::from_schedule(&config.schedule));
//!     engine.player_connected(76561198000000001);
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`missions`] - mission model, matching, assignment, reset policies, storage and the engine actor
//! - [`host`] - traits the engine uses to reach the game server, plus the JSON-lines and webhook adapters
//! - [`config`] - configuration management and validation
//! - [`logutil`] - helpers for single-line logging of untrusted strings
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Host bridge    │ ← connects, events, map changes (JSON lines)
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Engine actor   │ ← owns all player mission state, runs timers
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Sled storage   │ ← blocking jobs, outcomes fed back to the actor
//! └─────────────────┘
//! ```

pub mod config;
pub mod host;
pub mod logutil;
pub mod missions;
