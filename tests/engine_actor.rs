//! Integration tests for the engine actor: ordering, timers and shutdown

mod common;

use std::time::Duration;

use common::{kill_missions, settings, Fixture, RecordingHost};
use missionkeeper::host::Notice;
use missionkeeper::missions::events::PlayerDeath;
use missionkeeper::missions::{
    start_engine, EngineConfig, EngineHandle, GameEvent, MissionDefinition, MissionOverview, MissionStorage,
    ResetInfo, ResetMode, Team,
};

const ALICE: u64 = 76561198000000001;

fn quiet_timers() -> EngineConfig {
    EngineConfig {
        playtime_tick: Duration::from_secs(3600),
        expiration_check: Duration::from_secs(3600),
        map_change_delay: Duration::from_millis(10),
    }
}

async fn wait_for_overview(engine: &EngineHandle, player: u64) -> MissionOverview {
    for _ in 0..200 {
        if let Some(overview) = engine.overview(player).await {
            return overview;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("player {} never finished loading", player);
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn kill_by(attacker: i32) -> GameEvent {
    GameEvent::EventPlayerDeath(PlayerDeath {
        userid: Some(42),
        attacker: Some(attacker),
        ..Default::default()
    })
}

fn join(host: &RecordingHost, engine: &EngineHandle) {
    host.add_player(ALICE, 1, "alice", Team::Terrorist);
    engine.player_connected(ALICE);
}

#[tokio::test]
async fn test_connect_loads_and_reports_overview() {
    let fx = Fixture::new(kill_missions(5), settings(ResetMode::Daily, 3, 5));
    let Fixture { dir: _dir, host, service, .. } = fx;
    let engine = start_engine(service, quiet_timers());

    join(&host, &engine);
    let overview = wait_for_overview(&engine, ALICE).await;
    assert_eq!(overview.entries.len(), 3);
    assert_eq!(overview.locked_vip_slots, 2);
    assert_eq!(
        overview.entries.iter().map(|e| e.number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(matches!(overview.reset, ResetInfo::Remaining { show_days: false, .. }));

    let stats = engine.snapshot().await.unwrap();
    assert_eq!(stats.players, 1);
    assert_eq!(stats.loaded_players, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_events_complete_missions_and_shutdown_persists() {
    let fx = Fixture::new(kill_missions(3), settings(ResetMode::Daily, 3, 3));
    let Fixture {
        dir: _dir,
        host,
        store,
        service,
        ..
    } = fx;
    let engine = start_engine(service, quiet_timers());
    join(&host, &engine);
    wait_for_overview(&engine, ALICE).await;

    engine.dispatch_event(kill_by(1));
    wait_until(|| host.completed_notices(ALICE) == 1).await;
    assert_eq!(host.commands(), vec![format!("give {} credits", ALICE)]);

    engine.dispatch_event(kill_by(1));
    let stats = engine.snapshot().await.unwrap();
    assert_eq!(stats.events_processed, 2);
    // shutdown drains the pending completion as well as the final save
    engine.shutdown().await;
    assert_eq!(host.completed_notices(ALICE), 2);

    let mut stored: Vec<(String, u32, bool)> = store
        .list_by_player(ALICE)
        .unwrap()
        .into_iter()
        .map(|r| (r.phrase, r.progress, r.completed))
        .collect();
    stored.sort();
    assert_eq!(
        stored,
        vec![
            ("kill1".to_string(), 1, true),
            ("kill2".to_string(), 2, true),
            ("kill3".to_string(), 2, false),
        ]
    );
}

#[tokio::test]
async fn test_manual_playtime_tick() {
    let defs = vec![MissionDefinition::new("PlayTime", "player", 1, "one minute")];
    let fx = Fixture::new(defs, settings(ResetMode::Daily, 1, 1));
    let Fixture { dir: _dir, host, service, .. } = fx;
    let engine = start_engine(service, quiet_timers());
    join(&host, &engine);
    wait_for_overview(&engine, ALICE).await;

    engine.trigger_playtime_tick();
    wait_until(|| host.completed_notices(ALICE) == 1).await;
    let overview = engine.overview(ALICE).await.unwrap();
    assert!(overview.entries[0].completed);
    assert_eq!(overview.entries[0].percent, 100);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_map_change_resets_per_map_missions_after_delay() {
    let fx = Fixture::new(kill_missions(6), settings(ResetMode::PerMap, 2, 2));
    let Fixture { dir: _dir, host, service, .. } = fx;
    let engine = start_engine(service, quiet_timers());
    join(&host, &engine);
    let before = wait_for_overview(&engine, ALICE).await;

    engine.map_loaded("de_ancient");
    wait_until(|| host.notices_for(ALICE).contains(&Notice::MissionsReset)).await;
    let after = engine.overview(ALICE).await.unwrap();
    assert_eq!(after.entries.len(), 2);
    assert!(after
        .entries
        .iter()
        .all(|e| before.entries.iter().all(|b| b.id != e.id)));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_before_load_completes_is_harmless() {
    let fx = Fixture::new(kill_missions(3), settings(ResetMode::Daily, 3, 3));
    let Fixture { dir: _dir, host, service, .. } = fx;
    let engine = start_engine(service, quiet_timers());

    join(&host, &engine);
    engine.player_disconnected(ALICE);
    host.players.remove(&ALICE);

    let stats = engine.snapshot().await.unwrap();
    assert_eq!(stats.players, 0);
    assert!(engine.overview(ALICE).await.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_handle_is_inert_after_shutdown() {
    let fx = Fixture::new(kill_missions(3), settings(ResetMode::Daily, 3, 3));
    let Fixture { dir: _dir, service, .. } = fx;
    let engine = start_engine(service, quiet_timers());
    engine.shutdown().await;

    engine.save_all();
    engine.trigger_expiration_scan();
    assert!(engine.overview(ALICE).await.is_none());
    assert!(engine.snapshot().await.is_none());
}
