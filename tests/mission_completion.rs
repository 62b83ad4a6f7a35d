//! Integration tests for progress, completion and reward dispatch

mod common;

use std::sync::atomic::Ordering;

use common::{kill_missions, settings, Fixture};
use missionkeeper::host::Notice;
use missionkeeper::missions::events::PlayerDeath;
use missionkeeper::missions::{GameEvent, MissionDefinition, MissionStorage, ResetMode, Team};

const ALICE: u64 = 76561198000000001;
const BOB: u64 = 76561198000000002;

fn kill_by(attacker: i32, victim: i32) -> GameEvent {
    GameEvent::EventPlayerDeath(PlayerDeath {
        userid: Some(victim),
        attacker: Some(attacker),
        weapon: "ak47".into(),
        ..Default::default()
    })
}

#[test]
fn test_kill_advances_and_completes_with_reward() {
    let mut fx = Fixture::new(kill_missions(3), settings(ResetMode::Daily, 3, 3));
    fx.connect(ALICE, 1, Team::Terrorist);
    fx.connect(BOB, 2, Team::CounterTerrorist);

    fx.service.handle_event(&kill_by(1, 2));
    fx.service.flush_jobs_blocking();

    let kill1 = fx.mission_with_phrase(ALICE, "kill1").unwrap();
    assert!(kill1.completed);
    assert_eq!(fx.mission_with_phrase(ALICE, "kill2").unwrap().progress, 1);
    assert_eq!(fx.mission_with_phrase(ALICE, "kill3").unwrap().progress, 1);
    // the victim gains nothing
    assert!(fx.missions(BOB).iter().all(|m| m.progress == 0));

    assert_eq!(fx.host.commands(), vec![format!("give {} credits", ALICE)]);
    assert!(fx.host.notices_for(ALICE).contains(&Notice::MissionCompleted {
        phrase: "kill1".into(),
        reward_phrase: "100 credits".into()
    }));
    assert_eq!(*fx.webhook.completed.lock().unwrap(), vec![(ALICE, kill1.id)]);

    let stored = fx.store.inner.get(kill1.id).unwrap();
    assert!(stored.completed);
    assert_eq!(stored.progress, 1);
}

#[test]
fn test_completion_happens_exactly_once() {
    let mut fx = Fixture::new(kill_missions(2), settings(ResetMode::Daily, 2, 2));
    fx.connect(ALICE, 1, Team::Terrorist);

    for _ in 0..4 {
        fx.service.handle_event(&kill_by(1, 7));
        fx.service.flush_jobs_blocking();
    }
    let kill1 = fx.mission_with_phrase(ALICE, "kill1").unwrap();
    fx.service.complete_mission(ALICE, kill1.id);
    fx.service.flush_jobs_blocking();

    assert_eq!(fx.host.completed_notices(ALICE), 2);
    assert_eq!(fx.host.commands().len(), 2);
    // progress stops moving once completed
    assert_eq!(kill1.progress, 1);
    assert_eq!(fx.mission_with_phrase(ALICE, "kill2").unwrap().progress, 2);
}

#[test]
fn test_failed_persistence_withholds_reward() {
    let mut fx = Fixture::new(kill_missions(1), settings(ResetMode::Daily, 1, 1));
    fx.connect(ALICE, 1, Team::Terrorist);
    fx.store.fail_complete.store(true, Ordering::SeqCst);

    fx.service.handle_event(&kill_by(1, 7));
    fx.service.flush_jobs_blocking();

    let kill1 = fx.mission_with_phrase(ALICE, "kill1").unwrap();
    assert!(kill1.completed, "memory keeps the optimistic completion");
    assert!(fx.host.commands().is_empty());
    assert_eq!(fx.host.completed_notices(ALICE), 0);
    assert!(fx.webhook.completed.lock().unwrap().is_empty());
    assert!(!fx.store.inner.get(kill1.id).unwrap().completed);
}

#[test]
fn test_all_missions_complete_webhook() {
    let defs = vec![
        MissionDefinition::new("EventPlayerDeath", "Attacker", 1, "first blood"),
        MissionDefinition::new("EventPlayerDeath", "Attacker", 2, "double"),
    ];
    let mut fx = Fixture::new(defs, settings(ResetMode::Daily, 2, 2));
    fx.connect(ALICE, 1, Team::Terrorist);

    fx.service.handle_event(&kill_by(1, 7));
    fx.service.flush_jobs_blocking();
    assert!(fx.webhook.all_complete.lock().unwrap().is_empty());

    fx.service.handle_event(&kill_by(1, 8));
    fx.service.flush_jobs_blocking();
    assert_eq!(fx.webhook.completed.lock().unwrap().len(), 2);
    assert_eq!(*fx.webhook.all_complete.lock().unwrap(), vec![ALICE]);
    assert!(fx.service.registry().with(ALICE, |s| s.all_completed()).unwrap());
}

#[test]
fn test_reward_template_placeholders() {
    let defs = vec![MissionDefinition::new("EventPlayerDeath", "Attacker", 1, "kill1").with_reward(
        "vip",
        &["sm_givevip {slot} {userid}", "say u0022{name}u0022 did it", "log {steamid}"],
    )];
    let mut fx = Fixture::new(defs, settings(ResetMode::Daily, 1, 1));
    fx.connect(ALICE, 4, Team::Terrorist);

    fx.service.handle_event(&kill_by(4, 7));
    fx.service.flush_jobs_blocking();
    assert_eq!(
        fx.host.commands(),
        vec![
            "sm_givevip 4 4".to_string(),
            "say \"player4\" did it".to_string(),
            format!("log {}", ALICE),
        ]
    );
}

#[test]
fn test_instant_mode_replaces_completed_mission() {
    let mut fx = Fixture::new(kill_missions(4), settings(ResetMode::Instant, 1, 1));
    fx.connect(ALICE, 1, Team::Terrorist);
    let first = fx.missions(ALICE).remove(0);
    assert!(first.expires_at.is_none());

    let mut kills = 0;
    while fx.mission_with_phrase(ALICE, &first.phrase).is_some() {
        fx.service.handle_event(&kill_by(1, 7));
        fx.service.flush_jobs_blocking();
        kills += 1;
        assert!(kills <= first.amount, "mission never completed");
    }

    let missions = fx.missions(ALICE);
    assert_eq!(missions.len(), 1);
    assert_ne!(missions[0].phrase, first.phrase);
    assert!(!missions[0].completed);
    // the completed mission is gone from storage as well
    assert!(fx.store.inner.get(first.id).is_err());
    assert_eq!(fx.store.list_by_player(ALICE).unwrap().len(), 1);
    assert_eq!(fx.host.completed_notices(ALICE), 1);
}

#[test]
fn test_disconnect_saves_progress() {
    let mut fx = Fixture::new(kill_missions(3), settings(ResetMode::Daily, 3, 3));
    fx.connect(ALICE, 1, Team::Terrorist);
    fx.service.handle_event(&kill_by(1, 7));
    fx.service.flush_jobs_blocking();
    let kill3 = fx.mission_with_phrase(ALICE, "kill3").unwrap();

    fx.service.player_disconnected(ALICE);
    fx.service.flush_jobs_blocking();

    assert_eq!(fx.store.inner.get(kill3.id).unwrap().progress, 1);
}
