//! End-to-end battles on the sample base and the shipped data files.

use std::path::PathBuf;

use raid_core::prelude::*;
use raid_test_utils::determinism::verify_replay_determinism;
use raid_test_utils::fixtures::{
    record_scripted_battle, replay_battle, sample_army, sample_battle, sample_layout,
    sample_script, sample_snapshot,
};

fn data_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../data")
        .join(relative)
}

fn run_until_finished(sim: &mut CombatSimulator, max_frames: u32) {
    for _ in 0..max_frames {
        if sim.state() == BattleState::Finished {
            return;
        }
        sim.tick();
    }
}

#[test]
fn shipped_data_matches_builtin_tables() {
    assert_eq!(BattleConfig::load(data_path("battle.ron")).unwrap(), BattleConfig::default());
    assert_eq!(Catalog::load(data_path("catalog.ron")).unwrap(), Catalog::standard());
    assert_eq!(
        BaseLayout::load(data_path("layouts/sample_base.ron")).unwrap(),
        sample_layout()
    );
}

#[test]
fn missing_data_file_is_an_io_error() {
    let err = BaseLayout::load(data_path("layouts/nope.ron")).unwrap_err();
    assert!(matches!(err, BattleError::Io { .. }));
}

#[test]
fn untouched_base_times_out_with_nothing() {
    let mut sim = sample_battle();
    run_until_finished(&mut sim, 180 * 60);

    let outcome = sim.outcome().unwrap();
    assert_eq!(sim.state(), BattleState::Finished);
    assert_eq!(outcome.reason, BattleEndReason::Timeout);
    assert_eq!(outcome.stars, 0);
    assert_eq!(outcome.destruction_percent, 0);
    assert_eq!(outcome.loot, LootPool::default());
    assert_eq!(outcome.unused_army, sample_army());
}

#[test]
fn lone_core_falls_to_one_detonation() {
    let layout = BaseLayout {
        owner: "lone".into(),
        buildings: vec![LayoutRecord {
            hitpoints: Some(100),
            ..LayoutRecord::new(BuildingKind::TownHall, 20, 20, 4, 4)
        }],
        loot: LootPool {
            gold: 1_000,
            elixir: 1_000,
        },
    };
    let army = Roster::from_counts([(UnitKind::WallBreaker, 1)]);
    let mut sim =
        CombatSimulator::with_battle(BattleConfig::default(), Catalog::standard(), &layout, army)
            .unwrap();

    let pos = sim.grid().grid_to_position(21, 16);
    assert!(sim.can_deploy_at_position(pos));
    sim.deploy_unit(UnitKind::WallBreaker, pos).unwrap();
    run_until_finished(&mut sim, 60 * 60);

    let outcome = sim.outcome().unwrap();
    assert_eq!(outcome.reason, BattleEndReason::AllDestroyed);
    assert_eq!(outcome.destruction_percent, 100);
    assert_eq!(outcome.stars, 3);
    assert_eq!(outcome.loot, LootPool { gold: 500, elixir: 500 });
}

#[test]
fn last_unit_dying_ends_the_battle() {
    let layout = BaseLayout {
        buildings: vec![LayoutRecord::new(BuildingKind::WizardTower, 20, 20, 3, 3)],
        ..BaseLayout::default()
    };
    let army = Roster::from_counts([(UnitKind::Archer, 1)]);
    let mut sim =
        CombatSimulator::with_battle(BattleConfig::default(), Catalog::standard(), &layout, army)
            .unwrap();

    let pos = sim.grid().grid_to_position(21, 25);
    sim.deploy_unit(UnitKind::Archer, pos).unwrap();
    run_until_finished(&mut sim, 60 * 60);

    let outcome = sim.outcome().unwrap();
    assert_eq!(outcome.reason, BattleEndReason::AllUnitsDead);
    assert!(outcome.destruction_percent < 100);
    assert_eq!(sim.alive_unit_count(), 0);
}

#[test]
fn outbox_reports_start_and_end_once() {
    let mut sim = sample_battle();
    sim.tick();
    assert!(
        !sim.drain_events().contains(&SimEvent::BattleStarted),
        "the battle starts with the first deploy, not on entering READY"
    );
    for deploy in sample_script() {
        let pos = sim.grid().grid_to_position(deploy.cell.x, deploy.cell.y);
        sim.deploy_unit(deploy.unit, pos);
    }

    let mut events = sim.drain_events();
    let deployed = events
        .iter()
        .filter(|e| matches!(e, SimEvent::UnitDeployed { .. }))
        .count();
    assert_eq!(deployed, sample_script().len());
    assert_eq!(events.first(), Some(&SimEvent::BattleStarted));

    run_until_finished(&mut sim, 180 * 60);
    sim.surrender();
    events.extend(sim.drain_events());

    let started = events.iter().filter(|e| matches!(e, SimEvent::BattleStarted)).count();
    let ended = events.iter().filter(|e| matches!(e, SimEvent::BattleEnded(_))).count();
    assert_eq!((started, ended), (1, 1));
    assert!(sim.drain_events().is_empty());

    let mut last_stars = 0;
    for event in &events {
        if let SimEvent::StarsChanged { stars } = event {
            assert!(*stars > last_stars);
            last_stars = *stars;
        }
    }
}

#[test]
fn destroyed_buildings_free_their_cells() {
    let mut sim = sample_battle();
    for deploy in sample_script() {
        let pos = sim.grid().grid_to_position(deploy.cell.x, deploy.cell.y);
        sim.deploy_unit(deploy.unit, pos);
    }
    run_until_finished(&mut sim, 90 * 60);

    let layout = sample_layout();
    for index in sim.destroyed_buildings() {
        let record = &layout.buildings[index as usize];
        assert!(!sim.grid().is_blocked(record.grid_x, record.grid_y));
        assert!(sim.validator().can_deploy_at(record.grid_x, record.grid_y));
    }
}

#[test]
fn replay_reproduces_sample_attack() {
    let (text, live) = record_scripted_battle(&sample_snapshot(), &sample_script(), 99, 120 * 60);
    let log = ReplayLog::parse(&text);
    assert_eq!(log.seed, 99);
    assert_eq!(log.opponent_id, "sample-defender");
    assert_eq!(log.battle_snapshot().unwrap(), sample_snapshot());

    let (first, destroyed_a, hash_a) = replay_battle(&text);
    let (second, destroyed_b, hash_b) = replay_battle(&text);
    assert_eq!(first, live);
    assert_eq!(first, second);
    assert_eq!(destroyed_a, destroyed_b);
    assert_eq!(hash_a, hash_b);

    verify_replay_determinism(&text, 2).assert_deterministic();
}
