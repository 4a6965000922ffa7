//! Test fixtures and helpers.
//!
//! A fully populated sample base, a mixed army, and helpers that drive a
//! scripted attack through a [`BattleSession`] so tests can compare live
//! runs against their replays.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

use raid_core::catalog::{BuildingKind, Catalog, UnitKind};
use raid_core::config::BattleConfig;
use raid_core::grid::GridCell;
use raid_core::layout::{BaseLayout, BattleSnapshot, LayoutRecord, LootPool, Roster};
use raid_core::session::{BattleSession, NetworkRole};
use raid_core::simulation::{BattleOutcome, BattleState, CombatSimulator};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// A row of single-cell walls.
fn wall_line(y: i32, xs: std::ops::RangeInclusive<i32>) -> impl Iterator<Item = LayoutRecord> {
    xs.map(move |x| LayoutRecord::new(BuildingKind::Wall, x, y, 1, 1))
}

/// A base with one of every building kind on the default 44x44 grid.
#[must_use]
pub fn sample_layout() -> BaseLayout {
    let mut buildings = vec![
        LayoutRecord::new(BuildingKind::TownHall, 20, 20, 4, 4),
        LayoutRecord::new(BuildingKind::Cannon, 15, 15, 3, 3),
        LayoutRecord::new(BuildingKind::Cannon, 27, 27, 3, 3),
        LayoutRecord::new(BuildingKind::ArcherTower, 27, 15, 3, 3),
        LayoutRecord::new(BuildingKind::WizardTower, 15, 27, 3, 3),
        LayoutRecord::new(BuildingKind::GoldMine, 20, 14, 3, 3),
        LayoutRecord::new(BuildingKind::ElixirCollector, 20, 27, 3, 3),
        LayoutRecord::new(BuildingKind::GoldStorage, 14, 21, 3, 3),
        LayoutRecord::new(BuildingKind::ElixirStorage, 27, 21, 3, 3),
        LayoutRecord::new(BuildingKind::Barracks, 8, 8, 3, 3),
        LayoutRecord::new(BuildingKind::ArmyCamp, 33, 33, 4, 4),
        LayoutRecord::new(BuildingKind::BuildersHut, 36, 8, 2, 2),
    ];
    buildings.extend(wall_line(12, 14..=30));

    BaseLayout {
        owner: "sample-defender".into(),
        buildings,
        loot: LootPool {
            gold: 50_000,
            elixir: 40_000,
        },
    }
}

/// A mixed level-1 army.
#[must_use]
pub fn sample_army() -> Roster {
    Roster::from_counts([
        (UnitKind::Barbarian, 10),
        (UnitKind::Archer, 10),
        (UnitKind::Giant, 4),
        (UnitKind::Goblin, 6),
        (UnitKind::WallBreaker, 4),
    ])
}

/// Sample layout and army bundled for replays.
#[must_use]
pub fn sample_snapshot() -> BattleSnapshot {
    BattleSnapshot {
        layout: sample_layout(),
        army: sample_army(),
    }
}

/// A READY simulator on the sample base.
///
/// # Panics
///
/// Panics if the standard catalog is missing a sample building kind.
#[must_use]
pub fn sample_battle() -> CombatSimulator {
    CombatSimulator::with_battle(
        BattleConfig::default(),
        Catalog::standard(),
        &sample_layout(),
        sample_army(),
    )
    .expect("sample layout should load")
}

/// Parse an inline RON layout.
///
/// # Panics
///
/// Panics on malformed RON.
#[must_use]
pub fn layout_from_ron(text: &str) -> BaseLayout {
    ron::from_str(text).expect("fixture layout should parse")
}

/// One deploy in a scripted attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedDeploy {
    /// Frame to issue the deploy on.
    pub frame: u32,
    /// Troop type.
    pub unit: UnitKind,
    /// Target cell; converted to its scene position.
    pub cell: GridCell,
}

impl ScriptedDeploy {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(frame: u32, unit: UnitKind, x: i32, y: i32) -> Self {
        Self {
            frame,
            unit,
            cell: GridCell::new(x, y),
        }
    }
}

/// Four corner-to-corner waves that touch every troop type.
#[must_use]
pub fn sample_script() -> Vec<ScriptedDeploy> {
    vec![
        ScriptedDeploy::new(0, UnitKind::Giant, 2, 2),
        ScriptedDeploy::new(0, UnitKind::Giant, 3, 2),
        ScriptedDeploy::new(30, UnitKind::WallBreaker, 22, 8),
        ScriptedDeploy::new(45, UnitKind::Barbarian, 2, 2),
        ScriptedDeploy::new(45, UnitKind::Barbarian, 2, 3),
        ScriptedDeploy::new(120, UnitKind::Archer, 40, 40),
        ScriptedDeploy::new(120, UnitKind::Archer, 40, 39),
        ScriptedDeploy::new(240, UnitKind::Goblin, 41, 2),
        ScriptedDeploy::new(240, UnitKind::Goblin, 41, 3),
    ]
}

/// Play `script` live through a local session and return the replay text
/// together with the outcome.
///
/// Deploys are issued on their frames (rejections are simply skipped). The
/// attacker surrenders after `max_frames` if the battle is still running.
///
/// # Panics
///
/// Panics if the snapshot fails to load.
#[must_use]
pub fn record_scripted_battle(
    snapshot: &BattleSnapshot,
    script: &[ScriptedDeploy],
    seed: u64,
    max_frames: u32,
) -> (String, BattleOutcome) {
    let mut session = BattleSession::new(
        BattleConfig::default(),
        Catalog::standard(),
        snapshot,
        snapshot.layout.owner.clone(),
        seed,
        NetworkRole::Local,
        raid_core::channel::LocalDeployChannel::new(),
    )
    .expect("snapshot should load");

    let mut script = script.to_vec();
    script.sort_by_key(|d| d.frame);
    let mut next = 0;
    let step = BattleConfig::fixed_step();

    while session.simulator().state() != BattleState::Finished {
        let frame = session.simulator().frame();
        if frame >= max_frames {
            session.surrender();
            break;
        }
        while let Some(deploy) = script.get(next).filter(|d| d.frame <= frame) {
            let pos = session
                .simulator()
                .grid()
                .grid_to_position(deploy.cell.x, deploy.cell.y);
            session.request_deploy(deploy.unit, pos);
            next += 1;
        }
        session.update(step);
    }

    let outcome = session
        .simulator()
        .outcome()
        .cloned()
        .expect("finished battle has an outcome");
    let text = session.finish().unwrap_or_default();
    (text, outcome)
}

/// Replay `text` through a fresh session to completion.
///
/// Returns the outcome, destroyed building indices, and final state hash.
///
/// # Panics
///
/// Panics if the embedded snapshot does not decode.
#[must_use]
pub fn replay_battle(text: &str) -> (BattleOutcome, Vec<u32>, u64) {
    let mut session = BattleSession::from_replay(BattleConfig::default(), Catalog::standard(), text)
        .expect("replay snapshot should decode");
    session.run_to_end();

    let sim = session.simulator();
    let outcome = sim.outcome().cloned().expect("replay should finish");
    (outcome, sim.destroyed_buildings(), sim.state_hash())
}
