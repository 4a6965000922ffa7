//! Determinism testing utilities.
//!
//! Provides a harness for verifying that battles produce identical results
//! given identical inputs.
//!
//! # Testing Strategy
//!
//! A replay is only a seed, a snapshot and a list of deploys, so the
//! simulator must reproduce every battle bit-for-bit. Sources of
//! non-determinism guarded against:
//!
//! - **Floating-point math**: all simulation arithmetic goes through
//!   [`raid_core::math::Fixed`].
//! - **Hash iteration order**: catalogs and rosters are `BTreeMap`s; units
//!   and buildings live in ordered vectors.
//! - **System randomness**: none in the core; tooling draws from a seeded
//!   [`raid_core::rng::BattleRng`].
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual phases (movement, targeting, defenses)
//! 2. **Replay tests**: live run vs. replay of its log
//! 3. **Property tests**: random attack scripts still replay exactly
//! 4. **Parallel tests**: N threads running the same battle all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use raid_core::simulation::CombatSimulator;
use tracing::warn;

use crate::fixtures::replay_battle;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of frames simulated per run.
    pub frames: u64,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>, frames: u64) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
            hashes,
            frames,
        }
    }

    /// All unique hashes (should be 1 for a deterministic battle).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert the runs matched, with a detailed message if not.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic,
            "Battle is non-deterministic!\n\
             Runs: {}\n\
             Frames: {}\n\
             Unique hashes: {} (expected 1)\n\
             All hashes: {:?}",
            self.hashes.len(),
            self.frames,
            self.unique_hashes().len(),
            self.hashes
        );
    }
}

/// Run a state machine several times and verify every run ends in the same hash.
///
/// # Example
///
/// ```ignore
/// use raid_test_utils::determinism::verify_determinism;
/// use raid_test_utils::fixtures::sample_battle;
///
/// let result = verify_determinism(3, 600, sample_battle, |sim| sim.tick(), |sim| sim.state_hash());
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    frames: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            for _ in 0..frames {
                step(&mut state);
            }
            hash(&state)
        })
        .collect();

    DeterminismResult::from_hashes(hashes, frames)
}

/// Run the same battle twice for `frames` steps and compare final hashes.
pub fn verify_battle_determinism<F>(setup_fn: F, frames: u64) -> bool
where
    F: Fn() -> CombatSimulator,
{
    verify_determinism(2, frames, setup_fn, CombatSimulator::tick, CombatSimulator::state_hash)
        .is_deterministic
}

/// Run N copies of a battle on scoped threads and collect their final hashes.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_battles_scoped<F>(setup_fn: F, num_sims: usize, frames: u64) -> DeterminismResult
where
    F: Fn() -> CombatSimulator + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..frames {
                        sim.tick();
                    }
                    sim.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });

    DeterminismResult::from_hashes(hashes, frames)
}

/// Step two copies of a battle side by side and report the first frame
/// where their hashes differ.
///
/// `None` means no divergence within `frames`.
pub fn find_first_divergence<F>(setup_fn: F, frames: u64) -> Option<u64>
where
    F: Fn() -> CombatSimulator,
{
    let mut a = setup_fn();
    let mut b = setup_fn();

    if a.state_hash() != b.state_hash() {
        warn!("Battles diverge before the first step");
        return Some(0);
    }

    for frame in 1..=frames {
        a.tick();
        b.tick();
        if a.state_hash() != b.state_hash() {
            warn!(frame, "Battles diverged");
            return Some(frame);
        }
    }

    None
}

/// Check that a bincode snapshot taken after `frames` steps restores to the
/// same hash and keeps matching for another `frames` steps.
pub fn verify_snapshot_determinism<F>(setup_fn: F, frames: u64) -> bool
where
    F: Fn() -> CombatSimulator,
{
    let mut sim = setup_fn();
    for _ in 0..frames {
        sim.tick();
    }

    let Ok(bytes) = sim.snapshot() else {
        return false;
    };
    let Ok(mut restored) = CombatSimulator::restore(&bytes) else {
        return false;
    };
    if restored.state_hash() != sim.state_hash() {
        return false;
    }

    for _ in 0..frames {
        sim.tick();
        restored.tick();
    }
    restored.state_hash() == sim.state_hash()
}

/// Replay a serialized log `runs` times through fresh sessions.
///
/// Each run's hash covers stars, destruction percent and the destroyed
/// building set, so matching hashes mean matching battle results.
pub fn verify_replay_determinism(text: &str, runs: usize) -> DeterminismResult {
    let mut frames = 0;
    let hashes = (0..runs)
        .map(|_| {
            let (outcome, destroyed, _) = replay_battle(text);
            frames = u64::from(outcome.frames);
            compute_hash(&(outcome.stars, outcome.destruction_percent, destroyed))
        })
        .collect();

    DeterminismResult::from_hashes(hashes, frames)
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for battle inputs.
pub mod strategies {
    use proptest::prelude::*;
    use raid_core::catalog::UnitKind;
    use raid_core::grid::GridCell;

    use crate::fixtures::ScriptedDeploy;

    /// Any troop type.
    pub fn arb_unit_kind() -> impl Strategy<Value = UnitKind> {
        prop::sample::select(UnitKind::ALL.to_vec())
    }

    /// A cell inside a `width` x `height` grid.
    pub fn arb_grid_cell(width: i32, height: i32) -> impl Strategy<Value = GridCell> {
        (0..width, 0..height).prop_map(|(x, y)| GridCell::new(x, y))
    }

    /// Building footprint sizes seen in real layouts.
    pub fn arb_footprint_size() -> impl Strategy<Value = (u32, u32)> {
        (1u32..=4, 1u32..=4)
    }

    /// One deploy somewhere in the first `max_frame` frames.
    pub fn arb_deploy(max_frame: u32, width: i32, height: i32) -> impl Strategy<Value = ScriptedDeploy> {
        (0..max_frame, arb_unit_kind(), arb_grid_cell(width, height))
            .prop_map(|(frame, unit, cell)| ScriptedDeploy { frame, unit, cell })
    }

    /// A frame-sorted attack script of up to `max_len` deploys.
    pub fn arb_script(max_len: usize, max_frame: u32) -> impl Strategy<Value = Vec<ScriptedDeploy>> {
        proptest::collection::vec(arb_deploy(max_frame, 44, 44), 1..max_len).prop_map(
            |mut script| {
                script.sort_by_key(|d| d.frame);
                script
            },
        )
    }
}
