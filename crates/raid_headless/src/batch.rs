//! Seeded autoplay batches.
//!
//! Runs many battles against one layout in parallel using rayon. Game `i`
//! uses seed `seed_start + i`; the seed drives the generated attack plan
//! and is stored in the replay, so any game in a batch can be rerun on its
//! own.

use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use raid_core::deployment::{DeploymentValidator, Footprint};
use raid_core::grid::{GridCell, GridSpace};
use raid_core::layout::{BaseLayout, LootPool, Roster};
use raid_core::rng::BattleRng;
use raid_core::simulation::BattleEndReason;

use crate::plan::AttackPlan;
use crate::runner::{RunReport, Runner};

/// Configuration for an autoplay batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoplayConfig {
    /// Label for the layout under attack.
    pub layout: String,
    /// Number of games to run.
    pub game_count: u32,
    /// Maximum parallel games (0 = use rayon default).
    pub parallel_games: u32,
    /// Seed for game 0.
    pub seed_start: u64,
    /// Army every generated plan deploys.
    pub army: Roster,
    /// Generated deploys land in `[0, max_deploy_frame)`.
    pub max_deploy_frame: u32,
    /// Surrender after this many frames (0 = play to the end).
    pub max_frames: u32,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            layout: "sample_base".to_string(),
            game_count: 100,
            parallel_games: 0,
            seed_start: 0,
            army: Roster::default(),
            max_deploy_frame: 600, // 10 seconds at 60 fps
            max_frames: 0,
        }
    }
}

impl AutoplayConfig {
    /// Create config for a labelled layout.
    #[must_use]
    pub fn new(layout: &str, game_count: u32) -> Self {
        Self {
            layout: layout.to_string(),
            game_count,
            ..Default::default()
        }
    }

    /// Set seed start.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed_start = seed;
        self
    }

    /// Set the army.
    #[must_use]
    pub fn with_army(mut self, army: Roster) -> Self {
        self.army = army;
        self
    }

    /// Set the thread count.
    #[must_use]
    pub const fn with_parallel(mut self, threads: u32) -> Self {
        self.parallel_games = threads;
        self
    }

    /// Set the surrender frame.
    #[must_use]
    pub const fn with_max_frames(mut self, frames: u32) -> Self {
        self.max_frames = frames;
        self
    }
}

/// Per-game line in the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    /// Game index within the batch.
    pub game_index: u32,
    /// Seed used.
    pub seed: u64,
    /// Stars earned.
    pub stars: u8,
    /// Destruction percent.
    pub destruction_percent: u32,
    /// Why the battle ended.
    pub reason: BattleEndReason,
    /// Frames simulated.
    pub frames: u32,
    /// Loot taken.
    pub loot: LootPool,
    /// Planned deploys the session refused.
    pub rejected_deploys: usize,
    /// Final simulator state hash.
    pub state_hash: u64,
}

impl GameSummary {
    fn from_report(game_index: u32, seed: u64, report: &RunReport) -> Self {
        Self {
            game_index,
            seed,
            stars: report.outcome.stars,
            destruction_percent: u32::from(report.outcome.destruction_percent),
            reason: report.outcome.reason,
            frames: report.outcome.frames,
            loot: report.outcome.loot,
            rejected_deploys: report.rejected_deploys,
            state_hash: report.state_hash,
        }
    }
}

/// Aggregate statistics over a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoplaySummary {
    /// Games that finished.
    pub games: u32,
    /// Games per star count, index = stars.
    pub star_counts: [u32; 4],
    /// Mean stars.
    pub avg_stars: f64,
    /// Mean destruction percent.
    pub avg_destruction: f64,
    /// Mean battle length in frames.
    pub avg_frames: f64,
    /// Total gold looted.
    pub total_gold: u64,
    /// Total elixir looted.
    pub total_elixir: u64,
}

impl AutoplaySummary {
    /// Aggregate a slice of game summaries.
    #[must_use]
    pub fn from_games(games: &[GameSummary]) -> Self {
        let mut summary = Self {
            games: games.len() as u32,
            ..Self::default()
        };
        if games.is_empty() {
            return summary;
        }

        let mut stars = 0u64;
        let mut destruction = 0u64;
        let mut frames = 0u64;
        for game in games {
            summary.star_counts[usize::from(game.stars.min(3))] += 1;
            stars += u64::from(game.stars);
            destruction += u64::from(game.destruction_percent);
            frames += u64::from(game.frames);
            summary.total_gold += u64::from(game.loot.gold);
            summary.total_elixir += u64::from(game.loot.elixir);
        }

        let n = games.len() as f64;
        summary.avg_stars = stars as f64 / n;
        summary.avg_destruction = destruction as f64 / n;
        summary.avg_frames = frames as f64 / n;
        summary
    }

    /// Fraction of games that earned three stars.
    #[must_use]
    pub fn three_star_rate(&self) -> f64 {
        f64::from(self.star_counts[3]) / f64::from(self.games.max(1))
    }
}

/// Results from an autoplay batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoplayResults {
    /// Configuration used.
    pub config: AutoplayConfig,
    /// Individual games, in index order.
    pub games: Vec<GameSummary>,
    /// Aggregate summary.
    pub summary: AutoplaySummary,
    /// Total runtime.
    pub duration_seconds: f64,
    /// Games that failed to run.
    pub errors: Vec<AutoplayError>,
}

impl AutoplayResults {
    /// Save results to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// A game that could not be run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoplayError {
    /// Game index.
    pub game_index: u32,
    /// Seed used.
    pub seed: u64,
    /// Error message.
    pub message: String,
}

/// Deploy mask for `layout` on the runner's grid.
fn layout_validator(runner: &Runner, layout: &BaseLayout) -> DeploymentValidator {
    let grid = GridSpace::from_config(runner.config());
    let mut validator = DeploymentValidator::new(&grid);
    validator.set_buildings(layout.buildings.iter().map(|r| Footprint {
        origin: GridCell::new(r.grid_x, r.grid_y),
        width: r.width,
        height: r.height,
    }));
    validator
}

/// Run an autoplay batch against `layout`.
pub fn run_autoplay(runner: &Runner, layout: &BaseLayout, config: AutoplayConfig) -> AutoplayResults {
    let start = Instant::now();
    info!(
        games = config.game_count,
        layout = %config.layout,
        seed_start = config.seed_start,
        "Starting autoplay batch"
    );

    if config.parallel_games > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_games as usize)
            .build_global()
            .ok(); // Ignore if already set
    }

    let validator = layout_validator(runner, layout);
    let max_frames = (config.max_frames > 0).then_some(config.max_frames);

    let results: Vec<Result<GameSummary, AutoplayError>> = (0..config.game_count)
        .into_par_iter()
        .map(|i| {
            let seed = config.seed_start.wrapping_add(u64::from(i));
            let mut rng = BattleRng::seed_from_u64(seed);
            let plan =
                AttackPlan::generate(&mut rng, &validator, &config.army, config.max_deploy_frame);

            match runner.run(layout, &plan, seed, max_frames) {
                Ok(report) => {
                    debug!(game = i, seed, stars = report.outcome.stars, "Game finished");
                    Ok(GameSummary::from_report(i, seed, &report))
                }
                Err(e) => {
                    warn!("Game {} failed: {}", i, e);
                    Err(AutoplayError {
                        game_index: i,
                        seed,
                        message: e.to_string(),
                    })
                }
            }
        })
        .collect();

    let (games, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let games: Vec<GameSummary> = games.into_iter().filter_map(Result::ok).collect();
    let errors: Vec<AutoplayError> = errors.into_iter().filter_map(Result::err).collect();

    let summary = AutoplaySummary::from_games(&games);
    let duration_seconds = start.elapsed().as_secs_f64();
    info!(
        "Autoplay complete: {} games in {:.1}s, avg {:.2} stars, {:.1}% three-star",
        summary.games,
        duration_seconds,
        summary.avg_stars,
        summary.three_star_rate() * 100.0
    );

    AutoplayResults {
        config,
        games,
        summary,
        duration_seconds,
        errors,
    }
}
