//! Headless raid battle runner.
//!
//! # Usage
//!
//! ```bash
//! # Play an attack plan and print the outcome
//! cargo run -p raid_headless -- run --layout base.ron --plan plan.ron --seed 7
//!
//! # Replay a recorded battle
//! cargo run -p raid_headless -- replay --file replay.txt
//!
//! # Replay five times and compare
//! cargo run -p raid_headless -- verify --file replay.txt --runs 5
//!
//! # Seeded random attacks in parallel
//! cargo run -p raid_headless -- autoplay --layout base.ron --plan plan.ron --count 200
//! ```
//!
//! Output (stdout): JSON
//! Logs (stderr): human-readable

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raid_core::catalog::Catalog;
use raid_core::config::BattleConfig;
use raid_core::layout::BaseLayout;
use raid_headless::{
    run_autoplay, AttackPlan, AutoplayConfig, HeadlessError, Result, Runner,
};

#[derive(Parser)]
#[command(name = "raid_headless")]
#[command(about = "Headless raid battle runner for replays and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Battle rules (RON); built-in defaults if omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Unit and building catalog (RON); built-in table if omitted
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play an attack plan against a layout
    Run {
        /// Defender layout (RON)
        #[arg(short, long)]
        layout: PathBuf,

        /// Attack plan (RON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Seed stored in the replay
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Surrender after this many frames
        #[arg(long)]
        max_frames: Option<u32>,

        /// Write the replay text here
        #[arg(long)]
        replay_out: Option<PathBuf>,
    },

    /// Play back a recorded replay
    Replay {
        /// Replay file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replay a log several times and compare results
    Verify {
        /// Replay file
        #[arg(short, long)]
        file: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value = "3")]
        runs: usize,
    },

    /// Run seeded random attacks in parallel
    Autoplay {
        /// Defender layout (RON)
        #[arg(short, long)]
        layout: PathBuf,

        /// Attack plan whose army every game deploys
        #[arg(short, long)]
        plan: PathBuf,

        /// Number of games
        #[arg(short, long, default_value = "100")]
        count: u32,

        /// Seed for the first game
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Parallel threads (0 = all cores)
        #[arg(long, default_value = "0")]
        parallel: u32,

        /// Surrender after this many frames (0 = play out)
        #[arg(long, default_value = "0")]
        max_frames: u32,

        /// Write full results JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging to stderr (stdout is for results)
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    let result = load_runner(cli.config.as_deref(), cli.catalog.as_deref()).and_then(|runner| {
        match cli.command {
            Commands::Run {
                layout,
                plan,
                seed,
                max_frames,
                replay_out,
            } => cmd_run(&runner, &layout, &plan, seed, max_frames, replay_out.as_deref()),
            Commands::Replay { file } => cmd_replay(&runner, &file),
            Commands::Verify { file, runs } => cmd_verify(&runner, &file, runs),
            Commands::Autoplay {
                layout,
                plan,
                count,
                seed,
                parallel,
                max_frames,
                output,
            } => cmd_autoplay(
                &runner,
                &layout,
                &plan,
                AutoplayConfig::new(&layout.display().to_string(), count)
                    .with_seed(seed)
                    .with_parallel(parallel)
                    .with_max_frames(max_frames),
                output.as_deref(),
            ),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_runner(config: Option<&Path>, catalog: Option<&Path>) -> Result<Runner> {
    let config = config.map_or_else(|| Ok(BattleConfig::default()), BattleConfig::load)?;
    config.validate()?;
    let catalog = catalog.map_or_else(|| Ok(Catalog::standard()), Catalog::load)?;
    Ok(Runner::new(config, catalog))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(HeadlessError::FileNotFound(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Play a plan and print its report
fn cmd_run(
    runner: &Runner,
    layout: &Path,
    plan: &Path,
    seed: u64,
    max_frames: Option<u32>,
    replay_out: Option<&Path>,
) -> Result<()> {
    let layout = BaseLayout::load(layout)?;
    let plan = AttackPlan::load(plan)?;
    let mut report = runner.run(&layout, &plan, seed, max_frames)?;

    if let Some(path) = replay_out {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &report.replay)?;
        tracing::info!("Replay written to {}", path.display());
        report.replay.clear();
    }
    print_json(&report)
}

/// Play back a replay file
fn cmd_replay(runner: &Runner, file: &Path) -> Result<()> {
    let text = read_file(file)?;
    print_json(&runner.replay(&text)?)
}

/// Replay a file several times; fails if the runs disagree
fn cmd_verify(runner: &Runner, file: &Path, runs: usize) -> Result<()> {
    let text = read_file(file)?;
    let report = runner.verify(&text, runs.max(1))?;
    print_json(&report)?;
    report.into_result().map(|_| ())
}

/// Run an autoplay batch
fn cmd_autoplay(
    runner: &Runner,
    layout: &Path,
    plan: &Path,
    config: AutoplayConfig,
    output: Option<&Path>,
) -> Result<()> {
    let layout = BaseLayout::load(layout)?;
    let plan = AttackPlan::load(plan)?;
    let results = run_autoplay(runner, &layout, config.with_army(plan.army));

    if let Some(path) = output {
        results.save(path)?;
        tracing::info!("Results saved to {}", path.display());
    }
    print_json(&results.summary)
}
