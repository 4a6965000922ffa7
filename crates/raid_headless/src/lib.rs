//! Headless battle runner for replays, CI verification and autoplay.
//!
//! This crate drives [`raid_core`] battles without any rendering:
//!
//! - **Scripted runs**: play an [`AttackPlan`] against a layout and record
//!   the replay
//! - **Replay playback**: rerun a recorded battle and report its outcome
//! - **Replay verification**: replay a log several times and compare
//!   final state hashes
//! - **Autoplay**: generate seeded random plans and run them in parallel
//!
//! Results go to stdout as JSON; logs go to stderr.
//!
//! # Example
//!
//! ```bash
//! # Run a plan and keep the replay
//! cargo run -p raid_headless -- run --layout data/layouts/sample_base.ron \
//!     --plan data/plans/sample_plan.ron --replay-out replay.txt
//!
//! # Check the replay reproduces
//! cargo run -p raid_headless -- verify --file replay.txt --runs 5
//!
//! # 500 seeded games
//! cargo run -p raid_headless -- autoplay --layout data/layouts/sample_base.ron \
//!     --plan data/plans/sample_plan.ron --count 500 --output results/autoplay.json
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod error;
pub mod plan;
pub mod runner;

pub use batch::{run_autoplay, AutoplayConfig, AutoplayResults, AutoplaySummary, GameSummary};
pub use error::{HeadlessError, Result};
pub use plan::{AttackPlan, PlanDeploy};
pub use runner::{RunReport, Runner, VerifyReport};
