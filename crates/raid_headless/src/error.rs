//! Error type for the headless runner.

use thiserror::Error;

use raid_core::error::BattleError;

/// Errors surfaced by the CLI and its library entry points.
#[derive(Error, Debug)]
pub enum HeadlessError {
    /// Input file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),
    /// Failed to read or write a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse a RON plan.
    #[error("Failed to parse attack plan: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Failed to encode JSON output.
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The battle core rejected its input.
    #[error(transparent)]
    Core(#[from] BattleError),
    /// A battle loop stopped before the battle finished.
    #[error("Battle stopped without an outcome")]
    Unfinished,
    /// Replaying the same log gave different results.
    #[error("Replay diverged: {unique} distinct results over {runs} runs")]
    ReplayDiverged {
        /// Runs performed.
        runs: usize,
        /// Distinct result hashes seen.
        unique: usize,
    },
}

/// Result alias for [`HeadlessError`].
pub type Result<T> = std::result::Result<T, HeadlessError>;
