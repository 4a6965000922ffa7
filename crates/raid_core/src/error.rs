//! Error types for the battle core.
//!
//! Gameplay operations never fail loudly: a rejected deploy or an
//! unreachable target is a `false` or an empty path. These errors cover
//! loading and saving data only.

use thiserror::Error;

/// Result type alias using [`BattleError`].
pub type Result<T> = std::result::Result<T, BattleError>;

/// Top-level error type for data loading and persistence.
#[derive(Debug, Error)]
pub enum BattleError {
    /// Reading or writing a file failed.
    #[error("IO error on '{path}': {source}")]
    Io {
        /// Path of the file involved.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Opponent snapshot was not valid JSON for a base layout.
    #[error("Invalid base snapshot: {0}")]
    InvalidSnapshot(#[from] serde_json::Error),

    /// Simulator snapshot could not be encoded or decoded.
    #[error("Simulator snapshot error: {0}")]
    SnapshotCodec(String),

    /// Catalog is missing an entry the layout or roster needs.
    #[error("Catalog has no entry for {0}")]
    MissingCatalogEntry(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Read a RON file and deserialize it, mapping failures to [`BattleError`].
pub(crate) fn load_ron<T, P>(path: P) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<std::path::Path>,
{
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| BattleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    ron::from_str(&text).map_err(|e| BattleError::DataParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
