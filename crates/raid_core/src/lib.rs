//! # Raid Core
//!
//! Deterministic battle simulation core for Village Raid.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO outside the explicit load/save helpers
//! - No system randomness (seeded generators only)
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Replays that reproduce a battle bit-for-bit
//! - Headless batch runs and CI verification
//! - Networked spectating driven by deploy events alone
//!
//! ## Crate Structure
//!
//! - [`grid`] - Isometric grid transform and occupancy map
//! - [`pathfinding`] - A* search and line-of-sight smoothing
//! - [`deployment`] - Deploy-legality mask around buildings
//! - [`catalog`] - Per-unit and per-building stat tables
//! - [`layout`] - Defender base layouts and loot pools
//! - [`simulation`] - Fixed-timestep combat state machine
//! - [`replay`] - Frame-indexed deploy log recording and playback
//! - [`session`] - Per-battle context wiring the pieces together
//! - [`math`] - Fixed-point math utilities
//! - [`arena`] - Generation-checked storage for buildings
//! - [`channel`] - Deploy-event transport seam
//! - [`rng`] - Seeded random numbers

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod arena;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod deployment;
pub mod error;
pub mod grid;
pub mod layout;
pub mod math;
pub mod pathfinding;
pub mod replay;
pub mod rng;
pub mod session;
pub mod simulation;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::arena::{Arena, Handle};
    pub use crate::catalog::{
        BuildingCategory, BuildingKind, Catalog, TargetPreference, UnitKind, UnitProfile,
    };
    pub use crate::channel::{DeployChannel, DeployMessage, LocalDeployChannel};
    pub use crate::config::BattleConfig;
    pub use crate::deployment::DeploymentValidator;
    pub use crate::error::{BattleError, Result};
    pub use crate::grid::{GridCell, GridSpace};
    pub use crate::layout::{BaseLayout, BattleSnapshot, LayoutRecord, LootPool, Roster};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::pathfinding::PathPlanner;
    pub use crate::replay::{EventRecorder, ReplayEvent, ReplayEventKind, ReplayLog};
    pub use crate::rng::BattleRng;
    pub use crate::session::{BattleSession, NetworkRole};
    pub use crate::simulation::{
        BattleEndReason, BattleOutcome, BattleState, Building, BuildingHandle, CombatSimulator,
        SimEvent, Unit, UnitId,
    };
}
