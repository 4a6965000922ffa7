//! # Raid Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism test harness
//! - Sample bases, armies and scripted attacks
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
