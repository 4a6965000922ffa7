//! Battle tuning loaded from RON.
//!
//! Values are stored as whole numbers (seconds, pixels, percentages) so
//! data files stay readable; the simulator converts them to frames and
//! fixed-point once at construction.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{load_ron, BattleError, Result};
use crate::math::Fixed;

/// Fixed simulation steps per second of battle time.
pub const STEPS_PER_SECOND: u32 = 60;

/// Largest accepted grid side, in cells.
pub const MAX_GRID_SIDE: u32 = 1024;

/// Largest accepted tile width, in pixels.
pub const MAX_TILE_WIDTH: u32 = 1024;

/// Per-battle tuning.
///
/// # Example RON
///
/// ```ron
/// BattleConfig(
///     battle_seconds: 180,
///     preparation_seconds: 30,
///     tile_width: 56,
///     grid_width: 44,
///     grid_height: 44,
///     detonation_multiplier: 40,
///     base_loot_percent: 20,
///     loot_percent_per_star: 10,
///     max_loot_percent: 50,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Length of the fighting phase.
    pub battle_seconds: u32,
    /// How long the battle may sit in READY before it expires.
    pub preparation_seconds: u32,
    /// Width of one diamond tile in pixels.
    pub tile_width: u32,
    /// Grid width in cells.
    pub grid_width: u32,
    /// Grid height in cells.
    pub grid_height: u32,
    /// Damage multiplier applied when a demolition unit detonates.
    #[serde(default = "default_detonation_multiplier")]
    pub detonation_multiplier: u32,
    /// Loot rate with zero stars.
    #[serde(default = "default_base_loot")]
    pub base_loot_percent: u32,
    /// Loot rate added per star earned.
    #[serde(default = "default_loot_per_star")]
    pub loot_percent_per_star: u32,
    /// Upper bound on the loot rate.
    #[serde(default = "default_max_loot")]
    pub max_loot_percent: u32,
}

const fn default_detonation_multiplier() -> u32 {
    40
}

const fn default_base_loot() -> u32 {
    20
}

const fn default_loot_per_star() -> u32 {
    10
}

const fn default_max_loot() -> u32 {
    50
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            battle_seconds: 180,
            preparation_seconds: 30,
            tile_width: 56,
            grid_width: 44,
            grid_height: 44,
            detonation_multiplier: default_detonation_multiplier(),
            base_loot_percent: default_base_loot(),
            loot_percent_per_star: default_loot_per_star(),
            max_loot_percent: default_max_loot(),
        }
    }
}

impl BattleConfig {
    /// Load and validate a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_ron(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(BattleError::InvalidConfig("grid must be at least 1x1".into()));
        }
        if self.grid_width > MAX_GRID_SIDE || self.grid_height > MAX_GRID_SIDE {
            return Err(BattleError::InvalidConfig(format!(
                "grid {}x{} exceeds {MAX_GRID_SIDE} cells per side",
                self.grid_width, self.grid_height
            )));
        }
        if !(2..=MAX_TILE_WIDTH).contains(&self.tile_width) {
            return Err(BattleError::InvalidConfig(format!(
                "tile_width {} is out of range",
                self.tile_width
            )));
        }
        if self.battle_seconds == 0 {
            return Err(BattleError::InvalidConfig(
                "battle_seconds must be positive".into(),
            ));
        }
        for seconds in [self.battle_seconds, self.preparation_seconds] {
            if seconds.checked_mul(STEPS_PER_SECOND).is_none() {
                return Err(BattleError::InvalidConfig(format!(
                    "{seconds} seconds does not fit in a frame counter"
                )));
            }
        }
        Ok(())
    }

    /// Fighting-phase length in frames.
    #[must_use]
    pub const fn battle_frames(&self) -> u32 {
        self.battle_seconds * STEPS_PER_SECOND
    }

    /// Preparation countdown in frames.
    #[must_use]
    pub const fn preparation_frames(&self) -> u32 {
        self.preparation_seconds * STEPS_PER_SECOND
    }

    /// Duration of one fixed step in seconds.
    #[must_use]
    pub fn fixed_step() -> Fixed {
        Fixed::ONE / Fixed::from_num(STEPS_PER_SECOND)
    }

    /// Loot rate in percent for a given star count.
    #[must_use]
    pub fn loot_percent(&self, stars: u8) -> u32 {
        self.loot_percent_per_star
            .saturating_mul(u32::from(stars))
            .saturating_add(self.base_loot_percent)
            .min(self.max_loot_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = BattleConfig::default();
        assert_eq!(config.battle_frames(), 180 * 60);
        assert_eq!(config.preparation_frames(), 30 * 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loot_rate_caps() {
        let config = BattleConfig::default();
        assert_eq!(config.loot_percent(0), 20);
        assert_eq!(config.loot_percent(2), 40);
        assert_eq!(config.loot_percent(3), 50);
    }

    #[test]
    fn test_ron_roundtrip_with_defaults() {
        let text = "BattleConfig(battle_seconds: 90, preparation_seconds: 10, \
                    tile_width: 40, grid_width: 20, grid_height: 30)";
        let config: BattleConfig = ron::from_str(text).unwrap();
        assert_eq!(config.battle_frames(), 90 * 60);
        assert_eq!(config.detonation_multiplier, 40);
        assert_eq!(config.grid_height, 30);
    }

    #[test]
    fn test_validate_rejects_empty_grid() {
        let config = BattleConfig {
            grid_width: 0,
            ..BattleConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BattleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_sizes() {
        let oversized = BattleConfig {
            grid_height: MAX_GRID_SIDE + 1,
            ..BattleConfig::default()
        };
        let thin_tiles = BattleConfig {
            tile_width: 1,
            ..BattleConfig::default()
        };
        let endless = BattleConfig {
            preparation_seconds: u32::MAX,
            ..BattleConfig::default()
        };
        for config in [oversized, thin_tiles, endless] {
            assert!(matches!(
                config.validate(),
                Err(BattleError::InvalidConfig(_))
            ));
        }
    }
}
