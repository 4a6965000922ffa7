//! Unit and building stat tables.
//!
//! The catalog is the per-type strategy table the simulator consults: for
//! every unit kind it holds the combat stats, the target preference used
//! by the AI, and the movement flags; for every building kind it holds
//! hit points and, for defenses, the turret stats. Stats scale linearly
//! with level.
//!
//! The built-in [`Catalog::standard`] table can be replaced by a RON file
//! with the same shape.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::STEPS_PER_SECOND;
use crate::error::{load_ron, BattleError, Result};
use crate::math::{millis_to_steps, Fixed};

// ============================================================================
// Kinds
// ============================================================================

/// Attacking troop types.
///
/// The discriminant is the wire index used in replay logs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum UnitKind {
    /// Melee all-rounder.
    Barbarian = 0,
    /// Ranged, fragile.
    Archer = 1,
    /// Heavy melee that goes for defenses.
    Giant = 2,
    /// Fast raider that goes for resources.
    Goblin = 3,
    /// Demolition unit that detonates on walls.
    WallBreaker = 4,
}

impl UnitKind {
    /// All kinds in wire-index order.
    pub const ALL: [Self; 5] = [
        Self::Barbarian,
        Self::Archer,
        Self::Giant,
        Self::Goblin,
        Self::WallBreaker,
    ];

    /// Wire index of this kind.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Kind for a wire index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Barbarian),
            1 => Some(Self::Archer),
            2 => Some(Self::Giant),
            3 => Some(Self::Goblin),
            4 => Some(Self::WallBreaker),
            _ => None,
        }
    }
}

/// Broad building classes used by targeting and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingCategory {
    /// The town hall; destroying it is worth a star.
    Core,
    /// Mines, collectors and storages.
    Resource,
    /// Barracks and army camps.
    Army,
    /// Buildings that shoot back.
    Defense,
    /// Wall segments.
    Wall,
    /// Everything else.
    Other,
}

/// Defender building types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BuildingKind {
    /// Town hall.
    TownHall,
    /// Gold mine.
    GoldMine,
    /// Elixir collector.
    ElixirCollector,
    /// Gold storage.
    GoldStorage,
    /// Elixir storage.
    ElixirStorage,
    /// Barracks.
    Barracks,
    /// Army camp.
    ArmyCamp,
    /// Cannon.
    Cannon,
    /// Archer tower.
    ArcherTower,
    /// Wizard tower.
    WizardTower,
    /// Wall segment.
    Wall,
    /// Builder's hut.
    BuildersHut,
}

impl BuildingKind {
    /// Category this kind belongs to.
    #[must_use]
    pub const fn category(self) -> BuildingCategory {
        match self {
            Self::TownHall => BuildingCategory::Core,
            Self::GoldMine | Self::ElixirCollector | Self::GoldStorage | Self::ElixirStorage => {
                BuildingCategory::Resource
            }
            Self::Barracks | Self::ArmyCamp => BuildingCategory::Army,
            Self::Cannon | Self::ArcherTower | Self::WizardTower => BuildingCategory::Defense,
            Self::Wall => BuildingCategory::Wall,
            Self::BuildersHut => BuildingCategory::Other,
        }
    }
}

/// Which buildings a unit looks for first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TargetPreference {
    /// Nearest building of any kind.
    #[default]
    Any,
    /// Nearest defense.
    Defense,
    /// Nearest resource building.
    Resource,
    /// Nearest wall.
    Walls,
}

impl TargetPreference {
    /// Whether a building of `category` satisfies this preference.
    #[must_use]
    pub const fn matches(self, category: BuildingCategory) -> bool {
        match self {
            Self::Any => true,
            Self::Defense => matches!(category, BuildingCategory::Defense),
            Self::Resource => matches!(category, BuildingCategory::Resource),
            Self::Walls => matches!(category, BuildingCategory::Wall),
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// A stat that grows linearly with level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelScaled {
    /// Value at level 1.
    pub base: u32,
    /// Added for each level above 1.
    #[serde(default)]
    pub per_level: u32,
}

impl LevelScaled {
    /// Create a scaled stat.
    #[must_use]
    pub const fn new(base: u32, per_level: u32) -> Self {
        Self { base, per_level }
    }

    /// Value at `level`; levels below 1 are treated as 1. Saturates at `u32::MAX`.
    #[must_use]
    pub const fn at(self, level: u8) -> u32 {
        let steps = if level > 1 { level as u32 - 1 } else { 0 };
        self.base.saturating_add(steps.saturating_mul(self.per_level))
    }
}

/// Static description of a unit kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProfile {
    /// Hit points.
    pub hitpoints: LevelScaled,
    /// Damage per attack (or per detonation, before the multiplier).
    pub damage: LevelScaled,
    /// Milliseconds between attacks.
    pub attack_interval_ms: u32,
    /// Attack range in pixels.
    pub range: u32,
    /// Movement speed in pixels per second.
    pub speed: u32,
    /// Flat damage reduction.
    #[serde(default)]
    pub armor: u32,
    /// Target selection rule.
    #[serde(default)]
    pub target: TargetPreference,
    /// Walks straight through buildings.
    #[serde(default)]
    pub ignores_obstacles: bool,
    /// Dies on its first attack, dealing amplified damage.
    #[serde(default)]
    pub detonates: bool,
}

impl UnitProfile {
    /// Resolve the profile at a level into per-step simulation stats.
    #[must_use]
    pub fn stats_at(&self, level: u8) -> UnitStats {
        UnitStats {
            max_hp: self.hitpoints.at(level),
            damage: self.damage.at(level),
            cooldown_frames: millis_to_steps(self.attack_interval_ms, STEPS_PER_SECOND),
            range: Fixed::saturating_from_num(self.range),
            step_distance: Fixed::saturating_from_num(self.speed)
                / Fixed::from_num(STEPS_PER_SECOND),
            armor: self.armor,
        }
    }
}

/// A unit profile resolved for one level, in simulation units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Maximum hit points.
    pub max_hp: u32,
    /// Damage per attack.
    pub damage: u32,
    /// Frames between attacks.
    pub cooldown_frames: u32,
    /// Attack range in pixels.
    #[serde(with = "crate::math::fixed_serde")]
    pub range: Fixed,
    /// Pixels moved per fixed step.
    #[serde(with = "crate::math::fixed_serde")]
    pub step_distance: Fixed,
    /// Flat damage reduction.
    pub armor: u32,
}

/// Turret stats for a defensive building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseProfile {
    /// Damage per shot.
    pub damage: LevelScaled,
    /// Milliseconds between shots.
    pub attack_interval_ms: u32,
    /// Range in pixels.
    pub range: u32,
}

/// Static description of a building kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingProfile {
    /// Hit points.
    pub hitpoints: LevelScaled,
    /// Flat damage reduction.
    #[serde(default)]
    pub armor: u32,
    /// Turret stats, for defenses only.
    #[serde(default)]
    pub defense: Option<DefenseProfile>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Stat tables for every unit and building kind in a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Unit profiles.
    pub units: BTreeMap<UnitKind, UnitProfile>,
    /// Building profiles.
    pub buildings: BTreeMap<BuildingKind, BuildingProfile>,
}

impl Catalog {
    /// The stock balance table.
    #[must_use]
    pub fn standard() -> Self {
        let melee = |hp: LevelScaled, damage: LevelScaled, interval: u32, speed: u32| UnitProfile {
            hitpoints: hp,
            damage,
            attack_interval_ms: interval,
            range: 50,
            speed,
            armor: 0,
            target: TargetPreference::Any,
            ignores_obstacles: false,
            detonates: false,
        };

        let mut units = BTreeMap::new();
        units.insert(
            UnitKind::Barbarian,
            melee(LevelScaled::new(45, 5), LevelScaled::new(8, 2), 1000, 100),
        );
        units.insert(
            UnitKind::Archer,
            UnitProfile {
                range: 200,
                ..melee(LevelScaled::new(20, 3), LevelScaled::new(7, 2), 1000, 100)
            },
        );
        units.insert(
            UnitKind::Giant,
            UnitProfile {
                target: TargetPreference::Defense,
                ..melee(LevelScaled::new(300, 40), LevelScaled::new(11, 3), 2000, 60)
            },
        );
        units.insert(
            UnitKind::Goblin,
            UnitProfile {
                target: TargetPreference::Resource,
                ..melee(LevelScaled::new(25, 3), LevelScaled::new(11, 2), 1000, 150)
            },
        );
        units.insert(
            UnitKind::WallBreaker,
            UnitProfile {
                range: 30,
                target: TargetPreference::Walls,
                detonates: true,
                ..melee(LevelScaled::new(20, 4), LevelScaled::new(150, 50), 0, 120)
            },
        );

        let plain = |base: u32, per_level: u32| BuildingProfile {
            hitpoints: LevelScaled::new(base, per_level),
            armor: 0,
            defense: None,
        };
        let turret = |base: u32, per_level: u32, damage: LevelScaled, interval: u32, range: u32| {
            BuildingProfile {
                defense: Some(DefenseProfile {
                    damage,
                    attack_interval_ms: interval,
                    range,
                }),
                ..plain(base, per_level)
            }
        };

        let mut buildings = BTreeMap::new();
        buildings.insert(BuildingKind::TownHall, plain(1500, 500));
        buildings.insert(BuildingKind::GoldMine, plain(400, 50));
        buildings.insert(BuildingKind::ElixirCollector, plain(400, 50));
        buildings.insert(BuildingKind::GoldStorage, plain(600, 100));
        buildings.insert(BuildingKind::ElixirStorage, plain(600, 100));
        buildings.insert(BuildingKind::Barracks, plain(500, 80));
        buildings.insert(BuildingKind::ArmyCamp, plain(250, 50));
        buildings.insert(BuildingKind::BuildersHut, plain(250, 0));
        buildings.insert(BuildingKind::Wall, plain(300, 100));
        buildings.insert(
            BuildingKind::Cannon,
            turret(380, 60, LevelScaled::new(9, 2), 800, 250),
        );
        buildings.insert(
            BuildingKind::ArcherTower,
            turret(380, 60, LevelScaled::new(11, 3), 1000, 300),
        );
        buildings.insert(
            BuildingKind::WizardTower,
            turret(620, 90, LevelScaled::new(16, 4), 1500, 250),
        );

        Self { units, buildings }
    }

    /// Load a catalog from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let catalog: Self = load_ron(path)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Every unit kind must have a profile.
    pub fn validate(&self) -> Result<()> {
        for kind in UnitKind::ALL {
            if !self.units.contains_key(&kind) {
                return Err(BattleError::MissingCatalogEntry(format!("{kind:?}")));
            }
        }
        Ok(())
    }

    /// Profile for a unit kind.
    #[must_use]
    pub fn unit(&self, kind: UnitKind) -> Option<&UnitProfile> {
        self.units.get(&kind)
    }

    /// Profile for a building kind.
    #[must_use]
    pub fn building(&self, kind: BuildingKind) -> Option<&BuildingProfile> {
        self.buildings.get(&kind)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}
