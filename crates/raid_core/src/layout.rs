//! Defender layouts, attacker rosters, and the snapshot stored in replays.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::{BuildingKind, UnitKind};
use crate::error::{load_ron, Result};
use crate::grid::GridCell;

/// One building as placed in a base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRecord {
    /// Building type.
    pub kind: BuildingKind,
    /// Upgrade level (1-based).
    #[serde(default = "default_level")]
    pub level: u8,
    /// Top-left cell column.
    pub grid_x: i32,
    /// Top-left cell row.
    pub grid_y: i32,
    /// Footprint width in cells.
    pub width: u32,
    /// Footprint height in cells.
    pub height: u32,
    /// Replaces the catalog's hit points when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitpoints: Option<u32>,
}

const fn default_level() -> u8 {
    1
}

impl LayoutRecord {
    /// A level-1 building with catalog hit points.
    #[must_use]
    pub const fn new(kind: BuildingKind, grid_x: i32, grid_y: i32, width: u32, height: u32) -> Self {
        Self {
            kind,
            level: 1,
            grid_x,
            grid_y,
            width,
            height,
            hitpoints: None,
        }
    }

    /// Top-left cell.
    #[must_use]
    pub const fn origin(&self) -> GridCell {
        GridCell::new(self.grid_x, self.grid_y)
    }
}

/// Resources the defender has on hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootPool {
    /// Gold available.
    pub gold: u32,
    /// Elixir available.
    pub elixir: u32,
}

/// A defender's base as handed to the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLayout {
    /// Owner identifier.
    #[serde(default)]
    pub owner: String,
    /// Placed buildings.
    pub buildings: Vec<LayoutRecord>,
    /// Resources that can be looted.
    #[serde(default)]
    pub loot: LootPool,
}

impl BaseLayout {
    /// Load a layout from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_ron(path)
    }
}

/// Troops available to the attacker, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Remaining count per kind.
    pub counts: BTreeMap<UnitKind, u32>,
    /// Troop level per kind; missing kinds are level 1.
    #[serde(default)]
    pub levels: BTreeMap<UnitKind, u8>,
}

impl Roster {
    /// Build a level-1 roster from `(kind, count)` pairs.
    #[must_use]
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (UnitKind, u32)>,
    {
        Self {
            counts: counts.into_iter().collect(),
            levels: BTreeMap::new(),
        }
    }

    /// Remaining count for a kind.
    #[must_use]
    pub fn count(&self, kind: UnitKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Level for a kind.
    #[must_use]
    pub fn level(&self, kind: UnitKind) -> u8 {
        self.levels.get(&kind).copied().unwrap_or(1)
    }

    /// Take one troop of `kind`. Returns false if none are left.
    pub fn take(&mut self, kind: UnitKind) -> bool {
        match self.counts.get_mut(&kind) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Troops left across all kinds.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

/// The opponent snapshot embedded in a replay log.
///
/// Carries everything a fresh simulator needs besides the deploy events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    /// Defender base.
    pub layout: BaseLayout,
    /// Attacker army at battle start.
    pub army: Roster,
}

impl BattleSnapshot {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_take_stops_at_zero() {
        let mut roster = Roster::from_counts([(UnitKind::Archer, 2)]);
        assert!(roster.take(UnitKind::Archer));
        assert!(roster.take(UnitKind::Archer));
        assert!(!roster.take(UnitKind::Archer));
        assert!(!roster.take(UnitKind::Giant));
        assert_eq!(roster.total(), 0);
    }

    #[test]
    fn test_roster_default_level() {
        let mut roster = Roster::from_counts([(UnitKind::Giant, 1)]);
        assert_eq!(roster.level(UnitKind::Giant), 1);
        roster.levels.insert(UnitKind::Giant, 3);
        assert_eq!(roster.level(UnitKind::Giant), 3);
    }

    #[test]
    fn test_layout_ron_defaults() {
        let text = r#"(
            buildings: [
                (kind: TownHall, grid_x: 10, grid_y: 10, width: 4, height: 4),
                (kind: Cannon, level: 2, grid_x: 4, grid_y: 4, width: 3, height: 3, hitpoints: Some(10)),
            ],
        )"#;
        let layout: BaseLayout = ron::from_str(text).unwrap();
        assert_eq!(layout.buildings.len(), 2);
        assert_eq!(layout.buildings[0].level, 1);
        assert_eq!(layout.buildings[1].hitpoints, Some(10));
        assert_eq!(layout.loot, LootPool::default());
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let snapshot = BattleSnapshot {
            layout: BaseLayout {
                owner: "defender-7".into(),
                buildings: vec![LayoutRecord::new(BuildingKind::Wall, 1, 2, 1, 1)],
                loot: LootPool {
                    gold: 500,
                    elixir: 250,
                },
            },
            army: Roster::from_counts([(UnitKind::Barbarian, 10)]),
        };
        let json = snapshot.to_json().unwrap();
        assert_eq!(BattleSnapshot::from_json(&json).unwrap(), snapshot);
        assert!(BattleSnapshot::from_json("{not json").is_err());
    }
}
