//! Attack plans.
//!
//! A plan is the attacker's half of a battle: the army brought along and
//! a frame-ordered list of deploys. Plans are loaded from RON files for
//! scripted runs or generated from a seed for autoplay.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use raid_core::catalog::UnitKind;
use raid_core::deployment::DeploymentValidator;
use raid_core::grid::GridCell;
use raid_core::layout::Roster;
use raid_core::rng::BattleRng;

use crate::error::{HeadlessError, Result};

/// A single planned deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDeploy {
    /// Frame to issue the deploy on.
    pub frame: u32,
    /// Troop type.
    pub unit: UnitKind,
    /// Target grid cell.
    pub cell: GridCell,
}

/// Army plus deploy schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPlan {
    /// Troops available to the attacker.
    pub army: Roster,
    /// Deploys to attempt, in any order.
    #[serde(default)]
    pub deploys: Vec<PlanDeploy>,
}

impl AttackPlan {
    /// Load a plan from a RON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HeadlessError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let plan: Self = ron::from_str(&content)?;
        debug!(path = %path.display(), deploys = plan.deploys.len(), "Loaded attack plan");
        Ok(plan)
    }

    /// Generate a plan that deploys the whole army on random legal cells.
    ///
    /// Deploys are spread over `[0, max_frame)` and sorted by frame. Kinds
    /// are drawn in catalog order so the same seed always gives the same
    /// plan. An empty deploy area yields a plan with no deploys.
    #[must_use]
    pub fn generate(
        rng: &mut BattleRng,
        validator: &DeploymentValidator,
        army: &Roster,
        max_frame: u32,
    ) -> Self {
        let cells = validator.deployable_cells();
        let mut deploys = Vec::with_capacity(army.total() as usize);

        for (&unit, &count) in &army.counts {
            for _ in 0..count {
                let Some(&cell) = rng.choose(&cells) else {
                    break;
                };
                let frame = rng.gen_range(0..max_frame.max(1));
                deploys.push(PlanDeploy { frame, unit, cell });
            }
        }
        deploys.sort_by_key(|d| d.frame);

        Self {
            army: army.clone(),
            deploys,
        }
    }

    /// Deploys sorted by frame; ties keep file order.
    #[must_use]
    pub fn schedule(&self) -> Vec<PlanDeploy> {
        let mut deploys = self.deploys.clone();
        deploys.sort_by_key(|d| d.frame);
        deploys
    }

    /// Write the plan as pretty RON.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(std::io::Error::other)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raid_core::grid::GridSpace;
    use raid_core::math::Fixed;

    fn open_field() -> DeploymentValidator {
        DeploymentValidator::new(&GridSpace::new(20, 20, Fixed::from_num(56)))
    }

    #[test]
    fn test_parse_plan() {
        let plan: AttackPlan = ron::from_str(
            "(army: (counts: {Giant: 2}), deploys: [(frame: 5, unit: Giant, cell: (x: 1, y: 2))])",
        )
        .unwrap();
        assert_eq!(plan.army.count(UnitKind::Giant), 2);
        assert_eq!(plan.deploys[0].cell, GridCell::new(1, 2));
    }

    #[test]
    fn test_schedule_is_stable() {
        let plan = AttackPlan {
            army: Roster::default(),
            deploys: vec![
                PlanDeploy { frame: 9, unit: UnitKind::Giant, cell: GridCell::new(0, 0) },
                PlanDeploy { frame: 1, unit: UnitKind::Archer, cell: GridCell::new(1, 0) },
                PlanDeploy { frame: 1, unit: UnitKind::Goblin, cell: GridCell::new(2, 0) },
            ],
        };
        let units: Vec<_> = plan.schedule().iter().map(|d| d.unit).collect();
        assert_eq!(units, vec![UnitKind::Archer, UnitKind::Goblin, UnitKind::Giant]);
    }

    #[test]
    fn test_generate_uses_whole_army() {
        let army = Roster::from_counts([(UnitKind::Barbarian, 3), (UnitKind::Archer, 2)]);
        let validator = open_field();
        let plan = AttackPlan::generate(&mut BattleRng::seed_from_u64(1), &validator, &army, 300);

        assert_eq!(plan.deploys.len(), 5);
        assert!(plan.deploys.windows(2).all(|w| w[0].frame <= w[1].frame));
        for deploy in &plan.deploys {
            assert!(deploy.frame < 300);
            assert!(validator.can_deploy_at(deploy.cell.x, deploy.cell.y));
        }
    }

    #[test]
    fn test_generate_is_seeded() {
        let army = Roster::from_counts([(UnitKind::Goblin, 6)]);
        let validator = open_field();
        let a = AttackPlan::generate(&mut BattleRng::seed_from_u64(42), &validator, &army, 600);
        let b = AttackPlan::generate(&mut BattleRng::seed_from_u64(42), &validator, &army, 600);
        let c = AttackPlan::generate(&mut BattleRng::seed_from_u64(43), &validator, &army, 600);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_missing_plan_file() {
        let err = AttackPlan::load("/definitely/not/here.ron").unwrap_err();
        assert!(matches!(err, HeadlessError::FileNotFound(_)));
    }
}
