//! Deploy-legality mask.
//!
//! Attackers may not drop troops on a building or right next to one. The
//! mask marks every footprint grown by [`BUFFER_CELLS`] on each side,
//! clamped to the grid. It is rebuilt at battle start and whenever a
//! building falls, so the forbidden zone shrinks as the base is razed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::{GridCell, GridSpace};
use crate::math::Vec2Fixed;

/// Width of the no-deploy ring around each footprint.
pub const BUFFER_CELLS: i32 = 1;

/// A building footprint as seen by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    /// Top-left cell.
    pub origin: GridCell,
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
}

/// Precomputed forbidden-to-deploy mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentValidator {
    width: u32,
    height: u32,
    forbidden: Vec<bool>,
}

impl DeploymentValidator {
    /// Create an all-deployable mask matching the grid's dimensions.
    #[must_use]
    pub fn new(grid: &GridSpace) -> Self {
        Self {
            width: grid.width(),
            height: grid.height(),
            forbidden: vec![false; (grid.width() as usize) * (grid.height() as usize)],
        }
    }

    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Rebuild the mask from the given footprints.
    pub fn set_buildings<I>(&mut self, footprints: I)
    where
        I: IntoIterator<Item = Footprint>,
    {
        self.forbidden.fill(false);
        let mut count = 0usize;

        for fp in footprints {
            count += 1;
            let x0 = (fp.origin.x - BUFFER_CELLS).max(0);
            let y0 = (fp.origin.y - BUFFER_CELLS).max(0);
            let x1 = (fp.origin.x + fp.width as i32 - 1 + BUFFER_CELLS).min(self.width as i32 - 1);
            let y1 = (fp.origin.y + fp.height as i32 - 1 + BUFFER_CELLS).min(self.height as i32 - 1);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let index = self.index(x, y);
                    self.forbidden[index] = true;
                }
            }
        }

        debug!(
            buildings = count,
            forbidden = self.forbidden_count(),
            "Deployment mask rebuilt"
        );
    }

    /// True if `(gx, gy)` is on the grid and outside every buffered footprint.
    #[must_use]
    pub fn can_deploy_at(&self, gx: i32, gy: i32) -> bool {
        self.in_bounds(gx, gy) && !self.forbidden[self.index(gx, gy)]
    }

    /// Convert a scene position through the grid, then check the mask.
    /// Positions off the grid are never deployable.
    #[must_use]
    pub fn can_deploy_at_position(&self, grid: &GridSpace, pos: Vec2Fixed) -> bool {
        grid.cell_at(pos).is_some_and(|cell| self.can_deploy_at(cell.x, cell.y))
    }

    /// Every cell a troop may be dropped on, row by row.
    #[must_use]
    pub fn deployable_cells(&self) -> Vec<GridCell> {
        self.cells_where(false)
    }

    /// Every cell inside a buffered footprint, row by row.
    #[must_use]
    pub fn forbidden_cells(&self) -> Vec<GridCell> {
        self.cells_where(true)
    }

    /// Number of forbidden cells.
    #[must_use]
    pub fn forbidden_count(&self) -> usize {
        self.forbidden.iter().filter(|&&f| f).count()
    }

    fn cells_where(&self, forbidden: bool) -> Vec<GridCell> {
        let width = self.width as usize;
        self.forbidden
            .iter()
            .enumerate()
            .filter(|(_, &f)| f == forbidden)
            .map(|(i, _)| GridCell::new((i % width) as i32, (i / width) as i32))
            .collect()
    }
}
