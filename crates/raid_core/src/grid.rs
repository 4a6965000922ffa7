//! Isometric grid space and occupancy map.
//!
//! The battlefield is a diamond of square cells projected isometrically
//! into scene space. A cell `(gx, gy)` maps to
//!
//! ```text
//! px = (gx - gy) * half_w + origin.x
//! py = origin.y - (gx + gy) * half_h
//! ```
//!
//! with `half_h = half_w * 3/4`. Scene space is y-up, so cell `(0, 0)` is
//! the top vertex of the diamond.
//!
//! Alongside the transform sits a boolean occupancy map. Anything outside
//! the grid counts as blocked.

use serde::{Deserialize, Serialize};

use crate::config::BattleConfig;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Integer cell coordinates.
///
/// Signed so callers can describe footprints or buffers that hang off the
/// edge of the grid; bounds are checked at lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct GridCell {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl GridCell {
    /// Create a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Isometric transform plus occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpace {
    width: u32,
    height: u32,
    #[serde(with = "fixed_serde")]
    half_w: Fixed,
    #[serde(with = "fixed_serde")]
    half_h: Fixed,
    origin: Vec2Fixed,
    /// Row-major occupancy, `true` = blocked.
    occupied: Vec<bool>,
}

impl GridSpace {
    /// Create an empty grid whose whole diamond sits in positive scene space.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero, or if `tile_width` is not positive.
    #[must_use]
    pub fn new(width: u32, height: u32, tile_width: Fixed) -> Self {
        let half_w = tile_width / Fixed::from_num(2);
        let half_h = half_w * Fixed::from_num(3) / Fixed::from_num(4);
        let origin = Vec2Fixed::new(
            half_w * Fixed::from_num(height),
            half_h * Fixed::from_num(width + height),
        );
        Self::with_origin(width, height, tile_width, origin)
    }

    /// Create an empty grid with an explicit scene-space origin for cell `(0, 0)`.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero, or if `tile_width` is not positive.
    #[must_use]
    pub fn with_origin(width: u32, height: u32, tile_width: Fixed, origin: Vec2Fixed) -> Self {
        assert!(width > 0, "GridSpace width must be positive");
        assert!(height > 0, "GridSpace height must be positive");
        assert!(
            tile_width > Fixed::ZERO,
            "GridSpace tile_width must be positive"
        );

        let half_w = tile_width / Fixed::from_num(2);
        let half_h = half_w * Fixed::from_num(3) / Fixed::from_num(4);
        Self {
            width,
            height,
            half_w,
            half_h,
            origin,
            occupied: vec![false; (width as usize) * (height as usize)],
        }
    }

    /// Lay out a square grid over a background image of `map_width` x
    /// `map_height` pixels.
    ///
    /// The diamond's top vertex sits centred near the top edge of the map.
    #[must_use]
    pub fn from_map_size(map_width: u32, map_height: u32, tile_width: Fixed) -> Self {
        let cells = (Fixed::from_num(map_width) / tile_width)
            .round()
            .to_num::<i64>()
            - 1;
        let side = cells.max(1) as u32;
        let origin = Vec2Fixed::new(
            Fixed::from_num(map_width) / Fixed::from_num(2),
            Fixed::from_num(map_height) + Fixed::from_num(30) - tile_width / Fixed::from_num(2),
        );
        Self::with_origin(side, side, tile_width, origin)
    }

    /// Create the grid described by a battle config.
    #[must_use]
    pub fn from_config(config: &BattleConfig) -> Self {
        Self::new(
            config.grid_width,
            config.grid_height,
            Fixed::from_num(config.tile_width),
        )
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Half the tile width in pixels.
    #[must_use]
    pub const fn half_tile_width(&self) -> Fixed {
        self.half_w
    }

    /// Half the tile height in pixels.
    #[must_use]
    pub const fn half_tile_height(&self) -> Fixed {
        self.half_h
    }

    /// Full tile width in pixels.
    #[must_use]
    pub fn tile_width(&self) -> Fixed {
        self.half_w * Fixed::from_num(2)
    }

    /// Scene position of cell `(0, 0)`.
    #[must_use]
    pub const fn origin(&self) -> Vec2Fixed {
        self.origin
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Check if coordinates are within grid bounds.
    #[must_use]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Blocked if out of bounds or occupied.
    #[must_use]
    pub fn is_blocked(&self, x: i32, y: i32) -> bool {
        !self.in_bounds(x, y) || self.occupied[self.index(x, y)]
    }

    /// Scene position of a cell's centre.
    #[must_use]
    pub fn grid_to_position(&self, gx: i32, gy: i32) -> Vec2Fixed {
        self.project(Fixed::from_num(gx), Fixed::from_num(gy))
    }

    /// Project fractional grid coordinates into scene space.
    #[must_use]
    pub fn project(&self, gx: Fixed, gy: Fixed) -> Vec2Fixed {
        Vec2Fixed::new(
            (gx - gy) * self.half_w + self.origin.x,
            self.origin.y - (gx + gy) * self.half_h,
        )
    }

    /// Inverse projection into fractional grid coordinates.
    ///
    /// Saturates instead of overflowing, so any scene position is accepted.
    #[must_use]
    pub fn unproject(&self, pos: Vec2Fixed) -> (Fixed, Fixed) {
        let dx = pos.x.saturating_sub(self.origin.x);
        let dy = self.origin.y.saturating_sub(pos.y);

        let u = dy.saturating_div(self.half_h);
        let v = dx.saturating_div(self.half_w);
        let two = Fixed::from_num(2);
        (
            u.saturating_add(v).saturating_div(two),
            u.saturating_sub(v).saturating_div(two),
        )
    }

    /// Inverse projection, rounded to the nearest cell and clamped to the grid.
    #[must_use]
    pub fn position_to_grid(&self, pos: Vec2Fixed) -> GridCell {
        let (gx, gy) = self.unproject(pos);
        let gx = gx.saturating_round().to_num::<i64>();
        let gy = gy.saturating_round().to_num::<i64>();

        GridCell::new(
            gx.clamp(0, i64::from(self.width) - 1) as i32,
            gy.clamp(0, i64::from(self.height) - 1) as i32,
        )
    }

    /// The cell under a scene position, or `None` if it lies off the grid.
    #[must_use]
    pub fn cell_at(&self, pos: Vec2Fixed) -> Option<GridCell> {
        let (gx, gy) = self.unproject(pos);
        let cell = GridCell::new(
            gx.saturating_round().to_num::<i32>(),
            gy.saturating_round().to_num::<i32>(),
        );
        self.in_bounds(cell.x, cell.y).then_some(cell)
    }

    /// Scene position of the centre of a `w` x `h` footprint at `origin`.
    #[must_use]
    pub fn footprint_center(&self, origin: GridCell, w: u32, h: u32) -> Vec2Fixed {
        let two = Fixed::from_num(2);
        let cx = Fixed::from_num(origin.x) + Fixed::from_num(w.saturating_sub(1)) / two;
        let cy = Fixed::from_num(origin.y) + Fixed::from_num(h.saturating_sub(1)) / two;
        self.project(cx, cy)
    }

    /// True iff every cell of the footprint is in bounds and free.
    #[must_use]
    pub fn check_area(&self, origin: GridCell, w: u32, h: u32) -> bool {
        footprint_cells(origin, w, h).all(|c| !self.is_blocked(c.x, c.y))
    }

    /// Set every cell of the footprint; out-of-bounds cells are skipped.
    pub fn mark_area(&mut self, origin: GridCell, w: u32, h: u32, occupied: bool) {
        for cell in footprint_cells(origin, w, h) {
            if self.in_bounds(cell.x, cell.y) {
                let index = self.index(cell.x, cell.y);
                self.occupied[index] = occupied;
            }
        }
    }

    /// Free every cell.
    pub fn clear(&mut self) {
        self.occupied.fill(false);
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.occupied.iter().filter(|&&o| o).count()
    }
}

/// Iterate the cells of a `w` x `h` footprint, row by row.
pub fn footprint_cells(origin: GridCell, w: u32, h: u32) -> impl Iterator<Item = GridCell> {
    let (w, h) = (w as i32, h as i32);
    (0..h).flat_map(move |dy| (0..w).map(move |dx| GridCell::new(origin.x + dx, origin.y + dy)))
}
