//! Grid pathfinding using the A* algorithm.
//!
//! Movement is 8-directional with integer octile costs (10 straight,
//! 14 diagonal). Diagonal steps may not cut a blocked corner. The raw cell
//! path is then smoothed by line of sight, traced cell by cell through the
//! grid, so units walk straight lines wherever the ground allows it.
//!
//! Pathfinding reads raw occupancy only. The deployment buffer around
//! buildings is a placement rule and never blocks movement.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::grid::{GridCell, GridSpace};
use crate::math::{Fixed, Vec2Fixed};

/// Cost of a straight step.
pub const STRAIGHT_COST: u32 = 10;

/// Cost of a diagonal step.
pub const DIAGONAL_COST: u32 = 14;

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    cell: GridCell,
    f_score: u32,
    h_score: u32,
    /// Tie-breaker for determinism: lower coordinates first.
    tie_breaker: u64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so every comparison is reversed.
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.h_score.cmp(&self.h_score))
            .then_with(|| other.tie_breaker.cmp(&self.tie_breaker))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 8-directional movement, straight moves first.
const DIRECTIONS: [(i32, i32); 8] = [
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 0),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Octile distance heuristic with the same 10/14 costs as the moves.
#[inline]
fn octile_heuristic(a: GridCell, b: GridCell) -> u32 {
    let dx = a.x.abs_diff(b.x);
    let dy = a.y.abs_diff(b.y);
    STRAIGHT_COST * dx.max(dy) + (DIAGONAL_COST - STRAIGHT_COST) * dx.min(dy)
}

/// Distance to the closest of several goals; admissible for a multi-goal search.
#[inline]
fn nearest_goal_heuristic(cell: GridCell, goals: &[GridCell]) -> u32 {
    goals
        .iter()
        .map(|&g| octile_heuristic(cell, g))
        .min()
        .unwrap_or(0)
}

#[inline]
fn coords_to_tie_breaker(cell: GridCell) -> u64 {
    ((cell.y as u32 as u64) << 32) | (cell.x as u32 as u64)
}

/// Check a diagonal move does not squeeze between two blocked corners.
#[inline]
fn is_diagonal_valid(grid: &GridSpace, from: GridCell, dx: i32, dy: i32) -> bool {
    if dx != 0 && dy != 0 {
        !grid.is_blocked(from.x + dx, from.y) && !grid.is_blocked(from.x, from.y + dy)
    } else {
        true
    }
}

/// A* planner with reusable scratch buffers.
///
/// One planner is owned per battle; buffers are resized to the grid on
/// demand so repeated searches do not allocate.
#[derive(Debug, Clone, Default)]
pub struct PathPlanner {
    g_score: Vec<u32>,
    came_from: Vec<u32>,
    closed: Vec<bool>,
}

impl PathPlanner {
    /// Create a planner with empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a smoothed route from `start` to `goal` in scene space.
    ///
    /// The returned waypoints begin with `start` itself. An empty vector
    /// means no route exists and the caller should move directly.
    ///
    /// A blocked destination is replaced by its nearest free neighbour.
    /// With `ignore_obstacles`, every in-bounds cell is walkable and every
    /// pair of points has line of sight.
    pub fn find_path(
        &mut self,
        grid: &GridSpace,
        start: Vec2Fixed,
        goal: Vec2Fixed,
        ignore_obstacles: bool,
    ) -> Vec<Vec2Fixed> {
        let start_cell = grid.position_to_grid(start);
        let mut goal_cell = grid.position_to_grid(goal);

        if !ignore_obstacles && grid.is_blocked(goal_cell.x, goal_cell.y) {
            match nearest_free_neighbour(grid, goal_cell, start_cell) {
                Some(cell) => goal_cell = cell,
                None => return Vec::new(),
            }
        }

        let Some(cells) = self.search(grid, start_cell, &[goal_cell], ignore_obstacles) else {
            return Vec::new();
        };
        smoothed_route(grid, start, &cells, ignore_obstacles)
    }

    /// Find a smoothed route from `start` to whichever of `goals` is cheapest
    /// to reach, respecting obstacles.
    ///
    /// Blocked and out-of-bounds goals are skipped. An empty vector means
    /// none of them can be reached.
    pub fn find_path_to_any(
        &mut self,
        grid: &GridSpace,
        start: Vec2Fixed,
        goals: &[GridCell],
    ) -> Vec<Vec2Fixed> {
        let free: Vec<GridCell> = goals
            .iter()
            .copied()
            .filter(|c| !grid.is_blocked(c.x, c.y))
            .collect();
        if free.is_empty() {
            return Vec::new();
        }

        let start_cell = grid.position_to_grid(start);
        let Some(cells) = self.search(grid, start_cell, &free, false) else {
            return Vec::new();
        };
        smoothed_route(grid, start, &cells, false)
    }

    /// Raw A* over cells towards the nearest of `goals`. Returns the cell
    /// sequence including both ends.
    fn search(
        &mut self,
        grid: &GridSpace,
        start: GridCell,
        goals: &[GridCell],
        ignore_obstacles: bool,
    ) -> Option<Vec<GridCell>> {
        let width = grid.width() as usize;
        let cell_count = width * grid.height() as usize;
        self.g_score.clear();
        self.g_score.resize(cell_count, u32::MAX);
        self.came_from.clear();
        self.came_from.resize(cell_count, u32::MAX);
        self.closed.clear();
        self.closed.resize(cell_count, false);

        let index = |c: GridCell| (c.y as usize) * width + (c.x as usize);
        let walkable = |x: i32, y: i32| {
            if ignore_obstacles {
                grid.in_bounds(x, y)
            } else {
                !grid.is_blocked(x, y)
            }
        };

        let mut open_set = BinaryHeap::new();
        let start_h = nearest_goal_heuristic(start, goals);
        self.g_score[index(start)] = 0;
        open_set.push(AStarNode {
            cell: start,
            f_score: start_h,
            h_score: start_h,
            tie_breaker: coords_to_tie_breaker(start),
        });

        while let Some(current) = open_set.pop() {
            let current_index = index(current.cell);
            if self.closed[current_index] {
                continue;
            }
            self.closed[current_index] = true;

            if goals.contains(&current.cell) {
                return Some(self.reconstruct(grid, current.cell));
            }

            let current_g = self.g_score[current_index];

            for &(dx, dy) in &DIRECTIONS {
                let next = GridCell::new(current.cell.x + dx, current.cell.y + dy);
                if !walkable(next.x, next.y) {
                    continue;
                }
                if !ignore_obstacles && !is_diagonal_valid(grid, current.cell, dx, dy) {
                    continue;
                }

                let next_index = index(next);
                if self.closed[next_index] {
                    continue;
                }

                let step = if dx != 0 && dy != 0 {
                    DIAGONAL_COST
                } else {
                    STRAIGHT_COST
                };
                let tentative_g = current_g + step;

                if tentative_g < self.g_score[next_index] {
                    self.g_score[next_index] = tentative_g;
                    self.came_from[next_index] = current_index as u32;

                    let h = nearest_goal_heuristic(next, goals);
                    open_set.push(AStarNode {
                        cell: next,
                        f_score: tentative_g + h,
                        h_score: h,
                        tie_breaker: coords_to_tie_breaker(next),
                    });
                }
            }
        }

        None
    }

    fn reconstruct(&self, grid: &GridSpace, goal: GridCell) -> Vec<GridCell> {
        let width = grid.width() as usize;
        let mut path = vec![goal];
        let mut current = (goal.y as usize) * width + (goal.x as usize);

        while self.came_from[current] != u32::MAX {
            current = self.came_from[current] as usize;
            path.push(GridCell::new((current % width) as i32, (current / width) as i32));
        }

        path.reverse();
        path
    }
}

/// Prefix the raw cell path with the exact start point and smooth it.
fn smoothed_route(
    grid: &GridSpace,
    start: Vec2Fixed,
    cells: &[GridCell],
    ignore_obstacles: bool,
) -> Vec<Vec2Fixed> {
    let mut full = Vec::with_capacity(cells.len() + 1);
    full.push(start);
    full.extend(cells.iter().map(|c| grid.grid_to_position(c.x, c.y)));
    smooth_path(grid, &full, ignore_obstacles)
}

/// Pick the free neighbour of a blocked goal closest to it, preferring
/// straight neighbours, then the one nearer the start.
fn nearest_free_neighbour(grid: &GridSpace, goal: GridCell, start: GridCell) -> Option<GridCell> {
    DIRECTIONS
        .iter()
        .map(|&(dx, dy)| {
            let cost = if dx != 0 && dy != 0 {
                DIAGONAL_COST
            } else {
                STRAIGHT_COST
            };
            (cost, GridCell::new(goal.x + dx, goal.y + dy))
        })
        .filter(|(_, c)| !grid.is_blocked(c.x, c.y))
        .min_by_key(|&(cost, c)| (cost, octile_heuristic(c, start)))
        .map(|(_, c)| c)
}

/// Drop waypoints that can be skipped in a straight line.
///
/// From each kept waypoint, the furthest later waypoint with line of sight
/// becomes the next one.
#[must_use]
pub fn smooth_path(grid: &GridSpace, path: &[Vec2Fixed], ignore_obstacles: bool) -> Vec<Vec2Fixed> {
    if path.len() <= 2 {
        return path.to_vec();
    }

    let mut smoothed = Vec::with_capacity(path.len());
    smoothed.push(path[0]);

    let mut current_idx = 0;
    while current_idx < path.len() - 1 {
        let furthest = ((current_idx + 2)..path.len())
            .rev()
            .find(|&i| has_line_of_sight(grid, path[current_idx], path[i], ignore_obstacles))
            .unwrap_or(current_idx + 1);

        smoothed.push(path[furthest]);
        current_idx = furthest;
    }

    smoothed
}

/// Straight-line visibility between two scene points.
///
/// With `ignore_obstacles` every pair of points is visible; otherwise the
/// segment must not touch a blocked cell (see [`first_blocked_cell`]).
#[must_use]
pub fn has_line_of_sight(
    grid: &GridSpace,
    start: Vec2Fixed,
    end: Vec2Fixed,
    ignore_obstacles: bool,
) -> bool {
    ignore_obstacles || first_blocked_cell(grid, start, end).is_none()
}

/// First blocked cell on the segment from `start` to `end`.
///
/// Walks every cell the segment passes through, in grid space. The cell
/// holding `start` is not checked. A segment that crosses exactly through
/// a cell corner must have both side cells free, matching the corner rule
/// for diagonal moves. An endpoint off the grid is reported as blocked.
#[must_use]
pub fn first_blocked_cell(
    grid: &GridSpace,
    start: Vec2Fixed,
    end: Vec2Fixed,
) -> Option<GridCell> {
    let half = Fixed::from_num(0.5);
    let (ax, ay) = grid.unproject(start);
    let (bx, by) = grid.unproject(end);
    let (ax, ay) = (ax.saturating_add(half), ay.saturating_add(half));
    let (bx, by) = (bx.saturating_add(half), by.saturating_add(half));

    let mut cell = GridCell::new(floor_cell(ax), floor_cell(ay));
    let last = GridCell::new(floor_cell(bx), floor_cell(by));
    if !grid.in_bounds(cell.x, cell.y) {
        return Some(cell);
    }
    if !grid.in_bounds(last.x, last.y) {
        return Some(last);
    }

    let mut x_axis = Traversal::new(ax, bx, cell.x);
    let mut y_axis = Traversal::new(ay, by, cell.y);

    while cell != last {
        // An axis that has reached its last column or row never steps again.
        let next = match (cell.x != last.x, cell.y != last.y) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x_axis.t_max.cmp(&y_axis.t_max),
        };

        match next {
            Ordering::Less => cell.x += x_axis.advance(),
            Ordering::Greater => cell.y += y_axis.advance(),
            Ordering::Equal => {
                let side_x = GridCell::new(cell.x + x_axis.step, cell.y);
                let side_y = GridCell::new(cell.x, cell.y + y_axis.step);
                for side in [side_x, side_y] {
                    if grid.is_blocked(side.x, side.y) {
                        return Some(side);
                    }
                }
                cell.x += x_axis.advance();
                cell.y += y_axis.advance();
            }
        }

        if grid.is_blocked(cell.x, cell.y) {
            return Some(cell);
        }
    }

    None
}

#[inline]
fn floor_cell(v: Fixed) -> i32 {
    v.floor().to_num::<i32>()
}

/// Per-axis state of a grid traversal: the segment parameter at which the
/// next cell boundary is crossed, and the parameter span of one cell.
#[derive(Debug, Clone, Copy)]
struct Traversal {
    step: i32,
    t_max: Fixed,
    t_delta: Fixed,
}

impl Traversal {
    fn new(from: Fixed, to: Fixed, cell: i32) -> Self {
        let span = to.saturating_sub(from);
        if span > Fixed::ZERO {
            let boundary = Fixed::from_num(cell) + Fixed::ONE;
            Self {
                step: 1,
                t_max: boundary.saturating_sub(from).saturating_div(span),
                t_delta: Fixed::ONE.saturating_div(span),
            }
        } else if span < Fixed::ZERO {
            let span = span.saturating_neg();
            Self {
                step: -1,
                t_max: from.saturating_sub(Fixed::from_num(cell)).saturating_div(span),
                t_delta: Fixed::ONE.saturating_div(span),
            }
        } else {
            Self {
                step: 0,
                t_max: Fixed::MAX,
                t_delta: Fixed::MAX,
            }
        }
    }

    /// Cross one boundary, returning the cell offset taken.
    fn advance(&mut self) -> i32 {
        self.t_max = self.t_max.saturating_add(self.t_delta);
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSpace {
        GridSpace::new(20, 20, Fixed::from_num(56))
    }

    fn cell_pos(g: &GridSpace, x: i32, y: i32) -> Vec2Fixed {
        g.grid_to_position(x, y)
    }

    #[test]
    fn test_heuristic_matches_costs() {
        assert_eq!(octile_heuristic(GridCell::new(0, 0), GridCell::new(3, 0)), 30);
        assert_eq!(octile_heuristic(GridCell::new(0, 0), GridCell::new(3, 3)), 42);
        assert_eq!(octile_heuristic(GridCell::new(0, 0), GridCell::new(4, 1)), 44);
    }

    #[test]
    fn test_open_field_is_straight_line() {
        let g = grid();
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 1, 1);
        let goal = cell_pos(&g, 10, 1);
        let path = planner.find_path(&g, start, goal, false);

        assert_eq!(path.first(), Some(&start));
        assert_eq!(path.last(), Some(&goal));
        assert_eq!(path.len(), 2, "open ground should smooth to one segment");
    }

    #[test]
    fn test_routes_around_wall() {
        let mut g = grid();
        // Vertical wall at x = 5 from y = 0..=8
        g.mark_area(GridCell::new(5, 0), 1, 9, true);
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 2, 2);
        let goal = cell_pos(&g, 8, 2);

        let path = planner.find_path(&g, start, goal, false);
        assert!(path.len() > 2, "wall must force a detour: {path:?}");
        for pair in path.windows(2) {
            assert!(has_line_of_sight(&g, pair[0], pair[1], false));
        }
        for p in &path[1..] {
            let c = g.position_to_grid(*p);
            assert!(!g.is_blocked(c.x, c.y));
        }
    }

    #[test]
    fn test_no_corner_cutting() {
        let mut g = GridSpace::new(3, 3, Fixed::from_num(56));
        g.mark_area(GridCell::new(1, 0), 1, 1, true);
        g.mark_area(GridCell::new(0, 1), 1, 1, true);
        let mut planner = PathPlanner::new();

        let cells = planner.search(&g, GridCell::new(0, 0), &[GridCell::new(1, 1)], false);
        assert!(cells.is_none(), "diagonal squeeze must be rejected");
    }

    #[test]
    fn test_blocked_goal_uses_free_neighbour() {
        let mut g = grid();
        g.mark_area(GridCell::new(10, 10), 1, 1, true);
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 10, 2);

        let path = planner.find_path(&g, start, cell_pos(&g, 10, 10), false);
        let end = g.position_to_grid(*path.last().unwrap());
        assert_eq!(end, GridCell::new(10, 9));
    }

    #[test]
    fn test_enclosed_goal_returns_empty() {
        let mut g = grid();
        g.mark_area(GridCell::new(9, 9), 3, 3, true);
        let mut planner = PathPlanner::new();
        let path = planner.find_path(&g, cell_pos(&g, 1, 1), cell_pos(&g, 10, 10), false);
        assert!(path.is_empty());
    }

    #[test]
    fn test_unreachable_goal_returns_empty() {
        let mut g = grid();
        // Box in the goal at (15, 15) with a ring of walls
        g.mark_area(GridCell::new(13, 13), 5, 1, true);
        g.mark_area(GridCell::new(13, 17), 5, 1, true);
        g.mark_area(GridCell::new(13, 13), 1, 5, true);
        g.mark_area(GridCell::new(17, 13), 1, 5, true);
        let mut planner = PathPlanner::new();
        let path = planner.find_path(&g, cell_pos(&g, 1, 1), cell_pos(&g, 15, 15), false);
        assert!(path.is_empty());
    }

    #[test]
    fn test_ignore_obstacles_goes_straight_through() {
        let mut g = grid();
        g.mark_area(GridCell::new(5, 0), 1, 20, true);
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 2, 2);
        let goal = cell_pos(&g, 8, 2);

        assert!(planner.find_path(&g, start, goal, false).is_empty());
        let path = planner.find_path(&g, start, goal, true);
        assert_eq!(path, vec![start, goal]);
    }

    #[test]
    fn test_line_of_sight_blocked_by_building() {
        let mut g = grid();
        g.mark_area(GridCell::new(5, 5), 2, 2, true);
        let a = cell_pos(&g, 2, 5);
        let b = cell_pos(&g, 9, 5);
        assert!(!has_line_of_sight(&g, a, b, false));
        assert!(has_line_of_sight(&g, a, b, true));
        assert!(has_line_of_sight(&g, a, cell_pos(&g, 3, 5), false));
    }

    #[test]
    fn test_line_of_sight_catches_grazed_cells() {
        let mut g = grid();
        // One blocked cell under a shallow diagonal
        g.mark_area(GridCell::new(6, 4), 1, 1, true);
        let a = cell_pos(&g, 2, 3);
        let b = cell_pos(&g, 12, 5);
        assert!(!has_line_of_sight(&g, a, b, false));
        assert!(has_line_of_sight(&g, a, cell_pos(&g, 12, 3), false));
    }

    #[test]
    fn test_line_of_sight_through_corner_needs_both_sides() {
        let mut g = grid();
        g.mark_area(GridCell::new(4, 3), 1, 1, true);
        let a = cell_pos(&g, 3, 3);
        let b = cell_pos(&g, 4, 4);
        assert!(!has_line_of_sight(&g, a, b, false));
        assert!(has_line_of_sight(&g, cell_pos(&g, 3, 5), cell_pos(&g, 4, 6), false));
    }

    #[test]
    fn test_first_blocked_cell_is_nearest_obstacle() {
        let mut g = grid();
        g.mark_area(GridCell::new(5, 4), 1, 3, true);
        g.mark_area(GridCell::new(9, 4), 1, 3, true);
        let a = cell_pos(&g, 2, 5);
        assert_eq!(
            first_blocked_cell(&g, a, cell_pos(&g, 12, 5)),
            Some(GridCell::new(5, 5))
        );
        assert_eq!(first_blocked_cell(&g, a, cell_pos(&g, 4, 5)), None);
    }

    #[test]
    fn test_path_to_any_reaches_nearest_open_goal() {
        let mut g = grid();
        g.mark_area(GridCell::new(8, 8), 3, 3, true);
        // Wall in front of the near side
        g.mark_area(GridCell::new(4, 7), 1, 5, true);
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 2, 9);
        let goals = [
            GridCell::new(7, 9),
            GridCell::new(11, 9),
            GridCell::new(9, 8),
        ];

        let path = planner.find_path_to_any(&g, start, &goals);
        assert_eq!(path.first(), Some(&start));
        let end = g.position_to_grid(*path.last().unwrap());
        assert_eq!(end, GridCell::new(7, 9));
        for pair in path.windows(2) {
            assert!(has_line_of_sight(&g, pair[0], pair[1], false));
        }
    }

    #[test]
    fn test_path_to_any_skips_blocked_goals() {
        let mut g = grid();
        g.mark_area(GridCell::new(8, 8), 3, 3, true);
        let mut planner = PathPlanner::new();
        let start = cell_pos(&g, 2, 2);

        assert!(planner
            .find_path_to_any(&g, start, &[GridCell::new(9, 9), GridCell::new(-1, 4)])
            .is_empty());
        let path = planner.find_path_to_any(&g, start, &[GridCell::new(9, 9), GridCell::new(7, 7)]);
        assert_eq!(g.position_to_grid(*path.last().unwrap()), GridCell::new(7, 7));
    }

    #[test]
    fn test_same_inputs_same_path() {
        let mut g = grid();
        g.mark_area(GridCell::new(4, 3), 2, 8, true);
        g.mark_area(GridCell::new(9, 0), 1, 12, true);
        let start = cell_pos(&g, 1, 6);
        let goal = cell_pos(&g, 15, 6);

        let a = PathPlanner::new().find_path(&g, start, goal, false);
        let b = PathPlanner::new().find_path(&g, start, goal, false);
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }
}
