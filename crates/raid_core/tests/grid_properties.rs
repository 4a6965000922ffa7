//! Property tests for the grid, planner and deployment mask.

use proptest::prelude::*;
use raid_core::deployment::{DeploymentValidator, Footprint};
use raid_core::grid::{GridCell, GridSpace};
use raid_core::math::Fixed;
use raid_core::pathfinding::{has_line_of_sight, PathPlanner};
use raid_test_utils::determinism::strategies::{arb_footprint_size, arb_grid_cell};

fn grid(side: u32) -> GridSpace {
    GridSpace::new(side, side, Fixed::from_num(56))
}

#[test]
fn coordinates_round_trip_for_every_cell() {
    for g in [grid(44), GridSpace::from_map_size(2464, 1848, Fixed::from_num(56))] {
        for y in 0..g.height() as i32 {
            for x in 0..g.width() as i32 {
                let pos = g.grid_to_position(x, y);
                assert_eq!(g.position_to_grid(pos), GridCell::new(x, y));
            }
        }
    }
}

proptest! {
    #[test]
    fn mark_then_unmark_restores_grid(
        origin in arb_grid_cell(40, 40),
        (w, h) in arb_footprint_size(),
    ) {
        let mut g = grid(44);
        prop_assert!(g.check_area(origin, w, h));

        g.mark_area(origin, w, h, true);
        prop_assert!(!g.check_area(origin, w, h));
        prop_assert_eq!(g.occupied_count(), (w * h) as usize);

        g.mark_area(origin, w, h, false);
        prop_assert!(g.check_area(origin, w, h));
        prop_assert_eq!(g.occupied_count(), 0);
    }

    #[test]
    fn paths_stay_on_free_cells_with_line_of_sight(
        obstacles in proptest::collection::vec((0i32..20, 0i32..20), 0..60),
        start in (0i32..20, 0i32..20),
        goal in (0i32..20, 0i32..20),
    ) {
        let mut g = grid(20);
        for &(x, y) in &obstacles {
            g.mark_area(GridCell::new(x, y), 1, 1, true);
        }
        prop_assume!(!g.is_blocked(start.0, start.1));

        let from = g.grid_to_position(start.0, start.1);
        let to = g.grid_to_position(goal.0, goal.1);
        let path = PathPlanner::new().find_path(&g, from, to, false);

        if let Some(first) = path.first() {
            prop_assert_eq!(*first, from);
        }
        let inner = path.len().saturating_sub(1);
        for waypoint in path.iter().skip(1).take(inner) {
            let cell = g.position_to_grid(*waypoint);
            prop_assert!(!g.is_blocked(cell.x, cell.y), "waypoint on blocked {:?}", cell);
        }
        for pair in path.windows(2) {
            prop_assert!(has_line_of_sight(&g, pair[0], pair[1], false));
            // Walking the segment never steps onto a blocked cell.
            for i in 1..16 {
                let t = Fixed::from_num(i) / Fixed::from_num(16);
                let cell = g.position_to_grid(pair[0].lerp(pair[1], t));
                prop_assert!(!g.is_blocked(cell.x, cell.y), "segment crosses {:?}", cell);
            }
        }
    }

    #[test]
    fn deploy_buffer_surrounds_footprint(
        x in 2i32..38,
        y in 2i32..38,
        (w, h) in arb_footprint_size(),
    ) {
        let g = grid(44);
        let mut validator = DeploymentValidator::new(&g);
        validator.set_buildings([Footprint { origin: GridCell::new(x, y), width: w, height: h }]);

        let (x_end, y_end) = (x + w as i32, y + h as i32);
        for cy in y - 1..=y_end {
            for cx in x - 1..=x_end {
                prop_assert!(!validator.can_deploy_at(cx, cy));
            }
        }
        for cx in x - 2..=x_end + 1 {
            prop_assert!(validator.can_deploy_at(cx, y - 2));
            prop_assert!(validator.can_deploy_at(cx, y_end + 1));
        }
        for cy in y - 2..=y_end + 1 {
            prop_assert!(validator.can_deploy_at(x - 2, cy));
            prop_assert!(validator.can_deploy_at(x_end + 1, cy));
        }
    }
}
