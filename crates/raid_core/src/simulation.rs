//! Fixed-timestep combat simulator.
//!
//! The simulator owns every unit and building in a battle and advances
//! them in fixed steps of 1/60 s. Hosts feed it real elapsed time through
//! [`CombatSimulator::update`]; an accumulator converts that into whole
//! steps so the outcome depends only on the sequence of deploys, never on
//! frame pacing.
//!
//! # State machine
//!
//! ```text
//! LOADING --start--> READY --first deploy--> FIGHTING --end--> FINISHED
//!                      \------------- countdown expired ------/
//! ```
//!
//! # Step order
//!
//! Each fighting step runs, in order:
//! 1. **Draw order** - refresh painter's-order hints
//! 2. **Cleanup** - drop units that died last step
//! 3. **Movement** - advance units along their routes
//! 4. **Unit AI** - pick targets, attack, request routes
//! 5. **Defenses** - cool down, acquire, fire
//! 6. **Scoring** - destruction percent and stars
//! 7. **End conditions** - timeout, full destruction, wipe
//!
//! Notifications are pushed to an outbox and collected by the host with
//! [`CombatSimulator::drain_events`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arena::{Arena, Handle};
use crate::catalog::{BuildingCategory, BuildingKind, Catalog, TargetPreference, UnitKind, UnitStats};
use crate::config::{BattleConfig, STEPS_PER_SECOND};
use crate::deployment::{DeploymentValidator, Footprint};
use crate::error::{BattleError, Result};
use crate::grid::{footprint_cells, GridCell, GridSpace};
use crate::layout::{BaseLayout, LootPool, Roster};
use crate::math::{fixed_serde, millis_to_steps, Fixed, Vec2Fixed};
use crate::pathfinding::{first_blocked_cell, PathPlanner};

/// Handle to a building in the simulator's arena.
pub type BuildingHandle = Handle;

/// Waypoints closer than this to the unit are skipped when a route starts.
const WAYPOINT_SKIP_DISTANCE: i32 = 10;

/// Base value for painter's-order hints; lower on screen draws later.
const DRAW_ORDER_BASE: i32 = 10_000;

// ============================================================================
// Public types
// ============================================================================

/// Battle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleState {
    /// Buildings are being attached; not interactive.
    Loading,
    /// Waiting for the first deploy; the battle clock is stopped.
    Ready,
    /// Battle clock running.
    Fighting,
    /// Terminal.
    Finished,
}

/// Why a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleEndReason {
    /// Battle clock or preparation countdown ran out.
    Timeout,
    /// Every building was destroyed.
    AllDestroyed,
    /// Every deployed unit died and none are left to deploy.
    AllUnitsDead,
    /// The attacker gave up.
    Surrender,
    /// The network peer went away.
    Disconnected,
}

/// Identifier of a deployed unit, unique within a battle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UnitId(pub u32);

/// Final result of a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleOutcome {
    /// Stars earned (0-3).
    pub stars: u8,
    /// Destruction percent (0-100).
    pub destruction_percent: u8,
    /// Why the battle ended.
    pub reason: BattleEndReason,
    /// Resources taken from the defender.
    pub loot: LootPool,
    /// Fixed steps simulated.
    pub frames: u32,
    /// Whether the town hall fell.
    pub core_destroyed: bool,
    /// Troops never deployed, to be returned to the attacker.
    pub unused_army: Roster,
}

/// Notifications produced while stepping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// The first unit landed and the battle clock started (READY to FIGHTING).
    BattleStarted,
    /// A unit entered the field.
    UnitDeployed {
        /// New unit.
        id: UnitId,
        /// Troop type.
        kind: UnitKind,
        /// Spawn position.
        position: Vec2Fixed,
        /// Troops of this kind still in reserve.
        remaining: u32,
    },
    /// A unit died or detonated.
    UnitDied {
        /// Unit that died.
        id: UnitId,
        /// Troop type.
        kind: UnitKind,
    },
    /// A building reached zero hit points.
    BuildingDestroyed {
        /// Retired handle.
        handle: BuildingHandle,
        /// Building type.
        kind: BuildingKind,
    },
    /// The star count went up.
    StarsChanged {
        /// New total.
        stars: u8,
    },
    /// UI refresh. Consecutive ticks with nothing in between are merged
    /// into the latest one.
    Tick {
        /// Steps completed.
        frame: u32,
        /// Battle clock (or preparation countdown while READY) in frames.
        remaining_frames: u32,
        /// Stars so far.
        stars: u8,
        /// Destruction so far.
        destruction_percent: u8,
    },
    /// The battle ended. Emitted exactly once.
    BattleEnded(BattleOutcome),
}

/// Turret state of a defensive building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turret {
    /// Damage per shot.
    pub damage: u32,
    /// Frames between shots.
    pub cooldown_frames: u32,
    /// Range in pixels.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
    /// Frames until the next shot.
    pub cooldown: u32,
    /// Unit currently engaged.
    pub target: Option<UnitId>,
}

/// A defender building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    /// Building type.
    pub kind: BuildingKind,
    /// Upgrade level.
    pub level: u8,
    /// Top-left cell.
    pub origin: GridCell,
    /// Footprint width in cells.
    pub width: u32,
    /// Footprint height in cells.
    pub height: u32,
    /// Footprint centre in scene space; units aim here.
    pub position: Vec2Fixed,
    /// Full hit points.
    pub max_hp: u32,
    /// Current hit points.
    pub hp: u32,
    /// Flat damage reduction.
    pub armor: u32,
    /// Present on defenses.
    pub turret: Option<Turret>,
    /// Painter's-order hint.
    pub draw_order: i32,
}

impl Building {
    /// Zero hit points.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.hp == 0
    }

    /// Category of this building's kind.
    #[must_use]
    pub const fn category(&self) -> BuildingCategory {
        self.kind.category()
    }

    /// Whether `cell` lies inside this building's footprint.
    #[must_use]
    pub fn covers(&self, cell: GridCell) -> bool {
        let (w, h) = (self.width as i32, self.height as i32);
        (self.origin.x..self.origin.x + w).contains(&cell.x)
            && (self.origin.y..self.origin.y + h).contains(&cell.y)
    }

    /// Free cells on the ring just outside the footprint.
    fn approach_cells(&self, grid: &GridSpace) -> Vec<GridCell> {
        let corner = GridCell::new(self.origin.x - 1, self.origin.y - 1);
        let (w, h) = (self.width + 2, self.height + 2);
        let (far_x, far_y) = (corner.x + w as i32 - 1, corner.y + h as i32 - 1);
        footprint_cells(corner, w, h)
            .filter(|c| c.x == corner.x || c.y == corner.y || c.x == far_x || c.y == far_y)
            .filter(|c| !grid.is_blocked(c.x, c.y))
            .collect()
    }

    fn footprint(&self) -> Footprint {
        Footprint {
            origin: self.origin,
            width: self.width,
            height: self.height,
        }
    }
}

/// A deployed attacker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Battle-unique id.
    pub id: UnitId,
    /// Troop type.
    pub kind: UnitKind,
    /// Scene position.
    pub position: Vec2Fixed,
    /// Current hit points.
    pub hp: u32,
    /// Resolved stats.
    pub stats: UnitStats,
    /// Target selection rule.
    pub preference: TargetPreference,
    /// Walks through buildings.
    pub ignores_obstacles: bool,
    /// Dies on its first attack.
    pub detonates: bool,
    /// Building being attacked or approached.
    pub target: Option<BuildingHandle>,
    /// Remaining route.
    pub path: Vec<Vec2Fixed>,
    /// Next waypoint index in `path`.
    pub path_index: usize,
    /// Frames until the next attack.
    pub cooldown: u32,
    /// Painter's-order hint.
    pub draw_order: i32,
}

impl Unit {
    /// Still on the field.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Following a route.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.path_index < self.path.len()
    }

    fn stop(&mut self) {
        self.path.clear();
        self.path_index = 0;
    }
}

/// Damage after flat armor, never below one.
#[must_use]
pub fn mitigated_damage(damage: u32, armor: u32) -> u32 {
    damage.saturating_sub(armor).max(1)
}

fn draw_order_for(position: Vec2Fixed) -> i32 {
    DRAW_ORDER_BASE.saturating_sub(position.y.to_num::<i32>())
}

// ============================================================================
// Simulator
// ============================================================================

/// The battle state machine and everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatSimulator {
    config: BattleConfig,
    catalog: Catalog,
    grid: GridSpace,
    validator: DeploymentValidator,
    #[serde(skip)]
    planner: PathPlanner,
    buildings: Arena<Building>,
    units: Vec<Unit>,
    next_unit_id: u32,
    roster: Roster,
    loot_pool: LootPool,
    state: BattleState,
    /// Fixed steps completed since READY.
    frame: u32,
    battle_frames_left: u32,
    preparation_frames_left: u32,
    #[serde(with = "fixed_serde")]
    accumulator: Fixed,
    total_hp: u64,
    stars: u8,
    destruction_percent: u8,
    core_destroyed: bool,
    has_deployed: bool,
    outcome: Option<BattleOutcome>,
    #[serde(skip)]
    events: Vec<SimEvent>,
}

impl CombatSimulator {
    /// Create an empty simulator in LOADING.
    #[must_use]
    pub fn new(config: BattleConfig, catalog: Catalog) -> Self {
        let grid = GridSpace::from_config(&config);
        let validator = DeploymentValidator::new(&grid);
        Self {
            battle_frames_left: config.battle_frames(),
            preparation_frames_left: config.preparation_frames(),
            config,
            catalog,
            grid,
            validator,
            planner: PathPlanner::new(),
            buildings: Arena::new(),
            units: Vec::new(),
            next_unit_id: 0,
            roster: Roster::default(),
            loot_pool: LootPool::default(),
            state: BattleState::Loading,
            frame: 0,
            accumulator: Fixed::ZERO,
            total_hp: 0,
            stars: 0,
            destruction_percent: 0,
            core_destroyed: false,
            has_deployed: false,
            outcome: None,
            events: Vec::new(),
        }
    }

    /// Build, load and start a battle in one go.
    ///
    /// The config is validated first; a bad one is an
    /// [`InvalidConfig`](BattleError::InvalidConfig) error.
    pub fn with_battle(
        config: BattleConfig,
        catalog: Catalog,
        layout: &BaseLayout,
        army: Roster,
    ) -> Result<Self> {
        config.validate()?;
        let mut sim = Self::new(config, catalog);
        sim.load_layout(layout)?;
        sim.start(army);
        Ok(sim)
    }

    /// Attach the defender's buildings. Only valid while LOADING.
    pub fn load_layout(&mut self, layout: &BaseLayout) -> Result<()> {
        if self.state != BattleState::Loading {
            return Err(BattleError::InvalidConfig(
                "layout can only be loaded before the battle starts".into(),
            ));
        }

        for record in &layout.buildings {
            let profile = self
                .catalog
                .building(record.kind)
                .ok_or_else(|| BattleError::MissingCatalogEntry(format!("{:?}", record.kind)))?;

            let max_hp = record
                .hitpoints
                .unwrap_or_else(|| profile.hitpoints.at(record.level))
                .max(1);
            let turret = profile.defense.map(|d| Turret {
                damage: d.damage.at(record.level),
                cooldown_frames: millis_to_steps(d.attack_interval_ms, STEPS_PER_SECOND),
                range: Fixed::saturating_from_num(d.range),
                cooldown: 0,
                target: None,
            });
            let origin = record.origin();
            let position = self.grid.footprint_center(origin, record.width, record.height);

            self.grid.mark_area(origin, record.width, record.height, true);
            self.buildings.insert(Building {
                kind: record.kind,
                level: record.level,
                origin,
                width: record.width,
                height: record.height,
                position,
                max_hp,
                hp: max_hp,
                armor: profile.armor,
                turret,
                draw_order: draw_order_for(position),
            });
            self.total_hp += u64::from(max_hp);
        }

        self.loot_pool = layout.loot;
        self.rebuild_deploy_mask();
        info!(
            buildings = self.buildings.len(),
            total_hp = self.total_hp,
            "Layout loaded"
        );
        Ok(())
    }

    /// Hand over the attacker's army and enter READY.
    pub fn start(&mut self, army: Roster) {
        if self.state != BattleState::Loading {
            warn!(state = ?self.state, "start() ignored outside LOADING");
            return;
        }
        self.roster = army;
        self.state = BattleState::Ready;
        self.refresh_score();
        info!(troops = self.roster.total(), "Battle ready");
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BattleState {
        self.state
    }

    /// Fixed steps completed.
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// Stars earned so far.
    #[must_use]
    pub const fn stars(&self) -> u8 {
        self.stars
    }

    /// Destruction so far.
    #[must_use]
    pub const fn destruction_percent(&self) -> u8 {
        self.destruction_percent
    }

    /// Battle clock in frames.
    #[must_use]
    pub const fn remaining_frames(&self) -> u32 {
        self.battle_frames_left
    }

    /// Preparation countdown in frames.
    #[must_use]
    pub const fn preparation_frames_left(&self) -> u32 {
        self.preparation_frames_left
    }

    /// The battle config.
    #[must_use]
    pub const fn config(&self) -> &BattleConfig {
        &self.config
    }

    /// The grid.
    #[must_use]
    pub const fn grid(&self) -> &GridSpace {
        &self.grid
    }

    /// The deployment mask.
    #[must_use]
    pub const fn validator(&self) -> &DeploymentValidator {
        &self.validator
    }

    /// Units on the field (including ones that died this step).
    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Look up a unit by id.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.unit_index(id).map(|i| &self.units[i])
    }

    /// All buildings.
    #[must_use]
    pub const fn buildings(&self) -> &Arena<Building> {
        &self.buildings
    }

    /// Troops still in reserve.
    #[must_use]
    pub const fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Whether anything has been deployed yet.
    #[must_use]
    pub const fn has_deployed_any(&self) -> bool {
        self.has_deployed
    }

    /// Final outcome, once FINISHED.
    #[must_use]
    pub const fn outcome(&self) -> Option<&BattleOutcome> {
        self.outcome.as_ref()
    }

    /// Units still alive.
    #[must_use]
    pub fn alive_unit_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_alive()).count()
    }

    /// Arena indices of destroyed buildings, ascending.
    #[must_use]
    pub fn destroyed_buildings(&self) -> Vec<u32> {
        self.buildings
            .iter_all()
            .enumerate()
            .filter(|(_, b)| b.is_destroyed())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Whether a troop may be dropped at `pos` right now.
    #[must_use]
    pub fn can_deploy_at_position(&self, pos: Vec2Fixed) -> bool {
        self.validator.can_deploy_at_position(&self.grid, pos)
    }

    /// Take every event produced since the last drain.
    ///
    /// The outbox only grows until drained. Hosts should drain it every
    /// frame; runs of undrained ticks collapse into one, so a host that
    /// never drains holds at most one tick between other events.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    fn unit_index(&self, id: UnitId) -> Option<usize> {
        self.units.binary_search_by_key(&id, |u| u.id).ok()
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Deploy a troop from the roster.
    ///
    /// No-op (returns `None`) outside READY/FIGHTING, when none of that
    /// kind are left, or when `position` lies off the grid. The buffer
    /// rule around buildings is the caller's concern.
    pub fn deploy_unit(&mut self, kind: UnitKind, position: Vec2Fixed) -> Option<UnitId> {
        if !self.accepts_deploy_at(position) {
            return None;
        }
        if self.catalog.unit(kind).is_none() || !self.roster.take(kind) {
            return None;
        }
        self.spawn_unit(kind, position)
    }

    /// Deploy a troop announced by a remote attacker.
    ///
    /// The local roster is drawn down when it still holds the kind, but the
    /// deploy goes ahead either way: the attacker already validated it.
    pub fn deploy_remote(&mut self, kind: UnitKind, position: Vec2Fixed) -> Option<UnitId> {
        if !self.accepts_deploy_at(position) {
            return None;
        }
        self.roster.take(kind);
        self.spawn_unit(kind, position)
    }

    fn accepts_deploy_at(&self, position: Vec2Fixed) -> bool {
        if !matches!(self.state, BattleState::Ready | BattleState::Fighting) {
            return false;
        }
        if self.grid.cell_at(position).is_none() {
            warn!(x = %position.x, y = %position.y, "Deploy off the grid rejected");
            return false;
        }
        true
    }

    fn spawn_unit(&mut self, kind: UnitKind, position: Vec2Fixed) -> Option<UnitId> {
        let Some(profile) = self.catalog.unit(kind) else {
            warn!(?kind, "No catalog entry for unit");
            return None;
        };
        let stats = profile.stats_at(self.roster.level(kind));
        let id = UnitId(self.next_unit_id);
        self.next_unit_id += 1;

        self.units.push(Unit {
            id,
            kind,
            position,
            hp: stats.max_hp,
            stats,
            preference: profile.target,
            ignores_obstacles: profile.ignores_obstacles,
            detonates: profile.detonates,
            target: None,
            path: Vec::new(),
            path_index: 0,
            cooldown: 0,
            draw_order: draw_order_for(position),
        });
        self.has_deployed = true;

        if self.state == BattleState::Ready {
            self.state = BattleState::Fighting;
            self.events.push(SimEvent::BattleStarted);
            info!(frame = self.frame, "Battle started");
        }
        self.events.push(SimEvent::UnitDeployed {
            id,
            kind,
            position,
            remaining: self.roster.count(kind),
        });
        debug!(frame = self.frame, ?kind, id = id.0, "Unit deployed");
        Some(id)
    }

    /// Give up. Accepted in any state but FINISHED.
    pub fn surrender(&mut self) {
        self.end_battle(BattleEndReason::Surrender);
    }

    /// End the battle now with the given reason.
    pub fn end_battle(&mut self, reason: BattleEndReason) {
        if self.state == BattleState::Finished {
            return;
        }
        self.refresh_score();
        self.state = BattleState::Finished;
        self.accumulator = Fixed::ZERO;

        let rate = u64::from(self.config.loot_percent(self.stars).min(100));
        let destruction = u64::from(self.destruction_percent);
        let take = |available: u32| (u64::from(available) * destruction * rate / 10_000) as u32;
        let outcome = BattleOutcome {
            stars: self.stars,
            destruction_percent: self.destruction_percent,
            reason,
            loot: LootPool {
                gold: take(self.loot_pool.gold),
                elixir: take(self.loot_pool.elixir),
            },
            frames: self.frame,
            core_destroyed: self.core_destroyed,
            unused_army: self.roster.clone(),
        };

        info!(
            ?reason,
            stars = outcome.stars,
            destruction = outcome.destruction_percent,
            frame = self.frame,
            "Battle ended"
        );
        self.events.push(SimEvent::BattleEnded(outcome.clone()));
        self.outcome = Some(outcome);
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    /// Feed elapsed wall time and run as many fixed steps as it covers.
    pub fn update(&mut self, dt: Fixed) {
        self.advance(dt, |_| {});
    }

    /// Like [`update`](Self::update), calling `before_step` ahead of each step.
    ///
    /// Replay playback hooks in here so recorded deploys land on exactly
    /// the step they were issued before.
    pub fn advance<F>(&mut self, dt: Fixed, mut before_step: F)
    where
        F: FnMut(&mut Self),
    {
        if !matches!(self.state, BattleState::Ready | BattleState::Fighting) {
            return;
        }
        let step = BattleConfig::fixed_step();
        self.accumulator += dt;

        while self.accumulator >= step {
            before_step(self);
            if self.state == BattleState::Finished {
                break;
            }
            self.tick();
            self.accumulator -= step;
            if self.state == BattleState::Finished {
                break;
            }
        }
    }

    /// Run exactly one fixed step.
    pub fn tick(&mut self) {
        match self.state {
            BattleState::Ready => {
                self.frame += 1;
                self.preparation_frames_left = self.preparation_frames_left.saturating_sub(1);
                self.refresh_score();
                self.push_tick(self.preparation_frames_left);
                if self.preparation_frames_left == 0 {
                    info!("Preparation expired without a deploy");
                    self.end_battle(BattleEndReason::Timeout);
                }
            }
            BattleState::Fighting => {
                self.frame += 1;
                self.battle_frames_left = self.battle_frames_left.saturating_sub(1);

                self.update_draw_order();
                self.prune_units();
                self.move_units();
                self.run_unit_ai();
                self.run_defenses();
                self.refresh_score();
                self.push_tick(self.battle_frames_left);
                self.check_end_conditions();
            }
            BattleState::Loading | BattleState::Finished => return,
        }

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(frame = self.frame, state_hash = hash, "Simulation state hash");
        }
    }

    fn push_tick(&mut self, remaining_frames: u32) {
        let tick = SimEvent::Tick {
            frame: self.frame,
            remaining_frames,
            stars: self.stars,
            destruction_percent: self.destruction_percent,
        };
        if let Some(last) = self.events.last_mut() {
            if matches!(last, SimEvent::Tick { .. }) {
                *last = tick;
                return;
            }
        }
        self.events.push(tick);
    }

    fn update_draw_order(&mut self) {
        for unit in self.units.iter_mut().filter(|u| u.is_alive()) {
            unit.draw_order = draw_order_for(unit.position);
        }
    }

    fn prune_units(&mut self) {
        self.units.retain(Unit::is_alive);
    }

    fn move_units(&mut self) {
        for unit in self.units.iter_mut().filter(|u| u.is_alive()) {
            let Some(&waypoint) = unit.path.get(unit.path_index) else {
                continue;
            };
            let (position, arrived) = unit.position.move_towards(waypoint, unit.stats.step_distance);
            unit.position = position;
            if arrived {
                unit.path_index += 1;
                if unit.path_index >= unit.path.len() {
                    unit.stop();
                }
            }
        }
    }

    /// Nearest live building satisfying `preference`, falling back to any.
    fn select_target(
        &self,
        from: Vec2Fixed,
        preference: TargetPreference,
    ) -> Option<(BuildingHandle, Vec2Fixed)> {
        let nearest = |pref: TargetPreference| {
            let mut best: Option<(Fixed, BuildingHandle, Vec2Fixed)> = None;
            for (handle, building) in self.buildings.iter_live() {
                if !pref.matches(building.category()) {
                    continue;
                }
                let d = from.distance_squared(building.position);
                if best.map_or(true, |(bd, _, _)| d < bd) {
                    best = Some((d, handle, building.position));
                }
            }
            best.map(|(_, h, p)| (h, p))
        };

        nearest(preference).or_else(|| nearest(TargetPreference::Any))
    }

    fn run_unit_ai(&mut self) {
        for i in 0..self.units.len() {
            if !self.units[i].is_alive() {
                continue;
            }

            let current = self.units[i]
                .target
                .and_then(|h| self.buildings.get(h).map(|b| (h, b.position)));
            let (handle, target_pos) = match current {
                Some(found) => found,
                None => {
                    let (position, preference) = (self.units[i].position, self.units[i].preference);
                    let selected = self.select_target(position, preference);
                    let unit = &mut self.units[i];
                    unit.target = selected.map(|(h, _)| h);
                    unit.stop();
                    match selected {
                        Some(found) => found,
                        None => continue,
                    }
                }
            };

            let unit = &mut self.units[i];
            let range = unit.stats.range;
            let in_range = unit.position.distance_squared(target_pos) <= range.saturating_mul(range);

            if in_range {
                unit.stop();
                if unit.cooldown > 0 {
                    unit.cooldown -= 1;
                }
                if unit.cooldown > 0 {
                    continue;
                }

                let (id, kind) = (unit.id, unit.kind);
                let damage = if unit.detonates {
                    unit.hp = 0;
                    unit.stats.damage.saturating_mul(self.config.detonation_multiplier)
                } else {
                    unit.cooldown = unit.stats.cooldown_frames;
                    unit.stats.damage
                };
                if self.units[i].detonates {
                    debug!(frame = self.frame, id = id.0, "Unit detonated");
                    self.events.push(SimEvent::UnitDied { id, kind });
                }

                self.damage_building(handle, damage);
                if !self.buildings.is_live(handle) {
                    self.units[i].target = None;
                }
            } else if !unit.is_moving() {
                let (start, ignores) = (unit.position, unit.ignores_obstacles);
                let (handle, target_pos, raw) = if ignores {
                    let raw = self.planner.find_path(&self.grid, start, target_pos, true);
                    (handle, target_pos, raw)
                } else {
                    self.plan_approach(handle, target_pos, start)
                };
                let route = build_route(raw, start, target_pos);
                let unit = &mut self.units[i];
                unit.target = Some(handle);
                unit.path = route;
                unit.path_index = 0;
            }
        }
    }

    /// Route to a free cell beside the target's footprint.
    ///
    /// When no such cell can be reached, the unit goes for the first
    /// building standing on the straight line to its target (usually a
    /// wall) and the returned handle and position are that building's.
    /// An empty route means the unit walks straight at its target.
    fn plan_approach(
        &mut self,
        handle: BuildingHandle,
        target_pos: Vec2Fixed,
        start: Vec2Fixed,
    ) -> (BuildingHandle, Vec2Fixed, Vec<Vec2Fixed>) {
        let Some(target) = self.buildings.get(handle) else {
            return (handle, target_pos, Vec::new());
        };
        let ring = target.approach_cells(&self.grid);
        let route = self.planner.find_path_to_any(&self.grid, start, &ring);
        if !route.is_empty() {
            return (handle, target_pos, route);
        }

        let blocker = first_blocked_cell(&self.grid, start, target_pos)
            .and_then(|cell| self.building_at(cell))
            .filter(|&b| b != handle);
        let Some((blocker, building)) =
            blocker.and_then(|b| self.buildings.get(b).map(|building| (b, building)))
        else {
            return (handle, target_pos, Vec::new());
        };

        let ring = building.approach_cells(&self.grid);
        let position = building.position;
        debug!(
            frame = self.frame,
            target = handle.index,
            blocker = blocker.index,
            "Target walled in, attacking blocker"
        );
        let route = self.planner.find_path_to_any(&self.grid, start, &ring);
        (blocker, position, route)
    }

    /// Live building whose footprint covers `cell`.
    fn building_at(&self, cell: GridCell) -> Option<BuildingHandle> {
        self.buildings
            .iter_live()
            .find(|(_, b)| b.covers(cell))
            .map(|(h, _)| h)
    }

    fn damage_building(&mut self, handle: BuildingHandle, damage: u32) {
        let Some(building) = self.buildings.get_mut(handle) else {
            return;
        };
        building.hp = building
            .hp
            .saturating_sub(mitigated_damage(damage, building.armor));
        if building.hp > 0 {
            return;
        }

        let (kind, origin, width, height) =
            (building.kind, building.origin, building.width, building.height);
        self.buildings.retire(handle);
        self.grid.mark_area(origin, width, height, false);
        self.rebuild_deploy_mask();
        if kind.category() == BuildingCategory::Core {
            self.core_destroyed = true;
        }

        info!(frame = self.frame, ?kind, index = handle.index, "Building destroyed");
        self.events.push(SimEvent::BuildingDestroyed { handle, kind });
    }

    fn rebuild_deploy_mask(&mut self) {
        let footprints: Vec<Footprint> = self
            .buildings
            .iter_live()
            .map(|(_, b)| b.footprint())
            .collect();
        self.validator.set_buildings(footprints);
    }

    fn run_defenses(&mut self) {
        let handles: Vec<BuildingHandle> = self
            .buildings
            .iter_live()
            .filter(|(_, b)| b.turret.is_some())
            .map(|(h, _)| h)
            .collect();

        for handle in handles {
            let Some(building) = self.buildings.get(handle) else {
                continue;
            };
            let Some(turret) = building.turret.clone() else {
                continue;
            };
            let origin = building.position;
            let range_sq = turret.range.saturating_mul(turret.range);
            let mut turret = turret;

            if turret.cooldown > 0 {
                turret.cooldown -= 1;
            }

            // Drop a target that died or walked out of range.
            if let Some(id) = turret.target {
                let keep = self
                    .unit(id)
                    .is_some_and(|u| u.is_alive() && origin.distance_squared(u.position) <= range_sq);
                if !keep {
                    turret.target = None;
                }
            }

            if turret.target.is_none() {
                let mut best: Option<(Fixed, UnitId)> = None;
                for unit in self.units.iter().filter(|u| u.is_alive()) {
                    let d = origin.distance_squared(unit.position);
                    if d <= range_sq && best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, unit.id));
                    }
                }
                turret.target = best.map(|(_, id)| id);
            }

            if let (Some(id), 0) = (turret.target, turret.cooldown) {
                turret.cooldown = turret.cooldown_frames;
                if let Some(index) = self.unit_index(id) {
                    let unit = &mut self.units[index];
                    unit.hp = unit
                        .hp
                        .saturating_sub(mitigated_damage(turret.damage, unit.stats.armor));
                    if unit.hp == 0 {
                        let kind = unit.kind;
                        turret.target = None;
                        debug!(frame = self.frame, id = id.0, "Unit killed by defense");
                        self.events.push(SimEvent::UnitDied { id, kind });
                    }
                }
            }

            if let Some(building) = self.buildings.get_mut(handle) {
                building.turret = Some(turret);
            }
        }
    }

    /// Recompute destruction and stars. Stars only ever go up.
    fn refresh_score(&mut self) {
        let (destruction, earned) = if self.buildings.is_empty() {
            (100, 3)
        } else {
            let lost: u64 = self
                .buildings
                .iter_all()
                .map(|b| u64::from(b.max_hp - b.hp))
                .sum();
            let destruction = if self.total_hp == 0 {
                100
            } else {
                (lost * 100 / self.total_hp).min(100) as u8
            };
            let earned = u8::from(self.core_destroyed)
                + u8::from(destruction >= 50)
                + u8::from(destruction >= 100);
            (destruction, earned)
        };

        self.destruction_percent = destruction;
        if earned > self.stars {
            self.stars = earned;
            info!(stars = earned, destruction, "Stars gained");
            self.events.push(SimEvent::StarsChanged { stars: earned });
        }
    }

    fn check_end_conditions(&mut self) {
        if self.state != BattleState::Fighting {
            return;
        }
        if self.battle_frames_left == 0 {
            self.end_battle(BattleEndReason::Timeout);
        } else if self.destruction_percent >= 100 {
            self.end_battle(BattleEndReason::AllDestroyed);
        } else if self.has_deployed && self.alive_unit_count() == 0 && self.roster.total() == 0 {
            self.end_battle(BattleEndReason::AllUnitsDead);
        }
    }

    // ------------------------------------------------------------------------
    // Determinism support
    // ------------------------------------------------------------------------

    /// Hash of all simulation state, for desync and replay checks.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.frame.hash(&mut hasher);
        self.state.hash(&mut hasher);
        self.stars.hash(&mut hasher);
        self.destruction_percent.hash(&mut hasher);
        self.battle_frames_left.hash(&mut hasher);
        self.accumulator.to_bits().hash(&mut hasher);

        self.units.len().hash(&mut hasher);
        for unit in &self.units {
            unit.id.hash(&mut hasher);
            unit.kind.hash(&mut hasher);
            unit.position.hash(&mut hasher);
            unit.hp.hash(&mut hasher);
            unit.cooldown.hash(&mut hasher);
            unit.target.hash(&mut hasher);
            unit.path_index.hash(&mut hasher);
            unit.path.hash(&mut hasher);
        }

        for building in self.buildings.iter_all() {
            building.hp.hash(&mut hasher);
            if let Some(turret) = &building.turret {
                turret.cooldown.hash(&mut hasher);
                turret.target.hash(&mut hasher);
            }
        }

        for (kind, count) in &self.roster.counts {
            kind.hash(&mut hasher);
            count.hash(&mut hasher);
        }

        hasher.finish()
    }

    /// Encode the full simulator state.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BattleError::SnapshotCodec(e.to_string()))
    }

    /// Decode a simulator from [`snapshot`](Self::snapshot) bytes.
    pub fn restore(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| BattleError::SnapshotCodec(e.to_string()))
    }
}

/// Turn a planner result into a route the unit will follow.
///
/// The first waypoint is dropped when the unit is already on it, and the
/// route always finishes with a leg to the target itself.
fn build_route(mut raw: Vec<Vec2Fixed>, start: Vec2Fixed, target: Vec2Fixed) -> Vec<Vec2Fixed> {
    let skip = Fixed::from_num(WAYPOINT_SKIP_DISTANCE);
    if raw
        .first()
        .is_some_and(|p| p.distance_squared(start) < skip * skip)
    {
        raw.remove(0);
    }
    if raw.last() != Some(&target) {
        raw.push(target);
    }
    raw
}
