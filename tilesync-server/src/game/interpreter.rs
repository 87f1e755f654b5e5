//! Move-Route Interpreter
//!
//! A [`RouteRunner`] is the persisted continuation of a [`MoveRoute`]: which
//! directive is current and how far into it the entity got. The tick engine
//! calls [`RouteRunner::step`] once per tick for every entity with a route.
//!
//! ```text
//!   Idle ──start──▶ Running{index} ──Wait(n)──▶ Suspended{until_tick}
//!                     │    ▲                          │
//!                     │    └──────── tick ≥ until ────┘
//!                     ▼
//!                 Completed ──(end of tick)──▶ completion signal
//! ```
//!
//! Turning directives are instantaneous: the runner keeps going until a
//! directive consumes the tick, the route ends, or the per-tick instant
//! budget runs out. Any movement step that achieves no displacement ends
//! its directive.

use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::direction::Direction;
use crate::core::geometry::{BoundingBox, Position, WorldBounds};
use crate::core::rng::DeterministicRng;
use crate::game::entity::{Entity, EntityId};
use crate::game::route::{MoveDirective, MoveRoute, RepeatCount};

// =============================================================================
// COMPLETION SIGNAL
// =============================================================================

/// Sent to the route's waiter when the route runs to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteCompletion {
    /// Entity that ran the route
    pub entity: EntityId,
    /// Tick on which the route completed
    pub tick: u64,
}

/// The route was replaced, stopped, or its entity removed before it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("move route cancelled before completion")]
pub struct RouteCancelled;

/// Waiter side of a started route.
#[derive(Debug)]
pub struct RouteHandle {
    receiver: oneshot::Receiver<RouteCompletion>,
}

impl RouteHandle {
    /// Wait for the route to finish.
    pub async fn wait(self) -> Result<RouteCompletion, RouteCancelled> {
        self.receiver.await.map_err(|_| RouteCancelled)
    }

    /// Non-blocking check. `None` while the route is still running.
    pub fn try_result(&mut self) -> Option<Result<RouteCompletion, RouteCancelled>> {
        match self.receiver.try_recv() {
            Ok(completion) => Some(Ok(completion)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RouteCancelled)),
        }
    }
}

// =============================================================================
// RUNNER STATE
// =============================================================================

/// Observable interpreter state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    /// Nothing to run
    Idle,
    /// Executing the directive at `index`
    Running {
        /// Current directive
        index: usize,
    },
    /// Waiting until `until_tick`
    Suspended {
        /// First tick the runner resumes on
        until_tick: u64,
    },
    /// Route finished
    Completed,
}

/// Sub-state of the current directive.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Progress {
    Fresh,
    Moving { remaining: u32 },
    Waiting { until_tick: u64 },
    Repeating { done: u32, inner: Box<Progress> },
}

/// What happened to the current directive during one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Advance {
    /// Finished without consuming the tick
    Instant,
    /// Consumed the tick, not finished
    Hold,
    /// Consumed the tick and finished
    Finished,
}

/// Result of [`RouteRunner::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Route still active
    Continue,
    /// Route finished this tick; the caller posts the completion signal
    Completed,
}

/// World view handed to a runner for one step.
///
/// The stepping entity is not in `entities`; it is owned by the caller for
/// the duration of the step.
pub struct StepContext<'a> {
    /// Current tick
    pub tick: u64,
    /// World rectangle
    pub world: WorldBounds,
    /// Collision shapes, snapshot taken at motion start
    pub obstacles: &'a [BoundingBox],
    /// Tile width for `TileMoveBy`
    pub tile_width: i32,
    /// Tile height for `TileMoveBy`
    pub tile_height: i32,
    /// Every other entity
    pub entities: &'a BTreeMap<EntityId, Entity>,
    /// Map RNG
    pub rng: &'a mut DeterministicRng,
    /// Instant steps left this tick
    pub budget: u32,
}

impl StepContext<'_> {
    fn target_center(&self, target: &EntityId) -> Option<(i32, i32)> {
        self.entities.get(target).map(Entity::center)
    }

    /// Spend one instant step. False when the budget is exhausted.
    fn spend(&mut self) -> bool {
        if self.budget == 0 {
            return false;
        }
        self.budget -= 1;
        true
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// Continuation state of a move route.
#[derive(Debug)]
pub struct RouteRunner {
    route: MoveRoute,
    index: usize,
    cycles: u32,
    progress: Progress,
    cooldown: u32,
    completed: bool,
    sender: Option<oneshot::Sender<RouteCompletion>>,
}

impl RouteRunner {
    /// Build a runner and its waiter handle.
    pub fn new(route: MoveRoute) -> (Self, RouteHandle) {
        let (sender, receiver) = oneshot::channel();
        let runner = Self {
            route,
            index: 0,
            cycles: 0,
            progress: Progress::Fresh,
            cooldown: 0,
            completed: false,
            sender: Some(sender),
        };
        (runner, RouteHandle { receiver })
    }

    /// Interpreter state as of `tick`.
    pub fn state(&self, tick: u64) -> RunnerState {
        if self.completed {
            return RunnerState::Completed;
        }
        if self.route.directives.is_empty() {
            return RunnerState::Idle;
        }
        match innermost(&self.progress) {
            Progress::Waiting { until_tick } if *until_tick > tick => {
                RunnerState::Suspended { until_tick: *until_tick }
            }
            _ => RunnerState::Running { index: self.index },
        }
    }

    /// Post the completion signal. Consumes the runner.
    pub fn finish(mut self, completion: RouteCompletion) {
        if let Some(sender) = self.sender.take() {
            // Receiver may have been dropped; nobody is waiting then.
            let _ = sender.send(completion);
        }
    }

    /// Advance the route by one tick.
    pub fn step(&mut self, entity: &mut Entity, ctx: &mut StepContext<'_>) -> StepOutcome {
        if self.completed {
            return StepOutcome::Completed;
        }
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return StepOutcome::Continue;
        }

        let start = entity.position;
        loop {
            if self.index >= self.route.directives.len() {
                self.cycles = self.cycles.saturating_add(1);
                if self.route.directives.is_empty() || self.route.repeat.is_satisfied(self.cycles) {
                    self.completed = true;
                    return StepOutcome::Completed;
                }
                self.index = 0;
                if !ctx.spend() {
                    return StepOutcome::Continue;
                }
            }
            if self.cycles == 0 && self.index == 0 && self.route.repeat.is_satisfied(0) {
                self.completed = true;
                return StepOutcome::Completed;
            }

            let directive = &self.route.directives[self.index];
            match run_directive(directive, &mut self.progress, entity, ctx) {
                Advance::Instant => {
                    self.index += 1;
                    self.progress = Progress::Fresh;
                }
                Advance::Hold => {
                    self.pace(entity, start);
                    return StepOutcome::Continue;
                }
                Advance::Finished => {
                    self.index += 1;
                    self.progress = Progress::Fresh;
                    self.pace(entity, start);
                    if self.index >= self.route.directives.len()
                        && self.route.repeat.is_satisfied(self.cycles.saturating_add(1))
                    {
                        self.cycles += 1;
                        self.completed = true;
                        return StepOutcome::Completed;
                    }
                    return StepOutcome::Continue;
                }
            }
        }
    }

    /// Idle for `frequency` ticks, but only after a step that displaced the entity.
    fn pace(&mut self, entity: &Entity, start: Position) {
        if entity.position != start {
            self.cooldown = entity.frequency;
        }
    }
}

fn innermost(progress: &Progress) -> &Progress {
    match progress {
        Progress::Repeating { inner, .. } => innermost(inner),
        other => other,
    }
}

// =============================================================================
// DIRECTIVES
// =============================================================================

fn run_directive(
    directive: &MoveDirective,
    progress: &mut Progress,
    entity: &mut Entity,
    ctx: &mut StepContext<'_>,
) -> Advance {
    match directive {
        MoveDirective::TurnTo(direction) => turn(entity, ctx, |_, _| Some(*direction)),
        MoveDirective::TurnRight => turn(entity, ctx, |_, _| Some(Direction::Right)),
        MoveDirective::TurnLeft => turn(entity, ctx, |_, _| Some(Direction::Left)),
        MoveDirective::RotateClockwise => turn(entity, ctx, |e, _| Some(e.direction.clockwise())),
        MoveDirective::RotateCounterClockwise => {
            turn(entity, ctx, |e, _| Some(e.direction.counter_clockwise()))
        }
        MoveDirective::TurnRandom => turn(entity, ctx, |_, c| Some(c.rng.next_direction())),
        MoveDirective::TurnTowardEntity(target) => {
            turn(entity, ctx, |e, c| direction_to(e, c, target))
        }
        MoveDirective::TurnAwayFromEntity(target) => {
            turn(entity, ctx, |e, c| direction_to(e, c, target).map(Direction::opposite))
        }

        MoveDirective::MoveBy { direction, distance } => {
            walk(*direction, *distance, progress, entity, ctx)
        }
        MoveDirective::TileMoveBy { direction, tiles } => {
            let tile = if direction.is_horizontal() { ctx.tile_width } else { ctx.tile_height };
            let total = tiles.saturating_mul(tile.max(0) as u32);
            walk(*direction, total, progress, entity, ctx)
        }
        MoveDirective::MoveTo(point) => {
            let dx = point.x.saturating_sub(entity.position.x);
            let dy = point.y.saturating_sub(entity.position.y);
            let Some(direction) = Direction::toward(dx, dy) else {
                return Advance::Instant;
            };
            let axis_remaining = (if direction.is_horizontal() { dx } else { dy }).unsigned_abs();
            let step = entity.speed.min(axis_remaining);
            let moved = entity.apply_motion(direction, step, ctx.world, ctx.obstacles);
            if moved == 0 || (entity.position.x == point.x && entity.position.y == point.y) {
                Advance::Finished
            } else {
                Advance::Hold
            }
        }
        MoveDirective::TowardEntity(target) => {
            if let Some(direction) = direction_to(entity, ctx, target) {
                entity.apply_motion(direction, entity.speed, ctx.world, ctx.obstacles);
            }
            Advance::Finished
        }
        MoveDirective::AwayFromEntity(target) => {
            if let Some(direction) = direction_to(entity, ctx, target) {
                entity.apply_motion(direction.opposite(), entity.speed, ctx.world, ctx.obstacles);
            }
            Advance::Finished
        }
        MoveDirective::Random => {
            let direction = ctx.rng.next_direction();
            entity.apply_motion(direction, entity.speed, ctx.world, ctx.obstacles);
            Advance::Finished
        }

        MoveDirective::Wait(ticks) => match progress {
            Progress::Waiting { until_tick } => {
                if ctx.tick >= *until_tick {
                    *progress = Progress::Fresh;
                    Advance::Instant
                } else {
                    Advance::Hold
                }
            }
            _ if *ticks == 0 => Advance::Instant,
            _ => {
                *progress = Progress::Waiting { until_tick: ctx.tick + u64::from(*ticks) };
                Advance::Hold
            }
        },

        MoveDirective::Repeat { directive, count } => repeat(directive, *count, progress, entity, ctx),
    }
}

/// Instantaneous facing change. `None` leaves the facing alone.
fn turn<F>(entity: &mut Entity, ctx: &mut StepContext<'_>, pick: F) -> Advance
where
    F: FnOnce(&Entity, &mut StepContext<'_>) -> Option<Direction>,
{
    if !ctx.spend() {
        return Advance::Hold;
    }
    if let Some(direction) = pick(entity, ctx) {
        entity.direction = direction;
    }
    Advance::Instant
}

/// One `min(speed, remaining)` step of a bounded walk.
fn walk(
    direction: Direction,
    total: u32,
    progress: &mut Progress,
    entity: &mut Entity,
    ctx: &mut StepContext<'_>,
) -> Advance {
    let remaining = match progress {
        Progress::Moving { remaining } => *remaining,
        _ => total,
    };
    if remaining == 0 {
        entity.direction = direction;
        return Advance::Instant;
    }

    let step = entity.speed.min(remaining);
    let moved = entity.apply_motion(direction, step, ctx.world, ctx.obstacles);
    let remaining = remaining - moved.min(remaining);

    if moved == 0 || remaining == 0 {
        *progress = Progress::Fresh;
        Advance::Finished
    } else {
        *progress = Progress::Moving { remaining };
        Advance::Hold
    }
}

fn repeat(
    directive: &MoveDirective,
    count: RepeatCount,
    progress: &mut Progress,
    entity: &mut Entity,
    ctx: &mut StepContext<'_>,
) -> Advance {
    let (mut done, mut inner) = match std::mem::replace(progress, Progress::Fresh) {
        Progress::Repeating { done, inner } => (done, *inner),
        _ => (0, Progress::Fresh),
    };

    loop {
        if count.is_satisfied(done) {
            return Advance::Instant;
        }
        match run_directive(directive, &mut inner, entity, ctx) {
            Advance::Hold => {
                *progress = Progress::Repeating { done, inner: Box::new(inner) };
                return Advance::Hold;
            }
            Advance::Finished => {
                done = done.saturating_add(1);
                if count.is_satisfied(done) {
                    return Advance::Finished;
                }
                *progress = Progress::Repeating { done, inner: Box::new(Progress::Fresh) };
                return Advance::Hold;
            }
            Advance::Instant => {
                done = done.saturating_add(1);
                inner = Progress::Fresh;
                if !count.is_satisfied(done) && !ctx.spend() {
                    *progress = Progress::Repeating { done, inner: Box::new(Progress::Fresh) };
                    return Advance::Hold;
                }
            }
        }
    }
}

/// Facing that reduces the center-to-center offset to `target`.
fn direction_to(entity: &Entity, ctx: &StepContext<'_>, target: &EntityId) -> Option<Direction> {
    let (tx, ty) = ctx.target_center(target)?;
    let (cx, cy) = entity.center();
    Direction::toward(tx.saturating_sub(cx), ty.saturating_sub(cy))
}
