//! Physics world management.
//!
//! Owns every rigid body in the arena (boundary walls, cookies, food) and
//! everything that may mutate them. The engine forbids destroying bodies
//! while it is mid-step or mid-query, so all destruction requests are
//! buffered in a pending list and executed at exactly one point per tick
//! (`flush_removals`). Food creation goes through a task queue for the same
//! reason: a burst of scoring events must not spike a single tick's cost.

use crate::config::{Config, PlayerConfig};
use crate::session::{SessionId, Viewport};
use glam::Vec2;
use protocol::{CookieInfo, FoodInfo};
use rand::Rng;
use rapier2d::parry::bounding_volume::Aabb;
use rapier2d::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Opaque food pellet identifier.
pub type FoodId = u64;

const GROUP_COOKIE: Group = Group::GROUP_1;
const GROUP_FOOD: Group = Group::GROUP_2;
const GROUP_BOUNDARY: Group = Group::GROUP_3;

/// What a collider belongs to. Packed into rapier's `user_data` so the
/// contact listener can classify a pair without any side lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Boundary,
    Cookie(SessionId),
    Food(FoodId),
}

impl BodyTag {
    const KIND_BOUNDARY: u128 = 0;
    const KIND_COOKIE: u128 = 1;
    const KIND_FOOD: u128 = 2;

    pub fn encode(self) -> u128 {
        match self {
            BodyTag::Boundary => Self::KIND_BOUNDARY,
            BodyTag::Cookie(id) => Self::KIND_COOKIE | ((id as u128) << 8),
            BodyTag::Food(id) => Self::KIND_FOOD | ((id as u128) << 8),
        }
    }

    pub fn decode(raw: u128) -> Option<BodyTag> {
        let id = (raw >> 8) as u64;
        match raw & 0xff {
            Self::KIND_BOUNDARY => Some(BodyTag::Boundary),
            Self::KIND_COOKIE => Some(BodyTag::Cookie(id)),
            Self::KIND_FOOD => Some(BodyTag::Food(id)),
            _ => None,
        }
    }
}

/// A batch of pellets to drop around one point.
#[derive(Debug, Clone, Copy)]
pub struct FoodSpawnTask {
    pub position: Vec2,
    pub count: u64,
}

/// Per-tick propulsion input for one playing session.
#[derive(Debug, Clone, Copy)]
pub struct PropulsionInput {
    pub session: SessionId,
    pub angle: f32,
    pub turbo: bool,
    pub score: u64,
}

#[derive(Debug)]
struct CookieBody {
    handle: RigidBodyHandle,
    /// Score the current fixture was sized for; lags the session's atomic
    /// score until the next propulsion pass rebuilds the fixture.
    score: u64,
    last_contact: Instant,
}

#[derive(Debug)]
struct FoodBody {
    handle: RigidBodyHandle,
    score: u64,
    spawned_at: Instant,
}

/// The physics world. All access goes through [`SharedWorld`]'s single
/// exclusive lock; no method blocks.
pub struct PhysicsWorld {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    integration: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    queries: QueryPipeline,

    width: f32,
    height: f32,
    food_dispersion: f32,

    cookies: HashMap<SessionId, CookieBody>,
    food: HashMap<FoodId, FoodBody>,
    /// Pellets alive in the world right now.
    food_count: u64,
    /// Pellets promised by queued spawn tasks but not yet created.
    queued_food: u64,
    pending_removal: Vec<RigidBodyHandle>,
    food_queue: VecDeque<FoodSpawnTask>,
}

impl PhysicsWorld {
    /// Create an empty world with its four boundary walls.
    pub fn new(config: &Config) -> Self {
        let mut integration = IntegrationParameters::default();
        integration.num_solver_iterations =
            NonZeroUsize::new(config.simulation.solver_iterations).unwrap_or(NonZeroUsize::MIN);

        let mut world = Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            integration,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            queries: QueryPipeline::new(),
            width: config.world.width,
            height: config.world.height,
            food_dispersion: config.food.dispersion,
            cookies: HashMap::new(),
            food: HashMap::new(),
            food_count: 0,
            queued_food: 0,
            pending_removal: Vec::new(),
            food_queue: VecDeque::new(),
        };
        world.create_boundaries();
        world
    }

    fn create_boundaries(&mut self) {
        let w = self.width;
        let h = self.height;
        // (center, half extents) for bottom, top, left, right.
        let walls = [
            (Vec2::new(w / 2.0, 0.0), Vec2::new(w / 2.0, 0.1)),
            (Vec2::new(w / 2.0, h), Vec2::new(w / 2.0, 0.1)),
            (Vec2::new(0.0, h / 2.0), Vec2::new(0.1, h / 2.0)),
            (Vec2::new(w, h / 2.0), Vec2::new(0.1, h / 2.0)),
        ];
        for (center, half) in walls {
            let body = RigidBodyBuilder::fixed()
                .translation(vector![center.x, center.y])
                .build();
            let handle = self.bodies.insert(body);
            let collider = ColliderBuilder::cuboid(half.x, half.y)
                .restitution(4.0)
                .collision_groups(InteractionGroups::new(GROUP_BOUNDARY, Group::ALL))
                .user_data(BodyTag::Boundary.encode())
                .build();
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
        }
    }

    /// Add a cookie body for a session. The caller picks the position; the
    /// body starts drifting in a random direction like the original game.
    pub fn add_cookie(
        &mut self,
        session: SessionId,
        score: u64,
        position: Vec2,
        max_speed: f32,
    ) -> RigidBodyHandle {
        let mut rng = rand::rng();
        let half = (max_speed / 2.0).max(1.0);
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .rotation(rng.random_range(0.0..std::f32::consts::TAU))
            .linvel(vector![
                rng.random_range(-half..half),
                rng.random_range(-half..half)
            ])
            .angvel(10.0)
            .linear_damping(1.0)
            .angular_damping(0.0)
            .build();
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(Self::cookie_collider(session, score), handle, &mut self.bodies);

        self.cookies.insert(
            session,
            CookieBody {
                handle,
                score,
                // Spawn without a thrust penalty: pretend the last clash was
                // long ago.
                last_contact: Instant::now()
                    .checked_sub(Duration::from_secs(5))
                    .unwrap_or_else(Instant::now),
            },
        );
        handle
    }

    fn cookie_collider(session: SessionId, score: u64) -> Collider {
        let sc = score.max(1) as f32;
        let radius = (sc.log2() + sc.sqrt()) / 2.0;
        ColliderBuilder::ball(radius.max(0.5))
            .density(100.0 * sc.sqrt())
            .restitution(1.0)
            .friction(0.1)
            .collision_groups(InteractionGroups::new(GROUP_COOKIE, Group::ALL))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::Cookie(session).encode())
            .build()
    }

    /// Create one food pellet and scatter it with a random impulse.
    pub fn spawn_food(&mut self, position: Vec2, score: u64) -> FoodId {
        let mut rng = rand::rng();
        let id = rng.random::<u64>() >> 11;
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .linear_damping(1.0)
            .lock_rotations()
            .build();
        let handle = self.bodies.insert(body);
        let collider = ColliderBuilder::ball(1.0)
            .density(1.0)
            .restitution(0.0)
            .friction(1.0)
            // Food never collides with food, only with cookies and walls.
            .collision_groups(InteractionGroups::new(
                GROUP_FOOD,
                GROUP_COOKIE | GROUP_BOUNDARY,
            ))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(BodyTag::Food(id).encode())
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        let d = self.food_dispersion.max(0.1);
        if let Some(body) = self.bodies.get_mut(handle) {
            body.apply_impulse(
                vector![rng.random_range(-d..d), rng.random_range(-d..d)],
                true,
            );
        }

        self.food.insert(
            id,
            FoodBody {
                handle,
                score,
                spawned_at: Instant::now(),
            },
        );
        self.food_count += 1;
        id
    }

    /// Queue a batch of pellets for a later flush.
    pub fn queue_food_task(&mut self, task: FoodSpawnTask) {
        self.queued_food += task.count;
        self.food_queue.push_back(task);
    }

    /// Execute up to `max_tasks` queued spawn tasks. Returns how many ran.
    pub fn flush_food_tasks(&mut self, max_tasks: usize) -> usize {
        let mut executed = 0;
        while executed < max_tasks {
            let Some(task) = self.food_queue.pop_front() else {
                break;
            };
            self.queued_food = self.queued_food.saturating_sub(task.count);
            for _ in 0..task.count {
                self.spawn_food(task.position, 1);
            }
            executed += 1;
        }
        executed
    }

    /// Top the arena back up to `min_count` pellets, queueing at most
    /// `batch` new spawn tasks this cycle. Pellets already promised by
    /// queued tasks count against the deficit so back-to-back cycles don't
    /// over-queue. Returns how many were queued.
    pub fn replenish(&mut self, min_count: u64, batch: u64) -> u64 {
        let promised = self.food_count + self.queued_food;
        if promised >= min_count {
            return 0;
        }
        let to_queue = (min_count - promised).min(batch);
        let mut rng = rand::rng();
        for _ in 0..to_queue {
            let position = Vec2::new(
                rng.random_range(30.0_f32..(self.width - 30.0).max(31.0)),
                rng.random_range(30.0_f32..(self.height - 30.0).max(31.0)),
            );
            self.queue_food_task(FoodSpawnTask { position, count: 1 });
        }
        to_queue
    }

    /// Consume a pellet if it has matured. Immature or already-consumed
    /// pellets return `None` and stay untouched; consumption removes the
    /// registry entry first, so a pellet can never be eaten twice even if a
    /// second contact event for it is already queued.
    pub fn take_food_if_mature(&mut self, id: FoodId, maturation: Duration) -> Option<u64> {
        let mature = self.food.get(&id)?.spawned_at.elapsed() >= maturation;
        if !mature {
            return None;
        }
        let pellet = self.food.remove(&id)?;
        self.schedule_removal(pellet.handle);
        self.food_count = self.food_count.saturating_sub(1);
        Some(pellet.score)
    }

    /// Queue a body for destruction at the next flush point.
    pub fn schedule_removal(&mut self, handle: RigidBodyHandle) {
        if !self.pending_removal.contains(&handle) {
            self.pending_removal.push(handle);
        }
    }

    /// Queue a session's cookie body for destruction and forget the cookie.
    pub fn schedule_cookie_removal(&mut self, session: SessionId) {
        if let Some(cookie) = self.cookies.remove(&session) {
            self.schedule_removal(cookie.handle);
        }
    }

    /// Refresh a cookie's last-contact stamp, reinstating the thrust
    /// penalty window.
    pub fn touch_cookie(&mut self, session: SessionId) {
        if let Some(cookie) = self.cookies.get_mut(&session) {
            cookie.last_contact = Instant::now();
        }
    }

    pub fn cookie_position(&self, session: SessionId) -> Option<Vec2> {
        let cookie = self.cookies.get(&session)?;
        let body = self.bodies.get(cookie.handle)?;
        let translation = body.translation();
        Some(Vec2::new(translation.x, translation.y))
    }

    pub fn contains_body(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.get(handle).is_some()
    }

    pub fn bodies(&self) -> &RigidBodySet {
        &self.bodies
    }

    pub fn colliders(&self) -> &ColliderSet {
        &self.colliders
    }

    pub fn food_handle(&self, id: FoodId) -> Option<RigidBodyHandle> {
        self.food.get(&id).map(|pellet| pellet.handle)
    }

    pub fn food_count(&self) -> u64 {
        self.food_count
    }

    pub fn cookie_count(&self) -> usize {
        self.cookies.len()
    }

    /// Advance the simulation by `dt` seconds. Collision events flow into
    /// `events` (the contact listener) during the step.
    pub fn step(&mut self, dt: f32, events: &dyn EventHandler) {
        self.integration.dt = dt;
        self.pipeline.step(
            &vector![0.0, 0.0],
            &self.integration,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            None,
            &(),
            events,
        );
    }

    /// Destroy every queued body. This is the only place bodies die, and it
    /// runs strictly between steps. Returns how many were destroyed.
    pub fn flush_removals(&mut self) -> usize {
        let pending: Vec<RigidBodyHandle> = self.pending_removal.drain(..).collect();
        let mut removed = 0;
        for handle in pending {
            let Some(body) = self.bodies.get_mut(handle) else {
                continue;
            };
            body.set_enabled(false);
            self.bodies.remove(
                handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
            removed += 1;
        }
        removed
    }

    /// Homeostatic speed control for every playing cookie: push the body
    /// toward the target speed along the declared heading, damped by the
    /// post-clash contact penalty. Also rebuilds the fixture when the
    /// session's score moved since the last pass (an expensive shape
    /// change, rate-limited by the propulsion period).
    pub fn apply_propulsion(&mut self, inputs: &[PropulsionInput], player: &PlayerConfig) {
        let penalty_window = Duration::from_millis(player.contact_penalty_ms.max(1));
        for input in inputs {
            let Some(cookie) = self.cookies.get(&input.session) else {
                continue;
            };
            let handle = cookie.handle;
            let cached_score = cookie.score;
            let since_contact = cookie.last_contact.elapsed();

            let Some(body) = self.bodies.get_mut(handle) else {
                continue;
            };
            let penalty =
                (since_contact.as_secs_f32() / penalty_window.as_secs_f32()).min(1.0);
            body.set_angvel(0.0, true);

            let current_speed = body.linvel().norm();
            let expected_speed = if input.turbo {
                player.turbo_speed
            } else {
                player.speed
            };
            let mut magnitude = 2.0 * (expected_speed - current_speed) * body.mass() * penalty;
            if magnitude < 0.0 {
                // Overspeed correction is soft; damping does the real braking.
                magnitude *= 0.005;
            }
            let direction = Vec2::from_angle(input.angle);
            body.reset_forces(true);
            body.add_force(vector![direction.x * magnitude, direction.y * magnitude], true);

            if input.score != cached_score {
                self.resize_cookie(input.session, input.score);
            }
        }
    }

    fn resize_cookie(&mut self, session: SessionId, score: u64) {
        let Some(cookie) = self.cookies.get_mut(&session) else {
            return;
        };
        cookie.score = score;
        let handle = cookie.handle;
        let old: Vec<ColliderHandle> = self
            .bodies
            .get(handle)
            .map(|body| body.colliders().to_vec())
            .unwrap_or_default();
        for collider in old {
            self.colliders
                .remove(collider, &mut self.islands, &mut self.bodies, true);
        }
        self.colliders.insert_with_parent(
            Self::cookie_collider(session, score),
            handle,
            &mut self.bodies,
        );
    }

    /// Bring the broad-phase query structures up to date with the collider
    /// set. Call after bodies were added or removed and before querying.
    pub fn refresh_queries(&mut self) {
        self.queries.update(&self.colliders);
    }

    /// Broad-phase AABB query over a session's viewport, classified by tag.
    pub fn viewport_query(&self, view: &Viewport) -> (Vec<CookieInfo>, Vec<FoodInfo>) {
        let aabb = Aabb::new(point![view.x, view.y], point![view.xx, view.yy]);
        let mut cookies = Vec::new();
        let mut food = Vec::new();
        self.queries
            .colliders_with_aabb_intersecting_aabb(&aabb, |handle| {
                let Some(collider) = self.colliders.get(*handle) else {
                    return true;
                };
                let position = collider.translation();
                match BodyTag::decode(collider.user_data) {
                    Some(BodyTag::Cookie(session)) => {
                        if let Some(cookie) = self.cookies.get(&session) {
                            cookies.push(CookieInfo {
                                id: session,
                                score: cookie.score,
                                x: position.x,
                                y: position.y,
                            });
                        }
                    }
                    Some(BodyTag::Food(id)) => {
                        if let Some(pellet) = self.food.get(&id) {
                            food.push(FoodInfo {
                                id,
                                score: pellet.score,
                                x: position.x,
                                y: position.y,
                            });
                        }
                    }
                    Some(BodyTag::Boundary) | None => {}
                }
                true
            });
        (cookies, food)
    }
}

/// The world behind its single exclusive lock. Held for at most one tick's
/// work, never across a blocking wait.
#[derive(Clone)]
pub struct SharedWorld(Arc<Mutex<PhysicsWorld>>);

impl SharedWorld {
    pub fn new(world: PhysicsWorld) -> Self {
        Self(Arc::new(Mutex::new(world)))
    }

    pub fn lock(&self) -> MutexGuard<'_, PhysicsWorld> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodic replenishment: keep the pellet population near its target by
/// queueing spawn tasks, never by creating bodies directly.
pub async fn run_replenishment(world: SharedWorld, min_count: u64, batch: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let queued = {
            let mut world = world.lock();
            world.replenish(min_count, batch)
        };
        if queued > 0 {
            info!("replenishing food, queued {queued} pellets");
        }
    }
}
