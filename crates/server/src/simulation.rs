//! The tick driver.
//!
//! One task owns the world lock for the duration of each tick: step the
//! engine, flush deferred destruction, drain some food spawn tasks,
//! recompute propulsion, push viewport snapshots. The pacing sleep happens
//! outside the lock and is the only intentional suspension in the hot path.

use crate::broadcast;
use crate::collision::ContactListener;
use crate::config::Config;
use crate::session::Sessions;
use crate::world::{PropulsionInput, SharedWorld};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Adaptive tick rate with hysteresis.
///
/// A drift counter accumulates +1 for every over-budget tick and -1 for
/// every under-budget tick. Crossing the slow-down threshold drops the rate
/// by one; crossing the (negative) speed-up threshold raises it by one.
/// The speed-up threshold is the larger of the two: throttling reacts
/// quickly, recovery waits for a long quiet streak.
#[derive(Debug)]
pub struct FrameRateController {
    current_fps: f64,
    min_fps: f64,
    max_fps: f64,
    speed_up_ticks: i32,
    slow_down_ticks: i32,
    drift: i32,
}

impl FrameRateController {
    pub fn new(min_fps: f64, max_fps: f64, speed_up_ticks: i32, slow_down_ticks: i32) -> Self {
        Self {
            current_fps: (min_fps + max_fps) / 2.0,
            min_fps,
            max_fps,
            speed_up_ticks: speed_up_ticks.max(1),
            slow_down_ticks: slow_down_ticks.max(1),
            drift: 0,
        }
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    /// Budget for one tick at the current rate.
    pub fn time_step(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.current_fps)
    }

    /// Record one tick's budget outcome. Returns the new rate if it changed.
    pub fn record(&mut self, over_budget: bool) -> Option<f64> {
        self.drift += if over_budget { 1 } else { -1 };

        if self.drift >= self.slow_down_ticks && self.current_fps > self.min_fps {
            self.current_fps = (self.current_fps - 1.0).max(self.min_fps);
            self.drift = 0;
            return Some(self.current_fps);
        }
        if self.drift <= -self.speed_up_ticks && self.current_fps < self.max_fps {
            self.current_fps = (self.current_fps + 1.0).min(self.max_fps);
            self.drift = 0;
            return Some(self.current_fps);
        }
        None
    }
}

/// The simulation loop. Construct once, then `run()` forever.
pub struct SimulationLoop {
    world: SharedWorld,
    sessions: Arc<Sessions>,
    listener: ContactListener,
    config: Config,
    controller: FrameRateController,
    tick_count: u64,
}

impl SimulationLoop {
    pub fn new(
        world: SharedWorld,
        sessions: Arc<Sessions>,
        listener: ContactListener,
        config: Config,
    ) -> Self {
        let controller = FrameRateController::new(
            config.simulation.min_fps,
            config.simulation.max_fps,
            config.simulation.speed_up_ticks,
            config.simulation.slow_down_ticks,
        );
        Self {
            world,
            sessions,
            listener,
            config,
            controller,
            tick_count: 0,
        }
    }

    pub async fn run(mut self) {
        loop {
            let started = Instant::now();
            let budget = self.controller.time_step();

            self.tick();

            let elapsed = started.elapsed();
            if elapsed < budget {
                tokio::time::sleep(budget - elapsed).await;
            } else {
                warn!(
                    "cannot sustain frame rate: budget {:?}, spent {:?}, fps {}",
                    budget,
                    elapsed,
                    self.controller.current_fps()
                );
            }
            if let Some(fps) = self.controller.record(elapsed >= budget) {
                debug!("tick rate adjusted to {fps} fps");
            }
        }
    }

    /// One tick's work under the world lock.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        let dt = self.controller.time_step().as_secs_f32();
        let simulation = &self.config.simulation;

        let mut world = self.world.lock();

        world.step(dt, &self.listener);
        world.flush_removals();

        if self.tick_count % simulation.food_flush_period_ticks.max(1) == 0 {
            world.flush_food_tasks(simulation.food_tasks_per_flush);
        }

        if self.tick_count % simulation.propulsion_period_ticks.max(1) == 0 {
            let inputs = propulsion_inputs(&self.sessions);
            world.apply_propulsion(&inputs, &self.config.player);
        }

        // Bodies were added and removed above; queries below must see the
        // current collider set.
        world.refresh_queries();

        broadcast::push_due_snapshots(
            &world,
            &self.sessions,
            Duration::from_millis(self.config.broadcast.update_period_ms),
        );
    }
}

/// Heading, turbo flag and current score for every playing session.
fn propulsion_inputs(sessions: &Sessions) -> Vec<PropulsionInput> {
    let mut inputs = Vec::new();
    sessions.each(|session| {
        if let Some(viewport) = session.viewport() {
            inputs.push(PropulsionInput {
                session: session.id,
                angle: viewport.angle,
                turbo: viewport.turbo,
                score: session.score(),
            });
        }
    });
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> FrameRateController {
        // 10..45 fps, speed up after 60, slow down after 5.
        FrameRateController::new(10.0, 45.0, 60, 5)
    }

    #[test]
    fn starts_at_the_midpoint() {
        let controller = controller();
        assert_eq!(controller.current_fps(), 27.5);
    }

    #[test]
    fn time_step_is_the_inverse_of_the_rate() {
        let controller = FrameRateController::new(25.0, 25.0, 60, 5);
        assert_eq!(controller.time_step(), Duration::from_millis(40));
    }

    #[test]
    fn sustained_overrun_slows_down() {
        let mut controller = controller();
        for _ in 0..4 {
            assert_eq!(controller.record(true), None);
        }
        assert_eq!(controller.record(true), Some(26.5));
    }

    #[test]
    fn recovery_is_slower_than_throttling() {
        let mut controller = controller();
        // Five over-budget ticks throttle, but it takes sixty under-budget
        // ticks to climb back up.
        for _ in 0..59 {
            assert_eq!(controller.record(false), None);
        }
        assert_eq!(controller.record(false), Some(28.5));
    }

    #[test]
    fn mixed_ticks_cancel_out() {
        let mut controller = controller();
        for _ in 0..50 {
            controller.record(true);
            controller.record(false);
        }
        assert_eq!(controller.current_fps(), 27.5);
    }

    #[test]
    fn rate_stays_inside_the_bounds() {
        let mut controller = FrameRateController::new(10.0, 45.0, 2, 2);
        for _ in 0..500 {
            controller.record(true);
        }
        assert_eq!(controller.current_fps(), 10.0);
        for _ in 0..500 {
            controller.record(false);
        }
        assert_eq!(controller.current_fps(), 45.0);
    }
}
