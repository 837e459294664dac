//! The game facade.
//!
//! Owns the session store and the physics world, spawns the background
//! tasks, and exposes the in-process contract the transport layer calls
//! into. Everything is constructed once at startup and threaded through;
//! there is no ambient global state.

use crate::broadcast;
use crate::collision::{self, CollisionRules, ContactListener};
use crate::config::Config;
use crate::session::{SessionError, SessionId, Sessions, Viewport};
use crate::simulation::SimulationLoop;
use crate::world::{self, PhysicsWorld, SharedWorld};
use glam::Vec2;
use protocol::{CookieInfo, ServerMessage};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Game {
    config: Config,
    sessions: Arc<Sessions>,
    world: SharedWorld,
}

impl Game {
    /// Build the world (with its boundary walls) and the empty session
    /// table. No tasks run until [`Game::start`].
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(Sessions::new(
            config.player.start_score,
            config.broadcast.outbound_capacity,
        ));
        let world = SharedWorld::new(PhysicsWorld::new(&config));
        Self {
            config,
            sessions,
            world,
        }
    }

    /// Spawn the simulation loop, the two collision processors, the food
    /// replenishment timer and the stats broadcaster. Requires a running
    /// tokio runtime.
    pub fn start(&self) {
        let config = &self.config;
        let rules = CollisionRules {
            min_score: config.player.min_score,
            maturation: Duration::from_millis(config.food.maturation_ms),
        };

        let (listener, clash_rx, bite_rx) =
            ContactListener::channel(config.broadcast.collision_queue_capacity);

        tokio::spawn(collision::process_clashes(
            clash_rx,
            Arc::clone(&self.sessions),
            self.world.clone(),
            rules,
        ));
        tokio::spawn(collision::process_bites(
            bite_rx,
            Arc::clone(&self.sessions),
            self.world.clone(),
            rules,
        ));
        tokio::spawn(world::run_replenishment(
            self.world.clone(),
            config.food.min_count,
            config.food.spawn_batch,
            Duration::from_millis(config.food.replenish_period_ms.max(1)),
        ));
        tokio::spawn(broadcast::run_stats(
            self.world.clone(),
            Arc::clone(&self.sessions),
            Duration::from_millis(config.broadcast.stats_period_ms.max(1)),
        ));
        tokio::spawn(
            SimulationLoop::new(
                self.world.clone(),
                Arc::clone(&self.sessions),
                listener,
                config.clone(),
            )
            .run(),
        );

        info!("game started");
    }

    /// Register a fresh connection.
    pub fn create_session(&self) -> SessionId {
        self.sessions.add()
    }

    /// Hand the session's outbound queue to the transport. Works once.
    pub fn take_outbound(
        &self,
        id: SessionId,
    ) -> Result<mpsc::Receiver<ServerMessage>, SessionError> {
        self.sessions
            .get(id)?
            .take_outbound()
            .ok_or(SessionError::NotFound)
    }

    pub fn login(&self, id: SessionId, user_name: &str) -> Result<(), SessionError> {
        self.sessions.get(id)?.login(user_name)
    }

    /// Put a cookie on the field for a logged session and start playing.
    pub fn create_cookie(&self, id: SessionId) -> Result<CookieInfo, SessionError> {
        let session = self.sessions.get(id)?;

        // State transition first; the body is only created for the caller
        // that won the transition.
        session.start_playing()?;

        let margin = self.config.player.spawn_margin;
        let mut rng = rand::rng();
        let position = Vec2::new(
            rng.random_range(margin..(self.config.world.width - margin).max(margin + 1.0)),
            rng.random_range(margin..(self.config.world.height - margin).max(margin + 1.0)),
        );
        let score = session.score();

        let handle = {
            let mut world = self.world.lock();
            world.add_cookie(id, score, position, self.config.player.speed)
        };
        session.set_body(handle);

        Ok(CookieInfo {
            id,
            score,
            x: position.x,
            y: position.y,
        })
    }

    pub fn update_viewport(
        &self,
        id: SessionId,
        x: f32,
        y: f32,
        xx: f32,
        yy: f32,
        angle: f32,
        turbo: bool,
    ) -> Result<(), SessionError> {
        self.sessions.get(id)?.update_viewport(Viewport {
            x,
            y,
            xx,
            yy,
            angle,
            turbo,
        });
        Ok(())
    }

    /// Tear a session down: schedule its body (if any) for removal and drop
    /// the session row, which closes the outbound queue. Safe to call from
    /// any task; the body dies at the next tick's flush point, never here.
    pub fn logout(&self, id: SessionId) {
        match self.sessions.remove(id) {
            Ok(session) => {
                if session.take_body().is_some() {
                    self.world.lock().schedule_cookie_removal(id);
                }
                info!("session {id} logged out");
            }
            Err(err) => warn!("logout: {err}"),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    pub fn food_count(&self) -> u64 {
        self.world.lock().food_count()
    }

    #[cfg(test)]
    pub(crate) fn parts(&self) -> (SharedWorld, Arc<Sessions>, Config) {
        (
            self.world.clone(),
            Arc::clone(&self.sessions),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_game() -> Game {
        let mut config = Config::default();
        config.world.width = 1000.0;
        config.world.height = 1000.0;
        config.broadcast.update_period_ms = 0;
        Game::new(config)
    }

    #[test]
    fn create_cookie_requires_login() {
        let game = small_game();
        let id = game.create_session();
        assert_eq!(game.create_cookie(id).err(), Some(SessionError::NotLogged));

        game.login(id, "ada").unwrap();
        let cookie = game.create_cookie(id).unwrap();
        assert_eq!(cookie.id, id);
        assert_eq!(cookie.score, 100);
        assert!(cookie.x >= 300.0 && cookie.x <= 700.0);
        assert!(cookie.y >= 300.0 && cookie.y <= 700.0);
    }

    #[test]
    fn double_create_cookie_is_rejected_without_leaking_a_body() {
        let game = small_game();
        let id = game.create_session();
        game.login(id, "ada").unwrap();
        game.create_cookie(id).unwrap();
        assert_eq!(game.create_cookie(id).err(), Some(SessionError::NotLogged));
        assert_eq!(game.world.lock().cookie_count(), 1);
    }

    #[test]
    fn login_twice_is_rejected() {
        let game = small_game();
        let id = game.create_session();
        game.login(id, "ada").unwrap();
        assert_eq!(game.login(id, "ada").err(), Some(SessionError::AlreadyLogged));
    }

    #[test]
    fn operations_on_unknown_sessions_fail() {
        let game = small_game();
        assert_eq!(game.login(9, "x").err(), Some(SessionError::NotFound));
        assert_eq!(game.create_cookie(9).err(), Some(SessionError::NotFound));
        assert_eq!(
            game.update_viewport(9, 0.0, 0.0, 1.0, 1.0, 0.0, false).err(),
            Some(SessionError::NotFound)
        );
    }

    #[test]
    fn logout_schedules_removal_and_closes_the_queue() {
        let game = small_game();
        let id = game.create_session();
        let mut rx = game.take_outbound(id).unwrap();
        game.login(id, "ada").unwrap();
        game.create_cookie(id).unwrap();

        game.logout(id);
        assert_eq!(game.session_count(), 0);

        // Queue closes once the session row (and its sender) is gone.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // The body survives until the next flush point.
        let (world, _, _) = game.parts();
        {
            let world = world.lock();
            assert_eq!(world.cookie_count(), 0);
        }
        {
            let mut world = world.lock();
            world.step(1.0 / 30.0, &());
            assert_eq!(world.flush_removals(), 1);
        }
    }

    #[test]
    fn full_flow_delivers_viewport_snapshots() {
        let game = small_game();
        let id = game.create_session();
        let mut rx = game.take_outbound(id).unwrap();
        game.login(id, "ada").unwrap();
        let cookie = game.create_cookie(id).unwrap();
        game.update_viewport(
            id,
            cookie.x - 50.0,
            cookie.y - 50.0,
            cookie.x + 50.0,
            cookie.y + 50.0,
            0.0,
            false,
        )
        .unwrap();

        // Drive the loop by hand instead of spawning it.
        let (world, sessions, config) = game.parts();
        let (listener, _clash_rx, _bite_rx) = ContactListener::channel(8);
        let mut simulation = SimulationLoop::new(world, sessions, listener, config);
        simulation.tick();

        match rx.try_recv() {
            Ok(ServerMessage::Viewport(snapshot)) => {
                assert_eq!(snapshot.cookies.len(), 1);
                assert_eq!(snapshot.cookies[0].id, id);
            }
            other => panic!("expected a viewport snapshot, got {other:?}"),
        }
    }
}
