//! Outbound broadcasting.
//!
//! Snapshots are pushed with `try_send`: a full queue drops the snapshot,
//! so a slow consumer only affects its own stream, never the simulation
//! tick.

use crate::session::Sessions;
use crate::world::{PhysicsWorld, SharedWorld};
use protocol::{ServerMessage, StatsSnapshot, ViewportSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Push a viewport snapshot to every playing session whose last one is
/// older than `period`. Called once per tick while the world lock is held.
pub fn push_due_snapshots(world: &PhysicsWorld, sessions: &Sessions, period: Duration) {
    sessions.each(|session| {
        let Some(viewport) = session.broadcast_due(period) else {
            return;
        };
        let (cookies, food) = world.viewport_query(&viewport);
        let delivered = session.push(ServerMessage::Viewport(ViewportSnapshot { cookies, food }));
        if !delivered {
            debug!("outbound queue full, dropping snapshot for session {}", session.id);
        }
    });
}

/// Periodic world statistics, pushed to every session regardless of state.
pub async fn run_stats(world: SharedWorld, sessions: Arc<Sessions>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let food_count = world.lock().food_count();
        let stats = StatsSnapshot {
            food_count,
            session_count: sessions.count() as u64,
        };
        sessions.each(|session| {
            session.push(ServerMessage::Stats(stats));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::Viewport;
    use glam::Vec2;

    fn playing_viewer(sessions: &Sessions, world: &mut PhysicsWorld) -> u64 {
        let id = sessions.add();
        let session = sessions.get(id).unwrap();
        session.login("viewer").unwrap();
        session.start_playing().unwrap();
        let handle = world.add_cookie(id, 100, Vec2::new(100.0, 100.0), 45.0);
        session.set_body(handle);
        session.update_viewport(Viewport {
            x: 50.0,
            y: 50.0,
            xx: 150.0,
            yy: 150.0,
            angle: 0.0,
            turbo: false,
        });
        id
    }

    #[test]
    fn due_playing_session_receives_a_snapshot() {
        let sessions = Sessions::new(100, 8);
        let mut config = Config::default();
        config.world.width = 200.0;
        config.world.height = 200.0;
        let mut world = PhysicsWorld::new(&config);

        let id = playing_viewer(&sessions, &mut world);
        world.spawn_food(Vec2::new(110.0, 110.0), 1);
        world.refresh_queries();

        let session = sessions.get(id).unwrap();
        let mut rx = session.take_outbound().unwrap();

        push_due_snapshots(&world, &sessions, Duration::ZERO);

        match rx.try_recv() {
            Ok(ServerMessage::Viewport(snapshot)) => {
                assert_eq!(snapshot.cookies.len(), 1);
                assert_eq!(snapshot.cookies[0].id, id);
                assert_eq!(snapshot.food.len(), 1);
            }
            other => panic!("expected a viewport snapshot, got {other:?}"),
        }

        // The stamp was refreshed: not due again within a long period.
        push_due_snapshots(&world, &sessions, Duration::from_secs(60));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sessions_without_a_cookie_get_nothing() {
        let sessions = Sessions::new(100, 8);
        let config = Config::default();
        let world = PhysicsWorld::new(&config);

        let id = sessions.add();
        sessions.get(id).unwrap().login("idle").unwrap();
        let mut rx = sessions.get(id).unwrap().take_outbound().unwrap();

        push_due_snapshots(&world, &sessions, Duration::ZERO);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_the_snapshot_without_blocking() {
        let sessions = Sessions::new(100, 1);
        let mut config = Config::default();
        config.world.width = 200.0;
        config.world.height = 200.0;
        let mut world = PhysicsWorld::new(&config);

        let id = playing_viewer(&sessions, &mut world);
        world.refresh_queries();
        let session = sessions.get(id).unwrap();

        // Fill the single-slot queue, then broadcast twice.
        assert!(session.push(ServerMessage::Stats(StatsSnapshot {
            food_count: 0,
            session_count: 1,
        })));
        push_due_snapshots(&world, &sessions, Duration::ZERO);
        push_due_snapshots(&world, &sessions, Duration::ZERO);

        // Only the pre-filled message is in the queue.
        let mut rx = session.take_outbound().unwrap();
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Stats(_))));
        assert!(rx.try_recv().is_err());
    }
}
