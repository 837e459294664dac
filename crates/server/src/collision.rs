//! Collision classification and scoring.
//!
//! The contact listener runs inside the physics step and must not touch the
//! world: it only classifies the pair and forwards a small event onto one of
//! two bounded queues. Two dedicated tasks drain those queues and apply the
//! rules. Events within one queue are handled in arrival order; across the
//! two queues there is no ordering guarantee.

use crate::session::{SessionError, SessionId, Sessions};
use crate::world::{BodyTag, FoodId, FoodSpawnTask, SharedWorld};
use rapier2d::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Two cookies stopped touching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieClash {
    pub a: SessionId,
    pub b: SessionId,
}

/// A cookie stopped touching a food pellet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoodBite {
    pub session: SessionId,
    pub food: FoodId,
}

/// Callback handed to the physics engine. Classifies end-of-contact pairs;
/// begin-contact is ignored, so a collision only counts once it survived at
/// least one full step (perpetual grazing contacts never fire).
pub struct ContactListener {
    clashes: mpsc::Sender<CookieClash>,
    bites: mpsc::Sender<FoodBite>,
}

impl ContactListener {
    /// Build a listener plus the receiving ends of its two queues.
    pub fn channel(
        capacity: usize,
    ) -> (Self, mpsc::Receiver<CookieClash>, mpsc::Receiver<FoodBite>) {
        let (clash_tx, clash_rx) = mpsc::channel(capacity);
        let (bite_tx, bite_rx) = mpsc::channel(capacity);
        (
            Self {
                clashes: clash_tx,
                bites: bite_tx,
            },
            clash_rx,
            bite_rx,
        )
    }
}

impl EventHandler for ContactListener {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        let CollisionEvent::Stopped(h1, h2, _) = event else {
            return;
        };
        let Some(tag1) = colliders.get(h1).and_then(|c| BodyTag::decode(c.user_data)) else {
            return;
        };
        let Some(tag2) = colliders.get(h2).and_then(|c| BodyTag::decode(c.user_data)) else {
            return;
        };

        match (tag1, tag2) {
            (BodyTag::Cookie(a), BodyTag::Cookie(b)) => {
                if self.clashes.try_send(CookieClash { a, b }).is_err() {
                    debug!("clash queue full, dropping event {a}/{b}");
                }
            }
            (BodyTag::Cookie(session), BodyTag::Food(food))
            | (BodyTag::Food(food), BodyTag::Cookie(session)) => {
                if self.bites.try_send(FoodBite { session, food }).is_err() {
                    debug!("bite queue full, dropping event {session}/{food}");
                }
            }
            // Wall contacts and anything untagged are not scoring events.
            _ => {}
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Scoring parameters shared by both processors.
#[derive(Debug, Clone, Copy)]
pub struct CollisionRules {
    /// A score below this after a clash ends the run.
    pub min_score: u64,
    /// Minimum pellet age before it can be eaten.
    pub maturation: Duration,
}

/// New scores after a cookie/cookie clash plus the mass spilled as food.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClashOutcome {
    pub score_a: u64,
    pub score_b: u64,
    pub spilled: u64,
}

/// The clash rule: both cookies lose a flat 10%, and the transferable mass
/// `diff = min(|a - b|, min(a, b))` is split between them in proportion to
/// the size ratio. Everything lost beyond the 10% decay comes back as
/// spilled pellets.
pub fn resolve_clash(score_a: u64, score_b: u64) -> ClashOutcome {
    let s1 = score_a as f64;
    let s2 = score_b as f64;

    let (ratio1, ratio2, diff) = if s1 > s2 {
        (s2 / s1, 1.0 - s2 / s1, (s1 - s2).min(s2))
    } else {
        (1.0 - s1 / s2, s1 / s2, (s2 - s1).min(s1))
    };

    let new1 = (s1 - 0.1 * s1 - diff * ratio1).max(0.0).floor() as u64;
    let new2 = (s2 - 0.1 * s2 - diff * ratio2).max(0.0).floor() as u64;

    ClashOutcome {
        score_a: new1,
        score_b: new2,
        spilled: diff.floor() as u64,
    }
}

/// Drain the cookie/cookie queue.
pub async fn process_clashes(
    mut events: mpsc::Receiver<CookieClash>,
    sessions: Arc<Sessions>,
    world: SharedWorld,
    rules: CollisionRules,
) {
    while let Some(clash) = events.recv().await {
        handle_clash(clash, &sessions, &world, &rules);
    }
}

fn handle_clash(clash: CookieClash, sessions: &Sessions, world: &SharedWorld, rules: &CollisionRules) {
    let (Ok(session_a), Ok(session_b)) = (sessions.get(clash.a), sessions.get(clash.b)) else {
        debug!("clash for unknown session {}/{}", clash.a, clash.b);
        return;
    };

    // A participant may have left the playing state between contact and
    // processing. That is a benign race, not an error.
    if !session_a.is_playing() || !session_b.is_playing() {
        debug!("clash with a cookie that is no longer playing");
        return;
    }

    let outcome = resolve_clash(session_a.score(), session_b.score());
    session_a.set_score(outcome.score_a);
    session_b.set_score(outcome.score_b);

    let mut world = world.lock();
    let (Some(pos_a), Some(pos_b)) = (
        world.cookie_position(clash.a),
        world.cookie_position(clash.b),
    ) else {
        return;
    };

    if outcome.spilled > 0 {
        world.queue_food_task(FoodSpawnTask {
            position: (pos_a + pos_b) / 2.0,
            count: outcome.spilled,
        });
    }

    for (id, score, session) in [
        (clash.a, outcome.score_a, &session_a),
        (clash.b, outcome.score_b, &session_b),
    ] {
        if score < rules.min_score {
            if let Err(err) = session.stop_playing() {
                debug!("stop playing after clash: {err}");
            }
            session.take_body();
            world.schedule_cookie_removal(id);
        } else {
            world.touch_cookie(id);
        }
    }
}

/// Drain the cookie/food queue.
pub async fn process_bites(
    mut events: mpsc::Receiver<FoodBite>,
    sessions: Arc<Sessions>,
    world: SharedWorld,
    rules: CollisionRules,
) {
    while let Some(bite) = events.recv().await {
        handle_bite(bite, &sessions, &world, &rules);
    }
}

fn handle_bite(bite: FoodBite, sessions: &Sessions, world: &SharedWorld, rules: &CollisionRules) {
    let session = match sessions.get(bite.session) {
        Ok(session) => session,
        Err(SessionError::NotFound) => {
            debug!("bite for unknown session {}", bite.session);
            return;
        }
        Err(_) => return,
    };

    if !session.is_playing() {
        debug!("bite by a cookie that is no longer playing");
        return;
    }

    // Immature pellets survive the contact untouched; the listener fires
    // once per contact end, so a later touch retries naturally.
    let eaten = {
        let mut world = world.lock();
        world.take_food_if_mature(bite.food, rules.maturation)
    };
    if let Some(score) = eaten {
        session.inc_score(score);
    }
}
