//! Outbound message payloads.
//!
//! Field tags stay short (`ID`, `SC`, `X`, ...) because viewport snapshots
//! dominate the traffic and browser clients parse them every frame.

use serde::{Deserialize, Serialize};

/// A cookie visible inside a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CookieInfo {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "SC")]
    pub score: u64,
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
}

/// A food pellet visible inside a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodInfo {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "SC")]
    pub score: u64,
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
}

/// Everything overlapping one session's declared viewport. A full snapshot,
/// not a delta.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportSnapshot {
    #[serde(rename = "C")]
    pub cookies: Vec<CookieInfo>,
    #[serde(rename = "F")]
    pub food: Vec<FoodInfo>,
}

/// Coarse world statistics, broadcast to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(rename = "FC")]
    pub food_count: u64,
    #[serde(rename = "SC")]
    pub session_count: u64,
}

/// Envelope for everything the server pushes to a session's outbound queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ServerMessage {
    #[serde(rename = "viewport")]
    Viewport(ViewportSnapshot),
    #[serde(rename = "stats")]
    Stats(StatsSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_snapshot_round_trip() {
        let msg = ServerMessage::Viewport(ViewportSnapshot {
            cookies: vec![CookieInfo {
                id: 7,
                score: 100,
                x: 1.0 / 3.0,
                y: 2.0 / 3.0,
            }],
            food: vec![FoodInfo {
                id: 9,
                score: 1,
                x: 3.0,
                y: 4.0,
            }],
        });

        let data = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&data).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn stats_round_trip_keeps_short_tags() {
        let msg = ServerMessage::Stats(StatsSnapshot {
            food_count: 10_000,
            session_count: 3,
        });

        let data = serde_json::to_string(&msg).unwrap();
        assert!(data.contains("\"FC\":10000"));
        let back: ServerMessage = serde_json::from_str(&data).unwrap();
        assert_eq!(msg, back);
    }
}
