//! Message contract for the cookie arena server.
//!
//! This crate contains the payloads the game core pushes onto each session's
//! outbound queue. It is deliberately byte-agnostic: the transport layer
//! picks the codec (JSON, MessagePack, ...) and owns the socket framing.

mod messages;

pub use messages::{CookieInfo, FoodInfo, ServerMessage, StatsSnapshot, ViewportSnapshot};
