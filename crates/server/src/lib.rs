//! Cookie arena game server library.

pub mod broadcast;
pub mod collision;
pub mod config;
pub mod game;
pub mod session;
pub mod simulation;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use game::Game;
pub use session::{SessionError, SessionId};
