//! Session lifecycle states.

/// What a connection is allowed to do at a given moment.
///
/// A session loops `Logged -> Playing -> Logged` every time its cookie is
/// spawned and later destroyed; removal from the store is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Fresh connection, no identity yet.
    #[default]
    NotLogged,
    /// Identified, no cookie in the world.
    Logged,
    /// Owns a live cookie body.
    Playing,
}

impl SessionState {
    #[inline]
    pub fn is_logged(self) -> bool {
        matches!(self, SessionState::Logged)
    }

    #[inline]
    pub fn is_playing(self) -> bool {
        matches!(self, SessionState::Playing)
    }

    /// Viewport snapshots only flow to sessions with a cookie on the field.
    #[inline]
    pub fn can_receive_viewport_updates(self) -> bool {
        matches!(self, SessionState::Playing)
    }
}
