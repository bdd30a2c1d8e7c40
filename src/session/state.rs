//! Session lifecycle state.
//!
//! ```text
//! Idle ──connect──► Connecting ──handshake ok──► Connected
//!  ▲                    │                            │
//!  └──handshake failed──┘                        disconnect
//!                       │                            ▼
//!                       └──disconnect──────────► Closing ──► Closed
//! ```
//!
//! Any state may move straight to `Closed` when the transport ends.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Not connected, may connect.
    Idle = 0,
    /// Opening handshake in progress.
    Connecting = 1,
    /// Transport open.
    Connected = 2,
    /// Close requested, waiting for the transport to end.
    Closing = 3,
    /// Transport ended. Terminal for a given transport.
    Closed = 4,
}

impl SessionState {
    /// Returns `true` while the transport is open.
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Connected
    }

    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateCell
// ============================================================================

/// Atomic holder for a [`SessionState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `to` if the current state is one of `from`.
    ///
    /// Returns the state observed before the attempt; the move happened
    /// iff that state is in `from`.
    pub(crate) fn transition(
        &self,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<SessionState, SessionState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let observed = SessionState::from_u8(current);
            if !from.contains(&observed) {
                return Err(observed);
            }
            match self
                .0
                .compare_exchange_weak(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(observed),
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditionally stores `state`, returning the previous one.
    pub(crate) fn replace(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use SessionState::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Idle.to_string(), "IDLE");
        assert_eq!(Connected.to_string(), "CONNECTED");
        assert_eq!(Closed.to_string(), "CLOSED");
    }

    #[test]
    fn test_transition_from_allowed_state() {
        let cell = StateCell::new(Idle);
        assert_eq!(cell.transition(&[Idle], Connecting), Ok(Idle));
        assert_eq!(cell.get(), Connecting);
    }

    #[test]
    fn test_transition_rejected() {
        let cell = StateCell::new(Closed);
        assert_eq!(cell.transition(&[Connected, Closing], Closed), Err(Closed));
        assert_eq!(cell.get(), Closed);
    }

    #[test]
    fn test_only_one_thread_wins_close() {
        let cell = std::sync::Arc::new(StateCell::new(Connected));
        let winners: usize = (0..8)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || cell.transition(&[Connected, Closing], Closed).is_ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_replace_returns_previous() {
        let cell = StateCell::new(Closed);
        assert_eq!(cell.replace(Idle), Closed);
        assert!(!cell.get().is_open());
    }
}
