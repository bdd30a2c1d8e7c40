//! Type-safe identifiers for sessions and ping correlation.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// SessionId
// ============================================================================

/// Process-wide counter backing [`SessionId::next`].
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an accepted server-side session.
///
/// Always positive, allocated in increasing order and never reused for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(NonZeroU64);

impl SessionId {
    /// Allocates the next session ID.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a u64 does not wrap within a process lifetime.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Creates a session ID from a raw value.
    ///
    /// Returns `None` for zero.
    #[inline]
    #[must_use]
    pub fn from_u64(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PingId
// ============================================================================

/// Random per-session value stamped into timed pings.
///
/// Chosen once when the session is created. A pong is only treated as a
/// timed reply when its first eight bytes carry this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PingId(u64);

impl PingId {
    /// Generates a fresh random ping ID.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Creates a ping ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_session_id_is_positive_and_increasing() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(a.as_u64() > 0);
        assert!(b > a);
    }

    #[test]
    fn test_session_id_from_zero_is_none() {
        assert!(SessionId::from_u64(0).is_none());
        assert_eq!(SessionId::from_u64(7).map(|id| id.as_u64()), Some(7));
    }

    #[test]
    fn test_session_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..500).map(|_| SessionId::next()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread panicked") {
                assert!(seen.insert(id), "duplicate session id {id}");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }

    #[test]
    fn test_ping_id_display_is_hex() {
        let id = PingId::from_u64(0xdead_beef);
        assert_eq!(id.to_string(), "00000000deadbeef");
    }
}
