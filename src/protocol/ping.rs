//! Ping payloads and round-trip-time correlation.
//!
//! A timed ping carries everything needed to compute the round trip, so no
//! pending-request table exists on either side:
//!
//! ```text
//! 0               8               16
//! +---------------+---------------+
//! |  ping id (BE) | sent ns (BE)  |
//! +---------------+---------------+
//! ```
//!
//! The timestamp is read from a process-local monotonic clock, so only the
//! session that sent the ping can interpret it. Replies are therefore safe
//! under reordering and duplication.

// ============================================================================
// Imports
// ============================================================================

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::identifiers::PingId;

// ============================================================================
// Constants
// ============================================================================

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Exact length of a timed ping payload.
pub const TIMED_PING_LEN: usize = 16;

/// Length of the payload generated by an argument-less ping.
pub const RANDOM_PING_LEN: usize = 4;

// ============================================================================
// Monotonic Clock
// ============================================================================

/// Origin of [`monotonic_nanos`].
static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed on the process monotonic clock.
#[must_use]
pub fn monotonic_nanos() -> u64 {
    let origin = CLOCK_ORIGIN.get_or_init(Instant::now);
    u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// Generates a random payload for an untimed ping.
#[must_use]
pub fn random_payload() -> Vec<u8> {
    rand::random::<[u8; RANDOM_PING_LEN]>().to_vec()
}

/// Checks a user-supplied ping payload against the control-frame limit.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the payload exceeds
/// [`MAX_CONTROL_PAYLOAD`] bytes.
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(Error::invalid_argument(format!(
            "ping payload is {} bytes, limit is {MAX_CONTROL_PAYLOAD}",
            payload.len()
        )));
    }
    Ok(())
}

// ============================================================================
// TimedPing
// ============================================================================

/// Decoded timed ping payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedPing {
    /// Session ping ID.
    pub ping_id: PingId,
    /// Monotonic send time in nanoseconds.
    pub sent_nanos: u64,
}

impl TimedPing {
    /// Stamps a timed ping with the current monotonic time.
    #[must_use]
    pub fn now(ping_id: PingId) -> Self {
        Self {
            ping_id,
            sent_nanos: monotonic_nanos(),
        }
    }

    /// Encodes the 16-byte big-endian payload.
    #[must_use]
    pub fn encode(&self) -> [u8; TIMED_PING_LEN] {
        let mut payload = [0u8; TIMED_PING_LEN];
        payload[..8].copy_from_slice(&self.ping_id.as_u64().to_be_bytes());
        payload[8..].copy_from_slice(&self.sent_nanos.to_be_bytes());
        payload
    }

    /// Correlates a pong payload with this session's ping ID.
    ///
    /// Returns `None` unless the payload is exactly 16 bytes and starts
    /// with `expected`.
    #[must_use]
    pub fn correlate(payload: &[u8], expected: PingId) -> Option<Self> {
        let payload: &[u8; TIMED_PING_LEN] = payload.try_into().ok()?;
        let (id, sent) = payload.split_at(8);

        let ping_id = u64::from_be_bytes(id.try_into().ok()?);
        if ping_id != expected.as_u64() {
            return None;
        }

        Some(Self {
            ping_id: expected,
            sent_nanos: u64::from_be_bytes(sent.try_into().ok()?),
        })
    }

    /// Round-trip time measured against `now_nanos`.
    ///
    /// Saturates at zero for timestamps from the future.
    #[inline]
    #[must_use]
    pub fn rtt(&self, now_nanos: u64) -> Duration {
        Duration::from_nanos(now_nanos.saturating_sub(self.sent_nanos))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_random_payload_length() {
        assert_eq!(random_payload().len(), RANDOM_PING_LEN);
    }

    #[test]
    fn test_validate_payload_limit() {
        assert!(validate_payload(&[0u8; MAX_CONTROL_PAYLOAD]).is_ok());
        assert!(validate_payload(&[0u8; MAX_CONTROL_PAYLOAD + 1]).is_err());
    }

    #[test]
    fn test_encode_layout_is_big_endian() {
        let ping = TimedPing {
            ping_id: PingId::from_u64(0x0102_0304_0506_0708),
            sent_nanos: 0x1112_1314_1516_1718,
        };
        assert_eq!(
            ping.encode(),
            [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x11, 0x12, 0x13, 0x14, 0x15,
                0x16, 0x17, 0x18
            ]
        );
    }

    #[test]
    fn test_correlate_own_ping() {
        let id = PingId::random();
        let ping = TimedPing::now(id);
        assert_eq!(TimedPing::correlate(&ping.encode(), id), Some(ping));
    }

    #[test]
    fn test_rtt_tracks_elapsed_time() {
        let ping = TimedPing::now(PingId::random());
        let started = Instant::now();
        std::thread::sleep(Duration::from_millis(20));
        let rtt = ping.rtt(monotonic_nanos());
        let elapsed = started.elapsed();

        assert!(rtt >= Duration::from_millis(20));
        assert!(rtt.abs_diff(elapsed) <= Duration::from_millis(1));
    }

    #[test]
    fn test_rtt_saturates() {
        let ping = TimedPing {
            ping_id: PingId::from_u64(1),
            sent_nanos: 500,
        };
        assert_eq!(ping.rtt(100), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_wrong_length_never_correlates(
            payload in prop::collection::vec(any::<u8>(), 0..=MAX_CONTROL_PAYLOAD)
                .prop_filter("not 16 bytes", |p| p.len() != TIMED_PING_LEN),
            id in any::<u64>(),
        ) {
            prop_assert!(TimedPing::correlate(&payload, PingId::from_u64(id)).is_none());
        }

        #[test]
        fn prop_foreign_id_never_correlates(
            ours in any::<u64>(),
            theirs in any::<u64>(),
            sent in any::<u64>(),
        ) {
            prop_assume!(ours != theirs);
            let ping = TimedPing { ping_id: PingId::from_u64(theirs), sent_nanos: sent };
            let payload = ping.encode();
            prop_assert!(TimedPing::correlate(&payload, PingId::from_u64(ours)).is_none());
        }
    }
}
