//! Wire-level pieces of the session protocol.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Payload |
//! |-------|-----------|---------|
//! | Text | both | one compact JSON object |
//! | Ping | both | random bytes, user bytes, or a 16-byte timed payload |
//! | Pong | both | echo of the ping payload |
//! | Close | both | close code + UTF-8 reason |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | JSON encode/decode for text frames |
//! | `close` | Close codes and close-frame parameters |
//! | `ping` | Ping payloads and RTT correlation |

// ============================================================================
// Submodules
// ============================================================================

/// JSON codec for text frames.
pub mod codec;

/// Close codes.
pub mod close;

/// Ping payloads.
pub mod ping;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::{CloseCode, CloseInfo, CloseRequest, MAX_CLOSE_REASON};
pub use codec::{JsonObject, decode, encode};
pub use ping::{MAX_CONTROL_PAYLOAD, TIMED_PING_LEN, TimedPing, monotonic_nanos};
