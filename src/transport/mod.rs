//! WebSocket transport layer.
//!
//! This module is the seam between sessions and the framing library. A
//! session only sees two narrow interfaces:
//!
//! - [`TransportHandle`]: outbound operations on an open connection
//! - [`EventSink`]: where the connection delivers raw inbound events
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  send_text / send_ping / close   ┌──────────────────┐
//! │   Session    │─────────────────────────────────►│    Connection    │
//! │              │                                  │   (event loop)   │
//! │  Dispatcher  │◄─────────────────────────────────│  tokio-tungstenite│
//! └──────────────┘  Opened/Closed/Text/Pong/Error   └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `connector::open` (client) or the server's accept task completes the handshake
//! 2. `Connection::spawn` delivers [`TransportEvent::Opened`] and starts the event loop
//! 3. The loop delivers text, pong and error events in arrival order
//! 4. The loop delivers [`TransportEvent::Closed`] exactly once when it ends
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle and event loop |
//! | `connector` | Client handshake, proxy tunnelling |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and event loop.
pub mod connection;

/// Client-side handshake.
pub mod connector;

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;

use crate::error::{Error, Result};
use crate::protocol::{CloseInfo, CloseRequest};

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;

// ============================================================================
// TransportHandle
// ============================================================================

/// Outbound operations on an open connection.
///
/// All methods are non-blocking: frames are queued and written by the
/// connection's own task. Success means the frame was accepted for
/// transmission, not that the peer received it.
pub trait TransportHandle: Send + Sync {
    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closing or closed
    /// - [`Error::QueueFull`] if the outbound queue is at its limit
    fn send_text(&self, text: String) -> Result<()>;

    /// Queues a ping control frame. Control frames bypass the queue limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closing or closed.
    fn send_ping(&self, payload: Vec<u8>) -> Result<()>;

    /// Starts the closing handshake.
    ///
    /// With a `timeout`, the socket is torn down once it elapses even if
    /// the peer never answers. Repeated calls are ignored.
    fn close(&self, request: CloseRequest, timeout: Option<Duration>);

    /// Returns `true` while frames can still be queued.
    fn is_open(&self) -> bool;
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Raw notification from a connection.
pub enum TransportEvent {
    /// The connection is open; carries the handle for outbound traffic.
    Opened(Arc<dyn TransportHandle>),
    /// The connection ended. Delivered exactly once, last.
    Closed(CloseInfo),
    /// A text frame arrived.
    Text(String),
    /// A pong control frame arrived.
    Pong(Vec<u8>),
    /// The socket reported a fault.
    Error(TransportFault),
}

/// Receiver of [`TransportEvent`]s.
///
/// Called from the connection's task, one event at a time.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn deliver(&self, event: TransportEvent);
}

// ============================================================================
// TransportFault
// ============================================================================

/// Classified socket fault.
#[derive(Debug)]
pub enum TransportFault {
    /// An I/O failure caused only by a close already in progress.
    ///
    /// Not an application-visible fault.
    ExpectedCloseRace {
        /// Description for diagnostics.
        detail: String,
    },
    /// Any other fault.
    Real(Error),
}

impl TransportFault {
    /// Classifies a framing-library error.
    ///
    /// `closing` is `true` when a local close was already requested.
    #[must_use]
    pub fn classify(err: WsError, closing: bool) -> Self {
        let expected = match &err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => true,
            WsError::Io(io) => {
                closing
                    && matches!(
                        io.kind(),
                        ErrorKind::BrokenPipe
                            | ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::NotConnected
                            | ErrorKind::UnexpectedEof
                    )
            }
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => closing,
            _ => false,
        };

        if expected {
            Self::ExpectedCloseRace {
                detail: err.to_string(),
            }
        } else {
            Self::Real(Error::transport(err))
        }
    }

    /// Returns `true` for an expected close race.
    #[inline]
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::ExpectedCloseRace { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Error as IoError;

    #[test]
    fn test_already_closed_is_expected() {
        assert!(TransportFault::classify(WsError::AlreadyClosed, false).is_expected());
        assert!(TransportFault::classify(WsError::ConnectionClosed, false).is_expected());
    }

    #[test]
    fn test_reset_is_expected_only_while_closing() {
        let reset = || WsError::Io(IoError::new(ErrorKind::ConnectionReset, "reset"));
        assert!(TransportFault::classify(reset(), true).is_expected());
        assert!(!TransportFault::classify(reset(), false).is_expected());
    }

    #[test]
    fn test_missing_close_handshake_is_expected_only_while_closing() {
        let reset = || WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake);
        assert!(TransportFault::classify(reset(), true).is_expected());
        assert!(!TransportFault::classify(reset(), false).is_expected());
    }

    #[test]
    fn test_other_errors_are_real() {
        let err = WsError::Io(IoError::new(ErrorKind::PermissionDenied, "denied"));
        let fault = TransportFault::classify(err, true);
        assert!(matches!(fault, TransportFault::Real(Error::Transport { .. })));
    }
}
