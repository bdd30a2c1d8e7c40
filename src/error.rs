//! Error types for JSON WebSocket sessions.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Synchronous operations return [`Result<T>`] which uses [`Error`].
//! Asynchronous faults (decode failures, transport faults) never surface
//! through a return value: they are delivered to
//! [`Handler::on_error`](crate::Handler::on_error) instead.
//!
//! ```ignore
//! use json_websocket::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.connect("ws://127.0.0.1:8080").await?;
//!     session.send(&serde_json::json!({"op": "hello"}))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Session | [`Error::NotConnected`], [`Error::InvalidState`], [`Error::QueueFull`] |
//! | Payload | [`Error::Decode`] |
//! | Transport | [`Error::Transport`], [`Error::WebSocket`], [`Error::Io`] |
//! | External | [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::session::SessionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// DecodeError
// ============================================================================

/// Inbound text frame could not be decoded into a JSON object.
///
/// Delivered through [`Handler::on_error`](crate::Handler::on_error) wrapped
/// in [`Error::Decode`]; the message is never silently dropped.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame was empty or whitespace only.
    #[error("Invalid JSON: empty string")]
    Empty,

    /// The frame was not well-formed JSON.
    #[error("Invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame was valid JSON but not an object.
    #[error("Invalid JSON: expected an object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when staged settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Opening handshake failed.
    ///
    /// Returned synchronously from `connect`; the session stays idle and
    /// may be connected again.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Opening handshake did not complete within the staged timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection was closed while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session has no open transport.
    #[error("Session is not connected")]
    NotConnected,

    /// Operation is not valid in the current session state.
    #[error("Invalid state for {operation}: session is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// The outbound frame queue is at its staged limit.
    #[error("Outbound queue full ({limit} frames)")]
    QueueFull {
        /// Configured queue limit.
        limit: usize,
    },

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// Inbound payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Fault on an open connection not attributable to a local close.
    ///
    /// Delivered to [`Handler::on_error`](crate::Handler::on_error).
    #[error("Transport error: {source}")]
    Transport {
        /// Framing-library error behind the fault.
        #[source]
        source: WsError,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates a queue full error.
    #[inline]
    pub fn queue_full(limit: usize) -> Self {
        Self::QueueFull { limit }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(source: WsError) -> Self {
        Self::Transport { source }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a decode error.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::Transport { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
