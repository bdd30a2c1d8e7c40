//! JSON WebSocket - JSON-message sessions over WebSocket.
//!
//! This library wraps a WebSocket connection in a [`Session`] that speaks
//! JSON objects, dispatches typed events to a user [`Handler`], and
//! measures round-trip time with timed pings.
//!
//! # Architecture
//!
//! The same session type serves both roles:
//!
//! - **Client**: [`Session::connect`] opens an outbound connection
//! - **Server**: [`Server`] accepts peers and registers one session each
//!
//! Key design principles:
//!
//! - Settings are staged with a builder and frozen before connect
//! - One tokio task per connection drives I/O and event delivery
//! - Handler callbacks are fault-isolated: a panic is logged, never fatal
//! - Timed pings carry their own timestamp, so no pending table is kept
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use json_websocket::{Handler, JsonObject, Result, Session, Settings};
//!
//! struct Client;
//!
//! impl Handler for Client {
//!     fn on_message(&self, _session: &Session, message: JsonObject) {
//!         println!("received {message:?}");
//!     }
//!
//!     fn on_pong_timed(&self, _session: &Session, rtt: Duration) {
//!         println!("rtt {rtt:?}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::builder()
//!         .protocol("chat.v1")
//!         .connect_timeout(Duration::from_secs(5))
//!         .build()?;
//!
//!     let session = Session::with_settings(settings);
//!     session.set_handler(Arc::new(Client));
//!     session.connect("ws://127.0.0.1:9000/").await?;
//!
//!     session.send(&serde_json::json!({ "type": "hello" }))?;
//!     session.ping_timed()?;
//!     session.disconnect()?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Settings staging, proxy, TLS |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session and ping ids |
//! | [`protocol`] | JSON codec, close codes, ping payloads |
//! | [`server`] | Accepting server and session registry |
//! | [`session`] | Session state machine, handler contract, dispatch |
//! | [`transport`] | WebSocket connection and client handshake (internal) |
//!
//! # Features
//!
//! - **`tls`**: `wss://` endpoints via rustls, plus [`TlsConfig`]

// ============================================================================
// Modules
// ============================================================================

/// Pre-connect configuration.
///
/// Use [`Settings::builder()`] to stage protocols, headers and limits.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire formats: JSON codec, close codes, ping payloads.
pub mod protocol;

/// Accepting server and session registry.
pub mod server;

/// Sessions, handlers and event dispatch.
pub mod session;

/// WebSocket transport layer.
///
/// Internal module driving the socket for each session.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration types
#[cfg(feature = "tls")]
pub use config::TlsConfig;
pub use config::{ProxyConfig, Settings, SettingsBuilder, UserInfo};

// Error types
pub use error::{DecodeError, Error, Result};

// Identifier types
pub use identifiers::{PingId, SessionId};

// Protocol types
pub use protocol::{CloseCode, CloseInfo, JsonObject};

// Server types
pub use server::{HandshakeInfo, Server};

// Session types
pub use session::{Handler, Session, SessionEvent, SessionState};
