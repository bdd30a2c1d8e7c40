//! Session type and lifecycle operations.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::identifiers::{PingId, SessionId};
use crate::protocol::ping::{random_payload, validate_payload};
use crate::protocol::{CloseCode, CloseRequest, TimedPing, encode};
use crate::server::HandshakeInfo;
use crate::transport::{Connection, TransportHandle, connector};

use super::dispatcher::EventDispatcher;
use super::handler::{Handler, HandlerSlot};
use super::state::{SessionState, StateCell};

// ============================================================================
// Role
// ============================================================================

/// Which side of the connection a session is.
#[derive(Debug)]
enum Role {
    Client,
    Server {
        id: SessionId,
        remote_addr: SocketAddr,
        handshake: HandshakeInfo,
    },
}

// ============================================================================
// SessionInner
// ============================================================================

struct SessionInner {
    role: Role,
    state: StateCell,
    /// Set only between `Opened` and `Closed`.
    transport: RwLock<Option<Arc<dyn TransportHandle>>>,
    handler: Arc<HandlerSlot>,
    ping_id: PingId,
    settings: Arc<Settings>,
    connect_lock: AsyncMutex<()>,
    user_data: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    secure: AtomicBool,
    opened: AtomicBool,
    protocol: RwLock<Option<String>>,
}

// ============================================================================
// Session
// ============================================================================

/// One logical JSON-over-WebSocket connection.
///
/// A client session starts `IDLE` and is opened with
/// [`connect`](Session::connect). Server sessions are created by
/// [`Server`](crate::Server) for each accepted peer.
///
/// Cloning is cheap and every clone refers to the same session.
/// Dropping a session does not close it; call
/// [`disconnect`](Session::disconnect).
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use json_websocket::{Handler, JsonObject, Session};
///
/// struct Print;
///
/// impl Handler for Print {
///     fn on_message(&self, _session: &Session, message: JsonObject) {
///         println!("{message:?}");
///     }
/// }
///
/// # async fn example() -> json_websocket::Result<()> {
/// let session = Session::new();
/// session.set_handler(Arc::new(Print));
/// session.connect("ws://127.0.0.1:9000/").await?;
/// session.send(&serde_json::json!({ "hello": "world" }))?;
/// session.disconnect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

// ============================================================================
// Session - Constructors
// ============================================================================

impl Session {
    /// Creates an idle client session with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates an idle client session with staged settings.
    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        Self::build(
            Role::Client,
            SessionState::Idle,
            Arc::new(settings),
            Arc::new(HandlerSlot::default()),
        )
    }

    /// Creates a session for a peer the server accepted.
    pub(crate) fn accepted(
        id: SessionId,
        remote_addr: SocketAddr,
        handshake: HandshakeInfo,
        settings: Arc<Settings>,
        handler: Arc<HandlerSlot>,
    ) -> Self {
        let protocol = handshake.protocol.clone();
        let session = Self::build(
            Role::Server {
                id,
                remote_addr,
                handshake,
            },
            SessionState::Connected,
            settings,
            handler,
        );
        *session.inner.protocol.write() = protocol;
        session
    }

    fn build(
        role: Role,
        state: SessionState,
        settings: Arc<Settings>,
        handler: Arc<HandlerSlot>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                role,
                state: StateCell::new(state),
                transport: RwLock::new(None),
                handler,
                ping_id: PingId::random(),
                settings,
                connect_lock: AsyncMutex::new(()),
                user_data: RwLock::new(None),
                secure: AtomicBool::new(false),
                opened: AtomicBool::new(false),
                protocol: RwLock::new(None),
            }),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ConnectAttempt
// ============================================================================

/// Rolls an unfinished connect back from `CONNECTING` (or `CLOSING`) to `IDLE`.
struct ConnectAttempt<'a> {
    state: &'a StateCell,
    armed: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn new(state: &'a StateCell) -> Self {
        Self { state, armed: true }
    }

    /// The attempt reached a final state of its own.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.state.transition(
                &[SessionState::Connecting, SessionState::Closing],
                SessionState::Idle,
            );
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Opens the session against a `ws://` or `wss://` endpoint.
    ///
    /// Completes when the handshake succeeds, fails, or the staged
    /// connect timeout elapses. Concurrent calls on the same session are
    /// serialized. On failure the session stays `IDLE` and may be
    /// connected again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the session is not `IDLE`
    /// - [`Error::ConnectionTimeout`] if the connect timeout elapsed
    /// - [`Error::ConnectionClosed`] if [`disconnect`](Self::disconnect)
    ///   was called during the handshake
    /// - any handshake error from the transport
    pub async fn connect(&self, endpoint: &str) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;

        self.inner
            .state
            .transition(&[SessionState::Idle], SessionState::Connecting)
            .map_err(|state| Error::invalid_state("connect", state))?;

        // Returns the session to IDLE on failure or if this future is dropped.
        let mut attempt = ConnectAttempt::new(&self.inner.state);

        debug!(endpoint, "Connecting");

        let opened = match connector::open(endpoint, &self.inner.settings).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(endpoint, error = %e, "Connect failed");
                return Err(e);
            }
        };

        self.inner.secure.store(opened.secure, Ordering::Release);
        *self.inner.protocol.write() = opened.protocol;

        if self.inner.state.get() != SessionState::Connecting {
            debug!(endpoint, "Disconnect requested during handshake");
            self.inner.state.replace(SessionState::Closed);
            attempt.disarm();
            let mut stream = opened.stream;
            let _ = stream.close(None).await;
            return Err(Error::ConnectionClosed);
        }

        let sink = Arc::new(EventDispatcher::new(self.clone()));
        Connection::spawn(opened.stream, sink, self.inner.settings.frame_queue_size());
        attempt.disarm();

        if self.inner.opened.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Closes with normal closure (1000) and an empty reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] for a session that never connected.
    pub fn disconnect(&self) -> Result<()> {
        self.close(CloseRequest::normal(), None)
    }

    /// Closes with a close code and reason.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the reason exceeds 123 bytes
    /// - [`Error::NotConnected`] for a session that never connected
    pub fn disconnect_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.close(CloseRequest::new(code, reason)?, None)
    }

    /// Closes with a close code and reason, dropping the socket once
    /// `timeout` elapses even if the peer never completes the handshake.
    ///
    /// # Errors
    ///
    /// Same as [`disconnect_with`](Self::disconnect_with).
    pub fn disconnect_with_timeout(
        &self,
        code: CloseCode,
        reason: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.close(CloseRequest::new(code, reason)?, Some(timeout))
    }

    fn close(&self, request: CloseRequest, timeout: Option<Duration>) -> Result<()> {
        let transition = self.inner.state.transition(
            &[SessionState::Connecting, SessionState::Connected],
            SessionState::Closing,
        );

        match transition {
            Ok(SessionState::Connecting) => {
                debug!(session = %self, "Close requested before handshake completed");
                Ok(())
            }
            Ok(_) => {
                debug!(session = %self, code = %request.code, "Closing");
                if let Some(transport) = self.transport() {
                    transport.close(request, timeout);
                }
                Ok(())
            }
            Err(SessionState::Closing | SessionState::Closed) => Ok(()),
            Err(_) => Err(Error::NotConnected),
        }
    }
}

// ============================================================================
// Session - Messaging
// ============================================================================

impl Session {
    /// Encodes `value` as JSON and queues it as a text frame.
    ///
    /// Success means the frame was accepted for transmission while the
    /// connection was open, not that the peer received it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless the session is `CONNECTED`
    /// - [`Error::Json`] if `value` fails to serialize
    /// - [`Error::QueueFull`] if the staged frame queue is full
    pub fn send<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let transport = self.open_transport()?;
        let text = encode(value)?;
        transport.send_text(text)
    }

    /// Sends a ping with 4 random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is `CONNECTED`.
    pub fn ping(&self) -> Result<()> {
        self.open_transport()?.send_ping(random_payload())
    }

    /// Sends a ping with a caller-chosen payload.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the payload exceeds 125 bytes
    /// - [`Error::NotConnected`] unless the session is `CONNECTED`
    pub fn ping_with(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let payload = payload.into();
        validate_payload(&payload)?;
        self.open_transport()?.send_ping(payload)
    }

    /// Sends a timed ping.
    ///
    /// The matching pong produces [`Handler::on_pong_timed`] with the
    /// round-trip time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is `CONNECTED`.
    pub fn ping_timed(&self) -> Result<()> {
        let transport = self.open_transport()?;
        let ping = TimedPing::now(self.inner.ping_id);
        transport.send_ping(ping.encode().to_vec())
    }

    fn open_transport(&self) -> Result<Arc<dyn TransportHandle>> {
        if self.state() != SessionState::Connected {
            return Err(Error::NotConnected);
        }
        self.transport().ok_or(Error::NotConnected)
    }

    #[inline]
    fn transport(&self) -> Option<Arc<dyn TransportHandle>> {
        self.inner.transport.read().clone()
    }
}

// ============================================================================
// Session - Handler
// ============================================================================

impl Session {
    /// Installs the handler for subsequent events.
    ///
    /// Sessions accepted by a [`Server`](crate::Server) share one handler
    /// slot, so this replaces the handler for every session of that
    /// server.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        self.inner.handler.set(handler);
    }

    /// Removes the handler. Events are dropped until one is installed.
    pub fn clear_handler(&self) {
        self.inner.handler.clear();
    }

    #[inline]
    pub(crate) fn handler_slot(&self) -> &HandlerSlot {
        &self.inner.handler
    }
}

// ============================================================================
// Session - User Data
// ============================================================================

impl Session {
    /// Attaches an application value to the session.
    ///
    /// The value is never read by the crate and lives as long as the
    /// session.
    pub fn set_user_data<T>(&self, value: T)
    where
        T: Any + Send + Sync,
    {
        *self.inner.user_data.write() = Some(Arc::new(value));
    }

    /// Returns the attached value if it is a `T`.
    #[must_use]
    pub fn user_data<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let data = self.inner.user_data.read().clone()?;
        data.downcast::<T>().ok()
    }

    /// Removes the attached value.
    pub fn clear_user_data(&self) {
        *self.inner.user_data.write() = None;
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Returns `true` while the session is `CONNECTED`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Returns `true` if the transport runs over TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.secure.load(Ordering::Acquire)
    }

    /// Returns the server-assigned id, `None` for client sessions.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.inner.role {
            Role::Server { id, .. } => Some(*id),
            Role::Client => None,
        }
    }

    /// Returns the peer address captured at accept time.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.inner.role {
            Role::Server { remote_addr, .. } => Some(*remote_addr),
            Role::Client => None,
        }
    }

    /// Returns the client's opening request, for accepted sessions.
    #[inline]
    #[must_use]
    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        match &self.inner.role {
            Role::Server { handshake, .. } => Some(handshake),
            Role::Client => None,
        }
    }

    /// Returns the negotiated sub-protocol.
    #[must_use]
    pub fn protocol(&self) -> Option<String> {
        self.inner.protocol.read().clone()
    }

    /// Returns the id embedded in this session's timed pings.
    #[inline]
    #[must_use]
    pub fn ping_id(&self) -> PingId {
        self.inner.ping_id
    }

    /// Returns the settings this session was created with.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns `true` if both handles refer to the same session.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Session - Transport Callbacks
// ============================================================================

impl Session {
    /// Stores the transport handle and moves to `CONNECTED`.
    ///
    /// Returns `false` if a disconnect won the race; the handle is then
    /// closed instead.
    pub(crate) fn mark_open(&self, handle: Arc<dyn TransportHandle>) -> bool {
        *self.inner.transport.write() = Some(Arc::clone(&handle));

        let transition = self.inner.state.transition(
            &[SessionState::Connecting, SessionState::Connected],
            SessionState::Connected,
        );

        match transition {
            Ok(_) => {
                self.inner.opened.store(true, Ordering::Release);
                true
            }
            Err(state) => {
                debug!(session = %self, %state, "Transport opened after close was requested");
                self.inner.transport.write().take();
                handle.close(CloseRequest::normal(), None);
                false
            }
        }
    }

    /// Clears the transport handle and moves to `CLOSED`.
    ///
    /// Returns `true` only the first time, and only if the session had
    /// opened.
    pub(crate) fn mark_closed(&self) -> bool {
        let handle = self.inner.transport.write().take();
        let previous = self.inner.state.replace(SessionState::Closed);
        previous != SessionState::Closed && handle.is_some()
    }

    #[cfg(test)]
    pub(crate) fn force_connecting(&self) {
        self.inner.state.replace(SessionState::Connecting);
    }
}

// ============================================================================
// Formatting
// ============================================================================

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.role {
            Role::Server {
                id, remote_addr, ..
            } => write!(f, "#{id}@{remote_addr}"),
            Role::Client => write!(f, "client:{}", self.inner.ping_id),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("ping_id", &self.inner.ping_id)
            .field("secure", &self.is_secure())
            .field("handler", &self.inner.handler)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
