//! Server registry: accept loop and live session table.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{CloseCode, CloseRequest};
use crate::session::handler::HandlerSlot;
use crate::session::{EventDispatcher, Handler, Session};
use crate::transport::Connection;

use super::HandshakeInfo;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `shutdown` waits for peers to complete the closing handshake.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Server
// ============================================================================

/// WebSocket server that turns each accepted peer into a [`Session`].
///
/// Every session gets a fresh [`SessionId`] and shares the server's
/// handler slot, so [`set_handler`](Server::set_handler) takes effect on
/// the next event of every live session.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use json_websocket::{Handler, JsonObject, Server, Session};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn on_message(&self, session: &Session, message: JsonObject) {
///         let _ = session.send(&message);
///     }
/// }
///
/// # async fn example() -> json_websocket::Result<()> {
/// let server = Server::bind("127.0.0.1:0".parse().unwrap()).await?;
/// server.set_handler(Arc::new(Echo));
/// println!("listening on {}", server.ws_url());
/// # server.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    /// Address the listener is bound to.
    local_addr: SocketAddr,

    /// Settings applied to every accepted session.
    settings: Arc<Settings>,

    /// Handler shared by all sessions.
    handler: Arc<HandlerSlot>,

    /// Live sessions by id.
    sessions: RwLock<FxHashMap<SessionId, Session>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Binds with default settings and starts the accept loop.
    ///
    /// Use port 0 to let the OS assign a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        Self::bind_with_settings(addr, Settings::default()).await
    }

    /// Binds with staged settings and starts the accept loop.
    ///
    /// Only the sub-protocols, frame queue size and max payload size
    /// apply to the server side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_with_settings(addr: SocketAddr, settings: Settings) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            settings: Arc::new(settings),
            handler: Arc::new(HandlerSlot::default()),
            sessions: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        let server_clone = Arc::clone(&server);
        tokio::spawn(async move {
            server_clone.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "Server started");

        Ok(server)
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a `ws://` URL clients can connect to.
    ///
    /// An unspecified bind address is reported as loopback.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let ip = match self.local_addr.ip() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        format!("ws://{}", SocketAddr::new(ip, self.local_addr.port()))
    }

    /// Returns the settings applied to accepted sessions.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Installs the handler for every session, live and future.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        self.handler.set(handler);
    }

    /// Removes the handler. Events are dropped until one is installed.
    pub fn clear_handler(&self) {
        self.handler.clear();
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns a live session by id.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().get(&id).cloned()
    }

    /// Returns a snapshot of the live sessions, ordered by id.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(Session::session_id);
        sessions
    }

    /// Starts the closing handshake on every live session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the reason exceeds 123 bytes.
    pub fn close_all(&self, code: CloseCode, reason: &str) -> Result<()> {
        let request = CloseRequest::new(code, reason)?;
        self.close_sessions(&request, None);
        Ok(())
    }

    /// Stops accepting, closes every session with "going away" and waits
    /// briefly for them to finish.
    pub async fn shutdown(&self) {
        info!(addr = %self.local_addr, "Server shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        let request = CloseRequest {
            code: CloseCode::GoingAway,
            reason: String::new(),
        };
        self.close_sessions(&request, Some(SHUTDOWN_GRACE));

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.connection_count() > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }

        let remaining = self.connection_count();
        if remaining > 0 {
            warn!(remaining, "Sessions still open after shutdown grace period");
        }

        info!(addr = %self.local_addr, "Server shutdown complete");
    }

    fn close_sessions(&self, request: &CloseRequest, timeout: Option<Duration>) {
        for session in self.sessions() {
            let result = match timeout {
                Some(timeout) => {
                    session.disconnect_with_timeout(request.code, &request.reason, timeout)
                }
                None => session.disconnect_with(request.code, &request.reason),
            };
            if let Err(e) = result {
                debug!(session = %session, error = %e, "Session not closed");
            }
        }
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

impl Server {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, %addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one TCP connection and runs its session to completion.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "New TCP connection");
        stream.set_nodelay(true)?;

        let mut handshake = HandshakeInfo::default();
        let callback = |request: &Request,
                        mut response: Response|
         -> std::result::Result<Response, ErrorResponse> {
            handshake = HandshakeInfo::from_request(request);

            let offered = handshake.offered_protocols().join(",");
            let selected = self.settings.select_protocol(&offered).map(str::to_owned);

            if let Some(protocol) = selected
                && let Ok(value) = HeaderValue::from_str(&protocol)
            {
                response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                handshake.protocol = Some(protocol);
            }

            Ok(response)
        };

        let ws_stream =
            accept_hdr_async_with_config(stream, callback, Some(self.settings.websocket_config()))
                .await
                .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let id = SessionId::next();
        let session = Session::accepted(
            id,
            addr,
            handshake,
            Arc::clone(&self.settings),
            Arc::clone(&self.handler),
        );

        self.sessions.write().insert(id, session.clone());
        info!(session_id = %id, %addr, protocol = ?session.protocol(), "Session accepted");

        if self.shutdown.load(Ordering::SeqCst) {
            let _ = session.disconnect_with(CloseCode::GoingAway, "");
        }

        let sink = Arc::new(EventDispatcher::new(session));
        let task = Connection::spawn(ws_stream, sink, self.settings.frame_queue_size());

        if let Err(e) = task.await {
            error!(session_id = %id, error = %e, "Connection task failed");
        }

        self.sessions.write().remove(&id);
        debug!(session_id = %id, "Session removed from registry");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = Server::bind(loopback()).await.expect("bind should succeed");

        assert!(server.local_addr().port() > 0);
        assert_eq!(
            server.ws_url(),
            format!("ws://127.0.0.1:{}", server.local_addr().port())
        );
        assert_eq!(server.connection_count(), 0);
        assert!(server.sessions().is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unspecified_bind_reports_loopback() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let server = Server::bind(addr).await.expect("bind should succeed");
        assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_all_rejects_long_reason() {
        let server = Server::bind(loopback()).await.expect("bind should succeed");
        let reason = "x".repeat(124);
        assert!(matches!(
            server.close_all(CloseCode::Normal, &reason),
            Err(Error::InvalidArgument { .. })
        ));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_session_lookup() {
        let server = Server::bind(loopback()).await.expect("bind should succeed");
        let id = SessionId::next();
        assert!(server.session(id).is_none());
        server.shutdown().await;
    }
}
