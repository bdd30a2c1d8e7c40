//! Client-side opening handshake.
//!
//! Turns an endpoint URL plus staged [`Settings`] into an open WebSocket
//! stream. Optionally tunnels through an HTTP proxy with `CONNECT` first.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::config::{ProxyConfig, Settings};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on a proxy's `CONNECT` response head.
const MAX_PROXY_RESPONSE_HEAD: usize = 8 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Stream produced by the client handshake.
pub(crate) type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Result of a completed client handshake.
pub(crate) struct Opened {
    /// The open stream.
    pub stream: ClientStream,
    /// `true` for `wss://` endpoints.
    pub secure: bool,
    /// Sub-protocol the server accepted.
    pub protocol: Option<String>,
}

// ============================================================================
// Handshake
// ============================================================================

/// Performs the opening handshake against `endpoint`.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if the URL is not `ws://` or `wss://`
/// - [`Error::Config`] for `wss://` without the `tls` feature
/// - [`Error::ConnectionTimeout`] if the staged timeout elapses
/// - [`Error::Connection`] if the proxy refuses the tunnel
/// - [`Error::WebSocket`] / [`Error::Io`] for handshake failures
pub(crate) async fn open(endpoint: &str, settings: &Settings) -> Result<Opened> {
    let url = Url::parse(endpoint)?;
    let secure = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => {
            return Err(Error::invalid_argument(format!(
                "unsupported scheme '{other}', expected ws or wss"
            )));
        }
    };

    if secure && !cfg!(feature = "tls") {
        return Err(Error::config("wss:// endpoints require the `tls` feature"));
    }

    let request = build_request(endpoint, settings)?;

    let handshake = async {
        match settings.proxy() {
            Some(proxy) => {
                let tunnel = tunnel(proxy, &url).await?;
                handshake_over(request, tunnel, settings).await
            }
            None => handshake_direct(request, settings).await,
        }
    };

    let (stream, response) = match settings.connect_timeout() {
        Some(timeout) => tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| Error::connection_timeout(millis(timeout)))??,
        None => handshake.await?,
    };

    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    debug!(endpoint, secure, ?protocol, "WebSocket handshake completed");

    Ok(Opened {
        stream,
        secure,
        protocol,
    })
}

/// Builds the upgrade request with staged headers and credentials.
fn build_request(endpoint: &str, settings: &Settings) -> Result<Request> {
    let mut request = endpoint.into_client_request()?;
    let headers = request.headers_mut();

    for (name, value) in settings.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("header '{name}' value: {e}")))?;
        headers.insert(name, value);
    }

    if let Some(protocols) = settings.protocol_header() {
        let value = HeaderValue::from_str(&protocols)
            .map_err(|e| Error::config(format!("sub-protocols: {e}")))?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    if let Some(user_info) = settings.user_info() {
        if headers.contains_key(AUTHORIZATION) {
            warn!("Explicit Authorization header overrides staged user info");
        } else {
            let value = HeaderValue::from_str(&user_info.authorization())
                .map_err(|e| Error::config(format!("user info: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
    }

    Ok(request)
}

#[cfg(feature = "tls")]
async fn handshake_direct(
    request: Request,
    settings: &Settings,
) -> Result<(ClientStream, Response)> {
    let connector = settings.tls().map(crate::config::TlsConfig::connector);
    let opened = tokio_tungstenite::connect_async_tls_with_config(
        request,
        Some(settings.websocket_config()),
        true,
        connector,
    )
    .await?;
    Ok(opened)
}

#[cfg(not(feature = "tls"))]
async fn handshake_direct(
    request: Request,
    settings: &Settings,
) -> Result<(ClientStream, Response)> {
    let opened = tokio_tungstenite::connect_async_with_config(
        request,
        Some(settings.websocket_config()),
        true,
    )
    .await?;
    Ok(opened)
}

#[cfg(feature = "tls")]
async fn handshake_over(
    request: Request,
    stream: TcpStream,
    settings: &Settings,
) -> Result<(ClientStream, Response)> {
    let connector = settings.tls().map(crate::config::TlsConfig::connector);
    let opened = tokio_tungstenite::client_async_tls_with_config(
        request,
        stream,
        Some(settings.websocket_config()),
        connector,
    )
    .await?;
    Ok(opened)
}

#[cfg(not(feature = "tls"))]
async fn handshake_over(
    request: Request,
    stream: TcpStream,
    settings: &Settings,
) -> Result<(ClientStream, Response)> {
    let opened = tokio_tungstenite::client_async_with_config(
        request,
        MaybeTlsStream::Plain(stream),
        Some(settings.websocket_config()),
    )
    .await?;
    Ok(opened)
}

// ============================================================================
// Proxy Tunnel
// ============================================================================

/// Opens a `CONNECT` tunnel to the endpoint's host through `proxy`.
async fn tunnel(proxy: &ProxyConfig, url: &Url) -> Result<TcpStream> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_argument(format!("endpoint '{url}' has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::invalid_argument(format!("endpoint '{url}' has no port")))?;
    let target = format!("{host}:{port}");

    debug!(proxy = %proxy.addr(), %target, "Opening proxy tunnel");

    let mut stream = TcpStream::connect(proxy.addr()).await?;
    stream.set_nodelay(true)?;

    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(authorization) = proxy.authorization() {
        request.push_str("Proxy-Authorization: ");
        request.push_str(&authorization);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    let status = parse_status(&head)?;
    if !(200..300).contains(&status) {
        return Err(Error::connection(format!(
            "proxy {} refused tunnel to {target}: status {status}",
            proxy.addr()
        )));
    }

    Ok(stream)
}

/// Reads up to and including the blank line ending an HTTP response head.
///
/// Reads one byte at a time so nothing past the head is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(256);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_RESPONSE_HEAD {
            return Err(Error::connection("proxy response head too large"));
        }
        match stream.read_u8().await {
            Ok(byte) => head.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::connection("proxy closed the connection during CONNECT"));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(head)
}

/// Extracts the status code from an HTTP/1.x status line.
fn parse_status(head: &[u8]) -> Result<u16> {
    let text = String::from_utf8_lossy(head);
    let status_line = text.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse()
            .map_err(|_| Error::connection(format!("malformed proxy status line: {status_line}"))),
        _ => Err(Error::connection(format!(
            "malformed proxy status line: {status_line}"
        ))),
    }
}

#[inline]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
