//! Pre-connect settings staging.
//!
//! Provides a fluent API for staging everything a session needs before its
//! transport exists: sub-protocols, extra handshake headers, credentials,
//! queue and payload limits, connect timeout, proxy and TLS.
//!
//! [`SettingsBuilder::build`] validates and freezes the bag into
//! [`Settings`]. A session holds its settings behind an `Arc` and only ever
//! reads them, so they cannot change once connect starts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use json_websocket::Settings;
//!
//! # fn example() -> json_websocket::Result<()> {
//! let settings = Settings::builder()
//!     .protocol("chat.v2")
//!     .header("X-Client", "demo")
//!     .user_info("alice", "s3cret")
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! assert_eq!(settings.protocols(), ["chat.v2"]);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};

use super::proxy::ProxyConfig;
#[cfg(feature = "tls")]
use super::tls::TlsConfig;

// ============================================================================
// UserInfo
// ============================================================================

/// Credentials sent with the opening handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl UserInfo {
    /// Returns the `Authorization` header value.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Validated, immutable settings bag.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
    user_info: Option<UserInfo>,
    frame_queue_size: Option<usize>,
    max_payload_size: Option<usize>,
    connect_timeout: Option<Duration>,
    proxy: Option<ProxyConfig>,
    #[cfg(feature = "tls")]
    tls: Option<TlsConfig>,
}

impl Settings {
    /// Creates a new settings builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Requested sub-protocols, in insertion order.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Extra handshake headers, in insertion order.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Handshake credentials.
    #[inline]
    #[must_use]
    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    /// Outbound frame queue limit (`None` = unbounded).
    #[inline]
    #[must_use]
    pub fn frame_queue_size(&self) -> Option<usize> {
        self.frame_queue_size
    }

    /// Maximum inbound payload size (`None` = transport default).
    #[inline]
    #[must_use]
    pub fn max_payload_size(&self) -> Option<usize> {
        self.max_payload_size
    }

    /// Opening handshake timeout (`None` = wait indefinitely).
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Proxy to tunnel through.
    #[inline]
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// TLS settings for secure endpoints.
    #[cfg(feature = "tls")]
    #[inline]
    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Value for the `Sec-WebSocket-Protocol` request header.
    #[must_use]
    pub fn protocol_header(&self) -> Option<String> {
        if self.protocols.is_empty() {
            None
        } else {
            Some(self.protocols.join(", "))
        }
    }

    /// Picks the sub-protocol a server answers with.
    ///
    /// Returns the first protocol in the client's offer that this side also
    /// lists.
    #[must_use]
    pub fn select_protocol<'a>(&self, offered: &'a str) -> Option<&'a str> {
        offered
            .split(',')
            .map(str::trim)
            .find(|candidate| self.protocols.iter().any(|p| p == candidate))
    }

    /// Transport configuration derived from the staged limits.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(max) = self.max_payload_size {
            config = config.max_frame_size(Some(max)).max_message_size(Some(max));
        }
        config
    }
}

// ============================================================================
// SettingsBuilder
// ============================================================================

/// Builder for [`Settings`].
///
/// Use [`Settings::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Creates a new builder with nothing staged.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sub-protocol. Duplicates are kept.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.settings.protocols.push(protocol.into());
        self
    }

    /// Removes every occurrence of a sub-protocol.
    #[inline]
    #[must_use]
    pub fn remove_protocol(mut self, protocol: &str) -> Self {
        self.settings.protocols.retain(|p| p != protocol);
        self
    }

    /// Removes all sub-protocols.
    #[inline]
    #[must_use]
    pub fn clear_protocols(mut self) -> Self {
        self.settings.protocols.clear();
        self
    }

    /// Sets a handshake header.
    ///
    /// Header names compare case-insensitively; setting an existing name
    /// replaces its value in place.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();

        match self
            .settings
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.settings.headers.push((name, value)),
        }
        self
    }

    /// Removes a handshake header.
    #[inline]
    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.settings
            .headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self
    }

    /// Removes all handshake headers.
    #[inline]
    #[must_use]
    pub fn clear_headers(mut self) -> Self {
        self.settings.headers.clear();
        self
    }

    /// Sets handshake credentials.
    #[inline]
    #[must_use]
    pub fn user_info(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.user_info = Some(UserInfo {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Removes handshake credentials.
    #[inline]
    #[must_use]
    pub fn clear_user_info(mut self) -> Self {
        self.settings.user_info = None;
        self
    }

    /// Limits the number of outbound frames waiting to be written.
    #[inline]
    #[must_use]
    pub fn frame_queue_size(mut self, size: usize) -> Self {
        self.settings.frame_queue_size = Some(size);
        self
    }

    /// Limits the size of inbound frames and messages.
    #[inline]
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.settings.max_payload_size = Some(size);
        self
    }

    /// Sets the opening handshake timeout. Zero means no timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Tunnels the connection through a proxy.
    #[inline]
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.settings.proxy = Some(proxy);
        self
    }

    /// Connects directly, without a proxy.
    #[inline]
    #[must_use]
    pub fn clear_proxy(mut self) -> Self {
        self.settings.proxy = None;
        self
    }

    /// Sets TLS settings for secure endpoints.
    #[cfg(feature = "tls")]
    #[inline]
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.settings.tls = Some(tls);
        self
    }

    /// Validates and freezes the staged settings.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a protocol or header is not valid on the wire
    /// - [`Error::Config`] if a limit is zero
    pub fn build(self) -> Result<Settings> {
        self.validate_protocols()?;
        self.validate_headers()?;
        self.validate_limits()?;
        Ok(self.settings)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SettingsBuilder {
    fn validate_protocols(&self) -> Result<()> {
        for protocol in &self.settings.protocols {
            let valid = !protocol.is_empty()
                && protocol
                    .bytes()
                    .all(|b| b.is_ascii_graphic() && !matches!(b, b',' | b'"' | b';'));
            if !valid {
                return Err(Error::config(format!(
                    "Invalid sub-protocol name: {protocol:?}"
                )));
            }
        }
        Ok(())
    }

    fn validate_headers(&self) -> Result<()> {
        for (name, value) in &self.settings.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("Invalid header name: {name:?}")))?;
            HeaderValue::from_str(value)
                .map_err(|_| Error::config(format!("Invalid value for header {name}")))?;
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<()> {
        if self.settings.frame_queue_size == Some(0) {
            return Err(Error::config("Frame queue size must be greater than zero"));
        }
        if self.settings.max_payload_size == Some(0) {
            return Err(Error::config("Max payload size must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
