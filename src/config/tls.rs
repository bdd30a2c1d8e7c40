//! TLS configuration for `wss://` endpoints.
//!
//! Only available with the `tls` feature. Without a staged [`TlsConfig`],
//! secure endpoints use rustls with the bundled web PKI roots.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustls::ClientConfig;
use tokio_tungstenite::Connector;

// ============================================================================
// TlsConfig
// ============================================================================

/// Client TLS settings applied at connect time.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Wraps a rustls client configuration.
    #[must_use]
    pub fn new(client_config: ClientConfig) -> Self {
        Self {
            client_config: Arc::new(client_config),
        }
    }

    /// Wraps an already shared rustls client configuration.
    #[must_use]
    pub fn from_arc(client_config: Arc<ClientConfig>) -> Self {
        Self { client_config }
    }

    /// Returns the connector handed to the handshake.
    #[must_use]
    pub(crate) fn connector(&self) -> Connector {
        Connector::Rustls(Arc::clone(&self.client_config))
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("alpn_protocols", &self.client_config.alpn_protocols)
            .finish_non_exhaustive()
    }
}
