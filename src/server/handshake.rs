//! Opening request captured for accepted sessions.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

// ============================================================================
// HandshakeInfo
// ============================================================================

/// The client's opening request as seen by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Request path including the query string.
    pub path: String,
    /// Request headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Sub-protocol the server selected.
    pub protocol: Option<String>,
}

impl HandshakeInfo {
    /// Captures path and headers from an upgrade request.
    ///
    /// Header values that are not visible ASCII are skipped.
    #[must_use]
    pub(crate) fn from_request(request: &Request) -> Self {
        let path = request
            .uri()
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());

        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        Self {
            path,
            headers,
            protocol: None,
        }
    }

    /// Returns the first value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the sub-protocols the client offered, in order.
    #[must_use]
    pub fn offered_protocols(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(SEC_WEBSOCKET_PROTOCOL.as_str()))
            .flat_map(|(_, value)| value.split(','))
            .map(str::trim)
            .filter(|protocol| !protocol.is_empty())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
