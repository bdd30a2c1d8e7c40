//! Pre-connect configuration.
//!
//! Use [`Settings::builder()`] to stage protocols, headers, credentials,
//! limits, proxy and TLS before a session connects or a server binds.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `settings` | Settings bag and its builder |
//! | `proxy` | HTTP proxy configuration |
//! | `tls` | TLS configuration (feature `tls`) |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP proxy configuration.
pub mod proxy;

/// Settings bag and builder.
pub mod settings;

/// TLS configuration.
#[cfg(feature = "tls")]
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use proxy::ProxyConfig;
pub use settings::{Settings, SettingsBuilder, UserInfo};
#[cfg(feature = "tls")]
pub use tls::TlsConfig;
