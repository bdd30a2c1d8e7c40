//! Server side: accepted sessions and their registry.
//!
//! # Connection Flow
//!
//! 1. [`Server::bind`] binds a listener and starts the accept loop
//! 2. Each TCP peer is upgraded; its opening request becomes a [`HandshakeInfo`]
//! 3. A [`Session`](crate::Session) with a fresh id is registered and opened
//! 4. When the connection ends the session leaves the registry
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handshake` | Captured opening request |
//! | `registry` | [`Server`] and the accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Captured opening request.
pub mod handshake;

/// Accept loop and session table.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use handshake::HandshakeInfo;
pub use registry::Server;
