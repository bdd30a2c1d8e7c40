//! Session state machine, handler contract and event dispatch.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Session`] and its lifecycle operations |
//! | `state` | [`SessionState`] |
//! | `handler` | [`Handler`] trait and [`SessionEvent`] |
//! | `dispatcher` | [`EventDispatcher`] |

// ============================================================================
// Submodules
// ============================================================================

/// Session type.
mod core;

/// Transport-to-handler dispatch.
pub mod dispatcher;

/// Handler contract.
pub mod handler;

/// Lifecycle state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::Session;
pub use dispatcher::EventDispatcher;
pub use handler::{Handler, SessionEvent, deliver};
pub use state::SessionState;
