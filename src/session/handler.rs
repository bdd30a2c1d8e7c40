//! Handler contract and typed session events.
//!
//! Application code implements [`Handler`], overriding only the callbacks
//! it cares about. The dispatcher turns every transport notification into
//! one [`SessionEvent`] and hands it to [`deliver`], the single place that
//! maps events onto handler calls.
//!
//! # Example
//!
//! ```
//! use json_websocket::{Handler, JsonObject, Session};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&self, session: &Session, message: JsonObject) {
//!         let _ = session.send(&message);
//!     }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::Error;
use crate::protocol::{CloseInfo, JsonObject};

use super::Session;

// ============================================================================
// Handler
// ============================================================================

/// Callbacks invoked for session events.
///
/// Every method has a no-op default except [`on_error`](Handler::on_error),
/// which logs at `warn`. Callbacks run on the connection's task; a panic
/// inside one is caught and logged, and later events are still delivered.
///
/// Callbacks may call back into the session (`send`, `ping`,
/// `disconnect`, `set_handler`) without deadlocking.
pub trait Handler: Send + Sync + 'static {
    /// The transport opened.
    fn on_connect(&self, _session: &Session) {}

    /// The transport closed. Called at most once per session.
    fn on_disconnect(&self, _session: &Session, _close: &CloseInfo) {}

    /// A text frame decoded to a JSON object.
    fn on_message(&self, _session: &Session, _message: JsonObject) {}

    /// A pong frame arrived.
    fn on_pong(&self, _session: &Session, _payload: &[u8]) {}

    /// A pong answered one of this session's timed pings.
    ///
    /// Always follows the [`on_pong`](Handler::on_pong) call for the same
    /// frame.
    fn on_pong_timed(&self, _session: &Session, _rtt: Duration) {}

    /// An inbound payload failed to decode or the transport faulted.
    fn on_error(&self, session: &Session, error: &Error) {
        warn!(session = %session, error = %error, "Unhandled session error");
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// A typed session event.
#[derive(Debug)]
pub enum SessionEvent {
    /// Transport opened.
    Connected,
    /// Transport closed.
    Disconnected(CloseInfo),
    /// Decoded inbound message.
    Message(JsonObject),
    /// Pong payload.
    Pong(Vec<u8>),
    /// Round-trip time of a correlated timed ping.
    PongTimed(Duration),
    /// Decode failure or transport fault.
    Error(Error),
}

impl SessionEvent {
    /// Short name for logging.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Disconnected(_) => "disconnect",
            Self::Message(_) => "message",
            Self::Pong(_) => "pong",
            Self::PongTimed(_) => "pong_timed",
            Self::Error(_) => "error",
        }
    }
}

/// Invokes the handler callback matching `event`.
pub fn deliver(handler: &dyn Handler, session: &Session, event: SessionEvent) {
    match event {
        SessionEvent::Connected => handler.on_connect(session),
        SessionEvent::Disconnected(close) => handler.on_disconnect(session, &close),
        SessionEvent::Message(message) => handler.on_message(session, message),
        SessionEvent::Pong(payload) => handler.on_pong(session, &payload),
        SessionEvent::PongTimed(rtt) => handler.on_pong_timed(session, rtt),
        SessionEvent::Error(error) => handler.on_error(session, &error),
    }
}

// ============================================================================
// HandlerSlot
// ============================================================================

/// Swappable handler reference.
///
/// Readers take an `Arc` snapshot, so a swap never tears a dispatch in
/// progress and takes effect on the next event.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl HandlerSlot {
    #[inline]
    pub(crate) fn set(&self, handler: Arc<dyn Handler>) {
        *self.handler.write() = Some(handler);
    }

    #[inline]
    pub(crate) fn clear(&self) {
        *self.handler.write() = None;
    }

    #[inline]
    pub(crate) fn get(&self) -> Option<Arc<dyn Handler>> {
        self.handler.read().clone()
    }
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("installed", &self.handler.read().is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::error::DecodeError;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Handler for Recorder {
        fn on_message(&self, _session: &Session, message: JsonObject) {
            self.calls.lock().push(format!("message:{}", message.len()));
        }

        fn on_error(&self, _session: &Session, error: &Error) {
            self.calls.lock().push(format!("error:{}", error.is_decode_error()));
        }
    }

    struct Quiet;
    impl Handler for Quiet {}

    #[test]
    fn test_deliver_routes_by_kind() {
        let session = Session::new();
        let recorder = Recorder::default();

        let mut message = JsonObject::new();
        message.insert("k".into(), 1.into());
        deliver(&recorder, &session, SessionEvent::Message(message));
        deliver(
            &recorder,
            &session,
            SessionEvent::Error(Error::Decode(DecodeError::Empty)),
        );
        // Not overridden: default no-op.
        deliver(&recorder, &session, SessionEvent::Pong(vec![1]));

        assert_eq!(*recorder.calls.lock(), ["message:1", "error:true"]);
    }

    #[test]
    fn test_default_callbacks_are_noops() {
        let session = Session::new();
        deliver(&Quiet, &session, SessionEvent::Connected);
        deliver(&Quiet, &session, SessionEvent::PongTimed(Duration::from_millis(3)));
        deliver(&Quiet, &session, SessionEvent::Error(Error::NotConnected));
    }

    #[test]
    fn test_slot_swap() {
        let slot = HandlerSlot::default();
        assert!(slot.get().is_none());

        slot.set(Arc::new(Quiet));
        let snapshot = slot.get();
        slot.clear();

        assert!(snapshot.is_some());
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(SessionEvent::Connected.kind(), "connect");
        assert_eq!(SessionEvent::PongTimed(Duration::ZERO).kind(), "pong_timed");
    }
}
