//! Transport-to-handler event dispatch.
//!
//! [`EventDispatcher`] is the [`EventSink`] a connection reports to. Each
//! raw [`TransportEvent`] updates the session and becomes at most one
//! [`SessionEvent`] per handler call:
//!
//! | Transport event | Session effect | Handler call |
//! |-----------------|----------------|--------------|
//! | `Opened` | `CONNECTED`, handle stored | `on_connect` |
//! | `Closed` | `CLOSED`, handle cleared | `on_disconnect` (once) |
//! | `Text` | - | `on_message` or `on_error` |
//! | `Pong` | - | `on_pong`, then `on_pong_timed` if correlated |
//! | `Error` | - | `on_error`, unless an expected close race |
//!
//! Every handler call runs inside `catch_unwind`; a panic is logged and
//! dropped.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error, info, trace};

use crate::error::Error;
use crate::protocol::{TimedPing, decode, monotonic_nanos};
use crate::transport::{EventSink, TransportEvent, TransportFault};

use super::Session;
use super::handler::{SessionEvent, deliver};

// ============================================================================
// EventDispatcher
// ============================================================================

/// Routes transport events for one session to its handler.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    session: Session,
}

impl EventDispatcher {
    /// Creates a dispatcher for `session`.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Returns the session this dispatcher serves.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Delivers one event to the currently installed handler.
    ///
    /// With no handler installed the event is dropped.
    pub fn emit(&self, event: SessionEvent) {
        let Some(handler) = self.session.handler_slot().get() else {
            trace!(
                session = %self.session,
                event = event.kind(),
                "No handler installed, event dropped"
            );
            return;
        };

        let kind = event.kind();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            deliver(handler.as_ref(), &self.session, event);
        }));

        if let Err(panic) = outcome {
            error!(
                session = %self.session,
                event = kind,
                panic = panic_message(panic.as_ref()),
                "Handler panicked"
            );
        }
    }

    fn on_text(&self, text: &str) {
        match decode(text) {
            Ok(message) => self.emit(SessionEvent::Message(message)),
            Err(e) => {
                debug!(session = %self.session, error = %e, "Inbound payload rejected");
                self.emit(SessionEvent::Error(Error::Decode(e)));
            }
        }
    }

    fn on_pong(&self, payload: Vec<u8>) {
        let now = monotonic_nanos();
        let rtt = TimedPing::correlate(&payload, self.session.ping_id()).map(|ping| ping.rtt(now));

        self.emit(SessionEvent::Pong(payload));

        if let Some(rtt) = rtt {
            trace!(session = %self.session, ?rtt, "Timed pong correlated");
            self.emit(SessionEvent::PongTimed(rtt));
        }
    }

    fn on_fault(&self, fault: TransportFault) {
        match fault {
            TransportFault::ExpectedCloseRace { detail } => {
                debug!(session = %self.session, %detail, "Suppressed close race");
            }
            TransportFault::Real(e) => self.emit(SessionEvent::Error(e)),
        }
    }
}

impl EventSink for EventDispatcher {
    fn deliver(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(handle) => {
                if self.session.mark_open(handle) {
                    info!(session = %self.session, "Session connected");
                    self.emit(SessionEvent::Connected);
                }
            }

            TransportEvent::Closed(close) => {
                if self.session.mark_closed() {
                    info!(
                        session = %self.session,
                        code = %close.code,
                        by_peer = close.by_peer,
                        "Session disconnected"
                    );
                    self.emit(SessionEvent::Disconnected(close));
                }
            }

            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Pong(payload) => self.on_pong(payload),
            TransportEvent::Error(fault) => self.on_fault(fault),
        }
    }
}

/// Extracts the message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic>"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use crate::error::Result;
    use crate::identifiers::PingId;
    use crate::protocol::{CloseCode, CloseInfo, CloseRequest, JsonObject};
    use crate::session::{Handler, SessionState};
    use crate::transport::TransportHandle;

    /// Transport handle that records outbound traffic.
    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl TransportHandle for MockTransport {
        fn send_text(&self, text: String) -> Result<()> {
            self.sent.lock().push(text);
            Ok(())
        }

        fn send_ping(&self, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }

        fn close(&self, _request: CloseRequest, _timeout: Option<Duration>) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    /// Handler that records every callback.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        panic_on_message: AtomicBool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Handler for Recorder {
        fn on_connect(&self, _session: &Session) {
            self.calls.lock().push("connect".into());
        }

        fn on_disconnect(&self, _session: &Session, close: &CloseInfo) {
            self.calls.lock().push(format!("disconnect:{}", close.code));
        }

        fn on_message(&self, _session: &Session, message: JsonObject) {
            if self.panic_on_message.swap(false, Ordering::SeqCst) {
                panic!("handler bug");
            }
            self.calls.lock().push(format!("message:{}", serde_json::Value::Object(message)));
        }

        fn on_pong(&self, _session: &Session, payload: &[u8]) {
            self.calls.lock().push(format!("pong:{}", payload.len()));
        }

        fn on_pong_timed(&self, _session: &Session, _rtt: Duration) {
            self.calls.lock().push("pong_timed".into());
        }

        fn on_error(&self, _session: &Session, error: &Error) {
            self.calls.lock().push(format!("error:decode={}", error.is_decode_error()));
        }
    }

    fn setup() -> (EventDispatcher, Arc<Recorder>, Arc<MockTransport>) {
        let session = Session::new();
        let recorder = Arc::new(Recorder::default());
        session.set_handler(recorder.clone());

        let dispatcher = EventDispatcher::new(session);
        let transport = Arc::new(MockTransport::default());
        dispatcher.session.force_connecting();
        dispatcher.deliver(TransportEvent::Opened(transport.clone()));
        (dispatcher, recorder, transport)
    }

    #[test]
    fn test_opened_connects_session() {
        let (dispatcher, recorder, transport) = setup();

        assert_eq!(dispatcher.session().state(), SessionState::Connected);
        assert!(dispatcher.session().is_connected());
        assert_eq!(recorder.calls(), ["connect"]);

        dispatcher.session().send(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(*transport.sent.lock(), ["{\"a\":1}"]);
    }

    #[test]
    fn test_valid_text_becomes_message() {
        let (dispatcher, recorder, _) = setup();
        dispatcher.deliver(TransportEvent::Text("{\"key\":\"value\"}".into()));
        assert_eq!(recorder.calls(), ["connect", "message:{\"key\":\"value\"}"]);
    }

    #[test]
    fn test_invalid_text_becomes_error() {
        let (dispatcher, recorder, _) = setup();
        dispatcher.deliver(TransportEvent::Text("{invalid{".into()));
        dispatcher.deliver(TransportEvent::Text(String::new()));
        assert_eq!(
            recorder.calls(),
            ["connect", "error:decode=true", "error:decode=true"]
        );
    }

    #[test]
    fn test_timed_pong_follows_plain_pong() {
        let (dispatcher, recorder, _) = setup();
        let ping = TimedPing::now(dispatcher.session().ping_id());

        dispatcher.deliver(TransportEvent::Pong(ping.encode().to_vec()));

        assert_eq!(recorder.calls(), ["connect", "pong:16", "pong_timed"]);
    }

    #[test]
    fn test_foreign_pong_is_untimed() {
        let (dispatcher, recorder, _) = setup();
        let own = dispatcher.session().ping_id().as_u64();
        let foreign = TimedPing::now(PingId::from_u64(own.wrapping_add(1)));

        dispatcher.deliver(TransportEvent::Pong(foreign.encode().to_vec()));
        dispatcher.deliver(TransportEvent::Pong(vec![1, 2, 3, 4]));

        assert_eq!(recorder.calls(), ["connect", "pong:16", "pong:4"]);
    }

    #[test]
    fn test_disconnect_fires_once() {
        let (dispatcher, recorder, transport) = setup();
        let close = CloseInfo {
            code: CloseCode::GoingAway,
            reason: String::new(),
            by_peer: true,
        };

        dispatcher.deliver(TransportEvent::Closed(close.clone()));
        dispatcher.deliver(TransportEvent::Closed(close));

        assert_eq!(recorder.calls(), ["connect", "disconnect:1001"]);
        assert_eq!(dispatcher.session().state(), SessionState::Closed);
        assert!(matches!(
            dispatcher.session().send(&serde_json::json!({})),
            Err(Error::NotConnected)
        ));
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_expected_close_race_suppressed() {
        let (dispatcher, recorder, _) = setup();
        dispatcher.deliver(TransportEvent::Error(TransportFault::classify(
            WsError::AlreadyClosed,
            true,
        )));
        assert_eq!(recorder.calls(), ["connect"]);
    }

    #[test]
    fn test_real_fault_surfaced() {
        let (dispatcher, recorder, _) = setup();
        let fault = TransportFault::classify(WsError::AttackAttempt, false);
        dispatcher.deliver(TransportEvent::Error(fault));
        assert_eq!(recorder.calls(), ["connect", "error:decode=false"]);
    }

    #[test]
    fn test_handler_panic_does_not_block_later_events() {
        let (dispatcher, recorder, _) = setup();
        recorder.panic_on_message.store(true, Ordering::SeqCst);

        dispatcher.deliver(TransportEvent::Text("{\"n\":1}".into()));
        dispatcher.deliver(TransportEvent::Text("{\"n\":2}".into()));

        assert_eq!(recorder.calls(), ["connect", "message:{\"n\":2}"]);
        assert!(dispatcher.session().is_connected());
    }

    #[test]
    fn test_no_handler_drops_events() {
        let (dispatcher, recorder, _) = setup();
        dispatcher.session().clear_handler();

        dispatcher.deliver(TransportEvent::Text("{\"n\":1}".into()));
        dispatcher.deliver(TransportEvent::Pong(vec![0]));

        assert_eq!(recorder.calls(), ["connect"]);
    }

    #[test]
    fn test_handler_swap_applies_to_next_event() {
        let (dispatcher, first, _) = setup();
        let second = Arc::new(Recorder::default());

        dispatcher.deliver(TransportEvent::Text("{\"n\":1}".into()));
        dispatcher.session().set_handler(second.clone());
        dispatcher.deliver(TransportEvent::Text("{\"n\":2}".into()));

        assert_eq!(first.calls(), ["connect", "message:{\"n\":1}"]);
        assert_eq!(second.calls(), ["message:{\"n\":2}"]);
    }

    #[test]
    fn test_open_after_disconnect_closes_transport() {
        let session = Session::new();
        let recorder = Arc::new(Recorder::default());
        session.set_handler(recorder.clone());
        session.force_connecting();
        session.disconnect().unwrap();

        let dispatcher = EventDispatcher::new(session);
        let transport = Arc::new(MockTransport::default());
        dispatcher.deliver(TransportEvent::Opened(transport.clone()));

        assert!(transport.closed.load(Ordering::SeqCst));
        assert!(!dispatcher.session().is_connected());
        assert!(recorder.calls().is_empty());

        dispatcher.deliver(TransportEvent::Closed(CloseInfo::abnormal()));
        assert!(recorder.calls().is_empty());
        assert_eq!(dispatcher.session().state(), SessionState::Closed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic>");
    }
}
