//! WebSocket connection and event loop.
//!
//! This module owns the socket once the opening handshake is done.
//!
//! # Event Loop
//!
//! [`Connection::spawn`] starts two tokio tasks over the split stream:
//!
//! | Task | Owns | Handles |
//! |------|------|---------|
//! | reader | read half | Incoming frames, forced-close deadline, write faults |
//! | writer | write half | Outgoing commands (text, ping, close) in order |
//!
//! A write that stalls on a peer that stopped reading never holds up the
//! reader, so the forced-close deadline always fires. When the reader ends
//! it stops the writer and drops both halves.
//!
//! The sink sees `Opened` first and `Closed` last, exactly once each.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{CloseInfo, CloseRequest};

use super::{EventSink, TransportEvent, TransportFault, TransportHandle};

// ============================================================================
// Constants
// ============================================================================

/// How long a finished reader waits for the writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Write half of a split WebSocket stream.
type WsWriter<S> = SplitSink<WebSocketStream<S>, Message>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the writer task.
enum ConnectionCommand {
    /// Write a text frame.
    Text(String),
    /// Write a ping frame.
    Ping(Vec<u8>),
    /// Write the close frame. Nothing is written after it.
    Close(CloseFrame),
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between handles and the connection tasks.
#[derive(Debug)]
struct Shared {
    /// Text frames queued but not yet written.
    queued: AtomicUsize,
    /// Set once a close was requested locally.
    closing: AtomicBool,
    /// Cleared when the event loop ends.
    open: AtomicBool,
    /// The local close request, reported when the connection ends.
    local_close: Mutex<Option<CloseRequest>>,
    /// Forced-close deadline, armed by [`TransportHandle::close`].
    deadline: watch::Sender<Option<Instant>>,
}

impl Shared {
    fn new(deadline: watch::Sender<Option<Instant>>) -> Self {
        Self {
            queued: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            open: AtomicBool::new(true),
            local_close: Mutex::new(None),
            deadline,
        }
    }

    /// Close info for the ending connection.
    fn close_info(&self) -> CloseInfo {
        match self.local_close.lock().take() {
            Some(request) => CloseInfo {
                code: request.code,
                reason: request.reason,
                by_peer: false,
            },
            None => CloseInfo::abnormal(),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a running connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. All operations are
/// non-blocking.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the writer task.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// State shared with the connection tasks.
    shared: Arc<Shared>,
    /// Maximum queued text frames.
    queue_limit: Option<usize>,
}

impl Connection {
    /// Takes over an open WebSocket stream.
    ///
    /// Delivers [`TransportEvent::Opened`] to `sink` before returning, then
    /// runs the event loop on a new task.
    pub(crate) fn spawn<S>(
        ws_stream: WebSocketStream<S>,
        sink: Arc<dyn EventSink>,
        queue_limit: Option<usize>,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (deadline_tx, deadline_rx) = watch::channel(None);
        let shared = Arc::new(Shared::new(deadline_tx));

        let connection = Self {
            command_tx,
            shared: Arc::clone(&shared),
            queue_limit,
        };

        sink.deliver(TransportEvent::Opened(Arc::new(connection)));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            deadline_rx,
            shared,
            sink,
        ))
    }

    /// Returns the number of text frames waiting to be written.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Reserves a slot in the outbound queue.
    fn reserve(&self) -> Result<()> {
        let previous = self.shared.queued.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.queue_limit
            && previous >= limit
        {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::queue_full(limit));
        }
        Ok(())
    }

    /// Event loop that reads frames and decides when the connection ends.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        mut deadline_rx: watch::Receiver<Option<Instant>>,
        shared: Arc<Shared>,
        sink: Arc<dyn EventSink>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_write, mut ws_read) = ws_stream.split();

        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let (finish_tx, finish_rx) = oneshot::channel();
        let mut writer = tokio::spawn(Self::run_writer(
            ws_write,
            command_rx,
            Arc::clone(&shared),
            fault_tx,
            finish_rx,
        ));

        let mut close_deadline: Option<Instant> = None;
        let mut forced = false;

        let close_info = loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Text frame received");
                            sink.deliver(TransportEvent::Text(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Pong(payload))) => {
                            trace!(len = payload.len(), "Pong received");
                            sink.deliver(TransportEvent::Pong(payload.to_vec()));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            if shared.closing.load(Ordering::Acquire) {
                                debug!("Closing handshake completed");
                                break shared.close_info();
                            }
                            debug!(frame = ?frame, "WebSocket closed by remote");
                            break CloseInfo::from_frame(frame.as_ref(), true);
                        }

                        Some(Err(e)) => {
                            let closing = shared.closing.load(Ordering::Acquire);
                            let fault = TransportFault::classify(e, closing);
                            sink.deliver(TransportEvent::Error(fault));
                            break shared.close_info();
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break shared.close_info();
                        }

                        // Ignore Binary, Ping, raw Frame
                        Some(Ok(_)) => {}
                    }
                }

                // Write failures from the writer task
                Some(e) = fault_rx.recv() => {
                    let closing = shared.closing.load(Ordering::Acquire);
                    let fault = TransportFault::classify(e, closing);
                    if !fault.is_expected() {
                        warn!("Frame write failed");
                    }
                    sink.deliver(TransportEvent::Error(fault));
                }

                // A local close armed the deadline
                Ok(()) = deadline_rx.changed() => {
                    close_deadline = *deadline_rx.borrow_and_update();
                }

                // Forced close once the peer had its chance
                () = async {
                    match close_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => pending().await,
                    }
                } => {
                    debug!("Close timeout elapsed, dropping socket");
                    forced = true;
                    break shared.close_info();
                }
            }
        };

        shared.open.store(false, Ordering::Release);

        // Let the writer flush a close reply unless the socket is being forced down.
        let _ = finish_tx.send(());
        if forced || timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            debug!("Aborting writer");
            writer.abort();
            let _ = writer.await;
        }
        drop(ws_read);

        debug!(code = %close_info.code, by_peer = close_info.by_peer, "Event loop terminated");
        sink.deliver(TransportEvent::Closed(close_info));
    }

    /// Writes queued commands in order until the close frame is out.
    ///
    /// Failures go to `fault_tx` and end the task. `finish_rx` tells the
    /// writer that the reader is done; it then flushes and closes the sink.
    async fn run_writer<S>(
        mut ws_write: WsWriter<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        shared: Arc<Shared>,
        fault_tx: mpsc::UnboundedSender<WsError>,
        mut finish_rx: oneshot::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let command = tokio::select! {
                biased;

                _ = &mut finish_rx => {
                    let _ = ws_write.close().await;
                    break;
                }

                command = command_rx.recv() => command,
            };

            let message = match command {
                Some(ConnectionCommand::Text(text)) => {
                    shared.queued.fetch_sub(1, Ordering::AcqRel);
                    trace!(len = text.len(), "Writing text frame");
                    Message::Text(text.into())
                }

                Some(ConnectionCommand::Ping(payload)) => {
                    trace!("Writing ping");
                    Message::Ping(payload.into())
                }

                Some(ConnectionCommand::Close(frame)) => Message::Close(Some(frame)),

                None => {
                    debug!("All connection handles dropped, closing");
                    let request = CloseRequest::normal();
                    let frame = request.to_frame();
                    if !shared.closing.swap(true, Ordering::AcqRel) {
                        *shared.local_close.lock() = Some(request);
                    }
                    Message::Close(Some(frame))
                }
            };

            let is_close = matches!(message, Message::Close(_));
            if let Err(e) = ws_write.send(message).await {
                let _ = fault_tx.send(e);
                break;
            }
            if is_close {
                trace!("Close frame sent");
                break;
            }
        }

        let dropped = command_rx.len();
        if dropped > 0 {
            debug!(dropped, "Discarded frames queued after close");
        }
    }
}

// ============================================================================
// TransportHandle
// ============================================================================

impl TransportHandle for Connection {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        self.reserve()?;

        self.command_tx
            .send(ConnectionCommand::Text(text))
            .map_err(|_| {
                self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                Error::ConnectionClosed
            })
    }

    fn send_ping(&self, payload: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(ConnectionCommand::Ping(payload))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self, request: CloseRequest, timeout: Option<Duration>) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            debug!("Close already requested");
            return;
        }

        debug!(code = %request.code, ?timeout, "Close requested");
        let frame = request.to_frame();
        *self.shared.local_close.lock() = Some(request);

        // Armed before the frame is queued so a stalled writer cannot delay it.
        if let Some(timeout) = timeout {
            self.shared.deadline.send_replace(Some(Instant::now() + timeout));
        }

        let _ = self.command_tx.send(ConnectionCommand::Close(frame));
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
            && !self.shared.closing.load(Ordering::Acquire)
            && !self.command_tx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{DuplexStream, duplex};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::protocol::CloseCode;

    /// Sink that forwards a summary of each event to a channel.
    struct ChannelSink {
        tx: mpsc::UnboundedSender<String>,
        handle: Mutex<Option<Arc<dyn TransportHandle>>>,
    }

    impl EventSink for ChannelSink {
        fn deliver(&self, event: TransportEvent) {
            let summary = match event {
                TransportEvent::Opened(handle) => {
                    *self.handle.lock() = Some(handle);
                    "opened".to_string()
                }
                TransportEvent::Closed(info) => format!("closed:{}:{}", info.code, info.by_peer),
                TransportEvent::Text(text) => format!("text:{text}"),
                TransportEvent::Pong(payload) => format!("pong:{payload:?}"),
                TransportEvent::Error(fault) => format!("error:{}", fault.is_expected()),
            };
            let _ = self.tx.send(summary);
        }
    }

    async fn spawn_local(
        buffer: usize,
        queue_limit: Option<usize>,
    ) -> (
        Arc<ChannelSink>,
        UnboundedReceiver<String>,
        WebSocketStream<DuplexStream>,
    ) {
        let (local, remote) = duplex(buffer);
        let local = WebSocketStream::from_raw_socket(local, Role::Server, None).await;
        let remote = WebSocketStream::from_raw_socket(remote, Role::Client, None).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            tx,
            handle: Mutex::new(None),
        });
        Connection::spawn(local, sink.clone(), queue_limit);
        (sink, rx, remote)
    }

    async fn pair() -> (
        Arc<ChannelSink>,
        UnboundedReceiver<String>,
        WebSocketStream<DuplexStream>,
    ) {
        spawn_local(64 * 1024, Some(2)).await
    }

    fn handle(sink: &ChannelSink) -> Arc<dyn TransportHandle> {
        sink.handle.lock().clone().expect("opened delivered")
    }

    #[tokio::test]
    async fn test_opened_delivered_first() {
        let (sink, mut rx, _remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));
        assert!(handle(&sink).is_open());
    }

    #[tokio::test]
    async fn test_text_both_directions() {
        let (sink, mut rx, mut remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        remote.send(Message::Text("{\"a\":1}".into())).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("text:{\"a\":1}"));

        handle(&sink).send_text("hello".to_string()).unwrap();
        match remote.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (sink, mut rx, mut remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        handle(&sink).send_ping(vec![1, 2, 3]).unwrap();
        // Reading on the remote side lets it answer the ping.
        let reader = tokio::spawn(async move { while remote.next().await.is_some() {} });

        assert_eq!(rx.recv().await.as_deref(), Some("pong:[1, 2, 3]"));
        reader.abort();
    }

    #[tokio::test]
    async fn test_peer_close_reports_code() {
        let (_sink, mut rx, mut remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        let request = CloseRequest::new(CloseCode::GoingAway, "bye").unwrap();
        remote.close(Some(request.to_frame())).await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("closed:1001:true"));
    }

    #[tokio::test]
    async fn test_local_close_completes_handshake() {
        let (sink, mut rx, mut remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        let handle = handle(&sink);
        handle.close(CloseRequest::normal(), None);
        assert!(!handle.is_open());
        assert!(matches!(
            handle.send_text("late".to_string()),
            Err(Error::ConnectionClosed)
        ));

        // Remote reads the close frame and replies automatically.
        while remote.next().await.is_some() {}

        assert_eq!(rx.recv().await.as_deref(), Some("closed:1000:false"));
    }

    #[tokio::test]
    async fn test_forced_close_after_timeout() {
        let (sink, mut rx, _remote) = pair().await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        // The remote never reads, so it never answers the close frame.
        handle(&sink).close(CloseRequest::normal(), Some(Duration::from_millis(50)));

        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("forced close");
        assert_eq!(closed.as_deref(), Some("closed:1000:false"));
    }

    #[tokio::test]
    async fn test_forced_close_with_write_stuck_on_full_buffer() {
        let (sink, mut rx, _remote) = spawn_local(1024, None).await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        // Far larger than the pipe; the remote never drains it.
        let handle = handle(&sink);
        handle.send_text("x".repeat(64 * 1024)).unwrap();
        handle.close(CloseRequest::normal(), Some(Duration::from_millis(100)));

        let closed = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("deadline fires while the write is pending");
        assert_eq!(closed.as_deref(), Some("closed:1000:false"));
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_reads_continue_while_write_is_pending() {
        let (sink, mut rx, mut remote) = spawn_local(1024, None).await;
        assert_eq!(rx.recv().await.as_deref(), Some("opened"));

        handle(&sink).send_text("y".repeat(64 * 1024)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        remote.send(Message::Text("{\"b\":2}".into())).await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("inbound frame not held up by the pending write");
        assert_eq!(text.as_deref(), Some("text:{\"b\":2}"));
    }

    #[test]
    fn test_queue_limit_rejects_excess_frames() {
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let (deadline_tx, _deadline_rx) = watch::channel(None);
        let connection = Connection {
            command_tx,
            shared: Arc::new(Shared::new(deadline_tx)),
            queue_limit: Some(2),
        };

        connection.send_text("1".into()).unwrap();
        connection.send_text("2".into()).unwrap();
        assert!(matches!(
            connection.send_text("3".into()),
            Err(Error::QueueFull { limit: 2 })
        ));
        assert_eq!(connection.queued(), 2);
    }

    #[test]
    fn test_close_arms_deadline() {
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let (deadline_tx, deadline_rx) = watch::channel(None);
        let connection = Connection {
            command_tx,
            shared: Arc::new(Shared::new(deadline_tx)),
            queue_limit: None,
        };

        connection.close(CloseRequest::normal(), Some(Duration::from_secs(5)));
        assert!(deadline_rx.has_changed().unwrap());
        assert!(deadline_rx.borrow().is_some());
        assert!(!connection.is_open());
    }
}
