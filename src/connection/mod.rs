//! Persistent connection to the sidecar worker.
//!
//! One background task owns the socket for its whole life. It dials with
//! fixed-interval retry, then pumps the connected socket, batching
//! outbound frames and dispatching inbound events; when the socket dies
//! it fails every pending call over to its waiting caller and redials. A
//! reader task per socket generation feeds decoded headers back through
//! the demultiplexer: events queue to the connection task, while responses
//! resolve their callers directly off the correlation table.
//!
//! Callers interact only with [`send_request`](Connection::send_request),
//! which fails fast when the bounded outbound queue is full instead of
//! blocking the caller behind a slow socket.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtmlinkError};
use crate::protocol::{encode_frame, FrameBuffer, Header, HeaderCodec};

mod pending;

pub use pending::PendingTable;

/// Capacity of the outbound request queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 4096;

/// Capacity of the inbound event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Upper bound on buffered, unread connection errors.
const ERROR_QUEUE_CAPACITY: usize = 10;

/// Cumulative content bytes written before a batch is cut off and flushed.
pub const FLUSH_THRESHOLD: usize = 1024 * 1024;

/// Pause between failed dial attempts.
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Per-attempt dial timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Lifecycle of a connection. Transitions only move forward, each guarded
/// by an atomic exchange, so repeated starts and stops collapse to no-ops
/// and a stopped connection can never restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Lifecycle {
    NotStarted = 0,
    Started = 1,
    Stopped = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Started,
            _ => Self::Stopped,
        }
    }
}

/// Receives inbound event headers on the connection task.
///
/// Dispatch runs inline between socket reads, so implementations should
/// hand heavy work off rather than block. A returned error is treated as
/// unrecoverable for the current socket: the connection tears down and
/// redials.
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, header: Header) -> Result<()>;
}

/// Pieces handed to the connection task on start.
struct Startup {
    req_rx: mpsc::Receiver<Header>,
    codec: Arc<dyn HeaderCodec>,
    sink: Arc<dyn EventSink>,
}

/// A reconnecting connection to the worker socket.
pub struct Connection {
    endpoint: String,
    req_tx: mpsc::Sender<Header>,
    pending: Arc<PendingTable>,
    sequence: AtomicI64,
    state: AtomicU8,
    cancel: CancellationToken,
    err_tx: mpsc::Sender<RtmlinkError>,
    err_rx: Mutex<Option<mpsc::Receiver<RtmlinkError>>>,
    startup: Mutex<Option<Startup>>,
}

impl Connection {
    /// Create a connection to `endpoint`. Nothing touches the network
    /// until [`start`](Connection::start).
    ///
    /// The connection's tasks wind down when `parent` is cancelled or
    /// [`stop`](Connection::stop) is called.
    pub fn new(
        endpoint: impl Into<String>,
        codec: Arc<dyn HeaderCodec>,
        sink: Arc<dyn EventSink>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (req_tx, req_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);
        Arc::new(Self {
            endpoint: endpoint.into(),
            req_tx,
            pending: Arc::new(PendingTable::new()),
            sequence: AtomicI64::new(0),
            state: AtomicU8::new(Lifecycle::NotStarted as u8),
            cancel: parent.child_token(),
            err_tx,
            err_rx: Mutex::new(Some(err_rx)),
            startup: Mutex::new(Some(Startup { req_rx, codec, sink })),
        })
    }

    /// Launch the connection task. The first call wins; later calls, and
    /// any call after [`stop`](Connection::stop), do nothing.
    pub fn start(self: &Arc<Self>) {
        let transitioned = self.state.compare_exchange(
            Lifecycle::NotStarted as u8,
            Lifecycle::Started as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if transitioned.is_err() {
            tracing::debug!(endpoint = %self.endpoint, "connection already started or stopped");
            return;
        }
        if let Some(startup) = self.startup.lock().take() {
            let conn = Arc::clone(self);
            tokio::spawn(conn.run(startup));
        }
    }

    /// Stop the connection for good. In-flight calls resolve as
    /// disconnected through the teardown sweep.
    pub fn stop(&self) {
        let previous = self.state.swap(Lifecycle::Stopped as u8, Ordering::AcqRel);
        if previous != Lifecycle::Stopped as u8 {
            tracing::debug!(endpoint = %self.endpoint, "stopping connection");
        }
        self.cancel.cancel();
    }

    #[inline]
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue `header` for transmission, assigning it the next sequence id.
    ///
    /// When `reply` is given, the caller is registered for the response
    /// before the request can possibly reach the socket, so even an
    /// instant response finds its waiter. `None` sends a fire-and-forget
    /// notification.
    ///
    /// Fails fast with [`RtmlinkError::QueueFull`] when the outbound queue
    /// is at capacity; the registration is rolled back and nothing was
    /// sent.
    pub fn send_request(
        &self,
        mut header: Header,
        reply: Option<oneshot::Sender<Header>>,
    ) -> Result<()> {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(RtmlinkError::Closed);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        header.sequence = sequence;

        let registered = reply.is_some();
        if let Some(reply) = reply {
            self.pending.register(sequence, reply);
        }

        match self.req_tx.try_send(header) {
            Ok(()) => {
                // A stop can land between the lifecycle check above and
                // the registration, and the task's final sweep may run
                // in that window. Re-check so a late entry is either
                // swept or rolled back right here.
                if registered && self.lifecycle() == Lifecycle::Stopped {
                    self.pending.take(sequence);
                    return Err(RtmlinkError::Closed);
                }
                Ok(())
            }
            Err(err) => {
                if registered {
                    self.pending.take(sequence);
                }
                match err {
                    TrySendError::Full(_) => {
                        tracing::warn!(sequence, "outbound queue full, dropping request");
                        Err(RtmlinkError::QueueFull)
                    }
                    TrySendError::Closed(_) => Err(RtmlinkError::Closed),
                }
            }
        }
    }

    /// Take the connection's error stream: transport faults plus a
    /// [`RtmlinkError::Disconnected`] marker per teardown. The stream can
    /// be taken once.
    pub fn errors(&self) -> Option<mpsc::Receiver<RtmlinkError>> {
        self.err_rx.lock().take()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn emit_error(&self, error: RtmlinkError) {
        if self.err_tx.try_send(error).is_err() {
            tracing::warn!("connection error stream full or unread, dropping error");
        }
    }

    /// Connection task: dial with retry, pump the connected socket, tear
    /// down, and go again until stopped or cancelled.
    async fn run(self: Arc<Self>, mut startup: Startup) {
        tracing::info!(endpoint = %self.endpoint, "connection task started");
        while self.lifecycle() == Lifecycle::Started && !self.cancel.is_cancelled() {
            // 1. Dial until a socket comes up. Dial failures retry on a
            //    fixed interval and are never surfaced to callers.
            let stream = tokio::select! {
                _ = self.cancel.cancelled() => break,
                dialed = dial(&self.endpoint) => match dialed {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!(endpoint = %self.endpoint, %error, "dial failed, retrying");
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(DIAL_RETRY_INTERVAL) => continue,
                        }
                    }
                }
            };
            tracing::info!(endpoint = %self.endpoint, "connected to worker");

            // 2. Pump frames until the socket dies or we are told to stop.
            let fault = self.connected(stream, &mut startup).await;

            // 3. Surface the outcome and fail pending calls over to their
            //    callers, then loop back to redial.
            if let Some(error) = fault {
                tracing::warn!(endpoint = %self.endpoint, %error, "connection fault");
                self.emit_error(error);
            }
            self.emit_error(RtmlinkError::Disconnected);
            let swept = self.pending.sweep();
            if swept > 0 {
                tracing::info!(swept, "failed pending calls on teardown");
            }
        }

        // The request queue closes when `startup` drops here; anything
        // still registered resolves as disconnected.
        let swept = self.pending.sweep();
        if swept > 0 {
            tracing::info!(swept, "failed pending calls on shutdown");
        }
        tracing::info!(endpoint = %self.endpoint, "connection task exited");
    }

    /// The connected phase for one socket generation. Returns the fault
    /// that ended it, or `None` for cancellation or a clean peer close.
    /// A fault hands any events the reader had already decoded to the
    /// sink before the generation's queue drops.
    async fn connected(&self, stream: TcpStream, startup: &mut Startup) -> Option<RtmlinkError> {
        let (read_half, write_half) = stream.into_split();
        let mut writer = BufWriter::new(write_half);
        let (evt_tx, mut evt_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&startup.codec),
            Arc::clone(&self.pending),
            evt_tx,
        ));

        let fault = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break None,

                request = startup.req_rx.recv() => {
                    // The send side lives on this connection, so the queue
                    // cannot close while the task runs.
                    let Some(header) = request else { break None };
                    let written = write_batch(
                        &mut writer,
                        startup.codec.as_ref(),
                        &mut startup.req_rx,
                        header,
                    )
                    .await;
                    if let Err(error) = written {
                        break Some(error);
                    }
                }

                event = evt_rx.recv() => match event {
                    Some(header) => {
                        if let Err(error) = startup.sink.on_event(header) {
                            tracing::error!(%error, "event handler failed");
                            break Some(error);
                        }
                    }
                    // The reader dropped its queue end: the socket is
                    // gone. Every event it queued was handled above
                    // before the close became visible.
                    None => break match (&mut reader).await {
                        Ok(Ok(())) => None,
                        Ok(Err(error)) => Some(error),
                        Err(join_error) => Some(RtmlinkError::Protocol(format!(
                            "reader task failed: {join_error}"
                        ))),
                    },
                },
            }
        };

        reader.abort();
        // A write fault breaks the loop with decoded events possibly
        // still queued; deliver them before the channel drops.
        if fault.is_some() {
            drain_events(&mut evt_rx, startup.sink.as_ref());
        }
        let _ = writer.shutdown().await;
        fault
    }
}

/// One dial attempt with a bounded timeout.
async fn dial(endpoint: &str) -> Result<TcpStream> {
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| {
            RtmlinkError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "dial timed out",
            ))
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Write `first` plus whatever is already queued behind it, bounded by
/// [`FLUSH_THRESHOLD`] cumulative content bytes, then flush once.
async fn write_batch<W>(
    writer: &mut BufWriter<W>,
    codec: &dyn HeaderCodec,
    req_rx: &mut mpsc::Receiver<Header>,
    first: Header,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batched = codec.size(&first);
    write_frame(writer, codec, first).await?;

    while batched < FLUSH_THRESHOLD {
        match req_rx.try_recv() {
            Ok(header) => {
                batched += codec.size(&header);
                write_frame(writer, codec, header).await?;
            }
            Err(_) => break,
        }
    }

    writer.flush().await?;
    Ok(())
}

async fn write_frame<W>(
    writer: &mut BufWriter<W>,
    codec: &dyn HeaderCodec,
    header: Header,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(codec, &header)?;
    tracing::trace!(
        sequence = header.sequence,
        operation = header.operation,
        len = frame.len(),
        "writing frame"
    );
    writer.write_all(&frame).await?;
    Ok(())
}

/// Reader task for one socket generation.
///
/// Decodes frames as they arrive and routes each header by the operation
/// id inside it: events queue to the connection task (awaiting queue
/// space, which backpressures the socket), responses resolve their waiting
/// caller directly. Returns `Ok(())` on a clean peer close.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    codec: Arc<dyn HeaderCodec>,
    pending: Arc<PendingTable>,
    evt_tx: mpsc::Sender<Header>,
) -> Result<()> {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = read_half.read(&mut buf).await?;
        if read == 0 {
            tracing::debug!("worker closed the connection");
            return Ok(());
        }

        for raw in frames.push(&buf[..read])? {
            let header = codec.deserialize(&raw.content)?;
            let sequence = header.sequence;
            if header.is_event() {
                if evt_tx.send(header).await.is_err() {
                    // Connected phase already ended.
                    return Ok(());
                }
            } else {
                match pending.take(sequence) {
                    Some(reply) => {
                        if reply.send(header).is_err() {
                            tracing::debug!(sequence, "response for an abandoned call");
                        }
                    }
                    None => {
                        tracing::warn!(
                            sequence,
                            operation = header.operation,
                            "response with no pending call"
                        );
                    }
                }
            }
        }
    }
}

/// Hand already-decoded events still sitting in the queue to the sink.
///
/// Runs when a fault ends a socket generation before the dispatch loop
/// got to them; the backlog would otherwise vanish with the channel.
fn drain_events(evt_rx: &mut mpsc::Receiver<Header>, sink: &dyn EventSink) {
    let mut delivered = 0usize;
    while let Ok(header) = evt_rx.try_recv() {
        if let Err(error) = sink.on_event(header) {
            tracing::warn!(%error, "event handler failed while draining backlog");
            return;
        }
        delivered += 1;
    }
    if delivered > 0 {
        tracing::debug!(delivered, "delivered queued events after fault");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::plain::{self, PlainCodec};
    use crate::protocol::ops;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct NullSink;

    impl EventSink for NullSink {
        fn on_event(&self, _header: Header) -> Result<()> {
            Ok(())
        }
    }

    /// Records every delivered event; fails them all when `fail` is set.
    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<Header>>,
        fail: bool,
    }

    impl EventSink for CollectingSink {
        fn on_event(&self, header: Header) -> Result<()> {
            if self.fail {
                return Err(RtmlinkError::Protocol("handler rejected event".into()));
            }
            self.events.lock().push(header);
            Ok(())
        }
    }

    /// In-memory write end that keeps the bytes and counts flushes.
    struct RecordingWriter {
        written: Vec<u8>,
        flushes: usize,
    }

    impl RecordingWriter {
        fn new() -> Self {
            Self {
                written: Vec::new(),
                flushes: 0,
            }
        }
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let this = self.get_mut();
            this.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.get_mut().flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn make_connection() -> (CancellationToken, Arc<Connection>) {
        let parent = CancellationToken::new();
        let conn = Connection::new(
            "127.0.0.1:1",
            Arc::new(PlainCodec),
            Arc::new(NullSink),
            &parent,
        );
        (parent, conn)
    }

    fn request() -> Header {
        Header::request(ops::MESSAGE_PUBLISH, Bytes::from_static(b"payload"))
    }

    fn sized_request(payload_len: usize) -> Header {
        Header::request(ops::MESSAGE_PUBLISH, Bytes::from(vec![0u8; payload_len]))
    }

    fn event(tag: u8) -> Header {
        Header {
            operation: ops::MESSAGE_EVENT,
            sequence: 0,
            error_code: 0,
            payload: Bytes::from(vec![tag]),
        }
    }

    #[test]
    fn test_send_request_assigns_sequence_and_registers() {
        let (_parent, conn) = make_connection();
        let mut startup = conn.startup.lock().take().unwrap();

        let (tx, _rx) = oneshot::channel();
        conn.send_request(request(), Some(tx)).unwrap();
        assert_eq!(conn.pending_calls(), 1);

        let queued = startup.req_rx.try_recv().unwrap();
        assert_eq!(queued.sequence, 1);

        conn.send_request(request(), None).unwrap();
        let queued = startup.req_rx.try_recv().unwrap();
        assert_eq!(queued.sequence, 2);
        // Fire-and-forget never registers a waiter.
        assert_eq!(conn.pending_calls(), 1);
    }

    #[test]
    fn test_queue_full_fails_fast_and_rolls_back() {
        let (_parent, conn) = make_connection();
        let mut startup = conn.startup.lock().take().unwrap();

        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            conn.send_request(request(), None).unwrap();
        }

        let (tx, _rx) = oneshot::channel();
        let err = conn.send_request(request(), Some(tx)).unwrap_err();
        assert!(matches!(err, RtmlinkError::QueueFull));
        // The waiter registered for the rejected request is gone.
        assert_eq!(conn.pending_calls(), 0);

        // Draining one slot makes the queue accept again.
        startup.req_rx.try_recv().unwrap();
        let (tx, _rx) = oneshot::channel();
        conn.send_request(request(), Some(tx)).unwrap();
        assert_eq!(conn.pending_calls(), 1);
    }

    #[test]
    fn test_stopped_connection_rejects_requests() {
        let (_parent, conn) = make_connection();
        conn.stop();
        let err = conn.send_request(request(), None).unwrap_err();
        assert!(matches!(err, RtmlinkError::Closed));
    }

    #[test]
    fn test_start_after_stop_is_a_no_op() {
        let (_parent, conn) = make_connection();
        conn.stop();
        conn.start();
        // No task may spawn for a stopped connection; the startup pieces
        // stay untouched.
        assert!(conn.startup.lock().is_some());
    }

    #[tokio::test]
    async fn test_double_start_spawns_one_task() {
        let (parent, conn) = make_connection();
        conn.start();
        assert!(conn.startup.lock().is_none());
        conn.start();

        parent.cancel();
        // Give the task a moment to wind down and sweep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(conn.pending.is_empty());
    }

    #[test]
    fn test_errors_stream_taken_once() {
        let (_parent, conn) = make_connection();
        assert!(conn.errors().is_some());
        assert!(conn.errors().is_none());
    }

    #[test]
    fn test_emit_error_drops_on_overflow() {
        let (_parent, conn) = make_connection();
        let mut errors = conn.errors().unwrap();

        for _ in 0..ERROR_QUEUE_CAPACITY + 5 {
            conn.emit_error(RtmlinkError::Disconnected);
        }

        let mut seen = 0;
        while errors.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, ERROR_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_write_batch_cuts_at_flush_threshold() {
        let codec = PlainCodec;
        // Two headers sized at exactly half the bound fill it; the strict
        // comparison must cut the batch before the third.
        let half = sized_request(FLUSH_THRESHOLD / 2 - plain::FIXED_LEN);
        let held = Header::request(ops::MESSAGE_PUBLISH, Bytes::from_static(b"held back"));

        let (req_tx, mut req_rx) = mpsc::channel(8);
        req_tx.try_send(half.clone()).unwrap();
        req_tx.try_send(held.clone()).unwrap();

        let mut writer = BufWriter::new(RecordingWriter::new());
        write_batch(&mut writer, &codec, &mut req_rx, half.clone())
            .await
            .unwrap();

        let leftover = req_rx.try_recv().unwrap();
        assert_eq!(leftover.payload, held.payload);
        assert!(req_rx.try_recv().is_err());

        let frame = encode_frame(&codec, &half).unwrap().len();
        assert_eq!(writer.get_ref().written.len(), 2 * frame);
        assert_eq!(writer.get_ref().flushes, 1);
    }

    #[tokio::test]
    async fn test_write_batch_counts_header_bytes_not_frame_bytes() {
        let codec = PlainCodec;
        // After two big headers the serialized total sits ten bytes under
        // the bound while the on-wire total, envelope included, is already
        // past it. The envelope must not count, so the third header still
        // goes out and only the fourth waits.
        let big = sized_request(FLUSH_THRESHOLD / 2 - 5 - plain::FIXED_LEN);
        let third = Header::request(ops::MESSAGE_PUBLISH, Bytes::from_static(b"third"));
        let fourth = Header::request(ops::MESSAGE_PUBLISH, Bytes::from_static(b"fourth"));

        let (req_tx, mut req_rx) = mpsc::channel(8);
        req_tx.try_send(big.clone()).unwrap();
        req_tx.try_send(third.clone()).unwrap();
        req_tx.try_send(fourth.clone()).unwrap();

        let mut writer = BufWriter::new(RecordingWriter::new());
        write_batch(&mut writer, &codec, &mut req_rx, big.clone())
            .await
            .unwrap();

        let leftover = req_rx.try_recv().unwrap();
        assert_eq!(leftover.payload, fourth.payload);
        assert!(req_rx.try_recv().is_err());

        let expected = 2 * encode_frame(&codec, &big).unwrap().len()
            + encode_frame(&codec, &third).unwrap().len();
        assert_eq!(writer.get_ref().written.len(), expected);
        assert_eq!(writer.get_ref().flushes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sends_racing_stop_leave_no_pending_calls() {
        let (_parent, conn) = make_connection();
        conn.start();

        let mut senders = Vec::new();
        for _ in 0..4 {
            let conn = Arc::clone(&conn);
            senders.push(tokio::spawn(async move {
                loop {
                    let (tx, _rx) = oneshot::channel();
                    if matches!(
                        conn.send_request(request(), Some(tx)),
                        Err(RtmlinkError::Closed)
                    ) {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.stop();
        for sender in senders {
            sender.await.unwrap();
        }

        // Whatever interleaving the senders hit, every waiter must end up
        // either swept by the task or rolled back by its sender.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while conn.pending_calls() != 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.pending_calls(), 0);
    }

    #[test]
    fn test_drain_events_delivers_the_backlog() {
        let (evt_tx, mut evt_rx) = mpsc::channel(8);
        for tag in 0..3u8 {
            evt_tx.try_send(event(tag)).unwrap();
        }

        let sink = CollectingSink::default();
        drain_events(&mut evt_rx, &sink);

        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].payload[0], 2);
    }

    #[test]
    fn test_drain_events_stops_when_the_handler_fails() {
        let (evt_tx, mut evt_rx) = mpsc::channel(8);
        evt_tx.try_send(event(0)).unwrap();
        evt_tx.try_send(event(1)).unwrap();

        let sink = CollectingSink {
            fail: true,
            ..Default::default()
        };
        drain_events(&mut evt_rx, &sink);

        assert!(sink.events.lock().is_empty());
        // The failing handler leaves the rest unconsumed.
        assert!(evt_rx.try_recv().is_ok());
    }
}
