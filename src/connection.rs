//! Per-connection state: inbound framing, outbound buffering and the worker
//! that executes decoded requests.
//!
//! ```text
//!        reactor task                         worker (dedicated thread)
//! ------------------------------       ------------------------------
//! read_available()
//! try_parse_read_buffer()
//!   -> queue.push(request)  ------->   queue.wait_and_pop()
//!                                      request.handle()
//!                                      write_buffer.append()
//! arm_write()  <-------------------    notifier.notify(id)  (empty -> non-empty)
//! flush_write_buffer()
//! ```

use crate::framing::{Frame, FrameDecoder};
use crate::protocol::Request;
use crate::queue::HandoffQueue;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

/// Identity of a connection within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tells the reactor that a connection's write buffer became non-empty.
#[derive(Debug, Clone)]
pub struct WriteNotifier {
    tx: mpsc::UnboundedSender<ConnectionId>,
}

impl WriteNotifier {
    /// Wraps the reactor's notification channel.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ConnectionId>) -> Self {
        Self { tx }
    }

    /// Requests write readiness for `id`. A stopped reactor is ignored.
    pub fn notify(&self, id: ConnectionId) {
        let _ = self.tx.send(id);
    }
}

/// Outcome of a flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Every pending byte was written.
    Drained,
    /// The socket would block; the remainder stays buffered.
    Pending,
    /// The socket failed; the connection should be torn down.
    Fatal(io::Error),
}

/// Outbound byte accumulator shared by the reactor and the worker.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    pending: Mutex<Vec<u8>>,
}

impl WriteBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes.
    ///
    /// Returns `true` only when the buffer went from empty to non-empty, so the
    /// caller notifies the reactor once per transition.
    pub fn append(&self, bytes: &[u8]) -> bool {
        let mut pending = self.pending.lock();
        let was_empty = pending.is_empty();
        pending.extend_from_slice(bytes);
        was_empty && !pending.is_empty()
    }

    /// Number of bytes waiting to be written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is waiting to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the pending bytes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.pending.lock().clone()
    }

    /// Writes pending bytes to a non-blocking socket.
    pub fn flush(&self, stream: &TcpStream) -> FlushOutcome {
        self.flush_with(|bytes| stream.try_write(bytes))
    }

    /// Writes pending bytes through `write` until drained, would-block or
    /// failure. Holds the lock for the whole attempt.
    pub fn flush_with<W>(&self, mut write: W) -> FlushOutcome
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        let mut pending = self.pending.lock();
        while !pending.is_empty() {
            match write(&pending) {
                Ok(0) => return FlushOutcome::Fatal(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return FlushOutcome::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return FlushOutcome::Fatal(e),
            }
        }
        FlushOutcome::Drained
    }
}

/// Outcome of draining a readable socket.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Everything available was read; the socket is still open.
    Drained,
    /// The peer closed its side.
    Closed,
    /// Reading failed.
    Failed(io::Error),
}

/// What woke a connection's readiness future.
#[derive(Debug)]
pub enum ReadinessEvent {
    /// The socket is ready for the requested interest.
    Ready(Ready),
    /// Polling readiness failed.
    Failed(io::Error),
    /// The requested interest changed; poll again with the new one.
    InterestChanged,
}

/// A connection's pending readiness wait.
pub type ReadinessFuture = BoxFuture<'static, (ConnectionId, ReadinessEvent)>;

/// State for one accepted client.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: Arc<TcpStream>,
    decoder: FrameDecoder,
    write_buffer: Arc<WriteBuffer>,
    queue: Arc<HandoffQueue<Request>>,
    worker: Option<JoinHandle<()>>,
    write_armed: bool,
    interest_changed: Arc<Notify>,
    max_read_buffer: usize,
}

impl Connection {
    /// Wraps an accepted socket and starts its worker thread.
    ///
    /// # Arguments
    /// * `id` - Identity assigned by the reactor.
    /// * `stream` - Accepted non-blocking socket.
    /// * `peer` - Remote address, for logging.
    /// * `notifier` - Channel used by the worker to request write readiness.
    /// * `max_read_buffer` - Bound on undecoded inbound bytes.
    ///
    /// # Errors
    /// Returns error if the worker thread cannot be spawned.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        notifier: WriteNotifier,
        max_read_buffer: usize,
    ) -> io::Result<Self> {
        let write_buffer = Arc::new(WriteBuffer::new());
        let queue = Arc::new(HandoffQueue::new());

        let worker = {
            let queue = Arc::clone(&queue);
            let write_buffer = Arc::clone(&write_buffer);
            thread::Builder::new()
                .name(format!("tradesim-conn-{}", id.0))
                .spawn(move || run_worker(id, &queue, &write_buffer, &notifier))?
        };

        Ok(Self {
            id,
            peer,
            stream: Arc::new(stream),
            decoder: FrameDecoder::new(),
            write_buffer,
            queue,
            worker: Some(worker),
            write_armed: false,
            interest_changed: Arc::new(Notify::new()),
            max_read_buffer,
        })
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Shared handle to the outbound buffer.
    #[must_use]
    pub fn write_buffer(&self) -> Arc<WriteBuffer> {
        Arc::clone(&self.write_buffer)
    }

    /// Undecoded inbound bytes.
    #[must_use]
    pub fn buffered_read_bytes(&self) -> usize {
        self.decoder.buffered()
    }

    /// Whether undecoded inbound bytes exceed the configured bound.
    #[must_use]
    pub fn read_buffer_overflowed(&self) -> bool {
        self.decoder.buffered() > self.max_read_buffer
    }

    /// Whether write readiness is currently requested.
    #[must_use]
    pub fn is_write_armed(&self) -> bool {
        self.write_armed
    }

    /// Appends raw inbound bytes.
    pub fn append_to_read_buffer(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
    }

    /// Reads everything currently available from the socket.
    ///
    /// # Arguments
    /// * `scratch` - Reusable read buffer.
    pub fn read_available(&mut self, scratch: &mut [u8]) -> ReadOutcome {
        loop {
            match self.stream.try_read(scratch) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => self.decoder.extend(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Decodes one value from the read buffer and queues the request it
    /// names.
    ///
    /// Returns `true` if a value was consumed, so callers loop until `false`.
    pub fn try_parse_read_buffer(&mut self) -> bool {
        match self.decoder.next_frame() {
            Frame::Value(value) => {
                match Request::from_json(&value) {
                    Some(request) => self.queue.push(request),
                    None => debug!("Connection {} dropped message without known action", self.id),
                }
                true
            }
            Frame::Incomplete | Frame::Malformed => false,
        }
    }

    /// Appends outbound bytes. Returns `true` on the empty to non-empty
    /// transition.
    pub fn append_to_write_buffer(&self, bytes: &[u8]) -> bool {
        self.write_buffer.append(bytes)
    }

    /// Writes as much pending output as the socket accepts.
    pub fn flush_write_buffer(&self) -> FlushOutcome {
        self.write_buffer.flush(&self.stream)
    }

    /// Requests write readiness in addition to read readiness.
    pub fn arm_write(&mut self) {
        if !self.write_armed {
            self.write_armed = true;
            self.interest_changed.notify_one();
        }
    }

    /// Drops write readiness; read readiness stays requested.
    pub fn disarm_write(&mut self) {
        self.write_armed = false;
    }

    fn interest(&self) -> Interest {
        if self.write_armed {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        }
    }

    /// Future resolving when the socket is ready for the current interest,
    /// or when the interest changes.
    #[must_use]
    pub fn readiness(&self) -> ReadinessFuture {
        let id = self.id;
        let interest = self.interest();
        let stream = Arc::clone(&self.stream);
        let interest_changed = Arc::clone(&self.interest_changed);
        Box::pin(async move {
            tokio::select! {
                ready = stream.ready(interest) => match ready {
                    Ok(ready) => (id, ReadinessEvent::Ready(ready)),
                    Err(e) => (id, ReadinessEvent::Failed(e)),
                },
                _ = interest_changed.notified() => (id, ReadinessEvent::InterestChanged),
            }
        })
    }

    /// Closes the handoff queue and joins the worker once it has drained it.
    ///
    /// Requests never block, so the join returns as soon as the queued ones
    /// are answered.
    pub fn shutdown(mut self) {
        self.queue.close();
        self.interest_changed.notify_one();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Connection {} worker panicked", self.id);
        }
        debug!("Connection {} shut down", self.id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn run_worker(
    id: ConnectionId,
    queue: &HandoffQueue<Request>,
    write_buffer: &WriteBuffer,
    notifier: &WriteNotifier,
) {
    while let Some(request) = queue.wait_and_pop() {
        let action = request.action();
        match request.handle().to_bytes() {
            Ok(bytes) => {
                if write_buffer.append(&bytes) {
                    notifier.notify(id);
                }
            }
            Err(e) => warn!("Connection {} failed to encode {} response: {}", id, action, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, peer) = accepted.unwrap();
        (server, peer, client.unwrap())
    }

    async fn connection() -> (Connection, TcpStream, mpsc::UnboundedReceiver<ConnectionId>) {
        let (server, peer, client) = socket_pair().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let conn =
            Connection::new(ConnectionId(1), server, peer, WriteNotifier::new(tx), 1024).unwrap();
        (conn, client, rx)
    }

    fn decode_concatenated(bytes: &[u8]) -> Vec<Value> {
        serde_json::Deserializer::from_slice(bytes)
            .into_iter::<Value>()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    // ========================================================================
    // WriteBuffer Tests
    // ========================================================================

    #[test]
    fn test_append_reports_only_first_transition() {
        let buffer = WriteBuffer::new();
        assert!(buffer.append(b"a"));
        assert!(!buffer.append(b"b"));
        assert!(!buffer.append(b"c"));
        assert_eq!(buffer.snapshot(), b"abc");
    }

    #[test]
    fn test_append_empty_slice_is_not_a_transition() {
        let buffer = WriteBuffer::new();
        assert!(!buffer.append(b""));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_partial_writes_until_drained() {
        let buffer = WriteBuffer::new();
        buffer.append(b"hello world");
        let mut sink = Vec::new();
        let outcome = buffer.flush_with(|bytes| {
            let n = bytes.len().min(3);
            sink.extend_from_slice(&bytes[..n]);
            Ok(n)
        });
        assert!(matches!(outcome, FlushOutcome::Drained));
        assert_eq!(sink, b"hello world");
        assert!(buffer.append(b"x"));
    }

    #[test]
    fn test_flush_would_block_keeps_remainder() {
        let buffer = WriteBuffer::new();
        buffer.append(b"abcdef");
        let mut calls = 0;
        let outcome = buffer.flush_with(|_| {
            calls += 1;
            if calls == 1 {
                Ok(2)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            }
        });
        assert!(matches!(outcome, FlushOutcome::Pending));
        assert_eq!(buffer.snapshot(), b"cdef");
    }

    #[test]
    fn test_flush_fatal_error_is_reported() {
        let buffer = WriteBuffer::new();
        buffer.append(b"abc");
        let outcome = buffer.flush_with(|_| Err(io::ErrorKind::BrokenPipe.into()));
        match outcome {
            FlushOutcome::Fatal(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_flush_zero_write_is_fatal() {
        let buffer = WriteBuffer::new();
        buffer.append(b"abc");
        assert!(matches!(
            buffer.flush_with(|_| Ok(0)),
            FlushOutcome::Fatal(_)
        ));
    }

    // ========================================================================
    // Connection Tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_request_is_answered_through_worker() {
        let (mut conn, _client, mut rx) = connection().await;
        conn.append_to_read_buffer(br#"{"action":"login","username":"u","password":"p"}"#);
        while conn.try_parse_read_buffer() {}

        let notified = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(notified, Some(ConnectionId(1)));

        let written = conn.write_buffer().snapshot();
        assert_eq!(
            decode_concatenated(&written),
            vec![json!({"action": "login", "status": 200, "msg": "Login successful"})]
        );
        conn.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_action_produces_nothing() {
        let (mut conn, _client, _rx) = connection().await;
        conn.append_to_read_buffer(br#"{"action":"ping"}"#);
        assert!(conn.try_parse_read_buffer());
        assert!(!conn.try_parse_read_buffer());

        let buffer = conn.write_buffer();
        conn.shutdown();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_requests_in_order() {
        let (mut conn, _client, _rx) = connection().await;
        conn.append_to_read_buffer(
            br#"{"action":"login","username":"a","password":"b"}{"action":"login"}{"action":"login","username":"c","password":"d"}"#,
        );
        while conn.try_parse_read_buffer() {}

        let buffer = conn.write_buffer();
        conn.shutdown();

        let statuses: Vec<u64> = decode_concatenated(&buffer.snapshot())
            .iter()
            .map(|v| v["status"].as_u64().unwrap())
            .collect();
        assert_eq!(statuses, vec![200, 403, 200]);
    }

    #[tokio::test]
    async fn test_flush_delivers_bytes_to_peer() {
        let (mut conn, mut client, _rx) = connection().await;
        assert!(conn.append_to_write_buffer(b"{\"x\":1}"));
        assert!(!conn.append_to_write_buffer(b"{\"y\":2}"));

        conn.arm_write();
        let (_, event) = conn.readiness().await;
        // The arm above stored a notification, so the first wait may resolve
        // with an interest change instead of readiness.
        if matches!(event, ReadinessEvent::InterestChanged) {
            let (_, event) = conn.readiness().await;
            assert!(matches!(event, ReadinessEvent::Ready(r) if r.is_writable()));
        }

        assert!(matches!(conn.flush_write_buffer(), FlushOutcome::Drained));
        conn.disarm_write();
        assert!(!conn.is_write_armed());

        let mut received = vec![0u8; 14];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"{\"x\":1}{\"y\":2}");
        conn.shutdown();
    }

    #[tokio::test]
    async fn test_read_available_and_peer_close() {
        let (mut conn, client, _rx) = connection().await;
        client.writable().await.unwrap();
        client.try_write(br#"{"action":"lo"#).unwrap();

        let (_, event) = conn.readiness().await;
        assert!(matches!(event, ReadinessEvent::Ready(r) if r.is_readable()));
        let mut scratch = [0u8; 8];
        assert!(matches!(conn.read_available(&mut scratch), ReadOutcome::Drained));
        assert_eq!(conn.buffered_read_bytes(), 13);
        assert!(!conn.try_parse_read_buffer());
        assert!(!conn.read_buffer_overflowed());

        drop(client);
        let (_, event) = conn.readiness().await;
        assert!(matches!(event, ReadinessEvent::Ready(r) if r.is_readable()));
        assert!(matches!(conn.read_available(&mut scratch), ReadOutcome::Closed));
        conn.shutdown();
    }

    #[tokio::test]
    async fn test_read_buffer_overflow_is_detected() {
        let (mut conn, _client, _rx) = connection().await;
        conn.append_to_read_buffer(br#"{"action":""#);
        conn.append_to_read_buffer(&[b'x'; 2048]);
        assert!(!conn.try_parse_read_buffer());
        assert!(conn.read_buffer_overflowed());
        conn.shutdown();
    }

    #[test]
    fn test_workers_do_not_depend_on_blocking_pool() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (idle, _idle_client, _idle_rx) = connection().await;
            let (server, peer, _client) = socket_pair().await;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let mut busy =
                Connection::new(ConnectionId(2), server, peer, WriteNotifier::new(tx), 1024)
                    .unwrap();

            busy.append_to_read_buffer(br#"{"action":"login","username":"u","password":"p"}"#);
            assert!(busy.try_parse_read_buffer());

            let notified = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
            assert_eq!(notified.ok().flatten(), Some(ConnectionId(2)));
            assert!(!busy.write_buffer().is_empty());

            busy.shutdown();
            idle.shutdown();
        });
    }
}
