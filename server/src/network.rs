//! TCP transport: listener, per-connection tasks and broadcast

use bytes::Bytes;
use log::{debug, error, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use shared::codec;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};

use crate::error::{NetworkError, ServerError};
use crate::rendezvous::Rendezvous;

/// Batches a connection may have queued before broadcasts give up on it.
pub const OUTBOUND_QUEUE_BATCHES: usize = 64;

/// Server-assigned identifier of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// One accepted byte stream
///
/// Outgoing frames go through a bounded queue drained by the connection's
/// [`ConnectionWriter`], so senders never wait on the socket itself. Reads
/// are serialized by a lock and end as soon as the connection is closed.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    outbound: mpsc::Sender<Vec<Bytes>>,
    state: AtomicU8,
    closed: watch::Sender<bool>,
    aborted: watch::Sender<bool>,
}

/// Owns the write half of a [`Connection`] and drains its outbound queue
pub struct ConnectionWriter {
    id: ConnectionId,
    half: OwnedWriteHalf,
    queue: mpsc::Receiver<Vec<Bytes>>,
    closed: watch::Receiver<bool>,
    aborted: watch::Receiver<bool>,
}

impl Connection {
    /// Splits the stream. The returned writer must be run for anything,
    /// the stream header included, to reach the peer.
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> (Self, ConnectionWriter) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", peer, e);
        }
        let (reader, half) = stream.into_split();
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_BATCHES);
        let (closed, closed_rx) = watch::channel(false);
        let (aborted, aborted_rx) = watch::channel(false);

        let connection = Self {
            id,
            peer,
            reader: Mutex::new(reader),
            outbound,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed,
            aborted,
        };
        let writer = ConnectionWriter {
            id,
            half,
            queue,
            closed: closed_rx,
            aborted: aborted_rx,
        };
        (connection, writer)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Moves a connecting stream to `Open`. Fails if it was closed meanwhile.
    fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Reads and checks the peer's stream header.
    pub async fn read_header(&self) -> Result<(), NetworkError> {
        let mut closed = self.closed.subscribe();
        let read = async {
            codec::read_header(&mut *self.reader.lock().await).await?;
            Ok::<_, NetworkError>(())
        };

        tokio::select! {
            result = read => result,
            _ = signalled(&mut closed) => Err(NetworkError::Closed),
        }
    }

    /// Queues one message, waiting for room if the queue is full.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), NetworkError> {
        let frame = codec::encode_frame(message)?.freeze();
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(NetworkError::Closed);
        }

        tokio::select! {
            sent = self.outbound.send(vec![frame]) => sent.map_err(|_| NetworkError::Closed),
            _ = signalled(&mut closed) => Err(NetworkError::Closed),
        }
    }

    /// Queues already encoded frames to be written back to back. Fails with
    /// `Backlogged` instead of waiting when the queue is full.
    pub fn try_send_encoded(&self, frames: &[Bytes]) -> Result<(), NetworkError> {
        if *self.closed.borrow() {
            return Err(NetworkError::Closed);
        }
        self.outbound
            .try_send(frames.to_vec())
            .map_err(|e| match e {
                TrySendError::Full(_) => NetworkError::Backlogged,
                TrySendError::Closed(_) => NetworkError::Closed,
            })
    }

    /// Waits for the next message. Returns `Closed` once the connection is
    /// closed locally, whatever the peer is doing.
    pub async fn recv<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(NetworkError::Closed);
        }

        let read = async {
            let mut reader = self.reader.lock().await;
            codec::read_frame(&mut *reader).await
        };

        tokio::select! {
            result = read => Ok(result?),
            _ = signalled(&mut closed) => Err(NetworkError::Closed),
        }
    }

    /// Closes the connection. Frames already queued are still written before
    /// the write half shuts down. Idempotent.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if previous != ConnectionState::Closed as u8 {
            self.closed.send_replace(true);
        }
    }

    /// Closes the connection and drops whatever is still queued, waking a
    /// writer stuck on a peer that stopped reading.
    pub fn abort(&self) {
        self.close();
        self.aborted.send_replace(true);
    }
}

impl ConnectionWriter {
    /// Writes the stream header, then queued batches until the connection
    /// closes. `stop` aborts the writer like [`Connection::abort`].
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        match self.pump(&mut stop).await {
            Ok(()) => debug!("Writer for connection {} drained", self.id.0),
            Err(e) => debug!("Writer for connection {} ended: {}", self.id.0, e),
        }
        if let Err(e) = self.half.shutdown().await {
            debug!("Shutdown of connection {} failed: {}", self.id.0, e);
        }
    }

    async fn pump(&mut self, stop: &mut watch::Receiver<bool>) -> Result<(), NetworkError> {
        tokio::select! {
            result = codec::write_header(&mut self.half) => result?,
            _ = raised(&mut self.aborted) => return Err(NetworkError::Closed),
            _ = raised(stop) => return Err(NetworkError::Closed),
        }

        loop {
            let batch = tokio::select! {
                biased;
                batch = self.queue.recv() => batch,
                _ = signalled(&mut self.closed) => self.queue.try_recv().ok(),
            };
            let Some(batch) = batch else {
                return Ok(());
            };

            let half = &mut self.half;
            let write = async {
                for frame in &batch {
                    half.write_all(frame).await?;
                }
                Ok::<_, NetworkError>(())
            };
            tokio::select! {
                result = write => result?,
                _ = raised(&mut self.aborted) => return Err(NetworkError::Closed),
                _ = raised(stop) => return Err(NetworkError::Closed),
            }
        }
    }
}

/// Resolves once the watched flag is true or its sender is gone.
async fn signalled(flag: &mut watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves once the watched flag is true. A dropped sender never raises it,
/// so a writer keeps draining after its connection is released.
async fn raised(flag: &mut watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Application callbacks for the connections of a [`Listener`]
///
/// Each connection runs on its own task: `handshake` once after the stream
/// headers are exchanged, then `receive` for every message in arrival order,
/// then `disconnect` exactly once.
pub trait ConnectionHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Send + 'static;

    /// Returns false to refuse the connection. The handler is expected to
    /// have told the peer why.
    fn handshake(&self, connection: &Connection) -> impl Future<Output = bool> + Send;

    fn receive(
        &self,
        connection: &Connection,
        message: Self::Message,
    ) -> impl Future<Output = ()> + Send;

    fn disconnect(&self, connection: &Connection) -> impl Future<Output = ()> + Send;
}

struct Registry {
    connections: Vec<Arc<Connection>>,
    accepting: bool,
}

struct ListenerInner<H> {
    handler: Arc<H>,
    local_addr: SocketAddr,
    registry: Mutex<Registry>,
    rendezvous: Rendezvous,
    shutdown: watch::Sender<bool>,
    next_connection_id: AtomicU64,
}

/// Accepts connections and tracks every live one
pub struct Listener<H> {
    inner: Arc<ListenerInner<H>>,
}

impl<H> Clone for Listener<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ConnectionHandler> Listener<H> {
    /// Binds `addr` and starts accepting. A bind failure is fatal.
    pub async fn bind(addr: &str, handler: Arc<H>) -> Result<Self, ServerError> {
        let socket = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e))?;
        let local_addr = socket.local_addr().map_err(|e| ServerError::bind(addr, e))?;
        info!("Listening on {}", local_addr);

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(ListenerInner {
            handler,
            local_addr,
            registry: Mutex::new(Registry {
                connections: Vec::new(),
                accepting: true,
            }),
            rendezvous: Rendezvous::new(),
            shutdown,
            next_connection_id: AtomicU64::new(1),
        });

        let guard = inner.rendezvous.join();
        let acceptor = Arc::clone(&inner);
        tokio::spawn(async move {
            let _guard = guard;
            acceptor.accept_loop(socket).await;
        });

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Tasks still running: the acceptor plus a reader and a writer per
    /// connection.
    pub fn active_tasks(&self) -> usize {
        self.inner.rendezvous.active()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.lock().await.connections.len()
    }

    /// Queues `messages` for every open connection, in order and back to back.
    ///
    /// Never waits on a socket. A connection whose queue is full is aborted;
    /// the others still get the full sequence.
    pub async fn broadcast<T: Serialize>(&self, messages: &[T]) {
        let frames = match messages
            .iter()
            .map(|m| codec::encode_frame(m).map(|frame| frame.freeze()))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return;
            }
        };

        let targets: Vec<Arc<Connection>> = {
            let registry = self.inner.registry.lock().await;
            registry
                .connections
                .iter()
                .filter(|c| c.is_open())
                .cloned()
                .collect()
        };

        for connection in targets {
            if let Err(e) = connection.try_send_encoded(&frames) {
                warn!("Broadcast to connection {} failed: {}", connection.id().0, e);
                connection.abort();
            }
        }
    }

    /// Stops accepting, aborts every connection and waits for all tasks.
    pub async fn close(&self) {
        {
            let mut registry = self.inner.registry.lock().await;
            registry.accepting = false;
            for connection in registry.connections.drain(..) {
                connection.abort();
            }
        }
        self.inner.shutdown.send_replace(true);

        self.inner.rendezvous.wait().await;
        info!("Listener on {} closed", self.inner.local_addr);
    }
}

impl<H: ConnectionHandler> ListenerInner<H> {
    async fn accept_loop(self: Arc<Self>, socket: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = self.rendezvous.join();
                        let inner = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _guard = guard;
                            inner.serve(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = signalled(&mut shutdown) => break,
            }
        }
        debug!("Acceptor on {} stopped", self.local_addr);
    }

    async fn serve(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (connection, writer) = Connection::new(id, stream, peer);
        let connection = Arc::new(connection);

        let guard = self.rendezvous.join();
        let stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let _guard = guard;
            writer.run(stop).await;
        });

        if !self.register(&connection).await {
            debug!("Refusing connection from {} while closing", peer);
            connection.abort();
            return;
        }

        if let Err(e) = connection.read_header().await {
            warn!("Stream header from {} rejected: {}", peer, e);
            self.release(&connection).await;
            return;
        }

        if !self.handler.handshake(&connection).await || !connection.mark_open() {
            info!("Connection {} from {} refused", id.0, peer);
            self.handler.disconnect(&connection).await;
            self.release(&connection).await;
            return;
        }
        info!("Connection {} from {} open", id.0, peer);

        loop {
            match connection.recv::<H::Message>().await {
                Ok(message) => self.handler.receive(&connection, message).await,
                Err(e) => {
                    debug!("Connection {} read ended: {}", id.0, e);
                    break;
                }
            }
        }

        self.handler.disconnect(&connection).await;
        self.release(&connection).await;
        info!("Connection {} from {} closed", id.0, peer);
    }

    async fn register(&self, connection: &Arc<Connection>) -> bool {
        let mut registry = self.registry.lock().await;
        if !registry.accepting {
            return false;
        }
        registry.connections.push(Arc::clone(connection));
        true
    }

    async fn release(&self, connection: &Connection) {
        self.registry
            .lock()
            .await
            .connections
            .retain(|c| c.id() != connection.id());
        connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Recorder {
        received: std::sync::Mutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    impl ConnectionHandler for Recorder {
        type Message = String;

        async fn handshake(&self, connection: &Connection) -> bool {
            match connection.recv::<String>().await {
                Ok(hello) if hello == "hello" => connection.send(&"welcome").await.is_ok(),
                _ => {
                    let _ = connection.send(&"go away").await;
                    false
                }
            }
        }

        async fn receive(&self, _connection: &Connection, message: String) {
            self.received.lock().unwrap().push(message);
        }

        async fn disconnect(&self, _connection: &Connection) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn listener() -> (Listener<Recorder>, Arc<Recorder>) {
        let handler = Arc::new(Recorder::default());
        let listener = Listener::bind("127.0.0.1:0", Arc::clone(&handler))
            .await
            .unwrap();
        (listener, handler)
    }

    async fn client(addr: SocketAddr, hello: &str) -> (TcpStream, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        codec::write_header(&mut stream).await.unwrap();
        codec::read_header(&mut stream).await.unwrap();
        codec::write_frame(&mut stream, &hello.to_string()).await.unwrap();
        let reply: String = codec::read_frame(&mut stream).await.unwrap();
        (stream, reply)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (first, _) = listener().await;
        let addr = first.local_addr().to_string();

        let result = Listener::bind(&addr, Arc::new(Recorder::default())).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
        first.close().await;
    }

    #[tokio::test]
    async fn test_handshake_then_messages_in_order() {
        let (listener, handler) = listener().await;
        let (mut stream, reply) = client(listener.local_addr(), "hello").await;
        assert_eq!(reply, "welcome");

        for i in 0..5 {
            codec::write_frame(&mut stream, &format!("msg{}", i)).await.unwrap();
        }
        eventually(|| handler.received.lock().unwrap().len() == 5).await;
        assert_eq!(
            *handler.received.lock().unwrap(),
            vec!["msg0", "msg1", "msg2", "msg3", "msg4"]
        );

        listener.close().await;
    }

    #[tokio::test]
    async fn test_refused_handshake_closes_stream() {
        let (listener, handler) = listener().await;
        let (mut stream, reply) = client(listener.local_addr(), "nope").await;
        assert_eq!(reply, "go away");

        let next = timeout(WAIT, codec::read_frame::<_, String>(&mut stream))
            .await
            .unwrap();
        assert!(next.is_err());
        eventually(|| handler.disconnects.load(Ordering::SeqCst) == 1).await;

        listener.close().await;
    }

    #[tokio::test]
    async fn test_bad_stream_header_dropped() {
        let (listener, handler) = listener().await;
        let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        stream.write_all(&[0xAC, 0xED, 0x00, 0x05, 0x00, 0x01]).await.unwrap();

        let _ = codec::read_header(&mut stream).await;
        let next = timeout(WAIT, codec::read_frame::<_, String>(&mut stream))
            .await
            .unwrap();
        assert!(next.is_err());
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 0);

        listener.close().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_open_connections() {
        let (listener, _) = listener().await;
        let (mut a, _) = client(listener.local_addr(), "hello").await;
        let (mut b, _) = client(listener.local_addr(), "hello").await;

        listener
            .broadcast(&["one".to_string(), "two".to_string()])
            .await;

        for stream in [&mut a, &mut b] {
            let first: String = codec::read_frame(&mut *stream).await.unwrap();
            let second: String = codec::read_frame(&mut *stream).await.unwrap();
            assert_eq!((first.as_str(), second.as_str()), ("one", "two"));
        }

        listener.close().await;
    }

    #[tokio::test]
    async fn test_stalled_peer_is_aborted_by_broadcast() {
        let (listener, handler) = listener().await;
        let (stalled, _) = client(listener.local_addr(), "hello").await;
        let payload = "x".repeat(256 * 1024);

        timeout(WAIT, async {
            while listener.connection_count().await != 0 {
                listener.broadcast(std::slice::from_ref(&payload)).await;
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("broadcast should not wait on a peer that stopped reading");

        eventually(|| handler.disconnects.load(Ordering::SeqCst) == 1).await;
        timeout(WAIT, listener.close()).await.unwrap();
        assert_eq!(listener.active_tasks(), 0);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_stalled_writer() {
        let (listener, _) = listener().await;
        let (stalled, _) = client(listener.local_addr(), "hello").await;
        let payload = "x".repeat(256 * 1024);

        // Fits in the queue, so the peer stays registered.
        for _ in 0..OUTBOUND_QUEUE_BATCHES / 2 {
            listener.broadcast(std::slice::from_ref(&payload)).await;
        }
        assert_eq!(listener.connection_count().await, 1);

        timeout(WAIT, listener.close()).await.unwrap();
        assert_eq!(listener.active_tasks(), 0);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_peer_hangup_triggers_disconnect() {
        let (listener, handler) = listener().await;
        let (stream, _) = client(listener.local_addr(), "hello").await;
        assert_eq!(listener.connection_count().await, 1);

        drop(stream);
        eventually(|| handler.disconnects.load(Ordering::SeqCst) == 1).await;
        timeout(WAIT, async {
            while listener.connection_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        listener.close().await;
    }

    #[tokio::test]
    async fn test_close_waits_for_every_task() {
        let (listener, handler) = listener().await;
        let mut streams = Vec::new();
        for _ in 0..3 {
            streams.push(client(listener.local_addr(), "hello").await.0);
        }
        // One connection that never sends its header.
        let idle = TcpStream::connect(listener.local_addr()).await.unwrap();

        timeout(WAIT, listener.close()).await.unwrap();
        assert_eq!(listener.active_tasks(), 0);
        assert_eq!(listener.connection_count().await, 0);
        assert_eq!(handler.disconnects.load(Ordering::SeqCst), 3);

        for stream in streams.iter_mut() {
            assert!(codec::read_frame::<_, String>(stream).await.is_err());
        }
        drop(idle);
    }
}
