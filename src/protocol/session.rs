//! Single-connection session.
//!
//! A [`Session`] owns one connection to one server. Callers send from any thread; a single
//! receive thread per connection reads the stream, reassembles frames and hands each reply
//! to the handler registered for its request identifier.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --transport ready--> Connected
//! Connected --disconnect | receive error--> Disconnecting --> Disconnected
//! ```
//!
//! A session that tore itself down after a receive error can be connected again; request
//! identifiers keep counting from where they stopped.
//!
//! # Example
//! ```no_run
//! use std::sync::mpsc;
//! use wirelink::protocol::{RawCodec, RawMessage, ReplyContext, Session, TcpTransport};
//!
//! let session = Session::new(TcpTransport::new("127.0.0.1", 27017), RawCodec::new());
//! session.connect().unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! session
//!     .send(ReplyContext::Admin, RawMessage::new(2004, vec![]), move |reply| {
//!         tx.send(reply).unwrap();
//!     })
//!     .unwrap();
//! println!("{}", rx.recv().unwrap());
//!
//! session.disconnect().unwrap();
//! ```
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, trace, warn};

use super::{
    Closer, Codec, DEFAULT_MAX_FRAME_SIZE, FrameReassembler, InboundFrame, OutboundMessage,
    PendingRegistry, Receiver, ReplyContext, ReplyHandler, RequestId, RequestIdAllocator,
    SessionError, Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest frame the server may send before the stream is considered corrupt.
    pub max_frame_size: usize,
    /// Size of each read from the transport.
    pub read_buffer_size: usize,
    /// Identifier given to the first request sent.
    pub first_request_id: RequestId,
}

impl SessionConfig {
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    pub fn with_first_request_id(mut self, first_request_id: RequestId) -> Self {
        self.first_request_id = first_request_id;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 16 * 1024,
            first_request_id: 1,
        }
    }
}

struct Inner<M, R> {
    state: ConnectionState,
    /// Bumped on every successful connect; a receive thread only acts on its own connection.
    generation: u64,
    pending: PendingRegistry<M, R>,
}

/// State shared between callers and the receive thread.
struct Shared<C: Codec> {
    inner: Mutex<Inner<C::Message, C::Reply>>,
    unmatched: AtomicU64,
    buffered: AtomicUsize,
}

impl<C: Codec> Shared<C> {
    fn inner(&self) -> MutexGuard<'_, Inner<C::Message, C::Reply>> {
        lock(&self.inner)
    }

    fn state(&self) -> ConnectionState {
        self.inner().state
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner().state = state;
    }

    fn is_live(&self, generation: u64) -> bool {
        let inner = self.inner();
        inner.state == ConnectionState::Connected && inner.generation == generation
    }

    /// Drops every pending handler and marks the session disconnected.
    fn finish_teardown(&self) -> usize {
        let mut inner = self.inner();
        inner.state = ConnectionState::Disconnected;
        inner.pending.drain()
    }
}

pub struct Session<T: Transport, C: Codec> {
    endpoint: String,
    config: SessionConfig,
    codec: Arc<C>,
    ids: Arc<RequestIdAllocator>,
    shared: Arc<Shared<C>>,
    transport: Arc<Mutex<T>>,
    /// Closes the live connection while a send may still hold `transport`.
    closer: Arc<Mutex<Option<T::Closer>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport, C: Codec> Session<T, C> {
    pub fn new(transport: T, codec: C) -> Self {
        Self::with_config(transport, codec, SessionConfig::default())
    }

    pub fn with_config(transport: T, codec: C, config: SessionConfig) -> Self {
        Self {
            endpoint: transport.endpoint(),
            ids: Arc::new(RequestIdAllocator::starting_at(config.first_request_id)),
            config,
            codec: Arc::new(codec),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    pending: PendingRegistry::new(),
                }),
                unmatched: AtomicU64::new(0),
                buffered: AtomicUsize::new(0),
            }),
            transport: Arc::new(Mutex::new(transport)),
            closer: Arc::new(Mutex::new(None)),
            receiver: Mutex::new(None),
        }
    }

    /// Opens the transport and starts the receive thread.
    pub fn connect(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.shared.inner();
            if inner.state != ConnectionState::Disconnected {
                return Err(SessionError::AlreadyConnected);
            }
            inner.state = ConnectionState::Connecting;
        }
        self.join_receiver();

        info!("connecting to {}", self.endpoint);
        let mut transport = lock(&self.transport);
        let (reader, closer) = match transport.connect() {
            Ok(connection) => connection,
            Err(source) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(SessionError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                });
            }
        };

        let generation = {
            let mut inner = self.shared.inner();
            if inner.state != ConnectionState::Connecting {
                // disconnect() arrived mid-handshake and closes the transport once we let go.
                debug!("connect to {} abandoned", self.endpoint);
                return Err(SessionError::NotConnected);
            }
            inner.state = ConnectionState::Connected;
            inner.generation += 1;
            inner.generation
        };
        *lock(&self.closer) = Some(closer);

        match self.spawn_receive_loop(reader, generation) {
            Ok(handle) => {
                *lock(&self.receiver) = Some(handle);
                info!("connected to {}", self.endpoint);
                Ok(())
            }
            Err(e) => {
                lock(&self.closer).take();
                if let Err(close) = transport.disconnect() {
                    warn!("failed to close transport for {}: {close}", self.endpoint);
                }
                self.shared.finish_teardown();
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Closes the connection, stops the receive thread and drops every pending handler
    /// without invoking it.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.shared.inner();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    inner.state = ConnectionState::Disconnecting;
                }
                _ => return Err(SessionError::NotConnected),
            }
        }

        info!("disconnecting from {}", self.endpoint);
        // Fails any send still holding `transport`.
        let interrupted = interrupt(&self.closer);
        let closed = lock(&self.transport).disconnect();
        lock(&self.closer).take();
        self.join_receiver();

        let dropped = self.shared.finish_teardown();
        if dropped > 0 {
            debug!("dropped {dropped} pending handlers for {}", self.endpoint);
        }
        interrupted.and(closed).map_err(SessionError::TransportClose)
    }

    /// Sends `body`, delivering its reply to `handler` on the receive thread.
    ///
    /// Returns the request identifier assigned to the message. Never waits for the reply.
    pub fn send<F>(
        &self,
        context: ReplyContext,
        body: C::Message,
        handler: F,
    ) -> Result<RequestId, SessionError>
    where
        F: FnOnce(C::Reply) + Send + 'static,
    {
        self.dispatch(context, body, Some(Box::new(handler)))
    }

    /// Sends `body` without waiting on any reply. A reply that does arrive is reported as
    /// unmatched.
    pub fn send_unacknowledged(
        &self,
        context: ReplyContext,
        body: C::Message,
    ) -> Result<RequestId, SessionError> {
        self.dispatch(context, body, None)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identifier source shared with message builders.
    pub fn request_ids(&self) -> Arc<RequestIdAllocator> {
        Arc::clone(&self.ids)
    }

    /// Number of requests still waiting on a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.inner().pending.len()
    }

    /// Replies received so far that matched no pending request.
    pub fn unmatched_replies(&self) -> u64 {
        self.shared.unmatched.load(Ordering::Acquire)
    }

    /// Bytes read from the transport but not yet extracted as frames.
    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn dispatch(
        &self,
        context: ReplyContext,
        body: C::Message,
        handler: Option<ReplyHandler<C::Reply>>,
    ) -> Result<RequestId, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let id = self.ids.next();
        let message = OutboundMessage::new(id, context, body);
        let bytes = self.codec.encode(&message).map_err(SessionError::Encode)?;

        if let Some(handler) = handler {
            let mut inner = self.shared.inner();
            if inner.state != ConnectionState::Connected {
                return Err(SessionError::NotConnected);
            }
            inner.pending.register(handler, message)?;
        }

        trace!("sending request {id} ({} bytes) to {}", bytes.len(), self.endpoint);
        let written = lock(&self.transport).send(&bytes);
        if let Err(source) = written {
            self.shared.inner().pending.remove(id);
            return Err(SessionError::TransportWrite(source));
        }
        Ok(id)
    }

    fn spawn_receive_loop(
        &self,
        reader: T::Receiver,
        generation: u64,
    ) -> io::Result<JoinHandle<()>> {
        let worker = ReceiveLoop {
            endpoint: self.endpoint.clone(),
            generation,
            reader,
            chunk: vec![0; self.config.read_buffer_size.max(1)],
            reassembler: FrameReassembler::new(self.config.max_frame_size),
            codec: Arc::clone(&self.codec),
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            closer: Arc::clone(&self.closer),
        };
        thread::Builder::new()
            .name("wirelink-receiver".to_string())
            .spawn(move || worker.run())
    }

    /// Waits for the receive thread to finish, unless called from that thread.
    fn join_receiver(&self) {
        let Some(handle) = lock(&self.receiver).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("receive thread for {} panicked", self.endpoint);
        }
    }
}

impl<T: Transport, C: Codec> Drop for Session<T, C> {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            if let Err(e) = self.disconnect() {
                warn!("failed to disconnect from {} on drop: {e}", self.endpoint);
            }
        }
        self.join_receiver();
    }
}

/// The receive thread: owns the read half and the inbound buffer.
struct ReceiveLoop<T: Transport, C: Codec> {
    endpoint: String,
    generation: u64,
    reader: T::Receiver,
    chunk: Vec<u8>,
    reassembler: FrameReassembler,
    codec: Arc<C>,
    shared: Arc<Shared<C>>,
    transport: Arc<Mutex<T>>,
    closer: Arc<Mutex<Option<T::Closer>>>,
}

impl<T: Transport, C: Codec> ReceiveLoop<T, C> {
    fn run(mut self) {
        debug!("receive loop started for {}", self.endpoint);
        match self.pump() {
            Ok(()) => debug!("receive loop for {} stopped", self.endpoint),
            Err(err) => self.terminate(err),
        }
    }

    fn pump(&mut self) -> Result<(), SessionError> {
        loop {
            let read = self.reader.receive(&mut self.chunk);
            if !self.shared.is_live(self.generation) {
                return Ok(());
            }

            let n = match read {
                Ok(0) => return Err(SessionError::TransportClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SessionError::TransportRead(e)),
            };

            self.reassembler.feed(&self.chunk[..n]);
            while let Some(frame) = self.reassembler.pull()? {
                self.shared
                    .buffered
                    .store(self.reassembler.buffered(), Ordering::Release);
                self.deliver(frame)?;
                // A handler may have disconnected; the rest of this read belongs to nobody.
                if !self.shared.is_live(self.generation) {
                    return Ok(());
                }
            }
            self.shared
                .buffered
                .store(self.reassembler.buffered(), Ordering::Release);
        }
    }

    fn deliver(&self, frame: InboundFrame) -> Result<(), SessionError> {
        let id = frame.response_to();
        let entry = self.shared.inner().pending.take(id);
        let Some(entry) = entry else {
            let seen = self.shared.unmatched.fetch_add(1, Ordering::AcqRel) + 1;
            warn!(
                "{}: dropped {} byte frame from {} ({seen} unmatched so far)",
                SessionError::UnmatchedReply(id),
                frame.len(),
                self.endpoint
            );
            return Ok(());
        };

        let reply = self
            .codec
            .decode(entry.request.context(), frame.as_bytes())
            .map_err(SessionError::Decode)?;
        trace!("delivering reply to request {id}");
        if panic::catch_unwind(AssertUnwindSafe(|| entry.complete(reply))).is_err() {
            error!("reply handler for request {id} panicked");
        }
        Ok(())
    }

    /// Tears the session down after a receive error, unless a caller is already doing so.
    fn terminate(self, err: SessionError) {
        {
            let mut inner = self.shared.inner();
            if inner.state != ConnectionState::Connected || inner.generation != self.generation {
                debug!("receive loop for {} ended during shutdown: {err}", self.endpoint);
                return;
            }
            inner.state = ConnectionState::Disconnecting;
        }

        error!("session with {} terminated: {err}", self.endpoint);
        if let Err(e) = interrupt(&self.closer) {
            warn!("failed to close transport for {}: {e}", self.endpoint);
        }
        if let Err(e) = lock(&self.transport).disconnect() {
            warn!("failed to close transport for {}: {e}", self.endpoint);
        }
        lock(&self.closer).take();
        let dropped = self.shared.finish_teardown();
        if dropped > 0 {
            warn!("dropped {dropped} pending handlers for {}", self.endpoint);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Closes the connection through its closer, if one is installed.
fn interrupt<K: Closer>(closer: &Mutex<Option<K>>) -> io::Result<()> {
    match lock(closer).take() {
        Some(closer) => closer.close(),
        None => Ok(()),
    }
}
