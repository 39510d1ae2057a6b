//! Frame builders and an in-memory transport for session tests.
use std::{
    io,
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use super::{Closer, MIN_FRAME_SIZE, Receiver, RequestId, Transport};

/// A `len` byte frame answering `response_to`, with a patterned body.
pub(crate) fn raw_frame(len: usize, response_to: RequestId) -> Vec<u8> {
    assert!(len >= MIN_FRAME_SIZE);
    let mut frame = (0..len).map(|i| i as u8).collect::<Vec<_>>();
    frame[0..4].copy_from_slice(&(len as i32).to_le_bytes());
    frame[8..12].copy_from_slice(&response_to.to_le_bytes());
    frame
}

/// A well formed reply frame: op code 1, one returned document, `documents` as body.
pub(crate) fn reply_frame(response_to: RequestId, documents: &[u8]) -> Vec<u8> {
    let len = (MIN_FRAME_SIZE + documents.len()) as i32;
    let mut frame = Vec::with_capacity(len as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&1000i32.to_le_bytes());
    frame.extend_from_slice(&response_to.to_le_bytes());
    frame.extend_from_slice(&1i32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&0i64.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&1i32.to_le_bytes());
    frame.extend_from_slice(documents);
    frame
}

/// Polls `condition` until it holds or a few seconds have passed.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

type Inbound = mpsc::Sender<Option<Vec<u8>>>;

#[derive(Default)]
struct Wire {
    inbound: Mutex<Option<Inbound>>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    connects: Mutex<usize>,
    connect_gate: Mutex<Option<Arc<Barrier>>>,
}

impl Wire {
    fn close(&self) {
        if let Some(tx) = self.inbound.lock().unwrap().take() {
            let _ = tx.send(None);
        }
    }
}

/// Transport backed by channels. The paired [`Peer`] plays the server.
pub(crate) struct ChannelTransport {
    wire: Arc<Wire>,
}

/// Server side of a [`ChannelTransport`].
#[derive(Clone)]
pub(crate) struct Peer {
    wire: Arc<Wire>,
}

pub(crate) fn channel_transport() -> (ChannelTransport, Peer) {
    let wire = Arc::new(Wire::default());
    (
        ChannelTransport {
            wire: Arc::clone(&wire),
        },
        Peer { wire },
    )
}

impl Peer {
    /// Pushes bytes to the client as one read.
    pub(crate) fn deliver(&self, bytes: &[u8]) {
        if let Some(tx) = self.wire.inbound.lock().unwrap().as_ref() {
            tx.send(Some(bytes.to_vec())).unwrap();
        }
    }

    /// Ends the stream as if the server hung up.
    pub(crate) fn hang_up(&self) {
        if let Some(tx) = self.wire.inbound.lock().unwrap().as_ref() {
            tx.send(None).unwrap();
        }
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.wire.written.lock().unwrap().clone()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.wire.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        *self.wire.connects.lock().unwrap()
    }

    /// Makes the next connect wait on `gate` before it completes.
    pub(crate) fn hold_connect(&self, gate: Arc<Barrier>) {
        *self.wire.connect_gate.lock().unwrap() = Some(gate);
    }
}

pub(crate) struct ChannelCloser {
    wire: Arc<Wire>,
}

impl Closer for ChannelCloser {
    fn close(&self) -> io::Result<()> {
        self.wire.close();
        Ok(())
    }
}

pub(crate) struct ChannelReceiver {
    rx: mpsc::Receiver<Option<Vec<u8>>>,
    pending: Vec<u8>,
}

impl Receiver for ChannelReceiver {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(Some(bytes)) => self.pending = bytes,
                Ok(None) | Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Transport for ChannelTransport {
    type Receiver = ChannelReceiver;
    type Closer = ChannelCloser;

    fn endpoint(&self) -> String {
        "memory:0".to_string()
    }

    fn connect(&mut self) -> io::Result<(ChannelReceiver, ChannelCloser)> {
        let gate = self.wire.connect_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.wait();
        }

        let (tx, rx) = mpsc::channel();
        *self.wire.inbound.lock().unwrap() = Some(tx);
        *self.wire.connects.lock().unwrap() += 1;
        let receiver = ChannelReceiver {
            rx,
            pending: Vec::new(),
        };
        let closer = ChannelCloser {
            wire: Arc::clone(&self.wire),
        };
        Ok((receiver, closer))
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.wire.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
        }
        self.wire.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.wire.close();
        Ok(())
    }
}
