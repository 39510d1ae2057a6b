//! Inbound frame reassembly.
//!
//! The [`FrameReassembler`] accepts reads of any size from the transport and hands back
//! complete frames, oldest first. A single read may carry several frames or only part of
//! one, so [`FrameReassembler::pull`] must be called until it returns `None` after every
//! [`FrameReassembler::feed`].
//!
//! Bytes are accumulated in a [`BytesMut`] and complete frames are split off the front,
//! which keeps extraction cheap no matter how many frames pass through one buffer.
use bytes::{Bytes, BytesMut};
use log::trace;

use super::{FrameError, RequestId};

/// Smallest frame the protocol can produce: the message header plus the reply header.
pub const MIN_FRAME_SIZE: usize = 36;
/// Default ceiling on a single frame's declared length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 48_000_000;

const FRAME_LENGTH: usize = 0;
const FRAME_RESPONSE_TO: usize = 8;

const INITIAL_CAPACITY: usize = 16 * 1024;

/// One complete, not yet decoded, frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    bytes: Bytes,
}

impl InboundFrame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Request identifier this frame answers.
    pub fn response_to(&self) -> RequestId {
        read_i32(&self.bytes, FRAME_RESPONSE_TO)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_frame_size: usize,
    poisoned: Option<FrameError>,
}

impl FrameReassembler {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_frame_size,
            poisoned: None,
        }
    }

    /// Appends raw bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes and returns the oldest complete frame.
    ///
    /// A framing error poisons the reassembler: the same error is returned by every later
    /// call and no further frames are produced.
    pub fn pull(&mut self) -> Result<Option<InboundFrame>, FrameError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        if self.buffer.len() < MIN_FRAME_SIZE {
            return Ok(None);
        }

        let declared = read_i32(&self.buffer, FRAME_LENGTH);
        let length = match self.validate(declared) {
            Ok(length) => length,
            Err(err) => {
                self.poisoned = Some(err.clone());
                return Err(err);
            }
        };
        if self.buffer.len() < length {
            return Ok(None);
        }

        let bytes = self.buffer.split_to(length).freeze();
        trace!(
            "extracted {length} byte frame, {} bytes still buffered",
            self.buffer.len()
        );
        Ok(Some(InboundFrame { bytes }))
    }

    /// Number of bytes held that have not been extracted as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn validate(&self, declared: i32) -> Result<usize, FrameError> {
        let length = usize::try_from(declared).map_err(|_| FrameError::InvalidLength(declared))?;
        if length < MIN_FRAME_SIZE {
            return Err(FrameError::InvalidLength(declared));
        }
        if length > self.max_frame_size {
            return Err(FrameError::Oversized {
                declared,
                max: self.max_frame_size,
            });
        }
        Ok(length)
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(raw)
}
