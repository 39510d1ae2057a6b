//! Client session protocol.
//!
//! This module implements the wire-protocol session layer of a database client: a single
//! persistent connection to one server, over which outbound requests are written as
//! length-prefixed binary messages and inbound replies are reassembled from the byte stream
//! and handed back to whoever is waiting on them.
//!
//! # Overview
//!
//! A [`Session`] composes a handful of small pieces:
//!
//! - [`RequestIdAllocator`]: hands out strictly increasing request identifiers.
//! - [`PendingRegistry`]: maps a request identifier to the handler waiting on its reply.
//! - [`FrameReassembler`]: turns arbitrarily chunked reads into complete frames.
//! - [`Transport`]: the byte stream itself (see [`TcpTransport`]).
//! - [`Codec`]: turns logical messages into bytes and frames into logical replies
//!   (see [`RawCodec`]).
//!
//! Sending happens on the caller's thread. Replies are read by one dedicated receive thread
//! per connection, which dispatches each frame to its handler in arrival order.
//!
//! # Binary Format
//!
//! Every inbound frame starts with a fixed 36-byte header:
//!
//! - bytes `0..4`: total frame length, header included.
//! - bytes `4..8`: the server's own request identifier.
//! - bytes `8..12`: the request identifier this frame answers.
//! - bytes `12..16`: op code.
//! - bytes `16..36`: reply flags, cursor id, starting offset and returned document count.
//!
//! All integers are little-endian.
//!
//! # Errors
//!
//! Errors from [`Session::connect`], [`Session::disconnect`] and [`Session::send`] are
//! returned to the caller. Errors inside the receive thread have nobody to return to; they
//! are logged and the session tears itself down into [`ConnectionState::Disconnected`].
//!
//! # See Also
//!
//! - [`cli`](crate::cli): Interactive prompt used by the `wirelink-probe` binary.
mod codec;
mod frame;
mod message;
mod registry;
mod request_id;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{
    Codec, MESSAGE_HEADER_SIZE, MessageHeader, REPLY_HEADER_SIZE, RawCodec, RawMessage, RawReply,
    ReplyHeader,
};
pub use error::{CodecError, FrameError, SessionError};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameReassembler, InboundFrame, MIN_FRAME_SIZE};
pub use message::{Namespace, OutboundMessage, ReplyContext};
pub use registry::{PendingEntry, PendingRegistry, ReplyHandler};
pub use request_id::{RequestId, RequestIdAllocator};
pub use session::{ConnectionState, Session, SessionConfig};
pub use transport::{Closer, Receiver, TcpTransport, Transport};

pub mod error {
    use std::io;

    use thiserror::Error;

    use super::{MIN_FRAME_SIZE, RequestId};

    /// Framing violations. Once one is seen the stream can no longer be trusted to be
    /// frame-aligned.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum FrameError {
        #[error("declared frame length {declared} exceeds the maximum of {max} bytes")]
        Oversized { declared: i32, max: usize },

        #[error("invalid frame length {0}; frames are at least {min} bytes", min = MIN_FRAME_SIZE)]
        InvalidLength(i32),
    }

    #[derive(Debug, Error)]
    pub enum CodecError {
        #[error("failed to encode header: {0}")]
        Serialize(#[from] bincode::error::EncodeError),

        #[error("failed to decode header: {0}")]
        Deserialize(#[from] bincode::error::DecodeError),

        #[error("frame of {len} bytes is shorter than the {min} byte header")]
        Truncated { len: usize, min: usize },

        #[error("frame declares {declared} bytes but carries {actual}")]
        LengthMismatch { declared: i32, actual: usize },

        #[error("message body of {0} bytes does not fit in a frame")]
        BodyTooLarge(usize),

        #[error("{0}")]
        Custom(Box<dyn std::error::Error + Send + Sync>),
    }

    #[derive(Debug, Error)]
    pub enum SessionError {
        #[error("session is already connected")]
        AlreadyConnected,

        #[error("session is not connected")]
        NotConnected,

        #[error("failed to connect to {endpoint}: {source}")]
        Connect { endpoint: String, source: io::Error },

        #[error("failed to start receive thread: {0}")]
        Spawn(io::Error),

        #[error("request {0} already has a pending handler")]
        DuplicateRequestId(RequestId),

        #[error("framing error: {0}")]
        Frame(#[from] FrameError),

        #[error("failed to encode message: {0}")]
        Encode(CodecError),

        #[error("failed to decode reply: {0}")]
        Decode(CodecError),

        #[error("failed to write to transport: {0}")]
        TransportWrite(io::Error),

        #[error("failed to read from transport: {0}")]
        TransportRead(io::Error),

        #[error("failed to close transport: {0}")]
        TransportClose(io::Error),

        #[error("connection closed by peer")]
        TransportClosed,

        #[error("no pending request matches reply to {0}")]
        UnmatchedReply(RequestId),
    }
}
