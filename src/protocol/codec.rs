//! Message encoding seam.
//!
//! The session never looks inside a message body. It asks a [`Codec`] to turn an
//! [`OutboundMessage`] into bytes and, once the matching frame arrives, to turn that frame
//! into a reply. Document encoding lives behind this trait.
//!
//! [`RawCodec`] is the codec for callers that already hold encoded document bytes: it only
//! writes and parses the fixed message and reply headers.
use std::fmt;

use bincode::{
    Decode, Encode,
    config::{Configuration, Fixint, LittleEndian},
    decode_from_slice, encode_into_std_write,
};

use super::{CodecError, MIN_FRAME_SIZE, OutboundMessage, ReplyContext, RequestId};

pub const MESSAGE_HEADER_SIZE: usize = 16;
pub const REPLY_HEADER_SIZE: usize = 20;

pub trait Codec: Send + Sync + 'static {
    /// Logical request body.
    type Message: Send + 'static;
    /// Logical reply produced from one frame.
    type Reply: Send + 'static;

    /// Encodes `message` into one complete, length-prefixed frame.
    fn encode(&self, message: &OutboundMessage<Self::Message>) -> Result<Vec<u8>, CodecError>;

    /// Decodes one complete frame answering a request sent with `context`.
    fn decode(&self, context: &ReplyContext, frame: &[u8]) -> Result<Self::Reply, CodecError>;
}

/// Header shared by every message in either direction.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: RequestId,
    pub response_to: RequestId,
    pub op_code: i32,
}

/// Header following the message header on every reply.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub struct ReplyHeader {
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub op_code: i32,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new(op_code: i32, body: Vec<u8>) -> Self {
        Self { op_code, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub context: ReplyContext,
    pub header: MessageHeader,
    pub reply: ReplyHeader,
    /// Encoded documents following the headers, untouched.
    pub documents: Vec<u8>,
}

impl fmt::Display for RawReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reply to {} ({:?}): flags={:#x} cursor={} from={} returned={} documents={} bytes",
            self.header.response_to,
            self.context,
            self.reply.response_flags,
            self.reply.cursor_id,
            self.reply.starting_from,
            self.reply.number_returned,
            self.documents.len()
        )
    }
}

#[derive(Clone)]
pub struct RawCodec {
    config: Configuration<LittleEndian, Fixint>,
}

impl fmt::Debug for RawCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCodec").finish_non_exhaustive()
    }
}

impl RawCodec {
    pub fn new() -> Self {
        let config = bincode::config::standard()
            .with_little_endian()
            .with_fixed_int_encoding();
        Self { config }
    }
}

impl Default for RawCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for RawCodec {
    type Message = RawMessage;
    type Reply = RawReply;

    fn encode(&self, message: &OutboundMessage<RawMessage>) -> Result<Vec<u8>, CodecError> {
        let body = &message.body().body;
        let length = MESSAGE_HEADER_SIZE + body.len();
        let header = MessageHeader {
            message_length: i32::try_from(length)
                .map_err(|_| CodecError::BodyTooLarge(body.len()))?,
            request_id: message.request_id(),
            response_to: 0,
            op_code: message.body().op_code,
        };

        let mut out = Vec::with_capacity(length);
        encode_into_std_write(header, &mut out, self.config)?;
        out.extend_from_slice(body);
        Ok(out)
    }

    fn decode(&self, context: &ReplyContext, frame: &[u8]) -> Result<RawReply, CodecError> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(CodecError::Truncated {
                len: frame.len(),
                min: MIN_FRAME_SIZE,
            });
        }

        let (header, _): (MessageHeader, usize) =
            decode_from_slice(&frame[..MESSAGE_HEADER_SIZE], self.config)?;
        if usize::try_from(header.message_length) != Ok(frame.len()) {
            return Err(CodecError::LengthMismatch {
                declared: header.message_length,
                actual: frame.len(),
            });
        }
        let (reply, _): (ReplyHeader, usize) =
            decode_from_slice(&frame[MESSAGE_HEADER_SIZE..MIN_FRAME_SIZE], self.config)?;

        Ok(RawReply {
            context: context.clone(),
            header,
            reply,
            documents: frame[MIN_FRAME_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{Namespace, test_support::reply_frame};

    use super::*;

    #[test]
    fn encode_writes_message_header() {
        let codec = RawCodec::new();
        let message =
            OutboundMessage::new(12, ReplyContext::Admin, RawMessage::new(2004, vec![1, 2, 3]));

        let bytes = codec.encode(&message).unwrap();

        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 3);
        assert_eq!(bytes[0..4], 19i32.to_le_bytes());
        assert_eq!(bytes[4..8], 12i32.to_le_bytes());
        assert_eq!(bytes[8..12], 0i32.to_le_bytes());
        assert_eq!(bytes[12..16], 2004i32.to_le_bytes());
        assert_eq!(bytes[16..], [1u8, 2, 3]);
    }

    #[test]
    fn decode_reads_both_headers() {
        let codec = RawCodec::new();
        let context = ReplyContext::Collection(Namespace::new("app", "users"));
        let frame = reply_frame(7, &[9, 9, 9, 9]);

        let reply = codec.decode(&context, &frame).unwrap();

        assert_eq!(reply.context, context);
        assert_eq!(reply.header.message_length, 40);
        assert_eq!(reply.header.response_to, 7);
        assert_eq!(reply.header.op_code, 1);
        assert_eq!(reply.reply.number_returned, 1);
        assert_eq!(reply.documents, vec![9, 9, 9, 9]);
    }

    #[test]
    #[should_panic(expected = "Truncated")]
    fn decode_short_frame() {
        RawCodec::new()
            .decode(&ReplyContext::Admin, &[0u8; 20])
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "LengthMismatch")]
    fn decode_length_mismatch() {
        let mut frame = reply_frame(1, &[]);
        frame.push(0);

        RawCodec::new().decode(&ReplyContext::Admin, &frame).unwrap();
    }
}
