pub mod cli;
pub mod protocol;

pub use cli::{Command, next_command, prompt};
pub use protocol::{
    Codec, ConnectionState, RawCodec, RawMessage, RawReply, ReplyContext, Session, SessionConfig,
    SessionError, TcpTransport, Transport,
};
