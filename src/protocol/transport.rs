use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
};

use log::{debug, trace};

/// Read half of a connected transport. Owned by the session's receive thread.
pub trait Receiver: Send + 'static {
    /// Reads whatever is available into `buf`. `Ok(0)` means the stream has ended.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Handle that closes a connection without going through the [`Transport`] itself, so a
/// writer blocked inside [`Transport::send`] does not hold the close up.
pub trait Closer: Send + 'static {
    /// Closes the connection. Both a blocked [`Receiver::receive`] and a blocked
    /// [`Transport::send`] must return once this has been called.
    fn close(&self) -> io::Result<()>;
}

/// Byte-stream connection with no knowledge of message boundaries.
pub trait Transport: Send + 'static {
    type Receiver: Receiver;
    type Closer: Closer;

    /// Human readable endpoint, used for logging and errors.
    fn endpoint(&self) -> String;

    /// Opens the connection and returns its read half along with a handle that can close it.
    fn connect(&mut self) -> io::Result<(Self::Receiver, Self::Closer)>;

    /// Writes all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Closes the connection. A blocked [`Receiver::receive`] must return once this has
    /// been called.
    fn disconnect(&mut self) -> io::Result<()>;
}

impl Receiver for TcpStream {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

impl Closer for TcpStream {
    fn close(&self) -> io::Result<()> {
        shutdown(self)
    }
}

fn shutdown(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }
}

impl Transport for TcpTransport {
    type Receiver = TcpStream;
    type Closer = TcpStream;

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&mut self) -> io::Result<(TcpStream, TcpStream)> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let closer = stream.try_clone()?;
        debug!("tcp connection established with {}", self.endpoint());

        self.stream = Some(stream);
        Ok((reader, closer))
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        trace!("writing {} bytes to {}:{}", bytes.len(), self.host, self.port);
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn disconnect(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(stream) => shutdown(&stream),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn send_without_connect() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);

        let err = transport.send(b"hello").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn send_and_receive_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::new("127.0.0.1", port);

        let (mut reader, _closer) = transport.connect().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        transport.send(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        let mut buf = [0u8; 4];
        let mut read = 0;
        while read < buf.len() {
            read += reader.receive(&mut buf[read..]).unwrap();
        }
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn disconnect_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::new("127.0.0.1", port);

        let (mut reader, _closer) = transport.connect().unwrap();
        let _server = listener.accept().unwrap();
        transport.disconnect().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(reader.receive(&mut buf).unwrap_or(0), 0);
        assert!(transport.send(b"late").is_err());
    }

    #[test]
    fn closer_unblocks_reader_and_writer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::new("127.0.0.1", port);

        let (mut reader, closer) = transport.connect().unwrap();
        let _server = listener.accept().unwrap();
        closer.close().unwrap();
        closer.close().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(reader.receive(&mut buf).unwrap_or(0), 0);
        assert!(transport.send(b"late").is_err());
        transport.disconnect().unwrap();
    }

    #[test]
    fn endpoint_format() {
        assert_eq!(TcpTransport::new("db.local", 27017).endpoint(), "db.local:27017");
    }
}
