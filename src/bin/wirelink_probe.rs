use std::{
    error::Error,
    io, process,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    time::Duration,
};

use clap::Parser;
use wirelink::{
    Command, RawCodec, RawMessage, ReplyContext, Session, SessionConfig, SessionError,
    TcpTransport,
    cli::{next_command, to_hex},
    protocol::DEFAULT_MAX_FRAME_SIZE,
};

#[derive(Debug, Parser)]
#[command(version, about = "Send raw messages over a wirelink session", long_about = None)]
struct Cli {
    /// Server host
    host: String,
    /// Server port
    #[arg(default_value_t = 27017)]
    port: u16,
    /// Op code stamped on every message
    #[arg(long, default_value_t = 2004)]
    op_code: i32,
    /// Reply context: `admin`, a database name, or `database.collection`
    #[arg(long, default_value = "admin")]
    context: String,
    /// Largest frame accepted from the server
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,
    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let context: ReplyContext = cli.context.parse()?;
    let timeout = Duration::from_secs(cli.timeout);
    let config = SessionConfig::default().with_max_frame_size(cli.max_frame_size);
    let session = Arc::new(Session::with_config(
        TcpTransport::new(cli.host, cli.port),
        RawCodec::new(),
        config,
    ));
    session.connect()?;

    let interrupted = Arc::clone(&session);
    ctrlc::set_handler(move || {
        if let Err(e) = interrupted.disconnect() {
            eprintln!("failed to disconnect: {e}");
        }
        // The main thread may be parked on stdin; nothing else will wake it.
        process::exit(130);
    })?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    loop {
        let writer = StdOut {
            inner: stdout.lock(),
        };
        let body = match next_command(stdin.lock(), writer, || session.is_connected()) {
            Ok(Command::Exit) => break,
            Ok(Command::Empty) => continue,
            Ok(Command::Send(body)) => body,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let (tx, rx) = mpsc::channel();
        let sent = session.send(
            context.clone(),
            RawMessage::new(cli.op_code, body),
            move |reply| {
                let _ = tx.send(reply);
            },
        );
        match sent {
            Ok(id) => println!("sent request {id}"),
            Err(SessionError::NotConnected) => break,
            Err(e) => {
                eprintln!("send error: {e}");
                continue;
            }
        }

        match rx.recv_timeout(timeout) {
            Ok(reply) => {
                println!("{reply}");
                if !reply.documents.is_empty() {
                    println!("{}", to_hex(&reply.documents));
                }
            }
            Err(RecvTimeoutError::Timeout) => eprintln!("no reply within {}s", cli.timeout),
            Err(RecvTimeoutError::Disconnected) => eprintln!("session closed before a reply"),
        }
    }

    if session.is_connected() {
        session.disconnect()?;
    } else {
        eprintln!("session is closed");
    }
    Ok(())
}

/// StdOut wrapper that flushes content after every write.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
