//! Connection Handler
//!
//! Each client gets its own task that runs in a loop, reading requests
//! and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, server assigns a ConnectionId
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  read request ◄── shutdown?  │
//!    │       │           deadline?  │
//!    │       ▼                      │
//!    │  execute (synchronous)       │
//!    │       │                      │
//!    │       ▼                      │
//!    │  write + flush reply         │
//!    │       │                      │
//!    │   [Loop back]                │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. EOF / QUIT / error / timeout / shutdown
//!        │
//!        ▼
//! 4. Session released, task ends
//! ```
//!
//! The handler is generic over the stream, so TCP and Unix sockets (and
//! in-memory mocks in tests) all run through the same code.

use crate::commands::{CommandHandler, Outcome};
use crate::protocol::{DecodeError, ParseError, Request, RequestReader, RespValue};
use crate::session::ConnectionId;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Malformed requests answered with a protocol error
    pub protocol_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Per-connection I/O deadlines. `None` means wait forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// How long a connection may sit idle waiting for the next request
    pub read_timeout: Option<Duration>,
    /// How long writing a single reply may take
    pub write_timeout: Option<Duration>,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing error that left the stream at an unknown position
    #[error("Protocol error: {0}")]
    Protocol(ParseError),

    /// Client went away in the middle of a request
    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Read timed out")]
    ReadTimeout,

    #[error("Write timed out")]
    WriteTimeout,
}

/// What the read side produced for the main loop.
enum Incoming {
    Request(Request),
    /// Recoverable framing error; reply and keep going
    Malformed(ParseError),
    /// Clean EOF or server shutdown
    Done,
}

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    reader: RequestReader<BufReader<ReadHalf<S>>>,
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    peer: String,
    id: ConnectionId,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,
    settings: ConnectionSettings,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(
        stream: S,
        peer: String,
        id: ConnectionId,
        command_handler: CommandHandler,
        settings: ConnectionSettings,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: RequestReader::new(BufReader::new(read_half)),
            writer: BufWriter::new(write_half),
            peer,
            id,
            command_handler,
            settings,
            stats,
            shutdown,
        }
    }

    /// Runs the connection to completion.
    ///
    /// The session is released however the loop ends.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(conn = %self.id, peer = %self.peer, "Client connected");

        let result = self.main_loop().await;

        self.command_handler.sessions().release(self.id);
        self.stats.connection_closed();

        match &result {
            Ok(()) => info!(conn = %self.id, peer = %self.peer, "Client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(conn = %self.id, peer = %self.peer, "Client disconnected mid-request")
            }
            Err(e) => warn!(conn = %self.id, peer = %self.peer, error = %e, "Connection closed"),
        }

        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = match self.next_request().await? {
                Incoming::Request(request) => request,
                Incoming::Malformed(err) => {
                    warn!(conn = %self.id, error = %err, "Protocol error");
                    self.stats.protocol_error();
                    self.send_reply(&protocol_error(&err)).await?;
                    continue;
                }
                Incoming::Done => return Ok(()),
            };

            debug!(
                conn = %self.id,
                framing = %request.framing,
                command = %request.name,
                args = request.args.len(),
                "Request received"
            );

            let outcome = self.command_handler.execute(self.id, &request);
            self.stats.command_processed();

            match outcome {
                Outcome::Reply(reply) => self.send_reply(&reply).await?,
                Outcome::Close(reply) => {
                    self.send_reply(&reply).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Waits for the next request, racing the read deadline and shutdown.
    ///
    /// A dropped shutdown sender counts as shutdown.
    async fn next_request(&mut self) -> Result<Incoming, ConnectionError> {
        let read = read_with_deadline(&mut self.reader, self.settings.read_timeout);

        let decoded = tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => {
                debug!(conn = %self.id, "Closing for shutdown");
                return Ok(Incoming::Done);
            }
            decoded = read => decoded,
        };

        match decoded {
            Ok(Some(request)) => Ok(Incoming::Request(request)),
            Ok(None) => Ok(Incoming::Done),
            Err(DecodeError::Protocol(err)) if !err.is_fatal() => Ok(Incoming::Malformed(err)),
            Err(DecodeError::Protocol(err)) => {
                self.stats.protocol_error();
                self.send_reply(&protocol_error(&err)).await?;
                Err(ConnectionError::Protocol(err))
            }
            Err(DecodeError::Io(err)) if err.kind() == io::ErrorKind::TimedOut => {
                Err(ConnectionError::ReadTimeout)
            }
            Err(DecodeError::Io(err)) => Err(classify_io(err)),
        }
    }

    /// Writes and flushes one reply.
    async fn send_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();

        let write = async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        };
        let written = match self.settings.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| ConnectionError::WriteTimeout)?,
            None => write.await,
        };
        written.map_err(classify_io)?;

        self.stats.bytes_written(bytes.len());
        trace!(conn = %self.id, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Reads one request, failing with `TimedOut` once `limit` elapses.
async fn read_with_deadline<R>(
    reader: &mut RequestReader<R>,
    limit: Option<Duration>,
) -> Result<Option<Request>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    match limit {
        Some(limit) => timeout(limit, reader.read_request())
            .await
            .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut).into())),
        None => reader.read_request().await,
    }
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion. Errors are
/// logged by the handler itself.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    id: ConnectionId,
    command_handler: CommandHandler,
    settings: ConnectionSettings,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite,
{
    let handler =
        ConnectionHandler::new(stream, peer, id, command_handler, settings, stats, shutdown);
    let _ = handler.run().await;
}

fn protocol_error(err: &ParseError) -> RespValue {
    RespValue::error(format!("ERR Protocol error: {}", err))
}

fn classify_io(err: io::Error) -> ConnectionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => ConnectionError::ClientDisconnected,
        _ => ConnectionError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionTable;
    use bytes::Bytes;
    use crate::storage::Registry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::{Builder, Mock};

    struct TestServer {
        addr: std::net::SocketAddr,
        sessions: Arc<SessionTable>,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Sender<bool>,
    }

    async fn create_test_server(settings: ConnectionSettings) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(SessionTable::new(Arc::new(Registry::new(15))));
        let stats = Arc::new(ConnectionStats::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handler = CommandHandler::new(Arc::clone(&sessions));
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let id = handler.sessions().next_id();
                tokio::spawn(handle_connection(
                    stream,
                    peer.to_string(),
                    id,
                    handler.clone(),
                    settings,
                    Arc::clone(&stats_clone),
                    shutdown_rx.clone(),
                ));
            }
        });

        TestServer {
            addr,
            sessions,
            stats,
            shutdown,
        }
    }

    async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn expect_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("server did not close the connection")
            .unwrap();
        assert_eq!(n, 0);
    }

    /// Runs a scripted stream through a handler until it finishes.
    async fn run_script(mock: Mock) -> (Result<(), ConnectionError>, Arc<SessionTable>) {
        let sessions = Arc::new(SessionTable::new(Arc::new(Registry::new(15))));
        run_script_with(mock, sessions).await
    }

    async fn run_script_with(
        mock: Mock,
        sessions: Arc<SessionTable>,
    ) -> (Result<(), ConnectionError>, Arc<SessionTable>) {
        let (_shutdown, shutdown_rx) = watch::channel(false);

        let handler = ConnectionHandler::new(
            mock,
            "mock".to_string(),
            sessions.next_id(),
            CommandHandler::new(Arc::clone(&sessions)),
            ConnectionSettings::default(),
            Arc::new(ConnectionStats::new()),
            shutdown_rx,
        );

        (handler.run().await, sessions)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = create_test_server(ConnectionSettings::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect_reply(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let server = create_test_server(ConnectionSettings::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$4\r\nAriz\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let server = create_test_server(ConnectionSettings::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        // Mixed framings in a single write
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\nSET k2 v2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\nGET k2\r\nEXISTS k1 k2 k3\r\n")
            .await
            .unwrap();

        expect_reply(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n:2\r\n").await;
    }

    #[tokio::test]
    async fn test_selection_is_per_connection() {
        let server = create_test_server(ConnectionSettings::default()).await;
        let mut a = TcpStream::connect(server.addr).await.unwrap();
        let mut b = TcpStream::connect(server.addr).await.unwrap();

        a.write_all(b"SELECT 3\r\nSET k v\r\nDBSIZE\r\n").await.unwrap();
        expect_reply(&mut a, b"+OK\r\n+OK\r\n:1\r\n").await;

        b.write_all(b"GET k\r\nDBSIZE\r\n").await.unwrap();
        expect_reply(&mut b, b"$-1\r\n:0\r\n").await;

        b.write_all(b"SELECT 3\r\nGET k\r\n").await.unwrap();
        expect_reply(&mut b, b"+OK\r\n$1\r\nv\r\n").await;
    }

    #[tokio::test]
    async fn test_connection_stats_and_release() {
        let server = create_test_server(ConnectionSettings::default()).await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client.write_all(b"SELECT 1\r\n").await.unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        // Stats are bumped after the flush returns
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.bytes_written.load(Ordering::Relaxed), 5);
        assert_eq!(server.sessions.len(), 1);

        // Close connection
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
        assert!(server.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_read_timeout_closes_idle_connection() {
        let settings = ConnectionSettings {
            read_timeout: Some(Duration::from_millis(50)),
            write_timeout: None,
        };
        let server = create_test_server(settings).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"PING\r\n").await.unwrap();
        expect_reply(&mut client, b"+PONG\r\n").await;

        expect_closed(&mut client).await;
        assert!(server.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let server = create_test_server(ConnectionSettings::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SELECT 2\r\n").await.unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        server.shutdown.send(true).unwrap();

        expect_closed(&mut client).await;
        assert!(server.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_quit_stops_processing() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"+OK\r\n")
            .build();

        let (result, sessions) = run_script(mock).await;
        assert!(result.is_ok());
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let mock = Builder::new()
            .read(b"FOO bar\r\nPING\r\n")
            .write(b"-ERR unknown command 'foo'\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (result, _) = run_script(mock).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_protocol_error_recovers() {
        let mock = Builder::new()
            .read(b"*x\r\nPING\r\n")
            .write(b"-ERR Protocol error: invalid multibulk length: x\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (result, _) = run_script(mock).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_blank_lines_and_empty_arrays_get_no_reply() {
        let mock = Builder::new()
            .read(b"\r\n*0\r\n*-1\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (result, _) = run_script(mock).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_oversize_inline_is_fatal() {
        let line = vec![b'a'; crate::protocol::parser::MAX_INLINE_SIZE + 1];
        let mock = Builder::new()
            .read(&line)
            .write(b"-ERR Protocol error: message too large: 65537 bytes (max: 65536)\r\n")
            .build();

        let (result, sessions) = run_script(mock).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ParseError::MessageTooLarge { .. }))
        ));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_bad_field_inside_array_closes_connection() {
        let registry = Arc::new(Registry::new(0));
        registry
            .get(0)
            .unwrap()
            .set(Bytes::from("k"), Bytes::from("v"));
        let sessions = Arc::new(SessionTable::new(Arc::clone(&registry)));
        let mock = Builder::new()
            .read(b"*2\r\n$4\r\nECHO\r\n$x\r\nFLUSHALL\r\n")
            .write(b"-ERR Protocol error: invalid bulk length: x\r\n")
            .build();

        let (result, _) = run_script_with(mock, sessions).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ParseError::InvalidBulkLength(_)))
        ));
        // The trailing field text never ran as a command
        assert_eq!(registry.get(0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eof_mid_request_is_disconnect() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let (result, _) = run_script(mock).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }
}
