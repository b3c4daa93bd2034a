//! Connection Handler
//!
//! Each accepted client gets its own task running a [`ConnectionHandler`]:
//! read bytes, parse commands, execute, reply, repeat. TCP is a stream, so
//! the handler accumulates incoming data in a `BytesMut` buffer; a single
//! read may carry half a command or several pipelined ones, and both cases
//! fall out of the parse-then-advance loop.
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ConnectionHandler task spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  read bytes ──> parse ──>    │
//!    │  execute ──> send reply      │
//!    │        [loop back]           │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects: drain the write batch, close
//! ```
//!
//! A malformed frame does not kill the connection: the handler replies
//! `ERROR: Unknown command`, drops the partial input, and keeps reading.
//! The task ends on an I/O error, a disconnect, or the server's shutdown
//! signal, and in every case the handler drains its write batcher before
//! going away so acknowledged writes reach the store.

use crate::commands::CommandHandler;
use crate::protocol::{parse, reply};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Maximum size for the read buffer (4 MB).
const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
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

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command left in the buffer)
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Manages the buffer, parsing, and replies for one connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            shutdown_rx,
        }
    }

    /// Runs the connection to completion, then drains the write batch.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        // Acknowledged writes may still sit in the batch; apply them before
        // the batcher goes away with the connection.
        self.command_handler.shutdown().await;
        self.stats.connection_closed();
        result
    }

    /// The read-parse-execute-reply loop. Exits cleanly when the server
    /// signals shutdown.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            loop {
                match parse(&self.buffer) {
                    Ok(Some((command, consumed))) => {
                        self.buffer.advance(consumed);
                        trace!(
                            client = %self.addr,
                            command = %command,
                            consumed,
                            "parsed command"
                        );
                        let response = self.command_handler.execute(command);
                        self.stats.command_processed();
                        self.send_reply(&response).await?;
                    }
                    Ok(None) => break, // need more data
                    Err(e) => {
                        // Malformed frame: drop the partial input, tell the
                        // client, and keep the connection.
                        warn!(client = %self.addr, error = %e, "parse error");
                        self.buffer.clear();
                        self.send_reply(reply::UNKNOWN).await?;
                    }
                }
            }

            tokio::select! {
                result = self.read_more_data() => result?,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(client = %self.addr, "closing connection on server shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");

        Ok(())
    }

    async fn send_reply(&mut self, response: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(response).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(response.len());
        Ok(())
    }
}

/// Creates a [`ConnectionHandler`] and runs it to completion, swallowing
/// the expected disconnect errors.
///
/// `shutdown` is the server-wide stop signal: when it fires, the handler
/// finishes its current command, drains its write batch, and closes.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, shutdown);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct TestServer {
        addr: SocketAddr,
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
        shutdown_tx: watch::Sender<bool>,
        _dir: TempDir,
    }

    async fn create_test_server() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Store::open(dir.path().join("wal.log")));
        let stats = Arc::new(ConnectionStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let store_clone = Arc::clone(&store);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&store_clone));
                let stats = Arc::clone(&stats_clone);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler,
                    stats,
                    shutdown_rx,
                ));
            }
        });

        TestServer {
            addr,
            store,
            stats,
            shutdown_tx,
            _dir: dir,
        }
    }

    async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    /// Batched writes land within a flush interval or two.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_set_get_del_over_socket() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET foo bar\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        settle().await;

        client.write_all(b"GET foo\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"bar\n");

        client.write_all(b"DEL foo\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        settle().await;

        client.write_all(b"GET foo\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"(nil)\n");
    }

    #[tokio::test]
    async fn test_value_with_spaces_over_socket() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"SET greeting hello world\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        settle().await;

        client.write_all(b"GET greeting\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"hello world\n");
    }

    #[tokio::test]
    async fn test_mget_partial_over_socket() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET a 1\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        client.write_all(b"SET b 2\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        settle().await;

        client.write_all(b"MGET a b c\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"1 2 (nil)\n");
    }

    #[tokio::test]
    async fn test_length_prefixed_set_get() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\nEX 5\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        settle().await;

        // The binary form keeps "EX 5" as a literal value.
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"EX 5\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"SET k1 v1\nSET k2 v2\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        while received.len() < 6 {
            let chunk = read_reply(&mut client).await;
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"OK\nOK\n");

        settle().await;
        client.write_all(b"MGET k1 k2\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"v1 v2\n");
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"NONSENSE stuff\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"ERROR: Unknown command\n");

        // Malformed length-prefixed frame: same reply, connection survives.
        client.write_all(b"*bad\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"ERROR: Unknown command\n");

        client.write_all(b"SET still here\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
    }

    #[tokio::test]
    async fn test_pending_writes_applied_on_disconnect() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET parting gift\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");
        drop(client);

        // The handler drains its batch as the connection closes.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            server.store.get(&bytes::Bytes::from("parting")),
            Some(bytes::Bytes::from("gift"))
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_drains_batch_and_closes() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"SET parting words\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"OK\n");

        // Server-side shutdown: the handler drains its batch and closes
        // the socket without waiting for the client to hang up.
        server.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            server.store.get(&bytes::Bytes::from("parting")),
            Some(bytes::Bytes::from("words"))
        );
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server should have closed the connection");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server().await;
        let stats = &server.stats;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"STATS\n").await.unwrap();
        let _ = read_reply(&mut client).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
