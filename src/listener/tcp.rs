//! TCP listener
//!
//! Accepts connections and handles each one in its own task. A failing connection only
//! ends that connection; the accept loop keeps running.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::SYSTEM_SOURCE;
use crate::error::ListenerError;

use super::{decode_message, Framing, MessageSink};

/// Bytes read per message in chunk framing
pub const CHUNK_SIZE: usize = 4096;

/// Longest line emitted as one message in line framing
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Message recorded when a client connects
pub const CONNECTION_ESTABLISHED: &str = "Connection established";

/// TCP listener bound to a local address
pub struct TcpLogListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    framing: Framing,
}

impl TcpLogListener {
    pub async fn bind(addr: SocketAddr, framing: Framing) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!(addr = %local_addr, framing = ?framing, "TCP listener bound");
        Ok(Self {
            listener,
            local_addr,
            framing,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until cancelled, then wait for every handler to finish
    pub async fn run(
        self,
        sink: Arc<dyn MessageSink>,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        let handlers_cancel = cancel.child_token();
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted TCP connection");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            self.framing,
                            Arc::clone(&sink),
                            handlers_cancel.child_token(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        warn!("Dropped connection during accept: {}", e);
                    }
                    Err(e) => break Err(ListenerError::Accept(e)),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        handlers_cancel.cancel();
        while connections.join_next().await.is_some() {}
        drop(self.listener);

        info!(addr = %self.local_addr, "TCP listener stopped");
        result
    }
}

/// Errors that concern a single pending connection rather than the listening socket
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    framing: Framing,
    sink: Arc<dyn MessageSink>,
    cancel: CancellationToken,
) {
    let source = peer.ip().to_string();
    sink.deliver(CONNECTION_ESTABLISHED.to_string(), source.clone());

    let result = match framing {
        Framing::Line => read_lines(stream, &source, sink.as_ref(), &cancel).await,
        Framing::Chunk => read_chunks(stream, &source, sink.as_ref(), &cancel).await,
    };

    if let Err(e) = result {
        if !cancel.is_cancelled() {
            warn!(peer = %peer, "Error processing client: {}", e);
            sink.deliver(
                format!("Error processing client: {}", e),
                SYSTEM_SOURCE.to_string(),
            );
        }
    }
    debug!(peer = %peer, "TCP connection closed");
}

fn emit(bytes: &[u8], source: &str, sink: &dyn MessageSink) {
    let message = decode_message(bytes);
    if !message.is_empty() {
        sink.deliver(message, source.to_string());
    }
}

async fn read_lines(
    stream: TcpStream,
    source: &str,
    sink: &dyn MessageSink,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES);
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = limited.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        emit(&line, source, sink);
    }
}

async fn read_chunks(
    mut stream: TcpStream,
    source: &str,
    sink: &dyn MessageSink,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = stream.read(&mut buf) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        emit(&buf[..read], source, sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::test_support::RecordingSink;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn start(
        framing: Framing,
    ) -> (
        SocketAddr,
        Arc<RecordingSink>,
        CancellationToken,
        tokio::task::JoinHandle<Result<(), ListenerError>>,
    ) {
        let listener = TcpLogListener::bind("127.0.0.1:0".parse().unwrap(), framing)
            .await
            .unwrap();
        let addr = listener.local_addr();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listener.run(sink.clone(), cancel.clone()));
        (addr, sink, cancel, handle)
    }

    #[tokio::test]
    async fn test_line_framing_splits_messages() {
        let (addr, sink, cancel, handle) = start(Framing::Line).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"first line\nsecond line\r\n\n  third  \n").await.unwrap();
        client.shutdown().await.unwrap();

        let messages = sink.wait_for(4).await;
        assert_eq!(messages[0].0, CONNECTION_ESTABLISHED);
        assert_eq!(messages[0].1, "127.0.0.1");
        let texts: Vec<&str> = messages[1..].iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(texts, vec!["first line", "second line", "third"]);
        assert!(messages[1..].iter().all(|(_, s)| s == "127.0.0.1"));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_line_framing_flushes_unterminated_tail_on_eof() {
        let (addr, sink, cancel, handle) = start(Framing::Line).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"no newline at end").await.unwrap();
        drop(client);

        let messages = sink.wait_for(2).await;
        assert_eq!(messages[1].0, "no newline at end");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chunk_framing_emits_each_read() {
        let (addr, sink, cancel, handle) = start(Framing::Chunk).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"  hello world \n").await.unwrap();
        client.flush().await.unwrap();

        let messages = sink.wait_for(2).await;
        assert_eq!(messages[1].0, "hello world");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let (addr, sink, cancel, handle) = start(Framing::Line).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let b = TcpStream::connect(addr).await.unwrap();
        drop(b);
        a.write_all(b"still alive\n").await.unwrap();

        let messages = sink.wait_for(3).await;
        assert!(messages.iter().any(|(m, _)| m == "still alive"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_open_connections_and_closes_socket() {
        let (addr, sink, cancel, handle) = start(Framing::Line).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        sink.wait_for(1).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should stop promptly")
            .unwrap()
            .unwrap();

        // Handler closed its side of the connection
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("connection should be closed");
        assert!(matches!(read, Ok(0) | Err(_)));

        // Listening socket is gone
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
