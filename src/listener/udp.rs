//! UDP listener
//!
//! Each datagram becomes exactly one message; the sender is the datagram's source
//! endpoint.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::error::ListenerError;

use super::{decode_message, MessageSink};

/// Largest datagram payload accepted
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP socket bound to a local address
pub struct UdpLogListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpLogListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!(addr = %local_addr, "UDP listener bound");
        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive datagrams until cancelled
    pub async fn run(
        self,
        sink: Arc<dyn MessageSink>,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        trace!(peer = %peer, len, "Received datagram");
                        sink.deliver(decode_message(&buf[..len]), peer.ip().to_string());
                    }
                    // ICMP port-unreachable from an earlier send surfaces here on some platforms
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                        warn!("Ignoring UDP connection reset: {}", e);
                    }
                    Err(e) => break Err(ListenerError::Receive(e)),
                },
            }
        };

        drop(self.socket);
        info!(addr = %self.local_addr, "UDP listener stopped");
        result
    }
}
