//! Network listeners
//!
//! A listener owns one bound socket (TCP or UDP), turns inbound bytes into discrete
//! messages and hands each one to a [`MessageSink`] together with the sender's address.
//! Every blocking operation is raced against a [`CancellationToken`]; cancelling makes the
//! loop return and the socket is closed when the listener is dropped. Sockets are never
//! reused: restarting binds a fresh listener.

mod tcp;
mod udp;

pub use tcp::TcpLogListener;
pub use udp::UdpLogListener;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entry::Protocol;
use crate::error::ListenerError;

/// Default syslog port
pub const DEFAULT_PORT: u16 = 514;

/// Receives every complete inbound message
pub trait MessageSink: Send + Sync {
    /// Handle one message; `source` is the sender IP or "System"
    fn deliver(&self, message: String, source: String);
}

/// How a TCP byte stream is split into messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One message per newline-terminated line
    #[default]
    Line,
    /// One message per socket read (up to 4096 bytes)
    Chunk,
}

/// Decode received bytes into a message (lossy UTF-8, surrounding whitespace trimmed)
pub(crate) fn decode_message(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// A bound listener of either protocol
pub enum Listener {
    Tcp(TcpLogListener),
    Udp(UdpLogListener),
}

impl Listener {
    /// Bind a listener for `protocol` on `addr`
    pub async fn bind(
        protocol: Protocol,
        addr: SocketAddr,
        framing: Framing,
    ) -> Result<Self, ListenerError> {
        match protocol {
            Protocol::Tcp => Ok(Listener::Tcp(TcpLogListener::bind(addr, framing).await?)),
            Protocol::Udp => Ok(Listener::Udp(UdpLogListener::bind(addr).await?)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Listener::Tcp(_) => Protocol::Tcp,
            Listener::Udp(_) => Protocol::Udp,
        }
    }

    /// Address the socket is actually bound to (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Listener::Tcp(l) => l.local_addr(),
            Listener::Udp(l) => l.local_addr(),
        }
    }

    /// Run until cancelled or a socket-level error occurs
    ///
    /// Returns `Ok(())` on cancellation; errors caused by the shutdown itself are not
    /// reported.
    pub async fn run(
        self,
        sink: Arc<dyn MessageSink>,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        let result = match self {
            Listener::Tcp(l) => l.run(sink, cancel.clone()).await,
            Listener::Udp(l) => l.run(sink, cancel.clone()).await,
        };
        match result {
            Err(_) if cancel.is_cancelled() => Ok(()),
            other => other,
        }
    }
}
