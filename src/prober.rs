use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tokio::time;
use tracing::{debug, trace};

use crate::types::{Port, PortState};

/// Result of one connection attempt.
#[derive(Debug)]
pub enum Attempt<S> {
    /// The handshake completed; the stream stays open until dropped.
    Connected(S),
    /// Refused, timed out, or any other connect error.
    Failed(io::Error),
    /// No endpoint could be created for the attempt.
    NoEndpoint(io::Error),
}

/// Opens connections for the prober.
pub trait Connector {
    type Stream: Send;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = Attempt<Self::Stream>> + Send;
}

/// Connects with real TCP sockets, optionally bounded by a timeout.
///
/// Without a timeout the platform's own connect timeout applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector {
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = Attempt<TcpStream>> + Send {
        let timeout = self.timeout;
        async move {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            };
            let socket = match socket {
                Ok(s) => s,
                Err(e) => return Attempt::NoEndpoint(e),
            };

            let res = match timeout {
                Some(t) => match time::timeout(t, socket.connect(addr)).await {
                    Ok(r) => r,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
                },
                None => socket.connect(addr).await,
            };

            match res {
                Ok(stream) => Attempt::Connected(stream),
                Err(e) => Attempt::Failed(e),
            }
        }
    }
}

/// The loopback endpoint for `port`.
pub fn loopback(port: Port) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
}

/// Probe one loopback port and classify it.
///
/// Returns `None` when the port must be skipped because the first endpoint
/// could not be created. Otherwise both probes are released before returning.
pub async fn probe_port<C: Connector>(connector: &C, port: Port) -> Option<PortState> {
    probe_addr(connector, loopback(port)).await
}

/// Same as [`probe_port`] for an explicit address.
pub async fn probe_addr<C: Connector>(connector: &C, addr: SocketAddr) -> Option<PortState> {
    let first = match connector.connect(addr).await {
        Attempt::Connected(stream) => stream,
        Attempt::Failed(e) => {
            trace!(%addr, error = %e, "connect failed");
            return Some(PortState::Unreachable);
        }
        Attempt::NoEndpoint(e) => {
            debug!(%addr, error = %e, "no endpoint for first probe, skipping port");
            return None;
        }
    };

    // The first connection is held while the second one is attempted: only a
    // listening socket can accept both.
    let state = classify_followup(connector, addr).await;
    drop(first);
    Some(state)
}

/// Second, independent probe against an address already known to accept a connection.
pub async fn classify_followup<C: Connector>(connector: &C, addr: SocketAddr) -> PortState {
    match connector.connect(addr).await {
        Attempt::Connected(_stream) => PortState::Listening,
        Attempt::Failed(e) => {
            trace!(%addr, error = %e, "second connect failed");
            PortState::Established
        }
        Attempt::NoEndpoint(e) => {
            debug!(%addr, error = %e, "no endpoint for second probe");
            PortState::Open
        }
    }
}
