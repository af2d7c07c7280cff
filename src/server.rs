//! TCP server for answering active checks requests.
//!
//! Every accepted connection is handled by its own task: one framed
//! request is read, answered if it is an active checks query, and the
//! connection is closed.

use crate::config::Options;
use crate::protocol::{self, FrameError};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

/// The only request this server answers.
pub const ACTIVE_CHECKS_REQUEST: &str = "active checks";

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Errors ending the handling of a single connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("read failed: {0}")]
    Read(#[source] FrameError),

    #[error("cannot decode request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Write(#[source] FrameError),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    active_checks: Bytes,
    timeout: Duration,
}

impl Server {
    /// Bind on all interfaces at the configured port.
    pub fn bind(options: &Options, active_checks: Bytes) -> io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, options.port));
        Self::bind_addr(addr, active_checks, options.timeout())
    }

    /// Bind on an explicit address.
    pub fn bind_addr(addr: SocketAddr, active_checks: Bytes, timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            active_checks,
            timeout,
        })
    }

    /// Address the listener is bound to.
    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until accepting fails.
    ///
    /// Each connection is served on its own task; there is no limit on
    /// connections in flight. An accept error is returned immediately.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            trace!(peer = %peer, "New connection");

            let active_checks = self.active_checks.clone();
            let timeout = self.timeout;
            tokio::spawn(serve_connection(stream, peer, active_checks, timeout));
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Handle one connection and log how it ended.
async fn serve_connection<S, P>(stream: S, peer: P, active_checks: Bytes, timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: fmt::Display,
{
    match handle_connection(stream, &active_checks, timeout).await {
        Ok(()) => debug!(peer = %peer, bytes = active_checks.len(), "Sent active checks"),
        Err(e) => warn!(peer = %peer, error = %e, "Request failed"),
    }
}

/// Read one request from `stream` and answer it.
///
/// The stream is owned here and dropped, closing the connection, on every
/// return path.
pub async fn handle_connection<S>(
    mut stream: S,
    active_checks: &[u8],
    timeout: Duration,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = protocol::read_frame(&mut stream, timeout)
        .await
        .map_err(ConnectionError::Read)?;

    debug!(request = %String::from_utf8_lossy(&payload), "Got request");

    let pairs: Map<String, Value> = serde_json::from_slice(&payload)?;

    match pairs.get("request") {
        Some(Value::String(request)) if request == ACTIVE_CHECKS_REQUEST => {
            protocol::write_frame(&mut stream, active_checks, timeout)
                .await
                .map_err(ConnectionError::Write)
        }
        other => Err(ConnectionError::Unsupported(describe_request(other))),
    }
}

fn describe_request(request: Option<&Value>) -> String {
    match request {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<missing>".to_string(),
    }
}
