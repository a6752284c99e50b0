//! TCP listener for the cube root service.
//!
//! Binds the configured address, accepts connections in a loop and hands
//! each one to its own `Connection` task. A stalled connection never holds
//! up the accept loop or any other connection.

use crate::codec::FrameCodec;
use crate::config::Config;
use crate::connection::Connection;
use crate::lifecycle::Shutdown;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, Instrument};

/// Server instance
pub struct Server {
    listener: TcpListener,
    codec: FrameCodec,
    idle_timeout: Duration,
}

impl Server {
    /// Bind the listening socket. Failing here is fatal for the caller.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = tokio::net::lookup_host(&config.listen)
            .await
            .map_err(|e| ServerError::Resolve(config.listen.clone(), e))?
            .next()
            .ok_or_else(|| ServerError::NoAddress(config.listen.clone()))?;

        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))?;

        info!(address = %addr, "Server listening");

        Ok(Server {
            listener,
            codec: FrameCodec::new(config.delimiter, config.max_frame_len),
            idle_timeout: config.idle_timeout,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Connections already being served keep running after this returns;
    /// they end on their own through EOF or the idle timeout.
    pub async fn run(self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Server stopped accepting connections");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "Accepted connection");

                        let conn = Connection::new(stream, self.codec, self.idle_timeout);
                        tokio::spawn(
                            async move {
                                let reason = conn.run().await;
                                debug!(?reason, "Handler finished");
                            }
                            .instrument(info_span!("conn", peer = %peer)),
                        );
                    }
                    Err(e) => accept_failed(&e).await,
                },
            }
        }
    }
}

/// Pause before accepting again after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Log an accept failure and back off. Errors such as running out of file
/// descriptors persist until some connection closes.
async fn accept_failed(e: &io::Error) {
    error!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Build the listening socket with address reuse and the configured backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Listener setup errors
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, io::Error),
    NoAddress(String),
    Bind(SocketAddr, io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(addr, e) => write!(f, "Failed to resolve '{}': {}", addr, e),
            ServerError::NoAddress(addr) => write!(f, "No address found for '{}'", addr),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) | ServerError::Bind(_, e) => Some(e),
            ServerError::NoAddress(_) => None,
        }
    }
}
