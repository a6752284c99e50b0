//! Per-connection request loop.
//!
//! Each accepted connection is driven by one `Connection` through the
//! states below until it closes:
//!
//! ```text
//! AwaitingRequest -> Dispatching -> Responding -> AwaitingRequest
//!        \______________\_______________\________-> Closed
//! ```
//!
//! Malformed requests are answered in-band and keep the connection open.
//! End of stream, read or write faults, oversize frames and the idle
//! deadline close it.

use crate::codec::{FrameCodec, FrameError};
use crate::protocol::Response;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the next complete frame, idle deadline armed.
    AwaitingRequest,
    /// Interpreting a received frame.
    Dispatching,
    /// Writing the response frame.
    Responding,
    /// Connection is closed.
    Closed,
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its side.
    PeerClosed,
    /// No complete frame arrived before the idle deadline.
    IdleTimeout,
    /// A frame exceeded the maximum payload length.
    FrameTooLong,
    /// Reading from the stream failed.
    ReadFailed,
    /// Writing a response failed.
    WriteFailed,
}

/// A single client connection.
///
/// Owns the stream and its read buffer for the whole connection lifetime.
pub struct Connection<S> {
    stream: BufReader<S>,
    codec: FrameCodec,
    idle_timeout: Duration,
    state: ConnState,
    served: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: FrameCodec, idle_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            codec,
            idle_timeout,
            state: ConnState::AwaitingRequest,
            served: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of responses written so far.
    #[cfg(test)]
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// Serve requests until the connection closes.
    pub async fn run(mut self) -> CloseReason {
        loop {
            let payload = match self.await_request().await {
                Ok(payload) => payload,
                Err(reason) => return self.close(reason).await,
            };

            let response = self.dispatch(&payload);

            if let Err(reason) = self.respond(&response).await {
                return self.close(reason).await;
            }
        }
    }

    /// Wait for the next frame, bounded by the idle timeout.
    async fn await_request(&mut self) -> Result<BytesMut, CloseReason> {
        self.state = ConnState::AwaitingRequest;

        let read = self.codec.decode_frame(&mut self.stream);
        match tokio::time::timeout(self.idle_timeout, read).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(FrameError::ConnectionClosed)) => {
                debug!("Connection closed by client");
                Err(CloseReason::PeerClosed)
            }
            Ok(Err(e @ FrameError::FrameTooLong(_))) => {
                warn!(error = %e, "Dropping connection");
                Err(CloseReason::FrameTooLong)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Read error");
                Err(CloseReason::ReadFailed)
            }
            Err(_) => {
                info!(
                    timeout_ms = self.idle_timeout.as_millis() as u64,
                    "Closing idle connection"
                );
                Err(CloseReason::IdleTimeout)
            }
        }
    }

    fn dispatch(&mut self, payload: &[u8]) -> Response {
        self.state = ConnState::Dispatching;
        debug!(request = %String::from_utf8_lossy(payload), "Received request");

        let response = Response::for_request(payload);
        if let Response::Error(ref e) = response {
            debug!(error = %e, "Rejected request");
        }
        response
    }

    async fn respond(&mut self, response: &Response) -> Result<(), CloseReason> {
        self.state = ConnState::Responding;

        let text = response.to_string();
        match self.codec.write_frame(&mut self.stream, text.as_bytes()).await {
            Ok(written) => {
                self.served += 1;
                debug!(written, response = %text, "Sent response");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Write error");
                Err(CloseReason::WriteFailed)
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) -> CloseReason {
        self.state = ConnState::Closed;

        if reason != CloseReason::WriteFailed {
            // Best effort; the stream is dropped right after either way.
            let _ = self.stream.shutdown().await;
        }

        debug!(?reason, served = self.served, "Connection closed");
        reason
    }
}
