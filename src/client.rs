//! Client driver.
//!
//! Dials the server, pipelines a batch of requests without waiting for
//! answers, then reads back one response per request in order. The wire
//! carries no correlation ids, so the n-th response is taken to answer the
//! n-th request.

use crate::codec::{FrameCodec, FrameError};
use crate::config::Config;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{info, info_span, warn, Instrument};

/// What one client run produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Requests written to the connection, in order.
    pub requests: Vec<i32>,
    /// Responses read back, in order.
    pub responses: Vec<String>,
    /// The error that ended the batch early, if any.
    pub error: Option<FrameError>,
}

impl BatchReport {
    /// Every request was written and answered.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.responses.len() == self.requests.len()
    }
}

/// A client driver
#[derive(Debug, Clone)]
pub struct Client {
    id: usize,
    codec: FrameCodec,
    connect_timeout: Duration,
}

impl Client {
    pub fn new(id: usize, config: &Config) -> Self {
        Self {
            id,
            codec: FrameCodec::new(config.delimiter, config.max_frame_len),
            connect_timeout: config.connect_timeout,
        }
    }

    /// Send `batch_size` random integers and collect the responses.
    pub async fn run(&self, address: &str, batch_size: usize) -> Result<BatchReport, ClientError> {
        let requests: Vec<i32> = (0..batch_size).map(|_| rand::random()).collect();
        self.run_with(address, &requests).await
    }

    /// Send `requests` and collect the responses.
    pub async fn run_with(
        &self,
        address: &str,
        requests: &[i32],
    ) -> Result<BatchReport, ClientError> {
        self.drive(address, requests)
            .instrument(info_span!("client", id = self.id))
            .await
    }

    async fn drive(&self, address: &str, requests: &[i32]) -> Result<BatchReport, ClientError> {
        let stream = self.dial(address, TcpStream::connect(address)).await?;

        if let (Ok(remote), Ok(local)) = (stream.peer_addr(), stream.local_addr()) {
            info!(remote = %remote, local = %local, "Connected to server");
        }

        let (read_half, write_half) = stream.into_split();
        Ok(self.exchange(read_half, write_half, requests).await)
    }

    /// Wait for `connect` to finish, bounded by the connect timeout.
    async fn dial<F, S>(&self, address: &str, connect: F) -> Result<S, ClientError>
    where
        F: Future<Output = io::Result<S>>,
    {
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                warn!(address, error = %e, "Dial error");
                Err(ClientError::Connect(address.to_string(), e))
            }
            Err(_) => {
                warn!(address, "Dial timed out");
                Err(ClientError::ConnectTimeout(
                    address.to_string(),
                    self.connect_timeout,
                ))
            }
        }
    }

    /// Write every request, then read one response per request written.
    async fn exchange<R, W>(&self, reader: R, mut writer: W, requests: &[i32]) -> BatchReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut report = BatchReport::default();

        for &request in requests {
            let payload = request.to_string();
            match self.codec.write_frame(&mut writer, payload.as_bytes()).await {
                Ok(written) => {
                    info!(written, request, "Sent request");
                    report.requests.push(request);
                }
                Err(e) => {
                    warn!(error = %e, "Write error");
                    report.error = Some(e);
                    break;
                }
            }
        }

        let mut reader = BufReader::new(reader);
        for _ in 0..report.requests.len() {
            match self.codec.decode_frame(&mut reader).await {
                Ok(payload) => {
                    let response = String::from_utf8_lossy(&payload).into_owned();
                    info!(response = %response, "Received response");
                    report.responses.push(response);
                }
                Err(e) => {
                    match e {
                        FrameError::ConnectionClosed => info!("Connection closed by server"),
                        ref other => warn!(error = %other, "Read error"),
                    }
                    if report.error.is_none() {
                        report.error = Some(e);
                    }
                    break;
                }
            }
        }

        report
    }
}

/// Client connection errors
#[derive(Debug)]
pub enum ClientError {
    Connect(String, io::Error),
    ConnectTimeout(String, Duration),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            ClientError::ConnectTimeout(addr, timeout) => write!(
                f,
                "Timed out connecting to {} after {}ms",
                addr,
                timeout.as_millis()
            ),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect(_, e) => Some(e),
            ClientError::ConnectTimeout(..) => None,
        }
    }
}
