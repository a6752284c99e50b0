//! Delimiter framing for the wire protocol.
//!
//! A frame is a payload followed by exactly one delimiter byte. There is no
//! length prefix, so the payload must never contain the delimiter:
//!
//! ```text
//! Request:  27\t
//! Response: The cube root of 27 is 3.000000.\t
//! ```
//!
//! Decoding pulls one byte at a time so that nothing past the delimiter is
//! taken from the reader. Callers wrap the socket in a per-connection
//! `BufReader` to avoid a syscall per byte.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default frame delimiter (horizontal tab).
pub const DEFAULT_DELIMITER: u8 = b'\t';

/// Default upper bound on a decoded payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Framing errors
#[derive(Debug)]
pub enum FrameError {
    /// The stream ended before a delimiter was seen
    ConnectionClosed,
    /// The payload grew past the configured maximum
    FrameTooLong(usize),
    /// A payload handed to the encoder contains the delimiter
    DelimiterInPayload,
    /// Any other read or write fault
    Io(io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::ConnectionClosed => write!(f, "Connection closed by peer"),
            FrameError::FrameTooLong(max) => write!(f, "Frame exceeds {} bytes", max),
            FrameError::DelimiterInPayload => write!(f, "Payload contains the delimiter"),
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(e)
        }
    }
}

/// Single-byte delimiter codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    delimiter: u8,
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(delimiter: u8, max_frame_len: usize) -> Self {
        Self {
            delimiter,
            max_frame_len,
        }
    }

    /// Read the next frame and return its payload (without the delimiter).
    ///
    /// An empty payload is valid. Reaching end-of-stream first yields
    /// `ConnectionClosed` and drops whatever partial payload was read.
    pub async fn decode_frame<R>(&self, reader: &mut R) -> Result<BytesMut, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = BytesMut::new();

        loop {
            let byte = reader.read_u8().await?;
            if byte == self.delimiter {
                return Ok(payload);
            }
            if payload.len() == self.max_frame_len {
                return Err(FrameError::FrameTooLong(self.max_frame_len));
            }
            payload.put_u8(byte);
        }
    }

    /// Append the delimiter to `payload`.
    pub fn encode_frame(&self, payload: &[u8]) -> Result<BytesMut, FrameError> {
        if payload.contains(&self.delimiter) {
            return Err(FrameError::DelimiterInPayload);
        }

        let mut frame = BytesMut::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.put_u8(self.delimiter);
        Ok(frame)
    }

    /// Encode `payload` and write the whole frame. Returns bytes written.
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<usize, FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.encode_frame(payload)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(frame.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_decode_single_frame() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new().read(b"27\t").build();

        let payload = codec.decode_frame(&mut mock).await.unwrap();
        assert_eq!(&payload[..], b"27");
    }

    #[tokio::test]
    async fn test_decode_frame_split_across_reads() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new().read(b"-21").read(b"47").read(b"\t").build();

        let payload = codec.decode_frame(&mut mock).await.unwrap();
        assert_eq!(&payload[..], b"-2147");
    }

    #[tokio::test]
    async fn test_decode_empty_frame() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new().read(b"\t").build();

        let payload = codec.decode_frame(&mut mock).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_decode_leaves_next_frame_unread() {
        let codec = FrameCodec::default();
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"1\t2\t3").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        assert_eq!(&codec.decode_frame(&mut reader).await.unwrap()[..], b"1");
        assert_eq!(&codec.decode_frame(&mut reader).await.unwrap()[..], b"2");
        assert!(matches!(
            codec.decode_frame(&mut reader).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_decode_eof_before_any_byte() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new().build();

        assert!(matches!(
            codec.decode_frame(&mut mock).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_decode_read_error() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new()
            .read(b"12")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match codec.decode_frame(&mut mock).await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_frame_too_long() {
        let codec = FrameCodec::new(b'\t', 4);
        let mut mock = Builder::new().read(b"12345").build();

        assert!(matches!(
            codec.decode_frame(&mut mock).await,
            Err(FrameError::FrameTooLong(4))
        ));
    }

    #[tokio::test]
    async fn test_decode_frame_at_max_length() {
        let codec = FrameCodec::new(b'\t', 4);
        let mut mock = Builder::new().read(b"1234\t").build();

        assert_eq!(&codec.decode_frame(&mut mock).await.unwrap()[..], b"1234");
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let codec = FrameCodec::new(b'|', DEFAULT_MAX_FRAME_LEN);
        let mut mock = Builder::new().read(b"a\tb|").build();

        assert_eq!(&codec.decode_frame(&mut mock).await.unwrap()[..], b"a\tb");
        assert_eq!(&codec.encode_frame(b"x").unwrap()[..], b"x|");
    }

    #[test]
    fn test_encode_frame() {
        let codec = FrameCodec::default();
        assert_eq!(&codec.encode_frame(b"-8").unwrap()[..], b"-8\t");
        assert_eq!(&codec.encode_frame(b"").unwrap()[..], b"\t");
    }

    #[test]
    fn test_encode_rejects_delimiter_in_payload() {
        let codec = FrameCodec::default();
        assert!(matches!(
            codec.encode_frame(b"1\t2"),
            Err(FrameError::DelimiterInPayload)
        ));
    }

    #[tokio::test]
    async fn test_encode_then_decode() {
        let codec = FrameCodec::default();
        for payload in [&b""[..], &b"0"[..], &b"The cube root of 8 is 2.000000."[..]] {
            let frame = codec.encode_frame(payload).unwrap();
            let mut mock = Builder::new().read(&frame).build();
            assert_eq!(&codec.decode_frame(&mut mock).await.unwrap()[..], payload);
        }
    }

    #[tokio::test]
    async fn test_write_frame() {
        let codec = FrameCodec::default();
        let mut mock = Builder::new().write(b"125\t").build();

        assert_eq!(codec.write_frame(&mut mock, b"125").await.unwrap(), 4);
    }
}
