//! Request interpretation and response text.
//!
//! A request payload is a base-10 signed 32-bit integer:
//!
//! ```text
//! request  = ["-"] 1*DIGIT
//! success  = "The cube root of " int " is " float "."
//! error    = DQUOTE text DQUOTE " is not integer"
//!          / text " is not 32-bit integer"
//! ```
//!
//! Success and error responses share the same framing. The receiver tells
//! them apart only by counting what it sent.

use crate::compute::cube_root;
use std::fmt;
use std::num::IntErrorKind;

/// Fractional digits printed for a cube root.
const ROOT_PRECISION: usize = 6;

/// Longest piece of a refused request echoed back in an error reply.
///
/// Keeps every error reply far below the frame limit, whatever the size of
/// the request that caused it.
const MAX_ECHO_LEN: usize = 64;

/// Why a request payload was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Text is not an integer literal
    NotInteger(String),
    /// Integer literal does not fit in 32 bits
    OutOfRange(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::NotInteger(text) => write!(f, "\"{}\" is not integer", text),
            RequestError::OutOfRange(text) => write!(f, "{} is not 32-bit integer", text),
        }
    }
}

impl std::error::Error for RequestError {}

/// Parse a request payload into its 32-bit value.
pub fn parse_request(payload: &[u8]) -> Result<i32, RequestError> {
    let text = match std::str::from_utf8(payload) {
        Ok(s) => s,
        Err(_) => {
            return Err(RequestError::NotInteger(echo(
                &String::from_utf8_lossy(payload),
            )))
        }
    };

    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::NotInteger(echo(text)));
    }

    text.parse::<i32>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            // Show the number itself, without leading zeros, when it is small
            // enough to parse at all.
            let shown = match text.parse::<i128>() {
                Ok(n) => n.to_string(),
                Err(_) => echo(text),
            };
            RequestError::OutOfRange(shown)
        }
        _ => RequestError::NotInteger(echo(text)),
    })
}

/// Cut `text` to at most `MAX_ECHO_LEN` bytes on a char boundary, marking
/// the cut with `...`.
fn echo(text: &str) -> String {
    if text.len() <= MAX_ECHO_LEN {
        return text.to_string();
    }

    let mut end = MAX_ECHO_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Answer to one request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The request parsed and its root was computed
    CubeRoot { value: i32, root: f64 },
    /// The request was refused
    Error(RequestError),
}

impl Response {
    /// Interpret a request payload and compute the answer.
    pub fn for_request(payload: &[u8]) -> Self {
        match parse_request(payload) {
            Ok(value) => Response::CubeRoot {
                value,
                root: cube_root(value),
            },
            Err(e) => Response::Error(e),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::CubeRoot { value, root } => write!(
                f,
                "The cube root of {} is {:.*}.",
                value, ROOT_PRECISION, root
            ),
            Response::Error(e) => write!(f, "{}", e),
        }
    }
}
