//! Newline-delimited JSON wire protocol spoken with the production daemon.
//!
//! ```text
//! -> {"seq":7,"cmd":"get_spec","args":["PROJ","SH010"]}
//! <- {"seq":7,"status":"ok","payload":{"width":1920,...}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DaemonError;

/// Longest accepted line, newline excluded.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub seq: u64,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    NotFound,
    InvalidArgument,
    ServerError,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::NotFound => "not_found",
            ResponseStatus::InvalidArgument => "invalid_argument",
            ResponseStatus::ServerError => "server_error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub seq: u64,
    pub status: ResponseStatus,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl DaemonResponse {
    pub fn ok(seq: u64, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            seq,
            status: ResponseStatus::Ok,
            payload,
        }
    }

    pub fn error(seq: u64, status: ResponseStatus, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self {
            seq,
            status,
            payload,
        }
    }

    pub fn message(&self) -> &str {
        self.payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Payload of an ok response, or [`DaemonError::Status`] for anything else.
    pub fn into_payload(self, cmd: &str) -> Result<Value, DaemonError> {
        if self.status == ResponseStatus::Ok {
            return Ok(Value::Object(self.payload));
        }
        Err(DaemonError::Status {
            cmd: cmd.to_string(),
            status: self.status,
            message: self.message().to_string(),
        })
    }
}

/// Serialize one message as a single `\n`-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, DaemonError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(Vec<u8>),
    /// A line longer than the limit was skipped up to and including its newline.
    Oversized,
}

/// Receive buffer that splits a byte stream into bounded lines.
///
/// Bytes that arrive after a call gave up stay buffered, so the next call
/// resumes at a frame boundary.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl FrameBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let newline = self.buf.iter().position(|b| *b == b'\n');

        if self.discarding {
            return match newline {
                Some(pos) => {
                    self.buf.drain(..=pos);
                    self.discarding = false;
                    Some(Frame::Oversized)
                }
                None => {
                    self.buf.clear();
                    None
                }
            };
        }

        match newline {
            Some(pos) if pos > self.limit => {
                self.buf.drain(..=pos);
                Some(Frame::Oversized)
            }
            Some(pos) => {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(Frame::Line(line))
            }
            None if self.buf.len() > self.limit => {
                self.buf.clear();
                self.discarding = true;
                None
            }
            None => None,
        }
    }
}
