//! Wire protocol types and codec.
//!
//! Protocol: newline-delimited JSON (ndjson) over a Unix socket, one
//! ephemeral connection per forwarded call.
//!
//! Request format: `{"op": "call", "call_id": ..., "method": ..., "argc": N, "args": [...]}\n`
//! Reply format: `{"status": "ok", ...}\n` or `{"status": "err", ...}\n`
//!
//! The reply must echo the request's `call_id`; a mismatch is a protocol
//! error. An unrecognized status fails loudly at parse time.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::TaggedValue;
use crate::error::{Effect, Transience};
use crate::paths;

/// A message sent to an executor endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Forwarded method invocation.
    Call {
        call_id: Uuid,
        method: String,
        argc: usize,
        args: Vec<TaggedValue>,
    },

    /// Health check.
    Ping,

    /// Stop the endpoint.
    Shutdown,
}

/// A message sent back by an executor endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        call_id: Uuid,
        result: TaggedValue,
    },
    Err {
        #[serde(default)]
        call_id: Option<Uuid>,
        error: FailurePayload,
    },
    Pong,
    ShuttingDown,
}

/// Failure reported by the remote executor: the handler's logical cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePayload {
    pub code: String,
    pub message: String,
}

impl FailurePayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Encode a request to bytes (newline-terminated).
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtoError> {
    let mut bytes = serde_json::to_vec(request)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a request from a line, checking the declared argument count.
pub fn decode_request(line: &str) -> Result<Request, ProtoError> {
    let request: Request = serde_json::from_str(line)?;
    if let Request::Call { argc, args, .. } = &request
        && *argc != args.len()
    {
        return Err(ProtoError::ArgCountMismatch {
            declared: *argc,
            actual: args.len(),
        });
    }
    Ok(request)
}

/// Encode a reply to bytes (newline-terminated).
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, ProtoError> {
    let mut bytes = serde_json::to_vec(reply)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a reply from a line.
pub fn decode_reply(line: &str) -> Result<Reply, ProtoError> {
    Ok(serde_json::from_str(line)?)
}

/// Read one newline-terminated reply off a stream.
pub fn read_reply(stream: &mut BufReader<UnixStream>) -> Result<Reply, ProtoError> {
    let mut line = String::new();
    let read = stream.read_line(&mut line)?;
    if read == 0 {
        return Err(ProtoError::Disconnected);
    }
    decode_reply(&line)
}

/// Write a reply over a stream.
pub fn send_reply(stream: &mut UnixStream, reply: &Reply) -> Result<(), ProtoError> {
    let bytes = encode_reply(reply)?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

// =============================================================================
// Socket path
// =============================================================================

/// Directory that contains endpoint sockets.
pub fn socket_dir() -> PathBuf {
    paths::runtime_dir()
}

/// Ensure the socket directory exists and is user-private.
pub fn ensure_socket_dir() -> Result<PathBuf, ProtoError> {
    let dir = socket_dir();
    fs::create_dir_all(&dir)?;

    let mode = fs::metadata(&dir)?.permissions().mode() & 0o777;
    if mode != 0o700 {
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

/// Default executor endpoint socket path.
pub fn socket_path() -> PathBuf {
    socket_dir().join("executor.sock")
}

// =============================================================================
// ProtoError
// =============================================================================

/// Transport and framing errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtoError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("declared argc {declared} does not match {actual} arguments")]
    ArgCountMismatch { declared: usize, actual: usize },

    #[error("endpoint disconnected")]
    Disconnected,

    #[error("reply correlates to {actual:?}, expected {expected}")]
    CorrelationMismatch {
        expected: Uuid,
        actual: Option<Uuid>,
    },

    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),
}

impl ProtoError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtoError::Parse(_) => "parse_error",
            ProtoError::Io(_) => "io_error",
            ProtoError::ArgCountMismatch { .. } => "argc_mismatch",
            ProtoError::Disconnected => "disconnected",
            ProtoError::CorrelationMismatch { .. } => "correlation_mismatch",
            ProtoError::EndpointUnavailable(_) => "endpoint_unavailable",
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            ProtoError::Io(_) | ProtoError::Disconnected | ProtoError::EndpointUnavailable(_) => {
                Transience::Retryable
            }
            ProtoError::Parse(_)
            | ProtoError::ArgCountMismatch { .. }
            | ProtoError::CorrelationMismatch { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ProtoError::Io(_) | ProtoError::Disconnected | ProtoError::CorrelationMismatch { .. } => {
                Effect::Unknown
            }
            ProtoError::Parse(_)
            | ProtoError::ArgCountMismatch { .. }
            | ProtoError::EndpointUnavailable(_) => Effect::None,
        }
    }
}
