//! Client-side call forwarding.
//!
//! A forwarded call looks local to the caller: arguments are encoded, one
//! ephemeral connection carries the request, and the calling thread blocks
//! on the correlated reply until the configured ceiling. Expiry is a hard
//! failure; an indefinitely-missing reply means a broken endpoint, never a
//! valid "no result".

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use crate::config::CallConfig;
use crate::core::{CodecError, TaggedValue};
use crate::error::{Effect, Transience};
use crate::remote::proto::{ProtoError, Reply, Request, encode_request, read_reply};

/// Client handle for one executor endpoint.
pub struct Forwarder {
    endpoint: PathBuf,
    call_timeout: Duration,
    connect_timeout: Duration,
}

impl Forwarder {
    pub fn new(endpoint: impl Into<PathBuf>, config: &CallConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            call_timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Forward a call and block for the correlated reply.
    ///
    /// Each call gets a fresh connection and its own waiter; concurrent
    /// callers do not interfere, and no two calls are ever pipelined on one
    /// connection.
    pub fn forward(
        &self,
        method: &str,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, CallError> {
        let call_id = Uuid::new_v4();
        let request = Request::Call {
            call_id,
            method: method.to_string(),
            argc: args.len(),
            args,
        };

        match self.round_trip(&request, method)? {
            Reply::Ok {
                call_id: echoed,
                result,
            } => {
                if echoed != call_id {
                    return Err(correlation_error(call_id, Some(echoed)));
                }
                Ok(result)
            }
            Reply::Err {
                call_id: echoed,
                error,
            } => {
                if let Some(echoed) = echoed
                    && echoed != call_id
                {
                    return Err(correlation_error(call_id, Some(echoed)));
                }
                Err(CallError::Remote {
                    code: error.code,
                    message: error.message,
                })
            }
            other => Err(CallError::UnexpectedReply {
                method: method.to_string(),
                reply: reply_label(&other),
            }),
        }
    }

    /// Encode dynamic JSON arguments, then forward.
    ///
    /// Encoding happens first: an unsupported argument fails here, before
    /// any connection is made.
    pub fn forward_values(
        &self,
        method: &str,
        values: &[serde_json::Value],
    ) -> Result<TaggedValue, CallError> {
        let args = values
            .iter()
            .map(TaggedValue::from_json)
            .collect::<Result<Vec<_>, CodecError>>()?;
        self.forward(method, args)
    }

    /// Health-check the endpoint.
    pub fn ping(&self) -> Result<(), CallError> {
        match self.round_trip(&Request::Ping, "ping")? {
            Reply::Pong => Ok(()),
            other => Err(CallError::UnexpectedReply {
                method: "ping".to_string(),
                reply: reply_label(&other),
            }),
        }
    }

    fn round_trip(&self, request: &Request, method: &str) -> Result<Reply, CallError> {
        let bytes = encode_request(request).map_err(CallError::Proto)?;

        let mut stream = connect_with_retry(&self.endpoint, self.connect_timeout)?;
        stream
            .set_read_timeout(Some(self.call_timeout))
            .map_err(|e| CallError::Proto(ProtoError::Io(e)))?;
        stream
            .write_all(&bytes)
            .and_then(|()| stream.flush())
            .map_err(|e| CallError::Proto(ProtoError::Io(e)))?;

        let mut reader = BufReader::new(stream);
        match read_reply(&mut reader) {
            Ok(reply) => Ok(reply),
            Err(ProtoError::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(CallError::Timeout {
                    method: method.to_string(),
                    waited: self.call_timeout,
                })
            }
            Err(e) => Err(CallError::Proto(e)),
        }
    }
}

fn correlation_error(expected: Uuid, actual: Option<Uuid>) -> CallError {
    CallError::Proto(ProtoError::CorrelationMismatch { expected, actual })
}

fn reply_label(reply: &Reply) -> String {
    match reply {
        Reply::Ok { .. } => "ok".to_string(),
        Reply::Err { .. } => "err".to_string(),
        Reply::Pong => "pong".to_string(),
        Reply::ShuttingDown => "shutting_down".to_string(),
    }
}

fn should_retry_connect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Connect, waiting out the window in which the endpoint may still be
/// binding its socket.
fn connect_with_retry(endpoint: &Path, window: Duration) -> Result<UnixStream, CallError> {
    let deadline = Instant::now() + window;
    let mut backoff = Duration::from_millis(10);

    loop {
        match UnixStream::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(e) if should_retry_connect(&e) => {
                if Instant::now() >= deadline {
                    return Err(CallError::Proto(ProtoError::EndpointUnavailable(format!(
                        "{}: {e}",
                        endpoint.display()
                    ))));
                }
                std::thread::sleep(backoff);
                backoff = std::cmp::min(backoff * 2, Duration::from_millis(100));
            }
            Err(e) => return Err(CallError::Proto(ProtoError::Io(e))),
        }
    }
}

/// Forwarded-call failures, surfaced synchronously to the logical caller.
///
/// A forwarded call is atomic from the caller's perspective: it either
/// returns a value or raises one of these. Nothing is retried automatically.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CallError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("remote call failed [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("no reply for {method} within {waited:?}")]
    Timeout { method: String, waited: Duration },

    #[error("unexpected {reply} reply to {method}")]
    UnexpectedReply { method: String, reply: String },
}

impl CallError {
    pub fn code(&self) -> &'static str {
        match self {
            CallError::Encode(_) => "encode_error",
            CallError::Proto(e) => e.code(),
            CallError::Remote { .. } => "remote_failure",
            CallError::Timeout { .. } => "call_timeout",
            CallError::UnexpectedReply { .. } => "unexpected_reply",
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            CallError::Encode(e) => e.transience(),
            CallError::Proto(e) => e.transience(),
            CallError::Remote { .. } => Transience::Permanent,
            CallError::Timeout { .. } => Transience::Unknown,
            CallError::UnexpectedReply { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            CallError::Encode(e) => e.effect(),
            CallError::Proto(e) => e.effect(),
            // The remote ran and failed partway; it knows, we don't.
            CallError::Remote { .. } => Effect::Unknown,
            CallError::Timeout { .. } => Effect::Unknown,
            CallError::UnexpectedReply { .. } => Effect::Unknown,
        }
    }
}

/// Explicit, lifecycle-scoped cache of forwarders, one per endpoint path.
///
/// Repeated calls against the same logical target reuse configuration
/// instead of rebuilding it. Entries are never invalidated for the
/// registry's lifetime; test-scope processes are short-lived, so that is
/// acceptable. Create one per session and drop it at session end.
pub struct ForwarderRegistry {
    config: CallConfig,
    cache: Mutex<HashMap<PathBuf, Arc<Forwarder>>>,
}

impl ForwarderRegistry {
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The forwarder for an endpoint, created on first use.
    pub fn forwarder(&self, endpoint: impl Into<PathBuf>) -> Arc<Forwarder> {
        let endpoint = endpoint.into();
        let mut cache = self.cache.lock().expect("forwarder cache lock poisoned");
        cache
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(Forwarder::new(endpoint, &self.config)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("forwarder cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
