//! Cross-process call forwarding and event correlation for test
//! instrumentation.
//!
//! A [`Forwarder`] makes a synchronous call look local while a remote
//! [`ExecutorServer`](remote::ExecutorServer) actually performs it: arguments
//! travel as [`TaggedValue`]s over a per-call Unix-socket connection, the
//! caller blocks on the correlated reply, and failures come back as the
//! handler's logical cause. Alongside the call path, an [`EventLog`] with
//! independent [`EventStream`] cursors lets tests observe asynchronous
//! callback activity in order, with blocking-with-timeout assertions instead
//! of sleep loops.

pub mod bridge;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
mod paths;
pub mod remote;
pub mod shell;
pub mod stream;
pub mod telemetry;
pub mod test_harness;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at the crate root for convenience
pub use crate::bridge::{BridgeMessage, RelayBridge};
pub use crate::core::{ArgBag, CodecError, Event, Tag, TaggedValue};
pub use crate::remote::{
    CallError, ExecutorServer, Forwarder, ForwarderRegistry, HandlerError, HandlerRegistry,
    Signature,
};
pub use crate::shell::{CommandRunner, ServiceShell, SystemRunner};
pub use crate::stream::{EventLog, EventScope, EventStream, StreamError};
