//! Cross-boundary call plumbing: wire protocol, forwarder, executor.

pub mod executor;
pub mod forwarder;
pub mod proto;
mod server;

pub use executor::{HandlerError, HandlerRegistry, HandlerResult, RegistryError, Signature};
pub use forwarder::{CallError, Forwarder, ForwarderRegistry};
pub use proto::{FailurePayload, ProtoError, Reply, Request};
pub use server::ExecutorServer;
