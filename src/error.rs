use thiserror::Error;

use crate::bridge::BridgeError;
use crate::config::ConfigError;
use crate::core::CodecError;
use crate::remote::{CallError, ProtoError, RegistryError};
use crate::shell::ShellError;
use crate::stream::StreamError;

/// Whether retrying this operation may succeed.
///
/// Classification only: nothing in this crate retries on its own; every
/// cross-boundary failure is surfaced synchronously to the logical caller.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about remote side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred on the remote side.
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-capability errors; match on the variant to
/// recover the capability-specific detail.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Codec(e) => e.code(),
            Error::Proto(e) => e.code(),
            Error::Call(e) => e.code(),
            Error::Registry(e) => e.code(),
            Error::Stream(e) => e.code(),
            Error::Bridge(e) => e.code(),
            Error::Shell(e) => e.code(),
            Error::Config(e) => e.code(),
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            Error::Codec(e) => e.transience(),
            Error::Proto(e) => e.transience(),
            Error::Call(e) => e.transience(),
            Error::Registry(_) => Transience::Permanent,
            Error::Stream(e) => e.transience(),
            Error::Bridge(e) => e.transience(),
            Error::Shell(e) => e.transience(),
            Error::Config(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Codec(e) => e.effect(),
            Error::Proto(e) => e.effect(),
            Error::Call(e) => e.effect(),
            Error::Registry(_) => Effect::None,
            Error::Stream(_) => Effect::None,
            Error::Bridge(_) => Effect::None,
            Error::Shell(e) => e.effect(),
            Error::Config(_) => Effect::None,
        }
    }
}
