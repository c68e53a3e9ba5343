//! Handler registry and call execution.
//!
//! Dispatch is a statically-declared table registered at startup: one typed
//! handler per (method name, parameter tag signature). No failure escapes
//! across the boundary uncaught; lookup misses, handler errors, and handler
//! panics all come back as failure replies.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::core::{CodecError, Tag, TaggedValue};
use crate::remote::proto::{FailurePayload, Reply};

/// Result a handler produces.
pub type HandlerResult = Result<TaggedValue, HandlerError>;

type HandlerFn = Arc<dyn Fn(&[TaggedValue]) -> HandlerResult + Send + Sync>;

/// Declared parameter tag list of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<Tag>);

impl Signature {
    pub fn new(tags: impl Into<Vec<Tag>>) -> Self {
        Self(tags.into())
    }

    /// Signature of a niladic method.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn tags(&self) -> &[Tag] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// A null argument carries no type information and matches any declared
    /// parameter tag; everything else must match exactly.
    fn matches(&self, arg_tags: &[Tag]) -> bool {
        self.0.len() == arg_tags.len()
            && self
                .0
                .iter()
                .zip(arg_tags)
                .all(|(declared, arg)| *arg == Tag::Null || declared == arg)
    }

    /// Tie-break key for ambiguous null-argument resolution: lexicographic
    /// over the tag names.
    fn sort_key(&self) -> Vec<&'static str> {
        self.0.iter().map(|tag| tag.as_str()).collect()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tag}")?;
        }
        f.write_str(")")
    }
}

impl From<Vec<Tag>> for Signature {
    fn from(tags: Vec<Tag>) -> Self {
        Signature(tags)
    }
}

impl From<&[Tag]> for Signature {
    fn from(tags: &[Tag]) -> Self {
        Signature(tags.to_vec())
    }
}

impl<const N: usize> From<[Tag; N]> for Signature {
    fn from(tags: [Tag; N]) -> Self {
        Signature(tags.to_vec())
    }
}

/// Failure produced by a handler body.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("{message}")]
    Failed { code: String, message: String },

    #[error("invalid arguments: {0}")]
    InvalidArgs(#[from] CodecError),
}

impl HandlerError {
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            HandlerError::Failed { code, .. } => code,
            HandlerError::InvalidArgs(_) => "invalid_args",
        }
    }
}

struct HandlerEntry {
    method: String,
    signature: Signature,
    handler: HandlerFn,
}

/// Registration failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("handler already registered for {method}{signature}")]
    Duplicate { method: String, signature: Signature },
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Duplicate { .. } => "duplicate_handler",
        }
    }
}

/// Lookup failures, reported back across the boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LookupError {
    #[error("no handler named {method}")]
    UnknownMethod { method: String },

    #[error("no handler for {method} matching {signature}")]
    NoMatchingSignature { method: String, signature: Signature },
}

/// Statically-declared mapping from (method, signature) to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        method: &str,
        signature: impl Into<Signature>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[TaggedValue]) -> HandlerResult + Send + Sync + 'static,
    {
        let signature = signature.into();
        if self
            .entries
            .iter()
            .any(|entry| entry.method == method && entry.signature == signature)
        {
            return Err(RegistryError::Duplicate {
                method: method.to_string(),
                signature,
            });
        }
        self.entries.push(HandlerEntry {
            method: method.to_string(),
            signature,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a call to a handler.
    ///
    /// Exact (name, signature) match, where null arguments match any
    /// declared tag. When a null argument leaves more than one candidate,
    /// the tie-break is explicit: smallest signature in lexicographic tag
    /// order wins, and the choice is logged. Deterministic across runs, but
    /// an accepted imprecision.
    fn resolve(&self, method: &str, arg_tags: &[Tag]) -> Result<&HandlerEntry, LookupError> {
        let mut candidates: Vec<&HandlerEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.method == method && entry.signature.matches(arg_tags))
            .collect();

        match candidates.len() {
            0 => {
                if self.entries.iter().any(|entry| entry.method == method) {
                    Err(LookupError::NoMatchingSignature {
                        method: method.to_string(),
                        signature: Signature::new(arg_tags),
                    })
                } else {
                    Err(LookupError::UnknownMethod {
                        method: method.to_string(),
                    })
                }
            }
            1 => Ok(candidates[0]),
            n => {
                candidates.sort_by_key(|entry| entry.signature.sort_key());
                let chosen = candidates[0];
                tracing::warn!(
                    method,
                    candidates = n,
                    chosen = %chosen.signature,
                    "null argument matches several signatures; picking the smallest"
                );
                Ok(chosen)
            }
        }
    }

    /// Execute a decoded call and build the reply.
    pub fn execute(&self, call_id: Uuid, method: &str, args: &[TaggedValue]) -> Reply {
        let arg_tags: Vec<Tag> = args.iter().map(TaggedValue::tag).collect();
        let entry = match self.resolve(method, &arg_tags) {
            Ok(entry) => entry,
            Err(err) => {
                return Reply::Err {
                    call_id: Some(call_id),
                    error: FailurePayload::new("method_not_found", err.to_string()),
                };
            }
        };

        tracing::debug!(method, argc = args.len(), signature = %entry.signature, "executing forwarded call");

        match catch_unwind(AssertUnwindSafe(|| (entry.handler)(args))) {
            Ok(Ok(result)) => Reply::Ok { call_id, result },
            Ok(Err(err)) => Reply::Err {
                call_id: Some(call_id),
                error: FailurePayload::new(err.code().to_string(), err.to_string()),
            },
            Err(panic) => Reply::Err {
                call_id: Some(call_id),
                error: FailurePayload::new("panic", panic_message(&panic)),
            },
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_overloads() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register("describe", [Tag::Str], |args| {
                Ok(TaggedValue::Str(format!(
                    "text:{}",
                    args[0].expect_str().unwrap_or("<null>")
                )))
            })
            .unwrap();
        registry
            .register("describe", [Tag::Record], |args| {
                let fields = args[0].expect_record().map(|m| m.len()).unwrap_or(0);
                Ok(TaggedValue::Str(format!("record:{fields}")))
            })
            .unwrap();
        registry
    }

    fn call(registry: &HandlerRegistry, method: &str, args: Vec<TaggedValue>) -> Reply {
        registry.execute(Uuid::from_bytes([1u8; 16]), method, &args)
    }

    #[test]
    fn exact_signature_wins() {
        let registry = registry_with_overloads();
        let reply = call(&registry, "describe", vec![TaggedValue::Str("x".into())]);
        match reply {
            Reply::Ok { result, .. } => assert_eq!(result, TaggedValue::Str("text:x".into())),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_with_overloads();
        let err = registry
            .register("describe", [Tag::Str], |_| Ok(TaggedValue::Null))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    fn null_argument_resolution_is_deterministic() {
        let registry = registry_with_overloads();
        // "record" sorts before "str": the record overload must win, every time.
        for _ in 0..10 {
            let reply = call(&registry, "describe", vec![TaggedValue::Null]);
            match reply {
                Reply::Ok { result, .. } => {
                    assert_eq!(result, TaggedValue::Str("record:0".into()));
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        }
    }

    #[test]
    fn null_argument_with_single_candidate_resolves() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("remove_admin", [Tag::Str], |_| Ok(TaggedValue::Bool(true)))
            .unwrap();
        let reply = call(&registry, "remove_admin", vec![TaggedValue::Null]);
        assert!(matches!(reply, Reply::Ok { .. }));
    }

    #[test]
    fn unknown_method_reports_lookup_failure() {
        let registry = registry_with_overloads();
        let reply = call(&registry, "frobnicate", vec![]);
        match reply {
            Reply::Err { error, .. } => {
                assert_eq!(error.code, "method_not_found");
                assert!(error.message.contains("frobnicate"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn arity_mismatch_reports_signature_failure() {
        let registry = registry_with_overloads();
        let reply = call(
            &registry,
            "describe",
            vec![TaggedValue::Str("a".into()), TaggedValue::Str("b".into())],
        );
        match reply {
            Reply::Err { error, .. } => assert!(error.message.contains("matching")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn handler_error_becomes_failure_payload() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("boom", Signature::empty(), |_: &[TaggedValue]| {
                Err(HandlerError::failed("boom", "synthetic failure"))
            })
            .unwrap();
        let reply = call(&registry, "boom", vec![]);
        match reply {
            Reply::Err { error, .. } => {
                assert_eq!(error.code, "boom");
                assert_eq!(error.message, "synthetic failure");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn handler_panic_is_contained() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("explode", Signature::empty(), |_: &[TaggedValue]| {
                panic!("kaboom")
            })
            .unwrap();
        let reply = call(&registry, "explode", vec![]);
        match reply {
            Reply::Err { error, .. } => {
                assert_eq!(error.code, "panic");
                assert!(error.message.contains("kaboom"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
