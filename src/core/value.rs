//! Tagged values: the transport representation of call arguments and results.
//!
//! Wire form is a `{"tag": "...", "value": ...}` pair. Encoding is lossless
//! for every supported tag; anything the codec cannot tag is a hard error at
//! encode time, before any transport is attempted.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::error::{Effect, Transience};

/// Type tag of a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Null,
    Bool,
    Int,
    Long,
    Bytes,
    Str,
    Record,
    StrList,
    RecordList,
    StrSet,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Long => "long",
            Tag::Bytes => "bytes",
            Tag::Str => "str",
            Tag::Record => "record",
            Tag::StrList => "str_list",
            Tag::RecordList => "record_list",
            Tag::StrSet => "str_set",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discriminated, transport-safe call argument or result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum TaggedValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    Str(String),
    Record(serde_json::Map<String, JsonValue>),
    StrList(Vec<String>),
    RecordList(Vec<serde_json::Map<String, JsonValue>>),
    StrSet(BTreeSet<String>),
}

impl TaggedValue {
    pub fn tag(&self) -> Tag {
        match self {
            TaggedValue::Null => Tag::Null,
            TaggedValue::Bool(_) => Tag::Bool,
            TaggedValue::Int(_) => Tag::Int,
            TaggedValue::Long(_) => Tag::Long,
            TaggedValue::Bytes(_) => Tag::Bytes,
            TaggedValue::Str(_) => Tag::Str,
            TaggedValue::Record(_) => Tag::Record,
            TaggedValue::StrList(_) => Tag::StrList,
            TaggedValue::RecordList(_) => Tag::RecordList,
            TaggedValue::StrSet(_) => Tag::StrSet,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Null)
    }

    /// Tag a dynamic JSON payload.
    ///
    /// Inspection order is fixed: null, boolean, integer (int if it fits,
    /// long otherwise), string, array, object. An empty array defaults to
    /// the string-list tag with a logged warning; that ambiguity is a
    /// documented limitation, not a silent guess. Non-integer numbers and
    /// mixed arrays have no tag and fail.
    pub fn from_json(value: &JsonValue) -> Result<Self, CodecError> {
        match value {
            JsonValue::Null => Ok(TaggedValue::Null),
            JsonValue::Bool(b) => Ok(TaggedValue::Bool(*b)),
            JsonValue::Number(n) => {
                let Some(n) = n.as_i64() else {
                    return Err(CodecError::unsupported(format!(
                        "non-integer number {n} has no tag"
                    )));
                };
                match i32::try_from(n) {
                    Ok(small) => Ok(TaggedValue::Int(small)),
                    Err(_) => Ok(TaggedValue::Long(n)),
                }
            }
            JsonValue::String(s) => Ok(TaggedValue::Str(s.clone())),
            JsonValue::Array(items) => Self::from_json_array(items),
            JsonValue::Object(map) => Ok(TaggedValue::Record(map.clone())),
        }
    }

    fn from_json_array(items: &[JsonValue]) -> Result<Self, CodecError> {
        if items.is_empty() {
            tracing::warn!("empty list argument defaults to the string-list tag");
            return Ok(TaggedValue::StrList(Vec::new()));
        }
        if items.iter().all(JsonValue::is_string) {
            let strings = items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect();
            return Ok(TaggedValue::StrList(strings));
        }
        if items.iter().all(JsonValue::is_object) {
            let records = items
                .iter()
                .filter_map(JsonValue::as_object)
                .cloned()
                .collect();
            return Ok(TaggedValue::RecordList(records));
        }
        Err(CodecError::unsupported(
            "array elements must be all strings or all objects",
        ))
    }

    /// Serializable fallback for arbitrary payloads.
    ///
    /// Serializes the payload to JSON and tags the result; a payload that
    /// does not serialize (or serializes to an untaggable shape) is an
    /// encode-time error.
    pub fn record<T: Serialize>(payload: &T) -> Result<Self, CodecError> {
        let json = serde_json::to_value(payload)
            .map_err(|e| CodecError::unsupported(format!("payload is not serializable: {e}")))?;
        Self::from_json(&json)
    }

    /// Untagged JSON rendering (for display and CLI output).
    pub fn to_json(&self) -> JsonValue {
        match self {
            TaggedValue::Null => JsonValue::Null,
            TaggedValue::Bool(b) => JsonValue::from(*b),
            TaggedValue::Int(n) => JsonValue::from(*n),
            TaggedValue::Long(n) => JsonValue::from(*n),
            TaggedValue::Bytes(b) => JsonValue::from(b.clone()),
            TaggedValue::Str(s) => JsonValue::from(s.clone()),
            TaggedValue::Record(map) => JsonValue::Object(map.clone()),
            TaggedValue::StrList(items) => JsonValue::from(items.clone()),
            TaggedValue::RecordList(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::Object).collect())
            }
            TaggedValue::StrSet(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::from).collect())
            }
        }
    }

    pub fn expect_bool(&self) -> Result<bool, CodecError> {
        match self {
            TaggedValue::Bool(b) => Ok(*b),
            other => Err(CodecError::mismatch(Tag::Bool, other.tag())),
        }
    }

    pub fn expect_int(&self) -> Result<i32, CodecError> {
        match self {
            TaggedValue::Int(n) => Ok(*n),
            other => Err(CodecError::mismatch(Tag::Int, other.tag())),
        }
    }

    pub fn expect_long(&self) -> Result<i64, CodecError> {
        match self {
            TaggedValue::Long(n) => Ok(*n),
            other => Err(CodecError::mismatch(Tag::Long, other.tag())),
        }
    }

    pub fn expect_bytes(&self) -> Result<&[u8], CodecError> {
        match self {
            TaggedValue::Bytes(b) => Ok(b),
            other => Err(CodecError::mismatch(Tag::Bytes, other.tag())),
        }
    }

    pub fn expect_str(&self) -> Result<&str, CodecError> {
        match self {
            TaggedValue::Str(s) => Ok(s),
            other => Err(CodecError::mismatch(Tag::Str, other.tag())),
        }
    }

    pub fn expect_record(&self) -> Result<&serde_json::Map<String, JsonValue>, CodecError> {
        match self {
            TaggedValue::Record(map) => Ok(map),
            other => Err(CodecError::mismatch(Tag::Record, other.tag())),
        }
    }

    pub fn expect_str_list(&self) -> Result<&[String], CodecError> {
        match self {
            TaggedValue::StrList(items) => Ok(items),
            other => Err(CodecError::mismatch(Tag::StrList, other.tag())),
        }
    }

    pub fn expect_str_set(&self) -> Result<&BTreeSet<String>, CodecError> {
        match self {
            TaggedValue::StrSet(items) => Ok(items),
            other => Err(CodecError::mismatch(Tag::StrSet, other.tag())),
        }
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedValue::Null => f.write_str("null"),
            TaggedValue::Bool(b) => write!(f, "{b}"),
            TaggedValue::Int(n) => write!(f, "{n}"),
            TaggedValue::Long(n) => write!(f, "{n}L"),
            TaggedValue::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            TaggedValue::Str(s) => write!(f, "{s:?}"),
            TaggedValue::Record(map) => write!(f, "record[{} fields]", map.len()),
            TaggedValue::StrList(items) => write!(f, "{items:?}"),
            TaggedValue::RecordList(items) => write!(f, "records[{}]", items.len()),
            TaggedValue::StrSet(items) => write!(f, "set{items:?}"),
        }
    }
}

impl From<bool> for TaggedValue {
    fn from(v: bool) -> Self {
        TaggedValue::Bool(v)
    }
}

impl From<i32> for TaggedValue {
    fn from(v: i32) -> Self {
        TaggedValue::Int(v)
    }
}

impl From<i64> for TaggedValue {
    fn from(v: i64) -> Self {
        TaggedValue::Long(v)
    }
}

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        TaggedValue::Str(v.to_string())
    }
}

impl From<String> for TaggedValue {
    fn from(v: String) -> Self {
        TaggedValue::Str(v)
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(v: Vec<u8>) -> Self {
        TaggedValue::Bytes(v)
    }
}

impl From<Vec<String>> for TaggedValue {
    fn from(v: Vec<String>) -> Self {
        TaggedValue::StrList(v)
    }
}

impl From<BTreeSet<String>> for TaggedValue {
    fn from(v: BTreeSet<String>) -> Self {
        TaggedValue::StrSet(v)
    }
}

impl<T: Into<TaggedValue>> From<Option<T>> for TaggedValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(TaggedValue::Null)
    }
}

/// Codec failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    #[error("unsupported argument type: {reason}")]
    Unsupported { reason: String },

    #[error("expected a {expected} value, got {actual}")]
    TagMismatch { expected: Tag, actual: Tag },
}

impl CodecError {
    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        CodecError::Unsupported {
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: Tag, actual: Tag) -> Self {
        CodecError::TagMismatch { expected, actual }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CodecError::Unsupported { .. } => "unsupported_type",
            CodecError::TagMismatch { .. } => "tag_mismatch",
        }
    }

    /// Codec failures are input errors; retrying cannot help.
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    /// Raised before any transport, so no side effects are possible.
    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_roundtrip(value: TaggedValue) -> TaggedValue {
        let json = serde_json::to_string(&value).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn wire_roundtrip_is_lossless_per_tag() {
        let samples = vec![
            TaggedValue::Null,
            TaggedValue::Bool(true),
            TaggedValue::Bool(false),
            TaggedValue::Int(i32::MIN),
            TaggedValue::Int(i32::MAX),
            TaggedValue::Long(i64::MIN),
            TaggedValue::Long(i64::MAX),
            TaggedValue::Bytes(Vec::new()),
            TaggedValue::Bytes(vec![0, 127, 255]),
            TaggedValue::Str("input committed".to_string()),
            TaggedValue::StrList(Vec::new()),
            TaggedValue::StrList(vec!["a".to_string(), "b".to_string()]),
            TaggedValue::StrSet(BTreeSet::from(["x".to_string(), "y".to_string()])),
        ];
        for value in samples {
            assert_eq!(wire_roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn record_payloads_roundtrip() {
        #[derive(Serialize)]
        struct EditorInfo {
            field_id: i32,
            hint: String,
        }

        let value = TaggedValue::record(&EditorInfo {
            field_id: 7,
            hint: "user".to_string(),
        })
        .unwrap();
        assert_eq!(value.tag(), Tag::Record);
        let back = wire_roundtrip(value.clone());
        assert_eq!(back, value);
        assert_eq!(
            back.expect_record().unwrap().get("field_id"),
            Some(&JsonValue::from(7))
        );
    }

    #[test]
    fn from_json_prefers_int_over_long() {
        let small = TaggedValue::from_json(&JsonValue::from(41)).unwrap();
        assert_eq!(small, TaggedValue::Int(41));
        let big = TaggedValue::from_json(&JsonValue::from(i64::from(i32::MAX) + 1)).unwrap();
        assert_eq!(big, TaggedValue::Long(i64::from(i32::MAX) + 1));
    }

    #[test]
    fn empty_array_defaults_to_string_list() {
        let value = TaggedValue::from_json(&serde_json::json!([])).unwrap();
        assert_eq!(value, TaggedValue::StrList(Vec::new()));
    }

    #[test]
    fn untaggable_inputs_fail_at_encode_time() {
        let float = TaggedValue::from_json(&serde_json::json!(1.5));
        assert!(matches!(float, Err(CodecError::Unsupported { .. })));

        let mixed = TaggedValue::from_json(&serde_json::json!(["a", 1]));
        assert!(matches!(mixed, Err(CodecError::Unsupported { .. })));

        let unserializable = TaggedValue::record(&std::collections::HashMap::from([(
            (1, 2),
            "tuple keys do not serialize to JSON",
        )]));
        assert!(matches!(unserializable, Err(CodecError::Unsupported { .. })));
    }

    #[test]
    fn extractors_report_tag_mismatch() {
        let value = TaggedValue::Str("nope".to_string());
        let err = value.expect_bool().unwrap_err();
        assert!(matches!(
            err,
            CodecError::TagMismatch {
                expected: Tag::Bool,
                actual: Tag::Str,
            }
        ));
    }

    #[test]
    fn null_option_encodes_to_null_tag() {
        let value: TaggedValue = Option::<String>::None.into();
        assert!(value.is_null());
        let value: TaggedValue = Some("present").into();
        assert_eq!(value.tag(), Tag::Str);
    }
}
