//! Correlation events appended by an instrumented remote producer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::TaggedValue;

/// Named argument bag attached to an event or bridge message.
pub type ArgBag = BTreeMap<String, TaggedValue>;

/// One observed callback occurrence. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Callback name, e.g. `"on_start_input"`.
    pub name: String,
    /// Nesting depth of the producing scope; outermost callbacks are 0.
    pub depth: u32,
    /// Identity of the producing thread (name, or debug id when unnamed).
    pub thread: String,
    /// Monotonic enter/exit stamps, ms since the owning log's epoch.
    pub enter_mono_ms: u64,
    pub exit_mono_ms: u64,
    /// Wall-clock enter/exit stamps, ms since the Unix epoch.
    pub enter_wall_ms: u64,
    pub exit_wall_ms: u64,
    pub args: ArgBag,
}

impl Event {
    pub fn arg(&self, name: &str) -> Option<&TaggedValue> {
        self.args.get(name)
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name == name
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(depth={}, thread={}, +{}..{}ms)",
            self.name, self.depth, self.thread, self.enter_mono_ms, self.exit_mono_ms
        )?;
        if self.args.is_empty() {
            return Ok(());
        }
        f.write_str(" {")?;
        for (i, (key, value)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_name_depth_and_args() {
        let mut args = ArgBag::new();
        args.insert("editor".to_string(), TaggedValue::Int(3));
        let event = Event {
            name: "on_start_input".to_string(),
            depth: 1,
            thread: "main".to_string(),
            enter_mono_ms: 10,
            exit_mono_ms: 12,
            enter_wall_ms: 1_000,
            exit_wall_ms: 1_002,
            args,
        };
        let text = event.to_string();
        assert!(text.contains("on_start_input"));
        assert!(text.contains("depth=1"));
        assert!(text.contains("editor: 3"));
    }
}
