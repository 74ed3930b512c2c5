// src/core/rules.rs
//! Declarative rewrite rules: command substitutions plus the inline and
//! display delimiter pairs.
//!
//! The JSON shape mirrors the `replace_rules` object of the configuration
//! document:
//!
//! ```json
//! {
//!   "commands": { "\\mathbf": "\\bm" },
//!   "inline":  ["\\(", "\\)", "$$", "$$"],
//!   "display": ["\\[", "\\]", "$$", "$$"]
//! }
//! ```

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Rule set lacking a required key or carrying an unusable value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// One of `commands`, `inline`, `display` is absent.
    #[error("replace_rules is missing required key '{0}'")]
    MissingRule(&'static str),
    /// A command with an empty source string.
    #[error("replace_rules.commands contains an empty source string")]
    EmptyCommand,
    /// A delimiter rule with an empty source marker.
    #[error("replace_rules.{rule}: source {side} marker cannot be empty")]
    EmptyMarker {
        rule: &'static str,
        side: &'static str,
    },
    /// The delimiter pattern failed to compile.
    #[error("replace_rules.{rule}: invalid delimiter pattern: {source}")]
    Pattern {
        rule: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Ordered literal substitutions, applied in document order.
///
/// Deserializes from a JSON object while keeping key order, which a
/// `HashMap` would lose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable(Vec<(String, String)>);

impl CommandTable {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a pair. A repeated source replaces the earlier target in place.
    pub fn insert(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        match self.0.iter_mut().find(|(s, _)| *s == source) {
            Some(entry) => entry.1 = target,
            None => self.0.push((source, target)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for CommandTable {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (source, target) in iter {
            table.insert(source, target);
        }
        table
    }
}

impl<'de> Deserialize<'de> for CommandTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = CommandTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of command strings to replacement strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut table = CommandTable::new();
                while let Some((source, target)) = map.next_entry::<String, String>()? {
                    table.insert(source, target);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

impl Serialize for CommandTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// A delimiter pair to find and the pair to write in its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[String; 4]", into = "[String; 4]")]
pub struct DelimiterRule {
    pub source_open: String,
    pub source_close: String,
    pub target_open: String,
    pub target_close: String,
}

impl DelimiterRule {
    pub fn new(
        source_open: impl Into<String>,
        source_close: impl Into<String>,
        target_open: impl Into<String>,
        target_close: impl Into<String>,
    ) -> Self {
        Self {
            source_open: source_open.into(),
            source_close: source_close.into(),
            target_open: target_open.into(),
            target_close: target_close.into(),
        }
    }
}

impl From<[String; 4]> for DelimiterRule {
    fn from([source_open, source_close, target_open, target_close]: [String; 4]) -> Self {
        Self {
            source_open,
            source_close,
            target_open,
            target_close,
        }
    }
}

impl From<DelimiterRule> for [String; 4] {
    fn from(rule: DelimiterRule) -> Self {
        [
            rule.source_open,
            rule.source_close,
            rule.target_open,
            rule.target_close,
        ]
    }
}

impl fmt::Display for DelimiterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}…{} -> {}…{}",
            self.source_open, self.source_close, self.target_open, self.target_close
        )
    }
}

/// The `replace_rules` object as read from configuration.
///
/// Every key is optional at this layer so that a missing one can be
/// reported by name when the processor is built, rather than as a generic
/// deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<DelimiterRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DelimiterRule>,
}

impl ReplaceRules {
    /// Rules shipped with the binary: bold/blackboard macros and `$$` math.
    pub fn builtin() -> Self {
        Self {
            commands: Some(
                [("\\mathbf", "\\bm"), ("\\mathbb", "\\Bbb")]
                    .into_iter()
                    .collect(),
            ),
            inline: Some(DelimiterRule::new("\\(", "\\)", "$$", "$$")),
            display: Some(DelimiterRule::new("\\[", "\\]", "$$", "$$")),
        }
    }

    /// Resolve into a complete rule set, naming the first missing key.
    pub fn require(&self) -> Result<(&CommandTable, &DelimiterRule, &DelimiterRule), ConfigurationError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or(ConfigurationError::MissingRule("commands"))?;
        let inline = self
            .inline
            .as_ref()
            .ok_or(ConfigurationError::MissingRule("inline"))?;
        let display = self
            .display
            .as_ref()
            .ok_or(ConfigurationError::MissingRule("display"))?;
        Ok((commands, inline, display))
    }
}
