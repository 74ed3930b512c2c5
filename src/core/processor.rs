// src/core/processor.rs
//! Three-pass rewrite engine for LaTeX math markup.
//!
//! Passes run in a fixed order over the whole text:
//! 1. literal command substitution,
//! 2. inline delimiters (a match never crosses a line break),
//! 3. display delimiters (a match may span lines).
//!
//! Delimiter matches are leftmost and non-greedy: an open marker pairs with
//! the nearest close marker after it. An open marker without a close marker
//! is left alone.

use regex::{Captures, Regex};
use tracing::trace;

use super::rules::{CommandTable, ConfigurationError, DelimiterRule, ReplaceRules};

/// One compiled delimiter pass.
#[derive(Debug, Clone)]
struct DelimiterPass {
    pattern: Regex,
    target_open: String,
    target_close: String,
}

impl DelimiterPass {
    fn compile(
        name: &'static str,
        rule: &DelimiterRule,
        multiline: bool,
    ) -> Result<Self, ConfigurationError> {
        if rule.source_open.is_empty() {
            return Err(ConfigurationError::EmptyMarker {
                rule: name,
                side: "open",
            });
        }
        if rule.source_close.is_empty() {
            return Err(ConfigurationError::EmptyMarker {
                rule: name,
                side: "close",
            });
        }

        let flags = if multiline { "(?s)" } else { "" };
        let pattern = format!(
            "{flags}{}(.*?){}",
            regex::escape(&rule.source_open),
            regex::escape(&rule.source_close)
        );
        let pattern = Regex::new(&pattern)
            .map_err(|source| ConfigurationError::Pattern { rule: name, source })?;

        Ok(Self {
            pattern,
            target_open: rule.target_open.clone(),
            target_close: rule.target_close.clone(),
        })
    }

    fn apply(&self, text: &str) -> String {
        // A closure replacer keeps `$` in the target markers literal.
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let interior = caps.get(1).map_or("", |m| m.as_str());
                let mut out = String::with_capacity(
                    self.target_open.len() + interior.len() + self.target_close.len(),
                );
                out.push_str(&self.target_open);
                out.push_str(interior);
                out.push_str(&self.target_close);
                out
            })
            .into_owned()
    }
}

/// Stateless rewrite engine built from a [`ReplaceRules`] set.
///
/// Holds only immutable compiled rules, so it is `Send + Sync` and can be
/// shared between the polling thread and the shell behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TextProcessor {
    commands: CommandTable,
    inline: DelimiterPass,
    display: DelimiterPass,
}

impl TextProcessor {
    /// Compile a rule set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when `commands`, `inline` or `display`
    /// is missing, a command key is empty, or a source marker is empty.
    pub fn new(rules: &ReplaceRules) -> Result<Self, ConfigurationError> {
        let (commands, inline, display) = rules.require()?;
        if commands.iter().any(|(source, _)| source.is_empty()) {
            return Err(ConfigurationError::EmptyCommand);
        }

        Ok(Self {
            commands: commands.clone(),
            inline: DelimiterPass::compile("inline", inline, false)?,
            display: DelimiterPass::compile("display", display, true)?,
        })
    }

    /// Run all three passes.
    pub fn process(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let input_len = text.len();
        let text = self.replace_commands(text);
        let text = self.replace_inline(&text);
        let text = self.replace_display(&text);
        trace!(input_len, output_len = text.len(), "processed text");
        text
    }

    /// Stage 1. Later pairs see the output of earlier ones.
    pub fn replace_commands(&self, text: &str) -> String {
        self.commands
            .iter()
            .fold(text.to_owned(), |acc, (source, target)| {
                if acc.contains(source) {
                    acc.replace(source, target)
                } else {
                    acc
                }
            })
    }

    /// Stage 2.
    pub fn replace_inline(&self, text: &str) -> String {
        self.inline.apply(text)
    }

    /// Stage 3.
    pub fn replace_display(&self, text: &str) -> String {
        self.display.apply(text)
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}
