//! texclip library
//!
//! Rewrites LaTeX math markup copied to the clipboard into a target
//! notation. The rewrite engine ([`core::processor`]) is usable on its own;
//! the clipboard watcher and terminal shell wire it to the desktop.

pub mod config;
pub mod core;
pub mod log_file;
pub mod shell;

pub use crate::config::{Settings, SettingsError};
pub use crate::core::processor::TextProcessor;
pub use crate::core::rules::{CommandTable, ConfigurationError, DelimiterRule, ReplaceRules};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Settings, SettingsError, DEFAULT_CONFIG_PATH};
    pub use crate::core::clipboard::{
        ClipboardError, ClipboardObserver, ClipboardSink, ClipboardSource, ClipboardWatcher,
        ObserverId, SeenMarker, SystemClipboard, SystemClipboardWriter, WatcherConfig,
        WatcherError, WatcherState,
    };
    pub use crate::core::processor::TextProcessor;
    pub use crate::core::rules::{CommandTable, ConfigurationError, DelimiterRule, ReplaceRules};
    pub use crate::shell::{Flow, Shell, ShellCommand, ShellEvent};
}
