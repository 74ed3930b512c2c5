// src/shell.rs
//! Terminal presentation shell.
//!
//! Two panes (clipboard source and converted result) plus a status line,
//! rendered to any `io::Write`. The shell owns no threads: the caller feeds
//! it [`ShellEvent`]s from the clipboard watcher and from user input.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::core::clipboard::{ClipboardSink, SeenMarker};
use crate::core::processor::TextProcessor;

const RULE: &str = "────────────────────────────────────────";

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Convert,
    Copy,
    Show,
    Help,
    Quit,
    Unknown(String),
}

impl ShellCommand {
    pub fn parse_line(line: &str) -> Self {
        match line.trim().to_lowercase().as_str() {
            "" | "c" | "convert" => Self::Convert,
            "y" | "copy" => Self::Copy,
            "s" | "show" => Self::Show,
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.trim().to_owned()),
        }
    }
}

impl FromStr for ShellCommand {
    type Err = std::convert::Infallible;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_line(line))
    }
}

/// Input to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    ClipboardUpdated(String),
    Input(ShellCommand),
}

/// Whether the caller should keep feeding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Status {
    at: String,
    message: String,
}

impl Status {
    fn now(message: impl Into<String>) -> Self {
        Self {
            at: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at, self.message)
    }
}

/// Interactive source/result view over a [`TextProcessor`].
pub struct Shell<W: Write> {
    processor: Arc<TextProcessor>,
    out: W,
    source: String,
    result: String,
    status: Status,
    auto_convert: bool,
    sink: Option<Box<dyn ClipboardSink>>,
    seen: Option<SeenMarker>,
}

impl<W: Write> Shell<W> {
    pub fn new(processor: Arc<TextProcessor>, out: W, auto_convert: bool) -> Self {
        Self {
            processor,
            out,
            source: String::new(),
            result: String::new(),
            status: Status::now("ready"),
            auto_convert,
            sink: None,
            seen: None,
        }
    }

    /// Enable copying results back to the clipboard. `seen` keeps the copied
    /// text from being mirrored back into the source pane.
    pub fn with_clipboard(mut self, sink: Box<dyn ClipboardSink>, seen: SeenMarker) -> Self {
        self.sink = Some(sink);
        self.seen = Some(seen);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn status(&self) -> &str {
        &self.status.message
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Apply one event and redraw.
    pub fn handle(&mut self, event: ShellEvent) -> io::Result<Flow> {
        match event {
            ShellEvent::ClipboardUpdated(content) => {
                self.update_source(content);
                if self.auto_convert {
                    self.convert();
                }
            }
            ShellEvent::Input(command) => match command {
                ShellCommand::Convert => self.convert(),
                ShellCommand::Copy => self.copy_result(),
                ShellCommand::Show => {}
                ShellCommand::Help => return self.print_help().map(|()| Flow::Continue),
                ShellCommand::Quit => {
                    info!("shell exit requested");
                    return Ok(Flow::Exit);
                }
                ShellCommand::Unknown(input) => {
                    self.status = Status::now(format!("unknown command '{input}' (h for help)"));
                }
            },
        }
        self.render()?;
        Ok(Flow::Continue)
    }

    /// Mirror clipboard content into the source pane.
    pub fn update_source(&mut self, content: String) {
        debug!(chars = content.chars().count(), "source pane updated");
        self.source = content;
        self.status = Status::now("clipboard content updated");
    }

    /// Run the processor over the source pane into the result pane.
    pub fn convert(&mut self) {
        self.result = self.processor.process(&self.source);
        self.status = Status::now("conversion done");
    }

    /// Put the result pane on the clipboard.
    pub fn copy_result(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            self.status = Status::now("clipboard unavailable; nothing copied");
            return;
        };
        let written = match &self.seen {
            Some(seen) => seen.write_through(&self.result, |text| sink.write_text(text)),
            None => sink.write_text(&self.result),
        };
        self.status = match written {
            Ok(()) => Status::now("result copied to clipboard"),
            Err(e) => {
                warn!(error = %e, "failed to copy result");
                Status::now(format!("copy failed: {e}"))
            }
        };
    }

    pub fn render(&mut self) -> io::Result<()> {
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "source")?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "{}", self.source)?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "result")?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "{}", self.result)?;
        writeln!(self.out, "{RULE}")?;
        writeln!(self.out, "{}", self.status)?;
        write!(self.out, "[enter] convert  [y] copy  [h] help  [q] quit > ")?;
        self.out.flush()
    }

    pub fn print_help(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "  <enter>, c, convert   convert the source pane")?;
        writeln!(self.out, "  y, copy               copy the result to the clipboard")?;
        writeln!(self.out, "  s, show               redraw both panes")?;
        writeln!(self.out, "  h, help               this help")?;
        writeln!(self.out, "  q, quit               exit")?;
        writeln!(
            self.out,
            "  auto convert is {}",
            if self.auto_convert { "on" } else { "off" }
        )?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clipboard::{ClipboardError, ClipboardWatcher, ClipboardSource, WatcherConfig};
    use crate::core::rules::ReplaceRules;
    use pretty_assertions::assert_eq;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl ClipboardSink for RecordingSink {
        fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
            self.0.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    struct FailingSink;

    impl ClipboardSink for FailingSink {
        fn write_text(&mut self, _text: &str) -> Result<(), ClipboardError> {
            Err(ClipboardError::Access("denied".into()))
        }
    }

    struct EmptyClipboard;

    impl ClipboardSource for EmptyClipboard {
        fn read_text(&mut self) -> Result<String, ClipboardError> {
            Ok(String::new())
        }
    }

    fn shell(auto_convert: bool) -> Shell<Vec<u8>> {
        let processor = TextProcessor::new(&ReplaceRules::builtin()).unwrap();
        Shell::new(Arc::new(processor), Vec::new(), auto_convert)
    }

    fn update(text: &str) -> ShellEvent {
        ShellEvent::ClipboardUpdated(text.to_owned())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("".parse::<ShellCommand>().unwrap(), ShellCommand::Convert);
        assert_eq!(" Y ".parse::<ShellCommand>().unwrap(), ShellCommand::Copy);
        assert_eq!("quit".parse::<ShellCommand>().unwrap(), ShellCommand::Quit);
        assert_eq!(
            "frobnicate".parse::<ShellCommand>().unwrap(),
            ShellCommand::Unknown("frobnicate".into())
        );
    }

    #[test]
    fn test_clipboard_update_mirrors_source_only() {
        let mut shell = shell(false);
        shell.handle(update(r"\(\mathbf{x}\)")).unwrap();
        assert_eq!(shell.source(), r"\(\mathbf{x}\)");
        assert_eq!(shell.result(), "");
        assert_eq!(shell.status(), "clipboard content updated");
    }

    #[test]
    fn test_convert_on_trigger() {
        let mut shell = shell(false);
        shell.handle(update(r"\(\mathbf{x}\)")).unwrap();
        let flow = shell.handle(ShellEvent::Input(ShellCommand::Convert)).unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(shell.result(), r"$$\bm{x}$$");
        assert_eq!(shell.status(), "conversion done");
    }

    #[test]
    fn test_auto_convert() {
        let mut shell = shell(true);
        shell.handle(update(r"\[ \mathbb{R} \]")).unwrap();
        assert_eq!(shell.result(), r"$$ \Bbb{R} $$");
    }

    #[test]
    fn test_render_shows_both_panes() {
        let mut shell = shell(true);
        shell.handle(update(r"\(a\)")).unwrap();
        let output = String::from_utf8(shell.into_inner()).unwrap();
        assert!(output.contains("source\n"));
        assert!(output.contains("\\(a\\)\n"));
        assert!(output.contains("$$a$$\n"));
        assert!(output.contains("conversion done"));
    }

    #[test]
    fn test_copy_marks_result_seen() {
        let copied = Arc::new(Mutex::new(Vec::new()));
        let watcher = ClipboardWatcher::new(EmptyClipboard, WatcherConfig::default());
        let mut shell = shell(true)
            .with_clipboard(Box::new(RecordingSink(Arc::clone(&copied))), watcher.seen_marker());

        shell.handle(update(r"\(a\)")).unwrap();
        shell.handle(ShellEvent::Input(ShellCommand::Copy)).unwrap();
        assert_eq!(*copied.lock().unwrap(), vec!["$$a$$".to_owned()]);
        assert_eq!(shell.status(), "result copied to clipboard");
    }

    #[test]
    fn test_copy_failure_is_reported() {
        let watcher = ClipboardWatcher::new(EmptyClipboard, WatcherConfig::default());
        let mut shell = shell(true).with_clipboard(Box::new(FailingSink), watcher.seen_marker());
        shell.handle(ShellEvent::Input(ShellCommand::Copy)).unwrap();
        assert!(shell.status().starts_with("copy failed"), "{}", shell.status());
    }

    /// Clipboard stand-in shared between the watcher (reads) and the shell
    /// (writes).
    #[derive(Clone)]
    struct SharedClipboard(Arc<Mutex<String>>);

    impl ClipboardSource for SharedClipboard {
        fn read_text(&mut self) -> Result<String, ClipboardError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    impl ClipboardSink for SharedClipboard {
        fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
            text.clone_into(&mut self.0.lock().unwrap());
            Ok(())
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            interval: Duration::from_millis(5),
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn forward_to(watcher: &ClipboardWatcher<SharedClipboard>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        watcher.add_observer(move |content: &str| -> anyhow::Result<()> {
            tx.send(content.to_owned())?;
            Ok(())
        });
        rx
    }

    #[test]
    fn test_failed_copy_does_not_renotify_clipboard() {
        let clipboard = SharedClipboard(Arc::new(Mutex::new("orig".into())));
        let mut watcher = ClipboardWatcher::new(clipboard, fast_config());
        let rx = forward_to(&watcher);
        let mut shell = shell(true).with_clipboard(Box::new(FailingSink), watcher.seen_marker());

        watcher.start().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "orig");

        shell.handle(update(r"\(a\)")).unwrap();
        shell.handle(ShellEvent::Input(ShellCommand::Copy)).unwrap();
        assert!(shell.status().starts_with("copy failed"), "{}", shell.status());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        watcher.stop().unwrap();
    }

    #[test]
    fn test_successful_copy_is_not_echoed() {
        let clipboard = SharedClipboard(Arc::new(Mutex::new("orig".into())));
        let mut watcher = ClipboardWatcher::new(clipboard.clone(), fast_config());
        let rx = forward_to(&watcher);
        let mut shell =
            shell(true).with_clipboard(Box::new(clipboard.clone()), watcher.seen_marker());

        watcher.start().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "orig");

        shell.handle(update(r"\(a\)")).unwrap();
        shell.handle(ShellEvent::Input(ShellCommand::Copy)).unwrap();
        assert_eq!(*clipboard.0.lock().unwrap(), "$$a$$");
        std::thread::sleep(Duration::from_millis(200));
        let echoed: Vec<String> = rx.try_iter().collect();
        assert!(echoed.is_empty(), "{echoed:?}");
        watcher.stop().unwrap();
    }

    #[test]
    fn test_copy_without_clipboard() {
        let mut shell = shell(false);
        shell.handle(ShellEvent::Input(ShellCommand::Copy)).unwrap();
        assert_eq!(shell.status(), "clipboard unavailable; nothing copied");
    }

    #[test]
    fn test_quit_and_unknown() {
        let mut shell = shell(false);
        shell
            .handle(ShellEvent::Input(ShellCommand::Unknown("zz".into())))
            .unwrap();
        assert!(shell.status().contains("unknown command 'zz'"));
        assert_eq!(
            shell.handle(ShellEvent::Input(ShellCommand::Quit)).unwrap(),
            Flow::Exit
        );
    }
}
