// src/main.rs
//! texclip: watch the clipboard and rewrite LaTeX math markup on demand.
//!
//! Startup loads the JSON configuration, builds the text processor (a broken
//! rule set aborts here), starts the clipboard watcher and then runs the
//! terminal shell until the user quits or presses Ctrl+C.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use texclip::config::{Settings, SettingsError, DEFAULT_CONFIG_PATH};
use texclip::core::clipboard::{
    ClipboardWatcher, SystemClipboard, SystemClipboardWriter, WatcherConfig,
};
use texclip::core::processor::TextProcessor;
use texclip::log_file::{RotatingFile, DEFAULT_BACKUPS, DEFAULT_MAX_BYTES};
use texclip::shell::{Flow, Shell, ShellCommand, ShellEvent};

/// Command line interface for texclip
#[derive(Debug, Parser)]
#[command(
    name = "texclip",
    version,
    about = "Rewrite LaTeX math markup from the clipboard",
    long_about = "Watches the system clipboard, mirrors its text into a source pane and converts LaTeX command macros and \\( \\) / \\[ \\] math delimiters into the notation configured in replace_rules."
)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbosity level for logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Logging setup, assembled explicitly from the CLI and the settings file.
#[derive(Debug, Clone)]
struct LogSettings {
    verbose: u8,
    log_file: Option<PathBuf>,
}

/// The main application state
struct ClipApp {
    settings: Settings,
    processor: Arc<TextProcessor>,
    watcher: ClipboardWatcher<SystemClipboard>,
    start_time: Instant,
}

impl ClipApp {
    /// Load configuration, set up logging and build the core services.
    fn new(args: Args) -> Result<Self> {
        let start_time = Instant::now();

        let mut settings = Settings::default();
        let loaded = settings.load_from_file(&args.config);

        Self::setup_logging(&LogSettings {
            verbose: args.verbose,
            log_file: settings.log_file.clone(),
        })?;

        info!("🚀 Starting texclip v{}", env!("CARGO_PKG_VERSION"));
        match loaded {
            Ok(keys) => info!(path = %args.config.display(), keys, "configuration applied"),
            Err(SettingsError::NotFound(path)) => {
                warn!(path = %path.display(), "config file not found, using built-in rules");
            }
            Err(e) => warn!(error = %e, "config file ignored, using built-in rules"),
        }
        debug!("Configuration: {:#?}", settings);

        let processor = match TextProcessor::new(&settings.replace_rules) {
            Ok(processor) => processor,
            Err(e) => {
                error!(error = %e, "❌ refusing to start with an invalid rule set");
                return Err(e).context("invalid replace_rules in configuration");
            }
        };
        info!(commands = processor.command_count(), "✅ text processor ready");
        let rules = &settings.replace_rules;
        if let (Some(inline), Some(display_rule)) = (&rules.inline, &rules.display) {
            info!(inline = %inline, display = %display_rule, "delimiter rules");
        }

        let watcher = ClipboardWatcher::system(WatcherConfig::with_interval(
            settings.poll_interval(),
        ));
        debug!(interval = ?watcher.config().interval, "clipboard watcher configured");

        Ok(Self {
            settings,
            processor: Arc::new(processor),
            watcher,
            start_time,
        })
    }

    /// Wire the watcher into the shell and pump events until exit.
    async fn run(mut self) -> Result<()> {
        let (clip_tx, mut clip_rx) = mpsc::unbounded_channel::<String>();
        self.watcher
            .add_observer(move |content: &str| -> anyhow::Result<()> {
                clip_tx
                    .send(content.to_owned())
                    .context("shell stopped receiving clipboard updates")
            });
        self.watcher
            .add_observer(|content: &str| -> anyhow::Result<()> {
                debug!(chars = content.chars().count(), "📋 clipboard change observed");
                Ok(())
            });

        let mut shell = Shell::new(
            Arc::clone(&self.processor),
            io::stdout(),
            self.settings.auto_convert,
        );
        match SystemClipboardWriter::open() {
            Ok(writer) => {
                shell = shell.with_clipboard(Box::new(writer), self.watcher.seen_marker());
            }
            Err(e) => warn!(error = %e, "clipboard not writable, copy disabled"),
        }

        self.watcher
            .start()
            .context("failed to start clipboard watcher")?;
        info!("👀 Watching clipboard. Press Ctrl+C or q to stop.");

        let mut input_rx = spawn_input_reader()?;
        let mut input_open = true;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        shell.render()?;
        loop {
            let event = tokio::select! {
                Some(content) = clip_rx.recv() => ShellEvent::ClipboardUpdated(content),
                line = input_rx.recv(), if input_open => match line {
                    Some(line) => ShellEvent::Input(ShellCommand::parse_line(&line)),
                    None => {
                        info!("input closed; press Ctrl+C to exit");
                        input_open = false;
                        continue;
                    }
                },
                _ = &mut ctrl_c => {
                    info!("interrupt received");
                    break;
                }
            };
            if shell.handle(event)? == Flow::Exit {
                break;
            }
        }
        println!();

        self.shutdown().await
    }

    /// Graceful shutdown
    async fn shutdown(self) -> Result<()> {
        info!("🛑 Initiating graceful shutdown...");

        let mut watcher = self.watcher;
        let stopped = tokio::task::spawn_blocking(move || watcher.stop())
            .await
            .context("clipboard watcher shutdown task failed")?;
        if let Err(e) = stopped {
            warn!(error = %e, "clipboard watcher did not shut down cleanly");
        }

        info!(
            "📊 Session completed. Runtime: {:.2}s",
            self.start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Set up logging based on verbosity level and the optional log file,
    /// which rotates at 10 MiB and keeps five backups.
    ///
    /// Console output goes to stderr so it stays out of the shell panes.
    fn setup_logging(log: &LogSettings) -> Result<()> {
        use tracing_subscriber::filter::LevelFilter;
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let level = match log.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let console = fmt::layer()
            .with_writer(io::stderr)
            .with_target(log.verbose > 1)
            .with_thread_names(log.verbose > 2)
            .with_filter(filter);

        let file = match &log.log_file {
            Some(path) => {
                let file = RotatingFile::open(path, DEFAULT_MAX_BYTES, DEFAULT_BACKUPS)
                    .with_context(|| format!("failed to open log file {}", path.display()))?;
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_thread_names(true)
                        .with_writer(Mutex::new(file))
                        .with_filter(LevelFilter::DEBUG),
                )
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .try_init()
            .context("failed to install tracing subscriber")?;

        Ok(())
    }
}

/// Read stdin lines on a dedicated thread; tokio's stdin would block runtime
/// shutdown on a pending read.
fn spawn_input_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin_reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read input");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn input reader thread")?;
    Ok(rx)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let app = ClipApp::new(args)?;
    app.run().await
}
