// src/core/clipboard.rs
//! Polling clipboard watcher
//!
//! This module provides:
//! - A `ClipboardSource` abstraction with an `arboard`-backed implementation
//! - Observer registration with stable ids, notified in registration order
//! - A background polling thread driven by an explicit state machine
//! - Per-observer failure isolation (errors and panics are logged, not fatal)

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

/// Failure talking to the OS clipboard. Always treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard access failed: {0}")]
    Access(String),
}

impl From<arboard::Error> for ClipboardError {
    fn from(err: arboard::Error) -> Self {
        match err {
            arboard::Error::ClipboardNotSupported => Self::Unavailable(err.to_string()),
            other => Self::Access(other.to_string()),
        }
    }
}

/// Anything the watcher can poll for text.
pub trait ClipboardSource {
    /// Current text content. Non-text or empty clipboards read as `""`.
    fn read_text(&mut self) -> Result<String, ClipboardError>;
}

/// Anything text can be written back into.
pub trait ClipboardSink {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The OS clipboard.
///
/// A fresh `arboard::Clipboard` is opened for every read so the source holds
/// no platform handle and can move to the polling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl ClipboardSource for SystemClipboard {
    fn read_text(&mut self) -> Result<String, ClipboardError> {
        let mut clipboard = arboard::Clipboard::new()?;
        match clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Long-lived writer. Kept on the thread that created it; on X11 the
/// written content is served only while this handle is alive.
pub struct SystemClipboardWriter {
    clipboard: arboard::Clipboard,
}

impl SystemClipboardWriter {
    pub fn open() -> Result<Self, ClipboardError> {
        Ok(Self {
            clipboard: arboard::Clipboard::new()?,
        })
    }
}

impl ClipboardSink for SystemClipboardWriter {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.clipboard.set_text(text.to_owned())?;
        Ok(())
    }
}

/// Callback for clipboard changes.
///
/// Runs on the polling thread. Must not call back into the watcher's
/// observer registry.
pub trait ClipboardObserver: Send {
    fn on_clipboard_change(&mut self, content: &str) -> anyhow::Result<()>;
}

impl<F> ClipboardObserver for F
where
    F: FnMut(&str) -> anyhow::Result<()> + Send,
{
    fn on_clipboard_change(&mut self, content: &str) -> anyhow::Result<()> {
        self(content)
    }
}

/// Stable handle for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Lifecycle of the polling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Running,
    StopRequested,
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("clipboard watcher is already running")]
    AlreadyRunning,
    #[error("clipboard watcher is still shutting down")]
    StopPending,
    #[error("clipboard watcher did not stop within {0:?}")]
    StopTimeout(Duration),
    #[error("failed to spawn clipboard watcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between polls.
    pub interval: Duration,
    /// Upper bound on how long `stop` blocks.
    pub stop_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

impl WatcherConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

type ObserverList = Vec<(ObserverId, Box<dyn ClipboardObserver>)>;

struct Shared {
    state: Mutex<WatcherState>,
    wakeup: Condvar,
    observers: Mutex<ObserverList>,
    last_seen: Mutex<String>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, state: WatcherState) {
        *lock(&self.state) = state;
        self.wakeup.notify_all();
    }

    /// Read the source and return its content when it differs from the last
    /// value. The last-seen lock is held across the read, so a concurrent
    /// [`SeenMarker::write_through`] lands entirely before or after it.
    fn poll_change<S: ClipboardSource>(
        &self,
        source: &Mutex<S>,
    ) -> Result<Option<String>, ClipboardError> {
        let mut last = lock(&self.last_seen);
        let current = lock(source).read_text()?;
        if *last == current {
            return Ok(None);
        }
        current.clone_into(&mut last);
        Ok(Some(current))
    }

    fn notify(&self, content: &str) {
        let mut observers = lock(&self.observers);
        debug!(
            observers = observers.len(),
            chars = content.chars().count(),
            "clipboard changed"
        );
        for (id, observer) in observers.iter_mut() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| observer.on_clipboard_change(content)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(observer = %id, error = %e, "clipboard observer failed"),
                Err(payload) => error!(
                    observer = %id,
                    panic = panic_message(payload.as_ref()),
                    "clipboard observer panicked"
                ),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Wait before the next poll: doubled for the cycle after a failed read.
pub fn next_delay(interval: Duration, read_failed: bool) -> Duration {
    if read_failed {
        interval.saturating_mul(2)
    } else {
        interval
    }
}

/// Leaves the watcher Stopped however the worker exits.
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("clipboard polling thread unwound");
        }
        self.0.set_state(WatcherState::Stopped);
    }
}

/// Handle for recording a value as already observed, so text this process
/// writes to the clipboard is not reported back as a change.
#[derive(Clone)]
pub struct SeenMarker(Arc<Shared>);

impl SeenMarker {
    pub fn mark(&self, content: &str) {
        content.clone_into(&mut lock(&self.0.last_seen));
    }

    /// Run `write` and record `content` as seen only if it succeeds.
    ///
    /// The polling thread cannot read the clipboard while `write` runs, so
    /// neither the old value nor `content` is reported as a change.
    pub fn write_through<E>(
        &self,
        content: &str,
        write: impl FnOnce(&str) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut last = lock(&self.0.last_seen);
        write(content)?;
        content.clone_into(&mut last);
        Ok(())
    }
}

impl fmt::Debug for SeenMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeenMarker").finish_non_exhaustive()
    }
}

/// Polls a [`ClipboardSource`] on a background thread and fans changes out
/// to observers.
pub struct ClipboardWatcher<S> {
    config: WatcherConfig,
    source: Arc<Mutex<S>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ClipboardWatcher<SystemClipboard> {
    /// Watch the OS clipboard.
    pub fn system(config: WatcherConfig) -> Self {
        Self::new(SystemClipboard, config)
    }
}

impl<S: ClipboardSource + Send + 'static> ClipboardWatcher<S> {
    pub fn new(source: S, config: WatcherConfig) -> Self {
        Self {
            config,
            source: Arc::new(Mutex::new(source)),
            shared: Arc::new(Shared {
                state: Mutex::new(WatcherState::Stopped),
                wakeup: Condvar::new(),
                observers: Mutex::new(Vec::new()),
                last_seen: Mutex::new(String::new()),
                next_id: AtomicU64::new(1),
            }),
            worker: None,
        }
    }

    /// Register an observer. Observers fire in registration order.
    pub fn add_observer<O: ClipboardObserver + 'static>(&self, observer: O) -> ObserverId {
        let id = ObserverId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.observers).push((id, Box::new(observer)));
        debug!(observer = %id, "observer registered");
        id
    }

    /// Unregister an observer; returns whether it was present.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.shared.observers);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.shared.observers).len()
    }

    pub fn state(&self) -> WatcherState {
        *lock(&self.shared.state)
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn seen_marker(&self) -> SeenMarker {
        SeenMarker(Arc::clone(&self.shared))
    }

    /// Start polling on a background thread.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        {
            let mut state = lock(&self.shared.state);
            let current = *state;
            match current {
                WatcherState::Running => return Err(WatcherError::AlreadyRunning),
                WatcherState::StopRequested => return Err(WatcherError::StopPending),
                WatcherState::Stopped => *state = WatcherState::Running,
            }
        }

        // A worker left behind by a timed-out stop has finished by now.
        if let Some(old) = self.worker.take() {
            let _ = old.join();
        }

        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        let interval = self.config.interval;
        let spawned = thread::Builder::new()
            .name("clipboard_watcher".into())
            .spawn(move || poll_loop(shared, source, interval));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(interval_ms = interval.as_millis() as u64, "clipboard watcher started");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(WatcherState::Stopped);
                Err(WatcherError::Spawn(e))
            }
        }
    }

    /// Ask the worker to exit and wait for it, bounded by
    /// [`WatcherConfig::stop_timeout`].
    pub fn stop(&mut self) -> Result<(), WatcherError> {
        stop_worker(&self.shared, &mut self.worker, self.config.stop_timeout)
    }
}

/// Dropping a running watcher stops it, with the same bound as `stop`.
impl<S> Drop for ClipboardWatcher<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = stop_worker(&self.shared, &mut self.worker, self.config.stop_timeout);
        }
    }
}

fn stop_worker(
    shared: &Shared,
    worker: &mut Option<JoinHandle<()>>,
    timeout: Duration,
) -> Result<(), WatcherError> {
    {
        let mut state = lock(&shared.state);
        let current = *state;
        match current {
            WatcherState::Stopped => {
                drop(state);
                if let Some(old) = worker.take() {
                    let _ = old.join();
                }
                return Ok(());
            }
            WatcherState::Running => *state = WatcherState::StopRequested,
            WatcherState::StopRequested => {}
        }
        shared.wakeup.notify_all();

        let (state, _) = shared
            .wakeup
            .wait_timeout_while(state, timeout, |s| *s != WatcherState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        if *state != WatcherState::Stopped {
            warn!(timeout = ?timeout, "clipboard watcher did not stop in time");
            return Err(WatcherError::StopTimeout(timeout));
        }
    }

    if let Some(handle) = worker.take() {
        if handle.join().is_err() {
            warn!("clipboard polling thread panicked");
        }
    }
    info!("clipboard watcher stopped");
    Ok(())
}

fn poll_loop<S: ClipboardSource>(shared: Arc<Shared>, source: Arc<Mutex<S>>, interval: Duration) {
    let _exit = StoppedOnExit(Arc::clone(&shared));
    let span = info_span!("clipboard_watcher");
    let _enter = span.enter();
    debug!("polling thread running");

    loop {
        let read_failed = match shared.poll_change(&source) {
            Ok(Some(current)) => {
                shared.notify(&current);
                false
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "clipboard read failed; backing off for one cycle");
                true
            }
        };

        let state = lock(&shared.state);
        let (state, _) = shared
            .wakeup
            .wait_timeout_while(state, next_delay(interval, read_failed), |s| {
                *s == WatcherState::Running
            })
            .unwrap_or_else(PoisonError::into_inner);
        if *state != WatcherState::Running {
            break;
        }
    }

    debug!("polling thread exiting");
}
