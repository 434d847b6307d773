#![deny(missing_docs)]
//! Per-invocation output capture.
//!
//! A [`Capture`] hub is created once per process and wired into the places
//! diagnostics come from: a [`CaptureLayer`] in the tracing subscriber and
//! [`CaptureStream`] tee writers for raw stdout/stderr. While no session is
//! active those paths only pass text through. [`Capture::begin`] opens a
//! [`CaptureSession`]; from then on every write is also framed into lines,
//! merged into per-classification batches and handed to the session's sink
//! after a debounce interval of quiet.
//!
//! # Usage
//!
//! ```no_run
//! use boot_capture::{Capture, CaptureConfig};
//! use tracing_subscriber::prelude::*;
//!
//! # async fn demo() -> Result<(), boot_capture::CaptureError> {
//! let capture = Capture::new();
//! tracing_subscriber::registry().with(capture.layer()).init();
//!
//! let mut session = capture.begin(CaptureConfig::default(), |batches| {
//!     println!("{batches:?}");
//! })?;
//! tracing::info!("captured");
//! session.drain();
//! session.restore();
//! # Ok(())
//! # }
//! ```

mod batch;
mod format;
mod framer;
mod layer;
mod writer;

pub use batch::BatchList;
pub use format::{Json, join_line};
pub use framer::LineFramer;
pub use layer::CaptureLayer;
pub use writer::CaptureStream;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use boot_types::{Classification, LogBatch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Receives flushed batches.
pub type LogSink = Arc<dyn Fn(Vec<LogBatch>) + Send + Sync>;

/// Capture tuning.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Quiet interval after the last completed line before a flush.
    pub debounce: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
        }
    }
}

/// Errors from opening a capture session.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Another session is still active on this hub.
    #[error("a capture session is already active")]
    AlreadyActive,
    /// The session was opened outside a tokio runtime.
    #[error("capture sessions need a tokio runtime: {0}")]
    NoRuntime(String),
}

/// Process-wide capture hub.
///
/// Cheap to clone; every clone shares the same active session.
#[derive(Clone)]
pub struct Capture {
    inner: Arc<Inner>,
}

struct Inner {
    passthrough: bool,
    next_session: AtomicU64,
    active: Mutex<Option<Active>>,
}

/// State of the session currently intercepting output.
struct Active {
    id: u64,
    debounce: Duration,
    sink: LogSink,
    runtime: Handle,
    info: LineFramer,
    error: LineFramer,
    batches: BatchList,
    timer: Option<JoinHandle<()>>,
}

impl Active {
    fn framer(&mut self, classification: Classification) -> &mut LineFramer {
        match classification {
            Classification::Info => &mut self.info,
            Classification::Error => &mut self.error,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Capture {
    /// Create a hub whose streams pass text through to the process's
    /// stdout and stderr.
    pub fn new() -> Self {
        Self::with_passthrough(true)
    }

    /// Create a hub whose streams only capture, never printing.
    pub fn silent() -> Self {
        Self::with_passthrough(false)
    }

    fn with_passthrough(passthrough: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                passthrough,
                next_session: AtomicU64::new(1),
                active: Mutex::new(None),
            }),
        }
    }

    /// A tracing layer feeding events into this hub.
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer::new(self.clone())
    }

    /// A tee writer for standard output, classified as info.
    pub fn stdout(&self) -> CaptureStream {
        CaptureStream::new(self.clone(), Classification::Info)
    }

    /// A tee writer for standard error, classified as error.
    pub fn stderr(&self) -> CaptureStream {
        CaptureStream::new(self.clone(), Classification::Error)
    }

    /// Whether streams also write to the real process output.
    pub fn passthrough(&self) -> bool {
        self.inner.passthrough
    }

    /// Whether a session is currently intercepting output.
    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// Start intercepting output for one invocation.
    ///
    /// Must be called from within a tokio runtime; the debounce timer runs
    /// on it.
    ///
    /// # Errors
    ///
    /// [`CaptureError::AlreadyActive`] if a session is still open, and
    /// [`CaptureError::NoRuntime`] outside a runtime.
    pub fn begin(
        &self,
        config: CaptureConfig,
        sink: impl Fn(Vec<LogBatch>) + Send + Sync + 'static,
    ) -> Result<CaptureSession, CaptureError> {
        let runtime = Handle::try_current().map_err(|e| CaptureError::NoRuntime(e.to_string()))?;
        let mut active = self.active();
        if active.is_some() {
            return Err(CaptureError::AlreadyActive);
        }
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        *active = Some(Active {
            id,
            debounce: config.debounce,
            sink: Arc::new(sink),
            runtime,
            info: LineFramer::new(),
            error: LineFramer::new(),
            batches: BatchList::new(),
            timer: None,
        });
        Ok(CaptureSession {
            hub: self.clone(),
            id,
            restored: false,
        })
    }

    /// Feed text into the active session, if any.
    ///
    /// Completed lines are merged into the batch list and the debounce
    /// timer is re-armed. Never blocks on I/O and never suspends.
    pub fn record(&self, classification: Classification, text: &str) {
        let mut guard = self.active();
        let Some(active) = guard.as_mut() else {
            return;
        };
        let lines = active.framer(classification).push(text);
        if lines.is_empty() {
            return;
        }
        active.batches.merge(classification, lines);
        active.cancel_timer();

        let hub = self.clone();
        let id = active.id;
        let debounce = active.debounce;
        active.timer = Some(active.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            hub.flush_expired(id);
        }));
    }

    /// Timer callback: emit the batch list if `id` is still the session.
    fn flush_expired(&self, id: u64) {
        let (sink, batches) = {
            let mut guard = self.active();
            let Some(active) = guard.as_mut().filter(|a| a.id == id) else {
                return;
            };
            active.timer = None;
            (Arc::clone(&active.sink), active.batches.take())
        };
        if !batches.is_empty() {
            sink(batches);
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope of one invocation's interception.
///
/// Dropping the session restores pass-through behaviour even when the
/// invocation bailed out early; drain first to keep the output.
pub struct CaptureSession {
    hub: Capture,
    id: u64,
    restored: bool,
}

impl CaptureSession {
    /// Flush everything captured so far.
    ///
    /// Cancels the pending timer and emits the batch list, then emits any
    /// unterminated text in either classification as a final line of its
    /// own. Safe to call when nothing was written.
    pub fn drain(&self) {
        let (sink, batched, partial) = {
            let mut guard = self.hub.active();
            let Some(active) = guard.as_mut().filter(|a| a.id == self.id) else {
                return;
            };
            active.cancel_timer();
            let batched = active.batches.take();
            let mut partial = BatchList::new();
            for classification in Classification::ALL {
                if let Some(rest) = active.framer(classification).take_rest() {
                    partial.merge(classification, vec![rest]);
                }
            }
            (Arc::clone(&active.sink), batched, partial.take())
        };
        if !batched.is_empty() {
            sink(batched);
        }
        if !partial.is_empty() {
            sink(partial);
        }
    }

    /// Stop intercepting and discard anything still buffered.
    ///
    /// Idempotent.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let mut guard = self.hub.active();
        if guard.as_ref().is_some_and(|a| a.id == self.id) {
            if let Some(mut active) = guard.take() {
                active.cancel_timer();
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.restore();
    }
}
