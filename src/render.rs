//! Throttled incremental rendering of the captured console output.
//!
//! Rebuilding the whole view on every new line resets the viewer's scroll
//! position, so the [`ConsoleRenderer`] appends only the newly observed tail
//! whenever it can, falling back to a full rebuild on the first pass, when
//! the snapshot shrank, or when an append fails. Render passes are throttled
//! to a fixed cadence; output notifications only set a dirty flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

// Bounded wait for the throttle worker when the console is hidden.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Supplies snapshots of the output buffer to render from.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Vec<String>;
}

/// Where rendered console content goes.
pub trait RenderTarget: Send + Sync {
    /// Rebuild the entire view from a fresh snapshot.
    fn full_render(&self, lines: &[String], auto_scroll: bool);

    /// Add only `lines` to the existing view, leaving the rendered prefix
    /// and the viewer's scroll position untouched.
    fn append_lines(&self, lines: &[String], auto_scroll: bool) -> anyhow::Result<()>;
}

// How far the last pass got; lives behind one lock so concurrent passes
// cannot interleave their count bookkeeping.
struct RenderProgress {
    initialized: bool,
    last_count: usize,
}

/// Consumes output snapshots and emits full or incremental render passes.
#[derive(Clone)]
pub struct ConsoleRenderer {
    inner: Arc<RendererInner>,
}

struct RendererInner {
    source: Arc<dyn SnapshotSource>,
    target: Arc<dyn RenderTarget>,
    interval: Duration,
    auto_scroll: bool,
    dirty: AtomicBool,
    active: AtomicBool,
    progress: Mutex<RenderProgress>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleRenderer {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        target: Arc<dyn RenderTarget>,
        interval: Duration,
        auto_scroll: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RendererInner {
                source,
                target,
                interval,
                auto_scroll,
                dirty: AtomicBool::new(false),
                active: AtomicBool::new(false),
                progress: Mutex::new(RenderProgress {
                    initialized: false,
                    last_count: 0,
                }),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Mark the view as needing a pass. Wire this to the supervisor's
    /// output subscription; the actual render happens on the next tick.
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    /// Show the console: one immediate render pass, then a periodic worker
    /// that re-renders whenever the dirty flag was set since the last tick.
    pub fn activate(&self) {
        if self.inner.active.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut progress = self.inner.progress.lock().expect("render progress lock poisoned");
            progress.initialized = false;
            progress.last_count = 0;
        }
        self.inner.dirty.store(false, Ordering::Release);
        Self::render_pass(&self.inner);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            debug!("console update worker started");
            while inner.active.load(Ordering::Acquire) {
                tokio::time::sleep(inner.interval).await;
                if !inner.active.load(Ordering::Acquire) {
                    break;
                }
                if inner.dirty.swap(false, Ordering::AcqRel) {
                    Self::render_pass(&inner);
                }
            }
            debug!("console update worker stopped");
        });
        *self.inner.worker.lock().expect("render worker lock poisoned") = Some(handle);
    }

    /// Hide the console: stop the worker and forget render progress so the
    /// next activation starts from a full render.
    pub async fn deactivate(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self.inner.worker.lock().expect("render worker lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await;
        }
        self.inner
            .progress
            .lock()
            .expect("render progress lock poisoned")
            .initialized = false;
    }

    fn render_pass(inner: &RendererInner) {
        let lines = inner.source.snapshot();
        let count = lines.len();
        let mut progress = inner.progress.lock().expect("render progress lock poisoned");

        // A shrinking count means the buffer was trimmed underneath us; the
        // already-rendered prefix no longer matches, so rebuild everything.
        if !progress.initialized || count < progress.last_count {
            debug!("performing full console render of {count} lines");
            inner.target.full_render(&lines, inner.auto_scroll);
            progress.initialized = true;
            progress.last_count = count;
        } else if count > progress.last_count {
            let fresh = &lines[progress.last_count..];
            match inner.target.append_lines(fresh, inner.auto_scroll) {
                Ok(()) => {
                    debug!("appended {} new lines to console", fresh.len());
                    progress.last_count = count;
                }
                Err(e) => {
                    error!("incremental console update failed: {e}");
                    inner.target.full_render(&lines, inner.auto_scroll);
                    progress.initialized = true;
                    progress.last_count = count;
                }
            }
        }
        // Equal count: nothing new to draw.
    }
}
