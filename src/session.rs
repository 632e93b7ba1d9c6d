//! Tracer session lifecycle
//!
//! ```text
//!   open()         start_trace()
//! ─────────▶ Open ──────────────▶ Tracing
//!             ▲  ◀──────────────    │
//!             │    stop_trace()     │ fork observed
//!             │◀────────────────────┘
//!             │ close()
//!             ▼
//!           Closed   (close() again is a no-op)
//! ```
//!
//! A session owns its output sink and the runtime's delivery switch for its
//! whole lifetime. Dropping a session that was never closed disables
//! delivery and releases the sink exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::TracerConfig;
use crate::csv_output::CsvRecordWriter;
use crate::entity::EntityResolver;
use crate::error::{Result, TraceError};
use crate::fork_guard::{ForkGuard, ForkStatus};
use crate::memo::DedupMemo;
use crate::runtime::{Runtime, ThreadToken};
use crate::sink::OutputSink;
use crate::stack::ShadowCallStack;
use crate::stats::TraceStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sink released; notifications are ignored
    Closed,
    /// Sink open, delivery disabled
    Open,
    /// Delivery enabled; notifications are processed
    Tracing,
}

#[derive(Debug)]
pub struct TracerSession<R: Runtime> {
    pub(crate) state: SessionState,
    pub(crate) config: TracerConfig,
    pub(crate) runtime: R,
    pub(crate) resolver: EntityResolver,
    pub(crate) stack: ShadowCallStack,
    pub(crate) memo: DedupMemo,
    pub(crate) writer: CsvRecordWriter,
    pub(crate) sink: Option<OutputSink>,
    pub(crate) guard: ForkGuard,
    pub(crate) owner_thread: ThreadToken,
    pub(crate) stats: TraceStats,
    pub(crate) finalizing: bool,
    pub(crate) empty_path: Arc<str>,
}

impl<R: Runtime> TracerSession<R> {
    /// Open a session on `sink`: writes the header and seeds the root frame.
    ///
    /// An unwritable sink is an error and the session never exists.
    pub fn open(config: TracerConfig, mut sink: OutputSink, runtime: R) -> Result<Self> {
        let writer = CsvRecordWriter::new(config.record_format());
        sink.write_all(writer.header().as_bytes())
            .and_then(|()| sink.flush())
            .map_err(TraceError::Header)?;

        debug!(
            sink = sink.label(),
            flatten = config.flatten,
            "calltrace: session open"
        );

        Ok(Self {
            state: SessionState::Open,
            stack: ShadowCallStack::with_root(config.stack_capacity),
            guard: ForkGuard::new(runtime.process_id()),
            owner_thread: runtime.current_thread(),
            config,
            runtime,
            resolver: EntityResolver::new(),
            memo: DedupMemo::new(),
            writer,
            sink: Some(sink),
            stats: TraceStats::new(),
            finalizing: false,
            empty_path: Arc::from(""),
        })
    }

    /// Open a session writing to a newly created file
    pub fn create(config: TracerConfig, path: &Path, runtime: R) -> Result<Self> {
        let sink = OutputSink::create(path)?;
        Self::open(config, sink, runtime)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_tracing(&self) -> bool {
        self.state == SessionState::Tracing
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn stats(&self) -> &TraceStats {
        &self.stats
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Frames currently on the shadow stack above the root
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Enable notification delivery.
    ///
    /// Starting an already tracing session is a no-op. In a forked child the
    /// session stays `Open`.
    pub fn start_trace(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(TraceError::SessionClosed),
            SessionState::Tracing => Ok(()),
            SessionState::Open => {
                if self.guard.check(self.runtime.process_id()) == ForkStatus::Forked {
                    debug!("calltrace: start_trace ignored in forked child");
                    return Ok(());
                }
                self.runtime.enable_events();
                self.state = SessionState::Tracing;
                debug!("calltrace: tracing started");
                Ok(())
            }
        }
    }

    /// Disable notification delivery and reset the stack and memo.
    ///
    /// A no-op unless tracing.
    pub fn stop_trace(&mut self) {
        if self.state != SessionState::Tracing {
            return;
        }
        self.runtime.disable_events();
        self.state = SessionState::Open;
        self.stack.reset();
        self.memo.clear();
        debug!("calltrace: tracing stopped");
    }

    /// Trace for the duration of `f`, stopping afterwards
    ///
    /// Tracing is stopped even when `f` panics; the panic then resumes.
    pub fn trace<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> T,
    {
        self.start_trace()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        self.stop_trace();
        match outcome {
            Ok(out) => Ok(out),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Write a `--- label` boundary and start a fresh dedup segment
    pub fn mark(&mut self, label: &str) -> Result<()> {
        self.write_mark(label, false)
    }

    /// Like [`mark`](Self::mark), also unwinding the shadow stack to the root
    pub fn mark_and_unwind(&mut self, label: &str) -> Result<()> {
        self.write_mark(label, true)
    }

    fn write_mark(&mut self, label: &str, unwind: bool) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(TraceError::SessionClosed);
        }
        if !self.owns_current_context() {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(TraceError::SessionClosed);
        };
        let line = self.writer.format_mark(label);
        sink.write_all(line.as_bytes())?;

        self.memo.clear();
        if unwind {
            self.stack.reset();
        }
        Ok(())
    }

    /// Owning process and owning thread
    fn owns_current_context(&mut self) -> bool {
        self.guard.check(self.runtime.process_id()) == ForkStatus::Owner
            && self.runtime.current_thread() == self.owner_thread
    }

    /// Flush buffered records to the sink
    pub fn flush(&mut self) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => Ok(sink.flush()?),
            None => Err(TraceError::SessionClosed),
        }
    }

    /// Disable delivery and release the sink. Closing twice is a no-op.
    ///
    /// In a forked child the sink is released without flushing, so records
    /// buffered by the parent are not written twice.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state == SessionState::Tracing {
            self.runtime.disable_events();
        }
        self.state = SessionState::Closed;
        self.stack.reset();
        self.memo.clear();

        let forked = self.guard.check(self.runtime.process_id()) == ForkStatus::Forked;
        match self.sink.take() {
            Some(sink) if forked => {
                debug!("calltrace: releasing inherited sink in forked child");
                sink.abandon();
            }
            Some(sink) => sink.close()?,
            None => {}
        }
        debug!("calltrace: session closed");
        Ok(())
    }

    /// Mark the session as pending reclamation by the host.
    ///
    /// From here on the hook only disables delivery, and dropping the
    /// session skips everything but that.
    pub fn begin_finalize(&mut self) {
        self.finalizing = true;
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }
}

impl<R: Runtime> Drop for TracerSession<R> {
    fn drop(&mut self) {
        if self.finalizing {
            if self.state != SessionState::Closed {
                self.runtime.disable_events();
                self.state = SessionState::Closed;
            }
            if let Some(sink) = self.sink.take() {
                sink.abandon();
            }
            return;
        }
        if let Err(err) = self.close() {
            warn!(error = %err, "calltrace: failed to close session on drop");
        }
    }
}
