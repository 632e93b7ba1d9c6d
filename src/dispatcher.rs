//! Event dispatcher: the per-notification hook
//!
//! Runs synchronously on the traced thread for every call and return the
//! runtime delivers. It never fails; anything it cannot use is ignored or
//! degraded to a placeholder name. The only exits are the fatal stack
//! conditions in [`crate::error::fatal`].

use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::{BlockReturnPolicy, CallerPolicy};
use crate::error::fatal;
use crate::event::{EventKind, TraceEvent};
use crate::fork_guard::ForkStatus;
use crate::runtime::{CodeUnit, Notification, NotificationKind, Runtime};
use crate::session::{SessionState, TracerSession};
use crate::sink::OutputSink;
use crate::stack::StackFrame;
use crate::stats::TraceStats;

/// Why a notification was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    NotTracing,
    Finalizing,
    ForkedChild,
    ForeignThread,
    TracerInternal,
    Unclassified,
}

impl IgnoreReason {
    pub const COUNT: usize = 6;

    pub const ALL: [IgnoreReason; Self::COUNT] = [
        IgnoreReason::NotTracing,
        IgnoreReason::Finalizing,
        IgnoreReason::ForkedChild,
        IgnoreReason::ForeignThread,
        IgnoreReason::TracerInternal,
        IgnoreReason::Unclassified,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IgnoreReason::NotTracing => "not tracing",
            IgnoreReason::Finalizing => "finalizing",
            IgnoreReason::ForkedChild => "forked child",
            IgnoreReason::ForeignThread => "foreign thread",
            IgnoreReason::TracerInternal => "tracer internal",
            IgnoreReason::Unclassified => "unclassified",
        }
    }
}

/// What the dispatcher did with one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    /// Call pushed, filtered out of the output
    Suppressed,
    /// Call pushed, no record due (edge to the root)
    Tracked,
    /// A record was written
    Recorded,
    /// Edge already written in this segment
    Duplicate,
    /// Return matched and popped without a record
    Popped,
    /// Return matched no frame and was dropped
    Unmatched,
    /// A record was due but the sink rejected it
    WriteFailed,
}

impl<R: Runtime> TracerSession<R> {
    /// Process one call/return notification
    pub fn on_event(&mut self, notification: &Notification) -> Dispatch {
        if self.finalizing {
            self.runtime.disable_events();
            return self.ignore(IgnoreReason::Finalizing);
        }
        if self.state != SessionState::Tracing {
            return self.ignore(IgnoreReason::NotTracing);
        }
        if self.guard.check(self.runtime.process_id()) == ForkStatus::Forked {
            warn!(
                owner_pid = self.guard.owner_pid(),
                pid = self.runtime.process_id(),
                "calltrace: fork detected, disabling tracing in child"
            );
            self.runtime.disable_events();
            self.state = SessionState::Open;
            return self.ignore(IgnoreReason::ForkedChild);
        }
        if self.runtime.current_thread() != self.owner_thread {
            return self.ignore(IgnoreReason::ForeignThread);
        }
        self.stats.events += 1;

        let kind = match notification.kind {
            NotificationKind::Call | NotificationKind::NativeCall => EventKind::Call,
            NotificationKind::Return | NotificationKind::NativeReturn => EventKind::Return,
            NotificationKind::Other => return self.ignore(IgnoreReason::Unclassified),
        };

        let method = notification
            .method_id
            .clone()
            .unwrap_or_else(|| self.resolver.unknown());
        let resolved = self.resolver.resolve(
            &notification.receiver,
            &method,
            notification.defined_class.as_ref(),
        );
        if self.config.tracer_entity.as_deref() == Some(&*resolved.name) {
            return self.ignore(IgnoreReason::TracerInternal);
        }

        let filepath = notification
            .path
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.empty_path));
        let event = TraceEvent::new(
            kind,
            resolved.name,
            method,
            resolved.kind,
            filepath,
            notification.lineno,
        )
        .unit(notification.unit);

        match kind {
            EventKind::Call => self.dispatch_call(event),
            EventKind::Return => self.dispatch_return(event),
        }
    }

    fn ignore(&mut self, reason: IgnoreReason) -> Dispatch {
        self.stats.record_ignored(reason);
        Dispatch::Ignored(reason)
    }

    fn dispatch_call(&mut self, event: TraceEvent) -> Dispatch {
        let suppressed = self.config.filter.suppresses(&event);
        let id = self.stack.push(event, suppressed);
        self.stats.calls += 1;
        self.stats.observe_depth(self.stack.depth());

        if suppressed {
            self.stats.suppressed += 1;
            return Dispatch::Suppressed;
        }

        if !self.config.flatten {
            let line = self.writer.format_event(&self.stack.frame(id).trace);
            return write_record(&mut self.sink, &mut self.stats, line);
        }

        let caller = match self.config.caller_policy {
            CallerPolicy::Immediate => self.stack.frame_below(id),
            CallerPolicy::NearestVisible => self.stack.visible_caller(id),
        };
        let Some(caller) = caller else {
            return Dispatch::Tracked;
        };
        if caller.is_root() && !self.config.root_calls {
            return Dispatch::Tracked;
        }
        let line = self.writer.format_edge(&self.stack.frame(id).trace, caller);
        if !self.memo.uniq(line.as_bytes()) {
            self.stats.duplicates += 1;
            return Dispatch::Duplicate;
        }
        write_record(&mut self.sink, &mut self.stats, line)
    }

    fn dispatch_return(&mut self, event: TraceEvent) -> Dispatch {
        let Some(top_id) = self.stack.peek_id() else {
            return self.unmatched(&event);
        };

        let top = self.stack.frame(top_id);
        if !top.is_root() && top.trace.same_method(&event) {
            let frame = self.pop_frame();
            self.stats.returns += 1;
            return self.finish_return(&event, frame.suppressed);
        }

        // A block's return surfaces one frame above its call: match it
        // against the frame below and report the call-site location.
        let block_match = event.is_block()
            && self.config.block_returns == BlockReturnPolicy::Reattribute
            && !top.is_root()
            && self
                .stack
                .frame_below(top_id)
                .is_some_and(|below| !below.is_root() && below.trace.same_method(&event));
        if !block_match {
            return self.unmatched(&event);
        }

        self.pop_frame();
        let matched = self.pop_frame();
        self.stats.returns += 1;
        self.stats.block_returns += 1;
        let relocated = TraceEvent::new(
            EventKind::Return,
            Arc::clone(&event.entity),
            Arc::clone(&event.method_name),
            event.method_kind,
            Arc::clone(&matched.trace.filepath),
            matched.trace.lineno,
        )
        .unit(CodeUnit::Block);
        self.finish_return(&relocated, matched.suppressed)
    }

    fn finish_return(&mut self, event: &TraceEvent, suppressed: bool) -> Dispatch {
        if suppressed || self.config.flatten {
            return Dispatch::Popped;
        }
        let line = self.writer.format_event(event);
        write_record(&mut self.sink, &mut self.stats, line)
    }

    fn unmatched(&mut self, event: &TraceEvent) -> Dispatch {
        self.stats.unmatched_returns += 1;
        trace!(
            entity = &*event.entity,
            method = &*event.method_name,
            "calltrace: dropping unmatched return"
        );
        Dispatch::Unmatched
    }

    fn pop_frame(&mut self) -> StackFrame {
        match self.stack.pop() {
            Ok(frame) => frame,
            Err(err) => fatal(&err.to_string()),
        }
    }
}

fn write_record(sink: &mut Option<OutputSink>, stats: &mut TraceStats, line: &str) -> Dispatch {
    let result = match sink.as_mut() {
        Some(sink) => sink.write_all(line.as_bytes()),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "sink released",
        )),
    };
    match result {
        Ok(()) => {
            stats.records += 1;
            Dispatch::Recorded
        }
        Err(err) => {
            stats.write_errors += 1;
            if stats.write_errors == 1 {
                warn!(error = %err, "calltrace: failed to write record");
            }
            Dispatch::WriteFailed
        }
    }
}
