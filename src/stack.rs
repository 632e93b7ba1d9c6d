//! Shadow call stack
//!
//! The tracer's private reconstruction of the traced program's call stack.
//! Frames live in a growable array; popped slots are reused by later pushes
//! and the array never shrinks, so a push is amortized O(1) and allocation
//! free once the stack has reached its working depth.
//!
//! A synthetic root frame may sit at index 0 so that top-level calls always
//! have a (synthetic) caller and stray returns can never underflow.

use crate::error::{fatal, Result, TraceError};
use crate::event::TraceEvent;

/// Index of a frame in the shadow stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One frame: the call that pushed it and a link to its caller
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub trace: TraceEvent,
    pub caller: Option<FrameId>,
    pub suppressed: bool,
    root: bool,
}

impl StackFrame {
    pub fn is_root(&self) -> bool {
        self.root
    }
}

#[derive(Debug)]
pub struct ShadowCallStack {
    frames: Vec<StackFrame>,
    top: Option<usize>,
    rooted: bool,
}

impl ShadowCallStack {
    /// Stack without a root sentinel; popping it empty is an error
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity.max(1)),
            top: None,
            rooted: false,
        }
    }

    /// Stack seeded with the synthetic `<ROOT>` frame
    pub fn with_root(capacity: usize) -> Self {
        let mut stack = Self::new(capacity);
        stack.rooted = true;
        stack.seed_root();
        stack
    }

    fn seed_root(&mut self) {
        let root = StackFrame {
            trace: TraceEvent::root(),
            caller: None,
            suppressed: false,
            root: true,
        };
        if self.frames.is_empty() {
            self.frames.push(root);
        } else {
            self.frames[0] = root;
        }
        self.top = Some(0);
    }

    /// Push a frame for `trace`; its caller is the previous top (or the root).
    pub fn push(&mut self, trace: TraceEvent, suppressed: bool) -> FrameId {
        let caller = self.top.map(FrameId);
        let slot = self.top.map_or(0, |top| top + 1);
        let frame = StackFrame {
            trace,
            caller,
            suppressed,
            root: false,
        };

        if slot < self.frames.len() {
            self.frames[slot] = frame;
        } else {
            self.grow();
            self.frames.push(frame);
        }
        self.top = Some(slot);
        FrameId(slot)
    }

    fn grow(&mut self) {
        if self.frames.len() < self.frames.capacity() {
            return;
        }
        let additional = self.frames.capacity().max(1);
        if self.frames.try_reserve_exact(additional).is_err() {
            fatal("shadow stack allocation failed");
        }
    }

    /// Pop the top frame.
    ///
    /// With a root sentinel and no other frames the root is returned and stays
    /// in place. Without a sentinel an empty stack is [`TraceError::StackUnderflow`].
    pub fn pop(&mut self) -> Result<StackFrame> {
        let top = self.top.ok_or(TraceError::StackUnderflow)?;
        let frame = self.frames[top].clone();
        if frame.root {
            return Ok(frame);
        }
        self.top = top.checked_sub(1);
        Ok(frame)
    }

    /// The top frame, which may be the root sentinel
    pub fn peek(&self) -> Option<&StackFrame> {
        self.top.map(|top| &self.frames[top])
    }

    pub fn peek_id(&self) -> Option<FrameId> {
        self.top.map(FrameId)
    }

    /// Frame at `id`.
    ///
    /// # Panics
    /// If `id` is above the top of the stack.
    pub fn frame(&self, id: FrameId) -> &StackFrame {
        self.check_live(id);
        &self.frames[id.0]
    }

    /// The caller-side neighbour directly below `id`
    ///
    /// # Panics
    /// If `id` is above the top of the stack.
    pub fn frame_below(&self, id: FrameId) -> Option<&StackFrame> {
        self.check_live(id);
        id.0.checked_sub(1).map(|below| &self.frames[below])
    }

    /// Nearest ancestor of `id` that is not suppressed (the root counts as visible)
    pub fn visible_caller(&self, id: FrameId) -> Option<&StackFrame> {
        let mut next = self.frame(id).caller;
        while let Some(caller) = next {
            let frame = &self.frames[caller.0];
            if !frame.suppressed || frame.root {
                return Some(frame);
            }
            next = frame.caller;
        }
        None
    }

    fn check_live(&self, id: FrameId) {
        let live = self.top.is_some_and(|top| id.0 <= top);
        assert!(live, "frame {} is outside the live shadow stack", id.0);
    }

    /// Number of frames above the root sentinel
    pub fn depth(&self) -> usize {
        match self.top {
            None => 0,
            Some(top) if self.rooted => top,
            Some(top) => top + 1,
        }
    }

    /// True when only the root sentinel (or nothing) remains
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    /// Allocated frame slots
    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// Drop every frame but the root, keeping the allocation
    pub fn reset(&mut self) {
        if self.rooted {
            self.seed_root();
        } else {
            self.top = None;
        }
    }
}
