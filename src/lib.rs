//! Calltrace - method-call tracer producing CSV call graphs
//!
//! A host runtime delivers call/return notifications to a [`TracerSession`].
//! The session keeps a shadow call stack, resolves each method to the entity
//! that owns it, and writes either every event or one deduplicated record per
//! caller→callee edge.
//!
//! ```
//! use calltrace::config::TracerConfig;
//! use calltrace::runtime::{Notification, RuntimeValue, ScriptedRuntime, TypeDesc};
//! use calltrace::session::TracerSession;
//! use calltrace::sink::{OutputSink, SharedBuffer};
//!
//! let buffer = SharedBuffer::new();
//! let sink = OutputSink::from_writer(buffer.clone(), "memory");
//! let mut session =
//!     TracerSession::open(TracerConfig::default(), sink, ScriptedRuntime::new(1)).unwrap();
//!
//! let outer = RuntimeValue::Type(TypeDesc::class("Outer"));
//! let inner = RuntimeValue::Instance(TypeDesc::class("Inner"));
//! session.start_trace().unwrap();
//! session.on_event(&Notification::call(outer.clone(), "run"));
//! session.on_event(&Notification::call(inner.clone(), "step").at("outer.rb", 3));
//! session.on_event(&Notification::ret(inner, "step"));
//! session.on_event(&Notification::ret(outer, "run"));
//! session.close().unwrap();
//!
//! assert!(buffer.contents().contains(r#""Inner","step",instance,"outer.rb",3,"Outer","run",class"#));
//! ```

pub mod cli;
pub mod config;
pub mod csv_output;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod filter;
pub mod fork_guard;
pub mod memo;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod stack;
pub mod stats;

pub use dispatcher::{Dispatch, IgnoreReason};
pub use error::{Result, TraceError};
pub use session::{SessionState, TracerSession};
