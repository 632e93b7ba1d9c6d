//! Notification scripts
//!
//! A script is a JSON-lines recording of what a host runtime delivered, one
//! operation per line. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! {"op":"call","receiver":{"class":"Outer"},"method":"run","path":"main.rb","line":3}
//! {"op":"call","receiver":{"instance":"Inner"},"method":"step","path":"outer.rb","line":8}
//! {"op":"return","receiver":{"instance":"Inner"},"method":"step"}
//! {"op":"mark","label":"request 2","unwind":true}
//! {"op":"fork","pid":4711}
//! ```
//!
//! [`Replayer`] feeds a script through a [`ScriptedRuntime`], delivering
//! notifications only while the runtime's delivery flag is on.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dispatcher::Dispatch;
use crate::runtime::{
    Notification, NotificationKind, RuntimeValue, ScriptedRuntime, ThreadToken, TypeDesc,
    MAIN_THREAD,
};
use crate::session::TracerSession;

/// One scripted operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    Call(ScriptEvent),
    Return(ScriptEvent),
    NativeCall(ScriptEvent),
    NativeReturn(ScriptEvent),
    /// A notification the tracer does not classify (line, raise, ...)
    Other(ScriptEvent),
    Start,
    Stop,
    Mark {
        #[serde(default)]
        label: String,
        #[serde(default)]
        unwind: bool,
    },
    /// The traced program continues in a child with this process id
    Fork { pid: u32 },
    Close,
}

/// Payload of a scripted notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEvent {
    pub receiver: ScriptValue,
    #[serde(default)]
    pub method: Option<String>,
    /// Raised by a lexical block rather than a named method
    #[serde(default)]
    pub block: bool,
    #[serde(default)]
    pub defined_class: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub thread: Option<ThreadToken>,
}

/// Receiver of a scripted notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptValue {
    /// An instance of the named class
    Instance(String),
    /// The named class itself
    Class(String),
    /// The named module itself
    Module(String),
    /// The singleton class of the named class
    SingletonOfClass(String),
    /// The singleton class of an instance of the named class
    SingletonOfInstance(String),
    /// An unnamed class, identified within the script by a number
    AnonymousClass(u64),
    AnonymousModule(u64),
    Opaque,
}

/// Parse a whole script, reporting the offending line on error
pub fn parse_script<R: BufRead>(reader: R) -> Result<Vec<ScriptOp>> {
    let mut ops = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let lineno = index + 1;
        let line = line.with_context(|| format!("Failed to read script line {lineno}"))?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let op = serde_json::from_str(text)
            .with_context(|| format!("Invalid script operation on line {lineno}"))?;
        ops.push(op);
    }
    Ok(ops)
}

/// Types referenced by a script, interned so identity is stable across lines
#[derive(Debug, Default)]
pub struct TypeRegistry {
    classes: FnvHashMap<String, Arc<TypeDesc>>,
    modules: FnvHashMap<String, Arc<TypeDesc>>,
    class_singletons: FnvHashMap<String, Arc<TypeDesc>>,
    instance_singletons: FnvHashMap<String, Arc<TypeDesc>>,
    anonymous_classes: FnvHashMap<u64, Arc<TypeDesc>>,
    anonymous_modules: FnvHashMap<u64, Arc<TypeDesc>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&mut self, name: &str) -> Arc<TypeDesc> {
        Arc::clone(
            self.classes
                .entry(name.to_string())
                .or_insert_with(|| TypeDesc::class(name)),
        )
    }

    pub fn module(&mut self, name: &str) -> Arc<TypeDesc> {
        Arc::clone(
            self.modules
                .entry(name.to_string())
                .or_insert_with(|| TypeDesc::module(name)),
        )
    }

    pub fn value(&mut self, value: &ScriptValue) -> RuntimeValue {
        match value {
            ScriptValue::Instance(name) => RuntimeValue::Instance(self.class(name)),
            ScriptValue::Class(name) => RuntimeValue::Type(self.class(name)),
            ScriptValue::Module(name) => RuntimeValue::Type(self.module(name)),
            ScriptValue::SingletonOfClass(name) => {
                let owner = self.class(name);
                let singleton = self
                    .class_singletons
                    .entry(name.clone())
                    .or_insert_with(|| TypeDesc::singleton_of(RuntimeValue::Type(owner)));
                RuntimeValue::Type(Arc::clone(singleton))
            }
            ScriptValue::SingletonOfInstance(name) => {
                let owner = self.class(name);
                let singleton = self
                    .instance_singletons
                    .entry(name.clone())
                    .or_insert_with(|| TypeDesc::singleton_of(RuntimeValue::Instance(owner)));
                RuntimeValue::Type(Arc::clone(singleton))
            }
            ScriptValue::AnonymousClass(id) => RuntimeValue::Type(Arc::clone(
                self.anonymous_classes
                    .entry(*id)
                    .or_insert_with(TypeDesc::anonymous_class),
            )),
            ScriptValue::AnonymousModule(id) => RuntimeValue::Type(Arc::clone(
                self.anonymous_modules
                    .entry(*id)
                    .or_insert_with(TypeDesc::anonymous_module),
            )),
            ScriptValue::Opaque => RuntimeValue::Opaque,
        }
    }

    fn notification(&mut self, kind: NotificationKind, event: &ScriptEvent) -> Notification {
        let mut notification =
            Notification::new(kind, self.value(&event.receiver), event.method.as_deref().unwrap_or(""));
        if event.method.is_none() {
            notification.method_id = None;
        }
        if let Some(path) = &event.path {
            notification = notification.at(path, event.line);
        } else {
            notification.lineno = event.line;
        }
        if event.block {
            notification = notification.block();
        }
        if let Some(owner) = &event.defined_class {
            notification = notification.defined_on(self.class(owner));
        }
        notification
    }
}

/// Totals for one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Operations executed
    pub ops: usize,
    /// Notifications handed to the session hook
    pub delivered: usize,
    /// Notifications skipped because delivery was off
    pub undelivered: usize,
    /// Records the hook wrote
    pub recorded: usize,
}

/// Drives a session from a script
#[derive(Debug)]
pub struct Replayer {
    runtime: ScriptedRuntime,
    registry: TypeRegistry,
}

impl Replayer {
    /// `runtime` must share state with the session's runtime
    pub fn new(runtime: ScriptedRuntime) -> Self {
        Self {
            runtime,
            registry: TypeRegistry::new(),
        }
    }

    pub fn for_session(session: &TracerSession<ScriptedRuntime>) -> Self {
        Self::new(session.runtime().clone())
    }

    /// Run `ops` against `session`.
    ///
    /// A script without any `start` operation is traced from its first line.
    pub fn run(
        &mut self,
        session: &mut TracerSession<ScriptedRuntime>,
        ops: &[ScriptOp],
    ) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        if !ops.iter().any(|op| matches!(op, ScriptOp::Start)) {
            session.start_trace().context("Failed to start tracing")?;
        }

        for (index, op) in ops.iter().enumerate() {
            summary.ops += 1;
            match op {
                ScriptOp::Call(event) => self.deliver(session, NotificationKind::Call, event, &mut summary),
                ScriptOp::Return(event) => self.deliver(session, NotificationKind::Return, event, &mut summary),
                ScriptOp::NativeCall(event) => {
                    self.deliver(session, NotificationKind::NativeCall, event, &mut summary)
                }
                ScriptOp::NativeReturn(event) => {
                    self.deliver(session, NotificationKind::NativeReturn, event, &mut summary)
                }
                ScriptOp::Other(event) => self.deliver(session, NotificationKind::Other, event, &mut summary),
                ScriptOp::Start => session
                    .start_trace()
                    .with_context(|| format!("Operation {}: start", index + 1))?,
                ScriptOp::Stop => session.stop_trace(),
                ScriptOp::Mark { label, unwind } => {
                    let result = if *unwind {
                        session.mark_and_unwind(label)
                    } else {
                        session.mark(label)
                    };
                    if let Err(err) = result {
                        warn!(op = index + 1, error = %err, "calltrace: mark failed");
                    }
                }
                ScriptOp::Fork { pid } => {
                    // Parent records hit the sink before the child takes over
                    if !session.is_closed() {
                        session
                            .flush()
                            .with_context(|| format!("Operation {}: fork", index + 1))?;
                    }
                    debug!(pid, "calltrace: replay continues in forked child");
                    self.runtime.set_process_id(*pid);
                }
                ScriptOp::Close => session
                    .close()
                    .with_context(|| format!("Operation {}: close", index + 1))?,
            }
        }
        Ok(summary)
    }

    fn deliver(
        &mut self,
        session: &mut TracerSession<ScriptedRuntime>,
        kind: NotificationKind,
        event: &ScriptEvent,
        summary: &mut ReplaySummary,
    ) {
        if !self.runtime.is_enabled() {
            summary.undelivered += 1;
            return;
        }
        self.runtime.set_thread(event.thread.unwrap_or(MAIN_THREAD));
        let notification = self.registry.notification(kind, event);
        summary.delivered += 1;
        if session.on_event(&notification) == Dispatch::Recorded {
            summary.recorded += 1;
        }
        self.runtime.set_thread(MAIN_THREAD);
    }
}
