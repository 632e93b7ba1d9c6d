//! Runtime introspection interface
//!
//! The tracer never instruments a program itself. A host runtime raises
//! call/return notifications and hands them to the session hook, and exposes a
//! small capability surface for switching delivery on and off and for asking
//! which process and thread the hook is currently running on.
//!
//! This module models that surface:
//! - [`Runtime`]: delivery control plus process/thread identity
//! - [`Notification`]: everything the host supplies per call/return
//! - [`RuntimeValue`] / [`TypeDesc`]: the host's object model as far as entity
//!   resolution needs it (instances, type values, singleton wrappers)
//! - [`ScriptedRuntime`]: a controllable runtime used by replay and tests
//! - [`HostRuntime`]: a runtime bound to the current OS process

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque token identifying a thread of the traced program
pub type ThreadToken = u64;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(0x7f10_0000);
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<ThreadToken> = const { Cell::new(0) };
}

/// Capability exposed by the host runtime to a tracer session
pub trait Runtime {
    /// Start delivering call/return notifications to the session hook
    fn enable_events(&mut self);

    /// Stop delivering notifications
    fn disable_events(&mut self);

    /// Id of the process the hook is currently executing in
    fn process_id(&self) -> u32;

    /// Token of the thread the hook is currently executing on
    fn current_thread(&self) -> ThreadToken;
}

/// Raw notification kinds raised by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Entry into a managed method
    Call,
    /// Entry into a native (host-implemented) method
    NativeCall,
    /// Exit from a managed method
    Return,
    /// Exit from a native method
    NativeReturn,
    /// Anything else the host may raise (line, raise, ...)
    Other,
}

/// Whether the executing unit is a named method or a lexical block that the
/// host surfaces as a pseudo-method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeUnit {
    #[default]
    Method,
    Block,
}

/// Flavor of a type value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFlavor {
    Class,
    Module,
}

impl TypeFlavor {
    /// Name of the type that type values of this flavor are instances of
    pub fn metatype_name(self) -> &'static str {
        match self {
            TypeFlavor::Class => "Class",
            TypeFlavor::Module => "Module",
        }
    }
}

/// A class or module known to the host runtime
#[derive(Debug)]
pub struct TypeDesc {
    name: Option<Arc<str>>,
    object_id: u64,
    flavor: TypeFlavor,
    attached: Option<RuntimeValue>,
}

impl TypeDesc {
    fn build(name: Option<&str>, flavor: TypeFlavor, attached: Option<RuntimeValue>) -> Arc<Self> {
        Arc::new(Self {
            name: name.map(Arc::from),
            object_id: NEXT_OBJECT_ID.fetch_add(0x28, Ordering::Relaxed),
            flavor,
            attached,
        })
    }

    /// A named class
    pub fn class(name: &str) -> Arc<Self> {
        Self::build(Some(name), TypeFlavor::Class, None)
    }

    /// A named module
    pub fn module(name: &str) -> Arc<Self> {
        Self::build(Some(name), TypeFlavor::Module, None)
    }

    /// A class created at runtime without a cached name
    pub fn anonymous_class() -> Arc<Self> {
        Self::build(None, TypeFlavor::Class, None)
    }

    /// A module created at runtime without a cached name
    pub fn anonymous_module() -> Arc<Self> {
        Self::build(None, TypeFlavor::Module, None)
    }

    /// The synthetic singleton wrapper attached to `value`
    pub fn singleton_of(value: RuntimeValue) -> Arc<Self> {
        Self::build(None, TypeFlavor::Class, Some(value))
    }

    pub fn name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn flavor(&self) -> TypeFlavor {
        self.flavor
    }

    /// The value a singleton wrapper is attached to, `None` for real types
    pub fn attached(&self) -> Option<&RuntimeValue> {
        self.attached.as_ref()
    }

    pub fn is_singleton(&self) -> bool {
        self.attached.is_some()
    }
}

/// The receiver ("self") of a call as seen by the tracer
#[derive(Debug, Clone)]
pub enum RuntimeValue {
    /// An ordinary object whose class is the given type
    Instance(Arc<TypeDesc>),
    /// A class or module value
    Type(Arc<TypeDesc>),
    /// A value whose type cannot be derived directly (immediates, handles)
    Opaque,
}

/// One call/return notification as supplied by the host
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub receiver: RuntimeValue,
    pub method_id: Option<Arc<str>>,
    pub defined_class: Option<Arc<TypeDesc>>,
    pub path: Option<Arc<str>>,
    pub lineno: u32,
    pub unit: CodeUnit,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationKind, receiver: RuntimeValue, method: &str) -> Self {
        Self {
            kind,
            receiver,
            method_id: Some(Arc::from(method)),
            defined_class: None,
            path: None,
            lineno: 0,
            unit: CodeUnit::Method,
        }
    }

    #[must_use]
    pub fn call(receiver: RuntimeValue, method: &str) -> Self {
        Self::new(NotificationKind::Call, receiver, method)
    }

    #[must_use]
    pub fn ret(receiver: RuntimeValue, method: &str) -> Self {
        Self::new(NotificationKind::Return, receiver, method)
    }

    #[must_use]
    pub fn at(mut self, path: &str, lineno: u32) -> Self {
        self.path = Some(Arc::from(path));
        self.lineno = lineno;
        self
    }

    #[must_use]
    pub fn block(mut self) -> Self {
        self.unit = CodeUnit::Block;
        self
    }

    #[must_use]
    pub fn defined_on(mut self, owner: Arc<TypeDesc>) -> Self {
        self.defined_class = Some(owner);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug)]
struct ScriptedState {
    enabled: AtomicBool,
    pid: AtomicU32,
    thread: AtomicU64,
    enables: AtomicU64,
    disables: AtomicU64,
}

/// A runtime whose identity and delivery flag are driven from outside
///
/// Clones share state, so a test or the replay driver can keep a handle
/// while the session owns another one.
#[derive(Debug, Clone)]
pub struct ScriptedRuntime {
    inner: Arc<ScriptedState>,
}

/// Thread token the scripted runtime starts on
pub const MAIN_THREAD: ThreadToken = 1;

impl ScriptedRuntime {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            inner: Arc::new(ScriptedState {
                enabled: AtomicBool::new(false),
                pid: AtomicU32::new(pid),
                thread: AtomicU64::new(MAIN_THREAD),
                enables: AtomicU64::new(0),
                disables: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate running in another process (e.g. after fork)
    pub fn set_process_id(&self, pid: u32) {
        self.inner.pid.store(pid, Ordering::Release);
    }

    /// Simulate the next notifications coming from `thread`
    pub fn set_thread(&self, thread: ThreadToken) {
        self.inner.thread.store(thread, Ordering::Release);
    }

    /// Whether the host would currently deliver notifications
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn enable_count(&self) -> u64 {
        self.inner.enables.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn disable_count(&self) -> u64 {
        self.inner.disables.load(Ordering::Acquire)
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new(std::process::id())
    }
}

impl Runtime for ScriptedRuntime {
    fn enable_events(&mut self) {
        self.inner.enables.fetch_add(1, Ordering::AcqRel);
        self.inner.enabled.store(true, Ordering::Release);
    }

    fn disable_events(&mut self) {
        self.inner.disables.fetch_add(1, Ordering::AcqRel);
        self.inner.enabled.store(false, Ordering::Release);
    }

    fn process_id(&self) -> u32 {
        self.inner.pid.load(Ordering::Acquire)
    }

    fn current_thread(&self) -> ThreadToken {
        self.inner.thread.load(Ordering::Acquire)
    }
}

/// Runtime bound to the current OS process
///
/// The embedding host polls [`HostRuntime::delivery`] before raising a
/// notification. Process ids come from `getpid(2)`, so a forked child sees
/// its own id on its first notification.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime {
    delivery: Arc<AtomicBool>,
}

impl HostRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared delivery flag for the host's notification source
    #[must_use]
    pub fn delivery(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.delivery)
    }
}

impl Runtime for HostRuntime {
    fn enable_events(&mut self) {
        self.delivery.store(true, Ordering::Release);
    }

    fn disable_events(&mut self) {
        self.delivery.store(false, Ordering::Release);
    }

    fn process_id(&self) -> u32 {
        nix::unistd::getpid().as_raw() as u32
    }

    fn current_thread(&self) -> ThreadToken {
        THREAD_TOKEN.with(|token| {
            if token.get() == 0 {
                token.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
            }
            token.get()
        })
    }
}
