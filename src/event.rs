//! Trace events built from call/return notifications

use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;

use crate::runtime::CodeUnit;

/// Placeholder used when a name cannot be resolved
pub const UNKNOWN: &str = "<UNKNOWN>";

/// Entity and method name of the synthetic root frame
pub const ROOT: &str = "<ROOT>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Call,
    Return,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Call => "call",
            EventKind::Return => "return",
        }
    }
}

/// Whether a method was invoked on an instance or on a type itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Instance,
    Type,
}

impl MethodKind {
    /// Column value written to records
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Instance => "instance",
            MethodKind::Type => "class",
        }
    }
}

/// Cheap equality token over (entity, method, kind)
///
/// Used to check that a return belongs to the frame on top of the shadow stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(u64);

impl Identity {
    pub fn of(entity: &str, method_name: &str, method_kind: MethodKind) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(entity.as_bytes());
        hasher.write_u8(0xff);
        hasher.write(method_name.as_bytes());
        hasher.write_u8(match method_kind {
            MethodKind::Instance => 0,
            MethodKind::Type => 1,
        });
        Self(hasher.finish())
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Immutable record of one call or return
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub entity: Arc<str>,
    pub method_name: Arc<str>,
    pub method_kind: MethodKind,
    pub filepath: Arc<str>,
    pub lineno: u32,
    pub unit: CodeUnit,
    identity: Identity,
}

impl TraceEvent {
    #[must_use]
    pub fn new(
        kind: EventKind,
        entity: Arc<str>,
        method_name: Arc<str>,
        method_kind: MethodKind,
        filepath: Arc<str>,
        lineno: u32,
    ) -> Self {
        let identity = Identity::of(&entity, &method_name, method_kind);
        Self {
            kind,
            entity,
            method_name,
            method_kind,
            filepath,
            lineno,
            unit: CodeUnit::Method,
            identity,
        }
    }

    #[must_use]
    pub fn unit(mut self, unit: CodeUnit) -> Self {
        self.unit = unit;
        self
    }

    /// The event carried by the synthetic root frame
    #[must_use]
    pub fn root() -> Self {
        let root: Arc<str> = Arc::from(ROOT);
        Self::new(
            EventKind::Call,
            Arc::clone(&root),
            root,
            MethodKind::Instance,
            Arc::from(""),
            0,
        )
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Same (entity, method, kind) as `other`
    ///
    /// The identity token rejects most mismatches; names are compared only
    /// when the tokens agree.
    pub fn same_method(&self, other: &TraceEvent) -> bool {
        self.identity == other.identity
            && self.method_kind == other.method_kind
            && same_name(&self.entity, &other.entity)
            && same_name(&self.method_name, &other.method_name)
    }

    pub fn is_block(&self) -> bool {
        self.unit == CodeUnit::Block
    }
}

fn same_name(a: &Arc<str>, b: &Arc<str>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, entity: &str, method: &str, method_kind: MethodKind) -> TraceEvent {
        TraceEvent::new(
            kind,
            Arc::from(entity),
            Arc::from(method),
            method_kind,
            Arc::from("app.rb"),
            1,
        )
    }

    #[test]
    fn test_call_and_return_share_identity() {
        let call = event(EventKind::Call, "Outer", "run", MethodKind::Instance);
        let ret = event(EventKind::Return, "Outer", "run", MethodKind::Instance);
        assert!(call.same_method(&ret));
    }

    #[test]
    fn test_colliding_identity_is_not_a_match() {
        let call = event(EventKind::Call, "Outer", "run", MethodKind::Instance);
        let mut other = event(EventKind::Return, "Other", "walk", MethodKind::Instance);
        other.identity = call.identity;
        assert!(!call.same_method(&other));

        let mut kind_only = event(EventKind::Return, "Outer", "run", MethodKind::Type);
        kind_only.identity = call.identity;
        assert!(!call.same_method(&kind_only));
    }

    #[test]
    fn test_shared_names_match() {
        let entity: Arc<str> = Arc::from("Outer");
        let method: Arc<str> = Arc::from("run");
        let path: Arc<str> = Arc::from("");
        let call = TraceEvent::new(
            EventKind::Call,
            Arc::clone(&entity),
            Arc::clone(&method),
            MethodKind::Instance,
            Arc::clone(&path),
            1,
        );
        let ret = TraceEvent::new(EventKind::Return, entity, method, MethodKind::Instance, path, 0);
        assert!(call.same_method(&ret));
    }

    #[test]
    fn test_identity_distinguishes_method_kind() {
        let a = Identity::of("Example", "apply", MethodKind::Instance);
        let b = Identity::of("Example", "apply", MethodKind::Type);
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_does_not_collide_on_concatenation() {
        let a = Identity::of("Ab", "c", MethodKind::Instance);
        let b = Identity::of("A", "bc", MethodKind::Instance);
        assert_ne!(a, b);
    }

    #[test]
    fn test_method_kind_column_values() {
        assert_eq!(MethodKind::Instance.as_str(), "instance");
        assert_eq!(MethodKind::Type.as_str(), "class");
        assert_eq!(EventKind::Return.as_str(), "return");
    }

    #[test]
    fn test_root_event() {
        let root = TraceEvent::root();
        assert_eq!(&*root.entity, ROOT);
        assert_eq!(root.lineno, 0);
        assert!(!root.is_block());
    }
}
