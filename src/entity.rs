//! Entity resolution
//!
//! Maps a call's receiver and method to the entity named in output and to
//! whether the call is instance-level or type-level. Singleton wrappers are
//! looked through so records always name a real, user-visible type.

use std::sync::Arc;

use fnv::FnvHashMap;

use crate::event::{MethodKind, UNKNOWN};
use crate::runtime::{RuntimeValue, TypeDesc, TypeFlavor};

/// Name of the constructor method
///
/// Calling it on a type value is an instance-level call on the value's
/// metatype (`Class#initialize`), not a type-level call.
pub const CONSTRUCTOR_METHOD: &str = "initialize";

/// Maximum singleton layers walked before giving up on a real type
pub const MAX_SINGLETON_LAYERS: usize = 8;

/// Owner entity and method kind for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub name: Arc<str>,
    pub kind: MethodKind,
}

/// Resolves receivers to entity names, caching generated names
#[derive(Debug)]
pub struct EntityResolver {
    class_name: Arc<str>,
    module_name: Arc<str>,
    unknown: Arc<str>,
    generated: FnvHashMap<u64, Arc<str>>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityResolver {
    pub fn new() -> Self {
        Self {
            class_name: Arc::from("Class"),
            module_name: Arc::from("Module"),
            unknown: Arc::from(UNKNOWN),
            generated: FnvHashMap::default(),
        }
    }

    /// Resolve the owner of `method` called on `receiver`.
    ///
    /// `defined_class` is only consulted for opaque receivers. Never fails:
    /// unresolvable receivers map to `<UNKNOWN>`.
    pub fn resolve(
        &mut self,
        receiver: &RuntimeValue,
        method: &str,
        defined_class: Option<&Arc<TypeDesc>>,
    ) -> ResolvedEntity {
        match receiver {
            RuntimeValue::Type(ty) if method != CONSTRUCTOR_METHOD => ResolvedEntity {
                name: self.name_of(unwrap_singletons(ty)),
                kind: MethodKind::Type,
            },
            RuntimeValue::Type(ty) => ResolvedEntity {
                name: self.metatype_of(unwrap_singletons(ty)),
                kind: MethodKind::Instance,
            },
            RuntimeValue::Instance(ty) => ResolvedEntity {
                name: self.name_of(unwrap_singletons(ty)),
                kind: MethodKind::Instance,
            },
            RuntimeValue::Opaque => ResolvedEntity {
                name: match defined_class {
                    Some(owner) => self.name_of(unwrap_singletons(owner)),
                    None => Arc::clone(&self.unknown),
                },
                kind: MethodKind::Instance,
            },
        }
    }

    /// Cached name of `ty`, or a generated `#<Class:0x...>` style name
    pub fn name_of(&mut self, ty: &TypeDesc) -> Arc<str> {
        if let Some(name) = ty.name() {
            return Arc::clone(name);
        }
        let entry = self.generated.entry(ty.object_id()).or_insert_with(|| {
            Arc::from(format!(
                "#<{}:0x{:016x}>",
                ty.flavor().metatype_name(),
                ty.object_id()
            ))
        });
        Arc::clone(entry)
    }

    /// Shared `<UNKNOWN>` placeholder
    pub fn unknown(&self) -> Arc<str> {
        Arc::clone(&self.unknown)
    }

    fn metatype_of(&self, ty: &TypeDesc) -> Arc<str> {
        match ty.flavor() {
            TypeFlavor::Class => Arc::clone(&self.class_name),
            TypeFlavor::Module => Arc::clone(&self.module_name),
        }
    }
}

/// Walk through singleton wrappers to the type they are attached to.
///
/// Each layer is crossed once; a chain deeper than [`MAX_SINGLETON_LAYERS`]
/// or ending at an opaque value stops at the last wrapper reached.
pub fn unwrap_singletons(ty: &Arc<TypeDesc>) -> &Arc<TypeDesc> {
    let mut current = ty;
    for _ in 0..MAX_SINGLETON_LAYERS {
        match current.attached() {
            Some(RuntimeValue::Instance(owner)) | Some(RuntimeValue::Type(owner)) => {
                current = owner;
            }
            Some(RuntimeValue::Opaque) | None => break,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_method_on_object() {
        let mut resolver = EntityResolver::new();
        let example = TypeDesc::class("Example");
        let resolved = resolver.resolve(&RuntimeValue::Instance(example), "normal_method", None);
        assert_eq!(&*resolved.name, "Example");
        assert_eq!(resolved.kind, MethodKind::Instance);
    }

    #[test]
    fn test_type_method_on_class_value() {
        let mut resolver = EntityResolver::new();
        let example = TypeDesc::class("Example");
        let resolved = resolver.resolve(&RuntimeValue::Type(example), "new", None);
        assert_eq!(&*resolved.name, "Example");
        assert_eq!(resolved.kind, MethodKind::Type);
    }

    #[test]
    fn test_constructor_on_class_value_is_instance_of_metatype() {
        let mut resolver = EntityResolver::new();
        let anon = TypeDesc::anonymous_class();
        let resolved = resolver.resolve(&RuntimeValue::Type(anon), CONSTRUCTOR_METHOD, None);
        assert_eq!(&*resolved.name, "Class");
        assert_eq!(resolved.kind, MethodKind::Instance);

        let module = TypeDesc::anonymous_module();
        let resolved = resolver.resolve(&RuntimeValue::Type(module), CONSTRUCTOR_METHOD, None);
        assert_eq!(&*resolved.name, "Module");
    }

    #[test]
    fn test_singleton_of_instance_resolves_to_real_class() {
        let mut resolver = EntityResolver::new();
        let example = TypeDesc::class("Example");
        let meta = TypeDesc::singleton_of(RuntimeValue::Instance(example));
        let resolved = resolver.resolve(&RuntimeValue::Type(meta), "singleton_method", None);
        assert_eq!(&*resolved.name, "Example");
        assert_eq!(resolved.kind, MethodKind::Type);
    }

    #[test]
    fn test_nested_singletons_are_walked() {
        let mut resolver = EntityResolver::new();
        let example = TypeDesc::class("Example");
        let meta = TypeDesc::singleton_of(RuntimeValue::Type(example));
        let meta_meta = TypeDesc::singleton_of(RuntimeValue::Type(meta));
        let resolved = resolver.resolve(&RuntimeValue::Instance(meta_meta), "x", None);
        assert_eq!(&*resolved.name, "Example");
    }

    #[test]
    fn test_singleton_chain_is_bounded() {
        let mut ty = TypeDesc::class("Deep");
        for _ in 0..(MAX_SINGLETON_LAYERS + 2) {
            ty = TypeDesc::singleton_of(RuntimeValue::Type(ty));
        }
        let resolved = unwrap_singletons(&ty);
        assert!(resolved.is_singleton());
    }

    #[test]
    fn test_anonymous_module_gets_generated_name() {
        let mut resolver = EntityResolver::new();
        let anon = TypeDesc::anonymous_module();
        let first = resolver.resolve(&RuntimeValue::Type(Arc::clone(&anon)), "extend", None);
        assert!(first.name.starts_with("#<Module:0x"));
        let second = resolver.resolve(&RuntimeValue::Type(anon), "extended", None);
        assert!(Arc::ptr_eq(&first.name, &second.name));
    }

    #[test]
    fn test_opaque_receiver_uses_defined_class() {
        let mut resolver = EntityResolver::new();
        let kernel = TypeDesc::module("Kernel");
        let resolved = resolver.resolve(&RuntimeValue::Opaque, "puts", Some(&kernel));
        assert_eq!(&*resolved.name, "Kernel");
        assert_eq!(resolved.kind, MethodKind::Instance);
    }

    #[test]
    fn test_opaque_receiver_without_owner_is_unknown() {
        let mut resolver = EntityResolver::new();
        let resolved = resolver.resolve(&RuntimeValue::Opaque, "puts", None);
        assert_eq!(&*resolved.name, UNKNOWN);
    }
}
