//! Handle kinds - the element type a handle addresses

use crate::offsets;
use std::sync::Arc;

/// Element type of an [`AddressHandle`](super::AddressHandle).
///
/// Builtin kinds map onto C scalar types; `Named` covers declared struct
/// classes whose size comes from the member-offset table registered by a
/// loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Base,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Bool,
    SizeT,
    CLong,
    PointerPointer,
    Named { name: Arc<str>, size: usize },
}

/// Builtin kinds with their handle class names and C element spellings
const BUILTINS: &[(HandleKind, &str, &str)] = &[
    (HandleKind::Base, "Pointer", "void"),
    (HandleKind::Byte, "BytePointer", "signed char"),
    (HandleKind::Short, "ShortPointer", "short"),
    (HandleKind::Int, "IntPointer", "int"),
    (HandleKind::Long, "LongPointer", "long long"),
    (HandleKind::Float, "FloatPointer", "float"),
    (HandleKind::Double, "DoublePointer", "double"),
    (HandleKind::Char, "CharPointer", "unsigned short"),
    (HandleKind::Bool, "BoolPointer", "bool"),
    (HandleKind::SizeT, "SizeTPointer", "size_t"),
    (HandleKind::CLong, "CLongPointer", "long"),
    (HandleKind::PointerPointer, "PointerPointer", "void*"),
];

impl HandleKind {
    /// Handle class names that ship with the runtime
    pub fn builtin_class_names() -> impl Iterator<Item = &'static str> {
        BUILTINS.iter().map(|(_, name, _)| *name)
    }

    /// Builtin kind for a handle class name
    pub fn builtin(class_name: &str) -> Option<HandleKind> {
        BUILTINS
            .iter()
            .find(|(_, name, _)| *name == class_name)
            .map(|(kind, _, _)| kind.clone())
    }

    /// Builtin kind, or a named kind sized from the member-offset table
    pub fn from_class_name(class_name: &str) -> HandleKind {
        Self::builtin(class_name).unwrap_or_else(|| Self::named(class_name))
    }

    pub fn named(name: &str) -> HandleKind {
        HandleKind::Named {
            name: Arc::from(name),
            size: offsets::sizeof(name).unwrap_or(1),
        }
    }

    pub fn class_name(&self) -> &str {
        match self {
            HandleKind::Named { name, .. } => &**name,
            builtin => BUILTINS
                .iter()
                .find(|(kind, _, _)| kind == builtin)
                .map_or("Pointer", |(_, name, _)| *name),
        }
    }

    /// C spelling of one element, `None` for named kinds
    pub fn c_element_type(&self) -> Option<&'static str> {
        BUILTINS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, c)| *c)
    }

    #[inline]
    pub fn is_base(&self) -> bool {
        matches!(self, HandleKind::Base)
    }

    /// Bytes per element
    pub fn element_size(&self) -> usize {
        use core::mem::size_of;
        match self {
            HandleKind::Base | HandleKind::Byte | HandleKind::Bool => 1,
            HandleKind::Short | HandleKind::Char => 2,
            HandleKind::Int | HandleKind::Float => 4,
            HandleKind::Long | HandleKind::Double => 8,
            HandleKind::SizeT => size_of::<usize>(),
            HandleKind::CLong => size_of::<libc::c_long>(),
            HandleKind::PointerPointer => size_of::<*mut core::ffi::c_void>(),
            HandleKind::Named { size, .. } => *size,
        }
    }
}

impl core::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.class_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        for name in HandleKind::builtin_class_names() {
            let kind = HandleKind::builtin(name).unwrap();
            assert_eq!(kind.class_name(), name);
        }
        assert_eq!(HandleKind::builtin("Widget"), None);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(HandleKind::Base.element_size(), 1);
        assert_eq!(HandleKind::Char.element_size(), 2);
        assert_eq!(HandleKind::Int.element_size(), 4);
        assert_eq!(HandleKind::Double.element_size(), 8);
        assert_eq!(HandleKind::PointerPointer.element_size(), core::mem::size_of::<usize>());
    }

    #[test]
    fn named_kind_uses_registered_size() {
        offsets::put_member_offset("kind_test.Vec3", "sizeof", 12);
        let kind = HandleKind::from_class_name("kind_test.Vec3");
        assert_eq!(kind.element_size(), 12);
        assert_eq!(kind.class_name(), "kind_test.Vec3");
        assert_eq!(kind.c_element_type(), None);

        assert_eq!(HandleKind::named("kind_test.Unknown").element_size(), 1);
    }
}
