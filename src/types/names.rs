//! Managed → native spellings used by the emitter

use crate::classify::function_method;
use crate::decl::{Annotations, ClassDecl, ClassKind, DeclarationSet, ManagedType, MethodDecl, PassBy};
use crate::emit::mangle;
use nativeport_runtime::HandleKind;
use std::fmt;

/// A C++ type split around the declarator: `int (*` + `)(int)` for a
/// function pointer, `Vector*` + `""` for everything else
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CppName {
    pub prefix: String,
    pub suffix: String,
}

impl CppName {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: String::new(),
        }
    }

    pub fn split(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Declaration of `name` with this type
    pub fn declare(&self, name: &str) -> String {
        format!("{} {}{}", self.prefix, name, self.suffix)
    }
}

impl fmt::Display for CppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.suffix)
    }
}

/// Strip `const ` and the trailing `*` from a pointer spelling
pub fn value_type_name(name: &CppName) -> String {
    let prefix = name.prefix.as_str();
    let prefix = prefix.strip_prefix("const ").unwrap_or(prefix);
    drop_last(prefix).to_string()
}

/// Strip the trailing `*`, keeping `const`
pub fn const_value_type_name(name: &CppName) -> String {
    drop_last(&name.prefix).to_string()
}

fn drop_last(s: &str) -> &str {
    let mut chars = s.chars();
    chars.next_back();
    chars.as_str()
}

/// Name resolution against one declaration set
#[derive(Debug, Clone, Copy)]
pub struct Names<'d> {
    decls: &'d DeclarationSet,
}

impl<'d> Names<'d> {
    pub fn new(decls: &'d DeclarationSet) -> Self {
        Self { decls }
    }

    pub fn decls(&self) -> &'d DeclarationSet {
        self.decls
    }

    pub fn cpp_type_name(&self, ty: &ManagedType) -> Option<CppName> {
        let name = match ty {
            ManagedType::Void => CppName::new("void"),
            ManagedType::Primitive(p) => CppName::new(p.cpp_name()),
            ManagedType::Array(p) | ManagedType::Buffer(p) => CppName::new(format!("{}*", p.cpp_name())),
            ManagedType::String => CppName::new("const char*"),
            ManagedType::Class => CppName::new("np_class"),
            ManagedType::Handle(class_name) => {
                if let Some(kind) = HandleKind::builtin(class_name) {
                    return kind.c_element_type().map(|element| CppName::new(format!("{}*", element)));
                }
                let class = self.decls.class(class_name)?;
                match class.kind {
                    ClassKind::Function => return self.cpp_function_type_name(class),
                    ClassKind::Namespace => return None,
                    ClassKind::Struct | ClassKind::Opaque => {
                        CppName::new(format!("{}*", self.cpp_scope_name(class)))
                    }
                }
            }
        };
        Some(name)
    }

    /// Type after applying `cast`/`const` annotations; a cast wins over const
    pub fn cpp_cast_type_name(&self, ty: &ManagedType, annotations: &Annotations) -> Option<CppName> {
        if let Some(cast) = annotations.cast.as_deref().filter(|c| !c.is_empty()) {
            return Some(match cast.find(')') {
                Some(paren) if paren > 0 => CppName::split(cast[..paren].trim(), cast[paren..].trim()),
                _ => CppName::new(cast.trim()),
            });
        }
        let mut name = self.cpp_type_name(ty)?;
        if annotations.is_const() {
            if annotations.const_pointer {
                name.prefix = format!("{} const *", value_type_name(&name));
            }
            if annotations.constant {
                name.prefix = format!("const {}", name.prefix);
            }
            match annotations.by() {
                Some(PassBy::PtrPtr) => name.prefix.push('*'),
                Some(PassBy::PtrRef) => name.prefix.push('&'),
                _ => {}
            }
        }
        Some(name)
    }

    /// Type as the callee declares it, given how the value is passed
    pub fn cpp_annotation_type_name(&self, ty: &ManagedType, annotations: &Annotations) -> Option<CppName> {
        let mut name = self.cpp_cast_type_name(ty, annotations)?;
        match annotations.by() {
            Some(PassBy::Val) => name.prefix = const_value_type_name(&name),
            Some(PassBy::Ref) => name.prefix = format!("{}&", const_value_type_name(&name)),
            Some(PassBy::PtrPtr) if !annotations.is_casted() => name.prefix.push('*'),
            Some(PassBy::PtrRef) => name.prefix.push('&'),
            _ => {}
        }
        Some(name)
    }

    /// Function pointer type of a function class, from its call method
    pub fn cpp_function_type_name(&self, class: &ClassDecl) -> Option<CppName> {
        let method = function_method(class)?;
        self.cpp_signature_type_name(class, method)
    }

    /// `ret (conv *` + `)(T0 arg0, ...)` for `method` seen as a function
    /// pointer; adapter casts replace the declared types
    pub fn cpp_signature_type_name(&self, class: &ClassDecl, method: &MethodDecl) -> Option<CppName> {
        let adapter_cast = |annotations: &Annotations| {
            annotations
                .adapter
                .as_ref()
                .and_then(|adapter| adapter.cast.clone())
                .filter(|cast| !cast.is_empty())
        };
        let ret = match adapter_cast(&method.annotations) {
            Some(cast) => cast,
            None => self.cpp_annotation_type_name(&method.returns, &method.annotations)?.to_string(),
        };
        let convention = class
            .convention
            .as_deref()
            .map(|c| format!("{} ", c))
            .unwrap_or_default();
        let params = method
            .params
            .iter()
            .enumerate()
            .map(|(j, p)| match adapter_cast(&p.annotations) {
                Some(cast) => Some(format!("{} arg{}", cast, j)),
                None => self
                    .cpp_annotation_type_name(&p.ty, &p.annotations)
                    .map(|name| name.declare(&format!("arg{}", j))),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(CppName::split(
            format!("{} ({}*", ret, convention),
            format!(")({})", params.join(", ")),
        ))
    }

    /// Name of the struct that carries a function pointer and its managed key
    pub fn function_class_name(&self, class: &ClassDecl) -> String {
        class
            .cpp_name
            .clone()
            .unwrap_or_else(|| mangle::class_symbol(&class.name))
    }

    /// Fully qualified native name of a class, walking enclosing classes
    /// until a namespace resets the scope
    pub fn cpp_scope_name(&self, class: &ClassDecl) -> String {
        let mut scope = String::new();
        let mut current = Some(class);
        while let Some(class) = current {
            let mut space = class.namespace.clone().unwrap_or_default();
            let named = class.kind != ClassKind::Namespace
                && (HandleKind::builtin(&class.name).is_none() || class.cpp_name.is_some());
            if named {
                if !space.is_empty() && !space.ends_with("::") {
                    space.push_str("::");
                }
                space.push_str(class.cpp_name.as_deref().unwrap_or_else(|| class.simple_name()));
            }
            if !scope.is_empty() && !space.ends_with("::") {
                space.push_str("::");
            }
            scope = space.clone() + &scope;
            if class.namespace.as_deref() == Some("") || space.starts_with("::") {
                break;
            }
            current = class.enclosing.as_deref().and_then(|name| self.decls.class(name));
        }
        scope
    }

    /// Qualified name of a static method or free function
    pub fn cpp_method_scope_name(&self, class: &ClassDecl, method: &MethodDecl, member: &str) -> String {
        let mut scope = self.cpp_scope_name(class);
        if method.is_virtual {
            scope = format!("NP_{}", mangle::mangle(&scope));
        }
        let space = method.namespace.as_deref().unwrap_or("");
        if method.namespace.as_deref() == Some("") || space.starts_with("::") {
            scope.clear();
        }
        if !scope.is_empty() && !scope.ends_with("::") {
            scope.push_str("::");
        }
        scope.push_str(space);
        if !space.is_empty() && !space.ends_with("::") {
            scope.push_str("::");
        }
        scope + member
    }

    /// `(T)` prefix when a cast or const annotation asks for one
    pub fn cast(&self, ty: &ManagedType, annotations: &Annotations) -> String {
        if !annotations.is_casted() {
            return String::new();
        }
        self.cpp_cast_type_name(ty, annotations)
            .map(|name| format!("({})", name))
            .unwrap_or_default()
    }
}
