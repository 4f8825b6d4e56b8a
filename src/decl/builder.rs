//! Builder methods for assembling declarations in code
//!
//! ```
//! use nativeport::decl::{ClassDecl, DeclarationSet, ManagedType, MethodDecl, Primitive};
//!
//! let int = ManagedType::Primitive(Primitive::Int);
//! let set = DeclarationSet::new("demo").with_class(
//!     ClassDecl::new("demo.Vector")
//!         .with_cpp_name("Vector")
//!         .with_method(MethodDecl::new("allocate"))
//!         .with_method(MethodDecl::new("size").returning(int)),
//! );
//! assert_eq!(set.classes().len(), 1);
//! ```

use super::model::*;

impl ParamDecl {
    pub fn new(ty: ManagedType) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    /// Parameter typed by a native spelling, resolved when the set is prepared
    pub fn native(spelling: impl Into<String>) -> Self {
        Self {
            native: Some(spelling.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn by(mut self, by: PassBy) -> Self {
        self.annotations.by.push(by);
        self
    }

    pub fn cast(mut self, cast: impl Into<String>) -> Self {
        self.annotations.cast = Some(cast.into());
        self
    }

    pub fn constant(mut self) -> Self {
        self.annotations.constant = true;
        self
    }

    pub fn adapter(mut self, adapter: AdapterDecl) -> Self {
        self.annotations.adapter = Some(adapter);
        self
    }

    pub fn raw(mut self) -> Self {
        self.annotations.raw = true;
        self
    }
}

impl From<ManagedType> for ParamDecl {
    fn from(ty: ManagedType) -> Self {
        Self::new(ty)
    }
}

impl MethodDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, param: impl Into<ParamDecl>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn returning(mut self, ty: ManagedType) -> Self {
        self.returns = ty;
        self
    }

    pub fn returning_native(mut self, spelling: impl Into<String>) -> Self {
        self.returns_native = Some(spelling.into());
        self
    }

    pub fn returned_by(mut self, by: PassBy) -> Self {
        self.annotations.by.push(by);
        self
    }

    pub fn with_return_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Declared for callbacks only; no entry point is generated
    pub fn managed(mut self) -> Self {
        self.native = false;
        self
    }

    pub fn virtual_method(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Native member name, prefix and suffix, in that order
    pub fn with_cpp_name<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cpp_name = parts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_index(mut self, dim: usize) -> Self {
        self.index = Some(dim);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn no_exception(mut self) -> Self {
        self.no_exception = true;
        self
    }

    pub fn no_offset(mut self) -> Self {
        self.no_offset = true;
        self
    }

    pub fn with_env(mut self) -> Self {
        self.with_env = true;
        self
    }

    pub fn throwing(mut self, error_class: impl Into<String>) -> Self {
        self.throws = Some(error_class.into());
        self
    }

    pub fn on_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_cpp_name(mut self, cpp_name: impl Into<String>) -> Self {
        self.cpp_name = Some(cpp_name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn enclosed_by(mut self, enclosing: impl Into<String>) -> Self {
        self.enclosing = Some(enclosing.into());
        self
    }

    pub fn with_kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn no_exception(mut self) -> Self {
        self.no_exception = true;
        self
    }

    pub fn no_offset(mut self) -> Self {
        self.no_offset = true;
        self
    }

    pub fn no_deallocator(mut self) -> Self {
        self.no_deallocator = true;
        self
    }

    pub fn with_convention(mut self, convention: impl Into<String>) -> Self {
        self.convention = Some(convention.into());
        self
    }

    pub fn on_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }
}

impl Platform {
    pub fn only<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            value: prefixes.into_iter().map(Into::into).collect(),
            not: Vec::new(),
        }
    }

    pub fn except<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            value: Vec::new(),
            not: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}
