//! Method classification: decide which code shape each native method gets
//!
//! A method's shape follows from its signature and its siblings. `get`/`put`
//! pairs and same-named overloads with index parameters become element or
//! member accessors, `allocate`/`allocateArray`/`deallocate`/`asDirectBuffer`
//! are recognized by name, and everything else is a plain call. An explicit
//! behavior on the declaration wins when the signature allows it.

use crate::decl::{Annotations, Behavior, ClassDecl, ClassKind, DeclarationSet, ManagedType, MethodDecl, PassBy, Primitive};
use crate::errors::{Diagnostic, DiagnosticKind, Location};
use nativeport_runtime::HandleKind;
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, trace};


pub const DEFAULT_ERROR_CLASS: &str = "RuntimeException";

/// Everything the emitter needs to know about one native method
#[derive(Debug, Clone)]
pub struct MethodInformation<'d> {
    pub class: &'d ClassDecl,
    pub method: &'d MethodDecl,
    pub behavior: Behavior,
    /// Native member name, then optional prefix and suffix spellings
    pub member_name: SmallVec<[String; 3]>,
    /// Number of index parameters for element and member access
    pub dim: usize,
    pub overloaded: bool,
    pub no_offset: bool,
    /// Getter that writes into its first (array) parameter
    pub no_return_getter: bool,
    pub paired_method: Option<&'d MethodDecl>,
    /// Error class raised when the native call throws
    pub throws: Option<String>,
    pub return_raw: bool,
    pub param_raw: SmallVec<[bool; 8]>,
    pub with_env: bool,
}

impl<'d> MethodInformation<'d> {
    pub fn name(&self) -> &'d str {
        &self.method.name
    }

    pub fn params(&self) -> &'d [crate::decl::ParamDecl] {
        &self.method.params
    }

    pub fn returns(&self) -> &'d ManagedType {
        &self.method.returns
    }

    pub fn is_static(&self) -> bool {
        self.method.is_static
    }

    pub fn is_getter(&self) -> bool {
        matches!(self.behavior, Behavior::ValueGetter | Behavior::MemberGetter)
    }

    pub fn is_setter(&self) -> bool {
        matches!(self.behavior, Behavior::ValueSetter | Behavior::MemberSetter)
    }

    pub fn is_member_access(&self) -> bool {
        matches!(self.behavior, Behavior::MemberGetter | Behavior::MemberSetter)
    }

    pub fn is_value_access(&self) -> bool {
        matches!(self.behavior, Behavior::ValueGetter | Behavior::ValueSetter)
    }

    pub fn is_allocator(&self) -> bool {
        matches!(self.behavior, Behavior::Allocator | Behavior::ArrayAllocator)
    }

    /// Leading `Class` parameters carry no native value
    pub fn skip_params(&self) -> usize {
        usize::from(self.method.params.first().map(|p| &p.ty) == Some(&ManagedType::Class))
    }

    /// Annotations of parameter `j`; the last parameter of a setter
    /// inherits the paired getter's return annotations when it has none
    pub fn param_annotations(&self, j: usize) -> &'d Annotations {
        let own = &self.method.params[j].annotations;
        match self.paired_method {
            Some(pair) if self.is_setter() && j + 1 == self.method.params.len() && own.is_empty() => {
                &pair.annotations
            }
            _ => own,
        }
    }

    pub fn by(&self, j: usize) -> Option<PassBy> {
        self.param_annotations(j).by()
    }
}

/// Classification result for one class
#[derive(Debug)]
pub struct ClassPlan<'d> {
    pub class: &'d ClassDecl,
    pub methods: Vec<MethodInformation<'d>>,
    /// `call`/`apply` method of a function class
    pub function_method: Option<&'d MethodDecl>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'d> ClassPlan<'d> {
    pub fn callback_allocators(&self) -> impl Iterator<Item = &MethodInformation<'d>> {
        self.methods.iter().filter(|m| m.behavior == Behavior::Callback)
    }

    pub fn virtual_methods(&self) -> impl Iterator<Item = &MethodInformation<'d>> {
        self.methods.iter().filter(|m| m.method.is_virtual)
    }
}

/// The `call*`/`apply*` method a function class forwards to; the last one
/// declared wins
pub fn function_method(class: &ClassDecl) -> Option<&MethodDecl> {
    if class.kind != ClassKind::Function {
        return None;
    }
    class
        .methods
        .iter()
        .filter(|m| !m.is_static && !is_callback_allocator(class, m))
        .filter(|m| m.name.starts_with("call") || m.name.starts_with("apply"))
        .last()
}

fn is_callback_allocator(class: &ClassDecl, method: &MethodDecl) -> bool {
    class.kind == ClassKind::Function
        && method.native
        && !method.is_static
        && method.name.starts_with("allocate")
        && method.returns.is_void()
        && method.params.is_empty()
}

/// True when the nearest platform filter on the class or its enclosing
/// classes accepts `platform`
pub fn class_matches_platform(decls: &DeclarationSet, class: &ClassDecl, platform: &str) -> bool {
    let mut current = Some(class);
    while let Some(class) = current {
        if let Some(filter) = &class.platform {
            return filter.matches(platform);
        }
        current = class.enclosing.as_deref().and_then(|name| decls.class(name));
    }
    true
}

pub(crate) fn no_exception(decls: &DeclarationSet, class_name: &str, method: &MethodDecl) -> bool {
    if HandleKind::builtin(class_name).is_some() || method.no_exception {
        return true;
    }
    let mut current = decls.class(class_name);
    while let Some(class) = current {
        if class.no_exception {
            return true;
        }
        current = class.enclosing.as_deref().and_then(|name| decls.class(name));
    }
    false
}

/// Classify every class visible on `platform`, in declaration order
pub fn classify_all<'d>(decls: &'d DeclarationSet, platform: &str) -> Vec<ClassPlan<'d>> {
    decls
        .classes()
        .par_iter()
        .filter(|class| class_matches_platform(decls, class, platform))
        .map(|class| classify_class(decls, class, platform))
        .collect()
}

pub fn classify_class<'d>(decls: &'d DeclarationSet, class: &'d ClassDecl, platform: &str) -> ClassPlan<'d> {
    let mut plan = ClassPlan {
        class,
        methods: Vec::new(),
        function_method: function_method(class),
        diagnostics: Vec::new(),
    };

    for (index, method) in class.methods.iter().enumerate() {
        if !method.native && !method.is_virtual {
            continue;
        }
        if let Some(filter) = &method.platform {
            if !filter.matches(platform) {
                trace!(target: "nativeport::generate", class = %class.name, method = %method.name, "skipped on this platform");
                continue;
            }
        }
        if is_callback_allocator(class, method) {
            if plan.function_method.is_none() {
                plan.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::MissingFunctionMethod,
                    Location::method(&class.name, &method.name),
                ));
                continue;
            }
            let mut info = base_information(class, method);
            info.behavior = Behavior::Callback;
            plan.methods.push(info);
            continue;
        }
        match classify_method(decls, class, index) {
            Ok(info) => plan.methods.push(info),
            Err(diagnostic) => plan.diagnostics.push(diagnostic),
        }
    }

    debug!(
        target: "nativeport::generate",
        class = %class.name,
        methods = plan.methods.len(),
        skipped = plan.diagnostics.len(),
        "class classified"
    );
    plan
}

fn base_information<'d>(class: &'d ClassDecl, method: &'d MethodDecl) -> MethodInformation<'d> {
    MethodInformation {
        class,
        method,
        behavior: Behavior::Function,
        member_name: if method.cpp_name.is_empty() {
            SmallVec::from_iter([method.name.clone()])
        } else {
            method.cpp_name.iter().cloned().collect()
        },
        dim: method.index.unwrap_or(0),
        overloaded: false,
        no_offset: false,
        no_return_getter: false,
        paired_method: None,
        throws: None,
        return_raw: method.annotations.raw,
        param_raw: method.params.iter().map(|p| p.annotations.raw).collect(),
        with_env: method.with_env,
    }
}

/// Pairing candidates found among a method's siblings
#[derive(Default)]
struct Pairing<'d> {
    value_getter: bool,
    value_setter: bool,
    member_getter: bool,
    member_setter: bool,
    no_return_getter: bool,
    overloaded: bool,
    paired: Option<&'d MethodDecl>,
}

pub fn classify_method<'d>(
    decls: &'d DeclarationSet,
    class: &'d ClassDecl,
    index: usize,
) -> Result<MethodInformation<'d>, Diagnostic> {
    let method = &class.methods[index];
    let mut info = base_information(class, method);

    let params: Vec<&ManagedType> = method.param_types().collect();
    let ret = &method.returns;
    let this_type = ManagedType::handle(class.name.clone());
    let first_is_array = params.first().map_or(false, |p| p.is_primitive_array());

    let can_be_getter = !ret.is_void() || first_is_array;
    let can_be_setter = (ret.is_void() || *ret == this_type) && !params.is_empty();
    let can_be_allocator = !method.is_static && ret.is_void();
    let can_be_array_allocator = can_be_allocator && params.len() == 1 && params[0].is_index();

    let pairing = find_pair(class, index, &params, can_be_getter, can_be_setter, &this_type);
    info.overloaded = pairing.overloaded;

    let is_deallocator = ret.is_void()
        && method.name == "deallocate"
        && !method.is_static
        && params.len() == 2
        && params.iter().all(|p| **p == ManagedType::Primitive(Primitive::Long));
    let is_buffer_getter =
        matches!(ret, ManagedType::Buffer(_)) && method.name == "asDirectBuffer" && !method.is_static && params.is_empty();

    info.behavior = match method.behavior {
        Some(Behavior::ValueGetter) if can_be_getter => {
            info.no_return_getter = pairing.no_return_getter;
            Behavior::ValueGetter
        }
        Some(Behavior::ValueSetter) if can_be_setter => Behavior::ValueSetter,
        Some(Behavior::MemberGetter) if can_be_getter => {
            info.no_return_getter = pairing.no_return_getter;
            Behavior::MemberGetter
        }
        Some(Behavior::MemberSetter) if can_be_setter => Behavior::MemberSetter,
        Some(Behavior::Allocator) if can_be_allocator => Behavior::Allocator,
        Some(Behavior::ArrayAllocator) if can_be_array_allocator => Behavior::ArrayAllocator,
        Some(Behavior::Deallocator) if is_deallocator => Behavior::Deallocator,
        Some(Behavior::BufferGetter) if is_buffer_getter => Behavior::BufferGetter,
        Some(Behavior::Function) => Behavior::Function,
        Some(behavior) => {
            return Err(Diagnostic::new(
                DiagnosticKind::UnsupportedBehavior {
                    behavior: behavior.to_string(),
                },
                Location::method(&class.name, &method.name),
            ));
        }
        None => {
            let guessed = if is_deallocator {
                Behavior::Deallocator
            } else if can_be_allocator && method.name == "allocate" {
                Behavior::Allocator
            } else if can_be_array_allocator && method.name == "allocateArray" {
                Behavior::ArrayAllocator
            } else if is_buffer_getter {
                Behavior::BufferGetter
            } else if pairing.value_getter {
                Behavior::ValueGetter
            } else if pairing.value_setter {
                Behavior::ValueSetter
            } else if pairing.member_getter {
                Behavior::MemberGetter
            } else if pairing.member_setter {
                Behavior::MemberSetter
            } else {
                Behavior::Function
            };
            if matches!(
                guessed,
                Behavior::ValueGetter | Behavior::ValueSetter | Behavior::MemberGetter | Behavior::MemberSetter
            ) {
                info.paired_method = pairing.paired;
                if matches!(guessed, Behavior::ValueGetter | Behavior::MemberGetter) {
                    info.no_return_getter = pairing.no_return_getter;
                }
            }
            guessed
        }
    };

    if method.cpp_name.is_empty() {
        if let Some(pair) = info.paired_method.filter(|p| !p.cpp_name.is_empty()) {
            info.member_name = pair.cpp_name.iter().cloned().collect();
        }
    }

    info.no_offset = class.no_offset
        || method.no_offset
        || method.index.is_some()
        || info.paired_method.map_or(false, |p| p.no_offset || p.index.is_some());

    if !first_is_array {
        if info.is_getter() {
            info.dim = params.len();
        } else if info.is_setter() {
            info.dim = params.len() - 1;
        }
    }

    if !no_exception(decls, &class.name, method) {
        let by_value_may_throw = method.annotations.by() == Some(PassBy::Val)
            && !ret.handle_name().map_or(method.no_exception, |name| no_exception(decls, name, method));
        let accessor = matches!(
            info.behavior,
            Behavior::Deallocator
                | Behavior::ValueGetter
                | Behavior::ValueSetter
                | Behavior::MemberGetter
                | Behavior::MemberSetter
                | Behavior::BufferGetter
        );
        if by_value_may_throw || !accessor {
            info.throws = Some(method.throws.clone().unwrap_or_else(|| DEFAULT_ERROR_CLASS.to_string()));
        }
    }

    Ok(info)
}

fn find_pair<'d>(
    class: &'d ClassDecl,
    index: usize,
    params: &[&ManagedType],
    can_be_getter: bool,
    can_be_setter: bool,
    this_type: &ManagedType,
) -> Pairing<'d> {
    let method = &class.methods[index];
    let ret = &method.returns;
    let skip = usize::from(params.first() == Some(&&ManagedType::Class));
    let mut pairing = Pairing::default();

    for (j, other) in class.methods.iter().enumerate() {
        if j == index || !other.native {
            continue;
        }
        let params2: Vec<&ManagedType> = other.param_types().collect();
        let skip2 = usize::from(params2.first() == Some(&&ManagedType::Class));

        let mut can_value_getter = false;
        let mut can_value_setter = false;
        let mut can_member_getter = false;
        let mut can_member_setter = false;
        if can_be_getter && method.name == "get" && other.name == "put" {
            can_value_getter = true;
        } else if can_be_setter && method.name == "put" && other.name == "get" {
            can_value_setter = true;
        } else if other.name == method.name {
            pairing.overloaded = true;
            can_member_getter = can_be_getter;
            can_member_setter = can_be_setter;
            for k in skip..params.len() {
                if !params[k].is_index() {
                    can_member_getter = false;
                    if k + 1 < params.len() {
                        can_member_setter = false;
                    }
                }
            }
        } else {
            continue;
        }

        let same_index = params[skip..].iter().zip(&params2[skip2..]).all(|(a, b)| a == b);
        if !same_index {
            continue;
        }

        let as_return = can_value_getter && params.first().map_or(false, |p| p.is_primitive_array());
        let as_return2 = can_value_setter && params2.first().map_or(false, |p| p.is_primitive_array());

        let getter_value = if as_return { params.last().copied() } else { Some(ret) };
        let getter_match = can_be_getter
            && params2.len().checked_sub(usize::from(!as_return)) == Some(params.len() - skip)
            && params2.last().copied() == getter_value
            && (other.returns.is_void() || other.returns == *this_type)
            && other
                .params
                .last()
                .map_or(false, |p| p.annotations.is_empty() || p.annotations == method.annotations);

        let setter_value = if as_return2 { params2.last().copied() } else { Some(&other.returns) };
        let setter_match = can_be_setter
            && params.len().checked_sub(usize::from(!as_return2)) == Some(params2.len() - skip2)
            && setter_value == params.last().copied()
            && (ret.is_void() || *ret == *this_type)
            && method
                .params
                .last()
                .map_or(false, |p| p.annotations.is_empty() || p.annotations == other.annotations);

        if getter_match {
            pairing.paired = Some(other);
            pairing.value_getter = can_value_getter;
            pairing.member_getter = can_member_getter;
            pairing.no_return_getter = as_return;
        } else if setter_match {
            pairing.paired = Some(other);
            pairing.value_setter = can_value_setter;
            pairing.member_setter = can_member_setter;
        }
    }
    pairing
}
