//! Entry points for native methods
//!
//! Every entry follows the same skeleton: resolve the receiver, unpack the
//! arguments, declare the result, make the native call, wrap the result and
//! write back whatever the callee may have changed.

use super::ir::{Builder, Fragment};
use super::{mangle, zero_value, AdapterInformation, Emitter};
use crate::classify::{no_exception, MethodInformation};
use crate::decl::{Behavior, ClassDecl, ClassKind, ManagedType, PassBy, Primitive};
use crate::errors::{Diagnostic, DiagnosticKind, Location};
use crate::types::{value_type_name, CppName};
use smallvec::SmallVec;
use tracing::trace;

type RawFlags = SmallVec<[bool; 8]>;

fn return_statement(zero: &str) -> String {
    if zero.is_empty() {
        "return;".to_string()
    } else {
        format!("return {};", zero)
    }
}

fn null_value(abi: &str) -> &'static str {
    if abi == "np_array" {
        "np_array()"
    } else {
        "NULL"
    }
}

impl<'a, 'd> Emitter<'a, 'd> {
    /// Pointer spelling with `void*` made addressable unless the class is opaque
    fn addressable(&self, ty: &ManagedType, mut name: CppName) -> CppName {
        if name.prefix == "void*" && !self.ctx.is_opaque(ty) {
            name.prefix = "char*".to_string();
        }
        name
    }

    /// Handles of non-opaque, non-function classes carry a position
    pub(super) fn has_position(&self, ty: &ManagedType) -> bool {
        matches!(ty, ManagedType::Handle(_)) && !self.ctx.is_opaque(ty) && !self.ctx.is_function(ty)
    }

    /// Struct name of a function class, registering it for the prelude
    pub(super) fn function_struct(&mut self, class: &ClassDecl) -> String {
        self.tables.functions.index(class.name.clone());
        self.ctx.names.function_class_name(class)
    }

    /// Native type of `ty` with function classes replaced by their struct
    fn pointer_type_name(&mut self, ty: &ManagedType) -> Option<CppName> {
        if let Some(class) = self.ctx.class_of(ty).filter(|c| c.kind == ClassKind::Function) {
            return Some(CppName::new(format!("{}*", self.function_struct(class))));
        }
        self.ctx.names.cpp_type_name(ty)
    }

    pub(super) fn deallocator_name(&mut self, class_name: &str) -> String {
        self.tables.deallocators.index(class_name.to_string());
        format!("&{}_deallocate", mangle::class_symbol(class_name))
    }

    fn unsupported(&self, info: &MethodInformation<'d>) -> Option<Diagnostic> {
        let location = || Location::method(&info.class.name, info.name());
        let ret = info.returns();
        let annotations = &info.method.annotations;
        let unsupported_return = || {
            Some(Diagnostic::new(
                DiagnosticKind::UnsupportedReturn { ty: ret.to_string() },
                location(),
            ))
        };
        match ret {
            ManagedType::Class => return unsupported_return(),
            ManagedType::Array(_) | ManagedType::Buffer(_) if !info.return_raw => {
                if annotations.adapter.is_some() || annotations.by() == Some(PassBy::Val) {
                    return unsupported_return();
                }
            }
            ManagedType::Handle(name) if !info.return_raw && !info.is_setter() && !info.no_return_getter => {
                if self.ctx.names.cpp_type_name(ret).is_none() {
                    return unsupported_return();
                }
                let by_value_virtual = annotations.by() == Some(PassBy::Val)
                    && self.ctx.decls.class(name).map_or(false, |c| self.ctx.has_virtual(c));
                if by_value_virtual {
                    return unsupported_return();
                }
            }
            _ => {}
        }
        let needs_receiver = info.is_allocator() || (!info.is_static() && info.behavior != Behavior::Deallocator);
        if needs_receiver && self.ctx.names.cpp_type_name(&ManagedType::handle(info.class.name.clone())).is_none() {
            return Some(Diagnostic::new(
                DiagnosticKind::UnsupportedBehavior {
                    behavior: info.behavior.to_string(),
                },
                location(),
            ));
        }
        None
    }

    /// Exported prototype of the entry for `info`, without the export macro
    pub(super) fn prototype(&self, info: &MethodInformation<'d>) -> (String, String) {
        let class = info.class;
        let name = mangle::entry_name(class, info.method, info.overloaded);
        let mut params = vec![
            "np_env* env".to_string(),
            if info.is_static() { "np_class cls" } else { "np_handle* obj" }.to_string(),
        ];
        for (j, param) in info.params().iter().enumerate() {
            params.push(format!("{} arg{}", self.ctx.abi_param_type(&param.ty), j));
        }
        let keyed = info.behavior == Behavior::Callback || (info.is_allocator() && self.ctx.has_virtual(class));
        if keyed {
            params.push("void* key".to_string());
        }
        let prototype = format!(
            "{} {}({})",
            self.ctx.abi_return_type(info.returns()),
            name,
            params.join(", ")
        );
        (name, prototype)
    }

    /// Full entry point definition, or `None` when the method is skipped
    pub(crate) fn entry(&mut self, info: &MethodInformation<'d>) -> Option<Fragment> {
        if let Some(diagnostic) = self.unsupported(info) {
            self.diagnose(diagnostic);
            return None;
        }
        let (name, prototype) = self.prototype(info);
        trace!(target: "nativeport::generate", entry = %name, behavior = %info.behavior, "entry point");
        self.tables.exports.index(prototype.clone());
        self.tables.entry_points.index(name);

        let mut b = Builder::new();
        b.open(format!("NP_EXPORT {} {{", prototype));
        if info.behavior == Behavior::Callback {
            self.callback_allocator(&mut b, info);
            b.close("}");
            return Some(b.into_fragment());
        }

        let zero = zero_value(info.returns());
        if !info.is_static() && !info.is_allocator() && info.behavior != Behavior::Deallocator {
            self.this_pointer(&mut b, info, zero)?;
        }

        let mut raw: RawFlags = info.param_raw.clone();
        self.parameters_before(&mut b, info, &mut raw, zero);
        let return_prefix = self.return_before(&mut b, info);
        self.call(&mut b, info, &raw, &return_prefix, false);
        self.return_after(&mut b, info, &raw);
        self.parameters_after(&mut b, info, &raw);
        if !info.returns().is_void() {
            b.line("return rarg;");
        }
        b.close("}");
        Some(b.into_fragment())
    }

    fn this_pointer(&mut self, b: &mut Builder, info: &MethodInformation<'d>, zero: &str) -> Option<()> {
        let class = info.class;
        let this_type = ManagedType::handle(class.name.clone());
        let ty = match class.kind {
            ClassKind::Function => CppName::new(format!("{}*", self.function_struct(class))),
            _ => self.addressable(&this_type, self.ctx.names.cpp_type_name(&this_type)?),
        };
        b.line(format!("{} = ({})obj->address;", ty.declare("ptr"), ty));
        b.open("if (ptr == NULL) {")
            .line("env->throw_error(env, \"NullPointerException\", \"This pointer address is NULL.\");")
            .line(return_statement(zero))
            .close("}");
        match class.kind {
            ClassKind::Function => {
                b.open("if (ptr->ptr == NULL) {")
                    .line("env->throw_error(env, \"NullPointerException\", \"This function pointer address is NULL.\");")
                    .line(return_statement(zero))
                    .close("}");
            }
            ClassKind::Struct => {
                b.line("intptr_t position = (intptr_t)obj->position;");
                b.line("ptr += position;");
                if info.behavior == Behavior::BufferGetter {
                    b.line("intptr_t size = (intptr_t)obj->limit;");
                    b.line("size -= position;");
                }
            }
            ClassKind::Opaque | ClassKind::Namespace => {}
        }
        Some(())
    }

    fn parameters_before(&mut self, b: &mut Builder, info: &MethodInformation<'d>, raw: &mut RawFlags, zero: &str) {
        let mut adapter_line = String::new();
        let mut pending: Option<AdapterInformation> = None;
        let params = info.params();

        for j in info.skip_params()..params.len() {
            let ty = &params[j].ty;
            if matches!(ty, ManagedType::Primitive(_)) {
                continue;
            }
            let annotations = info.param_annotations(j);
            let by = annotations.by();
            let cast = self.ctx.names.cast(ty, annotations);
            let adapter = if raw[j] { None } else { self.ctx.param_adapter(false, info, j) };
            let type_name = if raw[j] || *ty == ManagedType::Class {
                None
            } else {
                self.pointer_type_name(ty)
            };

            let Some(type_name) = type_name else {
                raw[j] = true;
                b.line(format!("{} ptr{} = arg{};", self.ctx.abi_param_type(ty), j, j));
                continue;
            };
            let type_name = self.addressable(ty, type_name);
            let sized = adapter.is_some() || pending.is_some();

            match ty {
                ManagedType::Handle(_) => {
                    b.line(format!(
                        "{} = arg{j} == NULL ? NULL : ({})arg{j}->address;",
                        type_name.declare(&format!("ptr{}", j)),
                        type_name,
                        j = j
                    ));
                    if matches!(by, Some(PassBy::Val | PassBy::Ref)) {
                        b.open(format!("if (ptr{} == NULL) {{", j))
                            .line(format!(
                                "env->throw_error(env, \"NullPointerException\", \"Pointer address of argument {} is NULL.\");",
                                j
                            ))
                            .line(return_statement(zero))
                            .close("}");
                    }
                    if sized {
                        b.line(format!("intptr_t size{j} = arg{j} == NULL ? 0 : (intptr_t)arg{j}->limit;", j = j));
                    }
                    if self.has_position(ty) {
                        b.line(format!(
                            "intptr_t position{j} = arg{j} == NULL ? 0 : (intptr_t)arg{j}->position;",
                            j = j
                        ));
                        b.line(format!("ptr{j} += position{j};", j = j));
                        if sized {
                            b.line(format!("size{j} -= position{j};", j = j));
                        }
                    }
                }
                ManagedType::String => {
                    b.line(format!("const char* ptr{j} = arg{j};", j = j));
                    if sized {
                        b.line(format!("intptr_t size{} = 0;", j));
                    }
                }
                _ => {
                    b.line(format!(
                        "{} = ({})arg{}.data;",
                        type_name.declare(&format!("ptr{}", j)),
                        type_name,
                        j
                    ));
                    if sized {
                        b.line(format!("intptr_t size{j} = arg{j}.length;", j = j));
                    }
                }
            }

            if let Some(adapter) = adapter {
                self.tables.uses_adapters = true;
                adapter_line = format!("{} adapter{}(", adapter.name, j);
                pending = Some(adapter);
            }
            if let Some(current) = pending.as_mut() {
                if info.class.kind != ClassKind::Function {
                    adapter_line.push_str(&cast);
                }
                adapter_line.push_str(&format!("ptr{j}, size{j}", j = j));
                current.argc = current.argc.saturating_sub(1);
                if current.argc > 0 {
                    adapter_line.push_str(", ");
                } else {
                    b.line(format!("{});", adapter_line));
                    pending = None;
                }
            }
        }
    }

    fn return_before(&mut self, b: &mut Builder, info: &MethodInformation<'d>) -> String {
        let ret = info.returns();
        let annotations = &info.method.annotations;
        let mut prefix = String::new();

        if ret.is_void() {
            if info.is_allocator() {
                let this_type = ManagedType::handle(info.class.name.clone());
                if let Some(name) = self.pointer_type_name(&this_type) {
                    prefix = format!("{} = ", name.declare("rptr"));
                }
            }
        } else if info.is_setter() || info.no_return_getter {
            b.line("np_handle* rarg = obj;");
        } else if let ManagedType::Primitive(p) = ret {
            let cast = self.ctx.names.cast(ret, annotations);
            let name = if info.return_raw {
                CppName::new(p.abi_name())
            } else {
                self.ctx
                    .names
                    .cpp_cast_type_name(ret, annotations)
                    .unwrap_or_else(|| CppName::new(p.cpp_name()))
            };
            b.line(format!("{} rarg = 0;", p.abi_name()));
            prefix = format!("{} = {}", name.declare("rvalue"), cast);
        } else {
            let by = annotations.by();
            let abi = self.ctx.abi_return_type(ret);
            let cast = self.ctx.names.cast(ret, annotations);
            let type_name = if info.return_raw {
                None
            } else {
                self.ctx.names.cpp_cast_type_name(ret, annotations)
            };
            prefix = format!("rptr = {}", cast);

            match (type_name, ret) {
                (None, _) => {
                    b.line(format!("{} rarg = {};", abi, null_value(abi)));
                    b.line(format!("{} rptr;", abi));
                }
                (Some(mut type_name), ManagedType::Handle(_) | ManagedType::Array(_) | ManagedType::Buffer(_)) => {
                    let mut value = value_type_name(&type_name);
                    let function = self.ctx.class_of(ret).filter(|c| c.kind == ClassKind::Function);
                    if let Some(class) = function {
                        prefix = "if (rptr != NULL) rptr->ptr = ".to_string();
                        type_name = CppName::new(format!("{}*", self.function_struct(class)));
                        value = value_type_name(&type_name);
                    }
                    match by {
                        Some(PassBy::Val) => {
                            let nothrow = ret
                                .handle_name()
                                .map_or(true, |name| no_exception(self.ctx.decls, name, info.method));
                            prefix.push_str(if nothrow { "new (std::nothrow) " } else { "new " });
                            prefix.push_str(&value);
                            prefix.push_str(&type_name.suffix);
                            prefix.push('(');
                        }
                        Some(PassBy::Ref) => prefix.push('&'),
                        Some(PassBy::PtrPtr) => {
                            let mut pointer = type_name.prefix.clone();
                            if !cast.is_empty() {
                                pointer.pop();
                            }
                            prefix = format!("rptr = NULL; {}* rptrptr{} = {}", pointer, type_name.suffix, cast);
                        }
                        _ => {}
                    }
                    if info.behavior == Behavior::BufferGetter {
                        prefix = "rptr = (char*)".to_string();
                        b.line("np_array rarg = np_array();");
                        b.line("char* rptr;");
                    } else {
                        b.line(format!("{} rarg = {};", abi, null_value(abi)));
                        b.line(format!("{};", type_name.declare("rptr")));
                    }
                    if function.is_some() {
                        b.line(format!("rptr = new (std::nothrow) {};", value));
                    }
                    if let Some(adapter) = self.ctx.adapter_information(false, Some(&value), annotations) {
                        self.tables.uses_adapters = true;
                        prefix = format!("{} radapter(", adapter.name);
                    }
                }
                (Some(type_name), _) => {
                    b.line("char* rarg = NULL;");
                    b.line("const char* rptr;");
                    if by == Some(PassBy::Ref) {
                        prefix = "std::string rstr(".to_string();
                    } else {
                        prefix.push_str("(const char*)");
                    }
                    let value = value_type_name(&type_name);
                    if let Some(adapter) = self.ctx.adapter_information(false, Some(&value), annotations) {
                        self.tables.uses_adapters = true;
                        prefix = format!("{} radapter(", adapter.name);
                    }
                }
            }
        }
        if info.throws.is_some() {
            b.open("try {");
        }
        prefix
    }

    /// The native call itself, printed onto the current line
    pub(super) fn call(
        &mut self,
        b: &mut Builder,
        info: &MethodInformation<'d>,
        raw: &[bool],
        return_prefix: &str,
        second_call: bool,
    ) {
        let class = info.class;
        let params = info.params();
        let mut need_second_call = false;
        let mut prefix = "(".to_string();
        let mut suffix = ")".to_string();
        let mut skip = info.skip_params();
        let index = info.method.index.is_some() || info.paired_method.map_or(false, |p| p.index.is_some());
        let member = info.member_name.first().map(String::as_str).unwrap_or(info.name());

        if info.behavior == Behavior::Deallocator {
            b.line("void* allocatedAddress = (void*)(intptr_t)arg0;");
            b.line("void (*deallocatorAddress)(void*) = (void(*)(void*))(intptr_t)arg1;");
            b.open("if (deallocatorAddress != NULL && allocatedAddress != NULL) {")
                .line("(*deallocatorAddress)(allocatedAddress);")
                .close("}");
            return;
        } else if info.is_value_access() || info.is_member_access() {
            let mut wants_pointer = false;
            let k = params.len().saturating_sub(1);
            let first_is_array = params.first().map_or(false, |p| p.ty.is_primitive_array());
            let second_is_index = params.get(1).map_or(false, |p| p.ty.is_index());
            if info.is_setter()
                && info.by(k) != Some(PassBy::Ref)
                && self.ctx.param_adapter(false, info, k).is_none()
                && params.get(k).map_or(false, |p| p.ty == ManagedType::String)
            {
                b.print("strcpy((char*)");
                wants_pointer = true;
                prefix = ", ".to_string();
            } else if k >= 1 && first_is_array && second_is_index {
                b.print("memcpy(");
                wants_pointer = true;
                prefix = ", ".to_string();
                if info.is_getter() {
                    b.print("ptr0 + arg1, ");
                } else {
                    prefix.push_str("ptr0 + arg1, ");
                }
                skip = 2;
                suffix = format!(" * sizeof(*ptr0){}", suffix);
            } else {
                b.print(return_prefix);
                prefix = if info.is_getter() { "" } else { " = " }.to_string();
                suffix.clear();
            }
            if info.is_static() {
                b.print(&self.ctx.names.cpp_method_scope_name(class, info.method, member));
            } else if info.is_member_access() {
                if index {
                    b.print("(*ptr)");
                    prefix = format!(".{}{}", member, prefix);
                } else {
                    b.print(&format!("ptr->{}", member));
                }
            } else if index {
                b.print("(*ptr)");
            } else if info.dim > 0 || wants_pointer {
                b.print("ptr");
            } else {
                b.print("*ptr");
            }
        } else if info.behavior == Behavior::BufferGetter {
            b.print(return_prefix).print("ptr");
            prefix.clear();
            suffix.clear();
        } else {
            b.print(return_prefix);
            if class.kind == ClassKind::Function {
                b.print("(*ptr->ptr)");
            } else if info.is_allocator() {
                let this_type = ManagedType::handle(class.name.clone());
                let type_name = self.ctx.names.cpp_type_name(&this_type).unwrap_or_default();
                let value = match self.ctx.subclass_name(class).filter(|_| self.ctx.has_virtual(class)) {
                    Some(sub) => sub,
                    None => value_type_name(&type_name),
                };
                let nothrow = no_exception(self.ctx.decls, &class.name, info.method);
                b.print(if nothrow { "new (std::nothrow) " } else { "new " });
                b.print(&value).print(&type_name.suffix);
                if info.behavior == Behavior::ArrayAllocator {
                    prefix = "[".to_string();
                    suffix = "]".to_string();
                }
            } else if info.is_static() {
                b.print(&self.ctx.names.cpp_method_scope_name(class, info.method, member));
            } else {
                let mut name = member.to_string();
                if self.ctx.has_virtual(class) && !second_call {
                    if let (Some(sub), Some(type_name)) = (
                        self.ctx.subclass_name(class),
                        self.ctx.names.cpp_type_name(&ManagedType::handle(class.name.clone())),
                    ) {
                        b.print(&format!("dynamic_cast<{}*>(ptr) != NULL ? ", sub));
                        name = format!("{}::{}", value_type_name(&type_name), name);
                        need_second_call = true;
                    }
                }
                if index {
                    b.print("(*ptr)");
                    prefix = format!(".{}{}", name, prefix);
                } else {
                    b.print(&format!("ptr->{}", name));
                }
            }
        }

        let mut j = skip;
        while j <= params.len() {
            if j == skip + info.dim {
                if let Some(name_prefix) = info.member_name.get(1) {
                    b.print(name_prefix);
                }
                b.print(&prefix);
                if info.with_env {
                    b.print(if info.is_static() { "env, cls" } else { "env, obj" });
                    if params.len() > skip + info.dim {
                        b.print(", ");
                    }
                }
            }
            if j == params.len() {
                break;
            }
            if j < skip + info.dim {
                b.print("[");
            }
            let ty = &params[j].ty;
            let by = info.by(j);
            let cast = self.ctx.names.cast(ty, info.param_annotations(j));
            let adapter = if raw[j] { None } else { self.ctx.param_adapter(false, info, j) };

            if (cast == "(void*)" || cast == "(void *)") && *ty == ManagedType::Primitive(Primitive::Long) {
                b.print(&format!("(void*)(intptr_t)arg{}", j));
            } else if matches!(ty, ManagedType::Primitive(_)) {
                b.print(&format!("{}arg{}", cast, j));
            } else if let Some(adapter) = adapter {
                let mut cast = adapter.cast.trim().to_string();
                if !cast.is_empty() && !cast.starts_with('(') && !cast.ends_with(')') {
                    cast = format!("({})", cast);
                }
                b.print(&format!("{}adapter{}", cast, j));
                j += adapter.argc.max(1) - 1;
            } else if self.ctx.is_function(ty) && !raw[j] {
                let target = if by == Some(PassBy::PtrPtr) { "&ptr" } else { "ptr" };
                b.print(&format!("{}(ptr{j} == NULL ? NULL : {}{j}->ptr)", cast, target, j = j));
            } else if by == Some(PassBy::Val) || (by == Some(PassBy::Ref) && *ty != ManagedType::String) {
                b.print(&format!("*{}ptr{}", cast, j));
            } else if by == Some(PassBy::PtrPtr) {
                b.print(&format!("{}(arg{j} == NULL ? NULL : &ptr{j})", cast, j = j));
            } else {
                b.print(&format!("{}ptr{}", cast, j));
            }

            if j < skip + info.dim {
                b.print("]");
            } else if j + 1 < params.len() {
                b.print(", ");
            }
            j += 1;
        }
        b.print(&suffix);
        if let Some(name_suffix) = info.member_name.get(2) {
            b.print(name_suffix);
        }
        if info.method.annotations.by() == Some(PassBy::Ref) && *info.returns() == ManagedType::String {
            b.line(");");
            b.print("rptr = rstr.c_str()");
        }
        if need_second_call {
            self.call(b, info, raw, " : ", true);
        }
    }

    fn return_after(&mut self, b: &mut Builder, info: &MethodInformation<'d>, raw: &[bool]) {
        let class = info.class;
        let ret = info.returns();
        let annotations = &info.method.annotations;
        let by = annotations.by();
        let type_name = if info.return_raw {
            None
        } else {
            self.ctx.names.cpp_cast_type_name(ret, annotations)
        };
        let value = type_name.as_ref().map(value_type_name);
        let adapter = match ret {
            ManagedType::Void | ManagedType::Primitive(_) => None,
            _ if info.return_raw || info.is_setter() || info.no_return_getter => None,
            _ => self.ctx.adapter_information(false, value.as_deref(), annotations),
        };

        let mut suffix = if info.behavior == Behavior::Deallocator { "" } else { ";" }.to_string();
        if adapter.is_some() {
            suffix = format!("){}", suffix);
        }
        if matches!(ret, ManagedType::Handle(_)) && !info.is_setter() && !info.no_return_getter {
            match by {
                Some(PassBy::Val) => suffix = format!("){}", suffix),
                Some(PassBy::PtrPtr) => {
                    b.line(&suffix);
                    suffix.clear();
                    b.open("if (rptrptr == NULL) {")
                        .line("env->throw_error(env, \"NullPointerException\", \"Return pointer address is NULL.\");")
                        .reopen("} else {")
                        .line("rptr = *rptrptr;")
                        .close("}");
                }
                _ => {}
            }
        }
        if !suffix.is_empty() || b.has_partial() {
            b.line(&suffix);
        }

        if ret.is_void() {
            if info.is_allocator() {
                let array = info.behavior == Behavior::ArrayAllocator;
                // A refused admission deletes rptr inside init_handle
                if self.ctx.has_virtual(class) {
                    if let Some(sub) = self.ctx.subclass_name(class) {
                        b.line(format!("(({}*)rptr)->obj = key;", sub));
                    }
                }
                b.line(format!("intptr_t rcapacity = {};", if array { "arg0" } else { "1" }));
                if class.no_deallocator {
                    b.line("env->init_handle(env, obj, rptr, rcapacity, NULL, NULL);");
                } else {
                    let deallocator = if array {
                        self.tables.array_deallocators.index(class.name.clone());
                        format!("&{}_deallocateArray", mangle::class_symbol(&class.name))
                    } else {
                        self.deallocator_name(&class.name)
                    };
                    b.line(format!("env->init_handle(env, obj, rptr, rcapacity, rptr, {});", deallocator));
                }
            }
            return;
        }
        if info.is_setter() || info.no_return_getter {
            return;
        }
        if let ManagedType::Primitive(p) = ret {
            b.line(format!("rarg = ({})rvalue;", p.abi_name()));
            return;
        }
        if info.return_raw || type_name.is_none() {
            b.line("rarg = rptr;");
            return;
        }

        let mut need_init = false;
        if let Some(adapter) = &adapter {
            b.line("rptr = radapter;");
            if *ret != ManagedType::String {
                b.line("intptr_t rcapacity = (intptr_t)radapter.size;");
                if adapter.constant {
                    b.line("void (*deallocator)(void*) = NULL;");
                } else {
                    b.line(format!("void (*deallocator)(void*) = &{}::deallocate;", adapter.name));
                }
            }
            need_init = true;
        } else if let ManagedType::Handle(name) = ret {
            if by == Some(PassBy::Val) || self.ctx.is_function(ret) {
                b.line("intptr_t rcapacity = 1;");
                let deallocator = self.deallocator_name(name);
                b.line(format!("void (*deallocator)(void*) = {};", deallocator));
                need_init = true;
            }
        }

        match ret {
            ManagedType::Handle(name) => {
                let mut conditions: Vec<(String, String)> = Vec::new();
                if by != Some(PassBy::Val) {
                    if info.is_static() {
                        for (i, param) in info.params().iter().enumerate() {
                            if raw[i] || param.ty != *ret || *info.param_annotations(i) != *annotations {
                                continue;
                            }
                            let cast = self.ctx.names.cast(&param.ty, info.param_annotations(i));
                            conditions.push((format!("rptr == {}ptr{}", cast, i), format!("rarg = arg{};", i)));
                        }
                    } else if *ret == ManagedType::handle(class.name.clone()) {
                        conditions.push(("rptr == ptr".to_string(), "rarg = obj;".to_string()));
                    }
                }
                for (i, (condition, assign)) in conditions.iter().enumerate() {
                    if i == 0 {
                        b.open(format!("if ({}) {{", condition));
                    } else {
                        b.reopen(format!("}} else if ({}) {{", condition));
                    }
                    b.line(assign);
                }
                if conditions.is_empty() {
                    b.open("if (rptr != NULL) {");
                } else {
                    b.reopen("} else if (rptr != NULL) {");
                }
                let class_name = if info.skip_params() > 0 {
                    "arg0".to_string()
                } else {
                    format!("\"{}\"", name)
                };
                b.line(format!("rarg = (np_handle*)env->new_handle(env, {});", class_name));
                if need_init {
                    b.line("env->init_handle(env, rarg, rptr, rcapacity, rptr, deallocator);");
                } else {
                    b.line("rarg->address = (uintptr_t)rptr;");
                }
                b.close("}");
            }
            ManagedType::String => {
                b.open("if (rptr != NULL) {")
                    .line("rarg = env->new_string(env, rptr);")
                    .close("}");
            }
            ManagedType::Array(_) | ManagedType::Buffer(_) => {
                if info.behavior == Behavior::BufferGetter {
                    b.line("intptr_t rcapacity = size;");
                } else {
                    b.line("intptr_t rcapacity = rptr != NULL ? 1 : 0;");
                }
                b.line("rarg.data = (void*)rptr;");
                b.line("rarg.length = rcapacity;");
            }
            ManagedType::Void | ManagedType::Primitive(_) | ManagedType::Class => {}
        }
    }

    fn parameters_after(&mut self, b: &mut Builder, info: &MethodInformation<'d>, raw: &[bool]) {
        if let Some(throws) = &info.throws {
            self.tables.may_throw = true;
            b.reopen("} catch (...) {");
            b.line(format!("NP_handleException(env, \"{}\");", throws));
            b.close("}");
        }
        let params = info.params();
        for j in info.skip_params()..params.len() {
            if raw[j] {
                continue;
            }
            let ty = &params[j].ty;
            if !matches!(ty, ManagedType::Handle(_)) {
                continue;
            }
            let annotations = info.param_annotations(j);
            let cast = self.ctx.names.cast(ty, annotations);
            let Some(type_name) = self.ctx.names.cpp_cast_type_name(ty, annotations) else {
                continue;
            };
            let type_name = self.addressable(ty, type_name);
            let position = self.has_position(ty);

            if let Some(adapter) = self.ctx.param_adapter(true, info, j) {
                b.line(format!("{} = {}adapter{};", type_name.declare(&format!("rptr{}", j)), cast, j));
                b.line(format!("intptr_t rsize{j} = (intptr_t)adapter{j}.size;", j = j));
                b.open(format!("if (arg{} != NULL) {{", j));
                b.open(format!("if (rptr{j} != {}ptr{j}) {{", cast, j = j))
                    .line(format!(
                        "env->init_handle(env, arg{j}, rptr{j}, rsize{j}, rptr{j}, &{}::deallocate);",
                        adapter.name,
                        j = j
                    ))
                    .reopen("} else {");
                if position {
                    b.line(format!("arg{j}->limit = (size_t)(rsize{j} + position{j});", j = j));
                } else {
                    b.line(format!("arg{j}->limit = (size_t)rsize{j};", j = j));
                }
                b.close("}");
                b.close("}");
            } else if matches!(info.by(j), Some(PassBy::PtrPtr | PassBy::PtrRef)) && !info.is_setter() {
                if position {
                    b.line(format!("ptr{j} -= position{j};", j = j));
                }
                b.line(format!("if (arg{j} != NULL) arg{j}->address = (uintptr_t)ptr{j};", j = j));
            }
        }
    }
}
