//! Native-to-managed calls: function pointer trampolines and virtual
//! method overrides
//!
//! Both forward to `env->invoke` with the key of the managed target. The
//! calling thread is attached for the duration of the call and detached on
//! every path out, failures included.

use super::ir::Builder;
use super::{mangle, Emitter};
use crate::classify::{no_exception, MethodInformation};
use crate::decl::{Annotations, ClassDecl, ClassKind, ManagedType, MethodDecl, PassBy};
use crate::errors::{Diagnostic, DiagnosticKind, Location};
use crate::types::{value_type_name, CppName};
use tracing::debug;

/// `ret conv ` and `(T0 arg0, ...)` of a native signature
pub(super) struct Signature {
    pub(super) return_convention: String,
    pub(super) parameters: String,
}

impl Signature {
    pub(super) fn from_name(name: &CppName) -> Self {
        let (ret, convention) = name.prefix.split_once('(').unwrap_or((name.prefix.as_str(), "*"));
        let mut convention = convention.to_string();
        convention.pop();
        Self {
            return_convention: format!("{}{}", ret, convention),
            parameters: name.suffix.get(1..).unwrap_or("()").to_string(),
        }
    }
}

/// Managed method a trampoline forwards to, and where it lives
struct Target<'m> {
    class: &'m ClassDecl,
    method: &'m MethodDecl,
    /// Method name passed to `env->invoke`
    invoke: &'m str,
}

impl<'a, 'd> Emitter<'a, 'd> {
    /// Name of the exported trampoline of a callback allocator
    pub(super) fn callback_name(&self, info: &MethodInformation<'d>) -> String {
        match info.method.cpp_name.first().filter(|name| !name.is_empty()) {
            Some(name) => name.clone(),
            None => format!(
                "NP_{}_{}_callback",
                mangle::mangle(&info.class.name),
                mangle::mangle(info.name())
            ),
        }
    }

    fn unsupported_callback(&self, class: &ClassDecl, method: &MethodDecl) -> Option<Diagnostic> {
        let location = Location::method(&class.name, &method.name);
        let ret = &method.returns;
        let unsupported_return = matches!(
            ret,
            ManagedType::String | ManagedType::Array(_) | ManagedType::Buffer(_) | ManagedType::Class
        ) || (matches!(ret, ManagedType::Handle(_)) && method.annotations.by() == Some(PassBy::PtrPtr));
        if unsupported_return {
            return Some(Diagnostic::new(
                DiagnosticKind::UnsupportedReturn { ty: ret.to_string() },
                location,
            ));
        }
        for (j, param) in method.params.iter().enumerate() {
            let by_value_virtual = param.annotations.by() == Some(PassBy::Val)
                && self.ctx.class_of(&param.ty).map_or(false, |c| self.ctx.has_virtual(c));
            if param.ty == ManagedType::Class || by_value_virtual {
                return Some(Diagnostic::new(
                    DiagnosticKind::UnsupportedParameter {
                        ty: param.ty.to_string(),
                    },
                    location.with_parameter(j),
                ));
            }
        }
        None
    }

    fn signature(&self, class: &ClassDecl, method: &MethodDecl) -> Result<Signature, Diagnostic> {
        self.ctx
            .names
            .cpp_signature_type_name(class, method)
            .map(|name| Signature::from_name(&name))
            .ok_or_else(|| {
                Diagnostic::new(
                    DiagnosticKind::InvalidDeclaration {
                        reason: "callback signature has no native spelling".to_string(),
                    },
                    Location::method(&class.name, &method.name),
                )
            })
    }

    /// Trampoline and static instance for a callback allocator; the shared
    /// `operator()` is defined when `define` is set. Returns false when the
    /// function method cannot be called back.
    pub(crate) fn callback(
        &mut self,
        b: &mut Builder,
        info: &MethodInformation<'d>,
        function_method: &'d MethodDecl,
        define: bool,
    ) -> bool {
        let class = info.class;
        if let Some(diagnostic) = self.unsupported_callback(class, function_method) {
            self.diagnose(diagnostic);
            return false;
        }
        let signature = match self.signature(class, function_method) {
            Ok(signature) => signature,
            Err(diagnostic) => {
                self.diagnose(diagnostic);
                return false;
            }
        };
        let instance_type = self.function_struct(class);
        let name = self.callback_name(info);
        self.tables
            .callbacks
            .index(format!("static {} {}_instance;", instance_type, name));

        let prototype = format!("{}{}{}", signature.return_convention, name, signature.parameters);
        self.tables.exports.index(prototype.clone());
        debug!(target: "nativeport::generate", class = %class.name, callback = %name, "callback trampoline");

        let args: Vec<String> = (0..function_method.params.len()).map(|j| format!("arg{}", j)).collect();
        b.open(format!("NP_EXPORT {} {{", prototype));
        b.line(format!(
            "{}{}_instance({});",
            if function_method.returns.is_void() { "" } else { "return " },
            name,
            args.join(", ")
        ));
        b.close("}");
        b.blank();

        if define {
            b.open(format!(
                "{}{}::operator(){} {{",
                signature.return_convention, instance_type, signature.parameters
            ));
            let target = Target {
                class,
                method: function_method,
                invoke: &function_method.name,
            };
            self.callback_body(b, &target);
            b.close("}");
            b.blank();
        }
        true
    }

    /// Body of a callback allocator entry: bind the managed key to a fresh
    /// function struct and make it the trampoline's target
    pub(super) fn callback_allocator(&mut self, b: &mut Builder, info: &MethodInformation<'d>) {
        let class = info.class;
        let instance_type = self.function_struct(class);
        let name = self.callback_name(info);
        b.open("if (key == NULL) {")
            .line(format!(
                "NP_log(NP_LOG_ERROR, \"Callback key is NULL for {}.\");",
                class.name
            ))
            .line("return;")
            .close("}");
        b.line(format!("{0}* rptr = new (std::nothrow) {0};", instance_type));
        let deallocator = self.deallocator_name(&class.name);
        b.open("if (rptr != NULL) {")
            .line(format!("rptr->ptr = &{};", name))
            .line("rptr->obj = key;")
            .line(format!("{}_instance = *rptr;", name))
            .line(format!("env->init_handle(env, obj, rptr, 1, rptr, {});", deallocator))
            .close("}");
    }

    /// Subclass member for a virtual method or an allocator of a class with
    /// virtual methods; virtual methods also get their override body
    pub(crate) fn virtual_member(&mut self, b: &mut Builder, info: &MethodInformation<'d>) {
        let class = info.class;
        if let Some(diagnostic) = self.unsupported_callback(class, info.method) {
            self.diagnose(diagnostic);
            return;
        }
        let Some(sub) = self.ctx.subclass_name(class) else {
            return;
        };
        let signature = match self.signature(class, info.method) {
            Ok(signature) => signature,
            Err(diagnostic) => {
                self.diagnose(diagnostic);
                return;
            }
        };
        let member = info.member_name.first().map(String::as_str).unwrap_or(info.name());

        if info.is_allocator() {
            let base = self
                .ctx
                .names
                .cpp_type_name(&ManagedType::handle(class.name.clone()))
                .map(|name| value_type_name(&name))
                .unwrap_or_default();
            let args: Vec<String> = (0..info.params().len()).map(|j| format!("arg{}", j)).collect();
            self.tables.virtual_members.entry(class.name.clone()).or_default().index(format!(
                "{}{} : {}({}), obj(NULL) {{ }}",
                sub,
                signature.parameters,
                base,
                args.join(", ")
            ));
            return;
        }

        self.tables
            .virtual_functions
            .entry(class.name.clone())
            .or_default()
            .index(member.to_string());
        self.tables.virtual_members.entry(class.name.clone()).or_default().index(format!(
            "virtual {}{}{};",
            signature.return_convention, member, signature.parameters
        ));

        b.open(format!(
            "{}{}::{}{} {{",
            signature.return_convention, sub, member, signature.parameters
        ));
        let target = Target {
            class,
            method: info.method,
            invoke: info.name(),
        };
        self.callback_body(b, &target);
        b.close("}");
        b.blank();
    }

    /// Native type of a callback value, function classes as their struct
    fn callback_type_name(&mut self, ty: &ManagedType) -> Option<CppName> {
        let name = match self.ctx.class_of(ty).filter(|c| c.kind == ClassKind::Function) {
            Some(class) => CppName::new(format!("{}*", self.function_struct(class))),
            None => self.ctx.names.cpp_type_name(ty)?,
        };
        Some(if name.prefix == "void*" && !self.ctx.is_opaque(ty) {
            CppName::new("char*")
        } else {
            name
        })
    }

    fn callback_body(&mut self, b: &mut Builder, target: &Target<'_>) {
        let class = target.class;
        let method = target.method;
        let params = &method.params;
        let ret = &method.returns;

        match ret {
            ManagedType::Void => {}
            ManagedType::Primitive(p) => {
                b.line(format!("{} rarg = 0;", p.abi_name()));
            }
            _ => {
                b.line("np_handle* rarg = NULL;");
            }
        }
        b.line("np_env* env = NP_env;");
        b.line("int attached = 0;");
        b.open("if (env == NULL) {").line("goto end;").close("}");
        b.line("attached = env->attach_thread(env);");

        b.open("{");
        if !params.is_empty() {
            b.line(format!("np_value args[{}];", params.len()));
        }
        for (j, param) in params.iter().enumerate() {
            self.callback_argument(b, class, method, j, &param.ty, &param.annotations);
        }

        b.line("np_value rvalue;");
        b.line("rvalue.j = 0;");
        let args = if params.is_empty() { "NULL" } else { "args" };
        b.open("if (obj == NULL) {")
            .line(format!(
                "NP_log(NP_LOG_ERROR, \"Function pointer object is NULL in callback for {}.\");",
                class.name
            ))
            .reopen(format!(
                "}} else if (env->invoke(env, obj, \"{}\", {}, {}, &rvalue) != 0) {{",
                target.invoke,
                args,
                params.len()
            ))
            .line(format!(
                "NP_log(NP_LOG_ERROR, \"Callback {}.{} failed.\");",
                class.name, target.invoke
            ));
        match ret {
            ManagedType::Void => {
                b.close("}");
            }
            ManagedType::Primitive(p) => {
                b.reopen("} else {")
                    .line(format!("rarg = rvalue.{};", p.value_field()))
                    .close("}");
            }
            _ => {
                b.reopen("} else {").line("rarg = (np_handle*)rvalue.l;").close("}");
            }
        }

        for (j, param) in params.iter().enumerate() {
            self.callback_write_back(b, j, &param.ty, &param.annotations);
        }
        b.close("}");
        b.directive("end:");
        b.open("if (env != NULL) {")
            .line("env->detach_thread(env, attached);")
            .close("}");

        self.callback_return(b, class, method);
    }

    fn callback_argument(
        &mut self,
        b: &mut Builder,
        class: &ClassDecl,
        method: &MethodDecl,
        j: usize,
        ty: &ManagedType,
        annotations: &Annotations,
    ) {
        match ty {
            ManagedType::Primitive(p) => {
                b.line(format!(
                    "args[{j}].{} = ({})arg{j};",
                    p.value_field(),
                    p.abi_name(),
                    j = j
                ));
            }
            ManagedType::String => {
                let adapter = self.ctx.adapter_information(false, None, annotations);
                match adapter {
                    Some(adapter) => {
                        self.tables.uses_adapters = true;
                        b.line(format!("{} adapter{j}(arg{j});", adapter.name, j = j));
                        b.line(format!("args[{j}].l = (void*)(const char*)adapter{j};", j = j));
                    }
                    None => {
                        b.line(format!("args[{j}].l = (void*)arg{j};", j = j));
                    }
                }
            }
            ManagedType::Array(_) | ManagedType::Buffer(_) => {
                b.line(format!("np_array array{};", j));
                b.line(format!("array{j}.data = (void*)arg{j};", j = j));
                b.line(format!("array{j}.length = arg{j} != NULL ? 1 : 0;", j = j));
                b.line(format!("args[{j}].l = &array{j};", j = j));
            }
            ManagedType::Handle(class_name) => {
                let Some(type_name) = self.callback_type_name(ty) else {
                    b.line(format!("args[{}].l = NULL;", j));
                    return;
                };
                let by = annotations.by();
                let pointer_cast = format!("({})", type_name);
                let value = value_type_name(&type_name);
                let adapter = self.ctx.adapter_information(false, Some(&value), annotations);
                let function = self.ctx.is_function(ty);
                let by_value = by == Some(PassBy::Val) && value != "char" && value != "void";

                if adapter.is_some() || function || by_value {
                    // Owned copy, reclaimed by the managed side
                    let deallocator = if let Some(adapter) = &adapter {
                        self.tables.uses_adapters = true;
                        b.line(format!("{} adapter{j}(arg{j});", adapter.name, j = j));
                        b.line(format!("{} = adapter{};", type_name.declare(&format!("ptr{}", j)), j));
                        b.line(format!("intptr_t size{j} = (intptr_t)adapter{j}.size;", j = j));
                        format!("&{}::deallocate", adapter.name)
                    } else if function {
                        b.line(format!("{} = new (std::nothrow) {};", type_name.declare(&format!("ptr{}", j)), value));
                        b.open(format!("if (ptr{} != NULL) {{", j))
                            .line(format!("ptr{j}->ptr = arg{j};", j = j))
                            .close("}");
                        b.line(format!("intptr_t size{} = 1;", j));
                        self.deallocator_name(class_name)
                    } else {
                        let nothrow = no_exception(self.ctx.decls, class_name, method);
                        b.line(format!(
                            "{} = {}{}{}(*{}&arg{});",
                            type_name.declare(&format!("ptr{}", j)),
                            if nothrow { "new (std::nothrow) " } else { "new " },
                            value,
                            type_name.suffix,
                            pointer_cast,
                            j
                        ));
                        b.line(format!("intptr_t size{} = 1;", j));
                        self.deallocator_name(class_name)
                    };
                    b.line(format!("np_handle* obj{} = NULL;", j));
                    b.open(format!("if (ptr{} != NULL) {{", j))
                        .line(format!(
                            "obj{j} = (np_handle*)env->new_handle(env, \"{}\");",
                            class_name,
                            j = j
                        ))
                        .line(format!(
                            "env->init_handle(env, obj{j}, ptr{j}, size{j}, ptr{j}, {});",
                            deallocator,
                            j = j
                        ))
                        .close("}");
                    b.line(format!("args[{j}].l = obj{j};", j = j));
                    return;
                }

                let declared = type_name.declare(&format!("ptr{}", j));
                match by {
                    Some(PassBy::Val | PassBy::Ref) => {
                        b.line(format!("{} = {}&arg{};", declared, pointer_cast, j));
                    }
                    Some(PassBy::PtrPtr) => {
                        b.line(format!("{} = NULL;", declared));
                        b.open(format!("if (arg{} == NULL) {{", j))
                            .line(format!(
                                "NP_log(NP_LOG_WARN, \"Pointer address of argument {} is NULL in callback for {}.\");",
                                j, class.name
                            ))
                            .reopen("} else {")
                            .line(format!("ptr{j} = {}*arg{j};", pointer_cast, j = j))
                            .close("}");
                    }
                    _ => {
                        b.line(format!("{} = {}arg{};", declared, pointer_cast, j));
                    }
                }
                b.line(format!("np_handle handle{j} = {{ (uintptr_t)ptr{j}, 0, 0, 0 }};", j = j));
                if matches!(by, Some(PassBy::PtrPtr | PassBy::PtrRef)) {
                    b.line(format!("args[{j}].l = &handle{j};", j = j));
                } else {
                    b.line(format!("args[{j}].l = ptr{j} == NULL ? NULL : &handle{j};", j = j));
                }
            }
            ManagedType::Void | ManagedType::Class => {
                b.line(format!("args[{}].l = NULL;", j));
            }
        }
    }

    fn callback_write_back(&mut self, b: &mut Builder, j: usize, ty: &ManagedType, annotations: &Annotations) {
        let by = annotations.by();
        if !matches!(ty, ManagedType::Handle(_)) || !matches!(by, Some(PassBy::PtrPtr | PassBy::PtrRef)) {
            return;
        }
        if annotations.adapter.is_some() || self.ctx.is_function(ty) {
            return;
        }
        let Some(type_name) = self.callback_type_name(ty) else {
            return;
        };
        let cast = self.ctx.names.cast(ty, annotations);
        b.line(format!(
            "{} = ({})handle{}.address;",
            type_name.declare(&format!("rptr{}", j)),
            type_name,
            j
        ));
        if self.has_position(ty) {
            b.line(format!("rptr{j} += handle{j}.position;", j = j));
        }
        if by == Some(PassBy::PtrPtr) {
            b.open(format!("if (arg{} != NULL) {{", j))
                .line(format!("*arg{j} = *{}&rptr{j};", cast, j = j))
                .close("}");
        } else {
            b.line(format!("arg{j} = {}rptr{j};", cast, j = j));
        }
    }

    fn callback_return(&mut self, b: &mut Builder, class: &ClassDecl, method: &MethodDecl) {
        let ret = &method.returns;
        let annotations = &method.annotations;
        let cast = self.ctx.names.cast(ret, annotations);
        match ret {
            ManagedType::Void => {}
            ManagedType::Primitive(_) => {
                b.line(format!("return {}rarg;", cast));
            }
            ManagedType::Handle(_) => {
                let Some(type_name) = self.callback_type_name(ret) else {
                    b.line("return NULL;");
                    return;
                };
                let value = value_type_name(&type_name);
                let adapter = self.ctx.adapter_information(false, Some(&value), annotations);
                b.line(format!(
                    "{} = rarg == NULL ? NULL : ({})rarg->address;",
                    type_name.declare("rptr"),
                    type_name
                ));
                if adapter.is_some() {
                    b.line("intptr_t rsize = rarg == NULL ? 0 : (intptr_t)rarg->limit;");
                }
                if self.has_position(ret) {
                    b.line("intptr_t rposition = rarg == NULL ? 0 : (intptr_t)rarg->position;");
                    b.line("rptr += rposition;");
                    if adapter.is_some() {
                        b.line("rsize -= rposition;");
                    }
                }
                if let Some(adapter) = adapter {
                    self.tables.uses_adapters = true;
                    b.line(format!("return {}({}rptr, rsize);", adapter.name, cast));
                } else if self.ctx.is_function(ret) {
                    b.line(format!("return {}(rptr == NULL ? NULL : rptr->ptr);", cast));
                } else if matches!(annotations.by(), Some(PassBy::Val | PassBy::Ref)) {
                    b.open("if (rptr == NULL) {")
                        .line(format!(
                            "NP_log(NP_LOG_ERROR, \"Return pointer address is NULL in callback for {}.\");",
                            class.name
                        ))
                        .line(format!("static {} empty{};", value, type_name.suffix))
                        .line("return empty;")
                        .reopen("} else {")
                        .line(format!("return *{}rptr;", cast))
                        .close("}");
                } else {
                    b.line(format!("return {}rptr;", cast));
                }
            }
            ManagedType::String | ManagedType::Array(_) | ManagedType::Buffer(_) | ManagedType::Class => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_split() {
        let name = CppName::split("int (*", ")(int arg0, double arg1)");
        let signature = Signature::from_name(&name);
        assert_eq!(signature.return_convention, "int ");
        assert_eq!(signature.parameters, "(int arg0, double arg1)");

        let name = CppName::split("void (__stdcall *", ")()");
        let signature = Signature::from_name(&name);
        assert_eq!(signature.return_convention, "void __stdcall ");
        assert_eq!(signature.parameters, "()");
    }
}
