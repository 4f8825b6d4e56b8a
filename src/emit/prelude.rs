//! Everything in front of the entry points: macros, includes, the `np_env`
//! ABI, helpers and the per-module declarations the bodies refer to

use super::callback::Signature;
use super::ir::{Builder, Fragment};
use super::{mangle, Context, Tables};
use crate::decl::{ClassKind, ManagedType};
use crate::errors::{Diagnostic, DiagnosticKind, Location};
use crate::types::{value_type_name, STRING_ADAPTER, VECTOR_ADAPTER};
use nativeport_runtime::ffi::ABI_VERSION;

pub(super) const MACROS: &str = r#"#ifndef NP_EXPORT
#if defined(_WIN32)
    #define NP_EXPORT __declspec(dllexport)
    #define NP_IMPORT __declspec(dllimport)
    #define NP_hidden
    #define NP_noinline __declspec(noinline)
#elif defined(__GNUC__)
    #define NP_EXPORT __attribute__((visibility("default")))
    #define NP_IMPORT
    #define NP_hidden __attribute__((visibility("hidden")))
    #define NP_noinline __attribute__((noinline))
#else
    #define NP_EXPORT
    #define NP_IMPORT
    #define NP_hidden
    #define NP_noinline
#endif
#endif"#;

const STANDARD_INCLUDES: &[&str] = &[
    "<stddef.h>",
    "<stdint.h>",
    "<stdio.h>",
    "<stdlib.h>",
    "<string.h>",
    "<exception>",
    "<memory>",
    "<new>",
    "<string>",
    "<vector>",
];

/// `np_env` ABI shared with `nativeport_runtime::ffi`
pub(super) fn abi() -> Fragment {
    Fragment::text(format!(
        r#"#ifndef NP_ABI_DEFINED
#define NP_ABI_DEFINED
#define NP_ABI_VERSION {version}
#define NP_LOG_TRACE 0
#define NP_LOG_DEBUG 1
#define NP_LOG_INFO 2
#define NP_LOG_WARN 3
#define NP_LOG_ERROR 4
typedef signed char np_byte;
typedef short np_short;
typedef int np_int;
typedef long long np_long;
typedef float np_float;
typedef double np_double;
typedef unsigned short np_char;
typedef unsigned char np_boolean;
typedef const char* np_class;
typedef struct np_handle {{
    uintptr_t address;
    size_t position;
    size_t limit;
    size_t capacity;
}} np_handle;
typedef struct np_array {{
    void* data;
    intptr_t length;
}} np_array;
typedef union np_value {{
    np_byte b;
    np_short s;
    np_int i;
    np_long j;
    np_float f;
    np_double d;
    np_char c;
    np_boolean z;
    void* l;
}} np_value;
typedef struct np_env np_env;
struct np_env {{
    int version;
    void (*init_handle)(np_env* env, np_handle* obj, void* ptr, intptr_t capacity, void* owner, void (*deallocator)(void*));
    void* (*new_handle)(np_env* env, const char* class_name);
    char* (*new_string)(np_env* env, const char* utf8);
    void (*throw_error)(np_env* env, const char* error_class, const char* message);
    int (*has_error)(np_env* env);
    void (*put_member_offset)(np_env* env, const char* class_name, const char* member, intptr_t offset);
    int (*attach_thread)(np_env* env);
    void (*detach_thread)(np_env* env, int attached);
    int (*invoke)(np_env* env, void* obj, const char* method, np_value* args, int nargs, np_value* ret);
    void (*log)(np_env* env, int level, const char* message);
}};
#endif"#,
        version = ABI_VERSION
    ))
}

/// `#include` line, quoting names not already bracketed
pub(super) fn include(name: &str) -> Fragment {
    if name.starts_with('<') || name.starts_with('"') {
        Fragment::directive(format!("#include {}", name))
    } else {
        Fragment::directive(format!("#include \"{}\"", name))
    }
}

const LOGGING: &str = r#"static np_env* NP_env = NULL;

static void NP_log(int level, const char* message) {
    if (NP_env != NULL) {
        NP_env->log(NP_env, level, message);
    } else {
        fprintf(stderr, "nativeport: %s\n", message);
    }
}"#;

const EXCEPTIONS: &str = r#"static void NP_handleException(np_env* env, const char* error_class) {
    try {
        throw;
    } catch (std::exception& e) {
        env->throw_error(env, error_class, e.what());
    } catch (...) {
        env->throw_error(env, error_class, "Unknown exception.");
    }
}"#;

fn adapters() -> Fragment {
    Fragment::text(format!(
        r#"template<class P, class T = P> class NP_hidden {vector} {{
public:
    typedef typename std::vector<T>::size_type size_type;
    {vector}(const P* ptr, size_type size) : ptr((P*)ptr), size(size),
        vec2(ptr ? std::vector<T>((P*)ptr, (P*)ptr + size) : std::vector<T>()), vec(vec2) {{ }}
    {vector}(const std::vector<T>& vec) : ptr(0), size(0), vec2(vec), vec(vec2) {{ }}
    {vector}(      std::vector<T>& vec) : ptr(0), size(0), vec(vec) {{ }}
    {vector}(const std::vector<T>* vec) : ptr(0), size(0), vec(*(std::vector<T>*)vec) {{ }}
    static void deallocate(void* owner) {{ operator delete(owner); }}
    operator P*() {{
        if (vec.size() > size) {{
            ptr = (P*)(operator new(sizeof(P) * vec.size(), std::nothrow_t()));
        }}
        if (ptr) {{
            std::uninitialized_copy(vec.begin(), vec.end(), ptr);
        }}
        size = vec.size();
        return ptr;
    }}
    operator const P*() {{ return vec.empty() ? 0 : &vec[0]; }}
    operator std::vector<T>&() {{ return vec; }}
    operator std::vector<T>*() {{ return ptr ? &vec : 0; }}
    P* ptr;
    size_type size;
    std::vector<T> vec2;
    std::vector<T>& vec;
}};

class NP_hidden {string} {{
public:
    {string}(const char* ptr, size_t size) : ptr((char*)ptr), size(size),
        str2(ptr ? (char*)ptr : "", ptr ? (size > 0 ? size : strlen(ptr)) : 0), str(str2) {{ }}
    {string}(const std::string& str) : ptr(0), size(0), str2(str), str(str2) {{ }}
    {string}(      std::string& str) : ptr(0), size(0), str(str) {{ }}
    {string}(const std::string* str) : ptr(0), size(0), str(*(std::string*)str) {{ }}
    static void deallocate(void* owner) {{ delete[] (char*)owner; }}
    operator char*() {{
        const char* data = str.data();
        if (str.size() > size) {{
            ptr = new (std::nothrow) char[str.size() + 1];
            if (ptr) {{
                memset(ptr, 0, str.size() + 1);
            }}
        }}
        if (ptr && memcmp(ptr, data, str.size()) != 0) {{
            memcpy(ptr, data, str.size());
            if (size > str.size()) {{
                ptr[str.size()] = 0;
            }}
        }}
        size = str.size();
        return ptr;
    }}
    operator const char*() {{ return str.c_str(); }}
    operator std::string&() {{ return str; }}
    operator std::string*() {{ return ptr ? &str : 0; }}
    char* ptr;
    size_t size;
    std::string str2;
    std::string& str;
}};"#,
        vector = VECTOR_ADAPTER,
        string = STRING_ADAPTER
    ))
}

/// Native spelling used to delete instances of `class_name`
fn deletable_type(ctx: &Context<'_>, class_name: &str) -> Option<String> {
    let ty = ManagedType::handle(class_name);
    if let Some(class) = ctx.class_of(&ty) {
        if class.kind == ClassKind::Function {
            return Some(ctx.names.function_class_name(class));
        }
        if ctx.has_virtual(class) {
            return ctx.subclass_name(class);
        }
    }
    ctx.names.cpp_type_name(&ty).map(|name| value_type_name(&name))
}

fn deallocator(name: &str, value: &str, array: bool) -> Fragment {
    let suffix = if array { "deallocateArray" } else { "deallocate" };
    let body = match (value, array) {
        ("void", _) => "free(p);".to_string(),
        (_, true) => format!("delete[] ({}*)p;", value),
        (_, false) => format!("delete ({}*)p;", value),
    };
    Fragment::line(format!("static void {}_{}(void* p) {{ {} }}", name, suffix, body))
}

fn function_structs(ctx: &Context<'_>, tables: &mut Tables) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut missing = Vec::new();
    for class_name in &tables.functions {
        let Some(class) = ctx.decls.class(class_name) else {
            continue;
        };
        let Some(function) = ctx.names.cpp_function_type_name(class) else {
            missing.push(Diagnostic::new(
                DiagnosticKind::MissingFunctionMethod,
                Location::class(&class.name),
            ));
            continue;
        };
        let name = ctx.names.function_class_name(class);
        let signature = Signature::from_name(&function);
        fragments.push(Fragment::block(
            format!("struct NP_hidden {} {{", name),
            vec![
                Fragment::line(format!("{}() : ptr(NULL), obj(NULL) {{ }}", name)),
                Fragment::line(format!(
                    "{}operator(){};",
                    signature.return_convention, signature.parameters
                )),
                Fragment::line(format!("{};", function.declare("ptr"))),
                Fragment::line("void* obj;"),
            ],
            "};",
        ));
        fragments.push(Fragment::Blank);
    }
    tables.diagnostics.extend(missing);
    fragments
}

fn virtual_subclasses(ctx: &Context<'_>, tables: &Tables) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for class in ctx.decls.classes() {
        let Some(members) = tables.virtual_members.get(&class.name) else {
            continue;
        };
        let (Some(sub), Some(base)) = (
            ctx.subclass_name(class),
            ctx.names.cpp_type_name(&ManagedType::handle(class.name.clone())),
        ) else {
            continue;
        };
        let mut body = vec![Fragment::directive("public:"), Fragment::line("void* obj;")];
        body.extend(members.iter().map(Fragment::line));
        fragments.push(Fragment::block(
            format!("class NP_hidden {} : public {} {{", sub, value_type_name(&base)),
            body,
            "};",
        ));
        fragments.push(Fragment::Blank);
    }
    fragments
}

fn module_load(ctx: &Context<'_>, tables: &Tables) -> Fragment {
    let mut b = Builder::new();
    b.open("NP_EXPORT int np_module_load(np_env* env) {");
    b.open("if (env == NULL || env->version != NP_ABI_VERSION) {")
        .line("return -1;")
        .close("}");
    b.line("NP_env = env;");
    for class_name in &tables.classes {
        let Some(name) = ctx.names.cpp_type_name(&ManagedType::handle(class_name.clone())) else {
            continue;
        };
        let value = value_type_name(&name);
        let Some(members) = tables.members.get(class_name) else {
            continue;
        };
        for member in members {
            let offset = if member == "sizeof" {
                format!("sizeof({})", value)
            } else {
                format!("offsetof({}, {})", value, member)
            };
            b.line(format!(
                "env->put_member_offset(env, \"{}\", \"{}\", (intptr_t){});",
                class_name, member, offset
            ));
        }
    }
    b.line("return NP_ABI_VERSION;");
    b.close("}");
    b.blank();
    b.open("NP_EXPORT void np_module_unload(np_env* env) {")
        .open("if (NP_env == env) {")
        .line("NP_env = NULL;")
        .close("}")
        .close("}");
    b.into_fragment()
}

/// Prelude for a module whose bodies filled `tables`; ends inside the
/// `extern "C"` block the bodies are written into
pub(super) fn render(ctx: &Context<'_>, tables: &mut Tables) -> Fragment {
    let properties = ctx.properties;
    let mut out = vec![
        Fragment::line(format!(
            "// Generated by nativeport for module {}. Do not edit.",
            ctx.decls.module()
        )),
        Fragment::Blank,
    ];

    for define in properties.get("platform.define") {
        out.push(Fragment::directive(format!("#define {}", define)));
    }
    out.push(Fragment::text(MACROS));
    out.push(Fragment::Blank);

    out.extend(STANDARD_INCLUDES.iter().map(|name| include(name)));
    out.extend(properties.get("platform.include").iter().map(|name| include(name)));
    let cincludes = properties.get("platform.cinclude");
    if !cincludes.is_empty() {
        out.push(Fragment::block(
            "extern \"C\" {",
            cincludes.iter().map(|name| include(name)).collect(),
            "}",
        ));
    }
    out.push(Fragment::Blank);

    out.push(abi());
    out.push(Fragment::Blank);
    out.push(Fragment::text(LOGGING));
    out.push(Fragment::Blank);

    if tables.may_throw {
        out.push(Fragment::text(EXCEPTIONS));
        out.push(Fragment::Blank);
    }
    if tables.uses_adapters {
        out.push(adapters());
        out.push(Fragment::Blank);
    }

    out.extend(function_structs(ctx, tables));
    out.extend(virtual_subclasses(ctx, tables));

    if !tables.callbacks.is_empty() {
        out.extend(tables.callbacks.iter().map(Fragment::line));
        out.push(Fragment::Blank);
    }

    let deallocators: Vec<Fragment> = tables
        .deallocators
        .iter()
        .filter_map(|name| {
            deletable_type(ctx, name).map(|value| deallocator(&mangle::class_symbol(name), &value, false))
        })
        .chain(tables.array_deallocators.iter().filter_map(|name| {
            deletable_type(ctx, name).map(|value| deallocator(&mangle::class_symbol(name), &value, true))
        }))
        .collect();
    if !deallocators.is_empty() {
        out.extend(deallocators);
        out.push(Fragment::Blank);
    }

    out.push(Fragment::line("extern \"C\" {"));
    out.push(Fragment::Blank);
    out.push(module_load(ctx, tables));
    out.push(Fragment::Blank);
    Fragment::Seq(out)
}
