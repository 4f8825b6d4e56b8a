use super::*;
use crate::decl::{Behavior, ClassDecl, ClassKind, DeclarationSet, ManagedType, MethodDecl, Primitive};
use crate::errors::DiagnosticKind;

fn int() -> ManagedType {
    ManagedType::Primitive(Primitive::Int)
}

fn long() -> ManagedType {
    ManagedType::Primitive(Primitive::Long)
}

fn module(decls: DeclarationSet) -> GeneratedModule {
    let mut decls = decls;
    generate(&mut decls, &Properties::new(), true).unwrap()
}

fn callback_class(returns: ManagedType) -> ClassDecl {
    ClassDecl::new("demo.Callback")
        .with_kind(ClassKind::Function)
        .with_method(MethodDecl::new("allocate"))
        .with_method(MethodDecl::new("call").with_param(int()).returning(returns).managed())
}

#[test]
fn test_member_array_access() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Holder")
            .with_method(MethodDecl::new("values").with_param(int()).returning(int()))
            .with_method(MethodDecl::new("values").with_param(int()).with_param(int())),
    );
    let module = module(decls);
    let source = &module.source;

    assert!(source.contains("NP_EXPORT np_int np_demo_Holder_values__I(np_env* env, np_handle* obj, np_int arg0) {"));
    assert!(source.contains("NP_EXPORT void np_demo_Holder_values__II(np_env* env, np_handle* obj, np_int arg0, np_int arg1) {"));
    assert!(source.contains("Holder* ptr = (Holder*)obj->address;"));
    assert!(source.contains("rvalue = ptr->values[arg0];"));
    assert!(source.contains("ptr->values[arg0] = arg1;"));
    assert!(source.contains("env->put_member_offset(env, \"demo.Holder\", \"sizeof\", (intptr_t)sizeof(Holder));"));
    assert!(source.contains("env->put_member_offset(env, \"demo.Holder\", \"values\", (intptr_t)offsetof(Holder, values));"));
    assert_eq!(module.entry_points.len(), 2);
    assert!(!source.contains("try {"));
}

#[test]
fn test_get_put_element_access() {
    let this = ManagedType::handle("demo.IntArray");
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.IntArray")
            .with_method(MethodDecl::new("get").with_param(long()).returning(int()))
            .with_method(MethodDecl::new("put").with_param(long()).with_param(int()).returning(this)),
    );
    let source = module(decls).source;

    assert!(source.contains("int rvalue = ptr[arg0];"));
    assert!(source.contains("ptr[arg0] = arg1;"));
    assert!(source.contains("np_handle* rarg = obj;"));
    assert!(source.contains("NP_EXPORT np_int np_demo_IntArray_get(np_env* env, np_handle* obj, np_long arg0) {"));
}

#[test]
fn test_allocator_registers_deallocator() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector")
            .with_cpp_name("Vector")
            .with_method(MethodDecl::new("allocate"))
            .with_method(MethodDecl::new("allocateArray").with_param(long())),
    );
    let source = module(decls).source;

    assert!(source.contains("Vector* rptr = new Vector();"));
    assert!(source.contains("env->init_handle(env, obj, rptr, rcapacity, rptr, &NP_demo_Vector_deallocate);"));
    assert!(source.contains("Vector* rptr = new Vector[arg0];"));
    assert!(source.contains("intptr_t rcapacity = arg0;"));
    assert!(source.contains("static void NP_demo_Vector_deallocate(void* p) { delete (Vector*)p; }"));
    assert!(source.contains("static void NP_demo_Vector_deallocateArray(void* p) { delete[] (Vector*)p; }"));
}

#[test]
fn test_no_deallocator_passes_null_owner() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Borrowed")
            .no_deallocator()
            .with_method(MethodDecl::new("allocate")),
    );
    let source = module(decls).source;
    assert!(source.contains("env->init_handle(env, obj, rptr, rcapacity, NULL, NULL);"));
    assert!(!source.contains("NP_demo_Borrowed_deallocate"));
}

#[test]
fn test_exception_translation_only_when_throwing() {
    let throwing = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector")
            .with_method(MethodDecl::new("clear").throwing("IllegalStateException")),
    );
    let source = module(throwing).source;
    assert!(source.contains("try {"));
    assert!(source.contains("} catch (...) {"));
    assert!(source.contains("NP_handleException(env, \"IllegalStateException\");"));
    assert!(source.contains("static void NP_handleException(np_env* env, const char* error_class) {"));

    let quiet = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector")
            .no_exception()
            .with_method(MethodDecl::new("allocate"))
            .with_method(MethodDecl::new("clear")),
    );
    let source = module(quiet).source;
    assert!(!source.contains("try {"));
    assert!(!source.contains("NP_handleException"));
    assert!(source.contains("new (std::nothrow) Vector();"));
    assert!(source.contains("ptr->clear();"));
}

#[test]
fn test_overloads_get_signature_suffix() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector")
            .with_method(MethodDecl::new("scale").with_param(ManagedType::Primitive(Primitive::Double)))
            .with_method(MethodDecl::new("scale").with_param(ManagedType::Primitive(Primitive::Float)))
            .with_method(MethodDecl::new("size").returning(long())),
    );
    let module = module(decls);
    assert_eq!(
        module.entry_points,
        vec!["np_demo_Vector_scale__D", "np_demo_Vector_scale__F", "np_demo_Vector_size"]
    );
    assert!(module.source.contains("ptr->scale(arg0);"));
}

#[test]
fn test_string_return_copies_into_managed_string() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Person").with_method(MethodDecl::new("name").returning(ManagedType::String)),
    );
    let source = module(decls).source;
    assert!(source.contains("NP_EXPORT char* np_demo_Person_name(np_env* env, np_handle* obj) {"));
    assert!(source.contains("rptr = (const char*)ptr->name();"));
    assert!(source.contains("rarg = env->new_string(env, rptr);"));
}

#[test]
fn test_callback_trampoline() {
    let decls = DeclarationSet::new("demo").with_class(callback_class(int()));
    let module = module(decls);
    let source = &module.source;

    assert!(source.contains("struct NP_hidden NP_demo_Callback {"));
    assert!(source.contains("int operator()(int arg0);"));
    assert!(source.contains("int (* ptr)(int arg0);"));
    assert!(source.contains("static NP_demo_Callback NP_demo_Callback_allocate_callback_instance;"));
    assert!(source.contains("NP_EXPORT int NP_demo_Callback_allocate_callback(int arg0) {"));
    assert!(source.contains("return NP_demo_Callback_allocate_callback_instance(arg0);"));
    assert!(source.contains("int NP_demo_Callback::operator()(int arg0) {"));
    assert!(source.contains("attached = env->attach_thread(env);"));
    assert!(source.contains("args[0].i = (np_int)arg0;"));
    assert!(source.contains("env->invoke(env, obj, \"call\", args, 1, &rvalue) != 0"));
    assert!(source.contains("rarg = rvalue.i;"));
    assert!(source.contains("env->detach_thread(env, attached);"));
    assert!(source.contains("\nend:\n"));

    assert!(source.contains("NP_EXPORT void np_demo_Callback_allocate(np_env* env, np_handle* obj, void* key) {"));
    assert!(source.contains("rptr->ptr = &NP_demo_Callback_allocate_callback;"));
    assert!(source.contains("env->init_handle(env, obj, rptr, 1, rptr, &NP_demo_Callback_deallocate);"));
    assert!(source.contains("static void NP_demo_Callback_deallocate(void* p) { delete (NP_demo_Callback*)p; }"));

    let header = module.header.as_deref().unwrap();
    assert!(header.contains("#ifndef NP_DEMO_H"));
    assert!(header.contains("NP_IMPORT int NP_demo_Callback_allocate_callback(int arg0);"));
    assert!(header.contains("NP_IMPORT void np_demo_Callback_allocate(np_env* env, np_handle* obj, void* key);"));
    assert!(header.contains("NP_IMPORT int np_module_load(np_env* env);"));
}

#[test]
fn test_callback_with_string_return_is_skipped() {
    let decls = DeclarationSet::new("demo").with_class(callback_class(ManagedType::String));
    let module = module(decls);
    assert!(!module.source.contains("_callback("));
    assert!(!module.source.contains("np_demo_Callback_allocate("));
    assert_eq!(
        module
            .diagnostics
            .iter()
            .filter(|d| matches!(d.kind, DiagnosticKind::UnsupportedReturn { .. }))
            .count(),
        1
    );
}

#[test]
fn test_virtual_methods_get_subclass() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Shape")
            .with_cpp_name("Shape")
            .with_method(MethodDecl::new("allocate"))
            .with_method(
                MethodDecl::new("area")
                    .returning(ManagedType::Primitive(Primitive::Double))
                    .virtual_method(),
            ),
    );
    let source = module(decls).source;

    assert!(source.contains("class NP_hidden NP_Shape : public Shape {"));
    assert!(source.contains("NP_Shape() : Shape(), obj(NULL) { }"));
    assert!(source.contains("virtual double area();"));
    assert!(source.contains("double NP_Shape::area() {"));
    assert!(source.contains("env->invoke(env, obj, \"area\", NULL, 0, &rvalue) != 0"));
    assert!(source.contains("Shape* rptr = new NP_Shape();"));
    assert!(source.contains("((NP_Shape*)rptr)->obj = key;"));
    assert!(source.contains("dynamic_cast<NP_Shape*>(ptr) != NULL ? ptr->Shape::area() : ptr->area()"));
    assert!(source.contains("static void NP_demo_Shape_deallocate(void* p) { delete (NP_Shape*)p; }"));
}

/// Lines of the entry point definition starting with `NP_EXPORT ... name(`
fn entry_body<'s>(source: &'s str, name: &str) -> Vec<&'s str> {
    let lines: Vec<&str> = source.lines().collect();
    let head = lines
        .iter()
        .position(|l| l.starts_with("NP_EXPORT") && l.contains(&format!(" {}(", name)))
        .unwrap();
    let end = head + lines[head..].iter().position(|l| *l == "}").unwrap();
    lines[head..end].to_vec()
}

/// `init_handle` deletes the object when admission is refused, so it has to
/// be the last statement that mentions it
fn assert_init_handle_is_last_use(body: &[&str], init: &str) -> usize {
    let at = body.iter().position(|l| l.contains(init)).unwrap();
    assert!(body[at + 1..].iter().all(|l| !l.contains("rptr")), "{:#?}", body);
    at
}

#[test]
fn test_virtual_allocator_binds_key_before_handing_over_ownership() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Shape")
            .with_cpp_name("Shape")
            .with_method(MethodDecl::new("allocate"))
            .with_method(
                MethodDecl::new("area")
                    .returning(ManagedType::Primitive(Primitive::Double))
                    .virtual_method(),
            ),
    );
    let source = module(decls).source;

    let body = entry_body(&source, "np_demo_Shape_allocate");
    let bind = body.iter().position(|l| l.contains("((NP_Shape*)rptr)->obj = key;")).unwrap();
    let init = assert_init_handle_is_last_use(
        &body,
        "env->init_handle(env, obj, rptr, rcapacity, rptr, &NP_demo_Shape_deallocate);",
    );
    assert!(bind < init);
}

#[test]
fn test_callback_allocator_copies_instance_before_handing_over_ownership() {
    let decls = DeclarationSet::new("demo").with_class(callback_class(int()));
    let source = module(decls).source;

    let body = entry_body(&source, "np_demo_Callback_allocate");
    let copy = body
        .iter()
        .position(|l| l.contains("NP_demo_Callback_allocate_callback_instance = *rptr;"))
        .unwrap();
    let init = assert_init_handle_is_last_use(
        &body,
        "env->init_handle(env, obj, rptr, 1, rptr, &NP_demo_Callback_deallocate);",
    );
    assert!(copy < init);
}

#[test]
fn test_unsupported_return_is_reported_once() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector")
            .with_method(MethodDecl::new("kind").returning(ManagedType::Class))
            .with_method(MethodDecl::new("size").returning(long())),
    );
    let module = module(decls);
    assert_eq!(module.entry_points, vec!["np_demo_Vector_size"]);
    let unsupported: Vec<_> = module
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::UnsupportedReturn { .. }))
        .collect();
    assert_eq!(unsupported.len(), 1);
    assert_eq!(unsupported[0].location.method.as_deref(), Some("kind"));
}

#[test]
fn test_explicit_behavior_mismatch_is_skipped() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector").with_method(
            MethodDecl::new("reset")
                .with_param(int())
                .with_behavior(Behavior::Allocator)
                .static_method(),
        ),
    );
    let module = module(decls);
    assert!(module.entry_points.is_empty());
    assert!(module
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagnosticKind::UnsupportedBehavior { .. })));
}

#[test]
fn test_prelude_layout() {
    let properties = Properties::new()
        .with("platform.define", ["NDEBUG"])
        .with("platform.include", ["vector.h", "<map>"])
        .with("platform.cinclude", ["legacy.h"]);
    let decls = DeclarationSet::new("demo").with_class(ClassDecl::new("demo.Empty").with_kind(ClassKind::Opaque));
    let generated = Generator::new(&decls, &properties).generate();
    let source = &generated.source;

    assert!(source.starts_with("// Generated by nativeport for module demo. Do not edit.\n"));
    assert!(source.contains("#define NDEBUG\n"));
    assert!(source.contains("#include \"vector.h\"\n"));
    assert!(source.contains("#include <map>\n"));
    assert!(source.contains("extern \"C\" {\n#include \"legacy.h\"\n}\n"));
    assert!(source.contains("#define NP_ABI_VERSION 1\n"));
    assert!(source.contains("if (env == NULL || env->version != NP_ABI_VERSION) {"));
    assert!(source.contains("NP_EXPORT void np_module_unload(np_env* env) {"));
    assert!(!source.contains("NP_VectorAdapter"));
    assert!(source.ends_with("}\n"));
    assert!(generated.header.is_none());

    let define = source.find("#define NDEBUG").unwrap();
    let include = source.find("#include \"vector.h\"").unwrap();
    let load = source.find("np_module_load").unwrap();
    assert!(define < include && include < load);
}

#[test]
fn test_generation_is_deterministic() {
    let decls = DeclarationSet::new("demo")
        .with_class(callback_class(int()))
        .with_class(
            ClassDecl::new("demo.Vector")
                .with_method(MethodDecl::new("allocate"))
                .with_method(MethodDecl::new("size").returning(long())),
        );
    let first = module(decls.clone());
    let second = module(decls);
    assert_eq!(first.source, second.source);
    assert_eq!(first.header, second.header);
}

#[test]
fn test_write_creates_parent_directories() {
    let decls = DeclarationSet::new("demo").with_class(
        ClassDecl::new("demo.Vector").with_method(MethodDecl::new("size").returning(long())),
    );
    let module = module(decls);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("out").join("demo.cpp");
    let header = dir.path().join("out").join("demo.h");
    module.write(&source, Some(&header)).unwrap();
    assert_eq!(std::fs::read_to_string(&source).unwrap(), module.source);
    assert!(std::fs::read_to_string(&header).unwrap().contains("np_demo_Vector_size"));
}
