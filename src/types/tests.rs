use super::*;
use crate::decl::{ClassDecl, ClassKind, DeclarationSet, MethodDecl, ParamDecl};
use proptest::prelude::*;

fn bind(spelling: &str) -> (ManagedType, Annotations) {
    TypeMap::new().bind(spelling, &Annotations::default()).unwrap()
}

#[test]
fn test_normalize_spellings() {
    assert_eq!(normalize("unsigned", false, false), "unsigned int");
    assert_eq!(normalize("long  int", false, false), "long");
    assert_eq!(normalize("int const", false, false), "const int");
    assert_eq!(normalize("int const", true, false), "int");
    assert_eq!(normalize("const  std::vector< int >", true, true), "std::vector");
    assert_eq!(normalize("std::map< int, float >", false, false), "std::map<int,float>");
}

#[test]
fn test_parse_declarator() {
    let (base, d) = parse_declarator("const Foo* &");
    assert_eq!(base, "Foo");
    assert_eq!(
        d,
        Declarator {
            constant: true,
            pointers: 1,
            reference: true
        }
    );

    let (base, d) = parse_declarator("int* const");
    assert_eq!(base, "int");
    assert_eq!(d.pointers, 1);
    assert!(!d.constant);

    let (base, d) = parse_declarator("double");
    assert_eq!(base, "double");
    assert_eq!(d, Declarator::default());
}

#[test]
fn test_template_args_respect_nesting() {
    assert_eq!(
        template_args("std::map<std::string, std::vector<int> >"),
        vec!["std::string", "std::vector<int>"]
    );
    assert!(template_args("int").is_empty());
}

#[test]
fn test_bind_primitives_and_pointers() {
    let (ty, annotations) = bind("float");
    assert_eq!(ty, ManagedType::Primitive(Primitive::Float));
    assert!(annotations.is_empty());

    let (ty, annotations) = bind("int*");
    assert_eq!(ty, ManagedType::handle("IntPointer"));
    assert!(annotations.by.is_empty());
    assert_eq!(annotations.cast, None);

    let (ty, annotations) = bind("double&");
    assert_eq!(ty, ManagedType::handle("DoublePointer"));
    assert_eq!(annotations.by(), Some(PassBy::Ref));

    let (ty, annotations) = bind("int**");
    assert_eq!(ty, ManagedType::handle("IntPointer"));
    assert_eq!(annotations.by(), Some(PassBy::PtrPtr));
}

#[test]
fn test_const_char_pointer_is_byte_pointer() {
    let (ty, annotations) = bind("const char*");
    assert_eq!(ty, ManagedType::handle("BytePointer"));
    assert_eq!(annotations.cast.as_deref(), Some("const char*"));
}

#[test]
fn test_size_t_needs_cast() {
    let (ty, annotations) = bind("size_t");
    assert_eq!(ty, ManagedType::Primitive(Primitive::Long));
    assert_eq!(annotations.cast.as_deref(), Some("size_t"));
}

#[test]
fn test_adapters_are_inferred() {
    let (ty, annotations) = bind("std::vector<int>&");
    assert_eq!(ty, ManagedType::handle("IntPointer"));
    let adapter = annotations.adapter.unwrap();
    assert_eq!(adapter.name, VECTOR_ADAPTER);
    assert_eq!(adapter.value_type.as_deref(), Some("int"));

    let (ty, annotations) = bind("const std::string&");
    assert_eq!(ty, ManagedType::String);
    let adapter = annotations.adapter.unwrap();
    assert_eq!(adapter.name, STRING_ADAPTER);
    assert!(adapter.constant);
}

#[test]
fn test_explicit_cast_drops_inferred_adapter() {
    let annotations = Annotations {
        cast: Some("void*".to_string()),
        ..Annotations::default()
    };
    let (ty, selected) = TypeMap::new().bind("char*", &annotations).unwrap();
    assert_eq!(ty, ManagedType::handle("BytePointer"));
    assert_eq!(selected.cast.as_deref(), Some("void*"));
    assert!(selected.adapter.is_none());
}

#[test]
fn test_unresolved_spellings() {
    let err = TypeMap::new().bind("mystery_t", &Annotations::default()).unwrap_err();
    assert!(matches!(err.kind, DiagnosticKind::UnresolvedType { ref spelling } if spelling == "mystery_t"));

    let err = TypeMap::new().bind("std::vector", &Annotations::default()).unwrap_err();
    assert!(matches!(err.kind, DiagnosticKind::UnresolvedType { .. }));
}

#[test]
fn test_conflicting_annotations() {
    let annotations = Annotations {
        by: vec![PassBy::Val, PassBy::Ref],
        ..Annotations::default()
    };
    let err = TypeMap::new().bind("int", &annotations).unwrap_err();
    assert!(matches!(
        err.kind,
        DiagnosticKind::ConflictingAnnotations { ref kept, ref ignored } if kept == "ByVal" && ignored == "ByRef"
    ));
}

#[test]
fn test_user_rules_shadow_defaults() {
    let mut map = TypeMap::new();
    map.put(
        "int",
        TypeBinding::new()
            .with_value(ManagedType::Primitive(Primitive::Long))
            .with_cast(),
    );
    let (ty, annotations) = map.bind("int", &Annotations::default()).unwrap();
    assert_eq!(ty, ManagedType::Primitive(Primitive::Long));
    assert_eq!(annotations.cast.as_deref(), Some("int"));
    assert!(map.spellings().contains(&"double"));
}

#[test]
fn test_value_type_names() {
    assert_eq!(value_type_name(&CppName::new("const Foo*")), "Foo");
    assert_eq!(const_value_type_name(&CppName::new("const Foo*")), "const Foo");
    assert_eq!(CppName::split("int (*", ")(int)").declare("fn"), "int (* fn)(int)");
}

#[test]
fn test_names_for_classes() {
    let decls = DeclarationSet::new("demo")
        .with_class(ClassDecl::new("demo.Outer").with_namespace("geo"))
        .with_class(ClassDecl::new("demo.Outer$Inner").enclosed_by("demo.Outer"))
        .with_class(
            ClassDecl::new("demo.Visitor")
                .with_kind(ClassKind::Function)
                .with_method(
                    MethodDecl::new("call")
                        .with_param(ManagedType::Primitive(Primitive::Int))
                        .with_param(ManagedType::handle("demo.Outer"))
                        .returning(ManagedType::Primitive(Primitive::Double))
                        .managed(),
                ),
        );
    let names = Names::new(&decls);

    let inner = decls.class("demo.Outer$Inner").unwrap();
    assert_eq!(names.cpp_scope_name(inner), "geo::Outer::Inner");
    assert_eq!(
        names.cpp_type_name(&ManagedType::handle("demo.Outer$Inner")).unwrap().to_string(),
        "geo::Outer::Inner*"
    );
    assert_eq!(
        names.cpp_type_name(&ManagedType::handle("IntPointer")).unwrap().to_string(),
        "int*"
    );
    assert_eq!(names.cpp_type_name(&ManagedType::Array(Primitive::Byte)).unwrap().to_string(), "signed char*");

    let visitor = decls.class("demo.Visitor").unwrap();
    let signature = names.cpp_function_type_name(visitor).unwrap();
    assert_eq!(signature.prefix, "double (*");
    assert_eq!(signature.suffix, ")(int arg0, geo::Outer* arg1)");
    assert_eq!(names.function_class_name(visitor), "NP_demo_Visitor");
}

#[test]
fn test_cast_spellings() {
    let decls = DeclarationSet::new("demo");
    let names = Names::new(&decls);
    let param = ParamDecl::new(ManagedType::handle("BytePointer")).constant();
    assert_eq!(names.cast(&param.ty, &param.annotations), "(const signed char*)");
    let plain = ParamDecl::new(ManagedType::handle("BytePointer"));
    assert_eq!(names.cast(&plain.ty, &plain.annotations), "");
    let cast = ParamDecl::new(ManagedType::Primitive(Primitive::Long)).cast("size_t");
    assert_eq!(names.cast(&cast.ty, &cast.annotations), "(size_t)");
}

fn spelling_words() -> impl Strategy<Value = String> {
    let word = prop::sample::select(vec![
        "const", "volatile", "unsigned", "signed", "long", "short", "int", "char", "double",
    ]);
    prop::collection::vec(word, 0..5).prop_map(|words| words.join(" "))
}

proptest! {
    #[test]
    fn test_normalize_is_idempotent(spelling in spelling_words()) {
        let once = normalize(&spelling, false, false);
        prop_assert_eq!(normalize(&once, false, false), once.clone());
        let unconst = normalize(&spelling, true, false);
        prop_assert!(!unconst.contains("const"));
    }
}
