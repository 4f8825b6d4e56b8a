//! Symbol names for generated entry points

use crate::decl::{ClassDecl, ManagedType, MethodDecl};

/// Escape a managed name into a C identifier fragment.
///
/// ASCII letters and digits pass through, `.` and `/` become `_`, `_`
/// becomes `_1`, `;` becomes `_2`, `[` becomes `_3` and anything else is
/// written as `_0` followed by four hex digits.
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 2);
    for c in name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(c),
            '_' => out.push_str("_1"),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            '.' | '/' => out.push('_'),
            other => {
                let mut units = [0u16; 2];
                for unit in other.encode_utf16(&mut units) {
                    out.push_str(&format!("_0{:04x}", unit));
                }
            }
        }
    }
    out
}

/// Signature of a parameter list, without parentheses or return type
pub fn signature<'a>(types: impl IntoIterator<Item = &'a ManagedType>) -> String {
    types.into_iter().map(ManagedType::signature).collect()
}

/// `np_<class>_<method>`, with `__<signature>` appended for overloads
pub fn entry_name(class: &ClassDecl, method: &MethodDecl, overloaded: bool) -> String {
    let mut name = format!("np_{}_{}", mangle(&class.name), mangle(&method.name));
    if overloaded {
        name.push_str("__");
        name.push_str(&mangle(&signature(method.param_types())));
    }
    name
}

/// Prefix of the per-class helpers (`NP_<class>_deallocate`, ...)
pub fn class_symbol(class_name: &str) -> String {
    format!("NP_{}", mangle(class_name))
}
