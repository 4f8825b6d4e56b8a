//! Native type spellings and how they map onto managed types
//!
//! A [`TypeMap`] answers "what does `const std::vector<int>&` look like from
//! Rust": which managed type carries it, how it is passed, and whether a cast
//! or an adapter is needed on the native side. User rules are consulted
//! first, then the builtin defaults.

mod names;

#[cfg(test)]
mod tests;

pub use names::{const_value_type_name, value_type_name, CppName, Names};

use crate::decl::{AdapterDecl, Annotations, ManagedType, PassBy, Primitive};
use crate::errors::{Diagnostic, DiagnosticKind, Location};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const VECTOR_ADAPTER: &str = "NP_VectorAdapter";
pub const STRING_ADAPTER: &str = "NP_StringAdapter";

/// Indirection around a base spelling: `const T*&` has `constant`, one
/// pointer and `reference`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Declarator {
    pub constant: bool,
    pub pointers: usize,
    pub reference: bool,
}

/// What a native spelling maps to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBinding {
    /// Normalized base spelling, without declarators
    pub spelling: String,
    pub value: Option<ManagedType>,
    /// Pointer mappings, the first one is the default
    pub pointers: Vec<ManagedType>,
    pub template_args: Vec<TypeBinding>,
    /// Native spelling differs from the managed one and needs a cast
    pub cast: bool,
    /// Pointers to this type address arrays rather than single values
    pub array_element: bool,
    pub adapter: Option<String>,
    pub declarator: Declarator,
}

impl TypeBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: ManagedType) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_pointers(mut self, pointers: impl IntoIterator<Item = ManagedType>) -> Self {
        self.pointers = pointers.into_iter().collect();
        self
    }

    pub fn with_cast(mut self) -> Self {
        self.cast = true;
        self
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    fn primitive(p: Primitive) -> Self {
        Self::new()
            .with_value(ManagedType::Primitive(p))
            .with_pointers([ManagedType::handle(p.handle_class()), ManagedType::Array(p)])
    }

    /// Managed type and effective annotations for this binding.
    ///
    /// Annotations given by the caller override inferred ones: a cast drops
    /// the inferred adapter, a passing mode replaces the inferred one, an
    /// adapter replaces the inferred adapter.
    pub fn select(&self, annotations: &Annotations) -> Option<(ManagedType, Annotations)> {
        let (ty, inferred) = self.infer()?;
        let mut selected = annotations.clone();
        if selected.cast.is_some() {
            if selected.by.is_empty() {
                selected.by = inferred.by;
            }
        } else {
            if selected.by.is_empty() {
                selected.by = inferred.by;
            }
            if selected.adapter.is_none() {
                selected.adapter = inferred.adapter;
            }
            selected.cast = inferred.cast;
            selected.constant |= inferred.constant;
        }
        Some((ty, selected))
    }

    fn infer(&self) -> Option<(ManagedType, Annotations)> {
        let d = self.declarator;
        let mut inferred = Annotations::default();

        if let Some(adapter) = &self.adapter {
            let (ty, value_type) = match self.template_args.first() {
                Some(arg) => (arg.pointers.first()?.clone(), Some(arg.spelling.clone())),
                None => (self.value.clone().or_else(|| self.pointers.first().cloned())?, None),
            };
            let mut decl = AdapterDecl::new(adapter.clone());
            decl.value_type = value_type;
            decl.constant = d.constant;
            inferred.adapter = Some(decl);
            return Some((ty, inferred));
        }

        let pointee = |binding: &Self| {
            let preferred = binding
                .pointers
                .iter()
                .find(|p| binding.array_element && p.is_primitive_array())
                .or_else(|| binding.pointers.first());
            preferred.cloned().or_else(|| binding.value.clone())
        };
        let (ty, by, suffix) = match (d.pointers, d.reference) {
            (0, false) => {
                let value = self.value.clone()?;
                let by = matches!(value, ManagedType::Handle(_)).then_some(PassBy::Val);
                (value, by, "")
            }
            (0, true) => (pointee(self)?, Some(PassBy::Ref), "*"),
            (1, false) => (pointee(self)?, None, "*"),
            (1, true) => (pointee(self)?, Some(PassBy::PtrRef), "*&"),
            (2, false) => (pointee(self)?, Some(PassBy::PtrPtr), "**"),
            _ => return None,
        };
        if !matches!(ty, ManagedType::Handle(_)) {
            if matches!(by, Some(PassBy::PtrPtr | PassBy::PtrRef)) {
                return None;
            }
        } else if let Some(by) = by {
            inferred.by.push(by);
        }

        let indirect = d.pointers > 0 || d.reference;
        if self.cast {
            let constant = if d.constant && indirect { "const " } else { "" };
            inferred.cast = Some(format!("{}{}{}", constant, self.spelling, suffix));
        } else if d.constant && indirect {
            inferred.constant = true;
        }
        Some((ty, inferred))
    }
}

/// Native spelling → [`TypeBinding`] map with an optional parent
#[derive(Debug, Clone)]
pub struct TypeMap {
    entries: HashMap<String, TypeBinding>,
    parent: Option<&'static TypeMap>,
}

static DEFAULTS: Lazy<TypeMap> = Lazy::new(|| {
    use Primitive::*;
    let mut map = TypeMap::empty();

    map.put(
        "void",
        TypeBinding::new()
            .with_value(ManagedType::Void)
            .with_pointers([ManagedType::handle("Pointer")]),
    );
    map.put("bool", TypeBinding::primitive(Boolean));
    map.put(
        "char",
        TypeBinding::new()
            .with_value(ManagedType::Primitive(Byte))
            .with_pointers([
                ManagedType::handle("BytePointer"),
                ManagedType::String,
                ManagedType::Array(Byte),
            ])
            .with_cast(),
    );
    for spelling in ["signed char", "int8_t"] {
        map.put(spelling, TypeBinding::primitive(Byte));
    }
    for spelling in ["unsigned char", "uint8_t"] {
        map.put(spelling, TypeBinding::primitive(Byte).with_cast());
    }
    for spelling in ["short", "int16_t"] {
        map.put(spelling, TypeBinding::primitive(Short));
    }
    for spelling in ["unsigned short", "uint16_t"] {
        map.put(spelling, TypeBinding::primitive(Short).with_cast());
    }
    map.put("char16_t", TypeBinding::primitive(Char).with_cast());
    for spelling in ["int", "int32_t"] {
        map.put(spelling, TypeBinding::primitive(Int));
    }
    for spelling in ["unsigned int", "uint32_t"] {
        map.put(spelling, TypeBinding::primitive(Int).with_cast());
    }
    map.put("long long", TypeBinding::primitive(Long));
    for spelling in ["unsigned long long", "int64_t", "uint64_t"] {
        map.put(spelling, TypeBinding::primitive(Long).with_cast());
    }
    for spelling in ["long", "unsigned long"] {
        map.put(
            spelling,
            TypeBinding::new()
                .with_value(ManagedType::Primitive(Long))
                .with_pointers([ManagedType::handle("CLongPointer")])
                .with_cast(),
        );
    }
    for spelling in ["size_t", "ssize_t", "ptrdiff_t", "intptr_t", "uintptr_t"] {
        map.put(
            spelling,
            TypeBinding::new()
                .with_value(ManagedType::Primitive(Long))
                .with_pointers([ManagedType::handle("SizeTPointer")])
                .with_cast(),
        );
    }
    map.put("float", TypeBinding::primitive(Float));
    map.put("double", TypeBinding::primitive(Double));
    map.put(
        "std::string",
        TypeBinding::new()
            .with_value(ManagedType::String)
            .with_pointers([ManagedType::String])
            .with_adapter(STRING_ADAPTER),
    );
    map.put("std::vector", TypeBinding::new().with_adapter(VECTOR_ADAPTER));
    map
});

impl TypeMap {
    /// Empty map on top of the builtin defaults
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            parent: Some(Self::defaults()),
        }
    }

    /// Empty map with no parent
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            parent: None,
        }
    }

    pub fn defaults() -> &'static TypeMap {
        &DEFAULTS
    }

    pub fn put(&mut self, spelling: &str, mut binding: TypeBinding) {
        let key = normalize(spelling, false, false);
        binding.spelling = key.clone();
        self.entries.insert(key, binding);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binding for a base spelling: exact, const-stripped, template-stripped,
    /// then the same in the parent
    pub fn get(&self, spelling: &str) -> Option<&TypeBinding> {
        let keys = [
            normalize(spelling, false, false),
            normalize(spelling, true, false),
            normalize(spelling, true, true),
        ];
        keys.iter()
            .find_map(|key| self.entries.get(key))
            .or_else(|| self.parent.and_then(|parent| parent.get(spelling)))
    }

    /// Every spelling known here or in the parent
    pub fn spellings(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        if let Some(parent) = self.parent {
            all.extend(parent.spellings());
        }
        all.sort_unstable();
        all.dedup();
        all
    }

    /// Resolve a full native spelling, template arguments included
    pub fn resolve(&self, spelling: &str, annotations: &Annotations) -> Result<TypeBinding, Diagnostic> {
        if let Some((kept, ignored)) = annotations.conflict() {
            return Err(Diagnostic::new(
                DiagnosticKind::ConflictingAnnotations { kept, ignored },
                Location::default(),
            ));
        }

        let (base, declarator) = parse_declarator(spelling);
        let unresolved = || Diagnostic::unresolved_type(spelling, Location::default(), &self.spellings());
        let mut binding = self.get(&base).cloned().ok_or_else(unresolved)?;
        binding.spelling = normalize(&base, true, false);
        binding.declarator = declarator;

        let args = template_args(&base);
        binding.template_args = args
            .iter()
            .map(|arg| self.resolve(arg, &Annotations::default()))
            .collect::<Result<_, _>>()?;
        if binding.adapter.as_deref() == Some(VECTOR_ADAPTER) && binding.template_args.is_empty() {
            return Err(unresolved());
        }
        Ok(binding)
    }

    /// Resolve and select in one step
    pub fn bind(&self, spelling: &str, annotations: &Annotations) -> Result<(ManagedType, Annotations), Diagnostic> {
        self.resolve(spelling, annotations)?
            .select(annotations)
            .ok_or_else(|| Diagnostic::unresolved_type(spelling, Location::default(), &[]))
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::new()
    }
}

fn is_punctuation(c: char) -> bool {
    matches!(c, '*' | '&' | '<' | '>' | ',' | ':' | '(' | ')')
}

/// Single spaces between words, none around punctuation
fn collapse_whitespace(spelling: &str) -> String {
    let mut out = String::with_capacity(spelling.len());
    let mut pending_space = false;
    for c in spelling.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space && !is_punctuation(c) && !out.ends_with(is_punctuation) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Cut the outermost template argument list
fn strip_template(spelling: &str) -> String {
    let mut out = String::with_capacity(spelling.len());
    let mut depth = 0usize;
    for c in spelling.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Top-level template arguments of `spelling`
pub fn template_args(spelling: &str) -> Vec<String> {
    let Some(open) = spelling.find('<') else {
        return Vec::new();
    };
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in spelling[open + 1..].chars() {
        match c {
            '<' | '(' => {
                depth += 1;
                current.push(c);
            }
            '>' | ')' if depth == 0 => break,
            '>' | ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);
    args.into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// Canonical form of a base spelling.
///
/// Qualifiers move to the front as `const volatile`, builtin integer
/// spellings collapse (`unsigned` → `unsigned int`, `long int` → `long`).
/// `unconst` drops `const`; `untemplate` drops the template argument list.
pub fn normalize(name: &str, unconst: bool, untemplate: bool) -> String {
    let mut name = collapse_whitespace(name);
    if untemplate {
        name = strip_template(&name);
    }

    let split = name.find('<').unwrap_or(name.len());
    let (head, tail) = name.split_at(split);
    let mut constant = false;
    let mut volatile = false;
    let words: Vec<&str> = head
        .split(' ')
        .filter(|word| match *word {
            "const" => {
                constant = true;
                false
            }
            "volatile" => {
                volatile = true;
                false
            }
            "" => false,
            _ => true,
        })
        .collect();

    let base = match words.join(" ").as_str() {
        "unsigned" => "unsigned int".to_string(),
        "signed" | "signed int" => "int".to_string(),
        "short int" | "signed short" | "signed short int" => "short".to_string(),
        "unsigned short int" => "unsigned short".to_string(),
        "long int" | "signed long" | "signed long int" => "long".to_string(),
        "unsigned long int" => "unsigned long".to_string(),
        "long long int" | "signed long long" | "signed long long int" => "long long".to_string(),
        "unsigned long long int" => "unsigned long long".to_string(),
        other => other.to_string(),
    };

    let mut out = String::new();
    if constant && !unconst {
        out.push_str("const ");
    }
    if volatile {
        out.push_str("volatile ");
    }
    out.push_str(&base);
    out.push_str(tail);
    out
}

/// Split `spelling` into its base and declarator
pub fn parse_declarator(spelling: &str) -> (String, Declarator) {
    let mut base = collapse_whitespace(spelling);
    let mut declarator = Declarator::default();

    loop {
        let trimmed = base.trim_end();
        if let Some(rest) = trimmed.strip_suffix('&') {
            declarator.reference = true;
            base = rest.to_string();
        } else if let Some(rest) = trimmed.strip_suffix('*') {
            declarator.pointers += 1;
            base = rest.to_string();
        } else if let Some(rest) = trimmed
            .strip_suffix("const")
            .filter(|rest| rest.ends_with(['*', '&', ' ']))
        {
            // `T* const` qualifies the pointer itself and is dropped
            if declarator.pointers > 0 || declarator.reference {
                declarator.constant = true;
            }
            base = rest.to_string();
        } else {
            break;
        }
    }

    let base = base.trim();
    let base = match base.strip_prefix("const ") {
        Some(rest) => {
            declarator.constant = true;
            rest.trim()
        }
        None => base,
    };
    (base.to_string(), declarator)
}
