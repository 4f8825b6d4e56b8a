//! Declarations: the classes and native methods to generate glue for
//!
//! A [`DeclarationSet`] is built in code with the builder methods or loaded
//! from a TOML or JSON [`DeclarationFile`]. [`DeclarationSet::prepare`]
//! resolves native spellings through a [`TypeMap`] and drops declarations
//! that cannot be generated, reporting each one as a diagnostic.

mod builder;
mod model;


pub use model::*;

use crate::errors::{Diagnostic, DiagnosticCollector, DiagnosticKind, GenerateError, Location, Result};
use crate::types::{Names, TypeBinding, TypeMap};
use nativeport_runtime::HandleKind;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct DeclarationSet {
    module: String,
    classes: Vec<ClassDecl>,
    rules: Vec<TypeRule>,
    index: HashMap<String, usize>,
}

impl DeclarationSet {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn from_file_contents(file: DeclarationFile, fallback_module: &str) -> Self {
        let mut set = Self::new(file.module.unwrap_or_else(|| fallback_module.to_string()));
        set.rules = file.types;
        for class in file.classes {
            set.push_class(class);
        }
        set
    }

    /// Load a `.toml` or `.json` declaration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| GenerateError::io(path, e))?;
        let parse_error = |message: String| GenerateError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let file: DeclarationFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("nativeport");
        let set = Self::from_file_contents(file, stem);
        info!(
            target: "nativeport::decl",
            path = %path.display(),
            classes = set.classes.len(),
            "declarations loaded"
        );
        Ok(set)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: DeclarationFile = toml::from_str(content).map_err(|e| GenerateError::Parse {
            path: "<toml>".into(),
            message: e.to_string(),
        })?;
        Ok(Self::from_file_contents(file, "nativeport"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: DeclarationFile = serde_json::from_str(content).map_err(|e| GenerateError::Parse {
            path: "<json>".into(),
            message: e.to_string(),
        })?;
        Ok(Self::from_file_contents(file, "nativeport"))
    }

    pub fn to_file(&self) -> DeclarationFile {
        DeclarationFile {
            module: Some(self.module.clone()),
            types: self.rules.clone(),
            classes: self.classes.clone(),
        }
    }

    pub fn with_class(mut self, class: ClassDecl) -> Self {
        self.push_class(class);
        self
    }

    pub fn with_type(mut self, rule: TypeRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn push_class(&mut self, class: ClassDecl) {
        self.index.entry(class.name.clone()).or_insert(self.classes.len());
        self.classes.push(class);
    }

    /// Append another set; its classes come after ours
    pub fn merge(&mut self, other: DeclarationSet) {
        self.rules.extend(other.rules);
        for class in other.classes {
            self.push_class(class);
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn set_module(&mut self, module: impl Into<String>) {
        self.module = module.into();
    }

    pub fn classes(&self) -> &[ClassDecl] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.index.get(name).map(|&i| &self.classes[i])
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    /// Type map with the user rules and every declared class on top of the
    /// defaults
    pub fn type_map(&self) -> TypeMap {
        let mut map = TypeMap::new();
        let names = Names::new(self);
        for class in self.classes.iter().filter(|c| !matches!(c.kind, ClassKind::Namespace | ClassKind::Function)) {
            let handle = ManagedType::handle(class.name.clone());
            let mut binding = TypeBinding::new().with_pointers([handle.clone()]);
            if class.kind == ClassKind::Struct {
                binding = binding.with_value(handle);
            }
            map.put(&names.cpp_scope_name(class), binding);
        }
        for rule in &self.rules {
            let mut binding = TypeBinding::new().with_pointers(rule.pointers.iter().cloned());
            binding.value = rule.value.clone();
            binding.cast = rule.cast;
            binding.array_element = rule.array_element;
            binding.adapter = rule.adapter.clone();
            map.put(&rule.native, binding);
        }
        map
    }

    /// Resolve native spellings and drop what cannot be generated.
    ///
    /// Duplicate classes are errors; everything else is a warning and the
    /// offending class or method is removed.
    pub fn prepare(&mut self, diagnostics: &mut DiagnosticCollector) {
        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.name.as_str()) {
                diagnostics.add(Diagnostic::new(
                    DiagnosticKind::DuplicateClass {
                        name: class.name.clone(),
                    },
                    Location::class(&class.name),
                ));
            }
        }

        let before = self.classes.len();
        self.classes.retain(|class| {
            let valid = !class.name.is_empty() && !class.name.contains(char::is_whitespace);
            if !valid {
                diagnostics.add(Diagnostic::new(
                    DiagnosticKind::InvalidDeclaration {
                        reason: format!("bad class name {:?}", class.name),
                    },
                    Location::class(&class.name),
                ));
            }
            valid
        });
        if self.classes.len() != before {
            self.reindex();
        }

        let types = self.type_map();
        let known: HashSet<String> = self
            .classes
            .iter()
            .map(|c| c.name.clone())
            .chain(HandleKind::builtin_class_names().map(str::to_string))
            .collect();
        let candidates: Vec<String> = known.iter().cloned().collect();
        let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();

        for class in &mut self.classes {
            if let Some(enclosing) = class.enclosing.as_deref() {
                if !known.contains(enclosing) {
                    diagnostics.add(Diagnostic::unknown_class(enclosing, Location::class(&class.name), &candidates));
                    class.enclosing = None;
                }
            }
            let class_name = class.name.clone();
            let kind = class.kind;
            class.methods.retain_mut(|method| {
                match prepare_method(&class_name, kind, method, &types, &known, &candidates) {
                    Ok(()) => true,
                    Err(diagnostic) => {
                        diagnostics.add(diagnostic);
                        false
                    }
                }
            });
        }
        debug!(
            target: "nativeport::decl",
            classes = self.classes.len(),
            methods = self.method_count(),
            "declarations prepared"
        );
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, class) in self.classes.iter().enumerate() {
            self.index.entry(class.name.clone()).or_insert(i);
        }
    }
}

fn prepare_method(
    class: &str,
    kind: ClassKind,
    method: &mut MethodDecl,
    types: &TypeMap,
    known: &HashSet<String>,
    candidates: &[&str],
) -> std::result::Result<(), Diagnostic> {
    let location = Location::method(class, &method.name);
    let invalid = |reason: String| Diagnostic::new(DiagnosticKind::InvalidDeclaration { reason }, location.clone());

    if method.name.is_empty() {
        return Err(invalid("method without a name".to_string()));
    }
    if kind == ClassKind::Namespace && !method.is_static {
        return Err(invalid("free functions must be static".to_string()));
    }
    if method.cpp_name.len() > 3 {
        return Err(invalid("cpp_name takes at most a name, a prefix and a suffix".to_string()));
    }

    for (i, param) in method.params.iter_mut().enumerate() {
        let at = location.clone().with_parameter(i);
        if let Some(native) = param.native.clone() {
            let (ty, annotations) = types.bind(&native, &param.annotations).map_err(|d| at_location(d, at.clone()))?;
            if param.ty.is_void() {
                param.ty = ty;
            }
            param.annotations = annotations;
        } else if param.ty.is_void() {
            return Err(invalid(format!("parameter {} has no type", i)));
        }
        check_annotations(&param.annotations, at.clone())?;
        check_handle(&param.ty, known, candidates, at)?;
    }

    if let Some(native) = method.returns_native.clone() {
        let (ty, annotations) = types
            .bind(&native, &method.annotations)
            .map_err(|d| at_location(d, location.clone()))?;
        if method.returns.is_void() {
            method.returns = ty;
        }
        method.annotations = annotations;
    }
    check_annotations(&method.annotations, location.clone())?;
    check_handle(&method.returns, known, candidates, location)
}

fn at_location(mut diagnostic: Diagnostic, location: Location) -> Diagnostic {
    diagnostic.location = location;
    diagnostic
}

fn check_annotations(annotations: &Annotations, location: Location) -> std::result::Result<(), Diagnostic> {
    match annotations.conflict() {
        Some((kept, ignored)) => Err(Diagnostic::new(
            DiagnosticKind::ConflictingAnnotations { kept, ignored },
            location,
        )),
        None => Ok(()),
    }
}

fn check_handle(
    ty: &ManagedType,
    known: &HashSet<String>,
    candidates: &[&str],
    location: Location,
) -> std::result::Result<(), Diagnostic> {
    match ty.handle_name() {
        Some(name) if !known.contains(name) => Err(Diagnostic::unknown_class(name, location, candidates)),
        _ => Ok(()),
    }
}
