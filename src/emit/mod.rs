//! C++ glue generation
//!
//! The emitter runs twice over the classified declarations. The first pass
//! renders into [`ir::Discard`] and only fills [`Tables`]: which function
//! structs, virtual subclasses, deallocators and member offsets the bodies
//! refer to, and whether exception translation or adapters are needed. The
//! second pass renders the bodies for real, after which the prelude is
//! rendered from the completed tables and placed in front of them.

mod callback;
mod header;
mod indexed;
pub mod ir;
pub mod mangle;
mod method;
mod prelude;

#[cfg(test)]
mod tests;

pub use indexed::IndexedSet;

use crate::classify::{self, ClassPlan};
use crate::config::Properties;
use crate::decl::{Annotations, ClassDecl, ClassKind, DeclarationSet, ManagedType};
use crate::errors::{Diagnostic, DiagnosticCollector, GenerateError, Result};
use crate::logging::{log_output_written, log_pass_complete};
use crate::types::{value_type_name, CppName, Names, STRING_ADAPTER};
use ir::{Builder, Collect, Discard, Fragment, Sink};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, info_span};

/// Everything discovered while rendering bodies
#[derive(Debug, Default)]
pub struct Tables {
    /// Classes whose `sizeof` and member offsets `np_module_load` registers
    pub classes: IndexedSet<String>,
    pub members: HashMap<String, IndexedSet<String>>,
    /// Function classes that need an `NP_` struct
    pub functions: IndexedSet<String>,
    pub deallocators: IndexedSet<String>,
    pub array_deallocators: IndexedSet<String>,
    /// Class → overridden method names
    pub virtual_functions: HashMap<String, IndexedSet<String>>,
    /// Class → member declarations of its `NP_` subclass
    pub virtual_members: HashMap<String, IndexedSet<String>>,
    /// Static trampoline instances
    pub callbacks: IndexedSet<String>,
    /// Prototypes of exported functions, for the header
    pub exports: IndexedSet<String>,
    pub entry_points: IndexedSet<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub may_throw: bool,
    pub uses_adapters: bool,
}

/// Adapter resolved for one parameter or return value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInformation {
    /// Full C++ type, template argument included
    pub name: String,
    /// Number of native arguments the adapter consumes
    pub argc: usize,
    pub cast: String,
    pub constant: bool,
}

/// Read-only view the emitter works against
pub struct Context<'d> {
    pub decls: &'d DeclarationSet,
    pub names: Names<'d>,
    pub properties: &'d Properties,
}

impl<'d> Context<'d> {
    pub fn new(decls: &'d DeclarationSet, properties: &'d Properties) -> Self {
        Self {
            decls,
            names: Names::new(decls),
            properties,
        }
    }

    pub fn class_of(&self, ty: &ManagedType) -> Option<&'d ClassDecl> {
        ty.handle_name().and_then(|name| self.decls.class(name))
    }

    /// Opaque handles carry no position
    pub fn is_opaque(&self, ty: &ManagedType) -> bool {
        self.class_of(ty).map_or(false, |class| class.kind == ClassKind::Opaque)
    }

    pub fn is_function(&self, ty: &ManagedType) -> bool {
        self.class_of(ty).map_or(false, |class| class.kind == ClassKind::Function)
    }

    /// Classes with virtual methods are allocated as their `NP_` subclass
    pub fn has_virtual(&self, class: &ClassDecl) -> bool {
        class.kind == ClassKind::Struct && class.has_virtual_methods()
    }

    pub fn abi_param_type(&self, ty: &ManagedType) -> &'static str {
        abi_type(ty, false)
    }

    pub fn abi_return_type(&self, ty: &ManagedType) -> &'static str {
        abi_type(ty, true)
    }

    /// `NP_<mangled value type>`, the subclass overriding virtual methods
    pub fn subclass_name(&self, class: &ClassDecl) -> Option<String> {
        let name = self.names.cpp_type_name(&ManagedType::handle(class.name.clone()))?;
        Some(format!("NP_{}", mangle::mangle(&value_type_name(&name))))
    }

    /// Adapter wrapped around a value of native type `value_type`.
    ///
    /// `out` asks about copying results back to the caller, which constant
    /// adapters never do.
    pub fn adapter_information(
        &self,
        out: bool,
        value_type: Option<&str>,
        annotations: &Annotations,
    ) -> Option<AdapterInformation> {
        let adapter = annotations.adapter.as_ref()?;
        let constant = adapter.constant || annotations.constant;
        if out && constant {
            return None;
        }
        let value = match adapter.value_type.as_deref() {
            Some(value) => Some(value),
            None if adapter.name == STRING_ADAPTER => None,
            None => value_type,
        };
        let name = match value.filter(|v| !v.is_empty()) {
            Some(value) => format!("{}< {} >", adapter.name, value),
            None => adapter.name.clone(),
        };
        Some(AdapterInformation {
            name,
            argc: adapter.argc.max(1),
            cast: adapter.cast.clone().unwrap_or_default(),
            constant,
        })
    }

    /// Adapter of parameter `j`; string parameters and setters copy nothing back
    pub fn param_adapter(&self, out: bool, info: &classify::MethodInformation<'d>, j: usize) -> Option<AdapterInformation> {
        let param = &info.params()[j];
        if out && (param.ty == ManagedType::String || info.is_setter()) {
            return None;
        }
        let annotations = info.param_annotations(j);
        let cast = self.names.cast(&param.ty, annotations);
        let type_name = match cast.strip_prefix('(').and_then(|c| c.strip_suffix(')')) {
            Some(inner) if !inner.is_empty() => Some(CppName::new(inner)),
            _ => self.names.cpp_cast_type_name(&param.ty, annotations),
        };
        let value = type_name.map(|name| value_type_name(&name));
        self.adapter_information(out, value.as_deref(), annotations)
    }
}

fn abi_type(ty: &ManagedType, is_return: bool) -> &'static str {
    match ty {
        ManagedType::Void => "void",
        ManagedType::Primitive(p) => p.abi_name(),
        ManagedType::Array(_) | ManagedType::Buffer(_) => "np_array",
        ManagedType::String if is_return => "char*",
        ManagedType::String => "const char*",
        ManagedType::Class => "np_class",
        ManagedType::Handle(_) => "np_handle*",
    }
}

/// Value returned when an entry bails out early
pub fn zero_value(ty: &ManagedType) -> &'static str {
    match ty {
        ManagedType::Void => "",
        ManagedType::Array(_) | ManagedType::Buffer(_) => "np_array()",
        _ => "0",
    }
}

/// Renders class bodies; one instance per pass
pub(crate) struct Emitter<'a, 'd> {
    ctx: &'a Context<'d>,
    tables: &'a mut Tables,
}

impl<'a, 'd> Emitter<'a, 'd> {
    pub(crate) fn new(ctx: &'a Context<'d>, tables: &'a mut Tables) -> Self {
        Self { ctx, tables }
    }

    fn diagnose(&mut self, diagnostic: Diagnostic) {
        self.tables.diagnostics.push(diagnostic);
    }

    /// Entry points, trampolines and overrides of one class
    pub(crate) fn class(&mut self, plan: &ClassPlan<'d>) -> Fragment {
        let class = plan.class;
        self.tables.diagnostics.extend(plan.diagnostics.iter().cloned());

        if class.kind == ClassKind::Struct {
            self.tables.classes.index(class.name.clone());
            self.tables
                .members
                .entry(class.name.clone())
                .or_default()
                .index("sizeof".to_string());
        }

        let mut b = Builder::new();
        let mut first_callback = true;
        for info in &plan.methods {
            let overrides = info.method.is_virtual && !info.is_member_access() && !info.is_value_access();
            if overrides || (info.is_allocator() && self.ctx.has_virtual(class)) {
                self.virtual_member(&mut b, info);
            }
            if info.behavior == crate::decl::Behavior::Callback {
                let Some(function_method) = plan.function_method else {
                    continue;
                };
                if !self.callback(&mut b, info, function_method, first_callback) {
                    continue;
                }
                first_callback = false;
            }
            if !info.method.native {
                continue;
            }
            if info.is_member_access() && !info.no_offset && !info.is_static() && class.kind == ClassKind::Struct {
                if let Some(member) = info.member_name.first() {
                    self.tables
                        .members
                        .entry(class.name.clone())
                        .or_default()
                        .index(member.clone());
                }
            }
            if let Some(entry) = self.entry(info) {
                b.push(entry);
                b.blank();
            }
        }
        b.into_fragment()
    }
}

/// Output of one generator run
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    pub module: String,
    pub source: String,
    pub header: Option<String>,
    /// Skipped declarations and other warnings
    pub diagnostics: Vec<Diagnostic>,
    pub entry_points: Vec<String>,
}

impl GeneratedModule {
    /// Write the source and, when both exist, the header
    pub fn write(&self, source_path: &Path, header_path: Option<&Path>) -> Result<()> {
        write_file(source_path, &self.source)?;
        if let (Some(path), Some(header)) = (header_path, &self.header) {
            write_file(path, header)?;
        }
        Ok(())
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| GenerateError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| GenerateError::io(path, e))?;
    log_output_written(path, content.len());
    Ok(())
}

/// Two-pass generator over prepared declarations
pub struct Generator<'d> {
    decls: &'d DeclarationSet,
    properties: &'d Properties,
    header: bool,
}

impl<'d> Generator<'d> {
    pub fn new(decls: &'d DeclarationSet, properties: &'d Properties) -> Self {
        Self {
            decls,
            properties,
            header: false,
        }
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn generate(&self) -> GeneratedModule {
        let platform = self.properties.platform();
        let _span = info_span!("generate", module = %self.decls.module(), platform = %platform).entered();

        let ctx = Context::new(self.decls, self.properties);
        let plans = classify::classify_all(self.decls, &platform);
        let methods: usize = plans.iter().map(|plan| plan.methods.len()).sum();
        let mut tables = Tables::default();

        let start = Instant::now();
        run_pass(&ctx, &plans, &mut tables, &mut Discard);
        log_pass_complete(1, plans.len(), methods, start.elapsed());

        tables.diagnostics.clear();
        let start = Instant::now();
        let mut body = Collect::new();
        run_pass(&ctx, &plans, &mut tables, &mut body);
        log_pass_complete(2, plans.len(), methods, start.elapsed());

        let mut source = prelude::render(&ctx, &mut tables).render();
        source.push_str(&body.render());
        source.push_str("}\n");

        let header = self.header.then(|| header::render(&ctx, &tables).render());
        let entry_points: Vec<String> = tables.entry_points.iter().cloned().collect();
        info!(
            target: "nativeport::generate",
            module = %self.decls.module(),
            entry_points = entry_points.len(),
            skipped = tables.diagnostics.len(),
            "module generated"
        );
        GeneratedModule {
            module: self.decls.module().to_string(),
            source,
            header,
            diagnostics: tables.diagnostics,
            entry_points,
        }
    }
}

fn run_pass<'d>(ctx: &Context<'d>, plans: &[ClassPlan<'d>], tables: &mut Tables, sink: &mut dyn Sink) {
    let mut emitter = Emitter::new(ctx, tables);
    for plan in plans {
        let fragment = emitter.class(plan);
        if !fragment.is_empty() {
            sink.emit(fragment);
        }
    }
    debug!(
        target: "nativeport::generate",
        functions = tables.functions.len(),
        deallocators = tables.deallocators.len(),
        callbacks = tables.callbacks.len(),
        "pass tables"
    );
}

/// Prepare `decls` and generate its module.
///
/// Declaration errors abort; warnings are returned with the module.
pub fn generate(decls: &mut DeclarationSet, properties: &Properties, header: bool) -> Result<GeneratedModule> {
    let mut diagnostics = DiagnosticCollector::new();
    decls.prepare(&mut diagnostics);
    if diagnostics.has_errors() {
        return Err(GenerateError::Declarations(diagnostics.into_diagnostics()));
    }
    let mut module = Generator::new(decls, properties).with_header(header).generate();
    let mut all = diagnostics.into_diagnostics();
    all.append(&mut module.diagnostics);
    module.diagnostics = all;
    Ok(module)
}
