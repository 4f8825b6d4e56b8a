//! Binding generator for nativeport address handles
//!
//! Declarations of managed classes and their native methods go in, a C++
//! translation unit implementing every method against the `np_env` ABI of
//! `nativeport-runtime` comes out.

// Core modules
pub mod classify;
pub mod cli;
pub mod config;
pub mod decl;
pub mod emit;
pub mod errors;
pub mod logging;
pub mod types;

// Re-export commonly used items
pub use config::{GeneratorConfig, Properties};
pub use decl::DeclarationSet;
pub use emit::{generate, GeneratedModule, Generator};
pub use errors::{Diagnostic, DiagnosticCollector, DiagnosticKind, GenerateError, Result};
