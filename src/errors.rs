use std::fmt;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Where a diagnostic points: a class, optionally one of its methods and
/// one parameter of that method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub class: String,
    pub method: Option<String>,
    pub parameter: Option<usize>,
}

impl Location {
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: None,
            parameter: None,
        }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: Some(method.into()),
            parameter: None,
        }
    }

    pub fn with_parameter(mut self, index: usize) -> Self {
        self.parameter = Some(index);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)?;
        if let Some(method) = &self.method {
            write!(f, ".{}", method)?;
        }
        if let Some(index) = self.parameter {
            write!(f, "(arg{})", index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnsupportedBehavior { behavior: String },
    ConflictingAnnotations { kept: String, ignored: String },
    UnresolvedType { spelling: String },
    UnsupportedParameter { ty: String },
    UnsupportedReturn { ty: String },
    MissingFunctionMethod,
    UnknownClass { name: String },
    DuplicateClass { name: String },
    InvalidDeclaration { reason: String },
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::DuplicateClass { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedBehavior { behavior } => {
                write!(f, "Method cannot behave like a \"{}\". No code will be generated.", behavior)
            }
            Self::ConflictingAnnotations { kept, ignored } => {
                write!(f, "Annotation \"{}\" conflicts with \"{}\". No code will be generated.", ignored, kept)
            }
            Self::UnresolvedType { spelling } => {
                write!(f, "No mapping for native type \"{}\"", spelling)
            }
            Self::UnsupportedParameter { ty } => {
                write!(f, "Parameter of type {} is not supported. No code will be generated.", ty)
            }
            Self::UnsupportedReturn { ty } => {
                write!(f, "Return type {} is not supported. No code will be generated.", ty)
            }
            Self::MissingFunctionMethod => {
                write!(f, "Function pointer class has no call or apply method. No callback will be generated.")
            }
            Self::UnknownClass { name } => {
                write!(f, "Unknown handle class: {}", name)
            }
            Self::DuplicateClass { name } => {
                write!(f, "Class declared more than once: {}", name)
            }
            Self::InvalidDeclaration { reason } => {
                write!(f, "Invalid declaration: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Location,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, location: Location) -> Self {
        Self {
            kind,
            location,
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn unknown_class(name: &str, location: Location, candidates: &[&str]) -> Self {
        let similar = find_similar_names(name, candidates, 3);
        let suggestions = similar
            .iter()
            .take(3)
            .map(|s| format!("Did you mean '{}'?", s))
            .collect();
        Self::new(
            DiagnosticKind::UnknownClass {
                name: name.to_string(),
            },
            location,
        )
        .with_suggestions(suggestions)
    }

    pub fn unresolved_type(spelling: &str, location: Location, candidates: &[&str]) -> Self {
        let mut diagnostic = Self::new(
            DiagnosticKind::UnresolvedType {
                spelling: spelling.to_string(),
            },
            location,
        );
        if let Some(similar) = find_similar_names(spelling, candidates, 2).first() {
            diagnostic = diagnostic.with_suggestion(format!("Did you mean '{}'?", similar));
        }
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity() {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", self.location, label, self.kind)?;
        for suggestion in &self.suggestions {
            write!(f, "\n  hint: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Gathers diagnostics during loading, classification and emission.
///
/// Warnings and errors are kept apart; only errors make a run fail.
#[derive(Debug)]
pub struct DiagnosticCollector {
    warnings: Vec<Diagnostic>,
    errors: Vec<Diagnostic>,
    max_errors: usize,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::with_max_errors(100)
    }

    pub fn with_max_errors(max_errors: usize) -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
            max_errors,
        }
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => {
                warn!(
                    target: "nativeport::generate",
                    location = %diagnostic.location,
                    "{}",
                    diagnostic.kind
                );
                self.warnings.push(diagnostic);
            }
            Severity::Error => {
                if self.errors.len() < self.max_errors {
                    self.errors.push(diagnostic);
                }
            }
        }
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.add(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Errors first, then warnings
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        let mut all = self.errors;
        all.extend(self.warnings);
        all
    }

    pub fn clear(&mut self) {
        self.warnings.clear();
        self.errors.clear();
    }
}

impl Default for DiagnosticCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Fatal generator failures
#[derive(Debug)]
pub enum GenerateError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, message: String },
    Config(String),
    Declarations(Vec<Diagnostic>),
}

impl GenerateError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Parse { path, message } => {
                write!(f, "Failed to parse {}: {}", path.display(), message)
            }
            Self::Config(message) => write!(f, "Invalid configuration: {}", message),
            Self::Declarations(errors) => {
                write!(f, "{} invalid declaration(s)", errors.len())?;
                for error in errors {
                    write!(f, "\n{}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for GenerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerateError>;

/// Levenshtein distance between two strings
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Candidates within `max_distance` edits of `target`, closest first
pub fn find_similar_names(target: &str, candidates: &[&str], max_distance: usize) -> Vec<String> {
    let mut matches: Vec<(usize, &str)> = candidates
        .iter()
        .filter(|candidate| **candidate != target)
        .map(|candidate| (levenshtein_distance(target, candidate), *candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .collect();

    matches.sort();
    matches.into_iter().map(|(_, name)| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("Vector", "Vectro"), 2);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("IntPointer", ""), 10);
    }

    #[test]
    fn test_similar_names_sorted_by_distance() {
        let candidates = ["demo.Vector", "demo.Vec", "demo.Matrix"];
        let similar = find_similar_names("demo.Vectr", &candidates, 3);
        assert_eq!(similar, vec!["demo.Vector".to_string(), "demo.Vec".to_string()]);
    }

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic::unknown_class(
            "demo.Vectr",
            Location::method("demo.Holder", "get").with_parameter(0),
            &["demo.Vector"],
        );
        assert_eq!(
            diagnostic.to_string(),
            "demo.Holder.get(arg0): warning: Unknown handle class: demo.Vectr\n  hint: Did you mean 'demo.Vector'?"
        );
    }

    #[test]
    fn test_collector_separates_severities() {
        let mut collector = DiagnosticCollector::with_max_errors(1);
        collector.add(Diagnostic::new(
            DiagnosticKind::MissingFunctionMethod,
            Location::class("demo.Callback"),
        ));
        for name in ["a", "b"] {
            collector.add(Diagnostic::new(
                DiagnosticKind::DuplicateClass { name: name.into() },
                Location::class(name),
            ));
        }

        assert!(collector.has_errors());
        assert_eq!(collector.error_count(), 1);
        assert_eq!(collector.warning_count(), 1);
        let all = collector.into_diagnostics();
        assert_eq!(all[0].severity(), Severity::Error);
    }
}
