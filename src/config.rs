use crate::errors::{GenerateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "nativeport.toml";

/// Flat key → values map describing the target platform.
///
/// Keys follow the `platform.*` naming: `platform`, `platform.define`,
/// `platform.include`, `platform.cinclude`, `platform.library.prefix`,
/// `platform.library.suffix`, `platform.path.separator`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, Vec<String>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of `key`
    pub fn get_one(&self, key: &str) -> Option<&str> {
        self.get(key).first().map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.values.insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.set(key, values);
        self
    }

    /// Platform name, `linux-x86_64` style, defaulting to the host
    pub fn platform(&self) -> String {
        self.get_one("platform").map(str::to_string).unwrap_or_else(host_platform)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Host platform as `<os>-<arch>`, with `macos` spelled `macosx`
pub fn host_platform() -> String {
    let os = match std::env::consts::OS {
        "macos" => "macosx",
        other => other,
    };
    format!("{}-{}", os, std::env::consts::ARCH)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    One(String),
    Many(Vec<String>),
}

impl PropertyValue {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// `[platform]` table; `name` becomes `platform`, every other key gets
    /// the `platform.` prefix
    #[serde(default)]
    pub platform: BTreeMap<String, PropertyValue>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Glob patterns of declaration files, relative to the config file
    #[serde(default)]
    pub declarations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub header: Option<PathBuf>,

    /// Module name; defaults to the declaration file's own
    #[serde(default)]
    pub module: Option<String>,

    /// Treat skipped declarations as fatal
    #[serde(default)]
    pub fail_on_warnings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            source: None,
            header: None,
            module: None,
            fail_on_warnings: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            directory: None,
            filter: None,
        }
    }
}

fn default_level() -> String { "warn".to_string() }
fn default_format() -> String { "compact".to_string() }

impl GeneratorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| GenerateError::io(path, e))?;
        let mut config = Self::parse(&content)?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GenerateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Find `nativeport.toml` in the current directory or its parents
    pub fn discover() -> Option<(PathBuf, Self)> {
        let current = std::env::current_dir().ok()?;
        Self::discover_from(&current)
    }

    pub fn discover_from(start: &Path) -> Option<(PathBuf, Self)> {
        let mut current = Some(start.to_path_buf());
        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return Some((config_path, config));
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }
        None
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(source) = self.output.source.as_mut() {
            join(source);
        }
        if let Some(header) = self.output.header.as_mut() {
            join(header);
        }
        for pattern in &mut self.input.declarations {
            if Path::new(pattern.as_str()).is_relative() {
                *pattern = base.join(&*pattern).to_string_lossy().into_owned();
            }
        }
    }

    /// Declaration files matched by the input globs, sorted and deduplicated
    pub fn declaration_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.input.declarations {
            let paths = glob::glob(pattern)
                .map_err(|e| GenerateError::Config(format!("Bad declaration pattern {:?}: {}", pattern, e)))?;
            for entry in paths {
                let path = entry.map_err(|e| GenerateError::io(e.path().to_path_buf(), e.into_error()))?;
                files.push(path);
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    pub fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        for (key, value) in &self.platform {
            let key = match key.as_str() {
                "name" | "platform" => "platform".to_string(),
                other if other.starts_with("platform.") => other.to_string(),
                other => format!("platform.{}", other),
            };
            properties.set(key, value.clone().into_vec());
        }
        properties
    }

    pub fn log_config(&self) -> crate::logging::LogConfig {
        use crate::logging::{LogConfig, LogFormat, LogOutput};
        let level = self.logging.level.parse().unwrap_or(tracing::Level::WARN);
        let mut config = LogConfig::new()
            .with_level(level)
            .with_format(LogFormat::parse(&self.logging.format).unwrap_or(LogFormat::Compact));
        if let Some(directory) = &self.logging.directory {
            config = config.with_output(LogOutput::File {
                directory: directory.clone(),
                prefix: "nativeport.log".to_string(),
            });
        }
        if let Some(filter) = &self.logging.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }

    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GenerateError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content).map_err(|e| GenerateError::io(path, e))
    }
}
