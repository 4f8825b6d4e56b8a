use crate::config::GeneratorConfig;
use crate::decl::DeclarationSet;
use crate::emit::{generate, mangle};
use crate::errors::{GenerateError, Result};
use crate::logging::{init_cli_logging, init_logging};
use std::path::PathBuf;
use tracing::{error, info};

const USAGE: &str = "Usage: nativeport [OPTIONS] <declarations.toml|json>...\n\nOptions:\n  \
     --output FILE    Generated C++ source (default: <module>.cpp)\n  \
     --header FILE    Also write a header with the exported entry points\n  \
     --config FILE    Generator config (default: nearest nativeport.toml)\n  \
     --module NAME    Module name, overrides the declaration files\n  \
     --platform NAME  Target platform, e.g. linux-x86_64\n  \
     --verbose        Debug logging";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub paths: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub header: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub module: Option<String>,
    pub platform: Option<String>,
    pub verbose: bool,
}

pub struct Cli {
    config: CliConfig,
}

impl Cli {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    /// Generator config from `--config`, the nearest `nativeport.toml`, or
    /// the defaults
    pub fn load_settings(&self) -> Result<GeneratorConfig> {
        if let Some(path) = &self.config.config {
            return GeneratorConfig::load(path);
        }
        Ok(GeneratorConfig::discover()
            .map(|(_, config)| config)
            .unwrap_or_default())
    }

    /// Declaration files named on the command line, else the config's globs
    fn declaration_files(&self, settings: &GeneratorConfig) -> Result<Vec<PathBuf>> {
        if !self.config.paths.is_empty() {
            return Ok(self.config.paths.clone());
        }
        settings.declaration_files()
    }

    fn load_declarations(&self, settings: &GeneratorConfig) -> Result<DeclarationSet> {
        let files = self.declaration_files(settings)?;
        let mut files = files.iter();
        let first = files
            .next()
            .ok_or_else(|| GenerateError::Config("No declaration files given".to_string()))?;
        let mut decls = DeclarationSet::load(first)?;
        for path in files {
            decls.merge(DeclarationSet::load(path)?);
        }
        if let Some(module) = self.config.module.as_ref().or(settings.output.module.as_ref()) {
            decls.set_module(module.clone());
        }
        Ok(decls)
    }

    pub fn run(&self, settings: &GeneratorConfig) -> Result<i32> {
        let mut decls = self.load_declarations(settings)?;
        let mut properties = settings.properties();
        if let Some(platform) = &self.config.platform {
            properties.set("platform", [platform.clone()]);
        }

        let header_path = self.config.header.clone().or_else(|| settings.output.header.clone());
        let module = generate(&mut decls, &properties, header_path.is_some())?;

        for diagnostic in &module.diagnostics {
            eprintln!("{}", diagnostic);
        }
        if settings.output.fail_on_warnings && !module.diagnostics.is_empty() {
            error!(
                target: "nativeport::generate",
                skipped = module.diagnostics.len(),
                "declarations skipped and fail_on_warnings is set"
            );
            return Ok(1);
        }

        let source_path = self
            .config
            .output
            .clone()
            .or_else(|| settings.output.source.clone())
            .unwrap_or_else(|| default_source_path(&module.module));
        module.write(&source_path, header_path.as_deref())?;

        info!(
            target: "nativeport::generate",
            module = %module.module,
            entry_points = module.entry_points.len(),
            "done"
        );
        println!(
            "Generated {} entry point{} for {} into {}",
            module.entry_points.len(),
            if module.entry_points.len() == 1 { "" } else { "s" },
            module.module,
            source_path.display()
        );
        Ok(0)
    }
}

fn default_source_path(module: &str) -> PathBuf {
    PathBuf::from(format!("{}.cpp", mangle::mangle(module)))
}

pub fn parse_args(args: &[String]) -> std::result::Result<CliConfig, String> {
    if args.len() < 2 {
        return Err(USAGE.to_string());
    }

    let mut config = CliConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => return Err(USAGE.to_string()),
            option @ ("--output" | "--header" | "--config" | "--module" | "--platform") => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| format!("{} requires an argument", option))?
                    .clone();
                match option {
                    "--output" => config.output = Some(PathBuf::from(value)),
                    "--header" => config.header = Some(PathBuf::from(value)),
                    "--config" => config.config = Some(PathBuf::from(value)),
                    "--module" => config.module = Some(value),
                    _ => config.platform = Some(value),
                }
            }
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            path => {
                config.paths.push(PathBuf::from(path));
            }
        }
        i += 1;
    }

    if config.paths.is_empty() && config.config.is_none() {
        return Err("No declaration files specified".to_string());
    }

    Ok(config)
}

/// Entry point for the CLI binary
pub fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;
    let cli = Cli::new(config);
    let settings = cli.load_settings()?;

    let guard = if cli.config.verbose {
        init_cli_logging(true)
    } else {
        init_logging(settings.log_config())
    };
    let exit_code = cli.run(&settings);
    drop(guard);
    std::process::exit(exit_code?);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("nativeport")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let config = parse_args(&args(&[
            "decls.toml",
            "--output",
            "out/glue.cpp",
            "--header",
            "out/glue.h",
            "--verbose",
            "more.json",
        ]))
        .unwrap();
        assert_eq!(config.paths, vec![PathBuf::from("decls.toml"), PathBuf::from("more.json")]);
        assert_eq!(config.output, Some(PathBuf::from("out/glue.cpp")));
        assert_eq!(config.header, Some(PathBuf::from("out/glue.h")));
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&[])).unwrap_err().starts_with("Usage"));
        assert_eq!(parse_args(&args(&["--output"])).unwrap_err(), "--output requires an argument");
        assert_eq!(parse_args(&args(&["--fast", "a.toml"])).unwrap_err(), "Unknown option: --fast");
        assert_eq!(parse_args(&args(&["--verbose"])).unwrap_err(), "No declaration files specified");
    }

    #[test]
    fn test_config_alone_is_enough() {
        let config = parse_args(&args(&["--config", "nativeport.toml", "--platform", "linux-arm64"])).unwrap();
        assert!(config.paths.is_empty());
        assert_eq!(config.platform.as_deref(), Some("linux-arm64"));
    }

    #[test]
    fn test_default_source_path() {
        assert_eq!(default_source_path("demo.vectors"), PathBuf::from("demo_vectors.cpp"));
    }
}
