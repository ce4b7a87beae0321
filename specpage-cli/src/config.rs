use anyhow::Result;
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use specpage_core::{ServerConfig, SiteConfig};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "./specpage.toml";

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SpecpageConfig {
    pub build: BuildConfig,
    pub site: SiteConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory holding the specification sources
    pub input: String,
    /// Directory the pages are written to
    pub output: String,
    /// Configuration file path
    pub config: String,
    /// Quiet period before a rebuild starts
    pub debounce_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            input: "./specs".to_string(),
            output: "./docs".to_string(),
            config: DEFAULT_CONFIG_FILE.to_string(),
            debounce_ms: 2000,
        }
    }
}

/// CLI argument id → configuration key. Commands only define some of them.
const ARG_KEYS: &[(&str, &str)] = &[
    ("input", "build.input"),
    ("output", "build.output"),
    ("config", "build.config"),
    ("debounce-ms", "build.debounce_ms"),
    ("title", "site.title"),
    ("theme", "site.theme_dir"),
    ("host", "server.host"),
    ("port", "server.port"),
    ("server", "server.mode"),
];

impl SpecpageConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (SPECPAGE_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let config_file = optional_arg(args, "config").unwrap_or(DEFAULT_CONFIG_FILE);

        let mut builder = ConfigBuilder::builder();

        builder = builder.add_source(ConfigBuilder::try_from(&Self::default())?);

        if Path::new(config_file).exists() {
            tracing::debug!(file = config_file, "reading configuration file");
            builder = builder.add_source(File::from(Path::new(config_file)));
        }

        builder = builder.add_source(
            Environment::with_prefix("SPECPAGE")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut cli_overrides = HashMap::new();
        for (arg, key) in ARG_KEYS {
            if let Some(value) = optional_arg(args, arg) {
                cli_overrides.insert(key.to_string(), value.to_string());
            }
        }
        if args.try_get_one::<bool>("open").ok().flatten() == Some(&true) {
            cli_overrides.insert("server.open".to_string(), "true".to_string());
        }
        if !cli_overrides.is_empty() {
            builder = builder.add_source(ConfigBuilder::try_from(&cli_overrides)?);
        }

        let config: SpecpageConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}

/// An argument value if this command defines the argument and it was given.
fn optional_arg<'a>(args: &'a ArgMatches, id: &str) -> Option<&'a str> {
    args.try_get_one::<String>(id)
        .ok()
        .flatten()
        .map(String::as_str)
}
