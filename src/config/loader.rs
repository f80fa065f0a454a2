use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::AppConfig;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "DOCO";

/// File picked up when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "doco.toml";

/// Load configuration from an optional file plus `DOCO_*` environment
/// variables. Nested keys use `__`, e.g. `DOCO_PROXY__IDLE_TIMEOUT=5m`.
///
/// An explicit path must exist; the default file is optional.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    load_config_with_env(config_path, None)
}

/// Like [`load_config`], reading variables from `env` instead of the process
/// environment when given.
pub fn load_config_with_env(
    config_path: Option<&str>,
    env: Option<HashMap<String, String>>,
) -> Result<AppConfig> {
    let (path, required) = match config_path {
        Some(path) => (path, true),
        None => (DEFAULT_CONFIG_FILE, false),
    };
    let config_file = Path::new(path);

    // Determine file format based on extension
    let format = match config_file.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(path, format).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_file.display()))?;

    let app_config: AppConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_file.display()
        )
    })?;

    Ok(app_config)
}
