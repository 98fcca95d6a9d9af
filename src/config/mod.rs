mod schema;

pub use schema::{ColorChoice, Config, OutputConfig};

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const MAX_PRECISION: usize = 12;

/// Get the config directory path (~/.config/omm-calc/)
pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("omm-calc"))
}

/// Get the default config file path (~/.config/omm-calc/config.yaml)
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.yaml"))
}

/// Load configuration from a YAML file
///
/// # Arguments
///
/// * `path` - Optional path to config file. If None, uses default path (~/.config/omm-calc/config.yaml)
///
/// A missing default file yields the default configuration; a missing
/// explicit file is an error.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given config file does not exist
/// - The config file cannot be read
/// - The YAML cannot be parsed
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let explicit = path.is_some();
    let config_path = match path {
        Some(p) => p,
        None => match get_config_path() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "no home directory, using default config");
                return Ok(Config::default());
            }
        },
    };

    if !config_path.exists() {
        if explicit {
            anyhow::bail!("Config file not found at {}", config_path.display());
        }
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let config_content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;

    let config: Config = serde_saphyr::from_str(&config_content)
        .with_context(|| format!("Failed to parse config: invalid YAML in {}", config_path.display()))?;

    tracing::debug!(path = %config_path.display(), catalogs = config.catalogs.len(), "config loaded");
    Ok(config)
}

/// Validate a loaded config, collecting all errors
pub fn validate_config(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.output.precision > MAX_PRECISION {
        errors.push(format!(
            "output.precision: {} exceeds the maximum of {}",
            config.output.precision, MAX_PRECISION
        ));
    }

    for (i, path) in config.catalogs.iter().enumerate() {
        if path.as_os_str().is_empty() {
            errors.push(format!("catalogs[{}]: empty path", i));
        } else if path.extension().is_some_and(|ext| ext != "yaml" && ext != "yml") {
            errors.push(format!("catalogs[{}]: {} is not a YAML file", i, path.display()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
