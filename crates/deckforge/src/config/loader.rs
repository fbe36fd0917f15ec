use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the optional JSON file, then layers environment variables on top.
pub fn load_config_with_env(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies the deployment environment variables to `config`.
///
/// `lookup` is injected so the mapping can be tested without touching the
/// process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("UPLOAD_DIR") {
        config.upload_dir = PathBuf::from(dir);
    }
    if let Some(path) = lookup("DATABASE_PATH") {
        config.database_path = Some(PathBuf::from(path));
    }
    if let Some(url) = lookup("REDIS_URL") {
        config.queue.redis_url = url;
    }
    if let Some(flag) = lookup("ENABLE_CONVERSION") {
        config.background_conversion = parse_flag("ENABLE_CONVERSION", &flag)?;
    }
    if let Some(scale) = lookup("THUMBNAIL_SCALE") {
        config.thumbnails.scale = scale.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: "THUMBNAIL_SCALE".to_string(),
            value: scale.clone(),
        })?;
    }
    if let Some(pages) = lookup("MAX_THUMBNAIL_PAGES") {
        config.thumbnails.max_pages =
            pages.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "MAX_THUMBNAIL_PAGES".to_string(),
                value: pages.clone(),
            })?;
    }
    // Only honoured when the file exists; otherwise platform paths are probed.
    if let Some(soffice) = lookup("LIBREOFFICE_PATH").or_else(|| lookup("SOFFICE_PATH")) {
        let path = PathBuf::from(soffice);
        if path.exists() {
            config.tools.soffice = Some(path);
        } else {
            log::warn!(
                "Ignoring LibreOffice override {}: file does not exist",
                path.display()
            );
        }
    }
    if let Some(dir) = lookup("PDFIUM_LIB_PATH") {
        config.tools.pdfium_library = Some(PathBuf::from(dir));
    }
    Ok(())
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if !(config.thumbnails.scale.is_finite() && config.thumbnails.scale > 0.0) {
        return Err(ConfigError::Validation {
            message: format!(
                "thumbnails.scale must be positive, got {}",
                config.thumbnails.scale
            ),
        });
    }

    if config.thumbnails.max_pages == 0 {
        return Err(ConfigError::Validation {
            message: "thumbnails.maxPages must be at least 1".to_string(),
        });
    }

    if config.queue.stream.trim().is_empty() || config.queue.consumer_group.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "queue.stream and queue.consumerGroup must not be empty".to_string(),
        });
    }

    // Redis reads BLOCK 0 as "wait forever".
    if config.queue.block_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            message: "queue.blockTimeoutMs must be at least 1".to_string(),
        });
    }

    if config.upload_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "uploadDir must not be empty".to_string(),
        });
    }

    Ok(())
}
