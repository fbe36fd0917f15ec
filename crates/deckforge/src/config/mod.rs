pub mod loader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use loader::{load_config, load_config_from_str};

/// Runtime configuration shared by the HTTP server and worker processes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding uploaded sources, converted PDFs and `thumbs/`.
    pub upload_dir: PathBuf,
    /// SQLite database file. Falls back to `~/.deckforge/data/deckforge.db`.
    pub database_path: Option<PathBuf>,
    /// Run conversions on the queue instead of inline.
    pub background_conversion: bool,
    pub queue: QueueConfig,
    pub thumbnails: ThumbnailConfig,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            database_path: None,
            background_conversion: false,
            queue: QueueConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
            .unwrap_or_else(|| self.upload_dir.join("deckforge.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Redis stream key.
    pub stream: String,
    pub consumer_group: String,
    /// Connect timeout; enqueueing fails fast once it elapses.
    pub connect_timeout_ms: u64,
    /// How long a worker blocks waiting for the next task.
    pub block_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            stream: "deckforge:conversions".to_string(),
            consumer_group: "deckforge-workers".to_string(),
            connect_timeout_ms: 2000,
            block_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ThumbnailConfig {
    /// Render scale applied by the pdfium backend.
    pub scale: f32,
    /// Pages beyond this are not rendered.
    pub max_pages: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            scale: 4.0,
            max_pages: 10,
        }
    }
}

/// Locations of external tools. `None` means "resolve automatically".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub soffice: Option<PathBuf>,
    pub imagemagick: String,
    pub pdftoppm: String,
    pub ffmpeg: String,
    /// Path to the pdfium shared library; the system library is tried otherwise.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            soffice: None,
            imagemagick: "convert".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            pdfium_library: None,
        }
    }
}
