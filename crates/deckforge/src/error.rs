use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures inside the format converter. These never leave the
/// `processor` module: its public operations log them and return an empty
/// result instead.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Expected output missing: {0}")]
    MissingOutput(PathBuf),

    #[error("Failed to render PDF: {0}")]
    Render(String),

    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while talking to the work queue broker.
///
/// Callers that enqueue conversions are expected to recover from these by
/// converting synchronously.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Broker command '{command}' failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("Malformed task payload: {0}")]
    Payload(String),

    #[error("Queue closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Document conversion produced no PDF for '{0}'")]
    NoPdfProduced(String),

    #[error("Preview generation failed for '{0}'")]
    PreviewFailed(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove stale thumbnail '{path}': {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion panicked: {0}")]
    Panicked(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, DeckforgeError>;
