pub mod config;
pub mod db;
pub mod error;
pub mod processor;
pub mod queue;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config};
pub use db::{ConversionJob, Database, JobStatus};
pub use error::{ConfigError, DeckforgeError, ProcessError, QueueError, Result, WorkerError};
pub use processor::{FormatConverter, SourceKind};
pub use queue::{ConversionTask, Delivery, MemoryBroker, QueueAdapter, QueueBroker, RedisBroker};
pub use service::{
    ConversionService, ConversionStatus, ConvertedPdf, Dispatch, ThumbnailListing, UploadOutcome,
    ViewerState,
};
pub use storage::StorageLayout;
pub use worker::{ConversionRunner, Worker, WorkerPool};
