//! Conversion orchestrator used by request handlers.
//!
//! Hides whether a conversion runs on the background queue or inline, and
//! exposes the read paths (status, log, thumbnails, converted files).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::db::{job_repo, ConversionJob, Database, JobStatus};
use crate::error::{DeckforgeError, Result};
use crate::processor::{FormatConverter, SourceKind};
use crate::queue::{QueueAdapter, QueueBroker};
use crate::storage::{list_slides, StorageLayout};
use crate::worker::ConversionRunner;

/// Status reported when a presentation has no job yet.
pub const STATUS_NONE: &str = "none";

/// Prefix of the marker stored as `job_id` for inline conversions.
pub const INLINE_MARKER_PREFIX: &str = "local-";

/// How a conversion request was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Published to the broker; carries the broker-assigned job id.
    Queued(String),
    /// Converted synchronously; carries the `local-<uuid>` marker.
    Inline(String),
}

impl Dispatch {
    pub fn job_id(&self) -> &str {
        match self {
            Dispatch::Queued(id) | Dispatch::Inline(id) => id,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Dispatch::Queued(_) => "queue",
            Dispatch::Inline(_) => "inline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionStatus {
    pub status: String,
    pub job_id: Option<String>,
    pub result: Option<String>,
}

impl ConversionStatus {
    fn none() -> Self {
        Self {
            status: STATUS_NONE.to_string(),
            job_id: None,
            result: None,
        }
    }
}

impl From<ConversionJob> for ConversionStatus {
    fn from(job: ConversionJob) -> Self {
        Self {
            status: job.status.as_str().to_string(),
            job_id: job.job_id,
            result: job.result,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailListing {
    pub thumbnails: Vec<String>,
    /// Set to `queued` when the listing triggered a conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// What happened to a freshly uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The upload is a PDF and can be shown as-is.
    Viewable,
    /// A conversion was requested.
    Conversion(Dispatch),
    /// The format has no preview pipeline.
    Unsupported,
}

/// Viewer decision for a presentation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerState {
    /// URL of a PDF the viewer can embed, once one is available.
    pub viewer_url: Option<String>,
    pub original_url: String,
    /// `ready`, a job status, `queued` when no job exists yet, or
    /// `unsupported`.
    pub conversion_status: String,
}

/// A converted PDF read from storage.
#[derive(Debug, Clone)]
pub struct ConvertedPdf {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub fn slide_url(presentation_id: i64, index: usize) -> String {
    format!("/presentations/{}/slide/{}", presentation_id, index)
}

pub fn converted_pdf_url(presentation_id: i64) -> String {
    format!("/presentations/{}/converted_pdf?inline=1", presentation_id)
}

pub fn original_url(filename: &str) -> String {
    format!("/download/{}?inline=1", filename)
}

pub struct ConversionService {
    db: Database,
    storage: StorageLayout,
    runner: Arc<ConversionRunner>,
    queue: Option<QueueAdapter>,
    background: bool,
}

impl ConversionService {
    pub fn new(
        db: Database,
        storage: StorageLayout,
        runner: Arc<ConversionRunner>,
        queue: Option<QueueAdapter>,
        background: bool,
    ) -> Self {
        Self {
            db,
            storage,
            runner,
            queue,
            background,
        }
    }

    /// Wires the production service. The broker is optional; without one
    /// every conversion runs inline.
    pub fn from_config(
        config: &Config,
        db: Database,
        broker: Option<Arc<dyn QueueBroker>>,
    ) -> Self {
        let storage = StorageLayout::new(&config.upload_dir);
        let converter = Arc::new(FormatConverter::from_config(config));
        let runner = Arc::new(ConversionRunner::new(
            db.clone(),
            storage.clone(),
            converter,
            config.thumbnails.max_pages,
        ));
        let queue = broker.map(|broker| QueueAdapter::new(broker, db.clone()));

        Self::new(db, storage, runner, queue, config.background_conversion)
    }

    pub fn runner(&self) -> &Arc<ConversionRunner> {
        &self.runner
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Queues the conversion when background conversion is enabled and a
    /// broker is configured, otherwise converts inline. A broker failure
    /// also falls back to inline conversion.
    pub fn request_conversion(&self, presentation_id: i64, filename: &str) -> Result<Dispatch> {
        if let Some(queue) = self.queue.as_ref().filter(|_| self.background) {
            match queue.enqueue_conversion(presentation_id, filename) {
                Ok(job_id) => return Ok(Dispatch::Queued(job_id)),
                Err(DeckforgeError::Queue(e)) => {
                    log::warn!(
                        "Queue unavailable for presentation {}, converting inline: {}",
                        presentation_id,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.convert_inline(presentation_id, filename)
    }

    fn convert_inline(&self, presentation_id: i64, filename: &str) -> Result<Dispatch> {
        let marker = format!("{}{}", INLINE_MARKER_PREFIX, uuid::Uuid::new_v4());

        // Record the marker so the runner claims this row rather than
        // another request's in-flight job.
        job_repo::create(&self.db, presentation_id, JobStatus::Queued, Some(&marker))?;

        let job = self.runner.run(presentation_id, filename, &marker)?;
        log::info!(
            "Inline conversion of presentation {} ended {}",
            presentation_id,
            job.status
        );

        Ok(Dispatch::Inline(marker))
    }

    /// Status of the latest job. Never writes.
    pub fn get_status(&self, presentation_id: i64) -> Result<ConversionStatus> {
        Ok(job_repo::find_latest(&self.db, presentation_id)?
            .map(ConversionStatus::from)
            .unwrap_or_else(ConversionStatus::none))
    }

    pub fn get_log(&self, presentation_id: i64) -> Result<Option<String>> {
        Ok(job_repo::find_latest(&self.db, presentation_id)?.and_then(|job| job.log))
    }

    /// Lists slide URLs in page order.
    ///
    /// A missing thumbnails directory means no conversion has started yet:
    /// one is requested for `filename`, and an empty `queued` listing is
    /// returned. Without a filename nothing is requested and the status of
    /// the latest stored job, if any, is reported instead.
    pub fn list_thumbnails(
        &self,
        presentation_id: i64,
        filename: Option<&str>,
    ) -> Result<ThumbnailListing> {
        let dir = self.storage.thumbs_dir(presentation_id);

        if !dir.is_dir() {
            let Some(filename) = filename else {
                let status = job_repo::find_latest(&self.db, presentation_id)?
                    .map(|job| job.status.as_str().to_string());
                return Ok(ThumbnailListing {
                    thumbnails: Vec::new(),
                    status,
                });
            };

            let dispatch = self.request_conversion(presentation_id, filename)?;
            log::info!(
                "Thumbnails for presentation {} requested via {} ({})",
                presentation_id,
                dispatch.mode(),
                dispatch.job_id()
            );
            return Ok(ThumbnailListing {
                thumbnails: Vec::new(),
                status: Some(JobStatus::Queued.as_str().to_string()),
            });
        }

        let thumbnails = list_slides(&dir)
            .into_iter()
            .map(|(index, _)| slide_url(presentation_id, index))
            .collect();

        Ok(ThumbnailListing {
            thumbnails,
            status: None,
        })
    }

    /// Entry point for the upload handler.
    pub fn on_upload(&self, presentation_id: i64, filename: &str) -> Result<UploadOutcome> {
        match SourceKind::from_path(Path::new(filename)) {
            SourceKind::Pdf => Ok(UploadOutcome::Viewable),
            SourceKind::Unsupported => Ok(UploadOutcome::Unsupported),
            _ => self
                .request_conversion(presentation_id, filename)
                .map(UploadOutcome::Conversion),
        }
    }

    pub fn slide_image(&self, presentation_id: i64, index: usize) -> Result<Vec<u8>> {
        let path = self.storage.slide_path(presentation_id, index);
        read_existing(&path, || {
            format!("slide {} of presentation {}", index, presentation_id)
        })
    }

    /// The PDF named by the latest job's `result`.
    pub fn converted_pdf(&self, presentation_id: i64) -> Result<ConvertedPdf> {
        let path = self.converted_pdf_path(presentation_id)?.ok_or_else(|| {
            DeckforgeError::NotFound(format!(
                "converted PDF for presentation {}",
                presentation_id
            ))
        })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let bytes = read_existing(&path, || {
            format!("converted PDF for presentation {}", presentation_id)
        })?;

        Ok(ConvertedPdf { filename, bytes })
    }

    fn converted_pdf_path(&self, presentation_id: i64) -> Result<Option<PathBuf>> {
        let Some(job) = job_repo::find_latest(&self.db, presentation_id)? else {
            return Ok(None);
        };
        if job.status != JobStatus::Finished {
            return Ok(None);
        }

        Ok(job
            .result
            .filter(|name| SourceKind::from_path(Path::new(name)) == SourceKind::Pdf)
            .map(|name| self.storage.upload_path(&name)))
    }

    /// Decides what a presentation page shows. Never requests a conversion.
    pub fn preview(&self, presentation_id: i64, filename: &str) -> Result<ViewerState> {
        let original = original_url(filename);

        let state = match SourceKind::from_path(Path::new(filename)) {
            SourceKind::Pdf => ViewerState {
                viewer_url: Some(original.clone()),
                original_url: original,
                conversion_status: "ready".to_string(),
            },
            SourceKind::Document => {
                let converted = self
                    .converted_pdf_path(presentation_id)?
                    .filter(|path| path.is_file());

                match converted {
                    Some(_) => ViewerState {
                        viewer_url: Some(converted_pdf_url(presentation_id)),
                        original_url: original,
                        conversion_status: "ready".to_string(),
                    },
                    None => {
                        let status = job_repo::find_latest(&self.db, presentation_id)?
                            .map(|job| job.status)
                            .unwrap_or(JobStatus::Queued);
                        ViewerState {
                            viewer_url: None,
                            original_url: original,
                            conversion_status: status.as_str().to_string(),
                        }
                    }
                }
            }
            _ => ViewerState {
                viewer_url: None,
                original_url: original,
                conversion_status: "unsupported".to_string(),
            },
        };

        Ok(state)
    }
}

fn read_existing(path: &Path, describe: impl FnOnce() -> String) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DeckforgeError::NotFound(describe()))
        }
        Err(e) => Err(DeckforgeError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
