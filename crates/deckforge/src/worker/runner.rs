//! The per-job conversion algorithm shared by queue workers and the inline
//! fallback path.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use crate::db::{job_repo, ConversionJob, Database, DatabaseError, JobStatus, JobUpdate};
use crate::error::{DeckforgeError, WorkerError};
use crate::processor::media::{
    DEFAULT_FRAME_SECONDS, DEFAULT_WAVEFORM_HEIGHT, DEFAULT_WAVEFORM_WIDTH,
};
use crate::processor::{FormatConverter, SourceKind};
use crate::sanitize::redact_path;
use crate::storage::StorageLayout;

pub const VIDEO_PREVIEW_FILE: &str = "video_preview.png";
pub const AUDIO_WAVEFORM_FILE: &str = "waveform.png";
pub const CODE_PREVIEW_FILE: &str = "code_preview.html";

pub struct ConversionRunner {
    db: Database,
    storage: StorageLayout,
    converter: Arc<FormatConverter>,
    max_pages: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

impl ConversionRunner {
    pub fn new(
        db: Database,
        storage: StorageLayout,
        converter: Arc<FormatConverter>,
        max_pages: usize,
    ) -> Self {
        Self {
            db,
            storage,
            converter,
            max_pages,
        }
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Converts one upload and records the outcome on its job row.
    ///
    /// Conversion failures, panics included, end as a `failed` row and are
    /// not returned as errors. Only job store failures are.
    pub fn run(
        &self,
        presentation_id: i64,
        filename: &str,
        job_id: &str,
    ) -> Result<ConversionJob, DeckforgeError> {
        let _span = tracing::info_span!(
            "worker.job",
            presentation_id,
            job_id,
            file = %redact_path(Path::new(filename))
        )
        .entered();

        let job = self.claim(presentation_id, job_id)?;
        log::info!(
            "Converting presentation {} (job {}, row {})",
            presentation_id,
            job_id,
            job.id
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.convert(&job, filename)))
            .unwrap_or_else(|payload| {
                Err(WorkerError::Panicked(panic_message(payload.as_ref())).into())
            });

        let row_id = job.id;
        let updated = match outcome {
            Ok(result) => {
                log::info!("Presentation {} converted: {}", presentation_id, result);
                let update = JobUpdate::status(JobStatus::Finished).with_result(&result);
                job_repo::update(&self.db, row_id, &update)?
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Presentation {} conversion failed: {}", presentation_id, message);
                let line = format!("conversion failed: {}", message);
                let update = JobUpdate::status(JobStatus::Failed)
                    .with_result(&message)
                    .with_log(&line);
                job_repo::update(&self.db, row_id, &update)?
            }
        };

        updated.ok_or_else(|| DeckforgeError::NotFound(format!("conversion job row {}", row_id)))
    }

    /// Finds the row this delivery belongs to and moves it to `started`.
    /// A missing or already terminal record gets a fresh `started` row.
    fn claim(&self, presentation_id: i64, job_id: &str) -> Result<ConversionJob, DatabaseError> {
        let existing = match job_repo::find_by_job_id(&self.db, job_id)?
            .filter(|job| job.presentation_id == presentation_id)
        {
            Some(job) => Some(job),
            None => job_repo::find_latest(&self.db, presentation_id)?,
        };

        if let Some(job) = existing.filter(|job| !job.status.is_terminal()) {
            if let Some(started) =
                job_repo::update(&self.db, job.id, &JobUpdate::status(JobStatus::Started))?
            {
                return Ok(started);
            }
        }

        job_repo::create(&self.db, presentation_id, JobStatus::Started, Some(job_id))
    }

    fn append_log(&self, job: &ConversionJob, line: &str) -> Result<(), DeckforgeError> {
        job_repo::update(&self.db, job.id, &JobUpdate::log(line))?;
        Ok(())
    }

    /// Returns the value stored as the job's `result`.
    fn convert(&self, job: &ConversionJob, filename: &str) -> Result<String, DeckforgeError> {
        self.append_log(job, "starting conversion")?;

        let thumbs_dir = self.storage.thumbs_dir(job.presentation_id);
        self.storage.ensure_directory(&thumbs_dir)?;
        let stale = self.storage.clear_slides(job.presentation_id)?;
        if stale > 0 {
            log::debug!("Removed {} slides of a previous conversion", stale);
        }

        let source = self.storage.upload_path(filename);
        if !source.is_file() {
            return Err(WorkerError::SourceMissing(source).into());
        }
        let source_name = file_name_of(&source, filename);

        match SourceKind::from_path(&source) {
            SourceKind::Document => {
                let pdf = self
                    .converter
                    .convert_document_to_pdf(&source, self.storage.upload_dir())
                    .ok_or_else(|| WorkerError::NoPdfProduced(source_name.clone()))?;
                let pdf_name = file_name_of(&pdf, &source_name);
                self.append_log(job, &format!("converted to PDF: {}", pdf_name))?;
                self.render_thumbnails(job, &pdf, &thumbs_dir)?;
                Ok(pdf_name)
            }
            SourceKind::Pdf => {
                self.append_log(job, &format!("converted to PDF: {}", source_name))?;
                self.render_thumbnails(job, &source, &thumbs_dir)?;
                Ok(source_name)
            }
            SourceKind::Video => {
                self.converter
                    .generate_video_thumbnail(
                        &source,
                        &thumbs_dir.join(VIDEO_PREVIEW_FILE),
                        DEFAULT_FRAME_SECONDS,
                    )
                    .ok_or_else(|| WorkerError::PreviewFailed(source_name.clone()))?;
                self.append_log(job, &format!("generated video preview: {}", VIDEO_PREVIEW_FILE))?;
                Ok(source_name)
            }
            SourceKind::Audio => {
                self.converter
                    .generate_audio_waveform(
                        &source,
                        &thumbs_dir.join(AUDIO_WAVEFORM_FILE),
                        DEFAULT_WAVEFORM_WIDTH,
                        DEFAULT_WAVEFORM_HEIGHT,
                    )
                    .ok_or_else(|| WorkerError::PreviewFailed(source_name.clone()))?;
                self.append_log(job, &format!("generated waveform: {}", AUDIO_WAVEFORM_FILE))?;
                Ok(source_name)
            }
            SourceKind::Code => {
                self.converter
                    .render_code_preview(&source, &thumbs_dir.join(CODE_PREVIEW_FILE))
                    .ok_or_else(|| WorkerError::PreviewFailed(source_name.clone()))?;
                self.append_log(job, &format!("rendered code preview: {}", CODE_PREVIEW_FILE))?;
                Ok(source_name)
            }
            SourceKind::Unsupported => Err(WorkerError::UnsupportedFormat(source_name).into()),
        }
    }

    /// Full page thumbnails, then the cover only. Neither failing is fatal.
    fn render_thumbnails(
        &self,
        job: &ConversionJob,
        pdf: &Path,
        thumbs_dir: &Path,
    ) -> Result<(), DeckforgeError> {
        let pages = self
            .converter
            .generate_pdf_page_thumbnails(pdf, thumbs_dir, self.max_pages);
        if !pages.is_empty() {
            return self.append_log(job, &format!("generated {} thumbnails", pages.len()));
        }

        log::warn!("Page thumbnails unavailable, falling back to cover thumbnail");
        if self.converter.generate_cover_thumbnail(pdf, thumbs_dir).is_some() {
            return self.append_log(job, "generated cover thumbnail only");
        }

        log::warn!("Cover thumbnail unavailable, continuing without previews");
        self.append_log(job, "thumbnail generation failed; continuing without previews")
    }
}
