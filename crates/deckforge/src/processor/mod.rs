pub mod code;
pub mod media;
pub mod office;
pub mod pdfium;
pub mod thumbnails;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::config::Config;
use crate::error::ProcessError;
use crate::sanitize::redact_path;

pub use media::MediaTools;
pub use office::SofficeConverter;
pub use pdfium::PdfiumRasterizer;
pub use thumbnails::{ImageMagickRasterizer, PdftoppmRasterizer, ThumbnailRenderer};

/// What kind of preview a source file gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Office document converted to PDF through LibreOffice.
    Document,
    Pdf,
    Video,
    Audio,
    Code,
    Unsupported,
}

const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "odt", "ppt", "pptx", "pptm", "odp", "rtf"];
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "h", "cpp", "rs", "go", "rb", "txt", "md",
];

impl SourceKind {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if extension == "pdf" {
            return SourceKind::Pdf;
        }
        if DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
            return SourceKind::Document;
        }
        if CODE_EXTENSIONS.contains(&extension.as_str()) {
            return SourceKind::Code;
        }

        match mime_guess::from_path(path).first() {
            Some(mime) if mime.type_() == mime_guess::mime::VIDEO => SourceKind::Video,
            Some(mime) if mime.type_() == mime_guess::mime::AUDIO => SourceKind::Audio,
            _ => SourceKind::Unsupported,
        }
    }

    /// Whether the source ends up as a PDF that the viewer can page through.
    pub fn is_paged(&self) -> bool {
        matches!(self, SourceKind::Document | SourceKind::Pdf)
    }
}

/// Turns an office document into a PDF.
pub trait OfficeConverter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Converts `source` into `<output_dir>/<stem>.pdf` and returns that path.
    fn convert(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError>;
}

/// Renders PDF pages to `slide_<i>.png` files.
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Renders at most `max_pages` pages, starting from the first, into
    /// `out_dir`. Returned paths are ordered by page index.
    fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError>;
}

/// Runs an external tool to completion and fails on a non-zero exit.
pub(crate) fn run_tool(command: &mut Command, tool: &str) -> Result<Output, ProcessError> {
    log::debug!("Running {}: {:?}", tool, command);

    let output = command.output().map_err(|e| ProcessError::Spawn {
        tool: tool.to_string(),
        source: e,
    })?;

    if !output.status.success() {
        return Err(ProcessError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Stateless façade over the external conversion tools.
///
/// None of the operations return errors: failures are logged and surface as
/// `None` or an empty list, and the caller decides whether that is fatal.
pub struct FormatConverter {
    office: Box<dyn OfficeConverter>,
    thumbnails: ThumbnailRenderer,
    cover: Box<dyn Rasterizer>,
    media: MediaTools,
}

impl FormatConverter {
    pub fn new(
        office: Box<dyn OfficeConverter>,
        thumbnails: ThumbnailRenderer,
        cover: Box<dyn Rasterizer>,
        media: MediaTools,
    ) -> Self {
        Self {
            office,
            thumbnails,
            cover,
            media,
        }
    }

    /// Builds the production converter, probing rasterization backends once.
    pub fn from_config(config: &Config) -> Self {
        let office = SofficeConverter::resolve(config.tools.soffice.as_deref());
        log::info!("Office converter: {}", office.command().display());

        let thumbnails = ThumbnailRenderer::probe(config);
        if thumbnails.is_empty() {
            log::warn!("No thumbnail backend available; only cover thumbnails will be attempted");
        } else {
            log::info!("Thumbnail backends: {}", thumbnails.backend_names().join(" -> "));
        }

        Self::new(
            Box::new(office),
            thumbnails,
            Box::new(PdftoppmRasterizer::new(&config.tools.pdftoppm)),
            MediaTools::new(&config.tools.ffmpeg),
        )
    }

    pub fn thumbnail_backends(&self) -> Vec<&'static str> {
        self.thumbnails.backend_names()
    }

    pub fn convert_document_to_pdf(&self, source: &Path, output_dir: &Path) -> Option<PathBuf> {
        let _span = tracing::info_span!(
            "processor.office",
            converter = self.office.name(),
            file = %redact_path(source)
        )
        .entered();

        match self.office.convert(source, output_dir) {
            Ok(pdf) if pdf.exists() => Some(pdf),
            Ok(pdf) => {
                log::error!(
                    "{} reported success but {} does not exist",
                    self.office.name(),
                    pdf.display()
                );
                None
            }
            Err(e) => {
                log::error!("Document to PDF conversion failed: {}", e);
                None
            }
        }
    }

    pub fn generate_pdf_page_thumbnails(
        &self,
        pdf_path: &Path,
        thumbs_dir: &Path,
        max_pages: usize,
    ) -> Vec<PathBuf> {
        let _span = tracing::info_span!(
            "processor.thumbnails",
            file = %redact_path(pdf_path),
            max_pages
        )
        .entered();

        self.thumbnails.render(pdf_path, thumbs_dir, max_pages)
    }

    /// Degraded path: a single `slide_0.png` of the first page.
    pub fn generate_cover_thumbnail(&self, pdf_path: &Path, thumbs_dir: &Path) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(thumbs_dir) {
            log::error!("Failed to create {}: {}", thumbs_dir.display(), e);
            return None;
        }

        match self.cover.render_pages(pdf_path, thumbs_dir, 1) {
            Ok(paths) => paths.into_iter().next(),
            Err(e) => {
                log::error!("Cover thumbnail via {} failed: {}", self.cover.name(), e);
                None
            }
        }
    }

    pub fn generate_video_thumbnail(
        &self,
        video: &Path,
        out_path: &Path,
        at_seconds: f64,
    ) -> Option<PathBuf> {
        self.media
            .video_thumbnail(video, out_path, at_seconds)
            .map_err(|e| log::error!("Video thumbnail failed: {}", e))
            .ok()
    }

    pub fn generate_audio_waveform(
        &self,
        audio: &Path,
        out_path: &Path,
        width: u32,
        height: u32,
    ) -> Option<PathBuf> {
        self.media
            .audio_waveform(audio, out_path, width, height)
            .map_err(|e| log::error!("Audio waveform generation failed: {}", e))
            .ok()
    }

    pub fn render_code_preview(&self, source: &Path, out_path: &Path) -> Option<PathBuf> {
        code::render_code_preview(source, out_path)
            .map_err(|e| log::error!("Code preview rendering failed: {}", e))
            .ok()
    }
}
