//! Page thumbnail rendering.
//!
//! Backends are probed once by [`ThumbnailRenderer::probe`]. The resulting
//! chain is fixed for the lifetime of the process; rendering walks it in
//! order and stops at the first backend that produces pages.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Config;
use crate::error::ProcessError;
use crate::processor::pdfium::PdfiumRasterizer;
use crate::processor::{run_tool, Rasterizer};
use crate::storage::{list_slides, remove_slides, slide_file_name};

/// Thumbnail height used by the ImageMagick backend.
const IMAGEMAGICK_HEIGHT: &str = "x2000";

/// Resolution used by the pdftoppm cover renderer.
const PDFTOPPM_DPI: u32 = 150;

/// Page count read from the PDF structure. `None` if lopdf cannot parse it.
pub fn pdf_page_count(pdf_path: &Path) -> Option<usize> {
    match lopdf::Document::load(pdf_path) {
        Ok(doc) => Some(doc.get_pages().len()),
        Err(e) => {
            log::debug!("lopdf could not read {}: {}", pdf_path.display(), e);
            None
        }
    }
}

/// Ordered chain of rasterization backends.
pub struct ThumbnailRenderer {
    backends: Vec<Box<dyn Rasterizer>>,
}

impl ThumbnailRenderer {
    pub fn with_backends(backends: Vec<Box<dyn Rasterizer>>) -> Self {
        Self { backends }
    }

    /// Probes available backends: the pdfium library first, then
    /// ImageMagick.
    pub fn probe(config: &Config) -> Self {
        let mut backends: Vec<Box<dyn Rasterizer>> = Vec::new();

        match PdfiumRasterizer::probe(
            config.tools.pdfium_library.as_deref(),
            config.thumbnails.scale,
        ) {
            Some(pdfium) => backends.push(Box::new(pdfium)),
            None => log::info!("pdfium library not available"),
        }

        let imagemagick = ImageMagickRasterizer::new(&config.tools.imagemagick);
        if imagemagick.is_available() {
            backends.push(Box::new(imagemagick));
        } else {
            log::info!("ImageMagick '{}' not available", config.tools.imagemagick);
        }

        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Renders up to `max_pages` thumbnails. Never fails; an empty list
    /// means no backend produced anything.
    pub fn render(&self, pdf_path: &Path, out_dir: &Path, max_pages: usize) -> Vec<PathBuf> {
        if max_pages == 0 {
            return Vec::new();
        }
        if let Err(e) = std::fs::create_dir_all(out_dir) {
            log::error!("Failed to create {}: {}", out_dir.display(), e);
            return Vec::new();
        }

        for backend in &self.backends {
            // Pages left by an earlier deck or a failed backend must not be
            // mistaken for this backend's output.
            if let Err(e) = remove_slides(out_dir) {
                log::error!("Cannot clear {}: {}", out_dir.display(), e);
                return Vec::new();
            }

            match backend.render_pages(pdf_path, out_dir, max_pages) {
                Ok(paths) if !paths.is_empty() => {
                    log::info!(
                        "Rendered {} thumbnails with {}",
                        paths.len(),
                        backend.name()
                    );
                    return paths;
                }
                Ok(_) => {
                    log::warn!("{} rendered no pages, trying next backend", backend.name());
                }
                Err(e) => {
                    log::warn!(
                        "{} thumbnail rendering failed, trying next backend: {}",
                        backend.name(),
                        e
                    );
                }
            }
        }

        Vec::new()
    }
}

/// Collects `slide_<i>.png` files below `max_pages` in page order.
fn collect_slides(out_dir: &Path, max_pages: usize) -> Vec<PathBuf> {
    list_slides(out_dir)
        .into_iter()
        .filter(|(index, _)| *index < max_pages)
        .map(|(_, path)| path)
        .collect()
}

/// ImageMagick `convert` fallback.
pub struct ImageMagickRasterizer {
    command: String,
}

impl ImageMagickRasterizer {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Rasterizer for ImageMagickRasterizer {
    fn name(&self) -> &'static str {
        "imagemagick"
    }

    fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        let pages = pdf_page_count(pdf_path)
            .map(|count| count.min(max_pages))
            .unwrap_or(max_pages);
        if pages == 0 {
            return Ok(Vec::new());
        }

        // `file.pdf[0-2]` selects the first three pages.
        let input = format!("{}[0-{}]", pdf_path.display(), pages - 1);
        let pattern = out_dir.join("slide_%d.png");

        run_tool(
            Command::new(&self.command)
                .arg(&input)
                .arg("-thumbnail")
                .arg(IMAGEMAGICK_HEIGHT)
                .arg(&pattern),
            &self.command,
        )?;

        Ok(collect_slides(out_dir, max_pages))
    }
}

/// poppler `pdftoppm`, used for the single cover thumbnail. With one page
/// it writes `<prefix>.png` via `-singlefile`.
pub struct PdftoppmRasterizer {
    command: String,
}

impl PdftoppmRasterizer {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

/// pdftoppm pads the page suffix to the width of the page count.
fn find_pdftoppm_output(prefix: &Path, page: usize) -> Option<PathBuf> {
    let prefix = prefix.display();
    [
        format!("{}-{}.png", prefix, page),
        format!("{}-{:02}.png", prefix, page),
        format!("{}-{:03}.png", prefix, page),
    ]
    .into_iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl Rasterizer for PdftoppmRasterizer {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        if max_pages == 0 {
            return Ok(Vec::new());
        }

        let prefix = out_dir.join(format!(".render-{}", uuid::Uuid::new_v4()));
        let single = max_pages == 1;

        let mut command = Command::new(&self.command);
        command
            .arg("-png")
            .arg("-r")
            .arg(PDFTOPPM_DPI.to_string());
        if single {
            command.arg("-singlefile");
        }
        command
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(max_pages.to_string())
            .arg(pdf_path)
            .arg(&prefix);
        run_tool(&mut command, &self.command)?;

        let mut rendered = Vec::new();
        for page in 1..=max_pages {
            let output = if single {
                Some(prefix.with_extension("png")).filter(|p| p.exists())
            } else {
                find_pdftoppm_output(&prefix, page)
            };
            let Some(output) = output else {
                break;
            };
            let target = out_dir.join(slide_file_name(page - 1));
            std::fs::rename(&output, &target).map_err(|e| ProcessError::Io {
                path: target.clone(),
                source: e,
            })?;
            rendered.push(target);
        }

        if rendered.is_empty() {
            return Err(ProcessError::MissingOutput(out_dir.join(slide_file_name(0))));
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Broken(Arc<AtomicUsize>);

    impl Rasterizer for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn render_pages(
            &self,
            _pdf: &Path,
            _out: &Path,
            _max: usize,
        ) -> Result<Vec<PathBuf>, ProcessError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProcessError::Render("library crashed".to_string()))
        }
    }

    /// Writes placeholder files for three pages.
    struct ThreePages;

    impl Rasterizer for ThreePages {
        fn name(&self) -> &'static str {
            "three-pages"
        }

        fn render_pages(
            &self,
            _pdf: &Path,
            out: &Path,
            max: usize,
        ) -> Result<Vec<PathBuf>, ProcessError> {
            for i in 0..3.min(max) {
                std::fs::write(out.join(slide_file_name(i)), b"png").unwrap();
            }
            Ok(collect_slides(out, max))
        }
    }

    #[test]
    fn test_falls_back_after_failure() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = ThumbnailRenderer::with_backends(vec![
            Box::new(Broken(Arc::clone(&calls))),
            Box::new(ThreePages),
        ]);

        assert_eq!(renderer.backend_names(), vec!["broken", "three-pages"]);

        let paths = renderer.render(Path::new("deck.pdf"), dir.path(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("slide_0.png"));
        assert!(paths[2].ends_with("slide_2.png"));
    }

    /// Writes two pages, then fails.
    struct PartialThenFail;

    impl Rasterizer for PartialThenFail {
        fn name(&self) -> &'static str {
            "partial"
        }

        fn render_pages(
            &self,
            _pdf: &Path,
            out: &Path,
            _max: usize,
        ) -> Result<Vec<PathBuf>, ProcessError> {
            for i in 0..2 {
                std::fs::write(out.join(slide_file_name(i)), b"partial").unwrap();
            }
            Err(ProcessError::Render("ran out of memory".to_string()))
        }
    }

    #[test]
    fn test_stale_and_partial_pages_are_discarded() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            std::fs::write(dir.path().join(slide_file_name(i)), b"old deck").unwrap();
        }
        let renderer = ThumbnailRenderer::with_backends(vec![
            Box::new(PartialThenFail),
            Box::new(ThreePages),
        ]);

        let paths = renderer.render(Path::new("deck.pdf"), dir.path(), 10);

        assert_eq!(paths.len(), 3);
        assert_eq!(list_slides(dir.path()).len(), 3);
        for (_, path) in list_slides(dir.path()) {
            assert_eq!(std::fs::read(path).unwrap(), b"png");
        }
    }

    #[test]
    fn test_truncates_from_front() {
        let dir = TempDir::new().unwrap();
        let renderer = ThumbnailRenderer::with_backends(vec![Box::new(ThreePages)]);

        let paths = renderer.render(Path::new("deck.pdf"), dir.path(), 2);
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["slide_0.png", "slide_1.png"]);
    }

    #[test]
    fn test_all_backends_failing_is_empty() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = ThumbnailRenderer::with_backends(vec![Box::new(Broken(calls))]);
        assert!(renderer.render(Path::new("deck.pdf"), dir.path(), 5).is_empty());
    }

    #[test]
    fn test_no_backends_is_empty() {
        let dir = TempDir::new().unwrap();
        let renderer = ThumbnailRenderer::with_backends(vec![]);
        assert!(renderer.is_empty());
        assert!(renderer.render(Path::new("deck.pdf"), dir.path(), 5).is_empty());
    }

    #[test]
    fn test_pdf_page_count_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert_eq!(pdf_page_count(&path), None);
    }

    #[test]
    fn test_find_pdftoppm_output_padding() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join(".render-x");
        std::fs::write(dir.path().join(".render-x-01.png"), b"png").unwrap();

        assert_eq!(
            find_pdftoppm_output(&prefix, 1),
            Some(dir.path().join(".render-x-01.png"))
        );
        assert_eq!(find_pdftoppm_output(&prefix, 2), None);
    }

    #[test]
    fn test_imagemagick_missing_binary() {
        let rasterizer = ImageMagickRasterizer::new("/nonexistent/convert");
        assert!(!rasterizer.is_available());
    }
}
