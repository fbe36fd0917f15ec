//! Deterministic test doubles for the external tools and the broker.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lopdf::{dictionary, Document, Object, Stream};

use deckforge::error::{ProcessError, QueueError};
use deckforge::processor::office::expected_pdf_path;
use deckforge::processor::thumbnails::pdf_page_count;
use deckforge::processor::{OfficeConverter, Rasterizer};
use deckforge::queue::{ConversionTask, Delivery, QueueBroker};
use deckforge::storage::{list_slides, slide_file_name};

/// Builds a blank PDF with `pages` pages.
pub fn build_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages);
    for page in 0..pages {
        let content = format!("% page {}", page);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 960.into(), 540.into()],
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to serialize PDF");
    bytes
}

fn write_png(path: &Path) {
    image::RgbImage::from_pixel(16, 9, image::Rgb([200, 200, 200]))
        .save(path)
        .expect("Failed to write PNG");
}

/// Stands in for LibreOffice: writes a PDF with a fixed number of pages.
pub struct FakeOffice {
    pub pages: usize,
    pub calls: Arc<AtomicUsize>,
}

impl FakeOffice {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl OfficeConverter for FakeOffice {
    fn name(&self) -> &'static str {
        "fake-office"
    }

    fn convert(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pdf = expected_pdf_path(source, output_dir);
        std::fs::write(&pdf, build_pdf(self.pages)).map_err(|e| ProcessError::Io {
            path: pdf.clone(),
            source: e,
        })?;
        Ok(pdf)
    }
}

/// Office converter that exits cleanly without producing a PDF.
pub struct SilentOffice;

impl OfficeConverter for SilentOffice {
    fn name(&self) -> &'static str {
        "silent-office"
    }

    fn convert(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        Err(ProcessError::MissingOutput(expected_pdf_path(source, output_dir)))
    }
}

/// Rasterizer that reads the real page count and writes one small PNG per
/// page.
pub struct FakeRasterizer;

impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &'static str {
        "fake-raster"
    }

    fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        let pages = pdf_page_count(pdf_path)
            .ok_or_else(|| ProcessError::Render(format!("unreadable {}", pdf_path.display())))?;

        for index in 0..pages.min(max_pages) {
            write_png(&out_dir.join(slide_file_name(index)));
        }

        Ok(list_slides(out_dir)
            .into_iter()
            .filter(|(index, _)| *index < max_pages)
            .map(|(_, path)| path)
            .collect())
    }
}

/// Rasterizer that always fails.
pub struct BrokenRasterizer;

impl Rasterizer for BrokenRasterizer {
    fn name(&self) -> &'static str {
        "broken-raster"
    }

    fn render_pages(
        &self,
        _pdf_path: &Path,
        _out_dir: &Path,
        _max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        Err(ProcessError::ToolFailed {
            tool: "broken-raster".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "no backend".to_string(),
        })
    }
}

/// Broker whose every call fails as if Redis were down.
pub struct FailingBroker;

fn unreachable() -> QueueError {
    QueueError::Unreachable {
        url: "redis://127.0.0.1:1/0".to_string(),
        reason: "Connection refused (os error 111)".to_string(),
    }
}

impl QueueBroker for FailingBroker {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn publish(&self, _task: &ConversionTask) -> Result<String, QueueError> {
        Err(unreachable())
    }

    fn receive(&self, _timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        Err(unreachable())
    }

    fn acknowledge(&self, _delivery_id: &str) -> Result<(), QueueError> {
        Err(unreachable())
    }
}
