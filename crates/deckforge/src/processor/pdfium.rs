//! High-fidelity page rendering through the pdfium library.
//!
//! The library is bound once during probing to check it is loadable, then
//! bound again for each render. pdfium keeps thread-local state, so a
//! binding is never shared across worker threads.

use std::path::{Path, PathBuf};

use pdfium_render::prelude::*;

use crate::error::ProcessError;
use crate::processor::Rasterizer;
use crate::storage::slide_file_name;

pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
    scale: f32,
}

impl PdfiumRasterizer {
    /// Returns a rasterizer if the pdfium library can be bound.
    pub fn probe(library: Option<&Path>, scale: f32) -> Option<Self> {
        match bind(library) {
            Ok(_) => Some(Self {
                library: library.map(Path::to_path_buf),
                scale,
            }),
            Err(e) => {
                log::debug!("pdfium bind failed: {}", e);
                None
            }
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

fn bind(library: Option<&Path>) -> Result<Pdfium, ProcessError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ProcessError::Render(format!("failed to bind pdfium: {}", e)))?;

    Ok(Pdfium::new(bindings))
}

impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn render_pages(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        let pdfium = bind(self.library.as_deref())?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| ProcessError::Render(format!("{}: {:?}", pdf_path.display(), e)))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.scale);
        let pages = document.pages();
        let page_count = (pages.len() as usize).min(max_pages);

        let mut rendered = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let page = pages
                .get(index as u16)
                .map_err(|e| ProcessError::Render(format!("page {}: {:?}", index, e)))?;

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| ProcessError::Render(format!("page {}: {:?}", index, e)))?;

            let out_path = out_dir.join(slide_file_name(index));
            bitmap
                .as_image()
                .save_with_format(&out_path, image::ImageFormat::Png)
                .map_err(|e| ProcessError::Render(format!("saving page {}: {}", index, e)))?;

            log::debug!("Rendered page {} to {}", index, out_path.display());
            rendered.push(out_path);
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_with_missing_library() {
        let probed = PdfiumRasterizer::probe(Some(Path::new("/nonexistent/libpdfium.so")), 4.0);
        assert!(probed.is_none());
    }
}
