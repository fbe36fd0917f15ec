//! On-disk layout of uploads, converted PDFs and page thumbnails.
//!
//! ```text
//! <upload_dir>/<filename>                          source and converted PDF
//! <upload_dir>/thumbs/<presentation_id>/slide_<i>.png
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::WorkerError;

const THUMBS_DIR: &str = "thumbs";

static RE_SLIDE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^slide_(\d+)\.png$").unwrap());

/// File name of the thumbnail for a zero-based page index.
pub fn slide_file_name(index: usize) -> String {
    format!("slide_{}.png", index)
}

/// Parses the page index out of a `slide_<i>.png` file name.
pub fn parse_slide_index(file_name: &str) -> Option<usize> {
    RE_SLIDE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lists `slide_<i>.png` files in `dir` ordered by numeric page index.
pub fn list_slides(dir: &Path) -> Vec<(usize, PathBuf)> {
    let Some(dir_str) = dir.to_str() else {
        return Vec::new();
    };
    let pattern = format!("{}/slide_*.png", glob::Pattern::escape(dir_str));
    let Ok(paths) = glob::glob(&pattern) else {
        return Vec::new();
    };

    let mut slides: Vec<(usize, PathBuf)> = paths
        .filter_map(|entry| entry.ok())
        .filter_map(|path| {
            let index = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_slide_index)?;
            Some((index, path))
        })
        .collect();
    slides.sort_by_key(|(index, _)| *index);
    slides
}

/// Deletes every `slide_<i>.png` in `dir` and returns how many were removed.
/// A missing directory counts as empty.
pub fn remove_slides(dir: &Path) -> Result<usize, WorkerError> {
    let slides = list_slides(dir);
    for (_, path) in &slides {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(WorkerError::RemoveStale {
                    path: path.clone(),
                    source: e,
                })
            }
        }
    }
    Ok(slides.len())
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    upload_dir: PathBuf,
}

impl StorageLayout {
    pub fn new<P: AsRef<Path>>(upload_dir: P) -> Self {
        Self {
            upload_dir: upload_dir.as_ref().to_path_buf(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Path of an uploaded or converted file. Only the final path component
    /// of `filename` is used, so a crafted name cannot escape the upload
    /// directory.
    pub fn upload_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        self.upload_dir.join(name)
    }

    pub fn thumbs_dir(&self, presentation_id: i64) -> PathBuf {
        self.upload_dir
            .join(THUMBS_DIR)
            .join(presentation_id.to_string())
    }

    pub fn slide_path(&self, presentation_id: i64, index: usize) -> PathBuf {
        self.thumbs_dir(presentation_id).join(slide_file_name(index))
    }

    /// Empties the thumbnails directory of a presentation's slides, so a
    /// new conversion never lists pages of an earlier deck.
    pub fn clear_slides(&self, presentation_id: i64) -> Result<usize, WorkerError> {
        remove_slides(&self.thumbs_dir(presentation_id))
    }

    pub fn ensure_directory(&self, path: &Path) -> Result<(), WorkerError> {
        std::fs::create_dir_all(path).map_err(|e| WorkerError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
