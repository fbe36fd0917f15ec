//! ffmpeg-backed previews for video and audio uploads.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ProcessError;
use crate::processor::run_tool;

pub const DEFAULT_WAVEFORM_WIDTH: u32 = 800;
pub const DEFAULT_WAVEFORM_HEIGHT: u32 = 200;

/// Offset into the video used for the preview frame.
pub const DEFAULT_FRAME_SECONDS: f64 = 1.0;

pub struct MediaTools {
    ffmpeg: String,
}

fn ensure_parent(out_path: &Path) -> Result<(), ProcessError> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProcessError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn require_output(out_path: &Path) -> Result<PathBuf, ProcessError> {
    if out_path.exists() {
        Ok(out_path.to_path_buf())
    } else {
        Err(ProcessError::MissingOutput(out_path.to_path_buf()))
    }
}

impl MediaTools {
    pub fn new(ffmpeg: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
        }
    }

    /// Extracts one frame at `at_seconds` as a PNG.
    pub fn video_thumbnail(
        &self,
        video: &Path,
        out_path: &Path,
        at_seconds: f64,
    ) -> Result<PathBuf, ProcessError> {
        ensure_parent(out_path)?;

        run_tool(
            Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-ss")
                .arg(at_seconds.to_string())
                .arg("-i")
                .arg(video)
                .arg("-frames:v")
                .arg("1")
                .arg(out_path),
            "ffmpeg",
        )?;

        require_output(out_path)
    }

    /// Draws a mono waveform picture of the whole track.
    pub fn audio_waveform(
        &self,
        audio: &Path,
        out_path: &Path,
        width: u32,
        height: u32,
    ) -> Result<PathBuf, ProcessError> {
        ensure_parent(out_path)?;

        let filter = format!(
            "aformat=channel_layouts=mono,showwavespic=s={}x{}",
            width, height
        );

        run_tool(
            Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-i")
                .arg(audio)
                .arg("-filter_complex")
                .arg(&filter)
                .arg("-frames:v")
                .arg("1")
                .arg(out_path),
            "ffmpeg",
        )?;

        require_output(out_path)
    }
}
