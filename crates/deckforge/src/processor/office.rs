use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ProcessError;
use crate::processor::{run_tool, OfficeConverter};

const SOFFICE: &str = "soffice";

/// Well-known LibreOffice install locations, checked in order.
fn platform_candidates() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\Program Files\LibreOffice\program\soffice.exe"),
            PathBuf::from(r"C:\Program Files (x86)\LibreOffice\program\soffice.exe"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        )]
    } else {
        let mut candidates = vec![
            PathBuf::from("/usr/bin/soffice"),
            PathBuf::from("/usr/local/bin/soffice"),
            PathBuf::from("/usr/lib/libreoffice/program/soffice"),
        ];
        // Upstream tarballs install as /opt/libreofficeX.Y/program/soffice.
        if let Ok(entries) = glob::glob("/opt/libreoffice*/program/soffice") {
            let mut found: Vec<PathBuf> = entries.filter_map(|e| e.ok()).collect();
            found.sort();
            found.reverse();
            candidates.extend(found);
        }
        candidates
    }
}

/// Picks the LibreOffice executable: explicit override, then platform
/// install paths, then the bare command name for `PATH` lookup.
pub fn resolve_soffice_command(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| p.exists()) {
        return path.to_path_buf();
    }

    platform_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(SOFFICE))
}

/// Headless LibreOffice document to PDF conversion.
pub struct SofficeConverter {
    command: PathBuf,
}

impl SofficeConverter {
    pub fn new<P: Into<PathBuf>>(command: P) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn resolve(override_path: Option<&Path>) -> Self {
        Self::new(resolve_soffice_command(override_path))
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

/// LibreOffice names its output after the source stem.
pub fn expected_pdf_path(source: &Path, output_dir: &Path) -> PathBuf {
    let mut name = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "document".into());
    name.push(".pdf");
    output_dir.join(name)
}

impl OfficeConverter for SofficeConverter {
    fn name(&self) -> &'static str {
        SOFFICE
    }

    fn convert(&self, source: &Path, output_dir: &Path) -> Result<PathBuf, ProcessError> {
        std::fs::create_dir_all(output_dir).map_err(|e| ProcessError::Io {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

        run_tool(
            Command::new(&self.command)
                .arg("--headless")
                .arg("--convert-to")
                .arg("pdf")
                .arg(source)
                .arg("--outdir")
                .arg(output_dir),
            SOFFICE,
        )?;

        let pdf = expected_pdf_path(source, output_dir);
        if !pdf.exists() {
            return Err(ProcessError::MissingOutput(pdf));
        }

        log::info!("Converted {} to {}", source.display(), pdf.display());
        Ok(pdf)
    }
}
