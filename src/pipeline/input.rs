//! Input classification: decide once whether an upload is a document or a photo.
//!
//! ## Why stage documents to disk?
//!
//! pdfium opens documents by file-system path, and a multi-page upload has to
//! outlive the message that carried it while the requester picks pages.
//! [`InputArtifact::stage`] writes the bytes to a uniquely named file under
//! the work directory so the session layer only ever holds a path, and two
//! uploads with the same name never share one.

use crate::error::{Result, StencilError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "pnm", "pbm", "pgm", "ppm",
];

/// An upload, tagged by how it will be rasterised.
#[derive(Debug, Clone)]
pub enum InputArtifact {
    /// A page-oriented document (PDF).
    Document {
        bytes: Vec<u8>,
        name: String,
        content_type: Option<String>,
    },
    /// A single photo.
    Image { bytes: Vec<u8>, name: String },
}

impl InputArtifact {
    /// Classify an upload.
    ///
    /// The declared content type wins when it is recognisable. Otherwise the
    /// filename extension decides, and as a last resort the `%PDF` magic.
    /// Anything left over is treated as a photo and fails later if the
    /// decoders cannot read it.
    pub fn classify(bytes: Vec<u8>, name: impl Into<String>, content_type: Option<&str>) -> Self {
        let name = name.into();
        let declared = content_type.map(|c| c.trim().to_ascii_lowercase());

        let is_document = match declared.as_deref() {
            Some(ct) if ct == "application/pdf" || ct == "application/x-pdf" => true,
            Some(ct) if ct.starts_with("image/") => false,
            _ => match extension(&name).as_deref() {
                Some("pdf") => true,
                Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => false,
                _ => bytes.starts_with(b"%PDF"),
            },
        };

        debug!(
            "Classified '{}' (content type {:?}) as {}",
            name,
            declared,
            if is_document { "document" } else { "image" }
        );

        if is_document {
            InputArtifact::Document {
                bytes,
                name,
                content_type: declared,
            }
        } else {
            InputArtifact::Image { bytes, name }
        }
    }

    /// Read a local file and classify it by extension and magic bytes.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StencilError::PermissionDenied {
                    path: path.to_path_buf(),
                });
            }
            Err(_) => {
                return Err(StencilError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::classify(bytes, name, None))
    }

    pub fn name(&self) -> &str {
        match self {
            InputArtifact::Document { name, .. } | InputArtifact::Image { name, .. } => name,
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, InputArtifact::Document { .. })
    }

    /// `outlined_<stem>.pdf`, derived from the upload name.
    pub fn output_name(&self) -> String {
        output_name_for(self.name())
    }

    /// Write the artifact to a new file in `work_dir` and return its path.
    ///
    /// The file is named `<stem>-<random>.<ext>` after the upload, so a
    /// crafted upload name cannot escape the work directory and repeated
    /// uploads of one name get separate files. The caller owns the file and
    /// removes it when done.
    pub async fn stage(&self, work_dir: &Path) -> Result<PathBuf> {
        let (bytes, name) = match self {
            InputArtifact::Document { bytes, name, .. } | InputArtifact::Image { bytes, name } => {
                (bytes.clone(), name.clone())
            }
        };
        let dir = work_dir.to_path_buf();

        let path = tokio::task::spawn_blocking(move || write_staged(&dir, &name, &bytes))
            .await
            .map_err(|e| StencilError::Internal(format!("Staging task panicked: {}", e)))??;
        debug!("Staged '{}' at {}", self.name(), path.display());
        Ok(path)
    }
}

fn write_staged(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let fail = |source: std::io::Error| StencilError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(fail)?;

    let file = safe_file_name(name);
    let file = Path::new(&file);
    let prefix = format!(
        "{}-",
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    );
    let suffix = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut staged = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(fail)?;
    staged.write_all(bytes).map_err(fail)?;
    let (_, path) = staged.keep().map_err(|e| fail(e.error))?;
    Ok(path)
}

/// `outlined_<stem>.pdf` for an arbitrary input name.
pub fn output_name_for(name: &str) -> String {
    let file = safe_file_name(name);
    let stem = Path::new(&file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    format!("outlined_{}.pdf", stem)
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn safe_file_name(name: &str) -> String {
    let last = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name).trim();
    if last.is_empty() || last == "." || last == ".." {
        "upload".to_string()
    } else {
        last.to_string()
    }
}
