//! Error types for the stencil-trace library.
//!
//! A single fatal error type, [`StencilError`], covers every way a request
//! can end early. Some variants are *recoverable* in a conversation: a bad
//! page selection does not end the session, the caller is simply asked
//! again. [`StencilError::is_recoverable`] tells the two kinds apart so the
//! session layer never has to match on individual variants.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, StencilError>;

/// All errors returned by the stencil-trace library.
#[derive(Debug, Error)]
pub enum StencilError {
    // ── Option errors ─────────────────────────────────────────────────────
    /// An option token had a value of the wrong shape (e.g. `dpi=high`).
    ///
    /// The token is dropped and its key keeps the default value.
    #[error("Ignored option '{key}={value}': {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The artifact could not be decoded as a document or an image.
    #[error("Cannot read '{name}': {detail}")]
    UnreadableInput { name: String, detail: String },

    // ── Selection errors (recoverable) ────────────────────────────────────
    /// The reply is not `all`, a page number or a `first-last` range.
    #[error("'{input}' is not a page selection: {reason}")]
    SelectionSyntax { input: String, reason: String },

    /// Discrete page lists such as `1,3,5` are not supported.
    #[error("Page lists like '{input}' are unsupported; send a single page or a range such as 2-4")]
    SelectionUnsupported { input: String },

    /// The range is well-formed but does not fit the document.
    #[error("Page range {first}-{last} is invalid for a {total}-page document: {reason}")]
    SelectionRange {
        first: usize,
        last: usize,
        total: usize,
        reason: String,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Vector page synthesis met malformed contour data.
    #[error("Vector rendering failed for page {page}: {detail}")]
    Render { page: usize, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
executable, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StencilError {
    /// Whether a conversation can continue after this error.
    ///
    /// Selection mistakes re-prompt; everything else ends the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StencilError::SelectionSyntax { .. }
                | StencilError::SelectionUnsupported { .. }
                | StencilError::SelectionRange { .. }
        )
    }

    pub(crate) fn unreadable(name: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        StencilError::UnreadableInput {
            name: name.into(),
            detail: detail.to_string(),
        }
    }
}
