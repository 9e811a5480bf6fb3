//! Result types returned by the tracing entry points.

use crate::pipeline::vector::VectorPage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The written stencil document.
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    /// Where the PDF was written.
    pub path: PathBuf,
    /// Pages in the output document.
    pub page_count: usize,
    /// 1-indexed source page number of each output page, in output order.
    pub source_pages: Vec<usize>,
    /// Rejected option tokens and similar non-fatal remarks for the caller.
    pub notices: Vec<String>,
    pub stats: TraceStats,
    /// The traced pages, kept for callers that also want SVG exports.
    #[serde(skip)]
    pub pages: Vec<VectorPage>,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    /// Pages in the source artifact (1 for photos).
    pub total_pages: usize,
    /// Pages that were traced and written.
    pub processed_pages: usize,
    /// Stroke paths across all output pages.
    pub total_paths: usize,
    /// Polygon vertices across all output pages.
    pub total_points: usize,
    pub render_duration_ms: u64,
    pub trace_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Document metadata, available without tracing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}
