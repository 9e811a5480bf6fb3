//! # stencil-trace
//!
//! Redraw scanned documents and photos as stroke-only vector outlines,
//! packaged as a PDF ready for a cutting plotter or a stencil print.
//!
//! ## Why this crate?
//!
//! Scans of line art are pixels: enlarging them blurs every edge, and cutters
//! cannot follow them at all. This crate finds the boundaries of the dark
//! shapes on each page, reduces them to polygons with a tunable tolerance and
//! writes them back as vector paths at the page's physical size.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / photo
//!  │
//!  ├─ 1. Input       classify as document or photo, stage to the work dir
//!  ├─ 2. Raster      render selected pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Preprocess  bilateral → adaptive threshold → closing → Canny
//!  ├─ 4. Contours    outer borders only, noise filtered by length
//!  ├─ 5. Simplify    Douglas-Peucker, tolerance relative to perimeter
//!  ├─ 6. Vector      one stroked PDF page (and SVG) per source page
//!  └─ 7. Assemble    merge in page order, write atomically
//! ```
//!
//! Multi-page uploads go through [`SessionOrchestrator`], which asks the
//! sender which pages to trace before any page is rendered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stencil_trace::{ProcessingOptions, Tracer, TracerConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracer = Tracer::new(TracerConfig::default());
//!     let parsed = ProcessingOptions::parse("stroke=1.5 precision=0.0005");
//!     let artifact = tracer
//!         .trace_file(Path::new("drawing.pdf"), &parsed.options, None)
//!         .await?;
//!     eprintln!("{} paths on {} pages → {}",
//!         artifact.stats.total_paths,
//!         artifact.page_count,
//!         artifact.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stencil` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! stencil-trace = { version = "0.1", default-features = false }
//! ```
//!
//! ## Tuning
//!
//! | Option | Effect of raising it |
//! |--------|----------------------|
//! | `dpi`       | smoother outlines, more points, slower |
//! | `precision` | fewer points per outline; `0` keeps every traced pixel |
//! | `min_len`   | more specks and dust dropped |
//! | `stroke`    | heavier lines in the output |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    PageSelection, ParsedOptions, ProcessingOptions, SelectionReply, TracerConfig,
    TracerConfigBuilder,
};
pub use convert::{trace_page, Tracer};
pub use error::{Result, StencilError};
pub use output::{DocumentMetadata, OutputArtifact, TraceStats};
pub use pipeline::input::InputArtifact;
pub use pipeline::raster::{PageRasterizer, PdfiumRasterizer, RasterPage};
pub use pipeline::vector::VectorPage;
pub use progress::{NoopProgressCallback, ProgressCallback, TraceProgressCallback};
pub use session::{Inbound, Outcome, SessionOrchestrator, SessionState, SessionStore};
