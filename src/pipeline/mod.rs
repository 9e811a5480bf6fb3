//! Pipeline stages for raster-to-stencil tracing.
//!
//! Each submodule implements exactly one transformation step. Stages after
//! rasterisation are pure functions of their input, so each one is tested
//! on synthetic pixels without a pdfium library.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ raster ──▶ preprocess ──▶ contour ──▶ simplify ──▶ vector ──▶ assemble
//! (bytes)  (pdfium)   (edge mask)    (outlines)  (RDP)        (1 page)   (N pages)
//! ```
//!
//! 1. [`input`]: classify an upload as document or photo and stage it
//! 2. [`raster`]: render selected pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`preprocess`]: denoise, threshold, close gaps, detect edges
//! 4. [`contour`]: trace outer boundaries of the edge mask
//! 5. [`simplify`]: drop vertices within a perimeter-relative tolerance
//! 6. [`vector`]: emit one stroked PDF page (and optional SVG)
//! 7. [`assemble`]: merge page PDFs in page order and write atomically

pub mod assemble;
pub mod contour;
pub mod input;
pub mod preprocess;
pub mod raster;
pub mod simplify;
pub mod vector;
