//! Configuration types for tracing documents into stencil PDFs.
//!
//! Two layers of configuration exist because they have different owners:
//!
//! * [`ProcessingOptions`] belongs to a single request. It is parsed from the
//!   free-text caption that accompanies an upload (`dpi=600 stroke=3.5`) and
//!   never changes afterwards.
//! * [`TracerConfig`] belongs to the process: where artifacts are written,
//!   how many pages are traced at once, which pdfium library to bind.
//!
//! Page selection lives here too, since both the CLI and the session layer
//! parse the same `all` / `N` / `A-B` grammar.

use crate::error::{Result, StencilError};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

// ── Per-request options ──────────────────────────────────────────────────

/// Tracing knobs for one request.
///
/// Built via [`ProcessingOptions::parse`] or [`ProcessingOptions::default`].
///
/// # Example
/// ```rust
/// use stencil_trace::ProcessingOptions;
///
/// let parsed = ProcessingOptions::parse("precision=0 dpi=600 stroke=3.5");
/// assert!(parsed.rejected.is_empty());
/// assert_eq!(parsed.options.stroke_width, 3.5);
/// assert_eq!(parsed.options.simplify_ratio, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Treat dark ink on a bright background as foreground. Default: true.
    ///
    /// Scans and photos of drawings are almost always dark-on-light, so ink
    /// strokes become the traced shapes. Set `invert=false` for light lines
    /// on a dark background (chalkboards, negatives).
    pub invert: bool,

    /// Stroke width of every output path, in the page's pixel space. Default: 2.0.
    pub stroke_width: f32,

    /// Resolution at which document pages are rasterised. Default: 600.
    ///
    /// Higher values give smoother contours at the cost of time and memory.
    /// Ignored for photos, which keep their own resolution.
    pub dpi: u32,

    /// Simplification tolerance as a fraction of each contour's perimeter.
    /// Default: 0 (keep every traced point).
    pub simplify_ratio: f64,

    /// Contours with fewer points than this are treated as noise. Default: 10.
    pub min_contour_len: usize,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            invert: true,
            stroke_width: 2.0,
            dpi: 600,
            simplify_ratio: 0.0,
            min_contour_len: 10,
        }
    }
}

/// Result of parsing an options caption.
///
/// Malformed tokens never abort the parse: each one is recorded in
/// `rejected` and its key keeps the default value.
#[derive(Debug)]
pub struct ParsedOptions {
    pub options: ProcessingOptions,
    pub rejected: Vec<StencilError>,
}

impl ProcessingOptions {
    /// Parse the `key=value` mini-language.
    ///
    /// Tokens are whitespace-separated; unknown keys and tokens without `=`
    /// are ignored, and the last occurrence of a repeated key wins.
    pub fn parse(text: &str) -> ParsedOptions {
        let mut options = Self::default();
        let mut rejected = Vec::new();

        for token in text.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            if let Err(e) = options.apply(&key, value) {
                warn!("{}", e);
                rejected.push(e);
            }
        }

        ParsedOptions { options, rejected }
    }

    /// Apply one token. On error `self` is left untouched.
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let reject = |reason: &str| StencilError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match key {
            "invert" => {
                self.invert = matches!(value.to_ascii_lowercase().as_str(), "true" | "1");
            }
            "stroke" => {
                let v: f32 = value
                    .parse()
                    .map_err(|_| reject("expected a number"))?;
                if !v.is_finite() || v <= 0.0 {
                    return Err(reject("stroke width must be greater than 0"));
                }
                self.stroke_width = v;
            }
            "dpi" => {
                let v: u32 = value
                    .parse()
                    .map_err(|_| reject("expected a positive integer"))?;
                if v == 0 {
                    return Err(reject("dpi must be greater than 0"));
                }
                self.dpi = v;
            }
            "precision" => {
                let v: f64 = value
                    .parse()
                    .map_err(|_| reject("expected a number"))?;
                if !v.is_finite() || v < 0.0 {
                    return Err(reject("precision must be 0 or greater"));
                }
                self.simplify_ratio = v;
            }
            "min_len" => {
                self.min_contour_len = value
                    .parse()
                    .map_err(|_| reject("expected a non-negative integer"))?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for ProcessingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invert={} stroke={} dpi={} precision={} min_len={}",
            self.invert, self.stroke_width, self.dpi, self.simplify_ratio, self.min_contour_len
        )
    }
}

// ── Process-wide configuration ───────────────────────────────────────────

/// Configuration shared by every request handled by one process.
///
/// Built via [`TracerConfig::builder()`] or [`TracerConfig::default()`].
///
/// # Example
/// ```rust
/// use stencil_trace::TracerConfig;
///
/// let config = TracerConfig::builder()
///     .work_dir("/tmp/stencil")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct TracerConfig {
    /// Directory where uploads are staged and outputs are written. Default: `./work`.
    pub work_dir: PathBuf,

    /// Pages traced in parallel within one request. Default: available cores.
    ///
    /// Every page holds a full-resolution raster while it is being traced; at
    /// 600 dpi a Letter page is ~33 megapixels. Lower this on small machines.
    pub concurrency: usize,

    /// Explicit pdfium library path. If None, `PDFIUM_LIB_PATH`, the working
    /// directory and the system library path are tried in that order.
    pub pdfium_library: Option<PathBuf>,

    /// Optional per-page progress reporting.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TracerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerConfig")
            .field("work_dir", &self.work_dir)
            .field("concurrency", &self.concurrency)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn TraceProgressCallback>"),
            )
            .finish()
    }
}

impl TracerConfig {
    /// Create a new builder for `TracerConfig`.
    pub fn builder() -> TracerConfigBuilder {
        TracerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TracerConfig`].
#[derive(Debug)]
pub struct TracerConfigBuilder {
    config: TracerConfig,
}

impl TracerConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TracerConfig> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(StencilError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.work_dir.as_os_str().is_empty() {
            return Err(StencilError::InvalidConfig(
                "Work directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// An inclusive, 1-indexed page range known to fit its document.
///
/// Only constructed through [`PageSelection::new`] or [`PageSelection::all`],
/// so `1 ≤ first ≤ last ≤ total_pages` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSelection {
    first: usize,
    last: usize,
}

impl PageSelection {
    /// Validate `first..=last` against a document of `total` pages.
    pub fn new(first: usize, last: usize, total: usize) -> Result<Self> {
        let violation = |reason: String| StencilError::SelectionRange {
            first,
            last,
            total,
            reason,
        };

        if first < 1 {
            return Err(violation("pages are numbered from 1".into()));
        }
        if first > last {
            return Err(violation(
                "the first page must not come after the last page".into(),
            ));
        }
        if last > total {
            return Err(violation(format!("the last page must be ≤ {total}")));
        }
        Ok(Self { first, last })
    }

    /// Every page of a `total`-page document.
    pub fn all(total: usize) -> Result<Self> {
        Self::new(1, total, total)
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    /// Number of pages in the range.
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Expand the range into 0-indexed page numbers, in page order.
    pub fn to_indices(&self) -> Vec<usize> {
        (self.first - 1..self.last).collect()
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "page {}", self.first)
        } else {
            write!(f, "pages {}-{}", self.first, self.last)
        }
    }
}

/// A caller's answer to "which pages?", before it is checked against the
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReply {
    /// `all` or `*`.
    All,
    /// `N` (as `N-N`) or `A-B`.
    Range { first: usize, last: usize },
}

impl SelectionReply {
    /// Check the reply against a `total`-page document.
    pub fn resolve(self, total: usize) -> Result<PageSelection> {
        match self {
            SelectionReply::All => PageSelection::all(total),
            SelectionReply::Range { first, last } => PageSelection::new(first, last, total),
        }
    }
}

impl FromStr for SelectionReply {
    type Err = StencilError;

    fn from_str(input: &str) -> Result<Self> {
        let s = input.trim().to_lowercase();
        let syntax = |reason: &str| StencilError::SelectionSyntax {
            input: input.trim().to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(syntax("the reply is empty"));
        }

        if matches!(s.as_str(), "all" | "*") {
            return Ok(SelectionReply::All);
        }

        // Set: "1,3,5" is recognised only to be refused.
        if s.contains(',') {
            return Err(StencilError::SelectionUnsupported {
                input: input.trim().to_string(),
            });
        }

        // Range: "3-15"
        if let Some((start, end)) = s.split_once('-') {
            let first: usize = start
                .trim()
                .parse()
                .map_err(|_| syntax("the start of the range is not a page number"))?;
            let last: usize = end
                .trim()
                .parse()
                .map_err(|_| syntax("the end of the range is not a page number"))?;
            return Ok(SelectionReply::Range { first, last });
        }

        // Single page: "5"
        let page: usize = s
            .parse()
            .map_err(|_| syntax("expected all, a page number or a range like 2-4"))?;
        Ok(SelectionReply::Range {
            first: page,
            last: page,
        })
    }
}
