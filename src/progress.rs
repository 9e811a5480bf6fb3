//! Progress-callback trait for per-page tracing events.
//!
//! Inject an [`Arc<dyn TraceProgressCallback>`] via
//! [`crate::config::TracerConfigBuilder::progress_callback`] to receive
//! events as the pipeline traces each page.
//!
//! Callers can forward events to a terminal progress bar, a chat message
//! that gets edited in place, or a log line, without the library knowing
//! how the host application communicates. The trait is `Send + Sync`
//! because pages are traced concurrently on the blocking thread pool.
//!
//! # Example
//!
//! ```rust
//! use stencil_trace::{TraceProgressCallback, TracerConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     paths: AtomicUsize,
//! }
//!
//! impl TraceProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _page_num: usize, _total_pages: usize, path_count: usize) {
//!         self.paths.fetch_add(path_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { paths: AtomicUsize::new(0) });
//!
//! let config = TracerConfig::builder()
//!     .progress_callback(counter as Arc<dyn TraceProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the tracing pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_page_start`, `on_page_complete` and `on_page_error` may be called
/// concurrently from different threads, in any page order.
pub trait TraceProgressCallback: Send + Sync {
    /// Called once before the first page is rasterised.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that will be traced
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page enters the preprocessor.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been turned into a vector page.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed source page number
    /// * `total_pages` — pages being traced in this request
    /// * `path_count`  — number of stroke paths on the page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, path_count: usize) {
        let _ = (page_num, total_pages, path_count);
    }

    /// Called when a page fails. The request fails with it.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been traced and assembled.
    fn on_conversion_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TraceProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TracerConfig`].
pub type ProgressCallback = Arc<dyn TraceProgressCallback>;
