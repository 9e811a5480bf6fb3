//! End-to-end tracing entry points.
//!
//! [`Tracer`] owns the process configuration and a [`PageRasterizer`], and
//! turns an input into a written stencil PDF:
//!
//! ```text
//! count pages ─▶ render loop ──(bounded channel)──▶ per page: preprocess ─▶ contours
//!                (one task)                          ─▶ simplify ─▶ PDF page
//!                                                    (concurrent, bounded)
//!             ─▶ sort by page ─▶ assemble ─▶ atomic write
//! ```
//!
//! ## Why a bounded render channel?
//!
//! A Letter page at 600 dpi is ~33 megapixels. One blocking task binds
//! pdfium and opens the document once, then renders the selection in page
//! order into a channel of `concurrency` slots. Rendering pauses while the
//! tracing pool is full, so at most `2 × concurrency` rasters are alive.

use crate::config::{PageSelection, ProcessingOptions, SelectionReply, TracerConfig};
use crate::error::{Result, StencilError};
use crate::output::{DocumentMetadata, OutputArtifact, TraceStats};
use crate::pipeline::assemble;
use crate::pipeline::contour::extract_contours;
use crate::pipeline::input::{output_name_for, InputArtifact};
use crate::pipeline::preprocess::preprocess;
use crate::pipeline::raster::{self, PageRasterizer, PdfiumRasterizer, RasterPage};
use crate::pipeline::simplify::simplify_all;
use crate::pipeline::vector::VectorPage;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Trace one raster page into a vector page.
///
/// Pure and CPU-bound; callers on an async runtime should run it on the
/// blocking pool.
pub fn trace_page(page: &RasterPage, options: &ProcessingOptions) -> VectorPage {
    let mask = preprocess(page, options.invert);
    let contours = extract_contours(&mask, options.min_contour_len);
    let simplified = simplify_all(&contours, options.simplify_ratio);

    debug!(
        "Page {}: {} edge pixels, {} contours, {} → {} points",
        page.page_num,
        mask.edge_count(),
        contours.len(),
        contours.iter().map(|c| c.len()).sum::<usize>(),
        simplified.iter().map(|c| c.len()).sum::<usize>()
    );

    VectorPage::new(
        page.page_num,
        simplified,
        page.width(),
        page.height(),
        page.dpi,
        options.stroke_width,
    )
}

/// One finished page, ready for assembly.
struct TracedPage {
    vector: VectorPage,
    pdf: Vec<u8>,
    render_ms: u64,
    trace_ms: u64,
}

/// A raster on its way from the render loop to the tracing pool.
struct Rendered {
    raster: RasterPage,
    render_ms: u64,
}

/// Where pages come from.
enum PageSource {
    Document {
        path: PathBuf,
        dpi: u32,
        /// 0-indexed, in page order.
        indices: Vec<usize>,
    },
    Image {
        bytes: Vec<u8>,
        name: String,
    },
}

fn trace_rendered(rendered: Rendered, options: &ProcessingOptions) -> Result<TracedPage> {
    let trace_start = Instant::now();
    let vector = trace_page(&rendered.raster, options);
    drop(rendered.raster);
    let pdf = vector.to_pdf_page()?;

    Ok(TracedPage {
        vector,
        pdf,
        render_ms: rendered.render_ms,
        trace_ms: trace_start.elapsed().as_millis() as u64,
    })
}

/// Drives the pipeline for one process.
///
/// Cheap to clone; clones share the rasterizer.
///
/// # Example
/// ```rust,no_run
/// use stencil_trace::{ProcessingOptions, Tracer, TracerConfig};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tracer = Tracer::new(TracerConfig::default());
/// let options = ProcessingOptions::parse("stroke=3 precision=0.002").options;
/// let artifact = tracer.trace_file(Path::new("drawing.pdf"), &options, None).await?;
/// println!("{} pages → {}", artifact.page_count, artifact.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Tracer {
    config: TracerConfig,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// A tracer that renders documents with pdfium.
    pub fn new(config: TracerConfig) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library.clone()));
        Self { config, rasterizer }
    }

    /// A tracer with a custom document page source.
    pub fn with_rasterizer(config: TracerConfig, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { config, rasterizer }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Count the pages of a document on disk.
    pub async fn page_count(&self, path: &Path) -> Result<usize> {
        raster::count_pages(&self.rasterizer, path).await
    }

    /// Read document metadata without tracing anything.
    pub async fn inspect(&self, path: &Path) -> Result<DocumentMetadata> {
        raster::read_metadata(&self.rasterizer, path).await
    }

    /// Trace a document, or the pages of `selection` only, into `output`.
    ///
    /// Pages outside the selection are never rasterised and do not appear in
    /// the output.
    pub async fn trace_document(
        &self,
        input: &Path,
        output: &Path,
        options: &ProcessingOptions,
        selection: Option<PageSelection>,
    ) -> Result<OutputArtifact> {
        let total_start = Instant::now();
        let total_pages = self.page_count(input).await?;
        let selection = match selection {
            Some(s) => PageSelection::new(s.first(), s.last(), total_pages)?,
            None => PageSelection::all(total_pages)?,
        };
        info!(
            "Tracing {} of '{}' ({} pages) with {}",
            selection,
            input.display(),
            total_pages,
            options
        );

        let source = PageSource::Document {
            path: input.to_path_buf(),
            dpi: options.dpi,
            indices: selection.to_indices(),
        };
        self.run(source, selection.len(), total_pages, output, options, total_start)
            .await
    }

    /// Trace a single photo into `output`.
    pub async fn trace_image(
        &self,
        bytes: Vec<u8>,
        name: &str,
        output: &Path,
        options: &ProcessingOptions,
    ) -> Result<OutputArtifact> {
        let total_start = Instant::now();
        info!("Tracing image '{}' with {}", name, options);
        let source = PageSource::Image {
            bytes,
            name: name.to_string(),
        };
        self.run(source, 1, 1, output, options, total_start).await
    }

    /// Trace a local file into `<work_dir>/outlined_<stem>.pdf`.
    ///
    /// Documents use `selection` when given and every page otherwise; photos
    /// ignore it.
    pub async fn trace_file(
        &self,
        path: &Path,
        options: &ProcessingOptions,
        selection: Option<SelectionReply>,
    ) -> Result<OutputArtifact> {
        let artifact = InputArtifact::from_path(path).await?;
        let output = self.config.work_dir.join(output_name_for(artifact.name()));

        match artifact {
            InputArtifact::Image { bytes, name } => {
                if selection.is_some() {
                    warn!("Ignoring page selection for image '{}'", name);
                }
                self.trace_image(bytes, &name, &output, options).await
            }
            InputArtifact::Document { .. } => {
                let selection = match selection {
                    Some(reply) => Some(reply.resolve(self.page_count(path).await?)?),
                    None => None,
                };
                self.trace_document(path, &output, options, selection).await
            }
        }
    }

    /// Synchronous wrapper around [`Tracer::trace_file`].
    ///
    /// Creates a temporary tokio runtime internally; do not call it from
    /// inside an async context.
    pub fn trace_file_sync(
        &self,
        path: &Path,
        options: &ProcessingOptions,
        selection: Option<SelectionReply>,
    ) -> Result<OutputArtifact> {
        tokio::runtime::Runtime::new()
            .map_err(|e| StencilError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.trace_file(path, options, selection))
    }

    /// Start the render loop on the blocking pool.
    ///
    /// Pages arrive on the returned channel in source order. The loop ends
    /// when the source is exhausted or the first page fails to render.
    fn spawn_renderer(
        &self,
        source: PageSource,
    ) -> (mpsc::Receiver<Rendered>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(self.config.concurrency);
        let rasterizer = Arc::clone(&self.rasterizer);

        let handle = tokio::task::spawn_blocking(move || {
            let mut started = Instant::now();
            let mut deliver = |raster: RasterPage| -> Result<()> {
                let render_ms = started.elapsed().as_millis() as u64;
                tx.blocking_send(Rendered { raster, render_ms })
                    .map_err(|_| StencilError::Internal("Page consumer went away".into()))?;
                started = Instant::now();
                Ok(())
            };

            match source {
                PageSource::Document { path, dpi, indices } => {
                    rasterizer.render_pages(&path, dpi, &indices, &mut deliver)
                }
                PageSource::Image { bytes, name } => {
                    deliver(raster::rasterize_image(&bytes, &name)?)
                }
            }
        });

        (rx, handle)
    }

    /// Trace `expected` pages concurrently, assemble in page order, write.
    async fn run(
        &self,
        source: PageSource,
        expected: usize,
        total_pages: usize,
        output: &Path,
        options: &ProcessingOptions,
        total_start: Instant,
    ) -> Result<OutputArtifact> {
        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_conversion_start(expected);
        }

        let (pages, renderer) = self.spawn_renderer(source);

        let results: Vec<Result<TracedPage>> =
            stream::unfold(pages, |mut rx| async move { rx.recv().await.map(|p| (p, rx)) })
                .map(|rendered| {
                    let options = *options;
                    let callback = callback.clone();
                    async move {
                        let page_num = rendered.raster.page_num;
                        if let Some(ref cb) = callback {
                            cb.on_page_start(page_num, expected);
                        }
                        let result =
                            tokio::task::spawn_blocking(move || trace_rendered(rendered, &options))
                                .await
                                .map_err(|e| {
                                    StencilError::Internal(format!(
                                        "Page {} task panicked: {}",
                                        page_num, e
                                    ))
                                })
                                .and_then(|r| r);
                        if let Some(ref cb) = callback {
                            match &result {
                                Ok(p) => {
                                    cb.on_page_complete(page_num, expected, p.vector.path_count())
                                }
                                Err(e) => cb.on_page_error(page_num, expected, &e.to_string()),
                            }
                        }
                        result
                    }
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;

        let rendered = renderer
            .await
            .map_err(|e| StencilError::Internal(format!("Render task panicked: {}", e)))?;
        if let Err(e) = rendered {
            if let (Some(cb), StencilError::RasterisationFailed { page, .. }) = (&callback, &e) {
                cb.on_page_error(*page, expected, &e.to_string());
            }
            return Err(e);
        }

        let mut traced = results.into_iter().collect::<Result<Vec<_>>>()?;
        if traced.len() != expected {
            return Err(StencilError::Internal(format!(
                "Expected {} pages from the rasterizer, got {}",
                expected,
                traced.len()
            )));
        }
        traced.sort_by_key(|p| p.vector.page_num);

        let render_duration_ms = traced.iter().map(|p| p.render_ms).sum();
        let trace_duration_ms = traced.iter().map(|p| p.trace_ms).sum();
        let total_paths = traced.iter().map(|p| p.vector.path_count()).sum();
        let total_points = traced.iter().map(|p| p.vector.point_count()).sum();

        let (source_pages, pdfs): (Vec<usize>, Vec<(usize, Vec<u8>)>) = traced
            .iter_mut()
            .map(|p| {
                let n = p.vector.page_num;
                (n, (n, std::mem::take(&mut p.pdf)))
            })
            .unzip();

        let document = tokio::task::spawn_blocking(move || assemble::assemble(pdfs))
            .await
            .map_err(|e| StencilError::Internal(format!("Assembly task panicked: {}", e)))??;
        assemble::write_atomically(output, document).await?;

        if let Some(ref cb) = callback {
            cb.on_conversion_complete(expected);
        }

        let stats = TraceStats {
            total_pages,
            processed_pages: traced.len(),
            total_paths,
            total_points,
            render_duration_ms,
            trace_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Wrote {} ({} pages, {} paths) in {}ms",
            output.display(),
            stats.processed_pages,
            stats.total_paths,
            stats.total_duration_ms
        );

        Ok(OutputArtifact {
            path: output.to_path_buf(),
            page_count: traced.len(),
            source_pages,
            notices: Vec::new(),
            stats,
            pages: traced.into_iter().map(|p| p.vector).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn drawing() -> RasterPage {
        let mut img = RgbImage::from_pixel(200, 150, Rgb([250, 250, 250]));
        draw_filled_rect_mut(&mut img, Rect::at(30, 30).of_size(50, 40), Rgb([20, 20, 20]));
        draw_filled_rect_mut(&mut img, Rect::at(120, 60).of_size(40, 60), Rgb([20, 20, 20]));
        RasterPage::new(1, DynamicImage::ImageRgb8(img), 96.0)
    }

    #[test]
    fn trace_page_finds_both_shapes() {
        let page = trace_page(&drawing(), &ProcessingOptions::default());
        assert!(page.path_count() >= 2, "got {} paths", page.path_count());
        let (left, right): (Vec<&_>, Vec<&_>) = page
            .contours
            .iter()
            .flat_map(|c| c.points())
            .partition(|p| p.x < 100);
        assert!(!left.is_empty() && !right.is_empty());
        assert_eq!((page.pixel_width, page.pixel_height), (200, 150));
        assert_eq!(page.stroke_width, 2.0);
    }

    #[test]
    fn blank_page_traces_to_empty_page() {
        let img = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        let raster = RasterPage::new(1, DynamicImage::ImageRgb8(img), 96.0);
        let page = trace_page(&raster, &ProcessingOptions::default());
        assert_eq!(page.path_count(), 0);
        assert!(page.to_pdf_page().is_ok());
    }

    #[test]
    fn sync_wrapper_traces_a_photo() {
        use image::ImageFormat;
        use std::io::Cursor;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("shapes.png");
        let mut buf = Vec::new();
        drawing()
            .image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        std::fs::write(&input, buf).unwrap();

        let config = TracerConfig::builder().work_dir(dir.path()).build().unwrap();
        let artifact = Tracer::new(config)
            .trace_file_sync(&input, &ProcessingOptions::default(), None)
            .unwrap();
        assert_eq!(artifact.path, dir.path().join("outlined_shapes.pdf"));
        assert_eq!(artifact.page_count, 1);
    }

    /// Renders `pages` copies of the test drawing; optionally skips or fails
    /// on one page.
    struct ScriptedRasterizer {
        pages: usize,
        skip: Option<usize>,
        fail: Option<usize>,
        calls: std::sync::Mutex<Vec<Vec<usize>>>,
    }

    impl ScriptedRasterizer {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                skip: None,
                fail: None,
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl PageRasterizer for ScriptedRasterizer {
        fn page_count(&self, _path: &Path) -> Result<usize> {
            Ok(self.pages)
        }

        fn render_pages(
            &self,
            _path: &Path,
            dpi: u32,
            page_indices: &[usize],
            on_page: &mut dyn FnMut(RasterPage) -> Result<()>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(page_indices.to_vec());
            for &idx in page_indices {
                if self.fail == Some(idx) {
                    return Err(StencilError::RasterisationFailed {
                        page: idx + 1,
                        detail: "scripted failure".into(),
                    });
                }
                if self.skip == Some(idx) {
                    continue;
                }
                let mut page = drawing();
                page.page_num = idx + 1;
                page.dpi = dpi as f32;
                on_page(page)?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Errors(std::sync::Mutex<Vec<usize>>);

    impl crate::progress::TraceProgressCallback for Errors {
        fn on_page_error(&self, page_num: usize, _total_pages: usize, _error: &str) {
            self.0.lock().unwrap().push(page_num);
        }
    }

    fn scripted(
        dir: &Path,
        rasterizer: Arc<ScriptedRasterizer>,
        concurrency: usize,
    ) -> (Tracer, Arc<Errors>) {
        let errors = Arc::new(Errors::default());
        let config = TracerConfig::builder()
            .work_dir(dir)
            .concurrency(concurrency)
            .progress_callback(Arc::clone(&errors) as crate::progress::ProgressCallback)
            .build()
            .unwrap();
        (Tracer::with_rasterizer(config, rasterizer), errors)
    }

    #[tokio::test]
    async fn document_is_rendered_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = Arc::new(ScriptedRasterizer::new(4));
        let (tracer, _) = scripted(dir.path(), Arc::clone(&rasterizer), 1);
        let out = dir.path().join("out.pdf");

        let artifact = tracer
            .trace_document(
                Path::new("doc.pdf"),
                &out,
                &ProcessingOptions::default(),
                Some(PageSelection::new(2, 4, 4).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(*rasterizer.calls.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(artifact.source_pages, vec![2, 3, 4]);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn render_failure_fails_the_request() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = Arc::new(ScriptedRasterizer {
            fail: Some(1),
            ..ScriptedRasterizer::new(3)
        });
        let (tracer, errors) = scripted(dir.path(), rasterizer, 2);
        let out = dir.path().join("out.pdf");

        let err = tracer
            .trace_document(Path::new("doc.pdf"), &out, &ProcessingOptions::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StencilError::RasterisationFailed { page: 2, .. }));
        assert_eq!(*errors.0.lock().unwrap(), vec![2]);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn missing_page_is_an_error_not_a_shorter_document() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = Arc::new(ScriptedRasterizer {
            skip: Some(0),
            ..ScriptedRasterizer::new(2)
        });
        let (tracer, _) = scripted(dir.path(), rasterizer, 2);
        let out = dir.path().join("out.pdf");

        let err = tracer
            .trace_document(Path::new("doc.pdf"), &out, &ProcessingOptions::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StencilError::Internal(_)));
        assert!(!out.exists());
    }

    #[test]
    fn min_len_filters_at_trace_time() {
        let options = ProcessingOptions {
            min_contour_len: 1_000_000,
            ..ProcessingOptions::default()
        };
        assert_eq!(trace_page(&drawing(), &options).path_count(), 0);
    }
}
