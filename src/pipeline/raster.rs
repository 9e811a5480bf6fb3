//! Rasterisation: turn an input artifact into fixed-resolution pixel buffers.
//!
//! Documents go through pdfium, photos through the `image` decoders. Both
//! end up as [`RasterPage`]s, so every later stage is blind to where a page
//! came from.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`count_pages`] and [`read_metadata`] move the work onto the blocking
//! thread pool, and the tracer drives [`PageRasterizer::render_pages`] from
//! a single blocking task per request.
//!
//! ## Why a trait?
//!
//! The session layer only needs "how many pages" and "render these pages".
//! [`PageRasterizer`] captures exactly that, so tests and embedders can
//! substitute a page source without a pdfium library on the machine.

use crate::error::{Result, StencilError};
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolution assigned to photos.
///
/// Decoders do not expose density metadata, so photos use the CSS/SVG pixel
/// convention: one pixel is 1/96 inch.
pub const PHOTO_DPI: f32 = 96.0;

/// One page as pixels, plus the resolution that maps pixels to inches.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 1-indexed position in the source artifact.
    pub page_num: usize,
    pub image: DynamicImage,
    pub dpi: f32,
}

impl RasterPage {
    pub fn new(page_num: usize, image: DynamicImage, dpi: f32) -> Self {
        Self {
            page_num,
            image,
            dpi,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A source of document pages.
///
/// Implementations are called from the blocking thread pool and must be
/// shareable across threads.
pub trait PageRasterizer: Send + Sync + 'static {
    /// Count the pages of the document at `path`.
    ///
    /// Fails with [`StencilError::UnreadableInput`] when the document cannot
    /// be opened or has no pages.
    fn page_count(&self, path: &Path) -> Result<usize>;

    /// Render the given 0-indexed pages at `dpi`, in the order given, and
    /// hand each one to `on_page` as soon as it is ready.
    ///
    /// The document is opened once for the whole call. An index past the
    /// end of the document fails with [`StencilError::RasterisationFailed`];
    /// an error from `on_page` stops rendering and is returned as-is.
    fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        page_indices: &[usize],
        on_page: &mut dyn FnMut(RasterPage) -> Result<()>,
    ) -> Result<()>;

    /// Describe the document without rendering it.
    fn metadata(&self, path: &Path) -> Result<DocumentMetadata> {
        Ok(DocumentMetadata {
            page_count: self.page_count(path)?,
            ..DocumentMetadata::default()
        })
    }
}

/// [`PageRasterizer`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `library` overrides the pdfium lookup; see [`PdfiumRasterizer::bind`].
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    /// Bind to pdfium.
    ///
    /// Lookup order: the explicit library path, `PDFIUM_LIB_PATH`, a library
    /// in the working directory, then the system library path.
    pub fn bind(&self) -> Result<Pdfium> {
        let explicit = self
            .library
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                debug!("Binding pdfium from {}", path.display());
                Pdfium::bind_to_library(&path)
            }
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| StencilError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    fn open<'a>(&self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>> {
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| StencilError::unreadable(display_name(path), format!("{:?}", e)))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, path: &Path) -> Result<usize> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;
        let total = document.pages().len() as usize;
        if total == 0 {
            return Err(StencilError::unreadable(
                display_name(path),
                "the document has no pages",
            ));
        }
        Ok(total)
    }

    fn render_pages(
        &self,
        path: &Path,
        dpi: u32,
        page_indices: &[usize],
        on_page: &mut dyn FnMut(RasterPage) -> Result<()>,
    ) -> Result<()> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!(
            "PDF loaded: {} pages, rendering {} at {} dpi",
            total_pages,
            page_indices.len(),
            dpi
        );

        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        for &idx in page_indices {
            let render_failed = |detail: String| StencilError::RasterisationFailed {
                page: idx + 1,
                detail,
            };
            if idx >= total_pages {
                return Err(render_failed(format!(
                    "page is out of range, the document has {} pages",
                    total_pages
                )));
            }

            let page = pages
                .get(idx as u16)
                .map_err(|e| render_failed(format!("{:?}", e)))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| render_failed(format!("{:?}", e)))?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px at {} dpi",
                idx + 1,
                image.width(),
                image.height(),
                dpi
            );

            on_page(RasterPage::new(idx + 1, image, dpi as f32))?;
        }

        Ok(())
    }

    fn metadata(&self, path: &Path) -> Result<DocumentMetadata> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;

        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        Ok(DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            page_count: document.pages().len() as usize,
            pdf_version: format!("{:?}", document.version()),
        })
    }
}

/// Count pages on the blocking pool.
pub async fn count_pages(rasterizer: &Arc<dyn PageRasterizer>, path: &Path) -> Result<usize> {
    let rasterizer = Arc::clone(rasterizer);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
        .await
        .map_err(|e| StencilError::Internal(format!("Page count task panicked: {}", e)))?
}

/// Read document metadata on the blocking pool.
pub async fn read_metadata(
    rasterizer: &Arc<dyn PageRasterizer>,
    path: &Path,
) -> Result<DocumentMetadata> {
    let rasterizer = Arc::clone(rasterizer);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterizer.metadata(&path))
        .await
        .map_err(|e| StencilError::Internal(format!("Metadata task panicked: {}", e)))?
}

/// Decode a photo into its single page.
pub fn rasterize_image(bytes: &[u8], name: &str) -> Result<RasterPage> {
    let image = image::load_from_memory(bytes).map_err(|e| StencilError::unreadable(name, e))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(StencilError::unreadable(name, "the image is empty"));
    }
    debug!(
        "Decoded image {} → {}x{} px",
        name,
        image.width(),
        image.height()
    );
    Ok(RasterPage::new(1, image, PHOTO_DPI))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[test]
    fn photo_keeps_its_own_resolution() {
        let page = rasterize_image(&png_bytes(192, 96), "photo.png").expect("decode");
        assert_eq!(page.page_num, 1);
        assert_eq!(page.dpi, PHOTO_DPI);
        assert_eq!((page.width(), page.height()), (192, 96));
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = rasterize_image(b"definitely not an image", "x.jpg").unwrap_err();
        assert!(matches!(err, StencilError::UnreadableInput { .. }));
    }
}
