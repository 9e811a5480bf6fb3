//! Preprocessing: raster page → binary edge mask.
//!
//! The steps run in a fixed order:
//!
//! 1. luma conversion
//! 2. bilateral smoothing (flattens scan grain, keeps stroke boundaries sharp)
//! 3. adaptive Gaussian threshold (tolerates uneven lighting across a page)
//! 4. morphological closing (bridges pinholes and hairline gaps in strokes)
//! 5. Canny edge detection on the cleaned binary mask
//!
//! Every constant below is a tuning value for scanned line art, not a
//! request option.

use crate::pipeline::raster::RasterPage;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::bilateral::{bilateral_filter, GaussianEuclideanColorDistance};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;

/// Bilateral filter neighbourhood diameter, in pixels.
const BILATERAL_DIAMETER: u32 = 7;
const BILATERAL_SIGMA_COLOR: f64 = 50.0;
const BILATERAL_SIGMA_SPACE: f64 = 50.0;

/// Adaptive threshold neighbourhood, in pixels (odd).
const THRESHOLD_BLOCK: u32 = 51;
/// A pixel must be this much darker than its neighbourhood to count as ink.
const THRESHOLD_OFFSET: f32 = 8.0;

/// L1 radius 2 equals two passes of a 3×3 cross.
const CLOSE_RADIUS: u8 = 2;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Binary edge mask: 255 on edges, 0 elsewhere.
///
/// Same dimensions as the page it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMask(GrayImage);

impl EdgeMask {
    /// Wrap an existing binary image. Any non-zero pixel counts as an edge.
    pub fn from_image(image: GrayImage) -> Self {
        Self(image)
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Number of edge pixels.
    pub fn edge_count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] != 0).count()
    }
}

/// Run the full preprocessing chain on one page.
pub fn preprocess(page: &RasterPage, invert: bool) -> EdgeMask {
    edge_mask(&page.image.to_luma8(), invert)
}

/// Preprocess an already single-channel image.
pub fn edge_mask(gray: &GrayImage, invert: bool) -> EdgeMask {
    let smoothed = smooth(
        gray,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );
    let binary = adaptive_threshold(&smoothed, invert);
    let closed = close(&binary, Norm::L1, CLOSE_RADIUS);
    EdgeMask(canny(&closed, CANNY_LOW, CANNY_HIGH))
}

/// Edge-preserving smoothing over a `diameter`-pixel window.
pub fn smooth(image: &GrayImage, diameter: u32, sigma_color: f64, sigma_space: f64) -> GrayImage {
    let radius = u8::try_from((diameter / 2).max(1)).unwrap_or(u8::MAX);
    bilateral_filter(
        image,
        radius,
        sigma_space as f32,
        GaussianEuclideanColorDistance::new(sigma_color as f32),
    )
}

/// Gaussian-weighted local threshold.
///
/// With `invert` set, pixels darker than their neighbourhood by more than
/// the offset become foreground (dark ink on bright paper). Without it the
/// polarity flips and everything else becomes foreground.
pub fn adaptive_threshold(image: &GrayImage, invert: bool) -> GrayImage {
    let local_mean = gaussian_blur_f32(image, block_sigma(THRESHOLD_BLOCK));

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0] as f32;
        let mean = local_mean.get_pixel(x, y).0[0] as f32;
        let ink = v <= mean - THRESHOLD_OFFSET;
        if ink == invert {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Gaussian sigma matching a square block of `size` pixels.
fn block_sigma(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}
