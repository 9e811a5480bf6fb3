//! Contour extraction: trace the outer boundaries of an edge mask.
//!
//! Border following is Suzuki-Abe via `imageproc::contours::find_contours`.
//! Only top-level outer borders are kept; holes and anything nested inside
//! a hole are dropped, so a shape is outlined once.
//!
//! The tracer's discovery order depends on scan order over the mask, which
//! is stable but not meaningful. [`extract_contours`] sorts the result by
//! bounding-box corner so identical masks always yield identical output.

use crate::pipeline::preprocess::EdgeMask;
use geo::EuclideanLength;
use geo_types::{Coord, LineString};
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fewer points than this cannot form a polygon.
pub const MIN_POLYGON_POINTS: usize = 3;

/// Integer pixel coordinate, origin at the top-left of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx.hypot(dy)
    }
}

impl From<Point> for Coord<f64> {
    fn from(p: Point) -> Self {
        Coord {
            x: p.x as f64,
            y: p.y as f64,
        }
    }
}

/// Axis-aligned bounds of a point set, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

/// A closed traced boundary. The last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    points: Vec<Point>,
}

impl Contour {
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The contour as a closed `LineString`: the first point is repeated
    /// at the end.
    pub fn ring(&self) -> LineString<f64> {
        let mut ring: LineString<f64> = self.points.iter().map(|&p| Coord::from(p)).collect();
        ring.close();
        ring
    }

    /// Length of the closed polyline, including the closing segment.
    pub fn perimeter(&self) -> f64 {
        self.ring().euclidean_length()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.points.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.points.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }
}

/// Trace outer contours with at least `min_len` points.
///
/// Contours shorter than three points are always discarded, whatever
/// `min_len` says. Output is sorted by the top-left corner of each
/// contour's bounding box, row first.
pub fn extract_contours(mask: &EdgeMask, min_len: usize) -> Vec<Contour> {
    let threshold = min_len.max(MIN_POLYGON_POINTS);
    let traced = find_contours::<i32>(mask.as_image());
    let traced_count = traced.len();

    let mut contours: Vec<Contour> = traced
        .into_iter()
        .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
        .filter(|c| c.points.len() >= threshold)
        .map(|c| {
            Contour::from_points(c.points.into_iter().map(|p| Point::new(p.x, p.y)).collect())
        })
        .collect();

    contours.sort_by_key(|c| {
        c.bounding_box()
            .map(|b| (b.min_y, b.min_x))
            .unwrap_or((i32::MAX, i32::MAX))
    });

    debug!(
        "Traced {} borders, kept {} outer contours (min_len={})",
        traced_count,
        contours.len(),
        threshold
    );
    contours
}
