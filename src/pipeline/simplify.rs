//! Contour simplification with a perimeter-relative tolerance.
//!
//! The tolerance is `ratio × perimeter`, so the same ratio removes a
//! similar share of detail whether a page was rendered at 150 or 1200 dpi.
//!
//! Ramer-Douglas-Peucker works on open polylines. A closed ring is split at
//! the vertex farthest from its first vertex and each half is simplified on
//! its own; both split points survive, so the ring stays closed and the
//! output is an ordered subsequence of the input.

use crate::pipeline::contour::{Contour, Point, MIN_POLYGON_POINTS};
use geo::{EuclideanDistance, SimplifyIdx};
use geo_types::{Coord, Line, LineString};
use serde::{Deserialize, Serialize};

/// A closed polygon obtained from a [`Contour`] by dropping vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedContour {
    points: Vec<Point>,
}

impl SimplifiedContour {
    /// Wrap points as-is. Rendering rejects fewer than three.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<Contour> for SimplifiedContour {
    fn from(c: Contour) -> Self {
        Self::from_points(c.into_points())
    }
}

/// Simplify one contour.
///
/// `ratio == 0` returns the contour's points unchanged. Any input with at
/// least three points yields at least three points.
pub fn simplify_contour(contour: &Contour, ratio: f64) -> SimplifiedContour {
    let points = contour.points();
    if ratio <= 0.0 || points.len() <= MIN_POLYGON_POINTS {
        return SimplifiedContour::from_points(points.to_vec());
    }

    let epsilon = ratio * contour.perimeter();
    let Some(split) = farthest_from_start(points) else {
        return SimplifiedContour::from_points(points.to_vec());
    };

    let mut keep = simplify_ring(points, split, epsilon);
    if keep.len() < MIN_POLYGON_POINTS {
        clamp_to_triangle(points, split, &mut keep);
    }

    SimplifiedContour::from_points(keep.into_iter().map(|i| points[i]).collect())
}

/// Simplify every contour of a page.
pub fn simplify_all(contours: &[Contour], ratio: f64) -> Vec<SimplifiedContour> {
    contours.iter().map(|c| simplify_contour(c, ratio)).collect()
}

/// Index of the vertex farthest from `points[0]`, or None if every vertex
/// coincides with it.
fn farthest_from_start(points: &[Point]) -> Option<usize> {
    let origin = points[0];
    let (idx, dist) = points
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, p)| (i, origin.distance(p)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
    (dist > 0.0).then_some(idx)
}

/// Kept indices into `points`, ascending, always including 0 and `split`.
fn simplify_ring(points: &[Point], split: usize, epsilon: f64) -> Vec<usize> {
    let head = line_string(points[..=split].iter());
    let mut keep = head.simplify_idx(&epsilon);

    // Second half runs split → end → back to the start.
    let tail = line_string(points[split..].iter().chain(std::iter::once(&points[0])));
    let closing = points.len() - split;
    keep.extend(
        tail.simplify_idx(&epsilon)
            .into_iter()
            .filter(|&j| j != 0 && j != closing)
            .map(|j| split + j),
    );
    keep
}

/// Add the vertex that deviates most from the `0 → split` chord.
fn clamp_to_triangle(points: &[Point], split: usize, keep: &mut Vec<usize>) {
    let chord = Line::new(Coord::from(points[0]), Coord::from(points[split]));
    let extra = (0..points.len())
        .filter(|i| !keep.contains(i))
        .map(|i| {
            let p = geo_types::Point::from(Coord::from(points[i]));
            (i, p.euclidean_distance(&chord))
        })
        .fold(None, |best: Option<(usize, f64)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        });

    if let Some((i, _)) = extra {
        keep.push(i);
        keep.sort_unstable();
    }
}

fn line_string<'a>(points: impl Iterator<Item = &'a Point>) -> LineString<f64> {
    LineString::new(points.map(|&p| Coord::from(p)).collect())
}
