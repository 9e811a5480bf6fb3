//! Vector page synthesis: polygons + page size → SVG and one-page PDF.
//!
//! Paths are built in pixel space (origin top-left, y down). The SVG keeps
//! pixel units in its `viewBox` and declares the physical size in points;
//! the PDF page gets a single `cm` transform that scales pixels to points
//! and flips the y axis. Stroke width is written as given in both, so it is
//! measured in the same units as the geometry.

use crate::error::{Result, StencilError};
use crate::pipeline::contour::MIN_POLYGON_POINTS;
use crate::pipeline::simplify::SimplifiedContour;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::fmt::{self, Write};

/// One output page of stroke-only geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPage {
    /// 1-indexed source page number.
    pub page_num: usize,
    pub contours: Vec<SimplifiedContour>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Pixels per inch of the raster the contours were traced on.
    pub dpi: f32,
    pub stroke_width: f32,
}

impl VectorPage {
    pub fn new(
        page_num: usize,
        contours: Vec<SimplifiedContour>,
        pixel_width: u32,
        pixel_height: u32,
        dpi: f32,
        stroke_width: f32,
    ) -> Self {
        Self {
            page_num,
            contours,
            pixel_width,
            pixel_height,
            dpi,
            stroke_width,
        }
    }

    fn scale(&self) -> f32 {
        72.0 / self.dpi
    }

    /// Page width in PDF points.
    pub fn width_pt(&self) -> f32 {
        self.pixel_width as f32 * self.scale()
    }

    /// Page height in PDF points.
    pub fn height_pt(&self) -> f32 {
        self.pixel_height as f32 * self.scale()
    }

    pub fn path_count(&self) -> usize {
        self.contours.len()
    }

    pub fn point_count(&self) -> usize {
        self.contours.iter().map(|c| c.len()).sum()
    }

    fn render_error(&self, detail: impl Into<String>) -> StencilError {
        StencilError::Render {
            page: self.page_num,
            detail: detail.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(self.render_error(format!("invalid resolution {}", self.dpi)));
        }
        if !(self.stroke_width.is_finite() && self.stroke_width > 0.0) {
            return Err(self.render_error(format!("invalid stroke width {}", self.stroke_width)));
        }
        if let Some((i, c)) = self
            .contours
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() < MIN_POLYGON_POINTS)
        {
            return Err(self.render_error(format!(
                "contour {} has {} points, a polygon needs at least {}",
                i,
                c.len(),
                MIN_POLYGON_POINTS
            )));
        }
        Ok(())
    }

    /// Serialize the page as a standalone SVG document.
    pub fn to_svg(&self) -> Result<String> {
        self.validate()?;
        let mut svg = String::new();
        self.write_svg(&mut svg)
            .map_err(|e| self.render_error(format!("SVG serialization failed: {}", e)))?;
        Ok(svg)
    }

    fn write_svg(&self, w: &mut impl Write) -> fmt::Result {
        writeln!(w, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            w,
            r#"<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{}pt" height="{}pt" viewBox="0 0 {} {}">"#,
            self.width_pt(),
            self.height_pt(),
            self.pixel_width,
            self.pixel_height
        )?;
        for contour in &self.contours {
            write!(w, r#"  <path d=""#)?;
            write_path_data(contour, w)?;
            writeln!(
                w,
                r#"" fill="none" stroke="black" stroke-width="{}"/>"#,
                self.stroke_width
            )?;
        }
        writeln!(w, "</svg>")
    }

    /// Content stream operations for the page.
    fn operations(&self) -> Vec<Operation> {
        let s = self.scale();
        let mut ops = Vec::with_capacity(self.point_count() + 2 * self.path_count() + 6);

        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                s.into(),
                0.into(),
                0.into(),
                (-s).into(),
                0.into(),
                self.height_pt().into(),
            ],
        ));
        ops.push(Operation::new("w", vec![self.stroke_width.into()]));
        ops.push(Operation::new("RG", vec![0.into(), 0.into(), 0.into()]));
        ops.push(Operation::new("J", vec![1.into()]));
        ops.push(Operation::new("j", vec![1.into()]));

        for contour in &self.contours {
            for (i, p) in contour.points().iter().enumerate() {
                let op = if i == 0 { "m" } else { "l" };
                ops.push(Operation::new(op, vec![p.x.into(), p.y.into()]));
            }
            ops.push(Operation::new("h", vec![]));
            ops.push(Operation::new("S", vec![]));
        }

        ops.push(Operation::new("Q", vec![]));
        ops
    }

    /// Serialize the page as a one-page PDF.
    pub fn to_pdf_page(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let content = Content {
            operations: self.operations(),
        }
        .encode()
        .map_err(|e| self.render_error(format!("content stream encoding failed: {}", e)))?;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), self.width_pt().into(), self.height_pt().into()],
            "Contents" => content_id,
            "Resources" => dictionary! {},
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| self.render_error(format!("PDF serialization failed: {}", e)))?;
        Ok(buffer)
    }
}

/// SVG path data, `M x y L x y … Z`, in pixel units.
fn write_path_data(contour: &SimplifiedContour, w: &mut impl Write) -> fmt::Result {
    for (i, p) in contour.points().iter().enumerate() {
        let cmd = if i == 0 { 'M' } else { 'L' };
        write!(w, "{}{} {} ", cmd, p.x, p.y)?;
    }
    w.write_char('Z')
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::contour::Point;

    pub(crate) fn number(obj: &Object) -> f64 {
        match obj {
            Object::Integer(i) => *i as f64,
            Object::Real(r) => *r as f64,
            other => panic!("not a number: {other:?}"),
        }
    }

    fn triangle() -> SimplifiedContour {
        SimplifiedContour::from_points(vec![
            Point::new(10, 10),
            Point::new(50, 10),
            Point::new(30, 40),
        ])
    }

    fn page(stroke: f32) -> VectorPage {
        VectorPage::new(1, vec![triangle(), triangle()], 600, 300, 300.0, stroke)
    }

    #[test]
    fn physical_size_in_points() {
        let p = page(2.0);
        assert!((p.width_pt() - 144.0).abs() < 1e-4);
        assert!((p.height_pt() - 72.0).abs() < 1e-4);
    }

    #[test]
    fn path_data_is_closed() {
        let svg = page(2.0).to_svg().unwrap();
        assert_eq!(svg.matches(r#"d="M10 10 L50 10 L30 40 Z""#).count(), 2);
    }

    #[test]
    fn svg_carries_stroke_width_and_paths() {
        let svg = page(3.5).to_svg().unwrap();
        assert_eq!(svg.matches("<path ").count(), 2);
        assert!(svg.contains(r#"stroke-width="3.5""#));
        assert!(svg.contains(r#"fill="none""#));
        assert!(svg.contains(r#"viewBox="0 0 600 300""#));
    }

    #[test]
    fn pdf_page_has_media_box_and_stroke() {
        let bytes = page(3.5).to_pdf_page().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = *pages.get(&1).unwrap();
        let dict = doc.get_dictionary(page_id).unwrap();
        let media_box = dict.get(b"MediaBox").unwrap().as_array().unwrap();
        assert!((number(&media_box[2]) - 144.0).abs() < 1e-3);
        assert!((number(&media_box[3]) - 72.0).abs() < 1e-3);

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let w = content
            .operations
            .iter()
            .find(|op| op.operator == "w")
            .unwrap();
        assert!((number(&w.operands[0]) - 3.5).abs() < 1e-6);
        assert_eq!(
            content.operations.iter().filter(|op| op.operator == "S").count(),
            2
        );
        assert!(content.operations.iter().all(|op| op.operator != "f"));
    }

    #[test]
    fn empty_page_still_renders() {
        let p = VectorPage::new(4, vec![], 100, 100, 96.0, 2.0);
        let bytes = p.to_pdf_page().unwrap();
        assert_eq!(Document::load_mem(&bytes).unwrap().get_pages().len(), 1);
    }

    #[test]
    fn degenerate_contour_is_a_render_error() {
        let bad = SimplifiedContour::from_points(vec![Point::new(0, 0), Point::new(1, 1)]);
        let p = VectorPage::new(7, vec![triangle(), bad], 100, 100, 96.0, 2.0);
        match p.to_pdf_page() {
            Err(StencilError::Render { page, .. }) => assert_eq!(page, 7),
            other => panic!("expected render error, got {other:?}"),
        }
        assert!(p.to_svg().is_err());
    }
}
