//! Synthetic score PDFs for integration tests.

#![allow(dead_code)]

use add_staves::ScoreDocument;
use lopdf::{dictionary, Document, Object, Stream};
use std::fmt::Write;

/// US Letter, in points.
pub const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Geometry of a drawn test staff.
#[derive(Debug, Clone, Copy)]
pub struct StaffSpec {
    pub top_y: f32,
    pub spacing: f32,
    pub x_left: f32,
    pub x_right: f32,
    pub line_width: f32,
    /// Lines actually drawn, from the top
    pub lines: usize,
}

impl StaffSpec {
    pub fn new(top_y: f32, spacing: f32, x_left: f32, x_right: f32) -> Self {
        Self {
            top_y,
            spacing,
            x_left,
            x_right,
            line_width: 0.1 * spacing,
            lines: 5,
        }
    }

    pub fn with_lines(mut self, lines: usize) -> Self {
        self.lines = lines;
        self
    }

    pub fn shifted(mut self, dx: f32) -> Self {
        self.x_left += dx;
        self.x_right += dx;
        self
    }

    pub fn bottom_y(&self) -> f32 {
        self.top_y - 4.0 * self.spacing
    }

    /// Path operators drawing the staff lines.
    pub fn content(&self) -> String {
        let mut ops = format!("q 0 G {:.3} w\n", self.line_width);
        for i in 0..self.lines {
            let y = self.top_y - i as f32 * self.spacing;
            let _ = writeln!(ops, "{:.3} {:.3} m {:.3} {:.3} l", self.x_left, y, self.x_right, y);
        }
        ops.push_str("S Q\n");
        ops
    }

    /// Staff lines plus a few noteheads and a clef-like block, as engraved music has.
    pub fn content_with_notes(&self) -> String {
        let mut ops = self.content();
        let head_w = 1.3 * self.spacing;
        let head_h = 0.9 * self.spacing;
        for (k, step) in [0.5f32, 1.0, 2.5, 3.0, 1.5, 4.5].iter().enumerate() {
            let x = self.x_left + 40.0 + k as f32 * 55.0;
            let y = self.top_y - step * self.spacing - head_h / 2.0;
            let _ = writeln!(ops, "{:.3} {:.3} {:.3} {:.3} re f", x, y, head_w, head_h);
            // Stem
            let _ = writeln!(
                ops,
                "1 w {:.3} {:.3} m {:.3} {:.3} l S",
                x + head_w,
                y + head_h / 2.0,
                x + head_w,
                y + 3.5 * self.spacing
            );
        }
        ops
    }
}

/// What to put on one test page.
#[derive(Debug, Clone)]
pub enum PageSpec {
    /// Uncompressed content stream
    Content(String),
    /// Flate-filtered stream holding garbage
    Corrupt,
}

/// Build a document whose pages share `media_box`.
pub fn build_document(pages: &[PageSpec], media_box: [f32; 4]) -> ScoreDocument {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for spec in pages {
        let stream = match spec {
            PageSpec::Content(content) => Stream::new(dictionary! {}, content.as_bytes().to_vec()),
            PageSpec::Corrupt => Stream::new(
                dictionary! { "Filter" => "FlateDecode" },
                b"this is not a zlib stream".to_vec(),
            ),
        };
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => media_box.iter().map(|v| Object::Real((*v).into())).collect::<Vec<_>>(),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    ScoreDocument::from_lopdf(doc)
}

/// One Letter page with `content`.
pub fn single_page(content: String) -> ScoreDocument {
    build_document(&[PageSpec::Content(content)], LETTER)
}

/// One Letter page with a single staff and notes.
pub fn single_staff(spec: StaffSpec) -> ScoreDocument {
    single_page(spec.content_with_notes())
}

/// Content drawn rotated by `degrees` (counterclockwise) about `(cx, cy)`.
pub fn rotated(content: &str, degrees: f32, cx: f32, cy: f32) -> String {
    let (sin, cos) = degrees.to_radians().sin_cos();
    // Translate to origin, rotate, translate back.
    let e = cx - cos * cx + sin * cy;
    let f = cy - sin * cx - cos * cy;
    format!(
        "q {:.6} {:.6} {:.6} {:.6} {:.4} {:.4} cm\n{}Q\n",
        cos, sin, -sin, cos, e, f, content
    )
}
