//! Content stream interpretation onto a tiny-skia pixmap.
//!
//! Executes path, color, state and XObject operators against a graphics
//! state stack. Text is not drawn: staff lines are engraved as paths or
//! scanned as images, and glyphs only add noise to the row profile.

use super::images::{cmyk_to_rgb, decode_image, luminance};
use super::Deadline;
use crate::document::{read_numbers, resolve, stream_data};
use crate::error::SampleError;
use crate::geometry::Matrix;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Stream};
use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Stroke,
    StrokeDash, Transform,
};

/// Form XObjects nested deeper than this are not drawn.
const MAX_FORM_DEPTH: usize = 12;

/// Operators executed between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Graphics state subset that affects where ink lands.
#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    line_width: f32,
    line_cap: u8,
    line_join: u8,
    miter_limit: f32,
    dash: (Vec<f32>, f32),
    /// Fill gray level, 0 = black
    fill_gray: f32,
    /// Stroke gray level, 0 = black
    stroke_gray: f32,
    fill_alpha: f32,
    stroke_alpha: f32,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            line_width: 1.0,
            line_cap: 0,
            line_join: 0,
            miter_limit: 10.0,
            dash: (Vec::new(), 0.0),
            fill_gray: 0.0,
            stroke_gray: 0.0,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
        }
    }
}

/// Renders content streams into one pixmap.
pub(crate) struct ContentRenderer<'a> {
    doc: &'a Document,
    pixmap: Pixmap,
    /// Native → pixel transform
    base: Matrix,
    deadline: Option<Deadline>,
    ops_since_check: usize,
    skipped_images: usize,
}

impl<'a> ContentRenderer<'a> {
    /// Create a white canvas of the given size.
    pub(crate) fn new(
        doc: &'a Document,
        width: u32,
        height: u32,
        base: Matrix,
        deadline: Option<Deadline>,
    ) -> Result<Self, SampleError> {
        let mut pixmap = Pixmap::new(width, height).ok_or(SampleError::InvalidPageBox)?;
        pixmap.fill(Color::WHITE);
        Ok(Self {
            doc,
            pixmap,
            base,
            deadline,
            ops_since_check: 0,
            skipped_images: 0,
        })
    }

    /// Execute a content stream with `ctm` as the initial transform.
    pub(crate) fn render(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: Matrix,
        depth: usize,
    ) -> Result<(), SampleError> {
        let content = Content::decode(content).map_err(|e| SampleError::Content {
            reason: format!("content stream parse failed: {}", e),
        })?;

        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut gs = GraphicsState::new(ctm);
        let mut path = PathBuilder::new();

        for op in &content.operations {
            self.check_deadline()?;
            let args = numbers(op);

            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                },
                "cm" => {
                    if let Some(m) = six(&args) {
                        gs.ctm = Matrix::from_array(m).multiply(&gs.ctm);
                    }
                },

                "w" => set_first(&args, &mut gs.line_width),
                "M" => set_first(&args, &mut gs.miter_limit),
                "J" => {
                    if let Some(cap) = args.first() {
                        gs.line_cap = *cap as u8;
                    }
                },
                "j" => {
                    if let Some(join) = args.first() {
                        gs.line_join = *join as u8;
                    }
                },
                "d" => gs.dash = dash_pattern(self.doc, op),
                "gs" => self.apply_ext_g_state(&mut gs, op, resources),

                "g" => set_first(&args, &mut gs.fill_gray),
                "G" => set_first(&args, &mut gs.stroke_gray),
                "rg" => {
                    if let [r, g, b] = args[..] {
                        gs.fill_gray = luminance(r, g, b);
                    }
                },
                "RG" => {
                    if let [r, g, b] = args[..] {
                        gs.stroke_gray = luminance(r, g, b);
                    }
                },
                "k" => {
                    if let [c, m, y, k] = args[..] {
                        let (r, g, b) = cmyk_to_rgb(c, m, y, k);
                        gs.fill_gray = luminance(r, g, b);
                    }
                },
                "K" => {
                    if let [c, m, y, k] = args[..] {
                        let (r, g, b) = cmyk_to_rgb(c, m, y, k);
                        gs.stroke_gray = luminance(r, g, b);
                    }
                },
                // Selecting a color space resets the color to its initial value (black).
                "cs" => gs.fill_gray = 0.0,
                "CS" => gs.stroke_gray = 0.0,
                "sc" | "scn" => gs.fill_gray = components_to_gray(&args, gs.fill_gray),
                "SC" | "SCN" => gs.stroke_gray = components_to_gray(&args, gs.stroke_gray),

                "m" => {
                    if let [x, y] = args[..] {
                        path.move_to(x, y);
                    }
                },
                "l" => {
                    if let [x, y] = args[..] {
                        path.line_to(x, y);
                    }
                },
                "c" => {
                    if let [x1, y1, x2, y2, x3, y3] = args[..] {
                        path.cubic_to(x1, y1, x2, y2, x3, y3);
                    }
                },
                "v" => {
                    if let [x2, y2, x3, y3] = args[..] {
                        if let Some(last) = path.last_point() {
                            path.cubic_to(last.x, last.y, x2, y2, x3, y3);
                        }
                    }
                },
                "y" => {
                    if let [x1, y1, x3, y3] = args[..] {
                        path.cubic_to(x1, y1, x3, y3, x3, y3);
                    }
                },
                "re" => {
                    if let [x, y, w, h] = args[..] {
                        push_rect(&mut path, x, y, w, h);
                    }
                },
                "h" => path.close(),

                "S" => {
                    let finished = std::mem::replace(&mut path, PathBuilder::new()).finish();
                    if let Some(p) = finished {
                        self.stroke(&p, &gs);
                    }
                },
                "s" => {
                    path.close();
                    let finished = std::mem::replace(&mut path, PathBuilder::new()).finish();
                    if let Some(p) = finished {
                        self.stroke(&p, &gs);
                    }
                },
                "f" | "F" | "f*" => {
                    let rule = fill_rule(&op.operator);
                    let finished = std::mem::replace(&mut path, PathBuilder::new()).finish();
                    if let Some(p) = finished {
                        self.fill(&p, &gs, rule);
                    }
                },
                "B" | "B*" | "b" | "b*" => {
                    if op.operator.starts_with('b') {
                        path.close();
                    }
                    let rule = fill_rule(&op.operator);
                    let finished = std::mem::replace(&mut path, PathBuilder::new()).finish();
                    if let Some(p) = finished {
                        self.fill(&p, &gs, rule);
                        self.stroke(&p, &gs);
                    }
                },
                "n" => path = PathBuilder::new(),
                // Clipping is not applied.
                "W" | "W*" => {},

                "Do" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.paint_xobject(name, &gs, resources, depth)?;
                    }
                },

                _ => {},
            }
        }

        Ok(())
    }

    /// Images that could not be decoded and were left out.
    pub(crate) fn skipped_images(&self) -> usize {
        self.skipped_images
    }

    /// Finish rendering and hand out the pixmap.
    pub(crate) fn finish(self) -> Pixmap {
        self.pixmap
    }

    fn check_deadline(&mut self) -> Result<(), SampleError> {
        self.ops_since_check += 1;
        if self.ops_since_check >= DEADLINE_CHECK_INTERVAL {
            self.ops_since_check = 0;
            if let Some(deadline) = &self.deadline {
                deadline.check()?;
            }
        }
        Ok(())
    }

    fn transform(&self, gs: &GraphicsState) -> Transform {
        gs.ctm.multiply(&self.base).to_skia()
    }

    fn stroke(&mut self, path: &Path, gs: &GraphicsState) {
        let transform = self.transform(gs);
        let paint = gray_paint(gs.stroke_gray, gs.stroke_alpha);

        // Keep strokes at least one device pixel wide so thin staff lines survive binarization.
        let device_scale = (transform.sx * transform.sy - transform.kx * transform.ky)
            .abs()
            .sqrt();
        let min_width = if device_scale > 0.0 {
            1.0 / device_scale
        } else {
            0.0
        };

        let stroke = Stroke {
            width: gs.line_width.max(min_width),
            line_cap: match gs.line_cap {
                1 => LineCap::Round,
                2 => LineCap::Square,
                _ => LineCap::Butt,
            },
            line_join: match gs.line_join {
                1 => LineJoin::Round,
                2 => LineJoin::Bevel,
                _ => LineJoin::Miter,
            },
            miter_limit: gs.miter_limit,
            dash: if gs.dash.0.is_empty() {
                None
            } else {
                StrokeDash::new(gs.dash.0.clone(), gs.dash.1)
            },
        };

        self.pixmap
            .stroke_path(path, &paint, &stroke, transform, None);
    }

    fn fill(&mut self, path: &Path, gs: &GraphicsState, rule: FillRule) {
        let transform = self.transform(gs);
        let paint = gray_paint(gs.fill_gray, gs.fill_alpha);
        self.pixmap.fill_path(path, &paint, rule, transform, None);

        // Sub-pixel fills (hairline rectangles) would vanish under anti-aliasing.
        let thin = path
            .clone()
            .transform(transform)
            .map(|device| {
                let bounds = device.bounds();
                bounds.width() < 1.0 || bounds.height() < 1.0
            })
            .unwrap_or(false);
        if thin {
            let hairline = Stroke {
                width: 0.0,
                ..Stroke::default()
            };
            self.pixmap
                .stroke_path(path, &paint, &hairline, transform, None);
        }
    }

    fn paint_xobject(
        &mut self,
        name: &[u8],
        gs: &GraphicsState,
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<(), SampleError> {
        let doc = self.doc;
        let Some(stream) = resources
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|x| resolve(doc, x))
            .and_then(|x| x.as_dict().ok())
            .and_then(|x| x.get(name).ok())
            .and_then(|x| resolve(doc, x))
            .and_then(|x| x.as_stream().ok())
        else {
            log::debug!("XObject /{} not found in resources", String::from_utf8_lossy(name));
            return Ok(());
        };

        let subtype = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .unwrap_or_default();
        match subtype {
            b"Image" => {
                if let Some(deadline) = &self.deadline {
                    deadline.check()?;
                }
                self.paint_image(stream, gs, name);
            },
            b"Form" => self.paint_form(stream, gs, resources, depth)?,
            _ => {},
        }
        Ok(())
    }

    fn paint_image(&mut self, stream: &Stream, gs: &GraphicsState, name: &[u8]) {
        let image = match decode_image(self.doc, stream, gs.fill_gray) {
            Ok(image) => image,
            Err(reason) => {
                log::warn!(
                    "Skipping image /{}: {}",
                    String::from_utf8_lossy(name),
                    reason
                );
                self.skipped_images += 1;
                return;
            },
        };

        // Image space is the unit square with row 0 at the top.
        let (w, h) = (image.width() as f32, image.height() as f32);
        let unit = Matrix::from_array([1.0 / w, 0.0, 0.0, -1.0 / h, 0.0, 1.0]);
        let transform = unit.multiply(&gs.ctm).multiply(&self.base).to_skia();

        let paint = PixmapPaint {
            quality: tiny_skia::FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, image.as_ref(), &paint, transform, None);
    }

    fn paint_form(
        &mut self,
        stream: &'a Stream,
        gs: &GraphicsState,
        parent_resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<(), SampleError> {
        if depth >= MAX_FORM_DEPTH {
            log::warn!("Form XObject nesting exceeds {}, not drawn", MAX_FORM_DEPTH);
            return Ok(());
        }
        let doc = self.doc;
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| read_numbers(doc, m))
            .and_then(|m| six(&m))
            .map(Matrix::from_array)
            .unwrap_or_default();
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve(doc, r))
            .and_then(|r| r.as_dict().ok())
            .or(parent_resources);
        let content = stream_data(stream).map_err(|reason| SampleError::Content { reason })?;

        self.render(&content, resources, matrix.multiply(&gs.ctm), depth + 1)
    }

    fn apply_ext_g_state(
        &self,
        gs: &mut GraphicsState,
        op: &Operation,
        resources: Option<&Dictionary>,
    ) {
        let doc = self.doc;
        let Some(state) = op
            .operands
            .first()
            .and_then(|n| n.as_name().ok())
            .and_then(|name| {
                resources?
                    .get(b"ExtGState")
                    .ok()
                    .and_then(|e| resolve(doc, e))?
                    .as_dict()
                    .ok()?
                    .get(name)
                    .ok()
            })
            .and_then(|s| resolve(doc, s))
            .and_then(|s| s.as_dict().ok())
        else {
            return;
        };

        let number = |key: &[u8]| {
            state
                .get(key)
                .ok()
                .and_then(|v| resolve(doc, v))
                .and_then(|v| v.as_float().ok())
        };
        if let Some(lw) = number(b"LW") {
            gs.line_width = lw;
        }
        if let Some(ca) = number(b"ca") {
            gs.fill_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(ca) = number(b"CA") {
            gs.stroke_alpha = ca.clamp(0.0, 1.0);
        }
    }
}

/// Numeric operands; non-numeric operands are dropped.
fn numbers(op: &Operation) -> Vec<f32> {
    op.operands
        .iter()
        .filter_map(|o| o.as_float().ok())
        .collect()
}

fn six(args: &[f32]) -> Option<[f32; 6]> {
    args.try_into().ok()
}

fn set_first(args: &[f32], target: &mut f32) {
    if let Some(value) = args.first() {
        *target = *value;
    }
}

fn components_to_gray(args: &[f32], current: f32) -> f32 {
    match *args {
        [gray] => gray,
        [r, g, b] => luminance(r, g, b),
        [c, m, y, k] => {
            let (r, g, b) = cmyk_to_rgb(c, m, y, k);
            luminance(r, g, b)
        },
        // Pattern or unknown component count
        _ => current,
    }
}

fn dash_pattern(doc: &Document, op: &Operation) -> (Vec<f32>, f32) {
    let array = op
        .operands
        .first()
        .and_then(|a| read_numbers(doc, a))
        .unwrap_or_default();
    let phase = op
        .operands
        .get(1)
        .and_then(|p| p.as_float().ok())
        .unwrap_or(0.0);
    // All-zero patterns are invalid and would stall the dasher.
    if array.iter().all(|v| *v <= 0.0) {
        return (Vec::new(), 0.0);
    }
    (array, phase)
}

fn fill_rule(operator: &str) -> FillRule {
    if operator.ends_with('*') {
        FillRule::EvenOdd
    } else {
        FillRule::Winding
    }
}

/// Append a rectangle, normalizing negative extents.
fn push_rect(path: &mut PathBuilder, x: f32, y: f32, w: f32, h: f32) {
    let (x0, x1) = if w < 0.0 { (x + w, x) } else { (x, x + w) };
    let (y0, y1) = if h < 0.0 { (y + h, y) } else { (y, y + h) };
    if let Some(rect) = tiny_skia::Rect::from_ltrb(x0, y0, x1, y1) {
        path.push_rect(rect);
    } else {
        // Zero-area rectangle: keep it as a degenerate outline so hairline fills still mark it.
        path.move_to(x0, y0);
        path.line_to(x1, y0);
        path.line_to(x1, y1);
        path.line_to(x0, y1);
        path.close();
    }
}

fn gray_paint(gray: f32, alpha: f32) -> Paint<'static> {
    let level = gray.clamp(0.0, 1.0);
    let mut paint = Paint::default();
    let color = Color::from_rgba(level, level, level, alpha.clamp(0.0, 1.0));
    paint.set_color(color.unwrap_or(Color::BLACK));
    paint.anti_alias = true;
    paint
}
