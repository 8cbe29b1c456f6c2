//! Overlay composition.
//!
//! Turns synthesized staves into content that is *added* to a page: the
//! original content streams are wrapped in `q`/`Q` and left untouched, and
//! the new lines are drawn afterwards in default user space.

use crate::document::Page;
use crate::error::ComposeError;
use crate::geometry::Rect;
use crate::synth::SynthesizedStaff;
use lopdf::content::{Content, Operation};
use lopdf::Object;

/// Margin kept below the lowest new line when the page is extended, in spacings.
const EXTEND_MARGIN_SPACINGS: f32 = 0.5;

/// Additive changes for one page, applied by
/// [`ScoreDocument::apply_overlay`](crate::document::ScoreDocument::apply_overlay).
#[derive(Debug, Clone, PartialEq)]
pub struct PageOverlay {
    /// Zero-based page index
    pub index: usize,
    /// Stream placed before the original content
    pub prefix: Vec<u8>,
    /// Stream placed after the original content (closes the prefix, then draws)
    pub suffix: Vec<u8>,
    /// Replacement MediaBox when the page grows
    pub media_box: Option<Rect>,
    /// Replacement CropBox when the page grows
    pub crop_box: Option<Rect>,
}

/// Builds [`PageOverlay`]s.
#[derive(Debug, Clone)]
pub struct OverlayComposer {
    extend_page: bool,
}

impl Default for OverlayComposer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OverlayComposer {
    /// Composer that grows page boxes to fit the new staves when `extend_page` is set.
    pub fn new(extend_page: bool) -> Self {
        Self { extend_page }
    }

    /// Compose the overlay drawing `staves` on `page`.
    pub fn compose(
        &self,
        page: &Page<'_>,
        staves: &[SynthesizedStaff],
    ) -> Result<PageOverlay, ComposeError> {
        let prefix = encode(vec![Operation::new("q", vec![])])?;

        let mut ops = vec![Operation::new("Q", vec![])];
        ops.extend(staff_operations(staves));
        let suffix = encode(ops)?;

        let (media_box, crop_box) = if self.extend_page {
            self.extended_boxes(page, staves)
        } else {
            (None, None)
        };

        Ok(PageOverlay {
            index: page.index(),
            prefix,
            suffix,
            media_box,
            crop_box,
        })
    }

    fn extended_boxes(
        &self,
        page: &Page<'_>,
        staves: &[SynthesizedStaff],
    ) -> (Option<Rect>, Option<Rect>) {
        let Some(lowest) = staves
            .iter()
            .map(|s| s.bottom_y() - s.stroke_width / 2.0 - EXTEND_MARGIN_SPACINGS * s.spacing)
            .reduce(f32::min)
        else {
            return (None, None);
        };

        let visible = page.visible_box();
        if lowest >= visible.bottom() {
            return (None, None);
        }

        log::debug!(
            "Page {}: extending page bottom from {:.2} to {:.2}",
            page.index(),
            visible.bottom(),
            lowest
        );
        let media_box = page.media_box();
        let media = (lowest < media_box.bottom()).then(|| media_box.extended_down_to(lowest));
        let crop = page.crop_box().map(|_| visible.extended_down_to(lowest));
        (media, crop)
    }
}

/// Operators drawing every line of `staves` as solid black butt-capped strokes.
fn staff_operations(staves: &[SynthesizedStaff]) -> Vec<Operation> {
    let mut ops = Vec::new();
    for staff in staves {
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("G", vec![real(0.0)]));
        ops.push(Operation::new("J", vec![Object::Integer(0)]));
        ops.push(Operation::new("d", vec![Object::Array(vec![]), Object::Integer(0)]));
        ops.push(Operation::new("w", vec![real(staff.stroke_width)]));
        for line in &staff.lines {
            ops.push(Operation::new("m", vec![real(line.x0), real(line.y)]));
            ops.push(Operation::new("l", vec![real(line.x1), real(line.y)]));
        }
        ops.push(Operation::new("S", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }
    ops
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

fn encode(operations: Vec<Operation>) -> Result<Vec<u8>, ComposeError> {
    let mut bytes = Content { operations }
        .encode()
        .map_err(|e| ComposeError::Encode {
            reason: e.to_string(),
        })?;
    bytes.push(b'\n');
    Ok(bytes)
}
