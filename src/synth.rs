//! Analytical staff synthesis.
//!
//! Builds blank 5-line staves beneath a detected staff, matching its spacing
//! and horizontal extent exactly.

use crate::config::ProcessConfig;
use crate::detector::StaffGeometry;
use serde::Serialize;

/// Stroke width as a fraction of spacing when no thickness was measured.
const DEFAULT_STROKE_RATIO: f32 = 0.1;

/// Accepted stroke width range as fractions of spacing.
const STROKE_RATIO_RANGE: (f32, f32) = (0.05, 0.25);

/// A horizontal line in native coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineSegment {
    /// Left end
    pub x0: f32,
    /// Right end
    pub x1: f32,
    /// Height
    pub y: f32,
}

/// Five new staff lines, top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedStaff {
    /// Lines ordered top to bottom
    pub lines: [LineSegment; 5],
    /// Distance between adjacent lines
    pub spacing: f32,
    /// Stroke width to draw with
    pub stroke_width: f32,
}

impl SynthesizedStaff {
    /// The top line's y.
    pub fn top_y(&self) -> f32 {
        self.lines[0].y
    }

    /// The bottom line's y.
    pub fn bottom_y(&self) -> f32 {
        self.lines[4].y
    }

    /// Horizontal length of every line.
    pub fn width(&self) -> f32 {
        self.lines[0].x1 - self.lines[0].x0
    }
}

/// Pure construction of analytical staves from detected geometry.
pub struct StaffSynthesizer;

impl StaffSynthesizer {
    /// One staff whose top line lies `gap` spacings below the bottom detected line.
    ///
    /// # Examples
    ///
    /// ```
    /// use add_staves::detector::StaffGeometry;
    /// use add_staves::synth::StaffSynthesizer;
    ///
    /// let detected = StaffGeometry::uniform(600.0, 8.0, 72.0, 540.0);
    /// let staff = StaffSynthesizer::synthesize(&detected, 3.0);
    /// assert_eq!(staff.top_y(), 568.0 - 24.0);
    /// assert_eq!(staff.spacing, 8.0);
    /// assert_eq!(staff.width(), detected.width());
    /// ```
    pub fn synthesize(geometry: &StaffGeometry, gap: f32) -> SynthesizedStaff {
        let spacing = geometry.spacing;
        let bottom = geometry.bottom_y();

        let mut lines = [LineSegment {
            x0: geometry.x_left,
            x1: geometry.x_right,
            y: 0.0,
        }; 5];
        for (i, line) in lines.iter_mut().enumerate() {
            line.y = bottom - (gap + i as f32) * spacing;
        }

        SynthesizedStaff {
            lines,
            spacing,
            stroke_width: stroke_width(geometry),
        }
    }

    /// `config.staff_count` staves, each `staff_separation` spacings below the last.
    pub fn synthesize_stack(
        geometry: &StaffGeometry,
        config: &ProcessConfig,
    ) -> Vec<SynthesizedStaff> {
        // Offset from one staff's top line to the next one's.
        let pitch = 4.0 + config.staff_separation;
        (0..config.staff_count)
            .map(|k| Self::synthesize(geometry, config.gap_in_spacing_units + k as f32 * pitch))
            .collect()
    }
}

fn stroke_width(geometry: &StaffGeometry) -> f32 {
    let spacing = geometry.spacing;
    let (lo, hi) = STROKE_RATIO_RANGE;
    match geometry.line_thickness {
        Some(t) if t.is_finite() && t > 0.0 => t.clamp(lo * spacing, hi * spacing),
        _ => DEFAULT_STROKE_RATIO * spacing,
    }
}
