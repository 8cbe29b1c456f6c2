//! Horizontal extent of a detected staff.
//!
//! Measured column by column against the five line rows, independent of the
//! row projection, so dashed or interrupted lines still span their staff.

use crate::sampler::SampledImage;

/// Pixel span `[start, end]` (inclusive columns) of a staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColumnRun {
    pub start: u32,
    pub end: u32,
}

impl ColumnRun {
    fn len(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// The five staff lines as seen by the extent scan.
pub(crate) struct LineBand {
    /// Line centres (continuous pixel rows) at the horizontal centre
    pub centers: [f32; 5],
    /// Half height of the band searched around each line
    pub half_height: f32,
    /// Row drift per column (tangent of the pixel-space skew)
    pub slope: f32,
}

impl LineBand {
    /// Number of lines carrying ink in column `x`.
    pub fn lines_inked(&self, image: &SampledImage, x: u32) -> usize {
        let cx = image.width() as f32 / 2.0;
        let drift = (x as f32 + 0.5 - cx) * self.slope;
        self.centers
            .iter()
            .filter(|&&center| {
                let y = center + drift;
                // Rows whose centres fall within the band.
                let first = (y - self.half_height - 0.5).ceil().max(0.0) as u32;
                let last = (y + self.half_height - 0.5).floor();
                if last < 0.0 {
                    return false;
                }
                (first..=last as u32).any(|row| image.is_ink(x, row))
            })
            .count()
    }
}

/// Longest run of columns where at least `min_lines` lines have ink.
///
/// Qualifying columns separated by at most `bridge` non-qualifying columns
/// belong to the same run. Returns the run and, when there is none, the most
/// lines seen inked in any column.
pub(crate) fn measure_extent(
    image: &SampledImage,
    band: &LineBand,
    min_lines: usize,
    bridge: u32,
) -> Result<ColumnRun, usize> {
    let mut best: Option<ColumnRun> = None;
    let mut current: Option<ColumnRun> = None;
    let mut most_lines = 0;

    for x in 0..image.width() {
        let lines = band.lines_inked(image, x);
        most_lines = most_lines.max(lines);
        if lines < min_lines {
            continue;
        }

        current = match current {
            Some(run) if x - run.end - 1 <= bridge => Some(ColumnRun { end: x, ..run }),
            Some(run) => {
                best = longer(best, run);
                Some(ColumnRun { start: x, end: x })
            },
            None => Some(ColumnRun { start: x, end: x }),
        };
    }
    if let Some(run) = current {
        best = longer(best, run);
    }

    best.ok_or(most_lines)
}

fn longer(best: Option<ColumnRun>, candidate: ColumnRun) -> Option<ColumnRun> {
    match best {
        Some(b) if b.len() >= candidate.len() => Some(b),
        _ => Some(candidate),
    }
}
