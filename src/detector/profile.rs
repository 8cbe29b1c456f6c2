//! Horizontal projection profiles and staff-line peak analysis.

use crate::sampler::{SampledImage, INK_THRESHOLD};
use crate::utils::safe_float_cmp;

/// Angular resolution of the skew search, in degrees.
pub(crate) const SKEW_STEP_DEGREES: f32 = 0.1;

/// Windows with a gap below this many pixels are never staves.
pub(crate) const MIN_GAP_PX: f32 = 3.0;

/// A run of rows whose ink ratio clears the peak threshold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Peak {
    /// Ratio-weighted centroid, continuous pixel row (row `r` spans `[r, r + 1)`)
    pub center: f32,
    /// First row of the run
    pub start: usize,
    /// Last row of the run (inclusive)
    pub end: usize,
    /// Effective width in pixels
    pub thickness: f32,
}

/// Five consecutive peaks evaluated as a candidate staff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Window {
    /// Index of the first peak
    pub first: usize,
    /// Mean gap in pixels
    pub mean_gap: f32,
    /// Largest relative deviation of a gap from the mean
    pub deviation: f32,
    /// Gap variance relative to the squared mean
    pub variance: f32,
}

impl Window {
    /// Peak indices covered by this window.
    pub fn peaks(&self) -> std::ops::RangeInclusive<usize> {
        self.first..=self.first + 4
    }

    fn overlaps(&self, other: &Window) -> bool {
        self.first <= other.first + 4 && other.first <= self.first + 4
    }
}

/// Outcome of evaluating every 5-peak window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WindowSearch {
    /// Windows within tolerance, in peak order
    pub accepted: Vec<Window>,
    /// Smallest deviation seen among windows with plausible gaps
    pub best_deviation: Option<f32>,
}

/// Coordinates of every ink pixel relative to the horizontal centre.
///
/// Collected once so the skew search touches only ink.
pub(crate) struct InkPoints {
    points: Vec<(f32, f32)>,
    rows: usize,
    width: u32,
}

impl InkPoints {
    pub fn collect(image: &SampledImage) -> Self {
        let cx = image.width() as f32 / 2.0;
        let mut points = Vec::new();
        for y in 0..image.height() {
            let row = image.row(y);
            for (x, &lum) in row.iter().enumerate() {
                if lum < INK_THRESHOLD {
                    points.push((x as f32 + 0.5 - cx, y as f32 + 0.5));
                }
            }
        }
        Self {
            points,
            rows: image.height() as usize,
            width: image.width(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Ink count per sheared row for a skew of `degrees` (pixel space, y down).
    pub fn counts(&self, degrees: f32) -> Vec<u32> {
        let tan = degrees.to_radians().tan();
        let mut counts = vec![0u32; self.rows];
        for &(dx, y) in &self.points {
            let r = (y - dx * tan).floor();
            if r >= 0.0 && (r as usize) < self.rows {
                counts[r as usize] += 1;
            }
        }
        counts
    }

    /// Ink ratio (count / width) per sheared row.
    pub fn ratios(&self, degrees: f32) -> Vec<f32> {
        let width = self.width.max(1) as f32;
        self.counts(degrees)
            .into_iter()
            .map(|c| c as f32 / width)
            .collect()
    }
}

/// Result of the skew search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SkewEstimate {
    /// Sharpest angle in pixel space (positive: lines descend to the right on screen)
    pub degrees: f32,
    /// The sharpest angle sits on the edge of the searched range
    pub on_boundary: bool,
}

/// Search `[-tolerance, +tolerance]` for the angle with the sharpest profile.
///
/// Sharpness is the sum of squared row counts. Ties go to the smaller
/// angle, so a flat profile yields zero.
pub(crate) fn find_skew(ink: &InkPoints, tolerance: f32) -> SkewEstimate {
    let steps = (tolerance / SKEW_STEP_DEGREES).round() as i32;
    if steps <= 0 || ink.is_empty() {
        return SkewEstimate {
            degrees: 0.0,
            on_boundary: false,
        };
    }

    let sharpness = |step: i32| -> f64 {
        ink.counts(step as f32 * SKEW_STEP_DEGREES)
            .iter()
            .map(|&c| (c as f64) * (c as f64))
            .sum()
    };

    let mut best_step = 0;
    let mut best_score = sharpness(0);
    for magnitude in 1..=steps {
        for step in [magnitude, -magnitude] {
            let score = sharpness(step);
            if score > best_score {
                best_score = score;
                best_step = step;
            }
        }
    }

    SkewEstimate {
        degrees: best_step as f32 * SKEW_STEP_DEGREES,
        on_boundary: best_step.abs() == steps,
    }
}

/// Group rows with `ratio >= threshold × max` into peaks.
pub(crate) fn find_peaks(ratios: &[f32], threshold: f32) -> Vec<Peak> {
    let max = ratios.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let cutoff = threshold * max;

    let mut peaks = Vec::new();
    let mut row = 0;
    while row < ratios.len() {
        if ratios[row] < cutoff {
            row += 1;
            continue;
        }
        let start = row;
        while row < ratios.len() && ratios[row] >= cutoff {
            row += 1;
        }
        peaks.push(measure_peak(ratios, start, row - 1));
    }

    log::trace!(
        "Found {} peaks: {:?}",
        peaks.len(),
        peaks.iter().map(|p| p.center).collect::<Vec<_>>()
    );
    peaks
}

fn measure_peak(ratios: &[f32], start: usize, end: usize) -> Peak {
    let run = &ratios[start..=end];
    let weight: f32 = run.iter().sum();
    let center = run
        .iter()
        .enumerate()
        .map(|(i, v)| ((start + i) as f32 + 0.5) * v)
        .sum::<f32>()
        / weight;

    // Anti-aliased shoulders just outside the run still belong to the line.
    let peak_max = run.iter().cloned().fold(0.0f32, f32::max);
    let shoulder = 0.25 * peak_max;
    let lo = start.saturating_sub(1);
    let hi = (end + 1).min(ratios.len() - 1);
    let area: f32 = (lo..=hi)
        .map(|r| ratios[r])
        .filter(|&v| v >= shoulder)
        .sum();

    Peak {
        center,
        start,
        end,
        thickness: area / peak_max,
    }
}

/// Evaluate every run of 5 consecutive peaks against `tolerance`.
pub(crate) fn search_windows(peaks: &[Peak], tolerance: f32) -> WindowSearch {
    let mut accepted = Vec::new();
    let mut best_deviation: Option<f32> = None;

    for first in 0..peaks.len().saturating_sub(4) {
        let gaps: Vec<f32> = (first..first + 4)
            .map(|i| peaks[i + 1].center - peaks[i].center)
            .collect();
        if gaps.iter().any(|&g| g < MIN_GAP_PX) {
            continue;
        }
        let mean = gaps.iter().sum::<f32>() / 4.0;
        let deviation = gaps
            .iter()
            .map(|g| (g - mean).abs() / mean)
            .fold(0.0f32, f32::max);
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f32>() / 4.0 / (mean * mean);

        best_deviation = Some(best_deviation.map_or(deviation, |d| d.min(deviation)));
        if deviation < tolerance {
            accepted.push(Window {
                first,
                mean_gap: mean,
                deviation,
                variance,
            });
        }
    }

    WindowSearch {
        accepted,
        best_deviation,
    }
}

/// Pick non-overlapping windows, most regular first; result is in peak order.
pub(crate) fn disjoint_groups(accepted: &[Window]) -> Vec<Window> {
    let mut by_regularity = accepted.to_vec();
    by_regularity.sort_by(|a, b| {
        safe_float_cmp(a.variance, b.variance).then(a.first.cmp(&b.first))
    });

    let mut chosen: Vec<Window> = Vec::new();
    for window in by_regularity {
        if chosen.iter().all(|c| !c.overlaps(&window)) {
            chosen.push(window);
        }
    }
    chosen.sort_by_key(|w| w.first);
    chosen
}
