//! Staff geometry detection on a sampled page.
//!
//! The detector works on the horizontal projection profile of the ink:
//! staff lines are the only long horizontal strokes on a page of notation, so
//! they show up as five sharp, evenly spaced peaks. The steps are:
//!
//! 1. Search a small range of angles for the sharpest (skew-corrected) profile
//! 2. Group rows above a fraction of the strongest row into peaks
//! 3. Slide a 5-peak window and keep evenly spaced groups
//! 4. Measure the horizontal extent column by column against the chosen lines
//!
//! All results are reported in native coordinates through the image's
//! [`PixelMapping`](crate::geometry::PixelMapping).

mod extent;
mod profile;

use crate::config::{DetectorConfig, MultiStaffPolicy, ProcessConfig};
use crate::error::DetectionError;
use crate::sampler::SampledImage;
use crate::utils::safe_float_cmp;
use extent::{measure_extent, LineBand};
use profile::{disjoint_groups, find_peaks, find_skew, search_windows, InkPoints, Peak};
use serde::Serialize;

/// Spacing tolerance used when only a rough spacing estimate is needed.
const ESTIMATE_TOLERANCE: f32 = 0.25;

/// Detected geometry of one 5-line staff, in native units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffGeometry {
    /// Line y-coordinates, top to bottom (strictly decreasing)
    pub line_ys: [f32; 5],
    /// Mean distance between adjacent lines
    pub spacing: f32,
    /// Left end of the staff
    pub x_left: f32,
    /// Right end of the staff
    pub x_right: f32,
    /// Measured stroke thickness of the lines
    pub line_thickness: Option<f32>,
    /// Residual skew, degrees counterclockwise
    pub skew_degrees: f32,
}

impl StaffGeometry {
    /// An ideal level staff with its top line at `top_y`.
    ///
    /// # Examples
    ///
    /// ```
    /// use add_staves::detector::StaffGeometry;
    ///
    /// let staff = StaffGeometry::uniform(500.0, 8.0, 72.0, 540.0);
    /// assert_eq!(staff.bottom_y(), 468.0);
    /// assert_eq!(staff.width(), 468.0);
    /// ```
    pub fn uniform(top_y: f32, spacing: f32, x_left: f32, x_right: f32) -> Self {
        let mut line_ys = [0.0; 5];
        for (i, y) in line_ys.iter_mut().enumerate() {
            *y = top_y - i as f32 * spacing;
        }
        Self {
            line_ys,
            spacing,
            x_left,
            x_right,
            line_thickness: None,
            skew_degrees: 0.0,
        }
    }

    /// The top line's y.
    pub fn top_y(&self) -> f32 {
        self.line_ys[0]
    }

    /// The bottom line's y.
    pub fn bottom_y(&self) -> f32 {
        self.line_ys[4]
    }

    /// Horizontal length of the staff.
    pub fn width(&self) -> f32 {
        self.x_right - self.x_left
    }
}

/// Locates the single staff of a sampled page.
#[derive(Debug, Clone)]
pub struct StaffDetector {
    config: DetectorConfig,
    skew_tolerance: f32,
    policy: MultiStaffPolicy,
}

impl Default for StaffDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl StaffDetector {
    /// Detector with the given tuning, a 2° skew search and [`MultiStaffPolicy::Reject`].
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            skew_tolerance: 2.0,
            policy: MultiStaffPolicy::Reject,
        }
    }

    /// Detector configured from a processing run.
    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::new(config.detector.clone())
            .with_skew_tolerance(config.skew_tolerance_degrees)
            .with_policy(config.multi_staff)
    }

    /// Set the skew search range in degrees.
    pub fn with_skew_tolerance(mut self, degrees: f32) -> Self {
        self.skew_tolerance = degrees;
        self
    }

    /// Set the handling of pages with several staves.
    pub fn with_policy(mut self, policy: MultiStaffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Detect the staff on `image`.
    pub fn detect(&self, image: &SampledImage) -> Result<StaffGeometry, DetectionError> {
        let ink = InkPoints::collect(image);

        let skew = find_skew(&ink, self.skew_tolerance);
        if skew.on_boundary {
            return Err(DetectionError::SkewOutOfRange {
                degrees: -skew.degrees,
            });
        }

        let peaks = find_peaks(&ink.ratios(skew.degrees), self.config.peak_threshold);
        if peaks.len() < 5 {
            return Err(DetectionError::InsufficientLines { found: peaks.len() });
        }

        let search = search_windows(&peaks, self.config.spacing_tolerance);
        let groups = disjoint_groups(&search.accepted);
        let window = match groups.as_slice() {
            [] => {
                return Err(DetectionError::IrregularSpacing {
                    deviation: search.best_deviation.unwrap_or(1.0),
                })
            },
            [only] => *only,
            [.., lowest] => match self.policy {
                MultiStaffPolicy::UseLowest => {
                    log::debug!(
                        "{} staves found, using the lowest",
                        groups.len()
                    );
                    *lowest
                },
                MultiStaffPolicy::Reject => {
                    return Err(DetectionError::AmbiguousSystem {
                        groups: groups.len(),
                    })
                },
            },
        };
        let lines: Vec<&Peak> = window.peaks().map(|i| &peaks[i]).collect();

        let mut centers = [0.0f32; 5];
        for (center, peak) in centers.iter_mut().zip(&lines) {
            *center = peak.center;
        }
        let thickness_px =
            lines.iter().map(|p| p.thickness).sum::<f32>() / lines.len() as f32;

        let band = LineBand {
            centers,
            half_height: thickness_px / 2.0 + 0.5,
            slope: skew.degrees.to_radians().tan(),
        };
        let run = measure_extent(
            image,
            &band,
            self.config.min_lines_for_extent,
            window.mean_gap.round() as u32,
        )
        .map_err(|found| DetectionError::InsufficientLines { found })?;

        let mapping = image.mapping();
        let mut line_ys = [0.0f32; 5];
        for (y, center) in line_ys.iter_mut().zip(centers) {
            *y = mapping.to_native_y(center);
        }
        let geometry = StaffGeometry {
            line_ys,
            spacing: (line_ys[0] - line_ys[4]) / 4.0,
            x_left: mapping.to_native_x(run.start as f32),
            x_right: mapping.to_native_x(run.end as f32 + 1.0),
            line_thickness: Some(mapping.to_native_len(thickness_px)),
            skew_degrees: -skew.degrees,
        };

        log::debug!(
            "Staff: top {:.2} spacing {:.3} x [{:.2}, {:.2}] skew {:.1}° deviation {:.3}",
            geometry.top_y(),
            geometry.spacing,
            geometry.x_left,
            geometry.x_right,
            geometry.skew_degrees,
            window.deviation
        );
        Ok(geometry)
    }
}

/// Rough staff spacing in pixels, without skew search.
///
/// Used to choose a sampling resolution: the most regular 5-peak window
/// under a lenient tolerance, else the median peak gap when at least five
/// peaks exist.
pub(crate) fn estimate_spacing_px(image: &SampledImage) -> Option<f32> {
    let ink = InkPoints::collect(image);
    let peaks = find_peaks(&ink.ratios(0.0), DetectorConfig::default().peak_threshold);
    if peaks.len() < 5 {
        return None;
    }

    let search = search_windows(&peaks, ESTIMATE_TOLERANCE);
    if let Some(best) = search
        .accepted
        .iter()
        .min_by(|a, b| safe_float_cmp(a.variance, b.variance))
    {
        return Some(best.mean_gap);
    }

    let mut gaps: Vec<f32> = peaks
        .windows(2)
        .map(|pair| pair[1].center - pair[0].center)
        .collect();
    gaps.sort_by(|a, b| safe_float_cmp(*a, *b));
    Some(gaps[gaps.len() / 2])
}
