//! Configuration for staff detection and overlay composition.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Most analytical staves that may be stacked beneath one system.
pub const MAX_STAFF_COUNT: u8 = 6;

/// Largest skew search range, in degrees.
pub const MAX_SKEW_TOLERANCE: f32 = 15.0;

/// Accepted range for an explicit sampling resolution, in DPI.
pub const RESOLUTION_RANGE: (u32, u32) = (36, 1200);

/// What to do when a page holds more than one evenly spaced 5-line group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiStaffPolicy {
    /// Report the page as ambiguous (one staff per page expected)
    #[default]
    Reject,
    /// Treat the groups as one system and append beneath the lowest staff
    UseLowest,
}

/// Tuning constants of the row-projection detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Row ink ratio, relative to the densest row, above which a row is a line candidate
    pub peak_threshold: f32,

    /// Largest accepted relative deviation of a gap from the mean spacing
    pub spacing_tolerance: f32,

    /// Lines (of 5) that must carry ink for a column to count as staff
    pub min_lines_for_extent: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            peak_threshold: 0.5,
            spacing_tolerance: 0.08,
            min_lines_for_extent: 4,
        }
    }
}

/// Configuration for one processing run.
///
/// # Examples
///
/// ```
/// use add_staves::ProcessConfig;
///
/// let config = ProcessConfig::new().with_gap(2.5).with_staff_count(2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Distance between the bottom detected line and the first new line, in staff spaces
    pub gap_in_spacing_units: f32,

    /// Fixed sampling resolution in DPI; adaptive when `None`
    pub sampling_resolution: Option<u32>,

    /// Largest skew (degrees) the detector searches for
    pub skew_tolerance_degrees: f32,

    /// Optional wall-clock budget per page
    #[serde(with = "optional_millis")]
    pub per_page_time_budget: Option<Duration>,

    /// Number of analytical staves appended beneath each system
    pub staff_count: u8,

    /// Distance between stacked analytical staves, in staff spaces
    pub staff_separation: f32,

    /// Grow the page box downward when the new staves fall outside it
    pub extend_page: bool,

    /// Handling of pages with several staves
    pub multi_staff: MultiStaffPolicy,

    /// Worker threads; `None` uses the global rayon pool
    pub threads: Option<usize>,

    /// Detector tuning
    pub detector: DetectorConfig,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            gap_in_spacing_units: 3.0,
            sampling_resolution: None,
            skew_tolerance_degrees: 2.0,
            per_page_time_budget: None,
            staff_count: 1,
            staff_separation: 4.0,
            extend_page: true,
            multi_staff: MultiStaffPolicy::Reject,
            threads: None,
            detector: DetectorConfig::default(),
        }
    }

    /// Set the gap below the detected staff, in staff spaces.
    pub fn with_gap(mut self, gap: f32) -> Self {
        self.gap_in_spacing_units = gap;
        self
    }

    /// Fix the sampling resolution (DPI).
    pub fn with_resolution(mut self, dpi: u32) -> Self {
        self.sampling_resolution = Some(dpi);
        self
    }

    /// Set the skew search range.
    pub fn with_skew_tolerance(mut self, degrees: f32) -> Self {
        self.skew_tolerance_degrees = degrees;
        self
    }

    /// Set a per-page time budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.per_page_time_budget = Some(budget);
        self
    }

    /// Set how many staves to append.
    pub fn with_staff_count(mut self, count: u8) -> Self {
        self.staff_count = count;
        self
    }

    /// Set the multi-staff policy.
    pub fn with_multi_staff(mut self, policy: MultiStaffPolicy) -> Self {
        self.multi_staff = policy;
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ProcessConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check every option; any failure is fatal for the run.
    pub fn validate(&self) -> Result<()> {
        let gap = self.gap_in_spacing_units;
        if !gap.is_finite() || gap <= 0.0 {
            return Err(Error::Config(format!(
                "gap_in_spacing_units must be a positive number, got {}",
                gap
            )));
        }
        if let Some(dpi) = self.sampling_resolution {
            let (min, max) = RESOLUTION_RANGE;
            if !(min..=max).contains(&dpi) {
                return Err(Error::Config(format!(
                    "sampling_resolution must be within {}..={} DPI, got {}",
                    min, max, dpi
                )));
            }
        }
        let skew = self.skew_tolerance_degrees;
        if !skew.is_finite() || !(0.0..=MAX_SKEW_TOLERANCE).contains(&skew) {
            return Err(Error::Config(format!(
                "skew_tolerance_degrees must be within 0..={}, got {}",
                MAX_SKEW_TOLERANCE, skew
            )));
        }
        if self.per_page_time_budget == Some(Duration::ZERO) {
            return Err(Error::Config("per_page_time_budget must not be zero".to_string()));
        }
        if !(1..=MAX_STAFF_COUNT).contains(&self.staff_count) {
            return Err(Error::Config(format!(
                "staff_count must be within 1..={}, got {}",
                MAX_STAFF_COUNT, self.staff_count
            )));
        }
        let separation = self.staff_separation;
        if !separation.is_finite() || separation <= 0.0 {
            return Err(Error::Config(format!(
                "staff_separation must be a positive number, got {}",
                separation
            )));
        }
        if self.threads == Some(0) {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }

        let detector = &self.detector;
        if !(detector.peak_threshold > 0.0 && detector.peak_threshold < 1.0) {
            return Err(Error::Config(format!(
                "detector.peak_threshold must be within (0, 1), got {}",
                detector.peak_threshold
            )));
        }
        if !(detector.spacing_tolerance > 0.0 && detector.spacing_tolerance < 0.5) {
            return Err(Error::Config(format!(
                "detector.spacing_tolerance must be within (0, 0.5), got {}",
                detector.spacing_tolerance
            )));
        }
        if !(1..=5).contains(&detector.min_lines_for_extent) {
            return Err(Error::Config(format!(
                "detector.min_lines_for_extent must be within 1..=5, got {}",
                detector.min_lines_for_extent
            )));
        }
        Ok(())
    }
}

/// Serialize `Option<Duration>` as optional milliseconds.
mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProcessConfig::default();
        assert_eq!(config.gap_in_spacing_units, 3.0);
        assert_eq!(config.staff_count, 1);
        assert!(config.sampling_resolution.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_gap() {
        assert!(ProcessConfig::new().with_gap(0.0).validate().is_err());
        assert!(ProcessConfig::new().with_gap(-1.0).validate().is_err());
        assert!(ProcessConfig::new().with_gap(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(ProcessConfig::new().with_resolution(10).validate().is_err());
        assert!(ProcessConfig::new().with_skew_tolerance(45.0).validate().is_err());
        assert!(ProcessConfig::new().with_staff_count(0).validate().is_err());
        assert!(ProcessConfig::new().with_staff_count(7).validate().is_err());
        assert!(ProcessConfig::new().with_threads(0).validate().is_err());
        assert!(ProcessConfig::new()
            .with_time_budget(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_staff_separation_must_be_positive() {
        let mut config = ProcessConfig::new().with_staff_count(2);
        config.staff_separation = 0.0;
        assert!(config.validate().is_err());
        config.staff_separation = 6.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ProcessConfig::from_json_str(
            r#"{ "gap_in_spacing_units": 2.0, "per_page_time_budget": 1500,
                 "multi_staff": "use_lowest", "detector": { "spacing_tolerance": 0.1 } }"#,
        )
        .unwrap();
        assert_eq!(config.gap_in_spacing_units, 2.0);
        assert_eq!(config.per_page_time_budget, Some(Duration::from_millis(1500)));
        assert_eq!(config.multi_staff, MultiStaffPolicy::UseLowest);
        assert_eq!(config.detector.spacing_tolerance, 0.1);
        assert_eq!(config.detector.peak_threshold, 0.5);
        assert_eq!(config.staff_count, 1);
    }

    #[test]
    fn test_from_json_validates() {
        let err = ProcessConfig::from_json_str(r#"{ "gap_in_spacing_units": -3 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
