// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # add_staves
//!
//! Appends blank analytical staves beneath the music of single-system PDF
//! pages, matched to the geometry of the staff already on the page.
//!
//! ## Pipeline
//!
//! Each page goes through four stages, independently of every other page:
//!
//! - **Sampling** ([`sampler`]): render the visible box to a luminance grid at
//!   a resolution chosen from the page's own staff spacing
//! - **Detection** ([`detector`]): locate the five staff lines, their spacing,
//!   thickness, horizontal extent and residual skew
//! - **Synthesis** ([`synth`]): build new 5-line staves below the detected one
//! - **Composition** ([`compose`]): wrap the original content and draw the new
//!   lines after it, growing the page box when needed
//!
//! [`ScoreProcessor`] runs the pipeline over all pages in parallel. A page
//! that fails any stage is passed through unchanged and reported; the output
//! always has the input's pages in the input's order.
//!
//! ## Quick Start
//!
//! ```no_run
//! use add_staves::{ProcessConfig, ScoreDocument, ScoreProcessor};
//!
//! # fn main() -> add_staves::Result<()> {
//! let input = ScoreDocument::load("etude.pdf")?;
//! let config = ProcessConfig::new().with_gap(3.0).with_staff_count(2);
//! let mut output = ScoreProcessor::new(config).process(&input)?;
//!
//! for result in &output.results {
//!     if let Some(error) = result.error() {
//!         eprintln!("page {}: {}", result.index + 1, error);
//!     }
//! }
//! output.document.save("etude-analysis.pdf")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Coordinates
//!
//! Geometry is reported in native PDF user space (points, y up). The page's
//! `/Rotate` entry is not applied: staves are detected and drawn in unrotated
//! user space, which is where the page content itself is defined.

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Core types
pub mod document;
pub mod geometry;

// Pipeline stages
pub mod compose;
pub mod detector;
pub mod sampler;
pub mod synth;

// Orchestration
pub mod processor;

// Re-exports
pub use compose::{OverlayComposer, PageOverlay};
pub use config::{DetectorConfig, MultiStaffPolicy, ProcessConfig};
pub use detector::{StaffDetector, StaffGeometry};
pub use document::{Page, ScoreDocument};
pub use error::{ComposeError, DetectionError, Error, PageError, Result, SampleError};
pub use processor::{
    process, CancellationToken, PageOutcome, PageResult, ProcessOutput, ProcessSummary,
    ScoreProcessor,
};
pub use sampler::{PageSampler, SampledImage};
pub use synth::{LineSegment, StaffSynthesizer, SynthesizedStaff};

// Internal utilities
pub(crate) mod utils {
    //! Internal utility functions for the library.

    use std::cmp::Ordering;

    /// Total order on floats for sorting; NaN sorts last.
    #[inline]
    pub fn safe_float_cmp(a: f32, b: f32) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    }

}
