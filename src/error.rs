//! Error types for staff detection and overlay composition.
//!
//! Per-page failures ([`SampleError`], [`DetectionError`], [`ComposeError`])
//! are collected into a [`PageError`] and recorded in the page's result; they
//! never abort a run. Only [`Error`] is fatal.

use serde::Serialize;

/// Result type alias for fatal, run-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors surfaced before or around page processing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Input document has zero pages
    #[error("Document has no pages")]
    NoPages,

    /// PDF could not be loaded or written
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or report (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dedicated worker pool could not be created
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Failure to render a page into a pixel grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleError {
    /// Page dictionary has no /Contents
    #[error("Page has no content stream")]
    NoContent,

    /// Content stream missing, undecodable or unparseable
    #[error("Page content could not be read: {reason}")]
    Content {
        /// What went wrong
        reason: String,
    },

    /// Visible box has no area
    #[error("Page box is empty or invalid")]
    InvalidPageBox,

    /// Nothing dark was rendered
    #[error("Page rendered blank (no ink found)")]
    BlankPage,

    /// Rendering ran past the per-page budget
    #[error("Page exceeded its time budget of {budget_ms} ms")]
    TimeBudgetExceeded {
        /// Budget in milliseconds
        budget_ms: u64,
    },
}

/// Failure to find exactly one staff on a sampled page.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionError {
    /// Fewer than five candidate line rows
    #[error("Insufficient staff lines: found {found} candidate lines, need 5")]
    InsufficientLines {
        /// Number of candidate peaks
        found: usize,
    },

    /// More than one disjoint 5-line group
    #[error("Ambiguous system: found {groups} separate 5-line groups")]
    AmbiguousSystem {
        /// Number of disjoint groups
        groups: usize,
    },

    /// No 5-line window is evenly spaced
    #[error("Irregular staff spacing: best window deviates by {:.1}%", .deviation * 100.0)]
    IrregularSpacing {
        /// Relative deviation of the best window
        deviation: f32,
    },

    /// Skew estimate hit the search bound
    #[error("Staff skew of {degrees:.1}° is outside the tolerated range")]
    SkewOutOfRange {
        /// Boundary angle that scored best
        degrees: f32,
    },
}

/// Failure to extend a page with the synthesized overlay.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComposeError {
    /// /Contents is missing or not a stream/array of streams
    #[error("Page content stream cannot be extended: {reason}")]
    UnsupportedContents {
        /// What went wrong
        reason: String,
    },

    /// Overlay operations failed to encode
    #[error("Failed to encode overlay content: {reason}")]
    Encode {
        /// Encoder message
        reason: String,
    },

    /// Target page is not in the output document
    #[error("Page {index} not found in output document")]
    MissingPage {
        /// Zero-based page index
        index: usize,
    },
}

/// Per-page failure descriptor, tagged with the stage that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum PageError {
    /// Rendering failed
    #[error(transparent)]
    Sample(#[from] SampleError),

    /// Staff detection failed
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Overlay composition failed
    #[error(transparent)]
    Compose(#[from] ComposeError),
}
