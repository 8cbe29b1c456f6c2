//! Document-level orchestration.
//!
//! Pages are independent: each runs sample → detect → synthesize → compose
//! on its own, in parallel, against the shared read-only input. Overlays are
//! then applied to a copy of the input one page at a time. A page that fails
//! any stage is passed through unchanged and its error recorded; only
//! configuration errors and an empty document abort the run.

use crate::compose::{OverlayComposer, PageOverlay};
use crate::config::ProcessConfig;
use crate::detector::{StaffDetector, StaffGeometry};
use crate::document::{Page, ScoreDocument};
use crate::error::{Error, PageError, Result};
use crate::sampler::{Deadline, PageSampler};
use crate::synth::{StaffSynthesizer, SynthesizedStaff};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag to stop a run early.
///
/// Pages that have not started when the token is cancelled are skipped;
/// pages already in progress finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What happened to one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Analytical staves were added
    Augmented {
        /// Detected staff
        geometry: StaffGeometry,
        /// Staves drawn beneath it
        staves: Vec<SynthesizedStaff>,
    },
    /// The page was passed through unchanged
    Failed {
        /// Stage and reason
        error: PageError,
    },
    /// Not processed because the run was cancelled
    Skipped,
}

/// Outcome of one page, by zero-based index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    /// Zero-based page index
    pub index: usize,
    /// Outcome
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

impl PageResult {
    /// Whether staves were added to this page.
    pub fn is_augmented(&self) -> bool {
        matches!(self.outcome, PageOutcome::Augmented { .. })
    }

    /// The failure, if the page failed.
    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            PageOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Page counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    /// Pages in the document
    pub total: usize,
    /// Pages augmented
    pub succeeded: usize,
    /// Pages passed through after an error
    pub failed: usize,
    /// Pages skipped by cancellation
    pub skipped: usize,
}

impl ProcessSummary {
    fn from_results(results: &[PageResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.outcome {
                PageOutcome::Augmented { .. } => summary.succeeded += 1,
                PageOutcome::Failed { .. } => summary.failed += 1,
                PageOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Output document plus per-page results, in page order.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Augmented copy of the input
    pub document: ScoreDocument,
    /// One result per input page
    pub results: Vec<PageResult>,
    /// Counts over `results`
    pub summary: ProcessSummary,
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a ProcessSummary,
    pages: &'a [PageResult],
}

impl ProcessOutput {
    /// Results and summary as pretty-printed JSON.
    pub fn report_json(&self) -> Result<String> {
        let report = Report {
            summary: &self.summary,
            pages: &self.results,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

/// Runs the per-page pipeline over a document.
///
/// # Examples
///
/// ```no_run
/// use add_staves::{ProcessConfig, ScoreDocument, ScoreProcessor};
///
/// # fn main() -> add_staves::Result<()> {
/// let input = ScoreDocument::load("score.pdf")?;
/// let mut output = ScoreProcessor::new(ProcessConfig::new()).process(&input)?;
/// println!("{} pages augmented", output.summary.succeeded);
/// output.document.save("score-analysis.pdf")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ScoreProcessor {
    config: ProcessConfig,
    cancel: CancellationToken,
}

impl ScoreProcessor {
    /// Processor for `config`; the configuration is validated by [`process`](Self::process).
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Process every page of `document`, returning an augmented copy.
    pub fn process(&self, document: &ScoreDocument) -> Result<ProcessOutput> {
        self.config.validate()?;
        if document.page_count() == 0 {
            return Err(Error::NoPages);
        }

        let planned = match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::ThreadPool(e.to_string()))?;
                pool.install(|| self.plan_pages(document))
            },
            None => self.plan_pages(document),
        };

        let mut output = document.clone();
        let mut results = Vec::with_capacity(planned.len());
        for (result, overlay) in planned {
            results.push(apply(&mut output, result, overlay));
        }

        let summary = ProcessSummary::from_results(&results);
        log::info!(
            "Processed {} pages: {} augmented, {} failed, {} skipped",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.skipped
        );

        Ok(ProcessOutput {
            document: output,
            results,
            summary,
        })
    }

    /// Run the pipeline on one page without modifying anything.
    pub fn process_page(
        &self,
        page: &Page<'_>,
    ) -> std::result::Result<(StaffGeometry, Vec<SynthesizedStaff>, PageOverlay), PageError> {
        let mut sampler = PageSampler::new(self.config.sampling_resolution);
        if let Some(budget) = self.config.per_page_time_budget {
            sampler = sampler.with_deadline(Deadline::after(budget));
        }
        let image = sampler.sample_adaptive(page)?;

        let geometry = StaffDetector::from_config(&self.config).detect(&image)?;
        let staves = StaffSynthesizer::synthesize_stack(&geometry, &self.config);
        let overlay = OverlayComposer::new(self.config.extend_page).compose(page, &staves)?;
        Ok((geometry, staves, overlay))
    }

    fn plan_pages(&self, document: &ScoreDocument) -> Vec<(PageResult, Option<PageOverlay>)> {
        (0..document.page_count())
            .into_par_iter()
            .map(|index| {
                if self.cancel.is_cancelled() {
                    return (
                        PageResult {
                            index,
                            outcome: PageOutcome::Skipped,
                        },
                        None,
                    );
                }
                let Some(page) = document.page(index) else {
                    return (
                        PageResult {
                            index,
                            outcome: PageOutcome::Skipped,
                        },
                        None,
                    );
                };

                match self.process_page(&page) {
                    Ok((geometry, staves, overlay)) => (
                        PageResult {
                            index,
                            outcome: PageOutcome::Augmented { geometry, staves },
                        },
                        Some(overlay),
                    ),
                    Err(error) => {
                        log::warn!("Page {}: {}", index + 1, error);
                        (
                            PageResult {
                                index,
                                outcome: PageOutcome::Failed { error },
                            },
                            None,
                        )
                    },
                }
            })
            .collect()
    }
}

/// Apply a planned overlay; a failure leaves the page as it was.
fn apply(
    output: &mut ScoreDocument,
    result: PageResult,
    overlay: Option<PageOverlay>,
) -> PageResult {
    let Some(overlay) = overlay else {
        return result;
    };
    match output.apply_overlay(&overlay) {
        Ok(()) => result,
        Err(error) => {
            log::warn!("Page {}: {}", result.index + 1, error);
            PageResult {
                index: result.index,
                outcome: PageOutcome::Failed {
                    error: error.into(),
                },
            }
        },
    }
}

/// Process `document` with `config`.
pub fn process(document: &ScoreDocument, config: &ProcessConfig) -> Result<ProcessOutput> {
    ScoreProcessor::new(config.clone()).process(document)
}
