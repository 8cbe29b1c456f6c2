//! End-to-end tests: sampling, detection, synthesis and composition on
//! synthetic score pages.

mod common;

use add_staves::detector::StaffDetector;
use add_staves::sampler::PageSampler;
use add_staves::{
    DetectionError, Error, MultiStaffPolicy, PageError, PageOutcome, ProcessConfig,
    SampleError, ScoreProcessor,
};
use common::{build_document, rotated, single_page, single_staff, PageSpec, StaffSpec, LETTER};
use lopdf::Object;

fn assert_close(actual: f32, expected: f32, tolerance: f32, what: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{}: expected {} ± {}, got {}",
        what,
        expected,
        tolerance,
        actual
    );
}

mod detection {
    use super::*;

    #[test]
    fn test_detects_spacing_and_extent() {
        let spec = StaffSpec::new(600.0, 8.0, 72.0, 540.0);
        let doc = single_staff(spec);
        let page = doc.page(0).unwrap();

        let image = PageSampler::new(None).sample_adaptive(&page).unwrap();
        let geometry = StaffDetector::default().detect(&image).unwrap();
        let pixel = 1.0 / image.mapping().scale;

        assert_close(geometry.spacing, 8.0, 0.05 * 8.0, "spacing");
        assert_close(geometry.x_left, 72.0, pixel + 1e-3, "x_left");
        assert_close(geometry.x_right, 540.0, pixel + 1e-3, "x_right");
        assert_close(geometry.top_y(), 600.0, pixel, "top line");
        assert!(geometry.line_ys.windows(2).all(|p| p[0] > p[1]));
    }

    #[test]
    fn test_adaptive_resolution_separates_tight_staff() {
        let spec = StaffSpec::new(500.0, 4.0, 100.0, 500.0);
        let doc = single_staff(spec);
        let page = doc.page(0).unwrap();

        let image = PageSampler::new(None).sample_adaptive(&page).unwrap();
        assert!(4.0 * image.mapping().scale >= 8.0);
        let geometry = StaffDetector::default().detect(&image).unwrap();
        assert_close(geometry.spacing, 4.0, 0.2, "spacing");
    }

    #[test]
    fn test_fixed_resolution() {
        let doc = single_staff(StaffSpec::new(600.0, 10.0, 72.0, 540.0));
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(Some(150)).sample_adaptive(&page).unwrap();
        assert_eq!(image.mapping().scale, 150.0 / 72.0);
        let geometry = StaffDetector::default().detect(&image).unwrap();
        assert_close(geometry.spacing, 10.0, 0.5, "spacing");
    }

    #[test]
    fn test_skew_within_tolerance() {
        let spec = StaffSpec::new(420.0, 9.0, 100.0, 500.0);
        let content = rotated(&spec.content(), 1.0, 300.0, 402.0);
        let doc = single_page(content);
        let page = doc.page(0).unwrap();

        let image = PageSampler::new(None).sample_adaptive(&page).unwrap();
        let geometry = StaffDetector::default()
            .with_skew_tolerance(2.0)
            .detect(&image)
            .unwrap();
        assert_close(geometry.skew_degrees, 1.0, 0.15, "skew");
        assert_close(geometry.spacing, 9.0, 0.05 * 9.0, "spacing");
    }

    #[test]
    fn test_skew_beyond_tolerance_is_rejected() {
        let spec = StaffSpec::new(420.0, 9.0, 100.0, 500.0);
        let content = rotated(&spec.content(), 5.0, 300.0, 402.0);
        let doc = single_page(content);
        let page = doc.page(0).unwrap();

        let image = PageSampler::new(Some(144)).sample_adaptive(&page).unwrap();
        let err = StaffDetector::default()
            .with_skew_tolerance(1.0)
            .detect(&image)
            .unwrap_err();
        let DetectionError::SkewOutOfRange { degrees } = err else {
            panic!("expected a skew failure, got {:?}", err);
        };
        assert_close(degrees.abs(), 1.0, 1e-3, "boundary angle");
    }

    #[test]
    fn test_three_lines_are_insufficient() {
        let doc = single_staff(StaffSpec::new(600.0, 8.0, 72.0, 540.0).with_lines(3));
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(None).sample_adaptive(&page).unwrap();
        let err = StaffDetector::default().detect(&image).unwrap_err();
        assert_eq!(err, DetectionError::InsufficientLines { found: 3 });
    }

    #[test]
    fn test_two_staves_of_differing_spacing_are_ambiguous() {
        let upper = StaffSpec::new(650.0, 8.0, 72.0, 540.0);
        let lower = StaffSpec::new(450.0, 11.0, 72.0, 540.0);
        let doc = single_page(format!("{}{}", upper.content(), lower.content()));
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(Some(144)).sample_adaptive(&page).unwrap();

        let err = StaffDetector::default().detect(&image).unwrap_err();
        assert_eq!(err, DetectionError::AmbiguousSystem { groups: 2 });

        let lowest = StaffDetector::default()
            .with_policy(MultiStaffPolicy::UseLowest)
            .detect(&image)
            .unwrap();
        assert_close(lowest.spacing, 11.0, 0.3, "lowest spacing");
    }
}

mod processing {
    use super::*;

    fn staff_page(spacing: f32) -> PageSpec {
        PageSpec::Content(StaffSpec::new(600.0, spacing, 72.0, 540.0).content_with_notes())
    }

    #[test]
    fn test_augments_single_page() {
        let spec = StaffSpec::new(600.0, 8.0, 72.0, 540.0);
        let doc = single_staff(spec);
        let output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();

        assert_eq!(output.summary.succeeded, 1);
        let PageOutcome::Augmented { geometry, staves } = &output.results[0].outcome else {
            panic!("page not augmented: {:?}", output.results[0]);
        };
        assert_eq!(staves.len(), 1);
        assert_eq!(staves[0].spacing, geometry.spacing);
        assert_close(
            staves[0].top_y(),
            geometry.bottom_y() - 3.0 * geometry.spacing,
            1e-3,
            "first new line",
        );
        assert_eq!(staves[0].width(), geometry.width());
    }

    #[test]
    fn test_high_fixed_resolution_fits_pixel_budget() {
        let doc = single_staff(StaffSpec::new(600.0, 8.0, 72.0, 540.0));
        let config = ProcessConfig::new().with_resolution(600);
        config.validate().unwrap();

        let output = ScoreProcessor::new(config).process(&doc).unwrap();
        assert!(
            output.results[0].is_augmented(),
            "page not augmented: {:?}",
            output.results[0]
        );
        assert_eq!(output.summary.failed, 0);
    }

    #[test]
    fn test_appended_staff_is_detected_again() {
        let doc = single_staff(StaffSpec::new(600.0, 8.0, 72.0, 540.0));
        let output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();
        let PageOutcome::Augmented { staves, .. } = &output.results[0].outcome else {
            panic!("page not augmented");
        };

        let page = output.document.page(0).unwrap();
        let image = PageSampler::new(Some(144)).sample_adaptive(&page).unwrap();
        let detector = StaffDetector::default();
        assert_eq!(
            detector.detect(&image).unwrap_err(),
            DetectionError::AmbiguousSystem { groups: 2 }
        );

        let lowest = detector
            .with_policy(MultiStaffPolicy::UseLowest)
            .detect(&image)
            .unwrap();
        assert_close(lowest.top_y(), staves[0].top_y(), 0.5, "appended top line");
        assert_close(lowest.spacing, staves[0].spacing, 0.4, "appended spacing");
    }

    #[test]
    fn test_corrupt_page_passes_through() {
        let doc = build_document(
            &[staff_page(8.0), PageSpec::Corrupt, staff_page(9.0)],
            LETTER,
        );
        let output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();

        assert_eq!(output.document.page_count(), 3);
        assert!(output.results[0].is_augmented());
        assert!(output.results[2].is_augmented());
        assert!(matches!(
            output.results[1].error(),
            Some(PageError::Sample(_))
        ));
        assert_eq!(output.summary.failed, 1);
        assert_eq!(output.summary.succeeded, 2);

        // The failed page keeps its single original content stream.
        let inner = output.document.inner();
        let page_id = output.document.page(1).unwrap().id();
        let contents = inner.get_dictionary(page_id).unwrap().get(b"Contents").unwrap();
        assert!(matches!(contents, Object::Reference(_)));

        let augmented_id = output.document.page(0).unwrap().id();
        let contents = inner
            .get_dictionary(augmented_id)
            .unwrap()
            .get(b"Contents")
            .unwrap();
        assert_eq!(contents.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_insufficient_lines_leaves_page_unchanged() {
        let doc = single_staff(StaffSpec::new(600.0, 8.0, 72.0, 540.0).with_lines(3));
        let output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();
        assert_eq!(
            output.results[0].error(),
            Some(&PageError::Detection(DetectionError::InsufficientLines { found: 3 }))
        );
        let page_id = output.document.page(0).unwrap().id();
        let contents = output
            .document
            .inner()
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Contents")
            .unwrap();
        assert!(matches!(contents, Object::Reference(_)));
    }

    #[test]
    fn test_results_follow_page_order() {
        let spacings = [6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let pages: Vec<PageSpec> = spacings.iter().map(|&s| staff_page(s)).collect();
        let doc = build_document(&pages, LETTER);

        let config = ProcessConfig::new().with_threads(4);
        let output = ScoreProcessor::new(config).process(&doc).unwrap();

        assert_eq!(output.results.len(), spacings.len());
        for (i, (result, spacing)) in output.results.iter().zip(spacings).enumerate() {
            assert_eq!(result.index, i);
            let PageOutcome::Augmented { geometry, .. } = &result.outcome else {
                panic!("page {} not augmented: {:?}", i, result);
            };
            assert_close(geometry.spacing, spacing, 0.05 * spacing, "page spacing");
        }
    }

    #[test]
    fn test_staff_stack_and_page_extension() {
        // Staff low on the page: three new staves cannot fit above y = 0.
        let doc = single_staff(StaffSpec::new(150.0, 8.0, 72.0, 540.0));
        let config = ProcessConfig::new().with_staff_count(3);
        let output = ScoreProcessor::new(config).process(&doc).unwrap();

        let PageOutcome::Augmented { staves, .. } = &output.results[0].outcome else {
            panic!("page not augmented");
        };
        assert_eq!(staves.len(), 3);
        let lowest = staves[2].bottom_y();
        assert!(lowest < 0.0);

        let page = output.document.page(0).unwrap();
        assert!(page.media_box().bottom() < lowest);
        assert_eq!(page.media_box().top(), 792.0);
    }

    #[test]
    fn test_cancelled_run_skips_pages() {
        let doc = build_document(&[staff_page(8.0), staff_page(9.0)], LETTER);
        let token = add_staves::CancellationToken::new();
        token.cancel();
        let output = ScoreProcessor::new(ProcessConfig::new())
            .with_cancellation(token)
            .process(&doc)
            .unwrap();
        assert_eq!(output.summary.skipped, 2);
        assert_eq!(output.document.page_count(), 2);
    }

    #[test]
    fn test_time_budget_failure_is_per_page() {
        // A budget this small expires before the first pass completes.
        let doc = build_document(&[staff_page(8.0)], LETTER);
        let config = ProcessConfig::new().with_time_budget(std::time::Duration::from_nanos(1));
        let output = ScoreProcessor::new(config).process(&doc).unwrap();
        assert!(matches!(
            output.results[0].error(),
            Some(PageError::Sample(SampleError::TimeBudgetExceeded { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let doc = single_staff(StaffSpec::new(600.0, 8.0, 72.0, 540.0));
        let err = ScoreProcessor::new(ProcessConfig::new().with_gap(-1.0))
            .process(&doc)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_document_is_fatal() {
        let doc = build_document(&[], LETTER);
        let err = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap_err();
        assert!(matches!(err, Error::NoPages));
    }

    #[test]
    fn test_report_json() {
        let doc = build_document(&[staff_page(8.0), PageSpec::Corrupt], LETTER);
        let output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();
        let json = output.report_json().unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["summary"]["total"], 2);
        assert_eq!(report["pages"][0]["status"], "augmented");
        assert_eq!(report["pages"][1]["status"], "failed");
        assert_eq!(report["pages"][1]["error"]["stage"], "sample");
    }
}

mod round_trip {
    use super::*;
    use add_staves::ScoreDocument;

    #[test]
    fn test_save_and_reload() {
        let doc = build_document(
            &[
                PageSpec::Content(StaffSpec::new(600.0, 8.0, 72.0, 540.0).content_with_notes()),
                PageSpec::Content(StaffSpec::new(500.0, 10.0, 90.0, 520.0).content_with_notes()),
            ],
            LETTER,
        );
        let mut output = ScoreProcessor::new(ProcessConfig::new()).process(&doc).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score-analysis.pdf");
        output.document.save(&path).unwrap();

        let reloaded = ScoreDocument::load(&path).unwrap();
        assert_eq!(reloaded.page_count(), 2);
        let content = reloaded.page(0).unwrap().content().unwrap();
        let text = String::from_utf8_lossy(&content);
        assert!(text.trim_start().starts_with('q'));
        assert!(text.trim_end().ends_with('Q'));

        let bytes = output.document.to_bytes().unwrap();
        assert_eq!(ScoreDocument::load_mem(&bytes).unwrap().page_count(), 2);
    }
}

mod invariance {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_horizontal_translation(dx in -50.0f32..50.0) {
            let base = StaffSpec::new(600.0, 8.0, 100.0, 480.0);
            let detect = |spec: StaffSpec| {
                let doc = single_page(spec.content());
                let page = doc.page(0).unwrap();
                let image = PageSampler::new(Some(144)).sample_adaptive(&page).unwrap();
                StaffDetector::default().detect(&image).unwrap()
            };

            let original = detect(base);
            let moved = detect(base.shifted(dx));
            // Each extent edge is quantized to a half-point pixel.
            let pixel = 0.5;
            prop_assert!(((moved.x_left - original.x_left) - dx).abs() <= 2.0 * pixel + 1e-3);
            prop_assert!(((moved.x_right - original.x_right) - dx).abs() <= 2.0 * pixel + 1e-3);
            prop_assert!((moved.spacing - original.spacing).abs() < 1e-3);
        }
    }
}
