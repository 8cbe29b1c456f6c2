//! Page sampling: render a page's visible box to a luminance grid.
//!
//! The grid carries a [`PixelMapping`] back to native coordinates so the
//! detector never needs to know the resolution it was sampled at.
//!
//! # Resolution
//!
//! Staff lines must be separable after sampling: too coarse a grid merges
//! adjacent lines, too fine a grid only costs time. [`PageSampler::sample_adaptive`]
//! renders a coarse pass at one pixel per point, estimates the staff spacing
//! from it, and re-renders so one spacing covers about
//! [`TARGET_SPACING_PX`] pixels.

mod images;
mod interpreter;

use crate::detector::estimate_spacing_px;
use crate::document::Page;
use crate::error::SampleError;
use crate::geometry::{Matrix, PixelMapping};
use interpreter::ContentRenderer;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

/// Luminance below which a pixel counts as ink.
pub const INK_THRESHOLD: u8 = 160;

/// Staff spacing, in pixels, the adaptive pass aims for.
pub const TARGET_SPACING_PX: f32 = 12.0;

/// Scale used when the coarse pass finds no staff spacing (200 DPI).
const FALLBACK_SCALE: f32 = 200.0 / 72.0;

/// Lowest adaptive scale (72 DPI).
const MIN_SCALE: f32 = 1.0;

/// Highest adaptive scale (600 DPI).
const MAX_SCALE: f32 = 600.0 / 72.0;

/// Largest grid the sampler will allocate.
const MAX_PIXELS: f32 = 24_000_000.0;

/// A wall-clock limit checked cooperatively while sampling.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline expiring `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Whether the budget is used up.
    pub fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }

    /// Fail with [`SampleError::TimeBudgetExceeded`] once expired.
    pub fn check(&self) -> Result<(), SampleError> {
        if self.is_expired() {
            Err(SampleError::TimeBudgetExceeded {
                budget_ms: self.budget.as_millis() as u64,
            })
        } else {
            Ok(())
        }
    }
}

/// Row-major 8-bit luminance grid (255 = paper) with its native mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    mapping: PixelMapping,
}

impl SampledImage {
    /// Wrap a luminance buffer.
    ///
    /// Returns `None` when `pixels` does not hold exactly `width × height`
    /// samples.
    ///
    /// # Examples
    ///
    /// ```
    /// use add_staves::geometry::{PixelMapping, Rect};
    /// use add_staves::sampler::SampledImage;
    ///
    /// let mapping = PixelMapping::for_box(&Rect::new(0.0, 0.0, 4.0, 2.0), 1.0);
    /// let pixels = vec![255, 0, 255, 255, 255, 255, 255, 255];
    /// let image = SampledImage::new(4, 2, pixels, mapping).unwrap();
    /// assert!(image.is_ink(1, 0));
    /// assert!(!image.is_ink(0, 0));
    /// ```
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, mapping: PixelMapping) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
            mapping,
        })
    }

    /// Reduce a rendered pixmap to luminance.
    pub fn from_pixmap(pixmap: &Pixmap, mapping: PixelMapping) -> Self {
        let pixels = pixmap
            .pixels()
            .iter()
            .map(|p| {
                let c = p.demultiply();
                let alpha = c.alpha() as u32;
                // Transparent regions are paper.
                let lum = (299 * c.red() as u32 + 587 * c.green() as u32 + 114 * c.blue() as u32)
                    / 1000;
                ((lum * alpha + 255 * (255 - alpha)) / 255) as u8
            })
            .collect();
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            pixels,
            mapping,
        }
    }

    /// Grid width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel ↔ native mapping of this grid.
    pub fn mapping(&self) -> &PixelMapping {
        &self.mapping
    }

    /// Luminance at `(x, y)`; out-of-range reads as paper.
    pub fn luminance(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 255;
        }
        self.pixels[(y * self.width + x) as usize]
    }

    /// Whether `(x, y)` is ink.
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.luminance(x, y) < INK_THRESHOLD
    }

    /// One row of luminance values.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y * self.width) as usize;
        &self.pixels[start..start + self.width as usize]
    }

    /// Total number of ink pixels.
    pub fn ink_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p < INK_THRESHOLD).count()
    }
}

/// Renders pages into [`SampledImage`]s.
#[derive(Debug, Clone, Default)]
pub struct PageSampler {
    resolution: Option<u32>,
    deadline: Option<Deadline>,
}

impl PageSampler {
    /// Sampler with a fixed resolution in DPI, or adaptive when `None`.
    pub fn new(resolution: Option<u32>) -> Self {
        Self {
            resolution,
            deadline: None,
        }
    }

    /// Stop sampling with [`SampleError::TimeBudgetExceeded`] after `deadline`.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Render the visible box at `scale` pixels per native unit.
    pub fn sample(&self, page: &Page<'_>, scale: f32) -> Result<SampledImage, SampleError> {
        let image = self.render(page, scale)?;
        if image.ink_count() == 0 {
            return Err(SampleError::BlankPage);
        }
        Ok(image)
    }

    /// Render at the configured resolution, or pick one from a coarse pass.
    pub fn sample_adaptive(&self, page: &Page<'_>) -> Result<SampledImage, SampleError> {
        let visible = page.visible_box();
        let budget_scale = (MAX_PIXELS / (visible.width() * visible.height())).sqrt();

        if let Some(dpi) = self.resolution {
            let fixed = dpi as f32 / 72.0;
            if fixed > budget_scale {
                log::debug!(
                    "Page {}: {} DPI exceeds the pixel budget, sampling at {:.0} DPI",
                    page.index(),
                    dpi,
                    budget_scale * 72.0
                );
                return self.sample(page, budget_scale);
            }
            return self.sample(page, fixed);
        }

        let coarse = self.render(page, MIN_SCALE)?;
        if coarse.ink_count() == 0 {
            return Err(SampleError::BlankPage);
        }

        let scale = match estimate_spacing_px(&coarse) {
            Some(spacing) => {
                let wanted = (TARGET_SPACING_PX / spacing).clamp(MIN_SCALE, MAX_SCALE);
                log::debug!(
                    "Page {}: coarse spacing {:.2}px, sampling at {:.0} DPI",
                    page.index(),
                    spacing,
                    wanted * 72.0
                );
                wanted
            },
            None => {
                log::debug!(
                    "Page {}: no spacing estimate, sampling at fallback resolution",
                    page.index()
                );
                FALLBACK_SCALE
            },
        }
        .min(budget_scale);

        if scale <= MIN_SCALE {
            return Ok(coarse);
        }
        self.sample(page, scale)
    }

    fn render(&self, page: &Page<'_>, scale: f32) -> Result<SampledImage, SampleError> {
        if let Some(deadline) = &self.deadline {
            deadline.check()?;
        }

        let visible = page.visible_box();
        if !visible.is_valid() || !scale.is_finite() || scale <= 0.0 {
            return Err(SampleError::InvalidPageBox);
        }
        let width = (visible.width() * scale).ceil() as u32;
        let height = (visible.height() * scale).ceil() as u32;
        if width == 0 || height == 0 || (width as f32) * (height as f32) > MAX_PIXELS * 1.01 {
            return Err(SampleError::InvalidPageBox);
        }

        let content = page.content()?;
        let mapping = PixelMapping::for_box(&visible, scale);
        let mut renderer = ContentRenderer::new(
            page.document(),
            width,
            height,
            mapping.native_to_pixel(),
            self.deadline,
        )?;
        renderer.render(&content, page.resources(), Matrix::identity(), 0)?;
        if renderer.skipped_images() > 0 {
            log::warn!(
                "Page {}: {} image(s) could not be decoded",
                page.index(),
                renderer.skipped_images()
            );
        }

        let pixmap = renderer.finish();
        Ok(SampledImage::from_pixmap(&pixmap, mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ScoreDocument;
    use crate::geometry::Rect;
    use lopdf::{dictionary, Document, Object, Stream};

    fn doc_with_content(content: &[u8], media_box: [i64; 4]) -> ScoreDocument {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => media_box.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        ScoreDocument::from_lopdf(doc)
    }

    #[test]
    fn test_sample_maps_native_lines_to_rows() {
        let doc = doc_with_content(b"1 w 10 150 m 190 150 l S", [0, 0, 200, 200]);
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(None).sample(&page, 2.0).unwrap();
        assert_eq!((image.width(), image.height()), (400, 400));
        // y = 150 is 50 units below the top, pixel row 100.
        assert!(image.is_ink(200, 100) || image.is_ink(200, 99));
        assert!(!image.is_ink(200, 300));
        assert!(!image.is_ink(5, 100));
    }

    #[test]
    fn test_blank_page_is_reported() {
        let doc = doc_with_content(b"1 g 0 0 200 200 re f", [0, 0, 200, 200]);
        let page = doc.page(0).unwrap();
        let err = PageSampler::new(None).sample(&page, 1.0).unwrap_err();
        assert_eq!(err, SampleError::BlankPage);
    }

    #[test]
    fn test_fixed_resolution_is_used() {
        let doc = doc_with_content(b"10 100 m 190 100 l S", [0, 0, 200, 200]);
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(Some(144)).sample_adaptive(&page).unwrap();
        assert_eq!(image.mapping().scale, 2.0);
        assert_eq!(image.width(), 400);
    }

    #[test]
    fn test_fixed_resolution_is_capped_by_pixel_budget() {
        let doc = doc_with_content(b"72 400 m 540 400 l S", [0, 0, 612, 792]);
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(Some(600)).sample_adaptive(&page).unwrap();
        let scale = image.mapping().scale;
        assert!(scale < 600.0 / 72.0);
        assert!((scale - (MAX_PIXELS / (612.0 * 792.0)).sqrt()).abs() < 1e-3);
        assert!((image.width() as f32) * (image.height() as f32) <= MAX_PIXELS * 1.01);
    }

    #[test]
    fn test_adaptive_refines_small_spacing() {
        // Five lines 4 units apart: too tight for one pixel per unit.
        let content = b"0.4 w 20 120 m 380 120 l 20 116 m 380 116 l 20 112 m 380 112 l \
                        20 108 m 380 108 l 20 104 m 380 104 l S";
        let doc = doc_with_content(content, [0, 0, 400, 200]);
        let page = doc.page(0).unwrap();
        let image = PageSampler::new(None).sample_adaptive(&page).unwrap();
        assert!(image.mapping().scale > 1.5);
    }

    #[test]
    fn test_expired_deadline_stops_sampling() {
        let doc = doc_with_content(b"10 100 m 190 100 l S", [0, 0, 200, 200]);
        let page = doc.page(0).unwrap();
        let deadline = Deadline {
            start: Instant::now() - Duration::from_millis(50),
            budget: Duration::from_millis(10),
        };
        let err = PageSampler::new(None)
            .with_deadline(deadline)
            .sample(&page, 1.0)
            .unwrap_err();
        assert_eq!(err, SampleError::TimeBudgetExceeded { budget_ms: 10 });
    }

    #[test]
    fn test_from_pixmap_reads_paper_as_white() {
        let mut pixmap = Pixmap::new(3, 1).unwrap();
        pixmap.fill(tiny_skia::Color::WHITE);
        let image = SampledImage::from_pixmap(
            &pixmap,
            PixelMapping::for_box(&Rect::new(0.0, 0.0, 3.0, 1.0), 1.0),
        );
        assert_eq!(image.row(0), &[255, 255, 255]);
        assert_eq!(image.ink_count(), 0);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let mapping = PixelMapping::for_box(&Rect::new(0.0, 0.0, 2.0, 2.0), 1.0);
        assert!(SampledImage::new(2, 2, vec![0; 3], mapping).is_none());
    }
}
