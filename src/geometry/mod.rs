//! Geometric primitives shared by sampling, detection and composition.
//!
//! Native coordinates are PDF default user space: units of 1/72 inch, origin
//! at the lower-left, y growing upward. Pixel coordinates have their origin
//! at the top-left of the sampled grid with y growing downward.
//! [`PixelMapping`] is the only bridge between the two.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in native page space, kept as its PDF corners.
///
/// Storing `[llx lly urx ury]` directly means moving one edge never disturbs
/// the others.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// X coordinate of the lower-left corner
    pub llx: f32,
    /// Y coordinate of the lower-left corner
    pub lly: f32,
    /// X coordinate of the upper-right corner
    pub urx: f32,
    /// Y coordinate of the upper-right corner
    pub ury: f32,
}

impl Rect {
    /// Create a new rectangle from its lower-left corner and dimensions.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            llx: x,
            lly: y,
            urx: x + width,
            ury: y + height,
        }
    }

    /// Create a rectangle from two opposite corners in any order.
    ///
    /// PDF boxes (`[llx lly urx ury]`) are not required to be normalized.
    ///
    /// # Examples
    ///
    /// ```
    /// use add_staves::geometry::Rect;
    ///
    /// let rect = Rect::from_corners(110.0, 70.0, 10.0, 20.0);
    /// assert_eq!(rect.left(), 10.0);
    /// assert_eq!(rect.bottom(), 20.0);
    /// assert_eq!(rect.width(), 100.0);
    /// assert_eq!(rect.height(), 50.0);
    /// ```
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            llx: x0.min(x1),
            lly: y0.min(y1),
            urx: x0.max(x1),
            ury: y0.max(y1),
        }
    }

    /// Get the left edge x-coordinate.
    pub fn left(&self) -> f32 {
        self.llx
    }

    /// Get the right edge x-coordinate.
    pub fn right(&self) -> f32 {
        self.urx
    }

    /// Get the bottom edge y-coordinate.
    pub fn bottom(&self) -> f32 {
        self.lly
    }

    /// Get the top edge y-coordinate.
    pub fn top(&self) -> f32 {
        self.ury
    }

    /// Horizontal size.
    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    /// Vertical size.
    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }

    /// Whether the rectangle has a positive, finite area.
    pub fn is_valid(&self) -> bool {
        let (width, height) = (self.width(), self.height());
        width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0
    }

    /// Overlapping region of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left().max(other.left());
        let right = self.right().min(other.right());
        let bottom = self.bottom().max(other.bottom());
        let top = self.top().min(other.top());
        if right > left && top > bottom {
            Some(Rect::from_corners(left, bottom, right, top))
        } else {
            None
        }
    }

    /// Copy of this rectangle whose bottom edge is moved down to `y`.
    ///
    /// Returns the rectangle unchanged when `y` is not below the bottom edge.
    pub fn extended_down_to(&self, y: f32) -> Rect {
        if y >= self.bottom() {
            return *self;
        }
        Rect { lly: y, ..*self }
    }

    /// PDF array form `[llx lly urx ury]`.
    pub fn to_pdf_array(&self) -> [f32; 4] {
        [self.llx, self.lly, self.urx, self.ury]
    }
}

/// 2D affine transformation matrix `[a b c d e f]` in PDF convention.
///
/// A point is transformed as `x' = a·x + c·y + e`, `y' = b·x + d·y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    /// Horizontal scaling component
    pub a: f32,
    /// Rotation/skew component
    pub b: f32,
    /// Rotation/skew component
    pub c: f32,
    /// Vertical scaling component
    pub d: f32,
    /// Horizontal translation
    pub e: f32,
    /// Vertical translation
    pub f: f32,
}

impl Matrix {
    /// Create an identity matrix.
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    /// Create a matrix from the six operands of a `cm` operator or `/Matrix` array.
    pub fn from_array(values: [f32; 6]) -> Self {
        let [a, b, c, d, e, f] = values;
        Self { a, b, c, d, e, f }
    }

    /// Concatenate: apply `self` first, then `other`.
    ///
    /// This is the order required by `cm`: the new CTM is `M × CTM`, i.e.
    /// `m.multiply(&ctm)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use add_staves::geometry::Matrix;
    ///
    /// let scale = Matrix::from_array([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
    /// let shift = Matrix::from_array([1.0, 0.0, 0.0, 1.0, 10.0, 5.0]);
    /// let m = scale.multiply(&shift);
    /// assert_eq!(m.transform_point(1.0, 1.0), (12.0, 7.0));
    /// ```
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Transform a point.
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// Convert to a tiny-skia transform.
    pub fn to_skia(&self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Affine mapping between sampled pixels and native page coordinates.
///
/// Carried as a value next to every sampled image so detection and
/// composition stay pure functions of their inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelMapping {
    /// Pixels per native unit
    pub scale: f32,
    /// Native x of the left edge of pixel column 0
    pub origin_x: f32,
    /// Native y of the top edge of pixel row 0
    pub origin_top: f32,
}

impl PixelMapping {
    /// Mapping for a grid covering `page_box` at `scale` pixels per unit.
    pub fn for_box(page_box: &Rect, scale: f32) -> Self {
        Self {
            scale,
            origin_x: page_box.left(),
            origin_top: page_box.top(),
        }
    }

    /// Native x of a (fractional) pixel column position.
    pub fn to_native_x(&self, px: f32) -> f32 {
        self.origin_x + px / self.scale
    }

    /// Native y of a (fractional) pixel row position.
    pub fn to_native_y(&self, py: f32) -> f32 {
        self.origin_top - py / self.scale
    }

    /// Pixel column of a native x.
    pub fn to_pixel_x(&self, x: f32) -> f32 {
        (x - self.origin_x) * self.scale
    }

    /// Pixel row of a native y.
    pub fn to_pixel_y(&self, y: f32) -> f32 {
        (self.origin_top - y) * self.scale
    }

    /// Convert a pixel distance to native units.
    pub fn to_native_len(&self, pixels: f32) -> f32 {
        pixels / self.scale
    }

    /// Native → pixel transform (flips the y axis).
    pub fn native_to_pixel(&self) -> Matrix {
        Matrix {
            a: self.scale,
            b: 0.0,
            c: 0.0,
            d: -self.scale,
            e: -self.origin_x * self.scale,
            f: self.origin_top * self.scale,
        }
    }
}
