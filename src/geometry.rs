use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel coordinate on the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in pixels.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned box in `x, y, width, height` form, as produced by
/// `boundingRect` and consumed by the visual trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates `(x1, y1)`..`(x2, y2)`.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    /// Midpoint of the box, truncated to whole pixels. Used for boxes that come
    /// back from a visual tracker, where no contour moments exist.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Edge-inside test: true when, on both axes, at least one edge of `other`
    /// lies strictly inside this box's span.
    ///
    /// The test is directional. Identical boxes do not overlap, and a box that
    /// fully contains `other`'s edges only overlaps it when called on the
    /// containing box. Callers pass the reference box as `self` and the
    /// candidate as `other`.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        let x_hit = strictly_within(other.x, self.x, self.right())
            || strictly_within(other.right(), self.x, self.right());
        let y_hit = strictly_within(other.y, self.y, self.bottom())
            || strictly_within(other.bottom(), self.y, self.bottom());
        x_hit && y_hit
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}x{}]", self.x, self.y, self.width, self.height)
    }
}

fn strictly_within(value: i32, lo: i32, hi: i32) -> bool {
    lo < value && value < hi
}
