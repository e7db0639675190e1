//! OpenCV implementations of the frame primitives. Frames are BGR `Mat`s as
//! decoded by `VideoCapture`.

mod capture;
mod display;
mod kcf;
mod motion;
mod ocr;
mod ports;

pub use capture::{preprocess, VideoSource};
pub use display::Window;
pub use kcf::KcfBackend;
pub use motion::FrameDiff;
pub use ocr::TesseractOcr;
pub use ports::HoughPorts;

use crate::config::{Config, Mode};
use crate::geometry::{BoundingBox, Point};
use crate::pipeline::Primitives;
use crate::timestamp::TextRecognizer;
use crate::tracking::TrackerBackend;
use opencv::core::{self, Mat, Rect};

/// Everything the pipeline needs, configured from `config`.
pub fn primitives(config: &Config) -> Primitives<Mat, FrameDiff> {
    let mask = config.timestamp_region();
    Primitives {
        motion: FrameDiff::new(mask),
        localizer: Box::new(HoughPorts::new(mask)),
        tracker: match config.mode {
            Mode::Tracking => Some(Box::new(KcfBackend) as Box<dyn TrackerBackend<Mat>>),
            Mode::Dedup => None,
        },
        recognizer: mask
            .map(|_| Box::new(TesseractOcr::default()) as Box<dyn TextRecognizer<Mat>>),
    }
}

pub(crate) fn to_rect(bbox: BoundingBox) -> Rect {
    Rect::new(bbox.x, bbox.y, bbox.width, bbox.height)
}

pub(crate) fn from_rect(rect: Rect) -> BoundingBox {
    BoundingBox::new(rect.x, rect.y, rect.width, rect.height)
}

pub(crate) fn to_point(point: Point) -> core::Point {
    core::Point::new(point.x, point.y)
}
