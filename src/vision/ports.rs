use super::capture::preprocess;
use crate::geometry::{BoundingBox, Point};
use crate::port::PortLocalizer;
use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Vec3f, Vector},
    imgproc,
};

/// Hive ports are the round tube openings; find them with a Hough circle
/// transform on the blurred grayscale frame.
pub struct HoughPorts {
    mask: Option<BoundingBox>,
    min_dist: f64,
    canny_threshold: f64,
    accumulator_threshold: f64,
    min_radius: i32,
    max_radius: i32,
}

impl HoughPorts {
    pub fn new(mask: Option<BoundingBox>) -> Self {
        Self {
            mask,
            min_dist: 50.0,
            canny_threshold: 50.0,
            accumulator_threshold: 30.0,
            min_radius: 5,
            max_radius: 60,
        }
    }
}

impl PortLocalizer<Mat> for HoughPorts {
    fn localize(&mut self, frame: &Mat) -> Result<Vec<Point>> {
        let gray = preprocess(frame, self.mask)?;
        let mut circles: Vector<Vec3f> = Vector::new();
        imgproc::hough_circles(
            &gray,
            &mut circles,
            imgproc::HOUGH_GRADIENT,
            1.0,
            self.min_dist,
            self.canny_threshold,
            self.accumulator_threshold,
            self.min_radius,
            self.max_radius,
        )
        .context("Hough circle detection failed")?;

        Ok(circles
            .iter()
            .map(|circle| {
                let [x, y, _radius] = circle.0;
                Point::new(x.round() as i32, y.round() as i32)
            })
            .collect())
    }
}
