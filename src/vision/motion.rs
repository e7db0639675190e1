use super::{capture::preprocess, from_rect};
use crate::geometry::{BoundingBox, Point};
use crate::motion::{Contour, MotionPrimitive};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Scalar, Vector},
    imgproc,
};

/// Absolute frame difference, dilated with a 5x5 kernel and thresholded.
pub struct FrameDiff {
    mask: Option<BoundingBox>,
    kernel: Option<Mat>,
}

impl FrameDiff {
    pub fn new(mask: Option<BoundingBox>) -> Self {
        Self { mask, kernel: None }
    }

    fn kernel(&mut self) -> Result<&Mat> {
        if self.kernel.is_none() {
            let ones = Mat::new_rows_cols_with_default(5, 5, core::CV_8U, Scalar::all(1.0))?;
            self.kernel = Some(ones);
        }
        self.kernel.as_ref().context("Dilation kernel missing")
    }
}

impl MotionPrimitive<Mat> for FrameDiff {
    type Prepared = Mat;

    fn prepare(&mut self, frame: &Mat) -> Result<Mat> {
        preprocess(frame, self.mask)
    }

    fn contours(&mut self, previous: &Mat, current: &Mat, threshold: f64) -> Result<Vec<Contour>> {
        let mut diff = Mat::default();
        core::absdiff(previous, current, &mut diff).context("Failed to diff frames")?;

        let mut dilated = Mat::default();
        imgproc::dilate_def(&diff, &mut dilated, self.kernel()?).context("Failed to dilate")?;

        let mut mask = Mat::default();
        imgproc::threshold(&dilated, &mut mask, threshold, 255.0, imgproc::THRESH_BINARY)
            .context("Failed to threshold")?;

        let mut found: Vector<Vector<core::Point>> = Vector::new();
        imgproc::find_contours(
            &mask,
            &mut found,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            core::Point::new(0, 0),
        )
        .context("Failed to find contours")?;

        let mut contours = Vec::with_capacity(found.len());
        for points in found.iter() {
            let area = imgproc::contour_area(&points, false)?;
            let bbox = from_rect(imgproc::bounding_rect(&points)?);
            let moments = imgproc::moments(&points, false)?;
            // Degenerate contours have no mass; fall back to the box center.
            let centroid = if moments.m00 != 0.0 {
                Point::new(
                    (moments.m10 / moments.m00) as i32,
                    (moments.m01 / moments.m00) as i32,
                )
            } else {
                bbox.center()
            };
            contours.push(Contour {
                bbox,
                area,
                centroid,
            });
        }
        Ok(contours)
    }
}
