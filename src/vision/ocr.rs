use super::to_rect;
use crate::geometry::BoundingBox;
use crate::timestamp::TextRecognizer;
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Scalar},
    imgcodecs, imgproc,
    prelude::*,
};
use std::process::Command;

/// Runs the `tesseract` CLI on a binarized crop of the clock overlay.
pub struct TesseractOcr {
    program: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
        }
    }
}

impl TesseractOcr {
    /// White text on black, padded by 10 px.
    fn binarize(frame: &Mat, region: BoundingBox) -> Result<Mat> {
        let clipped = BoundingBox::from_corners(
            region.x.clamp(0, frame.cols()),
            region.y.clamp(0, frame.rows()),
            region.right().clamp(0, frame.cols()),
            region.bottom().clamp(0, frame.rows()),
        );
        if clipped.area() == 0 {
            bail!("Timestamp region {} is outside the frame", region);
        }
        let crop = Mat::roi(frame, to_rect(clipped))?;

        let mut gray = Mat::default();
        imgproc::cvt_color(
            &crop,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut thresh = Mat::default();
        imgproc::threshold(
            &gray,
            &mut thresh,
            100.0,
            255.0,
            imgproc::THRESH_BINARY_INV | imgproc::THRESH_OTSU,
        )?;
        let mut inverted = Mat::default();
        core::bitwise_not_def(&thresh, &mut inverted)?;

        let mut bordered = Mat::default();
        core::copy_make_border(
            &inverted,
            &mut bordered,
            10,
            10,
            10,
            10,
            core::BORDER_CONSTANT,
            Scalar::all(0.0),
        )?;
        Ok(bordered)
    }
}

impl TextRecognizer<Mat> for TesseractOcr {
    fn recognize(&mut self, frame: &Mat, region: BoundingBox) -> Result<String> {
        let image = Self::binarize(frame, region).context("Failed to prepare timestamp crop")?;

        let file = tempfile::Builder::new()
            .prefix("hivecount-ocr-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create OCR scratch file")?;
        let path = file
            .path()
            .to_str()
            .context("OCR scratch path is not valid UTF-8")?;
        if !imgcodecs::imwrite(path, &image, &core::Vector::new())? {
            bail!("Failed to write {}", path);
        }

        let output = Command::new(&self.program)
            .arg(path)
            .arg("stdout")
            .args(["--oem", "3", "--psm", "6"])
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
