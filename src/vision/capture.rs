use super::to_rect;
use crate::geometry::BoundingBox;
use crate::pipeline::{FrameSource, VideoInfo};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Scalar, Size},
    imgproc,
    prelude::*,
    videoio,
};

pub struct VideoSource {
    capture: videoio::VideoCapture,
    info: VideoInfo,
}

impl VideoSource {
    pub fn open(path: &str) -> Result<Self> {
        let capture = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)
            .with_context(|| format!("Failed to open input source: {}", path))?;
        if !capture.is_opened()? {
            bail!("Failed to open input source: {}", path);
        }
        let total = capture.get(videoio::CAP_PROP_FRAME_COUNT)?;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        Ok(Self {
            capture,
            info: VideoInfo {
                total_frames: total.max(0.0) as u64,
                fps,
            },
        })
    }
}

impl FrameSource<Mat> for VideoSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

/// Blacken the timestamp overlay, convert to grayscale and apply a 5x5
/// Gaussian blur. This is the image both differencing and port detection
/// run on.
pub fn preprocess(frame: &Mat, mask: Option<BoundingBox>) -> Result<Mat> {
    let masked;
    let source = match mask {
        Some(region) => {
            let mut copy = frame.try_clone()?;
            imgproc::rectangle(
                &mut copy,
                to_rect(region),
                Scalar::all(0.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .context("Failed to mask timestamp")?;
            masked = copy;
            &masked
        }
        None => frame,
    };

    let mut gray = Mat::default();
    imgproc::cvt_color(
        source,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )
    .context("Failed to convert to grayscale")?;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(&gray, &mut blurred, Size::new(5, 5), 0.0)
        .context("Failed to blur frame")?;
    Ok(blurred)
}
