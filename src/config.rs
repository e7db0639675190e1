use crate::geometry::BoundingBox;
use crate::motion::MotionParams;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which event path turns assigned regions into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One `detected` event per visit via the dedup window.
    #[default]
    Dedup,
    /// `enter`/`exit` events from per-object trackers.
    Tracking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the video file.
    pub video: String,
    /// Whether the video has a clock overlay. When set, the overlay is masked
    /// out of motion detection and read by OCR for event timestamps.
    pub timestamp: bool,
    /// Clock overlay as `[x1, y1, x2, y2]`.
    pub timestamp_rect: Option<[i32; 4]>,
    /// Run motion detection on every n-th frame.
    pub detection_rate: u64,
    /// Per-pixel difference needed to count as motion (0-255).
    pub motion_threshold: f64,
    pub min_contour_area: f64,
    pub max_contour_area: f64,
    /// Number of older detection frames a region is compared against. Zero
    /// disables deduplication.
    pub contour_window_size: usize,
    /// Frames to skip while the camera settles; ports are located on the last.
    pub buffer_frames: u64,
    pub max_distance_from_port: f64,
    pub max_trackers: usize,
    pub mode: Mode,
    pub show: bool,
    /// Text log, appended to.
    pub log: Option<PathBuf>,
    /// JSON lines log, truncated per run.
    pub log_json: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video: String::new(),
            timestamp: false,
            timestamp_rect: None,
            detection_rate: 2,
            motion_threshold: 10.0,
            min_contour_area: 200.0,
            max_contour_area: 1000.0,
            contour_window_size: 10,
            buffer_frames: 30,
            max_distance_from_port: 100.0,
            max_trackers: 5,
            mode: Mode::Dedup,
            show: true,
            log: None,
            log_json: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that would make the run meaningless. Called once
    /// before the first frame.
    pub fn validate(&self) -> Result<()> {
        if self.video.is_empty() {
            bail!("No video path given");
        }
        if self.timestamp {
            let Some(rect) = self.timestamp_rect else {
                bail!("Timestamp masking is enabled but no timestamp rectangle was provided");
            };
            let [x1, y1, x2, y2] = rect;
            if x2 <= x1 || y2 <= y1 {
                bail!("Timestamp rectangle {:?} is empty", rect);
            }
        }
        if self.detection_rate == 0 {
            bail!("detection_rate must be at least 1");
        }
        if self.min_contour_area >= self.max_contour_area {
            bail!(
                "min_contour_area ({}) must be below max_contour_area ({})",
                self.min_contour_area,
                self.max_contour_area
            );
        }
        if self.max_distance_from_port < 0.0 {
            bail!("max_distance_from_port must not be negative");
        }
        if self.max_trackers == 0 {
            bail!("max_trackers must be at least 1");
        }
        Ok(())
    }

    /// The clock overlay, when this video has one.
    pub fn timestamp_region(&self) -> Option<BoundingBox> {
        if !self.timestamp {
            return None;
        }
        self.timestamp_rect
            .map(|[x1, y1, x2, y2]| BoundingBox::from_corners(x1, y1, x2, y2))
    }

    pub fn motion_params(&self) -> MotionParams {
        MotionParams {
            threshold: self.motion_threshold,
            min_area: self.min_contour_area,
            max_area: self.max_contour_area,
        }
    }
}
