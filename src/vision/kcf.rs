use super::{from_rect, to_rect};
use crate::geometry::BoundingBox;
use crate::tracking::{TrackerBackend, VisualTracker};
use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::{TrackerKCF, TrackerKCF_Params},
};

fn create_kcf_tracker() -> Result<Ptr<TrackerKCF>> {
    let params = TrackerKCF_Params::default()?;
    TrackerKCF::create(params).context("Failed to create KCF tracker")
}

struct KcfTracker {
    tracker: Ptr<TrackerKCF>,
}

impl VisualTracker<Mat> for KcfTracker {
    fn update(&mut self, frame: &Mat) -> Result<Option<BoundingBox>> {
        let mut rect = Rect::default();
        let found = self
            .tracker
            .update(frame, &mut rect)
            .context("KCF update failed")?;
        Ok(found.then(|| from_rect(rect)))
    }
}

/// Kernelized correlation filter trackers, one per object.
#[derive(Debug, Default, Clone, Copy)]
pub struct KcfBackend;

impl TrackerBackend<Mat> for KcfBackend {
    fn init(&mut self, frame: &Mat, bbox: BoundingBox) -> Result<Box<dyn VisualTracker<Mat>>> {
        let mut tracker = create_kcf_tracker()?;
        tracker
            .init(frame, to_rect(bbox))
            .with_context(|| format!("Failed to start KCF tracker on {}", bbox))?;
        Ok(Box::new(KcfTracker { tracker }))
    }
}
