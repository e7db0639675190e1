use crate::geometry::{BoundingBox, Point};
use crate::port::{PortAssigner, PortId};
use anyhow::Result;
use serde::Serialize;
use tracing::debug;

/// External contour of the thresholded difference mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contour {
    pub bbox: BoundingBox,
    pub area: f64,
    /// Moment centroid (`m10/m00`, `m01/m00`).
    pub centroid: Point,
}

/// A blob of pixel change that passed the area filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotionRegion {
    pub bbox: BoundingBox,
    pub centroid: Point,
}

impl From<Contour> for MotionRegion {
    fn from(contour: Contour) -> Self {
        Self {
            bbox: contour.bbox,
            centroid: contour.centroid,
        }
    }
}

/// A motion region tied to the port it is closest to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssignedRegion {
    pub region: MotionRegion,
    pub port_id: PortId,
}

impl AssignedRegion {
    pub fn bbox(&self) -> &BoundingBox {
        &self.region.bbox
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    /// Per-pixel difference (0-255) needed to count as change.
    pub threshold: f64,
    /// Exclusive lower bound on contour area.
    pub min_area: f64,
    /// Exclusive upper bound on contour area.
    pub max_area: f64,
}

/// Raw differencing primitive. `prepare` turns a decoded frame into the form
/// the differencing runs on (grayscale, blurred, timestamp masked);
/// `contours` diffs two prepared frames, dilates, thresholds and returns the
/// external contours of the mask.
pub trait MotionPrimitive<F> {
    type Prepared;

    fn prepare(&mut self, frame: &F) -> Result<Self::Prepared>;

    fn contours(
        &mut self,
        previous: &Self::Prepared,
        current: &Self::Prepared,
        threshold: f64,
    ) -> Result<Vec<Contour>>;
}

/// Keeps the previous prepared frame and turns consecutive frames into
/// area-filtered motion regions.
pub struct MotionExtractor<P, F>
where
    P: MotionPrimitive<F>,
{
    primitive: P,
    params: MotionParams,
    previous: Option<P::Prepared>,
}

impl<P, F> MotionExtractor<P, F>
where
    P: MotionPrimitive<F>,
{
    pub fn new(primitive: P, params: MotionParams) -> Self {
        Self {
            primitive,
            params,
            previous: None,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.previous.is_some()
    }

    /// Diff `frame` against the previous call's frame. The first call only
    /// stores the frame and returns nothing. The current frame becomes the
    /// previous one even when differencing fails.
    pub fn extract(&mut self, frame: &F) -> Result<Vec<MotionRegion>> {
        let current = self.primitive.prepare(frame)?;
        let Some(previous) = self.previous.take() else {
            self.previous = Some(current);
            return Ok(Vec::new());
        };

        let diffed = self
            .primitive
            .contours(&previous, &current, self.params.threshold);
        self.previous = Some(current);
        let contours = diffed?;
        let total = contours.len();
        let regions = filter_by_area(contours, self.params.min_area, self.params.max_area);
        debug!("{} contours, {} within area bounds", total, regions.len());
        Ok(regions)
    }
}

/// Keep contours whose area lies strictly between the bounds.
pub fn filter_by_area(contours: Vec<Contour>, min_area: f64, max_area: f64) -> Vec<MotionRegion> {
    contours
        .into_iter()
        .filter(|c| min_area < c.area && c.area < max_area)
        .map(MotionRegion::from)
        .collect()
}

/// Attach a port to every region; regions with no port inside the cutoff are
/// dropped.
pub fn assign_regions(regions: &[MotionRegion], assigner: &PortAssigner) -> Vec<AssignedRegion> {
    regions
        .iter()
        .filter_map(|region| {
            assigner.assign(region.centroid).map(|port_id| AssignedRegion {
                region: *region,
                port_id,
            })
        })
        .collect()
}
