//! Per-object tracker lifecycle.
//!
//! Each tracker moves `Spawned -> Alive -> Dropped`. A tracker is spawned for
//! every region that no live tracker already covers, advanced once per
//! detection frame from the frame after it was spawned, and dropped when its
//! box rejoins a fresh motion region (the object settled at a port) or when
//! the visual tracker loses it. The port of an exit is recomputed from the
//! final box, not the box the tracker started from.

use crate::event::{DropReason, TrackerId};
use crate::geometry::BoundingBox;
use crate::motion::AssignedRegion;
use crate::port::{PortAssigner, PortId};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

/// A single-object visual tracker that has already been initialised on a
/// frame and box.
pub trait VisualTracker<F> {
    /// Advance one frame. `Ok(None)` means the object was lost.
    fn update(&mut self, frame: &F) -> Result<Option<BoundingBox>>;
}

/// Creates visual trackers, e.g. KCF or CSRT.
pub trait TrackerBackend<F> {
    fn init(&mut self, frame: &F, bbox: BoundingBox) -> Result<Box<dyn VisualTracker<F>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Created this frame; not advanced until the next one.
    Spawned,
    Alive,
    Dropped(DropReason),
}

struct Tracker<F> {
    id: TrackerId,
    handle: Box<dyn VisualTracker<F>>,
    bbox: BoundingBox,
    state: TrackerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spawned {
    pub tracker_id: TrackerId,
    pub port_id: PortId,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropped {
    pub tracker_id: TrackerId,
    pub reason: DropReason,
    /// Port nearest the final box; `None` when it is beyond the cutoff.
    pub port_id: Option<PortId>,
    pub bbox: BoundingBox,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub spawned: Vec<Spawned>,
    pub dropped: Vec<Dropped>,
}

impl StepOutcome {
    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty() && self.dropped.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub spawned: u64,
    pub dropped_lost: u64,
    pub dropped_reconverged: u64,
    pub rejected_capacity: u64,
}

/// Owns the bounded set of live trackers.
pub struct TrackerLifecycle<F> {
    backend: Box<dyn TrackerBackend<F>>,
    trackers: Vec<Tracker<F>>,
    max_trackers: usize,
    next_id: TrackerId,
    stats: LifecycleStats,
}

impl<F> TrackerLifecycle<F> {
    pub fn new(backend: Box<dyn TrackerBackend<F>>, max_trackers: usize) -> Self {
        Self {
            backend,
            trackers: Vec::with_capacity(max_trackers),
            max_trackers,
            next_id: 1,
            stats: LifecycleStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }

    /// Live trackers as `(id, box)`, oldest first.
    pub fn boxes(&self) -> Vec<(TrackerId, BoundingBox)> {
        self.trackers.iter().map(|t| (t.id, t.bbox)).collect()
    }

    pub fn state(&self, id: TrackerId) -> Option<TrackerState> {
        self.trackers.iter().find(|t| t.id == id).map(|t| t.state)
    }

    /// Run one detection frame: spawn for uncovered regions, advance the
    /// alive trackers, and drop the ones that reconverged or were lost.
    pub fn step(
        &mut self,
        frame: &F,
        regions: &[AssignedRegion],
        assigner: &PortAssigner,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        for region in regions {
            if self.trackers.iter().any(|t| t.bbox.overlaps(region.bbox())) {
                continue;
            }
            if self.trackers.len() >= self.max_trackers {
                self.stats.rejected_capacity += 1;
                warn!(
                    "Tracker capacity ({}) reached; ignoring motion at {} (port {})",
                    self.max_trackers,
                    region.bbox(),
                    region.port_id
                );
                continue;
            }
            if let Some(spawned) = self.spawn(frame, region) {
                outcome.spawned.push(spawned);
            }
        }

        for tracker in &mut self.trackers {
            if tracker.state != TrackerState::Alive {
                continue;
            }
            let tracked = match tracker.handle.update(frame) {
                Ok(tracked) => tracked,
                Err(err) => {
                    warn!("Tracker {} update failed: {:#}", tracker.id, err);
                    None
                }
            };
            if let Some(bbox) = tracked {
                tracker.bbox = bbox;
            }

            // Reconvergence wins over loss.
            if regions.iter().any(|r| tracker.bbox.overlaps(r.bbox())) {
                tracker.state = TrackerState::Dropped(DropReason::Reconverged);
            } else if tracked.is_none() {
                tracker.state = TrackerState::Dropped(DropReason::Lost);
            }
        }

        let mut kept = Vec::with_capacity(self.trackers.len());
        for mut tracker in self.trackers.drain(..) {
            match tracker.state {
                TrackerState::Dropped(reason) => {
                    match reason {
                        DropReason::Lost => self.stats.dropped_lost += 1,
                        DropReason::Reconverged => self.stats.dropped_reconverged += 1,
                    }
                    let port_id = assigner.assign(tracker.bbox.center());
                    debug!(
                        "Tracker {} dropped ({:?}) at {}, port {:?}",
                        tracker.id, reason, tracker.bbox, port_id
                    );
                    outcome.dropped.push(Dropped {
                        tracker_id: tracker.id,
                        reason,
                        port_id,
                        bbox: tracker.bbox,
                    });
                }
                TrackerState::Spawned => {
                    tracker.state = TrackerState::Alive;
                    kept.push(tracker);
                }
                TrackerState::Alive => kept.push(tracker),
            }
        }
        self.trackers = kept;

        outcome
    }

    fn spawn(&mut self, frame: &F, region: &AssignedRegion) -> Option<Spawned> {
        let bbox = *region.bbox();
        let handle = match self.backend.init(frame, bbox) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Failed to start tracker at {}: {:#}", bbox, err);
                return None;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.stats.spawned += 1;
        self.trackers.push(Tracker {
            id,
            handle,
            bbox,
            state: TrackerState::Spawned,
        });
        debug!("Tracker {} started at {} (port {})", id, bbox, region.port_id);

        Some(Spawned {
            tracker_id: id,
            port_id: region.port_id,
            bbox,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::motion::MotionRegion;
    use crate::port::Port;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Moves its box by `dx` per update and reports loss after `lives`
    /// updates.
    struct Drifting {
        bbox: BoundingBox,
        dx: i32,
        lives: Option<usize>,
        updates: Rc<Cell<usize>>,
    }

    impl VisualTracker<()> for Drifting {
        fn update(&mut self, _frame: &()) -> Result<Option<BoundingBox>> {
            self.updates.set(self.updates.get() + 1);
            match self.lives {
                Some(0) => return Ok(None),
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            self.bbox.x += self.dx;
            Ok(Some(self.bbox))
        }
    }

    struct DriftingBackend {
        dx: i32,
        lives: Option<usize>,
        updates: Rc<Cell<usize>>,
        fail_init: bool,
    }

    impl DriftingBackend {
        fn new(dx: i32, lives: Option<usize>) -> Self {
            Self {
                dx,
                lives,
                updates: Rc::new(Cell::new(0)),
                fail_init: false,
            }
        }
    }

    impl TrackerBackend<()> for DriftingBackend {
        fn init(&mut self, _frame: &(), bbox: BoundingBox) -> Result<Box<dyn VisualTracker<()>>> {
            if self.fail_init {
                anyhow::bail!("init refused");
            }
            Ok(Box::new(Drifting {
                bbox,
                dx: self.dx,
                lives: self.lives,
                updates: Rc::clone(&self.updates),
            }))
        }
    }

    fn assigner() -> PortAssigner {
        PortAssigner::new(
            vec![
                Port {
                    id: 0,
                    center: Point::new(50, 50),
                },
                Port {
                    id: 1,
                    center: Point::new(250, 50),
                },
            ],
            60.0,
        )
    }

    fn region(x: i32, y: i32, port_id: PortId) -> AssignedRegion {
        let bbox = BoundingBox::new(x, y, 20, 20);
        AssignedRegion {
            region: MotionRegion {
                bbox,
                centroid: bbox.center(),
            },
            port_id,
        }
    }

    #[test]
    fn spawns_one_tracker_per_uncovered_region() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(0, None)), 5);
        let outcome = lifecycle.step(&(), &[region(40, 40, 0), region(240, 40, 1)], &assigner());
        let ids: Vec<TrackerId> = outcome.spawned.iter().map(|s| s.tracker_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(outcome.spawned[1].port_id, 1);
        assert!(outcome.dropped.is_empty());
        assert_eq!(lifecycle.len(), 2);
        assert_eq!(lifecycle.state(1), Some(TrackerState::Alive));
    }

    #[test]
    fn covered_region_does_not_spawn() {
        let backend = DriftingBackend::new(100, None);
        let mut lifecycle = TrackerLifecycle::new(Box::new(backend), 5);
        lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        // Second region overlaps the first tracker's box before it moves.
        let outcome = lifecycle.step(&(), &[region(45, 45, 0)], &assigner());
        assert!(outcome.spawned.is_empty());
    }

    #[test]
    fn capacity_caps_the_active_set() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(0, None)), 2);
        let regions = [region(0, 0, 0), region(100, 0, 0), region(200, 0, 1)];
        let outcome = lifecycle.step(&(), &regions, &assigner());
        assert_eq!(outcome.spawned.len(), 2);
        assert_eq!(lifecycle.len(), 2);
        assert_eq!(lifecycle.stats().rejected_capacity, 1);

        lifecycle.step(&(), &[region(300, 300, 1)], &assigner());
        assert_eq!(lifecycle.len(), 2);
    }

    #[test]
    fn spawned_tracker_is_not_advanced_on_its_first_frame() {
        let backend = DriftingBackend::new(0, None);
        let updates = Rc::clone(&backend.updates);
        let mut lifecycle = TrackerLifecycle::new(Box::new(backend), 5);
        lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        assert_eq!(updates.get(), 0);
        lifecycle.step(&(), &[], &assigner());
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn lost_tracker_is_dropped_with_final_port() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(0, Some(0))), 5);
        lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        let outcome = lifecycle.step(&(), &[], &assigner());
        assert_eq!(outcome.dropped.len(), 1);
        let dropped = outcome.dropped[0];
        assert_eq!(dropped.tracker_id, 1);
        assert_eq!(dropped.reason, DropReason::Lost);
        assert_eq!(dropped.port_id, Some(0));
        assert!(lifecycle.is_empty());
        assert_eq!(lifecycle.stats().dropped_lost, 1);
    }

    #[test]
    fn reconvergence_is_checked_before_loss() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(0, Some(0))), 5);
        lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        // Update fails, but the last box still overlaps a fresh region.
        let outcome = lifecycle.step(&(), &[region(45, 45, 0)], &assigner());
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].reason, DropReason::Reconverged);
        assert_eq!(lifecycle.stats().dropped_reconverged, 1);
        assert_eq!(lifecycle.stats().dropped_lost, 0);
    }

    #[test]
    fn exit_port_follows_the_drift() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(50, Some(4))), 5);
        let first = lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        assert_eq!(first.spawned[0].port_id, 0);

        let mut exits = Vec::new();
        for _ in 0..6 {
            exits.extend(lifecycle.step(&(), &[], &assigner()).dropped);
        }
        assert_eq!(exits.len(), 1);
        // 4 moves of 50px: box at x=240, center (250, 50).
        assert_eq!(exits[0].bbox.x, 240);
        assert_eq!(exits[0].port_id, Some(1));
    }

    #[test]
    fn exit_beyond_cutoff_has_no_port() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(500, Some(1))), 5);
        lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        lifecycle.step(&(), &[], &assigner());
        let outcome = lifecycle.step(&(), &[], &assigner());
        assert_eq!(outcome.dropped[0].port_id, None);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut lifecycle = TrackerLifecycle::new(Box::new(DriftingBackend::new(0, Some(0))), 1);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.extend(
                lifecycle
                    .step(&(), &[region(40, 40, 0)], &assigner())
                    .spawned
                    .iter()
                    .map(|s| s.tracker_id),
            );
            lifecycle.step(&(), &[], &assigner());
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn init_failure_skips_the_region() {
        let mut backend = DriftingBackend::new(0, None);
        backend.fail_init = true;
        let mut lifecycle = TrackerLifecycle::new(Box::new(backend), 5);
        let outcome = lifecycle.step(&(), &[region(40, 40, 0)], &assigner());
        assert!(outcome.is_empty());
        assert!(lifecycle.is_empty());
        assert_eq!(lifecycle.stats().spawned, 0);
    }
}
