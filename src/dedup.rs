//! Collapses a multi-frame motion blob into a single visit.
//!
//! The window holds the last `K + 1` detection frames. When a frame arrives,
//! each of its regions is checked against every region in the `K` older
//! frames; a region that overlaps none of them starts a new visit. The visit
//! is reported once its frame reaches the front of a full window, i.e. `K`
//! frames later, still carrying the frame index and timestamp it was first
//! seen with.

use crate::motion::AssignedRegion;
use crate::timestamp::Timestamp;
use std::collections::VecDeque;
use tracing::debug;

/// One detection frame as it entered the window. Never modified afterwards.
#[derive(Debug, Clone)]
struct FrameSnapshot {
    frame_index: u64,
    regions: Vec<AssignedRegion>,
    /// Indices into `regions` that overlapped nothing in the older frames.
    fresh: Vec<usize>,
    timestamp: Timestamp,
}

impl FrameSnapshot {
    fn visits(&self) -> impl Iterator<Item = Visit> + '_ {
        self.fresh.iter().map(move |&i| Visit {
            frame_index: self.frame_index,
            timestamp: self.timestamp,
            region: self.regions[i],
        })
    }
}

/// A deduplicated visit ready to be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit {
    pub frame_index: u64,
    pub timestamp: Timestamp,
    pub region: AssignedRegion,
}

#[derive(Debug)]
pub struct DedupWindow {
    window_size: usize,
    frames: VecDeque<FrameSnapshot>,
}

impl DedupWindow {
    /// `window_size` is `K`, the number of older frames a region is compared
    /// against. Zero disables deduplication.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            frames: VecDeque::with_capacity(window_size + 1),
        }
    }

    /// Frames currently retained (at most `K + 1`).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn is_full(&self) -> bool {
        self.frames.len() == self.window_size + 1
    }

    /// Add the next detection frame and return the visits that become due.
    ///
    /// `stamp` is only called when this frame starts at least one visit, so
    /// the OCR behind it runs on the frame the visit is attributed to and only
    /// when needed.
    pub fn observe<S>(
        &mut self,
        frame_index: u64,
        regions: Vec<AssignedRegion>,
        stamp: S,
    ) -> Vec<Visit>
    where
        S: FnOnce() -> Timestamp,
    {
        // The front of a full window was reported on the previous call.
        if self.is_full() {
            self.frames.pop_front();
        }

        let fresh: Vec<usize> = regions
            .iter()
            .enumerate()
            .filter(|(_, region)| !self.seen_before(region))
            .map(|(i, _)| i)
            .collect();

        let timestamp = if fresh.is_empty() {
            Timestamp::Invalid
        } else {
            stamp()
        };
        if !fresh.is_empty() {
            debug!(
                "Frame {}: {} of {} regions start a visit",
                frame_index,
                fresh.len(),
                regions.len()
            );
        }

        self.frames.push_back(FrameSnapshot {
            frame_index,
            regions,
            fresh,
            timestamp,
        });

        if !self.is_full() {
            return Vec::new();
        }
        self.frames
            .front()
            .map(|front| front.visits().collect())
            .unwrap_or_default()
    }

    /// Report every visit still waiting in a full window, oldest first, and
    /// empty it. Used at end of stream. A window that never filled reports
    /// nothing.
    pub fn flush(&mut self) -> Vec<Visit> {
        if !self.is_full() {
            if !self.frames.is_empty() {
                debug!(
                    "Dropping {} detection frames; the window never filled",
                    self.frames.len()
                );
            }
            self.frames.clear();
            return Vec::new();
        }
        let visits = self
            .frames
            .iter()
            .skip(1)
            .flat_map(FrameSnapshot::visits)
            .collect();
        self.frames.clear();
        visits
    }

    fn seen_before(&self, region: &AssignedRegion) -> bool {
        self.frames.iter().any(|older| {
            older
                .regions
                .iter()
                .any(|seen| seen.bbox().overlaps(region.bbox()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoundingBox, Point};
    use crate::motion::MotionRegion;

    fn region(x: i32, y: i32, port_id: usize) -> AssignedRegion {
        let bbox = BoundingBox::new(x, y, 20, 20);
        AssignedRegion {
            region: MotionRegion {
                bbox,
                centroid: bbox.center(),
            },
            port_id,
        }
    }

    fn stamp() -> Timestamp {
        "10:00:00".parse().unwrap()
    }

    /// Feed frames `1..=frames`, with `regions_at(frame)` as each frame's
    /// regions, and collect everything reported including the final flush.
    fn run<R>(window_size: usize, frames: u64, regions_at: R) -> (Vec<Visit>, Vec<Visit>)
    where
        R: Fn(u64) -> Vec<AssignedRegion>,
    {
        let mut window = DedupWindow::new(window_size);
        let mut reported = Vec::new();
        for frame in 1..=frames {
            reported.extend(window.observe(frame, regions_at(frame), stamp));
            assert!(window.len() <= window_size + 1);
        }
        let flushed = window.flush();
        (reported, flushed)
    }

    #[test]
    fn zero_window_reports_every_region_on_its_own_frame() {
        let mut window = DedupWindow::new(0);
        let visits = window.observe(5, vec![region(0, 0, 1), region(0, 0, 1)], stamp);
        assert_eq!(visits.len(), 2);
        assert!(visits.iter().all(|v| v.frame_index == 5));
        let visits = window.observe(6, vec![region(2, 2, 1)], stamp);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].frame_index, 6);
        assert_eq!(window.len(), 1);
        assert!(window.flush().is_empty());
    }

    #[test]
    fn moving_blob_reports_once_at_first_frame() {
        let (reported, flushed) = run(10, 60, |f| {
            if (20..=25).contains(&f) {
                let step = (f - 20) as i32;
                vec![region(100 + step, 100 + step, 4)]
            } else {
                Vec::new()
            }
        });
        assert!(flushed.is_empty());
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].frame_index, 20);
        assert_eq!(reported[0].region.port_id, 4);
        assert_eq!(reported[0].timestamp, stamp());
    }

    #[test]
    fn report_is_delayed_by_window_size() {
        let mut window = DedupWindow::new(3);
        let mut reported_on = None;
        for frame in 1..=10 {
            let regions = if frame == 2 {
                vec![region(0, 0, 0)]
            } else {
                Vec::new()
            };
            if !window.observe(frame, regions, stamp).is_empty() {
                reported_on = Some(frame);
            }
        }
        assert_eq!(reported_on, Some(5));
    }

    #[test]
    fn disjoint_blobs_each_report() {
        let (reported, _) = run(5, 30, |f| {
            if (10..=12).contains(&f) {
                let step = (f - 10) as i32;
                vec![region(step, step, 0), region(300 + step, 300 + step, 1)]
            } else {
                Vec::new()
            }
        });
        assert_eq!(reported.len(), 2);
        assert!(reported.iter().all(|v| v.frame_index == 10));
        assert_eq!(reported[0].region.port_id, 0);
        assert_eq!(reported[1].region.port_id, 1);
    }

    #[test]
    fn blob_returning_after_window_reports_again() {
        let (reported, _) = run(3, 40, |f| match f {
            10 | 11 => vec![region(f as i32, f as i32, 2)],
            20 => vec![region(11, 11, 2)],
            _ => Vec::new(),
        });
        let frames: Vec<u64> = reported.iter().map(|v| v.frame_index).collect();
        assert_eq!(frames, vec![10, 20]);
    }

    #[test]
    fn cold_window_reports_nothing_until_full() {
        let mut window = DedupWindow::new(4);
        for frame in 1..=4 {
            assert!(window.observe(frame, vec![region(frame as i32 * 50, 0, 0)], stamp).is_empty());
        }
        let visits = window.observe(5, Vec::new(), stamp);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].frame_index, 1);
    }

    #[test]
    fn cold_window_flush_reports_nothing() {
        let mut window = DedupWindow::new(10);
        for frame in 1..=5 {
            let regions = vec![region(frame as i32 * 50, 0, 0)];
            assert!(window.observe(frame, regions, stamp).is_empty());
        }
        assert!(window.flush().is_empty());
        assert!(window.is_empty());
    }

    #[test]
    fn stamp_only_runs_for_frames_with_new_visits() {
        let mut window = DedupWindow::new(2);
        let mut calls = 0;
        let mut step = |frame: u64, regions: Vec<AssignedRegion>, window: &mut DedupWindow| {
            window.observe(frame, regions, || {
                calls += 1;
                stamp()
            });
        };
        step(1, Vec::new(), &mut window);
        step(2, vec![region(0, 0, 0)], &mut window);
        step(3, vec![region(1, 1, 0)], &mut window);
        step(4, vec![region(2, 2, 0)], &mut window);
        assert_eq!(calls, 1);
    }

    #[test]
    fn flush_reports_pending_frames_in_order() {
        let mut window = DedupWindow::new(3);
        window.observe(1, Vec::new(), stamp);
        window.observe(2, vec![region(0, 0, 0)], stamp);
        window.observe(3, Vec::new(), stamp);
        window.observe(4, vec![region(200, 200, 1)], stamp);
        // Frame 1 was reported when the window filled; 2..=4 are pending.
        let flushed = window.flush();
        let frames: Vec<u64> = flushed.iter().map(|v| v.frame_index).collect();
        assert_eq!(frames, vec![2, 4]);
        assert!(window.is_empty());
    }

    #[test]
    fn stationary_identical_boxes_are_not_merged() {
        // Identical boxes fail the edge-inside overlap test, so a perfectly
        // still blob reports on every frame.
        let (reported, flushed) = run(2, 10, |f| {
            if (3..=5).contains(&f) {
                vec![region(40, 40, 0)]
            } else {
                Vec::new()
            }
        });
        assert_eq!(reported.len() + flushed.len(), 3);
    }

    #[test]
    fn centroid_is_carried_through() {
        let mut window = DedupWindow::new(0);
        let visits = window.observe(1, vec![region(10, 10, 0)], stamp);
        assert_eq!(visits[0].region.region.centroid, Point::new(20, 20));
    }
}
