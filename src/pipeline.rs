//! Frame loop: warm-up, port localization, motion extraction, port
//! assignment, then either the dedup window or the tracker lifecycle.
//!
//! Per-frame primitive failures are logged and degrade that frame; only sink
//! write errors and decoder errors end the run.

use crate::config::{Config, Mode};
use crate::dedup::{DedupWindow, Visit};
use crate::event::{Event, EventKind, TrackerId};
use crate::geometry::BoundingBox;
use crate::motion::{assign_regions, AssignedRegion, MotionExtractor, MotionPrimitive};
use crate::port::{localize_ports, Port, PortAssigner, PortLocalizer};
use crate::sink::{EventSink, Session};
use crate::timestamp::{TextRecognizer, Timestamp, TimestampReader};
use crate::tracking::{LifecycleStats, StepOutcome, TrackerBackend, TrackerLifecycle};
use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoInfo {
    pub total_frames: u64,
    pub fps: f64,
}

/// Sequential frame decoder.
pub trait FrameSource<F> {
    fn info(&self) -> VideoInfo;
    /// Next frame, or `None` at end of stream.
    fn read(&mut self) -> Result<Option<F>>;
}

/// What a viewer draws on top of the frame.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    pub frame_index: u64,
    pub ports: &'a [Port],
    pub regions: &'a [AssignedRegion],
    pub trackers: &'a [(TrackerId, BoundingBox)],
}

pub trait Viewer<F> {
    /// Show the frame. Returns `true` when the user asked to quit.
    fn show(&mut self, frame: &mut F, overlay: &Overlay<'_>) -> Result<bool>;
}

/// External collaborators the pipeline runs on.
pub struct Primitives<F, P> {
    pub motion: P,
    pub localizer: Box<dyn PortLocalizer<F>>,
    /// Required in tracking mode.
    pub tracker: Option<Box<dyn TrackerBackend<F>>>,
    /// Used only when the config has a timestamp region.
    pub recognizer: Option<Box<dyn TextRecognizer<F>>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub detection_frames: u64,
    pub events: u64,
    pub ocr_reads: u64,
    pub trackers_spawned: u64,
    pub trackers_dropped_lost: u64,
    pub trackers_dropped_reconverged: u64,
    pub trackers_rejected_capacity: u64,
}

impl RunSummary {
    fn add_tracker_stats(&mut self, stats: LifecycleStats) {
        self.trackers_spawned = stats.spawned;
        self.trackers_dropped_lost = stats.dropped_lost;
        self.trackers_dropped_reconverged = stats.dropped_reconverged;
        self.trackers_rejected_capacity = stats.rejected_capacity;
    }
}

enum EventPath<F> {
    Dedup(DedupWindow),
    Tracking(TrackerLifecycle<F>),
}

pub struct Pipeline<F, P>
where
    P: MotionPrimitive<F>,
{
    config: Config,
    motion: MotionExtractor<P, F>,
    localizer: Box<dyn PortLocalizer<F>>,
    assigner: Option<PortAssigner>,
    path: EventPath<F>,
    timestamps: TimestampReader<F>,
    total_frames: u64,
    frame_index: u64,
    last_regions: Vec<AssignedRegion>,
    summary: RunSummary,
}

impl<F, P> Pipeline<F, P>
where
    P: MotionPrimitive<F>,
{
    /// Validates the config; tracking mode without a tracker backend is a
    /// setup error.
    pub fn new(config: &Config, primitives: Primitives<F, P>) -> Result<Self> {
        config.validate()?;

        let path = match config.mode {
            Mode::Dedup => EventPath::Dedup(DedupWindow::new(config.contour_window_size)),
            Mode::Tracking => {
                let Some(backend) = primitives.tracker else {
                    bail!("Tracking mode needs a tracker backend");
                };
                EventPath::Tracking(TrackerLifecycle::new(backend, config.max_trackers))
            }
        };

        let timestamps = match (config.timestamp_region(), primitives.recognizer) {
            (Some(region), Some(recognizer)) => TimestampReader::new(recognizer, region),
            (Some(_), None) => {
                warn!("No text recognizer available; timestamps will be invalid");
                TimestampReader::disabled()
            }
            (None, _) => TimestampReader::disabled(),
        };

        Ok(Self {
            config: config.clone(),
            motion: MotionExtractor::new(primitives.motion, config.motion_params()),
            localizer: primitives.localizer,
            assigner: None,
            path,
            timestamps,
            total_frames: 0,
            frame_index: 0,
            last_regions: Vec::new(),
            summary: RunSummary::default(),
        })
    }

    pub fn ports(&self) -> &[Port] {
        self.assigner.as_ref().map(|a| a.ports()).unwrap_or_default()
    }

    /// Process the whole stream, then flush. Stops early, after finishing the
    /// frame in flight, when the viewer reports quit.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource<F>,
        sink: &mut dyn EventSink,
        mut viewer: Option<&mut dyn Viewer<F>>,
    ) -> Result<RunSummary> {
        let info = source.info();
        self.total_frames = info.total_frames;
        info!(
            "Motion detection session started for {} ({} frames at {:.1} fps, {:?} mode)",
            self.config.video, info.total_frames, info.fps, self.config.mode
        );
        sink.session_start(&Session {
            video: &self.config.video,
            started_at: Local::now(),
            config: &self.config,
        })?;

        loop {
            let Some(mut frame) = source.read().context("Failed to decode frame")? else {
                break;
            };
            self.process_frame(&frame, sink)?;

            if let Some(v) = viewer.as_mut() {
                let trackers = self.tracker_boxes();
                let overlay = Overlay {
                    frame_index: self.frame_index,
                    ports: self.ports(),
                    regions: &self.last_regions,
                    trackers: &trackers,
                };
                match v.show(&mut frame, &overlay) {
                    Ok(true) => {
                        info!("Exiting by user input.");
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!("Display failed: {:#}. Running headless.", err);
                        viewer = None;
                    }
                }
            }
        }

        let summary = self.finish(sink)?;
        info!("Finished processing {}", self.config.video);
        Ok(summary)
    }

    /// Advance the pipeline by one decoded frame.
    pub fn process_frame(&mut self, frame: &F, sink: &mut dyn EventSink) -> Result<()> {
        self.frame_index += 1;
        self.summary.frames += 1;
        self.last_regions.clear();
        let index = self.frame_index;

        if index < self.config.buffer_frames {
            return Ok(());
        }
        if self.assigner.is_none() {
            match localize_ports(self.localizer.as_mut(), frame) {
                Ok(ports) => {
                    sink.ports(&ports)?;
                    self.assigner = Some(PortAssigner::new(
                        ports,
                        self.config.max_distance_from_port,
                    ));
                }
                Err(err) => {
                    warn!("Port localization failed on frame {}: {:#}", index, err);
                    return Ok(());
                }
            }
        }
        if index % self.config.detection_rate != 0 {
            return Ok(());
        }

        let primed = self.motion.is_primed();
        let regions = match self.motion.extract(frame) {
            Ok(regions) => regions,
            Err(err) => {
                warn!("Motion extraction failed on frame {}: {:#}", index, err);
                Vec::new()
            }
        };
        if !primed {
            return Ok(());
        }
        self.summary.detection_frames += 1;

        let Some(assigner) = self.assigner.as_ref() else {
            return Ok(());
        };
        let assigned = assign_regions(&regions, assigner);
        if assigned.len() < regions.len() {
            debug!(
                "Frame {}: {} of {} regions more than {} px from any port",
                index,
                regions.len() - assigned.len(),
                regions.len(),
                assigner.max_distance()
            );
        }

        let events = match &mut self.path {
            EventPath::Dedup(window) => {
                let timestamps = &mut self.timestamps;
                let visits =
                    window.observe(index, assigned.clone(), || timestamps.read(frame));
                visits_to_events(&visits, self.total_frames)
            }
            EventPath::Tracking(lifecycle) => {
                let outcome = lifecycle.step(frame, &assigned, assigner);
                let mut events = tracker_events(&outcome, index, self.total_frames);
                if !events.is_empty() {
                    let timestamp = self.timestamps.read(frame);
                    for event in &mut events {
                        event.timestamp = timestamp;
                    }
                }
                events
            }
        };

        self.last_regions = assigned;
        self.emit(&events, sink)
    }

    /// Report what is still buffered, write the summary and flush the sink.
    pub fn finish(&mut self, sink: &mut dyn EventSink) -> Result<RunSummary> {
        let pending = match &mut self.path {
            EventPath::Dedup(window) => visits_to_events(&window.flush(), self.total_frames),
            EventPath::Tracking(lifecycle) => {
                if !lifecycle.is_empty() {
                    debug!("{} trackers still alive at end of stream", lifecycle.len());
                }
                Vec::new()
            }
        };
        self.emit(&pending, sink)?;

        if let EventPath::Tracking(lifecycle) = &self.path {
            self.summary.add_tracker_stats(lifecycle.stats());
        }
        self.summary.ocr_reads = self.timestamps.reads();

        let summary = self.summary.clone();
        info!(
            "frames={} detection_frames={} events={} ocr_reads={}",
            summary.frames, summary.detection_frames, summary.events, summary.ocr_reads
        );
        sink.summary(&summary)?;
        sink.flush()?;
        Ok(summary)
    }

    fn emit(&mut self, events: &[Event], sink: &mut dyn EventSink) -> Result<()> {
        for event in events {
            info!("{}", event);
            sink.record(event)?;
            self.summary.events += 1;
        }
        Ok(())
    }

    fn tracker_boxes(&self) -> Vec<(TrackerId, BoundingBox)> {
        match &self.path {
            EventPath::Tracking(lifecycle) => lifecycle.boxes(),
            EventPath::Dedup(_) => Vec::new(),
        }
    }
}

fn visits_to_events(visits: &[Visit], total_frames: u64) -> Vec<Event> {
    visits
        .iter()
        .map(|visit| Event {
            frame_index: visit.frame_index,
            total_frames,
            timestamp: visit.timestamp,
            port_id: visit.region.port_id,
            kind: EventKind::Detected,
        })
        .collect()
}

/// Enter events for spawned trackers, then exit events for dropped ones that
/// still land near a port. Timestamps are filled in by the caller.
fn tracker_events(outcome: &StepOutcome, frame_index: u64, total_frames: u64) -> Vec<Event> {
    let enters = outcome.spawned.iter().map(|spawned| Event {
        frame_index,
        total_frames,
        timestamp: Timestamp::Invalid,
        port_id: spawned.port_id,
        kind: EventKind::Enter {
            tracker_id: spawned.tracker_id,
        },
    });
    let exits = outcome.dropped.iter().filter_map(|dropped| {
        let Some(port_id) = dropped.port_id else {
            debug!(
                "Tracker {} ended at {} away from every port; no exit logged",
                dropped.tracker_id, dropped.bbox
            );
            return None;
        };
        Some(Event {
            frame_index,
            total_frames,
            timestamp: Timestamp::Invalid,
            port_id,
            kind: EventKind::Exit {
                tracker_id: dropped.tracker_id,
                reason: dropped.reason,
            },
        })
    });
    enters.chain(exits).collect()
}
