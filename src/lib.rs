//! Port-attributed entry/exit event logging for tube hive video.
//!
//! Motion between detection frames is located, assigned to the nearest hive
//! port, and turned into events either by a sliding dedup window or by
//! per-object visual trackers. The OpenCV-backed primitives live in
//! [`vision`] behind the `opencv` feature; everything else is plain Rust and
//! runs against any frame type.

pub mod config;
pub mod dedup;
pub mod eval;
pub mod event;
pub mod geometry;
pub mod motion;
pub mod pipeline;
pub mod port;
pub mod sink;
pub mod timestamp;
pub mod tracking;

#[cfg(feature = "opencv")]
pub mod vision;

pub use config::{Config, Mode};
pub use event::{DropReason, Event, EventKind, TrackerId};
pub use geometry::{BoundingBox, Point};
pub use pipeline::{FrameSource, Overlay, Pipeline, Primitives, RunSummary, VideoInfo, Viewer};
pub use port::{Port, PortAssigner, PortId};
pub use sink::{EventSink, FanOut, JsonLog, MemorySink, TextLog};
pub use timestamp::{Timestamp, INVALID_TIMESTAMP};
