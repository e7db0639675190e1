use crate::port::PortId;
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::fmt;

pub type TrackerId = u64;

/// Why a tracker left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The visual tracker could no longer follow the object.
    Lost,
    /// The tracked box rejoined a fresh motion region.
    Reconverged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// One deduplicated visit.
    Detected,
    /// A tracker was started for a new region.
    Enter { tracker_id: TrackerId },
    /// A tracker was dropped; the port is taken from its final box.
    Exit {
        tracker_id: TrackerId,
        reason: DropReason,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Detected => "detected",
            EventKind::Enter { .. } => "enter",
            EventKind::Exit { .. } => "exit",
        }
    }

    pub fn tracker_id(&self) -> Option<TrackerId> {
        match self {
            EventKind::Detected => None,
            EventKind::Enter { tracker_id } | EventKind::Exit { tracker_id, .. } => {
                Some(*tracker_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub frame_index: u64,
    pub total_frames: u64,
    pub timestamp: Timestamp,
    pub port_id: PortId,
    pub kind: EventKind,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::Detected => write!(
                f,
                "Bee ID={} detected at frame {}/{}, Timestamp: {}",
                self.port_id, self.frame_index, self.total_frames, self.timestamp
            ),
            EventKind::Enter { tracker_id } => write!(
                f,
                "(Tracker {} start) Bee ID={} enter at frame {}/{}, Timestamp: {}",
                tracker_id, self.port_id, self.frame_index, self.total_frames, self.timestamp
            ),
            EventKind::Exit { tracker_id, .. } => write!(
                f,
                "(Tracker {} end) Bee ID={} exit at frame {}/{}, Timestamp: {}",
                tracker_id, self.port_id, self.frame_index, self.total_frames, self.timestamp
            ),
        }
    }
}
