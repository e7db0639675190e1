use crate::config::Config;
use crate::event::{DropReason, Event, EventKind, TrackerId};
use crate::pipeline::RunSummary;
use crate::port::{Port, PortId};
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// What a sink is told once, before any event.
#[derive(Debug, Clone, Copy)]
pub struct Session<'a> {
    pub video: &'a str,
    pub started_at: DateTime<Local>,
    pub config: &'a Config,
}

/// Append-only destination for the event log.
pub trait EventSink {
    fn session_start(&mut self, session: &Session<'_>) -> Result<()>;
    fn ports(&mut self, ports: &[Port]) -> Result<()>;
    fn record(&mut self, event: &Event) -> Result<()>;
    fn summary(&mut self, summary: &RunSummary) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Human-readable log, one line per event.
pub struct TextLog {
    writer: BufWriter<File>,
}

impl TextLog {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: open_append(path)?,
        })
    }

    fn line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl EventSink for TextLog {
    fn session_start(&mut self, session: &Session<'_>) -> Result<()> {
        self.line(&format!(
            "--- Logging session started at {} for file {} ---",
            session.started_at.format("%Y-%m-%d %H:%M:%S%.6f"),
            session.video
        ))?;
        self.line(&format!("Config({})", serde_json::to_string(session.config)?))?;
        self.flush()
    }

    fn ports(&mut self, ports: &[Port]) -> Result<()> {
        self.line("Coordinates of Tube Hives detected, along with associated Bee ID:")?;
        for port in ports {
            self.line(&format!("Bee ID={} Tube Hive Coords: {}", port.id, port.center))?;
        }
        self.line("")
    }

    fn record(&mut self, event: &Event) -> Result<()> {
        self.line(&event.to_string())
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.line(&format!(
            "--- Finished: {} frames, {} events ---",
            summary.frames, summary.events
        ))?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SessionLog<'a> {
    event: &'static str,
    timestamp: String,
    source: &'a str,
    config: &'a Config,
}

#[derive(Serialize)]
struct PortsLog<'a> {
    event: &'static str,
    ports: &'a [Port],
}

#[derive(Serialize)]
struct EventLog {
    event: &'static str,
    frame_index: u64,
    total_frames: u64,
    timestamp: Timestamp,
    port_id: PortId,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracker_id: Option<TrackerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DropReason>,
}

impl From<&Event> for EventLog {
    fn from(event: &Event) -> Self {
        let reason = match event.kind {
            EventKind::Exit { reason, .. } => Some(reason),
            _ => None,
        };
        Self {
            event: event.kind.name(),
            frame_index: event.frame_index,
            total_frames: event.total_frames,
            timestamp: event.timestamp,
            port_id: event.port_id,
            tracker_id: event.kind.tracker_id(),
            reason,
        }
    }
}

#[derive(Serialize)]
struct SummaryLog<'a> {
    event: &'static str,
    timestamp: String,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// JSON lines log for downstream tooling.
pub struct JsonLog {
    writer: BufWriter<File>,
}

impl JsonLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn write_event<T: Serialize>(&mut self, event: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl EventSink for JsonLog {
    fn session_start(&mut self, session: &Session<'_>) -> Result<()> {
        self.write_event(&SessionLog {
            event: "session_start",
            timestamp: session.started_at.to_rfc3339(),
            source: session.video,
            config: session.config,
        })?;
        self.flush()
    }

    fn ports(&mut self, ports: &[Port]) -> Result<()> {
        self.write_event(&PortsLog {
            event: "ports",
            ports,
        })
    }

    fn record(&mut self, event: &Event) -> Result<()> {
        self.write_event(&EventLog::from(event))
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.write_event(&SummaryLog {
            event: "summary",
            timestamp: Local::now().to_rfc3339(),
            summary,
        })?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub sessions: usize,
    pub ports: Vec<Port>,
    pub events: Vec<Event>,
    pub summary: Option<RunSummary>,
    pub flushes: usize,
}

impl EventSink for MemorySink {
    fn session_start(&mut self, _session: &Session<'_>) -> Result<()> {
        self.sessions += 1;
        Ok(())
    }

    fn ports(&mut self, ports: &[Port]) -> Result<()> {
        self.ports = ports.to_vec();
        Ok(())
    }

    fn record(&mut self, event: &Event) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Forwards to every inner sink in order.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanOut {
    fn session_start(&mut self, session: &Session<'_>) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.session_start(session))
    }

    fn ports(&mut self, ports: &[Port]) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.ports(ports))
    }

    fn record(&mut self, event: &Event) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.record(event))
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.summary(summary))
    }

    fn flush(&mut self) -> Result<()> {
        self.sinks.iter_mut().try_for_each(|s| s.flush())
    }
}
