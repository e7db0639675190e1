use crate::geometry::Point;
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

pub type PortId = usize;

/// A fixed nest entrance. Ids are the detection order of the localizer and
/// never change for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Port {
    pub id: PortId,
    pub center: Point,
}

/// Fixed-geometry detector that finds the port centers once the camera has
/// settled (e.g. a Hough circle transform).
pub trait PortLocalizer<F> {
    fn localize(&mut self, frame: &F) -> Result<Vec<Point>>;
}

/// Run the localizer once and number the results in detection order.
pub fn localize_ports<F, L>(localizer: &mut L, frame: &F) -> Result<Vec<Port>>
where
    L: PortLocalizer<F> + ?Sized,
{
    let ports: Vec<Port> = localizer
        .localize(frame)?
        .into_iter()
        .enumerate()
        .map(|(id, center)| Port { id, center })
        .collect();

    if ports.is_empty() {
        warn!("No ports found; every motion region will be dropped");
    }
    for port in &ports {
        info!("Bee ID={} Tube Hive Coords: {}", port.id, port.center);
    }
    Ok(ports)
}

/// Maps a point to the nearest port within `max_distance` pixels.
#[derive(Debug, Clone)]
pub struct PortAssigner {
    ports: Vec<Port>,
    max_distance: f64,
}

impl PortAssigner {
    pub fn new(mut ports: Vec<Port>, max_distance: f64) -> Self {
        ports.sort_by_key(|port| port.id);
        Self {
            ports,
            max_distance,
        }
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Closest port regardless of the cutoff. On equal distances the lowest
    /// id wins.
    pub fn nearest(&self, point: Point) -> Option<(PortId, f64)> {
        let mut best: Option<(PortId, f64)> = None;
        for port in &self.ports {
            let distance = port.center.distance(&point);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((port.id, distance)),
            }
        }
        best
    }

    /// Nearest port id, or `None` when even the nearest one is farther than
    /// the cutoff.
    pub fn assign(&self, point: Point) -> Option<PortId> {
        let (id, distance) = self.nearest(point)?;
        if distance > self.max_distance {
            debug!(
                "Point {} is {:.1}px from nearest port {}, beyond cutoff {:.1}",
                point, distance, id, self.max_distance
            );
            return None;
        }
        Some(id)
    }
}
