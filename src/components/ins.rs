//! Simulated inertial navigation system.
//!
//! Dead reckoning: integrates a fixed velocity estimate plus a slowly
//! accumulating bias, so its position diverges from truth over time. That
//! drift is the point — the controller should prefer GPS whenever GPS is
//! alive, and the divergence makes a wrong fusion order visible in the
//! status display within seconds.

use rand::Rng;
use tracing::trace;

use crate::bus::{publish_position, Bus};
use crate::error::BusError;
use crate::messages::{ComponentId, Position};

use super::Component;

/// Publish every 5 ticks (20Hz); inertial units report faster than GPS.
const PUBLISH_INTERVAL: u64 = 5;

pub struct Ins {
    position: Position,
    /// Per-publish bias, grows by a random nudge each step.
    drift_lat: f64,
    drift_lon: f64,
    ticks: u64,
}

impl Ins {
    pub fn new(start: Position) -> Self {
        Self {
            position: start,
            drift_lat: 0.0,
            drift_lon: 0.0,
            ticks: 0,
        }
    }

    fn advance(&mut self) -> Position {
        let mut rng = rand::thread_rng();
        self.drift_lat += rng.gen_range(-0.00001..0.00002);
        self.drift_lon += rng.gen_range(-0.00001..0.00002);
        self.position.latitude += 0.0002 + self.drift_lat;
        self.position.longitude += 0.0001 + self.drift_lon;
        self.position.altitude += rng.gen_range(-5.0..5.0);
        self.position
    }
}

impl Component for Ins {
    fn id(&self) -> ComponentId {
        ComponentId::Ins
    }

    fn setup(&mut self, _bus: &Bus) -> Result<(), BusError> {
        Ok(())
    }

    fn tick(&mut self, bus: &Bus) {
        self.ticks += 1;
        if self.ticks % PUBLISH_INTERVAL != 0 {
            return;
        }
        let estimate = self.advance();
        trace!(lat = estimate.latitude, lon = estimate.longitude, "ins estimate");
        let _ = publish_position(bus, ComponentId::Ins, estimate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn estimates_drift_monotonically_eastward() {
        let mut ins = Ins::new(SimConfig::default().initial_position);
        let start = ins.position;
        for _ in 0..100 {
            ins.advance();
        }
        // The fixed velocity term dominates the random bias over 100 steps.
        assert!(ins.position.latitude > start.latitude);
        assert!(ins.position.longitude > start.longitude);
    }
}
