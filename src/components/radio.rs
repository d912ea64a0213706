//! Simulated landing radio (ground-based approach aid).
//!
//! The lowest-priority navigation source: a coarse fix centered on the
//! airfield, published at 2Hz with noise an order of magnitude wider than
//! GPS. It only matters when both inertial sources are gone, which is
//! exactly when a coarse answer beats none.

use rand::Rng;
use tracing::trace;

use crate::bus::{publish_position, Bus};
use crate::error::BusError;
use crate::messages::{ComponentId, Position};

use super::Component;

/// Publish every 50 ticks (2Hz).
const PUBLISH_INTERVAL: u64 = 50;

/// The airfield the radio triangulates against.
const FIELD: Position = Position {
    latitude: 37.621,
    longitude: -122.379,
    altitude: 13.0,
};

pub struct LandingRadio {
    ticks: u64,
}

impl LandingRadio {
    pub fn new() -> Self {
        Self { ticks: 0 }
    }

    fn coarse_fix(&self) -> Position {
        let mut rng = rand::thread_rng();
        Position {
            latitude: FIELD.latitude + rng.gen_range(-0.005..0.005),
            longitude: FIELD.longitude + rng.gen_range(-0.005..0.005),
            altitude: FIELD.altitude + rng.gen_range(0.0..150.0),
        }
    }
}

impl Default for LandingRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for LandingRadio {
    fn id(&self) -> ComponentId {
        ComponentId::LandingRadio
    }

    fn setup(&mut self, _bus: &Bus) -> Result<(), BusError> {
        Ok(())
    }

    fn tick(&mut self, bus: &Bus) {
        self.ticks += 1;
        if self.ticks % PUBLISH_INTERVAL != 0 {
            return;
        }
        let fix = self.coarse_fix();
        trace!(lat = fix.latitude, lon = fix.longitude, "radio fix");
        let _ = publish_position(bus, ComponentId::LandingRadio, fix);
    }
}
