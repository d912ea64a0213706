//! Simulated GPS receiver.
//!
//! Publishes a position fix at 10Hz as a small random walk around a cruise
//! track. Two failure textures are simulated: short frozen stretches where
//! the receiver repeats its last fix, and invalid fixes that are detected
//! and suppressed instead of published. Both feed the controller's
//! staleness logic the same way real receiver dropouts would.

use rand::Rng;
use tracing::{debug, trace};

use crate::bus::{publish_position, Bus};
use crate::error::BusError;
use crate::messages::{ComponentId, Position};

use super::Component;

/// Publish every 10 ticks (10Hz at the 10ms tick).
const PUBLISH_INTERVAL: u64 = 10;
/// How long a frozen stretch lasts, in ticks.
const FREEZE_TICKS: u32 = 150;

pub struct Gps {
    position: Position,
    ticks: u64,
    frozen_for: u32,
    frozen_total: u64,
    invalid_total: u64,
}

impl Gps {
    pub fn new(start: Position) -> Self {
        Self {
            position: start,
            ticks: 0,
            frozen_for: 0,
            frozen_total: 0,
            invalid_total: 0,
        }
    }

    fn next_fix(&mut self) -> Option<Position> {
        let mut rng = rand::thread_rng();

        if self.frozen_for > 0 {
            self.frozen_for -= 1;
            return Some(self.position);
        }
        if rng.gen_ratio(1, 500) {
            self.frozen_for = FREEZE_TICKS;
            self.frozen_total += 1;
            debug!(total = self.frozen_total, "gps fix frozen");
            return Some(self.position);
        }

        self.position.latitude += rng.gen_range(-0.0005..0.0005);
        self.position.longitude += rng.gen_range(-0.0005..0.0005);
        self.position.altitude += rng.gen_range(-15.0..15.0);

        // A wildly implausible fix is treated as receiver garbage and
        // withheld; the next good fix resumes publishing.
        if rng.gen_ratio(1, 1000) {
            self.invalid_total += 1;
            debug!(total = self.invalid_total, "gps fix invalid, suppressed");
            return None;
        }
        Some(self.position)
    }
}

impl Component for Gps {
    fn id(&self) -> ComponentId {
        ComponentId::Gps
    }

    fn setup(&mut self, _bus: &Bus) -> Result<(), BusError> {
        // Pure producer, no subscriptions.
        Ok(())
    }

    fn tick(&mut self, bus: &Bus) {
        self.ticks += 1;
        if self.ticks % PUBLISH_INTERVAL != 0 {
            return;
        }
        if let Some(fix) = self.next_fix() {
            trace!(lat = fix.latitude, lon = fix.longitude, "gps fix");
            let _ = publish_position(bus, ComponentId::Gps, fix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn frozen_stretch_repeats_the_last_fix() {
        let mut gps = Gps::new(SimConfig::default().initial_position);
        gps.frozen_for = 3;
        let first = gps.next_fix().expect("fix");
        let second = gps.next_fix().expect("fix");
        assert_eq!(first, second);
        assert_eq!(gps.frozen_for, 1);
    }

    #[test]
    fn publishes_on_its_interval() {
        let bus = Bus::create().expect("bus");
        bus.subscribe(ComponentId::FlightController, crate::messages::MessageKind::PositionUpdate)
            .unwrap();
        let mut gps = Gps::new(SimConfig::default().initial_position);
        for _ in 0..PUBLISH_INTERVAL {
            gps.tick(&bus);
        }
        // At most one fix per interval; zero only if it rolled invalid.
        let mut received = 0;
        while bus.try_receive(ComponentId::FlightController).is_some() {
            received += 1;
        }
        assert!(received <= 1);
    }
}
