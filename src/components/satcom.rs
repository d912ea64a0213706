//! Simulated satellite communications unit.
//!
//! The satcom link is a consumer, not a navigation source. It heartbeats a
//! SystemStatus message so the controller can show link health, and it
//! periodically pulls a full state snapshot (StateRequest/StateResponse)
//! to represent downlinking telemetry to the ground.

use tracing::{debug, trace};

use crate::bus::{publish_with_retry, Bus};
use crate::error::BusError;
use crate::messages::{ComponentId, Message, MessageKind, Payload};

use super::Component;

/// Heartbeat every 500 ticks (5s).
const STATUS_INTERVAL: u64 = 500;
/// Downlink snapshot every 200 ticks (2s).
const DOWNLINK_INTERVAL: u64 = 200;

pub struct SatCom {
    ticks: u64,
    downlinked: u64,
}

impl SatCom {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            downlinked: 0,
        }
    }
}

impl Default for SatCom {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for SatCom {
    fn id(&self) -> ComponentId {
        ComponentId::SatCom
    }

    fn setup(&mut self, bus: &Bus) -> Result<(), BusError> {
        bus.subscribe(ComponentId::SatCom, MessageKind::StateResponse)
    }

    fn tick(&mut self, bus: &Bus) {
        self.ticks += 1;

        if self.ticks % STATUS_INTERVAL == 0 {
            let heartbeat = Message::system_status(ComponentId::SatCom, true);
            let _ = publish_with_retry(bus, &heartbeat, 3);
        }

        if self.ticks % DOWNLINK_INTERVAL == 0 {
            let _ = publish_with_retry(bus, &Message::state_request(ComponentId::SatCom), 3);
        }

        while let Some(message) = bus.try_receive(ComponentId::SatCom) {
            if let Payload::StateResponse(response) = message.payload {
                self.downlinked += 1;
                trace!(
                    lat = response.state.position.latitude,
                    lon = response.state.position.longitude,
                    heading = response.state.heading,
                    "downlinked state snapshot"
                );
                if self.downlinked % 100 == 0 {
                    debug!(total = self.downlinked, "downlink count");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeats_on_its_interval() {
        let bus = Bus::create().expect("bus");
        bus.subscribe(ComponentId::FlightController, MessageKind::SystemStatus)
            .unwrap();
        let mut satcom = SatCom::new();
        satcom.setup(&bus).unwrap();

        for _ in 0..STATUS_INTERVAL {
            satcom.tick(&bus);
        }
        let beat = bus
            .try_receive(ComponentId::FlightController)
            .expect("heartbeat");
        assert_eq!(beat.kind(), MessageKind::SystemStatus);
        match beat.payload {
            Payload::SystemStatus(s) => assert!(s.active),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
