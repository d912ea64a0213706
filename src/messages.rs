//! Typed messages exchanged over the shared-memory bus.
//!
//! Every type that crosses a process boundary is `#[repr(C)]` and `Copy`:
//! messages are copied by value into the queue and out again, never shared.
//! All-zero bytes are a valid bit pattern for every field, which lets the
//! freshly created (zero-filled) shared region be read without ceremony.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of managed component identities (also the process-table size).
pub const MAX_COMPONENTS: usize = 6;

/// One named participant in the simulation. The discriminant doubles as the
/// bus routing key and the supervisor's process-table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ComponentId {
    FlightController = 0,
    Autopilot = 1,
    Gps = 2,
    Ins = 3,
    LandingRadio = 4,
    SatCom = 5,
}

impl ComponentId {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ComponentId::FlightController => "flight-controller",
            ComponentId::Autopilot => "autopilot",
            ComponentId::Gps => "gps",
            ComponentId::Ins => "ins",
            ComponentId::LandingRadio => "landing-radio",
            ComponentId::SatCom => "satcom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "flight-controller" => Some(ComponentId::FlightController),
            "autopilot" => Some(ComponentId::Autopilot),
            "gps" => Some(ComponentId::Gps),
            "ins" => Some(ComponentId::Ins),
            "landing-radio" => Some(ComponentId::LandingRadio),
            "satcom" => Some(ComponentId::SatCom),
            _ => None,
        }
    }
}

/// Geographic position: degrees, degrees, feet. Validation is a producer
/// responsibility; this layer stores whatever it is given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Basic kinematic state carried in StateResponse messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct FlightState {
    pub position: Position,
    /// Degrees.
    pub heading: f64,
    /// Knots.
    pub speed: f64,
    /// Feet per minute.
    pub vertical_speed: f64,
    /// Unix timestamp, seconds.
    pub timestamp: u32,
}

/// Discriminant for subscription filtering. Kept in the header as well as
/// in the payload tag so the bus can filter without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageKind {
    PositionUpdate = 0,
    StateRequest = 1,
    StateResponse = 2,
    AutopilotCommand = 3,
    SystemStatus = 4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub sender: ComponentId,
    pub receiver: ComponentId,
    /// Unix timestamp, seconds.
    pub timestamp: u32,
    pub payload_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct PositionUpdate {
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct StateResponse {
    pub state: FlightState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct AutopilotCommand {
    pub target_heading: f64,
    pub target_speed: f64,
    pub target_altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct SystemStatus {
    pub active: bool,
}

/// Fixed-size tagged payload, sized to its largest variant so the queue
/// slots have a stable layout across all attached processes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, u32)]
pub enum Payload {
    PositionUpdate(PositionUpdate) = 0,
    StateRequest = 1,
    StateResponse(StateResponse) = 2,
    AutopilotCommand(AutopilotCommand) = 3,
    SystemStatus(SystemStatus) = 4,
}

/// A complete bus message. Immutable once published.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Payload,
}

impl Message {
    fn new(sender: ComponentId, receiver: ComponentId, kind: MessageKind, payload: Payload, payload_size: u32) -> Self {
        Self {
            header: MessageHeader {
                kind,
                sender,
                receiver,
                timestamp: unix_time() as u32,
                payload_size,
            },
            payload,
        }
    }

    pub fn position_update(sender: ComponentId, position: Position) -> Self {
        Self::new(
            sender,
            ComponentId::FlightController,
            MessageKind::PositionUpdate,
            Payload::PositionUpdate(PositionUpdate { position }),
            std::mem::size_of::<PositionUpdate>() as u32,
        )
    }

    pub fn state_request(sender: ComponentId) -> Self {
        Self::new(
            sender,
            ComponentId::FlightController,
            MessageKind::StateRequest,
            Payload::StateRequest,
            0,
        )
    }

    pub fn state_response(receiver: ComponentId, state: FlightState) -> Self {
        Self::new(
            ComponentId::FlightController,
            receiver,
            MessageKind::StateResponse,
            Payload::StateResponse(StateResponse { state }),
            std::mem::size_of::<StateResponse>() as u32,
        )
    }

    pub fn autopilot_command(sender: ComponentId, target_heading: f64, target_speed: f64, target_altitude: f64) -> Self {
        Self::new(
            sender,
            ComponentId::FlightController,
            MessageKind::AutopilotCommand,
            Payload::AutopilotCommand(AutopilotCommand {
                target_heading,
                target_speed,
                target_altitude,
            }),
            std::mem::size_of::<AutopilotCommand>() as u32,
        )
    }

    pub fn system_status(sender: ComponentId, active: bool) -> Self {
        Self::new(
            sender,
            ComponentId::FlightController,
            MessageKind::SystemStatus,
            Payload::SystemStatus(SystemStatus { active }),
            std::mem::size_of::<SystemStatus>() as u32,
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }
}

/// Current unix time in whole seconds.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_names_round_trip() {
        for id in [
            ComponentId::FlightController,
            ComponentId::Autopilot,
            ComponentId::Gps,
            ComponentId::Ins,
            ComponentId::LandingRadio,
            ComponentId::SatCom,
        ] {
            assert_eq!(ComponentId::from_name(id.name()), Some(id));
            assert!(id.index() < MAX_COMPONENTS);
        }
        assert_eq!(ComponentId::from_name("bogus"), None);
    }

    #[test]
    fn constructors_set_matching_header_kind() {
        let pos = Position { latitude: 37.0, longitude: -122.0, altitude: 1000.0 };
        let msg = Message::position_update(ComponentId::Gps, pos);
        assert_eq!(msg.kind(), MessageKind::PositionUpdate);
        assert_eq!(msg.header.sender, ComponentId::Gps);
        assert_eq!(msg.header.receiver, ComponentId::FlightController);
        match msg.payload {
            Payload::PositionUpdate(p) => assert_eq!(p.position, pos),
            other => panic!("unexpected payload {:?}", other),
        }

        let msg = Message::state_request(ComponentId::Autopilot);
        assert_eq!(msg.kind(), MessageKind::StateRequest);
        assert_eq!(msg.header.payload_size, 0);
    }
}
