//! Simulated autopilot.
//!
//! Flies a fixed plan of legs (heading, speed, altitude, duration). Once a
//! second it requests a state snapshot; on each response it runs three PID
//! loops against the active leg and publishes the corrected targets as an
//! AutopilotCommand, clamped to the configured flight envelope.

use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::{publish_with_retry, Bus};
use crate::config::{AutopilotConfig, PidGains};
use crate::error::BusError;
use crate::messages::{ComponentId, FlightState, Message, MessageKind, Payload};

use super::Component;

/// Request a snapshot every 100 ticks (1Hz).
const REQUEST_INTERVAL: u64 = 100;

/// One segment of the canned flight plan.
#[derive(Debug, Clone, Copy)]
struct Leg {
    heading: f64,
    speed: f64,
    altitude: f64,
    duration: Duration,
}

const FLIGHT_PLAN: [Leg; 3] = [
    Leg {
        heading: 90.0,
        speed: 250.0,
        altitude: 10_000.0,
        duration: Duration::from_secs(30),
    },
    Leg {
        heading: 180.0,
        speed: 300.0,
        altitude: 15_000.0,
        duration: Duration::from_secs(30),
    },
    Leg {
        heading: 270.0,
        speed: 200.0,
        altitude: 8_000.0,
        duration: Duration::from_secs(30),
    },
];

/// Textbook PID with a clamped integral term.
struct Pid {
    gains: PidGains,
    integral: f64,
    last_error: f64,
}

impl Pid {
    fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_error: 0.0,
        }
    }

    fn step(&mut self, error: f64, dt: f64) -> f64 {
        self.integral = (self.integral + error * dt).clamp(-100.0, 100.0);
        let derivative = (error - self.last_error) / dt;
        self.last_error = error;
        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
    }
}

pub struct Autopilot {
    config: AutopilotConfig,
    heading_pid: Pid,
    altitude_pid: Pid,
    speed_pid: Pid,
    leg: usize,
    leg_ticks: u64,
    ticks: u64,
}

impl Autopilot {
    pub fn new(config: AutopilotConfig) -> Self {
        Self {
            config,
            heading_pid: Pid::new(config.heading),
            altitude_pid: Pid::new(config.altitude),
            speed_pid: Pid::new(config.speed),
            leg: 0,
            leg_ticks: 0,
            ticks: 0,
        }
    }

    fn active_leg(&self) -> Leg {
        FLIGHT_PLAN[self.leg % FLIGHT_PLAN.len()]
    }

    fn advance_plan(&mut self) {
        self.leg_ticks += 1;
        let leg_duration_ticks = self.active_leg().duration.as_millis() as u64 / 10;
        if self.leg_ticks >= leg_duration_ticks {
            self.leg = (self.leg + 1) % FLIGHT_PLAN.len();
            self.leg_ticks = 0;
            self.heading_pid.reset();
            self.altitude_pid.reset();
            self.speed_pid.reset();
            debug!(leg = self.leg, "advancing to next flight plan leg");
        }
    }

    /// PID-correct the leg targets using the latest snapshot, then clamp
    /// to the envelope. `dt` is the snapshot interval in seconds.
    fn command_for(&mut self, state: &FlightState, dt: f64) -> (f64, f64, f64) {
        let leg = self.active_leg();
        let limits = self.config.limits;

        let mut heading_err = leg.heading - state.heading;
        if heading_err > 180.0 {
            heading_err -= 360.0;
        } else if heading_err < -180.0 {
            heading_err += 360.0;
        }
        let heading_cmd =
            (state.heading + self.heading_pid.step(heading_err, dt)).rem_euclid(360.0);

        let speed_cmd = (state.speed + self.speed_pid.step(leg.speed - state.speed, dt))
            .clamp(limits.min_speed_kts, limits.max_speed_kts);

        let altitude_err = leg.altitude - state.position.altitude;
        let altitude_cmd = state.position.altitude + self.altitude_pid.step(altitude_err, dt);

        (heading_cmd, speed_cmd, altitude_cmd)
    }
}

impl Component for Autopilot {
    fn id(&self) -> ComponentId {
        ComponentId::Autopilot
    }

    fn setup(&mut self, bus: &Bus) -> Result<(), BusError> {
        bus.subscribe(ComponentId::Autopilot, MessageKind::StateResponse)
    }

    fn tick(&mut self, bus: &Bus) {
        self.ticks += 1;
        self.advance_plan();

        if self.ticks % REQUEST_INTERVAL == 0 {
            let _ = publish_with_retry(bus, &Message::state_request(ComponentId::Autopilot), 3);
        }

        while let Some(message) = bus.try_receive(ComponentId::Autopilot) {
            if let Payload::StateResponse(response) = message.payload {
                let dt = REQUEST_INTERVAL as f64 * 0.010;
                let (heading, speed, altitude) = self.command_for(&response.state, dt);
                trace!(heading, speed, altitude, "autopilot command");
                let cmd =
                    Message::autopilot_command(ComponentId::Autopilot, heading, speed, altitude);
                let _ = publish_with_retry(bus, &cmd, 3);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::messages::Position;

    fn state(heading: f64, speed: f64, altitude: f64) -> FlightState {
        FlightState {
            position: Position {
                latitude: 37.0,
                longitude: -122.0,
                altitude,
            },
            heading,
            speed,
            vertical_speed: 0.0,
            timestamp: 0,
        }
    }

    #[test]
    fn commands_steer_toward_the_active_leg() {
        let mut ap = Autopilot::new(SimConfig::default().autopilot);
        // Leg 0: heading 90, speed 250, altitude 10_000.
        let (heading, speed, altitude) = ap.command_for(&state(45.0, 200.0, 8_000.0), 1.0);
        assert!(heading > 45.0 && heading <= 90.0 + 1.0);
        assert!(speed > 200.0);
        assert!(altitude > 8_000.0);
    }

    #[test]
    fn heading_correction_takes_the_short_way_around() {
        let mut ap = Autopilot::new(SimConfig::default().autopilot);
        // Current heading 350, target 90: the error must wrap through
        // north (+100), not sweep back through south (-260).
        let (heading, _, _) = ap.command_for(&state(350.0, 250.0, 10_000.0), 1.0);
        let wrapped = (heading - 350.0).rem_euclid(360.0);
        assert!(wrapped > 0.0 && wrapped < 180.0);
    }

    #[test]
    fn speed_commands_respect_the_envelope() {
        let mut ap = Autopilot::new(SimConfig::default().autopilot);
        let limits = ap.config.limits;
        let (_, speed, _) = ap.command_for(&state(90.0, 1_000.0, 10_000.0), 1.0);
        assert!(speed <= limits.max_speed_kts);
        let (_, speed, _) = ap.command_for(&state(90.0, 0.0, 10_000.0), 1.0);
        assert!(speed >= limits.min_speed_kts);
    }

    #[test]
    fn plan_advances_after_each_leg() {
        let mut ap = Autopilot::new(SimConfig::default().autopilot);
        let leg_ticks = FLIGHT_PLAN[0].duration.as_millis() as u64 / 10;
        for _ in 0..leg_ticks {
            ap.advance_plan();
        }
        assert_eq!(ap.leg, 1);
    }
}
