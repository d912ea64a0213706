//! Aggregated flight state with per-source navigation fusion.
//!
//! The flight controller keeps one [`ExtendedFlightState`] and feeds every
//! received message into it. Navigation sources are ranked GPS over INS
//! over landing radio: `best_position` returns the highest-priority source
//! that is connected and fresh, falling down the ranking as sources drop
//! out. A disconnect invalidates the source immediately; silence
//! invalidates it after [`STATE_STALENESS_SECS`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::messages::{ComponentId, FlightState, Position};

/// Seconds without an update before a navigation source stops being
/// trusted even though its process is still connected.
pub const STATE_STALENESS_SECS: u64 = 10;

/// One navigation source's latest report plus its bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavSource {
    pub position: Position,
    /// Unix seconds of the last accepted update; zero means never.
    pub updated_at: u64,
    /// Tracks process connectivity, flipped by the supervisor on spawn,
    /// reap, and restart.
    pub connected: bool,
}

impl NavSource {
    /// Usable for fusion: connected, has reported at least once, and the
    /// report is fresh.
    pub fn is_valid(&self, now: u64) -> bool {
        self.connected
            && self.updated_at != 0
            && now.saturating_sub(self.updated_at) <= STATE_STALENESS_SECS
    }
}

/// The controller's full picture: three ranked navigation sources, basic
/// kinematics, autopilot targets, and satcom link state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedFlightState {
    pub gps: NavSource,
    pub ins: NavSource,
    pub radio: NavSource,

    /// Last successfully fused position; kept as a fallback when every
    /// source has dropped out.
    pub position: Position,
    /// Unix seconds of the last fusion update, zero if none yet.
    pub updated_at: u64,

    /// Degrees.
    pub heading: f64,
    /// Knots.
    pub speed: f64,
    /// Feet per minute.
    pub vertical_speed: f64,

    pub autopilot_engaged: bool,
    pub target_heading: f64,
    pub target_speed: f64,
    pub target_altitude: f64,

    pub satcom_active: bool,
    /// Unix seconds of the last satcom status, zero if none yet.
    pub satcom_updated_at: u64,
}

impl ExtendedFlightState {
    fn source_mut(&mut self, id: ComponentId) -> Option<&mut NavSource> {
        match id {
            ComponentId::Gps => Some(&mut self.gps),
            ComponentId::Ins => Some(&mut self.ins),
            ComponentId::LandingRadio => Some(&mut self.radio),
            _ => None,
        }
    }

    /// Record a position report from a navigation source and recompute
    /// the fused position. Reports from non-navigation senders are
    /// ignored.
    pub fn apply_position(&mut self, sender: ComponentId, position: Position, now: u64) {
        if let Some(source) = self.source_mut(sender) {
            source.position = position;
            source.updated_at = now;
            self.refresh_fusion(now);
        }
    }

    fn refresh_fusion(&mut self, now: u64) {
        if let Some((_, position)) = self.best_position(now) {
            self.position = position;
            self.updated_at = now;
        }
    }

    /// Mark a component's process as connected or gone. A navigation
    /// source going down is invalidated immediately, without waiting for
    /// staleness; other components only carry connectivity state.
    pub fn apply_connectivity(&mut self, id: ComponentId, connected: bool) {
        if let Some(source) = self.source_mut(id) {
            if source.connected != connected {
                debug!(component = id.name(), connected, "nav source connectivity changed");
            }
            source.connected = connected;
        } else if id == ComponentId::SatCom && !connected {
            self.satcom_active = false;
        }
    }

    pub fn apply_autopilot_command(
        &mut self,
        target_heading: f64,
        target_speed: f64,
        target_altitude: f64,
    ) {
        self.autopilot_engaged = true;
        self.target_heading = target_heading;
        self.target_speed = target_speed;
        self.target_altitude = target_altitude;
    }

    pub fn apply_system_status(&mut self, active: bool, now: u64) {
        self.satcom_active = active;
        self.satcom_updated_at = now;
    }

    /// The best available position: GPS, then INS, then the landing radio.
    /// `None` when no source is connected and fresh.
    pub fn best_position(&self, now: u64) -> Option<(ComponentId, Position)> {
        [
            (ComponentId::Gps, &self.gps),
            (ComponentId::Ins, &self.ins),
            (ComponentId::LandingRadio, &self.radio),
        ]
        .into_iter()
        .find(|(_, source)| source.is_valid(now))
        .map(|(id, source)| (id, source.position))
    }

    /// At least one navigation source is usable and the fused position
    /// was refreshed within the staleness window.
    pub fn is_valid(&self, now: u64) -> bool {
        self.best_position(now).is_some()
            && self.updated_at != 0
            && now.saturating_sub(self.updated_at) <= STATE_STALENESS_SECS
    }

    /// Snapshot used for StateResponse payloads: best position plus the
    /// current kinematics. Falls back to the last fused position when no
    /// navigation source currently qualifies.
    pub fn to_flight_state(&self, now: u64) -> FlightState {
        let position = self
            .best_position(now)
            .map(|(_, p)| p)
            .unwrap_or(self.position);
        FlightState {
            position,
            heading: self.heading,
            speed: self.speed,
            vertical_speed: self.vertical_speed,
            timestamp: now as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(latitude: f64) -> Position {
        Position {
            latitude,
            longitude: -122.0,
            altitude: 10_000.0,
        }
    }

    #[test]
    fn fusion_prefers_gps_then_ins_then_radio() {
        let now = 1_700_000_000u64;
        let mut state = ExtendedFlightState::default();
        for id in [ComponentId::Gps, ComponentId::Ins, ComponentId::LandingRadio] {
            state.apply_connectivity(id, true);
        }
        state.apply_position(ComponentId::Gps, pos(1.0), now);
        state.apply_position(ComponentId::Ins, pos(2.0), now);
        state.apply_position(ComponentId::LandingRadio, pos(3.0), now);

        let (id, p) = state.best_position(now).expect("gps wins");
        assert_eq!(id, ComponentId::Gps);
        assert_eq!(p.latitude, 1.0);

        state.apply_connectivity(ComponentId::Gps, false);
        let (id, _) = state.best_position(now).expect("ins next");
        assert_eq!(id, ComponentId::Ins);

        state.apply_connectivity(ComponentId::Ins, false);
        let (id, _) = state.best_position(now).expect("radio last");
        assert_eq!(id, ComponentId::LandingRadio);

        state.apply_connectivity(ComponentId::LandingRadio, false);
        assert!(state.best_position(now).is_none());
    }

    #[test]
    fn stale_sources_fall_out_of_fusion() {
        let now = 1_700_000_000u64;
        let mut state = ExtendedFlightState::default();
        state.apply_connectivity(ComponentId::Gps, true);
        state.apply_connectivity(ComponentId::Ins, true);
        state.apply_position(ComponentId::Gps, pos(1.0), now);
        state.apply_position(ComponentId::Ins, pos(2.0), now + STATE_STALENESS_SECS);

        // GPS is exactly at the staleness bound: still valid.
        let later = now + STATE_STALENESS_SECS;
        assert_eq!(
            state.best_position(later).map(|(id, _)| id),
            Some(ComponentId::Gps)
        );

        // One second past the bound, GPS drops out and INS takes over.
        assert_eq!(
            state.best_position(later + 1).map(|(id, _)| id),
            Some(ComponentId::Ins)
        );
    }

    #[test]
    fn reconnect_requires_a_fresh_report() {
        let now = 1_700_000_000u64;
        let mut state = ExtendedFlightState::default();
        state.apply_connectivity(ComponentId::Gps, true);
        state.apply_position(ComponentId::Gps, pos(1.0), now);
        state.apply_connectivity(ComponentId::Gps, false);
        assert!(state.best_position(now).is_none());

        // Restarted but with the old timestamp aged out: still invalid
        // until the new process reports.
        let much_later = now + STATE_STALENESS_SECS + 5;
        state.apply_connectivity(ComponentId::Gps, true);
        assert!(state.best_position(much_later).is_none());
        state.apply_position(ComponentId::Gps, pos(4.0), much_later);
        assert_eq!(
            state.best_position(much_later).map(|(_, p)| p.latitude),
            Some(4.0)
        );
    }

    #[test]
    fn flight_state_snapshot_uses_best_position() {
        let now = 1_700_000_000u64;
        let mut state = ExtendedFlightState::default();
        state.heading = 270.0;
        state.speed = 150.0;

        let snap = state.to_flight_state(now);
        assert_eq!(snap.position, Position::default());
        assert_eq!(snap.heading, 270.0);

        state.apply_connectivity(ComponentId::Ins, true);
        state.apply_position(ComponentId::Ins, pos(7.0), now);
        let snap = state.to_flight_state(now);
        assert_eq!(snap.position.latitude, 7.0);
        assert_eq!(snap.timestamp, now as u32);

        // Every source gone: the snapshot holds the last fused position.
        state.apply_connectivity(ComponentId::Ins, false);
        let snap = state.to_flight_state(now);
        assert_eq!(snap.position.latitude, 7.0);
    }

    #[test]
    fn validity_needs_a_source_and_a_recent_fusion() {
        let now = 1_700_000_000u64;
        let mut state = ExtendedFlightState::default();
        assert!(!state.is_valid(now));

        state.apply_connectivity(ComponentId::Gps, true);
        state.apply_position(ComponentId::Gps, pos(1.0), now);
        assert!(state.is_valid(now));
        assert!(state.is_valid(now + STATE_STALENESS_SECS));
        assert!(!state.is_valid(now + STATE_STALENESS_SECS + 1));

        state.apply_connectivity(ComponentId::Gps, false);
        assert!(!state.is_valid(now));
    }
}
