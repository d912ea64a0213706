//! Simulation configuration.
//!
//! Everything is optional in the JSON file; missing fields take the
//! defaults below. The file is read once by the supervisor at startup and
//! the parsed struct is passed down to the components it spawns via their
//! command line, so every process sees the same tuning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::messages::Position;

/// Classic PID gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Flight envelope limits the autopilot must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightLimits {
    pub max_climb_rate_fpm: f64,
    pub max_descent_rate_fpm: f64,
    pub max_accel_kts_per_s: f64,
    pub max_decel_kts_per_s: f64,
    pub max_speed_kts: f64,
    pub min_speed_kts: f64,
    pub max_turn_rate_deg_per_s: f64,
}

impl Default for FlightLimits {
    fn default() -> Self {
        Self {
            max_climb_rate_fpm: 2000.0,
            max_descent_rate_fpm: 1500.0,
            max_accel_kts_per_s: 25.0,
            max_decel_kts_per_s: 15.0,
            max_speed_kts: 350.0,
            min_speed_kts: 120.0,
            max_turn_rate_deg_per_s: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub heading: PidGains,
    pub altitude: PidGains,
    pub speed: PidGains,
    pub limits: FlightLimits,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            heading: PidGains {
                kp: 1.0,
                ki: 0.1,
                kd: 0.2,
            },
            altitude: PidGains {
                kp: 0.5,
                ki: 0.05,
                kd: 0.1,
            },
            speed: PidGains {
                kp: 0.3,
                ki: 0.02,
                kd: 0.05,
            },
            limits: FlightLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Where the simulated aircraft starts; seeds GPS and INS.
    pub initial_position: Position,
    pub autopilot: AutopilotConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_position: Position {
                latitude: 37.615,
                longitude: -122.389,
                altitude: 10_000.0,
            },
            autopilot: AutopilotConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load from a JSON file, falling back to defaults for absent fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Serialize for handing to a child process on its command line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_json_round_trip() {
        let config = SimConfig::default();
        let parsed = SimConfig::from_json(&config.to_json()).expect("parse");
        assert_eq!(parsed, config);
        assert_eq!(parsed.autopilot.heading.kp, 1.0);
        assert_eq!(parsed.autopilot.limits.max_speed_kts, 350.0);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let parsed = SimConfig::from_json(
            r#"{"autopilot": {"heading": {"kp": 2.5, "ki": 0.0, "kd": 0.0}}}"#,
        )
        .expect("parse");
        assert_eq!(parsed.autopilot.heading.kp, 2.5);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.autopilot.altitude.kp, 0.5);
        assert_eq!(parsed.autopilot.limits.max_turn_rate_deg_per_s, 3.0);
        assert_eq!(parsed.initial_position.altitude, 10_000.0);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        assert!(matches!(
            SimConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
