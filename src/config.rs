// Runtime defaults and the on-disk configuration shape

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::motor::driver::JointIds;
use crate::motor::gait::GaitConfig;
use crate::motor::kinematics::LegCalibration;

/// Control loop frequency
pub const DEFAULT_TICK_HZ: u64 = 300;

/// Serial device of the fdcanusb adapter
pub const DEFAULT_DEVICE: &str = "/dev/fdcanusb";

/// Telemetry velocity above this trips the safety stop, device
/// rotations per second
pub const DEFAULT_VELOCITY_CEILING: f64 = 3.0;

/// Torque ceiling embedded in every position command, Nm
pub const DEFAULT_MAX_TORQUE: f64 = 0.4;

/// Everything the runtime needs for one leg. Loadable from JSON; the
/// defaults carry the reference machine's numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub tick_hz: u64,
    pub joints: JointIds,
    pub calibration: LegCalibration,
    pub gait: GaitConfig,
    /// Stagger of this leg within the gait cycle, seconds
    pub phase_offset: f64,
    pub max_torque: f64,
    pub velocity_ceiling: f64,
    /// Poll telemetry with every command
    pub query_telemetry: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            joints: JointIds::default(),
            calibration: LegCalibration::default(),
            gait: GaitConfig::default(),
            phase_offset: 0.0,
            max_torque: DEFAULT_MAX_TORQUE,
            velocity_ceiling: DEFAULT_VELOCITY_CEILING,
            query_telemetry: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RobotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_json() {
        let cfg = RobotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RobotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tick_hz, cfg.tick_hz);
        assert_eq!(back.gait.period, cfg.gait.period);
        assert_eq!(back.calibration.femur, cfg.calibration.femur);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: RobotConfig =
            serde_json::from_str(r#"{"tick_hz": 100, "gait": {"stride": 40.0}}"#).unwrap();
        assert_eq!(cfg.tick_hz, 100);
        assert_eq!(cfg.gait.stride, 40.0);
        // Untouched fields keep their defaults
        assert_eq!(cfg.gait.period, GaitConfig::default().period);
        assert_eq!(cfg.max_torque, DEFAULT_MAX_TORQUE);
    }
}
