// Motor control module for one quadruped leg
//
// Provides:
// - Moteus register protocol codec (command frames, telemetry replies)
// - fdcanusb serial transport
// - Closed-form leg kinematics (forward / inverse)
// - Phase-driven gait scheduler
// - High-level per-leg driver

pub mod bus;
pub mod driver;
pub mod gait;
pub mod kinematics;
pub mod moteus;

pub use bus::{FdcanUsb, Transport, TransportError};
pub use driver::{JointIds, LegDriver, LegTelemetry, TickOutcome};
pub use gait::{FootTarget, GaitConfig, GaitScheduler, SubPhase};
pub use kinematics::{CartesianPoint, JointAngles, LegCalibration, LegKinematics};
pub use moteus::{MotorCommand, TelemetrySample};
