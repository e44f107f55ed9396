// Per-tick leg orchestration
//
// Scheduler -> solver -> codec -> transport, in that order, once per
// tick. Unreachable targets never reach the bus: the driver re-sends the
// last good joint command and reports the fault to the caller.

use tracing::{debug, info, warn};

use super::bus::{Transport, TransportError};
use super::gait::{GaitConfig, GaitScheduler};
use super::kinematics::{CartesianPoint, JointAngles, LegKinematics};
use super::moteus::{
    self, MotorCommand, PositionCommand, TelemetrySample,
};

/// Bus node ids of the three joint controllers.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct JointIds {
    pub abad: u8,
    pub hip: u8,
    pub knee: u8,
}

impl Default for JointIds {
    fn default() -> Self {
        Self {
            abad: 3,
            hip: 2,
            knee: 1,
        }
    }
}

impl JointIds {
    fn as_array(&self) -> [u8; 3] {
        [self.abad, self.hip, self.knee]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("telemetry decode error: {0}")]
    Codec(#[from] moteus::CodecError),

    #[error("no valid command computed yet and target is unreachable")]
    NoFallback,
}

/// Per-joint telemetry gathered in one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegTelemetry {
    pub abad: Option<TelemetrySample>,
    pub hip: Option<TelemetrySample>,
    pub knee: Option<TelemetrySample>,
}

impl LegTelemetry {
    pub fn samples(&self) -> [Option<TelemetrySample>; 3] {
        [self.abad, self.hip, self.knee]
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    /// Joint command actually sent this tick
    pub sent: JointAngles,
    /// The scheduler's target for this tick
    pub target: CartesianPoint,
    /// False when the target was rejected and the previous command was
    /// re-sent instead
    pub reachable: bool,
    pub telemetry: LegTelemetry,
}

/// Drives one leg over a singly-owned transport.
pub struct LegDriver<T: Transport> {
    bus: T,
    ids: JointIds,
    kinematics: LegKinematics,
    scheduler: GaitScheduler,
    max_torque: f64,
    query_telemetry: bool,
    /// Last successfully solved command, held across unreachable ticks
    last_good: Option<JointAngles>,
    /// Peak |velocity| seen in telemetry, device rotations per second
    max_observed_velocity: f64,
    stopped: bool,
}

impl<T: Transport> LegDriver<T> {
    pub fn new(
        bus: T,
        ids: JointIds,
        kinematics: LegKinematics,
        scheduler: GaitScheduler,
        max_torque: f64,
        query_telemetry: bool,
    ) -> Self {
        Self {
            bus,
            ids,
            kinematics,
            scheduler,
            max_torque,
            query_telemetry,
            last_good: None,
            max_observed_velocity: 0.0,
            stopped: false,
        }
    }

    /// Clear any latched faults before commanding. Fault states latch on
    /// the nodes and require a stop to move again.
    pub fn initialize(&mut self) -> Result<(), DriveError> {
        info!("Clearing faults on joints {:?}", self.ids.as_array());
        self.stop()?;
        self.stopped = false;
        Ok(())
    }

    /// Run one control tick at the given elapsed wall-clock time.
    pub fn tick(&mut self, cfg: &GaitConfig, elapsed: f64) -> Result<TickOutcome, DriveError> {
        let target = self.scheduler.evaluate(cfg, elapsed);

        // Cheap gate first; never commit an unreachable or NaN target
        let (angles, reachable) = if self.kinematics.inverse_reachable(&target.point) {
            match self.kinematics.inverse(&target.point) {
                Ok(angles) => {
                    self.last_good = Some(angles);
                    (angles, true)
                }
                Err(e) => {
                    debug!("solve failed after gate passed: {}", e);
                    (self.last_good.ok_or(DriveError::NoFallback)?, false)
                }
            }
        } else {
            warn!(
                "unreachable target ({:.1}, {:.1}, {:.1}), holding previous command",
                target.point.x, target.point.y, target.point.z
            );
            (self.last_good.ok_or(DriveError::NoFallback)?, false)
        };

        let telemetry = self.send_position(&angles, target.kp_scale, target.kd_scale)?;
        self.stopped = false;

        Ok(TickOutcome {
            sent: angles,
            target: target.point,
            reachable,
            telemetry,
        })
    }

    fn send_position(
        &mut self,
        angles: &JointAngles,
        kp_scale: f64,
        kd_scale: f64,
    ) -> Result<LegTelemetry, DriveError> {
        let mut telemetry = LegTelemetry::default();
        let joints = [
            (self.ids.abad, angles.abad),
            (self.ids.hip, angles.hip),
            (self.ids.knee, angles.knee),
        ];

        for (slot, (id, position)) in joints.into_iter().enumerate() {
            let command = MotorCommand::Position(PositionCommand {
                position,
                velocity: 0.0,
                ff_torque: 0.0,
                kp_scale,
                kd_scale,
                max_torque: self.max_torque,
            });
            let frame = command.encode(self.query_telemetry);
            self.bus.send(id, &frame, self.query_telemetry)?;

            if self.query_telemetry {
                let reply = self.bus.receive()?;
                let sample = TelemetrySample::from_registers(&moteus::parse_reply(&reply)?);
                if let Some(v) = sample.velocity {
                    if v.abs() > self.max_observed_velocity {
                        self.max_observed_velocity = v.abs();
                    }
                }
                match slot {
                    0 => telemetry.abad = Some(sample),
                    1 => telemetry.hip = Some(sample),
                    _ => telemetry.knee = Some(sample),
                }
            }
        }

        Ok(telemetry)
    }

    /// De-energize all three joints.
    pub fn stop(&mut self) -> Result<(), DriveError> {
        info!("Stopping joints {:?}", self.ids.as_array());
        let frame = MotorCommand::Stop.encode(false);
        for id in self.ids.as_array() {
            self.bus.send(id, &frame, false)?;
        }
        self.stopped = true;
        Ok(())
    }

    /// Peak telemetry velocity seen so far, rotations per second. The
    /// velocity-ceiling policy lives in the caller; this is just the
    /// bookkeeping for it.
    pub fn max_observed_velocity(&self) -> f64 {
        self.max_observed_velocity
    }

    pub fn ids(&self) -> JointIds {
        self.ids
    }

    pub fn kinematics(&self) -> &LegKinematics {
        &self.kinematics
    }
}

impl<T: Transport> Drop for LegDriver<T> {
    fn drop(&mut self) {
        // Leave the actuators de-energized, not chasing a stale target
        if !self.stopped {
            if let Err(e) = self.stop() {
                warn!("Failed to stop joints on drop: {}", e);
            }
        }
    }
}
