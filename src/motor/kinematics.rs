// Closed-form leg kinematics for one 3-DOF leg (abad, hip, knee)
//
// Joint values on the wire are device rotations (post gear-reduction
// fractions of a revolution); all geometry is solved in radians and
// millimeters, with the hip joint as the origin.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Nudge applied to exactly-zero coordinates so the arctangents stay away
/// from their singularities.
const SINGULARITY_EPS: f64 = 1e-7;

/// Per-joint rotation targets in device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAngles {
    pub abad: f64,
    pub hip: f64,
    pub knee: f64,
}

/// Foot position in millimeters, hip-frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartesianPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CartesianPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Link lengths, abduction offsets and homing calibration for one leg.
///
/// Home angles map the actuator's raw zero to mechanical degrees; the CAD
/// home angles are where the assembly jig places each joint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegCalibration {
    /// Femur length, mm
    pub femur: f64,
    /// Tibia length, mm
    pub tibia: f64,
    /// Abduction axis offset along Y, mm
    pub abad_offset_y: f64,
    /// Abduction axis offset along Z, mm
    pub abad_offset_z: f64,
    /// Gear reduction between actuator and joint
    pub reduction: f64,
    /// Homing position of each joint in mechanical degrees
    pub hip_home_deg: f64,
    pub knee_home_deg: f64,
    pub abad_home_deg: f64,
    /// Symmetric width of each joint's allowed window, degrees
    pub joint_range_deg: f64,
    /// Allowed band for hip minus knee, degrees (anti-self-collision)
    pub hip_knee_min_deg: f64,
    pub hip_knee_max_deg: f64,
}

/// Joint positions in the CAD reference pose, degrees.
const HIP_CAD_DEG: f64 = 42.5;
const KNEE_CAD_DEG: f64 = 110.0;
const ABAD_CAD_DEG: f64 = 0.0;

impl Default for LegCalibration {
    fn default() -> Self {
        Self {
            femur: 160.0,
            tibia: 150.0,
            abad_offset_y: 58.0,
            abad_offset_z: 20.0,
            reduction: 6.0,
            // From the homing run: hip 0.3688, knee 0.478, abad -1.6408
            // actuator rotations against the calibration fixture.
            hip_home_deg: 0.3688 * 60.0 - 78.0,
            knee_home_deg: 0.478 * 60.0 + 11.0,
            abad_home_deg: -1.6408 * 60.0 + 265.0,
            joint_range_deg: 130.0,
            hip_knee_min_deg: 42.0,
            hip_knee_max_deg: 150.0,
        }
    }
}

/// Why a Cartesian target was rejected. Expected, recoverable conditions;
/// the driver holds the previous valid command on either.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq)]
pub enum ReachabilityError {
    #[error("target ({x:.1}, {y:.1}, {z:.1}) mm is outside the reachable workspace")]
    Unreachable { x: f64, y: f64, z: f64 },

    #[error(
        "solution violates joint limits (abad {abad_deg:.1}°, hip {hip_deg:.1}°, knee {knee_deg:.1}°)"
    )]
    JointLimits {
        abad_deg: f64,
        hip_deg: f64,
        knee_deg: f64,
    },
}

/// Geometric solver for one leg.
pub struct LegKinematics {
    cal: LegCalibration,
    hip_offset_deg: f64,
    knee_offset_deg: f64,
    abad_offset_deg: f64,
}

impl LegKinematics {
    pub fn new(cal: LegCalibration) -> Self {
        let hip_offset_deg = 180.0 - (cal.hip_home_deg + HIP_CAD_DEG);
        let knee_offset_deg = 180.0 - (cal.knee_home_deg + KNEE_CAD_DEG);
        let abad_offset_deg = 180.0 - (cal.abad_home_deg + ABAD_CAD_DEG);
        Self {
            cal,
            hip_offset_deg,
            knee_offset_deg,
            abad_offset_deg,
        }
    }

    pub fn calibration(&self) -> &LegCalibration {
        &self.cal
    }

    fn rot_to_rad(&self, rot: f64, offset_deg: f64) -> f64 {
        (rot * 360.0 / self.cal.reduction + offset_deg).to_radians()
    }

    fn rad_to_rot(&self, rad: f64, offset_deg: f64) -> f64 {
        (rad.to_degrees() - offset_deg) / 360.0 * self.cal.reduction
    }

    /// Foot position for a set of joint rotations. Total, no failure mode.
    pub fn forward(&self, angles: &JointAngles) -> CartesianPoint {
        let hip = self.rot_to_rad(angles.hip, self.hip_offset_deg);
        let knee = self.rot_to_rad(angles.knee, self.knee_offset_deg);
        let abad = self.rot_to_rad(angles.abad, self.abad_offset_deg);

        // Planar two-link contribution in the sagittal plane
        let x = knee.cos() * self.cal.tibia + hip.cos() * self.cal.femur;
        let s = knee.sin() * self.cal.tibia + hip.sin() * self.cal.femur;

        // Rotate the planar drop out of the sagittal plane by the abad
        // angle, around the offset abduction axis
        let (sin_a, cos_a) = abad.sin_cos();
        let z = self.cal.abad_offset_z * cos_a + self.cal.abad_offset_y * sin_a + s * cos_a;
        let y = self.cal.abad_offset_y * cos_a - self.cal.abad_offset_z * sin_a - s * sin_a;

        CartesianPoint { x, y, z }
    }

    /// Cheap gate used before committing a command.
    pub fn inverse_reachable(&self, foot: &CartesianPoint) -> bool {
        self.inverse(foot).is_ok()
    }

    /// Solve joint rotations for a foot target.
    ///
    /// Abad first from the (y, z) projection, then two-link IK in the
    /// abad-compensated sagittal plane via the law of cosines, with a
    /// fixed +180° branch rule on the knee so only one elbow
    /// configuration is ever produced.
    pub fn inverse(&self, foot: &CartesianPoint) -> Result<JointAngles, ReachabilityError> {
        let unreachable = ReachabilityError::Unreachable {
            x: foot.x,
            y: foot.y,
            z: foot.z,
        };

        let x = if foot.x == 0.0 { SINGULARITY_EPS } else { foot.x };
        let y = if foot.y == 0.0 { SINGULARITY_EPS } else { foot.y };
        let z = foot.z;

        let abad_y = self.cal.abad_offset_y;
        let abad_z = self.cal.abad_offset_z;

        // Abad-compensated planar drop
        let zp_sq = y * y + z * z - abad_y * abad_y;
        if zp_sq < 0.0 {
            return Err(unreachable);
        }
        let zp = zp_sq.sqrt() - abad_z;
        let abad_rad = -PI / 2.0 + z.atan2(y) + abad_y.atan2(zp + abad_z);

        // Two-link IK in the compensated plane
        let l = (x * x + zp * zp).sqrt();
        let cos_knee_sep =
            (self.cal.femur * self.cal.femur + l * l - self.cal.tibia * self.cal.tibia)
                / (2.0 * self.cal.femur * l);
        if !(-1.0..=1.0).contains(&cos_knee_sep) {
            return Err(unreachable);
        }
        let delta = cos_knee_sep.acos();
        let mut gamma = zp.atan2(x);
        if gamma < 0.0 {
            gamma += PI;
        }
        let hip_rad = delta + gamma;

        let mut knee_rad = ((zp - self.cal.femur * hip_rad.sin())
            / (x - self.cal.femur * hip_rad.cos()))
        .atan();
        if knee_rad < 0.0 {
            knee_rad += PI;
        }

        self.check_limits(
            abad_rad.to_degrees(),
            hip_rad.to_degrees(),
            knee_rad.to_degrees(),
        )?;

        Ok(JointAngles {
            abad: self.rad_to_rot(abad_rad, self.abad_offset_deg),
            hip: self.rad_to_rot(hip_rad, self.hip_offset_deg),
            knee: self.rad_to_rot(knee_rad, self.knee_offset_deg),
        })
    }

    /// Mechanical windows around each joint's CAD pose plus the hip-knee
    /// separation band.
    fn check_limits(
        &self,
        abad_deg: f64,
        hip_deg: f64,
        knee_deg: f64,
    ) -> Result<(), ReachabilityError> {
        let half = self.cal.joint_range_deg / 2.0;
        let separation = hip_deg - knee_deg;

        let hip_center = 180.0 - HIP_CAD_DEG;
        let knee_center = 180.0 - KNEE_CAD_DEG;
        let abad_center = ABAD_CAD_DEG;

        let ok = separation > self.cal.hip_knee_min_deg
            && separation < self.cal.hip_knee_max_deg
            && hip_deg > hip_center - half
            && hip_deg < hip_center + half
            && knee_deg > knee_center - half
            && knee_deg < knee_center + half
            && abad_deg > abad_center - half
            && abad_deg < abad_center + half;

        if ok {
            Ok(())
        } else {
            Err(ReachabilityError::JointLimits {
                abad_deg,
                hip_deg,
                knee_deg,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> LegKinematics {
        LegKinematics::new(LegCalibration::default())
    }

    fn assert_close(a: f64, b: f64, tol: f64, what: &str) {
        assert!(
            (a - b).abs() < tol,
            "{}: {} vs {} (diff {})",
            what,
            a,
            b,
            (a - b).abs()
        );
    }

    #[test]
    fn test_standing_target_solves_in_limits() {
        let kin = solver();
        let angles = kin
            .inverse(&CartesianPoint::new(0.0, 58.0, 220.0))
            .expect("standing pose must be reachable");
        assert!(angles.abad.is_finite());
        assert!(angles.hip.is_finite());
        assert!(angles.knee.is_finite());
        // Directly above the abad offset the abduction joint is at rest
        let abad_offset_deg = 180.0 - (-1.6408 * 60.0 + 265.0);
        let abad_deg = angles.abad * 360.0 / 6.0 + abad_offset_deg;
        assert_close(abad_deg, 0.0, 1e-3, "abad mechanical degrees");
    }

    #[test]
    fn test_far_target_unreachable() {
        let kin = solver();
        // Planar distance 1000 mm, far beyond femur + tibia = 310 mm
        let err = kin
            .inverse(&CartesianPoint::new(1000.0, 58.0, 20.0))
            .unwrap_err();
        assert!(matches!(err, ReachabilityError::Unreachable { .. }));
    }

    #[test]
    fn test_inside_annulus_unreachable() {
        let kin = solver();
        // Planar distance below |femur - tibia| = 10 mm folds the leg
        // tighter than the links allow
        let err = kin
            .inverse(&CartesianPoint::new(2.0, 58.0, 25.0))
            .unwrap_err();
        assert!(matches!(err, ReachabilityError::Unreachable { .. }));
    }

    #[test]
    fn test_lateral_cylinder_unreachable() {
        let kin = solver();
        // y² + z² below the abad offset radius has no abad solution
        let err = kin
            .inverse(&CartesianPoint::new(100.0, 10.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, ReachabilityError::Unreachable { .. }));
    }

    #[test]
    fn test_forward_inverse_round_trip() {
        let kin = solver();
        let targets = [
            CartesianPoint::new(0.0, 58.0, 220.0),
            CartesianPoint::new(40.0, 58.0, 250.0),
            CartesianPoint::new(-80.0, 58.0, 230.0),
            CartesianPoint::new(20.0, 80.0, 240.0),
            CartesianPoint::new(-30.0, 30.0, 210.0),
        ];
        for target in targets {
            let angles = kin
                .inverse(&target)
                .unwrap_or_else(|e| panic!("{:?} should be reachable: {}", target, e));
            let foot = kin.forward(&angles);
            assert_close(foot.x, target.x, 1e-4, "x");
            assert_close(foot.y, target.y, 1e-4, "y");
            assert_close(foot.z, target.z, 1e-4, "z");

            // And back through the solver to the same rotations
            let again = kin.inverse(&foot).unwrap();
            assert_close(again.abad, angles.abad, 1e-6, "abad rot");
            assert_close(again.hip, angles.hip, 1e-6, "hip rot");
            assert_close(again.knee, angles.knee, 1e-6, "knee rot");
        }
    }

    #[test]
    fn test_zero_coordinates_do_not_produce_nan() {
        let kin = solver();
        // x = 0 and y = 0 both sit on arctangent singularities; the
        // epsilon nudge must keep the solve finite either way
        match kin.inverse(&CartesianPoint::new(0.0, 0.0, 240.0)) {
            Ok(angles) => {
                assert!(angles.abad.is_finite());
                assert!(angles.hip.is_finite());
                assert!(angles.knee.is_finite());
            }
            Err(e) => assert!(matches!(
                e,
                ReachabilityError::Unreachable { .. } | ReachabilityError::JointLimits { .. }
            )),
        }
    }

    #[test]
    fn test_limit_rejection_is_not_unreachable() {
        let cal = LegCalibration {
            // Squeeze the windows until an otherwise normal pose fails
            joint_range_deg: 10.0,
            ..LegCalibration::default()
        };
        let kin = LegKinematics::new(cal);
        let err = kin
            .inverse(&CartesianPoint::new(100.0, 58.0, 150.0))
            .unwrap_err();
        assert!(matches!(err, ReachabilityError::JointLimits { .. }));
    }

    #[test]
    fn test_reachable_gate_agrees_with_inverse() {
        let kin = solver();
        let good = CartesianPoint::new(0.0, 58.0, 220.0);
        let bad = CartesianPoint::new(1000.0, 58.0, 20.0);
        assert!(kin.inverse_reachable(&good));
        assert!(!kin.inverse_reachable(&bad));
    }
}
