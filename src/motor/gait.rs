// Phase-driven gait scheduler for one leg
//
// A four-state cycle (stance, lift, return, descend) driven purely by
// wall-clock phase. Emits a Cartesian foot target plus a (kp, kd) gain
// pair per tick; performs no I/O and keeps no mutable state beyond the
// per-leg phase offset, so live retuning of the config just works.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::kinematics::CartesianPoint;

/// Relative time shares of the four sub-phases. Re-normalized on every
/// evaluation; only the ratios matter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPhaseWeights {
    pub stance: f64,
    pub lift: f64,
    pub ret: f64,
    pub descend: f64,
}

impl Default for SubPhaseWeights {
    fn default() -> Self {
        Self {
            stance: 15.0,
            lift: 4.0,
            ret: 4.0,
            descend: 7.0,
        }
    }
}

impl SubPhaseWeights {
    pub fn total(&self) -> f64 {
        self.stance + self.lift + self.ret + self.descend
    }
}

/// Position / derivative gain scale pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainPair {
    pub kp: f64,
    pub kd: f64,
}

impl GainPair {
    fn lerp(a: GainPair, b: GainPair, t: f64) -> GainPair {
        GainPair {
            kp: a.kp + (b.kp - a.kp) * t,
            kd: a.kd + (b.kd - a.kd) * t,
        }
    }
}

/// Gait shape and timing for one leg. Long-lived, owned by the caller,
/// borrowed by the scheduler every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitConfig {
    /// Full cycle duration, seconds
    pub period: f64,
    pub weights: SubPhaseWeights,
    /// Foot height during stance, mm (z grows toward the ground)
    pub ground_z: f64,
    /// Apex rise above the ground height, mm
    pub lift_height: f64,
    /// Ground-contact travel per cycle, mm
    pub stride: f64,
    /// Walking heading in the horizontal plane, degrees
    pub direction_deg: f64,
    /// Resting lateral offset of the foot, mm
    pub lateral_offset: f64,
    /// Gains while load-bearing
    pub ground_gains: GainPair,
    /// Gains while airborne
    pub aerial_gains: GainPair,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            period: 1.0,
            weights: SubPhaseWeights::default(),
            ground_z: 250.0,
            lift_height: 70.0,
            stride: 80.0,
            direction_deg: 0.0,
            lateral_offset: 58.0,
            ground_gains: GainPair { kp: 1.0, kd: 0.8 },
            aerial_gains: GainPair { kp: 0.3, kd: 1.0 },
        }
    }
}

impl GaitConfig {
    fn apex_z(&self) -> f64 {
        self.ground_z - self.lift_height
    }

    /// Horizontal overshoot amplitude for the lift/descend half-sines.
    fn sin_scaler(&self) -> f64 {
        if self.stride >= 30.0 {
            0.76
        } else {
            self.stride / 45.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPhase {
    Stance,
    Lift,
    Return,
    Descend,
}

/// Scheduler output for one tick.
#[derive(Debug, Clone, Copy)]
pub struct FootTarget {
    pub point: CartesianPoint,
    pub kp_scale: f64,
    pub kd_scale: f64,
    pub sub_phase: SubPhase,
}

/// Per-leg scheduler. The phase offset staggers legs into a gait pattern
/// without any leg-to-leg coupling.
#[derive(Debug, Clone, Copy)]
pub struct GaitScheduler {
    phase_offset: f64,
}

impl GaitScheduler {
    pub fn new(phase_offset: f64) -> Self {
        Self { phase_offset }
    }

    /// Foot target and gains for the given elapsed wall-clock time.
    pub fn evaluate(&self, cfg: &GaitConfig, elapsed: f64) -> FootTarget {
        let phase = (elapsed + self.phase_offset).rem_euclid(cfg.period);

        let total = cfg.weights.total();
        let stance_dur = cfg.weights.stance / total * cfg.period;
        let lift_dur = cfg.weights.lift / total * cfg.period;
        let ret_dur = cfg.weights.ret / total * cfg.period;
        let descend_dur = cfg.weights.descend / total * cfg.period;

        let stance_end = stance_dur;
        let lift_end = stance_end + lift_dur;
        let ret_end = lift_end + ret_dur;

        let start_u = 0.5 * cfg.stride;
        let end_u = start_u - cfg.stride;
        let ground_z = cfg.ground_z;
        let apex_z = cfg.apex_z();
        let amp = cfg.sin_scaler() * (ground_z - apex_z);

        // Half-open interval tests with <= upper bounds: exactly one
        // sub-phase matches, boundary instants included.
        let (u, z, gains, sub_phase) = if phase <= stance_end {
            let p = progress(phase, stance_dur);
            (
                start_u + (end_u - start_u) * p,
                ground_z,
                cfg.ground_gains,
                SubPhase::Stance,
            )
        } else if phase <= lift_end {
            let p = progress(phase - stance_end, lift_dur);
            (
                end_u + amp * -(p * PI).sin(),
                ground_z + (apex_z - ground_z) * half_sine(p),
                GainPair::lerp(cfg.ground_gains, cfg.aerial_gains, p),
                SubPhase::Lift,
            )
        } else if phase <= ret_end {
            let p = progress(phase - lift_end, ret_dur);
            (
                end_u + (start_u - end_u) * p,
                apex_z,
                cfg.aerial_gains,
                SubPhase::Return,
            )
        } else {
            let p = progress(phase - ret_end, descend_dur);
            (
                start_u + amp * (p * PI).sin(),
                apex_z + (ground_z - apex_z) * half_sine(p),
                GainPair::lerp(cfg.aerial_gains, cfg.ground_gains, p),
                SubPhase::Descend,
            )
        };

        let dir = cfg.direction_deg.to_radians();
        FootTarget {
            point: CartesianPoint::new(
                dir.cos() * u,
                cfg.lateral_offset + dir.sin() * u,
                z,
            ),
            kp_scale: gains.kp,
            kd_scale: gains.kd,
            sub_phase,
        }
    }
}

fn progress(elapsed_in_phase: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        elapsed_in_phase / duration
    } else {
        0.0
    }
}

/// Smooth 0 -> 1 ramp: sin(pπ - π/2) / 2 + 0.5
fn half_sine(p: f64) -> f64 {
    (p * PI - PI / 2.0).sin() / 2.0 + 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries(cfg: &GaitConfig) -> [f64; 4] {
        let total = cfg.weights.total();
        let stance = cfg.weights.stance / total * cfg.period;
        let lift = stance + cfg.weights.lift / total * cfg.period;
        let ret = lift + cfg.weights.ret / total * cfg.period;
        [stance, lift, ret, cfg.period]
    }

    #[test]
    fn test_durations_sum_to_period() {
        for weights in [
            SubPhaseWeights::default(),
            SubPhaseWeights {
                stance: 1.0,
                lift: 1.0,
                ret: 1.0,
                descend: 1.0,
            },
            SubPhaseWeights {
                stance: 0.45,
                lift: 0.45,
                ret: 0.05,
                descend: 0.05,
            },
        ] {
            let cfg = GaitConfig {
                period: 1.5,
                weights,
                ..GaitConfig::default()
            };
            let total = cfg.weights.total();
            let durations: [f64; 4] = [
                weights.stance / total * cfg.period,
                weights.lift / total * cfg.period,
                weights.ret / total * cfg.period,
                weights.descend / total * cfg.period,
            ];
            assert!(durations.iter().all(|d| *d >= 0.0));
            let sum: f64 = durations.iter().sum();
            assert!((sum - cfg.period).abs() < 1e-12);
        }
    }

    #[test]
    fn test_targets_continuous_at_boundaries() {
        let cfg = GaitConfig::default();
        let sched = GaitScheduler::new(0.0);
        let eps = 1e-9;

        for b in boundaries(&cfg) {
            let before = sched.evaluate(&cfg, b - eps);
            let after = sched.evaluate(&cfg, (b + eps) % cfg.period);
            assert!(
                (before.point.x - after.point.x).abs() < 1e-5,
                "x jumps at boundary {}",
                b
            );
            assert!(
                (before.point.y - after.point.y).abs() < 1e-5,
                "y jumps at boundary {}",
                b
            );
            assert!(
                (before.point.z - after.point.z).abs() < 1e-5,
                "z jumps at boundary {}",
                b
            );
        }
    }

    #[test]
    fn test_gains_continuous_at_boundaries() {
        // Deliberately far-apart gain pairs to make any snap visible
        let cfg = GaitConfig {
            ground_gains: GainPair { kp: 1.0, kd: 0.2 },
            aerial_gains: GainPair { kp: 0.1, kd: 1.5 },
            ..GaitConfig::default()
        };
        let sched = GaitScheduler::new(0.0);
        let eps = 1e-9;

        for b in boundaries(&cfg) {
            let before = sched.evaluate(&cfg, b - eps);
            let after = sched.evaluate(&cfg, (b + eps) % cfg.period);
            assert!(
                (before.kp_scale - after.kp_scale).abs() < 1e-5,
                "kp jumps at boundary {}",
                b
            );
            assert!(
                (before.kd_scale - after.kd_scale).abs() < 1e-5,
                "kd jumps at boundary {}",
                b
            );
        }
    }

    #[test]
    fn test_boundary_instant_matches_exactly_one_sub_phase() {
        let cfg = GaitConfig::default();
        let sched = GaitScheduler::new(0.0);
        let [stance_end, lift_end, ret_end, _] = boundaries(&cfg);

        // <= upper bound: the boundary instant belongs to the earlier
        // sub-phase, the next representable instant to the later one
        assert_eq!(sched.evaluate(&cfg, stance_end).sub_phase, SubPhase::Stance);
        assert_eq!(sched.evaluate(&cfg, lift_end).sub_phase, SubPhase::Lift);
        assert_eq!(sched.evaluate(&cfg, ret_end).sub_phase, SubPhase::Return);
        assert_eq!(sched.evaluate(&cfg, 0.0).sub_phase, SubPhase::Stance);
        assert_eq!(
            sched.evaluate(&cfg, cfg.period - 1e-9).sub_phase,
            SubPhase::Descend
        );
    }

    #[test]
    fn test_stance_tracks_ground_line() {
        let cfg = GaitConfig::default();
        let sched = GaitScheduler::new(0.0);

        let start = sched.evaluate(&cfg, 0.0);
        assert_eq!(start.sub_phase, SubPhase::Stance);
        assert!((start.point.x - cfg.stride / 2.0).abs() < 1e-9);
        assert!((start.point.z - cfg.ground_z).abs() < 1e-9);
        assert!((start.point.y - cfg.lateral_offset).abs() < 1e-9);

        let [stance_end, ..] = boundaries(&cfg);
        let end = sched.evaluate(&cfg, stance_end);
        assert!((end.point.x + cfg.stride / 2.0).abs() < 1e-9);
        assert!((end.point.z - cfg.ground_z).abs() < 1e-9);
    }

    #[test]
    fn test_return_holds_apex_height() {
        let cfg = GaitConfig::default();
        let sched = GaitScheduler::new(0.0);
        let [_, lift_end, ret_end, _] = boundaries(&cfg);

        for t in [0.1, 0.5, 0.9] {
            let target = sched.evaluate(&cfg, lift_end + (ret_end - lift_end) * t);
            assert_eq!(target.sub_phase, SubPhase::Return);
            assert!((target.point.z - (cfg.ground_z - cfg.lift_height)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_direction_rotates_horizontal_motion() {
        let cfg = GaitConfig {
            direction_deg: 90.0,
            ..GaitConfig::default()
        };
        let sched = GaitScheduler::new(0.0);
        let target = sched.evaluate(&cfg, 0.0);
        // Heading 90°: all horizontal travel goes into y
        assert!(target.point.x.abs() < 1e-9);
        assert!((target.point.y - (cfg.lateral_offset + cfg.stride / 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_phase_offset_staggers_legs() {
        let cfg = GaitConfig::default();
        let front = GaitScheduler::new(0.0);
        let rear = GaitScheduler::new(cfg.period / 2.0);

        let a = front.evaluate(&cfg, 0.2);
        let b = rear.evaluate(&cfg, 0.2 + cfg.period / 2.0);
        // Half a period apart plus half a period of offset lands on the
        // same point of the cycle
        assert!((a.point.x - b.point.x).abs() < 1e-9);
        assert!((a.point.z - b.point.z).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_sub_phase_degenerates() {
        let cfg = GaitConfig {
            weights: SubPhaseWeights {
                stance: 1.0,
                lift: 0.0,
                ret: 1.0,
                descend: 1.0,
            },
            ..GaitConfig::default()
        };
        let sched = GaitScheduler::new(0.0);
        // Sweep the whole cycle; nothing may be NaN
        for i in 0..300 {
            let t = i as f64 * cfg.period / 300.0;
            let target = sched.evaluate(&cfg, t);
            assert!(target.point.x.is_finite());
            assert!(target.point.z.is_finite());
            assert!(target.kp_scale.is_finite());
        }
    }

    #[test]
    fn test_short_stride_scales_overshoot() {
        let cfg = GaitConfig {
            stride: 20.0,
            ..GaitConfig::default()
        };
        assert!((cfg.sin_scaler() - 20.0 / 45.0).abs() < 1e-12);
        let long = GaitConfig {
            stride: 80.0,
            ..GaitConfig::default()
        };
        assert!((long.sin_scaler() - 0.76).abs() < 1e-12);
    }
}
