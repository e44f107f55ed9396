// Tick loop driving one leg through its gait cycle
//
// Single-threaded by construction: scheduler, solver and codec run
// synchronously inside each tick; the only suspension point is the
// end-of-tick wait. Missed ticks are skipped, never replayed, so an
// overrun just shortens the next effective period.

use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::config::RobotConfig;
use crate::motor::bus::{FdcanUsb, Transport};
use crate::motor::driver::{DriveError, LegDriver};
use crate::motor::gait::GaitScheduler;
use crate::motor::kinematics::LegKinematics;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::motor::bus::TransportError),

    #[error(
        "velocity ceiling tripped: |{observed:.2}| rot/s exceeds {ceiling:.2} rot/s"
    )]
    VelocityCeiling { observed: f64, ceiling: f64 },
}

/// Discards frames; used by --dry-run to exercise the full
/// scheduler/solver/codec path without hardware.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _id: u8, _frame: &[u8], _expect_reply: bool) -> crate::motor::bus::Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> crate::motor::bus::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub async fn run(config: RobotConfig, device: &str, dry_run: bool) -> Result<(), RuntimeError> {
    if dry_run {
        info!("Dry run: frames go nowhere");
        let driver = build_driver(NullTransport, &config, false);
        drive_loop(driver, config).await
    } else {
        info!("Opening fdcanusb on {}", device);
        let bus = FdcanUsb::open(device)?;
        let driver = build_driver(bus, &config, config.query_telemetry);
        drive_loop(driver, config).await
    }
}

fn build_driver<T: Transport>(bus: T, config: &RobotConfig, query: bool) -> LegDriver<T> {
    LegDriver::new(
        bus,
        config.joints,
        LegKinematics::new(config.calibration.clone()),
        GaitScheduler::new(config.phase_offset),
        config.max_torque,
        query,
    )
}

async fn drive_loop<T: Transport>(
    mut driver: LegDriver<T>,
    config: RobotConfig,
) -> Result<(), RuntimeError> {
    driver.initialize()?;

    let mut tick = interval(Duration::from_nanos(1_000_000_000 / config.tick_hz));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {} Hz, period {:.2} s, stride {:.0} mm",
        config.tick_hz, config.gait.period, config.gait.stride
    );

    let begin = Instant::now();
    let mut reachability_faults: u64 = 0;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stop requested, de-energizing");
                driver.stop()?;
                return Ok(());
            }
        }

        let elapsed = begin.elapsed().as_secs_f64();
        let outcome = driver.tick(&config.gait, elapsed)?;

        if !outcome.reachable {
            reachability_faults += 1;
        }

        // Safety policy above the core: runaway telemetry velocity stops
        // the leg and ends the run
        let observed = driver.max_observed_velocity();
        if observed > config.velocity_ceiling {
            error!("Velocity ceiling exceeded, stopping");
            driver.stop()?;
            return Err(RuntimeError::VelocityCeiling {
                observed,
                ceiling: config.velocity_ceiling,
            });
        }

        ticks += 1;
        if ticks % (config.tick_hz * 5) == 0 {
            if reachability_faults > 0 {
                warn!(
                    "{} ticks, {} reachability faults, peak velocity {:.2} rot/s",
                    ticks, reachability_faults, observed
                );
            } else {
                info!("{} ticks, peak velocity {:.2} rot/s", ticks, observed);
            }
        }
    }
}
