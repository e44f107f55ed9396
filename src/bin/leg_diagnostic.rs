// Leg diagnostic: READ-ONLY telemetry probe for the joint controllers
//
// Sends only query frames - no mode writes, no movement. Use this first
// to verify bus wiring and controller ids before running the gait.
//
// Usage: cargo run --bin leg_diagnostic -- [port]
// Example: cargo run --bin leg_diagnostic -- /dev/fdcanusb

use quadleg_runtime::config::DEFAULT_DEVICE;
use quadleg_runtime::motor::driver::JointIds;
use quadleg_runtime::motor::moteus::{self, TelemetrySample};
use quadleg_runtime::motor::{FdcanUsb, Transport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

    let ids = JointIds::default();
    let joints = [("abad", ids.abad), ("hip", ids.hip), ("knee", ids.knee)];

    println!("Leg diagnostic (read-only)");
    println!("Serial port: {}", port);
    println!("Joint ids: {:?}", joints);
    println!();

    println!("Step 1: Opening fdcanusb...");
    let mut bus = match FdcanUsb::open(&port) {
        Ok(bus) => {
            println!("  ok");
            bus
        }
        Err(e) => {
            println!("  failed: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the device path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check the adapter shows up as /dev/fdcanusb (udev rule)");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Querying joints...");
    let frame = moteus::query_frame();
    let mut all_found = true;
    for (name, id) in joints {
        print!("  {} (id {}): ", name, id);
        let sample = bus
            .send(id, &frame, true)
            .and_then(|_| bus.receive())
            .map_err(Into::into)
            .and_then(|reply| {
                moteus::parse_reply(&reply)
                    .map(|registers| TelemetrySample::from_registers(&registers))
                    .map_err(Box::<dyn std::error::Error>::from)
            });
        match sample {
            Ok(sample) => {
                println!(
                    "mode {:?}  pos {:>8.2} deg  vel {:>8.2} dps  torque {:>6.3} Nm  \
                     {:>5.1} V  {:>3} C  fault {}",
                    sample.mode_enum(),
                    sample.position_deg().unwrap_or(f64::NAN),
                    sample.velocity_dps().unwrap_or(f64::NAN),
                    sample.torque.unwrap_or(f64::NAN),
                    sample.voltage_volts().unwrap_or(f64::NAN),
                    sample.temperature.unwrap_or(0),
                    sample.fault.unwrap_or(0),
                );
            }
            Err(e) => {
                println!("no reply ({})", e);
                all_found = false;
            }
        }
    }
    println!();

    if all_found {
        println!("All joints responding. Safe to run the gait runtime.");
    } else {
        println!("WARNING: not all joints responded.");
        println!("  - Check controller power");
        println!("  - Verify controller ids match the config");
        println!("  - Check CAN termination and wiring");
    }

    Ok(())
}
