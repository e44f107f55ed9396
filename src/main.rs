use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use quadleg_runtime::config::{DEFAULT_DEVICE, RobotConfig};

/// Real-time gait runtime for one quadruped leg over fdcanusb
#[derive(Parser)]
struct Args {
    /// Serial device of the fdcanusb adapter
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// JSON config overriding the built-in calibration and gait
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the full control path without touching hardware
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match RobotConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => RobotConfig::default(),
    };

    if let Err(e) = quadleg_runtime::runtime::run(config, &args.device, args.dry_run).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
