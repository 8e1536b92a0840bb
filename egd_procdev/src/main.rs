//! # EGD driver host
//!
//! Hosts one device driver in an isolated process. Spawned by
//! `DeviceProxy`; not meant to be started by hand.
//!
//! # Channels
//!
//! - stdin: commands from the supervisor
//! - stdout: replies, capabilities and errors
//! - fd 3: raw sample frames
//! - stderr: logs
//!
//! # Usage
//!
//! ```bash
//! egd_procdev --driver simulation 'fs|512|trigger|3' 32 3>samples.bin
//! ```

use clap::Parser;
use egd_common::error::DeviceError;
use egd_procdev::device::OpenOptions;
use egd_procdev::driver_registry::DriverRegistry;
use egd_procdev::error::DriverHostError;
use egd_procdev::link::DeviceLink;
use egd_procdev::runtime::DriverRuntime;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// EGD driver host - runs one acquisition device driver in isolation
#[derive(Parser, Debug)]
#[command(name = "egd_procdev")]
#[command(author = "EGD")]
#[command(version)]
#[command(about = "Isolated driver host for EEG acquisition devices")]
#[command(long_about = None)]
struct Args {
    /// Driver family
    #[arg(short, long, default_value = "simulation")]
    driver: String,

    /// Device option string, `name|value|name|value`
    #[arg(default_value = "")]
    path: String,

    /// Requested EEG channel count (0 = driver default)
    #[arg(default_value_t = 0)]
    numch: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("driver host failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!(
        driver = %args.driver,
        pid = std::process::id(),
        "EGD driver host v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let link = DeviceLink::from_stdio()?;
    let registry = DriverRegistry::with_builtin();
    let options = OpenOptions {
        path: args.path,
        numch: args.numch,
    };

    let mut runtime = DriverRuntime::open(std::io::stdin().lock(), link, |link| {
        registry
            .open_device(&args.driver, &options, link)
            .map_err(|err| match err {
                DriverHostError::Device(err) => err,
                other => {
                    error!("{other}");
                    DeviceError::Device(other.code())
                }
            })
    });

    let outcome = runtime.run();
    info!(?outcome, "driver host exiting");
    Ok(outcome.is_success())
}

/// Setup tracing subscriber based on CLI arguments. Logs go to stderr;
/// stdout carries the control channel.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
