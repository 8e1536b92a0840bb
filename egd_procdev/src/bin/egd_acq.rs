//! # EGD acquisition client
//!
//! Spawns a driver host, checks what the device reports and acquires for a
//! fixed duration.
//!
//! # Checks
//!
//! 1. Capabilities are printed.
//! 2. Every channel answers FILL_CHINFO with a sane range.
//! 3. All channels are selected: EEG and sensors as `float` in array 0,
//!    triggers as `int32` in array 1.
//! 4. Samples arrive and the trigger channels keep their first value.
//!
//! # Usage
//!
//! ```bash
//! # Simulation driver, 5 s
//! egd_acq
//!
//! # From a config file, overriding the duration
//! egd_acq --config acq.toml --duration 1.5
//!
//! # Other device options
//! egd_acq --driver simulation --path 'fs|512|trigger|3' --numch 16
//! ```

use clap::Parser;
use egd_common::config::{AcqConfig, ConfigLoader, SharedConfig};
use egd_common::types::{Capabilities, ChannelGroup, DataType, SensorType};
use egd_procdev::acquisition::Acquisition;
use egd_procdev::error::DriverHostError;
use egd_procdev::supervisor::{DeviceProxy, ProxyOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// EGD acquisition client - drives one isolated device and checks its stream
#[derive(Parser, Debug)]
#[command(name = "egd_acq")]
#[command(author = "EGD")]
#[command(version)]
#[command(about = "Acquire from an isolated EEG driver and check the stream")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file (acq.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Driver host executable (default: egd_procdev next to this binary)
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Driver family
    #[arg(short, long)]
    driver: Option<String>,

    /// Device option string, `name|value|name|value`
    #[arg(short, long)]
    path: Option<String>,

    /// EEG channel count
    #[arg(short, long)]
    numch: Option<u32>,

    /// Acquisition duration in seconds
    #[arg(short = 't', long)]
    duration: Option<f64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("acquisition failed: {}", e);
        eprintln!("egd_acq: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;
    setup_tracing(&args, &config);

    let executable = config.driver.resolve_executable(&std::env::current_exe()?);
    let mut options = ProxyOptions::new(executable, config.driver.name.clone());
    options.path = config.driver.path.clone();
    options.numch = config.driver.numch;

    let acq = Acquisition::new();
    let mut proxy = DeviceProxy::spawn(&options, acq.sink())?;
    let caps = proxy.capabilities().clone();
    print_capabilities(&caps);

    check_channel_info(&mut proxy, &caps)?;

    let (groups, strides) = select_all(&caps);
    let table = acq.configure(&mut proxy, &groups, &strides)?;
    if table.len() != caps.total_channels() as usize {
        return Err(DriverHostError::CheckFailed(format!(
            "{} selected channels, expected {}",
            table.len(),
            caps.total_channels()
        ))
        .into());
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    proxy.start_acq()?;
    let stats = acquire(&acq, &caps, &strides, &config, &running);
    proxy.stop_acq()?;

    let last_error = proxy.last_error();
    proxy.close()?;

    let stats = stats?;
    println!(
        "acquired {} frames in {:.2} s ({:.1} Hz)",
        stats.frames,
        stats.elapsed.as_secs_f64(),
        stats.frames as f64 / stats.elapsed.as_secs_f64().max(f64::EPSILON)
    );
    if last_error != 0 {
        warn!(code = last_error, "device reported an error during acquisition");
    }
    if stats.frames == 0 {
        return Err(DriverHostError::CheckFailed("no samples received".into()).into());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AcqConfig, DriverHostError> {
    let mut config = match &args.config {
        Some(path) => AcqConfig::load(path)?,
        None => AcqConfig {
            shared: SharedConfig {
                log_level: Default::default(),
                service_name: "egd_acq".to_string(),
            },
            driver: Default::default(),
            acquisition: Default::default(),
        },
    };

    if let Some(exe) = &args.executable {
        config.driver.executable = Some(exe.clone());
    }
    if let Some(driver) = &args.driver {
        config.driver.name = driver.clone();
    }
    if let Some(path) = &args.path {
        config.driver.path = path.clone();
    }
    if let Some(numch) = args.numch {
        config.driver.numch = numch;
    }
    if let Some(duration) = args.duration {
        config.acquisition.duration_s = duration;
    }

    config.validate()?;
    Ok(config)
}

fn print_capabilities(caps: &Capabilities) {
    println!("device type:   {}", caps.device_type);
    println!("device id:     {}", caps.device_id);
    println!("sampling rate: {} Hz", caps.sampling_freq);
    for stype in SensorType::ALL {
        println!("{:<14} {}", format!("{}:", stype.name()), caps.nch(stype));
    }
}

fn check_channel_info(proxy: &mut DeviceProxy, caps: &Capabilities) -> Result<(), DriverHostError> {
    for stype in SensorType::ALL {
        for index in 0..caps.nch(stype) {
            let info = proxy.fill_chinfo(stype, index)?;
            if info.min.as_f64() >= info.max.as_f64() {
                return Err(DriverHostError::CheckFailed(format!(
                    "{} channel {index}: empty range [{}, {}]",
                    stype.name(),
                    info.min.as_f64(),
                    info.max.as_f64()
                )));
            }
            if info.isint != info.dtype.is_int() {
                return Err(DriverHostError::CheckFailed(format!(
                    "{} channel {index}: integer flag does not match {:?}",
                    stype.name(),
                    info.dtype
                )));
            }
            if index == 0 {
                info!(
                    sensor = stype.name(),
                    label = %info.label,
                    unit = %info.unit,
                    min = info.min.as_f64(),
                    max = info.max.as_f64(),
                    "channel info"
                );
            }
        }
    }
    Ok(())
}

/// EEG then sensors as `float` in array 0, triggers as `int32` in array 1.
fn select_all(caps: &Capabilities) -> (Vec<ChannelGroup>, Vec<usize>) {
    let neeg = caps.nch(SensorType::Eeg);
    let nsensor = caps.nch(SensorType::Sensor);
    let ntrig = caps.nch(SensorType::Trigger);
    let float_size = DataType::Float.size() as u32;
    let int_size = DataType::Int32.size() as u32;

    let groups = [
        (SensorType::Eeg, neeg, 0, 0, DataType::Float),
        (SensorType::Sensor, nsensor, 0, neeg * float_size, DataType::Float),
        (SensorType::Trigger, ntrig, 1, 0, DataType::Int32),
    ]
    .into_iter()
    .filter(|&(_, nch, ..)| nch > 0)
    .map(|(sensor_type, nch, iarray, arr_offset, datatype)| ChannelGroup {
        sensor_type,
        index: 0,
        nch,
        iarray,
        arr_offset,
        datatype,
    })
    .collect();

    let strides = vec![
        ((neeg + nsensor) * float_size) as usize,
        (ntrig * int_size) as usize,
    ];
    (groups, strides)
}

struct Stats {
    frames: u64,
    elapsed: Duration,
}

fn acquire(
    acq: &Acquisition,
    caps: &Capabilities,
    strides: &[usize],
    config: &AcqConfig,
    running: &AtomicBool,
) -> Result<Stats, DriverHostError> {
    let chunk = config.acquisition.chunk_frames as usize;
    let duration = Duration::from_secs_f64(config.acquisition.duration_s);
    let ntrig = caps.nch(SensorType::Trigger) as usize;

    let mut signals = vec![0u8; chunk * strides[0]];
    let mut triggers = vec![0u8; chunk * strides[1]];
    let mut first_trigger: Option<Vec<i32>> = None;
    let mut frames_total = 0u64;

    let start = Instant::now();
    while running.load(Ordering::SeqCst) && start.elapsed() < duration {
        let frames = acq.get_data(
            &mut [signals.as_mut_slice(), triggers.as_mut_slice()],
            chunk,
            Duration::from_secs(1),
        )?;
        if frames == 0 {
            warn!("no samples within 1 s");
            continue;
        }

        for frame in triggers[..frames * strides[1]].chunks_exact(strides[1].max(1)) {
            let values: Vec<i32> = frame
                .chunks_exact(4)
                .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            match &first_trigger {
                None => first_trigger = Some(values),
                Some(first) if *first != values => {
                    return Err(DriverHostError::CheckFailed(format!(
                        "trigger changed from {first:?} to {values:?} at frame {frames_total}"
                    )));
                }
                Some(_) => {}
            }
        }
        frames_total += frames as u64;
    }

    info!(frames = frames_total, triggers = ntrig, "acquisition finished");
    Ok(Stats {
        frames: frames_total,
        elapsed: start.elapsed(),
    })
}

/// Setup tracing subscriber; `--verbose` overrides the configured level.
fn setup_tracing(args: &Args, config: &AcqConfig) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        config
            .shared
            .log_level
            .as_directive()
            .parse()
            .unwrap_or(Level::INFO)
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
