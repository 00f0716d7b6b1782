//! CH2O sensor bench acquisition.
//!
//! Samples the SMU, the CH2O sensor and the mass-flow controllers until Ctrl-C, driving
//! the controllers through an optional setpoint schedule, then leaves the bench safe.
//!
//! ```text
//! ch2o-bench --config bench.yaml sequence.csv
//! ```

use std::{
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use ch2o_bench::{
    acquisition::{Acquisition, Sink},
    config::Config,
    io::{StdIo, TcpConnector},
    mfc::FlowController,
    record::{CsvSink, output_file_name},
    schedule::Schedule,
    sensor::SensorReader,
    smu::SourceMeter,
};
use clap::Parser;
use inquire::Select;
use log::{error, info, warn};
use serialport::SerialPort;

type SerialIo = StdIo<Box<dyn SerialPort>>;

/// Set by the Ctrl-C handler, polled between ticks.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

const NO_PORT: &str = "(not connected)";

/// Acquire CH2O sensor, SMU and mass-flow readings while running a setpoint schedule
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Schedule file: `offset_s, target_A, target_B, ...` per line
    schedule: Option<PathBuf>,

    /// Configuration file, created with defaults if missing
    #[clap(short, long, default_value = "ch2o-bench.yaml")]
    config: PathBuf,

    /// Pick the MFC and SMU serial ports interactively when the configuration names none
    #[clap(long)]
    select_ports: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    // Everything that can fail on bad input is checked before any actuator is touched.
    let schedule = match &args.schedule {
        Some(path) => Schedule::from_file(path)
            .with_context(|| format!("Failed to load schedule from {:?}", path))?,
        None => Schedule::default(),
    };
    info!("Loaded {} schedule step(s)", schedule.len());

    if args.select_ports {
        if config.flow.port.is_none() {
            config.flow.port = select_port("Select the mass-flow controller port:")?;
        }
        if config.smu.port.is_none() {
            config.smu.port = select_port("Select the SMU port:")?;
        }
    }

    let flow = config
        .flow
        .port
        .as_deref()
        .and_then(|port| open_serial("MFC", port, config.flow.baud_rate, config.flow.timeout_ms))
        .map(|port| FlowController::from_config(port, &config.flow));

    let smu = config
        .smu
        .port
        .as_deref()
        .and_then(|port| open_serial("SMU", port, config.smu.baud_rate, config.smu.timeout_ms))
        .and_then(|port| {
            let mut smu = SourceMeter::new(port);
            match smu.initialize(config.smu.compliance_current_a, config.smu.source_voltage_v) {
                Ok(()) => Some(smu),
                Err(err) => {
                    warn!("Could not initialise SMU, continuing without it: {err}");
                    None
                }
            }
        });

    let connector = TcpConnector::new(
        config.sensor.host.clone(),
        config.sensor.port,
        config.sensor.timeout(),
    );
    let mut sensor = SensorReader::new(connector, config.sensor.clone());
    sensor.connect();

    let started = chrono::Local::now().naive_local();
    let file_name = output_file_name(&config.output.file_prefix, &started);
    let (path, file_sink) = CsvSink::append_to(&config.output.directory, &file_name)
        .with_context(|| format!("Failed to open output file {file_name}"))?;
    info!("Writing samples to {:?}", path);

    let mut acquisition: Acquisition<TcpConnector, SerialIo, SerialIo> =
        Acquisition::new(sensor, flow, smu, schedule)
            .with_sink(boxed(std::io::stdout()))
            .with_sink(boxed(file_sink.into_inner()))
            .with_tick_interval(Duration::from_millis(config.output.tick_interval_ms));

    spawn_interrupt_handler();

    let result = acquisition.run(&SHUTDOWN_REQUESTED);
    info!("Shutting down");
    acquisition.shutdown();
    result.with_context(|| format!("Failed to write samples to {:?}", path))
}

fn boxed<W: Write + 'static>(writer: W) -> Sink {
    let writer: Box<dyn Write> = Box::new(writer);
    CsvSink::new(writer)
}

/// Open a serial port, or log why not and carry on without the instrument.
fn open_serial(instrument: &str, port: &str, baud_rate: u32, timeout_ms: u64) -> Option<SerialIo> {
    match serialport::new(port, baud_rate)
        .timeout(Duration::from_millis(timeout_ms))
        .open()
    {
        Ok(serial) => {
            info!("Connected to {instrument} on {port}");
            Some(StdIo(serial))
        }
        Err(err) => {
            warn!("Could not connect to {instrument} on {port}: {err}");
            None
        }
    }
}

fn select_port(prompt: &str) -> Result<Option<String>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    let mut choices: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    choices.push(NO_PORT.to_string());

    let choice = Select::new(prompt, choices)
        .prompt()
        .context("Failed to select port")?;
    Ok((choice != NO_PORT).then_some(choice))
}

/// Wait for Ctrl-C on a side thread and raise [SHUTDOWN_REQUESTED].
fn spawn_interrupt_handler() {
    thread::spawn(|| {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("Could not install Ctrl-C handler: {err}");
                return;
            }
        };
        match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                info!("Interrupt received, stopping after the current tick");
                SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
            }
            Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
        }
    });
}
