//! pmsense - particulate-matter sampler, CSV logger, and HTTP API.
//!
//! Run with: `cargo run -p pmsense-service -- --simulate`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::UtcOffset;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pmsense_core::mock::{MockModernFactory, MockModernSensor, MockTransport};
use pmsense_core::{
    DriverSet, EventDispatcher, Sampler, SerialPortTransport, StaticPorts, SystemPorts,
    local_offset, probe, probe_candidates,
};
use pmsense_service::{AppState, Backend, Collector, Config, ConnectionLog, api};
use pmsense_store::{CsvLog, DataStore};

/// pmsense - particulate-matter sampler, CSV logger, and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "pmsense")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, or "auto" to scan (overrides config).
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Log directory (overrides config).
    #[arg(short, long, global = true)]
    log_dir: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Disable the HTTP server (sample and log only).
    #[arg(long, global = true)]
    no_server: bool,

    /// Use a simulated sensor instead of real serial ports.
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample, log, and serve the API in the foreground (default behavior).
    Run,

    /// List candidate serial ports.
    Ports,

    /// Probe for a sensor once and exit.
    Check,
}

fn main() -> anyhow::Result<()> {
    // Read before the runtime spawns worker threads.
    let offset = local_offset();
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(args, offset))
}

async fn dispatch(args: Args, offset: UtcOffset) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let backend = backend(args.simulate);

    match args.command {
        Some(Command::Ports) => list_ports(&backend).await,
        Some(Command::Check) => check(&backend, &config).await,
        Some(Command::Run) | None => run_service(config, backend, offset).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let mut filter = EnvFilter::from_default_env();
    for target in ["pmsense", "pmsense_service", "pmsense_core", "pmsense_store"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    if verbose {
        filter = filter.add_directive("tower_http=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };

    // Override config with CLI args
    if let Some(port) = &args.port {
        config.sensor.port = Some(port.clone());
    }
    if let Some(dir) = &args.log_dir {
        config.logging.directory = dir.clone();
    }
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if args.no_server {
        config.server.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn backend(simulate: bool) -> Backend {
    if simulate {
        info!("Using simulated sensor on SIM0");
        let factory = MockModernFactory::with_sensor(MockModernSensor::simulated());
        Backend {
            transport: Arc::new(MockTransport::new()),
            ports: Arc::new(StaticPorts::new(["SIM0"])),
            drivers: DriverSet::new().with_modern(Arc::new(factory)),
        }
    } else {
        // No vendor driver is bundled; the sampler reports DriverUnavailable
        // until a driver backend is registered.
        Backend {
            transport: Arc::new(SerialPortTransport::new()),
            ports: Arc::new(SystemPorts::new()),
            drivers: DriverSet::new(),
        }
    }
}

async fn list_ports(backend: &Backend) -> anyhow::Result<()> {
    let ports = backend.ports.list_ports().await;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

async fn check(backend: &Backend, config: &Config) -> anyhow::Result<()> {
    let target = config.sensor.target_port();
    let candidates = probe_candidates(backend.ports.as_ref(), target.as_deref()).await;
    let report = probe(backend.transport.as_ref(), &backend.drivers, &candidates)
        .await
        .with_context(|| format!("no sensor found on {:?}", candidates))?;

    println!("Sensor found on {} ({} driver)", report.port, report.driver);
    match (&report.serial_number, &report.values) {
        (Some(serial), _) => println!("Serial number: {}", serial),
        (None, Some(values)) => println!(
            "PM1.0 {:.1}  PM2.5 {:.1}  PM4.0 {:.1}  PM10 {:.1}",
            values[0], values[1], values[2], values[3]
        ),
        (None, None) => {}
    }
    Ok(())
}

async fn run_service(config: Config, backend: Backend, offset: UtcOffset) -> anyhow::Result<()> {
    let directory = &config.logging.directory;
    let connection_log = ConnectionLog::new(directory, offset)?;
    let csv = CsvLog::with_prefix(directory, config.logging.file_prefix.clone())?;

    let events = EventDispatcher::default();
    let log_task = connection_log.spawn(events.subscribe());

    let (sampler, samples) = Sampler::builder(config.sensor.sampler_config(offset))
        .transport(Arc::clone(&backend.transport))
        .ports(Arc::clone(&backend.ports))
        .drivers(backend.drivers.clone())
        .events(events)
        .spawn()?;

    let store = Arc::new(DataStore::new());
    let collector = Collector::new(Arc::clone(&store))
        .with_sink(Arc::new(csv))
        .spawn(samples);

    let state = AppState::new(sampler, store, backend, config.clone());

    if config.server.enabled {
        let addr = config.server.bind_addr()?;
        info!("Starting server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, api::app(Arc::clone(&state)))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!("HTTP server disabled");
        shutdown_signal().await;
    }

    info!("Shutting down");
    state.sampler.stop().await;
    let collected = collector.await?;
    info!("Collected {} samples", collected);

    drop(state);
    if tokio::time::timeout(Duration::from_secs(1), log_task)
        .await
        .is_err()
    {
        warn!("Connection log did not flush before exit");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
