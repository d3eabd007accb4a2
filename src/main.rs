//! IMU Drift Monitor CLI
//!
//! Runs measurement sessions against a live rig and manages stored results.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use imu_drift_monitor::{
    config::Config,
    core::{Axis, SessionOutcome, SessionResult},
    store::{export_records, write_records, ExportFormat, LocalStore, PreferRemote, ResultSink},
    stream::{Connector, ReplayConnector, WebSocketConnector},
    AcquisitionStateMachine, IngestStats, LinearDriftModel, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "gateway")]
use imu_drift_monitor::store::GatewayConfig;

#[derive(Parser)]
#[command(name = "imu-drift")]
#[command(version = VERSION)]
#[command(about = "Live IMU drift diagnosis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one measurement session and diagnose every sensor
    Measure {
        /// Telemetry WebSocket URL (defaults to the configured URL)
        #[arg(long, conflicts_with = "replay")]
        url: Option<String>,

        /// Replay a recorded JSON-lines capture instead of connecting
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Interval between replayed messages, in milliseconds
        #[arg(long, default_value = "10")]
        replay_interval_ms: u64,

        /// Drift model artifact (defaults to the configured path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Fault threshold in degrees for this session
        #[arg(long)]
        threshold: Option<f64>,

        /// Do not store the result
        #[arg(long)]
        no_save: bool,

        /// Gateway base URL for result upload (requires gateway feature)
        #[arg(long)]
        gateway_url: Option<String>,

        /// Gateway bearer token (requires gateway feature)
        #[arg(long)]
        gateway_token: Option<String>,
    },

    /// List stored sessions
    History {
        /// Show only the most recent sessions
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Export stored diagnoses
    Export {
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },

    /// Show configuration, optionally updating it
    Config {
        /// Set the telemetry WebSocket URL
        #[arg(long)]
        url: Option<String>,

        /// Set the drift model path
        #[arg(long)]
        model: Option<PathBuf>,

        /// Set the fault threshold in degrees
        #[arg(long)]
        threshold: Option<f64>,

        /// Set the collection duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Set the connection timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Set the number of sensors on the rig
        #[arg(long)]
        sensors: Option<u32>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imu_drift_monitor=info,imu_drift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Measure {
            url,
            replay,
            replay_interval_ms,
            model,
            threshold,
            no_save,
            gateway_url,
            gateway_token,
        } => cmd_measure(MeasureArgs {
            url,
            replay,
            replay_interval: Duration::from_millis(replay_interval_ms),
            model,
            threshold,
            save: !no_save,
            gateway_url,
            gateway_token,
        }),
        Commands::History { limit } => cmd_history(limit),
        Commands::Export { output, format } => cmd_export(output, format),
        Commands::Config {
            url,
            model,
            threshold,
            duration,
            timeout,
            sensors,
        } => cmd_config(url, model, threshold, duration, timeout, sensors),
    }
}

struct MeasureArgs {
    url: Option<String>,
    replay: Option<PathBuf>,
    replay_interval: Duration,
    model: Option<PathBuf>,
    threshold: Option<f64>,
    save: bool,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
}

fn cmd_measure(args: MeasureArgs) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(threshold) = args.threshold {
        config.fault_threshold = threshold;
    }
    if let Some(model) = args.model {
        config.model_path = model;
    }
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("IMU Drift Monitor v{VERSION}");
    println!();

    let connector: Arc<dyn Connector> = match args.replay {
        Some(path) => Arc::new(
            ReplayConnector::from_capture(&path, args.replay_interval)
                .with_context(|| format!("loading capture {}", path.display()))?,
        ),
        None => Arc::new(
            WebSocketConnector::new(args.url.unwrap_or_else(|| config.telemetry_url.clone()))
                .with_connect_timeout(config.connection_timeout),
        ),
    };

    let model = LinearDriftModel::load(&config.model_path)
        .with_context(|| format!("loading drift model {}", config.model_path.display()))?;

    let stats = Arc::new(IngestStats::with_persistence(config.stats_path()));
    let mut machine =
        AcquisitionStateMachine::new(config.clone(), connector.clone(), Arc::clone(&stats))?;
    machine.load_model(Arc::new(model));

    let cancel = machine.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .context("installing Ctrl+C handler")?;

    println!("Source: {}", connector.describe());
    println!("  Sensors: {}", config.sensor_count);
    println!("  Threshold: {:.2}°", config.fault_threshold);
    println!(
        "  Collection: {:.1}s (timeout {:.1}s)",
        config.collection_duration.as_secs_f64(),
        config.connection_timeout.as_secs_f64()
    );
    println!();
    println!("Press Ctrl+C to cancel.");
    println!();

    machine.start()?;
    let outcome = machine.run_to_completion();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save ingest stats: {e}");
    }

    let result = match outcome {
        Some(SessionOutcome::Complete(result)) => result,
        Some(SessionOutcome::Failed(failure)) => {
            bail!(
                "session {} failed ({}): {}",
                failure.session.id,
                failure.reason.code(),
                failure.reason
            );
        }
        None => bail!("session ended without an outcome"),
    };

    print_result(&result);

    if args.save {
        let sink = result_sink(&config, args.gateway_url, args.gateway_token);
        match sink.persist(&result) {
            Ok(report) => println!(
                "Saved via {}: {} diagnoses saved, {} failed, {} samples",
                sink.describe(),
                report.diagnoses_saved,
                report.diagnoses_failed,
                report.samples_saved
            ),
            Err(e) => eprintln!("Error saving session: {e}"),
        }
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn print_result(result: &SessionResult) {
    println!("Session {}", result.session.id);
    println!(
        "  Data points: {} from {} sensors over {:.1}s",
        result.total_data_points, result.active_sensors, result.collection_duration_secs
    );
    println!("  Model: {}", result.model_version);
    println!();
    println!(
        "  {:>6}  {:>9}  {:>9}  {:>9}  {:>5}  {:>8}  VERDICT",
        "SENSOR", "ROLL", "PITCH", "YAW", "AXIS", "MAX"
    );
    for d in result.diagnoses.values() {
        println!(
            "  {:>6}  {:>9.3}  {:>9.3}  {:>9.3}  {:>5}  {:>8.3}  {}",
            d.sensor_id,
            d.roll_drift,
            d.pitch_drift,
            d.yaw_drift,
            axis_label(d.max_axis),
            d.max_signed,
            d.verdict()
        );
    }
    for (sensor_id, skip) in &result.skipped {
        println!("  {sensor_id:>6}  skipped: {skip}");
    }
    println!();
    println!(
        "  {} of {} diagnosed sensors faulty (threshold {:.2}°)",
        result.fault_count(),
        result.diagnoses.len(),
        result.fault_threshold
    );
    println!();
}

fn axis_label(axis: Axis) -> &'static str {
    match axis {
        Axis::Roll => "R",
        Axis::Pitch => "P",
        Axis::Yaw => "Y",
    }
}

/// Pick where results go: the gateway when signed in, else the local store.
#[allow(unused_variables)]
fn result_sink(
    config: &Config,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
) -> PreferRemote {
    let local = LocalStore::new(config.sessions_path());

    #[cfg(feature = "gateway")]
    {
        let gateway = match (gateway_url, gateway_token) {
            (Some(url), Some(token)) => Some(GatewayConfig::new(url, token)),
            _ => GatewayConfig::from_env().ok(),
        };
        PreferRemote::with_gateway(gateway, local)
    }

    #[cfg(not(feature = "gateway"))]
    {
        if gateway_url.is_some() || gateway_token.is_some() {
            eprintln!("Warning: gateway upload requires the 'gateway' feature; storing locally");
        }
        PreferRemote::local_only(local)
    }
}

fn cmd_history(limit: Option<usize>) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = LocalStore::new(config.sessions_path());
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No sessions found in {:?}", store.root());
        println!("Run 'imu-drift measure' to record one.");
        return Ok(());
    }

    let skip = limit.map(|n| sessions.len().saturating_sub(n)).unwrap_or(0);
    println!("{:<36}  {:<20}  {:>7}  {:>6}  {:>8}", "SESSION", "START (UTC)", "SENSORS", "FAULTY", "POINTS");
    for summary in sessions.iter().skip(skip) {
        println!(
            "{:<36}  {:<20}  {:>7}  {:>6}  {:>8}",
            summary.session_id,
            summary.start_time.format("%Y-%m-%d %H:%M:%S"),
            summary.sensors_diagnosed,
            summary.faulty,
            summary.total_data_points
        );
    }
    Ok(())
}

fn cmd_export(output: Option<PathBuf>, format: ExportFormat) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = LocalStore::new(config.sessions_path());
    let results = store.load_all()?;

    if results.is_empty() {
        println!("No session data found in {:?}", store.root());
        println!("Run 'imu-drift measure' to record one.");
        return Ok(());
    }

    let records = export_records(&results);
    println!(
        "Found {} session(s), {} diagnoses",
        results.len(),
        records.len()
    );

    let export_dir = output.unwrap_or(config.export_path.clone());
    std::fs::create_dir_all(&export_dir)
        .with_context(|| format!("creating {}", export_dir.display()))?;
    let output_path = export_dir.join(format!(
        "export_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ));

    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {}", output_path.display()))?;
    write_records(&records, format, std::io::BufWriter::new(file))?;
    println!("Exported to {output_path:?}");
    Ok(())
}

fn cmd_config(
    url: Option<String>,
    model: Option<PathBuf>,
    threshold: Option<f64>,
    duration: Option<f64>,
    timeout: Option<f64>,
    sensors: Option<u32>,
) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    let mut changed = false;

    if let Some(url) = url {
        config.telemetry_url = url;
        changed = true;
    }
    if let Some(model) = model {
        config.model_path = model;
        changed = true;
    }
    if let Some(threshold) = threshold {
        config.fault_threshold = threshold;
        changed = true;
    }
    if let Some(secs) = duration {
        config.collection_duration = Duration::try_from_secs_f64(secs)?;
        changed = true;
    }
    if let Some(secs) = timeout {
        config.connection_timeout = Duration::try_from_secs_f64(secs)?;
        changed = true;
    }
    if let Some(sensors) = sensors {
        config.sensor_count = sensors;
        changed = true;
    }

    if changed {
        config.save()?;
        println!("Configuration saved.");
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
