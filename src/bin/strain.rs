//! Strain CLI - Command-line interface for Synheart Strain
//!
//! Commands:
//! - replay: Replay recorded events under simulated time (batch mode)
//! - run: Process live events from stdin (streaming mode)
//! - validate: Report events that will be normalized with safe defaults
//! - doctor: Diagnose engine configuration and environment
//! - config: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use synheart_strain::replay::MAX_TAIL_MS;
use synheart_strain::schema::{RawEvent, RawEventAdapter, ValidationResult, SCHEMA_VERSION};
use synheart_strain::types::StateVector;
use synheart_strain::{
    ChannelConsumer, CollectingConsumer, Engine, EngineConfig, EngineError, EngineRuntime,
    ManualClock, NdjsonFileSink, ReplayDriver, SystemClock, PRODUCER_NAME, STRAIN_VERSION,
};

/// Buffered state vectors between the engine and stdout in live mode
const VECTOR_BUFFER: usize = 256;

/// Strain - On-device engine for behavioral load signals
#[derive(Parser)]
#[command(name = "strain")]
#[command(author = "Synheart AI Inc")]
#[command(version = STRAIN_VERSION)]
#[command(about = "Turn interaction events into behavioral load signals", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded events under simulated time (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path for state vectors (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Session ID stamped on every state vector
        #[arg(long, default_value = "replay")]
        session_id: String,

        /// Simulated time to keep running after the last event (ms, at most one day)
        #[arg(
            long,
            default_value = "60000",
            value_parser = clap::value_parser!(i64).range(0..=MAX_TAIL_MS)
        )]
        tail_ms: i64,

        /// Offset of local time from UTC, in hours (-14 to 14), for night-hour detection
        #[arg(
            long,
            default_value = "0",
            allow_hyphen_values = true,
            value_parser = clap::value_parser!(i32).range(-14..=14)
        )]
        utc_offset_hours: i32,

        /// Append every persisted record to this NDJSON file
        #[arg(long)]
        records: Option<PathBuf>,

        /// Write an export snapshot here after the replay
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Process live events from stdin (streaming mode)
    Run {
        /// Session ID (random if omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Append every persisted record to this NDJSON file
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Report events that will be normalized with safe defaults
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Fail if any event needs defaults
        #[arg(long)]
        strict: bool,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine configuration and environment
    Doctor {
        /// Check that a records file can be written
        #[arg(long)]
        records: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one state vector per line)
    Ndjson,
    /// JSON array of state vectors
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| error.message.clone())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}

fn run(cli: Cli) -> Result<(), StrainCliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            session_id,
            tail_ms,
            utc_offset_hours,
            records,
            snapshot,
        } => cmd_replay(
            load_config(config_path)?,
            &input,
            &output,
            input_format,
            output_format,
            session_id,
            tail_ms,
            utc_offset_hours,
            records.as_deref(),
            snapshot.as_deref(),
        ),

        Commands::Run {
            session_id,
            records,
        } => {
            let session_id =
                session_id.unwrap_or_else(|| format!("session_{}", Uuid::new_v4().simple()));
            cmd_run(load_config(config_path)?, session_id, records)
        }

        Commands::Validate {
            input,
            input_format,
            strict,
            json,
        } => cmd_validate(&input, input_format, strict, json),

        Commands::Doctor { records, json } => cmd_doctor(config_path, records.as_deref(), json),

        Commands::Config => {
            println!("{}", load_config(config_path)?.to_json()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, StrainCliError> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    config: EngineConfig,
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    session_id: String,
    tail_ms: i64,
    utc_offset_hours: i32,
    records: Option<&Path>,
    snapshot: Option<&Path>,
) -> Result<(), StrainCliError> {
    let events = read_events(input, &input_format)?;
    if events.is_empty() {
        return Err(StrainCliError::NoEvents);
    }

    let start = events.iter().find_map(RawEvent::timestamp).unwrap_or(0);
    let clock = ManualClock::with_offset(start, utc_offset_hours * 3600);
    let consumer = CollectingConsumer::new();

    let mut engine = Engine::new(config, Arc::new(clock.clone()), session_id)?
        .with_consumer(Box::new(consumer.clone()));
    if let Some(path) = records {
        engine = engine.with_sink(Box::new(NdjsonFileSink::new(path)));
    }

    let total = events.len();
    let mut driver = ReplayDriver::new(engine, clock);
    for event in events {
        driver.feed(event);
    }
    let engine = driver.finish(tail_ms);
    info!(events = total, vectors = consumer.len(), "replay finished");

    if let Some(path) = snapshot {
        fs::write(path, serde_json::to_string_pretty(&engine.export_snapshot())?)?;
    }

    let output_data = format_output(&consumer.vectors(), &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

fn cmd_run(
    config: EngineConfig,
    session_id: String,
    records: Option<PathBuf>,
) -> Result<(), StrainCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_live(config, session_id, records))
}

async fn run_live(
    config: EngineConfig,
    session_id: String,
    records: Option<PathBuf>,
) -> Result<(), StrainCliError> {
    let (consumer, mut vectors) = ChannelConsumer::channel(VECTOR_BUFFER);
    let mut engine =
        Engine::new(config, Arc::new(SystemClock), session_id)?.with_consumer(Box::new(consumer));
    if let Some(path) = records {
        engine = engine.with_sink(Box::new(NdjsonFileSink::new(path)));
    }

    let runtime = EngineRuntime::spawn(engine);
    let handle = runtime.handle();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(vector) = vectors.recv().await {
            let mut line = serde_json::to_vec(&vector)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        Ok::<(), StrainCliError>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_num = 0;
    while let Some(line) = lines.next_line().await? {
        match RawEventAdapter::parse_line(line_num, &line) {
            Ok(Some(event)) => handle.ingest(event).await?,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed event"),
        }
        line_num += 1;
    }

    // dropping the engine closes the vector channel and ends the writer
    drop(runtime.shutdown().await?);
    writer
        .await
        .map_err(|e| StrainCliError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    strict: bool,
    json: bool,
) -> Result<(), StrainCliError> {
    let events = read_events(input, &input_format)?;
    let degraded = RawEventAdapter::validate_events(&events);

    let report = ValidationReport {
        total_events: events.len(),
        clean_events: events.len() - degraded.len(),
        degraded_events: degraded.len(),
        details: degraded,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:    {}", report.total_events);
        println!("Clean events:    {}", report.clean_events);
        println!("Degraded events: {}", report.degraded_events);

        if !report.details.is_empty() {
            println!("\nDefaults applied:");
            for detail in &report.details {
                println!(
                    "  - {} (index {}): {}",
                    detail.event_type,
                    detail.index,
                    detail.degraded_fields.join(", ")
                );
            }
        }
    }

    if strict && report.degraded_events > 0 {
        Err(StrainCliError::ValidationFailed(report.degraded_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    records: Option<&Path>,
    json: bool,
) -> Result<(), StrainCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "strain_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Strain version {}", STRAIN_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    checks.push(match load_config(config) {
        Ok(cfg) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Configuration valid (windows {}s/{}s/{}s, key history {})",
                cfg.windows.short_ms / 1000,
                cfg.windows.medium_ms / 1000,
                cfg.windows.long_ms / 1000,
                cfg.history.key_events
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: CliError::from(e).message,
        },
    });

    if let Some(path) = records {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        checks.push(if !parent.is_dir() {
            DoctorCheck {
                name: "records".to_string(),
                status: CheckStatus::Error,
                message: format!("Directory {} does not exist", parent.display()),
            }
        } else if path.exists() {
            DoctorCheck {
                name: "records".to_string(),
                status: CheckStatus::Warning,
                message: "Records file exists; new records will be appended".to_string(),
            }
        } else {
            DoctorCheck {
                name: "records".to_string(),
                status: CheckStatus::Ok,
                message: "Records file will be created on first flush".to_string(),
            }
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: STRAIN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Strain Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StrainCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_events(input: &Path, format: &InputFormat) -> Result<Vec<RawEvent>, StrainCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = match format {
        InputFormat::Ndjson => RawEventAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RawEventAdapter::parse_array(&input_data)?,
    };
    Ok(events)
}

fn format_output(vectors: &[StateVector], format: &OutputFormat) -> Result<String, StrainCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for vector in vectors {
                out.push_str(&serde_json::to_string(vector)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(vectors)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(vectors)?),
    }
}

// Error types

#[derive(Debug)]
enum StrainCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for StrainCliError {
    fn from(e: io::Error) -> Self {
        StrainCliError::Io(e)
    }
}

impl From<EngineError> for StrainCliError {
    fn from(e: EngineError) -> Self {
        StrainCliError::Engine(e)
    }
}

impl From<serde_json::Error> for StrainCliError {
    fn from(e: serde_json::Error) -> Self {
        StrainCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StrainCliError> for CliError {
    fn from(e: StrainCliError) -> Self {
        match e {
            StrainCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StrainCliError::Engine(EngineError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'strain config' to see the defaults".to_string()),
            },
            StrainCliError::Engine(
                e @ (EngineError::ParseError(_) | EngineError::JsonError(_)),
            ) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches {} schema", SCHEMA_VERSION)),
            },
            StrainCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            StrainCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StrainCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            StrainCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events need default values", count),
                hint: Some("Run without --strict to accept defaults".to_string()),
            },
            StrainCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    clean_events: usize,
    degraded_events: usize,
    details: Vec<ValidationResult>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
