use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use auto_z_offset::calibration::CORRECTION_KEY;
use auto_z_offset::hardware::{JsonFileStore, Persistence, SimPrinter};
use auto_z_offset::telemetry::TelemetrySnapshot;
use auto_z_offset::{
    AppConfig, AutoZCommand, AutoZContext, AutoZStatus, Collaborators, CommandResponse, ErrorCode,
    ProbeError,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Exit code for a command that ran but failed (stuck sensor, no trigger...)
const EXIT_PROBE_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "auto_z_cli",
    about = "Auto Z-offset calibration harness against a simulated printer"
)]
struct Cli {
    /// JSON configuration with `probe` and `printer` sections (defaults if omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON file keeping persisted corrections between runs
    #[arg(long)]
    state: Option<PathBuf>,
    /// Override the simulated noise seed
    #[arg(long)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bed-sensor probe at the current XY position
    Probe {
        /// Also ascend until the sensor releases
        #[arg(long)]
        release: bool,
    },
    /// Home Z on the bed sensor at bed center
    HomeZ,
    /// One bed sensor vs inductive probe measurement
    MeasureOffset,
    /// Full calibration; applies and persists the correction
    Calibrate,
    /// Apply the persisted correction as the live offset
    LoadOffset,
    /// Persist the live offset as the new correction
    SaveLiveOffset {
        /// Live offset the operator dialed in before saving
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        live_offset: f64,
    },
    /// Print the engine status without moving
    Status,
    /// Run a raw command line (e.g. "AUTO_Z_PROBE RELEASE=1") and print its event history
    Events { line: String },
    /// List host command names with their help text
    ListCommands,
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Session {
    ctx: AutoZContext,
    printer: SimPrinter,
    store: Option<Arc<JsonFileStore>>,
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let command = match &cli.command {
        Commands::ListCommands => return run_list(),
        Commands::Status => {
            let session = open_session(&cli)?;
            println!("{}", serde_json::to_string_pretty(&session.ctx.status())?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Probe { release } => AutoZCommand::Probe { release: *release },
        Commands::HomeZ => AutoZCommand::HomeZ,
        Commands::MeasureOffset => AutoZCommand::MeasureOffset,
        Commands::Calibrate => AutoZCommand::Calibrate,
        Commands::LoadOffset => AutoZCommand::LoadOffset,
        Commands::SaveLiveOffset { .. } => AutoZCommand::SaveLiveOffset,
        Commands::Events { line } => line
            .parse()
            .with_context(|| format!("parsing command line {:?}", line))?,
    };

    let mut session = open_session(&cli)?;
    if let Commands::SaveLiveOffset { live_offset } = cli.command {
        session.printer.adjust_live_offset(live_offset);
    }
    let with_events = matches!(cli.command, Commands::Events { .. });
    run_command(&mut session, command, with_events)
}

fn open_session(cli: &Cli) -> Result<Session> {
    let mut app = match &cli.config {
        Some(path) => AppConfig::try_load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(seed) = cli.seed {
        app.printer.seed = seed;
    }

    let store = match &cli.state {
        Some(path) => Some(Arc::new(
            JsonFileStore::open(path).with_context(|| format!("opening state {}", path.display()))?,
        )),
        None => None,
    };
    if let Some(stored) = store
        .as_ref()
        .and_then(|store| store.get(&app.probe.name, CORRECTION_KEY))
    {
        app.probe.probe_z_correction = stored
            .parse()
            .with_context(|| format!("stored {} {:?} is not a number", CORRECTION_KEY, stored))?;
    }

    let printer = SimPrinter::new(app.printer.clone());
    let mut hw = Collaborators::from_printer(Arc::new(printer.clone()));
    if let Some(store) = &store {
        hw = hw.with_persistence(Arc::clone(store) as Arc<dyn Persistence>);
    }
    let ctx = AutoZContext::from_raw(app.probe, hw).context("invalid probe configuration")?;

    Ok(Session {
        ctx,
        printer,
        store,
    })
}

fn run_command(session: &mut Session, command: AutoZCommand, with_events: bool) -> Result<ExitCode> {
    let span = tracing::info_span!("command", name = command.name());
    let _enter = span.enter();

    let outcome = command.execute(&mut session.ctx);
    if outcome.is_ok() {
        if let Some(store) = &session.store {
            store.save().context("saving state")?;
        }
    }

    let report = CommandReport::new(&command, &outcome, session, with_events);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(EXIT_PROBE_FAILURE),
    })
}

fn run_list() -> Result<ExitCode> {
    for command in AutoZCommand::all() {
        println!("{:<26} {}", command.name(), command.help());
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct ErrorReport {
    code: i32,
    message: String,
}

#[derive(Serialize)]
struct CommandReport<'a> {
    command: String,
    ok: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a CommandResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
    status: AutoZStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<TelemetrySnapshot>,
}

impl<'a> CommandReport<'a> {
    fn new(
        command: &AutoZCommand,
        outcome: &'a Result<CommandResponse, ProbeError>,
        session: &Session,
        with_events: bool,
    ) -> Self {
        let (message, response, error) = match outcome {
            Ok(response) => (response.message(), Some(response), None),
            Err(err) => (
                err.message(),
                None,
                Some(ErrorReport {
                    code: err.code(),
                    message: err.message(),
                }),
            ),
        };
        Self {
            command: command.to_string(),
            ok: outcome.is_ok(),
            message,
            response,
            error,
            status: session.ctx.status(),
            events: with_events.then(|| session.ctx.telemetry().snapshot()),
        }
    }
}
