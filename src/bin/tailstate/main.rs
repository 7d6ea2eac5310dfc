// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use tailstate::init::args::ShipperRun;
use tailstate::init::registry::RegistryArgs;
use tailstate::init::shipper::Shipper;
use tailstate::init::wait;
use tailstate::registry::persistence::PersistedState;
use tailstate::registry::{Migrator, RegistryStore};

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail files and ship their lines, resuming from the registry
    Run(Box<ShipperRun>),

    /// Print the registry as JSON without modifying it
    Inspect(RegistryArgs),

    /// Upgrade a registry written by an older release and exit
    Migrate(RegistryArgs),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "tailstate")]
#[command(bin_name = "tailstate")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "TAILSTATE_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let command = match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version());
            return ExitCode::SUCCESS;
        }
        Some(command) => command,
        None => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            eprintln!("ERROR: must specify a command");
            return ExitCode::from(2);
        }
    };

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let res = match command {
        Commands::Run(run) => run_shipper(run),
        Commands::Inspect(args) => inspect(&args),
        Commands::Migrate(args) => migrate(&args),
        Commands::Version => Ok(()),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Failed to run tailstate.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run_shipper(run: Box<ShipperRun>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = run.build_config();
    let mut shipper_join_set = wait::TaskSet::new();

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        shipper_join_set.spawn(Shipper::new(config).run(token));
    }

    select! {
        res = signal_wait() => {
            res?;
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut shipper_join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of shipper."),
                Err(e) => return Err(e),
            }
            return Ok(());
        },
    }

    // The shipper enforces its own shutdown timeout and then waits for the
    // registrar, so only guard against a stuck final flush here.
    let limit = Duration::from_millis(run.shutdown_timeout_ms) + Duration::from_secs(30);
    wait::wait_for_tasks_with_timeout(&mut shipper_join_set, limit).await?;

    Ok(())
}

fn inspect(args: &RegistryArgs) -> Result<(), BoxError> {
    let config = args.build_config();
    let (format, states) = RegistryStore::inspect(&config)?;
    let states: Vec<PersistedState> = states.iter().map(PersistedState::from).collect();

    let doc = json!({
        "registry": config.root(),
        "format": format.to_string(),
        "states": states,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn migrate(args: &RegistryArgs) -> Result<(), BoxError> {
    let config = args.build_config();
    config.validate()?;
    match Migrator::new(&config).run()? {
        Some(format) => info!(from = %format, "Registry migrated"),
        None => info!(registry = ?config.root(), "Registry already up to date"),
    }
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // Inspect prints the registry on stdout, keep logs out of it
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() -> Result<(), BoxError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn signal_wait() -> Result<(), BoxError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
