use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use ecobench::{BenchContext, Config, EcoError, MeasurementReport};

mod cli_logger;
mod cmd {
    pub mod capabilities;
    pub mod history_cmd;
    pub mod measure_cmd;
}

use cli_logger::CliLogger;
use cmd::capabilities::capabilities_doc;
use cmd::history_cmd::{HistoryCommand, history_command};
use cmd::measure_cmd::{
    CodeArgs, JsonArgs, NormalizeArgs, code_command, json_command, json_compare_command,
    normalize_command,
};

#[derive(Debug, Parser)]
#[command(
    name = "ecobench",
    version,
    about = "Measure and cache the carbon cost of running code and parsing JSON"
)]
struct Cli {
    /// Config file; a missing file means defaults.
    #[arg(long, global = true, default_value = "ecobench.toml")]
    config: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Measure repeated runs of a program.
    Code(CodeArgs),
    /// Measure repeated parsing of a JSON document.
    Json(JsonArgs),
    /// Print the normalized form used for cache lookups.
    Normalize(NormalizeArgs),
    /// Inspect stored measurements.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Supported languages, JSON parsers and record fields.
    Capabilities,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ECOBENCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let logger = CliLogger::new(cli.json, cli.no_color);
    let config = Config::load_optional(&cli.config);

    match run(&cli, &config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            let client_error = err
                .downcast_ref::<EcoError>()
                .is_some_and(EcoError::is_client_error);
            if client_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli, config: &Config, logger: &CliLogger) -> anyhow::Result<()> {
    match &cli.command {
        Command::Code(args) => print_measurement(logger, &code_command(config, args)?),
        Command::Json(args) if args.compare => {
            logger.print_comparison(&json_compare_command(config, args)?)
        }
        Command::Json(args) => print_measurement(logger, &json_command(config, args)?),
        Command::Normalize(args) => logger.print_normalized(&normalize_command(args)?),
        Command::History { command } => {
            let ctx = BenchContext::from_config(config)?;
            logger.print_serialized(&history_command(&ctx, command)?)
        }
        Command::Capabilities => logger.print_serialized(&capabilities_doc(config)),
    }
}

fn print_measurement(logger: &CliLogger, report: &MeasurementReport) -> anyhow::Result<()> {
    if report.failed_runs > 0 {
        logger.print_warning(&format!(
            "{} of {} runs failed",
            report.failed_runs, report.repeat
        ));
    }
    logger.print_report(report)
}
