mod commands;
mod helpers;

use atlas_core::domain::AtlasError;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let atlas_error = error.as_atlas_error();
            eprintln!("{}", atlas_error.diagnostic_line());
            if let Some(summary_line) = atlas_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            atlas_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("basic-atlas".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.quiet);
            let global = GlobalOptions {
                config: cli.config,
                quiet: cli.quiet,
            };
            dispatch_parsed(cli.command, &global)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Logs go to stderr so that stdout carries only command results.
/// `RUST_LOG` overrides the default level.
fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed when `run` is called repeatedly.
    let _ = Registry::default().with(filter).with(fmt_layer).try_init();
}

#[derive(Parser)]
#[command(
    name = "basic-atlas",
    version,
    about = "Driver for the ATLAS-9, SYNTHE and DFSYNTHE stellar atmosphere codes"
)]
struct Cli {
    /// Installation layout (JSON); defaults to ./basic-atlas.json when present
    #[arg(long, global = true, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Only report warnings and errors
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: CliCommand,
}

pub(super) struct GlobalOptions {
    pub(super) config: Option<PathBuf>,
    pub(super) quiet: bool,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Compute a model atmosphere with ATLAS-9 in a new run directory
    Atlas(commands::AtlasArgs),
    /// Synthesize the emergent spectrum of a finished ATLAS-9 run
    Synthe(commands::SyntheArgs),
    /// Tabulate opacity distribution functions for a chemical composition
    Dfsynthe(commands::DfsyntheArgs),
    /// Print the parameters a run directory was computed with
    Meta(commands::RunDirArgs),
    /// Check that the external tools received the requested parameters
    Validate(commands::RunDirArgs),
    /// Report the convergence of an ATLAS-9 run
    Converged(commands::RunDirArgs),
    /// Write an initial model (fort.3) for a new ATLAS-9 run
    Restart(commands::RestartArgs),
    /// Print the atmospheric structure of an ATLAS-9 run
    Structure(commands::RunDirArgs),
    /// Print the synthetic spectrum of a SYNTHE run
    Spectrum(commands::SpectrumArgs),
}

fn dispatch_parsed(command: CliCommand, global: &GlobalOptions) -> Result<i32, CliError> {
    match command {
        CliCommand::Atlas(args) => commands::run_atlas_command(args, global),
        CliCommand::Synthe(args) => commands::run_synthe_command(args, global),
        CliCommand::Dfsynthe(args) => commands::run_dfsynthe_command(args, global),
        CliCommand::Meta(args) => commands::run_meta_command(args),
        CliCommand::Validate(args) => commands::run_validate_command(args),
        CliCommand::Converged(args) => commands::run_converged_command(args),
        CliCommand::Restart(args) => commands::run_restart_command(args, global),
        CliCommand::Structure(args) => commands::run_structure_command(args),
        CliCommand::Spectrum(args) => commands::run_spectrum_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(AtlasError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_atlas_error(&self) -> AtlasError {
        match self {
            Self::Usage(message) => {
                AtlasError::input_validation("INPUT.CLI_USAGE", message.clone())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => AtlasError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CliError, run};
    use atlas_core::domain::AtlasError;
    use atlas_core::domain::errors::DIRECTORY_EXISTS;

    #[test]
    fn help_and_version_exit_cleanly() {
        assert_eq!(run(["--help"]).expect("help renders"), 0);
        assert_eq!(run(["--version"]).expect("version renders"), 0);
        assert_eq!(run(["atlas", "--help"]).expect("subcommand help renders"), 0);
    }

    #[test]
    fn unknown_commands_are_usage_errors() {
        let error = run(["photometry"]).expect_err("no such command");
        assert!(matches!(error, CliError::Usage(_)));
        let mapped = error.as_atlas_error();
        assert_eq!(mapped.placeholder(), "INPUT.CLI_USAGE");
        assert_eq!(mapped.exit_code(), 2);
    }

    #[test]
    fn compute_errors_keep_their_placeholder() {
        let error = CliError::Compute(AtlasError::input_validation(
            DIRECTORY_EXISTS,
            "directory runs/sun already exists",
        ));
        assert!(error.as_atlas_error().is(DIRECTORY_EXISTS));
        let internal = CliError::from(anyhow::anyhow!("disk full"));
        assert_eq!(internal.as_atlas_error().placeholder(), "IO.CLI");
        assert_eq!(internal.as_atlas_error().exit_code(), 3);
    }
}
