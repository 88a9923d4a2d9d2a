use super::helpers::*;
use super::{CliError, GlobalOptions};
use anyhow::Context;
use atlas_core::artifacts::{read_spectrum, read_structure};
use atlas_core::convergence::{ConvergenceTier, last_iteration_table, parse_log, select_best};
use atlas_core::metadata::meta;
use atlas_core::orchestrator::{AtlasRequest, Orchestrator, ShellRunner, SpectrumRequest, validate_run};
use atlas_core::restart::{RestartCache, RestartSelector, prepare_restart};
use atlas_core::settings::StellarParameters;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Stellar parameters shared by every command that starts a calculation.
#[derive(clap::Args)]
pub(super) struct ParameterFlags {
    /// JSON settings file; individual flags override its values
    #[arg(long, value_name = "JSON")]
    settings: Option<PathBuf>,

    /// Effective temperature in K
    #[arg(long)]
    teff: Option<f64>,

    /// Surface gravity, log10 cgs
    #[arg(long)]
    logg: Option<f64>,

    /// Metallicity [M/H] in dex
    #[arg(long, allow_hyphen_values = true)]
    zscale: Option<f64>,

    /// Helium mass fraction Y; solar He/H when omitted
    #[arg(long, value_name = "Y")]
    helium: Option<f64>,

    /// Element enhancement [A/M], repeatable
    #[arg(long = "enhance", value_name = "SYMBOL=DEX", value_parser = parse_enhancement, allow_hyphen_values = true)]
    enhancements: Vec<(String, f64)>,

    /// Microturbulent velocity in km/s
    #[arg(long)]
    vturb: Option<u32>,
}

impl ParameterFlags {
    fn resolve(self) -> Result<StellarParameters, CliError> {
        let mut params = load_parameters(self.settings.as_deref())?;
        if let Some(teff) = self.teff {
            params.teff = teff;
        }
        if let Some(logg) = self.logg {
            params.logg = logg;
        }
        if let Some(zscale) = self.zscale {
            params.zscale = zscale;
        }
        if let Some(helium) = self.helium {
            params.helium_mass_fraction = Some(helium);
        }
        if let Some(vturb) = self.vturb {
            params.vturb = vturb;
        }
        params.enhancements.extend(self.enhancements);
        Ok(params)
    }
}

#[derive(clap::Args)]
pub(super) struct AtlasArgs {
    /// New run directory; must not exist
    output_dir: PathBuf,

    #[command(flatten)]
    params: ParameterFlags,

    /// Initial model: grey, auto, grid, or a run directory / model file
    #[arg(long, default_value = "auto")]
    restart: String,

    /// Fixed number of iterations; iterate until convergence when 0 or omitted
    #[arg(long)]
    niter: Option<u32>,

    /// DFSYNTHE run with the opacity tables; the configured default when omitted
    #[arg(long)]
    odf: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct SyntheArgs {
    /// Finished ATLAS-9 run directory
    run_dir: PathBuf,

    /// Start of the wavelength range in nm
    #[arg(long)]
    min_wl: f64,

    /// End of the wavelength range in nm
    #[arg(long)]
    max_wl: f64,

    /// Resolving power
    #[arg(long, default_value_t = 600000.0)]
    resolution: f64,

    /// Microturbulent velocity added by SYNTHE, km/s
    #[arg(long, default_value_t = 0.0)]
    vturb: f64,
}

#[derive(clap::Args)]
pub(super) struct DfsyntheArgs {
    /// New run directory; must not exist
    output_dir: PathBuf,

    #[command(flatten)]
    params: ParameterFlags,
}

#[derive(clap::Args)]
pub(super) struct RestartArgs {
    /// Where to write the model deck
    save_to: PathBuf,

    #[command(flatten)]
    params: ParameterFlags,

    /// grey, auto, grid, or a run directory / model file
    #[arg(long, default_value = "auto")]
    restart: String,
}

#[derive(clap::Args)]
pub(super) struct RunDirArgs {
    run_dir: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct SpectrumArgs {
    run_dir: PathBuf,

    /// Average into this many equal-width wavelength bins
    #[arg(long)]
    bins: Option<usize>,
}

pub(super) fn run_atlas_command(args: AtlasArgs, global: &GlobalOptions) -> Result<i32, CliError> {
    let layout = load_layout(global)?;
    let mut request = AtlasRequest::new(args.output_dir, args.params.resolve()?);
    request.restart = RestartSelector::parse(&args.restart);
    request.iterations = args.niter;
    request.odf = args.odf;

    let runner = ShellRunner::new(layout.shell.clone());
    let cache = RestartCache::new();
    let model = with_progress("ATLAS-9", global.quiet, |progress| {
        Orchestrator::new(&layout, &runner, &cache)
            .with_progress_file(progress)
            .atlas(&request)
    })
    .map_err(CliError::Compute)?;
    print_json(&model)?;
    Ok(0)
}

pub(super) fn run_synthe_command(args: SyntheArgs, global: &GlobalOptions) -> Result<i32, CliError> {
    let layout = load_layout(global)?;
    let mut request = SpectrumRequest::new(args.min_wl, args.max_wl);
    request.resolution = args.resolution;
    request.vturb = args.vturb;

    let runner = ShellRunner::new(layout.shell.clone());
    let cache = RestartCache::new();
    let run = with_progress("SYNTHE", global.quiet, |progress| {
        Orchestrator::new(&layout, &runner, &cache)
            .with_progress_file(progress)
            .synthe(&args.run_dir, &request)
    })
    .map_err(CliError::Compute)?;
    print_json(&run)?;
    Ok(0)
}

pub(super) fn run_dfsynthe_command(
    args: DfsyntheArgs,
    global: &GlobalOptions,
) -> Result<i32, CliError> {
    let layout = load_layout(global)?;
    let params = args.params.resolve()?;
    let runner = ShellRunner::new(layout.shell.clone());
    let cache = RestartCache::new();
    let run = with_progress("DFSYNTHE", global.quiet, |progress| {
        Orchestrator::new(&layout, &runner, &cache)
            .with_progress_file(progress)
            .dfsynthe(&args.output_dir, &params)
    })
    .map_err(CliError::Compute)?;
    print_json(&run)?;
    Ok(0)
}

pub(super) fn run_meta_command(args: RunDirArgs) -> Result<i32, CliError> {
    let metadata = meta(&args.run_dir).map_err(CliError::Compute)?;
    print_json(&metadata)?;
    Ok(0)
}

pub(super) fn run_validate_command(args: RunDirArgs) -> Result<i32, CliError> {
    let checked = validate_run(&args.run_dir).map_err(CliError::Compute)?;
    if checked.is_empty() {
        warn!("{} has no control files to validate", args.run_dir.display());
    }
    for kind in &checked {
        println!("{kind}: requested and received parameters agree");
    }
    Ok(0)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvergenceReport {
    iteration: Option<usize>,
    max_flux_error: f64,
    max_flux_derivative_error: f64,
    tier: ConvergenceTier,
}

/// Best iteration of the main log; runs without delimited iteration tables
/// fall back to the final table of the log.
pub(super) fn run_converged_command(args: RunDirArgs) -> Result<i32, CliError> {
    let path = args.run_dir.join("output_main.out");
    let log = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records = parse_log(&log, 1);
    let report = match select_best(&records).map(|index| &records[index]) {
        Some(best) => ConvergenceReport {
            iteration: Some(best.iteration),
            max_flux_error: best.max_flux_error,
            max_flux_derivative_error: best.max_flux_derivative_error,
            tier: best.tier,
        },
        None => {
            let (_, err, de) = last_iteration_table(&log);
            ConvergenceReport {
                iteration: None,
                max_flux_error: err,
                max_flux_derivative_error: de,
                tier: ConvergenceTier::classify(err, de),
            }
        }
    };
    info!(
        "max[abs(err)] = {} | max[abs(de)] = {} ({})",
        report.max_flux_error, report.max_flux_derivative_error, report.tier
    );
    print_json(&report)?;
    Ok(0)
}

pub(super) fn run_restart_command(
    args: RestartArgs,
    global: &GlobalOptions,
) -> Result<i32, CliError> {
    let layout = load_layout(global)?;
    let params = args.params.resolve()?;
    let cache = RestartCache::new();
    let resolved = prepare_restart(
        &RestartSelector::parse(&args.restart),
        &args.save_to,
        &params,
        &layout,
        &cache,
    )
    .map_err(CliError::Compute)?;
    println!(
        "Restart from {} written to {}",
        resolved.describe(),
        args.save_to.display()
    );
    Ok(0)
}

pub(super) fn run_structure_command(args: RunDirArgs) -> Result<i32, CliError> {
    let structure = read_structure(&args.run_dir).map_err(CliError::Compute)?;
    print_json(&structure)?;
    Ok(0)
}

pub(super) fn run_spectrum_command(args: SpectrumArgs) -> Result<i32, CliError> {
    let spectrum = read_spectrum(&args.run_dir, args.bins).map_err(CliError::Compute)?;
    print_json(&spectrum)?;
    Ok(0)
}
