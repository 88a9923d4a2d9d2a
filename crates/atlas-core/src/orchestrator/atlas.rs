use super::Orchestrator;
use super::validation::validate_atlas;
use crate::artifacts::{ModelRow, write_model_csv};
use crate::cards::{
    ATLAS_BATCH_ITERATIONS, AtlasControl, atlas_control_script, atlas_end_script,
    atlas_start_script, iteration_blocks, render_model_deck,
};
use crate::common::files::{copy_file, create_run_directory, read_text, write_text};
use crate::convergence::{
    ConvergenceRecord, ConvergenceTier, Termination, check_termination, parse_log, select_best,
};
use crate::domain::errors::{DIRECTORY_EXISTS, MISSING_OUTPUT, MISSING_TABLE};
use crate::domain::{AtlasError, AtlasResult, RunKind};
use crate::metadata::meta;
use crate::restart::{self, RestartSelector};
use crate::settings::StellarParameters;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{info, warn};

/// Upper bound on 15-iteration batches in automatic mode.
pub const MAX_AUTO_BATCHES: usize = 30;
/// Restarted batches after which a stalled model is given up on. The first
/// batch starts from the initial model and does not count.
pub const STALL_BATCHES: usize = 10;
/// Smallest combined drop of max|err| and max|de| that still counts as progress.
pub const MIN_IMPROVEMENT: f64 = 0.1;

static ODF_VELOCITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^p00big([0-9]+)\.bdf$").expect("static pattern"));

/// One ATLAS-9 model calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasRequest {
    /// Run directory; must not exist yet.
    pub output_dir: PathBuf,
    pub params: StellarParameters,
    pub restart: RestartSelector,
    /// `None` or `Some(0)` iterates in batches until the model converges or
    /// stalls.
    pub iterations: Option<u32>,
    /// DFSYNTHE run with the opacity tables; the configured default if `None`.
    pub odf: Option<PathBuf>,
}

impl AtlasRequest {
    pub fn new(output_dir: impl Into<PathBuf>, params: StellarParameters) -> Self {
        Self {
            output_dir: output_dir.into(),
            params,
            restart: RestartSelector::default(),
            iterations: None,
            odf: None,
        }
    }

    /// Fixed number of iterations, or `None` for automatic iteration.
    pub fn manual_iterations(&self) -> Option<u32> {
        self.iterations.filter(|&total| total > 0)
    }
}

/// A finished ATLAS-9 run. Non-fatal problems are listed in `warnings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub run_dir: PathBuf,
    pub restart: String,
    pub iterations: usize,
    pub best: ConvergenceRecord,
    pub termination: Termination,
    #[serde(skip)]
    pub structure: Vec<ModelRow>,
    pub warnings: Vec<String>,
}

impl Model {
    pub fn tier(&self) -> ConvergenceTier {
        self.best.tier
    }

    pub fn is_converged(&self) -> bool {
        self.best.tier == ConvergenceTier::Gold
    }
}

/// Splits the accumulated punch output into one model deck per iteration.
pub fn split_punched_decks(text: &str) -> Vec<String> {
    let mut decks: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.starts_with("TEFF") {
            decks.push(String::new());
        }
        if let Some(deck) = decks.last_mut() {
            deck.push_str(line);
            deck.push('\n');
        }
    }
    decks
}

fn punched_deck(run_dir: &Path, iteration: usize) -> AtlasResult<String> {
    let punch = read_text(&run_dir.join("output_punch.out"), "output_punch.out")?;
    split_punched_decks(&punch)
        .into_iter()
        .nth(iteration.saturating_sub(1))
        .ok_or_else(|| {
            AtlasError::computation(
                MISSING_OUTPUT,
                format!("ATLAS did not punch a model for iteration {iteration}"),
            )
        })
}

/// Iteration records accumulated over consecutive batches of one run.
struct IterationLog {
    main: PathBuf,
    consumed: usize,
    records: Vec<ConvergenceRecord>,
}

struct Batch {
    range: Range<usize>,
    termination: Termination,
}

impl IterationLog {
    fn new(run_dir: &Path) -> Self {
        Self {
            main: run_dir.join("output_main.out"),
            consumed: 0,
            records: Vec::new(),
        }
    }

    /// Parses the part of the main log written since the previous call.
    fn read_batch(&mut self, budget: usize) -> AtlasResult<Batch> {
        let log = read_text(&self.main, "output_main.out")?;
        let fresh = log.get(self.consumed..).unwrap_or_default();
        let first = self.records.len();
        let records = parse_log(fresh, first + 1);
        let termination = check_termination(fresh, records.len(), budget)?;
        self.consumed = log.len();
        self.records.extend(records);
        Ok(Batch {
            range: first..self.records.len(),
            termination,
        })
    }
}

fn odf_tables(odf_dir: &Path, params: &StellarParameters) -> AtlasResult<(PathBuf, PathBuf)> {
    if !odf_dir.is_dir() {
        return Err(AtlasError::input_validation(
            MISSING_TABLE,
            format!("ODF directory {} not found", odf_dir.display()),
        ));
    }
    let odf = meta(odf_dir)?;
    if odf.kind != RunKind::Dfsynthe {
        return Err(AtlasError::input_validation(
            MISSING_TABLE,
            format!("directory {} does not have ODFs", odf_dir.display()),
        ));
    }
    params.check_odf(&odf.abundances)?;

    let bdf = odf_dir.join(format!("p00big{}.bdf", params.vturb));
    if !bdf.is_file() {
        let mut available: Vec<u32> = fs::read_dir(odf_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|entry| {
                        let name = entry.file_name();
                        let captures = ODF_VELOCITY.captures(name.to_str()?)?;
                        captures[1].parse().ok()
                    })
                    .collect()
            })
            .unwrap_or_default();
        available.sort_unstable();
        return Err(AtlasError::input_validation(
            MISSING_TABLE,
            format!(
                "ODF not calculated for vturb={}. Available vturb: {:?}",
                params.vturb, available
            ),
        ));
    }
    let ros = odf_dir.join("kappa.ros");
    if !ros.is_file() {
        return Err(AtlasError::input_validation(
            MISSING_TABLE,
            format!("{} has no Rosseland opacity table", odf_dir.display()),
        ));
    }
    Ok((bdf, ros))
}

impl Orchestrator<'_> {
    /// Computes a model atmosphere. All preconditions are checked before the
    /// run directory is created.
    pub fn atlas(&self, request: &AtlasRequest) -> AtlasResult<Model> {
        let started = Instant::now();
        let params = &request.params;
        let layout = self.layout();
        params.validate()?;
        if request.output_dir.exists() {
            return Err(AtlasError::input_validation(
                DIRECTORY_EXISTS,
                format!("directory {} already exists", request.output_dir.display()),
            ));
        }
        let odf_dir = request.odf.as_deref().unwrap_or(&layout.default_odf);
        let (bdf, ros) = odf_tables(odf_dir, params)?;
        let resolved = restart::resolve(&request.restart, params, layout, self.restarts())?;
        let restart_deck = restart::load(&resolved, params)?.restart_deck(params)?;
        let scale_card = params.abundance_scale_card()?;
        let abundances = params.atlas_abundances()?;

        let run_dir = create_run_directory(&request.output_dir)?;
        copy_file(&bdf, &run_dir.join("odf_9.bdf"))?;
        copy_file(&ros, &run_dir.join("odf_1.ros"))?;
        write_text(&run_dir.join("restart.dat"), &render_model_deck(&restart_deck))?;

        let executable = layout.executable("atlas9mem.exe");
        let manual = request.manual_iterations();
        let iterations = iteration_blocks(manual);
        let control = atlas_control_script(&AtlasControl {
            run_dir: &run_dir,
            executable: &executable,
            teff: params.teff,
            logg: params.logg,
            vturb: params.vturb,
            scale_card: &scale_card,
            abundances: &abundances,
            iterations: &iterations,
        });
        let start_script = run_dir.join("atlas_control_start.com");
        let control_script = run_dir.join("atlas_control.com");
        let end_script = run_dir.join("atlas_control_end.com");
        write_text(
            &start_script,
            &atlas_start_script(&run_dir, &layout.atlas_files().join("molecules.dat")),
        )?;
        write_text(&control_script, &control)?;
        write_text(&end_script, &atlas_end_script(&run_dir))?;
        info!("Launcher created");

        let timeout = layout.batch_timeout();
        self.run(&start_script, timeout)?;

        let mut log = IterationLog::new(&run_dir);
        let mut warnings = Vec::new();
        let termination = match manual {
            Some(total) => {
                let batches = total.div_ceil(ATLAS_BATCH_ITERATIONS);
                self.run(&control_script, timeout * batches)?;
                log.read_batch(total as usize)?.termination
            }
            None => {
                info!("Starting automatic iterations...");
                self.iterate_automatically(&run_dir, &control_script, &mut log, &mut warnings)?
            }
        };
        if let Some(message) = termination.warning() {
            warnings.push(message.to_string());
        }
        info!("ATLAS-9 halted");

        let best_index = select_best(&log.records).ok_or_else(|| {
            AtlasError::computation(MISSING_OUTPUT, "ATLAS did not report any iteration tables")
        })?;
        let best = log.records[best_index].clone();
        write_text(&run_dir.join("output_last_iteration.out"), &best.table)?;
        write_text(
            &run_dir.join("output_summary.out"),
            &punched_deck(&run_dir, best.iteration)?,
        )?;

        self.run(&end_script, timeout)?;
        for name in ["output_main.out", "output_summary.out"] {
            if !run_dir.join(name).is_file() {
                return Err(AtlasError::computation(
                    MISSING_OUTPUT,
                    format!("ATLAS-9 did not output {name}"),
                ));
            }
        }
        validate_atlas(&run_dir)?;

        info!(
            "Final convergence: iteration {} max[abs(err)] = {} | max[abs(de)] = {} ({})",
            best.iteration, best.max_flux_error, best.max_flux_derivative_error, best.tier
        );
        if best.tier != ConvergenceTier::Gold {
            let message = format!(
                "Failed to converge: best iteration {} is {}",
                best.iteration, best.tier
            );
            warn!("{message}");
            warnings.push(message);
        }

        let structure = write_model_csv(&run_dir)?;
        info!("Saved the model in model.dat");
        info!(
            "Finished running ATLAS-9 in {:.1} s",
            started.elapsed().as_secs_f64()
        );
        Ok(Model {
            run_dir,
            restart: resolved.describe(),
            iterations: log.records.len(),
            best,
            termination,
            structure,
            warnings,
        })
    }

    /// Runs 15-iteration batches, restarting each from the best model punched
    /// by the previous one, until GOLD, a reported stop, the batch limit, or a
    /// stall.
    fn iterate_automatically(
        &self,
        run_dir: &Path,
        control_script: &Path,
        log: &mut IterationLog,
        warnings: &mut Vec<String>,
    ) -> AtlasResult<Termination> {
        let timeout = self.layout().batch_timeout();
        let mut previous: Option<(f64, f64)> = None;
        for batch_number in 1..=MAX_AUTO_BATCHES {
            self.run(control_script, timeout)?;
            let batch = log.read_batch(ATLAS_BATCH_ITERATIONS as usize)?;
            self.report_progress(batch_number as f64 / MAX_AUTO_BATCHES as f64);
            let records = &log.records[batch.range.clone()];
            let Some(best) = select_best(records).map(|index| &records[index]) else {
                return Ok(batch.termination);
            };
            info!(
                "{} iterations completed: max[abs(err)] = {} | max[abs(de)] = {}",
                log.records.len(),
                best.max_flux_error,
                best.max_flux_derivative_error
            );
            if best.tier == ConvergenceTier::Gold
                || batch.termination != Termination::BudgetExhausted
            {
                return Ok(batch.termination);
            }
            if batch_number == MAX_AUTO_BATCHES {
                let message = "Exceeded the maximum number of iterations".to_string();
                warn!("{message}");
                warnings.push(message);
                return Ok(batch.termination);
            }
            let current = (best.max_flux_error, best.max_flux_derivative_error);
            let restarted = batch_number - 1;
            if let Some((err, de)) = previous {
                let improvement = (err - current.0) + (de - current.1);
                if restarted > STALL_BATCHES && improvement < MIN_IMPROVEMENT {
                    let message = "The model is unlikely to converge any better".to_string();
                    warn!("{message}");
                    warnings.push(message);
                    return Ok(batch.termination);
                }
            }
            previous = Some(current);
            write_text(&run_dir.join("fort.3"), &punched_deck(run_dir, best.iteration)?)?;
        }
        Ok(Termination::BudgetExhausted)
    }
}
