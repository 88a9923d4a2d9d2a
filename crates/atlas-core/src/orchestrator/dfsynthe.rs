use super::Orchestrator;
use super::validation::validate_dfsynthe;
use crate::cards::{
    DFSYNTHE_TEMPERATURES, DfsyntheDeck, dfsynthe_node_script, kappa9_script, kapreadts_script,
    node_directory_name, separatedf_script, xnfdf_script,
};
use crate::common::files::{create_run_directory, ensure_directory, write_text};
use crate::domain::errors::MISSING_OUTPUT;
use crate::domain::{AtlasError, AtlasResult, ExecutionMode};
use crate::settings::{STANDARD_VTURB, StellarParameters};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::info;

/// A finished opacity-table calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdfRun {
    pub run_dir: PathBuf,
    pub temperatures: usize,
    pub velocities: Vec<u32>,
}

fn require_outputs(run_dir: &Path, names: &[String], tool: &str) -> AtlasResult<()> {
    for name in names {
        if !run_dir.join(name).is_file() {
            return Err(AtlasError::computation(
                MISSING_OUTPUT,
                format!("{tool} did not output {name}"),
            ));
        }
    }
    Ok(())
}

impl Orchestrator<'_> {
    /// Tabulates opacity distribution functions and Rosseland mean opacities
    /// for the composition in `params` at every standard turbulent velocity.
    pub fn dfsynthe(&self, output_dir: &Path, params: &StellarParameters) -> AtlasResult<OdfRun> {
        let started = Instant::now();
        params.validate()?;
        let scale_card = params.abundance_scale_card()?;
        let abundances = params.atlas_abundances()?;
        let run_dir = create_run_directory(output_dir)?;
        let layout = self.layout();
        let bin_dir = layout.bin_dir.clone();
        let data_dir = layout.dfsynthe_files();
        let deck = DfsyntheDeck {
            run_dir: &run_dir,
            bin_dir: &bin_dir,
            data_dir: &data_dir,
            teff: params.teff,
            logg: params.logg,
            scale_card: &scale_card,
            abundances: &abundances,
        };
        let timeout = layout.batch_timeout();

        info!("Will run XNFDF to tabulate atomic and molecular number densities");
        info!(
            "Launcher created for {} temperatures from {} K to {} K",
            DFSYNTHE_TEMPERATURES.len(),
            DFSYNTHE_TEMPERATURES[0],
            DFSYNTHE_TEMPERATURES[DFSYNTHE_TEMPERATURES.len() - 1]
        );
        self.launch(&run_dir.join("xnfdf.com"), &xnfdf_script(&deck), timeout)?;
        require_outputs(
            &run_dir,
            &["xnfpdf.dat".to_string(), "xnfpdfmax.dat".to_string()],
            "XNFDF",
        )?;
        info!("XNFDF halted");

        info!("Will run DFSYNTHE to tabulate the ODFs (Opacity Distribution Functions)");
        self.run_nodes(&deck)?;

        info!(
            "Will run SEPARATEDF to merge the output in a single file for every standard \
             turbulent velocity ({STANDARD_VTURB:?} km/s)"
        );
        for (index, velocity) in STANDARD_VTURB.iter().copied().enumerate() {
            self.launch(
                &run_dir.join("separatedf.com"),
                &separatedf_script(&deck, velocity),
                timeout,
            )?;
            require_outputs(
                &run_dir,
                &[format!("p00big{velocity}.bdf"), format!("p00lit{velocity}.bdf")],
                "SEPARATEDF",
            )?;
            info!(
                "{velocity} km/s done! ({}/{})",
                index + 1,
                STANDARD_VTURB.len()
            );
        }
        info!("SEPARATEDF halted");

        info!("Will run KAPPA9 for every standard turbulent velocity");
        for (index, velocity) in STANDARD_VTURB.iter().copied().enumerate() {
            self.launch(
                &run_dir.join(format!("kappa9v{velocity}.com")),
                &kappa9_script(&deck, velocity),
                timeout,
            )?;
            info!(
                "{velocity} km/s done! ({}/{})",
                index + 1,
                STANDARD_VTURB.len()
            );
        }

        self.launch(&run_dir.join("kapreadts.com"), &kapreadts_script(&deck), timeout)?;
        require_outputs(&run_dir, &["kappa.ros".to_string()], "KAPREADTS")?;
        info!("Merged all velocities in a single table. Final output saved in kappa.ros");
        validate_dfsynthe(&run_dir)?;
        info!(
            "Finished running DFSYNTHE in {:.1} s",
            started.elapsed().as_secs_f64()
        );

        Ok(OdfRun {
            run_dir,
            temperatures: DFSYNTHE_TEMPERATURES.len(),
            velocities: STANDARD_VTURB.to_vec(),
        })
    }

    /// One DFSYNTHE invocation per temperature node, each in its own scratch
    /// directory. Nodes are independent, so they may run on a worker pool;
    /// all of them finish before this returns.
    fn run_nodes(&self, deck: &DfsyntheDeck<'_>) -> AtlasResult<()> {
        let total = DFSYNTHE_TEMPERATURES.len();
        let done = AtomicUsize::new(0);
        let timeout = self.layout().batch_timeout();
        let run_node = |node: usize| -> AtlasResult<()> {
            let temperature = DFSYNTHE_TEMPERATURES[node];
            let node_dir = deck.run_dir.join(node_directory_name(temperature));
            ensure_directory(&node_dir)?;
            self.launch(
                &node_dir.join("dfp.com"),
                &dfsynthe_node_script(deck, node),
                timeout,
            )?;
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            info!("{temperature:.1} K done! ({finished}/{total})");
            self.report_progress(finished as f64 / total as f64);
            Ok(())
        };

        match self.layout().execution_mode() {
            ExecutionMode::Serial => (0..total).try_for_each(run_node),
            ExecutionMode::Concurrent { workers } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|error| {
                        AtlasError::internal(
                            "SYS.THREAD_POOL",
                            format!("failed to start {workers} DFSYNTHE workers: {error}"),
                        )
                    })?;
                pool.install(|| (0..total).into_par_iter().try_for_each(run_node))
            }
        }
    }
}
