use super::{abundance_cards, free_format};
use crate::abundance::AbundanceVector;
use std::path::Path;

/// Iterations per ATLAS batch; one convergence checkpoint per batch.
pub const ATLAS_BATCH_ITERATIONS: u32 = 15;

/// Inputs of the ATLAS control deck.
#[derive(Debug, Clone, Copy)]
pub struct AtlasControl<'a> {
    pub run_dir: &'a Path,
    pub executable: &'a Path,
    pub teff: f64,
    pub logg: f64,
    pub vturb: u32,
    pub scale_card: &'a str,
    pub abundances: &'a AbundanceVector,
    pub iterations: &'a str,
}

pub fn atlas_start_script(run_dir: &Path, molecules: &Path) -> String {
    format!(
        "cd {run}\n\
         ln -s odf_1.ros fort.1\n\
         ln -s odf_9.bdf fort.9\n\
         ln -s {molecules} fort.2\n\
         cp restart.dat fort.3\n",
        run = run_dir.display(),
        molecules = molecules.display(),
    )
}

/// Feeds the control deck to ATLAS. The main log is appended so that
/// consecutive batches accumulate; every punched model is appended to
/// `output_punch.out`.
pub fn atlas_control_script(control: &AtlasControl<'_>) -> String {
    format!(
        "cd {run}\n\
         {exe}<<\"EOF\">>output_main.out\n\
         READ KAPPA\n\
         READ PUNCH\n\
         MOLECULES ON\n\
         READ MOLECULES\n\
         FREQUENCIES 337 1 337 BIG\n\
         VTURB {vturb}.0E+5\n\
         CONVECTION OVER 1.25 0 36\n\
         TITLE  [0.0] VTURB={vturb}  L/H=1.25 NOVER NEW ODF\n\
         SCALE 72 -6.875 0.125 {teff} {logg}\n\
         {abundances}\n\
         {iterations}\
         END\n\
         EOF\n\
         cat fort.7 >> output_punch.out\n\
         rm -f fort.7\n",
        run = control.run_dir.display(),
        exe = control.executable.display(),
        vturb = control.vturb,
        teff = free_format(control.teff),
        logg = free_format(control.logg),
        abundances = abundance_cards(control.scale_card, control.abundances),
        iterations = control.iterations,
    )
}

pub fn atlas_end_script(run_dir: &Path) -> String {
    format!("cd {}\nrm -f fort.*\n", run_dir.display())
}

/// Iteration cards: `Some(n)` splits `n` into 15-iteration blocks plus a
/// remainder; `None` or `Some(0)` (automatic mode) issues a single
/// 15-iteration block.
pub fn iteration_blocks(niter: Option<u32>) -> String {
    let block = |count: u32| {
        format!(
            "ITERATIONS {count} PRINT{print}\nPUNCH{punch}\nBEGIN                    ITERATION  10 COMPLETED\n",
            print = " 1".repeat(ATLAS_BATCH_ITERATIONS as usize),
            punch = " 1".repeat(ATLAS_BATCH_ITERATIONS as usize),
        )
    };
    match niter {
        None | Some(0) => block(ATLAS_BATCH_ITERATIONS),
        Some(total) => {
            let mut cards = block(ATLAS_BATCH_ITERATIONS)
                .repeat((total / ATLAS_BATCH_ITERATIONS) as usize);
            if total % ATLAS_BATCH_ITERATIONS != 0 {
                cards.push_str(&block(total % ATLAS_BATCH_ITERATIONS));
            }
            cards
        }
    }
}
