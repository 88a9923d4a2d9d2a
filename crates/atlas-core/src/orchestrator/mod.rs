//! Drives ATLAS-9, SYNTHE and DFSYNTHE through their generated launcher
//! scripts. Every external invocation goes through a [`CommandRunner`], and
//! blocks until the tool exits.

mod atlas;
mod dfsynthe;
mod progress;
mod runner;
mod synthe;
pub mod validation;

pub use atlas::{
    AtlasRequest, MAX_AUTO_BATCHES, MIN_IMPROVEMENT, Model, STALL_BATCHES, split_punched_decks,
};
pub use dfsynthe::OdfRun;
pub use progress::{ProgressObserver, read_progress, run_with_progress};
pub use runner::{CommandRunner, ShellRunner};
pub use synthe::{
    SYNTHE_BUFFER_SIZE, SpectrumRequest, SpectrumRun, num_points, wavelength_batches,
};
pub use validation::{validate_atlas, validate_dfsynthe, validate_run, validate_synthe};

use crate::common::files::write_text;
use crate::domain::AtlasResult;
use crate::restart::RestartCache;
use crate::settings::InstallLayout;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Shared context of one orchestration call: where the suite is installed,
/// how scripts are executed, and the restart cache to consult.
#[derive(Clone, Copy)]
pub struct Orchestrator<'a> {
    layout: &'a InstallLayout,
    runner: &'a dyn CommandRunner,
    restarts: &'a RestartCache,
    progress: Option<&'a Path>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        layout: &'a InstallLayout,
        runner: &'a dyn CommandRunner,
        restarts: &'a RestartCache,
    ) -> Self {
        Self {
            layout,
            runner,
            restarts,
            progress: None,
        }
    }

    /// Completion fractions are written to `path` as the run advances, for
    /// [`run_with_progress`] to pick up.
    pub fn with_progress_file(mut self, path: &'a Path) -> Self {
        self.progress = Some(path);
        self
    }

    pub fn layout(&self) -> &'a InstallLayout {
        self.layout
    }

    pub fn restarts(&self) -> &'a RestartCache {
        self.restarts
    }

    /// Writes `content` to `path` and runs it.
    fn launch(&self, path: &Path, content: &str, timeout: Duration) -> AtlasResult<()> {
        write_text(path, content)?;
        self.run(path, timeout)
    }

    fn run(&self, script: &Path, timeout: Duration) -> AtlasResult<()> {
        debug!("running {}", script.display());
        self.runner.run_script(script, timeout)
    }

    fn report_progress(&self, fraction: f64) {
        let Some(path) = self.progress else {
            return;
        };
        if let Err(error) = fs::write(path, format!("{:.4}\n", fraction.clamp(0.0, 1.0))) {
            debug!("could not update {}: {error}", path.display());
        }
    }
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("layout", self.layout)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
