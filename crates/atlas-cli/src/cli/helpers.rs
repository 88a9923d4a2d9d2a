use super::{CliError, GlobalOptions};
use anyhow::Context;
use atlas_core::domain::AtlasResult;
use atlas_core::orchestrator::{ProgressObserver, run_with_progress};
use atlas_core::settings::{InstallLayout, StellarParameters};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(super) const LAYOUT_FILE_NAME: &str = "basic-atlas.json";

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `--config` when given, else `./basic-atlas.json` when present, else the
/// default layout rooted at the working directory.
pub(super) fn load_layout(global: &GlobalOptions) -> Result<InstallLayout, CliError> {
    if let Some(path) = &global.config {
        return InstallLayout::from_json_file(path).map_err(CliError::Compute);
    }
    let local = Path::new(LAYOUT_FILE_NAME);
    if local.is_file() {
        return InstallLayout::from_json_file(local).map_err(CliError::Compute);
    }
    Ok(InstallLayout::default())
}

pub(super) fn load_parameters(settings: Option<&Path>) -> Result<StellarParameters, CliError> {
    match settings {
        Some(path) => StellarParameters::from_json_file(path).map_err(CliError::Compute),
        None => Ok(StellarParameters::default()),
    }
}

/// Parses `SYMBOL=DEX`.
pub(super) fn parse_enhancement(value: &str) -> Result<(String, f64), String> {
    let (symbol, dex) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=DEX, got '{value}'"))?;
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(format!("missing element symbol in '{value}'"));
    }
    let dex = dex
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid enhancement '{dex}': {error}"))?;
    Ok((symbol.to_string(), dex))
}

pub(super) fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to serialize command output")?;
    println!("{rendered}");
    Ok(())
}

struct BarObserver {
    bar: ProgressBar,
}

impl ProgressObserver for BarObserver {
    fn report(&mut self, fraction: f64) {
        self.bar.set_position((fraction * 100.0).round() as u64);
    }
}

fn progress_bar(label: &str, quiet: bool) -> ProgressBar {
    if quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {msg:<10} [{bar:40.cyan/blue}] {pos:>3}% {elapsed_precise}")
            .expect("invalid template")
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

fn progress_file(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "basic-atlas-{}-{}.progress",
        label.to_ascii_lowercase(),
        std::process::id()
    ))
}

/// Runs one orchestration call on a worker thread while a progress bar
/// follows the fractions it writes to a scratch progress file.
pub(super) fn with_progress<T, F>(label: &str, quiet: bool, invocation: F) -> AtlasResult<T>
where
    T: Send,
    F: FnOnce(&Path) -> AtlasResult<T> + Send,
{
    let path = progress_file(label);
    let _ = std::fs::remove_file(&path);
    let mut observer = BarObserver {
        bar: progress_bar(label, quiet),
    };
    let worker_path = path.clone();
    let outcome = run_with_progress(
        move || invocation(&worker_path),
        &path,
        PROGRESS_POLL_INTERVAL,
        &mut observer,
    );
    observer.bar.finish_and_clear();
    let _ = std::fs::remove_file(&path);
    outcome
}
