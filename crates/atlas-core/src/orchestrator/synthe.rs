use super::Orchestrator;
use super::validation::validate_synthe;
use crate::artifacts::write_spectrum_csv;
use crate::cards::{SYNTHE_PREAMBLE, SyntheRequest, synthe_launch_script};
use crate::common::files::{canonical, read_text, require_directory, write_text};
use crate::domain::errors::{INVALID_SETTINGS, MISSING_OUTPUT, MISSING_TABLE};
use crate::domain::{AtlasError, AtlasResult};
use crate::metadata::{SyntheParameters, synthe_batch_dir};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Wavelength points SYNTHE can hold in one calculation.
pub const SYNTHE_BUFFER_SIZE: u64 = 2_010_001;

const BISECTION_STEPS: usize = 200;

/// Number of wavelength points SYNTHE samples between `min_wl` and `max_wl`
/// (nm) at resolving power `resolution`.
pub fn num_points(min_wl: f64, max_wl: f64, resolution: f64) -> u64 {
    let ratio_log = (1.0 + 1.0 / resolution).ln();
    let first = (min_wl.ln() / ratio_log).floor();
    let last = (max_wl.ln() / ratio_log).floor();
    (last - first + 1.0).max(0.0) as u64
}

/// Largest wavelength in `(start, max_wl]` whose batch still fits the buffer,
/// found by bisection on the point count and floored to whole nanometres.
fn batch_end(start: f64, max_wl: f64, resolution: f64, buffer_size: u64) -> AtlasResult<f64> {
    let (mut low, mut high) = (start, max_wl);
    for _ in 0..BISECTION_STEPS {
        let middle = 0.5 * (low + high);
        if num_points(start, middle, resolution) > buffer_size {
            high = middle;
        } else {
            low = middle;
        }
        if high - low < 1.0e-9 {
            break;
        }
    }
    let end = low.floor();
    if end <= start {
        return Err(AtlasError::input_validation(
            INVALID_SETTINGS,
            format!(
                "requested resolution {resolution} is too high for a buffer of {buffer_size} points"
            ),
        ));
    }
    Ok(end)
}

/// Splits `[min_wl, max_wl]` into consecutive batches of at most
/// `buffer_size` points each.
pub fn wavelength_batches(
    min_wl: f64,
    max_wl: f64,
    resolution: f64,
    buffer_size: u64,
) -> AtlasResult<Vec<(f64, f64)>> {
    if !(min_wl.is_finite() && max_wl.is_finite()) || min_wl <= 0.0 || max_wl <= min_wl {
        return Err(AtlasError::input_validation(
            INVALID_SETTINGS,
            format!("invalid wavelength range ({min_wl}, {max_wl})"),
        ));
    }
    if !resolution.is_finite() || resolution <= 0.0 || buffer_size == 0 {
        return Err(AtlasError::input_validation(
            INVALID_SETTINGS,
            format!("invalid resolution {resolution} or buffer size {buffer_size}"),
        ));
    }
    let mut batches = Vec::new();
    let mut start = min_wl;
    loop {
        if num_points(start, max_wl, resolution) <= buffer_size {
            batches.push((start, max_wl));
            return Ok(batches);
        }
        let end = batch_end(start, max_wl, resolution, buffer_size)?;
        batches.push((start, end));
        start = end;
    }
}

/// One spectral synthesis over an existing ATLAS run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumRequest {
    /// nm
    pub min_wl: f64,
    /// nm
    pub max_wl: f64,
    pub resolution: f64,
    /// km/s
    pub vturb: f64,
    pub buffer_size: u64,
}

impl SpectrumRequest {
    pub fn new(min_wl: f64, max_wl: f64) -> Self {
        Self {
            min_wl,
            max_wl,
            resolution: 600_000.0,
            vturb: 0.0,
            buffer_size: SYNTHE_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumRun {
    pub run_dir: PathBuf,
    pub batches: Vec<(f64, f64)>,
    pub points: usize,
    #[serde(skip)]
    pub received: Option<SyntheParameters>,
}

/// Writes `output_synthe.out` once; later syntheses reuse it.
fn prepare_synthe_model(run_dir: &Path) -> AtlasResult<()> {
    let target = run_dir.join("output_synthe.out");
    if target.is_file() {
        info!("The ATLAS-9 model has already been adapted to SYNTHE");
        return Ok(());
    }
    let summary = read_text(&run_dir.join("output_summary.out"), "output_summary.out")?;
    write_text(&target, &format!("{SYNTHE_PREAMBLE}{summary}"))?;
    info!("Adapted the ATLAS-9 model to SYNTHE in output_synthe.out");
    Ok(())
}

impl Orchestrator<'_> {
    /// Synthesizes the emergent spectrum of the model in `run_dir` and
    /// collects it in `spectrum.dat`.
    pub fn synthe(&self, run_dir: &Path, request: &SpectrumRequest) -> AtlasResult<SpectrumRun> {
        let started = Instant::now();
        require_directory(run_dir)?;
        let run_dir = canonical(run_dir)?;
        for name in ["output_main.out", "output_summary.out"] {
            if !run_dir.join(name).is_file() {
                return Err(AtlasError::input_validation(
                    MISSING_TABLE,
                    format!("ATLAS run output not found in {}", run_dir.display()),
                ));
            }
        }
        let batches = wavelength_batches(
            request.min_wl,
            request.max_wl,
            request.resolution,
            request.buffer_size,
        )?;
        prepare_synthe_model(&run_dir)?;

        let layout = self.layout();
        let launcher = run_dir.join("synthe_launch.com");
        let mut received = None;
        for (index, (wlbeg, wlend)) in batches.iter().copied().enumerate() {
            let batch = index + 1;
            let card = SyntheRequest::new(wlbeg, wlend, request.resolution, request.vturb);
            let script = synthe_launch_script(
                &run_dir,
                &layout.bin_dir,
                &layout.synthe_files(),
                batch,
                &card,
            )?;
            info!(
                "Launcher created for wavelength range ({wlbeg}, {wlend}), batch {batch}. \
                 Expected number of points: {} (buffer {})",
                num_points(wlbeg, wlend, request.resolution),
                request.buffer_size
            );
            self.launch(&launcher, &script, layout.batch_timeout())?;
            if !synthe_batch_dir(&run_dir, batch).join("spectrum.asc").is_file() {
                return Err(AtlasError::computation(
                    MISSING_OUTPUT,
                    format!("SYNTHE did not output spectrum.asc for batch {batch}"),
                ));
            }
            info!("SYNTHE halted");
            self.report_progress(batch as f64 / batches.len() as f64);
            received = Some(validate_synthe(&run_dir)?);
        }

        let points = write_spectrum_csv(&run_dir, batches.len())?;
        info!("Total data points: {points}");
        info!("Saved the spectrum in spectrum.dat");
        info!(
            "Finished running SYNTHE in {:.1} s",
            started.elapsed().as_secs_f64()
        );
        Ok(SpectrumRun {
            run_dir,
            batches,
            points,
            received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SYNTHE_BUFFER_SIZE, num_points, wavelength_batches};
    use crate::domain::errors::INVALID_SETTINGS;

    fn closed_form(min_wl: f64, max_wl: f64, resolution: f64) -> u64 {
        let ratio = 1.0 + 1.0 / resolution;
        ((max_wl.ln() / ratio.ln()).floor() - (min_wl.ln() / ratio.ln()).floor() + 1.0) as u64
    }

    #[test]
    fn point_count_follows_the_logarithmic_grid() {
        assert_eq!(num_points(500.0, 600.0, 600000.0), closed_form(500.0, 600.0, 600000.0));
        let expected = (600000.0_f64 * (600.0_f64 / 500.0).ln()).round() as i64;
        assert!((num_points(500.0, 600.0, 600000.0) as i64 - expected).abs() <= 2);
        assert_eq!(num_points(500.0, 500.0, 1000.0), 1);
    }

    #[test]
    fn narrow_ranges_fit_in_one_batch() {
        let batches = wavelength_batches(500.0, 600.0, 600000.0, SYNTHE_BUFFER_SIZE)
            .expect("range should batch");
        assert_eq!(batches, vec![(500.0, 600.0)]);
    }

    #[test]
    fn wide_ranges_are_split_below_the_buffer_size() {
        let (min_wl, max_wl, resolution) = (300.0, 2500.0, 2_000_000.0);
        let batches = wavelength_batches(min_wl, max_wl, resolution, SYNTHE_BUFFER_SIZE)
            .expect("range should batch");
        assert!(batches.len() > 1);
        assert_eq!(batches[0].0, min_wl);
        assert_eq!(batches.last().map(|batch| batch.1), Some(max_wl));
        for pair in batches.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
            assert_eq!(pair[0].1.fract(), 0.0);
        }
        for (start, end) in &batches {
            assert!(num_points(*start, *end, resolution) <= SYNTHE_BUFFER_SIZE);
        }
    }

    #[test]
    fn impossible_buffers_are_rejected() {
        let error = wavelength_batches(500.0, 600.0, 600000.0, 10).expect_err("buffer too small");
        assert!(error.is(INVALID_SETTINGS));
        let error = wavelength_batches(600.0, 500.0, 600000.0, 10).expect_err("reversed range");
        assert!(error.is(INVALID_SETTINGS));
    }
}
