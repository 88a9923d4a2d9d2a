//! Temperature profiles on the standard 72-layer Rosseland optical-depth grid.

use crate::artifacts::read_structure;
use crate::cards::{DeckLayer, ModelDeck};
use crate::common::files::read_text;
use crate::domain::errors::INVALID_RESTART;
use crate::domain::{AtlasError, AtlasResult};
use crate::metadata::meta;
use crate::settings::StellarParameters;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

pub const LAYER_COUNT: usize = 72;
pub const TAU_LOG_MIN: f64 = -6.875;
pub const TAU_LOG_MAX: f64 = 2.0;

static TEFF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TEFF *([0-9.eE-]+)").expect("static pattern"));
static STRUCTURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)FLX...,VCONV,VELSND(.+)PRADK").expect("static pattern")
});

/// `logspace(-6.875, 2, 72)`.
pub fn standard_tau_grid() -> Vec<f64> {
    let step = (TAU_LOG_MAX - TAU_LOG_MIN) / (LAYER_COUNT - 1) as f64;
    (0..LAYER_COUNT)
        .map(|layer| 10.0_f64.powf(TAU_LOG_MIN + step * layer as f64))
        .collect()
}

/// Two-stream grey atmosphere, `T = Teff (3/4 (tau + 2/3))^(1/4)`.
pub fn grey_temperature(teff: f64, tau: f64) -> f64 {
    teff * (0.75 * (tau + 2.0 / 3.0)).powf(0.25)
}

/// Temperature as a function of Rosseland optical depth, from any restart
/// source.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartProfile {
    pub teff: f64,
    pub tau: Vec<f64>,
    pub temperature: Vec<f64>,
}

impl RestartProfile {
    pub fn grey(teff: f64) -> Self {
        let tau = standard_tau_grid();
        let temperature = tau.iter().map(|value| grey_temperature(teff, *value)).collect();
        Self {
            teff,
            tau,
            temperature,
        }
    }

    /// Builds the optical-depth axis by integrating opacity over mass column
    /// density with the trapezoid rule.
    pub fn from_column_density(
        teff: f64,
        rhox: &[f64],
        temperature: &[f64],
        opacity: &[f64],
    ) -> AtlasResult<Self> {
        if rhox.is_empty() || rhox.len() != temperature.len() || rhox.len() != opacity.len() {
            return Err(AtlasError::input_validation(
                INVALID_RESTART,
                format!(
                    "restart structure columns have inconsistent lengths ({}, {}, {})",
                    rhox.len(),
                    temperature.len(),
                    opacity.len()
                ),
            ));
        }
        let mut tau = Vec::with_capacity(rhox.len());
        let mut running = rhox[0] * opacity[0];
        tau.push(running);
        for layer in 1..rhox.len() {
            running += 0.5 * (opacity[layer] + opacity[layer - 1]) * (rhox[layer] - rhox[layer - 1]);
            tau.push(running);
        }
        Ok(Self {
            teff,
            tau,
            temperature: temperature.to_vec(),
        })
    }

    /// Temperature on the standard grid, interpolated linearly in `log10(tau)`
    /// and held constant beyond the ends of the source profile.
    pub fn resampled_temperature(&self) -> AtlasResult<Vec<f64>> {
        if self.tau.is_empty() || self.tau.len() != self.temperature.len() {
            return Err(AtlasError::input_validation(
                INVALID_RESTART,
                "restart profile is empty or has mismatched columns",
            ));
        }
        if self.tau.iter().any(|value| value.is_nan() || *value <= 0.0)
            || self.tau.windows(2).any(|pair| pair[1] <= pair[0])
        {
            return Err(AtlasError::input_validation(
                INVALID_RESTART,
                "restart optical depths must be positive and strictly increasing",
            ));
        }
        let source: Vec<f64> = self.tau.iter().map(|value| value.log10()).collect();
        Ok(standard_tau_grid()
            .iter()
            .map(|target| interpolate_clamped(&source, &self.temperature, target.log10()))
            .collect())
    }

    /// Restart layers with unit opacity; the column density is chosen so that
    /// the layers reproduce the standard optical-depth grid exactly.
    pub fn deck_layers(&self) -> AtlasResult<Vec<DeckLayer>> {
        let temperature = self.resampled_temperature()?;
        let tau = standard_tau_grid();
        let opacity = vec![1.0; LAYER_COUNT];
        let mut rhox = Vec::with_capacity(LAYER_COUNT);
        rhox.push(tau[0] / opacity[0]);
        for layer in 1..LAYER_COUNT {
            let step = (tau[layer] - tau[layer - 1]) / (opacity[layer] + opacity[layer - 1]) * 2.0;
            rhox.push(rhox[layer - 1] + step);
        }
        Ok((0..LAYER_COUNT)
            .map(|layer| DeckLayer {
                rhox: rhox[layer],
                temperature: temperature[layer],
                opacity: opacity[layer],
                ..DeckLayer::default()
            })
            .collect())
    }

    pub fn restart_deck(&self, params: &StellarParameters) -> AtlasResult<ModelDeck> {
        Ok(ModelDeck {
            teff: self.teff,
            logg: params.logg,
            abundance_scale: params.abundance_scale(),
            abundances: params.atlas_abundances()?,
            layers: self.deck_layers()?,
            pradk: 0.0,
        })
    }
}

pub(crate) fn interpolate_clamped(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }
    let upper = xs.partition_point(|value| *value <= x);
    let lower = upper - 1;
    let weight = (x - xs[lower]) / (xs[upper] - xs[lower]);
    ys[lower] + weight * (ys[upper] - ys[lower])
}

/// Reads a single model file in `output_summary.out` layout.
pub fn load_model_file(path: &Path) -> AtlasResult<RestartProfile> {
    let content = read_text(path, "restart model")?;
    let invalid = || {
        AtlasError::input_validation(
            INVALID_RESTART,
            format!("{} is not a valid restart file", path.display()),
        )
    };

    let teff_matches: Vec<_> = TEFF_PATTERN.captures_iter(&content).collect();
    let structure_matches: Vec<_> = STRUCTURE_PATTERN.captures_iter(&content).collect();
    if teff_matches.len() != 1 || structure_matches.len() != 1 {
        return Err(invalid());
    }
    let teff: f64 = teff_matches[0][1].parse().map_err(|_| invalid())?;

    let mut rhox = Vec::new();
    let mut temperature = Vec::new();
    let mut opacity = Vec::new();
    for line in structure_matches[0][1].lines().filter(|line| !line.trim().is_empty()) {
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        if fields.len() < 5 {
            return Err(invalid());
        }
        rhox.push(fields[0]);
        temperature.push(fields[1]);
        opacity.push(fields[4]);
    }
    RestartProfile::from_column_density(teff, &rhox, &temperature, &opacity)
}

/// Reads the final structure of a previous ATLAS run directory.
pub fn load_run_directory(run_dir: &Path) -> AtlasResult<RestartProfile> {
    let structure = read_structure(run_dir)?;
    let teff = meta(run_dir)?.teff.ok_or_else(|| {
        AtlasError::input_validation(
            INVALID_RESTART,
            format!("{} does not report an effective temperature", run_dir.display()),
        )
    })?;
    Ok(RestartProfile {
        teff,
        tau: structure.required("rosseland_optical_depth")?.to_vec(),
        temperature: structure.required("temperature")?.to_vec(),
    })
}
