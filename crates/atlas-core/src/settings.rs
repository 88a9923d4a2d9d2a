//! Run parameters and install layout, both loadable from JSON documents.

use crate::abundance::{self, AbundanceVector, StandardAbundances};
use crate::domain::errors::{FIXED_WIDTH_OVERFLOW, FIXED_WIDTH_UNDERFLOW, INVALID_SETTINGS};
use crate::domain::{AtlasError, AtlasResult, ExecutionMode};
use crate::formatting::format_fixed_f64;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Turbulent velocities (km/s) for which opacity tables are tabulated.
pub const STANDARD_VTURB: [u32; 5] = [0, 1, 2, 4, 8];

pub const ABUNDANCE_SCALE_WIDTH: usize = 9;
pub const ABUNDANCE_SCALE_PRECISION: usize = 5;
const ABUNDANCE_SCALE_ROUND_TRIP: f64 = 0.005;

pub const DEFAULT_BATCH_TIMEOUT_SECONDS: u64 = 1200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for AtlasError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Read { .. } => AtlasError::io_system("IO.CONFIG_READ", error.to_string()),
            ConfigError::Parse { .. } => {
                AtlasError::input_validation(INVALID_SETTINGS, error.to_string())
            }
        }
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Physical parameters of one model atmosphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StellarParameters {
    /// Effective temperature in K.
    pub teff: f64,
    /// Surface gravity, log10 of cgs.
    pub logg: f64,
    /// Metallicity [M/H] in dex.
    pub zscale: f64,
    /// `None` keeps the solar He/H number ratio.
    pub helium_mass_fraction: Option<f64>,
    /// Element enhancements [A/M] in dex keyed by chemical symbol.
    pub enhancements: BTreeMap<String, f64>,
    /// Microturbulent velocity in km/s.
    pub vturb: u32,
}

impl Default for StellarParameters {
    fn default() -> Self {
        Self {
            teff: 5770.0,
            logg: 4.44,
            zscale: 0.0,
            helium_mass_fraction: None,
            enhancements: BTreeMap::new(),
            vturb: 2,
        }
    }
}

impl StellarParameters {
    pub fn from_json_file(path: &Path) -> AtlasResult<Self> {
        Ok(load_json(path)?)
    }

    pub fn abundance_scale(&self) -> f64 {
        10.0_f64.powf(self.zscale)
    }

    /// `ABUNDANCE SCALE` field as written to control decks.
    pub fn abundance_scale_card(&self) -> AtlasResult<String> {
        let scale = self.abundance_scale();
        let rendered = format_fixed_f64(scale, ABUNDANCE_SCALE_WIDTH, ABUNDANCE_SCALE_PRECISION);
        if rendered.len() > ABUNDANCE_SCALE_WIDTH {
            return Err(AtlasError::input_validation(
                FIXED_WIDTH_OVERFLOW,
                format!(
                    "abundance scale 10^{} = {} does not fit in {} columns",
                    self.zscale, scale, ABUNDANCE_SCALE_WIDTH
                ),
            ));
        }
        let parsed = rendered.trim().parse::<f64>().unwrap_or(0.0);
        if parsed <= 0.0 || (parsed.log10() - self.zscale).abs() > ABUNDANCE_SCALE_ROUND_TRIP {
            return Err(AtlasError::input_validation(
                FIXED_WIDTH_UNDERFLOW,
                format!(
                    "abundance scale 10^{} renders as '{}' and loses the requested metallicity",
                    self.zscale,
                    rendered.trim()
                ),
            ));
        }
        Ok(rendered)
    }

    pub fn validate(&self) -> AtlasResult<()> {
        if !(self.teff.is_finite() && self.teff > 0.0) {
            return Err(AtlasError::input_validation(
                INVALID_SETTINGS,
                format!("effective temperature must be positive, got {}", self.teff),
            ));
        }
        if !self.logg.is_finite() || !self.zscale.is_finite() {
            return Err(AtlasError::input_validation(
                INVALID_SETTINGS,
                "surface gravity and metallicity must be finite",
            ));
        }
        self.abundance_scale_card()?;
        self.atlas_abundances()?;
        Ok(())
    }

    pub fn atlas_abundances(&self) -> AtlasResult<AbundanceVector> {
        abundance::to_atlas(self.helium_mass_fraction, self.zscale, &self.enhancements)
    }

    pub fn standard_abundances(&self) -> AtlasResult<StandardAbundances> {
        abundance::to_standard(&self.atlas_abundances()?, self.zscale)
    }

    /// Rejects opacity tables computed for a different composition.
    pub fn check_odf(&self, table: &StandardAbundances) -> AtlasResult<()> {
        abundance::check_compatibility(&self.standard_abundances()?, table)
    }

    pub fn enhancement(&self, symbol: &str) -> f64 {
        self.enhancements.get(symbol).copied().unwrap_or(0.0)
    }
}

/// Locations of executables, data tables and restart libraries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallLayout {
    pub bin_dir: PathBuf,
    pub data_dir: PathBuf,
    pub restart_paths: Vec<PathBuf>,
    pub restart_grid: Option<PathBuf>,
    pub default_odf: PathBuf,
    pub shell: String,
    pub timeout_per_batch_seconds: u64,
    pub dfsynthe_workers: usize,
}

impl Default for InstallLayout {
    fn default() -> Self {
        Self::rooted_at(Path::new("."))
    }
}

impl InstallLayout {
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            bin_dir: root.join("bin"),
            data_dir: root.join("data"),
            restart_paths: vec![root.join("restarts")],
            restart_grid: None,
            default_odf: root.join("data").join("solar_ODF"),
            shell: "bash".to_string(),
            timeout_per_batch_seconds: DEFAULT_BATCH_TIMEOUT_SECONDS,
            dfsynthe_workers: 1,
        }
    }

    /// Loads a layout document; relative paths resolve against its directory.
    pub fn from_json_file(path: &Path) -> AtlasResult<Self> {
        let layout: Self = load_json(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(layout.resolved_against(base))
    }

    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        self.bin_dir = resolve(&self.bin_dir);
        self.data_dir = resolve(&self.data_dir);
        self.default_odf = resolve(&self.default_odf);
        self.restart_paths = self.restart_paths.iter().map(|p| resolve(p)).collect();
        self.restart_grid = self.restart_grid.as_deref().map(resolve);
        self
    }

    pub fn atlas_files(&self) -> PathBuf {
        self.data_dir.join("atlas_files")
    }

    pub fn synthe_files(&self) -> PathBuf {
        self.data_dir.join("synthe_files")
    }

    pub fn dfsynthe_files(&self) -> PathBuf {
        self.data_dir.join("dfsynthe_files")
    }

    pub fn executable(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_per_batch_seconds)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::from_workers(self.dfsynthe_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::{InstallLayout, StellarParameters};
    use crate::domain::ExecutionMode;
    use crate::domain::errors::{FIXED_WIDTH_OVERFLOW, FIXED_WIDTH_UNDERFLOW, INVALID_SETTINGS};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn solar_defaults_validate() {
        let params = StellarParameters::default();
        params.validate().expect("solar parameters should validate");
        assert_eq!(
            params.abundance_scale_card().expect("scale renders"),
            "  1.00000"
        );
    }

    #[test]
    fn abundance_scale_rejects_overflow_and_underflow() {
        let rich = StellarParameters {
            zscale: 4.0,
            ..StellarParameters::default()
        };
        assert!(
            rich.abundance_scale_card()
                .expect_err("10^4 needs ten columns")
                .is(FIXED_WIDTH_OVERFLOW)
        );

        let poor = StellarParameters {
            zscale: -6.0,
            ..StellarParameters::default()
        };
        assert!(
            poor.abundance_scale_card()
                .expect_err("10^-6 renders as zero")
                .is(FIXED_WIDTH_UNDERFLOW)
        );

        let lossy = StellarParameters {
            zscale: -4.9,
            ..StellarParameters::default()
        };
        assert!(
            lossy
                .abundance_scale_card()
                .expect_err("0.00001 no longer encodes -4.9 dex")
                .is(FIXED_WIDTH_UNDERFLOW)
        );
    }

    #[test]
    fn stellar_parameters_load_from_camel_case_json() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("star.json");
        fs::write(
            &path,
            r#"{"teff": 4500, "logg": 1.5, "zscale": -1.0, "heliumMassFraction": 0.26,
                "enhancements": {"Mg": 0.4}, "vturb": 1}"#,
        )
        .expect("settings should be written");

        let params = StellarParameters::from_json_file(&path).expect("settings should load");
        assert_eq!(params.teff, 4500.0);
        assert_eq!(params.helium_mass_fraction, Some(0.26));
        assert_eq!(params.enhancement("Mg"), 0.4);
        assert_eq!(params.enhancement("Fe"), 0.0);
        assert_eq!(params.vturb, 1);
    }

    #[test]
    fn malformed_settings_are_input_errors() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("star.json");
        fs::write(&path, "{ teff: }").expect("settings should be written");
        let error = StellarParameters::from_json_file(&path).expect_err("parse should fail");
        assert!(error.is(INVALID_SETTINGS));

        let error = StellarParameters::from_json_file(&temp.path().join("missing.json"))
            .expect_err("read should fail");
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn layout_resolves_relative_paths_against_document() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("basic-atlas.json");
        fs::write(
            &path,
            r#"{"binDir": "bin", "restartPaths": ["lib", "/abs/restarts"], "dfsyntheWorkers": 4}"#,
        )
        .expect("layout should be written");

        let layout = InstallLayout::from_json_file(&path).expect("layout should load");
        assert_eq!(layout.bin_dir, temp.path().join("bin"));
        assert_eq!(layout.restart_paths[0], temp.path().join("lib"));
        assert_eq!(layout.restart_paths[1], Path::new("/abs/restarts"));
        assert_eq!(layout.shell, "bash");
        assert_eq!(layout.timeout_per_batch_seconds, 1200);
        assert_eq!(layout.execution_mode(), ExecutionMode::Concurrent { workers: 4 });
        assert_eq!(
            layout.dfsynthe_files(),
            temp.path().join("data").join("dfsynthe_files")
        );
    }
}
