//! Initial model atmospheres (`fort.3`) for ATLAS.
//!
//! Preparation runs in two phases: [`resolve`] turns a selector into a
//! concrete source, [`load`] turns that source into a temperature profile.
//! The profile is then resampled onto the standard optical-depth grid and
//! written as a unit-opacity model deck.

mod grid;
mod library;
pub mod profile;

pub use grid::{
    CarbonMap, CarbonMapPoint, GRID_AXES, GridHeader, GridPoint, InterpolatedStructure,
    RestartGrid, RestartGridError,
};
pub use library::{LibraryEntry, RestartCache, RestartLibrary};
pub use profile::{RestartProfile, grey_temperature, standard_tau_grid};

use crate::cards::render_model_deck;
use crate::common::files::write_text;
use crate::domain::errors::{INVALID_RESTART, MISSING_TABLE};
use crate::domain::{AtlasError, AtlasResult};
use crate::settings::{InstallLayout, StellarParameters};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RestartSelector {
    Grey,
    /// Nearest model in the configured restart library.
    #[default]
    Auto,
    /// Nearest node of the configured restart grid.
    Grid,
    Path(PathBuf),
}

impl RestartSelector {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "grey" | "gray" => Self::Grey,
            "auto" => Self::Auto,
            "grid" => Self::Grid,
            other => Self::Path(PathBuf::from(other)),
        }
    }
}

impl fmt::Display for RestartSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grey => f.write_str("grey"),
            Self::Auto => f.write_str("auto"),
            Self::Grid => f.write_str("grid"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResolvedRestart {
    Grey,
    Directory(PathBuf),
    File(PathBuf),
    Grid {
        grid: Arc<RestartGrid>,
        point: GridPoint,
    },
}

impl ResolvedRestart {
    pub fn describe(&self) -> String {
        match self {
            Self::Grey => "grey atmosphere".to_string(),
            Self::Directory(path) => format!("run directory {}", path.display()),
            Self::File(path) => format!("model file {}", path.display()),
            Self::Grid { point, .. } => format!(
                "grid node teff={} logg={} zscale={} alpha={} carbon={}",
                point.teff, point.logg, point.zscale, point.alpha, point.carbon
            ),
        }
    }
}

fn from_path(path: &Path) -> AtlasResult<ResolvedRestart> {
    if path.is_dir() {
        Ok(ResolvedRestart::Directory(path.to_path_buf()))
    } else if path.is_file() {
        Ok(ResolvedRestart::File(path.to_path_buf()))
    } else {
        Err(AtlasError::input_validation(
            INVALID_RESTART,
            format!("{} is an invalid choice of restart", path.display()),
        ))
    }
}

pub fn resolve(
    selector: &RestartSelector,
    params: &StellarParameters,
    layout: &InstallLayout,
    cache: &RestartCache,
) -> AtlasResult<ResolvedRestart> {
    match selector {
        RestartSelector::Grey => Ok(ResolvedRestart::Grey),
        RestartSelector::Path(path) => from_path(path),
        RestartSelector::Auto => {
            let library = cache.library(&layout.restart_paths)?;
            let entry = library
                .nearest(params.teff, params.logg, params.zscale)
                .ok_or_else(|| {
                    AtlasError::input_validation(
                        INVALID_RESTART,
                        "no restart models were found in the configured restart paths",
                    )
                })?;
            info!("automatically chosen restart: {}", entry.path.display());
            from_path(&entry.path)
        }
        RestartSelector::Grid => {
            let path = layout.restart_grid.as_ref().ok_or_else(|| {
                AtlasError::input_validation(MISSING_TABLE, "no restart grid is configured")
            })?;
            let grid = cache.grid(path)?;
            let point = grid.nearest_node(params)?;
            let resolved = ResolvedRestart::Grid { grid, point };
            info!("automatically chosen restart: {}", resolved.describe());
            Ok(resolved)
        }
    }
}

pub fn load(resolved: &ResolvedRestart, params: &StellarParameters) -> AtlasResult<RestartProfile> {
    match resolved {
        ResolvedRestart::Grey => Ok(RestartProfile::grey(params.teff)),
        ResolvedRestart::Directory(path) => profile::load_run_directory(path),
        ResolvedRestart::File(path) => profile::load_model_file(path),
        ResolvedRestart::Grid { grid, point } => Ok(grid.restart_profile(point)?),
    }
}

/// Resolves, loads and writes a restart deck to `save_to`.
pub fn prepare_restart(
    selector: &RestartSelector,
    save_to: &Path,
    params: &StellarParameters,
    layout: &InstallLayout,
    cache: &RestartCache,
) -> AtlasResult<ResolvedRestart> {
    let resolved = resolve(selector, params, layout, cache)?;
    let profile = load(&resolved, params)?;
    let deck = profile.restart_deck(params)?;
    write_text(save_to, &render_model_deck(&deck))?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::{
        ResolvedRestart, RestartCache, RestartSelector, load, prepare_restart, profile, resolve,
    };
    use crate::domain::errors::{INVALID_RESTART, MISSING_TABLE};
    use crate::settings::{InstallLayout, StellarParameters};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn selectors_parse_keywords_and_paths() {
        assert_eq!(RestartSelector::parse("gray"), RestartSelector::Grey);
        assert_eq!(RestartSelector::parse("grey"), RestartSelector::Grey);
        assert_eq!(RestartSelector::parse("auto"), RestartSelector::Auto);
        assert_eq!(RestartSelector::parse("grid"), RestartSelector::Grid);
        assert_eq!(
            RestartSelector::parse("runs/sun"),
            RestartSelector::Path(PathBuf::from("runs/sun"))
        );
    }

    #[test]
    fn grey_restart_writes_a_loadable_deck() {
        let temp = TempDir::new().expect("tempdir should be created");
        let target = temp.path().join("restart.dat");
        let params = StellarParameters::default();
        let layout = InstallLayout::rooted_at(temp.path());
        prepare_restart(
            &RestartSelector::Grey,
            &target,
            &params,
            &layout,
            &RestartCache::new(),
        )
        .expect("grey restart should be prepared");

        let reloaded = profile::load_model_file(&target).expect("written deck loads");
        assert_eq!(reloaded.teff, 5770.0);
        assert_eq!(reloaded.tau.len(), 72);
    }

    #[test]
    fn auto_selects_the_nearest_library_model() {
        let temp = TempDir::new().expect("tempdir should be created");
        let library = temp.path().join("restarts");
        fs::create_dir(&library).expect("library dir");
        let cache = RestartCache::new();
        let layout = InstallLayout {
            restart_paths: vec![library.clone()],
            ..InstallLayout::rooted_at(temp.path())
        };
        for (name, teff) in [("cool.dat", 4000.0), ("warm.dat", 6000.0)] {
            let params = StellarParameters {
                teff,
                ..StellarParameters::default()
            };
            prepare_restart(
                &RestartSelector::Grey,
                &library.join(name),
                &params,
                &layout,
                &cache,
            )
            .expect("library model written");
        }

        let params = StellarParameters {
            teff: 5600.0,
            ..StellarParameters::default()
        };
        let resolved = resolve(&RestartSelector::Auto, &params, &layout, &cache)
            .expect("library should resolve");
        match &resolved {
            ResolvedRestart::File(path) => assert!(path.ends_with("warm.dat")),
            other => panic!("unexpected restart {other:?}"),
        }
        let profile = load(&resolved, &params).expect("model should load");
        assert_eq!(profile.teff, 6000.0);
    }

    #[test]
    fn unknown_paths_and_missing_sources_are_rejected() {
        let temp = TempDir::new().expect("tempdir should be created");
        let layout = InstallLayout {
            restart_paths: vec![temp.path().join("empty")],
            restart_grid: None,
            ..InstallLayout::rooted_at(temp.path())
        };
        let params = StellarParameters::default();
        let cache = RestartCache::new();

        let error = resolve(
            &RestartSelector::Path(temp.path().join("nowhere")),
            &params,
            &layout,
            &cache,
        )
        .expect_err("path does not exist");
        assert!(error.is(INVALID_RESTART));

        let error = resolve(&RestartSelector::Auto, &params, &layout, &cache)
            .expect_err("library is empty");
        assert!(error.is(INVALID_RESTART));

        let error = resolve(&RestartSelector::Grid, &params, &layout, &cache)
            .expect_err("no grid configured");
        assert!(error.is(MISSING_TABLE));
    }

    #[test]
    fn grid_restarts_resolve_to_the_nearest_node() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("grid.bin");
        super::grid::tests::affine_grid().save(&path).expect("grid saved");
        let layout = InstallLayout {
            restart_grid: Some(path),
            ..InstallLayout::rooted_at(temp.path())
        };
        let params = StellarParameters {
            teff: 5100.0,
            logg: 3.8,
            zscale: -0.8,
            ..StellarParameters::default()
        };
        let cache = RestartCache::new();
        let resolved = resolve(&RestartSelector::Grid, &params, &layout, &cache)
            .expect("grid should resolve");
        let profile = load(&resolved, &params).expect("grid profile loads");
        assert_eq!(profile.teff, 5000.0);
        assert_eq!(profile.temperature.len(), 72);
        assert!((profile.temperature[0] - (5000.0 - 5.0)).abs() < 1.0e-9);
    }
}
