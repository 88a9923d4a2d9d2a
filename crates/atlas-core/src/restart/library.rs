use super::grid::RestartGrid;
use crate::domain::errors::MISSING_TABLE;
use crate::domain::{AtlasError, AtlasResult};
use crate::metadata::legacy::model_header;
use crate::metadata::meta;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Files in a restart directory that can never hold a model deck.
const IGNORED_FILES: [&str; 6] = [".*", "*.bin", "*.bdf", "*.ros", "*.h5", "*.gz"];

const TEFF_SPAN: f64 = 7000.0;
const LOGG_SPAN: f64 = 6.0;
const ZSCALE_SPAN: f64 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub path: PathBuf,
    pub teff: f64,
    pub logg: f64,
    pub zscale: f64,
}

impl LibraryEntry {
    fn distance(&self, teff: f64, logg: f64, zscale: f64) -> f64 {
        ((self.teff - teff) / TEFF_SPAN).powi(2)
            + ((self.logg - logg) / LOGG_SPAN).powi(2)
            + ((self.zscale - zscale) / ZSCALE_SPAN).powi(2)
    }
}

/// Index of candidate restarts found under the configured search paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestartLibrary {
    entries: Vec<LibraryEntry>,
}

fn ignored_files() -> AtlasResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in IGNORED_FILES {
        let glob = Glob::new(pattern).map_err(|source| {
            AtlasError::internal("SYS.GLOB", format!("invalid pattern '{pattern}': {source}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|source| AtlasError::internal("SYS.GLOB", source.to_string()))
}

impl RestartLibrary {
    pub fn from_entries(entries: Vec<LibraryEntry>) -> Self {
        Self { entries }
    }

    /// Scans every search path one level deep. Run directories are indexed
    /// through their metadata, loose files through their model header.
    pub fn scan(paths: &[PathBuf]) -> AtlasResult<Self> {
        let ignored = ignored_files()?;
        let unique: BTreeSet<&PathBuf> = paths.iter().collect();
        let mut entries = Vec::new();
        for root in unique {
            let listing = match fs::read_dir(root) {
                Ok(listing) => listing,
                Err(error) => {
                    warn!("skipping restart path {}: {error}", root.display());
                    continue;
                }
            };
            let mut candidates: Vec<PathBuf> =
                listing.filter_map(|entry| entry.ok().map(|entry| entry.path())).collect();
            candidates.sort();
            for candidate in candidates {
                if let Some(entry) = index_candidate(&candidate, &ignored) {
                    entries.push(entry);
                }
            }
        }
        debug!("indexed {} restart candidates", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry at the smallest normalized parameter distance.
    pub fn nearest(&self, teff: f64, logg: f64, zscale: f64) -> Option<&LibraryEntry> {
        let mut best: Option<(&LibraryEntry, f64)> = None;
        for entry in &self.entries {
            let distance = entry.distance(teff, logg, zscale);
            if best.is_none_or(|(_, current)| distance < current) {
                best = Some((entry, distance));
            }
        }
        best.map(|(entry, _)| entry)
    }
}

fn index_candidate(candidate: &Path, ignored: &GlobSet) -> Option<LibraryEntry> {
    if candidate.is_dir() {
        if !candidate.join("output_summary.out").is_file() {
            return None;
        }
        return match meta(candidate) {
            Ok(metadata) => Some(LibraryEntry {
                path: candidate.to_path_buf(),
                teff: metadata.teff?,
                logg: metadata.logg?,
                zscale: metadata.abundances.metallicity_scale,
            }),
            Err(error) => {
                warn!("skipping restart directory {}: {error}", candidate.display());
                None
            }
        };
    }
    let name = candidate.file_name()?;
    if ignored.is_match(Path::new(name)) {
        return None;
    }
    let content = fs::read_to_string(candidate).ok()?;
    let header = model_header(&content)?;
    if header.abundance_scale.is_nan() || header.abundance_scale <= 0.0 {
        return None;
    }
    Some(LibraryEntry {
        path: candidate.to_path_buf(),
        teff: header.teff,
        logg: header.logg,
        zscale: header.abundance_scale.log10(),
    })
}

/// Memoized restart sources. Entries live until [`RestartCache::invalidate`].
#[derive(Debug, Default)]
pub struct RestartCache {
    libraries: RwLock<HashMap<Vec<PathBuf>, Arc<RestartLibrary>>>,
    grids: RwLock<HashMap<PathBuf, Arc<RestartGrid>>>,
}

impl RestartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(&self, paths: &[PathBuf]) -> AtlasResult<Arc<RestartLibrary>> {
        let key: Vec<PathBuf> = paths
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Some(library) = self
            .libraries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(library));
        }
        let library = Arc::new(RestartLibrary::scan(&key)?);
        self.libraries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&library));
        Ok(library)
    }

    pub fn grid(&self, path: &Path) -> AtlasResult<Arc<RestartGrid>> {
        if let Some(grid) = self
            .grids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(grid));
        }
        if !path.is_file() {
            return Err(AtlasError::input_validation(
                MISSING_TABLE,
                format!("restart grid {} does not exist", path.display()),
            ));
        }
        let grid = Arc::new(RestartGrid::load(path)?);
        self.grids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), Arc::clone(&grid));
        Ok(grid)
    }

    pub fn invalidate(&self) {
        self.libraries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.grids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
