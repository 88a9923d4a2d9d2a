//! Run-type detection and parameter recovery from the text the external tools
//! leave behind.

pub mod legacy;
pub mod parser;

pub use legacy::ModelHeader;
pub use parser::{
    ATLAS_RECEIVED, ATLAS_REQUESTED, AbundanceListing, DFSYNTHE_RECEIVED, DFSYNTHE_REQUESTED,
    ListingQuery, ListingStyle, SyntheParameters, parse_listing, received_synthe, received_vturb,
    requested_synthe,
};

use crate::abundance::{StandardAbundances, to_standard};
use crate::common::files::{read_text, require_directory};
use crate::domain::errors::{METADATA_FIELD, RUN_TYPE_UNKNOWN};
use crate::domain::{AtlasError, AtlasResult, RunKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parameters recovered from a finished run directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub kind: RunKind,
    pub abundances: StandardAbundances,
    pub teff: Option<f64>,
    pub logg: Option<f64>,
    /// Turbulent velocity of the structure calculation, km/s.
    pub vturb: Option<f64>,
    pub resolution: Option<f64>,
    /// Turbulent velocity of the spectral synthesis, km/s.
    pub synthe_vturb: Option<f64>,
}

fn listing_file(
    run_dir: &Path,
    name: &str,
    query: &ListingQuery<'_>,
) -> AtlasResult<AbundanceListing> {
    let content = read_text(&run_dir.join(name), name)?;
    parse_listing(&content, query, name)
}

fn standard_from(listing: &AbundanceListing, scale_param: &str) -> AtlasResult<StandardAbundances> {
    let scale = listing.param(scale_param)?;
    if scale.is_nan() || scale <= 0.0 {
        return Err(AtlasError::input_validation(
            METADATA_FIELD,
            format!("{scale_param} = {scale} is not a valid abundance scale"),
        ));
    }
    to_standard(&listing.vector(), scale.log10())
}

/// Index of the most recent `synthe_{n}` batch directory, counting from 1.
pub fn latest_synthe_batch(run_dir: &Path) -> usize {
    let mut batch = 1;
    while run_dir.join(format!("synthe_{}", batch + 1)).is_dir() {
        batch += 1;
    }
    batch
}

pub fn synthe_batch_dir(run_dir: &Path, batch: usize) -> PathBuf {
    run_dir.join(format!("synthe_{batch}"))
}

/// Classifies `run_dir` and reads back the parameters it was computed with.
pub fn meta(run_dir: &Path) -> AtlasResult<RunMetadata> {
    require_directory(run_dir)?;
    if run_dir.join("xnfdf.out").is_file() {
        let listing = listing_file(run_dir, "xnfdf.out", &DFSYNTHE_RECEIVED)?;
        return Ok(RunMetadata {
            kind: RunKind::Dfsynthe,
            abundances: standard_from(&listing, "0XSCALE")?,
            teff: None,
            logg: None,
            vturb: None,
            resolution: None,
            synthe_vturb: None,
        });
    }
    if !run_dir.join("output_main.out").is_file() {
        return Err(AtlasError::input_validation(
            RUN_TYPE_UNKNOWN,
            format!("run {} type unknown", run_dir.display()),
        ));
    }

    let content = read_text(&run_dir.join("output_main.out"), "output_main.out")?;
    let listing = parse_listing(&content, &ATLAS_RECEIVED, "output_main.out")?;
    let vturb = match received_vturb(&content, "output_main.out") {
        Ok(value) => Some(value * 1.0e-5),
        Err(error) => {
            debug!("no turbulent velocity in {}: {error}", run_dir.display());
            None
        }
    };
    let mut metadata = RunMetadata {
        kind: RunKind::Atlas,
        abundances: standard_from(&listing, "0XSCALE")?,
        teff: Some(listing.param("TEFF")?),
        logg: Some(listing.param("LOG G")?),
        vturb,
        resolution: None,
        synthe_vturb: None,
    };

    if run_dir.join("synthe_launch.com").is_file() {
        metadata.kind = RunKind::Synthe;
        let batch_dir = synthe_batch_dir(run_dir, latest_synthe_batch(run_dir));
        let received = read_text(&batch_dir.join("synbeg.out"), "synbeg.out")
            .and_then(|content| received_synthe(&content, "synbeg.out"));
        match received {
            Ok(received) => {
                metadata.resolution = Some(received.resolu);
                metadata.synthe_vturb = Some(received.turbv);
            }
            Err(error) => warn!("incomplete SYNTHE output in {}: {error}", run_dir.display()),
        }
    }
    Ok(metadata)
}

/// Header of a standalone model file, in either legacy convention.
pub fn model_file_header(path: &Path) -> AtlasResult<ModelHeader> {
    let content = read_text(path, "model file")?;
    legacy::model_header(&content)
        .or_else(|| legacy::first_line_scan(&content))
        .ok_or_else(|| {
            AtlasError::input_validation(
                METADATA_FIELD,
                format!("{} has no TEFF/GRAVITY/ABUNDANCE SCALE header", path.display()),
            )
        })
}
