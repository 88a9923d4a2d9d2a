//! Requested-versus-received checks. Each external tool echoes the values it
//! actually read; any difference from the generated control file means a
//! fixed-width field was truncated or misread.

use crate::abundance::AbundanceVector;
use crate::common::elements::element_symbol;
use crate::common::files::{read_text, require_directory};
use crate::domain::{AtlasError, AtlasResult, RunKind};
use crate::metadata::parser::{
    ATLAS_RECEIVED, ATLAS_REQUESTED, DFSYNTHE_RECEIVED, DFSYNTHE_REQUESTED, AbundanceListing,
    ListingQuery, SyntheParameters, parse_listing, received_synthe, received_vturb,
    requested_synthe,
};
use crate::metadata::{latest_synthe_batch, synthe_batch_dir};
use std::path::Path;
use tracing::info;

/// Requested/received file pairs checked for a DFSYNTHE run.
const DFSYNTHE_PAIRS: [(&str, &str); 2] = [("xnfdf.com", "xnfdf.out"), ("kappa9v0.com", "kapm40k2.out")];

fn listing(run_dir: &Path, name: &str, query: &ListingQuery<'_>) -> AtlasResult<AbundanceListing> {
    let content = read_text(&run_dir.join(name), name)?;
    parse_listing(&content, query, name)
}

fn compare(name: impl std::fmt::Display, requested: f64, received: f64) -> AtlasResult<()> {
    if requested == received {
        Ok(())
    } else {
        Err(AtlasError::parameter_mismatch(name, requested, received))
    }
}

fn compare_elements(requested: &AbundanceVector, received: &AbundanceVector) -> AtlasResult<()> {
    for z in 1..requested.values().len() {
        let label = element_symbol(z).map_or_else(|| format!("Element {z}"), |symbol| {
            format!("Element {z} ({symbol})")
        });
        compare(label, requested.get(z), received.get(z))?;
    }
    Ok(())
}

pub fn validate_atlas(run_dir: &Path) -> AtlasResult<()> {
    let requested = listing(run_dir, "atlas_control.com", &ATLAS_REQUESTED)?;
    let main = read_text(&run_dir.join("output_main.out"), "output_main.out")?;
    let received = parse_listing(&main, &ATLAS_RECEIVED, "output_main.out")?;
    let vturb = received_vturb(&main, "output_main.out")?;

    compare_elements(&requested.vector(), &received.vector())?;
    compare(
        "Metallicity",
        requested.param("ABUNDANCE SCALE")?,
        received.param("0XSCALE")?,
    )?;
    compare("Teff", requested.param("SCALE 72/3")?, received.param("TEFF")?)?;
    compare("Log(g)", requested.param("SCALE 72/4")?, received.param("LOG G")?)?;
    compare("Vturb", requested.param("VTURB")?, vturb)?;
    info!(
        "ATLAS requested/received validation for {} successful",
        run_dir.display()
    );
    Ok(())
}

/// Checks the latest SYNTHE batch against the current launcher and returns
/// what SYNTHE received.
pub fn validate_synthe(run_dir: &Path) -> AtlasResult<SyntheParameters> {
    let launcher = read_text(&run_dir.join("synthe_launch.com"), "synthe_launch.com")?;
    let requested = requested_synthe(&launcher, "synthe_launch.com")?;
    let batch_dir = synthe_batch_dir(run_dir, latest_synthe_batch(run_dir));
    let echoed = read_text(&batch_dir.join("synbeg.out"), "synbeg.out")?;
    let received = received_synthe(&echoed, "synbeg.out")?;

    for ((name, wanted), (_, got)) in requested.values().into_iter().zip(received.values()) {
        compare(name, wanted, got)?;
    }
    info!(
        "SYNTHE requested/received validation for {} successful",
        run_dir.display()
    );
    Ok(received)
}

pub fn validate_dfsynthe(run_dir: &Path) -> AtlasResult<()> {
    for (requested_file, received_file) in DFSYNTHE_PAIRS {
        let requested = listing(run_dir, requested_file, &DFSYNTHE_REQUESTED)?;
        let received = listing(run_dir, received_file, &DFSYNTHE_RECEIVED)?;
        compare_elements(&requested.vector(), &received.vector())?;
        compare(
            "Metallicity",
            requested.param("ABUNDANCE SCALE")?,
            received.param("0XSCALE")?,
        )?;
    }
    info!(
        "DFSYNTHE requested/received validation for {} successful",
        run_dir.display()
    );
    Ok(())
}

/// Validates every tool whose control file is present in `run_dir` and
/// returns the kinds that were checked.
pub fn validate_run(run_dir: &Path) -> AtlasResult<Vec<RunKind>> {
    require_directory(run_dir)?;
    let mut checked = Vec::new();
    if run_dir.join("atlas_control.com").is_file() {
        validate_atlas(run_dir)?;
        checked.push(RunKind::Atlas);
    }
    if run_dir.join("synthe_launch.com").is_file() {
        validate_synthe(run_dir)?;
        checked.push(RunKind::Synthe);
    }
    if run_dir.join("xnfdf.com").is_file() {
        validate_dfsynthe(run_dir)?;
        checked.push(RunKind::Dfsynthe);
    }
    Ok(checked)
}
