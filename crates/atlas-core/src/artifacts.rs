//! Text and CSV artifacts of finished runs: the converted model and spectrum
//! tables, and the structure profiles read back from ATLAS output.

use crate::common::files::{read_text, require_directory};
use crate::domain::errors::MISSING_OUTPUT;
use crate::domain::{AtlasError, AtlasResult};
use crate::metadata::synthe_batch_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MODEL_CSV_HEADER: [&str; 3] = [
    "# Mass Column Density [g cm^-2]",
    "Temperature [K]",
    "Pressure [Bar]",
];

pub const SPECTRUM_CSV_HEADER: [&str; 4] = [
    "# Wavelength [A]",
    "Line intensity [erg s^-1 cm^-2 A^-1 strad^-1]",
    "Continuum intensity [erg s^-1 cm^-2 A^-1 strad^-1]",
    "Intensity ratio",
];

/// Ba to bar.
const PRESSURE_TO_BAR: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub rhox: f64,
    pub temperature: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRow {
    pub wavelength: f64,
    pub line: f64,
    pub continuum: f64,
    pub ratio: f64,
}

/// A binned or raw spectrum in column form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub line: Vec<f64>,
    pub continuum: Vec<f64>,
    pub ratio: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub unit: &'static str,
    pub values: Vec<f64>,
}

/// Named per-layer profiles, outermost layer first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureProfiles {
    pub profiles: BTreeMap<&'static str, Profile>,
}

impl StructureProfiles {
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.profiles.get(name).map(|profile| profile.values.as_slice())
    }

    pub fn required(&self, name: &str) -> AtlasResult<&[f64]> {
        self.get(name).ok_or_else(|| {
            AtlasError::computation(MISSING_OUTPUT, format!("structure profile {name} is missing"))
        })
    }

    pub fn layer_count(&self) -> usize {
        self.profiles
            .values()
            .map(|profile| profile.values.len())
            .max()
            .unwrap_or(0)
    }
}

const SUMMARY_PROFILES: [(&str, &str, usize); 9] = [
    ("temperature", "K", 1),
    ("gas_pressure", "Ba", 2),
    ("electron_number_density", "cm^-3", 3),
    ("rosseland_opacity", "cm^2 g^-1", 4),
    ("radiative_acceleration", "cm s^-2", 5),
    ("turbulent_velocity", "cm s^-1", 6),
    ("radiative_flux", "erg cm^-2 s^-1", 7),
    ("convective_speed", "cm s^-1", 8),
    ("speed_of_sound", "cm s^-1", 9),
];

const ITERATION_PROFILES: [(&str, &str, usize); 8] = [
    ("mass_column_density", "g cm^-2", 1),
    ("density", "g cm^-3", 5),
    ("physical_depth", "km", 7),
    ("rosseland_optical_depth", "", 8),
    ("convective_flux", "erg cm^-2 s^-1", 9),
    ("radiation_pressure", "Ba", 10),
    ("flux_error", "percent", 11),
    ("flux_error_derivative", "percent", 12),
];

fn csv_error(path: &Path, error: csv::Error) -> AtlasError {
    AtlasError::io_system("IO.CSV", format!("{}: {error}", path.display()))
}

/// Whitespace-separated numeric table, skipping `skip_rows` leading lines.
pub(crate) fn parse_table(text: &str, skip_rows: usize, source: &str) -> AtlasResult<Vec<Vec<f64>>> {
    let mut rows = Vec::new();
    for (number, line) in text.lines().enumerate().skip(skip_rows) {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| {
                AtlasError::computation(
                    MISSING_OUTPUT,
                    format!("{source}: line {} is not numeric: {error}", number + 1),
                )
            })?;
        rows.push(row);
    }
    Ok(rows)
}

fn column(rows: &[Vec<f64>], index: usize, source: &str) -> AtlasResult<Vec<f64>> {
    rows.iter()
        .map(|row| row.get(index).copied())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            AtlasError::computation(MISSING_OUTPUT, format!("{source}: column {index} is missing"))
        })
}

/// Structure table of a summary model: everything between the last `RHOX`
/// and the last `PRADK`, minus the header remainder.
pub fn summary_table(summary: &str) -> AtlasResult<Vec<Vec<f64>>> {
    let (Some(start), Some(end)) = (summary.rfind("RHOX"), summary.rfind("PRADK")) else {
        return Err(AtlasError::computation(
            MISSING_OUTPUT,
            "summary model has no RHOX ... PRADK structure block",
        ));
    };
    if end <= start {
        return Err(AtlasError::computation(
            MISSING_OUTPUT,
            "summary model structure block is malformed",
        ));
    }
    parse_table(&summary[start..end], 1, "output_summary.out")
}

fn require_outputs(run_dir: &Path, names: &[&str], what: &str) -> AtlasResult<()> {
    require_directory(run_dir)?;
    for name in names {
        if !run_dir.join(name).is_file() {
            return Err(AtlasError::computation(
                MISSING_OUTPUT,
                format!("run directory {} does not contain {what} output ({name})", run_dir.display()),
            ));
        }
    }
    Ok(())
}

pub fn read_structure(run_dir: &Path) -> AtlasResult<StructureProfiles> {
    require_outputs(
        run_dir,
        &["output_last_iteration.out", "output_summary.out"],
        "ATLAS-9",
    )?;
    let mut profiles = BTreeMap::new();

    let summary = summary_table(&read_text(
        &run_dir.join("output_summary.out"),
        "output_summary.out",
    )?)?;
    profiles.insert(
        "layer",
        Profile {
            unit: "",
            values: (1..=summary.len()).map(|layer| layer as f64).collect(),
        },
    );
    for (name, unit, index) in SUMMARY_PROFILES {
        let values = column(&summary, index, "output_summary.out")?;
        profiles.insert(name, Profile { unit, values });
    }

    let iteration = parse_table(
        &read_text(
            &run_dir.join("output_last_iteration.out"),
            "output_last_iteration.out",
        )?,
        3,
        "output_last_iteration.out",
    )?;
    for (name, unit, index) in ITERATION_PROFILES {
        let values = column(&iteration, index, "output_last_iteration.out")?;
        profiles.insert(name, Profile { unit, values });
    }
    Ok(StructureProfiles { profiles })
}

/// Converts `output_summary.out` into `model.dat`.
pub fn write_model_csv(run_dir: &Path) -> AtlasResult<Vec<ModelRow>> {
    let summary = read_text(&run_dir.join("output_summary.out"), "output_summary.out")?;
    let table = summary_table(&summary)?;
    let rows: Vec<ModelRow> = table
        .iter()
        .map(|row| match row.as_slice() {
            [rhox, temperature, pressure, ..] => Some(ModelRow {
                rhox: *rhox,
                temperature: *temperature,
                pressure: pressure * PRESSURE_TO_BAR,
            }),
            _ => None,
        })
        .collect::<Option<_>>()
        .ok_or_else(|| {
            AtlasError::computation(MISSING_OUTPUT, "summary model has fewer than 3 columns")
        })?;
    write_csv(&run_dir.join("model.dat"), &MODEL_CSV_HEADER, &rows)?;
    Ok(rows)
}

/// Concatenates `synthe_{1..=batches}/spectrum.asc` into `spectrum.dat`.
pub fn write_spectrum_csv(run_dir: &Path, batches: usize) -> AtlasResult<usize> {
    let mut rows = Vec::new();
    for batch in 1..=batches {
        let path = synthe_batch_dir(run_dir, batch).join("spectrum.asc");
        let table = parse_table(&read_text(&path, "spectrum.asc")?, 2, "spectrum.asc")?;
        for row in table {
            let [wavelength, line, continuum, ratio, ..] = row.as_slice() else {
                return Err(AtlasError::computation(
                    MISSING_OUTPUT,
                    format!("{} has fewer than 4 columns", path.display()),
                ));
            };
            rows.push(SpectrumRow {
                wavelength: *wavelength,
                line: *line,
                continuum: *continuum,
                ratio: *ratio,
            });
        }
    }
    write_csv(&run_dir.join("spectrum.dat"), &SPECTRUM_CSV_HEADER, &rows)?;
    Ok(rows.len())
}

fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> AtlasResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|error| csv_error(path, error))?;
    writer
        .write_record(header)
        .map_err(|error| csv_error(path, error))?;
    for row in rows {
        writer.serialize(row).map_err(|error| csv_error(path, error))?;
    }
    writer.flush().map_err(|error| {
        AtlasError::io_system("IO.WRITE", format!("{}: {error}", path.display()))
    })
}

fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> AtlasResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|error| csv_error(path, error))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|error| csv_error(path, error))
}

pub fn read_model(run_dir: &Path) -> AtlasResult<Vec<ModelRow>> {
    require_outputs(run_dir, &["model.dat"], "ATLAS-9")?;
    read_csv(&run_dir.join("model.dat"))
}

/// Loads `spectrum.dat`, optionally averaged into `bins` equal-width
/// wavelength bins. Empty bins are dropped and bin centres reported.
pub fn read_spectrum(run_dir: &Path, bins: Option<usize>) -> AtlasResult<Spectrum> {
    require_outputs(run_dir, &["spectrum.dat"], "SYNTHE")?;
    let rows: Vec<SpectrumRow> = read_csv(&run_dir.join("spectrum.dat"))?;
    let spectrum = Spectrum {
        wavelength: rows.iter().map(|row| row.wavelength).collect(),
        line: rows.iter().map(|row| row.line).collect(),
        continuum: rows.iter().map(|row| row.continuum).collect(),
        ratio: rows.iter().map(|row| row.ratio).collect(),
    };
    Ok(match bins {
        Some(bins) if bins > 0 => bin_spectrum(&spectrum, bins),
        _ => spectrum,
    })
}

/// Histogram edges follow the numpy convention: `bins` equal intervals over
/// `[min, max]`, the last one closed.
pub fn bin_spectrum(spectrum: &Spectrum, bins: usize) -> Spectrum {
    let Some((min, max)) = spectrum
        .wavelength
        .iter()
        .fold(None, |range: Option<(f64, f64)>, value| match range {
            None => Some((*value, *value)),
            Some((min, max)) => Some((min.min(*value), max.max(*value))),
        })
    else {
        return Spectrum::default();
    };
    let (min, max) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };
    let width = (max - min) / bins as f64;

    let mut counts = vec![0usize; bins];
    let mut sums = vec![[0.0; 3]; bins];
    for (index, wavelength) in spectrum.wavelength.iter().enumerate() {
        let bin = (((wavelength - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
        sums[bin][0] += spectrum.line[index];
        sums[bin][1] += spectrum.continuum[index];
        sums[bin][2] += spectrum.ratio[index];
    }

    let mut binned = Spectrum::default();
    for bin in 0..bins {
        if counts[bin] == 0 {
            continue;
        }
        let count = counts[bin] as f64;
        binned.wavelength.push(min + width * (bin as f64 + 0.5));
        binned.line.push(sums[bin][0] / count);
        binned.continuum.push(sums[bin][1] / count);
        binned.ratio.push(sums[bin][2] / count);
    }
    binned
}
