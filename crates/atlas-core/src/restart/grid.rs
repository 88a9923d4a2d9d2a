//! Pre-computed restart grid over (teff, logg, zscale, alpha, carbon).
//!
//! The store is a bincode document holding the axes, the solar reference
//! abundances, per-node helium and radiative-pressure constants, a carbon
//! offset map over (zscale, logg) and the flattened structures
//! `[teff][logg][zscale][alpha][carbon][layer][column]`.

use super::profile::{LAYER_COUNT, RestartProfile, standard_tau_grid};
use crate::abundance::{ABUNDANCE_SLOTS, AbundanceVector, floor_log_abundance};
use crate::cards::{DeckLayer, ModelDeck};
use crate::common::elements::{ALPHA_ELEMENTS, MAX_ATOMIC_NUMBER};
use crate::domain::errors::{GRID_BOUNDS, INVALID_RESTART};
use crate::domain::AtlasError;
use crate::settings::StellarParameters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const GRID_AXES: [&str; 5] = ["teff", "logg", "zscale", "alpha", "carbon"];
pub const GRID_COLUMNS: usize = 3;

const CARBON: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum RestartGridError {
    #[error("{axis} = {value} is outside the restart grid range [{min}, {max}]")]
    OutOfBounds {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("restart grid is malformed: {0}")]
    Shape(String),
    #[error("failed to read restart grid '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write restart grid '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode restart grid '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        source: bincode::Error,
    },
}

impl From<RestartGridError> for AtlasError {
    fn from(error: RestartGridError) -> Self {
        match &error {
            RestartGridError::OutOfBounds { .. } => {
                AtlasError::input_validation(GRID_BOUNDS, error.to_string())
            }
            RestartGridError::Shape(_) | RestartGridError::Decode { .. } => {
                AtlasError::input_validation(INVALID_RESTART, error.to_string())
            }
            RestartGridError::Read { .. } => {
                AtlasError::io_system("IO.GRID_READ", error.to_string())
            }
            RestartGridError::Write { .. } => {
                AtlasError::io_system("IO.GRID_WRITE", error.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbonMapPoint {
    pub zscale: f64,
    pub logg: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridHeader {
    pub teff: Vec<f64>,
    pub logg: Vec<f64>,
    pub zscale: Vec<f64>,
    pub alpha: Vec<f64>,
    pub carbon: Vec<f64>,
    /// Solar log number abundances indexed by `Z - 1`; hydrogen is stored as a
    /// logarithm as well.
    pub solar: Vec<f64>,
    pub columns: Vec<String>,
    pub carbon_map: Vec<CarbonMapPoint>,
    pub helium: Vec<f64>,
    pub pradk: Vec<f64>,
}

impl GridHeader {
    fn axes(&self) -> [&[f64]; 5] {
        [&self.teff, &self.logg, &self.zscale, &self.alpha, &self.carbon]
    }

    fn node_count(&self) -> usize {
        self.axes().iter().map(|axis| axis.len()).product()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.to_ascii_lowercase().starts_with(name))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GridStore {
    header: GridHeader,
    structures: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub teff: f64,
    pub logg: f64,
    pub zscale: f64,
    pub alpha: f64,
    pub carbon: f64,
}

impl GridPoint {
    fn values(&self) -> [f64; 5] {
        [self.teff, self.logg, self.zscale, self.alpha, self.carbon]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedStructure {
    pub point: GridPoint,
    /// `[layer][column]` in header column order.
    pub layers: Vec<[f64; GRID_COLUMNS]>,
    pub helium: f64,
    pub pradk: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bracket {
    lower: usize,
    upper: usize,
    weight: f64,
}

fn bracket(
    axis: &'static str,
    nodes: &[f64],
    value: f64,
) -> Result<Bracket, RestartGridError> {
    let (min, max) = (nodes[0], nodes[nodes.len() - 1]);
    if !(min..=max).contains(&value) {
        return Err(RestartGridError::OutOfBounds {
            axis,
            value,
            min,
            max,
        });
    }
    if nodes.len() == 1 {
        return Ok(Bracket {
            lower: 0,
            upper: 0,
            weight: 0.0,
        });
    }
    let upper = if value == max {
        nodes.len() - 1
    } else {
        nodes.partition_point(|node| *node <= value)
    };
    let lower = upper - 1;
    Ok(Bracket {
        lower,
        upper,
        weight: (value - nodes[lower]) / (nodes[upper] - nodes[lower]),
    })
}

fn nearest_index(nodes: &[f64], target: f64) -> usize {
    let mut best = 0;
    for (index, node) in nodes.iter().enumerate() {
        if (node - target).abs() < (nodes[best] - target).abs() {
            best = index;
        }
    }
    best
}

fn strictly_increasing(nodes: &[f64]) -> bool {
    !nodes.is_empty() && nodes.windows(2).all(|pair| pair[1] > pair[0])
}

/// Bilinear interpolation of the carbon offset over (zscale, logg).
#[derive(Debug, Clone, PartialEq)]
pub struct CarbonMap {
    zscale: Vec<f64>,
    logg: Vec<f64>,
    values: Vec<f64>,
}

impl CarbonMap {
    pub fn from_points(points: &[CarbonMapPoint]) -> Result<Self, RestartGridError> {
        let mut zscale: Vec<f64> = points.iter().map(|point| point.zscale).collect();
        let mut logg: Vec<f64> = points.iter().map(|point| point.logg).collect();
        for axis in [&mut zscale, &mut logg] {
            axis.sort_by(f64::total_cmp);
            axis.dedup();
        }
        if zscale.is_empty() || zscale.len() * logg.len() != points.len() {
            return Err(RestartGridError::Shape(
                "carbon map points do not form a regular (zscale, logg) grid".to_string(),
            ));
        }
        let mut values = vec![f64::NAN; points.len()];
        for point in points {
            let row = nearest_index(&zscale, point.zscale);
            let column = nearest_index(&logg, point.logg);
            values[row * logg.len() + column] = point.value;
        }
        if values.iter().any(|value| value.is_nan()) {
            return Err(RestartGridError::Shape(
                "carbon map has duplicate or missing nodes".to_string(),
            ));
        }
        Ok(Self {
            zscale,
            logg,
            values,
        })
    }

    pub fn evaluate(&self, zscale: f64, logg: f64) -> Result<f64, RestartGridError> {
        let row = bracket("carbon map zscale", &self.zscale, zscale)?;
        let column = bracket("carbon map logg", &self.logg, logg)?;
        let at = |r: usize, c: usize| self.values[r * self.logg.len() + c];
        let low = at(row.lower, column.lower) * (1.0 - column.weight)
            + at(row.lower, column.upper) * column.weight;
        let high = at(row.upper, column.lower) * (1.0 - column.weight)
            + at(row.upper, column.upper) * column.weight;
        Ok(low * (1.0 - row.weight) + high * row.weight)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestartGrid {
    header: GridHeader,
    structures: Vec<f64>,
    carbon_map: CarbonMap,
}

impl RestartGrid {
    pub fn from_parts(header: GridHeader, structures: Vec<f64>) -> Result<Self, RestartGridError> {
        for (name, axis) in GRID_AXES.iter().zip(header.axes()) {
            if !strictly_increasing(axis) {
                return Err(RestartGridError::Shape(format!(
                    "axis {name} must be non-empty and strictly increasing"
                )));
            }
        }
        if header.solar.len() != MAX_ATOMIC_NUMBER {
            return Err(RestartGridError::Shape(format!(
                "expected {MAX_ATOMIC_NUMBER} solar abundances, found {}",
                header.solar.len()
            )));
        }
        if header.columns.len() != GRID_COLUMNS || header.column_index("temperature").is_none() {
            return Err(RestartGridError::Shape(
                "structure columns must be mass column density, temperature and pressure"
                    .to_string(),
            ));
        }
        let nodes = header.node_count();
        if header.helium.len() != nodes || header.pradk.len() != nodes {
            return Err(RestartGridError::Shape(format!(
                "expected {nodes} helium and pradk entries"
            )));
        }
        if structures.len() != nodes * LAYER_COUNT * GRID_COLUMNS {
            return Err(RestartGridError::Shape(format!(
                "expected {} structure values, found {}",
                nodes * LAYER_COUNT * GRID_COLUMNS,
                structures.len()
            )));
        }
        let carbon_map = CarbonMap::from_points(&header.carbon_map)?;
        Ok(Self {
            header,
            structures,
            carbon_map,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RestartGridError> {
        let bytes = fs::read(path).map_err(|source| RestartGridError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store: GridStore =
            bincode::deserialize(&bytes).map_err(|source| RestartGridError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_parts(store.header, store.structures)
    }

    pub fn save(&self, path: &Path) -> Result<(), RestartGridError> {
        let store = GridStore {
            header: self.header.clone(),
            structures: self.structures.clone(),
        };
        let bytes = bincode::serialize(&store).map_err(|source| RestartGridError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, bytes).map_err(|source| RestartGridError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn header(&self) -> &GridHeader {
        &self.header
    }

    pub fn carbon_offset(&self, zscale: f64, logg: f64) -> Result<f64, RestartGridError> {
        self.carbon_map.evaluate(zscale, logg)
    }

    fn node_offset(&self, indices: [usize; 5]) -> usize {
        let axes = self.header.axes();
        indices
            .iter()
            .zip(axes)
            .fold(0, |offset, (index, axis)| offset * axis.len() + index)
    }

    /// Multilinear interpolation of the stored structures. Exact nodes return
    /// the stored values unchanged.
    pub fn interpolate(&self, point: &GridPoint) -> Result<InterpolatedStructure, RestartGridError> {
        let values = point.values();
        let mut brackets = Vec::with_capacity(GRID_AXES.len());
        for ((name, axis), value) in GRID_AXES.iter().zip(self.header.axes()).zip(values) {
            brackets.push(bracket(name, axis, value)?);
        }
        let active: Vec<usize> = (0..brackets.len())
            .filter(|axis| brackets[*axis].lower != brackets[*axis].upper)
            .collect();

        let mut layers = vec![[0.0; GRID_COLUMNS]; LAYER_COUNT];
        let mut helium = 0.0;
        let mut pradk = 0.0;
        for corner in 0..(1usize << active.len()) {
            let mut indices = [0usize; 5];
            let mut weight = 1.0;
            for (axis, current) in brackets.iter().enumerate() {
                indices[axis] = current.lower;
            }
            for (bit, axis) in active.iter().enumerate() {
                let current = brackets[*axis];
                if corner & (1 << bit) != 0 {
                    indices[*axis] = current.upper;
                    weight *= current.weight;
                } else {
                    weight *= 1.0 - current.weight;
                }
            }
            if weight == 0.0 {
                continue;
            }
            let node = self.node_offset(indices);
            helium += weight * self.header.helium[node];
            pradk += weight * self.header.pradk[node];
            let base = node * LAYER_COUNT * GRID_COLUMNS;
            for (layer, row) in layers.iter_mut().enumerate() {
                for (column, value) in row.iter_mut().enumerate() {
                    *value += weight * self.structures[base + layer * GRID_COLUMNS + column];
                }
            }
        }
        Ok(InterpolatedStructure {
            point: *point,
            layers,
            helium,
            pradk,
        })
    }

    /// Picks the grid node closest to the requested chemistry, axis by axis.
    /// Iron drives the metallicity axis, `[Mg/Fe]` the alpha axis and `[C/O]`
    /// the carbon axis once the local carbon offset is folded in.
    pub fn nearest_node(&self, params: &StellarParameters) -> Result<GridPoint, RestartGridError> {
        let header = &self.header;
        let teff = header.teff[nearest_index(&header.teff, params.teff)];
        let logg = header.logg[nearest_index(&header.logg, params.logg)];
        let iron = params.enhancement("Fe");
        let zscale = header.zscale[nearest_index(&header.zscale, params.zscale + iron)];
        let alpha = header.alpha[nearest_index(&header.alpha, params.enhancement("Mg") - iron)];

        let requested = params.enhancement("C") - params.enhancement("O");
        let offset = self.carbon_offset(zscale, logg)?;
        let available: Vec<f64> = header
            .carbon
            .iter()
            .map(|carbon| carbon + offset - alpha)
            .collect();
        let carbon = header.carbon[nearest_index(&available, requested)];
        Ok(GridPoint {
            teff,
            logg,
            zscale,
            alpha,
            carbon,
        })
    }

    /// Temperature profile of an interpolated structure on the standard grid.
    pub fn restart_profile(&self, point: &GridPoint) -> Result<RestartProfile, RestartGridError> {
        let structure = self.interpolate(point)?;
        let column = self.header.column_index("temperature").ok_or_else(|| {
            RestartGridError::Shape("restart grid has no temperature column".to_string())
        })?;
        Ok(RestartProfile {
            teff: point.teff,
            tau: standard_tau_grid(),
            temperature: structure.layers.iter().map(|row| row[column]).collect(),
        })
    }

    /// Full model atmosphere at an arbitrary point, including the chemistry
    /// implied by the grid axes.
    pub fn generate_model(&self, point: &GridPoint) -> Result<ModelDeck, RestartGridError> {
        let structure = self.interpolate(point)?;
        let mut log_abundances = self.header.solar.clone();
        log_abundances[1] = structure.helium;
        for value in log_abundances.iter_mut().skip(2) {
            *value += point.zscale;
        }
        for atomic_number in ALPHA_ELEMENTS {
            log_abundances[atomic_number - 1] += point.alpha;
        }
        log_abundances[CARBON - 1] += point.carbon + self.carbon_offset(point.zscale, point.logg)?;

        let linear: Vec<f64> = log_abundances.iter().map(|value| 10.0_f64.powf(*value)).collect();
        let total: f64 = linear.iter().sum();
        let mut values = [0.0; ABUNDANCE_SLOTS];
        values[1] = linear[0] / total;
        values[2] = linear[1] / total;
        for atomic_number in 3..=MAX_ATOMIC_NUMBER {
            values[atomic_number] =
                floor_log_abundance((linear[atomic_number - 1] / total).log10() - point.zscale);
        }

        let column = |name: &str| self.header.column_index(name);
        let (rhox, temperature, pressure) = match (
            column("mass"),
            column("temperature"),
            column("pressure"),
        ) {
            (Some(rhox), Some(temperature), Some(pressure)) => (rhox, temperature, pressure),
            _ => {
                return Err(RestartGridError::Shape(
                    "restart grid columns are not recognised".to_string(),
                ));
            }
        };
        Ok(ModelDeck {
            teff: point.teff,
            logg: point.logg,
            abundance_scale: 10.0_f64.powf(point.zscale),
            abundances: AbundanceVector::from_values(values),
            layers: structure
                .layers
                .iter()
                .map(|row| DeckLayer {
                    rhox: row[rhox],
                    temperature: row[temperature],
                    pressure: row[pressure],
                    ..DeckLayer::default()
                })
                .collect(),
            pradk: structure.pradk,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        CarbonMapPoint, GRID_COLUMNS, GridHeader, GridPoint, RestartGrid, RestartGridError,
    };
    use crate::common::elements::ATLAS_SOLAR_ABUNDANCES;
    use crate::domain::AtlasError;
    use crate::domain::errors::GRID_BOUNDS;
    use crate::restart::profile::LAYER_COUNT;
    use crate::settings::StellarParameters;
    use tempfile::TempDir;

    fn solar_logs() -> Vec<f64> {
        let mut solar = ATLAS_SOLAR_ABUNDANCES.to_vec();
        solar[0] = solar[0].log10();
        solar[1] = solar[1].log10();
        solar
    }

    /// A small grid whose structures are affine in every axis, so linear
    /// interpolation is exact everywhere inside it.
    pub(crate) fn affine_grid() -> RestartGrid {
        let header = GridHeader {
            teff: vec![4000.0, 5000.0, 6000.0],
            logg: vec![2.0, 4.0],
            zscale: vec![-1.0, 0.0],
            alpha: vec![0.0, 0.4],
            carbon: vec![-0.5, 0.0, 0.5],
            solar: solar_logs(),
            columns: vec![
                "Mass column density [g cm^-2]".to_string(),
                "Temperature [K]".to_string(),
                "Pressure [dyn cm^-2]".to_string(),
            ],
            carbon_map: vec![
                CarbonMapPoint { zscale: -1.0, logg: 2.0, value: 0.2 },
                CarbonMapPoint { zscale: -1.0, logg: 4.0, value: 0.1 },
                CarbonMapPoint { zscale: 0.0, logg: 2.0, value: 0.0 },
                CarbonMapPoint { zscale: 0.0, logg: 4.0, value: -0.1 },
            ],
            helium: Vec::new(),
            pradk: Vec::new(),
        };
        let mut header = header;
        let mut structures = Vec::new();
        for teff in header.teff.clone() {
            for logg in header.logg.clone() {
                for zscale in header.zscale.clone() {
                    for alpha in header.alpha.clone() {
                        for carbon in header.carbon.clone() {
                            header.helium.push(-1.07 + 0.01 * zscale);
                            header.pradk.push(0.1 * logg + carbon);
                            for layer in 0..LAYER_COUNT {
                                let depth = layer as f64;
                                structures.push(1.0e-4 * (depth + 1.0) * (1.0 + logg));
                                structures.push(teff + 10.0 * depth + 5.0 * zscale - 3.0 * alpha);
                                structures.push(1.0e3 * logg + depth + carbon);
                            }
                        }
                    }
                }
            }
        }
        RestartGrid::from_parts(header, structures).expect("affine grid should be well formed")
    }

    fn node() -> GridPoint {
        GridPoint { teff: 5000.0, logg: 4.0, zscale: -1.0, alpha: 0.4, carbon: 0.0 }
    }

    #[test]
    fn exact_nodes_return_stored_structures() {
        let grid = affine_grid();
        let structure = grid.interpolate(&node()).expect("node should interpolate");
        assert_eq!(structure.layers.len(), LAYER_COUNT);
        let stored = 5000.0 + 10.0 * 0.0 + 5.0 * -1.0 - 3.0 * 0.4;
        assert_eq!(structure.layers[0][1], stored);
        assert_eq!(structure.layers[71][2], 4000.0 + 71.0);

        let corner = GridPoint { teff: 6000.0, logg: 4.0, zscale: 0.0, alpha: 0.4, carbon: 0.5 };
        let structure = grid.interpolate(&corner).expect("upper corner should interpolate");
        assert!((structure.layers[10][1] - (6100.0 - 1.2)).abs() < 1.0e-9);
    }

    #[test]
    fn interior_points_interpolate_linearly() {
        let grid = affine_grid();
        let point = GridPoint { teff: 5250.0, logg: 3.0, zscale: -0.5, alpha: 0.2, carbon: 0.25 };
        let structure = grid.interpolate(&point).expect("interior point should interpolate");
        let expected = 5250.0 + 10.0 * 20.0 - 2.5 - 0.6;
        assert!((structure.layers[20][1] - expected).abs() < 1.0e-9);
        assert!((structure.pradk - (0.3 + 0.25)).abs() < 1.0e-12);
        assert_eq!(structure.layers[0].len(), GRID_COLUMNS);
    }

    #[test]
    fn every_axis_is_bounds_checked() {
        let grid = affine_grid();
        let outside = [
            GridPoint { teff: 3000.0, ..node() },
            GridPoint { logg: 5.0, ..node() },
            GridPoint { zscale: 0.5, ..node() },
            GridPoint { alpha: -0.1, ..node() },
            GridPoint { carbon: 0.75, ..node() },
        ];
        for (point, axis) in outside.iter().zip(super::GRID_AXES) {
            let error = grid.interpolate(point).expect_err("point lies outside the grid");
            assert!(
                matches!(&error, RestartGridError::OutOfBounds { axis: found, .. } if *found == axis)
            );
            assert!(AtlasError::from(error).is(GRID_BOUNDS));
        }
    }

    #[test]
    fn carbon_map_interpolates_bilinearly() {
        let grid = affine_grid();
        let offset = grid.carbon_offset(-0.5, 3.0).expect("inside the carbon map");
        assert!((offset - 0.05).abs() < 1.0e-12);
        assert!(grid.carbon_offset(0.5, 3.0).is_err());
    }

    #[test]
    fn nearest_node_follows_iron_and_alpha_enhancements() {
        let grid = affine_grid();
        let mut params = StellarParameters {
            teff: 5400.0,
            logg: 3.9,
            zscale: -0.3,
            ..StellarParameters::default()
        };
        params.enhancements.insert("Fe".to_string(), -0.6);
        params.enhancements.insert("Mg".to_string(), -0.2);
        let point = grid.nearest_node(&params).expect("node should be found");
        assert_eq!(point.teff, 5000.0);
        assert_eq!(point.logg, 4.0);
        assert_eq!(point.zscale, -1.0);
        assert_eq!(point.alpha, 0.4);
        // offset 0.1 at (-1, 4); available C/O = carbon + 0.1 - 0.4; request 0.
        assert_eq!(point.carbon, 0.5);
    }

    #[test]
    fn generated_models_are_normalized_and_scaled() {
        let grid = affine_grid();
        let deck = grid.generate_model(&node()).expect("model should be generated");
        assert_eq!(deck.layers.len(), LAYER_COUNT);
        assert!((deck.abundance_scale - 0.1).abs() < 1.0e-12);
        let hydrogen = deck.abundances.hydrogen();
        let helium = deck.abundances.helium();
        assert!(hydrogen > 0.9 && hydrogen < 0.93);
        assert!(helium > 0.07 && helium < 0.09);
        // Magnesium carries the alpha enhancement on top of solar.
        let magnesium = deck.abundances.get(12) - ATLAS_SOLAR_ABUNDANCES[11];
        assert!((magnesium - 0.4).abs() < 0.01);
    }

    #[test]
    fn grids_survive_a_bincode_round_trip() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("grid.bin");
        let grid = affine_grid();
        grid.save(&path).expect("grid should be saved");
        let loaded = RestartGrid::load(&path).expect("grid should load");
        assert_eq!(loaded, grid);
    }

    #[test]
    fn malformed_axes_are_rejected() {
        let grid = affine_grid();
        let mut header = grid.header().clone();
        header.logg = vec![4.0, 2.0];
        let error = RestartGrid::from_parts(header, Vec::new()).expect_err("axis is descending");
        assert!(matches!(error, RestartGridError::Shape(_)));
    }
}
