//! Conversion between standard abundance notation (`Y`, `[M/H]`, `[A/M]`) and
//! the ATLAS-9 abundance vector, plus opacity-table compatibility checks.

use crate::common::elements::{
    ABSENT_ABUNDANCE, ATLAS_SOLAR_ABUNDANCES, MAX_ATOMIC_NUMBER, atomic_mass,
    atomic_number_for_symbol, element_symbol, solar_reference,
};
use crate::domain::errors::{
    FIXED_WIDTH_UNDERFLOW, INCOMPATIBLE_TABLE, INVALID_SETTINGS, MISSING_REFERENCE,
};
use crate::domain::{AtlasError, AtlasResult};
use crate::formatting::format_fixed_f64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ABUNDANCE_SLOTS: usize = MAX_ATOMIC_NUMBER + 1;

pub const METALLICITY_TOLERANCE: f64 = 0.01;
pub const HELIUM_TOLERANCE: f64 = 0.001;
pub const ENHANCEMENT_TOLERANCE: f64 = 0.01;

/// ATLAS abundance vector indexed by atomic number; slot 0 is unused.
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceVector {
    values: [f64; ABUNDANCE_SLOTS],
}

impl AbundanceVector {
    pub fn solar() -> Self {
        let mut values = [0.0; ABUNDANCE_SLOTS];
        values[1..].copy_from_slice(&ATLAS_SOLAR_ABUNDANCES);
        Self { values }
    }

    pub fn from_values(values: [f64; ABUNDANCE_SLOTS]) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64; ABUNDANCE_SLOTS] {
        &self.values
    }

    pub fn get(&self, atomic_number: usize) -> f64 {
        self.values.get(atomic_number).copied().unwrap_or(0.0)
    }

    pub fn hydrogen(&self) -> f64 {
        self.values[1]
    }

    pub fn helium(&self) -> f64 {
        self.values[2]
    }

    /// Absolute number fractions after applying the metallicity scale.
    pub fn number_fractions(&self, metallicity_scale: f64) -> [f64; ABUNDANCE_SLOTS] {
        let mut fractions = [0.0; ABUNDANCE_SLOTS];
        fractions[1] = self.values[1];
        fractions[2] = self.values[2];
        for z in 3..ABUNDANCE_SLOTS {
            if self.values[z] > ABSENT_ABUNDANCE {
                fractions[z] = 10.0_f64.powf(self.values[z] + metallicity_scale);
            }
        }
        fractions
    }

    pub fn mass_fractions(&self, metallicity_scale: f64) -> MassFractions {
        let fractions = self.number_fractions(metallicity_scale);
        let hydrogen = fractions[1] * mass_of(1);
        let helium = fractions[2] * mass_of(2);
        let metals: f64 = (3..ABUNDANCE_SLOTS)
            .map(|z| fractions[z] * mass_of(z))
            .sum();
        let total = hydrogen + helium + metals;
        MassFractions {
            x: hydrogen / total,
            y: helium / total,
            z: metals / total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassFractions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Composition in standard notation. Enhancements are `[A/M]` in dex keyed by
/// element symbol; absent keys mean solar proportions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardAbundances {
    pub metallicity_scale: f64,
    pub helium_mass_fraction: f64,
    #[serde(default)]
    pub enhancements: BTreeMap<String, f64>,
}

impl StandardAbundances {
    pub fn enhancement(&self, symbol: &str) -> f64 {
        self.enhancements.get(symbol).copied().unwrap_or(0.0)
    }

    /// Enhancements that survive rounding to the two-decimal card precision.
    pub fn significant_enhancements(&self) -> BTreeMap<String, f64> {
        self.enhancements
            .iter()
            .filter(|(_, value)| value.abs() >= 0.005)
            .map(|(symbol, value)| (symbol.clone(), *value))
            .collect()
    }
}

pub fn to_standard(
    vector: &AbundanceVector,
    metallicity_scale: f64,
) -> AtlasResult<StandardAbundances> {
    let hydrogen_offset = (vector.hydrogen() / ATLAS_SOLAR_ABUNDANCES[0]).log10();
    let mut enhancements = BTreeMap::new();

    for z in 3..ABUNDANCE_SLOTS {
        let value = vector.get(z);
        let symbol = symbol_of(z);
        match solar_reference(z) {
            Some(solar) => {
                enhancements.insert(symbol.to_string(), value - solar - hydrogen_offset);
            }
            None if value <= ABSENT_ABUNDANCE => continue,
            None => {
                return Err(AtlasError::input_validation(
                    MISSING_REFERENCE,
                    format!(
                        "element {symbol} (Z={z}) has abundance {value} but no solar reference"
                    ),
                ));
            }
        }
    }

    Ok(StandardAbundances {
        metallicity_scale,
        helium_mass_fraction: vector.mass_fractions(metallicity_scale).y,
        enhancements,
    })
}

pub fn to_atlas(
    helium_mass_fraction: Option<f64>,
    metallicity_scale: f64,
    enhancements: &BTreeMap<String, f64>,
) -> AtlasResult<AbundanceVector> {
    let mut enhancement_by_z = [0.0; ABUNDANCE_SLOTS];
    for (symbol, enhancement) in enhancements {
        let z = atomic_number_for_symbol(symbol).ok_or_else(|| {
            AtlasError::input_validation(
                INVALID_SETTINGS,
                format!("unknown chemical element '{symbol}'"),
            )
        })?;
        if z <= 2 {
            return Err(AtlasError::input_validation(
                INVALID_SETTINGS,
                format!(
                    "{symbol} cannot be enhanced; set the helium mass fraction instead"
                ),
            ));
        }
        if solar_reference(z).is_none() {
            return Err(AtlasError::input_validation(
                MISSING_REFERENCE,
                format!("element {symbol} (Z={z}) has no solar reference abundance"),
            ));
        }
        enhancement_by_z[z] = *enhancement;
    }

    // Abundances relative to hydrogen.
    let solar_hydrogen = ATLAS_SOLAR_ABUNDANCES[0];
    let mut ratios = [0.0; ABUNDANCE_SLOTS];
    ratios[1] = 1.0;
    for z in 3..ABUNDANCE_SLOTS {
        if let Some(solar) = solar_reference(z) {
            ratios[z] = 10.0_f64.powf(
                solar - solar_hydrogen.log10() + metallicity_scale + enhancement_by_z[z],
            );
        }
    }
    ratios[2] = match helium_mass_fraction {
        None => ATLAS_SOLAR_ABUNDANCES[1] / solar_hydrogen,
        Some(y) if (0.0..1.0).contains(&y) => {
            let metal_mass: f64 = (3..ABUNDANCE_SLOTS).map(|z| ratios[z] * mass_of(z)).sum();
            y * (mass_of(1) + metal_mass) / (mass_of(2) * (1.0 - y))
        }
        Some(y) => {
            return Err(AtlasError::input_validation(
                INVALID_SETTINGS,
                format!("helium mass fraction {y} is outside [0, 1)"),
            ));
        }
    };

    let total: f64 = ratios.iter().sum();
    let mut values = [0.0; ABUNDANCE_SLOTS];
    values[1] = ratios[1] / total;
    values[2] = ratios[2] / total;
    for z in 3..ABUNDANCE_SLOTS {
        values[z] = if ratios[z] > 0.0 {
            floor_log_abundance((ratios[z] / total).log10() - metallicity_scale)
        } else {
            ABSENT_ABUNDANCE
        };
    }

    let rendered_hydrogen = format_fixed_f64(values[1], 8, 5);
    if rendered_hydrogen.trim().parse::<f64>().unwrap_or(0.0) == 0.0 {
        return Err(AtlasError::input_validation(
            FIXED_WIDTH_UNDERFLOW,
            format!(
                "hydrogen number fraction {:e} renders as '{}' in the abundance card",
                values[1], rendered_hydrogen
            ),
        ));
    }

    Ok(AbundanceVector { values })
}

/// Validates that an opacity table computed for `table` can serve a run
/// requesting `requested`.
pub fn check_compatibility(
    requested: &StandardAbundances,
    table: &StandardAbundances,
) -> AtlasResult<()> {
    let metallicity_gap = (requested.metallicity_scale - table.metallicity_scale).abs();
    if metallicity_gap > METALLICITY_TOLERANCE {
        return Err(AtlasError::input_validation(
            INCOMPATIBLE_TABLE,
            format!(
                "metallicity [M/H] requested {} but the opacity table has {}",
                requested.metallicity_scale, table.metallicity_scale
            ),
        ));
    }

    let helium_gap = (requested.helium_mass_fraction - table.helium_mass_fraction).abs();
    if helium_gap > HELIUM_TOLERANCE {
        return Err(AtlasError::input_validation(
            INCOMPATIBLE_TABLE,
            format!(
                "helium mass fraction requested {} but the opacity table has {}",
                requested.helium_mass_fraction, table.helium_mass_fraction
            ),
        ));
    }

    let requested_vector = to_atlas(
        Some(requested.helium_mass_fraction),
        requested.metallicity_scale,
        &requested.enhancements,
    )?;
    let table_vector = to_atlas(
        Some(table.helium_mass_fraction),
        table.metallicity_scale,
        &table.enhancements,
    )?;

    for z in 3..ABUNDANCE_SLOTS {
        if solar_reference(z).is_none() {
            continue;
        }
        let symbol = symbol_of(z);
        let wanted = requested.enhancement(symbol);
        let available = table.enhancement(symbol);
        if (wanted - available).abs() <= ENHANCEMENT_TOLERANCE {
            continue;
        }
        let both_absent = requested_vector.get(z) <= ABSENT_ABUNDANCE
            && table_vector.get(z) <= ABSENT_ABUNDANCE;
        if !both_absent {
            return Err(AtlasError::input_validation(
                INCOMPATIBLE_TABLE,
                format!(
                    "[{symbol}/M] requested {wanted} but the opacity table has {available}"
                ),
            ));
        }
    }

    Ok(())
}

/// Metallicity that reproduces the metal-to-hydrogen mass ratio of `vector`
/// under unenhanced solar proportions.
pub fn effective_metallicity(vector: &AbundanceVector, metallicity_scale: f64) -> f64 {
    let actual = vector.mass_fractions(metallicity_scale);
    let solar = AbundanceVector::solar().mass_fractions(0.0);
    ((actual.z / actual.x) / (solar.z / solar.x)).log10()
}

pub(crate) fn floor_log_abundance(value: f64) -> f64 {
    if value <= ABSENT_ABUNDANCE || format_fixed_f64(value, 7, 2).trim() == "-20.00" {
        ABSENT_ABUNDANCE
    } else {
        value
    }
}

fn symbol_of(atomic_number: usize) -> &'static str {
    element_symbol(atomic_number).unwrap_or("?")
}

fn mass_of(atomic_number: usize) -> f64 {
    atomic_mass(atomic_number).unwrap_or(0.0)
}
