//! Element tables shared by the abundance model, the card renderers and the
//! metadata parser.
//!
//! Abundances follow the ATLAS-9 convention: hydrogen and helium are absolute
//! number fractions, every heavier element is `log10` of its number fraction
//! before the metallicity scale is applied. `-20.0` marks an absent element.

pub const MAX_ATOMIC_NUMBER: usize = 99;

/// Log abundance that ATLAS reads as "element absent".
pub const ABSENT_ABUNDANCE: f64 = -20.0;

pub const ELEMENT_SYMBOLS: [&str; MAX_ATOMIC_NUMBER] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es",
];

/// Standard atomic weights in atomic mass units. Elements without stable
/// isotopes carry the mass number of their longest-lived isotope.
pub const ATOMIC_MASSES: [f64; MAX_ATOMIC_NUMBER] = [
    1.008, 4.002602, 6.94, 9.0121831, 10.81, 12.011, 14.007, 15.999, 18.998403163, 20.1797,
    22.98976928, 24.305, 26.9815385, 28.085, 30.973761998, 32.06, 35.45, 39.948, 39.0983, 40.078,
    44.955908, 47.867, 50.9415, 51.9961, 54.938044, 55.845, 58.933194, 58.6934, 63.546, 65.38,
    69.723, 72.630, 74.921595, 78.971, 79.904, 83.798, 85.4678, 87.62, 88.90584, 91.224,
    92.90637, 95.95, 98.0, 101.07, 102.90550, 106.42, 107.8682, 112.414, 114.818, 118.710,
    121.760, 127.60, 126.90447, 131.293, 132.90545196, 137.327, 138.90547, 140.116, 140.90766,
    144.242, 145.0, 150.36, 151.964, 157.25, 158.92535, 162.500, 164.93033, 167.259, 168.93422,
    173.045, 174.9668, 178.49, 180.94788, 183.84, 186.207, 190.23, 192.217, 195.084, 196.966569,
    200.592, 204.38, 207.2, 208.98040, 209.0, 210.0, 222.0, 223.0, 226.0, 227.0, 232.0377,
    231.03588, 238.02891, 237.0, 244.0, 243.0, 247.0, 247.0, 251.0, 252.0,
];

/// Default ATLAS-9 composition, indexed by `Z - 1`.
#[allow(clippy::excessive_precision)]
pub const ATLAS_SOLAR_ABUNDANCES: [f64; MAX_ATOMIC_NUMBER] = [
    0.9206471640943776, 0.07824693927227462, -8.775426229703063, -10.655426229703064,
    -9.245426229703064, -3.535426229703064, -4.175426229703063, -3.2754262297030636,
    -7.475426229703063, -4.015426229703063, -5.795426229703063, -4.435426229703063,
    -5.585426229703063, -4.525426229703063, -6.575426229703063, -4.875426229703063,
    -6.535426229703063, -5.635426229703063, -6.925426229703063, -5.695426229703063,
    -8.885426229703063, -7.085426229703063, -8.105426229703063, -6.395426229703063,
    -6.605426229703063, -4.515426229703063, -7.045426229703063, -5.815426229703063,
    -7.845426229703063, -7.475426229703063, -8.995426229703064, -8.385426229703063,
    -9.735426229703062, -8.695426229703063, -9.495426229703064, -8.785426229703063,
    -9.675426229703064, -9.165426229703062, -9.825426229703062, -9.415426229703062,
    -10.575426229703062, -10.155426229703064, -20.0, -10.285426229703063,
    -10.975426229703062, -10.385426229703063, -10.835426229703064, -10.325426229703062,
    -11.275426229703063, -9.995426229703064, -11.025426229703063, -9.855426229703063,
    -10.485426229703062, -9.795426229703063, -10.955426229703063, -9.855426229703063,
    -10.935426229703063, -10.455426229703063, -11.315426229703062, -10.615426229703063,
    -20.0, -11.075426229703062, -11.515426229703063, -10.965426229703063,
    -11.735426229703062, -10.935426229703063, -11.555426229703063, -11.115426229703063,
    -11.935426229703063, -11.115426229703063, -11.935426229703063, -11.165426229703064,
    -12.155426229703062, -11.385426229703063, -11.775426229703063, -10.675426229703064,
    -10.655426229703064, -10.415426229703062, -11.235426229703062, -10.865426229703063,
    -11.265426229703063, -9.995426229703064, -11.385426229703063, -20.0,
    -20.0, -20.0, -20.0, -20.0,
    -20.0, -11.955426229703063, -20.0, -12.575426229703062,
    -20.0, -20.0, -20.0, -20.0,
    -20.0, -20.0, -20.0,
];

/// Alpha elements (O, Ne, Mg, Si, S, Ar, Ca, Ti).
pub const ALPHA_ELEMENTS: [usize; 8] = [8, 10, 12, 14, 16, 18, 20, 22];

pub fn element_symbol(atomic_number: usize) -> Option<&'static str> {
    let index = index_for_atomic_number(atomic_number)?;
    Some(ELEMENT_SYMBOLS[index])
}

pub fn atomic_number_for_symbol(symbol: &str) -> Option<usize> {
    let normalized = symbol.trim();
    if normalized.is_empty() {
        return None;
    }

    ELEMENT_SYMBOLS
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(normalized))
        .map(|index| index + 1)
}

pub fn atomic_mass(atomic_number: usize) -> Option<f64> {
    let index = index_for_atomic_number(atomic_number)?;
    Some(ATOMIC_MASSES[index])
}

/// Solar reference abundance in the ATLAS convention, or `None` for elements
/// the reference table does not cover.
pub fn solar_reference(atomic_number: usize) -> Option<f64> {
    let index = index_for_atomic_number(atomic_number)?;
    let value = ATLAS_SOLAR_ABUNDANCES[index];
    (atomic_number <= 2 || value > ABSENT_ABUNDANCE).then_some(value)
}

const fn index_for_atomic_number(atomic_number: usize) -> Option<usize> {
    if atomic_number == 0 || atomic_number > MAX_ATOMIC_NUMBER {
        None
    } else {
        Some(atomic_number - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        atomic_mass, atomic_number_for_symbol, element_symbol, solar_reference,
        ATLAS_SOLAR_ABUNDANCES, MAX_ATOMIC_NUMBER,
    };

    #[test]
    fn lookup_rejects_out_of_range_atomic_numbers() {
        assert!(element_symbol(0).is_none());
        assert!(element_symbol(100).is_none());
        assert!(atomic_mass(0).is_none());
        assert!(solar_reference(100).is_none());
    }

    #[test]
    fn known_symbol_roundtrip_matches_atomic_number() {
        assert_eq!(atomic_number_for_symbol("Fe"), Some(26));
        assert_eq!(atomic_number_for_symbol("fe"), Some(26));
        assert_eq!(atomic_number_for_symbol(" HE "), Some(2));
        assert_eq!(element_symbol(99), Some("Es"));
        assert_eq!(atomic_number_for_symbol(""), None);
        assert_eq!(atomic_number_for_symbol("Xx"), None);
    }

    #[test]
    fn solar_reference_is_missing_only_for_absent_defaults() {
        for z in [43, 61, 84, 85, 86, 87, 88, 89, 91, 93, 94, 95, 96, 97, 98, 99] {
            assert!(solar_reference(z).is_none(), "Z={z} should lack a reference");
        }
        assert_eq!(solar_reference(26), Some(-4.515426229703063));
        assert_eq!(solar_reference(90), Some(-11.955426229703063));
        assert!(solar_reference(1).is_some());
    }

    #[test]
    fn default_composition_sums_to_unity() {
        let metals: f64 = ATLAS_SOLAR_ABUNDANCES[2..MAX_ATOMIC_NUMBER]
            .iter()
            .map(|value| 10.0_f64.powf(*value))
            .sum();
        let total = ATLAS_SOLAR_ABUNDANCES[0] + ATLAS_SOLAR_ABUNDANCES[1] + metals;
        assert!((total - 1.0).abs() < 1.0e-3);
    }
}
