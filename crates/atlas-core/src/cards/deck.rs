use super::abundance_cards;
use crate::abundance::AbundanceVector;
use crate::formatting::{format_exponent_f64, format_fixed_f64};

/// One row of a `READ DECK6` structure block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeckLayer {
    pub rhox: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub electron_density: f64,
    pub opacity: f64,
    pub radiative_acceleration: f64,
    pub turbulent_velocity: f64,
    pub radiative_flux: f64,
    pub convective_velocity: f64,
    pub sound_speed: f64,
}

impl DeckLayer {
    fn render(&self) -> String {
        let mut row = format_exponent_f64(self.rhox, 15, 8);
        row.push_str(&format_fixed_f64(self.temperature, 9, 1));
        for value in [
            self.pressure,
            self.electron_density,
            self.opacity,
            self.radiative_acceleration,
            self.turbulent_velocity,
            self.radiative_flux,
            self.convective_velocity,
            self.sound_speed,
        ] {
            row.push_str(&format_exponent_f64(value, 10, 3));
        }
        row
    }
}

/// A complete model atmosphere in `output_summary.out` layout, usable as a
/// restart (`fort.3`) for ATLAS.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDeck {
    pub teff: f64,
    pub logg: f64,
    /// Linear abundance scale, `10^[M/H]`.
    pub abundance_scale: f64,
    pub abundances: AbundanceVector,
    pub layers: Vec<DeckLayer>,
    pub pradk: f64,
}

pub fn render_model_deck(deck: &ModelDeck) -> String {
    let mut lines = vec![
        format!(
            "TEFF {}.  GRAVITY{}",
            format_fixed_f64(deck.teff, 6, 0),
            format_fixed_f64(deck.logg, 8, 5)
        ),
        "TITLE   B a s i c A T L A S".to_string(),
        " OPACITY IFOP 1 1 1 1 1 1 1 1 1 1 1 1 1 0 1 0 0 0 0 0".to_string(),
        " CONVECTION ON   1.25 TURBULENCE OFF  0.00  0.00  0.00  0.00".to_string(),
        abundance_cards(&format_fixed_f64(deck.abundance_scale, 9, 5), &deck.abundances),
        format!(
            "READ DECK6{:>3} RHOX,T,P,XNE,ABROSS,ACCRAD,VTURB,         FLXRAD,VCONV,VELSND",
            deck.layers.len()
        ),
    ];
    lines.extend(deck.layers.iter().map(DeckLayer::render));
    lines.push(format!("PRADK{}", format_exponent_f64(deck.pradk, 11, 4)));
    lines.push("BEGIN                    ITERATION  15 COMPLETED".to_string());
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::{DeckLayer, ModelDeck, render_model_deck};
    use crate::abundance::AbundanceVector;

    #[test]
    fn model_deck_rows_use_fixed_columns() {
        let deck = ModelDeck {
            teff: 5770.0,
            logg: 4.44,
            abundance_scale: 1.0,
            abundances: AbundanceVector::solar(),
            layers: vec![DeckLayer {
                rhox: 5.12838287e-4,
                temperature: 3709.1,
                pressure: 14.05,
                opacity: 1.0,
                ..DeckLayer::default()
            }],
            pradk: 1.4828,
        };
        let rendered = render_model_deck(&deck);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "TEFF   5770.  GRAVITY 4.44000");
        assert!(lines.contains(&"READ DECK6  1 RHOX,T,P,XNE,ABROSS,ACCRAD,VTURB,         FLXRAD,VCONV,VELSND"));
        assert!(lines.contains(
            &" 5.12838287E-04   3709.1 1.405E+01 0.000E+00 1.000E+00 0.000E+00 0.000E+00 0.000E+00 0.000E+00 0.000E+00"
        ));
        assert!(lines.contains(&"PRADK 1.4828E+00"));
        assert_eq!(lines.last(), Some(&"BEGIN                    ITERATION  15 COMPLETED"));
    }
}
