//! Fixed-column control decks and the shell launchers that feed them to the
//! external executables.

mod atlas;
mod deck;
mod dfsynthe;
mod synthe;

pub use atlas::{
    ATLAS_BATCH_ITERATIONS, AtlasControl, atlas_control_script, atlas_end_script,
    atlas_start_script, iteration_blocks,
};
pub use deck::{DeckLayer, ModelDeck, render_model_deck};
pub use dfsynthe::{
    DFSYNTHE_TEMPERATURES, DfsyntheDeck, dfsynthe_node_script, kappa9_script,
    kapreadts_script, node_directory_name, separatedf_script, xnfdf_script,
};
pub use synthe::{
    SYNTHE_CARD_HEADER, SYNTHE_PREAMBLE, SyntheRequest, synbeg_card, synthe_launch_script,
};

use crate::abundance::AbundanceVector;
use crate::formatting::format_fixed_f64;

/// `ABUNDANCE SCALE` line followed by 17 `ABUNDANCE CHANGE` rows of six
/// elements each.
pub fn abundance_cards(scale_card: &str, abundances: &AbundanceVector) -> String {
    let mut lines = vec![format!(
        "ABUNDANCE SCALE {} ABUNDANCE CHANGE 1{} 2{}",
        scale_card,
        format_fixed_f64(abundances.hydrogen(), 8, 5),
        format_fixed_f64(abundances.helium(), 8, 5)
    )];
    for start in (3..=99).step_by(6) {
        let mut row = String::from(" ABUNDANCE CHANGE");
        for z in start..(start + 6).min(100) {
            row.push_str(&format!("{z:>3}{}", format_fixed_f64(abundances.get(z), 7, 2)));
        }
        lines.push(row);
    }
    lines.join("\n")
}

/// Renders a float the way the decks expect free-format numbers: shortest
/// round-trip digits with at least one decimal.
pub fn free_format(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1.0e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::{abundance_cards, free_format};
    use crate::abundance::AbundanceVector;

    #[test]
    fn abundance_cards_cover_every_element_in_fixed_columns() {
        let cards = abundance_cards("  1.00000", &AbundanceVector::solar());
        let lines: Vec<&str> = cards.lines().collect();
        assert_eq!(lines.len(), 18);
        assert_eq!(
            lines[0],
            "ABUNDANCE SCALE   1.00000 ABUNDANCE CHANGE 1 0.92065 2 0.07825"
        );
        assert_eq!(
            lines[1],
            " ABUNDANCE CHANGE  3  -8.78  4 -10.66  5  -9.25  6  -3.54  7  -4.18  8  -3.28"
        );
        assert_eq!(lines[17], " ABUNDANCE CHANGE 99 -20.00");
    }

    #[test]
    fn free_format_keeps_a_decimal_point() {
        assert_eq!(free_format(5770.0), "5770.0");
        assert_eq!(free_format(4.44), "4.44");
        assert_eq!(free_format(-0.25), "-0.25");
    }
}
