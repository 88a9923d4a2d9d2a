//! Header conventions of older model files that carry no abundance listing
//! the main parser understands.

use regex::Regex;
use std::sync::LazyLock;

static TEFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TEFF *([0-9.eE-]+)").expect("static pattern"));
static ABUNDANCE_SCALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ABUNDANCE SCALE *([0-9.eE-]+)").expect("static pattern"));
static GRAVITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GRAVITY *([0-9.eE-]+)").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelHeader {
    pub teff: f64,
    pub logg: f64,
    /// Linear scale, `10^[M/H]`.
    pub abundance_scale: f64,
}

fn unique(pattern: &Regex, content: &str) -> Option<f64> {
    let mut matches = pattern.captures_iter(content);
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    first[1].parse().ok()
}

/// Header of a model file in which `TEFF`, `GRAVITY` and `ABUNDANCE SCALE`
/// each occur exactly once.
pub fn model_header(content: &str) -> Option<ModelHeader> {
    Some(ModelHeader {
        teff: unique(&TEFF, content)?,
        logg: unique(&GRAVITY, content)?,
        abundance_scale: unique(&ABUNDANCE_SCALE, content)?,
    })
}

/// Line-by-line variant: takes the first occurrence of each field and stops
/// reading once all three are known.
pub fn first_line_scan(content: &str) -> Option<ModelHeader> {
    let (mut teff, mut logg, mut scale) = (None, None, None);
    for line in content.lines() {
        let first = |pattern: &Regex| {
            pattern
                .captures(line)
                .and_then(|captures| captures[1].parse::<f64>().ok())
        };
        teff = teff.or_else(|| first(&TEFF));
        logg = logg.or_else(|| first(&GRAVITY));
        scale = scale.or_else(|| first(&ABUNDANCE_SCALE));
        if let (Some(teff), Some(logg), Some(abundance_scale)) = (teff, logg, scale) {
            return Some(ModelHeader {
                teff,
                logg,
                abundance_scale,
            });
        }
    }
    None
}
