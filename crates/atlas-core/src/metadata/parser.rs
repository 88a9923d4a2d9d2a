use crate::abundance::{ABUNDANCE_SLOTS, AbundanceVector};
use crate::common::elements::{ELEMENT_SYMBOLS, MAX_ATOMIC_NUMBER};
use crate::domain::errors::METADATA_FIELD;
use crate::domain::{AtlasError, AtlasResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `ABUNDANCE CHANGE` cards, as written to control decks.
static CLASSIC_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ABUNDANCE CHANGE +3 +[0-9.-]+ +4 +[0-9.-]+ +5 +").expect("static pattern")
});
static CLASSIC_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ABUNDANCE CHANGE +99 +[0-9.-]+ ?").expect("static pattern"));
static CLASSIC_ELEMENTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    (1..=MAX_ATOMIC_NUMBER)
        .map(|z| Regex::new(&format!(r"[^0-9]{z} +([0-9-]+\.[0-9]+)")).expect("element pattern"))
        .collect()
});

/// Symbol-labelled listing, as echoed by the external tools.
static EXPLICIT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LI[0-9 .-]+BE[0-9 .-]+B").expect("static pattern"));
static EXPLICIT_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"BK[0-9 .-]+CF[0-9 .-]+ES[0-9 .-]+").expect("static pattern")
});
static EXPLICIT_ELEMENTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ELEMENT_SYMBOLS
        .iter()
        .map(|symbol| {
            let label = format!("{:<2}", symbol.to_ascii_uppercase());
            Regex::new(&format!(r"[^A-Z]{label}([0-9 .-]+)")).expect("element pattern")
        })
        .collect()
});

static VTURB_HEADER: &str = "RHOX         T        P        XNE";
static SYNTHE_HEADER: &str = "AIRorVAC  WLBEG     WLEND     RESOLU    TURBV  IFNLTE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    /// `ABUNDANCE SCALE ... ABUNDANCE CHANGE z value` cards.
    Classic,
    /// `LI -10.94 BE -10.64 ...` symbol listing.
    Explicit,
}

/// Where to find an abundance listing and which auxiliary parameters to pick
/// up around it. A parameter `NAME/n` selects the n-th value after `NAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingQuery<'a> {
    pub style: ListingStyle,
    pub lookbehind: usize,
    pub lookahead: usize,
    pub params: &'a [&'a str],
}

pub const ATLAS_REQUESTED: ListingQuery<'static> = ListingQuery {
    style: ListingStyle::Classic,
    lookbehind: 4,
    lookahead: 0,
    params: &["VTURB", "ABUNDANCE SCALE", "SCALE 72/3", "SCALE 72/4"],
};

pub const ATLAS_RECEIVED: ListingQuery<'static> = ListingQuery {
    style: ListingStyle::Explicit,
    lookbehind: 2,
    lookahead: 0,
    params: &["0XSCALE", "TEFF", "LOG G"],
};

pub const DFSYNTHE_REQUESTED: ListingQuery<'static> = ListingQuery {
    style: ListingStyle::Classic,
    lookbehind: 1,
    lookahead: 0,
    params: &["ABUNDANCE SCALE"],
};

pub const DFSYNTHE_RECEIVED: ListingQuery<'static> = ListingQuery {
    style: ListingStyle::Explicit,
    lookbehind: 1,
    lookahead: 0,
    params: &["0XSCALE"],
};

#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceListing {
    /// Index 0 unused; H and He as number fractions, metals in dex.
    pub elements: [f64; ABUNDANCE_SLOTS],
    pub params: BTreeMap<String, f64>,
}

impl AbundanceListing {
    pub fn param(&self, name: &str) -> AtlasResult<f64> {
        self.params.get(name).copied().ok_or_else(|| {
            AtlasError::input_validation(METADATA_FIELD, format!("parameter {name} was not parsed"))
        })
    }

    pub fn vector(&self) -> AbundanceVector {
        AbundanceVector::from_values(self.elements)
    }
}

fn missing(what: &str, source: &str) -> AtlasError {
    AtlasError::input_validation(METADATA_FIELD, format!("{what} not found in {source}"))
}

/// Position of the `count`-th line break before `position`, or 0.
fn lines_back(content: &str, mut position: usize, count: usize) -> usize {
    for _ in 0..count {
        position = content[..position].rfind('\n').unwrap_or(0);
    }
    position
}

fn lines_forward(content: &str, mut position: usize, count: usize) -> usize {
    for _ in 0..count {
        position += content[position..].find('\n').map_or(0, |offset| offset + 1);
    }
    position
}

fn param_pattern(param: &str) -> AtlasResult<Regex> {
    let (name, depth) = match param.split_once('/') {
        Some((name, depth)) => (name, depth.parse::<usize>().unwrap_or(1).max(1)),
        None => (param, 1),
    };
    let mut pattern = regex::escape(name);
    for _ in 1..depth {
        pattern.push_str(r" +[^ \n]+");
    }
    pattern.push_str(r" +([^ \n]+)");
    Regex::new(&pattern).map_err(|error| AtlasError::internal("SYS.REGEX", error.to_string()))
}

/// Parses one abundance listing and the requested parameters from `content`.
/// `source` only labels error messages.
pub fn parse_listing(
    content: &str,
    query: &ListingQuery<'_>,
    source: &str,
) -> AtlasResult<AbundanceListing> {
    let normalized;
    let content = match query.style {
        ListingStyle::Explicit => {
            normalized = content.replace("0XSCALE", "0XSCALE ");
            normalized.as_str()
        }
        ListingStyle::Classic => content,
    };
    let (start_pattern, end_pattern, element_patterns) = match query.style {
        ListingStyle::Classic => (&*CLASSIC_START, &*CLASSIC_END, &*CLASSIC_ELEMENTS),
        ListingStyle::Explicit => (&*EXPLICIT_START, &*EXPLICIT_END, &*EXPLICIT_ELEMENTS),
    };
    let start = start_pattern
        .find(content)
        .ok_or_else(|| missing("abundance listing", source))?
        .start();
    let end = end_pattern
        .find(content)
        .ok_or_else(|| missing("end of abundance listing", source))?
        .end();
    let start = lines_back(content, start, 2);
    if end <= start {
        return Err(missing("well-formed abundance listing", source));
    }
    let listing = &content[start..end];

    let mut elements = [0.0; ABUNDANCE_SLOTS];
    for (index, pattern) in element_patterns.iter().enumerate() {
        let z = index + 1;
        let value = pattern
            .captures(listing)
            .and_then(|captures| captures[1].trim().parse::<f64>().ok())
            .ok_or_else(|| missing(&format!("abundance of element {z}"), source))?;
        elements[z] = value;
    }

    let mut params = BTreeMap::new();
    if !query.params.is_empty() {
        let window_start = lines_back(content, start, query.lookbehind);
        let window_end = lines_forward(content, end, query.lookahead);
        let window = &content[window_start..window_end];
        for param in query.params {
            let value = param_pattern(param)?
                .captures(window)
                .and_then(|captures| captures[1].parse::<f64>().ok())
                .ok_or_else(|| missing(&format!("parameter {param}"), source))?;
            params.insert((*param).to_string(), value);
        }
    }
    Ok(AbundanceListing { elements, params })
}

/// Turbulent velocity (cm/s) ATLAS actually used: the eighth field of the first
/// row under the structure table header.
pub fn received_vturb(content: &str, source: &str) -> AtlasResult<f64> {
    let header = content
        .find(VTURB_HEADER)
        .ok_or_else(|| missing("structure table", source))?;
    content[header..]
        .lines()
        .nth(1)
        .and_then(|row| row.split_whitespace().nth(7))
        .and_then(|token| token.parse::<f64>().ok())
        .ok_or_else(|| missing("received turbulent velocity", source))
}

/// Values on the `synbeg` card, either as written or as echoed back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheParameters {
    pub wlbeg: f64,
    pub wlend: f64,
    pub resolu: f64,
    pub turbv: f64,
    pub ifnlte: f64,
    pub linout: f64,
    pub cutoff: f64,
    pub ifpred: f64,
    pub nread: f64,
}

pub const SYNTHE_FIELDS: [(&str, usize, usize); 9] = [
    ("wlbeg", 10, 20),
    ("wlend", 20, 30),
    ("resolu", 30, 40),
    ("turbv", 40, 50),
    ("ifnlte", 50, 53),
    ("linout", 53, 60),
    ("cutoff", 60, 70),
    ("ifpred", 70, 75),
    ("nread", 75, 80),
];

impl SyntheParameters {
    fn from_values(values: [f64; 9]) -> Self {
        let [wlbeg, wlend, resolu, turbv, ifnlte, linout, cutoff, ifpred, nread] = values;
        Self {
            wlbeg,
            wlend,
            resolu,
            turbv,
            ifnlte,
            linout,
            cutoff,
            ifpred,
            nread,
        }
    }

    pub fn values(&self) -> [(&'static str, f64); 9] {
        [
            ("wlbeg", self.wlbeg),
            ("wlend", self.wlend),
            ("resolu", self.resolu),
            ("turbv", self.turbv),
            ("ifnlte", self.ifnlte),
            ("linout", self.linout),
            ("cutoff", self.cutoff),
            ("ifpred", self.ifpred),
            ("nread", self.nread),
        ]
    }
}

/// Reads the `synbeg` card, the line right above its column legend.
pub fn requested_synthe(content: &str, source: &str) -> AtlasResult<SyntheParameters> {
    let header = content
        .find(SYNTHE_HEADER)
        .ok_or_else(|| missing("synbeg card legend", source))?;
    let card = content[..header]
        .trim_end_matches('\n')
        .rsplit('\n')
        .next()
        .ok_or_else(|| missing("synbeg card", source))?;
    let mut values = [0.0; 9];
    for (slot, (name, from, to)) in values.iter_mut().zip(SYNTHE_FIELDS) {
        *slot = card
            .get(from..to.min(card.len()))
            .and_then(|field| field.trim().parse::<f64>().ok())
            .ok_or_else(|| missing(&format!("requested {name}"), source))?;
    }
    Ok(SyntheParameters::from_values(values))
}

/// Reads the values SYNTHE echoed in `synbeg.out`.
pub fn received_synthe(content: &str, source: &str) -> AtlasResult<SyntheParameters> {
    let mut values = [0.0; 9];
    for (slot, (name, _, _)) in values.iter_mut().zip(SYNTHE_FIELDS) {
        let pattern = Regex::new(&format!(r"{}=? *([^ \n]+)", name.to_ascii_uppercase()))
            .map_err(|error| AtlasError::internal("SYS.REGEX", error.to_string()))?;
        *slot = pattern
            .captures(content)
            .and_then(|captures| captures[1].parse::<f64>().ok())
            .ok_or_else(|| missing(&format!("received {name}"), source))?;
    }
    Ok(SyntheParameters::from_values(values))
}
