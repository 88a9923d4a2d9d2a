use super::{CHEMISTRY_FAILURE_SENTINEL, OVERFLOW_SENTINEL};
use regex::Regex;
use std::sync::LazyLock;

pub const BLOCK_START: &str = "START CONVERGENCE";
pub const BLOCK_END: &str = "END CONVERGENCE";
pub const CHEMISTRY_FAILURE_MARKER: &str = "CHEMICAL EQUILIBRIUM FAILED";

pub const HEADER_ROWS: usize = 3;
pub const TABLE_ROWS: usize = 72;
pub const FLUX_ERROR_COLUMN: usize = 11;
pub const FLUX_DERIVATIVE_COLUMN: usize = 12;

const ASTERISK_FIELD: &str = "*********";

static MERGED_DECIMALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.[0-9]{3})([0-9])").expect("static pattern"));
static MERGED_EXPONENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(E.[0-9]{2})").expect("static pattern"));

/// Restores column separation in fixed-width ATLAS tables. Every minus sign
/// that is not part of an exponent gets a leading space, asterisk-filled
/// fields become [`OVERFLOW_SENTINEL`], and numbers that run into each other
/// are split after three decimals or a two-digit exponent.
pub fn normalize_table_text(text: &str) -> String {
    let text = text
        .replace("E-", "E=")
        .replace('-', " -")
        .replace("E=", "E-")
        .replace(ASTERISK_FIELD, "99999.999");
    let text = MERGED_DECIMALS.replace_all(&text, "${1} ${2}");
    MERGED_EXPONENTS.replace_all(&text, "${1} ").into_owned()
}

fn finite_field(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Maximum absolute flux error and flux-derivative error over the rows of a
/// normalized table, or `None` when any row is short, non-numeric or holds a
/// non-finite value.
pub fn flux_errors(rows: &[&str]) -> Option<(f64, f64)> {
    if rows.is_empty() {
        return None;
    }
    let mut max_err = 0.0_f64;
    let mut max_de = 0.0_f64;
    for row in rows {
        let fields: Vec<&str> = row.split_whitespace().collect();
        let err = finite_field(fields.get(FLUX_ERROR_COLUMN)?)?;
        let de = finite_field(fields.get(FLUX_DERIVATIVE_COLUMN)?)?;
        max_err = max_err.max(err.abs());
        max_de = max_de.max(de.abs());
    }
    Some((max_err, max_de))
}

/// One iteration table cut out of the main log.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Header and data rows after normalization, as written to
    /// `output_last_iteration.out`.
    pub table: String,
    pub max_flux_error: f64,
    pub max_flux_derivative_error: f64,
    pub chemistry_failed: bool,
}

fn parse_block(body: &str, chemistry_failed: bool) -> RawBlock {
    let normalized = normalize_table_text(body.trim_matches('\n'));
    let lines: Vec<&str> = normalized.lines().filter(|line| !line.trim().is_empty()).collect();
    let rows = lines.get(HEADER_ROWS..).unwrap_or(&[]);
    let errors = if rows.len() == TABLE_ROWS {
        flux_errors(rows)
    } else {
        None
    };
    let (max_flux_error, max_flux_derivative_error) = if chemistry_failed {
        (CHEMISTRY_FAILURE_SENTINEL, CHEMISTRY_FAILURE_SENTINEL)
    } else {
        errors.unwrap_or((OVERFLOW_SENTINEL, OVERFLOW_SENTINEL))
    };
    RawBlock {
        table: lines.join("\n"),
        max_flux_error,
        max_flux_derivative_error,
        chemistry_failed,
    }
}

/// Every delimited iteration table in `log`, in order. A chemical-equilibrium
/// failure reported since the previous table marks the following one.
pub fn iteration_blocks(log: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some(start) = log[cursor..].find(BLOCK_START) {
        let start = cursor + start;
        let body_start = start + BLOCK_START.len();
        let Some(end) = log[body_start..].find(BLOCK_END) else {
            break;
        };
        let end = body_start + end;
        let chemistry_failed = log[cursor..end].contains(CHEMISTRY_FAILURE_MARKER);
        blocks.push(parse_block(&log[body_start..end], chemistry_failed));
        cursor = end + BLOCK_END.len();
    }
    blocks
}

/// Reads only the final table of `log`: the text after the last `TEFF`,
/// normalized, without its last line. Unparseable tables report
/// [`OVERFLOW_SENTINEL`] for both errors.
pub fn last_iteration_table(log: &str) -> (String, f64, f64) {
    let tail = log.rfind("TEFF").map_or("", |start| &log[start..]);
    let normalized = normalize_table_text(tail);
    let mut lines: Vec<&str> = normalized.trim().lines().collect();
    lines.pop();
    let table = lines.join("\n");
    let rows: Vec<&str> = lines
        .iter()
        .skip(HEADER_ROWS)
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let (err, de) = flux_errors(&rows).unwrap_or((OVERFLOW_SENTINEL, OVERFLOW_SENTINEL));
    (table, err, de)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        BLOCK_END, BLOCK_START, CHEMISTRY_FAILURE_MARKER, TABLE_ROWS, iteration_blocks,
        last_iteration_table, normalize_table_text,
    };
    use crate::convergence::{CHEMISTRY_FAILURE_SENTINEL, OVERFLOW_SENTINEL};

    /// One delimited table whose worst layer has the given errors.
    pub(crate) fn block(iteration: usize, err: f64, de: f64) -> String {
        let mut text = format!(
            "{BLOCK_START}\n TEFF   5770.  LOG G 4.44000  ITERATION {iteration:>3}\n\
             \x20  J      RHOX     T         P         XNE       RHO      ABROSS   HEIGHT   TAUROS   FLXCNV   PRAD    FLXERR   FLXDRV\n\
             \x20                                                                                                          PERCENT  PERCENT\n"
        );
        for layer in 1..=TABLE_ROWS {
            let (row_err, row_de) = if layer == 40 { (err, de) } else { (0.01, 0.02) };
            text.push_str(&format!(
                "{layer:>4} 1.234E-03 5000.0 1.000E+04 1.000E+12 1.000E-08 1.000E+00 1.000E+02 1.000E+00 0.000E+00 1.000E-01 {row_err:>8.3} {row_de:>8.3}\n"
            ));
        }
        text.push_str(BLOCK_END);
        text.push('\n');
        text
    }

    #[test]
    fn merged_columns_are_separated() {
        assert_eq!(normalize_table_text("1.000E-05-2.345"), "1.000E-05  -2.345");
        assert_eq!(normalize_table_text("12.3456"), "12.345 6");
        assert_eq!(normalize_table_text("*********"), "99999.999");
        assert_eq!(normalize_table_text("1.0E+001.5"), "1.0E+00 1.5");
    }

    #[test]
    fn blocks_reduce_to_maximum_absolute_errors() {
        let log = format!("{}{}", block(1, 12.5, -150.0), block(2, -0.5, 4.0));
        let blocks = iteration_blocks(&log);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].max_flux_error, 12.5);
        assert_eq!(blocks[0].max_flux_derivative_error, 150.0);
        assert_eq!(blocks[1].max_flux_error, 0.5);
        assert!(blocks[1].table.starts_with(" TEFF"));
        assert_eq!(blocks[1].table.lines().count(), 3 + TABLE_ROWS);
    }

    #[test]
    fn chemistry_failures_use_their_own_sentinel() {
        let log = format!(
            "{}{CHEMISTRY_FAILURE_MARKER}\n{}",
            block(1, 0.1, 0.1),
            block(2, 0.1, 0.1)
        );
        let blocks = iteration_blocks(&log);
        assert!(!blocks[0].chemistry_failed);
        assert!(blocks[1].chemistry_failed);
        assert_eq!(blocks[1].max_flux_error, CHEMISTRY_FAILURE_SENTINEL);
    }

    #[test]
    fn truncated_blocks_are_treated_as_overflow() {
        let log = format!("{BLOCK_START}\n TEFF 5770.\nheader\nheader\n   1 garbage\n{BLOCK_END}\n");
        let blocks = iteration_blocks(&log);
        assert_eq!(blocks[0].max_flux_error, OVERFLOW_SENTINEL);
        assert!(iteration_blocks("no tables at all").is_empty());
    }

    #[test]
    fn non_finite_errors_make_a_block_unreadable() {
        let log = format!(
            "{}{}{}",
            block(1, f64::NAN, 1.0),
            block(2, 0.5, f64::INFINITY),
            block(3, 0.5, 1.0)
        );
        let blocks = iteration_blocks(&log);
        assert_eq!(blocks[0].max_flux_error, OVERFLOW_SENTINEL);
        assert_eq!(blocks[0].max_flux_derivative_error, OVERFLOW_SENTINEL);
        assert_eq!(blocks[1].max_flux_error, OVERFLOW_SENTINEL);
        assert_eq!(blocks[2].max_flux_error, 0.5);
        let (_, err, _) = last_iteration_table(&block(1, f64::NAN, 1.0));
        assert_eq!(err, OVERFLOW_SENTINEL);
    }

    #[test]
    fn last_table_reader_matches_the_final_block() {
        let log = format!("{}{}", block(1, 50.0, 50.0), block(2, 0.75, 3.0));
        let (table, err, de) = last_iteration_table(&log);
        assert_eq!((err, de), (0.75, 3.0));
        assert!(!table.contains(BLOCK_END));
        let (_, err, de) = last_iteration_table("no table here");
        assert_eq!((err, de), (OVERFLOW_SENTINEL, OVERFLOW_SENTINEL));
    }
}
