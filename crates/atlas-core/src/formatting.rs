//! Fixed-width number rendering for FORTRAN card decks and text artifacts.

use crate::domain::errors::{FIXED_WIDTH_OVERFLOW, FIXED_WIDTH_UNDERFLOW};
use crate::domain::{AtlasError, AtlasResult};
use std::fs;
use std::path::Path;

pub fn format_fixed_f64(value: f64, width: usize, precision: usize) -> String {
    format!(
        "{value:>width$.precision$}",
        width = width,
        precision = precision
    )
}

/// Renders `value` right-aligned in `width` columns with a FORTRAN-style
/// exponent (`1.23456789E+03`).
pub fn format_exponent_f64(value: f64, width: usize, precision: usize) -> String {
    let rendered = format!("{value:.precision$E}", precision = precision);
    let formatted = match rendered.split_once('E') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}E{sign}{digits:0>2}")
        }
        None => rendered,
    };
    format!("{formatted:>width$}", width = width)
}

/// Renders `value` with the largest precision (up to `max_precision`) that
/// still fits in `width` columns.
pub fn fit_fixed(value: f64, width: usize, max_precision: usize) -> AtlasResult<String> {
    for precision in (0..=max_precision).rev() {
        let rendered = format_fixed_f64(value, width, precision);
        if rendered.len() <= width {
            return Ok(rendered);
        }
    }
    Err(AtlasError::input_validation(
        FIXED_WIDTH_OVERFLOW,
        format!("value {value} does not fit in {width} columns"),
    ))
}

/// Renders `value` with a fixed precision and rejects renderings that exceed
/// `width` or lose a non-zero value to rounding.
pub fn fixed_field(
    label: &str,
    value: f64,
    width: usize,
    precision: usize,
) -> AtlasResult<String> {
    let rendered = format_fixed_f64(value, width, precision);
    if rendered.len() > width {
        return Err(AtlasError::input_validation(
            FIXED_WIDTH_OVERFLOW,
            format!("{label} = {value} does not fit in {width} columns"),
        ));
    }
    if value != 0.0 && rendered.trim().parse::<f64>().unwrap_or(0.0) == 0.0 {
        return Err(AtlasError::input_validation(
            FIXED_WIDTH_UNDERFLOW,
            format!("{label} = {value} rounds to zero in {width} columns"),
        ));
    }
    Ok(rendered)
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

pub fn write_text_artifact(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, normalize_text_artifact(content))
}

#[cfg(test)]
mod tests {
    use super::{
        fit_fixed, fixed_field, format_exponent_f64, format_fixed_f64, normalize_text_artifact,
        write_text_artifact,
    };
    use crate::domain::errors::{FIXED_WIDTH_OVERFLOW, FIXED_WIDTH_UNDERFLOW};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn fixed_width_float_formatting_right_aligns() {
        assert_eq!(format_fixed_f64(5750.0, 6, 0), "  5750");
        assert_eq!(format_fixed_f64(-0.25, 8, 5), "-0.25000");
    }

    #[test]
    fn exponent_formatting_uses_two_digit_signed_exponent() {
        assert_eq!(format_exponent_f64(1234.5, 15, 8), " 1.23450000E+03");
        assert_eq!(format_exponent_f64(0.00012, 10, 3), " 1.200E-04");
        assert_eq!(format_exponent_f64(0.0, 11, 4), " 0.0000E+00");
    }

    #[test]
    fn fit_fixed_drops_precision_before_failing() {
        assert_eq!(fit_fixed(500.0, 10, 4).expect("fits"), "  500.0000");
        assert_eq!(fit_fixed(12345678.9, 10, 4).expect("fits"), "12345678.9");
        let error = fit_fixed(1.0e12, 10, 4).expect_err("too wide");
        assert!(error.is(FIXED_WIDTH_OVERFLOW));
    }

    #[test]
    fn fixed_field_reports_overflow_and_underflow() {
        assert_eq!(fixed_field("zscale", 1.0, 9, 5).expect("fits"), "  1.00000");
        assert!(
            fixed_field("zscale", 1234.0, 9, 5)
                .expect_err("overflow")
                .is(FIXED_WIDTH_OVERFLOW)
        );
        assert!(
            fixed_field("zscale", 1.0e-7, 9, 5)
                .expect_err("underflow")
                .is(FIXED_WIDTH_UNDERFLOW)
        );
    }

    #[test]
    fn text_artifacts_end_with_a_newline() {
        assert_eq!(normalize_text_artifact("a\r\nb"), "a\nb\n");
        assert_eq!(normalize_text_artifact(""), "");

        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("deck.txt");
        write_text_artifact(&path, "READ DECK6").expect("artifact should be written");
        assert_eq!(
            fs::read_to_string(path).expect("artifact should be readable"),
            "READ DECK6\n"
        );
    }
}
