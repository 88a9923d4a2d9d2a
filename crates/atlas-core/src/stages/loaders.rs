//! Readers for the tables the in-memory SYNTHE stages consume: punched-card
//! text images, fixed-column Fortran tables, and the unformatted sequential
//! line-list records written by SYNBEG and the line-list builders.

use crate::common::files::{read_bytes, read_text};
use crate::domain::errors::INCOMPATIBLE_TABLE;
use crate::domain::{AtlasError, AtlasResult};
use serde::Serialize;
use std::path::Path;

/// Card width of ATLAS and SYNTHE text input.
pub const CARD_WIDTH: usize = 80;

const MARKER_BYTES: usize = 4;
const LINE_RECORD_BYTES: usize = 40;
const NLTE_RECORD_BYTES: usize = 72;
const META_RECORD_BYTES: usize = 2856;

/// A text file as a block of fixed-width rows, blank padded on the right and
/// truncated past the card width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    width: usize,
    bytes: Vec<u8>,
}

impl CardImage {
    pub fn from_text(text: &str, width: usize) -> Self {
        let mut bytes = Vec::new();
        for line in text.trim_end().lines() {
            let line = line.as_bytes();
            let kept = line.len().min(width);
            bytes.extend_from_slice(&line[..kept]);
            bytes.resize(bytes.len() + width - kept, b' ');
        }
        Self { width, bytes }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        self.bytes.len().checked_div(self.width).unwrap_or(0)
    }

    pub fn row(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.width)?;
        self.bytes.get(start..start + self.width)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

pub fn load_card_image(path: &Path, width: usize) -> AtlasResult<CardImage> {
    let text = read_text(path, "card image")?;
    Ok(CardImage::from_text(&text, width))
}

/// Slice of a fixed-column row; columns past the end of a short line are
/// empty rather than out of bounds.
fn column(line: &str, start: usize, end: usize) -> &str {
    let bytes = line.as_bytes();
    let end = end.min(bytes.len());
    if start >= end {
        return "";
    }
    std::str::from_utf8(&bytes[start..end]).unwrap_or("")
}

fn parse_or(field: &str, fallback: f64) -> f64 {
    field.trim().parse::<f64>().unwrap_or(fallback)
}

/// One row of the chemical-constants table: species code, ionization
/// potential and six partition-function coefficients.
pub type ChemicalConstant = [f64; 8];

/// Parses rows laid out as `F18.2,F7.3,6E11.4`. Blank or unreadable fields
/// become zero.
pub fn parse_chemical_constants(text: &str) -> Vec<ChemicalConstant> {
    text.trim_end()
        .lines()
        .map(|line| {
            let mut row = [0.0; 8];
            row[0] = parse_or(column(line, 0, 18), 0.0);
            row[1] = parse_or(column(line, 18, 25), 0.0);
            for (slot, value) in row[2..].iter_mut().enumerate() {
                let start = 25 + slot * 11;
                *value = parse_or(column(line, start, start + 11), 0.0);
            }
            row
        })
        .collect()
}

pub fn load_chemical_constants(path: &Path) -> AtlasResult<Vec<ChemicalConstant>> {
    let text = read_text(path, "chemical constants table")?;
    Ok(parse_chemical_constants(&text))
}

/// One row of the helium Stark-broadening table.
pub type HeliumProfile = [f32; 10];

/// Parses rows laid out as `1X,F5.1,F8.2,8F7.3`. Blank or unreadable fields
/// become NaN so that the kernel can tell them from real zeros.
pub fn parse_helium_tables(text: &str) -> Vec<HeliumProfile> {
    text.trim_end()
        .lines()
        .map(|line| {
            let mut row = [f32::NAN; 10];
            row[0] = parse_or(column(line, 1, 6), f64::NAN) as f32;
            row[1] = parse_or(column(line, 6, 14), f64::NAN) as f32;
            for (slot, value) in row[2..].iter_mut().enumerate() {
                let start = 14 + slot * 7;
                *value = parse_or(column(line, start, start + 7), f64::NAN) as f32;
            }
            row
        })
        .collect()
}

pub fn load_helium_tables(path: &Path) -> AtlasResult<Vec<HeliumProfile>> {
    let text = read_text(path, "helium Stark table")?;
    Ok(parse_helium_tables(&text))
}

/// An LTE line from `fort.12`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineRecord {
    pub nbuff: i32,
    pub cgf: f32,
    pub nelion: i32,
    pub elo: f32,
    pub gamrf: f32,
    pub gamsf: f32,
    pub gamwf: f32,
    pub alpha: f32,
}

/// A line from `fort.19`. SYNTHE treats these in LTE as well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlteRecord {
    pub wlvac: f64,
    pub elo: f32,
    pub gf: f32,
    pub nblo: i32,
    pub nbup: i32,
    pub nelion: i32,
    pub line_type: i32,
    pub ncon: i32,
    pub nelionx: i32,
    pub gammar: f32,
    pub gammas: f32,
    pub gammaw: f32,
    pub alpha: f32,
    pub nbuff: i32,
    pub limb: i32,
}

/// Run metadata written by SYNBEG into `fort.93`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineListMeta {
    pub n_lines: i32,
    pub n_wl: i32,
    pub ifvac: i32,
    pub n_lines_f19: i32,
    pub wl_start: f64,
    pub wl_end: f64,
    pub resolution: f64,
    pub ratio: f64,
    pub ratiolg: f64,
    pub cutoff: f32,
}

/// `fort.12`, `fort.19` and `fort.93` of one SYNBEG run. The three files are
/// only meaningful together.
#[derive(Debug, Clone, PartialEq)]
pub struct LineList {
    pub lines: Vec<LineRecord>,
    pub nlte: Vec<NlteRecord>,
    pub meta: LineListMeta,
}

/// Payload of one Fortran record with typed little-endian accessors.
struct Record<'a>(&'a [u8]);

impl Record<'_> {
    fn take<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(&self.0[offset..offset + N]);
        buffer
    }

    fn i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.take(offset))
    }

    fn f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.take(offset))
    }

    fn f64(&self, offset: usize) -> f64 {
        f64::from_le_bytes(self.take(offset))
    }
}

fn incompatible(name: &str, detail: impl std::fmt::Display) -> AtlasError {
    AtlasError::input_validation(INCOMPATIBLE_TABLE, format!("{name}: {detail}"))
}

/// Splits `bytes` into sequential records of `record_bytes` each (markers
/// included) and checks both markers of every record.
fn records<'a>(bytes: &'a [u8], record_bytes: usize, name: &str) -> AtlasResult<Vec<Record<'a>>> {
    if bytes.len() % record_bytes != 0 {
        return Err(incompatible(
            name,
            format!(
                "{} bytes is not a whole number of {record_bytes}-byte records",
                bytes.len()
            ),
        ));
    }
    bytes
        .chunks_exact(record_bytes)
        .enumerate()
        .map(|(index, chunk)| framed(chunk, name, index))
        .collect()
}

fn framed<'a>(chunk: &'a [u8], name: &str, index: usize) -> AtlasResult<Record<'a>> {
    let payload = chunk.len() - 2 * MARKER_BYTES;
    let frame = Record(chunk);
    let (head, tail) = (frame.i32(0), frame.i32(chunk.len() - MARKER_BYTES));
    if usize::try_from(head).ok() != Some(payload) || head != tail {
        return Err(incompatible(
            name,
            format!("record {index} is framed as {head}/{tail} bytes, expected {payload}"),
        ));
    }
    Ok(Record(&chunk[MARKER_BYTES..MARKER_BYTES + payload]))
}

pub fn parse_lines(bytes: &[u8]) -> AtlasResult<Vec<LineRecord>> {
    let lines = records(bytes, LINE_RECORD_BYTES, "fort.12")?
        .into_iter()
        .map(|record| LineRecord {
            nbuff: record.i32(0),
            cgf: record.f32(4),
            nelion: record.i32(8),
            elo: record.f32(12),
            gamrf: record.f32(16),
            gamsf: record.f32(20),
            gamwf: record.f32(24),
            alpha: record.f32(28),
        })
        .collect();
    Ok(lines)
}

pub fn parse_nlte_lines(bytes: &[u8]) -> AtlasResult<Vec<NlteRecord>> {
    let lines = records(bytes, NLTE_RECORD_BYTES, "fort.19")?
        .into_iter()
        .map(|record| NlteRecord {
            wlvac: record.f64(0),
            elo: record.f32(8),
            gf: record.f32(12),
            nblo: record.i32(16),
            nbup: record.i32(20),
            nelion: record.i32(24),
            line_type: record.i32(28),
            ncon: record.i32(32),
            nelionx: record.i32(36),
            gammar: record.f32(40),
            gammas: record.f32(44),
            gammaw: record.f32(48),
            alpha: record.f32(52),
            nbuff: record.i32(56),
            limb: record.i32(60),
        })
        .collect();
    Ok(lines)
}

/// Reads the first `fort.93` record. SYNTHE here has no NLTE treatment and no
/// line output, and needs every line of the list, so records that ask for
/// anything else are rejected.
pub fn parse_line_list_meta(bytes: &[u8]) -> AtlasResult<LineListMeta> {
    let chunk = bytes.get(..META_RECORD_BYTES).ok_or_else(|| {
        incompatible(
            "fort.93",
            format!(
                "{} bytes is shorter than one {META_RECORD_BYTES}-byte record",
                bytes.len()
            ),
        )
    })?;
    let record = framed(chunk, "fort.93", 0)?;

    let ifnlte = record.i32(12);
    if ifnlte != 0 {
        return Err(incompatible("fort.93", format!("NLTE flag is {ifnlte}, expected 0")));
    }
    let include_all = record.i32(2796);
    if include_all != 1 {
        return Err(incompatible(
            "fort.93",
            format!("line inclusion flag is {include_all}, expected 1"),
        ));
    }
    let linout = record.i32(2844);
    if linout != -1 {
        return Err(incompatible(
            "fort.93",
            format!("line output flag is {linout}, expected -1"),
        ));
    }

    Ok(LineListMeta {
        n_lines: record.i32(0),
        n_wl: record.i32(4),
        ifvac: record.i32(8),
        n_lines_f19: record.i32(16),
        wl_start: record.f64(2800),
        wl_end: record.f64(2808),
        resolution: record.f64(2816),
        ratio: record.f64(2824),
        ratiolg: record.f64(2832),
        cutoff: record.f32(2840),
    })
}

/// Loads `fort.12`, `fort.19` and `fort.93` from `dir` and checks that the
/// metadata counts match the lists.
pub fn load_line_list(dir: &Path) -> AtlasResult<LineList> {
    let lines = parse_lines(&read_bytes(&dir.join("fort.12"), "line list")?)?;
    let nlte = parse_nlte_lines(&read_bytes(&dir.join("fort.19"), "NLTE line list")?)?;
    let meta = parse_line_list_meta(&read_bytes(&dir.join("fort.93"), "line list metadata")?)?;
    if usize::try_from(meta.n_lines).ok() != Some(lines.len()) {
        return Err(incompatible(
            "fort.93",
            format!("declares {} lines but fort.12 holds {}", meta.n_lines, lines.len()),
        ));
    }
    if usize::try_from(meta.n_lines_f19).ok() != Some(nlte.len()) {
        return Err(incompatible(
            "fort.93",
            format!(
                "declares {} NLTE lines but fort.19 holds {}",
                meta.n_lines_f19,
                nlte.len()
            ),
        ));
    }
    Ok(LineList { lines, nlte, meta })
}
