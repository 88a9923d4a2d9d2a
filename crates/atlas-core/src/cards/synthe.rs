use crate::domain::errors::FIXED_WIDTH_OVERFLOW;
use crate::domain::{AtlasError, AtlasResult};
use crate::formatting::fit_fixed;
use std::path::Path;

/// Prefix that turns an ATLAS summary model into SYNTHE input.
pub const SYNTHE_PREAMBLE: &str = "SURFACE FLUX\n\
ITERATIONS 1 PRINT 2 PUNCH 2\n\
CORRECTION OFF\n\
PRESSURE OFF\n\
READ MOLECULES\n\
MOLECULES ON\n";

/// Column legend written under the `synbeg` card.
pub const SYNTHE_CARD_HEADER: &str =
    "AIRorVAC  WLBEG     WLEND     RESOLU    TURBV  IFNLTE LINOUT CUTOFF        NREAD";

const ATOMIC_LINE_LISTS: [&str; 8] = [
    "gf0800.100",
    "gf1200.100",
    "gf0200.100",
    "gf0300.100",
    "gf0400.100",
    "gf0500.100",
    "gf0600.100",
    "gf3000.100",
];

const MOLECULAR_LINE_LISTS: [(&str, &str); 23] = [
    ("chmasseron.asc", "chmasseron"),
    ("mgh.asc", "mgh"),
    ("nh.asc", "nh"),
    ("ohupdate.asc", "oh"),
    ("sihax.asc", "sihax"),
    ("h2.asc", "h2"),
    ("h2xx.asc", "h2xx"),
    ("hdxx.asc", "hdxx"),
    ("c2ax.asc", "c2ax"),
    ("c2ba.asc", "c2ba"),
    ("c2dabrookek.asc", "c2da"),
    ("c2ea.asc", "c2ea"),
    ("cnaxbrookek.asc", "cnax"),
    ("cnbxbrookek.asc", "cnbx"),
    ("cnxx12brooke.asc", "cnxx12"),
    ("coax.asc", "coax"),
    ("coxx.asc", "coxx"),
    ("sioax.asc", "sioax"),
    ("sioex.asc", "sioex"),
    ("sioxx.asc", "sioxx"),
    ("tioschwenke.bin", "tio"),
    ("h2ofastfix.bin", "h2o"),
    ("eschwenke.bin", "eschwenke"),
];

/// Parameters of one SYNTHE wavelength batch. Wavelengths are in nm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheRequest {
    pub air: bool,
    pub wlbeg: f64,
    pub wlend: f64,
    pub resolution: f64,
    pub turbv: f64,
    pub ifnlte: i32,
    pub linout: i32,
    pub cutoff: f64,
    pub ifpred: i32,
    pub nread: i32,
}

impl SyntheRequest {
    pub fn new(wlbeg: f64, wlend: f64, resolution: f64, turbv: f64) -> Self {
        Self {
            air: true,
            wlbeg,
            wlend,
            resolution,
            turbv,
            ifnlte: 0,
            linout: 30,
            cutoff: 0.0001,
            ifpred: 1,
            nread: 0,
        }
    }
}

fn integer_field(label: &str, value: i32, width: usize) -> AtlasResult<String> {
    let rendered = format!("{value:>width$}");
    if rendered.len() > width {
        return Err(AtlasError::input_validation(
            FIXED_WIDTH_OVERFLOW,
            format!("{label} = {value} does not fit in {width} columns"),
        ));
    }
    Ok(rendered)
}

fn real_field(label: &str, value: f64, width: usize) -> AtlasResult<String> {
    fit_fixed(value, width, 4).map_err(|_| {
        AtlasError::input_validation(
            FIXED_WIDTH_OVERFLOW,
            format!("{label} = {value} does not fit in {width} columns"),
        )
    })
}

/// The `synbeg` card: AIRorVAC[0:10] WLBEG[10:20] WLEND[20:30] RESOLU[30:40]
/// TURBV[40:50] IFNLTE[50:53] LINOUT[53:60] CUTOFF[60:70] IFPRED[70:75]
/// NREAD[75:80].
pub fn synbeg_card(request: &SyntheRequest) -> AtlasResult<String> {
    let medium = if request.air { "AIR" } else { "VAC" };
    Ok(format!(
        "{medium:<10}{}{}{}{}{}{}{}{}{}",
        real_field("WLBEG", request.wlbeg, 10)?,
        real_field("WLEND", request.wlend, 10)?,
        real_field("RESOLU", request.resolution, 10)?,
        real_field("TURBV", request.turbv, 10)?,
        integer_field("IFNLTE", request.ifnlte, 3)?,
        integer_field("LINOUT", request.linout, 7)?,
        real_field("CUTOFF", request.cutoff, 10)?,
        integer_field("IFPRED", request.ifpred, 5)?,
        integer_field("NREAD", request.nread, 5)?,
    ))
}

/// Launcher for batch `batch` (1-based); everything it writes lands in
/// `synthe_{batch}/` and the final spectrum in `synthe_{batch}/spectrum.asc`.
pub fn synthe_launch_script(
    run_dir: &Path,
    bin_dir: &Path,
    data_dir: &Path,
    batch: usize,
    request: &SyntheRequest,
) -> AtlasResult<String> {
    let run = run_dir.display();
    let bin = bin_dir.display();
    let data = data_dir.display();
    let model = run_dir.join("output_synthe.out");
    let model = model.display();

    let mut script = format!(
        "mkdir -p {run}/synthe_{batch}\n\
         cd {run}/synthe_{batch}\n\
         ln -s {data}/molecules.dat fort.2\n\
         ln -s {data}/continua.dat fort.17\n\
         {bin}/xnfpelsyn.exe< {model}>xnfpelsyn.out\n\
         mv fort.10 xnfpelsyn.dat\n\
         rm -f fort.*\n\
         {bin}/synbeg.exe<<\"EOF\">synbeg.out\n\
         {card}\n\
         {SYNTHE_CARD_HEADER}\n\
         EOF\n",
        card = synbeg_card(request)?,
    );
    for list in ATOMIC_LINE_LISTS {
        let stem = list.trim_end_matches(".100");
        script.push_str(&format!(
            "ln -s {data}/{list} fort.11\n{bin}/rgfalllinesnew.exe>{stem}.out\nrm fort.11\n"
        ));
    }
    for (list, stem) in &MOLECULAR_LINE_LISTS[..20] {
        script.push_str(&format!(
            "ln -s {data}/molecules/{list} fort.11\n{bin}/rmolecasc.exe>{stem}.out\nrm fort.11\n"
        ));
    }
    script.push_str(&format!(
        "ln -s {data}/fclowlines.bin fort.11\n\
         {bin}/rpredict.exe>predictedlow.out\n\
         rm fort.11\n\
         ln -s {data}/fchighlines.bin fort.11\n\
         {bin}/rpredict.exe>predicthigh.out\n\
         rm fort.11\n\
         ln -s {data}/molecules/{tio} fort.11\n\
         ln -s {data}/molecules/{eschwenke} fort.48\n\
         {bin}/rschwenk.exe>rschwenk.out\n\
         rm fort.11 fort.48\n\
         ln -s {data}/molecules/{h2o} fort.11\n\
         {bin}/rh2ofast.exe>h2ofastfix.out\n\
         rm fort.11\n\
         ln xnfpelsyn.dat fort.10\n\
         ln -s {data}/he1tables.dat fort.18\n\
         {bin}/synthe.exe>synthe.out\n\
         ln -s {data}/molecules.dat fort.2\n\
         cat <<\"EOF\" >fort.25\n\
         0.0       0.        1.        0.        0.        0.        0.        0.\n\
         0.\n\
         RHOXJ     R1        R101      PH1       PC1       PSI1      PRDDOP    PRDPOW\n\
         EOF\n\
         {bin}/spectrv.exe<{model}>spectrv.out\n\
         mv fort.7 spectrum.bin\n\
         rm -f fort.*\n\
         ln -s spectrum.bin fort.1\n\
         {bin}/converfsynnmtoa.exe>converfsynnmtoa.out\n\
         mv fort.2 spectrum.asc\n\
         rm -f fort.* spectrum.bin xnfpelsyn.dat\n",
        tio = MOLECULAR_LINE_LISTS[20].0,
        h2o = MOLECULAR_LINE_LISTS[21].0,
        eschwenke = MOLECULAR_LINE_LISTS[22].0,
    ));
    Ok(script)
}
