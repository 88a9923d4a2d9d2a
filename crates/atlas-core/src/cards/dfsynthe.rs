use super::{abundance_cards, free_format};
use crate::abundance::AbundanceVector;
use crate::formatting::{format_exponent_f64, format_fixed_f64};
use crate::restart::profile::{grey_temperature, standard_tau_grid};
use std::path::Path;

/// Temperature nodes (K) of the opacity distribution tables.
pub const DFSYNTHE_TEMPERATURES: [f64; 57] = [
    1995.0, 2089.0, 2188.0, 2291.0, 2399.0, 2512.0, 2630.0, 2754.0, 2884.0, 3020.0, 3162.0,
    3311.0, 3467.0, 3631.0, 3802.0, 3981.0, 4169.0, 4365.0, 4571.0, 4786.0, 5012.0, 5370.0,
    5754.0, 6166.0, 6607.0, 7079.0, 7586.0, 8128.0, 8710.0, 9333.0, 10000.0, 11220.0, 12589.0,
    14125.0, 15849.0, 17783.0, 19953.0, 22387.0, 25119.0, 28184.0, 31623.0, 35481.0, 39811.0,
    44668.0, 50119.0, 56234.0, 63096.0, 70795.0, 79433.0, 89125.0, 100000.0, 112202.0,
    125893.0, 141254.0, 158489.0, 177828.0, 199526.0,
];

/// Fortran units DFSYNTHE writes for each standard turbulent velocity.
const VELOCITY_UNITS: [(u32, u32); 5] = [(0, 15), (1, 16), (2, 17), (4, 18), (8, 20)];

/// Shared inputs of every DFSYNTHE-phase launcher.
#[derive(Debug, Clone, Copy)]
pub struct DfsyntheDeck<'a> {
    pub run_dir: &'a Path,
    pub bin_dir: &'a Path,
    pub data_dir: &'a Path,
    pub teff: f64,
    pub logg: f64,
    pub scale_card: &'a str,
    pub abundances: &'a AbundanceVector,
}

pub fn node_directory_name(temperature: f64) -> String {
    format!("dfp_t{temperature:.0}")
}

fn node_label(temperature: f64) -> String {
    format!("{temperature:.0}")
}

pub fn xnfdf_script(deck: &DfsyntheDeck<'_>) -> String {
    let mut script = format!(
        "cd {run}\n\
         cp {data}/molecules.dat fort.2\n\
         cp {data}/pfiron.dat fort.4\n\
         cp {data}/continua.dat fort.17\n\
         {bin}/xnfdf.exe<<EOF>xnfdf.out\n\
         READ MOLECULES\n\
         MOLECULES ON\n\
         ITERATIONS 1 PRINT 0 PUNCH 0\n\
         READ FREQUENCIES 1 1 1 TEST\n\
         1 1 1\n",
        run = deck.run_dir.display(),
        data = deck.data_dir.display(),
        bin = deck.bin_dir.display(),
    );
    let abundances = abundance_cards(deck.scale_card, deck.abundances);
    for temperature in DFSYNTHE_TEMPERATURES {
        script.push_str(&format!(
            "TEFF   {teff}  GRAVITY {logg} LTE\n\
             TITLE TEMPERATUES AND PRESSURES FOR DISTRIBUTION FUNCTION CALCULATION\n \
             OPACITY IFOP 1 1 1 1 1 1 1 1 1 1 1 1 1 0 1 0 0 0 0 0\n \
             CONVECTION ON   1.25 TURBULENCE OFF  0.00  0.00  0.00  0.00\n\
             {abundances}\n\
             READ DECK6 25 RHOX,T,P,XNE,ABROSS,ACCRAD,VTURB,CONVFRAC,VCONV\n",
            teff = free_format(deck.teff),
            logg = free_format(deck.logg),
        ));
        for step in 0..25 {
            let pressure = 10.0_f64.powf(-4.0 + 0.5 * f64::from(step));
            let pressure = format_exponent_f64(pressure, 11, 3);
            script.push_str(&format!(
                "{pressure}{}.{pressure}  0 0 0 0 0\n",
                format_fixed_f64(temperature, 8, 0)
            ));
        }
        script.push_str(" 1\nBEGIN\n");
    }
    script.push_str(
        "END\n\
         EOF\n\
         mv fort.10 xnfpdf.dat\n\
         mv fort.11 xnfpdfmax.dat\n\
         rm -f fort.*\n",
    );
    script
}

/// Launcher for one temperature node. It runs in its own scratch directory so
/// that nodes never share Fortran unit files.
pub fn dfsynthe_node_script(deck: &DfsyntheDeck<'_>, node: usize) -> String {
    let temperature = DFSYNTHE_TEMPERATURES[node];
    let label = node_label(temperature);
    let selector: String = (0..DFSYNTHE_TEMPERATURES.len())
        .map(|index| if index == node { '1' } else { '0' })
        .collect();
    let run = deck.run_dir.display();
    let data = deck.data_dir.display();
    let bin = deck.bin_dir.display();

    let mut script = format!(
        "cd {run}/{node_dir}\n\
         ln -s {run}/xnfpdf.dat fort.10\n\
         ln -s {run}/xnfpdfmax.dat fort.22\n\
         ln -s {data}/lowlinesdf.bin fort.11\n\
         ln -s {data}/highlinesdf.bin fort.21\n\
         ln -s {data}/diatomicsdf.bin fort.31\n\
         ln -s {data}/tiolinesdf.bin fort.41\n\
         ln -s {data}/h2olinesdf.bin fort.43\n\
         ln -s {data}/nltelinesdf.bin fort.51\n\
         {bin}/dfsynthe.exe<<EOF>dfp00t{label}.out\n\
         {selector}\n\
         EOF\n",
        node_dir = node_directory_name(temperature),
    );
    for (velocity, unit) in VELOCITY_UNITS {
        script.push_str(&format!("mv fort.{unit} dfp00t{label}vt{velocity}.bin\n"));
    }
    for (velocity, _) in VELOCITY_UNITS {
        script.push_str(&format!(
            "mv dfp00t{label}vt{velocity}.bin fort.1\n\
             {bin}/dfsortp.exe>dfsortp.out\n\
             mv fort.2 {run}/dfp00t{label}vt{velocity}sortp.asc\n\
             mv fort.1 dfp00t{label}vt{velocity}.bin\n"
        ));
    }
    script.push_str("rm -f fort.*\n");
    script
}

/// Merges the sorted per-node tables of one velocity into `p00big{v}.bdf`.
pub fn separatedf_script(deck: &DfsyntheDeck<'_>, velocity: u32) -> String {
    let run = deck.run_dir.display();
    let mut script = format!("cd {run}\n");
    for (index, temperature) in DFSYNTHE_TEMPERATURES.iter().enumerate() {
        script.push_str(&format!(
            "mv dfp00t{}vt{velocity}sortp.asc fort.{}\n",
            node_label(*temperature),
            index + 10
        ));
    }
    script.push_str(&format!(
        "{bin}/separatedf.exe\n\
         mv fort.2 p00big{velocity}.bdf\n\
         mv fort.3 p00lit{velocity}.bdf\n\
         rm -f fort.*\n",
        bin = deck.bin_dir.display(),
    ));
    script
}

/// Rosseland opacities for one velocity, evaluated on a grey 72-layer model
/// at the requested effective temperature.
pub fn kappa9_script(deck: &DfsyntheDeck<'_>, velocity: u32) -> String {
    let gravity = 10.0_f64.powf(deck.logg);
    let tau = standard_tau_grid();
    let mut rows = String::new();
    for value in &tau {
        let mut row = format_exponent_f64(*value, 15, 8);
        row.push_str(&format_fixed_f64(grey_temperature(deck.teff, *value), 9, 1));
        for field in [
            gravity * value,
            0.0,
            1.0,
            0.0,
            f64::from(velocity) * 1.0e5,
            0.0,
            0.0,
        ] {
            row.push_str(&format_exponent_f64(field, 10, 3));
        }
        rows.push_str(&row);
        rows.push('\n');
    }

    format!(
        "cd {run}\n\
         ln -s {data}/molecules.dat fort.2\n\
         mv p00big{velocity}.bdf fort.9\n\
         {bin}/kappa9.exe<<EOF>kapm40k2.out\n\
         MOLECULES ON\n\
         READ MOLECULES\n\
         FREQUENCIES 337 1 337 BIG\n\
         ITERATIONS 1 PRINT 1 PUNCH 0\n\
         TITLE ROSSELAND OPACITY\n \
         OPACITY IFOP 1 1 1 1 1 1 1 1 1 1 1 1 1 0 1 0 0 0 0 0\n \
         CONVECTION ON   1.25 TURBULENCE OFF  0.00  0.00  0.00  0.00\n\
         TEFF   {teff}  GRAVITY {logg} LTE\n\
         {abundances}\n\
         READ DECK6 72 RHOX,T,P,XNE,ABROSS,ACCRAD,VTURB\n\
         {rows}\
         PRADK 0.0000E+00\n\
         VTURB {velocity}.0E5\n\
         BEGIN                    ITERATION  15 COMPLETED\n\
         END\n\
         EOF\n\
         rm -f fort.2\n\
         mv fort.9 p00big{velocity}.bdf\n\
         mv fort.7 kapk{velocity}.dat\n",
        run = deck.run_dir.display(),
        data = deck.data_dir.display(),
        bin = deck.bin_dir.display(),
        teff = free_format(deck.teff),
        logg = free_format(deck.logg),
        abundances = abundance_cards(deck.scale_card, deck.abundances),
    )
}

pub fn kapreadts_script(deck: &DfsyntheDeck<'_>) -> String {
    let mut script = format!("cd {}\n", deck.run_dir.display());
    for (index, (velocity, _)) in VELOCITY_UNITS.iter().enumerate() {
        script.push_str(&format!("mv kapk{velocity}.dat fort.{}\n", index + 11));
    }
    script.push_str(&format!(
        "{}/kapreadts.exe\nmv fort.2 kappa.ros\nrm -f fort.*\n",
        deck.bin_dir.display()
    ));
    script
}

#[cfg(test)]
mod tests {
    use super::{
        DFSYNTHE_TEMPERATURES, DfsyntheDeck, dfsynthe_node_script, kappa9_script,
        kapreadts_script, node_directory_name, separatedf_script, xnfdf_script,
    };
    use crate::abundance::AbundanceVector;
    use std::path::Path;

    fn with_deck<T>(run: impl FnOnce(&DfsyntheDeck<'_>) -> T) -> T {
        let abundances = AbundanceVector::solar();
        let deck = DfsyntheDeck {
            run_dir: Path::new("/runs/odf"),
            bin_dir: Path::new("/opt/bin"),
            data_dir: Path::new("/opt/data/dfsynthe_files"),
            teff: 5770.0,
            logg: 4.44,
            scale_card: "  1.00000",
            abundances: &abundances,
        };
        run(&deck)
    }

    #[test]
    fn temperature_table_spans_the_standard_range() {
        assert_eq!(DFSYNTHE_TEMPERATURES.len(), 57);
        assert_eq!(DFSYNTHE_TEMPERATURES[0], 1995.0);
        assert_eq!(DFSYNTHE_TEMPERATURES[56], 199526.0);
        assert!(DFSYNTHE_TEMPERATURES.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(node_directory_name(10000.0), "dfp_t10000");
    }

    #[test]
    fn xnfdf_deck_lists_every_temperature_node() {
        let script = with_deck(xnfdf_script);
        assert_eq!(script.matches("READ DECK6 25").count(), 57);
        assert_eq!(script.matches("ABUNDANCE SCALE   1.00000").count(), 57);
        assert!(script.contains("  1.000E-04    1995.  1.000E-04  0 0 0 0 0\n"));
        assert!(script.contains("  1.000E+08  199526.  1.000E+08  0 0 0 0 0\n"));
        assert!(script.ends_with("mv fort.11 xnfpdfmax.dat\nrm -f fort.*\n"));
    }

    #[test]
    fn node_launcher_selects_exactly_one_temperature() {
        let script = with_deck(|deck| dfsynthe_node_script(deck, 2));
        assert!(script.starts_with("cd /runs/odf/dfp_t2188\n"));
        assert!(script.contains(&format!("\n001{}\n", "0".repeat(54))));
        assert!(script.contains("mv fort.20 dfp00t2188vt8.bin\n"));
        assert!(script.contains("mv fort.2 /runs/odf/dfp00t2188vt8sortp.asc\n"));
    }

    #[test]
    fn merge_launchers_use_serial_units() {
        let separate = with_deck(|deck| separatedf_script(deck, 4));
        assert!(separate.contains("mv dfp00t1995vt4sortp.asc fort.10\n"));
        assert!(separate.contains("mv dfp00t199526vt4sortp.asc fort.66\n"));
        assert!(separate.contains("mv fort.2 p00big4.bdf\n"));

        let kapreadts = with_deck(kapreadts_script);
        assert!(kapreadts.contains("mv kapk8.dat fort.15\n"));
        assert!(kapreadts.contains("mv fort.2 kappa.ros\n"));
    }

    #[test]
    fn kappa9_deck_has_seventy_two_grey_layers() {
        let script = with_deck(|deck| kappa9_script(deck, 1));
        let deck_start = script
            .find("READ DECK6 72")
            .expect("deck header should be present");
        let rows = script[deck_start..]
            .lines()
            .skip(1)
            .take_while(|line| !line.starts_with("PRADK"))
            .count();
        assert_eq!(rows, 72);
        assert!(script.contains("VTURB 1.0E5\n"));
        assert!(script.contains("mv fort.7 kapk1.dat\n"));
    }
}
