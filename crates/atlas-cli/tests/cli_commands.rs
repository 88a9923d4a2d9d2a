use atlas_core::abundance::AbundanceVector;
use atlas_core::common::elements::ELEMENT_SYMBOLS;
use atlas_core::formatting::format_fixed_f64;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_cli(args: &[&str], working_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_basic-atlas"))
        .args(args)
        .current_dir(working_dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("basic-atlas should launch")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn explicit_listing(vector: &AbundanceVector) -> String {
    let mut rows = vec![format!(
        " H {} HE{}",
        format_fixed_f64(vector.hydrogen(), 8, 5),
        format_fixed_f64(vector.helium(), 8, 5)
    )];
    for chunk in (3..=99).collect::<Vec<usize>>().chunks(10) {
        let row: Vec<String> = chunk
            .iter()
            .map(|z| {
                format!(
                    "{:<2}{}",
                    ELEMENT_SYMBOLS[z - 1].to_ascii_uppercase(),
                    format_fixed_f64(vector.get(*z), 7, 2)
                )
            })
            .collect();
        rows.push(format!(" {}", row.join(" ")));
    }
    rows.join("\n")
}

fn convergence_block(err: f64, de: f64) -> String {
    let mut text = String::from(
        "START CONVERGENCE\n TEFF   6000.  LOG G 4.50000  ITERATION   1\n\
         \x20  J      RHOX     T         P         XNE       RHO      ABROSS   HEIGHT   TAUROS   FLXCNV   PRAD    FLXERR   FLXDRV\n\
         \x20                                                                                                          PERCENT  PERCENT\n",
    );
    for layer in 1..=72 {
        let (row_err, row_de) = if layer == 10 { (err, de) } else { (0.01, 0.02) };
        text.push_str(&format!(
            "{layer:>4} 1.234E-03 5000.0 1.000E+04 1.000E+12 1.000E-08 1.000E+00 1.000E+02 1.000E+00 0.000E+00 1.000E-01 {row_err:>8.3} {row_de:>8.3}\n"
        ));
    }
    text.push_str("END CONVERGENCE\n");
    text
}

fn write_atlas_log(run_dir: &Path, blocks: &[(f64, f64)]) {
    fs::create_dir_all(run_dir).expect("run directory");
    let mut main = format!(
        " TEFF 6000  LOG G 4.5\n 0XSCALE1\n{}\n\
         \x20   RHOX         T        P        XNE      ABROSS   ACCRAD   VTURB\n\
         \x20  1 1.0E-04 4000.0 1.0E+01 1.0E+09 0.1 0.2 2.0E+05 9.9\n",
        explicit_listing(&AbundanceVector::solar())
    );
    for (err, de) in blocks {
        main.push_str(&convergence_block(*err, *de));
    }
    fs::write(run_dir.join("output_main.out"), main).expect("main log");
}

#[test]
fn meta_reports_parameters_of_an_atlas_run() {
    let temp = TempDir::new().expect("tempdir should be created");
    let run_dir = temp.path().join("sun");
    write_atlas_log(&run_dir, &[]);

    let output = run_cli(&["meta", "sun"], temp.path());
    let parsed = stdout_json(&output);
    assert_eq!(parsed["kind"], Value::String("ATLAS".to_string()));
    assert_eq!(parsed["teff"].as_f64(), Some(6000.0));
    assert_eq!(parsed["logg"].as_f64(), Some(4.5));
    let vturb = parsed["vturb"].as_f64().expect("vturb is reported");
    assert!((vturb - 2.0).abs() < 1.0e-9);
}

#[test]
fn converged_selects_the_best_iteration() {
    let temp = TempDir::new().expect("tempdir should be created");
    let run_dir = temp.path().join("sun");
    write_atlas_log(&run_dir, &[(12.0, 150.0), (0.4, 3.0), (2.0, 20.0)]);

    let parsed = stdout_json(&run_cli(&["--quiet", "converged", "sun"], temp.path()));
    assert_eq!(parsed["iteration"].as_u64(), Some(2));
    assert_eq!(parsed["tier"], Value::String("GOLD".to_string()));
    assert_eq!(parsed["maxFluxError"].as_f64(), Some(0.4));
}

#[test]
fn atlas_refuses_an_existing_run_directory() {
    let temp = TempDir::new().expect("tempdir should be created");
    fs::create_dir(temp.path().join("sun")).expect("existing directory");

    let output = run_cli(&["atlas", "sun", "--restart", "grey"], temp.path());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: [INPUT.DIRECTORY_EXISTS]"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"), "stderr: {stderr}");
}

#[test]
fn unknown_commands_exit_with_a_usage_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run_cli(&["photometry"], temp.path());
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.CLI_USAGE"));
}

#[test]
fn grey_restarts_are_written_with_flag_overrides() {
    let temp = TempDir::new().expect("tempdir should be created");
    fs::write(
        temp.path().join("settings.json"),
        r#"{ "teff": 5000.0, "logg": 4.5, "zscale": -1.0 }"#,
    )
    .expect("settings file");

    let output = run_cli(
        &[
            "restart",
            "fort.3",
            "--settings",
            "settings.json",
            "--teff",
            "6000",
            "--restart",
            "grey",
        ],
        temp.path(),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("grey atmosphere"));
    let deck = fs::read_to_string(temp.path().join("fort.3")).expect("restart deck");
    let first = deck.lines().next().expect("header line");
    assert!(first.starts_with("TEFF"));
    assert!(first.contains("6000"));
    assert!(first.contains("4.50000"));
    assert!(deck.contains("ABUNDANCE SCALE   0.10000"));
    assert!(deck.contains("READ DECK6 72"));
}

#[test]
fn spectra_can_be_binned_on_the_way_out() {
    let temp = TempDir::new().expect("tempdir should be created");
    let run_dir = temp.path().join("spectrum");
    fs::create_dir(&run_dir).expect("run directory");
    let mut csv = String::from("# Wavelength [A],Line intensity,Continuum intensity,Intensity ratio\n");
    for index in 0..10 {
        let wavelength = 5000.0 + f64::from(index);
        csv.push_str(&format!("{wavelength},{},{},{}\n", 1.0, 2.0, 0.5));
    }
    fs::write(run_dir.join("spectrum.dat"), csv).expect("spectrum file");

    let parsed = stdout_json(&run_cli(&["spectrum", "spectrum", "--bins", "2"], temp.path()));
    let wavelengths = parsed["wavelength"].as_array().expect("wavelength column");
    assert_eq!(wavelengths.len(), 2);
    assert_eq!(parsed["ratio"][0].as_f64(), Some(0.5));

    let raw = stdout_json(&run_cli(&["spectrum", "spectrum"], temp.path()));
    assert_eq!(raw["wavelength"].as_array().map(Vec::len), Some(10));
}

#[test]
fn validate_without_control_files_checks_nothing() {
    let temp = TempDir::new().expect("tempdir should be created");
    fs::create_dir(temp.path().join("empty")).expect("run directory");
    let output = run_cli(&["validate", "empty"], temp.path());
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}
