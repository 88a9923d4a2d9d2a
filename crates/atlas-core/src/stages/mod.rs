//! In-memory SYNTHE pipeline. XNFPELSYN, SYNTHE and SPECTRV run as injected
//! kernels instead of launcher scripts; each stage handle owns its kernel,
//! holds its inputs until it runs, and refuses to run or hand over results
//! out of order.

mod loaders;

pub use loaders::{
    CARD_WIDTH, CardImage, ChemicalConstant, HeliumProfile, LineList, LineListMeta, LineRecord,
    NlteRecord, load_card_image, load_chemical_constants, load_helium_tables, load_line_list,
    parse_chemical_constants, parse_helium_tables, parse_line_list_meta, parse_lines,
    parse_nlte_lines,
};

use crate::domain::errors::{STAGE_ORDER, STAGE_OUTPUT};
use crate::domain::{AtlasError, AtlasResult};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Speed of light in m/s.
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Atmosphere layers every stage works on.
pub const LAYERS: usize = 72;
pub const CONTINUUM_EDGES: usize = 344;
pub const MOLECULES: usize = 100;
pub const FREQUENCY_SET: usize = 1029;
pub const CONTINUUM_POINTS: usize = 1131;
pub const STRUCTURE_SHAPE: (usize, usize) = (16, 99);
pub const SPECIES_SHAPE: (usize, usize) = (139, 6);

fn out_of_order(message: impl Into<String>) -> AtlasError {
    AtlasError::computation(STAGE_ORDER, message)
}

/// Continuum opacities and populations from XNFPELSYN. Multi-dimensional
/// arrays are flattened in column-major order, layer index fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct XnfpelsynOutput {
    pub teff_logg: [f64; 2],
    pub frqedg: Vec<f64>,
    pub wledge: Vec<f64>,
    pub cmedge: Vec<f64>,
    pub idmol: Vec<f64>,
    pub momass: Vec<f64>,
    pub freqset: Vec<f64>,
    pub structure: Vec<f64>,
    pub continall: Vec<f64>,
    pub contabs: Vec<f64>,
    pub contscat: Vec<f64>,
    pub xnfpel: Vec<f64>,
    pub dopple: Vec<f64>,
}

impl XnfpelsynOutput {
    /// Buffers of the sizes XNFPELSYN fills, all zero.
    pub fn zeroed() -> Self {
        let continuum = LAYERS * CONTINUUM_POINTS;
        let species = LAYERS * SPECIES_SHAPE.0 * SPECIES_SHAPE.1;
        Self {
            teff_logg: [0.0; 2],
            frqedg: vec![0.0; CONTINUUM_EDGES],
            wledge: vec![0.0; CONTINUUM_EDGES],
            cmedge: vec![0.0; CONTINUUM_EDGES],
            idmol: vec![0.0; MOLECULES],
            momass: vec![0.0; MOLECULES],
            freqset: vec![0.0; FREQUENCY_SET],
            structure: vec![0.0; STRUCTURE_SHAPE.0 * STRUCTURE_SHAPE.1],
            continall: vec![0.0; continuum],
            contabs: vec![0.0; continuum],
            contscat: vec![0.0; continuum],
            xnfpel: vec![0.0; species],
            dopple: vec![0.0; species],
        }
    }
}

pub struct XnfpelsynInput<'a> {
    pub structure: &'a CardImage,
    pub continua: &'a CardImage,
    pub molecules: &'a [ChemicalConstant],
}

pub struct SyntheInput<'a> {
    pub line_list: &'a LineList,
    pub vturb: f32,
    pub helium: &'a [HeliumProfile],
    pub xnfpelsyn: &'a XnfpelsynOutput,
}

pub struct SpectrvInput<'a> {
    pub structure: &'a CardImage,
    pub molecules: &'a [ChemicalConstant],
    pub xnfpelsyn: &'a XnfpelsynOutput,
    pub meta: &'a LineListMeta,
    pub vturb: f32,
    /// Line opacity, `n_wl` rows of [`LAYERS`] values.
    pub asynth: &'a [f32],
}

/// Raw SPECTRV result: the logarithmic wavelength grid and, per point, the
/// line and continuum intensities in SPECTRV units.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrvOutput {
    /// nm
    pub wbegin: f64,
    pub deltaw: f64,
    pub intensities: Vec<[f64; 2]>,
}

pub trait XnfpelsynKernelApi: Send {
    fn run(&self, input: XnfpelsynInput<'_>) -> AtlasResult<XnfpelsynOutput>;
}

pub trait SyntheKernelApi: Send {
    /// Returns `n_wl * LAYERS` line opacities.
    fn run(&self, input: SyntheInput<'_>) -> AtlasResult<Vec<f32>>;
}

pub trait SpectrvKernelApi: Send {
    fn run(&self, input: SpectrvInput<'_>) -> AtlasResult<SpectrvOutput>;
}

pub struct XnfpelsynHandle {
    kernel: Box<dyn XnfpelsynKernelApi>,
    continua: Arc<CardImage>,
    molecules: Arc<Vec<ChemicalConstant>>,
    structure: Option<Arc<CardImage>>,
    output: Option<Arc<XnfpelsynOutput>>,
}

impl XnfpelsynHandle {
    pub fn new(
        kernel: Box<dyn XnfpelsynKernelApi>,
        continua: CardImage,
        molecules: Vec<ChemicalConstant>,
    ) -> Self {
        Self {
            kernel,
            continua: Arc::new(continua),
            molecules: Arc::new(molecules),
            structure: None,
            output: None,
        }
    }

    /// Reads `continua.dat` and `molecules.dat` from the SYNTHE data directory.
    pub fn from_data_dir(kernel: Box<dyn XnfpelsynKernelApi>, data_dir: &Path) -> AtlasResult<Self> {
        let continua = load_card_image(&data_dir.join("continua.dat"), CARD_WIDTH)?;
        let molecules = load_chemical_constants(&data_dir.join("molecules.dat"))?;
        Ok(Self::new(kernel, continua, molecules))
    }

    /// Replaces the model atmosphere and discards any result computed from
    /// the previous one.
    pub fn load_structure(&mut self, structure: CardImage) {
        self.structure = Some(Arc::new(structure));
        self.output = None;
    }

    pub fn load_structure_file(&mut self, path: &Path) -> AtlasResult<()> {
        self.load_structure(load_card_image(path, CARD_WIDTH)?);
        Ok(())
    }

    pub fn run(&mut self) -> AtlasResult<()> {
        let structure = self.structure.as_deref().ok_or_else(|| {
            out_of_order("XNFPELSYN does not have a structure; load one before running")
        })?;
        let output = self.kernel.run(XnfpelsynInput {
            structure,
            continua: &self.continua,
            molecules: &self.molecules,
        })?;
        self.output = Some(Arc::new(output));
        Ok(())
    }

    pub fn has_run(&self) -> bool {
        self.output.is_some()
    }

    pub fn output(&self) -> AtlasResult<&XnfpelsynOutput> {
        self.output
            .as_deref()
            .ok_or_else(|| out_of_order("XNFPELSYN has not run yet"))
    }

    /// Everything a downstream stage takes from this one.
    fn product(&self) -> AtlasResult<XnfpelsynProduct> {
        match (&self.structure, &self.output) {
            (Some(structure), Some(output)) => Ok(XnfpelsynProduct {
                structure: Arc::clone(structure),
                molecules: Arc::clone(&self.molecules),
                output: Arc::clone(output),
            }),
            _ => Err(out_of_order("XNFPELSYN has not run yet")),
        }
    }
}

struct XnfpelsynProduct {
    structure: Arc<CardImage>,
    molecules: Arc<Vec<ChemicalConstant>>,
    output: Arc<XnfpelsynOutput>,
}

pub struct SyntheHandle {
    kernel: Box<dyn SyntheKernelApi>,
    helium: Vec<HeliumProfile>,
    line_list: Option<(Arc<LineList>, f32)>,
    xnfpelsyn: Option<Arc<XnfpelsynOutput>>,
    asynth: Option<Arc<Vec<f32>>>,
}

impl SyntheHandle {
    pub fn new(kernel: Box<dyn SyntheKernelApi>, helium: Vec<HeliumProfile>) -> Self {
        Self {
            kernel,
            helium,
            line_list: None,
            xnfpelsyn: None,
            asynth: None,
        }
    }

    /// Reads `he1tables.dat` from the SYNTHE data directory.
    pub fn from_data_dir(kernel: Box<dyn SyntheKernelApi>, data_dir: &Path) -> AtlasResult<Self> {
        let helium = load_helium_tables(&data_dir.join("he1tables.dat"))?;
        Ok(Self::new(kernel, helium))
    }

    /// The turbulent velocity (km/s) travels with the line list but is
    /// supplied here, so one list serves many velocities.
    pub fn load_line_list(&mut self, line_list: Arc<LineList>, vturb: f64) {
        self.line_list = Some((line_list, vturb as f32));
        self.asynth = None;
    }

    pub fn load_xnfpelsyn(&mut self, upstream: &XnfpelsynHandle) -> AtlasResult<()> {
        let product = upstream.product()?;
        self.xnfpelsyn = Some(product.output);
        self.asynth = None;
        Ok(())
    }

    pub fn run(&mut self) -> AtlasResult<()> {
        let xnfpelsyn = self
            .xnfpelsyn
            .as_deref()
            .ok_or_else(|| out_of_order("SYNTHE does not have XNFPELSYN output"))?;
        let (line_list, vturb) = self
            .line_list
            .as_ref()
            .ok_or_else(|| out_of_order("SYNTHE does not have the line list"))?;
        let asynth = self.kernel.run(SyntheInput {
            line_list,
            vturb: *vturb,
            helium: &self.helium,
            xnfpelsyn,
        })?;
        let expected = usize::try_from(line_list.meta.n_wl).unwrap_or(0) * LAYERS;
        if asynth.len() != expected {
            return Err(AtlasError::computation(
                STAGE_OUTPUT,
                format!(
                    "SYNTHE returned {} line opacities, expected {expected}",
                    asynth.len()
                ),
            ));
        }
        self.asynth = Some(Arc::new(asynth));
        Ok(())
    }

    pub fn has_run(&self) -> bool {
        self.asynth.is_some()
    }

    pub fn line_opacity(&self) -> AtlasResult<&[f32]> {
        self.asynth
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| out_of_order("SYNTHE has not run yet"))
    }

    fn product(&self) -> AtlasResult<SyntheProduct> {
        match (&self.line_list, &self.asynth) {
            (Some((line_list, vturb)), Some(asynth)) => Ok(SyntheProduct {
                meta: line_list.meta,
                vturb: *vturb,
                asynth: Arc::clone(asynth),
            }),
            _ => Err(out_of_order("SYNTHE has not run yet")),
        }
    }
}

struct SyntheProduct {
    meta: LineListMeta,
    vturb: f32,
    asynth: Arc<Vec<f32>>,
}

/// Emergent spectrum in standard units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergentSpectrum {
    /// Å
    pub wavelength: Vec<f64>,
    pub line: Vec<f64>,
    pub continuum: Vec<f64>,
    pub ratio: Vec<f64>,
}

impl EmergentSpectrum {
    /// Converts SPECTRV intensities on its logarithmic grid. Point `i` lies at
    /// `10^(log10(wbegin) + i*log10(1 + 1/deltaw))` nm.
    pub fn from_spectrv(output: &SpectrvOutput) -> Self {
        let step = (1.0 + 1.0 / output.deltaw).log10();
        let origin = output.wbegin.log10();
        let count = output.intensities.len();
        let mut spectrum = Self {
            wavelength: Vec::with_capacity(count),
            line: Vec::with_capacity(count),
            continuum: Vec::with_capacity(count),
            ratio: Vec::with_capacity(count),
        };
        for (index, [line, continuum]) in output.intensities.iter().copied().enumerate() {
            let wavelength = 10f64.powf(origin + index as f64 * step) * 10.0;
            let scale = 4.0 * SPEED_OF_LIGHT * 1e10 / (wavelength * wavelength);
            let (line, continuum) = (line * scale, continuum * scale);
            spectrum.wavelength.push(wavelength);
            spectrum.line.push(line);
            spectrum.continuum.push(continuum);
            spectrum.ratio.push(line / continuum);
        }
        spectrum
    }
}

pub struct SpectrvHandle {
    kernel: Box<dyn SpectrvKernelApi>,
    xnfpelsyn: Option<XnfpelsynProduct>,
    synthe: Option<SyntheProduct>,
    output: Option<SpectrvOutput>,
}

impl SpectrvHandle {
    pub fn new(kernel: Box<dyn SpectrvKernelApi>) -> Self {
        Self {
            kernel,
            xnfpelsyn: None,
            synthe: None,
            output: None,
        }
    }

    /// Takes the structure, chemical constants and continuum opacities.
    pub fn load_xnfpelsyn(&mut self, upstream: &XnfpelsynHandle) -> AtlasResult<()> {
        self.xnfpelsyn = Some(upstream.product()?);
        self.output = None;
        Ok(())
    }

    /// Takes the line-list metadata, turbulent velocity and line opacity.
    pub fn load_synthe(&mut self, upstream: &SyntheHandle) -> AtlasResult<()> {
        self.synthe = Some(upstream.product()?);
        self.output = None;
        Ok(())
    }

    pub fn run(&mut self) -> AtlasResult<()> {
        let xnfpelsyn = self
            .xnfpelsyn
            .as_ref()
            .ok_or_else(|| out_of_order("SPECTRV does not have XNFPELSYN output"))?;
        let synthe = self
            .synthe
            .as_ref()
            .ok_or_else(|| out_of_order("SPECTRV does not have SYNTHE output"))?;
        let output = self.kernel.run(SpectrvInput {
            structure: &xnfpelsyn.structure,
            molecules: &xnfpelsyn.molecules,
            xnfpelsyn: &xnfpelsyn.output,
            meta: &synthe.meta,
            vturb: synthe.vturb,
            asynth: &synthe.asynth,
        })?;
        self.output = Some(output);
        Ok(())
    }

    pub fn has_run(&self) -> bool {
        self.output.is_some()
    }

    pub fn spectrum(&self) -> AtlasResult<EmergentSpectrum> {
        self.output
            .as_ref()
            .map(EmergentSpectrum::from_spectrv)
            .ok_or_else(|| out_of_order("SPECTRV has not run yet"))
    }
}

/// Any of the three in-memory stages.
pub enum Stage {
    Xnfpelsyn(XnfpelsynHandle),
    Synthe(SyntheHandle),
    Spectrv(SpectrvHandle),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Xnfpelsyn(_) => "XNFPELSYN",
            Self::Synthe(_) => "SYNTHE",
            Self::Spectrv(_) => "SPECTRV",
        }
    }

    pub fn run(&mut self) -> AtlasResult<()> {
        match self {
            Self::Xnfpelsyn(handle) => handle.run(),
            Self::Synthe(handle) => handle.run(),
            Self::Spectrv(handle) => handle.run(),
        }
    }

    pub fn has_run(&self) -> bool {
        match self {
            Self::Xnfpelsyn(handle) => handle.has_run(),
            Self::Synthe(handle) => handle.has_run(),
            Self::Spectrv(handle) => handle.has_run(),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("has_run", &self.has_run())
            .finish()
    }
}

/// Runs the three stages in order over one structure and line list.
pub fn synthesize(
    xnfpelsyn: &mut XnfpelsynHandle,
    synthe: &mut SyntheHandle,
    spectrv: &mut SpectrvHandle,
    structure: CardImage,
    line_list: Arc<LineList>,
    vturb: f64,
) -> AtlasResult<EmergentSpectrum> {
    xnfpelsyn.load_structure(structure);
    xnfpelsyn.run()?;
    synthe.load_line_list(line_list, vturb);
    synthe.load_xnfpelsyn(xnfpelsyn)?;
    synthe.run()?;
    spectrv.load_xnfpelsyn(xnfpelsyn)?;
    spectrv.load_synthe(synthe)?;
    spectrv.run()?;
    spectrv.spectrum()
}

#[cfg(test)]
mod tests {
    use super::loaders::tests::sample_meta;
    use super::{
        CardImage, LAYERS, LineList, SpectrvHandle, SpectrvInput, SpectrvKernelApi,
        SpectrvOutput, Stage, SyntheHandle, SyntheInput, SyntheKernelApi, XnfpelsynHandle,
        XnfpelsynInput, XnfpelsynKernelApi, XnfpelsynOutput, synthesize,
    };
    use crate::domain::AtlasResult;
    use crate::domain::errors::{STAGE_ORDER, STAGE_OUTPUT};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct EchoXnfpelsyn;

    impl XnfpelsynKernelApi for EchoXnfpelsyn {
        fn run(&self, input: XnfpelsynInput<'_>) -> AtlasResult<XnfpelsynOutput> {
            let mut output = XnfpelsynOutput::zeroed();
            output.teff_logg = [input.structure.rows() as f64, input.molecules.len() as f64];
            Ok(output)
        }
    }

    struct FlatSynthe {
        points: usize,
    }

    impl SyntheKernelApi for FlatSynthe {
        fn run(&self, input: SyntheInput<'_>) -> AtlasResult<Vec<f32>> {
            Ok(vec![input.vturb; self.points * LAYERS])
        }
    }

    struct ConstantSpectrv;

    impl SpectrvKernelApi for ConstantSpectrv {
        fn run(&self, input: SpectrvInput<'_>) -> AtlasResult<SpectrvOutput> {
            let points = input.asynth.len() / LAYERS;
            Ok(SpectrvOutput {
                wbegin: input.meta.wl_start,
                deltaw: input.meta.resolution,
                intensities: vec![[0.5, 1.0]; points],
            })
        }
    }

    fn line_list(n_wl: i32) -> Arc<LineList> {
        Arc::new(LineList {
            lines: Vec::new(),
            nlte: Vec::new(),
            meta: sample_meta(0, 0, n_wl),
        })
    }

    fn handles(points: usize) -> (XnfpelsynHandle, SyntheHandle, SpectrvHandle) {
        (
            XnfpelsynHandle::new(
                Box::new(EchoXnfpelsyn),
                CardImage::from_text("continuum edges", 80),
                vec![[101.0, 13.595, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]],
            ),
            SyntheHandle::new(Box::new(FlatSynthe { points }), Vec::new()),
            SpectrvHandle::new(Box::new(ConstantSpectrv)),
        )
    }

    #[test]
    fn pipeline_reconstructs_the_spectrum_in_standard_units() {
        let (mut xnfpelsyn, mut synthe, mut spectrv) = handles(3);
        let spectrum = synthesize(
            &mut xnfpelsyn,
            &mut synthe,
            &mut spectrv,
            CardImage::from_text("TEFF   5770.  GRAVITY 4.44000 LTE", 80),
            line_list(3),
            1.5,
        )
        .expect("pipeline should run");

        assert_eq!(xnfpelsyn.output().expect("output").teff_logg, [1.0, 1.0]);
        assert_eq!(synthe.line_opacity().expect("opacity")[0], 1.5);
        assert_eq!(spectrum.wavelength.len(), 3);
        assert!((spectrum.wavelength[0] - 5000.0).abs() < 1e-9);
        let step = 1.0 + 1.0 / 600000.0;
        assert!((spectrum.wavelength[2] / spectrum.wavelength[1] - step).abs() < 1e-12);
        let expected = 4.0 * 0.5 * 299_792_458.0 * 1e10 / (5000.0 * 5000.0);
        assert!((spectrum.line[0] - expected).abs() / expected < 1e-12);
        assert!(spectrum.ratio.iter().all(|ratio| (ratio - 0.5).abs() < 1e-12));
    }

    #[test]
    fn stages_refuse_to_run_without_inputs() {
        let (xnfpelsyn, synthe, spectrv) = handles(1);
        let mut stages = [
            Stage::Xnfpelsyn(xnfpelsyn),
            Stage::Synthe(synthe),
            Stage::Spectrv(spectrv),
        ];
        for stage in &mut stages {
            let error = stage.run().expect_err("stage should not run");
            assert!(error.is(STAGE_ORDER), "{}: {error}", stage.name());
            assert!(!stage.has_run());
        }
    }

    #[test]
    fn downstream_stages_require_upstream_runs() {
        let (mut xnfpelsyn, mut synthe, mut spectrv) = handles(2);
        assert!(synthe.load_xnfpelsyn(&xnfpelsyn).expect_err("not run").is(STAGE_ORDER));
        assert!(spectrv.load_synthe(&synthe).expect_err("not run").is(STAGE_ORDER));
        assert!(spectrv.spectrum().expect_err("not run").is(STAGE_ORDER));

        xnfpelsyn.load_structure(CardImage::from_text("TEFF   5770.", 80));
        xnfpelsyn.run().expect("xnfpelsyn should run");
        synthe.load_xnfpelsyn(&xnfpelsyn).expect("upstream ran");
        let error = synthe.run().expect_err("line list missing");
        assert!(error.message().contains("line list"));
    }

    #[test]
    fn line_opacity_must_cover_every_wavelength_point() {
        let (mut xnfpelsyn, mut synthe, mut spectrv) = handles(2);
        let error = synthesize(
            &mut xnfpelsyn,
            &mut synthe,
            &mut spectrv,
            CardImage::from_text("TEFF   5770.", 80),
            line_list(5),
            0.0,
        )
        .expect_err("short output");
        assert!(error.is(STAGE_OUTPUT));
        assert!(!synthe.has_run());
    }

    #[test]
    fn handles_load_their_tables_from_the_data_directory() {
        let temp = TempDir::new().expect("tempdir should be created");
        fs::write(temp.path().join("continua.dat"), "edge 1\nedge 2\n").expect("continua");
        fs::write(
            temp.path().join("molecules.dat"),
            format!("{:>18}{:>7}\n{:>18}{:>7}\n", "101.00", "13.595", "106.00", "11.260"),
        )
        .expect("molecules");
        fs::write(
            temp.path().join("he1tables.dat"),
            format!(" {:>5}{:>8}{:>7}\n", "4.0", "4471.48", "1.250"),
        )
        .expect("helium tables");
        fs::write(temp.path().join("model.dat"), "TEFF   5770.\nRHOX\nT\n").expect("model");

        let mut xnfpelsyn = XnfpelsynHandle::from_data_dir(Box::new(EchoXnfpelsyn), temp.path())
            .expect("continua and molecules load");
        let mut synthe = SyntheHandle::from_data_dir(Box::new(FlatSynthe { points: 1 }), temp.path())
            .expect("helium tables load");
        xnfpelsyn
            .load_structure_file(&temp.path().join("model.dat"))
            .expect("structure loads");
        xnfpelsyn.run().expect("xnfpelsyn should run");
        assert_eq!(xnfpelsyn.output().expect("output").teff_logg, [3.0, 2.0]);

        synthe.load_line_list(line_list(1), 0.0);
        synthe.load_xnfpelsyn(&xnfpelsyn).expect("upstream ran");
        synthe.run().expect("synthe should run");

        xnfpelsyn
            .load_structure_file(&temp.path().join("model.dat"))
            .expect("structure reloads");
        assert!(!xnfpelsyn.has_run());
        let missing = xnfpelsyn.load_structure_file(&temp.path().join("absent.dat"));
        assert!(missing.is_err());
    }
}
