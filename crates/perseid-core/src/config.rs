use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::enzyme::{self, Enzyme, EnzymeTermini};
use crate::ion::Kind;
use crate::mass::{
    MassTables, MassType, PrecursorMassMode, PrecursorTolerance, ToleranceUnits, PROTON,
};
use crate::modification::{TerminusMod, VarMod};
use crate::Error;

pub const MAX_PEPTIDE_LEN: usize = 64;
pub const MAX_PEPTIDE_LEN_P2: usize = MAX_PEPTIDE_LEN + 2;
pub const WIDTH_REFERENCE: usize = 512;
pub const NUM_STORED: usize = 100;
pub const HISTO_SIZE: usize = 152;
pub const FLOAT_ZERO: f64 = 1e-6;
pub const VMODS: usize = 6;
pub const VMODS_ALL: usize = VMODS + 2;
/// Index of the N-terminus slot in a per-slot count array.
pub const VMOD_N: usize = VMODS;
/// Index of the C-terminus slot in a per-slot count array.
pub const VMOD_C: usize = VMODS + 1;
pub const MAX_FRAGMENT_CHARGE: u8 = 5;
pub const MAX_PRECURSOR_CHARGE: u8 = 9;
pub const MINIMUM_PEAKS: usize = 10;

pub const DEFAULT_BIN_WIDTH: f64 = 1.0005;
pub const DEFAULT_BIN_OFFSET: f64 = 0.4;
const DEFAULT_FRAGMENT_CHARGE: u8 = 3;
const DEFAULT_PRECURSOR_CHARGE: u8 = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsotopeError {
    Off,
    /// Accept offsets of -1..3 C13 mass differences.
    C13,
    /// Accept offsets of 0, +/-4.0070995 and +/-8.014199 (+4/+8 labeling).
    HeavyLabel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoySearch {
    Off,
    /// Decoys compete with targets in the same result store.
    Concatenated,
    /// Decoys are scored into a separate store and histogram.
    Separate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VarModBuilder {
    pub delta: f64,
    pub residues: String,
    #[serde(default)]
    pub binary: bool,
    #[serde(default = "default_max_per_mod")]
    pub max_per_mod: i32,
}

fn default_max_per_mod() -> i32 {
    3
}

/// The deserializable configuration surface. Every field is optional;
/// defaults follow the reference parameter set. `build` validates and
/// produces the immutable [`Parameters`] shared by all search workers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Builder {
    pub mass_type_parent: Option<i32>,
    pub mass_type_fragment: Option<i32>,
    pub peptide_mass_tolerance: Option<f64>,
    pub peptide_mass_units: Option<i32>,
    pub precursor_tolerance_type: Option<i32>,
    pub isotope_error: Option<i32>,
    pub fragment_bin_tol: Option<f64>,
    pub fragment_bin_offset: Option<f64>,
    pub theoretical_fragment_ions: Option<i32>,
    pub search_enzyme_number: Option<usize>,
    pub sample_enzyme_number: Option<usize>,
    pub num_enzyme_termini: Option<i32>,
    pub allowed_missed_cleavage: Option<i32>,
    pub use_a_ions: Option<bool>,
    pub use_b_ions: Option<bool>,
    pub use_c_ions: Option<bool>,
    pub use_x_ions: Option<bool>,
    pub use_y_ions: Option<bool>,
    pub use_z_ions: Option<bool>,
    pub use_nl_ions: Option<bool>,
    pub variable_mods: Vec<VarModBuilder>,
    pub max_variable_mods_in_peptide: Option<i32>,
    pub variable_n_terminus: Option<f64>,
    pub variable_n_terminus_distance: Option<i32>,
    pub variable_c_terminus: Option<f64>,
    pub variable_c_terminus_distance: Option<i32>,
    pub add_nterm_peptide: Option<f64>,
    pub add_cterm_peptide: Option<f64>,
    pub add_nterm_protein: Option<f64>,
    pub add_cterm_protein: Option<f64>,
    pub static_mods: FnvHashMap<char, f64>,
    pub digest_mass_range: Option<(f64, f64)>,
    pub scan_range: Option<(u32, u32)>,
    pub precursor_charge: Option<(u8, u8)>,
    pub ms_level: Option<i32>,
    pub activation_method: Option<String>,
    pub minimum_peaks: Option<usize>,
    pub max_fragment_charge: Option<u8>,
    pub max_precursor_charge: Option<u8>,
    pub nucleotide_reading_frame: Option<i32>,
    pub clip_nterm_methionine: Option<bool>,
    pub decoy_search: Option<i32>,
    pub num_results: Option<usize>,
    pub num_output_lines: Option<usize>,
    pub num_threads: Option<usize>,
}

/// Static mass additions at peptide and protein termini.
#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct TerminusStatics {
    pub nterm_peptide: f64,
    pub cterm_peptide: f64,
    pub nterm_protein: f64,
    pub cterm_protein: f64,
}

pub struct Parameters {
    pub precursor_tolerance: PrecursorTolerance,
    pub isotope_error: IsotopeError,
    pub fragment_bin_tol: f64,
    pub fragment_bin_offset: f64,
    pub inverse_bin_width: f64,
    pub one_minus_bin_offset: f64,
    pub theoretical_fragment_ions: i32,
    pub search_enzyme: &'static Enzyme,
    pub sample_enzyme: &'static Enzyme,
    pub enzyme_termini: EnzymeTermini,
    pub allowed_missed_cleavage: i32,
    pub no_enzyme: bool,
    /// Selected ion series, in canonical a, b, c, x, y, z order.
    pub ion_series: Vec<Kind>,
    pub use_nl_ions: bool,
    pub var_mods: [VarMod; VMODS],
    pub max_var_mods_per_peptide: i32,
    pub nterm_var_mod: TerminusMod,
    pub cterm_var_mod: TerminusMod,
    pub var_mod_search: bool,
    pub statics: TerminusStatics,
    pub masses: MassTables,
    /// N-terminal fragment baseline: peptide N-term static plus a proton.
    pub nterm_proton: f64,
    /// C-terminal fragment baseline: peptide C-term static plus water plus
    /// a proton.
    pub cterm_oh2_proton: f64,
    /// Neutral peptide baseline: water, proton and both peptide terminus
    /// statics.
    pub oh2_proton_cterm_nterm: f64,
    pub digest_mass_range: (f64, f64),
    pub scan_range: (u32, u32),
    pub precursor_charge: (u8, u8),
    pub ms_level: i32,
    pub activation_method: String,
    pub minimum_peaks: usize,
    pub max_fragment_charge: u8,
    pub max_precursor_charge: u8,
    pub nucleotide_reading_frame: i32,
    pub clip_nterm_methionine: bool,
    pub decoy_search: DecoySearch,
    pub num_results: usize,
    pub num_output_lines: usize,
    pub num_threads: usize,
}

impl Builder {
    pub fn build(self) -> Result<Parameters, Error> {
        let mass_type = |code: Option<i32>, what: &str| match code.unwrap_or(1) {
            0 => Ok(MassType::Average),
            1 => Ok(MassType::Monoisotopic),
            other => Err(Error::Config(format!("invalid {}: {}", what, other))),
        };
        let mass_type_parent = mass_type(self.mass_type_parent, "mass_type_parent")?;
        let mass_type_fragment = mass_type(self.mass_type_fragment, "mass_type_fragment")?;

        let units = match self.peptide_mass_units.unwrap_or(0) {
            1 => ToleranceUnits::Mmu,
            2 => ToleranceUnits::Ppm,
            _ => ToleranceUnits::Amu,
        };
        let mode = match self.precursor_tolerance_type.unwrap_or(0) {
            1 => PrecursorMassMode::Mz,
            _ => PrecursorMassMode::Mh,
        };
        let precursor_tolerance = PrecursorTolerance {
            value: self.peptide_mass_tolerance.unwrap_or(3.0),
            units,
            mode,
        };

        let isotope_error = match self.isotope_error.unwrap_or(0) {
            1 => IsotopeError::C13,
            2 => IsotopeError::HeavyLabel,
            _ => IsotopeError::Off,
        };

        let fragment_bin_tol = self.fragment_bin_tol.unwrap_or(DEFAULT_BIN_WIDTH).max(0.01);
        let fragment_bin_offset = self.fragment_bin_offset.unwrap_or(DEFAULT_BIN_OFFSET);
        if !(0.0..=1.0).contains(&fragment_bin_offset) {
            return Err(Error::Config(format!(
                "fragment_bin_offset {} must be between 0.0 and 1.0",
                fragment_bin_offset
            )));
        }

        let search_enzyme = enzyme::by_number(self.search_enzyme_number.unwrap_or(1))?;
        let sample_enzyme = enzyme::by_number(self.sample_enzyme_number.unwrap_or(1))?;
        let enzyme_termini = EnzymeTermini::from_code(self.num_enzyme_termini.unwrap_or(2));
        let allowed_missed_cleavage = self.allowed_missed_cleavage.unwrap_or(2).max(0);

        let mut ion_series = Vec::new();
        let flags = [
            (self.use_a_ions.unwrap_or(false), Kind::A),
            (self.use_b_ions.unwrap_or(true), Kind::B),
            (self.use_c_ions.unwrap_or(false), Kind::C),
            (self.use_x_ions.unwrap_or(false), Kind::X),
            (self.use_y_ions.unwrap_or(true), Kind::Y),
            (self.use_z_ions.unwrap_or(false), Kind::Z),
        ];
        for (used, kind) in flags {
            if used {
                ion_series.push(kind);
            }
        }
        if ion_series.is_empty() {
            log::warn!("no ion series selected; nothing will be scored");
        }

        if self.variable_mods.len() > VMODS {
            return Err(Error::Config(format!(
                "at most {} variable modifications are supported",
                VMODS
            )));
        }
        let mut var_mods: [VarMod; VMODS] = Default::default();
        for (slot, vm) in self.variable_mods.iter().enumerate() {
            var_mods[slot] = VarMod {
                delta: vm.delta,
                residues: vm.residues.clone().into_bytes(),
                binary: vm.binary,
                max_per_peptide: vm.max_per_mod.max(0),
            };
        }
        let nterm_var_mod = TerminusMod {
            delta: self.variable_n_terminus.unwrap_or(0.0),
            distance: self.variable_n_terminus_distance.unwrap_or(-1),
        };
        let cterm_var_mod = TerminusMod {
            delta: self.variable_c_terminus.unwrap_or(0.0),
            distance: self.variable_c_terminus_distance.unwrap_or(-1),
        };
        let var_mod_search = var_mods.iter().any(|m| m.active())
            || nterm_var_mod.delta != 0.0
            || cterm_var_mod.delta != 0.0;

        let statics = TerminusStatics {
            nterm_peptide: self.add_nterm_peptide.unwrap_or(0.0),
            cterm_peptide: self.add_cterm_peptide.unwrap_or(0.0),
            nterm_protein: self.add_nterm_protein.unwrap_or(0.0),
            cterm_protein: self.add_cterm_protein.unwrap_or(0.0),
        };

        let masses = MassTables::new(mass_type_parent, mass_type_fragment, &self.static_mods);

        let digest_mass_range = match self.digest_mass_range {
            Some((lo, hi)) if lo >= 0.0 && hi >= lo => (lo, hi),
            _ => (600.0, 5000.0),
        };

        let nucleotide_reading_frame = self.nucleotide_reading_frame.unwrap_or(0);
        if !(0..=9).contains(&nucleotide_reading_frame) {
            return Err(Error::Config(format!(
                "nucleotide_reading_frame {} must be 0..9",
                nucleotide_reading_frame
            )));
        }

        let decoy_search = match self.decoy_search.unwrap_or(0) {
            1 => DecoySearch::Concatenated,
            2 => DecoySearch::Separate,
            _ => DecoySearch::Off,
        };

        let num_results = self.num_results.unwrap_or(50).clamp(1, NUM_STORED);
        let num_output_lines = self.num_output_lines.unwrap_or(5).clamp(1, num_results);

        Ok(Parameters {
            precursor_tolerance,
            isotope_error,
            fragment_bin_tol,
            fragment_bin_offset,
            inverse_bin_width: 1.0 / fragment_bin_tol,
            one_minus_bin_offset: 1.0 - fragment_bin_offset,
            theoretical_fragment_ions: self.theoretical_fragment_ions.unwrap_or(1),
            search_enzyme,
            sample_enzyme,
            enzyme_termini,
            allowed_missed_cleavage,
            no_enzyme: search_enzyme.unspecific(),
            ion_series,
            use_nl_ions: self.use_nl_ions.unwrap_or(true),
            var_mods,
            max_var_mods_per_peptide: self.max_variable_mods_in_peptide.unwrap_or(5),
            nterm_var_mod,
            cterm_var_mod,
            var_mod_search,
            nterm_proton: statics.nterm_peptide + PROTON,
            cterm_oh2_proton: statics.cterm_peptide + masses.h2o_fragment + PROTON,
            oh2_proton_cterm_nterm: masses.h2o_parent
                + PROTON
                + statics.cterm_peptide
                + statics.nterm_peptide,
            statics,
            masses,
            digest_mass_range,
            scan_range: self.scan_range.unwrap_or((0, 0)),
            precursor_charge: self.precursor_charge.unwrap_or((0, 0)),
            ms_level: self.ms_level.unwrap_or(2),
            activation_method: self.activation_method.unwrap_or_else(|| "ALL".into()),
            minimum_peaks: self.minimum_peaks.unwrap_or(MINIMUM_PEAKS),
            max_fragment_charge: self
                .max_fragment_charge
                .unwrap_or(DEFAULT_FRAGMENT_CHARGE)
                .min(MAX_FRAGMENT_CHARGE),
            max_precursor_charge: self
                .max_precursor_charge
                .unwrap_or(DEFAULT_PRECURSOR_CHARGE)
                .min(MAX_PRECURSOR_CHARGE),
            nucleotide_reading_frame,
            clip_nterm_methionine: self.clip_nterm_methionine.unwrap_or(false),
            decoy_search,
            num_results,
            num_output_lines,
            num_threads: self.num_threads.unwrap_or(0),
        })
    }
}

impl Parameters {
    /// Fragment m/z to bin index.
    #[inline]
    pub fn bin(&self, mass: f64) -> usize {
        (mass * self.inverse_bin_width + self.one_minus_bin_offset) as usize
    }

    /// One-line description of the search settings, for logging and report
    /// headers.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        let mods = self
            .var_mods
            .iter()
            .filter(|m| m.active())
            .map(|m| {
                format!(
                    "({} {:+.6})",
                    String::from_utf8_lossy(&m.residues),
                    m.delta
                )
            })
            .join(" ");
        if !mods.is_empty() {
            parts.push(mods);
        }
        if self.nterm_var_mod.delta != 0.0 {
            parts.push(format!("(nt] {:+.6})", self.nterm_var_mod.delta));
        }
        if self.cterm_var_mod.delta != 0.0 {
            parts.push(format!("(ct[ {:+.6})", self.cterm_var_mod.delta));
        }

        let series = self
            .ion_series
            .iter()
            .map(|k| format!("{:?}", k).to_lowercase())
            .join("");
        parts.push(format!(
            "ions:{} nl:{}",
            series,
            if self.use_nl_ions { 1 } else { 0 }
        ));

        if self.no_enzyme {
            parts.push(format!("Enzyme:{}", self.search_enzyme.name));
        } else {
            parts.push(format!(
                "Enzyme:{} ({})",
                self.search_enzyme.name, self.allowed_missed_cleavage
            ));
        }
        if self.decoy_search != DecoySearch::Off {
            parts.push(format!("DECOY{}", self.decoy_search as i32));
        }
        if self.clip_nterm_methionine {
            parts.push("CLIPMET".into());
        }

        parts.join(" ")
    }
}
