use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

pub const PROTON: f64 = 1.007_276_466_88;

/// Mass difference between C13 and C12, used for isotope-error matching.
pub const C13_DIFF: f64 = 1.003_354_83;

/// Mass assigned to residue letters that have no composition and no static
/// modification. Any window containing such a letter falls outside every
/// precursor tolerance.
pub const SENTINEL_MASS: f64 = 999_999.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassType {
    Average,
    Monoisotopic,
}

struct Elements {
    h: f64,
    c: f64,
    o: f64,
    n: f64,
    s: f64,
}

impl Elements {
    fn new(kind: MassType) -> Self {
        match kind {
            MassType::Monoisotopic => Elements {
                h: 1.007_825_035,
                c: 12.000_000_0,
                o: 15.994_914_63,
                n: 14.003_074_0,
                s: 31.972_070_7,
            },
            MassType::Average => Elements {
                h: 1.007_94,
                c: 12.010_7,
                o: 15.999_4,
                n: 14.006_7,
                s: 32.065,
            },
        }
    }

    fn h2o(&self) -> f64 {
        self.h * 2.0 + self.o
    }
}

// Residue masses from elemental composition.
fn fill_residues(table: &mut [f64; 128], e: &Elements) {
    let mut set = |aa: u8, c: f64, h: f64, n: f64, o: f64, s: f64| {
        table[aa as usize] = e.c * c + e.h * h + e.n * n + e.o * o + e.s * s;
    };

    set(b'G', 2.0, 3.0, 1.0, 1.0, 0.0);
    set(b'A', 3.0, 5.0, 1.0, 1.0, 0.0);
    set(b'S', 3.0, 5.0, 1.0, 2.0, 0.0);
    set(b'P', 5.0, 7.0, 1.0, 1.0, 0.0);
    set(b'V', 5.0, 9.0, 1.0, 1.0, 0.0);
    set(b'T', 4.0, 7.0, 1.0, 2.0, 0.0);
    set(b'C', 3.0, 5.0, 1.0, 1.0, 1.0);
    set(b'L', 6.0, 11.0, 1.0, 1.0, 0.0);
    set(b'I', 6.0, 11.0, 1.0, 1.0, 0.0);
    set(b'N', 4.0, 6.0, 2.0, 2.0, 0.0);
    set(b'O', 5.0, 12.0, 2.0, 2.0, 0.0);
    set(b'D', 4.0, 5.0, 1.0, 3.0, 0.0);
    set(b'Q', 5.0, 8.0, 2.0, 2.0, 0.0);
    set(b'K', 6.0, 12.0, 2.0, 1.0, 0.0);
    set(b'E', 5.0, 7.0, 1.0, 3.0, 0.0);
    set(b'M', 5.0, 9.0, 1.0, 1.0, 1.0);
    set(b'H', 6.0, 7.0, 3.0, 1.0, 0.0);
    set(b'F', 9.0, 9.0, 1.0, 1.0, 0.0);
    set(b'R', 6.0, 12.0, 4.0, 1.0, 0.0);
    set(b'Y', 9.0, 9.0, 1.0, 2.0, 0.0);
    set(b'W', 11.0, 10.0, 2.0, 1.0, 0.0);
}

/// ASCII-indexed residue mass tables for precursor and fragment mass
/// calculation, with static modifications already folded in.
pub struct MassTables {
    pub parent: [f64; 128],
    pub fragment: [f64; 128],
    pub h2o_parent: f64,
    pub h2o_fragment: f64,
    pub co: f64,
    pub nh3: f64,
    pub nh2: f64,
    pub co_minus_h2: f64,
}

impl MassTables {
    pub fn new(
        parent_type: MassType,
        fragment_type: MassType,
        static_mods: &FnvHashMap<char, f64>,
    ) -> Self {
        let pe = Elements::new(parent_type);
        let fe = Elements::new(fragment_type);

        let mut parent = [SENTINEL_MASS; 128];
        let mut fragment = [SENTINEL_MASS; 128];
        fill_residues(&mut parent, &pe);
        fill_residues(&mut fragment, &fe);

        // Residues with a static modification keep it in both tables; a
        // static mod on a letter without composition replaces the sentinel.
        for (&aa, &delta) in static_mods {
            if !aa.is_ascii_uppercase() || delta == 0.0 {
                continue;
            }
            let i = aa as usize;
            if parent[i] == SENTINEL_MASS {
                parent[i] = delta;
                fragment[i] = delta;
            } else {
                parent[i] += delta;
                fragment[i] += delta;
            }
        }

        MassTables {
            parent,
            fragment,
            h2o_parent: pe.h2o(),
            h2o_fragment: fe.h2o(),
            co: fe.c + fe.o,
            nh3: fe.n + fe.h * 3.0,
            nh2: fe.n + fe.h * 2.0,
            co_minus_h2: fe.c + fe.o - fe.h * 2.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceUnits {
    Amu,
    Mmu,
    Ppm,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecursorMassMode {
    /// Tolerance applied around the singly-protonated mass.
    Mh,
    /// Tolerance in m/z space, scaled by the precursor charge.
    Mz,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct PrecursorTolerance {
    pub value: f64,
    pub units: ToleranceUnits,
    pub mode: PrecursorMassMode,
}

impl PrecursorTolerance {
    /// Half-width of the tolerance window in Da for a given experimental
    /// mass and charge state.
    pub fn width(&self, exp_mass: f64, charge: u8) -> f64 {
        let mut tol = match self.units {
            ToleranceUnits::Amu => self.value,
            ToleranceUnits::Mmu => self.value * 0.001,
            ToleranceUnits::Ppm => self.value * exp_mass / 1_000_000.0,
        };
        if self.mode == PrecursorMassMode::Mz {
            tol *= charge as f64;
        }
        tol
    }

    /// `(tolerance, lower, upper)` window around an experimental mass.
    pub fn window(&self, exp_mass: f64, charge: u8) -> (f64, f64, f64) {
        let tol = self.width(exp_mass, charge);
        (tol, exp_mass - tol, exp_mass + tol)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mono_tables() -> MassTables {
        MassTables::new(
            MassType::Monoisotopic,
            MassType::Monoisotopic,
            &FnvHashMap::default(),
        )
    }

    #[test]
    fn monoisotopic_residues() {
        let t = mono_tables();
        assert!((t.parent[b'G' as usize] - 57.02146).abs() < 1e-4);
        assert!((t.parent[b'R' as usize] - 156.10111).abs() < 1e-4);
        assert!((t.parent[b'W' as usize] - 186.07931).abs() < 1e-4);
        assert!((t.fragment[b'K' as usize] - 128.09496).abs() < 1e-4);
        assert!((t.h2o_parent - 18.010565).abs() < 1e-5);
    }

    #[test]
    fn sentinel_letters() {
        let t = mono_tables();
        for aa in [b'B', b'J', b'U', b'X', b'Z', b'*'] {
            assert_eq!(t.parent[aa as usize], SENTINEL_MASS);
        }
    }

    #[test]
    fn static_mod_is_folded_in() {
        let mut mods = FnvHashMap::default();
        mods.insert('C', 57.021464);
        let t = MassTables::new(MassType::Monoisotopic, MassType::Monoisotopic, &mods);
        assert!((t.parent[b'C' as usize] - 160.03065).abs() < 1e-4);
        // a static mod on a composition-free letter replaces the sentinel
        let mut mods = FnvHashMap::default();
        mods.insert('B', 114.04293);
        let t = MassTables::new(MassType::Monoisotopic, MassType::Monoisotopic, &mods);
        assert!((t.parent[b'B' as usize] - 114.04293).abs() < 1e-6);
    }

    #[test]
    fn tolerance_windows() {
        let amu = PrecursorTolerance {
            value: 3.0,
            units: ToleranceUnits::Amu,
            mode: PrecursorMassMode::Mh,
        };
        assert_eq!(amu.window(1000.0, 2), (3.0, 997.0, 1003.0));

        let ppm = PrecursorTolerance {
            value: 10.0,
            units: ToleranceUnits::Ppm,
            mode: PrecursorMassMode::Mh,
        };
        let (tol, lo, hi) = ppm.window(1000.0, 2);
        assert!((tol - 0.01).abs() < 1e-9);
        assert!((lo - 999.99).abs() < 1e-9 && (hi - 1000.01).abs() < 1e-9);

        let mz = PrecursorTolerance {
            value: 1.5,
            units: ToleranceUnits::Amu,
            mode: PrecursorMassMode::Mz,
        };
        assert_eq!(mz.width(1000.0, 3), 4.5);
    }
}
