use serde::{Deserialize, Serialize};

use crate::config::{Parameters, MAX_PEPTIDE_LEN};
use crate::mass::{MassTables, PROTON};

/// Backbone fragment ion series. A, B and C extend from the N-terminus,
/// X, Y and Z from the C-terminus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    A,
    B,
    C,
    X,
    Y,
    Z,
}

impl Kind {
    /// Series mass from the forward and reverse prefix sums at one
    /// position.
    #[inline]
    pub fn mass(self, forward: f64, reverse: f64, m: &MassTables) -> f64 {
        match self {
            Kind::B => forward,
            Kind::Y => reverse,
            Kind::A => forward - m.co,
            Kind::C => forward + m.nh3,
            Kind::X => reverse + m.co_minus_h2,
            Kind::Z => reverse - m.nh2,
        }
    }

    /// Series that carry neutral-loss peaks in the preprocessed spectrum.
    #[inline]
    pub fn has_neutral_loss(self) -> bool {
        matches!(self, Kind::A | Kind::B | Kind::Y)
    }
}

#[inline]
pub fn ion_mz(mass: f64, charge: u8) -> f64 {
    (mass + (charge as f64 - 1.0) * PROTON) / charge as f64
}

/// Per-worker scratch for one peptide's theoretical ions: prefix-sum mass
/// arrays and the binned ion tables for the target and its decoy, plus the
/// bin-deduplication scratch vector.
pub struct IonArena {
    pub forward: [f64; MAX_PEPTIDE_LEN],
    pub reverse: [f64; MAX_PEPTIDE_LEN],
    pub forward_decoy: [f64; MAX_PEPTIDE_LEN],
    pub reverse_decoy: [f64; MAX_PEPTIDE_LEN],
    bins: Vec<u32>,
    bins_decoy: Vec<u32>,
    seen: Vec<bool>,
    num_series: usize,
    max_charge: u8,
}

impl IonArena {
    pub fn new(num_series: usize, max_charge: u8, max_array_size: usize) -> Self {
        let dim = (max_charge as usize + 1) * num_series.max(1) * MAX_PEPTIDE_LEN;
        IonArena {
            forward: [0.0; MAX_PEPTIDE_LEN],
            reverse: [0.0; MAX_PEPTIDE_LEN],
            forward_decoy: [0.0; MAX_PEPTIDE_LEN],
            reverse_decoy: [0.0; MAX_PEPTIDE_LEN],
            bins: vec![0; dim],
            bins_decoy: vec![0; dim],
            seen: vec![false; max_array_size],
            num_series,
            max_charge,
        }
    }

    pub fn max_charge(&self) -> u8 {
        self.max_charge
    }

    #[inline]
    fn index(num_series: usize, charge: u8, series: usize, pos: usize) -> usize {
        (charge as usize * num_series + series) * MAX_PEPTIDE_LEN + pos
    }

    /// Stored bin for one (charge, series, position); 0 means the bin was
    /// claimed by an earlier ion of the same peptide.
    #[inline]
    pub fn bin_at(&self, decoy: bool, charge: u8, series: usize, pos: usize) -> u32 {
        let bins = if decoy { &self.bins_decoy } else { &self.bins };
        bins[Self::index(self.num_series, charge, series, pos)]
    }

    /// Fill the prefix-sum arrays for an unmodified window. `bion` and
    /// `yion` carry the terminus baselines, including any protein terminus
    /// statics.
    pub fn build_plain(
        &mut self,
        decoy: bool,
        window: &[u8],
        mut bion: f64,
        mut yion: f64,
        fragment: &[f64; 128],
    ) {
        let (fwd, rev) = if decoy {
            (&mut self.forward_decoy, &mut self.reverse_decoy)
        } else {
            (&mut self.forward, &mut self.reverse)
        };
        let len = window.len();
        for pos in 0..len.saturating_sub(1) {
            bion += fragment[window[pos] as usize];
            fwd[pos] = bion;
            yion += fragment[window[len - 1 - pos] as usize];
            rev[pos] = yion;
        }
    }

    /// Bin every selected ion of the current prefix sums, keeping the first
    /// occurrence of each bin and zeroing repeats.
    pub fn bin_ions(&mut self, decoy: bool, len_minus_1: usize, params: &Parameters) {
        let IonArena {
            forward,
            reverse,
            forward_decoy,
            reverse_decoy,
            bins,
            bins_decoy,
            seen,
            num_series,
            max_charge,
        } = self;
        let (fwd, rev, bins) = if decoy {
            (&*forward_decoy, &*reverse_decoy, bins_decoy)
        } else {
            (&*forward, &*reverse, bins)
        };

        for kind in &params.ion_series {
            for charge in 1..=*max_charge {
                for pos in 0..len_minus_1 {
                    let mz = ion_mz(kind.mass(fwd[pos], rev[pos], &params.masses), charge);
                    let bin = params.bin(mz);
                    if bin >= seen.len() {
                        seen.resize(bin + 1, false);
                    }
                    seen[bin] = false;
                }
            }
        }

        for (series, kind) in params.ion_series.iter().enumerate() {
            for charge in 1..=*max_charge {
                for pos in 0..len_minus_1 {
                    let mz = ion_mz(kind.mass(fwd[pos], rev[pos], &params.masses), charge);
                    let bin = params.bin(mz);
                    let at = Self::index(*num_series, charge, series, pos);
                    if !seen[bin] {
                        seen[bin] = true;
                        bins[at] = bin as u32;
                    } else {
                        bins[at] = 0;
                    }
                }
            }
        }
    }
}
