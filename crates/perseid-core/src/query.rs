use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::config::{IsotopeError, FLOAT_ZERO, HISTO_SIZE, MAX_PEPTIDE_LEN};
use crate::mass::{PrecursorTolerance, C13_DIFF};

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct SparseBin {
    pub bin: u32,
    pub intensity: f32,
}

/// Preprocessed cross-correlation intensities, indexed by fragment bin.
#[derive(Clone, Debug)]
pub enum XcorrData {
    Dense(Vec<f32>),
    Sparse(Vec<SparseBin>),
}

impl XcorrData {
    /// Build the sparse representation: pairs sorted by bin, with a zero
    /// sentinel at bin 0 so cursor arithmetic never runs off the front.
    pub fn sparse(mut pairs: Vec<SparseBin>) -> Self {
        pairs.sort_by_key(|p| p.bin);
        if pairs.first().map_or(true, |p| p.bin != 0) {
            pairs.insert(
                0,
                SparseBin {
                    bin: 0,
                    intensity: 0.0,
                },
            );
        }
        XcorrData::Sparse(pairs)
    }
}

/// One preprocessed MS/MS spectrum, as handed over by the external
/// preprocessing stage.
pub struct Spectrum {
    /// Expected neutral precursor mass (MH+ convention).
    pub exp_mass: f64,
    /// Half-width of the tolerance window in Da.
    pub tolerance: f64,
    pub tol_minus: f64,
    pub tol_plus: f64,
    pub charge: u8,
    pub max_fragment_charge: u8,
    /// Length of the dense scoring vector; all fragment bins are below it.
    pub array_size: usize,
    pub xcorr_data: XcorrData,
    pub xcorr_data_nl: Option<XcorrData>,
}

impl Spectrum {
    pub fn new(
        exp_mass: f64,
        tolerance: &PrecursorTolerance,
        charge: u8,
        max_fragment_charge: u8,
        array_size: usize,
        xcorr_data: XcorrData,
        xcorr_data_nl: Option<XcorrData>,
    ) -> Self {
        let (tol, tol_minus, tol_plus) = tolerance.window(exp_mass, charge);
        Spectrum {
            exp_mass,
            tolerance: tol,
            tol_minus,
            tol_plus,
            charge,
            max_fragment_charge,
            array_size,
            xcorr_data,
            xcorr_data_nl,
        }
    }
}

/// A stored peptide match.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HitEntry {
    pub peptide: Vec<u8>,
    /// Flanking residues; '-' at a protein boundary.
    pub prev_next: [u8; 2],
    pub protein: String,
    pub pep_mass: f64,
    pub xcorr: f32,
    pub total_ions: u32,
    pub duplicate_count: u32,
    /// Per-position variable-mod slot ids (`len + 2`, with the terminus
    /// flags at the back); empty outside variable-mod searches.
    pub mod_sites: Vec<u8>,
}

impl HitEntry {
    pub fn occupied(&self) -> bool {
        !self.peptide.is_empty()
    }
}

/// Mutable per-query search state, guarded by the query's lock.
pub struct Hits {
    pub results: Vec<HitEntry>,
    pub decoys: Vec<HitEntry>,
    pub lowest_score: f32,
    pub lowest_index: usize,
    pub lowest_decoy_score: f32,
    pub lowest_decoy_index: usize,
    pub histogram: Vec<u32>,
    pub decoy_histogram: Vec<u32>,
    pub matched_peptides: u64,
    pub matched_decoys: u64,
}

/// A candidate peptide presented for storage.
pub struct Candidate<'a> {
    pub peptide: &'a [u8],
    pub prev: u8,
    pub next: u8,
    pub protein: &'a str,
    pub pep_mass: f64,
    /// Mod placement (`len + 2` bytes) when the candidate carries variable
    /// mods.
    pub mod_sites: Option<&'a [u8]>,
}

impl Hits {
    fn new(num_results: usize) -> Self {
        Hits {
            results: vec![HitEntry::default(); num_results],
            decoys: vec![HitEntry::default(); num_results],
            lowest_score: 0.0,
            lowest_index: 0,
            lowest_decoy_score: 0.0,
            lowest_decoy_index: 0,
            histogram: vec![0; HISTO_SIZE],
            decoy_histogram: vec![0; HISTO_SIZE],
            matched_peptides: 0,
            matched_decoys: 0,
        }
    }

    pub(crate) fn bump_histogram(&mut self, decoy: bool, xcorr: f32) {
        let slot = ((xcorr * 10.0 + 0.5) as usize).min(HISTO_SIZE - 1);
        if decoy {
            self.decoy_histogram[slot] += 1;
        } else {
            self.histogram[slot] += 1;
        }
    }

    pub(crate) fn lowest(&self, decoy_store: bool) -> f32 {
        if decoy_store {
            self.lowest_decoy_score
        } else {
            self.lowest_score
        }
    }

    /// An equal candidate was already stored: same length, mass, residues
    /// and (for modified candidates) mod placement. Bumps the stored
    /// entry's duplicate count.
    pub(crate) fn check_duplicate(
        &mut self,
        decoy_store: bool,
        cand: &Candidate,
        var_mod_search: bool,
    ) -> bool {
        let entries = if decoy_store {
            &mut self.decoys
        } else {
            &mut self.results
        };
        for entry in entries.iter_mut() {
            if entry.peptide.len() != cand.peptide.len()
                || (cand.pep_mass - entry.pep_mass).abs() > FLOAT_ZERO
            {
                continue;
            }
            let mut duplicate = entry.peptide == cand.peptide;
            if duplicate && var_mod_search {
                if let Some(sites) = cand.mod_sites {
                    duplicate = entry.mod_sites.as_slice() == sites;
                }
            }
            if duplicate {
                entry.duplicate_count += 1;
                return true;
            }
        }
        false
    }

    /// Overwrite the lowest-scoring slot and recompute the floor.
    pub(crate) fn store(
        &mut self,
        decoy_store: bool,
        cand: &Candidate,
        xcorr: f32,
        charge: u8,
        num_series: usize,
        var_mod_search: bool,
    ) {
        let len = cand.peptide.len();
        if len >= MAX_PEPTIDE_LEN {
            return;
        }
        let (entries, lowest, lowest_index) = if decoy_store {
            (
                &mut self.decoys,
                &mut self.lowest_decoy_score,
                &mut self.lowest_decoy_index,
            )
        } else {
            (
                &mut self.results,
                &mut self.lowest_score,
                &mut self.lowest_index,
            )
        };

        let entry = &mut entries[*lowest_index];
        entry.peptide.clear();
        entry.peptide.extend_from_slice(cand.peptide);
        entry.prev_next = [cand.prev, cand.next];
        entry.protein.clear();
        entry.protein.push_str(cand.protein);
        entry.pep_mass = cand.pep_mass;
        let per_charge = if charge > 2 { charge as usize - 1 } else { 1 };
        entry.total_ions = ((len - 1) * num_series * per_charge) as u32;
        entry.xcorr = xcorr.max(0.0);
        entry.duplicate_count = 0;
        if var_mod_search {
            entry.mod_sites.clear();
            match cand.mod_sites {
                Some(sites) => entry.mod_sites.extend_from_slice(sites),
                None => entry.mod_sites.resize(len + 2, 0),
            }
        }

        *lowest = entries[0].xcorr;
        *lowest_index = 0;
        for (i, entry) in entries.iter().enumerate().skip(1) {
            if entry.xcorr < *lowest {
                *lowest = entry.xcorr;
                *lowest_index = i;
            }
        }
    }
}

pub struct Query {
    pub spectrum: Spectrum,
    hits: Mutex<Hits>,
}

impl Query {
    pub fn new(spectrum: Spectrum, num_results: usize) -> Self {
        Query {
            spectrum,
            hits: Mutex::new(Hits::new(num_results)),
        }
    }

    pub fn hits(&self) -> MutexGuard<'_, Hits> {
        self.hits.lock().unwrap()
    }

    /// Does a calculated mass match this query's window, given the isotope
    /// error mode?
    pub fn check_mass_match(&self, calc: f64, isotope: IsotopeError) -> bool {
        let s = &self.spectrum;
        if calc < s.tol_minus || calc > s.tol_plus {
            return false;
        }
        let offsets: &[f64] = match isotope {
            IsotopeError::Off => return true,
            IsotopeError::C13 => &[
                0.0,
                C13_DIFF,
                C13_DIFF * 2.0,
                C13_DIFF * 3.0,
                -C13_DIFF,
            ],
            IsotopeError::HeavyLabel => &[0.0, 4.007_099_5, 8.014_199, -4.007_099_5, -8.014_199],
        };
        offsets
            .iter()
            .any(|k| (s.exp_mass - calc - k).abs() <= s.tolerance)
    }
}

/// All queries for one search, ordered by the low edge of their tolerance
/// windows so candidates can be located by binary search.
pub struct QuerySet {
    queries: Vec<Query>,
    pub min_mass: f64,
    pub max_mass: f64,
    pub max_fragment_charge: u8,
    pub max_array_size: usize,
}

impl QuerySet {
    pub fn new(mut queries: Vec<Query>) -> Self {
        queries.sort_by(|a, b| a.spectrum.tol_minus.total_cmp(&b.spectrum.tol_minus));
        let mut min_mass = f64::MAX;
        let mut max_mass = 0.0f64;
        let mut max_fragment_charge = 1;
        let mut max_array_size = 0;
        for q in &queries {
            min_mass = min_mass.min(q.spectrum.tol_minus);
            max_mass = max_mass.max(q.spectrum.tol_plus);
            max_fragment_charge = max_fragment_charge.max(q.spectrum.max_fragment_charge);
            max_array_size = max_array_size.max(q.spectrum.array_size);
        }
        QuerySet {
            queries,
            min_mass,
            max_mass,
            max_fragment_charge,
            max_array_size,
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn get(&self, i: usize) -> &Query {
        &self.queries[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Query> {
        self.queries.iter()
    }

    /// Index of the first query whose window could contain `mass`, found by
    /// binary search and a backward scan. Callers iterate forward from here
    /// and stop once `mass` drops below a query's window.
    pub fn first_candidate(&self, mass: f64) -> Option<usize> {
        let qs = &self.queries;
        let mut lo = 0i64;
        let mut hi = qs.len() as i64 - 1;
        let mut pos = None;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let s = &qs[mid as usize].spectrum;
            if s.tol_minus <= mass && mass <= s.tol_plus {
                pos = Some(mid as usize);
                break;
            } else if s.tol_minus > mass {
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }
        let mut pos = pos?;
        while pos > 0 && qs[pos].spectrum.tol_plus >= mass {
            pos -= 1;
        }
        Some(pos)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::{PrecursorMassMode, ToleranceUnits};

    fn spectrum(exp_mass: f64, tol: f64) -> Spectrum {
        Spectrum {
            exp_mass,
            tolerance: tol,
            tol_minus: exp_mass - tol,
            tol_plus: exp_mass + tol,
            charge: 2,
            max_fragment_charge: 1,
            array_size: 2048,
            xcorr_data: XcorrData::Dense(vec![0.0; 2048]),
            xcorr_data_nl: None,
        }
    }

    fn candidate<'a>(peptide: &'a [u8], mass: f64) -> Candidate<'a> {
        Candidate {
            peptide,
            prev: b'K',
            next: b'-',
            protein: "p1",
            pep_mass: mass,
            mod_sites: None,
        }
    }

    #[test]
    fn window_construction() {
        let tol = PrecursorTolerance {
            value: 3.0,
            units: ToleranceUnits::Amu,
            mode: PrecursorMassMode::Mh,
        };
        let s = Spectrum::new(800.0, &tol, 2, 3, 1024, XcorrData::Dense(vec![]), None);
        assert_eq!((s.tol_minus, s.tol_plus), (797.0, 803.0));
    }

    #[test]
    fn sparse_sentinel() {
        let data = XcorrData::sparse(vec![
            SparseBin { bin: 40, intensity: 2.0 },
            SparseBin { bin: 12, intensity: 1.0 },
        ]);
        match data {
            XcorrData::Sparse(v) => {
                assert_eq!(v[0].bin, 0);
                assert_eq!(v[1].bin, 12);
                assert_eq!(v[2].bin, 40);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn isotope_modes() {
        let q = Query::new(spectrum(1000.0 + 2.0 * C13_DIFF, 0.01), 5);
        let calc = 1000.0;
        // outside the plain window
        assert!(!q.check_mass_match(calc, IsotopeError::Off));
        // the window itself has to bracket the candidate before offsets
        // apply, so widen it for the isotope modes
        let wide = Query::new(
            Spectrum {
                tolerance: 0.01,
                ..spectrum(1000.0 + 2.0 * C13_DIFF, 3.0)
            },
            5,
        );
        assert!(wide.check_mass_match(calc, IsotopeError::C13));
        assert!(!wide.check_mass_match(calc - 0.5, IsotopeError::C13));
        let labeled = Query::new(
            Spectrum {
                tolerance: 0.01,
                ..spectrum(1000.0 + 4.007_099_5, 6.0)
            },
            5,
        );
        assert!(labeled.check_mass_match(calc, IsotopeError::HeavyLabel));
        assert!(!labeled.check_mass_match(calc + 1.0, IsotopeError::HeavyLabel));
    }

    #[test]
    fn binary_search_backs_up() {
        let queries = vec![
            Query::new(spectrum(500.0, 1.0), 2),
            Query::new(spectrum(500.2, 1.0), 2),
            Query::new(spectrum(500.4, 1.0), 2),
            Query::new(spectrum(900.0, 1.0), 2),
        ];
        let set = QuerySet::new(queries);
        let first = set.first_candidate(500.3).unwrap();
        // the scan start is at or before every matching query
        assert!(first <= 1);
        assert!(set.first_candidate(2000.0).is_none());
        assert_eq!(set.first_candidate(900.5), Some(2));
        assert!((set.min_mass - 499.0).abs() < 1e-9);
        assert!((set.max_mass - 901.0).abs() < 1e-9);
    }

    #[test]
    fn store_evicts_lowest() {
        let q = Query::new(spectrum(1000.0, 3.0), 3);
        let mut hits = q.hits();
        hits.store(false, &candidate(b"AAAK", 400.0), 1.0, 2, 2, false);
        hits.store(false, &candidate(b"CCCK", 400.1), 3.0, 2, 2, false);
        hits.store(false, &candidate(b"DDDK", 400.2), 2.0, 2, 2, false);
        assert_eq!(hits.lowest_score, 1.0);
        // a better score evicts AAAK
        hits.store(false, &candidate(b"EEEK", 400.3), 2.5, 2, 2, false);
        assert_eq!(hits.lowest_score, 2.0);
        assert!(hits.results.iter().all(|e| e.peptide != b"AAAK"));
        assert!(hits.results.iter().any(|e| e.peptide == b"EEEK"));
    }

    #[test]
    fn duplicates_bump_counts() {
        let q = Query::new(spectrum(1000.0, 3.0), 3);
        let mut hits = q.hits();
        let cand = candidate(b"SAMPLER", 800.0);
        assert!(!hits.check_duplicate(false, &cand, false));
        hits.store(false, &cand, 1.5, 2, 2, false);
        assert!(hits.check_duplicate(false, &cand, false));
        assert!(hits.check_duplicate(false, &cand, false));
        let stored = hits.results.iter().find(|e| e.occupied()).unwrap();
        assert_eq!(stored.duplicate_count, 2);
        // same residues at a different mass is not a duplicate
        assert!(!hits.check_duplicate(false, &candidate(b"SAMPLER", 801.0), false));
    }

    #[test]
    fn mod_sites_distinguish_duplicates() {
        let q = Query::new(spectrum(1000.0, 3.0), 3);
        let mut hits = q.hits();
        let sites_a = [1u8, 0, 0, 0, 0];
        let sites_b = [0u8, 1, 0, 0, 0];
        let mut cand = candidate(b"STY", 500.0);
        cand.mod_sites = Some(&sites_a);
        hits.store(false, &cand, 1.0, 2, 2, true);
        assert!(hits.check_duplicate(false, &cand, true));
        cand.mod_sites = Some(&sites_b);
        assert!(!hits.check_duplicate(false, &cand, true));
    }

    #[test]
    fn histogram_is_clamped() {
        let q = Query::new(spectrum(1000.0, 3.0), 1);
        let mut hits = q.hits();
        hits.bump_histogram(false, 0.04);
        hits.bump_histogram(false, 2.0);
        hits.bump_histogram(false, 1e6);
        assert_eq!(hits.histogram[0], 1);
        assert_eq!(hits.histogram[20], 1);
        assert_eq!(hits.histogram[HISTO_SIZE - 1], 1);
    }

    #[test]
    fn total_ions_scales_with_charge() {
        let q = Query::new(spectrum(1000.0, 3.0), 1);
        let mut hits = q.hits();
        hits.store(false, &candidate(b"SAMPLER", 800.0), 1.0, 3, 2, false);
        // (7 - 1) series positions, 2 series, charge 3 doubles it
        assert_eq!(hits.results[0].total_ions, 24);
    }
}
