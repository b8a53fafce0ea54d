use serde::Serialize;

use crate::config::{
    DecoySearch, Parameters, MAX_PEPTIDE_LEN, MAX_PEPTIDE_LEN_P2, VMODS, VMOD_N,
};
use crate::ion::IonArena;
use crate::query::{Candidate, QuerySet};
use crate::scoring;
use crate::search::{reverse_with_pivot, within_mass_tolerance};

/// A residue-specific variable modification slot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VarMod {
    pub delta: f64,
    pub residues: Vec<u8>,
    /// All eligible residues of a peptide carry the mod, or none do.
    pub binary: bool,
    pub max_per_peptide: i32,
}

impl VarMod {
    pub fn active(&self) -> bool {
        self.delta != 0.0 && !self.residues.is_empty()
    }

    #[inline]
    pub fn applies_to(&self, residue: u8) -> bool {
        self.delta != 0.0 && self.residues.contains(&residue)
    }
}

/// A terminus variable modification with an optional distance constraint:
/// -1 allows any peptide, 0 restricts to the protein terminus, n allows
/// peptides within n residues of it.
#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct TerminusMod {
    pub delta: f64,
    pub distance: i32,
}

impl TerminusMod {
    pub fn allows_nterm(&self, start: usize) -> bool {
        self.delta != 0.0 && (self.distance < 0 || start as i32 <= self.distance)
    }

    pub fn allows_cterm(&self, end: usize, protein_len: usize) -> bool {
        self.delta != 0.0
            && (self.distance < 0 || end as i32 + self.distance >= protein_len as i32 - 1)
    }
}

/// Chase's incremental combinations generator (Algorithm 382, CACM
/// 13:6:368). Starting from the pattern with the M ones in the last M of N
/// positions, each `step` yields `(x, y, z)`: setting `b[x] = 1, b[y] = 0`
/// produces the next pattern, until all C(N, M) patterns have been
/// visited.
pub struct Twiddle {
    p: Vec<i32>,
}

impl Twiddle {
    pub fn new(m: usize, n: usize) -> Self {
        let mut p = vec![0i32; n + 2];
        p[0] = n as i32 + 1;
        for i in (n - m + 1)..=n {
            p[i] = (i + m) as i32 - n as i32;
        }
        p[n + 1] = -2;
        if m == 0 {
            p[1] = 1;
        }
        Twiddle { p }
    }

    pub fn step(&mut self) -> Option<(usize, usize, usize)> {
        let p = &mut self.p;
        let mut j = 1usize;
        while p[j] <= 0 {
            j += 1;
        }
        if p[j - 1] == 0 {
            for i in (2..j).rev() {
                p[i] = -1;
            }
            p[j] = 0;
            p[1] = 1;
            Some((0, j - 1, 0))
        } else {
            if j > 1 {
                p[j - 1] = 0;
            }
            loop {
                j += 1;
                if p[j] <= 0 {
                    break;
                }
            }
            let k = j - 1;
            let mut i = j;
            while p[i] == 0 {
                p[i] = -1;
                i += 1;
            }
            if p[i] == -1 {
                p[i] = p[k];
                let z = (p[k] - 1) as usize;
                p[k] = -1;
                Some((i - 1, k - 1, z))
            } else if i == p[0] as usize {
                None
            } else {
                p[j] = p[i];
                let z = (p[i] - 1) as usize;
                p[i] = 0;
                Some((j - 1, i - 1, z))
            }
        }
    }
}

#[derive(Copy, Clone)]
struct SlotState {
    /// Eligible residues seen so far in the sweep.
    total: usize,
    /// Residues this combination must modify.
    matched: usize,
    /// Per-eligible-residue flags for the current placement; a slot's flag
    /// value is its 1-based id.
    sites: [u8; MAX_PEPTIDE_LEN],
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState {
            total: 0,
            matched: 0,
            sites: [0; MAX_PEPTIDE_LEN],
        }
    }
}

/// Enumeration of every valid variable-mod placement for one peptide
/// window, scoring each placement against all queries its mass matches.
pub(crate) struct VarModScan<'a> {
    params: &'a Parameters,
    queries: &'a QuerySet,
    arena: &'a mut IonArena,
    seq: &'a [u8],
    name: &'a str,
    decoy_name: &'a str,
    start: usize,
    window_end: usize,
    end: usize,
    pep_mass: f64,
    n_site: bool,
    c_site: bool,
    slots: [SlotState; VMODS],
    sites: [u8; MAX_PEPTIDE_LEN_P2],
    decoy_sites: [u8; MAX_PEPTIDE_LEN_P2],
    decoy_peptide: [u8; MAX_PEPTIDE_LEN],
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn var_mod_scan(
    params: &Parameters,
    queries: &QuerySet,
    arena: &mut IonArena,
    seq: &[u8],
    name: &str,
    decoy_name: &str,
    counts: &[i32; crate::config::VMODS_ALL],
    start: usize,
    end: usize,
) {
    let mut scan = VarModScan {
        params,
        queries,
        arena,
        seq,
        name,
        decoy_name,
        start,
        window_end: end,
        end: start,
        pep_mass: 0.0,
        n_site: false,
        c_site: false,
        slots: [SlotState::default(); VMODS],
        sites: [0; MAX_PEPTIDE_LEN_P2],
        decoy_sites: [0; MAX_PEPTIDE_LEN_P2],
        decoy_peptide: [0; MAX_PEPTIDE_LEN],
    };
    scan.run(counts);
}

fn total_var_mod_mass(p: &Parameters, chosen: &[i32; VMODS], i_c: i32, i_n: i32) -> f64 {
    let mut mass = 0.0;
    for j in 0..VMODS {
        mass += p.var_mods[j].delta * chosen[j] as f64;
    }
    mass + p.nterm_var_mod.delta * i_n as f64 + p.cterm_var_mod.delta * i_c as f64
}

impl<'a> VarModScan<'a> {
    fn run(&mut self, counts: &[i32; crate::config::VMODS_ALL]) {
        let p = self.params;

        let mut avail = [0i32; VMODS];
        for j in 0..VMODS {
            avail[j] = counts[j].min(p.var_mods[j].max_per_peptide);
        }

        let mut base = p.oh2_proton_cterm_nterm;
        if self.start == 0 {
            base += p.statics.nterm_protein;
        }
        if self.window_end == self.seq.len() - 1 {
            base += p.statics.cterm_protein;
        }

        let mut chosen = [0i32; VMODS];
        for i_n in 0..=counts[VMOD_N] {
            self.enumerate(VMODS, &avail, &mut chosen, 0, i_n, base);
        }
    }

    // Nested count enumeration, outermost slot last, pruned by the global
    // per-peptide cap.
    fn enumerate(
        &mut self,
        slot: usize,
        avail: &[i32; VMODS],
        chosen: &mut [i32; VMODS],
        sum: i32,
        i_n: i32,
        base: f64,
    ) {
        if slot == 0 {
            self.sweep(chosen, i_n, base);
            return;
        }
        let idx = slot - 1;
        for count in 0..=avail[idx] {
            if sum + count > self.params.max_var_mods_per_peptide {
                break;
            }
            chosen[idx] = count;
            self.enumerate(slot - 1, avail, chosen, sum + count, i_n, base);
        }
        chosen[idx] = 0;
    }

    // Sweep the end position across the window, tracking how many eligible
    // residues each slot has seen, and fire placement enumeration whenever
    // the combination is satisfiable and the trial mass hits a query.
    fn sweep(&mut self, chosen: &[i32; VMODS], i_n: i32, base: f64) {
        let p = self.params;
        let chosen = *chosen;
        let residue_total: i32 = chosen.iter().sum();
        if residue_total + i_n == 0 && p.cterm_var_mod.delta == 0.0 {
            return;
        }

        let mut calc = base + total_var_mod_mass(p, &chosen, 0, i_n);
        for slot in self.slots.iter_mut() {
            slot.total = 0;
        }

        for end_tmp in self.start..=self.window_end {
            if end_tmp - self.start + 1 > MAX_PEPTIDE_LEN {
                break;
            }
            let res = self.seq[end_tmp];
            calc += p.masses.parent[res as usize];
            for j in 0..VMODS {
                if p.var_mods[j].applies_to(res) {
                    self.slots[j].total += 1;
                }
            }

            let c_avail = i32::from(p.cterm_var_mod.allows_cterm(end_tmp, self.seq.len()));
            for i_c in 0..=c_avail {
                let trial = calc + i_c as f64 * p.cterm_var_mod.delta;

                // The combination must be satisfiable by the residues seen
                // so far; binary slots demand all or nothing.
                let mut valid = true;
                for j in 0..VMODS {
                    let total = self.slots[j].total as i32;
                    if p.var_mods[j].binary {
                        if chosen[j] != 0 && chosen[j] != total {
                            valid = false;
                            break;
                        }
                    } else if chosen[j] > total {
                        valid = false;
                        break;
                    }
                }
                if !valid || residue_total + i_c + i_n == 0 {
                    continue;
                }

                if let Some(first) =
                    within_mass_tolerance(p, self.queries, self.seq, trial, self.start, end_tmp)
                {
                    for j in 0..VMODS {
                        self.slots[j].sites = [0; MAX_PEPTIDE_LEN];
                        self.slots[j].matched = chosen[j] as usize;
                    }
                    self.n_site = i_n == 1;
                    self.c_site = i_c == 1;
                    self.end = end_tmp;
                    self.pep_mass = trial;
                    self.permute(0, first);
                }
            }
        }
    }

    // One recursion frame per slot; each frame walks its C(N, M) site
    // patterns with a twiddle iterator, the leaf builds ions and scores.
    fn permute(&mut self, slot: usize, first_query: usize) {
        if slot == VMODS {
            self.calc_ions(first_query);
            return;
        }
        let n = self.slots[slot].total;
        let m = self.slots[slot].matched;
        if m == 0 {
            self.permute(slot + 1, first_query);
            return;
        }

        let id = slot as u8 + 1;
        let mut pattern = [0u8; MAX_PEPTIDE_LEN];
        for flag in pattern.iter_mut().take(n).skip(n - m) {
            *flag = 1;
        }
        for i in 0..n {
            self.slots[slot].sites[i] = pattern[i] * id;
        }
        self.permute(slot + 1, first_query);

        let mut twiddle = Twiddle::new(m, n);
        while let Some((x, y, _)) = twiddle.step() {
            pattern[x] = 1;
            pattern[y] = 0;
            for i in 0..n {
                self.slots[slot].sites[i] = pattern[i] * id;
            }
            self.permute(slot + 1, first_query);
        }
    }

    // Score one fully-placed modified peptide against every query its mass
    // matches, building the ion set lazily on the first match.
    fn calc_ions(&mut self, mut which: usize) {
        let len = self.end - self.start + 1;
        let mut first = true;

        while which < self.queries.len() {
            let query = self.queries.get(which);
            if self.pep_mass < query.spectrum.tol_minus {
                break;
            }
            if query.check_mass_match(self.pep_mass, self.params.isotope_error) {
                if first {
                    first = false;
                    if !self.build_ions(len) {
                        // two mods claimed one residue; drop this placement
                        return;
                    }
                }

                let prev = if self.start == 0 {
                    b'-'
                } else {
                    self.seq[self.start - 1]
                };
                let next = if self.end == self.seq.len() - 1 {
                    b'-'
                } else {
                    self.seq[self.end + 1]
                };

                let cand = Candidate {
                    peptide: &self.seq[self.start..=self.end],
                    prev,
                    next,
                    protein: self.name,
                    pep_mass: self.pep_mass,
                    mod_sites: Some(&self.sites[..len + 2]),
                };
                let score = scoring::xcorr(self.arena, false, len, query, self.params);
                scoring::commit(query, &cand, score, false, self.params);

                if self.params.decoy_search != DecoySearch::Off {
                    let decoy = Candidate {
                        peptide: &self.decoy_peptide[..len],
                        prev,
                        next,
                        protein: self.decoy_name,
                        pep_mass: self.pep_mass,
                        mod_sites: Some(&self.decoy_sites[..len + 2]),
                    };
                    let score = scoring::xcorr(self.arena, true, len, query, self.params);
                    scoring::commit(query, &decoy, score, true, self.params);
                }
            }
            which += 1;
        }
    }

    // Collapse the per-slot site flags onto the peptide and fill the
    // prefix-sum arrays; false on a placement conflict.
    fn build_ions(&mut self, len: usize) -> bool {
        let p = self.params;
        self.sites[..len + 2].fill(0);
        let mut char_idx = [0usize; VMODS];

        let mut bion = p.nterm_proton;
        let mut yion = p.cterm_oh2_proton;
        if self.start == 0 {
            bion += p.statics.nterm_protein;
        }
        if self.end == self.seq.len() - 1 {
            yion += p.statics.cterm_protein;
        }
        if self.n_site {
            bion += p.nterm_var_mod.delta;
            self.sites[len] = 1;
        }
        if self.c_site {
            yion += p.cterm_var_mod.delta;
            self.sites[len + 1] = 1;
        }

        for i in self.start..=self.end {
            let pos = i - self.start;
            let res = self.seq[i];
            bion += p.masses.fragment[res as usize];
            for j in 0..VMODS {
                if self.slots[j].matched > 0 && p.var_mods[j].applies_to(res) {
                    if self.slots[j].sites[char_idx[j]] != 0 {
                        if self.sites[pos] != 0 {
                            return false;
                        }
                        self.sites[pos] = self.slots[j].sites[char_idx[j]];
                        bion += p.var_mods[j].delta;
                    }
                    char_idx[j] += 1;
                }
            }
            self.arena.forward[pos] = bion;
        }

        for i in (self.start..=self.end).rev() {
            let pos = i - self.start;
            yion += p.masses.fragment[self.seq[i] as usize];
            if self.sites[pos] > 0 {
                yion += p.var_mods[self.sites[pos] as usize - 1].delta;
            }
            self.arena.reverse[self.end - i] = yion;
        }

        self.arena.bin_ions(false, len - 1, p);

        if p.decoy_search != DecoySearch::Off {
            self.build_decoy(len);
        }
        true
    }

    // Mirror of `build_ions` for the reversed peptide, with the mod sites
    // reversed in lockstep around the same pivot.
    fn build_decoy(&mut self, len: usize) {
        let p = self.params;
        let window = &self.seq[self.start..=self.end];
        reverse_with_pivot(window, p.search_enzyme.offset, &mut self.decoy_peptide[..len]);

        let mut reversed = [0u8; MAX_PEPTIDE_LEN];
        reverse_with_pivot(&self.sites[..len], p.search_enzyme.offset, &mut reversed[..len]);
        self.decoy_sites[..len].copy_from_slice(&reversed[..len]);
        self.decoy_sites[len] = self.sites[len];
        self.decoy_sites[len + 1] = self.sites[len + 1];

        let mut bion = p.nterm_proton;
        let mut yion = p.cterm_oh2_proton;
        if self.start == 0 {
            bion += p.statics.nterm_protein;
        }
        if self.end == self.seq.len() - 1 {
            yion += p.statics.cterm_protein;
        }
        if self.decoy_sites[len] != 0 {
            bion += p.nterm_var_mod.delta;
        }
        if self.decoy_sites[len + 1] != 0 {
            yion += p.cterm_var_mod.delta;
        }

        for pos in 0..len - 1 {
            let res = self.decoy_peptide[pos];
            bion += p.masses.fragment[res as usize];
            if self.decoy_sites[pos] > 0 {
                bion += p.var_mods[self.decoy_sites[pos] as usize - 1].delta;
            }
            self.arena.forward_decoy[pos] = bion;

            let rpos = len - 1 - pos;
            let res = self.decoy_peptide[rpos];
            yion += p.masses.fragment[res as usize];
            if self.decoy_sites[rpos] > 0 {
                yion += p.var_mods[self.decoy_sites[rpos] as usize - 1].delta;
            }
            self.arena.reverse_decoy[pos] = yion;
        }

        self.arena.bin_ions(true, len - 1, p);
    }
}
