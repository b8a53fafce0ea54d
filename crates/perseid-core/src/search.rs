use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::config::{
    DecoySearch, Parameters, MAX_PEPTIDE_LEN, VMODS, VMODS_ALL, VMOD_C, VMOD_N, WIDTH_REFERENCE,
};
use crate::fasta::Protein;
use crate::ion::IonArena;
use crate::modification::var_mod_scan;
use crate::query::{Candidate, QuerySet};
use crate::scoring;
use crate::translate;
use crate::Error;

/// Database statistics gathered while the search consumed the stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct SearchSummary {
    pub total_proteins: u64,
    pub total_residues: u64,
}

/// The search driver: fans one protein record per job out to a worker
/// pool; every worker owns its ion arena for the lifetime of a job.
pub struct Searcher<'a> {
    pub params: &'a Parameters,
    pub queries: &'a QuerySet,
}

impl<'a> Searcher<'a> {
    pub fn new(params: &'a Parameters, queries: &'a QuerySet) -> Self {
        Searcher { params, queries }
    }

    /// Search every protein of the database stream against all queries.
    /// Workers pull records on demand, so at most the in-flight jobs and
    /// one pending record are ever buffered. The first fatal error stops
    /// the search.
    pub fn run_search<I>(&self, proteins: I) -> Result<SearchSummary, Error>
    where
        I: IntoIterator<Item = Result<Protein, Error>> + Send,
        I::IntoIter: Send,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.num_threads)
            .build()
            .map_err(|e| Error::Resource(e.to_string()))?;

        let total_proteins = AtomicU64::new(0);
        let total_residues = AtomicU64::new(0);

        pool.install(|| {
            proteins.into_iter().par_bridge().try_for_each_init(
                || {
                    IonArena::new(
                        self.params.ion_series.len(),
                        self.queries.max_fragment_charge,
                        self.queries.max_array_size,
                    )
                },
                |arena, record| -> Result<(), Error> {
                    let protein = record?;
                    let done = total_proteins.fetch_add(1, Ordering::Relaxed) + 1;
                    total_residues.fetch_add(protein.residues.len() as u64, Ordering::Relaxed);
                    if done % 200 == 0 {
                        log::debug!("search progress: {} proteins", done);
                    }
                    self.search_protein(&protein, arena);
                    Ok(())
                },
            )
        })?;

        let summary = SearchSummary {
            total_proteins: total_proteins.into_inner(),
            total_residues: total_residues.into_inner(),
        };
        log::info!(
            "searched {} proteins ({} residues) against {} queries",
            summary.total_proteins,
            summary.total_residues,
            self.queries.len()
        );
        Ok(summary)
    }

    /// Reading-frame dispatch for one database entry.
    fn search_protein(&self, protein: &Protein, arena: &mut IonArena) {
        let p = self.params;
        let name = protein.name.as_str();
        let seq = &protein.residues;

        let forward_frames = |frames: std::ops::Range<usize>, arena: &mut IonArena| {
            for frame in frames {
                let aa = translate::translate(seq, frame, true);
                self.search_peptides(&aa, name, false, arena);
            }
        };
        let reverse_frames = |frames: std::ops::Range<usize>, arena: &mut IonArena| {
            let comp = translate::complement_strand(seq);
            for frame in frames {
                let aa = translate::translate(&comp, frame, false);
                self.search_peptides(&aa, name, false, arena);
            }
        };

        match p.nucleotide_reading_frame {
            0 => {
                self.search_peptides(seq, name, false, arena);
                if p.clip_nterm_methionine && seq.first() == Some(&b'M') {
                    self.search_peptides(&seq[1..], name, true, arena);
                }
            }
            f @ 1..=3 => forward_frames(f as usize - 1..f as usize, arena),
            7 => forward_frames(0..3, arena),
            f @ 4..=6 => {
                // historical frame remap: 6 - f, then swap frames 0 and 2
                let frame = match 6 - f {
                    0 => 2,
                    2 => 0,
                    other => other,
                };
                reverse_frames(frame as usize..frame as usize + 1, arena);
            }
            8 => reverse_frames(0..3, arena),
            9 => {
                forward_frames(0..3, &mut *arena);
                reverse_frames(0..3, arena);
            }
            _ => {}
        }
    }

    /// Mass-constrained sliding window over one (possibly translated)
    /// protein sequence. `nterm_only` is the clipped-methionine pass, which
    /// only considers windows anchored at the clipped N-terminus.
    fn search_peptides(&self, seq: &[u8], name: &str, nterm_only: bool, arena: &mut IonArena) {
        let p = self.params;
        let queries = self.queries;
        let len = seq.len();
        if len == 0 || queries.is_empty() {
            return;
        }
        let last = len - 1;
        let decoy_enabled = p.decoy_search != DecoySearch::Off;
        let decoy_name = if decoy_enabled {
            make_decoy_name(name)
        } else {
            String::new()
        };
        let mut decoy_window = [0u8; MAX_PEPTIDE_LEN];

        let mut start = 0usize;
        let mut end = 0usize;
        let mut counts = [0i32; VMODS_ALL];
        let mut calc = p.oh2_proton_cterm_nterm + p.masses.parent[seq[0] as usize];
        if p.var_mod_search {
            count_var_mods(&mut counts, seq[0], p);
            counts[VMOD_N] = i32::from(p.nterm_var_mod.allows_nterm(0));
            counts[VMOD_C] = i32::from(p.cterm_var_mod.allows_cterm(0, len));
        }
        calc += p.statics.nterm_protein;
        if end == last {
            calc += p.statics.cterm_protein;
        }

        while start < len {
            let pep_len = end + 1 - start;

            if (1..MAX_PEPTIDE_LEN).contains(&pep_len) {
                if let Some(mut which) = within_mass_tolerance(p, queries, seq, calc, start, end) {
                    let mut first = true;
                    while which < queries.len() {
                        let query = queries.get(which);
                        if calc < query.spectrum.tol_minus {
                            // every remaining query window sits above this
                            // candidate mass
                            break;
                        }
                        if query.check_mass_match(calc, p.isotope_error) {
                            if first {
                                // build the ion set once for all matching
                                // queries
                                first = false;
                                let mut bion = p.nterm_proton;
                                let mut yion = p.cterm_oh2_proton;
                                if start == 0 {
                                    bion += p.statics.nterm_protein;
                                }
                                if end == last {
                                    yion += p.statics.cterm_protein;
                                }
                                arena.build_plain(
                                    false,
                                    &seq[start..=end],
                                    bion,
                                    yion,
                                    &p.masses.fragment,
                                );
                                arena.bin_ions(false, pep_len - 1, p);
                                if decoy_enabled {
                                    reverse_with_pivot(
                                        &seq[start..=end],
                                        p.search_enzyme.offset,
                                        &mut decoy_window[..pep_len],
                                    );
                                    arena.build_plain(
                                        true,
                                        &decoy_window[..pep_len],
                                        bion,
                                        yion,
                                        &p.masses.fragment,
                                    );
                                    arena.bin_ions(true, pep_len - 1, p);
                                }
                            }

                            let prev = if start == 0 { b'-' } else { seq[start - 1] };
                            let next = if end == last { b'-' } else { seq[end + 1] };
                            let cand = Candidate {
                                peptide: &seq[start..=end],
                                prev,
                                next,
                                protein: name,
                                pep_mass: calc,
                                mod_sites: None,
                            };
                            let score = scoring::xcorr(arena, false, pep_len, query, p);
                            scoring::commit(query, &cand, score, false, p);

                            if decoy_enabled {
                                let decoy = Candidate {
                                    peptide: &decoy_window[..pep_len],
                                    prev,
                                    next,
                                    protein: &decoy_name,
                                    pep_mass: calc,
                                    mod_sites: None,
                                };
                                let score = scoring::xcorr(arena, true, pep_len, query, p);
                                scoring::commit(query, &decoy, score, true, p);
                            }
                        }
                        which += 1;
                    }
                }
            }

            if calc <= queries.max_mass && end < last && pep_len < MAX_PEPTIDE_LEN {
                // grow the window
                end += 1;
                if p.var_mod_search {
                    counts[VMOD_C] = i32::from(p.cterm_var_mod.allows_cterm(end, len));
                }
                calc += p.masses.parent[seq[end] as usize];
                if p.var_mod_search {
                    count_var_mods(&mut counts, seq[end], p);
                }
                if end == last {
                    calc += p.statics.cterm_protein;
                }
            } else {
                // advance the start; the window shrinks from the right
                // until it re-enters mass range
                if p.var_mod_search {
                    if total_var_mod_count(&counts) > 0 {
                        var_mod_scan(
                            p,
                            queries,
                            arena,
                            seq,
                            name,
                            &decoy_name,
                            &counts,
                            start,
                            end,
                        );
                    }
                    subtract_var_mods(&mut counts, seq[start], p);
                }
                if nterm_only {
                    return;
                }
                calc -= p.masses.parent[seq[start] as usize];
                if start == 0 {
                    calc -= p.statics.nterm_protein;
                }
                start += 1;
                if p.var_mod_search {
                    counts[VMOD_N] = i32::from(p.nterm_var_mod.allows_nterm(start));
                }
                while calc >= queries.min_mass && end > start {
                    calc -= p.masses.parent[seq[end] as usize];
                    if p.var_mod_search {
                        subtract_var_mods(&mut counts, seq[end], p);
                    }
                    if end == last {
                        calc -= p.statics.cterm_protein;
                    }
                    end -= 1;
                }
            }
        }
    }
}

/// Global envelope and enzyme gate, then the index of the first query whose
/// window might contain `calc`.
pub(crate) fn within_mass_tolerance(
    params: &Parameters,
    queries: &QuerySet,
    seq: &[u8],
    calc: f64,
    start: usize,
    end: usize,
) -> Option<usize> {
    if calc < queries.min_mass || calc > queries.max_mass {
        return None;
    }
    if !params.no_enzyme
        && !params.search_enzyme.allows(
            seq,
            start,
            end,
            params.enzyme_termini,
            params.allowed_missed_cleavage,
        )
    {
        return None;
    }
    queries.first_candidate(calc)
}

/// Reverse a peptide for the decoy search, keeping the terminal residue the
/// enzyme cuts at in place: offset-1 enzymes keep the last residue,
/// offset-0 enzymes the first.
pub(crate) fn reverse_with_pivot(src: &[u8], offset: u8, out: &mut [u8]) {
    let len = src.len();
    if len == 0 {
        return;
    }
    if offset == 1 {
        for i in 0..len - 1 {
            out[i] = src[len - 2 - i];
        }
        out[len - 1] = src[len - 1];
    } else {
        out[0] = src[0];
        for i in 1..len {
            out[i] = src[len - i];
        }
    }
}

fn make_decoy_name(name: &str) -> String {
    let mut decoy = String::with_capacity(name.len() + 6);
    decoy.push_str("DECOY_");
    decoy.push_str(name);
    if decoy.len() > WIDTH_REFERENCE - 1 {
        let mut cut = WIDTH_REFERENCE - 1;
        while !decoy.is_char_boundary(cut) {
            cut -= 1;
        }
        decoy.truncate(cut);
    }
    decoy
}

fn count_var_mods(counts: &mut [i32; VMODS_ALL], residue: u8, params: &Parameters) {
    for j in 0..VMODS {
        if params.var_mods[j].applies_to(residue) {
            counts[j] += 1;
        }
    }
}

fn subtract_var_mods(counts: &mut [i32; VMODS_ALL], residue: u8, params: &Parameters) {
    for j in 0..VMODS {
        if params.var_mods[j].applies_to(residue) {
            counts[j] -= 1;
        }
    }
}

fn total_var_mod_count(counts: &[i32; VMODS_ALL]) -> i32 {
    counts.iter().sum()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decoy_reversal_pivots_on_enzyme_offset() {
        let mut out = [0u8; 6];
        // C-side enzymes keep the last residue
        reverse_with_pivot(b"ABCDEK", 1, &mut out);
        assert_eq!(&out, b"EDCBAK");
        // N-side enzymes keep the first residue
        reverse_with_pivot(b"ABCDEK", 0, &mut out);
        assert_eq!(&out, b"AKEDCB");

        let mut single = [0u8; 1];
        reverse_with_pivot(b"K", 1, &mut single);
        assert_eq!(&single, b"K");
    }

    #[test]
    fn decoy_name_prefix_and_truncation() {
        assert_eq!(make_decoy_name("sp|P1|TEST"), "DECOY_sp|P1|TEST");
        let long = "x".repeat(WIDTH_REFERENCE);
        let decoy = make_decoy_name(&long);
        assert_eq!(decoy.len(), WIDTH_REFERENCE - 1);
        assert!(decoy.starts_with("DECOY_"));
    }
}
