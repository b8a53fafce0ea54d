use crate::config::{DecoySearch, Parameters};
use crate::ion::IonArena;
use crate::query::{Candidate, Query, XcorrData};

/// Cross-correlation score: the sum of the spectrum's preprocessed
/// intensities at every binned theoretical fragment, scaled by 0.005 and
/// clamped at zero.
pub fn xcorr(arena: &IonArena, decoy: bool, len: usize, query: &Query, params: &Parameters) -> f32 {
    let len_minus_1 = len.saturating_sub(1);
    let spectrum = &query.spectrum;
    let mut total = 0.0f64;

    for (series, kind) in params.ion_series.iter().enumerate() {
        let nl_series = params.use_nl_ions && kind.has_neutral_loss();
        for charge in 1..=spectrum.max_fragment_charge {
            let data = if nl_series && charge == 1 {
                spectrum.xcorr_data_nl.as_ref().unwrap_or(&spectrum.xcorr_data)
            } else {
                &spectrum.xcorr_data
            };

            match data {
                XcorrData::Dense(intensities) => {
                    for pos in 0..len_minus_1 {
                        let bin = arena.bin_at(decoy, charge, series, pos) as usize;
                        if bin == 0 {
                            continue;
                        }
                        total += intensities.get(bin).copied().unwrap_or(0.0) as f64;
                    }
                }
                XcorrData::Sparse(pairs) => {
                    // Bins are non-decreasing by position within one
                    // (series, charge) pass, so a forward cursor suffices;
                    // it resets for the next pass.
                    let mut cursor = 0usize;
                    for pos in 0..len_minus_1 {
                        let bin = arena.bin_at(decoy, charge, series, pos);
                        if bin == 0 {
                            continue;
                        }
                        while cursor < pairs.len() && pairs[cursor].bin <= bin {
                            cursor += 1;
                        }
                        total += pairs[cursor - 1].intensity as f64;
                    }
                }
            }
        }
    }

    if total <= 0.0 {
        0.0
    } else {
        (total * 0.005) as f32
    }
}

/// Record a scored candidate on its query: bump the matched count and the
/// score histogram, then store it if it beats the current floor and is not
/// a duplicate of an existing entry. This is the only section that takes
/// the query lock.
pub fn commit(query: &Query, cand: &Candidate, xcorr: f32, decoy: bool, params: &Parameters) {
    let separate = decoy && params.decoy_search == DecoySearch::Separate;
    let mut hits = query.hits();

    if separate {
        hits.matched_decoys += 1;
    } else {
        hits.matched_peptides += 1;
    }
    hits.bump_histogram(separate, xcorr);

    if xcorr > hits.lowest(separate) && !hits.check_duplicate(separate, cand, params.var_mod_search)
    {
        hits.store(
            separate,
            cand,
            xcorr,
            query.spectrum.charge,
            params.ion_series.len(),
            params.var_mod_search,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Builder;
    use crate::query::{SparseBin, Spectrum};

    fn query_with(data: XcorrData, nl: Option<XcorrData>) -> Query {
        Query::new(
            Spectrum {
                exp_mass: 800.0,
                tolerance: 3.0,
                tol_minus: 797.0,
                tol_plus: 803.0,
                charge: 2,
                max_fragment_charge: 1,
                array_size: 4096,
                xcorr_data: data,
                xcorr_data_nl: nl,
            },
            5,
        )
    }

    fn arena_for(p: &crate::config::Parameters, window: &[u8]) -> IonArena {
        let mut arena = IonArena::new(p.ion_series.len(), 1, 4096);
        arena.build_plain(
            false,
            window,
            p.nterm_proton,
            p.cterm_oh2_proton,
            &p.masses.fragment,
        );
        arena.bin_ions(false, window.len() - 1, p);
        arena
    }

    #[test]
    fn dense_and_sparse_agree() {
        let p = Builder {
            use_nl_ions: Some(false),
            ..Default::default()
        }
        .build()
        .unwrap();
        let arena = arena_for(&p, b"SAMPLER");

        let mut dense = vec![0.0f32; 4096];
        let mut pairs = Vec::new();
        for series in 0..p.ion_series.len() {
            for pos in 0..6 {
                let bin = arena.bin_at(false, 1, series, pos);
                if bin > 0 {
                    dense[bin as usize] = 50.0;
                    pairs.push(SparseBin {
                        bin,
                        intensity: 50.0,
                    });
                }
            }
        }

        let dq = query_with(XcorrData::Dense(dense), None);
        let sq = query_with(XcorrData::sparse(pairs), None);
        let d = xcorr(&arena, false, 7, &dq, &p);
        let s = xcorr(&arena, false, 7, &sq, &p);
        assert!(d > 0.0);
        assert!((d - s).abs() < 1e-6);
        // 12 fragment bins at 50.0, scaled by 0.005
        assert!((d - 3.0).abs() < 1e-6);
    }

    #[test]
    fn negative_scores_clamp_to_zero() {
        let p = Builder {
            use_nl_ions: Some(false),
            ..Default::default()
        }
        .build()
        .unwrap();
        let arena = arena_for(&p, b"SAMPLER");
        let dense = vec![-1.0f32; 4096];
        let q = query_with(XcorrData::Dense(dense), None);
        assert_eq!(xcorr(&arena, false, 7, &q, &p), 0.0);
    }

    #[test]
    fn neutral_loss_vector_replaces_main_at_charge_one() {
        let p = Builder::default().build().unwrap();
        assert!(p.use_nl_ions);
        let arena = arena_for(&p, b"SAMPLER");

        let dense = vec![1.0f32; 4096];
        let nl = vec![2.0f32; 4096];
        let with_nl = query_with(XcorrData::Dense(dense.clone()), Some(XcorrData::Dense(nl)));
        let without = query_with(XcorrData::Dense(dense), None);
        // b and y are both NL series; at charge 1 every lookup uses the NL
        // vector, doubling the score
        let a = xcorr(&arena, false, 7, &with_nl, &p);
        let b = xcorr(&arena, false, 7, &without, &p);
        assert!((a - 2.0 * b).abs() < 1e-6);
    }

    #[test]
    fn commit_respects_score_floor() {
        let p = Builder::default().build().unwrap();
        let q = query_with(XcorrData::Dense(vec![0.0; 4096]), None);
        let cand = Candidate {
            peptide: b"SAMPLER",
            prev: b'K',
            next: b'-',
            protein: "p1",
            pep_mass: 800.0,
            mod_sites: None,
        };
        commit(&q, &cand, 0.0, false, &p);
        {
            let hits = q.hits();
            assert_eq!(hits.matched_peptides, 1);
            // zero does not beat the zero floor
            assert!(!hits.results[0].occupied());
        }
        commit(&q, &cand, 1.25, false, &p);
        let hits = q.hits();
        assert_eq!(hits.matched_peptides, 2);
        assert_eq!(hits.results[0].peptide, b"SAMPLER");
        assert_eq!(hits.histogram[0] + hits.histogram[13], 2);
    }
}
