use serde::{Deserialize, Serialize};

use crate::Error;

/// A proteolytic enzyme: cleavage side, residues it cuts at, and residues
/// that suppress the cut when found on the other side of the bond.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Enzyme {
    pub name: &'static str,
    /// 0 cuts on the N-terminal side of a matching residue, 1 on the
    /// C-terminal side.
    pub offset: u8,
    pub break_aa: &'static str,
    pub no_break_aa: &'static str,
}

/// The built-in digestion table; entries are addressed by number on the
/// configuration surface.
pub static ENZYMES: [Enzyme; 11] = [
    Enzyme { name: "No_enzyme", offset: 0, break_aa: "-", no_break_aa: "-" },
    Enzyme { name: "Trypsin", offset: 1, break_aa: "KR", no_break_aa: "P" },
    Enzyme { name: "Trypsin/P", offset: 1, break_aa: "KR", no_break_aa: "-" },
    Enzyme { name: "Lys_C", offset: 1, break_aa: "K", no_break_aa: "P" },
    Enzyme { name: "Lys_N", offset: 0, break_aa: "K", no_break_aa: "-" },
    Enzyme { name: "Arg_C", offset: 1, break_aa: "R", no_break_aa: "P" },
    Enzyme { name: "Asp_N", offset: 0, break_aa: "D", no_break_aa: "-" },
    Enzyme { name: "CNBr", offset: 1, break_aa: "M", no_break_aa: "-" },
    Enzyme { name: "Glu_C", offset: 1, break_aa: "DE", no_break_aa: "P" },
    Enzyme { name: "PepsinA", offset: 1, break_aa: "FL", no_break_aa: "P" },
    Enzyme { name: "Chymotrypsin", offset: 1, break_aa: "FWYL", no_break_aa: "P" },
];

pub fn by_number(n: usize) -> Result<&'static Enzyme, Error> {
    ENZYMES
        .get(n)
        .ok_or_else(|| Error::Config(format!("unknown enzyme number {}", n)))
}

/// Which peptide termini must be compatible with the enzyme.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnzymeTermini {
    Both,
    Either,
    NTermOnly,
    CTermOnly,
}

impl EnzymeTermini {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => EnzymeTermini::Either,
            8 => EnzymeTermini::NTermOnly,
            9 => EnzymeTermini::CTermOnly,
            _ => EnzymeTermini::Both,
        }
    }
}

// Residue-set membership with the sequence-edge convention: the position
// one past the last residue matches every set, positions further out match
// none.
fn set_contains(set: &str, seq: &[u8], i: i64) -> bool {
    if i < 0 {
        return false;
    }
    let i = i as usize;
    if i < seq.len() {
        set.as_bytes().contains(&seq[i])
    } else {
        i == seq.len()
    }
}

impl Enzyme {
    /// Both residue sets are `-`: every bond is a cleavage site.
    pub fn unspecific(&self) -> bool {
        self.break_aa == "-" && self.no_break_aa == "-"
    }

    /// Is the bond following position `i` a cleavage site?
    fn cut_site(&self, seq: &[u8], i: i64) -> bool {
        let shift = 1 - self.offset as i64;
        set_contains(self.break_aa, seq, i + shift)
            && !set_contains(self.no_break_aa, seq, i + shift + 1)
    }

    /// Enzyme compatibility of a window `[start, end]` within `seq`:
    /// termini per the configured mode, and at most `allowed_missed`
    /// internal uncut sites. Protein boundaries and the `*` separator
    /// always count as cleavage points.
    pub fn allows(
        &self,
        seq: &[u8],
        start: usize,
        end: usize,
        termini: EnzymeTermini,
        allowed_missed: i32,
    ) -> bool {
        let begin_cleavage =
            start == 0 || seq[start - 1] == b'*' || self.cut_site(seq, start as i64 - 1);
        let end_cleavage =
            end == seq.len() - 1 || seq[end + 1] == b'*' || self.cut_site(seq, end as i64);

        match termini {
            EnzymeTermini::Both if !(begin_cleavage && end_cleavage) => return false,
            EnzymeTermini::Either if !(begin_cleavage || end_cleavage) => return false,
            EnzymeTermini::NTermOnly if !begin_cleavage => return false,
            EnzymeTermini::CTermOnly if !end_cleavage => return false,
            _ => {}
        }

        // Count internal missed cleavages, skipping the terminal residue the
        // enzyme matches on. N-side enzymes see the window's own end
        // cleavage in this loop, which the offset correction cancels.
        let shift = 1 - self.offset as i32;
        let mut internal = 0;
        for i in start..=end {
            if !self.cut_site(seq, i as i64) {
                continue;
            }
            if (shift == 0 && i != end) || (shift == 1 && i != start) {
                internal += 1;
                if internal - shift > allowed_missed {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn trypsin() -> &'static Enzyme {
        by_number(1).unwrap()
    }

    #[test]
    fn table_lookup() {
        assert_eq!(trypsin().name, "Trypsin");
        assert_eq!(by_number(4).unwrap().offset, 0);
        assert!(by_number(11).is_err());
        assert!(by_number(0).unwrap().unspecific());
    }

    #[test]
    fn tryptic_termini() {
        let seq = b"MKSAMPLERAK";
        // SAMPLER: preceded by K, ends in R not followed by P
        assert!(trypsin().allows(seq, 2, 8, EnzymeTermini::Both, 0));
        // AMPLER: preceded by S, not a cleavage site
        assert!(!trypsin().allows(seq, 3, 8, EnzymeTermini::Both, 0));
        assert!(trypsin().allows(seq, 3, 8, EnzymeTermini::CTermOnly, 0));
        // the full sequence spans the K1 and R8 sites
        assert!(!trypsin().allows(seq, 0, 10, EnzymeTermini::Both, 1));
        assert!(trypsin().allows(seq, 0, 10, EnzymeTermini::Both, 2));
    }

    #[test]
    fn proline_suppression() {
        let seq = b"AKPAAK";
        // K followed by P is not a cleavage site for trypsin
        assert!(!trypsin().allows(seq, 2, 5, EnzymeTermini::Both, 0));
        assert!(by_number(2).unwrap().allows(seq, 2, 5, EnzymeTermini::Both, 0));
    }

    #[test]
    fn missed_cleavage_cap() {
        let seq = b"AKAKAKAR";
        assert!(!trypsin().allows(seq, 0, 7, EnzymeTermini::Both, 1));
        assert!(!trypsin().allows(seq, 0, 7, EnzymeTermini::Both, 2));
        assert!(trypsin().allows(seq, 0, 7, EnzymeTermini::Both, 3));
    }

    #[test]
    fn n_side_enzyme() {
        let lys_n = by_number(4).unwrap();
        let seq = b"AAKAAKAA";
        // KAA at the protein end: begins at a K, ends at the protein
        assert!(lys_n.allows(seq, 5, 7, EnzymeTermini::Both, 0));
        // KAA mid-protein: the trailing cut belongs to the next peptide
        assert!(lys_n.allows(seq, 2, 4, EnzymeTermini::Both, 0));
        // spanning the internal K
        assert!(!lys_n.allows(seq, 2, 7, EnzymeTermini::Both, 0));
        assert!(lys_n.allows(seq, 2, 7, EnzymeTermini::Both, 1));
    }

    #[test]
    fn hard_separator() {
        let seq = b"AAA*SAMPLER";
        assert!(trypsin().allows(seq, 4, 10, EnzymeTermini::Both, 0));
    }
}
