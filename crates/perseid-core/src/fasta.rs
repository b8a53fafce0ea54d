use std::io::BufRead;

use crate::config::WIDTH_REFERENCE;
use crate::Error;

/// One database entry, parsed and normalized: the name is the header up to
/// the first whitespace, residues are the printable bytes uppercased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protein {
    pub name: String,
    pub residues: Vec<u8>,
}

/// Lazy reader over a FASTA-like stream. Each call to `next` parses one
/// entry; parsing stops permanently at the first error.
pub struct FastaReader<R> {
    inner: R,
    pending: Option<u8>,
    failed: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(inner: R) -> Self {
        FastaReader {
            inner,
            pending: None,
            failed: false,
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, std::io::Error> {
        let buf = self.inner.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        let b = buf[0];
        self.inner.consume(1);
        Ok(Some(b))
    }

    fn read_record(&mut self) -> Result<Option<Protein>, Error> {
        let first = match self.pending.take() {
            Some(b) => b,
            None => match self.next_byte()? {
                Some(b) => b,
                None => return Ok(None),
            },
        };

        if first != b'>' {
            // Recover the offending line for the diagnostic.
            let mut line = vec![first];
            while let Some(b) = self.next_byte()? {
                if b == b'\n' || line.len() > 120 {
                    break;
                }
                line.push(b);
            }
            return Err(Error::ParseDatabase(format!(
                "expected '>' definition line, found: {}",
                String::from_utf8_lossy(&line)
            )));
        }

        // Header runs to end of line; keep text up to the first blank, and
        // at most WIDTH_REFERENCE - 1 bytes.
        let mut name = Vec::new();
        let mut trimmed = false;
        while let Some(b) = self.next_byte()? {
            if b == b'\n' || b == b'\r' {
                break;
            }
            if b.is_ascii_whitespace() || b.is_ascii_control() {
                trimmed = true;
            }
            if !trimmed && name.len() < WIDTH_REFERENCE - 1 {
                name.push(b);
            }
        }

        // Residues run to the next '>' or EOF; keep the printable range,
        // uppercased.
        let mut residues = Vec::new();
        while let Some(b) = self.next_byte()? {
            if b == b'>' {
                self.pending = Some(b);
                break;
            }
            if (33..=126).contains(&b) {
                residues.push(b.to_ascii_uppercase());
            }
        }

        Ok(Some(Protein {
            name: String::from_utf8_lossy(&name).into_owned(),
            residues,
        }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<Protein, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(Some(p)) => Some(Ok(p)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn read_all(s: &str) -> Vec<Protein> {
        FastaReader::new(Cursor::new(s))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn two_entries() {
        let proteins = read_all(">sp|P1|TEST first test protein\nmsam\npler\n>p2\nAAAK\n");
        assert_eq!(proteins.len(), 2);
        assert_eq!(proteins[0].name, "sp|P1|TEST");
        assert_eq!(proteins[0].residues, b"MSAMPLER");
        assert_eq!(proteins[1].name, "p2");
        assert_eq!(proteins[1].residues, b"AAAK");
    }

    #[test]
    fn skips_non_printable_bytes() {
        let proteins = read_all(">p\nMSA MP\tLE\r\nR\n");
        assert_eq!(proteins[0].residues, b"MSAMPLER");
    }

    #[test]
    fn truncates_long_headers() {
        let long = "x".repeat(WIDTH_REFERENCE + 40);
        let proteins = read_all(&format!(">{}\nAAK\n", long));
        assert_eq!(proteins[0].name.len(), WIDTH_REFERENCE - 1);
    }

    #[test]
    fn missing_definition_line_is_fatal() {
        let mut reader = FastaReader::new(Cursor::new("MSAMPLER\n"));
        assert!(matches!(reader.next(), Some(Err(Error::ParseDatabase(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn empty_stream() {
        assert!(read_all("").is_empty());
    }
}
