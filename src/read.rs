use std::fmt;
use std::sync::Arc;

use crate::barcodes::ReadPairOutcome;
use crate::primers::PrimerOutcome;

/// Offset between ASCII quality characters and PHRED scores.
pub const PHRED_OFFSET: u8 = 33;

pub static COMPLEMENT: [u8; 256] = {
    let mut comp = [0u8; 256];
    let mut v = 0;
    while v < 256 {
        comp[v] = v as u8;
        v += 1;
    }

    // IUPAC DNA alphabet
    let from = b"AGCTYRWSKMDVHBN";
    let to = b"TCGARYWSMKHBDVN";
    let mut i = 0;
    while i < from.len() {
        comp[from[i] as usize] = to[i]; // upper case
        comp[from[i] as usize + 32] = to[i] + 32; // lower case
        i += 1;
    }

    comp
};

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| COMPLEMENT[b as usize]).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    File(String),
    Bytes,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Origin::File(file) => write!(f, "\"{}\"", file),
            Origin::Bytes => write!(f, "bytes"),
        }
    }
}

/// One sequence with its name and optional quality string.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqRecord {
    name: Vec<u8>,
    seq: Vec<u8>,
    qual: Option<Vec<u8>>,
}

impl SeqRecord {
    pub fn new(name: Vec<u8>, seq: Vec<u8>) -> Self {
        Self {
            name,
            seq,
            qual: None,
        }
    }

    pub fn new_with_qual(name: Vec<u8>, seq: Vec<u8>, qual: Vec<u8>) -> Self {
        Self {
            name,
            seq,
            qual: Some(qual),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn qual(&self) -> Option<&[u8]> {
        self.qual.as_deref()
    }

    pub fn set_name(&mut self, name: Vec<u8>) {
        self.name = name;
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Reverse complement the sequence and reverse the qualities. The name is kept.
    pub fn revcomp(&mut self) {
        self.seq = revcomp(&self.seq);
        if let Some(qual) = &mut self.qual {
            qual.reverse();
        }
    }

    /// Remove `left` bases from the start and `right` bases from the end.
    pub fn trim(&mut self, left: usize, right: usize) {
        let len = self.seq.len();
        let start = left.min(len);
        let end = len.saturating_sub(right).max(start);

        self.seq.truncate(end);
        self.seq.drain(..start);

        if let Some(qual) = &mut self.qual {
            qual.truncate(end);
            qual.drain(..start);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.seq.truncate(len);
        if let Some(qual) = &mut self.qual {
            qual.truncate(len);
        }
    }

    pub fn has_n(&self) -> bool {
        memchr::memchr2(b'N', b'n', &self.seq).is_some()
    }
}

/// A single-end or paired-end read flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct Read {
    first: SeqRecord,
    second: Option<SeqRecord>,
    origin: Arc<Origin>,
    idx: usize,
    pub barcode_outcome: Option<ReadPairOutcome>,
    pub primer_outcome: Option<PrimerOutcome>,
    /// Slot number of the sample the read was attributed to.
    pub sample: Option<u32>,
}

impl Read {
    pub fn from_fastq1(
        name: &[u8],
        seq: &[u8],
        qual: Option<&[u8]>,
        origin: Arc<Origin>,
        idx: usize,
    ) -> Self {
        let first = match qual {
            Some(qual) => SeqRecord::new_with_qual(name.to_owned(), seq.to_owned(), qual.to_owned()),
            None => SeqRecord::new(name.to_owned(), seq.to_owned()),
        };

        Self {
            first,
            second: None,
            origin,
            idx,
            barcode_outcome: None,
            primer_outcome: None,
            sample: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_fastq2(
        name1: &[u8],
        seq1: &[u8],
        qual1: Option<&[u8]>,
        name2: &[u8],
        seq2: &[u8],
        qual2: Option<&[u8]>,
        origin: Arc<Origin>,
        idx: usize,
    ) -> Self {
        let mut read = Self::from_fastq1(name1, seq1, qual1, origin, idx);
        read.second = Some(match qual2 {
            Some(qual) => SeqRecord::new_with_qual(name2.to_owned(), seq2.to_owned(), qual.to_owned()),
            None => SeqRecord::new(name2.to_owned(), seq2.to_owned()),
        });
        read
    }

    /// Build a read from records that are already owned.
    pub fn from_records(first: SeqRecord, second: Option<SeqRecord>, idx: usize) -> Self {
        Self {
            first,
            second,
            origin: Arc::new(Origin::Bytes),
            idx,
            barcode_outcome: None,
            primer_outcome: None,
            sample: None,
        }
    }

    pub fn first(&self) -> &SeqRecord {
        &self.first
    }

    pub fn first_mut(&mut self) -> &mut SeqRecord {
        &mut self.first
    }

    pub fn second(&self) -> Option<&SeqRecord> {
        self.second.as_ref()
    }

    pub fn is_paired(&self) -> bool {
        self.second.is_some()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Index of the record in its source.
    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn name(&self) -> &[u8] {
        self.first.name()
    }

    pub fn seq(&self) -> &[u8] {
        self.first.seq()
    }

    pub fn qual(&self) -> Option<&[u8]> {
        self.first.qual()
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    pub fn has_n(&self) -> bool {
        self.first.has_n() || self.second.as_ref().map_or(false, |s| s.has_n())
    }
}

impl fmt::Display for SeqRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "  name: {}", String::from_utf8_lossy(&self.name))?;
        writeln!(f, "  seq:  {}", String::from_utf8_lossy(&self.seq))?;
        if let Some(qual) = &self.qual {
            writeln!(f, "  qual: {}", String::from_utf8_lossy(qual))?;
        }
        Ok(())
    }
}

impl fmt::Display for Read {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "seq1:\n{}", self.first)?;
        if let Some(second) = &self.second {
            writeln!(f, "seq2:\n{}", second)?;
        }
        writeln!(f, "from record {} in {}", self.idx, self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revcomp_keeps_name_and_reverses_qual() {
        let mut r = SeqRecord::new_with_qual(b"r1".to_vec(), b"AACGTN".to_vec(), b"ABCDEF".to_vec());
        r.revcomp();
        assert_eq!(r.seq(), b"NACGTT");
        assert_eq!(r.qual().unwrap(), b"FEDCBA");
        assert_eq!(r.name(), b"r1");
    }

    #[test]
    fn trim_both_ends() {
        let mut r = SeqRecord::new_with_qual(b"r".to_vec(), b"AAACCCGG".to_vec(), b"01234567".to_vec());
        r.trim(3, 2);
        assert_eq!(r.seq(), b"CCC");
        assert_eq!(r.qual().unwrap(), b"345");

        let mut short = SeqRecord::new(b"s".to_vec(), b"ACG".to_vec());
        short.trim(2, 2);
        assert!(short.is_empty());
    }

    #[test]
    fn lower_case_n_counts() {
        assert!(SeqRecord::new(b"x".to_vec(), b"ACnT".to_vec()).has_n());
        assert!(!SeqRecord::new(b"x".to_vec(), b"ACGT".to_vec()).has_n());
    }
}
