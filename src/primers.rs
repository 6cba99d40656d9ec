use regex::bytes::Regex;
use rustc_hash::FxHashMap;

use std::fmt;

use crate::errors::*;
use crate::manifest::PrimerPair;
use crate::read::revcomp;

/// Bases matched by each IUPAC code.
fn iupac(code: u8) -> Option<&'static str> {
    Some(match code.to_ascii_uppercase() {
        b'A' => "A",
        b'C' => "C",
        b'G' => "G",
        b'T' => "T",
        b'M' => "AC",
        b'R' => "AG",
        b'W' => "AT",
        b'S' => "CG",
        b'Y' => "CT",
        b'K' => "GT",
        b'V' => "ACG",
        b'H' => "ACT",
        b'D' => "AGT",
        b'B' => "CGT",
        b'X' | b'N' => "ACGT",
        _ => return None,
    })
}

fn primer_regex(primer: &[u8]) -> Result<Regex> {
    let mut pattern = String::with_capacity(primer.len() * 6);
    for &c in primer {
        let class = iupac(c).ok_or_else(|| {
            Error::config(format!(
                "primer {} contains the non-IUPAC character '{}'",
                String::from_utf8_lossy(primer),
                c as char
            ))
        })?;
        pattern.push('[');
        pattern.push_str(class);
        pattern.push(']');
    }
    Regex::new(&pattern).map_err(|e| Error::config(format!("cannot compile primer regex: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum PrimerOutcome {
    Good,
    Wrong,
    OnlyFwd,
    OnlyRev,
    NoPrimers,
}

impl PrimerOutcome {
    pub const ALL: [PrimerOutcome; 5] = [
        PrimerOutcome::Good,
        PrimerOutcome::Wrong,
        PrimerOutcome::OnlyFwd,
        PrimerOutcome::OnlyRev,
        PrimerOutcome::NoPrimers,
    ];

    pub fn short_name(&self) -> &'static str {
        use PrimerOutcome::*;
        match self {
            Good => "good_primers",
            Wrong => "wrong_primers",
            OnlyFwd => "only_fwd_primers",
            OnlyRev => "only_rev_primers",
            NoPrimers => "no_primers",
        }
    }

    /// Classify from the primer offsets of one sequence.
    ///
    /// `rev_pos` is measured from the end of the sequence, so a reverse primer
    /// that ends right before a trailing tag of length `tag_len` sits at `-tag_len`.
    pub fn from_positions(fwd_pos: Option<usize>, rev_pos: Option<isize>, tag_len: usize) -> Self {
        match (fwd_pos, rev_pos) {
            (Some(f), Some(r)) if f == tag_len && r == -(tag_len as isize) => PrimerOutcome::Good,
            (Some(_), Some(_)) => PrimerOutcome::Wrong,
            (Some(_), None) => PrimerOutcome::OnlyFwd,
            (None, Some(_)) => PrimerOutcome::OnlyRev,
            (None, None) => PrimerOutcome::NoPrimers,
        }
    }
}

impl fmt::Display for PrimerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Compiled forward primer and reverse-complemented reverse primer of a pool.
#[derive(Debug, Clone)]
pub struct PrimerMatcher {
    fwd_regex: Regex,
    rev_regex: Regex,
    tag_len: usize,
}

impl PrimerMatcher {
    pub fn new(primers: &PrimerPair, tag_len: usize) -> Result<Self> {
        Ok(Self {
            fwd_regex: primer_regex(primers.forward.sequence.as_bytes())?,
            rev_regex: primer_regex(&revcomp(primers.reverse.sequence.as_bytes()))?,
            tag_len,
        })
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    /// Offset of the first forward primer occurrence.
    pub fn fwd_pos(&self, seq: &[u8]) -> Option<usize> {
        self.fwd_regex.find(seq).map(|m| m.start())
    }

    /// End of the first reverse primer occurrence, relative to the sequence end.
    pub fn rev_pos(&self, seq: &[u8]) -> Option<isize> {
        self.rev_regex
            .find(seq)
            .map(|m| m.end() as isize - seq.len() as isize)
    }

    /// Primer offsets of one sequence and the outcome they give.
    pub fn locate(&self, seq: &[u8]) -> PrimerHit {
        let fwd_pos = self.fwd_pos(seq);
        let rev_pos = self.rev_pos(seq);
        PrimerHit {
            fwd_pos,
            rev_pos,
            outcome: PrimerOutcome::from_positions(fwd_pos, rev_pos, self.tag_len),
        }
    }

    pub fn classify(&self, seq: &[u8]) -> PrimerOutcome {
        self.locate(seq).outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimerHit {
    pub fwd_pos: Option<usize>,
    pub rev_pos: Option<isize>,
    pub outcome: PrimerOutcome,
}

/// Histogram of where the primers were found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimerPositions {
    pub fwd: FxHashMap<usize, usize>,
    pub rev: FxHashMap<isize, usize>,
}

impl PrimerPositions {
    pub fn record(&mut self, fwd_pos: Option<usize>, rev_pos: Option<isize>) {
        if let Some(f) = fwd_pos {
            *self.fwd.entry(f).or_default() += 1;
        }
        if let Some(r) = rev_pos {
            *self.rev.entry(r).or_default() += 1;
        }
    }

    pub fn merge(&mut self, other: &PrimerPositions) {
        for (k, v) in &other.fwd {
            *self.fwd.entry(*k).or_default() += v;
        }
        for (k, v) in &other.rev {
            *self.rev.entry(*k).or_default() += v;
        }
    }
}
