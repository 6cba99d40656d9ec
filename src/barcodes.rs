use rustc_hash::FxHashMap;

use std::fmt;

use crate::errors::*;
use crate::manifest::*;
use crate::read::revcomp;

/// Which of the two tag sets a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarcodeSet {
    Fwd,
    Rev,
}

/// Result of looking up a candidate tag. Falsy when nothing matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarcodeMatch<'a> {
    pub set: Option<BarcodeSet>,
    pub sample: Option<&'a Sample>,
}

impl<'a> BarcodeMatch<'a> {
    pub const NONE: Self = Self {
        set: None,
        sample: None,
    };

    pub fn is_match(&self) -> bool {
        self.set.is_some()
    }
}

impl fmt::Display for BarcodeMatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.sample, self.set) {
            (Some(s), Some(BarcodeSet::Fwd)) => write!(f, "{}F", s.num),
            (Some(s), Some(BarcodeSet::Rev)) => write!(f, "{}R", s.num),
            _ => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ReadPairOutcome {
    Good,
    Bad,
    Same,
    One,
    NoMatch,
}

impl ReadPairOutcome {
    pub const ALL: [ReadPairOutcome; 5] = [
        ReadPairOutcome::Good,
        ReadPairOutcome::Bad,
        ReadPairOutcome::Same,
        ReadPairOutcome::One,
        ReadPairOutcome::NoMatch,
    ];

    pub fn short_name(&self) -> &'static str {
        use ReadPairOutcome::*;
        match self {
            Good => "good_barcodes",
            Bad => "bad_barcodes",
            Same => "same_barcodes",
            One => "one_barcodes",
            NoMatch => "no_barcodes",
        }
    }

    pub fn doc(&self) -> &'static str {
        use ReadPairOutcome::*;
        match self {
            Good => "Success: barcodes match",
            Bad => "The two barcodes mismatch",
            Same => "Both barcodes in same set",
            One => "Only one barcode found",
            NoMatch => "No barcodes found at all",
        }
    }

    /// Apply the decision table to the matches of the two ends of a pair.
    pub fn decide(m1: &BarcodeMatch, m2: &BarcodeMatch) -> Self {
        match (m1.is_match(), m2.is_match()) {
            (false, false) => ReadPairOutcome::NoMatch,
            (true, false) | (false, true) => ReadPairOutcome::One,
            (true, true) if m1.set == m2.set => ReadPairOutcome::Same,
            (true, true) => {
                let same_sample = match (m1.sample, m2.sample) {
                    (Some(a), Some(b)) => a.num == b.num,
                    _ => false,
                };
                if same_sample {
                    ReadPairOutcome::Good
                } else {
                    ReadPairOutcome::Bad
                }
            }
        }
    }
}

impl fmt::Display for ReadPairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Samples of one pool with tag lookup tables for both orientations.
#[derive(Debug, Clone)]
pub struct BarcodeIndex {
    samples: Vec<Sample>,
    tag_len: usize,
    fwd: FxHashMap<Vec<u8>, usize>,
    rev: FxHashMap<Vec<u8>, usize>,
}

impl BarcodeIndex {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let tag_len = manifest.tag_len()?;
        let samples = manifest.samples.clone();
        let mut fwd = FxHashMap::default();
        let mut rev = FxHashMap::default();

        if tag_len > 0 {
            let mut seen: FxHashMap<&str, &str> = FxHashMap::default();
            for s in samples.iter().filter(|s| s.used) {
                for tag in [s.fwd.as_str(), s.rev.as_str()] {
                    if let Some(other) = seen.insert(tag, s.name.as_str()) {
                        return Err(Error::config(format!(
                            "tag {} is shared by samples \"{}\" and \"{}\"",
                            tag, other, s.name
                        )));
                    }
                }
            }

            // unused samples never shadow a tag owned by a used sample
            for (i, s) in samples.iter().enumerate() {
                if !s.used && (seen.contains_key(s.fwd.as_str()) || seen.contains_key(s.rev.as_str())) {
                    log::warn!("unused sample \"{}\" repeats a tag of a used sample, ignored", s.name);
                    continue;
                }
                fwd.entry(s.fwd.as_bytes().to_vec()).or_insert(i);
                rev.entry(s.rev.as_bytes().to_vec()).or_insert(i);
            }
        }

        Ok(Self {
            samples,
            tag_len,
            fwd,
            rev,
        })
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample(&self, num: u32) -> Option<&Sample> {
        self.samples.iter().find(|s| s.num == num)
    }

    /// Look up a tag. A value present in both sets resolves to the reverse set.
    pub fn lookup(&self, tag: &[u8]) -> BarcodeMatch {
        if self.tag_len == 0 || tag.len() != self.tag_len {
            return BarcodeMatch::NONE;
        }

        if let Some(&i) = self.rev.get(tag) {
            BarcodeMatch {
                set: Some(BarcodeSet::Rev),
                sample: Some(&self.samples[i]),
            }
        } else if let Some(&i) = self.fwd.get(tag) {
            BarcodeMatch {
                set: Some(BarcodeSet::Fwd),
                sample: Some(&self.samples[i]),
            }
        } else {
            BarcodeMatch::NONE
        }
    }

    /// Match the leading tag of a sequence.
    pub fn leading(&self, seq: &[u8]) -> BarcodeMatch {
        if seq.len() < self.tag_len {
            return BarcodeMatch::NONE;
        }
        self.lookup(&seq[..self.tag_len])
    }

    /// Match the tag at the end of a sequence, read on the opposite strand.
    pub fn trailing(&self, seq: &[u8]) -> BarcodeMatch {
        if seq.len() < self.tag_len {
            return BarcodeMatch::NONE;
        }
        self.lookup(&revcomp(&seq[seq.len() - self.tag_len..]))
    }

    /// Classify a raw read pair by the tags at the start of each end.
    pub fn classify_pair(&self, fwd_seq: &[u8], rev_seq: &[u8]) -> ReadPairOutcome {
        ReadPairOutcome::decide(&self.leading(fwd_seq), &self.leading(rev_seq))
    }

    /// Whether a merged or single sequence sits on the reverse strand.
    pub fn needs_flip(&self, seq: &[u8]) -> bool {
        let first = self.leading(seq);
        let last = self.trailing(seq);
        first.set == Some(BarcodeSet::Rev) || last.set == Some(BarcodeSet::Fwd)
    }
}

/// Per-outcome tallies of which samples the tags pointed to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarcodeStats {
    pub outcomes: FxHashMap<ReadPairOutcome, usize>,
    /// Tag hits per `(outcome, sample slot)`.
    pub samples: FxHashMap<(ReadPairOutcome, u32), usize>,
    /// Unordered sample pairs seen together in a same-set or mismatched pair.
    pub pairs: FxHashMap<(ReadPairOutcome, u32, u32), usize>,
}

impl BarcodeStats {
    pub fn record(&mut self, outcome: ReadPairOutcome, m1: &BarcodeMatch, m2: &BarcodeMatch) {
        *self.outcomes.entry(outcome).or_default() += 1;

        for s in [m1.sample, m2.sample].into_iter().flatten() {
            *self.samples.entry((outcome, s.num)).or_default() += 1;
        }

        if matches!(outcome, ReadPairOutcome::Same | ReadPairOutcome::Bad) {
            if let (Some(a), Some(b)) = (m1.sample, m2.sample) {
                let (lo, hi) = (a.num.min(b.num), a.num.max(b.num));
                *self.pairs.entry((outcome, lo, hi)).or_default() += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &BarcodeStats) {
        for (k, v) in &other.outcomes {
            *self.outcomes.entry(*k).or_default() += v;
        }
        for (k, v) in &other.samples {
            *self.samples.entry(*k).or_default() += v;
        }
        for (k, v) in &other.pairs {
            *self.pairs.entry(*k).or_default() += v;
        }
    }

    pub fn count(&self, outcome: ReadPairOutcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }
}
