//! Quality control of assembled sequences.
//!
//! The chain always runs in the same order: undetermined-base filter,
//! sliding-window PHRED filter, length filter, then tag and primer trim.

use serde::Deserialize;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::barcodes::BarcodeIndex;
use crate::errors::*;
use crate::iter::*;
use crate::manifest::Manifest;
use crate::read::*;
use crate::read_id::ReadIdentifier;
use crate::report::StageCount;

/// What to do with a read once a window falls below the threshold.
///
/// Written as `reject` or `{ truncate: { min_len: 300 } }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "PolicyRepr")]
pub enum WindowPolicy {
    Reject,
    /// Keep the prefix before the failing window if it is at least `min_len` long.
    Truncate { min_len: usize },
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum PolicyName {
    Reject,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TruncateArgs {
    min_len: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyRepr {
    Name(PolicyName),
    Truncate { truncate: TruncateArgs },
}

impl From<PolicyRepr> for WindowPolicy {
    fn from(repr: PolicyRepr) -> Self {
        match repr {
            PolicyRepr::Name(PolicyName::Reject) => WindowPolicy::Reject,
            PolicyRepr::Truncate { truncate } => WindowPolicy::Truncate {
                min_len: truncate.min_len,
            },
        }
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityWindow {
    #[serde(default = "default_window")]
    pub window: usize,
    /// Minimum mean PHRED score of a window.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default)]
    pub policy: WindowPolicy,
}

fn default_window() -> usize {
    10
}

fn default_threshold() -> u32 {
    5
}

impl Default for QualityWindow {
    fn default() -> Self {
        Self {
            window: default_window(),
            threshold: default_threshold(),
            policy: WindowPolicy::default(),
        }
    }
}

impl QualityWindow {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::config("quality window must be at least one base"));
        }
        Ok(())
    }

    /// Start of the first window whose mean score is below the threshold.
    ///
    /// A read shorter than the window is scored as one window over the whole read.
    pub fn first_failure(&self, qual: &[u8]) -> Option<usize> {
        if qual.is_empty() {
            return None;
        }

        let w = self.window.min(qual.len());
        let min_sum = self.threshold as usize * w;
        let score = |q: u8| q.saturating_sub(PHRED_OFFSET) as usize;

        let mut sum = qual[..w].iter().map(|&q| score(q)).sum::<usize>();
        if sum < min_sum {
            return Some(0);
        }

        for i in w..qual.len() {
            sum = sum + score(qual[i]) - score(qual[i - w]);
            if sum < min_sum {
                return Some(i + 1 - w);
            }
        }

        None
    }

    /// Filter one record in place. Returns whether the record is kept.
    pub fn apply(&self, record: &mut SeqRecord) -> bool {
        let Some(qual) = record.qual() else {
            return true;
        };

        match (self.first_failure(qual), self.policy) {
            (None, _) => true,
            (Some(_), WindowPolicy::Reject) => false,
            (Some(cut), WindowPolicy::Truncate { min_len }) => {
                if cut >= min_len && cut > 0 {
                    record.truncate(cut);
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Minimum length of a sequence after quality filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MinLength {
    Fixed {
        min_len: usize,
    },
    /// For merged pairs: both read lengths minus the largest overlap allowed.
    FromOverlap {
        read_len_1: usize,
        read_len_2: usize,
        max_overlap: usize,
    },
}

impl Default for MinLength {
    fn default() -> Self {
        MinLength::FromOverlap {
            read_len_1: 250,
            read_len_2: 250,
            max_overlap: 100,
        }
    }
}

impl MinLength {
    pub fn value(&self) -> usize {
        match *self {
            MinLength::Fixed { min_len } => min_len,
            MinLength::FromOverlap {
                read_len_1,
                read_len_2,
                max_overlap,
            } => (read_len_1 + read_len_2).saturating_sub(max_overlap),
        }
    }
}

/// Bases removed from each end of a good-primer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimSpec {
    pub fwd: usize,
    pub rev: usize,
}

impl TrimSpec {
    /// Tag plus primer on each side. Without tags nothing is trimmed.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let tag_len = manifest.tag_len()?;
        if tag_len == 0 {
            return Ok(Self::default());
        }

        Ok(Self {
            fwd: tag_len + manifest.primers.fwd_len(),
            rev: tag_len + manifest.primers.rev_len(),
        })
    }

    pub fn apply(&self, record: &mut SeqRecord) {
        record.trim(self.fwd, self.rev);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterStage {
    NFilter,
    WindowQuality,
    Length,
    Trim,
}

impl FilterStage {
    pub const ALL: [FilterStage; 4] = [
        FilterStage::NFilter,
        FilterStage::WindowQuality,
        FilterStage::Length,
        FilterStage::Trim,
    ];

    pub fn name(&self) -> &'static str {
        use FilterStage::*;
        match self {
            NFilter => "n_filter",
            WindowQuality => "window_quality",
            Length => "length",
            Trim => "trim",
        }
    }
}

/// The fixed filter chain applied to good-primer sequences.
#[derive(Debug, Clone)]
pub struct QualityFilterChain {
    window: QualityWindow,
    min_len: MinLength,
    trim: TrimSpec,
    threads: usize,
    chunk_size: usize,
}

impl QualityFilterChain {
    pub fn new(window: QualityWindow, min_len: MinLength, trim: TrimSpec) -> Self {
        Self {
            window,
            min_len,
            trim,
            threads: 1,
            chunk_size: 256,
        }
    }

    /// Run the chain on several threads. Output is put back in input order.
    pub fn with_threads(mut self, threads: usize, chunk_size: usize) -> Self {
        self.threads = threads.max(1);
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn trim_spec(&self) -> TrimSpec {
        self.trim
    }

    /// Filter and trim `reads`. The sample of each read is resolved from its
    /// leading tag before the tag is trimmed when `index` is given.
    pub fn run(
        &self,
        reads: Vec<Read>,
        index: Option<Arc<BarcodeIndex>>,
    ) -> Result<(TrimmedCorpus, Vec<StageCount>)> {
        let input = reads.len();
        let counts: Arc<[AtomicUsize; 4]> = Arc::new(Default::default());
        let counter = |i: usize| {
            let counts = Arc::clone(&counts);
            move |n: usize| counts[i].store(n, Ordering::Relaxed)
        };
        let min_len = self.min_len.value();

        let chain = iter_reads(reads, self.chunk_size)
            .retain_no_n()
            .count(counter(0))
            .window_quality(self.window)
            .count(counter(1))
            .retain(move |r| r.len() >= min_len)
            .count(counter(2))
            .trim(self.trim, index)
            .count(counter(3));

        let kept = if self.threads > 1 {
            let out = Arc::new(Mutex::new(Vec::with_capacity(input)));
            let sink = Arc::clone(&out);
            chain
                .for_each(move |r| sink.lock().unwrap_or_else(|p| p.into_inner()).push(r.clone()))
                .run_with_threads(self.threads)?;
            let mut kept = std::mem::take(&mut *out.lock().unwrap_or_else(|p| p.into_inner()));
            kept.sort_by_key(|r| r.idx());
            kept
        } else {
            chain.run_collect_reads()?
        };

        let mut stages = Vec::with_capacity(FilterStage::ALL.len());
        let mut prev = input;
        for (i, stage) in FilterStage::ALL.iter().enumerate() {
            let output = counts[i].load(Ordering::Relaxed);
            stages.push(StageCount::new(stage.name(), prev, output));
            prev = output;
        }

        log::debug!(
            "quality chain kept {} of {} sequences",
            kept.len(),
            input
        );

        Ok((
            TrimmedCorpus {
                reads: kept,
                trim: self.trim,
            },
            stages,
        ))
    }
}

/// Sequences that went through the trim stage exactly once.
///
/// Only [`QualityFilterChain::run`] builds this type and it offers no way to
/// trim again.
#[derive(Debug, Clone)]
pub struct TrimmedCorpus {
    reads: Vec<Read>,
    trim: TrimSpec,
}

impl TrimmedCorpus {
    pub fn reads(&self) -> &[Read] {
        &self.reads
    }

    pub fn into_reads(self) -> Vec<Read> {
        self.reads
    }

    pub fn trim_spec(&self) -> TrimSpec {
        self.trim
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Rename every read to its encoded identifier and drop reads of unused
    /// or unresolved samples. Ordinals count from 1 within each sample.
    pub fn demultiplex(self, manifest: &Manifest) -> Result<(Vec<Read>, StageCount)> {
        let input = self.reads.len();
        let single = match (manifest.tag_len()?, manifest.samples.as_slice()) {
            (0, [only]) => Some(only.num),
            _ => None,
        };
        let mut ordinals = rustc_hash::FxHashMap::<u32, usize>::default();
        let mut out = Vec::with_capacity(input);

        for mut read in self.reads {
            let Some(num) = read.sample.or(single) else {
                continue;
            };
            if !manifest.sample(num).map_or(false, |s| s.used) {
                continue;
            }

            let ordinal = ordinals.entry(num).or_default();
            *ordinal += 1;

            let id = ReadIdentifier {
                run: manifest.run,
                pool: manifest.pool,
                sample: num,
                read: *ordinal,
            };
            read.sample = Some(num);
            read.first_mut().set_name(id.to_string().into_bytes());
            out.push(read);
        }

        let count = StageCount::new("used_samples", input, out.len());
        Ok((out, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn window(policy: WindowPolicy) -> QualityWindow {
        QualityWindow {
            window: 4,
            threshold: 22,
            policy,
        }
    }

    #[test]
    fn sliding_window_finds_first_dip() {
        let w = window(WindowPolicy::Reject);
        // 'I' = 40, '#' = 2; the window over "II##" averages 21
        assert_eq!(w.first_failure(b"IIIIIIII"), None);
        assert_eq!(w.first_failure(b"IIIIII##"), Some(4));
        assert_eq!(w.first_failure(b"IIIII###"), Some(3));
        assert_eq!(w.first_failure(b"##IIIIII"), Some(0));
        // shorter than the window: one window over the whole read
        assert_eq!(w.first_failure(b"II"), None);
        assert_eq!(w.first_failure(b"#"), Some(0));
    }

    #[test]
    fn reject_and_truncate() {
        let mut r = SeqRecord::new_with_qual(b"r".to_vec(), b"ACGTACGT".to_vec(), b"IIIIII##".to_vec());
        assert!(!window(WindowPolicy::Reject).apply(&mut r.clone()));

        assert!(window(WindowPolicy::Truncate { min_len: 3 }).apply(&mut r));
        assert_eq!(r.seq(), b"ACGT");
        assert_eq!(r.qual().unwrap(), b"IIII");

        let mut r = SeqRecord::new_with_qual(b"r".to_vec(), b"ACGTACGT".to_vec(), b"IIIIII##".to_vec());
        assert!(!window(WindowPolicy::Truncate { min_len: 5 }).apply(&mut r));

        let mut fasta = SeqRecord::new(b"r".to_vec(), b"ACGT".to_vec());
        assert!(window(WindowPolicy::Reject).apply(&mut fasta));
    }

    #[test]
    fn threshold_is_inclusive() {
        let w = QualityWindow {
            threshold: 21,
            ..window(WindowPolicy::Reject)
        };
        assert_eq!(w.first_failure(b"IIIIII##"), None);
        assert_eq!(w.first_failure(b"IIIII###"), Some(4));
    }

    #[test]
    fn policy_forms() {
        let parse = |yaml: &str| serde_yaml::from_str::<QualityWindow>(yaml).unwrap().policy;
        assert_eq!(parse("{policy: reject}"), WindowPolicy::Reject);
        assert_eq!(
            parse("{policy: {truncate: {min_len: 300}}}"),
            WindowPolicy::Truncate { min_len: 300 }
        );
        assert_eq!(parse("{}"), WindowPolicy::Reject);
        assert!(serde_yaml::from_str::<QualityWindow>("{policy: keep}").is_err());
    }

    #[test]
    fn min_length_from_overlap() {
        assert_eq!(MinLength::default().value(), 400);
        assert_eq!(MinLength::Fixed { min_len: 12 }.value(), 12);
    }

    #[test]
    fn trim_spec_is_stable() {
        let m = two_sample_manifest();
        let a = TrimSpec::from_manifest(&m).unwrap();
        let b = TrimSpec::from_manifest(&m).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, TrimSpec { fwd: 15, rev: 15 });
    }

    #[test]
    fn chain_counts_are_monotone() {
        let reads = vec![
            fastq_read(0, "AAAAAAAACGTACGTGATTACAGATTACATTGGCCAAGGGGGGG", b'I'),
            fastq_read(1, "AAAAAAAACGTACGTGATNACAGATTACATTGGCCAAGGGGGGG", b'I'),
            fastq_read(2, "AAAAAAAACGTACGTGATTACAGATTACATTGGCCAAGGGGGGG", b'#'),
            fastq_read(3, "AAAAAAAACGTACGT", b'I'),
            fasta_read(4, "CCCCCCCACGTACGTGATTACAGATTACATTGGCCAAGGGGGGG"),
        ];
        let chain = QualityFilterChain::new(
            QualityWindow::default(),
            MinLength::Fixed { min_len: 20 },
            TrimSpec::from_manifest(&two_sample_manifest()).unwrap(),
        );
        let index = Arc::new(BarcodeIndex::new(&two_sample_manifest()).unwrap());
        let (corpus, stages) = chain.run(reads, Some(index)).unwrap();

        let io = stages.iter().map(|s| (s.input, s.output)).collect::<Vec<_>>();
        assert_eq!(io, vec![(5, 4), (4, 3), (3, 2), (2, 2)]);
        for s in &stages {
            assert!(s.output <= s.input);
        }

        assert_eq!(corpus.reads()[0].seq(), b"GATTACAGATTACA");
        assert_eq!(corpus.reads()[0].sample, Some(1));
        assert_eq!(corpus.reads()[1].idx(), 4);
        // leading reverse tag still resolves the sample
        assert_eq!(corpus.reads()[1].sample, Some(1));
    }

    #[test]
    fn demultiplex_renames_and_drops() {
        let mut reads = vec![
            fasta_read(0, "ACGT"),
            fasta_read(1, "ACGT"),
            fasta_read(2, "ACGT"),
            fasta_read(3, "ACGT"),
        ];
        reads[0].sample = Some(2);
        reads[1].sample = Some(3);
        reads[2].sample = None;
        reads[3].sample = Some(2);

        let corpus = TrimmedCorpus {
            reads,
            trim: TrimSpec::default(),
        };
        let (out, count) = corpus.demultiplex(&two_sample_manifest()).unwrap();

        let names = out.iter().map(|r| utf8(r.name())).collect::<Vec<_>>();
        assert_eq!(names, vec!["run1_pool1_sample2_read1", "run1_pool1_sample2_read2"]);
        assert_eq!((count.input, count.output), (4, 2));
    }
}
