//! Exact-size uniform subsampling without replacement.

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Deserialize;

use std::path::Path;

use crate::errors::*;
use crate::fastq::iter_fastq1;
use crate::iter::*;
use crate::read::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subsampler {
    pub size: usize,
    #[serde(default)]
    pub seed: u64,
}

/// Records picked by a subsampler, in input order.
#[derive(Debug, Clone)]
pub struct Subsample<T> {
    pub picked: Vec<T>,
    /// Number of records offered.
    pub seen: usize,
    pub warning: Option<Warning>,
}

impl Subsampler {
    pub fn new(size: usize, seed: u64) -> Self {
        Self { size, seed }
    }

    fn rng(&self) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(self.seed)
    }

    /// Single pass reservoir sampling over a stream of unknown length.
    /// Memory stays proportional to the sample size.
    pub fn reservoir<T>(&self, items: impl IntoIterator<Item = T>) -> Subsample<T> {
        let mut rng = self.rng();
        let mut reservoir = Vec::with_capacity(self.size);
        let mut seen = 0;

        for item in items {
            if reservoir.len() < self.size {
                reservoir.push((seen, item));
            } else {
                let j = rng.gen_range(0..=seen);
                if j < self.size {
                    reservoir[j] = (seen, item);
                }
            }
            seen += 1;
        }

        reservoir.sort_unstable_by_key(|(i, _)| *i);
        self.finish(reservoir.into_iter().map(|(_, item)| item).collect(), seen)
    }

    /// Selection sampling when the stream length `total` is known up front.
    pub fn selection<T>(&self, items: impl IntoIterator<Item = T>, total: usize) -> Subsample<T> {
        let mut rng = self.rng();
        let mut picked = Vec::with_capacity(self.size.min(total));
        let mut seen = 0;

        for item in items {
            let needed = self.size.saturating_sub(picked.len());
            let left = total.saturating_sub(seen);
            if needed > 0 && (left <= needed || rng.gen::<f64>() * (left as f64) < needed as f64) {
                picked.push(item);
            }
            seen += 1;
        }

        self.finish(picked, seen)
    }

    /// Reservoir sample the reads of a chain.
    pub fn sample_reads(&self, mut reads: impl Reads) -> Result<Subsample<Read>> {
        let mut rng = self.rng();
        let mut reservoir: Vec<Read> = Vec::with_capacity(self.size);
        let mut seen = 0;

        loop {
            let chunk = reads.next_chunk()?;
            if chunk.is_empty() {
                break;
            }
            for read in chunk {
                if reservoir.len() < self.size {
                    reservoir.push(read);
                } else {
                    let j = rng.gen_range(0..=seen);
                    if j < self.size {
                        reservoir[j] = read;
                    }
                }
                seen += 1;
            }
        }
        reads.finish()?;

        reservoir.sort_unstable_by_key(|r| r.idx());
        Ok(self.finish(reservoir, seen))
    }

    pub fn sample_file(&self, file: impl AsRef<Path>) -> Result<Subsample<Read>> {
        self.sample_reads(iter_fastq1(file, 1024)?)
    }

    fn finish<T>(&self, picked: Vec<T>, seen: usize) -> Subsample<T> {
        let warning = (seen < self.size).then(|| Warning::UndersizedSubsample {
            requested: self.size,
            available: seen,
        });
        if let Some(w) = &warning {
            log::warn!("{}", w);
        }

        Subsample {
            picked,
            seen,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fasta_read;

    #[test]
    fn exact_size_and_unique() {
        for seed in 0..20 {
            let s = Subsampler::new(30, seed);
            for sample in [s.reservoir(0..500).picked, s.selection(0..500, 500).picked] {
                assert_eq!(sample.len(), 30);
                // input order is kept, so strictly increasing means no repeats
                assert!(sample.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn uniform_inclusion() {
        let (n, k, runs) = (20usize, 5usize, 4000u64);
        let mut reservoir_hits = vec![0usize; n];
        let mut selection_hits = vec![0usize; n];

        for seed in 0..runs {
            let s = Subsampler::new(k, seed);
            s.reservoir(0..n).picked.into_iter().for_each(|i| reservoir_hits[i] += 1);
            s.selection(0..n, n).picked.into_iter().for_each(|i| selection_hits[i] += 1);
        }

        // expected 1000 hits each
        let expected = runs as f64 * k as f64 / n as f64;
        for hits in reservoir_hits.iter().chain(&selection_hits) {
            let ratio = *hits as f64 / expected;
            assert!((0.85..1.15).contains(&ratio), "{hits}");
        }
    }

    #[test]
    fn undersized_returns_everything() {
        let s = Subsampler::new(10, 1);
        let out = s.reservoir(0..4);
        assert_eq!(out.picked, vec![0, 1, 2, 3]);
        assert_eq!(
            out.warning,
            Some(Warning::UndersizedSubsample {
                requested: 10,
                available: 4
            })
        );
        assert!(s.reservoir(0..10).warning.is_none());
    }

    #[test]
    fn reads_stay_verbatim() {
        let reads = (0..50).map(|i| fasta_read(i, "ACGTTGCA")).collect();
        let out = Subsampler::new(7, 3).sample_reads(iter_reads(reads, 4)).unwrap();

        assert_eq!(out.picked.len(), 7);
        assert_eq!(out.seen, 50);
        for r in &out.picked {
            assert_eq!(r.name(), format!("read{}", r.idx()).as_bytes());
            assert_eq!(r.seq(), b"ACGTTGCA");
        }
    }
}
