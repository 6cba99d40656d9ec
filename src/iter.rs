use std::marker::{Send, Sync};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::barcodes::*;
use crate::bucket::Bucket;
use crate::errors::*;
use crate::primers::*;
use crate::quality::*;
use crate::read::*;

pub mod classify_barcodes_reads;
use classify_barcodes_reads::*;

pub mod reorient_reads;
use reorient_reads::*;

pub mod classify_primers_reads;
use classify_primers_reads::*;

pub mod retain_reads;
use retain_reads::*;

pub mod window_quality_reads;
use window_quality_reads::*;

pub mod trim_reads;
use trim_reads::*;

pub mod for_each_reads;
use for_each_reads::*;

pub mod count_reads;
use count_reads::*;

pub mod collect_reads;
use collect_reads::*;

/// A chunked stream of reads that can be pulled from several threads at once.
///
/// Operations are chained like iterator adaptors and executed when one of the
/// `run*` methods is called. Each call to `next_chunk` pulls a chunk from the
/// source and passes it through every operation in the chain.
pub trait Reads: Send + Sync {
    fn run(mut self) -> Result<()>
    where
        Self: Sized,
    {
        while !self.next_chunk()?.is_empty() {}
        self.finish()
    }

    /// Run the chain on `threads` workers. The first error stops all workers.
    fn run_with_threads(mut self, threads: usize) -> Result<()>
    where
        Self: Sized,
    {
        assert!(threads >= 1, "Number of threads must be greater than zero");

        let stop = AtomicBool::new(false);
        let error = Mutex::new(None);

        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        match self.next_chunk() {
                            Ok(reads) if reads.is_empty() => break,
                            Ok(_) => (),
                            Err(e) => {
                                stop.store(true, Ordering::Relaxed);
                                let mut error = error.lock().unwrap_or_else(|p| p.into_inner());
                                error.get_or_insert(e);
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(e);
        }

        self.finish()
    }

    /// Run the chain on the current thread and keep every read that comes out, in order.
    fn run_collect_reads(mut self) -> Result<Vec<Read>>
    where
        Self: Sized,
    {
        let mut res = Vec::new();

        loop {
            let reads = self.next_chunk()?;

            if reads.is_empty() {
                break;
            }

            res.extend(reads);
        }

        self.finish()?;
        Ok(res)
    }

    /// Set the barcode outcome of each read pair and tally it into `stats`.
    #[must_use]
    fn classify_barcodes(
        self,
        index: Arc<BarcodeIndex>,
        stats: Arc<Mutex<BarcodeStats>>,
    ) -> ClassifyBarcodesReads<Self>
    where
        Self: Sized,
    {
        ClassifyBarcodesReads::new(self, index, stats)
    }

    /// Reverse complement reads whose tags show they are on the reverse strand.
    #[must_use]
    fn reorient(self, index: Arc<BarcodeIndex>) -> ReorientReads<Self>
    where
        Self: Sized,
    {
        ReorientReads::new(self, index)
    }

    /// Set the primer outcome of each read and record primer positions.
    #[must_use]
    fn classify_primers(
        self,
        matcher: Arc<PrimerMatcher>,
        positions: Arc<Mutex<PrimerPositions>>,
    ) -> ClassifyPrimersReads<Self>
    where
        Self: Sized,
    {
        ClassifyPrimersReads::new(self, matcher, positions)
    }

    /// Keep only the reads for which `func` returns true.
    #[must_use]
    fn retain<F>(self, func: F) -> RetainReads<Self, F>
    where
        F: Fn(&Read) -> bool + Send + Sync,
        Self: Sized,
    {
        RetainReads::new(self, func)
    }

    #[must_use]
    fn retain_no_n(self) -> RetainReads<Self, fn(&Read) -> bool>
    where
        Self: Sized,
    {
        RetainReads::new(self, |r| !r.has_n())
    }

    /// Sliding-window PHRED filter. Reads without qualities pass through.
    #[must_use]
    fn window_quality(self, window: QualityWindow) -> WindowQualityReads<Self>
    where
        Self: Sized,
    {
        WindowQualityReads::new(self, window)
    }

    /// Remove tags and primers from both ends. When an index is given the
    /// sample is resolved from the leading tag first.
    #[must_use]
    fn trim(self, spec: TrimSpec, index: Option<Arc<BarcodeIndex>>) -> TrimReads<Self>
    where
        Self: Sized,
    {
        TrimReads::new(self, spec, index)
    }

    #[must_use]
    fn for_each<F>(self, func: F) -> ForEachReads<Self, F>
    where
        F: Fn(&mut Read) + Send + Sync,
        Self: Sized,
    {
        ForEachReads::new(self, func)
    }

    #[must_use]
    fn dbg(self) -> ForEachReads<Self, fn(&mut Read)>
    where
        Self: Sized,
    {
        ForEachReads::new(self, |read| log::debug!("{}", read))
    }

    /// Count the reads passing this point; `func` receives the total on finish.
    #[must_use]
    fn count<F>(self, func: F) -> CountReads<Self, F>
    where
        F: Fn(usize) + Send + Sync,
        Self: Sized,
    {
        CountReads::new(self, func)
    }

    /// Append each read to the bucket chosen by `select`. Reads are passed on.
    #[must_use]
    fn collect<F>(self, buckets: Arc<Vec<Bucket>>, select: F) -> CollectReads<Self, F>
    where
        F: Fn(&Read) -> Option<usize> + Send + Sync,
        Self: Sized,
    {
        CollectReads::new(self, buckets, select)
    }

    #[must_use]
    fn boxed(self) -> Box<dyn Reads>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }

    fn next_chunk(&self) -> Result<Vec<Read>>;

    fn finish(&mut self) -> Result<()>;
}

impl<R: Reads + ?Sized> Reads for Box<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        (**self).next_chunk()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Reads already held in memory.
pub struct VecReads {
    reads: Mutex<std::vec::IntoIter<Read>>,
    chunk_size: usize,
}

impl Reads for VecReads {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.lock().unwrap_or_else(|p| p.into_inner());
        Ok(reads.by_ref().take(self.chunk_size).collect())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[must_use]
pub fn iter_reads(reads: Vec<Read>, chunk_size: usize) -> VecReads {
    assert!(chunk_size >= 1, "Chunk size must be greater than zero");
    VecReads {
        reads: Mutex::new(reads.into_iter()),
        chunk_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn collect_keeps_order_across_chunks() {
        let reads = (0..10).map(|i| fasta_read(i, "ACGT")).collect();
        let out = iter_reads(reads, 3).run_collect_reads().unwrap();
        assert_eq!(out.iter().map(|r| r.idx()).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn threads_see_every_read_once() {
        let reads = (0..1000).map(|i| fasta_read(i, "ACGT")).collect();
        let total = Arc::new(Mutex::new(0));
        let t = Arc::clone(&total);
        iter_reads(reads, 7)
            .count(move |n| *t.lock().unwrap() = n)
            .run_with_threads(4)
            .unwrap();
        assert_eq!(*total.lock().unwrap(), 1000);
    }
}
