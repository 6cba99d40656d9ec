use std::sync::atomic::{AtomicUsize, Ordering};

use crate::iter::*;

pub struct CountReads<R: Reads, F: Fn(usize) + Send + Sync> {
    reads: R,
    count: AtomicUsize,
    func: F,
}

impl<R: Reads, F: Fn(usize) + Send + Sync> CountReads<R, F> {
    pub fn new(reads: R, func: F) -> Self {
        Self {
            reads,
            count: AtomicUsize::new(0),
            func,
        }
    }
}

impl<R: Reads, F: Fn(usize) + Send + Sync> Reads for CountReads<R, F> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let reads = self.reads.next_chunk()?;
        self.count.fetch_add(reads.len(), Ordering::Relaxed);
        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()?;
        (self.func)(self.count.load(Ordering::Relaxed));
        Ok(())
    }
}
