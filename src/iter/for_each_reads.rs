use crate::iter::*;

pub struct ForEachReads<R: Reads, F: Fn(&mut Read) + Send + Sync> {
    reads: R,
    func: F,
}

impl<R: Reads, F: Fn(&mut Read) + Send + Sync> ForEachReads<R, F> {
    pub fn new(reads: R, func: F) -> Self {
        Self { reads, func }
    }
}

impl<R: Reads, F: Fn(&mut Read) + Send + Sync> Reads for ForEachReads<R, F> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.next_chunk()?;
        reads.iter_mut().for_each(|r| (self.func)(r));
        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()
    }
}
