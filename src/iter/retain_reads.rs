use crate::iter::*;

pub struct RetainReads<R: Reads, F: Fn(&Read) -> bool + Send + Sync> {
    reads: R,
    func: F,
}

impl<R: Reads, F: Fn(&Read) -> bool + Send + Sync> RetainReads<R, F> {
    pub fn new(reads: R, func: F) -> Self {
        Self { reads, func }
    }
}

impl<R: Reads, F: Fn(&Read) -> bool + Send + Sync> Reads for RetainReads<R, F> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        // an empty chunk means the source is exhausted, so keep pulling
        // until something survives
        loop {
            let mut reads = self.reads.next_chunk()?;
            if reads.is_empty() {
                return Ok(reads);
            }

            reads.retain(|r| (self.func)(r));

            if !reads.is_empty() {
                return Ok(reads);
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()
    }
}
