use crate::iter::*;

pub struct ReorientReads<R: Reads> {
    reads: R,
    index: Arc<BarcodeIndex>,
}

impl<R: Reads> ReorientReads<R> {
    pub fn new(reads: R, index: Arc<BarcodeIndex>) -> Self {
        Self { reads, index }
    }
}

impl<R: Reads> Reads for ReorientReads<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.next_chunk()?;

        for read in reads.iter_mut() {
            if self.index.needs_flip(read.seq()) {
                read.first_mut().revcomp();
            }
        }

        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()
    }
}
