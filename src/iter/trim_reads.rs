use crate::iter::*;

pub struct TrimReads<R: Reads> {
    reads: R,
    spec: TrimSpec,
    index: Option<Arc<BarcodeIndex>>,
}

impl<R: Reads> TrimReads<R> {
    pub fn new(reads: R, spec: TrimSpec, index: Option<Arc<BarcodeIndex>>) -> Self {
        Self { reads, spec, index }
    }
}

impl<R: Reads> Reads for TrimReads<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.next_chunk()?;

        for read in reads.iter_mut() {
            if let Some(index) = &self.index {
                // the tag is gone after trimming, so resolve the sample now
                if read.sample.is_none() {
                    read.sample = index.leading(read.seq()).sample.map(|s| s.num);
                }
            }

            self.spec.apply(read.first_mut());
        }

        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()
    }
}
