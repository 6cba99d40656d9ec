use crate::iter::*;

pub struct WindowQualityReads<R: Reads> {
    reads: R,
    window: QualityWindow,
}

impl<R: Reads> WindowQualityReads<R> {
    pub fn new(reads: R, window: QualityWindow) -> Self {
        Self { reads, window }
    }
}

impl<R: Reads> Reads for WindowQualityReads<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        loop {
            let mut reads = self.reads.next_chunk()?;
            if reads.is_empty() {
                return Ok(reads);
            }

            reads.retain_mut(|r| self.window.apply(r.first_mut()));

            if !reads.is_empty() {
                return Ok(reads);
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()
    }
}
