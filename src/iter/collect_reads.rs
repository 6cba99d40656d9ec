use crate::iter::*;

pub struct CollectReads<R: Reads, F: Fn(&Read) -> Option<usize> + Send + Sync> {
    reads: R,
    buckets: Arc<Vec<Bucket>>,
    select: F,
}

impl<R: Reads, F: Fn(&Read) -> Option<usize> + Send + Sync> CollectReads<R, F> {
    pub fn new(reads: R, buckets: Arc<Vec<Bucket>>, select: F) -> Self {
        Self {
            reads,
            buckets,
            select,
        }
    }
}

impl<R: Reads, F: Fn(&Read) -> Option<usize> + Send + Sync> Reads for CollectReads<R, F> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let reads = self.reads.next_chunk()?;

        for read in &reads {
            if let Some(i) = (self.select)(read) {
                self.buckets[i].append(read)?;
            }
        }

        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()?;

        for bucket in self.buckets.iter() {
            bucket.flush()?;
        }
        Ok(())
    }
}
