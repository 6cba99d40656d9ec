use thread_local::*;

use std::cell::RefCell;

use crate::iter::*;

pub struct ClassifyBarcodesReads<R: Reads> {
    reads: R,
    index: Arc<BarcodeIndex>,
    stats: Arc<Mutex<BarcodeStats>>,
    stats_local: ThreadLocal<RefCell<BarcodeStats>>,
}

impl<R: Reads> ClassifyBarcodesReads<R> {
    pub fn new(reads: R, index: Arc<BarcodeIndex>, stats: Arc<Mutex<BarcodeStats>>) -> Self {
        Self {
            reads,
            index,
            stats,
            stats_local: ThreadLocal::new(),
        }
    }
}

impl<R: Reads> Reads for ClassifyBarcodesReads<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.next_chunk()?;
        let mut stats = self
            .stats_local
            .get_or(|| RefCell::new(BarcodeStats::default()))
            .borrow_mut();

        for read in reads.iter_mut() {
            let m1 = self.index.leading(read.first().seq());
            let m2 = match read.second() {
                Some(second) => self.index.leading(second.seq()),
                None => BarcodeMatch::NONE,
            };
            let outcome = ReadPairOutcome::decide(&m1, &m2);

            stats.record(outcome, &m1, &m2);
            read.barcode_outcome = Some(outcome);
        }

        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()?;

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        for local in self.stats_local.iter_mut() {
            stats.merge(&local.borrow());
        }
        self.stats_local.clear();
        Ok(())
    }
}
