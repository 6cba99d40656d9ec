use thread_local::*;

use std::cell::RefCell;

use crate::iter::*;

pub struct ClassifyPrimersReads<R: Reads> {
    reads: R,
    matcher: Arc<PrimerMatcher>,
    matcher_local: ThreadLocal<PrimerMatcher>,
    positions: Arc<Mutex<PrimerPositions>>,
    positions_local: ThreadLocal<RefCell<PrimerPositions>>,
}

impl<R: Reads> ClassifyPrimersReads<R> {
    pub fn new(
        reads: R,
        matcher: Arc<PrimerMatcher>,
        positions: Arc<Mutex<PrimerPositions>>,
    ) -> Self {
        Self {
            reads,
            matcher,
            matcher_local: ThreadLocal::new(),
            positions,
            positions_local: ThreadLocal::new(),
        }
    }
}

impl<R: Reads> Reads for ClassifyPrimersReads<R> {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut reads = self.reads.next_chunk()?;
        let matcher = self.matcher_local.get_or(|| (*self.matcher).clone());
        let mut positions = self
            .positions_local
            .get_or(|| RefCell::new(PrimerPositions::default()))
            .borrow_mut();

        for read in reads.iter_mut() {
            let hit = matcher.locate(read.seq());
            positions.record(hit.fwd_pos, hit.rev_pos);
            read.primer_outcome = Some(hit.outcome);
        }

        Ok(reads)
    }

    fn finish(&mut self) -> Result<()> {
        self.reads.finish()?;

        let mut positions = self.positions.lock().unwrap_or_else(|p| p.into_inner());
        for local in self.positions_local.iter_mut() {
            positions.merge(&local.borrow());
        }
        self.positions_local.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn chain_agrees_with_matcher() {
        let matcher = Arc::new(PrimerMatcher::new(&two_sample_manifest().primers, 7).unwrap());
        let seqs = [
            "AAAAAAAACGTACGTGATTACATTGGCCAAGGGGGGG",
            "AAAAAAAAACGTACGTGATTACATTGGCCAAGGGGGGG",
            "AAAAAAAACGTACGTGATTACAGGGGGGG",
            "GATTACATTGGCCAA",
            "GATTACAGATTACA",
        ];
        let reads = seqs.iter().enumerate().map(|(i, s)| fasta_read(i, s)).collect();
        let positions = Arc::new(Mutex::new(PrimerPositions::default()));

        let out = iter_reads(reads, 2)
            .classify_primers(Arc::clone(&matcher), Arc::clone(&positions))
            .run_collect_reads()
            .unwrap();

        for (read, seq) in out.iter().zip(seqs) {
            assert_eq!(read.primer_outcome, Some(matcher.classify(seq.as_bytes())), "{seq}");
        }
        assert_eq!(out[0].primer_outcome, Some(PrimerOutcome::Good));
        assert_eq!(positions.lock().unwrap().fwd[&7], 2);
    }
}
