use flate2::{write::GzEncoder, Compression};
use needletail::errors::{ParseError, ParseErrorKind};
use needletail::parser::Format;
use needletail::*;

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::*;
use crate::iter::*;
use crate::read::*;

/// Whether the error concerns a single FASTQ record, after which the parser
/// continues with the next one.
fn is_malformed_record(e: &ParseError) -> bool {
    match e.kind {
        ParseErrorKind::UnequalLengths | ParseErrorKind::InvalidSeparator => true,
        ParseErrorKind::InvalidStart => matches!(e.format, Some(Format::Fastq)),
        _ => false,
    }
}

/// Malformed records are skipped, logged and counted. Any other parse error
/// stops the stream.
fn check_record<T>(
    record: std::result::Result<T, ParseError>,
    origin: &Origin,
    idx: usize,
    malformed: &AtomicUsize,
) -> Result<Option<T>> {
    match record {
        Ok(record) => Ok(Some(record)),
        Err(e) if is_malformed_record(&e) => {
            log::warn!("{}: dropping malformed record {}: {}", origin, idx, e);
            malformed.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
        Err(e) => Err(Error::ParseRecord {
            origin: origin.clone(),
            idx,
            source: Box::new(e),
        }),
    }
}

/// Single FASTQ or FASTA records, one per read.
pub struct Fastq1Reads {
    reader: Mutex<Option<Box<dyn FastxReader>>>,
    origin: Arc<Origin>,
    idx: AtomicUsize,
    malformed: Arc<AtomicUsize>,
    chunk_size: usize,
}

impl Fastq1Reads {
    /// Number of malformed records dropped so far.
    pub fn malformed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.malformed)
    }
}

impl Reads for Fastq1Reads {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut res = Vec::with_capacity(self.chunk_size);

        let mut reader = self.reader.lock().unwrap_or_else(|p| p.into_inner());
        let Some(reader) = reader.as_mut() else {
            return Ok(res);
        };

        while res.len() < self.chunk_size {
            let Some(record) = reader.next() else {
                break;
            };
            let idx = self.idx.fetch_add(1, Ordering::Relaxed);
            let Some(record) = check_record(record, &self.origin, idx, &self.malformed)? else {
                continue;
            };

            res.push(Read::from_fastq1(
                record.id(),
                &record.seq(),
                record.qual(),
                Arc::clone(&self.origin),
                idx,
            ));
        }

        Ok(res)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Raw read pairs from two files that list mates in the same order.
/// A pair with a malformed mate is dropped as a whole.
pub struct Fastq2Reads {
    readers: Mutex<Option<(Box<dyn FastxReader>, Box<dyn FastxReader>)>>,
    origin: Arc<Origin>,
    idx: AtomicUsize,
    malformed: Arc<AtomicUsize>,
    chunk_size: usize,
}

impl Fastq2Reads {
    /// Number of pairs dropped for a malformed mate so far.
    pub fn malformed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.malformed)
    }
}

impl Reads for Fastq2Reads {
    fn next_chunk(&self) -> Result<Vec<Read>> {
        let mut res = Vec::with_capacity(self.chunk_size);

        let mut readers = self.readers.lock().unwrap_or_else(|p| p.into_inner());
        let Some((reader1, reader2)) = readers.as_mut() else {
            return Ok(res);
        };

        while res.len() < self.chunk_size {
            let (record1, record2) = match (reader1.next(), reader2.next()) {
                (None, None) => break,
                (Some(record1), Some(record2)) => (record1, record2),
                _ => return Err(Error::UnpairedRead(self.origin.to_string())),
            };
            let idx = self.idx.fetch_add(1, Ordering::Relaxed);
            // both mates are checked so that a pair counts once
            let bad_mates = AtomicUsize::new(0);
            let record1 = check_record(record1, &self.origin, idx, &bad_mates)?;
            let record2 = check_record(record2, &self.origin, idx, &bad_mates)?;
            let (Some(record1), Some(record2)) = (record1, record2) else {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            res.push(Read::from_fastq2(
                record1.id(),
                &record1.seq(),
                record1.qual(),
                record2.id(),
                &record2.seq(),
                record2.qual(),
                Arc::clone(&self.origin),
                idx,
            ));
        }

        Ok(res)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open a sequence file. gzip is detected from the content. An empty file
/// yields no reader instead of an error.
fn open_fastx(file: &Path) -> Result<Option<Box<dyn FastxReader>>> {
    match parse_fastx_file(file) {
        Ok(reader) => Ok(Some(reader)),
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => Ok(None),
        Err(e) => Err(Error::file_io(file.display(), e)),
    }
}

pub fn iter_fastq1(file: impl AsRef<Path>, chunk_size: usize) -> Result<Fastq1Reads> {
    assert!(chunk_size >= 1, "Chunk size must be greater than zero");
    let file = file.as_ref();

    Ok(Fastq1Reads {
        reader: Mutex::new(open_fastx(file)?),
        origin: Arc::new(Origin::File(file.display().to_string())),
        idx: AtomicUsize::new(0),
        malformed: Arc::new(AtomicUsize::new(0)),
        chunk_size,
    })
}

pub fn iter_fastq2(
    file1: impl AsRef<Path>,
    file2: impl AsRef<Path>,
    chunk_size: usize,
) -> Result<Fastq2Reads> {
    assert!(chunk_size >= 1, "Chunk size must be greater than zero");
    let (file1, file2) = (file1.as_ref(), file2.as_ref());

    let readers = match (open_fastx(file1)?, open_fastx(file2)?) {
        (Some(r1), Some(r2)) => Some((r1, r2)),
        (None, None) => None,
        _ => {
            return Err(Error::UnpairedRead(format!(
                "\"{}\" and \"{}\"",
                file1.display(),
                file2.display()
            )))
        }
    };

    Ok(Fastq2Reads {
        readers: Mutex::new(readers),
        origin: Arc::new(Origin::File(format!("{} + {}", file1.display(), file2.display()))),
        idx: AtomicUsize::new(0),
        malformed: Arc::new(AtomicUsize::new(0)),
        chunk_size,
    })
}

/// Reads held in a byte buffer, possibly gzipped.
pub fn iter_fastx_bytes(bytes: Vec<u8>, chunk_size: usize) -> Result<Fastq1Reads> {
    assert!(chunk_size >= 1, "Chunk size must be greater than zero");

    let reader = if bytes.is_empty() {
        None
    } else {
        Some(parse_fastx_reader(Cursor::new(bytes)).map_err(|e| Error::BytesIo(Box::new(e)))?)
    };

    Ok(Fastq1Reads {
        reader: Mutex::new(reader),
        origin: Arc::new(Origin::Bytes),
        idx: AtomicUsize::new(0),
        malformed: Arc::new(AtomicUsize::new(0)),
        chunk_size,
    })
}

/// Load a whole sequence file.
pub fn read_corpus(file: impl AsRef<Path>) -> Result<Vec<Read>> {
    iter_fastq1(file, 1024)?.run_collect_reads()
}

/// Create `file` and its parent directories. A `.gz` extension selects gzip.
pub fn open_writer(file: impl AsRef<Path>) -> Result<Box<dyn Write + Send>> {
    let file = file.as_ref();

    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::file_io(dir.display(), e))?;
    }

    let f = File::create(file).map_err(|e| Error::file_io(file.display(), e))?;

    let writer: Box<dyn Write + Send> = if file.extension().map_or(false, |e| e == "gz") {
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(f))
    };

    Ok(writer)
}

pub fn write_fastq_record(writer: &mut impl Write, record: &SeqRecord) -> std::io::Result<()> {
    let qual = match record.qual() {
        Some(qual) => qual,
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("record {} has no qualities", utf8(record.name())),
            ))
        }
    };

    writer.write_all(b"@")?;
    writer.write_all(record.name())?;
    writer.write_all(b"\n")?;
    writer.write_all(record.seq())?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")
}

pub fn write_fasta_record(writer: &mut impl Write, record: &SeqRecord) -> std::io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(record.name())?;
    writer.write_all(b"\n")?;
    writer.write_all(record.seq())?;
    writer.write_all(b"\n")
}

/// Write reads as FASTA, one record per read (first end only).
pub fn write_fasta(file: impl AsRef<Path>, reads: &[Read]) -> Result<()> {
    let file = file.as_ref();
    let mut writer = open_writer(file)?;

    for read in reads {
        write_fasta_record(&mut writer, read.first()).map_err(|e| Error::file_io(file.display(), e))?;
    }

    writer.flush().map_err(|e| Error::file_io(file.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastq_bytes() {
        let fastq = b"@r0\nACGT\n+\nIIII\n@r1\nGGCC\n+\n####\n".to_vec();
        let reads = iter_fastx_bytes(fastq, 1).unwrap().run_collect_reads().unwrap();

        assert_eq!(reads.len(), 2);
        assert_eq!(reads[1].name(), b"r1");
        assert_eq!(reads[1].qual(), Some(&b"####"[..]));
        assert_eq!(reads[1].idx(), 1);
    }

    #[test]
    fn fasta_bytes_have_no_qualities() {
        let reads = iter_fastx_bytes(b">a\nACGT\n".to_vec(), 8)
            .unwrap()
            .run_collect_reads()
            .unwrap();
        assert_eq!(reads[0].qual(), None);
        assert!(iter_fastx_bytes(Vec::new(), 8).unwrap().run_collect_reads().unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_dropped_and_counted() {
        let fastq = b"@r0\nACGT\n+\nIIII\n@m1\nACGTACGT\n+\nIII\n@r2\nGGCC\n+\nIIII\n@m3\nAC\n-\nII\n@r4\nTT\n+\nII\n";
        let reads = iter_fastx_bytes(fastq.to_vec(), 1).unwrap();
        let malformed = reads.malformed();
        let reads = reads.run_collect_reads().unwrap();

        let names = reads.iter().map(|r| utf8(r.name())).collect::<Vec<_>>();
        assert_eq!(names, ["r0", "r2", "r4"]);
        assert_eq!(malformed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn truncated_file_is_an_error() {
        let res = iter_fastx_bytes(b"@r0\nACGT\n+\nIIII\n@r1\nACGT\n".to_vec(), 8)
            .unwrap()
            .run_collect_reads();
        assert!(matches!(res, Err(Error::ParseRecord { .. })));
    }

    #[test]
    fn pair_with_a_malformed_mate_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (r1, r2) = (dir.path().join("r1.fastq"), dir.path().join("r2.fastq"));
        std::fs::write(&r1, "@p0\nAAAA\n+\nIIII\n@p1\nAAAA\n+\nIIII\n@p2\nAAAA\n+\nIIII\n").unwrap();
        std::fs::write(&r2, "@p0\nCCCC\n+\nIIII\n@p1\nCCCC\n+\nII\n@p2\nCCCC\n+\nIIII\n").unwrap();

        let pairs = iter_fastq2(&r1, &r2, 4).unwrap();
        let malformed = pairs.malformed();
        let pairs = pairs.run_collect_reads().unwrap();

        assert_eq!(pairs.iter().map(|p| p.idx()).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(malformed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn write_then_read_gz() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sub").join("out.fasta.gz");
        let reads = vec![
            Read::from_records(SeqRecord::new(b"x".to_vec(), b"ACGT".to_vec()), None, 0),
            Read::from_records(SeqRecord::new(b"y".to_vec(), b"TTTT".to_vec()), None, 1),
        ];
        write_fasta(&file, &reads).unwrap();

        let back = read_corpus(&file).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].seq(), b"TTTT");
    }

    #[test]
    fn fastq_needs_qualities() {
        let mut out = Vec::new();
        let record = SeqRecord::new(b"x".to_vec(), b"ACGT".to_vec());
        assert!(write_fastq_record(&mut out, &record).is_err());
        write_fasta_record(&mut out, &record).unwrap();
        assert_eq!(out, b">x\nACGT\n");
    }
}
