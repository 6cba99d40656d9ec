//! Write-only outcome buckets.
//!
//! A bucket owns its destination files and a buffer of formatted records.
//! Records are appended from any thread and written out in batches.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::errors::*;
use crate::fastq::*;
use crate::read::*;

pub const DEFAULT_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketFormat {
    Fastq,
    Fasta,
    /// FASTQ for records with qualities, FASTA otherwise.
    Auto,
}

/// Where a bucket writes. Paired buckets write the second end to `second`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPaths {
    pub first: PathBuf,
    pub second: Option<PathBuf>,
}

impl BucketPaths {
    pub fn single(first: impl Into<PathBuf>) -> Self {
        Self {
            first: first.into(),
            second: None,
        }
    }

    pub fn paired(first: impl Into<PathBuf>, second: impl Into<PathBuf>) -> Self {
        Self {
            first: first.into(),
            second: Some(second.into()),
        }
    }
}

struct Pending {
    first: Box<dyn Write + Send>,
    second: Option<Box<dyn Write + Send>>,
    first_buf: Vec<u8>,
    second_buf: Vec<u8>,
    records: usize,
}

pub struct Bucket {
    name: String,
    paths: BucketPaths,
    format: BucketFormat,
    batch_size: usize,
    pending: Mutex<Pending>,
    count: AtomicUsize,
}

impl Bucket {
    /// Create the bucket's files, truncating anything already there.
    pub fn create(name: impl Into<String>, paths: BucketPaths, format: BucketFormat) -> Result<Self> {
        let first = open_writer(&paths.first)?;
        let second = paths.second.as_ref().map(open_writer).transpose()?;

        Ok(Self {
            name: name.into(),
            paths,
            format,
            batch_size: DEFAULT_BATCH_SIZE,
            pending: Mutex::new(Pending {
                first,
                second,
                first_buf: Vec::new(),
                second_buf: Vec::new(),
                records: 0,
            }),
            count: AtomicUsize::new(0),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &BucketPaths {
        &self.paths
    }

    pub fn format(&self) -> BucketFormat {
        self.format
    }

    /// Number of records appended so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Format the read into the pending batch. The read itself is not kept.
    pub fn append(&self, read: &Read) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let Pending {
            first_buf,
            second_buf,
            ..
        } = &mut *pending;
        let marks = (first_buf.len(), second_buf.len());

        let res = self
            .write_record(first_buf, read.first())
            .map_err(|e| self.io_err(&self.paths.first, e))
            .and_then(|_| match &self.paths.second {
                Some(path) => match read.second() {
                    Some(record) => self.write_record(second_buf, record).map_err(|e| self.io_err(path, e)),
                    None => Err(Error::UnpairedRead(format!("bucket {}", self.name))),
                },
                None => Ok(()),
            });
        if let Err(e) = res {
            first_buf.truncate(marks.0);
            second_buf.truncate(marks.1);
            return Err(e);
        }

        pending.records += 1;
        self.count.fetch_add(1, Ordering::Relaxed);

        if pending.records >= self.batch_size {
            self.write_pending(&mut pending)?;
        }
        Ok(())
    }

    /// Write out every pending record and flush the files.
    pub fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        self.write_pending(&mut pending)?;

        let Pending { first, second, .. } = &mut *pending;
        first.flush().map_err(|e| self.io_err(&self.paths.first, e))?;
        if let (Some(w), Some(path)) = (second.as_mut(), &self.paths.second) {
            w.flush().map_err(|e| self.io_err(path, e))?;
        }
        Ok(())
    }

    fn write_pending(&self, pending: &mut Pending) -> Result<()> {
        let Pending {
            first,
            second,
            first_buf,
            second_buf,
            records,
        } = pending;

        first
            .write_all(first_buf)
            .map_err(|e| self.io_err(&self.paths.first, e))?;
        first_buf.clear();

        if let (Some(w), Some(path)) = (second.as_mut(), &self.paths.second) {
            w.write_all(second_buf).map_err(|e| self.io_err(path, e))?;
            second_buf.clear();
        }

        *records = 0;
        Ok(())
    }

    fn write_record(&self, writer: &mut Vec<u8>, record: &SeqRecord) -> std::io::Result<()> {
        match self.format {
            BucketFormat::Fastq => write_fastq_record(writer, record),
            BucketFormat::Fasta => write_fasta_record(writer, record),
            BucketFormat::Auto if record.qual().is_some() => write_fastq_record(writer, record),
            BucketFormat::Auto => write_fasta_record(writer, record),
        }
    }

    fn io_err(&self, path: &Path, e: std::io::Error) -> Error {
        Error::file_io(path.display(), e)
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("paths", &self.paths)
            .field("format", &self.format)
            .field("count", &self.count())
            .finish()
    }
}
