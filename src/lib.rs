//! Preprocessing of multiplexed, dual-tagged amplicon sequencing runs.
//!
//! # Overview
//! A sequencing pool holds the reads of many samples. Each sample is marked by a
//! pair of short tags at both ends of the amplicon, followed by the primers.
//! amplitag takes the raw paired-end files of a pool and produces per-sample,
//! quality filtered sequences with a record of where reads were lost, and then
//! turns cluster memberships into a sample by cluster count table.
//!
//! ## Stages
//! A pool is processed by a fixed list of [`Stage`]s (see [`pipeline`]):
//! * classify read pairs by their tags into five barcode outcomes
//! * assemble each outcome with an external assembler
//! * reorient the assembled and unassembled reads so the forward tag leads
//! * classify both by where the primers were found
//! * filter the good reads on N bases, window quality and length, then trim
//!   tags and primers
//! * rename the reads by sample, and optionally subsample them
//!
//! ## Iterator-like API
//! Stages are built from chained read operations, similar to Rust iterators,
//! which run when you call [`run()`](Reads::run) or
//! [`run_with_threads()`](Reads::run_with_threads):
//! ```no_run
//! # use std::sync::{Arc, Mutex};
//! # use amplitag::*;
//! # fn main() -> amplitag::errors::Result<()> {
//! let manifest = Manifest::from_file("pool1/manifest.yaml")?;
//! let index = Arc::new(BarcodeIndex::new(&manifest)?);
//! let stats = Arc::new(Mutex::new(BarcodeStats::default()));
//!
//! iter_fastq2("pool1/R1.fastq.gz", "pool1/R2.fastq.gz", 256)?
//!     .classify_barcodes(index, Arc::clone(&stats))
//!     .run_with_threads(4)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Read identifiers
//! Renamed reads carry their origin in the name, like `run1_pool2_sample7_read15`.
//! See [`ReadIdentifier`].

pub mod barcodes;
pub mod bucket;
pub mod config;
pub mod errors;
pub mod external;
pub mod fastq;
pub mod iter;
pub mod manifest;
pub mod membership;
pub mod pipeline;
pub mod primers;
pub mod quality;
pub mod read;
pub mod read_id;
pub mod report;
pub mod subsample;

#[cfg(test)]
pub(crate) mod testutil;

// commonly used functions and types

pub use crate::barcodes::*;
pub use crate::config::*;
pub use crate::fastq::*;
pub use crate::iter::*;
pub use crate::manifest::*;
pub use crate::pipeline::*;
pub use crate::primers::*;
pub use crate::quality::*;
pub use crate::read::*;
pub use crate::read_id::*;
pub use crate::report::*;
