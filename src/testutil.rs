//! Fixtures shared by unit tests.

use std::sync::Arc;

use crate::manifest::Manifest;
use crate::read::*;

pub const MANIFEST_YAML: &str = r#"
run: 1
pool: 1
primers:
  forward: { name: fwd, sequence: ACGTACGT }
  reverse: { name: rev, sequence: TTGGCCAA }
samples:
  - { name: S1, group: g, num: 1, fwd: AAAAAAA, rev: CCCCCCC }
  - { name: S2, group: g, num: 2, fwd: GGGGGGG, rev: TTTTTTT }
  - { name: S3, group: g, num: 3, used: false, fwd: ACACACA, rev: GTGTGTG }
"#;

pub fn two_sample_manifest() -> Manifest {
    let mut m = Manifest::from_yaml(MANIFEST_YAML.as_bytes()).unwrap();
    m.validate().unwrap();
    m
}

pub fn fastq_read(idx: usize, seq: &str, qual_char: u8) -> Read {
    let qual = vec![qual_char; seq.len()];
    Read::from_fastq1(
        format!("read{idx}").as_bytes(),
        seq.as_bytes(),
        Some(&qual),
        Arc::new(Origin::Bytes),
        idx,
    )
}

pub fn fasta_read(idx: usize, seq: &str) -> Read {
    Read::from_fastq1(
        format!("read{idx}").as_bytes(),
        seq.as_bytes(),
        None,
        Arc::new(Origin::Bytes),
        idx,
    )
}
