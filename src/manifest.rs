//! Per-pool sample manifest.
//!
//! A manifest is a YAML document listing the primers of a pool and up to
//! [`MAX_SAMPLES`] sample slots with their two tags:
//! ```yaml
//! run: 3
//! pool: 1
//! primers:
//!   forward: { name: 341F, sequence: CCTACGGGNGGCWGCAG }
//!   reverse: { name: 805R, sequence: GACTACHVGGGTATCTAATCC }
//! samples:
//!   - { name: lake_a, group: lake, num: 1, used: true, fwd: AAAAAAA, rev: CCCCCCC }
//! ```

use rustc_hash::FxHashSet;
use serde::Deserialize;

use std::path::Path;

use crate::errors::*;

pub const MAX_SAMPLES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sample {
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub num: u32,
    #[serde(default = "default_used")]
    pub used: bool,
    #[serde(default)]
    pub fwd: String,
    #[serde(default)]
    pub rev: String,
}

fn default_used() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Primer {
    #[serde(default)]
    pub name: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrimerPair {
    #[serde(default)]
    pub name: String,
    pub forward: Primer,
    pub reverse: Primer,
}

impl PrimerPair {
    pub fn fwd_len(&self) -> usize {
        self.forward.sequence.len()
    }

    pub fn rev_len(&self) -> usize {
        self.reverse.sequence.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub run: u32,
    /// Absent for pre-demultiplexed input, where each file holds one sample.
    #[serde(default)]
    pub pool: Option<u32>,
    pub primers: PrimerPair,
    pub samples: Vec<Sample>,
}

impl Manifest {
    pub fn from_yaml(yaml: &[u8]) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(yaml)
    }

    /// Load and validate a manifest file.
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let bytes = std::fs::read(file).map_err(|e| Error::file_io(file.display(), e))?;
        let mut manifest = Self::from_yaml(&bytes).map_err(|e| Error::Manifest {
            file: file.display().to_string(),
            source: e,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the manifest and sort the samples by slot number.
    pub fn validate(&mut self) -> Result<()> {
        if self.samples.is_empty() {
            return Err(Error::config("manifest lists no samples"));
        }
        if self.samples.len() > MAX_SAMPLES {
            return Err(Error::config(format!(
                "manifest lists {} samples, at most {} slots are supported",
                self.samples.len(),
                MAX_SAMPLES
            )));
        }

        self.samples.sort_by_key(|s| s.num);

        let mut nums = FxHashSet::default();
        let mut names = FxHashSet::default();
        for s in &self.samples {
            if !nums.insert(s.num) {
                return Err(Error::config(format!("sample slot {} is used twice", s.num)));
            }
            if !names.insert(s.name.as_str()) {
                return Err(Error::config(format!("ambiguous sample name \"{}\"", s.name)));
            }
            for tag in [&s.fwd, &s.rev] {
                if let Some(c) = tag.bytes().find(|c| !matches!(c, b'A' | b'C' | b'G' | b'T')) {
                    return Err(Error::config(format!(
                        "tag \"{}\" of sample \"{}\" contains '{}'",
                        tag, s.name, c as char
                    )));
                }
            }
        }

        self.tag_len()?;

        for primer in [&self.primers.forward, &self.primers.reverse] {
            if primer.sequence.is_empty() {
                return Err(Error::config(format!("primer \"{}\" has no sequence", primer.name)));
            }
        }

        Ok(())
    }

    /// Length shared by every tag. Zero when the input is already demultiplexed.
    pub fn tag_len(&self) -> Result<usize> {
        let mut lens = self
            .samples
            .iter()
            .flat_map(|s| [s.fwd.len(), s.rev.len()]);
        let first = lens.next().unwrap_or(0);

        if lens.any(|l| l != first) {
            return Err(Error::config("all tags of a pool must have the same length"));
        }

        Ok(first)
    }

    pub fn sample(&self, num: u32) -> Option<&Sample> {
        self.samples.iter().find(|s| s.num == num)
    }

    pub fn used_samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|s| s.used)
    }
}
