//! Pipeline configuration and the file layout of a pool.
//!
//! ```yaml
//! manifest: pool1/manifest.yaml
//! raw_fwd: pool1/R1.fastq.gz
//! raw_rev: pool1/R2.fastq.gz
//! out_dir: out/pool1
//! threads: 8
//! quality: { window: 10, threshold: 5, policy: reject }
//! length: { read_len_1: 250, read_len_2: 250, max_overlap: 100 }
//! subsample: { size: 5000, seed: 1 }
//! clusterer:
//!   program: usearch
//!   args: ["-cluster_otus", "{input}", "-uparseout", "{output}"]
//!   format: uc
//!   reruns: [{ original: lake_a, rerun: lake_a_bis }]
//!   taxonomy: otus/assignments.txt
//!   excluded_lineages: [Chloroplast, Mitochondria]
//! assembler:
//!   program: pandaseq
//!   args: ["-f", "{fwd}", "-r", "{rev}", "-w", "{assembled}", "-u", "{unassembled}"]
//! ```

use serde::Deserialize;

use std::path::{Path, PathBuf};

use crate::barcodes::ReadPairOutcome;
use crate::errors::*;
use crate::external::ExternalTool;
use crate::membership::MembershipFormat;
use crate::primers::PrimerOutcome;
use crate::quality::{MinLength, QualityWindow};
use crate::subsample::Subsampler;

fn default_threads() -> usize {
    8
}

fn default_chunk_size() -> usize {
    256
}

fn default_excluded_lineages() -> Vec<String> {
    vec!["Chloroplast".to_owned(), "Mitochondria".to_owned()]
}

/// A sample sequenced again in another pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rerun {
    pub original: String,
    pub rerun: String,
}

/// A clustering program, the membership format it writes and the
/// post-processing of the count table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClustererConfig {
    #[serde(flatten)]
    pub tool: ExternalTool,
    pub format: MembershipFormat,
    /// Rows folded into their original sample.
    #[serde(default)]
    pub reruns: Vec<Rerun>,
    /// `cluster<TAB>rank;rank;...` assignments. Without it no cluster is dropped.
    #[serde(default)]
    pub taxonomy: Option<PathBuf>,
    #[serde(default = "default_excluded_lineages")]
    pub excluded_lineages: Vec<String>,
}

impl ClustererConfig {
    pub fn new(tool: ExternalTool, format: MembershipFormat) -> Self {
        Self {
            tool,
            format,
            reruns: Vec::new(),
            taxonomy: None,
            excluded_lineages: default_excluded_lineages(),
        }
    }

    pub fn rerun_pairs(&self) -> Vec<(String, String)> {
        self.reruns
            .iter()
            .map(|r| (r.original.clone(), r.rerun.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.tool.expand(&PoolLayout::CLUSTERER_VARS.map(|v| (v, "")))?;
        for r in &self.reruns {
            if r.original == r.rerun {
                return Err(Error::config(format!("sample {} is listed as its own rerun", r.rerun)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub manifest: PathBuf,
    pub raw_fwd: PathBuf,
    pub raw_rev: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub quality: QualityWindow,
    #[serde(default)]
    pub length: MinLength,
    pub subsample: Option<Subsampler>,
    /// Merges read pairs. Placeholders: `{fwd}`, `{rev}`, `{assembled}`, `{unassembled}`.
    pub assembler: Option<ExternalTool>,
    /// Placeholders: `{input}`, `{output}`.
    pub clusterer: Option<ClustererConfig>,
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        let config: Self = serde_yaml::from_slice(yaml).map_err(|e| Error::Manifest {
            file: "<bytes>".to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. Relative paths are taken relative to the file.
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let bytes = std::fs::read(file).map_err(|e| Error::file_io(file.display(), e))?;
        let mut config: Self = serde_yaml::from_slice(&bytes).map_err(|e| Error::Manifest {
            file: file.display().to_string(),
            source: e,
        })?;

        if let Some(base) = file.parent() {
            for path in [
                &mut config.manifest,
                &mut config.raw_fwd,
                &mut config.raw_rev,
                &mut config.out_dir,
            ] {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
            if let Some(path) = config.clusterer.as_mut().and_then(|c| c.taxonomy.as_mut()) {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::config("threads must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be at least 1"));
        }
        self.quality.validate()?;
        if let Some(tool) = &self.assembler {
            tool.expand(&PoolLayout::ASSEMBLER_VARS.map(|v| (v, "")))?;
        }
        if let Some(c) = &self.clusterer {
            c.validate()?;
        }
        Ok(())
    }

    pub fn layout(&self) -> PoolLayout {
        PoolLayout::new(&self.raw_fwd, &self.raw_rev, &self.out_dir)
    }
}

/// The two kinds of assembler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assembly {
    Assembled,
    Unassembled,
}

impl Assembly {
    pub const ALL: [Assembly; 2] = [Assembly::Assembled, Assembly::Unassembled];

    pub fn short_name(&self) -> &'static str {
        match self {
            Assembly::Assembled => "assembled",
            Assembly::Unassembled => "unassembled",
        }
    }
}

/// Files of one assembler output within a barcode outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyLayout {
    pub assembly: Assembly,
    /// Written by the assembler.
    pub input: PathBuf,
    pub flipped: PathBuf,
    pub primer_groups: Vec<(PrimerOutcome, PathBuf)>,
}

impl AssemblyLayout {
    fn new(dir: &Path, assembly: Assembly) -> Self {
        let (flipped, primers) = match assembly {
            Assembly::Assembled => ("flipped.fastq", dir.join("primers")),
            Assembly::Unassembled => ("unassembled_flipped.fastq", dir.join("unassembled_primers")),
        };

        Self {
            assembly,
            input: dir.join(format!("{}.fastq", assembly.short_name())),
            flipped: dir.join(flipped),
            primer_groups: PrimerOutcome::ALL
                .iter()
                .map(|&p| (p, primers.join(format!("{}.fastq", p.short_name()))))
                .collect(),
        }
    }

    pub fn primer_group(&self, outcome: PrimerOutcome) -> &Path {
        self.primer_groups
            .iter()
            .find(|(p, _)| *p == outcome)
            .map(|(_, path)| path.as_path())
            .unwrap_or_else(|| unreachable!("every primer outcome has a file"))
    }
}

/// Files of one barcode outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeLayout {
    pub outcome: ReadPairOutcome,
    pub dir: PathBuf,
    pub fwd: PathBuf,
    pub rev: PathBuf,
    pub assembled: AssemblyLayout,
    pub unassembled: AssemblyLayout,
}

impl OutcomeLayout {
    fn new(out_dir: &Path, outcome: ReadPairOutcome) -> Self {
        let dir = out_dir.join(outcome.short_name());
        Self {
            outcome,
            fwd: dir.join("fwd.fastq.gz"),
            rev: dir.join("rev.fastq.gz"),
            assembled: AssemblyLayout::new(&dir, Assembly::Assembled),
            unassembled: AssemblyLayout::new(&dir, Assembly::Unassembled),
            dir,
        }
    }

    pub fn assembly(&self, assembly: Assembly) -> &AssemblyLayout {
        match assembly {
            Assembly::Assembled => &self.assembled,
            Assembly::Unassembled => &self.unassembled,
        }
    }
}

/// Every file a pool run reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLayout {
    pub raw_fwd: PathBuf,
    pub raw_rev: PathBuf,
    pub out_dir: PathBuf,
    pub outcomes: Vec<OutcomeLayout>,
    /// Quality filtered and trimmed good-barcode, good-primer sequences.
    pub trimmed: PathBuf,
    pub renamed: PathBuf,
    pub subsampled: PathBuf,
    pub clusters: PathBuf,
    pub count_table: PathBuf,
    pub loss_report: PathBuf,
}

impl PoolLayout {
    pub const ASSEMBLER_VARS: [&'static str; 4] = ["fwd", "rev", "assembled", "unassembled"];
    pub const CLUSTERER_VARS: [&'static str; 2] = ["input", "output"];

    pub fn new(raw_fwd: &Path, raw_rev: &Path, out_dir: &Path) -> Self {
        let outcomes = ReadPairOutcome::ALL
            .iter()
            .map(|&o| OutcomeLayout::new(out_dir, o))
            .collect::<Vec<_>>();
        let quality = out_dir.join(ReadPairOutcome::Good.short_name()).join("quality");

        Self {
            raw_fwd: raw_fwd.to_owned(),
            raw_rev: raw_rev.to_owned(),
            out_dir: out_dir.to_owned(),
            outcomes,
            trimmed: quality.join("trimmed.fasta"),
            renamed: quality.join("renamed.fasta"),
            subsampled: quality.join("subsampled.fasta"),
            clusters: out_dir.join("clusters.txt"),
            count_table: out_dir.join("otu_table.tsv"),
            loss_report: out_dir.join("loss.yaml"),
        }
    }

    pub fn outcome(&self, outcome: ReadPairOutcome) -> &OutcomeLayout {
        self.outcomes
            .iter()
            .find(|o| o.outcome == outcome)
            .unwrap_or_else(|| unreachable!("every barcode outcome has a layout"))
    }
}
