//! Cluster membership parsing and the sample by OTU count matrix.
//!
//! Clustering tools report membership in one of three shapes:
//! - one line per cluster: `cluster_id  member_1  member_2 ...`
//! - UC, one line per read:
//!   `type  cluster  size  pct_id  strand  start  seed  alignment  query  target`
//! - CD-HIT `.clstr`: `>Cluster N` headers followed by
//!   `idx  len, >read_id... *` member lines.
//!
//! Members are identified by their encoded read names, which are resolved
//! to sample names through a [`RunRegistry`].

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::errors::*;
use crate::manifest::Manifest;
use crate::read_id::ReadIdentifier;

/// Sample names of every pool of a batch, keyed the way read names encode them.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    samples: FxHashMap<(u32, Option<u32>, u32), String>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifests<'a>(manifests: impl IntoIterator<Item = &'a Manifest>) -> Result<Self> {
        let mut registry = Self::new();
        for manifest in manifests {
            registry.register(manifest)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, manifest: &Manifest) -> Result<()> {
        for sample in &manifest.samples {
            let key = (manifest.run, manifest.pool, sample.num);
            if let Some(prev) = self.samples.insert(key, sample.name.clone()) {
                return Err(Error::config(format!(
                    "run {} pool {:?} slot {} is registered for both \"{}\" and \"{}\"",
                    manifest.run, manifest.pool, sample.num, prev, sample.name
                )));
            }
        }
        Ok(())
    }

    pub fn resolve(&self, id: &ReadIdentifier) -> Option<&str> {
        self.samples
            .get(&(id.run, id.pool, id.sample))
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipFormat {
    ClusterLines,
    Uc,
    CdHit,
}

/// Tallies membership records. Any undecodable member fails the whole parse.
struct Tally<'a> {
    registry: &'a RunRegistry,
    counts: FxHashMap<(String, String), u64>,
}

impl<'a> Tally<'a> {
    fn add(&mut self, line: usize, cluster: &str, member: &str) -> Result<()> {
        let decode_err = |reason| Error::Decode {
            line,
            id: member.to_owned(),
            reason,
        };
        let id = ReadIdentifier::decode(member).map_err(decode_err)?;
        let sample = self
            .registry
            .resolve(&id)
            .ok_or_else(|| decode_err("no such sample"))?;

        *self
            .counts
            .entry((sample.to_owned(), cluster.to_owned()))
            .or_default() += 1;
        Ok(())
    }
}

impl MembershipFormat {
    /// Parse membership records into a count matrix.
    pub fn parse(&self, reader: impl BufRead, registry: &RunRegistry) -> Result<CountMatrix> {
        let mut tally = Tally {
            registry,
            counts: FxHashMap::default(),
        };
        let mut cluster = None;

        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::BytesIo(Box::new(e)))?;
            let line_num = i + 1;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            match self {
                MembershipFormat::ClusterLines => {
                    let mut fields = line.split_whitespace();
                    let Some(cluster) = fields.next() else {
                        continue;
                    };
                    for member in fields {
                        tally.add(line_num, cluster, member)?;
                    }
                }
                MembershipFormat::Uc => {
                    let fields = line.split('\t').collect::<Vec<_>>();
                    if fields.len() < 10 {
                        return Err(Error::Decode {
                            line: line_num,
                            id: line.to_owned(),
                            reason: "UC record has fewer than 10 fields",
                        });
                    }
                    let (kind, query, target) = (fields[0], fields[8], fields[9]);
                    if kind == "N" || target == "*" {
                        continue;
                    }
                    tally.add(line_num, target, query)?;
                }
                MembershipFormat::CdHit => {
                    if let Some(header) = line.strip_prefix('>') {
                        let num = header.split_whitespace().nth(1).ok_or(Error::Decode {
                            line: line_num,
                            id: line.to_owned(),
                            reason: "cluster header without a number",
                        })?;
                        cluster = Some(format!("OTU_{num}"));
                        continue;
                    }

                    let member = line
                        .split_once('>')
                        .and_then(|(_, rest)| rest.split_once("..."))
                        .map(|(id, _)| id);
                    match (&cluster, member) {
                        (Some(cluster), Some(member)) => tally.add(line_num, cluster, member)?,
                        (None, _) => {
                            return Err(Error::Decode {
                                line: line_num,
                                id: line.to_owned(),
                                reason: "member listed before any cluster header",
                            })
                        }
                        (_, None) => {
                            return Err(Error::Decode {
                                line: line_num,
                                id: line.to_owned(),
                                reason: "member line without a read name",
                            })
                        }
                    }
                }
            }
        }

        Ok(CountMatrix::from_counts(tally.counts))
    }

    pub fn parse_file(&self, file: impl AsRef<Path>, registry: &RunRegistry) -> Result<CountMatrix> {
        let file = file.as_ref();
        let reader = File::open(file).map_err(|e| Error::file_io(file.display(), e))?;
        self.parse(BufReader::new(reader), registry)
    }
}

/// Compare strings with runs of digits ordered by value, so `s2 < s10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        match (a[i].is_ascii_digit(), b[j].is_ascii_digit()) {
            (true, true) => {
                let (a_num, a_len) = parse_number(&a[i..]);
                let (b_num, b_len) = parse_number(&b[j..]);
                match a_num.cmp(&b_num) {
                    Ordering::Equal => {
                        i += a_len;
                        j += b_len;
                    }
                    ord => return ord,
                }
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ord => return ord,
            },
        }
    }

    (a.len() - i).cmp(&(b.len() - j)).then_with(|| a.cmp(b))
}

fn parse_number(bytes: &[u8]) -> (u64, usize) {
    let mut num = 0u64;
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        num = num.saturating_mul(10).saturating_add(u64::from(bytes[i] - b'0'));
        i += 1;
    }
    (num, i)
}

/// Corner cell of the count table header.
pub const TABLE_CORNER: &str = "Sample";

/// Reads per sample (rows) and cluster (columns). Both axes are naturally sorted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountMatrix {
    samples: Vec<String>,
    clusters: Vec<String>,
    counts: Vec<Vec<u64>>,
}

impl CountMatrix {
    /// Build from `(sample, cluster) -> count`. Missing cells are zero.
    pub fn from_counts(counts: FxHashMap<(String, String), u64>) -> Self {
        let mut samples = counts.keys().map(|(s, _)| s.clone()).collect::<Vec<_>>();
        let mut clusters = counts.keys().map(|(_, c)| c.clone()).collect::<Vec<_>>();
        for axis in [&mut samples, &mut clusters] {
            axis.sort_by(|a, b| natural_cmp(a, b));
            axis.dedup();
        }

        let sample_idx = index_of(&samples);
        let cluster_idx = index_of(&clusters);
        let mut matrix = vec![vec![0; clusters.len()]; samples.len()];
        for ((s, c), n) in counts {
            matrix[sample_idx[&s]][cluster_idx[&c]] += n;
        }

        Self {
            samples,
            clusters,
            counts: matrix,
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    pub fn get(&self, sample: &str, cluster: &str) -> u64 {
        let s = self.samples.iter().position(|x| x == sample);
        let c = self.clusters.iter().position(|x| x == cluster);
        match (s, c) {
            (Some(s), Some(c)) => self.counts[s][c],
            _ => 0,
        }
    }

    pub fn row(&self, sample: &str) -> Option<&[u64]> {
        let s = self.samples.iter().position(|x| x == sample)?;
        Some(&self.counts[s])
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Every non-zero `(sample, cluster, count)` cell.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.samples.iter().zip(&self.counts).flat_map(move |(s, row)| {
            self.clusters
                .iter()
                .zip(row)
                .filter(|(_, &n)| n > 0)
                .map(move |(c, &n)| (s.as_str(), c.as_str(), n))
        })
    }

    /// Add each rerun's row to its original sample and drop the rerun row.
    /// A rerun whose original has no row takes over the original's name.
    pub fn merge_reruns(self, reruns: &[(String, String)]) -> Self {
        let renames = reruns
            .iter()
            .map(|(orig, rerun)| (rerun.as_str(), orig.as_str()))
            .collect::<FxHashMap<_, _>>();

        let mut merged = FxHashMap::default();
        for ((s, c), n) in self.into_counts() {
            let s = match renames.get(s.as_str()) {
                Some(orig) => orig.to_string(),
                None => s,
            };
            *merged.entry((s, c)).or_default() += n;
        }

        Self::from_counts(merged)
    }

    /// Remove every cluster for which `drop` returns true.
    pub fn drop_clusters(self, drop: impl Fn(&str) -> bool) -> Self {
        let keep = self
            .clusters
            .iter()
            .map(|c| !drop(c))
            .collect::<Vec<_>>();

        let clusters = self
            .clusters
            .into_iter()
            .zip(&keep)
            .filter_map(|(c, &k)| k.then_some(c))
            .collect();
        let counts = self
            .counts
            .into_iter()
            .map(|row| row.into_iter().zip(&keep).filter_map(|(n, &k)| k.then_some(n)).collect())
            .collect();

        Self {
            samples: self.samples,
            clusters,
            counts,
        }
    }

    /// Remove clusters whose lineage contains any of `excluded`.
    pub fn drop_clusters_by_taxonomy(self, taxonomy: &Taxonomy, excluded: &[String]) -> Self {
        let before = self.clusters.len();
        let res = self.drop_clusters(|c| taxonomy.is_excluded(c, excluded));
        log::info!(
            "dropped {} of {} clusters by taxonomy",
            before - res.clusters.len(),
            before
        );
        res
    }

    fn into_counts(self) -> FxHashMap<(String, String), u64> {
        let mut cells = FxHashMap::default();
        for (s, row) in self.samples.iter().zip(self.counts) {
            for (c, n) in self.clusters.iter().zip(row) {
                cells.insert((s.clone(), c.clone()), n);
            }
        }
        cells
    }

    pub fn write_tsv(&self, writer: &mut impl Write) -> io::Result<()> {
        write!(writer, "{}", TABLE_CORNER)?;
        for c in &self.clusters {
            write!(writer, "\t{}", c)?;
        }
        writeln!(writer)?;

        for (s, row) in self.samples.iter().zip(&self.counts) {
            write!(writer, "{}", s)?;
            for n in row {
                write!(writer, "\t{}", n)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    pub fn parse_tsv(reader: impl BufRead) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);
        let mut lines = reader.lines();

        let header = lines.next().transpose()?.unwrap_or_default();
        let mut header = header.split('\t');
        if header.next() != Some(TABLE_CORNER) {
            return Err(invalid(format!("header must start with {}", TABLE_CORNER)));
        }
        let clusters = header.map(|c| c.to_owned()).collect::<Vec<_>>();

        let mut counts = FxHashMap::default();
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let sample = fields.next().unwrap_or_default().to_owned();
            let row = fields
                .map(|f| f.parse::<u64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| invalid(format!("line {}: {}", i + 2, e)))?;
            if row.len() != clusters.len() {
                return Err(invalid(format!(
                    "line {}: {} counts for {} clusters",
                    i + 2,
                    row.len(),
                    clusters.len()
                )));
            }
            for (c, n) in clusters.iter().zip(row) {
                counts.insert((sample.clone(), c.clone()), n);
            }
        }

        Ok(Self::from_counts(counts))
    }

    pub fn save(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let mut writer = io::BufWriter::new(File::create(file).map_err(|e| Error::file_io(file.display(), e))?);
        self.write_tsv(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::file_io(file.display(), e))
    }

    pub fn load(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let reader = File::open(file).map_err(|e| Error::file_io(file.display(), e))?;
        Self::parse_tsv(BufReader::new(reader)).map_err(|e| Error::file_io(file.display(), e))
    }
}

fn index_of(names: &[String]) -> FxHashMap<String, usize> {
    names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect()
}

/// Lineage assigned to each cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    assignments: FxHashMap<String, Vec<String>>,
}

impl Taxonomy {
    /// Parse `cluster_id<TAB>rank;rank;...` lines.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let mut assignments = FxHashMap::default();

        for line in reader.lines() {
            let line = line.map_err(|e| Error::BytesIo(Box::new(e)))?;
            let Some((cluster, lineage)) = line.split_once('\t') else {
                continue;
            };
            let ranks = lineage
                .split(';')
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .map(|r| r.to_owned())
                .collect();
            assignments.insert(cluster.trim().to_owned(), ranks);
        }

        Ok(Self { assignments })
    }

    pub fn load(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let reader = File::open(file).map_err(|e| Error::file_io(file.display(), e))?;
        Self::parse(BufReader::new(reader))
    }

    pub fn lineage(&self, cluster: &str) -> Option<&[String]> {
        self.assignments.get(cluster).map(|v| v.as_slice())
    }

    /// Whether any rank of the cluster's lineage is in `excluded`, ignoring case.
    pub fn is_excluded(&self, cluster: &str, excluded: &[String]) -> bool {
        let Some(lineage) = self.assignments.get(cluster) else {
            return false;
        };
        let excluded = excluded
            .iter()
            .map(|e| e.to_ascii_lowercase())
            .collect::<FxHashSet<_>>();
        lineage
            .iter()
            .any(|rank| excluded.contains(&rank.to_ascii_lowercase()))
    }
}
