//! Staged driver for one pool and a batch runner over several pools.
//!
//! A pool runs a fixed list of [`Stage`]s. Each stage applies to a static
//! set of [`Target`]s which are processed by a bounded set of scoped worker
//! threads. A stage only starts once every target of the previous stage is
//! done, and the first failing target aborts the pool.

use rustc_hash::FxHashMap;
use serde::Serialize;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::barcodes::*;
use crate::bucket::*;
use crate::config::*;
use crate::errors::*;
use crate::fastq::*;
use crate::iter::*;
use crate::manifest::Manifest;
use crate::membership::{CountMatrix, RunRegistry, Taxonomy};
use crate::primers::*;
use crate::quality::*;
use crate::report::*;

/// What a stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Pool,
    Outcome(ReadPairOutcome),
    /// One assembler output of one barcode outcome.
    Assembly(ReadPairOutcome, Assembly),
}

const POOL: &[Target] = &[Target::Pool];
const ALL_OUTCOMES: &[Target] = &[
    Target::Outcome(ReadPairOutcome::Good),
    Target::Outcome(ReadPairOutcome::Bad),
    Target::Outcome(ReadPairOutcome::Same),
    Target::Outcome(ReadPairOutcome::One),
    Target::Outcome(ReadPairOutcome::NoMatch),
];
const ALL_ASSEMBLIES: &[Target] = &[
    Target::Assembly(ReadPairOutcome::Good, Assembly::Assembled),
    Target::Assembly(ReadPairOutcome::Good, Assembly::Unassembled),
    Target::Assembly(ReadPairOutcome::Bad, Assembly::Assembled),
    Target::Assembly(ReadPairOutcome::Bad, Assembly::Unassembled),
    Target::Assembly(ReadPairOutcome::Same, Assembly::Assembled),
    Target::Assembly(ReadPairOutcome::Same, Assembly::Unassembled),
    Target::Assembly(ReadPairOutcome::One, Assembly::Assembled),
    Target::Assembly(ReadPairOutcome::One, Assembly::Unassembled),
    Target::Assembly(ReadPairOutcome::NoMatch, Assembly::Assembled),
    Target::Assembly(ReadPairOutcome::NoMatch, Assembly::Unassembled),
];
const GOOD_OUTCOME: &[Target] = &[Target::Outcome(ReadPairOutcome::Good)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    ClassifyPairs,
    Assemble,
    Reorient,
    ClassifyPrimers,
    QualityFilter,
    Demultiplex,
    Subsample,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::ClassifyPairs,
        Stage::Assemble,
        Stage::Reorient,
        Stage::ClassifyPrimers,
        Stage::QualityFilter,
        Stage::Demultiplex,
        Stage::Subsample,
    ];

    pub fn name(&self) -> &'static str {
        use Stage::*;
        match self {
            ClassifyPairs => "classify_pairs",
            Assemble => "assemble",
            Reorient => "reorient",
            ClassifyPrimers => "classify_primers",
            QualityFilter => "quality_filter",
            Demultiplex => "demultiplex",
            Subsample => "subsample",
        }
    }

    pub fn targets(&self) -> &'static [Target] {
        use Stage::*;
        match self {
            ClassifyPairs => POOL,
            Assemble => ALL_OUTCOMES,
            Reorient | ClassifyPrimers => ALL_ASSEMBLIES,
            QualityFilter | Demultiplex | Subsample => GOOD_OUTCOME,
        }
    }

    /// Every stage in order, without subsampling unless it is configured.
    pub fn plan(config: &PipelineConfig) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| *s != Stage::Subsample || config.subsample.is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub loss: LossReport,
    pub warnings: Vec<Warning>,
}

impl PipelineReport {
    pub fn write_yaml(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::file_io(file.display(), e))?;
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::file_io(dir.display(), e))?;
        }
        std::fs::write(file, yaml).map_err(|e| Error::file_io(file.display(), e))
    }
}

#[derive(Default)]
struct TaskOutput {
    counts: Vec<StageCount>,
    warnings: Vec<Warning>,
}

impl TaskOutput {
    fn skipped(stage: Stage, unit: String) -> Self {
        Self {
            counts: Vec::new(),
            warnings: vec![Warning::EmptyInput {
                stage: stage.name(),
                unit,
            }],
        }
    }
}

/// Values handed from one stage to the next.
#[derive(Default)]
struct RunState {
    pairs: Mutex<FxHashMap<ReadPairOutcome, usize>>,
    barcode_stats: Arc<Mutex<BarcodeStats>>,
    primer_positions: Mutex<FxHashMap<(ReadPairOutcome, Assembly), PrimerPositions>>,
    trimmed: Mutex<Option<TrimmedCorpus>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(usize) + Send + Sync) {
    let n = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&n);
    (n, move |total| c.store(total, Ordering::Relaxed))
}

pub struct PoolPipeline {
    config: PipelineConfig,
    manifest: Manifest,
    layout: PoolLayout,
    index: Arc<BarcodeIndex>,
    matcher: Arc<PrimerMatcher>,
    stages: Vec<Stage>,
}

impl PoolPipeline {
    /// Load the manifest named by the configuration and plan the stages.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let manifest = Manifest::from_file(&config.manifest)?;
        let stages = Stage::plan(&config);
        Self::with_stages(config, manifest, stages)
    }

    pub fn with_stages(config: PipelineConfig, mut manifest: Manifest, stages: Vec<Stage>) -> Result<Self> {
        config.validate()?;
        manifest.validate()?;

        let index = Arc::new(BarcodeIndex::new(&manifest)?);
        let matcher = Arc::new(PrimerMatcher::new(&manifest.primers, index.tag_len())?);
        let layout = config.layout();

        Ok(Self {
            config,
            manifest,
            layout,
            index,
            matcher,
            stages,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn unit(&self) -> String {
        match self.manifest.pool {
            Some(pool) => format!("run{}_pool{}", self.manifest.run, pool),
            None => format!("run{}", self.manifest.run),
        }
    }

    fn target_unit(&self, target: Target) -> String {
        match target {
            Target::Pool => self.unit(),
            Target::Outcome(o) => format!("{}/{}", self.unit(), o.short_name()),
            Target::Assembly(o, a) => format!("{}/{}/{}", self.unit(), o.short_name(), a.short_name()),
        }
    }

    /// Run every stage and write the report next to the outputs.
    pub fn run(&self) -> Result<PipelineReport> {
        let state = RunState::default();
        let mut report = PipelineReport {
            loss: LossReport::new(self.unit()),
            warnings: Vec::new(),
        };

        for &stage in &self.stages {
            log::info!("{}: starting {}", self.unit(), stage.name());

            for output in self.run_stage(stage, &state)? {
                output.counts.into_iter().for_each(|c| report.loss.push(c));
                for w in output.warnings {
                    log::warn!("{}", w);
                    report.warnings.push(w);
                }
            }
        }

        report.write_yaml(&self.layout.loss_report)?;
        log::info!("{}", report.loss);
        Ok(report)
    }

    fn run_stage(&self, stage: Stage, state: &RunState) -> Result<Vec<TaskOutput>> {
        let targets = stage.targets();
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let error = Mutex::new(None);
        let outputs = Mutex::new((0..targets.len()).map(|_| None).collect::<Vec<_>>());
        let workers = self.config.threads.min(targets.len()).max(1);

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(&target) = targets.get(i) else {
                            break;
                        };

                        match self.run_task(stage, target, state) {
                            Ok(output) => lock(&outputs)[i] = Some(output),
                            Err(e) => {
                                stop.store(true, Ordering::Relaxed);
                                lock(&error).get_or_insert(Error::StageFailed {
                                    stage: stage.name(),
                                    unit: self.target_unit(target),
                                    source: Box::new(e),
                                });
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(e);
        }

        Ok(outputs
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .into_iter()
            .flatten()
            .collect())
    }

    fn run_task(&self, stage: Stage, target: Target, state: &RunState) -> Result<TaskOutput> {
        match (stage, target) {
            (Stage::ClassifyPairs, Target::Pool) => self.classify_pairs(state),
            (Stage::Assemble, Target::Outcome(o)) => self.assemble(o, state),
            (Stage::Reorient, Target::Assembly(o, a)) => self.reorient(o, a, state),
            (Stage::ClassifyPrimers, Target::Assembly(o, a)) => self.classify_primers(o, a, state),
            (Stage::QualityFilter, Target::Outcome(o)) => self.quality_filter(o, state),
            (Stage::Demultiplex, Target::Outcome(_)) => self.demultiplex(state),
            (Stage::Subsample, Target::Outcome(_)) => self.subsample(),
            _ => Err(Error::config(format!(
                "stage {} does not apply to {:?}",
                stage.name(),
                target
            ))),
        }
    }

    fn classify_pairs(&self, state: &RunState) -> Result<TaskOutput> {
        let buckets = ReadPairOutcome::ALL
            .iter()
            .map(|&o| {
                let ol = self.layout.outcome(o);
                Bucket::create(
                    o.short_name(),
                    BucketPaths::paired(&ol.fwd, &ol.rev),
                    BucketFormat::Fastq,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let buckets = Arc::new(buckets);
        let (total, count) = counter();

        let raw = iter_fastq2(&self.layout.raw_fwd, &self.layout.raw_rev, self.config.chunk_size)?;
        let malformed = raw.malformed();
        raw.count(count)
            .classify_barcodes(Arc::clone(&self.index), Arc::clone(&state.barcode_stats))
            .collect(Arc::clone(&buckets), |r| r.barcode_outcome.map(|o| o as usize))
            .run_with_threads(self.config.threads)?;

        let total = total.load(Ordering::Relaxed);
        let malformed = malformed.load(Ordering::Relaxed);
        if total == 0 && malformed == 0 {
            return Ok(TaskOutput::skipped(Stage::ClassifyPairs, self.unit()));
        }

        let mut output = TaskOutput::default();
        output.counts.push(StageCount::new(
            format!("{}/malformed", Stage::ClassifyPairs.name()),
            total + malformed,
            total,
        ));
        let mut pairs = lock(&state.pairs);
        let classified = buckets.iter().map(|b| b.count()).sum();
        output.counts.push(StageCount::new(Stage::ClassifyPairs.name(), total, classified));
        for (o, bucket) in ReadPairOutcome::ALL.iter().zip(buckets.iter()) {
            pairs.insert(*o, bucket.count());
            output.counts.push(StageCount::new(o.short_name(), total, bucket.count()));
        }

        for ((o, lo, hi), n) in &lock(&state.barcode_stats).pairs {
            log::debug!("{}: {} pairs tagged {} and {}", o, n, lo, hi);
        }

        Ok(output)
    }

    fn assemble(&self, outcome: ReadPairOutcome, state: &RunState) -> Result<TaskOutput> {
        let ol = self.layout.outcome(outcome);
        let unit = self.target_unit(Target::Outcome(outcome));

        if lock(&state.pairs).get(&outcome).copied().unwrap_or(0) == 0 {
            return Ok(TaskOutput::skipped(Stage::Assemble, unit));
        }

        match &self.config.assembler {
            Some(tool) => {
                let vars = [
                    ("fwd", ol.fwd.to_string_lossy()),
                    ("rev", ol.rev.to_string_lossy()),
                    ("assembled", ol.assembled.input.to_string_lossy()),
                    ("unassembled", ol.unassembled.input.to_string_lossy()),
                ];
                let vars = vars.iter().map(|(k, v)| (*k, v.as_ref())).collect::<Vec<_>>();
                tool.run_expecting(&vars, &[ol.assembled.input.as_path()])?;
            }
            None if ol.assembled.input.exists() => {
                log::info!("{}: using existing {}", unit, ol.assembled.input.display());
            }
            None => return Ok(TaskOutput::skipped(Stage::Assemble, unit)),
        }

        Ok(TaskOutput::default())
    }

    fn reorient(&self, outcome: ReadPairOutcome, assembly: Assembly, state: &RunState) -> Result<TaskOutput> {
        let al = self.layout.outcome(outcome).assembly(assembly);
        if !al.input.exists() {
            return Ok(TaskOutput::skipped(
                Stage::Reorient,
                self.target_unit(Target::Assembly(outcome, assembly)),
            ));
        }

        let bucket = Bucket::create("flipped", BucketPaths::single(&al.flipped), BucketFormat::Auto)?;
        let buckets = Arc::new(vec![bucket]);
        let (kept, count) = counter();

        let reads = iter_fastq1(&al.input, self.config.chunk_size)?;
        let malformed = reads.malformed();
        reads
            .count(count)
            .reorient(Arc::clone(&self.index))
            .collect(Arc::clone(&buckets), |_| Some(0))
            .run()?;

        let pairs = lock(&state.pairs).get(&outcome).copied().unwrap_or(0);
        let kept = kept.load(Ordering::Relaxed);
        let malformed = malformed.load(Ordering::Relaxed);
        let name = format!("{}/{}", outcome.short_name(), assembly.short_name());
        Ok(TaskOutput {
            counts: vec![
                StageCount::new(format!("{name}/malformed"), kept + malformed, kept),
                StageCount::new(name, pairs, kept),
            ],
            warnings: Vec::new(),
        })
    }

    fn classify_primers(
        &self,
        outcome: ReadPairOutcome,
        assembly: Assembly,
        state: &RunState,
    ) -> Result<TaskOutput> {
        let al = self.layout.outcome(outcome).assembly(assembly);
        if !al.flipped.exists() {
            return Ok(TaskOutput::skipped(
                Stage::ClassifyPrimers,
                self.target_unit(Target::Assembly(outcome, assembly)),
            ));
        }

        let buckets = al
            .primer_groups
            .iter()
            .map(|(p, path)| Bucket::create(p.short_name(), BucketPaths::single(path), BucketFormat::Auto))
            .collect::<Result<Vec<_>>>()?;
        let buckets = Arc::new(buckets);
        let positions = Arc::new(Mutex::new(PrimerPositions::default()));
        let (total, count) = counter();

        iter_fastq1(&al.flipped, self.config.chunk_size)?
            .count(count)
            .classify_primers(Arc::clone(&self.matcher), Arc::clone(&positions))
            .collect(Arc::clone(&buckets), |r| r.primer_outcome.map(|p| p as usize))
            .run()?;

        let total = total.load(Ordering::Relaxed);
        let prefix = format!("{}/{}", outcome.short_name(), assembly.short_name());
        let counts = al
            .primer_groups
            .iter()
            .zip(buckets.iter())
            .map(|((p, _), b)| StageCount::new(format!("{}/{}", prefix, p.short_name()), total, b.count()))
            .collect();

        let positions = std::mem::take(&mut *lock(&positions));
        if let Some((pos, n)) = positions.fwd.iter().max_by_key(|(_, n)| **n) {
            log::debug!("{}: forward primer mostly at {} ({} reads)", prefix, pos, n);
        }
        lock(&state.primer_positions).insert((outcome, assembly), positions);

        Ok(TaskOutput {
            counts,
            warnings: Vec::new(),
        })
    }

    fn quality_filter(&self, outcome: ReadPairOutcome, state: &RunState) -> Result<TaskOutput> {
        let ol = self.layout.outcome(outcome);
        let input = ol.assembled.primer_group(PrimerOutcome::Good);
        let unit = self.target_unit(Target::Outcome(outcome));

        let reads = if input.exists() { read_corpus(input)? } else { Vec::new() };
        if reads.is_empty() {
            return Ok(TaskOutput::skipped(Stage::QualityFilter, unit));
        }

        let index = (self.index.tag_len() > 0).then(|| Arc::clone(&self.index));
        let chain = QualityFilterChain::new(
            self.config.quality,
            self.config.length,
            TrimSpec::from_manifest(&self.manifest)?,
        )
        .with_threads(self.config.threads, self.config.chunk_size);

        let (corpus, counts) = chain.run(reads, index)?;
        write_fasta(&self.layout.trimmed, corpus.reads())?;
        *lock(&state.trimmed) = Some(corpus);

        Ok(TaskOutput {
            counts,
            warnings: Vec::new(),
        })
    }

    fn demultiplex(&self, state: &RunState) -> Result<TaskOutput> {
        let Some(corpus) = lock(&state.trimmed).take() else {
            return Ok(TaskOutput::skipped(Stage::Demultiplex, self.unit()));
        };

        let (reads, count) = corpus.demultiplex(&self.manifest)?;
        write_fasta(&self.layout.renamed, &reads)?;

        Ok(TaskOutput {
            counts: vec![count],
            warnings: Vec::new(),
        })
    }

    fn subsample(&self) -> Result<TaskOutput> {
        let (Some(sampler), true) = (self.config.subsample, self.layout.renamed.exists()) else {
            return Ok(TaskOutput::skipped(Stage::Subsample, self.unit()));
        };

        let sub = sampler.sample_file(&self.layout.renamed)?;
        write_fasta(&self.layout.subsampled, &sub.picked)?;

        Ok(TaskOutput {
            counts: vec![StageCount::new(Stage::Subsample.name(), sub.seen, sub.picked.len())],
            warnings: sub.warning.into_iter().collect(),
        })
    }
}

/// Run up to `parallel` pools at a time. A failing pool is logged and does
/// not stop the others. Results are in the order of `pipelines`.
pub fn run_pools(pipelines: &[PoolPipeline], parallel: usize) -> Vec<Result<PipelineReport>> {
    let next = AtomicUsize::new(0);
    let results = Mutex::new((0..pipelines.len()).map(|_| None).collect::<Vec<_>>());
    let workers = parallel.min(pipelines.len()).max(1);

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(p) = pipelines.get(i) else {
                    break;
                };

                let res = p.run();
                if let Err(e) = &res {
                    log::error!("{}: {}", p.unit(), e);
                }
                lock(&results)[i] = Some(res);
            });
        }
    });

    results
        .into_inner()
        .unwrap_or_else(|p| p.into_inner())
        .into_iter()
        .flatten()
        .collect()
}

/// Pool the renamed sequences of several pools, cluster them and count the
/// members of each cluster per sample. Reruns are folded into their original
/// samples and clusters of excluded lineages dropped before the table is saved.
pub fn cluster_pools(
    pipelines: &[&PoolPipeline],
    clusterer: &ClustererConfig,
    out_dir: &Path,
) -> Result<CountMatrix> {
    let registry = RunRegistry::from_manifests(pipelines.iter().map(|p| p.manifest()))?;
    let input = out_dir.join("all_reads.fasta");
    let output = out_dir.join("clusters.txt");

    std::fs::create_dir_all(out_dir).map_err(|e| Error::file_io(out_dir.display(), e))?;
    let mut writer = BufWriter::new(File::create(&input).map_err(|e| Error::file_io(input.display(), e))?);
    for p in pipelines {
        if !p.layout().renamed.exists() {
            log::warn!("{}", Warning::EmptyInput { stage: "cluster", unit: p.unit() });
            continue;
        }
        for read in read_corpus(&p.layout().renamed)? {
            write_fasta_record(&mut writer, read.first()).map_err(|e| Error::file_io(input.display(), e))?;
        }
    }
    writer.flush().map_err(|e| Error::file_io(input.display(), e))?;
    drop(writer);

    let (input_str, output_str) = (input.to_string_lossy(), output.to_string_lossy());
    clusterer.tool.run_expecting(
        &[("input", input_str.as_ref()), ("output", output_str.as_ref())],
        &[output.as_path()],
    )?;

    let mut matrix = clusterer.format.parse_file(&output, &registry)?;
    if !clusterer.reruns.is_empty() {
        matrix = matrix.merge_reruns(&clusterer.rerun_pairs());
    }
    if let Some(file) = &clusterer.taxonomy {
        let taxonomy = Taxonomy::load(file)?;
        matrix = matrix.drop_clusters_by_taxonomy(&taxonomy, &clusterer.excluded_lineages);
    }

    matrix.save(out_dir.join("otu_table.tsv"))?;
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_targets_are_static() {
        assert_eq!(Stage::ClassifyPairs.targets(), &[Target::Pool]);
        assert_eq!(Stage::Assemble.targets().len(), ReadPairOutcome::ALL.len());
        assert_eq!(
            Stage::ClassifyPrimers.targets().len(),
            ReadPairOutcome::ALL.len() * Assembly::ALL.len()
        );
        for o in ReadPairOutcome::ALL {
            for a in Assembly::ALL {
                assert!(Stage::Reorient.targets().contains(&Target::Assembly(o, a)));
            }
        }
        assert_eq!(
            Stage::Demultiplex.targets(),
            &[Target::Outcome(ReadPairOutcome::Good)]
        );
    }

    #[test]
    fn plan_skips_unconfigured_subsampling() {
        let yaml = "{manifest: m, raw_fwd: a, raw_rev: b, out_dir: o}";
        let mut config = PipelineConfig::from_yaml(yaml.as_bytes()).unwrap();
        assert!(!Stage::plan(&config).contains(&Stage::Subsample));

        config.subsample = Some(crate::subsample::Subsampler::new(10, 0));
        assert_eq!(Stage::plan(&config), Stage::ALL.to_vec());
    }
}
