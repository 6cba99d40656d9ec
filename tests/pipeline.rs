use amplitag::errors::*;
use amplitag::membership::MembershipFormat;
use amplitag::*;

use std::fs;
use std::path::Path;

const MANIFEST: &str = r#"
run: 2
pool: 3
primers:
  forward: { name: fwd, sequence: ACGTACGT }
  reverse: { name: rev, sequence: TTGGCCAA }
samples:
  - { name: lake_a, group: lake, num: 1, fwd: AAAAAAA, rev: CCCCCCC }
  - { name: lake_b, group: lake, num: 2, fwd: GGGGGGG, rev: TTTTTTT }
"#;

const INSERT: &str = "GATCGATCGATCGATCGATCGATCGATCGA";

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn revcomp(s: &str) -> String {
    amplitag::revcomp(s.as_bytes()).into_iter().map(char::from).collect()
}

/// A merged amplicon on the forward strand.
fn amplicon(fwd_tag: &str, rev_tag: &str, insert: &str) -> String {
    format!("{fwd_tag}ACGTACGT{insert}{}{}", revcomp("TTGGCCAA"), revcomp(rev_tag))
}

fn fastq(records: &[(&str, String, Option<String>)]) -> String {
    records
        .iter()
        .map(|(name, seq, qual)| {
            let qual = qual.clone().unwrap_or_else(|| "I".repeat(seq.len()));
            format!("@{name}\n{seq}\n+\n{qual}\n")
        })
        .collect()
}

/// Raw pairs: three good, one of every other barcode outcome.
fn write_raw(dir: &Path) {
    let tail = format!("ACGTACGT{INSERT}");
    let pairs = [
        ("AAAAAAA", "CCCCCCC"),
        ("GGGGGGG", "TTTTTTT"),
        ("AAAAAAA", "TTTTTTT"),
        ("AAAAAAA", "GGGGGGG"),
        ("AAAAAAA", "ATATATA"),
        ("ATATATA", "ATATATA"),
        ("AAAAAAA", "CCCCCCC"),
    ];

    let names = (0..pairs.len()).map(|i| format!("pair{i}")).collect::<Vec<_>>();
    let r1 = pairs
        .iter()
        .zip(&names)
        .map(|((f, _), n)| (n.as_str(), format!("{f}{tail}"), None))
        .collect::<Vec<_>>();
    let r2 = pairs
        .iter()
        .zip(&names)
        .map(|((_, r), n)| (n.as_str(), format!("{r}{tail}"), None))
        .collect::<Vec<_>>();

    fs::write(dir.join("R1.fastq"), fastq(&r1)).unwrap();
    fs::write(dir.join("R2.fastq"), fastq(&r2)).unwrap();
}

/// Stand-in for the assembler output of the good pairs.
fn write_assembled(out: &Path) {
    let a = amplicon("AAAAAAA", "CCCCCCC", INSERT);
    let b = revcomp(&amplicon("GGGGGGG", "TTTTTTT", INSERT));
    let low = amplicon("AAAAAAA", "CCCCCCC", INSERT);
    let low_qual = format!("{}{}", "I".repeat(20), "#".repeat(low.len() - 20));
    let with_n = amplicon("AAAAAAA", "CCCCCCC", &INSERT.replace("GATC", "GANC"));

    let dir = out.join("good_barcodes");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("assembled.fastq"),
        fastq(&[
            ("m0", a, None),
            ("m1", b, None),
            ("m2", low, Some(low_qual)),
            ("m3", with_n, None),
        ]),
    )
    .unwrap();
}

fn write_config(dir: &Path, extra: &str) -> PipelineConfig {
    fs::write(dir.join("manifest.yaml"), MANIFEST).unwrap();
    let config = format!(
        "manifest: manifest.yaml\nraw_fwd: R1.fastq\nraw_rev: R2.fastq\nout_dir: out\nthreads: 2\nchunk_size: 2\nlength: {{ min_len: 30 }}\n{extra}"
    );
    fs::write(dir.join("config.yaml"), config).unwrap();
    PipelineConfig::from_file(dir.join("config.yaml")).unwrap()
}

#[test]
fn pool_runs_end_to_end() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(dir.path(), "subsample: { size: 5, seed: 5 }\n");
    write_assembled(&config.out_dir);

    let pipeline = PoolPipeline::new(config).unwrap();
    assert_eq!(pipeline.unit(), "run2_pool3");
    let report = pipeline.run().unwrap();
    let loss = &report.loss;

    // every raw pair lands in exactly one outcome
    let outcomes = ReadPairOutcome::ALL
        .iter()
        .map(|o| loss.stage(o.short_name()).unwrap().output)
        .collect::<Vec<_>>();
    assert_eq!(outcomes, vec![3, 1, 1, 1, 1]);
    assert_eq!(outcomes.iter().sum::<usize>(), 7);
    let malformed = loss.stage("classify_pairs/malformed").unwrap();
    assert_eq!((malformed.input, malformed.output), (7, 7));

    let primers = loss.stage("good_barcodes/assembled/good_primers").unwrap();
    assert_eq!((primers.input, primers.output), (4, 4));

    let chain = ["n_filter", "window_quality", "length", "trim"]
        .map(|s| {
            let c = loss.stage(s).unwrap();
            (c.input, c.output)
        });
    assert_eq!(chain, [(4, 3), (3, 2), (2, 2), (2, 2)]);
    assert_eq!(loss.stage("used_samples").unwrap().output, 2);

    let layout = pipeline.layout();
    let renamed = read_corpus(&layout.renamed).unwrap();
    let names = renamed
        .iter()
        .map(|r| String::from_utf8(r.name().to_vec()).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, ["run2_pool3_sample1_read1", "run2_pool3_sample2_read1"]);
    for r in &renamed {
        assert_eq!(r.seq(), INSERT.as_bytes());
    }

    let skipped = report
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::EmptyInput { stage: "assemble", .. }))
        .count();
    assert_eq!(skipped, 4);
    assert!(report.warnings.contains(&Warning::UndersizedSubsample {
        requested: 5,
        available: 2
    }));
    assert_eq!(read_corpus(&layout.subsampled).unwrap().len(), 2);
    assert!(layout.loss_report.exists());
}

#[test]
fn failing_pool_leaves_siblings_alone() {
    init();
    let good = tempfile::tempdir().unwrap();
    write_raw(good.path());
    let config = write_config(good.path(), "");
    write_assembled(&config.out_dir);

    let broken = tempfile::tempdir().unwrap();
    let broken_config = write_config(broken.path(), "");

    let pipelines = [
        PoolPipeline::new(broken_config).unwrap(),
        PoolPipeline::new(config).unwrap(),
    ];
    assert!(!pipelines[1].stages().contains(&Stage::Subsample));

    let results = run_pools(&pipelines, 2);
    match &results[0] {
        Err(Error::StageFailed { stage, unit, .. }) => {
            assert_eq!(*stage, "classify_pairs");
            assert_eq!(unit, "run2_pool3");
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
    assert!(results[1].is_ok());
}

#[test]
fn unassembled_reads_are_oriented_and_classified() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(dir.path(), "");
    write_assembled(&config.out_dir);

    // unassembled output comes as FASTA, one record per pair
    let forward = amplicon("GGGGGGG", "TTTTTTT", INSERT);
    let reverse = revcomp(&amplicon("AAAAAAA", "CCCCCCC", INSERT));
    let shifted = format!("T{}", amplicon("AAAAAAA", "CCCCCCC", INSERT));
    fs::write(
        config.out_dir.join("good_barcodes").join("unassembled.fastq"),
        format!(">u0\n{forward}\n>u1\n{reverse}\n>u2\n{shifted}\n"),
    )
    .unwrap();

    let pipeline = PoolPipeline::new(config).unwrap();
    let report = pipeline.run().unwrap();
    let loss = &report.loss;

    let unassembled = loss.stage("good_barcodes/unassembled").unwrap();
    assert_eq!(unassembled.output, 3);
    assert_eq!(loss.stage("good_barcodes/unassembled/good_primers").unwrap().output, 2);
    assert_eq!(loss.stage("good_barcodes/unassembled/wrong_primers").unwrap().output, 1);
    // the assembled corpus is classified on its own
    assert_eq!(loss.stage("good_barcodes/assembled/good_primers").unwrap().output, 4);

    let al = &pipeline.layout().outcome(ReadPairOutcome::Good).unassembled;
    let flipped = read_corpus(&al.flipped).unwrap();
    assert_eq!(flipped[1].name(), b"u1");
    assert_eq!(flipped[1].seq(), amplicon("AAAAAAA", "CCCCCCC", INSERT).as_bytes());
    assert_eq!(read_corpus(al.primer_group(PrimerOutcome::Good)).unwrap().len(), 2);

    // only assembled good-primer reads reach the quality chain
    assert_eq!(loss.stage("n_filter").unwrap().input, 4);
}

#[test]
fn malformed_assembled_record_is_dropped() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(dir.path(), "");

    let a = amplicon("AAAAAAA", "CCCCCCC", INSERT);
    let b = amplicon("GGGGGGG", "TTTTTTT", INSERT);
    let good = config.out_dir.join("good_barcodes");
    fs::create_dir_all(&good).unwrap();
    fs::write(
        good.join("assembled.fastq"),
        fastq(&[
            ("m0", a.clone(), None),
            ("m1", a, Some("III".to_owned())),
            ("m2", b, None),
        ]),
    )
    .unwrap();

    let report = PoolPipeline::new(config).unwrap().run().unwrap();
    let malformed = report.loss.stage("good_barcodes/assembled/malformed").unwrap();
    assert_eq!((malformed.input, malformed.output), (3, 2));
    assert_eq!(report.loss.stage("good_barcodes/assembled").unwrap().output, 2);
    assert_eq!(report.loss.stage("used_samples").unwrap().output, 2);
}

#[test]
fn empty_raw_input_is_a_warning() {
    init();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("R1.fastq"), "").unwrap();
    fs::write(dir.path().join("R2.fastq"), "").unwrap();
    let config = write_config(dir.path(), "");

    let report = PoolPipeline::new(config).unwrap().run().unwrap();
    assert!(report.warnings.contains(&Warning::EmptyInput {
        stage: "classify_pairs",
        unit: "run2_pool3".to_owned()
    }));
    assert!(report.loss.stages.is_empty());
}

#[cfg(unix)]
#[test]
fn assembler_failure_names_the_unit() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(
        dir.path(),
        "assembler: { program: \"false\", args: [\"{fwd}\", \"{rev}\"] }\n",
    );

    let err = PoolPipeline::new(config).unwrap().run().unwrap_err();
    match err {
        Error::StageFailed { stage, unit, source } => {
            assert_eq!(stage, "assemble");
            assert!(unit.starts_with("run2_pool3/"));
            assert!(matches!(*source, Error::ExternalTool { .. }));
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn clustered_pools_give_a_count_table() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(dir.path(), "");
    write_assembled(&config.out_dir);

    let pipeline = PoolPipeline::new(config).unwrap();
    pipeline.run().unwrap();

    // every read in one cluster, written as "OTU_1 member member ..."
    let script = "printf 'OTU_1' > {output}; grep '^>' {input} | sed 's/^>/ /' | tr -d '\\n' >> {output}";
    let yaml = format!("{{ program: sh, args: [\"-c\", \"{script}\"], format: cluster_lines }}");
    let clusterer: ClustererConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(clusterer.format, MembershipFormat::ClusterLines);

    let out = dir.path().join("clusters");
    let matrix = cluster_pools(&[&pipeline], &clusterer, &out).unwrap();
    assert_eq!(matrix.samples(), ["lake_a", "lake_b"]);
    assert_eq!(matrix.clusters(), ["OTU_1"]);
    assert_eq!(matrix.get("lake_a", "OTU_1"), 1);
    assert_eq!(matrix.total(), 2);

    let back = amplitag::membership::CountMatrix::load(out.join("otu_table.tsv")).unwrap();
    assert_eq!(back.total(), 2);
}

#[cfg(unix)]
#[test]
fn saved_table_merges_reruns_and_drops_lineages() {
    init();
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path());
    let config = write_config(dir.path(), "");
    write_assembled(&config.out_dir);

    let pipeline = PoolPipeline::new(config).unwrap();
    pipeline.run().unwrap();

    // one cluster per read: OTU_1 holds lake_a's read, OTU_2 lake_b's
    let script = "grep '^>' {input} | sed 's/^>//' | nl -w1 -s' ' | sed 's/^/OTU_/' > {output}";
    let taxonomy = dir.path().join("assignments.txt");
    fs::write(&taxonomy, "OTU_1\tBacteria;Proteobacteria\nOTU_2\tBacteria;Cyanobacteria;chloroplast\n").unwrap();

    let mut clusterer = ClustererConfig::new(
        amplitag::external::ExternalTool::new("sh", &["-c", script]),
        MembershipFormat::ClusterLines,
    );
    clusterer.reruns = vec![Rerun {
        original: "lake_a".to_owned(),
        rerun: "lake_b".to_owned(),
    }];
    clusterer.taxonomy = Some(taxonomy);

    let out = dir.path().join("clusters");
    let matrix = cluster_pools(&[&pipeline], &clusterer, &out).unwrap();
    assert_eq!(matrix.samples(), ["lake_a"]);
    assert_eq!(matrix.clusters(), ["OTU_1"]);
    assert_eq!(matrix.total(), 1);

    let saved = amplitag::membership::CountMatrix::load(out.join("otu_table.tsv")).unwrap();
    assert_eq!(saved, matrix);
}
