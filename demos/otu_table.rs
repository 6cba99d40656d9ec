use amplitag::*;

use std::path::PathBuf;

// otu_table <out_dir> <config.yaml>...
//
// Runs every pool, clusters the renamed reads with the clusterer of the first
// configuration that names one and writes the count table. Reruns and
// taxonomy exclusions come from that clusterer's settings.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "./otus".to_owned()));
    let configs = args
        .map(|c| PipelineConfig::from_file(c).unwrap_or_else(|e| panic!("{e}")))
        .collect::<Vec<_>>();

    let clusterer = configs
        .iter()
        .find_map(|c| c.clusterer.clone())
        .unwrap_or_else(|| panic!("no configuration names a clusterer"));

    let pipelines = configs
        .into_iter()
        .map(|c| PoolPipeline::new(c).unwrap_or_else(|e| panic!("{e}")))
        .collect::<Vec<_>>();

    let ok = pipelines
        .iter()
        .zip(run_pools(&pipelines, pipelines.len()))
        .filter_map(|(p, res)| res.ok().map(|_| p))
        .collect::<Vec<_>>();

    let matrix = cluster_pools(&ok, &clusterer, &out_dir).unwrap_or_else(|e| panic!("{e}"));

    println!(
        "{} samples, {} clusters, {} reads",
        matrix.samples().len(),
        matrix.clusters().len(),
        matrix.total()
    );
}
