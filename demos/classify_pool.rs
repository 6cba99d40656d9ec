use amplitag::*;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./pool1/config.yaml".to_owned());

    let config = PipelineConfig::from_file(&config).unwrap_or_else(|e| panic!("{e}"));
    let pipeline = PoolPipeline::new(config).unwrap_or_else(|e| panic!("{e}"));
    let report = pipeline.run().unwrap_or_else(|e| panic!("{e}"));

    println!("{}", report.loss);
    for w in &report.warnings {
        println!("warning: {w}");
    }
}
