//! `tsbench stream`: write random series over a retention window, cutting a block every flush
//! interval.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tsbench_blockgen::{
    RandomValProvider, StreamConfig, StreamingBlockWriter, ValProvider, generate_stream,
};

use super::common::{ObjectStoreConfig, PastOffsetTime};

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// Output directory for generated blocks
    #[clap(
        long = "output-dir",
        visible_alias = "output.dir",
        env = "TSBENCH_OUTPUT_DIR"
    )]
    output_dir: PathBuf,

    /// How far back from the start time to generate samples
    #[clap(long = "retention", env = "TSBENCH_RETENTION", value_parser = humantime::parse_duration)]
    retention: Duration,

    /// Newest sample time, RFC3339 or a duration back from now
    #[clap(long = "start-time", env = "TSBENCH_START_TIME", default_value = "0s")]
    start_time: PastOffsetTime,

    /// Interval between two samples of a series
    #[clap(
        long = "sample-interval",
        env = "TSBENCH_SAMPLE_INTERVAL",
        default_value = "15s",
        value_parser = humantime::parse_duration
    )]
    sample_interval: Duration,

    /// Duration covered by each block
    #[clap(
        long = "flush-interval",
        env = "TSBENCH_FLUSH_INTERVAL",
        default_value = "2h",
        value_parser = humantime::parse_duration
    )]
    flush_interval: Duration,

    /// Number of metric names
    #[clap(long = "metrics", env = "TSBENCH_METRICS", default_value_t = 10)]
    metrics: usize,

    /// Number of targets exposing every metric
    #[clap(long = "targets", env = "TSBENCH_TARGETS", default_value_t = 10)]
    targets: usize,

    /// Seed of the value generator
    #[clap(long = "seed", env = "TSBENCH_SEED", default_value_t = 0)]
    seed: u64,

    #[clap(flatten)]
    object_store: ObjectStoreConfig,
}

pub(crate) async fn command(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let stream_config = StreamConfig::new(config.retention, config.start_time.timestamp_millis())
        .with_sample_interval(config.sample_interval)
        .with_flush_interval(config.flush_interval);
    stream_config.validate()?;
    let syncer = config.object_store.make_syncer()?;

    let dir = config.output_dir.clone();
    let providers: Vec<Box<dyn ValProvider>> = vec![Box::new(RandomValProvider::new(
        config.metrics,
        config.targets,
        config.seed,
    ))];
    info!(
        metrics = config.metrics,
        targets = config.targets,
        seed = config.seed,
        "streaming random series"
    );

    let ids = tokio::task::spawn_blocking(move || {
        let mut writer = StreamingBlockWriter::new(dir);
        let mut providers = providers;
        generate_stream(&cancel, stream_config, &mut writer, &mut providers)
    })
    .await
    .context("streaming task failed")??;

    for id in &ids {
        let block_dir = config.output_dir.join(id.to_string());
        syncer
            .sync(&block_dir)
            .await
            .with_context(|| format!("sync block {id}"))?;
    }
    info!(blocks = ids.len(), "stream done");
    Ok(())
}
