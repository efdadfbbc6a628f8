//! `tsbench blockgen`: generate blocks from a generator config and optionally ship them.

use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tsbench_blockgen::{GeneratorConfig, generate};

use super::common::{ObjectStoreConfig, WorkerConfig};

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// Path to the YAML generator config
    #[clap(
        long = "config-file",
        env = "TSBENCH_CONFIG_FILE",
        conflicts_with = "config"
    )]
    config_file: Option<PathBuf>,

    /// YAML generator config, as an alternative to `--config-file`
    #[clap(long = "config", env = "TSBENCH_CONFIG")]
    config: Option<String>,

    /// Output directory for generated blocks
    #[clap(
        long = "output-dir",
        visible_alias = "output.dir",
        env = "TSBENCH_OUTPUT_DIR"
    )]
    output_dir: PathBuf,

    #[clap(flatten)]
    workers: WorkerConfig,

    #[clap(flatten)]
    object_store: ObjectStoreConfig,
}

impl Config {
    fn config_content(&self) -> anyhow::Result<String> {
        match (&self.config_file, &self.config) {
            (Some(path), _) => std::fs::read_to_string(path)
                .with_context(|| format!("read config file {}", path.display())),
            (None, Some(content)) => Ok(content.clone()),
            (None, None) => bail!("one of --config-file or --config is required"),
        }
    }
}

pub(crate) async fn command(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let generator = GeneratorConfig::from_yaml(&config.config_content()?)
        .context("load generator config")?;
    info!(
        range_based_blocks = generator.range_based_blocks.len(),
        explicit_blocks = generator.blocks.len(),
        "loaded config"
    );

    let specs = generator.into_block_specs(Utc::now().timestamp_millis())?;
    let syncer = config.object_store.make_syncer()?;

    generate(
        &cancel,
        config.workers.workers(),
        &config.output_dir,
        syncer.as_ref(),
        &specs,
    )
    .await?;
    Ok(())
}
