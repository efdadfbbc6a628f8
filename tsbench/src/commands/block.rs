//! `tsbench block plan` and `tsbench block gen`

use std::{
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tsbench_blockgen::{
    NoopSyncer, ProfileRegistry, generate, parse_block_specs, spec::write_block_spec,
};

use super::common::{PastOffsetTime, WorkerConfig, labels_from_flags, parse_label};

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Plan the block specs of a profile and print them to stdout as a YAML stream
    Plan(PlanConfig),

    /// Generate blocks from a YAML stream of block specs read from stdin
    Gen(GenConfig),
}

#[derive(Debug, clap::Parser)]
#[clap(after_help = r#"Example plan with generation:

    tsbench block plan -p realistic-k8s-1w-small --labels 'cluster="one"' --max-time 2019-10-18T00:00:00Z \
        | tsbench block gen --output-dir ./genblocks --workers 20
"#)]
struct PlanConfig {
    /// Name of the profile to plan
    #[clap(short = 'p', long = "profile", env = "TSBENCH_PROFILE")]
    profile: String,

    /// Newest time covered by the plan, RFC3339 or a duration back from now
    #[clap(long = "max-time", env = "TSBENCH_MAX_TIME", default_value = "30m")]
    max_time: PastOffsetTime,

    /// External labels for the block stream, `name="value"` (repeated)
    #[clap(
        long = "labels",
        value_name = "NAME=\"VALUE\"",
        value_parser = parse_label,
        required = true
    )]
    labels: Vec<(String, String)>,
}

#[derive(Debug, clap::Parser)]
struct GenConfig {
    /// Output directory for generated blocks
    #[clap(
        long = "output-dir",
        visible_alias = "output.dir",
        env = "TSBENCH_OUTPUT_DIR"
    )]
    output_dir: PathBuf,

    #[clap(flatten)]
    workers: WorkerConfig,
}

pub(crate) async fn command(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    match config.command {
        Command::Plan(config) => plan(config),
        Command::Gen(config) => gen_blocks(config, cancel).await,
    }
}

fn plan(config: PlanConfig) -> anyhow::Result<()> {
    let registry = ProfileRegistry::with_builtin()?;
    let profile = registry.get(&config.profile)?;
    let external_labels = labels_from_flags(&config.labels);
    let max_time = config.max_time.timestamp_millis();

    let mut out = BufWriter::new(std::io::stdout().lock());
    let mut planned = 0;
    for spec in profile.plan(max_time, &external_labels) {
        write_block_spec(&mut out, &spec)?;
        planned += 1;
    }
    out.flush().context("flush stdout")?;

    info!(profile = %config.profile, max_time, planned, "planned blocks");
    Ok(())
}

async fn gen_blocks(config: GenConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let input = tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
        .await?
        .context("read block specs from stdin")?;
    let specs = parse_block_specs(&input)?;

    let ids = generate(
        &cancel,
        config.workers.workers(),
        &config.output_dir,
        &NoopSyncer,
        &specs,
    )
    .await?;
    for id in ids {
        info!(path = %config.output_dir.join(id.to_string()).display(), "generated block");
    }
    Ok(())
}
