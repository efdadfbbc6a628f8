//! Generate immutable blocks of synthetic time series.
//!
//! A block is described by a [`BlockSpec`], produced by hand, by a [`GeneratorConfig`] or by a
//! [`Profile`]. [`generate_block`] expands a block spec into concrete series, appends them
//! concurrently into a [`BlockWriter`] and flushes the writer into a block directory.
//! [`generate`] does the same for a whole list of specs and hands every finished block to a
//! [`BlockSyncer`].

use std::{path::Path, time::Instant};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tsbench_seriesgen::{AppendError, AppendSummary, append};

pub mod profile;
pub mod series_set;
pub mod spec;
pub mod stream;
pub mod sync;
pub mod writer;

pub use profile::{Continuous, Profile, ProfileRegistry, RealisticK8s};
pub use series_set::BlockSeriesSet;
pub use spec::{
    BlockRange, BlockSpec, GeneratorConfig, RangeBasedBlocks, SeriesSpec, TARGET_LABEL,
    parse_block_specs, print_blocks,
};
pub use stream::{
    RandomValProvider, StreamConfig, StreamingBlockWriter, Val, ValProvider, generate_stream,
};
pub use sync::{BlockSyncer, NoopSyncer, ObjectStoreSyncer, SyncError};
pub use writer::{BlockId, BlockMeta, BlockWriter, CompactError, FlushError};

/// Which class of failure an [`Error`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed spec, invalid characteristics, empty block ranges or unknown profile, detected
    /// before any I/O
    Configuration,
    /// A generator stopped before the end of its range
    Generation,
    /// Storage rejected a sample
    Append,
    /// Nothing to flush, or the compactor failed
    Flush,
    /// Disk or object store failure outside of the compactor
    Io,
    Cancelled,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid block spec: {0}")]
    InvalidSpec(String),

    #[error("empty block ranges")]
    EmptyBlockRanges,

    #[error("invalid stream config: {0}")]
    InvalidStreamConfig(&'static str),

    #[error("unknown profile {name:?}, known profiles: {}", known.join(", "))]
    UnknownProfile { name: String, known: Vec<String> },

    #[error("parse config")]
    ParseConfig(#[from] serde_yaml::Error),

    #[error("append series")]
    Series(#[from] tsbench_seriesgen::Error),

    #[error("write sample at {timestamp}")]
    StreamWrite {
        timestamp: i64,
        #[source]
        source: AppendError,
    },

    #[error("flush block")]
    Flush(#[from] FlushError),

    #[error("sync block {block}")]
    Sync {
        block: BlockId,
        #[source]
        source: SyncError,
    },

    #[error("{action}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("block writer task failed")]
    Join(#[from] JoinError),

    #[error("generation cancelled")]
    Cancelled,

    #[error("generate block {block}")]
    GenerateBlock {
        block: BlockRange,
        #[source]
        source: Box<Self>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use tsbench_seriesgen::ErrorKind as SeriesKind;

        match self {
            Self::InvalidSpec(_)
            | Self::EmptyBlockRanges
            | Self::InvalidStreamConfig(_)
            | Self::UnknownProfile { .. }
            | Self::ParseConfig(_) => ErrorKind::Configuration,
            Self::Series(e) => match e.kind() {
                SeriesKind::Configuration => ErrorKind::Configuration,
                SeriesKind::Generation => ErrorKind::Generation,
                SeriesKind::Append => ErrorKind::Append,
                SeriesKind::Cancelled => ErrorKind::Cancelled,
                SeriesKind::Internal => ErrorKind::Internal,
            },
            Self::StreamWrite { .. } => ErrorKind::Append,
            Self::Flush(_) => ErrorKind::Flush,
            Self::Sync { .. } | Self::Io { .. } => ErrorKind::Io,
            Self::Join(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::GenerateBlock { source, .. } => source.kind(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Generate one block into `dir`, using `workers` concurrent append workers.
///
/// Fails before writing anything if the block spec is invalid. A block whose series all turn out to
/// be empty fails with [`FlushError::NoSeries`] and leaves no directory behind.
pub async fn generate_block(
    cancel: &CancellationToken,
    workers: usize,
    dir: &Path,
    spec: &BlockSpec,
) -> Result<(BlockId, AppendSummary)> {
    spec.validate()?;

    let mut writer = BlockWriter::new(dir)
        .with_external_labels(spec.external_labels.clone())
        .with_compaction_level(spec.compaction_level);
    let summary = append(cancel, workers, &writer, BlockSeriesSet::new(spec)).await?;

    let id = tokio::task::spawn_blocking(move || writer.flush()).await??;
    Ok((id, summary))
}

/// Generate every block of `specs` in order, syncing each one once it is written.
///
/// Stops at the first failing block. Blocks written before the failure stay on disk.
pub async fn generate(
    cancel: &CancellationToken,
    workers: usize,
    dir: &Path,
    syncer: &dyn BlockSyncer,
    specs: &[BlockSpec],
) -> Result<Vec<BlockId>> {
    info!(
        workers,
        blocks = %print_blocks(specs),
        dir = %dir.display(),
        "scheduled blocks to generate"
    );

    let mut ids = Vec::with_capacity(specs.len());
    for spec in specs {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let block = spec.range();
        info!(%block, series = spec.num_series(), "generating block");
        let start = Instant::now();

        let (id, summary) = generate_block(cancel, workers, dir, spec)
            .await
            .map_err(|e| Error::GenerateBlock {
                block,
                source: Box::new(e),
            })?;
        info!(
            %id,
            %block,
            series = summary.series,
            samples = summary.samples,
            elapsed = ?start.elapsed(),
            "generated block"
        );

        syncer
            .sync(&dir.join(id.to_string()))
            .await
            .map_err(|source| Error::Sync { block: id, source })?;
        ids.push(id);
    }

    info!(count = ids.len(), "all blocks done");
    Ok(ids)
}
