//! Accumulate samples in memory and flush them out as a single block.

use std::{path::PathBuf, sync::Arc};

use tracing::info;
use tsbench_seriesgen::{AppendError, Appendable, Appender, Labels};

mod compactor;
mod head;

pub use compactor::{
    BlockCompaction, BlockCompactor, BlockDescriptor, BlockId, BlockMeta, BlockStats,
    CHUNKS_FILENAME, CompactError, Downsample, INDEX_FILENAME, META_FILENAME, ParquetCompactor,
    ThanosMeta,
};
pub use head::{Head, HeadAppender, HeadBlock};

use crate::spec::DEFAULT_COMPACTION_LEVEL;

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("no series appended")]
    NoSeries,

    #[error("commit pending samples")]
    Commit(#[source] AppendError),

    #[error("block writer already flushed")]
    HeadClosed,

    #[error("newest sample at {max_time} leaves no room for the end of the block range")]
    TimeRangeOverflow { max_time: i64 },

    #[error("write block")]
    Compact(#[from] CompactError),
}

/// Writes exactly one block into a directory.
///
/// Samples arrive either through [`write`](Self::write) or through appenders handed out by the
/// [`Appendable`] impl. [`flush`](Self::flush) closes the head and writes it as a block, after
/// which the writer rejects further samples.
#[derive(Debug)]
pub struct BlockWriter {
    dir: PathBuf,
    head: Head,
    appender: HeadAppender,
    compactor: Arc<dyn BlockCompactor>,
    external_labels: Labels,
    compaction_level: u32,
}

impl BlockWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let head = Head::new();
        let appender = head.appender();
        Self {
            dir: dir.into(),
            head,
            appender,
            compactor: Arc::new(ParquetCompactor),
            external_labels: Labels::default(),
            compaction_level: DEFAULT_COMPACTION_LEVEL,
        }
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn BlockCompactor>) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn with_external_labels(mut self, labels: Labels) -> Self {
        self.external_labels = labels;
        self
    }

    pub fn with_compaction_level(mut self, level: u32) -> Self {
        self.compaction_level = level;
        self
    }

    /// Buffer one sample. It becomes part of the block on [`flush`](Self::flush).
    pub fn write(&mut self, labels: &Labels, timestamp: i64, value: f64) -> Result<(), AppendError> {
        self.appender.add(labels, timestamp, value).map(|_| ())
    }

    /// Write everything committed so far as a block and return its id.
    ///
    /// Fails with [`FlushError::NoSeries`] without touching the disk when nothing was written,
    /// and with [`FlushError::HeadClosed`] when called again after a successful flush.
    pub fn flush(&mut self) -> Result<BlockId, FlushError> {
        if self.head.is_closed() {
            return Err(FlushError::HeadClosed);
        }
        self.appender.commit().map_err(FlushError::Commit)?;

        let Some((min_time, max_time)) = self.head.time_range() else {
            return Err(FlushError::NoSeries);
        };
        // meta ranges are half-open
        let end = max_time
            .checked_add(1)
            .ok_or(FlushError::TimeRangeOverflow { max_time })?;
        let block = self.head.close().map_err(|_| FlushError::HeadClosed)?;
        if block.series.is_empty() {
            return Err(FlushError::NoSeries);
        }

        info!(
            series = block.series.len(),
            samples = block.num_samples,
            min_time,
            max_time,
            dir = %self.dir.display(),
            "flushing head"
        );

        let descriptor = BlockDescriptor {
            external_labels: self.external_labels.clone(),
            compaction_level: self.compaction_level,
        };
        let id = self
            .compactor
            .write(&self.dir, &block, min_time..end, &descriptor)?;
        Ok(id)
    }

    /// Start over with an empty head, dropping anything not yet flushed.
    pub(crate) fn reset_head(&mut self) {
        self.head = Head::new();
        self.appender = self.head.appender();
    }
}

impl Appendable for BlockWriter {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(self.head.appender())
    }
}
