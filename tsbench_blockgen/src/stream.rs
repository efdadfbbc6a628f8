//! Streaming generation: walk a retention window sample by sample and cut a block every flush
//! interval.
//!
//! Unlike [`generate`](crate::generate), which builds every block from a [`BlockSpec`]
//! independently, the streaming generator writes all series through a single
//! [`StreamingBlockWriter`] from the oldest timestamp to the newest.
//!
//! [`BlockSpec`]: crate::BlockSpec

use std::{path::PathBuf, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tsbench_seriesgen::{AppendError, Labels};

use crate::{
    Error, Result,
    spec::{TARGET_LABEL, millis},
    writer::{BlockId, BlockWriter, FlushError},
};

/// Prometheus' default scrape interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

/// Default duration of a streamed block
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Time window and cadence of a streaming run.
///
/// Samples are produced for the inclusive window `[start_time - retention, start_time]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub retention: Duration,
    /// Newest timestamp, in milliseconds since the epoch
    pub start_time: i64,
    pub sample_interval: Duration,
    pub flush_interval: Duration,
}

impl StreamConfig {
    pub fn new(retention: Duration, start_time: i64) -> Self {
        Self {
            retention,
            start_time,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let retention = millis(self.retention);
        let sample = millis(self.sample_interval);
        let flush = millis(self.flush_interval);

        if retention <= 0 {
            return Err(Error::InvalidStreamConfig("retention must be a positive duration"));
        }
        if sample <= 0 {
            return Err(Error::InvalidStreamConfig(
                "sample interval must be a positive duration",
            ));
        }
        if flush <= 0 {
            return Err(Error::InvalidStreamConfig(
                "flush interval must be a positive duration",
            ));
        }
        if flush % sample != 0 {
            return Err(Error::InvalidStreamConfig(
                "flush interval must be a multiple of the sample interval",
            ));
        }
        if retention % flush != 0 {
            return Err(Error::InvalidStreamConfig(
                "retention must be a multiple of the flush interval",
            ));
        }
        Ok(())
    }
}

/// A named value, timestamped by the streaming generator when written
#[derive(Debug, Clone, PartialEq)]
pub struct Val {
    pub labels: Labels,
    pub value: f64,
}

/// Source of values for a streaming run.
pub trait ValProvider: Send + std::fmt::Debug {
    /// Values for one sample interval.
    fn next_vals(&mut self) -> Vec<Val>;
}

/// Produces `metric_count × target_count` uniformly random values per interval.
///
/// Series are named `blockgen_metric_<n>` and carry a [`TARGET_LABEL`] from `0` to
/// `target_count - 1`.
#[derive(Debug)]
pub struct RandomValProvider {
    labels: Vec<Labels>,
    min: f64,
    max: f64,
    rng: StdRng,
}

impl RandomValProvider {
    pub const DEFAULT_MIN: f64 = 0.0;
    pub const DEFAULT_MAX: f64 = 100.0;

    pub fn new(metric_count: usize, target_count: usize, seed: u64) -> Self {
        let labels = (0..metric_count)
            .flat_map(|m| {
                (0..target_count).map(move |t| {
                    Labels::new([
                        ("__name__".to_string(), format!("blockgen_metric_{m}")),
                        (TARGET_LABEL.to_string(), t.to_string()),
                    ])
                })
            })
            .collect();
        Self {
            labels,
            min: Self::DEFAULT_MIN,
            max: Self::DEFAULT_MAX,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restrict values to `[min, max)`. Bounds are swapped if given in reverse.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min.min(max);
        self.max = min.max(max);
        self
    }
}

impl ValProvider for RandomValProvider {
    fn next_vals(&mut self) -> Vec<Val> {
        let span = self.max - self.min;
        self.labels
            .iter()
            .map(|labels| Val {
                labels: labels.clone(),
                value: self.min + self.rng.r#gen::<f64>() * span,
            })
            .collect()
    }
}

/// A [`BlockWriter`] that starts over with a fresh head after every flush.
#[derive(Debug)]
pub struct StreamingBlockWriter {
    inner: BlockWriter,
    written: u64,
}

impl StreamingBlockWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_writer(BlockWriter::new(dir))
    }

    pub fn from_writer(inner: BlockWriter) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write(&mut self, timestamp: i64, val: &Val) -> Result<(), AppendError> {
        self.inner.write(&val.labels, timestamp, val.value)?;
        self.written += 1;
        Ok(())
    }

    /// Write the current head as a block and open a new one.
    ///
    /// The head is replaced even when the flush fails, so a failed flush drops its samples.
    pub fn flush(&mut self) -> Result<BlockId, FlushError> {
        let res = self.inner.flush();
        debug!(written = self.written, ok = res.is_ok(), "streaming flush");
        self.inner.reset_head();
        self.written = 0;
        res
    }
}

/// Run a streaming generation, returning the ids of the written blocks oldest first.
///
/// Steps through `[start_time - retention, start_time]` in sample intervals, writing the values
/// of every provider at each step. A block is flushed whenever a full flush interval has been
/// written, plus once more at the end. This is synchronous and CPU bound; async callers should
/// run it on a blocking thread.
pub fn generate_stream(
    cancel: &CancellationToken,
    config: StreamConfig,
    writer: &mut StreamingBlockWriter,
    providers: &mut [Box<dyn ValProvider>],
) -> Result<Vec<BlockId>> {
    config.validate()?;

    let sample = millis(config.sample_interval);
    let flush = millis(config.flush_interval);
    let max_time = config.start_time;
    let min_time = max_time - millis(config.retention);
    info!(
        min_time,
        max_time,
        sample_interval = ?config.sample_interval,
        flush_interval = ?config.flush_interval,
        providers = providers.len(),
        "starting streaming generation"
    );

    let mut ids = vec![];
    let mut elapsed = 0;
    let mut t = min_time;
    while t <= max_time {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for provider in providers.iter_mut() {
            for val in provider.next_vals() {
                writer
                    .write(t, &val)
                    .map_err(|source| Error::StreamWrite {
                        timestamp: t,
                        source,
                    })?;
            }
        }

        elapsed += sample;
        if elapsed >= flush {
            ids.push(writer.flush()?);
            elapsed = 0;
        }
        t += sample;
    }

    ids.push(writer.flush()?);
    info!(blocks = ids.len(), "streaming generation done");
    Ok(ids)
}
