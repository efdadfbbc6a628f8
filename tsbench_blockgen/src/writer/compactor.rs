//! Writes a closed head out as an immutable block directory.
//!
//! A block directory is named after its [`BlockId`] and holds:
//!
//! * `meta.json`: the [`BlockMeta`],
//! * `index.parquet`: one row per series, `series_id` and the canonical label string,
//! * `chunks.parquet`: one row per sample, `series_id`, `timestamp` and `value`.
//!
//! Everything is written under `<id>.tmp` first and renamed into place once complete, so a
//! directory named after a block id is always a whole block.

use std::{
    fmt::{self, Debug, Display},
    fs::{self, File},
    io::BufWriter,
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray, UInt64Array},
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter, basic::Compression, errors::ParquetError,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tsbench_seriesgen::Labels;
use uuid::Uuid;

use super::head::HeadBlock;

pub const META_FILENAME: &str = "meta.json";
pub const INDEX_FILENAME: &str = "index.parquet";
pub const CHUNKS_FILENAME: &str = "chunks.parquet";

/// Rows per record batch written to `chunks.parquet`
const BATCH_SIZE: usize = 8192;

/// Parquet row group size
const ROW_GROUP_WRITE_SIZE: usize = 1024 * 1024;

// whole batches per row group
const _: () = assert!(ROW_GROUP_WRITE_SIZE % BATCH_SIZE == 0);

/// Identifier of a block, time ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompactError {
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build record batch")]
    Arrow(#[from] ArrowError),

    #[error("write parquet file")]
    Parquet(#[from] ParquetError),

    #[error("encode block meta")]
    Meta(#[from] serde_json::Error),
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> CompactError {
    let path = path.to_path_buf();
    move |source| CompactError::Io {
        action,
        path,
        source,
    }
}

/// Describes a block beyond its samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockDescriptor {
    pub external_labels: Labels,
    pub compaction_level: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    pub num_samples: u64,
    pub num_series: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCompaction {
    pub level: u32,
    pub sources: Vec<BlockId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downsample {
    pub resolution: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThanosMeta {
    pub labels: Labels,
    pub downsample: Downsample,
    pub source: String,
}

/// Contents of `meta.json`. The time range is half-open: `[min_time, max_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub ulid: BlockId,
    pub min_time: i64,
    pub max_time: i64,
    pub stats: BlockStats,
    pub compaction: BlockCompaction,
    pub version: u32,
    pub thanos: ThanosMeta,
}

impl BlockMeta {
    pub const VERSION: u32 = 1;
    pub const SOURCE: &'static str = "blockgen";

    /// Read the meta of the block stored in `block_dir`.
    pub fn read(block_dir: &Path) -> Result<Self, CompactError> {
        let path = block_dir.join(META_FILENAME);
        let data = fs::read(&path).map_err(io_err("read", &path))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Turns a closed head into a block on disk.
pub trait BlockCompactor: Send + Sync + Debug {
    /// Write `block` as a new block covering the half-open `range` into `dir`.
    fn write(
        &self,
        dir: &Path,
        block: &HeadBlock,
        range: Range<i64>,
        descriptor: &BlockDescriptor,
    ) -> Result<BlockId, CompactError>;
}

/// Writes blocks as a pair of parquet files plus `meta.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetCompactor;

impl ParquetCompactor {
    fn index_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("series_id", DataType::UInt64, false),
            Field::new("labels", DataType::Utf8, false),
        ]))
    }

    fn chunks_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("series_id", DataType::UInt64, false),
            Field::new("timestamp", DataType::Int64, false),
            Field::new("value", DataType::Float64, false),
        ]))
    }

    fn writer_props() -> WriterProperties {
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(ROW_GROUP_WRITE_SIZE)
            .build()
    }

    fn write_index(path: &Path, block: &HeadBlock) -> Result<(), CompactError> {
        let schema = Self::index_schema();
        let ids = UInt64Array::from_iter_values(0..block.series.len() as u64);
        let labels = StringArray::from_iter_values(block.series.iter().map(|(l, _)| l.to_string()));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(ids) as ArrayRef, Arc::new(labels)],
        )?;

        let file = File::create(path).map_err(io_err("create", path))?;
        let mut writer =
            ArrowWriter::try_new(BufWriter::new(file), schema, Some(Self::writer_props()))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    fn write_chunks(path: &Path, block: &HeadBlock) -> Result<usize, CompactError> {
        let schema = Self::chunks_schema();
        let file = File::create(path).map_err(io_err("create", path))?;
        let mut writer = ArrowWriter::try_new(
            BufWriter::new(file),
            Arc::clone(&schema),
            Some(Self::writer_props()),
        )?;

        let mut ids = Vec::with_capacity(BATCH_SIZE);
        let mut timestamps = Vec::with_capacity(BATCH_SIZE);
        let mut values = Vec::with_capacity(BATCH_SIZE);
        let mut num_batches = 0;

        let mut flush = |ids: &mut Vec<u64>,
                         timestamps: &mut Vec<i64>,
                         values: &mut Vec<f64>|
         -> Result<(), CompactError> {
            let batch = RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(UInt64Array::from(std::mem::take(ids))) as ArrayRef,
                    Arc::new(Int64Array::from(std::mem::take(timestamps))),
                    Arc::new(Float64Array::from(std::mem::take(values))),
                ],
            )?;
            writer.write(&batch)?;
            num_batches += 1;
            Ok(())
        };

        for (id, (_, samples)) in block.series.iter().enumerate() {
            for sample in samples {
                ids.push(id as u64);
                timestamps.push(sample.timestamp);
                values.push(sample.value);
                if ids.len() == BATCH_SIZE {
                    flush(&mut ids, &mut timestamps, &mut values)?;
                }
            }
        }
        if !ids.is_empty() {
            flush(&mut ids, &mut timestamps, &mut values)?;
        }

        writer.close()?;
        Ok(num_batches)
    }
}

impl BlockCompactor for ParquetCompactor {
    fn write(
        &self,
        dir: &Path,
        block: &HeadBlock,
        range: Range<i64>,
        descriptor: &BlockDescriptor,
    ) -> Result<BlockId, CompactError> {
        let id = BlockId::new();
        let tmp = dir.join(format!("{id}.tmp"));
        let final_dir = dir.join(id.to_string());
        fs::create_dir_all(&tmp).map_err(io_err("create directory", &tmp))?;

        Self::write_index(&tmp.join(INDEX_FILENAME), block)?;
        let num_batches = Self::write_chunks(&tmp.join(CHUNKS_FILENAME), block)?;

        let meta = BlockMeta {
            ulid: id,
            min_time: range.start,
            max_time: range.end,
            stats: BlockStats {
                num_samples: block.num_samples,
                num_series: block.series.len() as u64,
            },
            compaction: BlockCompaction {
                level: descriptor.compaction_level,
                sources: vec![id],
            },
            version: BlockMeta::VERSION,
            thanos: ThanosMeta {
                labels: descriptor.external_labels.clone(),
                downsample: Downsample { resolution: 0 },
                source: BlockMeta::SOURCE.to_string(),
            },
        };
        let meta_path = tmp.join(META_FILENAME);
        fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)
            .map_err(io_err("write", &meta_path))?;

        fs::rename(&tmp, &final_dir).map_err(io_err("rename", &tmp))?;

        debug!(
            %id,
            num_batches,
            num_series = meta.stats.num_series,
            num_samples = meta.stats.num_samples,
            dir = %final_dir.display(),
            "wrote block"
        );
        Ok(id)
    }
}
