//! Block and series specifications, and the generator config file format.
//!
//! Specs are plain serde types. A stream of [`BlockSpec`]s is a multi-document YAML stream, which
//! is what `block plan` prints and `block gen` reads; a [`GeneratorConfig`] is a single YAML
//! document describing range based blocks and explicit blocks.

use std::{
    collections::HashSet,
    fmt::{self, Display},
    io::Write,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tsbench_seriesgen::{Characteristics, GeneratorKind, Labels, is_valid_label_name};

use crate::{Error, Result};

/// Label added to every expanded series to tell the targets of one [`SeriesSpec`] apart
pub const TARGET_LABEL: &str = "__blockgen_target__";

/// Width of the grid block boundaries are aligned to
pub const BLOCK_ALIGNMENT: Duration = Duration::from_secs(2 * 60 * 60);

/// Compaction level of a freshly written block
pub const DEFAULT_COMPACTION_LEVEL: u32 = 1;

/// One kind of series inside a block, expanded into `targets` concrete series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSpec {
    pub labels: Labels,
    #[serde(default = "default_targets")]
    pub targets: usize,
    #[serde(rename = "type")]
    pub kind: GeneratorKind,
    /// Defaults to the block's min time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_time: Option<i64>,
    /// Defaults to the block's max time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<i64>,
    #[serde(flatten)]
    pub characteristics: Characteristics,
}

fn default_targets() -> usize {
    1
}

impl SeriesSpec {
    pub fn new(labels: Labels, kind: GeneratorKind, characteristics: Characteristics) -> Self {
        Self {
            labels,
            targets: 1,
            kind,
            min_time: None,
            max_time: None,
            characteristics,
        }
    }

    pub fn with_targets(mut self, targets: usize) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_time_range(mut self, min_time: i64, max_time: i64) -> Self {
        self.min_time = Some(min_time);
        self.max_time = Some(max_time);
        self
    }
}

/// Everything needed to generate exactly one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockSpec {
    pub min_time: i64,
    pub max_time: i64,
    #[serde(default = "default_compaction_level")]
    pub compaction_level: u32,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub external_labels: Labels,
    #[serde(default)]
    pub series: Vec<SeriesSpec>,
}

fn default_compaction_level() -> u32 {
    DEFAULT_COMPACTION_LEVEL
}

impl BlockSpec {
    pub fn new(range: BlockRange, external_labels: Labels) -> Self {
        Self {
            min_time: range.min_time,
            max_time: range.max_time,
            compaction_level: DEFAULT_COMPACTION_LEVEL,
            external_labels,
            series: vec![],
        }
    }

    pub fn range(&self) -> BlockRange {
        BlockRange {
            min_time: self.min_time,
            max_time: self.max_time,
        }
    }

    /// Time range of a series of this block, after applying the block's defaults.
    pub fn series_range(&self, series: &SeriesSpec) -> (i64, i64) {
        (
            series.min_time.unwrap_or(self.min_time),
            series.max_time.unwrap_or(self.max_time),
        )
    }

    /// Number of concrete series this block expands to.
    pub fn num_series(&self) -> usize {
        self.series.iter().map(|s| s.targets).sum()
    }

    /// Check every invariant of the block spec without generating anything.
    pub fn validate(&self) -> Result<()> {
        if self.min_time > self.max_time {
            return Err(Error::InvalidSpec(format!(
                "block min time {} is after max time {}",
                self.min_time, self.max_time
            )));
        }
        // block metadata stores the exclusive end, max time + 1
        if self.max_time == i64::MAX {
            return Err(Error::InvalidSpec(format!(
                "block max time must be below {}",
                i64::MAX
            )));
        }
        for label in &self.external_labels {
            if !is_valid_label_name(&label.name) {
                return Err(Error::InvalidSpec(format!(
                    "invalid external label name {:?}",
                    label.name
                )));
            }
        }

        // every target overwrites the target label, so specs differing only there collide
        let mut seen = HashSet::with_capacity(self.series.len());
        for series in &self.series {
            if !seen.insert(series.labels.with_label(TARGET_LABEL, "")) {
                return Err(Error::InvalidSpec(format!(
                    "series {} expands to label sets already produced by another series",
                    series.labels
                )));
            }
            if series.targets == 0 {
                return Err(Error::InvalidSpec(format!(
                    "series {} must have at least one target",
                    series.labels
                )));
            }
            if let Some(label) = series.labels.iter().find(|l| !is_valid_label_name(&l.name)) {
                return Err(Error::InvalidSpec(format!(
                    "series {} has invalid label name {:?}",
                    series.labels, label.name
                )));
            }
            series
                .characteristics
                .validate()
                .map_err(|e| Error::InvalidSpec(format!("series {}: {e}", series.labels)))?;

            let (min_time, max_time) = self.series_range(series);
            if min_time > max_time {
                return Err(Error::InvalidSpec(format!(
                    "series {} min time {min_time} is after max time {max_time}",
                    series.labels
                )));
            }
            if min_time < self.min_time || max_time > self.max_time {
                return Err(Error::InvalidSpec(format!(
                    "series {} range [{min_time}, {max_time}] is outside of block {}",
                    series.labels,
                    self.range()
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive millisecond time range of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub min_time: i64,
    pub max_time: i64,
}

impl Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let span = self.max_time.saturating_sub(self.min_time).max(0) as u64;
        write!(
            f,
            "[{} - {}]({})",
            self.min_time,
            self.max_time,
            humantime::format_duration(Duration::from_millis(span))
        )
    }
}

/// Render block ranges on one line, for logging.
pub fn print_blocks<'a>(blocks: impl IntoIterator<Item = &'a BlockSpec>) -> String {
    blocks
        .into_iter()
        .map(|b| b.range().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// End of the grid window of `width` milliseconds that contains `t`.
pub fn align_to_grid(t: i64, width: i64) -> i64 {
    t.div_euclid(width) * width + width
}

/// Split time ending at `max_time` into contiguous, non-overlapping ranges, newest first.
///
/// Each range is `[max - duration + 1, max]`; the following one ends right before it.
pub fn block_ranges(max_time: i64, durations: &[Duration]) -> Vec<BlockRange> {
    let mut max_time = max_time;
    durations
        .iter()
        .map(|d| {
            let width = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
            let min_time = max_time.saturating_sub(width).saturating_add(1);
            let range = BlockRange { min_time, max_time };
            max_time = min_time.saturating_sub(1);
            range
        })
        .collect()
}

pub(crate) fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn unix_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => millis(d),
        Err(e) => -millis(e.duration()),
    }
}

/// Parse a multi-document YAML stream of block specs. JSON documents are accepted too.
pub fn parse_block_specs(input: &str) -> Result<Vec<BlockSpec>> {
    let mut specs = vec![];
    for doc in serde_yaml::Deserializer::from_str(input) {
        let spec = BlockSpec::deserialize(doc)?;
        spec.validate()?;
        specs.push(spec);
    }
    Ok(specs)
}

/// Write a block spec as one document of a YAML stream.
pub fn write_block_spec<W: Write>(mut w: W, spec: &BlockSpec) -> Result<()> {
    w.write_all(b"---\n").map_err(|source| Error::Io {
        action: "write block spec",
        source,
    })?;
    serde_yaml::to_writer(w, spec)?;
    Ok(())
}

/// A block duration, written as `2h`, `176h` or `67days`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockDuration(#[serde(with = "humantime_serde")] pub Duration);

/// Blocks generated back from a start time, sharing one set of series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RangeBasedBlocks {
    /// Defaults to now. The newest block ends at the end of the 2h window containing it.
    #[serde(default, with = "humantime_serde")]
    pub start_time: Option<SystemTime>,
    /// Durations of the blocks, newest to oldest
    pub blocks: Vec<BlockDuration>,
    #[serde(default)]
    pub series: Vec<SeriesSpec>,
    #[serde(default)]
    pub external_labels: Labels,
}

/// The `blockgen` config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub range_based_blocks: Vec<RangeBasedBlocks>,
    #[serde(default)]
    pub blocks: Vec<BlockSpec>,
}

impl GeneratorConfig {
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Turn the config into the list of blocks to generate: range based blocks first, in
    /// config order and newest first within each entry, then the explicit blocks.
    ///
    /// `now` (milliseconds) stands in for a missing or zero start time.
    pub fn into_block_specs(self, now: i64) -> Result<Vec<BlockSpec>> {
        let width = millis(BLOCK_ALIGNMENT);
        let mut specs = vec![];

        for ranges in self.range_based_blocks {
            if ranges.blocks.is_empty() {
                return Err(Error::EmptyBlockRanges);
            }
            if let Some(d) = ranges.blocks.iter().find(|d| d.0.is_zero()) {
                return Err(Error::InvalidSpec(format!(
                    "block duration must be positive, got {:?}",
                    d.0
                )));
            }

            let start = match ranges.start_time.map(unix_millis) {
                None | Some(0) => now,
                Some(t) => t,
            };
            let durations: Vec<_> = ranges.blocks.iter().map(|d| d.0).collect();
            for range in block_ranges(align_to_grid(start, width), &durations) {
                let mut spec = BlockSpec::new(range, ranges.external_labels.clone());
                spec.series = ranges.series.clone();
                specs.push(spec);
            }
        }
        specs.extend(self.blocks);

        for spec in &specs {
            spec.validate()?;
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    const HOUR: i64 = 3_600_000;

    fn characteristics() -> Characteristics {
        Characteristics {
            jitter: 0.0,
            scrape_interval: Duration::from_secs(15),
            change_interval: Duration::from_secs(3600),
            max: 200.0,
            min: 100.0,
        }
    }

    #[test]
    fn align() {
        assert_eq!(align_to_grid(0, 2 * HOUR), 2 * HOUR);
        assert_eq!(align_to_grid(2 * HOUR - 1, 2 * HOUR), 2 * HOUR);
        assert_eq!(align_to_grid(2 * HOUR, 2 * HOUR), 4 * HOUR);
        assert_eq!(align_to_grid(-1, 2 * HOUR), 0);
    }

    #[test]
    fn contiguous_ranges() {
        let t = 10 * HOUR;
        let ranges = block_ranges(
            t,
            &[Duration::from_secs(7200), Duration::from_secs(7200)],
        );
        assert_eq!(
            ranges,
            vec![
                BlockRange {
                    min_time: t - 2 * HOUR + 1,
                    max_time: t
                },
                BlockRange {
                    min_time: t - 4 * HOUR + 1,
                    max_time: t - 2 * HOUR
                },
            ]
        );
        assert_eq!(ranges[0].to_string(), "[28800001 - 36000000](1h 59m 59s 999ms)");
    }

    #[test]
    fn parse_yaml_stream() {
        let input = r#"
minTime: 0
maxTime: 60000
externalLabels:
  cluster: one
series:
  - labels:
      __name__: m
    targets: 3
    type: GAUGE
    scrapeInterval: 15s
    changeInterval: 1h
    min: 100
    max: 200
---
{"minTime": 60001, "maxTime": 120000, "compactionLevel": 2}
"#;
        let specs = parse_block_specs(input).unwrap();
        assert_eq!(specs.len(), 2);

        let mut expected = BlockSpec::new(
            BlockRange {
                min_time: 0,
                max_time: 60_000,
            },
            Labels::new([("cluster", "one")]),
        );
        expected.series.push(
            SeriesSpec::new(
                Labels::new([("__name__", "m")]),
                GeneratorKind::Gauge,
                characteristics(),
            )
            .with_targets(3),
        );
        assert_eq!(specs[0], expected);
        assert_eq!(specs[0].num_series(), 3);
        assert_eq!(specs[1].compaction_level, 2);
        assert!(specs[1].series.is_empty());
    }

    #[test]
    fn write_then_parse() {
        let mut spec = BlockSpec::new(
            BlockRange {
                min_time: 1,
                max_time: 2 * HOUR,
            },
            Labels::new([("cluster", "one")]),
        );
        spec.series.push(
            SeriesSpec::new(
                Labels::new([("__name__", "m")]),
                GeneratorKind::Counter,
                characteristics(),
            )
            .with_time_range(HOUR, 2 * HOUR),
        );

        let mut out = vec![];
        write_block_spec(&mut out, &spec).unwrap();
        write_block_spec(&mut out, &spec).unwrap();
        let parsed = parse_block_specs(std::str::from_utf8(&out).unwrap()).unwrap();
        assert_eq!(parsed, vec![spec.clone(), spec]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_block_specs("minTime: 0\nmaxTime: 1\nmaxtime: 2\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn invalid_specs() {
        let range = BlockRange {
            min_time: 0,
            max_time: HOUR,
        };
        let series = SeriesSpec::new(
            Labels::new([("__name__", "m")]),
            GeneratorKind::Gauge,
            characteristics(),
        );

        let mut spec = BlockSpec::new(range, Labels::default());
        spec.series.push(series.clone().with_targets(0));
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        spec.series = vec![series.clone().with_time_range(-1, HOUR)];
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        let mut bad = series.clone();
        bad.characteristics.min = 1000.0;
        spec.series = vec![bad];
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        spec.series = vec![series.clone()];
        spec.external_labels = Labels::new([("not-valid", "x")]);
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        let spec = BlockSpec::new(
            BlockRange {
                min_time: 10,
                max_time: 0,
            },
            Labels::default(),
        );
        assert_eq!(spec.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn block_ending_at_max_timestamp_is_invalid() {
        let spec = BlockSpec::new(
            BlockRange {
                min_time: i64::MAX,
                max_time: i64::MAX,
            },
            Labels::default(),
        );
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        let spec = BlockSpec::new(
            BlockRange {
                min_time: 0,
                max_time: i64::MAX - 1,
            },
            Labels::default(),
        );
        spec.validate().unwrap();
    }

    #[test]
    fn colliding_series_are_invalid() {
        let range = BlockRange {
            min_time: 0,
            max_time: HOUR,
        };
        let series = SeriesSpec::new(
            Labels::new([("__name__", "m")]),
            GeneratorKind::Gauge,
            characteristics(),
        );

        let mut spec = BlockSpec::new(range, Labels::default());
        spec.series = vec![series.clone(), series.clone()];
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        // an explicit target label is replaced during expansion, so it does not tell series apart
        let mut targeted = series.clone();
        targeted.labels = targeted.labels.with_label(TARGET_LABEL, "7");
        spec.series = vec![series.clone().with_targets(2), targeted];
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));

        let mut other = series.clone();
        other.labels = other.labels.with_label("job", "b");
        spec.series = vec![series, other];
        spec.validate().unwrap();
    }

    #[derive(Debug)]
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_io() {
        let spec = BlockSpec::new(
            BlockRange {
                min_time: 0,
                max_time: HOUR,
            },
            Labels::default(),
        );
        let err = write_block_spec(BrokenPipe, &spec).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn generator_config() {
        let input = r#"
rangeBasedBlocks:
  - startTime: 1970-01-01T10:30:00Z
    blocks: [2h, 8h]
    externalLabels:
      cluster: one
    series:
      - labels: {__name__: up}
        type: RANDOM
        scrapeInterval: 30s
        min: 0
        max: 1
blocks:
  - minTime: 0
    maxTime: 1000
"#;
        let config = GeneratorConfig::from_yaml(input).unwrap();
        let specs = config.into_block_specs(0).unwrap();
        assert_eq!(
            specs.iter().map(BlockSpec::range).collect::<Vec<_>>(),
            vec![
                BlockRange {
                    min_time: 10 * HOUR + 1,
                    max_time: 12 * HOUR
                },
                BlockRange {
                    min_time: 2 * HOUR + 1,
                    max_time: 10 * HOUR
                },
                BlockRange {
                    min_time: 0,
                    max_time: 1000
                },
            ]
        );
        assert_eq!(specs[0].series.len(), 1);
        assert_eq!(specs[1].external_labels.get("cluster"), Some("one"));
        assert_eq!(
            print_blocks(&specs[..1]),
            "[36000001 - 43200000](1h 59m 59s 999ms)"
        );
    }

    #[test]
    fn generator_config_defaults_start_to_now() {
        let config = GeneratorConfig::from_yaml("rangeBasedBlocks: [{blocks: [2h]}]").unwrap();
        let specs = config.into_block_specs(3 * HOUR).unwrap();
        assert_eq!(specs[0].max_time, 4 * HOUR);
    }

    #[test]
    fn generator_config_empty_ranges() {
        let config = GeneratorConfig::from_yaml("rangeBasedBlocks: [{blocks: []}]").unwrap();
        let err = config.into_block_specs(0).unwrap_err();
        assert!(matches!(err, Error::EmptyBlockRanges));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
