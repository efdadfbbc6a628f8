//! Named workload profiles that plan a sequence of blocks.
//!
//! A profile turns a max time and a set of external labels into [`BlockSpec`]s, newest block
//! first. Planning is pure: the same inputs always give the same specs.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat};
use tsbench_seriesgen::{Characteristics, GeneratorKind, Labels};

use crate::{
    Error, Result,
    spec::{BLOCK_ALIGNMENT, BlockRange, BlockSpec, SeriesSpec, align_to_grid, block_ranges, millis},
};

/// Label carrying the start of the rollout window a series belongs to
pub const ROLLOUT_LABEL: &str = "next_rollout_time";

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Plans the blocks of a workload.
pub trait Profile: Send + Sync + Debug {
    /// Specs of every block of the workload, newest first. The newest block ends at the end of
    /// the 2h window containing `max_time`.
    fn plan<'a>(
        &'a self,
        max_time: i64,
        external_labels: &'a Labels,
    ) -> Box<dyn Iterator<Item = BlockSpec> + Send + 'a>;
}

/// Shape shared by every series of the built-in profiles: gauges scraped every 15s whose
/// modifier changes every hour.
fn profile_series(apps: usize) -> (usize, GeneratorKind, Characteristics) {
    (
        apps,
        GeneratorKind::Gauge,
        Characteristics {
            jitter: 30_000_000.0,
            scrape_interval: Duration::from_secs(15),
            change_interval: HOUR,
            max: 200_000_000.0,
            min: 10_000_000.0,
        },
    )
}

fn check_ranges(ranges: &[Duration]) -> Result<()> {
    if ranges.is_empty() {
        return Err(Error::EmptyBlockRanges);
    }
    if ranges.iter().any(Duration::is_zero) {
        return Err(Error::InvalidSpec(
            "block durations must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Applications that are redeployed every `rollout_interval`.
///
/// A series only lives for one rollout window and carries the window's start in
/// [`ROLLOUT_LABEL`], so each block holds `apps * metrics_per_app` series for every rollout window
/// touching it. A window crossing a block boundary shows up in both blocks, clipped to each.
#[derive(Debug, Clone)]
pub struct RealisticK8s {
    ranges: Vec<Duration>,
    rollout_interval: Duration,
    apps: usize,
    metrics_per_app: usize,
}

impl RealisticK8s {
    pub fn new(
        ranges: Vec<Duration>,
        rollout_interval: Duration,
        apps: usize,
        metrics_per_app: usize,
    ) -> Result<Self> {
        check_ranges(&ranges)?;
        if millis(rollout_interval) == 0 {
            return Err(Error::InvalidSpec(
                "rollout interval must be at least 1ms".to_string(),
            ));
        }
        Ok(Self {
            ranges,
            rollout_interval,
            apps,
            metrics_per_app,
        })
    }

    fn block(&self, range: BlockRange, first_rollout: i64, external_labels: &Labels) -> BlockSpec {
        let rollout = millis(self.rollout_interval);
        let (targets, kind, characteristics) = profile_series(self.apps);
        let mut spec = BlockSpec::new(range, external_labels.clone());

        // rollout windows are [start, start + rollout - 1], newest first
        let mut start = if first_rollout > range.max_time {
            let behind = (first_rollout - range.max_time + rollout - 1) / rollout;
            first_rollout - behind * rollout
        } else {
            first_rollout
        };
        while start.saturating_add(rollout - 1) >= range.min_time {
            let min_time = start.max(range.min_time);
            let max_time = start.saturating_add(rollout - 1).min(range.max_time);
            let rollout_time = format_millis(start);

            for i in 0..self.metrics_per_app {
                let labels = Labels::new([
                    ("__name__", format!("k8s_app_metric{i}")),
                    (ROLLOUT_LABEL, rollout_time.clone()),
                ]);
                spec.series.push(
                    SeriesSpec::new(labels, kind, characteristics)
                        .with_targets(targets)
                        .with_time_range(min_time, max_time),
                );
            }
            start -= rollout;
        }
        spec
    }
}

impl Profile for RealisticK8s {
    fn plan<'a>(
        &'a self,
        max_time: i64,
        external_labels: &'a Labels,
    ) -> Box<dyn Iterator<Item = BlockSpec> + Send + 'a> {
        let max_time = align_to_grid(max_time, millis(BLOCK_ALIGNMENT));
        let first_rollout = max_time - millis(self.rollout_interval) / 2;
        Box::new(
            block_ranges(max_time, &self.ranges)
                .into_iter()
                .map(move |range| self.block(range, first_rollout, external_labels)),
        )
    }
}

/// Applications that are never redeployed: every block holds the same
/// `apps * metrics_per_app` series over its full range.
#[derive(Debug, Clone)]
pub struct Continuous {
    ranges: Vec<Duration>,
    apps: usize,
    metrics_per_app: usize,
}

impl Continuous {
    pub fn new(ranges: Vec<Duration>, apps: usize, metrics_per_app: usize) -> Result<Self> {
        check_ranges(&ranges)?;
        Ok(Self {
            ranges,
            apps,
            metrics_per_app,
        })
    }
}

impl Profile for Continuous {
    fn plan<'a>(
        &'a self,
        max_time: i64,
        external_labels: &'a Labels,
    ) -> Box<dyn Iterator<Item = BlockSpec> + Send + 'a> {
        let max_time = align_to_grid(max_time, millis(BLOCK_ALIGNMENT));
        Box::new(
            block_ranges(max_time, &self.ranges)
                .into_iter()
                .map(move |range| {
                    let (targets, kind, characteristics) = profile_series(self.apps);
                    let mut spec = BlockSpec::new(range, external_labels.clone());
                    spec.series = (0..self.metrics_per_app)
                        .map(|i| {
                            let labels =
                                Labels::new([("__name__", format!("continuous_app_metric{i}"))]);
                            SeriesSpec::new(labels, kind, characteristics)
                                .with_targets(targets)
                                .with_time_range(range.min_time, range.max_time)
                        })
                        .collect();
                    spec
                }),
        )
    }
}

fn format_millis(t: i64) -> String {
    DateTime::from_timestamp_millis(t)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| t.to_string())
}

/// Profiles by name.
#[derive(Debug, Default, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<dyn Profile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in profiles.
    pub fn with_builtin() -> Result<Self> {
        let h = |n: u32| HOUR * n;
        let d = |n: u32| DAY * n;

        let one_week = vec![h(2), h(2), h(2), h(8), h(8), h(48), h(48), h(48), h(2)];
        let thirty_days = vec![h(2), h(2), h(2), h(8), h(176), h(176), h(176), h(176), h(2)];
        let one_year = vec![
            h(2),
            h(2),
            h(2),
            h(8),
            h(176),
            h(176),
            h(176),
            h(176),
            d(67),
            d(67),
            d(67),
            d(67),
            d(67),
        ];
        let two_days = vec![h(2), h(2), h(2), h(8), h(8), h(8), h(8), h(8), h(2)];

        let mut registry = Self::new();
        registry.register(
            "realistic-k8s-2d-small",
            RealisticK8s::new(two_days, HOUR, 100, 50)?,
        );
        registry.register(
            "realistic-k8s-1w-small",
            RealisticK8s::new(one_week.clone(), HOUR, 100, 50)?,
        );
        registry.register(
            "realistic-k8s-30d-tiny",
            RealisticK8s::new(thirty_days.clone(), HOUR, 1, 5)?,
        );
        registry.register(
            "realistic-k8s-365d-tiny",
            RealisticK8s::new(one_year.clone(), HOUR, 1, 5)?,
        );
        registry.register(
            "continuous-1w-small",
            Continuous::new(one_week.clone(), 100, 100)?,
        );
        registry.register("continuous-30d-tiny", Continuous::new(thirty_days, 1, 5)?);
        registry.register("continuous-365d-tiny", Continuous::new(one_year, 1, 5)?);
        registry.register(
            "continuous-1w-1series-10000apps",
            Continuous::new(one_week, 10_000, 1)?,
        );
        Ok(registry)
    }

    /// Register `profile` under `name`, replacing any profile of the same name.
    pub fn register(&mut self, name: impl Into<String>, profile: impl Profile + 'static) {
        self.profiles.insert(name.into(), Arc::new(profile));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Profile>> {
        self.profiles
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::UnknownProfile {
                name: name.to_string(),
                known: self.names(),
            })
    }

    /// Names of all registered profiles, sorted.
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}
