use rand::{SeedableRng, rngs::StdRng};
use tsbench_seriesgen::{Result, Series, series_seed};

use crate::spec::{BlockSpec, TARGET_LABEL};

/// Lazily expands the series of a [`BlockSpec`] into concrete [`Series`].
///
/// Each [`SeriesSpec`](crate::SeriesSpec) yields one series per target, labelled with
/// [`TARGET_LABEL`]. Every series gets its own PRNG, seeded from its full label set and the
/// block's external labels, so the output never depends on the order series are consumed in.
#[derive(Debug)]
pub struct BlockSeriesSet<'a> {
    spec: &'a BlockSpec,
    index: usize,
    target: usize,
    failed: bool,
}

impl<'a> BlockSeriesSet<'a> {
    pub fn new(spec: &'a BlockSpec) -> Self {
        Self {
            spec,
            index: 0,
            target: 0,
            failed: false,
        }
    }
}

impl Iterator for BlockSeriesSet<'_> {
    type Item = Result<Series>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let series = loop {
            let series = self.spec.series.get(self.index)?;
            if self.target < series.targets {
                break series;
            }
            self.index += 1;
            self.target = 0;
        };

        let labels = series
            .labels
            .with_label(TARGET_LABEL, self.target.to_string());
        self.target += 1;

        let rng = StdRng::seed_from_u64(series_seed(&labels, &self.spec.external_labels));
        let (min_time, max_time) = self.spec.series_range(series);
        match series
            .kind
            .create(rng, min_time, max_time, series.characteristics)
        {
            Ok(samples) => Some(Ok(Series::new(labels, samples))),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use tsbench_seriesgen::{Characteristics, GeneratorKind, Labels, Sample};

    use super::*;
    use crate::spec::{BlockRange, SeriesSpec};
    use pretty_assertions::assert_eq;

    fn spec(external: Labels) -> BlockSpec {
        let mut spec = BlockSpec::new(
            BlockRange {
                min_time: 0,
                max_time: 60_000,
            },
            external,
        );
        spec.series.push(
            SeriesSpec::new(
                Labels::new([("__name__", "m")]),
                GeneratorKind::Gauge,
                Characteristics {
                    jitter: 0.0,
                    scrape_interval: Duration::from_secs(15),
                    change_interval: Duration::ZERO,
                    max: 200.0,
                    min: 100.0,
                },
            )
            .with_targets(3),
        );
        spec
    }

    fn expand(spec: &BlockSpec) -> Vec<(Labels, Vec<Sample>)> {
        BlockSeriesSet::new(spec)
            .map(|s| {
                let (labels, samples) = s.unwrap().into_parts();
                (labels, samples.map(|s| s.unwrap()).collect())
            })
            .collect()
    }

    #[test]
    fn targets_expand_into_distinct_series() {
        let series = expand(&spec(Labels::default()));
        assert_eq!(series.len(), 3);

        let targets: Vec<_> = series
            .iter()
            .map(|(l, _)| l.get(TARGET_LABEL).unwrap().to_string())
            .collect();
        assert_eq!(targets, vec!["0", "1", "2"]);

        for (labels, samples) in &series {
            assert_eq!(labels.get("__name__"), Some("m"));
            let ts: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
            assert_eq!(ts, vec![0, 15_000, 30_000, 45_000, 60_000]);
            assert!(samples.iter().all(|s| (100.0..=201.0).contains(&s.value)));
        }

        // independent seeds give independent baselines
        let baselines: HashSet<u64> = series.iter().map(|(_, s)| s[0].value.to_bits()).collect();
        assert_eq!(baselines.len(), 3);
    }

    #[test]
    fn expansion_is_deterministic() {
        let a = expand(&spec(Labels::new([("cluster", "one")])));
        let b = expand(&spec(Labels::new([("cluster", "one")])));
        assert_eq!(a, b);

        let c = expand(&spec(Labels::new([("cluster", "two")])));
        assert_ne!(a, c);
    }

    #[test]
    fn stops_at_invalid_series() {
        let mut spec = spec(Labels::default());
        let mut bad = spec.series[0].clone().with_targets(1);
        bad.characteristics.min = 1000.0;
        spec.series.insert(0, bad);

        let mut set = BlockSeriesSet::new(&spec);
        assert!(set.next().unwrap().is_err());
        assert!(set.next().is_none());
    }

    #[test]
    fn empty_spec() {
        let mut spec = spec(Labels::default());
        spec.series.clear();
        assert_eq!(BlockSeriesSet::new(&spec).count(), 0);
    }
}
