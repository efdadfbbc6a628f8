use rand::{Rng, rngs::StdRng};

use super::{Characteristics, Cursor, Sample};
use crate::Result;

/// A value that hovers around a random baseline.
///
/// The baseline is drawn once from `[min, max + 1)`. Whenever at least `change_interval` has
/// elapsed since the last change, and jitter is non-zero, a new modifier is drawn from
/// `[-jitter/2, jitter/2)` and added to the baseline for every following sample.
#[derive(Debug)]
pub struct GaugeGen {
    rng: StdRng,
    characteristics: Characteristics,
    cursor: Cursor,
    change_interval: i64,
    scrape_interval: i64,

    baseline: Option<f64>,
    modifier: f64,
    elapsed: i64,
}

impl GaugeGen {
    pub fn new(
        rng: StdRng,
        min_time: i64,
        max_time: i64,
        characteristics: Characteristics,
    ) -> Self {
        let scrape_interval = characteristics.scrape_interval_ms();
        Self {
            rng,
            characteristics,
            cursor: Cursor::new(min_time, max_time, scrape_interval),
            change_interval: characteristics.change_interval_ms(),
            scrape_interval,
            baseline: None,
            modifier: 0.0,
            elapsed: 0,
        }
    }
}

impl Iterator for GaugeGen {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let timestamp = self.cursor.advance()?;

        let baseline = match self.baseline {
            Some(v) => v,
            None => {
                let v = self.characteristics.draw(self.rng.r#gen());
                self.baseline = Some(v);
                v
            }
        };

        if self.characteristics.jitter > 0.0 && self.elapsed >= self.change_interval {
            self.modifier = (self.rng.r#gen::<f64>() - 0.5) * self.characteristics.jitter;
            self.elapsed = 0;
        }
        self.elapsed = self.elapsed.saturating_add(self.scrape_interval);

        Some(Ok(Sample::new(timestamp, baseline + self.modifier)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::generator::test_util::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn scenario_timestamps_and_bounds() {
        let samples = collect(GaugeGen::new(
            rng(42),
            0,
            60_000,
            characteristics(100.0, 200.0, 0.0),
        ));
        let ts: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![0, 15_000, 30_000, 45_000, 60_000]);
        for s in &samples {
            assert!((100.0..=201.0).contains(&s.value), "{s:?}");
        }
        // without jitter the value never moves off the baseline
        assert!(samples.iter().all(|s| s.value == samples[0].value));
    }

    #[test]
    fn modifier_changes_after_change_interval() {
        let mut ch = characteristics(0.0, 0.0, 100.0);
        ch.change_interval = Duration::from_secs(60);
        let samples = collect(GaugeGen::new(rng(3), 0, 15_000 * 11, ch));
        // the modifier is redrawn every 4 scrapes
        for window in [&samples[0..4], &samples[4..8], &samples[8..12]] {
            assert!(window.iter().all(|s| s.value == window[0].value));
        }
        assert_ne!(samples[0].value, samples[4].value);
    }

    #[test]
    fn same_seed_same_output() {
        let ch = characteristics(10.0, 1000.0, 50.0);
        let a = collect(GaugeGen::new(rng(7), 0, 3_600_000, ch));
        let b = collect(GaugeGen::new(rng(7), 0, 3_600_000, ch));
        assert_eq!(a, b);
        let c = collect(GaugeGen::new(rng(8), 0, 3_600_000, ch));
        assert_ne!(a, c);
    }

    proptest! {
        #[test_log::test(test)]
        fn prop_gauge_bounded_and_spaced(
            seed in any::<u64>(),
            min in -1e6f64..1e6,
            spread in 0.0f64..1e6,
            jitter in 0.0f64..1e4,
            scrape_secs in 1u64..120,
            change_secs in 0u64..600,
            min_time in -1_000_000i64..1_000_000,
            span in 0i64..10_000_000,
        ) {
            let max = min + spread;
            let ch = Characteristics {
                jitter,
                scrape_interval: Duration::from_secs(scrape_secs),
                change_interval: Duration::from_secs(change_secs),
                max,
                min,
            };
            let samples = collect(GaugeGen::new(rng(seed), min_time, min_time + span, ch));

            let step = scrape_secs as i64 * 1000;
            prop_assert_eq!(samples.len() as i64, span / step + 1);
            prop_assert_eq!(samples[0].timestamp, min_time);
            for pair in samples.windows(2) {
                prop_assert_eq!(pair[1].timestamp - pair[0].timestamp, step);
            }
            // allow for float rounding at the edges
            let eps = 1e-6;
            for s in &samples {
                prop_assert!(s.value >= min - jitter / 2.0 - eps, "{} < {}", s.value, min - jitter / 2.0);
                prop_assert!(s.value <= max + 1.0 + jitter / 2.0 + eps);
            }
        }
    }
}
