//! Value generators: finite, stateful iterators of timestamped samples following a declared
//! statistical shape.
//!
//! Every generator emits its first sample at `min_time`, advances by the scrape interval and stops
//! once the next timestamp would be past `max_time`. All randomness comes from the single
//! [`StdRng`] handed to the generator, so a generator is fully determined by its seed, its time
//! range and its [`Characteristics`].

use std::time::Duration;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

mod counter;
mod gauge;
mod random;

pub use counter::{CounterGen, DEFAULT_RATE_INTERVAL};
pub use gauge::GaugeGen;
pub use random::RandomGen;

/// A single data point, timestamp in milliseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Type-erased generator, as stored in a [`Series`](crate::Series)
pub type SeriesIterator = Box<dyn Iterator<Item = Result<Sample>> + Send>;

/// The statistical shape of the values a generator produces
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Characteristics {
    /// Amplitude of the random modifier applied on top of the baseline
    #[serde(default)]
    pub jitter: f64,
    /// Distance between two consecutive samples
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    /// How long a drawn modifier stays in effect before a new one is drawn
    #[serde(default, with = "humantime_serde")]
    pub change_interval: Duration,
    pub max: f64,
    pub min: f64,
}

impl Characteristics {
    pub fn validate(&self) -> Result<()> {
        if self.scrape_interval < Duration::from_millis(1) {
            return Err(Error::InvalidCharacteristics(format!(
                "scrape interval must be at least 1ms, got {:?}",
                self.scrape_interval
            )));
        }
        if i64::try_from(self.scrape_interval.as_millis()).is_err()
            || i64::try_from(self.change_interval.as_millis()).is_err()
        {
            return Err(Error::InvalidCharacteristics(
                "interval does not fit in a millisecond timestamp".to_string(),
            ));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::InvalidCharacteristics(format!(
                "min and max must be finite, got min {} max {}",
                self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(Error::InvalidCharacteristics(format!(
                "min {} is greater than max {}",
                self.min, self.max
            )));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(Error::InvalidCharacteristics(format!(
                "jitter must be a non-negative number, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    pub(crate) fn scrape_interval_ms(&self) -> i64 {
        duration_ms(self.scrape_interval).max(1)
    }

    pub(crate) fn change_interval_ms(&self) -> i64 {
        duration_ms(self.change_interval)
    }

    /// Draw a value in `[min, max + 1)`.
    pub(crate) fn draw(&self, r: f64) -> f64 {
        self.min + r * ((self.max - self.min) + 1.0)
    }
}

/// The kind of generator a series is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeneratorKind {
    Gauge,
    Counter,
    Random,
}

impl GeneratorKind {
    /// Build a generator of this kind, after validating its inputs.
    pub fn create(
        self,
        rng: StdRng,
        min_time: i64,
        max_time: i64,
        characteristics: Characteristics,
    ) -> Result<SeriesIterator> {
        characteristics.validate()?;
        if min_time > max_time {
            return Err(Error::InvalidTimeRange { min_time, max_time });
        }

        Ok(match self {
            Self::Gauge => Box::new(GaugeGen::new(rng, min_time, max_time, characteristics)),
            Self::Counter => Box::new(CounterGen::new(rng, min_time, max_time, characteristics)),
            Self::Random => Box::new(RandomGen::new(rng, min_time, max_time, characteristics)),
        })
    }
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Walks `[min_time, max_time]` in fixed steps.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    next: Option<i64>,
    max_time: i64,
    step: i64,
}

impl Cursor {
    pub(crate) fn new(min_time: i64, max_time: i64, step: i64) -> Self {
        Self {
            next: (min_time <= max_time).then_some(min_time),
            max_time,
            step: step.max(1),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.next.is_none()
    }

    pub(crate) fn peek(&self) -> Option<i64> {
        self.next
    }

    /// Return the current timestamp and move to the next one.
    pub(crate) fn advance(&mut self) -> Option<i64> {
        let t = self.next?;
        self.next = t
            .checked_add(self.step)
            .filter(|next| *next <= self.max_time);
        Some(t)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use rand::SeedableRng;

    use super::*;

    pub(crate) fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    pub(crate) fn characteristics(min: f64, max: f64, jitter: f64) -> Characteristics {
        Characteristics {
            jitter,
            scrape_interval: Duration::from_secs(15),
            change_interval: Duration::from_secs(60),
            max,
            min,
        }
    }

    pub(crate) fn collect(it: impl Iterator<Item = Result<Sample>>) -> Vec<Sample> {
        it.collect::<Result<Vec<_>>>().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::{test_util::*, *};
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn cursor_walks_inclusive_range() {
        let mut cursor = Cursor::new(0, 60_000, 15_000);
        let mut seen = vec![];
        while let Some(t) = cursor.advance() {
            seen.push(t);
        }
        assert_eq!(seen, vec![0, 15_000, 30_000, 45_000, 60_000]);
        assert!(cursor.is_done());
    }

    #[test]
    fn cursor_stops_on_overflow() {
        let mut cursor = Cursor::new(i64::MAX - 1, i64::MAX, 10);
        assert_eq!(cursor.advance(), Some(i64::MAX - 1));
        assert_eq!(cursor.advance(), None);
    }

    #[test]
    fn cursor_empty_range() {
        let mut cursor = Cursor::new(10, 9, 1);
        assert_eq!(cursor.peek(), None);
        assert_eq!(cursor.advance(), None);
    }

    #[test]
    fn characteristics_from_yaml_shape() {
        let ch: Characteristics = serde_json::from_str(
            r#"{"jitter": 5, "scrapeInterval": "15s", "changeInterval": "1h", "max": 10, "min": 1}"#,
        )
        .unwrap();
        assert_eq!(
            ch,
            Characteristics {
                jitter: 5.0,
                scrape_interval: Duration::from_secs(15),
                change_interval: Duration::from_secs(3600),
                max: 10.0,
                min: 1.0,
            }
        );

        let ch: Characteristics =
            serde_json::from_str(r#"{"scrapeInterval": "30s", "max": 1, "min": 0}"#).unwrap();
        assert_eq!(ch.jitter, 0.0);
        assert_eq!(ch.change_interval, Duration::ZERO);
    }

    #[test]
    fn invalid_characteristics() {
        let mut ch = characteristics(10.0, 1.0, 0.0);
        assert_eq!(ch.validate().unwrap_err().kind(), ErrorKind::Configuration);

        ch = characteristics(1.0, 10.0, -1.0);
        assert!(ch.validate().is_err());

        ch = characteristics(1.0, 10.0, 0.0);
        ch.scrape_interval = Duration::ZERO;
        assert!(ch.validate().is_err());

        ch = characteristics(f64::NAN, 10.0, 0.0);
        assert!(ch.validate().is_err());
    }

    #[test]
    fn create_rejects_inverted_range() {
        let err = GeneratorKind::Gauge
            .create(rng(1), 10, 0, characteristics(1.0, 2.0, 0.0))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::InvalidTimeRange {
                min_time: 10,
                max_time: 0
            }
        ));
    }

    #[test]
    fn create_single_sample_range() {
        for kind in [
            GeneratorKind::Gauge,
            GeneratorKind::Counter,
            GeneratorKind::Random,
        ] {
            let samples = collect(
                kind.create(rng(1), 5, 5, characteristics(1.0, 2.0, 0.0))
                    .unwrap(),
            );
            assert_eq!(samples.len(), 1, "{kind:?}");
            assert_eq!(samples[0].timestamp, 5);
        }
    }

    #[test]
    fn kind_serde_names() {
        let kinds: Vec<GeneratorKind> =
            serde_json::from_str(r#"["GAUGE", "COUNTER", "RANDOM"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![
                GeneratorKind::Gauge,
                GeneratorKind::Counter,
                GeneratorKind::Random
            ]
        );
    }
}
