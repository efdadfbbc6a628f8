use std::{collections::VecDeque, time::Duration};

use rand::{Rng, rngs::StdRng};

use super::{Characteristics, Cursor, Sample, duration_ms};
use crate::{Error, Result};

/// The window over which a [`CounterGen`] spreads one jittered rate target
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A monotonically non-decreasing counter.
///
/// A base rate is drawn once from `[min, max + 1)`. For every rate window the generator computes a
/// target increase (the base rate plus the current jitter modifier, never below zero) and spreads
/// it over the window's scrapes using random weights normalized by their sum. The resulting
/// samples are buffered and handed out one at a time.
#[derive(Debug)]
pub struct CounterGen {
    rng: StdRng,
    characteristics: Characteristics,
    cursor: Cursor,
    rate_interval: i64,
    change_interval: i64,
    scrape_interval: i64,

    base_rate: Option<f64>,
    modifier: f64,
    elapsed: i64,
    total: f64,
    buffer: VecDeque<Sample>,
    failed: bool,
}

impl CounterGen {
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
            rate_interval: duration_ms(DEFAULT_RATE_INTERVAL),
            change_interval: characteristics.change_interval_ms(),
            scrape_interval,
            base_rate: None,
            modifier: 0.0,
            elapsed: 0,
            total: 0.0,
            buffer: VecDeque::new(),
            failed: false,
        }
    }

    /// Override the rate window.
    pub fn with_rate_interval(mut self, rate_interval: Duration) -> Self {
        self.rate_interval = duration_ms(rate_interval);
        self
    }

    /// Compute the samples of the next rate window into the buffer.
    fn fill_window(&mut self) -> Result<()> {
        let steps = self.rate_interval / self.scrape_interval;
        if steps == 0 {
            return Err(Error::PrematureEnd {
                timestamp: self.cursor.peek().unwrap_or_default(),
                reason: format!(
                    "scrape interval {}ms does not fit into rate interval {}ms",
                    self.scrape_interval, self.rate_interval
                ),
            });
        }

        let base_rate = match self.base_rate {
            Some(v) => v,
            None => {
                let v = self.characteristics.draw(self.rng.r#gen());
                self.base_rate = Some(v);
                v
            }
        };

        if self.characteristics.jitter > 0.0 && self.elapsed >= self.change_interval {
            self.modifier = (self.rng.r#gen::<f64>() - 0.5) * self.characteristics.jitter;
            self.elapsed = 0;
        }
        self.elapsed = self.elapsed.saturating_add(self.rate_interval);

        let target = (base_rate + self.modifier).max(0.0);
        let weights: Vec<f64> = (0..steps).map(|_| self.rng.r#gen()).collect();
        let sum: f64 = weights.iter().sum();

        for w in weights {
            let Some(timestamp) = self.cursor.advance() else {
                break;
            };
            if sum > 0.0 {
                self.total += target * w / sum;
            }
            self.buffer.push_back(Sample::new(timestamp, self.total));
        }
        Ok(())
    }
}

impl Iterator for CounterGen {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() && !self.cursor.is_done() {
            if let Err(e) = self.fill_window() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
