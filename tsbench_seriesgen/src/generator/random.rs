use rand::{Rng, rngs::StdRng};

use super::{Characteristics, Cursor, Sample};
use crate::Result;

/// Independent uniform draws from `[min, max + 1)` at every scrape.
#[derive(Debug)]
pub struct RandomGen {
    rng: StdRng,
    characteristics: Characteristics,
    cursor: Cursor,
}

impl RandomGen {
    pub fn new(
        rng: StdRng,
        min_time: i64,
        max_time: i64,
        characteristics: Characteristics,
    ) -> Self {
        Self {
            rng,
            characteristics,
            cursor: Cursor::new(
                min_time,
                max_time,
                characteristics.scrape_interval_ms(),
            ),
        }
    }
}

impl Iterator for RandomGen {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        let timestamp = self.cursor.advance()?;
        let value = self.characteristics.draw(self.rng.r#gen());
        Some(Ok(Sample::new(timestamp, value)))
    }
}
