use std::fmt;

use crate::{Labels, SeriesIterator};

/// A label set paired with the generator producing its samples.
///
/// A series is consumed exactly once: whoever takes it apart with [`Series::into_parts`] owns the
/// iterator from then on.
pub struct Series {
    labels: Labels,
    samples: SeriesIterator,
}

impl Series {
    pub fn new(labels: Labels, samples: SeriesIterator) -> Self {
        Self { labels, samples }
    }

    pub fn into_parts(self) -> (Labels, SeriesIterator) {
        (self.labels, self.samples)
    }
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}
