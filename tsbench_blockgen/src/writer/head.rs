//! In-memory head that accumulates samples until they are written out as a block.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tsbench_seriesgen::{AppendError, Appender, Labels, Sample, SeriesRef};

#[derive(Debug)]
struct MemSeries {
    labels: Labels,
    samples: Vec<Sample>,
}

impl MemSeries {
    fn last_timestamp(&self) -> Option<i64> {
        self.samples.last().map(|s| s.timestamp)
    }
}

#[derive(Debug)]
struct HeadState {
    refs: HashMap<Labels, SeriesRef>,
    series: HashMap<SeriesRef, MemSeries>,
    next_ref: u64,
    min_time: i64,
    max_time: i64,
    num_samples: u64,
    closed: bool,
}

impl Default for HeadState {
    fn default() -> Self {
        Self {
            refs: HashMap::new(),
            series: HashMap::new(),
            next_ref: 0,
            min_time: i64::MAX,
            max_time: i64::MIN,
            num_samples: 0,
            closed: false,
        }
    }
}

impl HeadState {
    fn check_open(&self) -> Result<(), AppendError> {
        if self.closed {
            return Err(AppendError::HeadClosed);
        }
        Ok(())
    }

    fn get_or_create(&mut self, labels: &Labels) -> SeriesRef {
        if let Some(r) = self.refs.get(labels) {
            return *r;
        }
        let r = SeriesRef(self.next_ref);
        self.next_ref += 1;
        self.refs.insert(labels.clone(), r);
        self.series.insert(
            r,
            MemSeries {
                labels: labels.clone(),
                samples: vec![],
            },
        );
        r
    }
}

/// The samples of a closed head, series sorted by labels
#[derive(Debug, Clone, PartialEq)]
pub struct HeadBlock {
    pub series: Vec<(Labels, Vec<Sample>)>,
    pub min_time: i64,
    pub max_time: i64,
    pub num_samples: u64,
}

/// Shared in-memory sample store.
///
/// Series are created as soon as an appender first sees them, samples only become part of the
/// head when the appender commits. Once [`closed`](Head::close) the head rejects every write.
#[derive(Debug, Clone, Default)]
pub struct Head {
    state: Arc<Mutex<HeadState>>,
}

impl Head {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appender(&self) -> HeadAppender {
        HeadAppender {
            state: Arc::clone(&self.state),
            pending: HashMap::new(),
        }
    }

    /// Number of series holding at least one committed sample.
    pub fn num_series(&self) -> usize {
        self.state
            .lock()
            .series
            .values()
            .filter(|s| !s.samples.is_empty())
            .count()
    }

    pub fn num_samples(&self) -> u64 {
        self.state.lock().num_samples
    }

    /// Inclusive range of committed samples, `None` while the head is empty.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        let state = self.state.lock();
        (state.num_samples > 0).then_some((state.min_time, state.max_time))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Close the head and take its contents. Series without samples are dropped.
    pub fn close(&self) -> Result<HeadBlock, AppendError> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.closed = true;
        state.refs.clear();

        let mut series: Vec<_> = state
            .series
            .drain()
            .map(|(_, s)| (s.labels, s.samples))
            .filter(|(_, samples)| !samples.is_empty())
            .collect();
        series.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        Ok(HeadBlock {
            series,
            min_time: state.min_time,
            max_time: state.max_time,
            num_samples: state.num_samples,
        })
    }
}

#[derive(Debug)]
struct PendingSeries {
    last: Option<i64>,
    samples: Vec<Sample>,
}

/// Appender keeping its samples private until [`commit`](Appender::commit).
#[derive(Debug)]
pub struct HeadAppender {
    state: Arc<Mutex<HeadState>>,
    pending: HashMap<SeriesRef, PendingSeries>,
}

impl HeadAppender {
    fn push(
        &mut self,
        series_ref: SeriesRef,
        committed_last: Option<i64>,
        timestamp: i64,
        value: f64,
    ) -> Result<(), AppendError> {
        let pending = self
            .pending
            .entry(series_ref)
            .or_insert_with(|| PendingSeries {
                last: committed_last,
                samples: vec![],
            });
        if let Some(last) = pending.last {
            if timestamp <= last {
                return Err(AppendError::OutOfOrder {
                    series_ref,
                    timestamp,
                    last,
                });
            }
        }
        pending.last = Some(timestamp);
        pending.samples.push(Sample::new(timestamp, value));
        Ok(())
    }

    /// Last committed timestamp of a series, unless this appender already tracks it.
    fn committed_last(&self, series_ref: SeriesRef) -> Result<Option<i64>, AppendError> {
        if self.pending.contains_key(&series_ref) {
            return Ok(None);
        }
        let state = self.state.lock();
        state.check_open()?;
        state
            .series
            .get(&series_ref)
            .map(MemSeries::last_timestamp)
            .ok_or(AppendError::UnknownSeries(series_ref))
    }
}

impl Appender for HeadAppender {
    fn add(&mut self, labels: &Labels, timestamp: i64, value: f64) -> Result<SeriesRef, AppendError> {
        let (series_ref, committed_last) = {
            let mut state = self.state.lock();
            state.check_open()?;
            let r = state.get_or_create(labels);
            let last = state.series.get(&r).and_then(MemSeries::last_timestamp);
            (r, last)
        };
        self.push(series_ref, committed_last, timestamp, value)?;
        Ok(series_ref)
    }

    fn add_fast(
        &mut self,
        series_ref: SeriesRef,
        timestamp: i64,
        value: f64,
    ) -> Result<(), AppendError> {
        let committed_last = self.committed_last(series_ref)?;
        self.push(series_ref, committed_last, timestamp, value)
    }

    fn commit(&mut self) -> Result<(), AppendError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        if let Err(e) = state.check_open() {
            self.pending.clear();
            return Err(e);
        }

        // another appender may have committed to the same series in the meantime
        for (series_ref, pending) in &self.pending {
            let series = state
                .series
                .get(series_ref)
                .ok_or(AppendError::UnknownSeries(*series_ref))?;
            if let (Some(last), Some(first)) = (series.last_timestamp(), pending.samples.first()) {
                if first.timestamp <= last {
                    return Err(AppendError::OutOfOrder {
                        series_ref: *series_ref,
                        timestamp: first.timestamp,
                        last,
                    });
                }
            }
        }

        for (series_ref, pending) in self.pending.drain() {
            let (Some(first), Some(last)) = (pending.samples.first(), pending.samples.last())
            else {
                continue;
            };
            state.min_time = state.min_time.min(first.timestamp);
            state.max_time = state.max_time.max(last.timestamp);
            state.num_samples += pending.samples.len() as u64;
            if let Some(series) = state.series.get_mut(&series_ref) {
                series.samples.extend(pending.samples);
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), AppendError> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(name: &str) -> Labels {
        Labels::new([("__name__", name)])
    }

    #[test]
    fn samples_are_visible_after_commit() {
        let head = Head::new();
        let mut app = head.appender();
        let r = app.add(&labels("a"), 10, 1.0).unwrap();
        app.add_fast(r, 20, 2.0).unwrap();
        app.add(&labels("b"), 5, 3.0).unwrap();
        assert_eq!(head.num_samples(), 0);
        assert_eq!(head.time_range(), None);

        app.commit().unwrap();
        assert_eq!(head.num_series(), 2);
        assert_eq!(head.num_samples(), 3);
        assert_eq!(head.time_range(), Some((5, 20)));

        let block = head.close().unwrap();
        assert_eq!(
            block,
            HeadBlock {
                series: vec![
                    (labels("a"), vec![Sample::new(10, 1.0), Sample::new(20, 2.0)]),
                    (labels("b"), vec![Sample::new(5, 3.0)]),
                ],
                min_time: 5,
                max_time: 20,
                num_samples: 3,
            }
        );
    }

    #[test]
    fn rollback_discards_pending() {
        let head = Head::new();
        let mut app = head.appender();
        app.add(&labels("a"), 10, 1.0).unwrap();
        app.rollback().unwrap();
        app.commit().unwrap();
        assert_eq!(head.num_series(), 0);
        assert_eq!(head.num_samples(), 0);
    }

    #[test]
    fn out_of_order_is_rejected() {
        let head = Head::new();
        let mut app = head.appender();
        let r = app.add(&labels("a"), 10, 1.0).unwrap();
        assert_eq!(
            app.add_fast(r, 10, 1.0).unwrap_err(),
            AppendError::OutOfOrder {
                series_ref: r,
                timestamp: 10,
                last: 10
            }
        );
        app.commit().unwrap();

        // ordering also holds against committed samples of another appender
        let mut other = head.appender();
        assert!(matches!(
            other.add(&labels("a"), 5, 1.0),
            Err(AppendError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn unknown_ref_is_rejected() {
        let head = Head::new();
        let mut app = head.appender();
        assert_eq!(
            app.add_fast(SeriesRef(42), 1, 1.0).unwrap_err(),
            AppendError::UnknownSeries(SeriesRef(42))
        );
    }

    #[test]
    fn closed_head_rejects_writes() {
        let head = Head::new();
        let mut early = head.appender();
        early.add(&labels("a"), 1, 1.0).unwrap();

        let mut app = head.appender();
        app.add(&labels("b"), 1, 1.0).unwrap();
        app.commit().unwrap();
        head.close().unwrap();

        assert!(head.is_closed());
        assert_eq!(early.commit().unwrap_err(), AppendError::HeadClosed);
        assert_eq!(
            app.add(&labels("c"), 2, 1.0).unwrap_err(),
            AppendError::HeadClosed
        );
        assert_eq!(head.close().unwrap_err(), AppendError::HeadClosed);
    }

    #[test]
    fn same_series_from_two_appenders() {
        let head = Head::new();
        let mut a = head.appender();
        let mut b = head.appender();
        let ra = a.add(&labels("x"), 1, 1.0).unwrap();
        let rb = b.add(&labels("x"), 1, 2.0).unwrap();
        assert_eq!(ra, rb);

        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(AppendError::OutOfOrder { .. })));
    }
}
