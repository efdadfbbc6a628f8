//! The storage contract and the concurrent append engine.
//!
//! [`append`] drains a set of [`Series`] into an [`Appendable`] using a fixed pool of worker tasks.
//! Each worker owns exactly one [`Appender`], which it commits once when there is no work left.
//! The first failing worker rolls back its own appender and cancels the rest. Appenders that
//! already committed keep their data: a failed append is not transactional across workers.

use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Labels, Result, Series};

/// Opaque handle to a series inside an [`Appender`], returned by [`Appender::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesRef(pub u64);

impl Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppendError {
    #[error("out of order sample for series {series_ref}: timestamp {timestamp} is not after {last}")]
    OutOfOrder {
        series_ref: SeriesRef,
        timestamp: i64,
        last: i64,
    },

    #[error("unknown series reference {0}")]
    UnknownSeries(SeriesRef),

    #[error("head is closed")]
    HeadClosed,

    #[error("sample rejected: {0}")]
    Rejected(String),
}

/// A batch of writes against storage.
///
/// Samples added through an appender become visible only on [`commit`](Appender::commit);
/// [`rollback`](Appender::rollback) discards everything added since the last commit.
pub trait Appender: Send + Debug {
    /// Add a sample to the series identified by `labels`, creating it if needed.
    fn add(&mut self, labels: &Labels, timestamp: i64, value: f64)
    -> Result<SeriesRef, AppendError>;

    /// Add a sample to a series previously returned by [`add`](Appender::add).
    fn add_fast(
        &mut self,
        series_ref: SeriesRef,
        timestamp: i64,
        value: f64,
    ) -> Result<(), AppendError>;

    fn commit(&mut self) -> Result<(), AppendError>;

    fn rollback(&mut self) -> Result<(), AppendError>;
}

/// Anything that hands out [`Appender`]s
pub trait Appendable: Send + Sync + Debug {
    fn appender(&self) -> Box<dyn Appender>;
}

/// What a successful [`append`] wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub series: u64,
    pub samples: u64,
}

impl AppendSummary {
    pub fn merge(&mut self, other: Self) {
        self.series += other.series;
        self.samples += other.samples;
    }
}

/// Append every series of `series` to `appendable` using `workers` concurrent tasks.
///
/// The producer reserves a slot in the hand-off channel before pulling the next series out of
/// `series`, so no more than `workers + 1` series are materialized at any time. Intra-series
/// sample order is preserved, there is no ordering between series. Samples are generated and
/// committed on tokio's blocking pool.
///
/// On failure the whole operation stops at the first error:
///
/// * an error from an appender or a generator rolls back that worker's appender, cancels the
///   other workers and is returned,
/// * an error from `series` itself stops feeding, lets the workers drain and commit what they
///   already received, and is then returned,
/// * cancelling `cancel` makes every worker roll back and return [`Error::Cancelled`].
///
/// Workers that committed before a failure keep their data.
pub async fn append<A, S>(
    cancel: &CancellationToken,
    workers: usize,
    appendable: &A,
    series: S,
) -> Result<AppendSummary>
where
    A: Appendable + ?Sized,
    S: IntoIterator<Item = Result<Series>> + Send,
    S::IntoIter: Send,
{
    let workers = workers.max(1);
    let token = cancel.child_token();
    let (tx, rx) = mpsc::channel::<Series>(1);
    let rx = Arc::new(Mutex::new(rx));

    debug!(workers, "starting append workers");
    let mut tasks = JoinSet::new();
    for id in 0..workers {
        tasks.spawn(worker(
            id,
            token.clone(),
            Arc::clone(&rx),
            appendable.appender(),
        ));
    }
    drop(rx);

    let mut series = series.into_iter();
    let mut feed_error = None;
    loop {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                // every worker is gone
                Err(_) => break,
            },
        };
        match series.next() {
            Some(Ok(s)) => permit.send(s),
            Some(Err(e)) => {
                warn!(error = %e, "series set failed, draining workers");
                feed_error = Some(e);
                break;
            }
            None => break,
        }
    }
    drop(tx);

    let mut summary = AppendSummary::default();
    let mut worker_error: Option<Error> = None;
    while let Some(res) = tasks.join_next().await {
        match res.map_err(Error::from).and_then(|r| r) {
            Ok(s) => summary.merge(s),
            Err(e) => {
                token.cancel();
                // a cancelled worker may finish before the one that caused the cancellation
                let replace = match &worker_error {
                    None => true,
                    Some(prev) => matches!(prev, Error::Cancelled) && !matches!(e, Error::Cancelled),
                };
                if replace {
                    worker_error = Some(e);
                }
            }
        }
    }

    match (worker_error, feed_error) {
        (Some(e), _) if !matches!(e, Error::Cancelled) => Err(e),
        (_, Some(e)) => Err(e),
        (Some(e), None) => Err(e),
        (None, None) if token.is_cancelled() => Err(Error::Cancelled),
        (None, None) => {
            debug!(
                series = summary.series,
                samples = summary.samples,
                "append finished"
            );
            Ok(summary)
        }
    }
}

async fn worker(
    id: usize,
    token: CancellationToken,
    rx: Arc<Mutex<mpsc::Receiver<Series>>>,
    mut appender: Box<dyn Appender>,
) -> Result<AppendSummary> {
    let mut summary = AppendSummary::default();

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled(id, appender.as_mut())),
                next = rx.recv() => next,
            }
        };
        let Some(series) = next else { break };

        // generating samples is CPU bound, keep it off the runtime's worker threads
        let series_token = token.clone();
        let (returned, appended) = tokio::task::spawn_blocking(move || {
            let appended = append_series(id, &series_token, appender.as_mut(), series);
            (appender, appended)
        })
        .await?;
        appender = returned;

        summary.samples += appended?;
        summary.series += 1;
    }

    if token.is_cancelled() {
        return Err(cancelled(id, appender.as_mut()));
    }
    let (mut appender, committed) = tokio::task::spawn_blocking(move || {
        let committed = appender.commit();
        (appender, committed)
    })
    .await?;
    if let Err(e) = committed {
        let _ = appender.rollback();
        token.cancel();
        warn!(worker = id, error = %e, "append worker failed to commit");
        return Err(Error::Commit(e));
    }

    debug!(
        worker = id,
        series = summary.series,
        samples = summary.samples,
        "append worker committed"
    );
    Ok(summary)
}

/// Append every sample of one series, returning how many were appended.
///
/// On failure the appender is rolled back and `token` cancelled before the error is returned.
fn append_series(
    id: usize,
    token: &CancellationToken,
    appender: &mut dyn Appender,
    series: Series,
) -> Result<u64> {
    let (labels, samples) = series.into_parts();
    let mut series_ref = None;
    let mut appended = 0;

    for sample in samples {
        if token.is_cancelled() {
            return Err(cancelled(id, appender));
        }

        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                let rollback = appender.rollback().err();
                token.cancel();
                let e = Error::Iterate {
                    labels,
                    source: Box::new(e),
                    rollback,
                };
                warn!(worker = id, error = %e, "append worker failed");
                return Err(e);
            }
        };

        let res = match series_ref {
            None => appender
                .add(&labels, sample.timestamp, sample.value)
                .map(|r| series_ref = Some(r))
                .map_err(|e| ("add", e)),
            Some(r) => appender
                .add_fast(r, sample.timestamp, sample.value)
                .map_err(|e| ("add fast", e)),
        };
        if let Err((action, source)) = res {
            let rollback = appender.rollback().err();
            token.cancel();
            let e = Error::Append {
                action,
                labels,
                source,
                rollback,
            };
            warn!(worker = id, error = %e, "append worker failed");
            return Err(e);
        }
        appended += 1;
    }
    Ok(appended)
}

fn cancelled(id: usize, appender: &mut dyn Appender) -> Error {
    if let Err(e) = appender.rollback() {
        warn!(worker = id, error = %e, "rollback after cancellation failed");
    }
    Error::Cancelled
}
