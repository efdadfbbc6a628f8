//! Deterministic synthetic series generation.
//!
//! This crate holds the pieces that do not care about how samples end up on disk:
//!
//! * [`Labels`] and [`series_seed`], which give every series a stable identity and PRNG seed
//! * [`Characteristics`] and the value generators built from a [`GeneratorKind`]
//! * [`Series`], a label set paired with a lazy, single-pass sample iterator
//! * the [`Appender`]/[`Appendable`] contract storage implements, and
//! * [`append`], the worker pool that drains a set of series into an [`Appendable`].

use tokio::task::JoinError;

pub mod append;
pub mod generator;
pub mod labels;
pub mod series;

pub use append::{AppendError, AppendSummary, Appendable, Appender, SeriesRef, append};
pub use generator::{
    Characteristics, CounterGen, GaugeGen, GeneratorKind, RandomGen, Sample, SeriesIterator,
};
pub use labels::{Label, Labels, is_valid_label_name, series_seed};
pub use series::Series;

/// Broad classification of an [`Error`], used by callers that only care about what went wrong at
/// the level of configuration vs. runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, detected before any data is produced
    Configuration,
    /// A generator stopped before reaching the end of its time range
    Generation,
    /// Storage rejected a sample or a commit
    Append,
    /// The operation was cancelled before it finished
    Cancelled,
    /// A bug or a panic in a worker task
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid characteristics: {0}")]
    InvalidCharacteristics(String),

    #[error("invalid time range: min time {min_time} is after max time {max_time}")]
    InvalidTimeRange { min_time: i64, max_time: i64 },

    #[error("generator ended prematurely at {timestamp}: {reason}")]
    PrematureEnd { timestamp: i64, reason: String },

    #[error("iterate series {labels}{}", rollback_suffix(.rollback))]
    Iterate {
        labels: Labels,
        #[source]
        source: Box<Error>,
        rollback: Option<AppendError>,
    },

    #[error("{action} sample for series {labels}{}", rollback_suffix(.rollback))]
    Append {
        action: &'static str,
        labels: Labels,
        #[source]
        source: AppendError,
        rollback: Option<AppendError>,
    },

    #[error("commit appender")]
    Commit(#[source] AppendError),

    #[error("append cancelled")]
    Cancelled,

    #[error("append worker failed: {0}")]
    WorkerJoin(#[from] JoinError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCharacteristics(_) | Self::InvalidTimeRange { .. } => {
                ErrorKind::Configuration
            }
            Self::PrematureEnd { .. } => ErrorKind::Generation,
            Self::Iterate { source, .. } => source.kind(),
            Self::Append { .. } | Self::Commit(_) => ErrorKind::Append,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::WorkerJoin(_) => ErrorKind::Internal,
        }
    }
}

fn rollback_suffix(rollback: &Option<AppendError>) -> String {
    match rollback {
        Some(e) => format!(" (rollback also failed: {e})"),
        None => String::new(),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_display_includes_rollback_failure() {
        let labels = Labels::new([("__name__", "m")]);
        let err = Error::Append {
            action: "add",
            labels: labels.clone(),
            source: AppendError::HeadClosed,
            rollback: None,
        };
        assert_eq!(err.to_string(), r#"add sample for series {__name__="m"}"#);
        assert_eq!(err.kind(), ErrorKind::Append);

        let err = Error::Iterate {
            labels,
            source: Box::new(Error::PrematureEnd {
                timestamp: 10,
                reason: "empty window".to_string(),
            }),
            rollback: Some(AppendError::HeadClosed),
        };
        assert_eq!(
            err.to_string(),
            r#"iterate series {__name__="m"} (rollback also failed: head is closed)"#
        );
        assert_eq!(err.kind(), ErrorKind::Generation);
    }
}
