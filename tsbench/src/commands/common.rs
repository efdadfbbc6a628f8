use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use object_store::local::LocalFileSystem;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsbench_blockgen::{BlockSyncer, NoopSyncer, ObjectStoreSyncer};
use tsbench_seriesgen::{Labels, is_valid_label_name};

/// A time in the past
///
/// Wraps a [`DateTime`], providing a custom [`FromStr`] implementation that parses either an
/// exact date-time in RFC3339 form or a human readable offset back from now, e.g. `30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PastOffsetTime(DateTime<Utc>);

impl PastOffsetTime {
    pub(crate) fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl FromStr for PastOffsetTime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(t) = humantime::parse_rfc3339_weak(s) {
            Ok(Self(DateTime::<Utc>::from(t)))
        } else {
            humantime::parse_duration(s)
                .context("not a duration")
                .and_then(|d| chrono::Duration::from_std(d).context("duration out of range"))
                .map(|d| Utc::now() - d)
                .map(Self)
                .with_context(|| format!("could not parse time or past offset value: {s}"))
        }
    }
}

/// Parse a `name="value"` label flag. The value must be a double quoted string.
pub(crate) fn parse_label(s: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = s.split_once('=') else {
        bail!("unrecognized label {s:?}, expected name=\"value\"");
    };
    if !is_valid_label_name(name) {
        bail!("unsupported format for label {s}");
    }
    let value: String = serde_json::from_str(value)
        .with_context(|| format!("unquote label value of {name}"))?;
    Ok((name.to_string(), value))
}

pub(crate) fn labels_from_flags(flags: &[(String, String)]) -> Labels {
    Labels::new(flags.iter().map(|(n, v)| (n.as_str(), v.as_str())))
}

#[derive(Debug, Clone, Copy, clap::Parser)]
pub(crate) struct WorkerConfig {
    /// Number of concurrent append workers per block.
    ///
    /// If 0, twice the number of CPUs is used.
    #[clap(long = "workers", env = "TSBENCH_WORKERS", default_value_t = 0)]
    pub(crate) workers: usize,
}

impl WorkerConfig {
    pub(crate) fn workers(&self) -> usize {
        match self.workers {
            0 => 2 * num_cpus::get(),
            n => n,
        }
    }
}

/// Where finished blocks are shipped to, if anywhere.
#[derive(Debug, Clone, clap::Parser)]
pub(crate) struct ObjectStoreConfig {
    /// Upload every finished block to an object store rooted at this local directory.
    ///
    /// Uploading is disabled when not set.
    #[clap(long = "object-store-dir", env = "TSBENCH_OBJECT_STORE_DIR")]
    pub(crate) object_store_dir: Option<PathBuf>,

    /// Prefix for uploaded blocks inside the object store.
    #[clap(
        long = "object-store-prefix",
        env = "TSBENCH_OBJECT_STORE_PREFIX",
        requires = "object_store_dir"
    )]
    pub(crate) object_store_prefix: Option<String>,

    /// Remove the local copy of a block once it is uploaded.
    #[clap(
        long = "remove-local",
        env = "TSBENCH_REMOVE_LOCAL",
        default_value_t = false,
        requires = "object_store_dir"
    )]
    pub(crate) remove_local: bool,
}

impl ObjectStoreConfig {
    pub(crate) fn make_syncer(&self) -> anyhow::Result<Arc<dyn BlockSyncer>> {
        let Some(dir) = &self.object_store_dir else {
            info!("no object store configured; uploading disabled");
            return Ok(Arc::new(NoopSyncer));
        };

        std::fs::create_dir_all(dir)
            .with_context(|| format!("create object store directory {}", dir.display()))?;
        let store = LocalFileSystem::new_with_prefix(dir)
            .with_context(|| format!("open object store at {}", dir.display()))?;

        let mut syncer =
            ObjectStoreSyncer::new(Arc::new(store)).with_remove_local(self.remove_local);
        if let Some(prefix) = &self.object_store_prefix {
            syncer = syncer.with_prefix(prefix.as_str());
        }
        info!(
            dir = %dir.display(),
            prefix = self.object_store_prefix.as_deref().unwrap_or(""),
            remove_local = self.remove_local,
            "uploading enabled"
        );
        Ok(Arc::new(syncer))
    }
}

/// A token cancelled on the first `ctrl+c`.
pub(crate) fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("received interrupt, cancelling");
                cancel.cancel();
            }
            Err(error) => warn!(%error, "cannot listen for interrupts"),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn past_offset_rfc3339() {
        let t: PastOffsetTime = "2019-10-18T00:00:00Z".parse().unwrap();
        assert_eq!(t.timestamp_millis(), 1_571_356_800_000);
    }

    #[test]
    fn past_offset_duration() {
        let before = Utc::now() - chrono::Duration::minutes(30);
        let t: PastOffsetTime = "30m".parse().unwrap();
        let after = Utc::now() - chrono::Duration::minutes(30);
        assert!(t.0 >= before && t.0 <= after);

        assert!("yesterday-ish".parse::<PastOffsetTime>().is_err());
    }

    #[test]
    fn label_flags() {
        assert_eq!(
            parse_label(r#"cluster="eu-1""#).unwrap(),
            ("cluster".to_string(), "eu-1".to_string())
        );
        assert_eq!(
            parse_label(r#"note="a=b \"quoted\"""#).unwrap(),
            ("note".to_string(), r#"a=b "quoted""#.to_string())
        );

        assert!(parse_label("cluster").is_err());
        assert!(parse_label(r#"1cluster="one""#).is_err());
        assert!(parse_label("cluster=one").is_err());

        let labels = labels_from_flags(&[
            ("replica".to_string(), "b".to_string()),
            ("cluster".to_string(), "one".to_string()),
        ]);
        assert_eq!(labels.to_string(), r#"{cluster="one", replica="b"}"#);
    }

    #[test]
    fn default_workers() {
        assert_eq!(WorkerConfig { workers: 3 }.workers(), 3);
        assert_eq!(WorkerConfig { workers: 0 }.workers(), 2 * num_cpus::get());
    }
}
