//! Command line flags for logging and the subscriber they install.

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when neither `--log-filter` nor `-v` is given
pub(crate) const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    /// human-readable, single line
    Full,
    /// machine-parseable, one JSON object per line
    Json,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub(crate) struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,object_store=info` specifies debug logging for all modules
    /// except for the `object_store` crate which will only display info
    /// level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", global = true)]
    pub(crate) log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug'
    ///
    /// -vvv 'trace'
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true
    )]
    pub(crate) log_verbose_count: u8,

    /// Logs: message format
    ///
    /// Logs always go to stderr, stdout is reserved for command output.
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        value_enum,
        default_value = "full",
        global = true
    )]
    pub(crate) log_format: LogFormat,
}

impl LoggingConfig {
    /// The filter directive in effect, `-v` taking precedence over `--log-filter`.
    pub(crate) fn filter_directive(&self) -> &str {
        match self.log_verbose_count {
            0 => self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber.
    pub(crate) fn install_global(&self) -> anyhow::Result<()> {
        let directive = self.filter_directive();
        let filter = EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter {directive:?}"))?;
        let registry = tracing_subscriber::registry().with(filter);

        match self.log_format {
            LogFormat::Full => registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
        }
        .context("cannot set global tracing subscriber")
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> LoggingConfig {
        LoggingConfig::try_parse_from(std::iter::once("cli").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn verbose_count() {
        let cfg = parse(&[]);
        assert_eq!(cfg.log_verbose_count, 0);
        assert_eq!(cfg.log_format, LogFormat::Full);

        assert_eq!(parse(&["-v"]).filter_directive(), "info");
        assert_eq!(parse(&["-vv"]).filter_directive(), "debug");
        assert_eq!(parse(&["-vvv"]).filter_directive(), "trace");
        assert_eq!(parse(&["-v", "-v", "-v", "-v"]).filter_directive(), "trace");
    }

    #[test]
    fn verbose_overrides_filter() {
        let cfg = parse(&["--log-filter", "warn,tsbench_blockgen=debug"]);
        assert_eq!(cfg.filter_directive(), "warn,tsbench_blockgen=debug");

        let cfg = parse(&["--log-filter", "warn", "-vv"]);
        assert_eq!(cfg.filter_directive(), "debug");
    }

    #[test]
    fn json_format() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
        assert!(
            LoggingConfig::try_parse_from(["cli", "--log-format", "logfmt"]).is_err()
        );
    }
}
