//! Logging setup for skyseen.
//!
//! Log lines go to stderr so that reports printed on stdout stay pipeable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Progress of each stage (info and above).
    #[default]
    Normal,
    /// Per-file and per-record diagnostics (debug and above).
    Verbose,
    /// Everything, including one line per simulated session.
    Trace,
}

impl Verbosity {
    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    ///
    /// The simulator stays at info below `Trace`; at debug it would log
    /// every skipped record of a multi-million record replay.
    #[must_use]
    pub fn directives(&self) -> String {
        let level = self.to_level_filter();
        match self {
            Self::Verbose => format!("skyseen={level},skyseen::simulate=info"),
            _ => format!("skyseen={level}"),
        }
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `verbosity`. Calling this more than once
/// keeps the first subscriber.
///
/// # Examples
///
/// ```no_run
/// use skyseen::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    let _ = subscriber.try_init();
}
