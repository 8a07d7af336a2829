//! Tracing subscriber setup shared by the binaries.

use std::fs;
use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// 0 = info, 1 = debug, 2+ = trace. `RUST_LOG` overrides.
    pub verbosity: u8,
    /// Log to stderr.
    pub stderr: bool,
    /// Also append to this file.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Log to stderr at the given verbosity.
    pub fn stderr(verbosity: u8) -> Self {
        Self {
            verbosity,
            stderr: true,
            file: None,
        }
    }

    /// Also write to `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Keeps the file writer flushing. Hold it until the process exits.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level(verbosity).into())
        .from_env_lossy()
}

/// Install the global subscriber.
///
/// Calling it again after a subscriber is set is a no-op. A log file that
/// cannot be created is reported on stderr and skipped.
pub fn init_logging(config: &LogConfig) -> LoggingGuard {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.stderr {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTime::rfc_3339())
                .with_target(false)
                .with_filter(env_filter(config.verbosity))
                .boxed(),
        );
    }

    let mut file_guard = None;
    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "selfpatch.log".into());

        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(&dir, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_timer(LocalTime::rfc_3339())
                        .with_filter(env_filter(config.verbosity))
                        .boxed(),
                );
                file_guard = Some(guard);
            }
            Err(e) => eprintln!("cannot create log directory {}: {}", dir.display(), e),
        }
    }

    let _ = Registry::default().with(layers).try_init();
    LoggingGuard { _file: file_guard }
}
