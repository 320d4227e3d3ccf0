use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{NotifyError, Result};

const DEFAULT_FILTER: &str = "info";

/// Appends hook logs to a single file (`hooks.post-receive-logfile`)
pub struct FileLogger {
    log_directory: PathBuf,
    file_name: String,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                NotifyError::ConfigError(format!(
                    "Log file path '{}' has no file name",
                    path.display()
                ))
            })?;
        let log_directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self {
            log_directory,
            file_name,
            rotation: Rotation::NEVER,
        })
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::new(
            self.rotation.to_owned(),
            &self.log_directory,
            &self.file_name,
        );

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Console logs go to stderr; stdout carries payloads when no webhook is set.
/// The returned guard must outlive all logging when a file is configured.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = fmt::layer().with_writer(std::io::stderr);

    match file_logger {
        Some(file_logger) => {
            let (file_writer, guard) = file_logger.setup_file_logging()?;
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            Ok(None)
        }
    }
}
