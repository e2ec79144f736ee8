//! Process-wide logging scope for experiment runs.
//!
//! Console logging is filtered the usual `RUST_LOG` way. While an experiment runs,
//! [`setup_logging`] additionally mirrors every log record into a `benchmark.log`
//! file inside the run's working directory; [`reset_logging`] detaches it again.
//! The run log also receives the output of build-tool child processes, so one file
//! tells the whole story of a run.
//!
//! The mirror is process-wide state, like the logger itself: one run log at a time.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use log::{Log, Metadata, Record};

/// File name of the per-run log written into the working directory.
pub const RUN_LOG_FILE_NAME: &str = "benchmark.log";

static RUN_LOG: Mutex<Option<File>> = Mutex::new(None);

struct HarnessLogger {
    console: env_logger::Logger,
}

impl Log for HarnessLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.matches(record) {
            if let Some(file) = RUN_LOG
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_mut()
            {
                let _ = writeln!(
                    file,
                    "{} [{}] {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.args()
                );
            }
        }
        self.console.log(record);
    }

    fn flush(&self) {
        if let Some(file) = RUN_LOG
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            let _ = file.flush();
        }
        self.console.flush();
    }
}

/// Installs the harness logger, honoring the usual `RUST_LOG` filtering.
///
/// Call once at startup instead of `env_logger::init`. If a logger is already
/// installed the call is a no-op; run logs then only capture child process output.
pub fn init() {
    let console = env_logger::Builder::from_default_env().build();
    log::set_max_level(console.filter());
    let _ = log::set_boxed_logger(Box::new(HarnessLogger { console }));
}

/// Redirects run logs into `working_directory`, creating it if needed.
///
/// Replaces any run log left attached by a previous run.
///
/// # Errors
///
/// Returns the underlying error if the directory or the log file cannot be created.
pub fn setup_logging(working_directory: &Path) -> io::Result<()> {
    fs::create_dir_all(working_directory)?;
    let file = File::create(working_directory.join(RUN_LOG_FILE_NAME))?;
    *RUN_LOG.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    log::debug!(
        "run logs redirected into {}",
        working_directory.display()
    );
    Ok(())
}

/// Detaches the current run log, flushing it first.
///
/// Safe to call when no run log is attached.
///
/// # Errors
///
/// Returns the underlying error if the final flush fails; the log is detached
/// either way.
pub fn reset_logging() -> io::Result<()> {
    let file = RUN_LOG.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(mut file) = file {
        file.flush()?;
    }
    Ok(())
}

/// Whether a run log is currently attached.
#[must_use]
pub fn run_log_attached() -> bool {
    RUN_LOG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Serializes tests that touch the process-wide run log.
#[cfg(test)]
pub(crate) static TEST_SCOPE_LOCK: Mutex<()> = Mutex::new(());

/// A clone of the current run log handle, for wiring up child process output.
pub(crate) fn run_log_sink() -> Option<File> {
    RUN_LOG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(|file| file.try_clone().ok())
}
