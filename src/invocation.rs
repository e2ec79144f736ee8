//! Normalized invocation settings for a single experiment run.
//!
//! The [`InvocationSettings`] builder turns a backend-specific invocation description
//! (working directory, arguments, daemon mode, distribution version) into the settings
//! object consumed by the execution engine. Settings are owned by the runner for the
//! duration of one `run` call and discarded afterwards.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

use crate::results::CsvFormat;

/// Default number of measured builds when an experiment does not override it.
pub const DEFAULT_BUILD_COUNT: usize = 10;

/// How the build tool is invoked for each iteration.
///
/// The mapping from an experiment's daemon and tooling-API requests onto one of these
/// modes is total and deterministic, see
/// [`crate::runners::gradle::invoker_for`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInvoker {
    /// In-process tooling API call against a persistent daemon.
    ToolingApi,
    /// In-process tooling API call, with the daemon started cold for every iteration.
    ColdDaemonToolingApi,
    /// Command-line invocation using a persistent daemon.
    Cli,
    /// One-shot command-line invocation with no daemon at all.
    CliNoDaemon,
    /// Single-shot Maven invocation (Maven has no daemon concept).
    Maven,
}

impl BuildInvoker {
    /// Whether this mode keeps a warm daemon alive across iterations.
    #[must_use]
    pub fn uses_daemon(self) -> bool {
        matches!(self, Self::ToolingApi | Self::Cli)
    }

    /// Warm-up builds needed to stabilize this mode before measuring.
    ///
    /// Warm-daemon modes need several builds to settle caches and JIT state; modes
    /// that start cold every iteration have nothing to stabilize beyond the first run.
    #[must_use]
    pub fn default_warmup_count(self) -> usize {
        if self.uses_daemon() {
            6
        } else {
            1
        }
    }
}

impl Display for BuildInvoker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToolingApi => "Gradle tooling API",
            Self::ColdDaemonToolingApi => "Gradle tooling API (cold daemon)",
            Self::Cli => "Gradle CLI",
            Self::CliNoDaemon => "Gradle CLI (no daemon)",
            Self::Maven => "Maven",
        };
        write!(f, "{name}")
    }
}

/// Errors raised while configuring an experiment, before any process is started.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// An experiment spec was handed to the runner of a different build tool.
    #[error("cannot run a {actual} experiment with the {expected} runner")]
    ExperimentKindMismatch {
        /// Backend the runner implements.
        expected: &'static str,
        /// Backend the spec describes.
        actual: &'static str,
    },

    /// The experiment requested no measured builds at all.
    #[error("at least one measured build is required, got {0}")]
    NoMeasuredBuilds(usize),
}

/// Normalized settings for one experiment run.
///
/// # Examples
///
/// ```
/// use build_bench::invocation::{BuildInvoker, InvocationSettings};
///
/// let settings = InvocationSettings::builder("projects/app", BuildInvoker::Cli)
///     .targets(vec!["assemble".to_string()])
///     .build_count(5)
///     .build()
///     .unwrap();
///
/// assert_eq!(settings.build_count, 5);
/// assert_eq!(settings.warmup_count, BuildInvoker::Cli.default_warmup_count());
/// ```
#[derive(Clone, Debug)]
pub struct InvocationSettings {
    /// Directory of the project under test; also receives the per-run log.
    pub working_directory: PathBuf,
    /// Directory for diagnostic artifacts (profiling output, flame graphs).
    pub output_directory: PathBuf,
    /// How the build tool is invoked for each iteration.
    pub invoker: BuildInvoker,
    /// Versions of the build tool distribution under test.
    pub versions: Vec<String>,
    /// Targets (tasks or goals) executed by the primary action.
    pub targets: Vec<String>,
    /// Extra command-line arguments, in order.
    pub args: Vec<String>,
    /// Environment overrides applied to build-tool processes.
    pub environment: BTreeMap<String, String>,
    /// System properties passed to every invocation.
    pub system_properties: BTreeMap<String, String>,
    /// Isolated tool user home, when the backend keeps one.
    pub user_home: Option<PathBuf>,
    /// Builds excluded from recorded measurements.
    pub warmup_count: usize,
    /// Builds whose samples are recorded. Always at least one.
    pub build_count: usize,
    /// Names of sub-operations the engine should measure per build.
    pub measured_build_operations: Vec<String>,
    /// Layout used when samples are exported to CSV.
    pub csv_format: CsvFormat,
}

impl InvocationSettings {
    /// Starts building settings for the given project directory and invoker mode.
    #[must_use]
    pub fn builder(
        working_directory: impl Into<PathBuf>,
        invoker: BuildInvoker,
    ) -> InvocationSettingsBuilder {
        InvocationSettingsBuilder {
            working_directory: working_directory.into(),
            output_directory: None,
            invoker,
            versions: Vec::new(),
            targets: Vec::new(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            system_properties: BTreeMap::new(),
            user_home: None,
            warmup_count: None,
            build_count: DEFAULT_BUILD_COUNT,
            measured_build_operations: Vec::new(),
            csv_format: CsvFormat::Long,
        }
    }
}

/// Builder for [`InvocationSettings`].
#[derive(Clone, Debug)]
pub struct InvocationSettingsBuilder {
    working_directory: PathBuf,
    output_directory: Option<PathBuf>,
    invoker: BuildInvoker,
    versions: Vec<String>,
    targets: Vec<String>,
    args: Vec<String>,
    environment: BTreeMap<String, String>,
    system_properties: BTreeMap<String, String>,
    user_home: Option<PathBuf>,
    warmup_count: Option<usize>,
    build_count: usize,
    measured_build_operations: Vec<String>,
    csv_format: CsvFormat,
}

impl InvocationSettingsBuilder {
    /// Directory for diagnostic artifacts. Defaults to `benchmark-output` under the
    /// working directory.
    #[must_use]
    pub fn output_directory(mut self, output_directory: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(output_directory.into());
        self
    }

    /// Versions of the distribution under test.
    #[must_use]
    pub fn versions(mut self, versions: Vec<String>) -> Self {
        self.versions = versions;
        self
    }

    /// Targets executed by the primary action.
    #[must_use]
    pub fn targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Extra command-line arguments, kept in order.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Environment overrides for build-tool processes.
    #[must_use]
    pub fn environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// System properties passed to every invocation.
    #[must_use]
    pub fn system_properties(mut self, system_properties: BTreeMap<String, String>) -> Self {
        self.system_properties = system_properties;
        self
    }

    /// Isolated tool user home.
    #[must_use]
    pub fn user_home(mut self, user_home: impl Into<PathBuf>) -> Self {
        self.user_home = Some(user_home.into());
        self
    }

    /// Number of warm-up builds. Defaults to the invoker mode's own default.
    #[must_use]
    pub fn warmup_count(mut self, warmup_count: usize) -> Self {
        self.warmup_count = Some(warmup_count);
        self
    }

    /// Number of measured builds.
    #[must_use]
    pub fn build_count(mut self, build_count: usize) -> Self {
        self.build_count = build_count;
        self
    }

    /// Names of sub-operations the engine should measure per build.
    #[must_use]
    pub fn measured_build_operations(mut self, operations: Vec<String>) -> Self {
        self.measured_build_operations = operations;
        self
    }

    /// CSV layout used when samples are exported.
    #[must_use]
    pub fn csv_format(mut self, csv_format: CsvFormat) -> Self {
        self.csv_format = csv_format;
        self
    }

    /// Builds the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoMeasuredBuilds`] if the measured build count
    /// is zero.
    pub fn build(self) -> Result<InvocationSettings, ConfigurationError> {
        if self.build_count == 0 {
            return Err(ConfigurationError::NoMeasuredBuilds(self.build_count));
        }
        let output_directory = self
            .output_directory
            .unwrap_or_else(|| self.working_directory.join("benchmark-output"));
        Ok(InvocationSettings {
            output_directory,
            warmup_count: self
                .warmup_count
                .unwrap_or_else(|| self.invoker.default_warmup_count()),
            working_directory: self.working_directory,
            invoker: self.invoker,
            versions: self.versions,
            targets: self.targets,
            args: self.args,
            environment: self.environment,
            system_properties: self.system_properties,
            user_home: self.user_home,
            build_count: self.build_count,
            measured_build_operations: self.measured_build_operations,
            csv_format: self.csv_format,
        })
    }
}
