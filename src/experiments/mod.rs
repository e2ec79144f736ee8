//! Experiment specifications and on-disk discovery.
//!
//! An experiment names one benchmark configuration: a target build tool, arguments,
//! mutators, and iteration counts. Experiments are described by `*.experiment.json`
//! metadata files discovered under a directory; the [`load_all`] function assembles
//! them into [`ExperimentSpec`] values, skipping malformed entries with a logged
//! warning.

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use semver::Version;

mod metadata;

pub use metadata::{ExperimentMetadata, ToolMetadata};

use crate::scenario::Mutation;

/// Glob pattern for experiment metadata files.
pub const FILE_PATTERN: &str = "**/*.experiment.json";

/// Display name of an experiment, unique per run.
///
/// Used as both the human label and the on-disk artifact prefix; keeping it unique
/// across concurrently running experiments is the caller's responsibility.
///
/// # Examples
///
/// ```
/// use build_bench::experiments::Identifier;
///
/// let identifier = Identifier::from("incremental assemble");
///
/// assert_eq!(identifier.to_string(), "incremental assemble");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier(s)
    }
}

/// A Gradle distribution under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradleDistribution {
    /// Version of the distribution.
    pub version: Version,
    /// Installation directory of the distribution.
    pub home: PathBuf,
}

/// How a Gradle experiment invokes the build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradleInvocationSpec {
    /// Project under test.
    pub working_directory: PathBuf,
    /// Distribution under test.
    pub distribution: GradleDistribution,
    /// Tasks of the primary action.
    pub tasks_to_run: Vec<String>,
    /// Tasks of the cleanup action run before each iteration.
    pub clean_tasks: Vec<String>,
    /// Extra command-line arguments, in order.
    pub args: Vec<String>,
    /// JVM options for the build tool.
    pub jvm_opts: Vec<String>,
    /// Whether builds should use a persistent daemon.
    pub use_daemon: bool,
    /// Whether builds should go through the tooling API instead of the CLI.
    pub use_tooling_api: bool,
}

impl GradleInvocationSpec {
    /// Returns this spec with `args` appended to its arguments.
    #[must_use]
    pub fn with_additional_args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Returns this spec with `jvm_opts` appended to its JVM options.
    #[must_use]
    pub fn with_additional_jvm_opts(mut self, jvm_opts: Vec<String>) -> Self {
        self.jvm_opts.extend(jvm_opts);
        self
    }
}

/// A Gradle experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradleExperimentSpec {
    /// Display name, unique per run.
    pub display_name: Identifier,
    /// How the build is invoked.
    pub invocation: GradleInvocationSpec,
    /// Warm-up build count override.
    pub warmup_count: Option<usize>,
    /// Measured build count override.
    pub build_count: Option<usize>,
    /// Workspace mutations applied before every build, in declared order.
    pub mutations: Vec<Mutation>,
    /// Sub-operations the engine should measure per build.
    pub measured_build_operations: Vec<String>,
}

/// A Maven installation under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MavenInstallation {
    /// Version of the installation.
    pub version: Version,
    /// Installation directory the locator variable should point at.
    pub home: PathBuf,
}

/// How a Maven experiment invokes the build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MavenInvocationSpec {
    /// Project under test.
    pub working_directory: PathBuf,
    /// Installation under test.
    pub installation: MavenInstallation,
    /// Goals of the primary action.
    pub goals: Vec<String>,
    /// Extra command-line arguments, in order.
    pub args: Vec<String>,
}

/// A Maven experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MavenExperimentSpec {
    /// Display name, unique per run.
    pub display_name: Identifier,
    /// How the build is invoked.
    pub invocation: MavenInvocationSpec,
    /// Warm-up build count override.
    pub warmup_count: Option<usize>,
    /// Measured build count override.
    pub build_count: Option<usize>,
    /// Workspace mutations applied before every build, in declared order.
    pub mutations: Vec<Mutation>,
}

/// One named benchmark configuration for a concrete build-tool backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExperimentSpec {
    /// A Gradle experiment.
    Gradle(GradleExperimentSpec),
    /// A Maven experiment.
    Maven(MavenExperimentSpec),
}

impl ExperimentSpec {
    /// Display name of the experiment.
    #[must_use]
    pub fn display_name(&self) -> &Identifier {
        match self {
            Self::Gradle(spec) => &spec.display_name,
            Self::Maven(spec) => &spec.display_name,
        }
    }

    /// Backend this experiment targets.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gradle(_) => "gradle",
            Self::Maven(_) => "maven",
        }
    }

    /// Project directory the experiment builds in.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        match self {
            Self::Gradle(spec) => &spec.invocation.working_directory,
            Self::Maven(spec) => &spec.invocation.working_directory,
        }
    }
}

/// Finds all experiment metadata files under the given path.
///
/// Searches for files matching [`FILE_PATTERN`] and deserializes each into an
/// [`ExperimentMetadata`]. Files that cannot be opened or deserialized are logged
/// and skipped.
///
/// # Errors
///
/// If the glob pattern cannot be constructed or the glob search fails, the error is
/// returned.
pub fn find_all_metadata(path: &Path) -> anyhow::Result<Vec<(ExperimentMetadata, PathBuf)>> {
    log::info!("getting all experiment metadata files...");
    let metadatas: Vec<(ExperimentMetadata, PathBuf)> = glob::glob(
        path.join(FILE_PATTERN)
            .to_str()
            .context("could not convert experiment metadata pattern to string")?,
    )
    .context("searching for all experiment metadata files")?
    .filter_map(|r| {
        let path = r
            .map_err(|err| {
                log::warn!("could not get globbed path: {err}, skipping...");
            })
            .ok()?;

        log::debug!(
            "processing experiment metadata file ({})...",
            path.display()
        );

        let metadata: ExperimentMetadata = serde_json::from_reader(
            File::open(&path)
                .map_err(|err| {
                    log::warn!("could not open experiment metadata file: {err}, skipping...");
                })
                .ok()?,
        )
        .map_err(|err| {
            log::warn!("could not deserialize experiment metadata: {err}, skipping...");
        })
        .ok()?;

        log::debug!("processed experiment metadata file");
        Some((metadata, path))
    })
    .collect();
    log::info!("found {} experiment metadata files", metadatas.len());
    log::trace!("experiment metadatas: {metadatas:#?}");

    Ok(metadatas)
}

/// Assembles one experiment spec out of its metadata.
///
/// The project directory resolves against the metadata file's directory and must
/// exist; the tool home resolves the same way but is not required to exist on the
/// machine assembling the spec. Returns `None` (with a logged warning) for metadata
/// that cannot be assembled.
#[must_use]
pub fn assemble(metadata: ExperimentMetadata, metadata_path: &Path) -> Option<ExperimentSpec> {
    let base = metadata_path.parent().or_else(|| {
        log::warn!("could not get parent of experiment metadata file, skipping...");
        None
    })?;

    let working_directory = base
        .join(&metadata.project_dir)
        .canonicalize()
        .map_err(|err| {
            log::warn!("could not canonicalize project directory: {err}, skipping...");
        })
        .ok()?;

    let resolve_home = |home: &Path| {
        if home.is_absolute() {
            home.to_path_buf()
        } else {
            base.join(home)
        }
    };

    match metadata.tool {
        ToolMetadata::Gradle {
            version,
            home,
            daemon,
            tooling_api,
        } => {
            let version = Version::parse(&version)
                .map_err(|err| {
                    log::warn!("could not parse gradle version: {err}, skipping...");
                })
                .ok()?;
            Some(ExperimentSpec::Gradle(GradleExperimentSpec {
                display_name: Identifier::from(metadata.name),
                invocation: GradleInvocationSpec {
                    working_directory,
                    distribution: GradleDistribution {
                        version,
                        home: resolve_home(&home),
                    },
                    tasks_to_run: metadata.targets,
                    clean_tasks: metadata.clean_targets,
                    args: metadata.args,
                    jvm_opts: metadata.jvm_opts,
                    use_daemon: daemon,
                    use_tooling_api: tooling_api,
                },
                warmup_count: metadata.warmups,
                build_count: metadata.iterations,
                mutations: metadata.mutations,
                measured_build_operations: metadata.measured_build_operations,
            }))
        }
        ToolMetadata::Maven { version, home } => {
            let version = Version::parse(&version)
                .map_err(|err| {
                    log::warn!("could not parse maven version: {err}, skipping...");
                })
                .ok()?;
            Some(ExperimentSpec::Maven(MavenExperimentSpec {
                display_name: Identifier::from(metadata.name),
                invocation: MavenInvocationSpec {
                    working_directory,
                    installation: MavenInstallation {
                        version,
                        home: resolve_home(&home),
                    },
                    goals: metadata.targets,
                    args: metadata.args,
                },
                warmup_count: metadata.warmups,
                build_count: metadata.iterations,
                mutations: metadata.mutations,
            }))
        }
    }
}

/// Loads all experiments under the given path.
///
/// Convenience over [`find_all_metadata`] and [`assemble`]; metadata that cannot be
/// assembled is logged and skipped.
///
/// # Errors
///
/// If the metadata search itself fails, the error is returned.
pub fn load_all(path: &Path) -> anyhow::Result<Vec<ExperimentSpec>> {
    let specs: Vec<ExperimentSpec> = find_all_metadata(path)?
        .into_iter()
        .filter_map(|(metadata, metadata_path)| assemble(metadata, &metadata_path))
        .collect();
    log::info!("assembled {} experiments", specs.len());
    log::trace!("experiments: {specs:#?}");
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_metadata(dir: &Path, file_name: &str, contents: &str) {
        fs::write(dir.join(file_name), contents).unwrap();
    }

    #[test]
    fn experiments_are_discovered_and_assembled() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        write_metadata(
            dir.path(),
            "assemble.experiment.json",
            r#"{
                "name": "incremental assemble",
                "projectDir": "app",
                "targets": ["assemble"],
                "tool": "gradle",
                "version": "8.3.0",
                "home": "/opt/gradle-8.3"
            }"#,
        );

        let specs = load_all(dir.path()).unwrap();

        assert_eq!(specs.len(), 1);
        let ExperimentSpec::Gradle(spec) = &specs[0] else {
            panic!("expected a gradle experiment");
        };
        assert_eq!(spec.display_name.as_str(), "incremental assemble");
        assert_eq!(spec.invocation.distribution.version, Version::new(8, 3, 0));
        assert!(spec.invocation.use_daemon);
    }

    #[test]
    fn malformed_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        write_metadata(dir.path(), "broken.experiment.json", "{ not json");
        write_metadata(
            dir.path(),
            "bad-version.experiment.json",
            r#"{
                "name": "bad version",
                "projectDir": "app",
                "tool": "maven",
                "version": "not-a-version",
                "home": "/opt/maven"
            }"#,
        );
        write_metadata(
            dir.path(),
            "good.experiment.json",
            r#"{
                "name": "mvn package",
                "projectDir": "app",
                "targets": ["package"],
                "tool": "maven",
                "version": "3.9.4",
                "home": "/opt/maven"
            }"#,
        );

        let specs = load_all(dir.path()).unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind(), "maven");
    }

    #[test]
    fn missing_project_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(
            dir.path(),
            "missing.experiment.json",
            r#"{
                "name": "missing project",
                "projectDir": "nowhere",
                "tool": "maven",
                "version": "3.9.4",
                "home": "/opt/maven"
            }"#,
        );

        let specs = load_all(dir.path()).unwrap();

        assert!(specs.is_empty());
    }

    #[test]
    fn additional_args_are_appended_in_order() {
        let spec = GradleInvocationSpec {
            working_directory: PathBuf::from("app"),
            distribution: GradleDistribution {
                version: Version::new(8, 3, 0),
                home: PathBuf::from("/opt/gradle-8.3"),
            },
            tasks_to_run: vec!["assemble".to_string()],
            clean_tasks: Vec::new(),
            args: vec!["--stacktrace".to_string()],
            jvm_opts: Vec::new(),
            use_daemon: true,
            use_tooling_api: false,
        };

        let enriched = spec.with_additional_args(vec!["--offline".to_string()]);

        assert_eq!(
            enriched.args,
            ["--stacktrace".to_string(), "--offline".to_string()]
        );
    }
}
