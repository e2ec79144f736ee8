//! Scenario definitions: the normalized, backend-agnostic description of what the
//! execution engine runs per iteration.
//!
//! A [`ScenarioDefinition`] couples the primary [`BuildAction`] with an optional
//! cleanup action (always executed before the primary action within an iteration)
//! and a list of [`BuildMutator`]s applied in declared order before every build.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::invocation::{BuildInvoker, InvocationSettings};

/// What an iteration executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildAction {
    /// Do nothing. Used as the sentinel for "no cleanup configured".
    NoOp,
    /// Run the given targets (tasks or goals), in order.
    RunTargets(Vec<String>),
}

impl BuildAction {
    /// Builds an action from a target list, collapsing an empty list to [`BuildAction::NoOp`].
    #[must_use]
    pub fn from_targets(targets: Vec<String>) -> Self {
        if targets.is_empty() {
            Self::NoOp
        } else {
            Self::RunTargets(targets)
        }
    }

    /// Whether this action does nothing.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    /// The targets this action runs; empty for [`BuildAction::NoOp`].
    #[must_use]
    pub fn targets(&self) -> &[String] {
        match self {
            Self::NoOp => &[],
            Self::RunTargets(targets) => targets,
        }
    }
}

/// Configuration of the build tool under test, for backends that resolve a
/// distribution (Gradle).
///
/// The Java home here is the *harness* runtime's home, which may deliberately differ
/// from the runtime the measured distribution would pick on its own.
#[derive(Clone, Debug)]
pub struct BuildConfiguration {
    /// Version of the distribution under test.
    pub version: Version,
    /// Installation directory of the distribution under test.
    pub tool_home: PathBuf,
    /// Java home resolved from the currently executing process.
    pub java_home: Option<PathBuf>,
    /// JVM options passed to the build tool.
    pub jvm_opts: Vec<String>,
}

/// Perturbs the workspace or configuration between iterations, simulating
/// incremental-change builds.
pub trait BuildMutator: fmt::Debug {
    /// Applied once before every iteration, in declared order.
    ///
    /// # Errors
    ///
    /// An I/O failure here aborts the scenario; a mutator that cannot apply leaves
    /// the workspace in an unknown state for every following iteration.
    fn before_build(&mut self) -> io::Result<()>;
}

/// Data description of a workspace mutation, as found in experiment metadata.
///
/// Each variant materializes into a [`BuildMutator`] against a concrete workspace
/// via [`Mutation::create`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Mutation {
    /// Rewrite a file in place before every build to invalidate timestamp checks.
    TouchFile {
        /// File to touch, relative to the working directory.
        file: PathBuf,
    },
    /// Write a fresh value for `key` into a properties file before every build.
    ChangeProperty {
        /// Properties file to edit, relative to the working directory.
        file: PathBuf,
        /// Property key whose value changes every iteration.
        key: String,
    },
}

impl Mutation {
    /// Materializes this mutation against the workspace described by `settings`.
    ///
    /// Relative paths resolve against the settings' working directory.
    #[must_use]
    pub fn create(&self, settings: &InvocationSettings) -> Box<dyn BuildMutator> {
        let resolve = |file: &Path| {
            if file.is_absolute() {
                file.to_path_buf()
            } else {
                settings.working_directory.join(file)
            }
        };
        match self {
            Self::TouchFile { file } => Box::new(TouchFileMutator {
                path: resolve(file),
            }),
            Self::ChangeProperty { file, key } => Box::new(ChangePropertyMutator {
                path: resolve(file),
                key: key.clone(),
                iteration: 0,
            }),
        }
    }
}

#[derive(Debug)]
struct TouchFileMutator {
    path: PathBuf,
}

impl BuildMutator for TouchFileMutator {
    fn before_build(&mut self) -> io::Result<()> {
        // rewriting the same bytes bumps the modification time without changing content
        let contents = fs::read(&self.path)?;
        fs::write(&self.path, contents)
    }
}

#[derive(Debug)]
struct ChangePropertyMutator {
    path: PathBuf,
    key: String,
    iteration: usize,
}

impl BuildMutator for ChangePropertyMutator {
    fn before_build(&mut self) -> io::Result<()> {
        self.iteration += 1;
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err),
        };
        let fresh = format!("{}=bench-{}", self.key, self.iteration);
        let prefix = format!("{}=", self.key);
        let mut replaced = false;
        let mut lines: Vec<String> = contents
            .lines()
            .map(|line| {
                if line.starts_with(&prefix) {
                    replaced = true;
                    fresh.clone()
                } else {
                    line.to_string()
                }
            })
            .collect();
        if !replaced {
            lines.push(fresh);
        }
        fs::write(&self.path, lines.join("\n") + "\n")
    }
}

/// The normalized description of what the execution engine runs per iteration.
///
/// The name doubles as the human label and the on-disk artifact prefix; keeping it
/// unique across concurrently running experiments is the caller's responsibility.
#[derive(Debug)]
pub struct ScenarioDefinition {
    /// Unique display name, used for reporting and artifact naming.
    pub name: String,
    /// Human-readable title, usually equal to the name.
    pub title: String,
    /// How the build tool is invoked.
    pub invoker: BuildInvoker,
    /// Distribution configuration, for backends that resolve one.
    pub build_configuration: Option<BuildConfiguration>,
    /// Primary action of every iteration.
    pub action: BuildAction,
    /// Cleanup action executed before the primary action within each iteration.
    pub cleanup: BuildAction,
    /// Extra command-line arguments, in order.
    pub args: Vec<String>,
    /// System properties passed to every invocation.
    pub system_properties: BTreeMap<String, String>,
    /// Workspace mutators, applied in declared order before every build.
    pub mutators: Vec<Box<dyn BuildMutator>>,
    /// Builds excluded from recorded measurements.
    pub warmup_count: usize,
    /// Builds whose samples are recorded.
    pub build_count: usize,
    /// Directory for diagnostic artifacts.
    pub output_directory: PathBuf,
    /// Names of sub-operations the engine should measure per build.
    pub measured_build_operations: Vec<String>,
}

impl ScenarioDefinition {
    /// Starts building a scenario with the given display name and invoker mode.
    #[must_use]
    pub fn builder(name: impl Into<String>, invoker: BuildInvoker) -> ScenarioDefinitionBuilder {
        let name = name.into();
        ScenarioDefinitionBuilder {
            title: name.clone(),
            name,
            invoker,
            build_configuration: None,
            action: BuildAction::NoOp,
            cleanup: BuildAction::NoOp,
            args: Vec::new(),
            system_properties: BTreeMap::new(),
            mutators: Vec::new(),
            warmup_count: 0,
            build_count: 1,
            output_directory: PathBuf::from("."),
            measured_build_operations: Vec::new(),
        }
    }

    /// Applies all mutators once, in declared order.
    ///
    /// # Errors
    ///
    /// Stops at the first mutator failure and returns its error.
    pub fn apply_mutators(&mut self) -> io::Result<()> {
        for mutator in &mut self.mutators {
            mutator.before_build()?;
        }
        Ok(())
    }
}

/// Builder for [`ScenarioDefinition`].
#[derive(Debug)]
pub struct ScenarioDefinitionBuilder {
    name: String,
    title: String,
    invoker: BuildInvoker,
    build_configuration: Option<BuildConfiguration>,
    action: BuildAction,
    cleanup: BuildAction,
    args: Vec<String>,
    system_properties: BTreeMap<String, String>,
    mutators: Vec<Box<dyn BuildMutator>>,
    warmup_count: usize,
    build_count: usize,
    output_directory: PathBuf,
    measured_build_operations: Vec<String>,
}

impl ScenarioDefinitionBuilder {
    /// Human-readable title; defaults to the display name.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Distribution configuration of the tool under test.
    #[must_use]
    pub fn build_configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.build_configuration = Some(configuration);
        self
    }

    /// Primary action of every iteration.
    #[must_use]
    pub fn action(mut self, action: BuildAction) -> Self {
        self.action = action;
        self
    }

    /// Cleanup action, executed before the primary action within each iteration.
    #[must_use]
    pub fn cleanup(mut self, cleanup: BuildAction) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Extra command-line arguments, kept in order.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// System properties passed to every invocation.
    #[must_use]
    pub fn system_properties(mut self, system_properties: BTreeMap<String, String>) -> Self {
        self.system_properties = system_properties;
        self
    }

    /// Workspace mutators, applied in declared order.
    #[must_use]
    pub fn mutators(mut self, mutators: Vec<Box<dyn BuildMutator>>) -> Self {
        self.mutators = mutators;
        self
    }

    /// Number of warm-up builds.
    #[must_use]
    pub fn warmup_count(mut self, warmup_count: usize) -> Self {
        self.warmup_count = warmup_count;
        self
    }

    /// Number of measured builds.
    #[must_use]
    pub fn build_count(mut self, build_count: usize) -> Self {
        self.build_count = build_count;
        self
    }

    /// Directory for diagnostic artifacts.
    #[must_use]
    pub fn output_directory(mut self, output_directory: impl Into<PathBuf>) -> Self {
        self.output_directory = output_directory.into();
        self
    }

    /// Names of sub-operations the engine should measure per build.
    #[must_use]
    pub fn measured_build_operations(mut self, operations: Vec<String>) -> Self {
        self.measured_build_operations = operations;
        self
    }

    /// Builds the scenario.
    #[must_use]
    pub fn build(self) -> ScenarioDefinition {
        ScenarioDefinition {
            name: self.name,
            title: self.title,
            invoker: self.invoker,
            build_configuration: self.build_configuration,
            action: self.action,
            cleanup: self.cleanup,
            args: self.args,
            system_properties: self.system_properties,
            mutators: self.mutators,
            warmup_count: self.warmup_count,
            build_count: self.build_count,
            output_directory: self.output_directory,
            measured_build_operations: self.measured_build_operations,
        }
    }
}
