//! On-disk experiment metadata (`*.experiment.json`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scenario::Mutation;

/// Description of one experiment as found in a metadata file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentMetadata {
    /// Display name, unique per run; doubles as the artifact prefix.
    pub name: String,
    /// Project to build, relative to the metadata file.
    pub project_dir: PathBuf,
    /// Targets (tasks or goals) of the primary action.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Targets of the cleanup action run before each iteration.
    #[serde(default)]
    pub clean_targets: Vec<String>,
    /// Extra command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// JVM options for the build tool.
    #[serde(default)]
    pub jvm_opts: Vec<String>,
    /// Warm-up build count override.
    #[serde(default)]
    pub warmups: Option<usize>,
    /// Measured build count override.
    #[serde(default)]
    pub iterations: Option<usize>,
    /// Workspace mutations applied before every build, in declared order.
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    /// Sub-operations the engine should measure per build.
    #[serde(default)]
    pub measured_build_operations: Vec<String>,
    /// Backend-specific invocation description.
    #[serde(flatten)]
    pub tool: ToolMetadata,
}

/// Backend-specific part of an experiment description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "camelCase")]
pub enum ToolMetadata {
    /// A Gradle experiment.
    #[serde(rename_all = "camelCase")]
    Gradle {
        /// Version of the distribution under test.
        version: String,
        /// Installation directory of the distribution under test.
        home: PathBuf,
        /// Whether builds should use a persistent daemon.
        #[serde(default = "default_daemon")]
        daemon: bool,
        /// Whether builds should go through the tooling API instead of the CLI.
        #[serde(default)]
        tooling_api: bool,
    },
    /// A Maven experiment.
    #[serde(rename_all = "camelCase")]
    Maven {
        /// Version of the installation under test.
        version: String,
        /// Installation directory the locator variable should point at.
        home: PathBuf,
    },
}

fn default_daemon() -> bool {
    true
}
