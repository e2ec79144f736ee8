//! The flame-graph generation boundary.
//!
//! Graph generation runs as a side pipeline after a successful measurement; the
//! rendering itself lives behind the [`FlameGraphGenerator`] trait. A generation
//! failure never erases an already-collected measurement result: the orchestration
//! logs it and still reports the run as successful.

use std::fs;
use std::path::{Path, PathBuf};

use crate::experiments::ExperimentSpec;

/// Generates flame graphs out of profiling samples captured during a run.
pub trait FlameGraphGenerator {
    /// Directory that profiling artifacts for `spec` should be written into.
    fn output_directory(&self, spec: &ExperimentSpec) -> PathBuf;

    /// Generates graphs for one finished experiment.
    ///
    /// # Errors
    ///
    /// Returns an error when the graphs cannot be produced; the orchestration treats
    /// this as non-fatal.
    fn generate_graphs(&mut self, spec: &ExperimentSpec) -> anyhow::Result<()>;

    /// Generates differential graphs across all experiments generated so far in this
    /// process.
    ///
    /// # Errors
    ///
    /// Returns an error when the graphs cannot be produced; the orchestration treats
    /// this as non-fatal.
    fn generate_differential_graphs(&mut self) -> anyhow::Result<()>;
}

/// Generator used when no profiler is attached.
///
/// Only lays out the per-experiment artifact directories, so runs always have a
/// stable place for diagnostic output; there are no samples to render.
#[derive(Clone, Debug)]
pub struct NoProfilerGraphGenerator {
    root: PathBuf,
    generated: Vec<String>,
}

impl NoProfilerGraphGenerator {
    /// Creates a generator rooted at the given artifact directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            generated: Vec::new(),
        }
    }

    /// Display names of the experiments generated so far, in run order.
    #[must_use]
    pub fn generated(&self) -> &[String] {
        &self.generated
    }

    /// Root of the artifact directory layout.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FlameGraphGenerator for NoProfilerGraphGenerator {
    fn output_directory(&self, spec: &ExperimentSpec) -> PathBuf {
        self.root.join(spec.display_name().as_str())
    }

    fn generate_graphs(&mut self, spec: &ExperimentSpec) -> anyhow::Result<()> {
        fs::create_dir_all(self.output_directory(spec))?;
        self.generated.push(spec.display_name().to_string());
        log::debug!(
            "[{}] no profiler attached, nothing to render",
            spec.display_name()
        );
        Ok(())
    }

    fn generate_differential_graphs(&mut self) -> anyhow::Result<()> {
        log::trace!(
            "no profiler attached, nothing to diff across {} experiments",
            self.generated.len()
        );
        Ok(())
    }
}
