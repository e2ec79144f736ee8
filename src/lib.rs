//! Benchmark orchestration engine for build-tool invocations.
//!
//! build-bench measures the performance of build tools by running them repeatedly
//! against a fixed project, under varying configurations, and recording per-iteration
//! timing samples. It abstracts heterogeneous backends, currently Gradle (daemon,
//! cold daemon, tooling API, or one-shot CLI) and Maven (one-shot CLI located via
//! `MAVEN_HOME`), behind one uniform execution contract.
//!
//! # Anatomy of a run
//! An [`ExperimentSpec`] names one benchmark configuration. A backend's
//! [`runners::ExperimentRunner`] maps it into normalized
//! [`invocation::InvocationSettings`] and a [`scenario::ScenarioDefinition`], then an
//! execution engine runs the warm-up and measured builds, streaming one sample per
//! measured iteration through the relay into the caller's
//! [`MeasuredOperationList`] and the shared [`BenchmarkResultCollector`]. Flame-graph
//! generation runs as a side pipeline after a successful measurement.
//!
//! # Usage
//! build-bench is primarily designed to be used as an executable, but it is modular
//! and can also be used as a library for more granular control over the benchmarking
//! scope and process.
//!
//! ## As an executable
//! Refer to the output of the `--help` flag:
//! ```console
//! $ build-bench --help
//! ```
//! Experiments are described by `*.experiment.json` metadata files discovered under
//! the experiments directory.
//!
//! ## As a library
//! ```no_run
//! use build_bench::engine::CommandLineInvoker;
//! use build_bench::flamegraph::NoProfilerGraphGenerator;
//! use build_bench::runners::{run_experiment, GradleExperimentRunner};
//! use build_bench::{BenchmarkResultCollector, MeasuredOperationList};
//!
//! # fn main() -> anyhow::Result<()> {
//! let specs = build_bench::experiments::load_all("experiments".as_ref())?;
//!
//! let collector = BenchmarkResultCollector::new();
//! let mut flame_graphs = NoProfilerGraphGenerator::new("results/flame-graphs");
//! let mut results = MeasuredOperationList::new();
//!
//! let engine = CommandLineInvoker::new("/opt/gradle-8.3/bin/gradle");
//! let mut runner = GradleExperimentRunner::new(Box::new(engine));
//! run_experiment(&mut runner, &specs[0], &collector, &mut flame_graphs, &mut results)?;
//!
//! assert_eq!(results.len(), 10);
//! #     Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod engine;
pub mod environment;
pub mod experiments;
pub mod flamegraph;
pub mod invocation;
pub mod logging;
pub mod results;
pub mod runners;
pub mod scenario;

pub use experiments::{load_all, ExperimentSpec, Identifier};
pub use results::{BenchmarkResultCollector, MeasuredOperation, MeasuredOperationList};
pub use runners::{run_experiment, ExperimentError, ExperimentRunner};
