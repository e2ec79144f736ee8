//! Experiment runners: the shared orchestration sequence and one capability
//! implementation per build-tool backend.
//!
//! [`run_experiment`] is the single source of the run/cleanup sequence. A backend
//! only supplies the small [`ExperimentRunner`] capability surface: mapping its
//! experiment spec into normalized settings and a scenario, optionally holding a
//! process-wide environment scope, and invoking its execution engine.
//!
//! The sequence for one run:
//!
//! 1. Build settings and scenario from the spec (fails fast on a spec for a
//!    different backend).
//! 2. Register the scenario with the result collector.
//! 3. Redirect run logs into the working directory.
//! 4. Acquire the backend's environment scope, invoke the engine with the sample
//!    relay, then generate flame graphs; the scope is the innermost guard and is
//!    restored whether the engine succeeds or fails, always before the logging
//!    scope is reset.
//! 5. Reset run logging; a reset failure is logged, never raised.
//!
//! Completed iterations stay in the caller's results list even when a later step
//! fails.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::engine::ExecutionError;
use crate::environment::{EnvironmentOverride, ScopeInUseError};
use crate::experiments::ExperimentSpec;
use crate::flamegraph::FlameGraphGenerator;
use crate::invocation::{ConfigurationError, InvocationSettings};
use crate::logging;
use crate::results::{
    BenchmarkResultCollector, MeasuredOperationList, SampleKind, SampleRelay, ScenarioReporter,
};
use crate::scenario::ScenarioDefinition;

pub mod gradle;
pub mod maven;

pub use gradle::GradleExperimentRunner;
pub use maven::MavenExperimentRunner;

/// Failure of a single experiment run.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// The experiment could not be configured; no process was started.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Another in-flight experiment holds the backend's environment variable.
    #[error(transparent)]
    EnvironmentScope(#[from] ScopeInUseError),

    /// Run logs could not be redirected into the working directory.
    #[error("could not redirect run logs into the working directory")]
    LoggingSetup(#[source] io::Error),

    /// The execution engine failed. Iterations already appended to the results list
    /// remain valid.
    #[error("scenario execution failed")]
    Execution(#[from] ExecutionError),
}

/// Capability surface implemented once per build-tool backend.
pub trait ExperimentRunner {
    /// Backend name used in logs and configuration errors.
    fn backend(&self) -> &'static str;

    /// Maps the experiment spec into normalized invocation settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ExperimentKindMismatch`] for a spec describing
    /// a different backend, or a validation error from the settings builder.
    fn build_settings(
        &self,
        spec: &ExperimentSpec,
        output_directory: &Path,
    ) -> Result<InvocationSettings, ConfigurationError>;

    /// Builds the scenario the engine runs per iteration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ExperimentKindMismatch`] for a spec describing
    /// a different backend.
    fn build_scenario(
        &self,
        spec: &ExperimentSpec,
        settings: &InvocationSettings,
    ) -> Result<ScenarioDefinition, ConfigurationError>;

    /// Optional process-wide environment scope held across the engine call.
    ///
    /// The default holds nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeInUseError`] when another experiment already holds the
    /// backend's variable.
    fn environment_scope(
        &self,
        spec: &ExperimentSpec,
    ) -> Result<Option<EnvironmentOverride>, ScopeInUseError> {
        let _ = spec;
        Ok(None)
    }

    /// Invokes the external execution engine, blocking for the whole warmup plus
    /// measurement sequence.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`ExecutionError`] on process- or protocol-level
    /// failure.
    fn invoke(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        relay: &mut SampleRelay<'_>,
    ) -> Result<(), ExperimentError>;
}

/// Sample kinds registered with the collector for a scenario: execution time plus
/// every measured build operation.
#[must_use]
pub fn sample_kinds_for(scenario: &ScenarioDefinition) -> Vec<SampleKind> {
    std::iter::once(SampleKind::ExecutionTime)
        .chain(
            scenario
                .measured_build_operations
                .iter()
                .cloned()
                .map(SampleKind::BuildOperation),
        )
        .collect()
}

/// Runs one experiment, appending one record per completed measured iteration to
/// `results`.
///
/// Records are appended incrementally, not in one bulk write at the end, so partial
/// progress is observable and survives an interrupted run. The caller must not read
/// `results` while the run is in flight, and must not start overlapping runs that
/// touch the same backend environment variable in one process.
///
/// # Errors
///
/// Configuration and execution failures surface to the caller after the guaranteed
/// teardown (environment scope restored first, then run logging reset). Teardown
/// failures and flame-graph generation failures are logged, never raised, so they
/// can neither hide a successful measurement nor be hidden by one.
pub fn run_experiment(
    runner: &mut dyn ExperimentRunner,
    spec: &ExperimentSpec,
    collector: &BenchmarkResultCollector,
    flame_graphs: &mut dyn FlameGraphGenerator,
    results: &mut MeasuredOperationList,
) -> Result<(), ExperimentError> {
    let display_name = spec.display_name().clone();
    log::info!(
        "[{display_name}] preparing {} experiment...",
        runner.backend()
    );

    let output_directory = flame_graphs.output_directory(spec);
    let settings = runner.build_settings(spec, &output_directory)?;
    let mut scenario = runner.build_scenario(spec, &settings)?;
    let reporter = collector.scenario(&scenario, sample_kinds_for(&scenario));

    logging::setup_logging(&settings.working_directory).map_err(ExperimentError::LoggingSetup)?;
    let outcome = measure(
        runner,
        spec,
        &mut scenario,
        &settings,
        flame_graphs,
        results,
        reporter,
    );
    if let Err(err) = logging::reset_logging() {
        log::warn!("[{display_name}] could not reset run logging: {err}, continuing...");
    }

    match &outcome {
        Ok(()) => log::info!(
            "[{display_name}] experiment finished with {} measured builds (avg: {:?})",
            results.len(),
            results.average_execution_time().unwrap_or_default(),
        ),
        Err(err) => log::warn!("[{display_name}] experiment failed: {err}"),
    }
    outcome
}

fn measure(
    runner: &mut dyn ExperimentRunner,
    spec: &ExperimentSpec,
    scenario: &mut ScenarioDefinition,
    settings: &InvocationSettings,
    flame_graphs: &mut dyn FlameGraphGenerator,
    results: &mut MeasuredOperationList,
    reporter: ScenarioReporter,
) -> Result<(), ExperimentError> {
    // innermost guard: restored when this frame exits, before logging is reset
    let _environment = runner.environment_scope(spec)?;

    let mut relay = SampleRelay::new(results, reporter);
    runner.invoke(scenario, settings, &mut relay)?;
    let dropped = relay.dropped_samples();
    drop(relay);
    if dropped > 0 {
        log::warn!("[{}] dropped {dropped} malformed samples", scenario.name);
    }

    // measurement results are durable by now; diagnostics must not erase them
    if let Err(err) = flame_graphs
        .generate_graphs(spec)
        .and_then(|()| flame_graphs.generate_differential_graphs())
    {
        log::error!(
            "[{}] could not generate flame graphs: {err:#}, continuing...",
            scenario.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::env;
    use std::path::PathBuf;
    use std::sync::PoisonError;
    use std::time::Duration;

    use anyhow::anyhow;
    use semver::Version;

    use super::*;
    use crate::engine::{RawInvocationResult, SampleSink};
    use crate::experiments::{
        GradleDistribution, GradleExperimentSpec, GradleInvocationSpec, Identifier,
    };
    use crate::flamegraph::NoProfilerGraphGenerator;
    use crate::invocation::BuildInvoker;
    // run logging is process-wide, so orchestration tests must not overlap
    use crate::logging::TEST_SCOPE_LOCK as SCOPE_LOCK;

    fn gradle_spec(name: &str, working_directory: PathBuf) -> ExperimentSpec {
        ExperimentSpec::Gradle(GradleExperimentSpec {
            display_name: Identifier::from(name),
            invocation: GradleInvocationSpec {
                working_directory,
                distribution: GradleDistribution {
                    version: Version::new(8, 3, 0),
                    home: PathBuf::from("/opt/gradle-8.3"),
                },
                tasks_to_run: vec!["assemble".to_string()],
                clean_tasks: Vec::new(),
                args: Vec::new(),
                jvm_opts: Vec::new(),
                use_daemon: true,
                use_tooling_api: false,
            },
            warmup_count: Some(2),
            build_count: Some(5),
            mutations: Vec::new(),
            measured_build_operations: Vec::new(),
        })
    }

    /// Runner stub whose engine synthesizes fixed samples or fails.
    struct StubRunner {
        samples: Vec<Option<Duration>>,
        fail_execution: bool,
        environment_key: Option<&'static str>,
    }

    impl ExperimentRunner for StubRunner {
        fn backend(&self) -> &'static str {
            "stub"
        }

        fn build_settings(
            &self,
            spec: &ExperimentSpec,
            output_directory: &Path,
        ) -> Result<InvocationSettings, ConfigurationError> {
            InvocationSettings::builder(spec.working_directory(), BuildInvoker::CliNoDaemon)
                .output_directory(output_directory)
                .warmup_count(2)
                .build_count(self.samples.len().max(1))
                .build()
        }

        fn build_scenario(
            &self,
            spec: &ExperimentSpec,
            settings: &InvocationSettings,
        ) -> Result<ScenarioDefinition, ConfigurationError> {
            Ok(
                ScenarioDefinition::builder(spec.display_name().to_string(), settings.invoker)
                    .warmup_count(settings.warmup_count)
                    .build_count(settings.build_count)
                    .output_directory(settings.output_directory.clone())
                    .build(),
            )
        }

        fn environment_scope(
            &self,
            _spec: &ExperimentSpec,
        ) -> Result<Option<EnvironmentOverride>, ScopeInUseError> {
            self.environment_key
                .map(|key| EnvironmentOverride::acquire(key, "/opt/override").map(Some))
                .unwrap_or(Ok(None))
        }

        fn invoke(
            &mut self,
            _scenario: &mut ScenarioDefinition,
            _settings: &InvocationSettings,
            relay: &mut SampleRelay<'_>,
        ) -> Result<(), ExperimentError> {
            for (index, execution_time) in self.samples.iter().enumerate() {
                relay.on_iteration(&RawInvocationResult {
                    display_name: format!("measured build #{}", index + 1),
                    execution_time: *execution_time,
                    build_operations: BTreeMap::new(),
                    successful: true,
                });
            }
            if self.fail_execution {
                return Err(ExperimentError::Execution(ExecutionError::Interrupted));
            }
            Ok(())
        }
    }

    struct FailingGraphGenerator;

    impl FlameGraphGenerator for FailingGraphGenerator {
        fn output_directory(&self, spec: &ExperimentSpec) -> PathBuf {
            std::env::temp_dir().join(spec.display_name().as_str())
        }

        fn generate_graphs(&mut self, _spec: &ExperimentSpec) -> anyhow::Result<()> {
            Err(anyhow!("renderer exploded"))
        }

        fn generate_differential_graphs(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn run_appends_exactly_the_measured_iterations_in_order() {
        let _guard = SCOPE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let spec = gradle_spec("exact-count", dir.path().to_path_buf());
        let collector = BenchmarkResultCollector::new();
        let mut flame_graphs = NoProfilerGraphGenerator::new(dir.path().join("flame-graphs"));
        let mut results = MeasuredOperationList::new();
        let mut runner = StubRunner {
            samples: (0..5u64)
                .map(|i| Some(Duration::from_millis(100 + i)))
                .collect(),
            fail_execution: false,
            environment_key: None,
        };

        run_experiment(
            &mut runner,
            &spec,
            &collector,
            &mut flame_graphs,
            &mut results,
        )
        .unwrap();

        assert_eq!(results.len(), 5);
        let iterations: Vec<usize> = results.iter().map(|op| op.iteration).collect();
        assert_eq!(iterations, [1, 2, 3, 4, 5]);
        assert_eq!(collector.scenario_names(), ["exact-count"]);
        assert!(!logging::run_log_attached());
    }

    #[test]
    fn environment_is_restored_and_logging_reset_when_the_engine_fails() {
        let _guard = SCOPE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let key = "BUILD_BENCH_TEST_RUNNER_SCOPE";
        assert!(env::var_os(key).is_none());

        let dir = tempfile::tempdir().unwrap();
        let spec = gradle_spec("engine-failure", dir.path().to_path_buf());
        let collector = BenchmarkResultCollector::new();
        let mut flame_graphs = NoProfilerGraphGenerator::new(dir.path().join("flame-graphs"));
        let mut results = MeasuredOperationList::new();
        let mut runner = StubRunner {
            samples: vec![Some(Duration::from_millis(100)), Some(Duration::from_millis(90))],
            fail_execution: true,
            environment_key: Some(key),
        };

        let outcome = run_experiment(
            &mut runner,
            &spec,
            &collector,
            &mut flame_graphs,
            &mut results,
        );

        assert!(matches!(outcome, Err(ExperimentError::Execution(_))));
        // completed iterations are not rolled back
        assert_eq!(results.len(), 2);
        assert!(env::var_os(key).is_none());
        assert!(!logging::run_log_attached());
    }

    #[test]
    fn graph_generation_failure_does_not_fail_the_run() {
        let _guard = SCOPE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let spec = gradle_spec("graph-failure", dir.path().to_path_buf());
        let collector = BenchmarkResultCollector::new();
        let mut flame_graphs = FailingGraphGenerator;
        let mut results = MeasuredOperationList::new();
        let mut runner = StubRunner {
            samples: vec![Some(Duration::from_millis(100))],
            fail_execution: false,
            environment_key: None,
        };

        let outcome = run_experiment(
            &mut runner,
            &spec,
            &collector,
            &mut flame_graphs,
            &mut results,
        );

        assert!(outcome.is_ok());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn malformed_samples_do_not_abort_the_run() {
        let _guard = SCOPE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let spec = gradle_spec("malformed-sample", dir.path().to_path_buf());
        let collector = BenchmarkResultCollector::new();
        let mut flame_graphs = NoProfilerGraphGenerator::new(dir.path().join("flame-graphs"));
        let mut results = MeasuredOperationList::new();
        let mut runner = StubRunner {
            samples: vec![
                Some(Duration::from_millis(100)),
                None,
                Some(Duration::from_millis(95)),
            ],
            fail_execution: false,
            environment_key: None,
        };

        run_experiment(
            &mut runner,
            &spec,
            &collector,
            &mut flame_graphs,
            &mut results,
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        let iterations: Vec<usize> = results.iter().map(|op| op.iteration).collect();
        assert_eq!(iterations, [1, 3]);
    }

    #[test]
    fn sample_kinds_cover_every_measured_build_operation() {
        let scenario = ScenarioDefinition::builder("kinds", BuildInvoker::Cli)
            .measured_build_operations(vec![
                "ConfigureBuild".to_string(),
                "ExecuteTasks".to_string(),
            ])
            .build();

        let kinds = sample_kinds_for(&scenario);

        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0], SampleKind::ExecutionTime);
        assert_eq!(
            kinds[1],
            SampleKind::BuildOperation("ConfigureBuild".to_string())
        );
    }
}
