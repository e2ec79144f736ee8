//! The execution-engine boundary, and a command-line engine implementation.
//!
//! Runners construct a scenario and invocation settings, then hand both to an
//! engine together with a sample sink. The engine runs the whole warmup plus
//! measurement sequence synchronously, invoking the sink once per *measured*
//! iteration, strictly in iteration order, from the calling thread.
//!
//! Two contracts exist because backends differ in how their engine takes the sink:
//! daemon-capable engines accept a [`SampleSink`] callback directly
//! ([`ScenarioInvoker`]), while one-shot engines ask a [`SampleReporterFactory`]
//! for the reporter themselves ([`CollectorScenarioInvoker`]).

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::invocation::{BuildInvoker, InvocationSettings};
use crate::logging;
use crate::results::SampleKind;
use crate::scenario::ScenarioDefinition;

/// Raw result of one completed build invocation, as produced by an engine.
#[derive(Clone, Debug)]
pub struct RawInvocationResult {
    /// Human-readable name of the iteration, e.g. `measured build #3`.
    pub display_name: String,
    /// Wall-clock execution time. `None` when the engine could not measure the
    /// invocation; such samples are malformed and get dropped by the relay.
    pub execution_time: Option<Duration>,
    /// Durations of measured sub-operations, keyed by operation name.
    pub build_operations: BTreeMap<String, Duration>,
    /// Whether the build completed successfully.
    pub successful: bool,
}

/// Process- or protocol-level failures from an execution engine.
///
/// These are fatal to the current run; iterations already handed to the sink
/// remain valid.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// An I/O failure while driving the build tool.
    #[error("I/O failure while driving the build tool")]
    Io(#[from] io::Error),

    /// The invocation was interrupted before the sequence completed.
    #[error("build tool invocation was interrupted")]
    Interrupted,

    /// The requested invoker mode needs an in-process engine this one cannot provide.
    #[error("invoker mode `{0}` requires an in-process engine")]
    UnsupportedInvoker(BuildInvoker),
}

/// Receives one callback per measured iteration, in iteration order.
///
/// Warmup iterations never reach the sink. Implementations must not panic for a
/// single bad sample; the relay drops malformed samples with a recorded count.
pub trait SampleSink {
    /// Called exactly once per completed measured iteration.
    fn on_iteration(&mut self, result: &RawInvocationResult);
}

/// Engine contract used by daemon-capable runners: the sink is passed in directly.
pub trait ScenarioInvoker {
    /// Runs the whole warmup + measurement sequence, blocking until it completes.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] on process- or protocol-level failure.
    fn run(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        sink: &mut dyn SampleSink,
    ) -> Result<(), ExecutionError>;
}

/// Hands out the reporting sink for a scenario, on the engine's request.
pub trait SampleReporterFactory {
    /// Returns the sink measured iterations of `scenario` should be reported to.
    fn scenario_reporter(
        &mut self,
        scenario: &ScenarioDefinition,
        sample_kinds: &[SampleKind],
    ) -> &mut dyn SampleSink;
}

/// Engine contract used by one-shot runners: the engine asks the factory for its
/// reporter before running.
pub trait CollectorScenarioInvoker {
    /// Runs the whole warmup + measurement sequence, blocking until it completes.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] on process- or protocol-level failure.
    fn run(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        collector: &mut dyn SampleReporterFactory,
    ) -> Result<(), ExecutionError>;
}

/// Engine that drives the build tool through its command line.
///
/// Per iteration it applies the scenario's mutators in declared order, runs the
/// cleanup action, then times the primary action with a wall clock. A failed build
/// is recorded as an unsuccessful sample rather than aborting the sequence; a
/// signal-terminated invocation surfaces as [`ExecutionError::Interrupted`].
///
/// Tooling-API invoker modes need an in-process engine and are rejected up front.
///
/// # Examples
///
/// ```no_run
/// use build_bench::engine::CommandLineInvoker;
///
/// let engine = CommandLineInvoker::new("/opt/gradle/bin/gradle");
/// ```
#[derive(Clone, Debug)]
pub struct CommandLineInvoker {
    program: PathBuf,
}

impl CommandLineInvoker {
    /// Creates an engine that spawns `program` for every build.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn invoker_args(invoker: BuildInvoker) -> Result<&'static [&'static str], ExecutionError> {
        match invoker {
            BuildInvoker::Cli => Ok(&["--daemon"]),
            BuildInvoker::CliNoDaemon => Ok(&["--no-daemon"]),
            BuildInvoker::Maven => Ok(&[]),
            BuildInvoker::ToolingApi | BuildInvoker::ColdDaemonToolingApi => {
                Err(ExecutionError::UnsupportedInvoker(invoker))
            }
        }
    }

    fn command(
        &self,
        scenario: &ScenarioDefinition,
        settings: &InvocationSettings,
        invoker_args: &[&str],
        targets: &[String],
    ) -> Command {
        let mut command = Command::new(&self.program);
        command
            .current_dir(&settings.working_directory)
            .args(invoker_args)
            .args(&scenario.args)
            .args(targets);
        for (key, value) in &scenario.system_properties {
            command.arg(format!("-D{key}={value}"));
        }
        command.envs(&settings.environment);
        match logging::run_log_sink() {
            Some(file) => {
                let err = file.try_clone().map_or_else(|_| Stdio::null(), Stdio::from);
                command.stdout(Stdio::from(file)).stderr(err);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        command
    }

    fn drive(
        &self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        sink: &mut dyn SampleSink,
    ) -> Result<(), ExecutionError> {
        let invoker_args = Self::invoker_args(scenario.invoker)?;
        let cleanup_targets = scenario.cleanup.targets().to_vec();
        let action_targets = scenario.action.targets().to_vec();
        let warmup_count = scenario.warmup_count;
        let build_count = scenario.build_count;

        log::info!(
            "[{}] running {warmup_count} warm-up and {build_count} measured builds...",
            scenario.name
        );
        for iteration in 0..warmup_count + build_count {
            let measured = iteration >= warmup_count;
            let display_name = if measured {
                format!("measured build #{}", iteration - warmup_count + 1)
            } else {
                format!("warm-up build #{}", iteration + 1)
            };
            log::debug!("[{}] starting {display_name}...", scenario.name);

            scenario.apply_mutators()?;

            if !cleanup_targets.is_empty() {
                let status = self
                    .command(scenario, settings, invoker_args, &cleanup_targets)
                    .status()?;
                if !status.success() {
                    log::warn!(
                        "[{}] cleanup action failed before {display_name}, continuing...",
                        scenario.name
                    );
                }
            }

            let start = Instant::now();
            let status = self
                .command(scenario, settings, invoker_args, &action_targets)
                .status()?;
            let execution_time = start.elapsed();
            if status.code().is_none() {
                // terminated by a signal before producing an exit code
                return Err(ExecutionError::Interrupted);
            }

            log::debug!(
                "[{}] {display_name} finished in {execution_time:?}",
                scenario.name
            );
            if measured {
                sink.on_iteration(&RawInvocationResult {
                    display_name,
                    execution_time: Some(execution_time),
                    build_operations: BTreeMap::new(),
                    successful: status.success(),
                });
            }
        }
        Ok(())
    }
}

impl ScenarioInvoker for CommandLineInvoker {
    fn run(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        sink: &mut dyn SampleSink,
    ) -> Result<(), ExecutionError> {
        self.drive(scenario, settings, sink)
    }
}

impl CollectorScenarioInvoker for CommandLineInvoker {
    fn run(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        collector: &mut dyn SampleReporterFactory,
    ) -> Result<(), ExecutionError> {
        let sink = collector.scenario_reporter(scenario, &[SampleKind::ExecutionTime]);
        self.drive(scenario, settings, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::InvocationSettings;
    use crate::scenario::BuildAction;

    #[derive(Debug, Default)]
    struct TestSink {
        results: Vec<RawInvocationResult>,
    }

    impl SampleSink for TestSink {
        fn on_iteration(&mut self, result: &RawInvocationResult) {
            self.results.push(result.clone());
        }
    }

    fn scenario(invoker: BuildInvoker, warmups: usize, builds: usize) -> ScenarioDefinition {
        ScenarioDefinition::builder("engine-test", invoker)
            .action(BuildAction::RunTargets(vec!["assemble".to_string()]))
            .warmup_count(warmups)
            .build_count(builds)
            .build()
    }

    fn settings(invoker: BuildInvoker) -> InvocationSettings {
        let dir = std::env::temp_dir();
        InvocationSettings::builder(dir, invoker).build().unwrap()
    }

    #[test]
    fn tooling_api_modes_are_rejected() {
        assert!(matches!(
            CommandLineInvoker::invoker_args(BuildInvoker::ToolingApi),
            Err(ExecutionError::UnsupportedInvoker(BuildInvoker::ToolingApi))
        ));
        assert!(matches!(
            CommandLineInvoker::invoker_args(BuildInvoker::ColdDaemonToolingApi),
            Err(ExecutionError::UnsupportedInvoker(
                BuildInvoker::ColdDaemonToolingApi
            ))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn warmups_never_reach_the_sink() {
        let engine = CommandLineInvoker::new("true");
        let mut scenario = scenario(BuildInvoker::CliNoDaemon, 2, 3);
        let mut sink = TestSink::default();

        engine
            .drive(&mut scenario, &settings(BuildInvoker::CliNoDaemon), &mut sink)
            .unwrap();

        assert_eq!(sink.results.len(), 3);
        assert_eq!(sink.results[0].display_name, "measured build #1");
        assert_eq!(sink.results[2].display_name, "measured build #3");
        assert!(sink.results.iter().all(|result| result.successful));
    }

    #[cfg(unix)]
    #[test]
    fn failed_builds_are_recorded_as_unsuccessful_samples() {
        let engine = CommandLineInvoker::new("false");
        let mut scenario = scenario(BuildInvoker::Maven, 0, 2);
        let mut sink = TestSink::default();

        engine
            .drive(&mut scenario, &settings(BuildInvoker::Maven), &mut sink)
            .unwrap();

        assert_eq!(sink.results.len(), 2);
        assert!(sink.results.iter().all(|result| !result.successful));
    }

    #[test]
    fn missing_program_is_an_io_failure() {
        let engine = CommandLineInvoker::new("build-bench-no-such-program");
        let mut scenario = scenario(BuildInvoker::Maven, 0, 1);
        let mut sink = TestSink::default();

        let result = engine.drive(&mut scenario, &settings(BuildInvoker::Maven), &mut sink);

        assert!(matches!(result, Err(ExecutionError::Io(_))));
        assert!(sink.results.is_empty());
    }
}
