//! The Gradle backend: daemon-capable, invocable through the CLI or the tooling API.

use std::env;
use std::path::{Path, PathBuf};

use crate::engine::ScenarioInvoker;
use crate::experiments::{ExperimentSpec, GradleExperimentSpec, GradleInvocationSpec};
use crate::invocation::{BuildInvoker, ConfigurationError, InvocationSettings};
use crate::results::SampleRelay;
use crate::scenario::{BuildAction, BuildConfiguration, ScenarioDefinition};

use super::{ExperimentError, ExperimentRunner};

/// Directory under the experiment working directory used as an isolated Gradle user
/// home, so daemon state and caches never leak across projects.
const GRADLE_USER_HOME_NAME: &str = "gradleUserHome";

/// Project property injected into every invocation so the running build process is
/// identifiable when correlating profiling artifacts.
const DISPLAY_NAME_PROPERTY: &str = "buildExperimentDisplayName";

/// Maps an experiment's daemon and tooling-API requests onto an invoker mode.
///
/// The mapping is total and deterministic. When a daemon is requested, the requested
/// mechanism keeps it warm. When the daemon is declined, the tooling API does *not*
/// silently fall back to the command line: it becomes a cold-daemon API invocation,
/// while the command line becomes a one-shot no-daemon invocation.
///
/// # Examples
///
/// ```
/// use build_bench::invocation::BuildInvoker;
/// use build_bench::runners::gradle::invoker_for;
///
/// assert_eq!(invoker_for(false, true), BuildInvoker::ColdDaemonToolingApi);
/// ```
#[must_use]
pub fn invoker_for(use_daemon: bool, use_tooling_api: bool) -> BuildInvoker {
    let daemon_invoker = if use_tooling_api {
        BuildInvoker::ToolingApi
    } else {
        BuildInvoker::Cli
    };
    if use_daemon {
        daemon_invoker
    } else if daemon_invoker == BuildInvoker::ToolingApi {
        BuildInvoker::ColdDaemonToolingApi
    } else {
        BuildInvoker::CliNoDaemon
    }
}

/// Java home of the currently executing process, not of the distribution under test.
///
/// The harness runtime and the measured tool runtime may differ; the scenario's
/// build configuration deliberately pins the harness one.
#[must_use]
pub fn current_java_home() -> Option<PathBuf> {
    env::var_os("JAVA_HOME").map(PathBuf::from)
}

/// Runs Gradle experiments through an external scenario-execution engine.
pub struct GradleExperimentRunner {
    engine: Box<dyn ScenarioInvoker>,
}

impl GradleExperimentRunner {
    /// Creates a runner driving the given engine.
    #[must_use]
    pub fn new(engine: Box<dyn ScenarioInvoker>) -> Self {
        Self { engine }
    }

    fn gradle_spec<'s>(
        &self,
        spec: &'s ExperimentSpec,
    ) -> Result<&'s GradleExperimentSpec, ConfigurationError> {
        match spec {
            ExperimentSpec::Gradle(spec) => Ok(spec),
            other => Err(ConfigurationError::ExperimentKindMismatch {
                expected: self.backend(),
                actual: other.kind(),
            }),
        }
    }

    fn enriched_invocation(spec: &GradleExperimentSpec) -> GradleInvocationSpec {
        spec.invocation.clone().with_additional_args(vec![format!(
            "-P{DISPLAY_NAME_PROPERTY}={}",
            spec.display_name
        )])
    }
}

impl ExperimentRunner for GradleExperimentRunner {
    fn backend(&self) -> &'static str {
        "gradle"
    }

    fn build_settings(
        &self,
        spec: &ExperimentSpec,
        output_directory: &Path,
    ) -> Result<InvocationSettings, ConfigurationError> {
        let spec = self.gradle_spec(spec)?;
        let invocation = Self::enriched_invocation(spec);
        let invoker = invoker_for(invocation.use_daemon, invocation.use_tooling_api);

        let mut builder =
            InvocationSettings::builder(invocation.working_directory.clone(), invoker)
                .output_directory(output_directory)
                .versions(vec![invocation.distribution.version.to_string()])
                .targets(invocation.tasks_to_run.clone())
                .args(invocation.args)
                .user_home(invocation.working_directory.join(GRADLE_USER_HOME_NAME))
                .measured_build_operations(spec.measured_build_operations.clone());
        if let Some(warmup_count) = spec.warmup_count {
            builder = builder.warmup_count(warmup_count);
        }
        if let Some(build_count) = spec.build_count {
            builder = builder.build_count(build_count);
        }
        builder.build()
    }

    fn build_scenario(
        &self,
        spec: &ExperimentSpec,
        settings: &InvocationSettings,
    ) -> Result<ScenarioDefinition, ConfigurationError> {
        let spec = self.gradle_spec(spec)?;
        let distribution = &spec.invocation.distribution;

        Ok(
            ScenarioDefinition::builder(spec.display_name.to_string(), settings.invoker)
                .build_configuration(BuildConfiguration {
                    version: distribution.version.clone(),
                    tool_home: distribution.home.clone(),
                    java_home: current_java_home(),
                    jvm_opts: spec.invocation.jvm_opts.clone(),
                })
                .action(BuildAction::from_targets(settings.targets.clone()))
                .cleanup(BuildAction::from_targets(spec.invocation.clean_tasks.clone()))
                .args(settings.args.clone())
                .system_properties(settings.system_properties.clone())
                .mutators(
                    spec.mutations
                        .iter()
                        .map(|mutation| mutation.create(settings))
                        .collect(),
                )
                .warmup_count(settings.warmup_count)
                .build_count(settings.build_count)
                .output_directory(settings.output_directory.clone())
                .measured_build_operations(settings.measured_build_operations.clone())
                .build(),
        )
    }

    fn invoke(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        relay: &mut SampleRelay<'_>,
    ) -> Result<(), ExperimentError> {
        self.engine.run(scenario, settings, relay)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use semver::Version;

    use super::*;
    use crate::engine::{ExecutionError, SampleSink};
    use crate::experiments::{
        GradleDistribution, Identifier, MavenExperimentSpec, MavenInstallation,
        MavenInvocationSpec,
    };

    #[derive(Debug)]
    struct RejectingEngine;

    impl ScenarioInvoker for RejectingEngine {
        fn run(
            &mut self,
            scenario: &mut ScenarioDefinition,
            _settings: &InvocationSettings,
            _sink: &mut dyn SampleSink,
        ) -> Result<(), ExecutionError> {
            Err(ExecutionError::UnsupportedInvoker(scenario.invoker))
        }
    }

    fn runner() -> GradleExperimentRunner {
        GradleExperimentRunner::new(Box::new(RejectingEngine))
    }

    fn gradle_spec(use_daemon: bool, use_tooling_api: bool) -> ExperimentSpec {
        ExperimentSpec::Gradle(GradleExperimentSpec {
            display_name: Identifier::from("daemon mapping"),
            invocation: GradleInvocationSpec {
                working_directory: PathBuf::from("app"),
                distribution: GradleDistribution {
                    version: Version::new(8, 3, 0),
                    home: PathBuf::from("/opt/gradle-8.3"),
                },
                tasks_to_run: vec!["assemble".to_string()],
                clean_tasks: vec!["clean".to_string()],
                args: vec!["--stacktrace".to_string()],
                jvm_opts: vec!["-Xmx2g".to_string()],
                use_daemon,
                use_tooling_api,
            },
            warmup_count: Some(2),
            build_count: Some(5),
            mutations: Vec::new(),
            measured_build_operations: vec!["ConfigureBuild".to_string()],
        })
    }

    fn maven_spec() -> ExperimentSpec {
        ExperimentSpec::Maven(MavenExperimentSpec {
            display_name: Identifier::from("wrong backend"),
            invocation: MavenInvocationSpec {
                working_directory: PathBuf::from("app"),
                installation: MavenInstallation {
                    version: Version::new(3, 9, 4),
                    home: PathBuf::from("/opt/maven"),
                },
                goals: vec!["package".to_string()],
                args: Vec::new(),
            },
            warmup_count: None,
            build_count: None,
            mutations: Vec::new(),
        })
    }

    #[test]
    fn daemon_mode_mapping_is_total_and_deterministic() {
        assert_eq!(invoker_for(true, true), BuildInvoker::ToolingApi);
        assert_eq!(invoker_for(true, false), BuildInvoker::Cli);
        assert_eq!(invoker_for(false, true), BuildInvoker::ColdDaemonToolingApi);
        assert_eq!(invoker_for(false, false), BuildInvoker::CliNoDaemon);
    }

    #[test]
    fn declining_the_daemon_never_falls_back_from_api_to_cli() {
        // a cold-daemon API invocation, not a CLI one
        assert_eq!(invoker_for(false, true), BuildInvoker::ColdDaemonToolingApi);
    }

    #[test]
    fn settings_carry_the_display_name_argument() {
        let settings = runner()
            .build_settings(&gradle_spec(true, false), Path::new("out"))
            .unwrap();

        assert_eq!(
            settings.args,
            [
                "--stacktrace".to_string(),
                "-PbuildExperimentDisplayName=daemon mapping".to_string(),
            ]
        );
        assert_eq!(settings.versions, ["8.3.0".to_string()]);
        assert_eq!(settings.warmup_count, 2);
        assert_eq!(settings.build_count, 5);
        assert_eq!(
            settings.user_home,
            Some(PathBuf::from("app").join("gradleUserHome"))
        );
    }

    #[test]
    fn scenario_pins_the_harness_runtime_and_the_cleanup_tasks() {
        let runner = runner();
        let spec = gradle_spec(true, false);
        let settings = runner.build_settings(&spec, Path::new("out")).unwrap();

        let scenario = runner.build_scenario(&spec, &settings).unwrap();

        assert_eq!(scenario.name, "daemon mapping");
        assert_eq!(scenario.invoker, BuildInvoker::Cli);
        assert_eq!(scenario.action.targets(), ["assemble".to_string()]);
        assert_eq!(scenario.cleanup.targets(), ["clean".to_string()]);
        let configuration = scenario.build_configuration.unwrap();
        assert_eq!(configuration.tool_home, PathBuf::from("/opt/gradle-8.3"));
        assert_eq!(configuration.java_home, current_java_home());
        assert_eq!(
            scenario.measured_build_operations,
            ["ConfigureBuild".to_string()]
        );
    }

    #[test]
    fn maven_specs_are_rejected_before_anything_starts() {
        let result = runner().build_settings(&maven_spec(), Path::new("out"));

        assert!(matches!(
            result,
            Err(ConfigurationError::ExperimentKindMismatch {
                expected: "gradle",
                actual: "maven",
            })
        ));
    }
}
