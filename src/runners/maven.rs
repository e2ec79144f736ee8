//! The Maven backend: a single one-shot invocation mode, located through the
//! process-wide `MAVEN_HOME` environment variable.

use std::path::Path;

use crate::engine::{
    CollectorScenarioInvoker, SampleReporterFactory, SampleSink,
};
use crate::environment::{EnvironmentOverride, ScopeInUseError};
use crate::experiments::{ExperimentSpec, MavenExperimentSpec};
use crate::invocation::{BuildInvoker, ConfigurationError, InvocationSettings};
use crate::results::{SampleKind, SampleRelay};
use crate::scenario::{BuildAction, ScenarioDefinition};

use super::{ExperimentError, ExperimentRunner};

/// Environment variable Maven invocations are located through. Overriding it is
/// process-wide, so at most one Maven experiment may be in flight per process.
const MAVEN_HOME_ENV_NAME: &str = "MAVEN_HOME";

/// Adapter narrowing the shared relay to the reporter-factory contract the one-shot
/// engine expects: whatever scenario the engine asks for, it gets the run's relay.
struct RelayReporterFactory<'r, 'a> {
    relay: &'r mut SampleRelay<'a>,
}

impl SampleReporterFactory for RelayReporterFactory<'_, '_> {
    fn scenario_reporter(
        &mut self,
        _scenario: &ScenarioDefinition,
        _sample_kinds: &[SampleKind],
    ) -> &mut dyn SampleSink {
        &mut *self.relay
    }
}

/// Runs Maven experiments through an external scenario-execution engine.
pub struct MavenExperimentRunner {
    engine: Box<dyn CollectorScenarioInvoker>,
}

impl MavenExperimentRunner {
    /// Creates a runner driving the given engine.
    #[must_use]
    pub fn new(engine: Box<dyn CollectorScenarioInvoker>) -> Self {
        Self { engine }
    }

    fn maven_spec<'s>(
        &self,
        spec: &'s ExperimentSpec,
    ) -> Result<&'s MavenExperimentSpec, ConfigurationError> {
        match spec {
            ExperimentSpec::Maven(spec) => Ok(spec),
            other => Err(ConfigurationError::ExperimentKindMismatch {
                expected: self.backend(),
                actual: other.kind(),
            }),
        }
    }
}

impl ExperimentRunner for MavenExperimentRunner {
    fn backend(&self) -> &'static str {
        "maven"
    }

    fn build_settings(
        &self,
        spec: &ExperimentSpec,
        output_directory: &Path,
    ) -> Result<InvocationSettings, ConfigurationError> {
        let spec = self.maven_spec(spec)?;
        let invocation = &spec.invocation;

        let mut builder =
            InvocationSettings::builder(invocation.working_directory.clone(), BuildInvoker::Maven)
                .output_directory(output_directory)
                .versions(vec![invocation.installation.version.to_string()])
                .targets(invocation.goals.clone())
                .args(invocation.args.clone());
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
        let spec = self.maven_spec(spec)?;

        Ok(
            ScenarioDefinition::builder(spec.display_name.to_string(), settings.invoker)
                .action(BuildAction::from_targets(settings.targets.clone()))
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
                .build(),
        )
    }

    fn environment_scope(
        &self,
        spec: &ExperimentSpec,
    ) -> Result<Option<EnvironmentOverride>, ScopeInUseError> {
        // non-maven specs were already rejected while building the settings
        let ExperimentSpec::Maven(spec) = spec else {
            return Ok(None);
        };
        EnvironmentOverride::acquire(MAVEN_HOME_ENV_NAME, &spec.invocation.installation.home)
            .map(Some)
    }

    fn invoke(
        &mut self,
        scenario: &mut ScenarioDefinition,
        settings: &InvocationSettings,
        relay: &mut SampleRelay<'_>,
    ) -> Result<(), ExperimentError> {
        self.engine
            .run(scenario, settings, &mut RelayReporterFactory { relay })?;
        Ok(())
    }
}
