//! Measured operations, the per-iteration sample relay, and the result collector.
//!
//! The caller owns a [`MeasuredOperationList`] for the whole run; during a run it is
//! written only by the [`SampleRelay`], one append per completed measured iteration,
//! so partial progress is observable and survives an interrupted run. The
//! [`BenchmarkResultCollector`] accumulates the same samples across experiments for
//! export.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{RawInvocationResult, SampleSink};
use crate::scenario::ScenarioDefinition;

/// CSV layouts for exported samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsvFormat {
    /// One row per sample. The fixed export layout for machine consumption.
    #[default]
    Long,
    /// One row per iteration, one column per sample kind.
    Wide,
}

/// Kind of sample extracted from each raw invocation result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleKind {
    /// Wall-clock execution time of the whole build.
    ExecutionTime,
    /// Duration of one named sub-operation measured inside the build.
    BuildOperation(String),
}

impl SampleKind {
    /// Column name of this sample kind in exported reports.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ExecutionTime => "execution time",
            Self::BuildOperation(name) => name,
        }
    }

    /// Extracts this sample from a raw result, if present.
    #[must_use]
    pub fn extract(&self, result: &RawInvocationResult) -> Option<Duration> {
        match self {
            Self::ExecutionTime => result.execution_time,
            Self::BuildOperation(name) => result.build_operations.get(name).copied(),
        }
    }
}

/// One per-iteration record of a measured build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredOperation {
    /// 1-based index of the measured iteration this record belongs to.
    pub iteration: usize,
    /// Wall-clock execution time of the build.
    pub execution_time: Duration,
    /// Durations of measured sub-operations, keyed by operation name.
    pub build_operations: BTreeMap<String, Duration>,
    /// Whether the build completed successfully.
    pub successful: bool,
}

/// Ordered, append-only sequence of per-iteration records.
///
/// Owned by the caller for the whole run; mutated only by the relay during a single
/// run, never read concurrently with being written.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MeasuredOperationList {
    operations: Vec<MeasuredOperation>,
}

impl MeasuredOperationList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record. Records arrive in iteration order.
    pub fn append(&mut self, operation: MeasuredOperation) {
        self.operations.push(operation);
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no operation has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterates over the records in iteration order.
    pub fn iter(&self) -> impl Iterator<Item = &MeasuredOperation> {
        self.operations.iter()
    }

    /// Sum of all recorded execution times.
    #[must_use]
    pub fn total_execution_time(&self) -> Duration {
        self.operations
            .iter()
            .map(|operation| operation.execution_time)
            .sum()
    }

    /// Average execution time, `None` while the list is empty.
    #[must_use]
    pub fn average_execution_time(&self) -> Option<Duration> {
        let count = u32::try_from(self.operations.len()).ok()?;
        if count == 0 {
            return None;
        }
        Some(self.total_execution_time() / count)
    }
}

#[derive(Clone, Debug)]
struct SampleRow {
    scenario: String,
    iteration: usize,
    sample: String,
    value: Duration,
}

#[derive(Debug, Default)]
struct CollectorInner {
    scenarios: Vec<String>,
    rows: Vec<SampleRow>,
}

/// Accumulates samples across all experiments run in a process, for export.
///
/// Runners register each scenario with [`BenchmarkResultCollector::scenario`] before
/// starting it and forward every completed measured iteration to the returned
/// [`ScenarioReporter`].
#[derive(Clone, Debug, Default)]
pub struct BenchmarkResultCollector {
    inner: Arc<Mutex<CollectorInner>>,
}

impl BenchmarkResultCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scenario and returns the reporting sink for its measured iterations.
    #[must_use]
    pub fn scenario(
        &self,
        scenario: &ScenarioDefinition,
        sample_kinds: Vec<SampleKind>,
    ) -> ScenarioReporter {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scenarios
            .push(scenario.name.clone());
        ScenarioReporter {
            inner: Arc::clone(&self.inner),
            scenario: scenario.name.clone(),
            sample_kinds,
            iteration: 0,
        }
    }

    /// Names of all scenarios registered so far, in registration order.
    #[must_use]
    pub fn scenario_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scenarios
            .clone()
    }

    /// Total number of samples collected so far.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .len()
    }

    /// Writes all collected samples to a CSV file.
    ///
    /// The long layout emits one row per sample; the wide layout one row per
    /// iteration with one column per sample kind seen across all scenarios.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the file cannot be created or written.
    pub fn write_csv(&self, path: &Path, format: CsvFormat) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer = BufWriter::new(File::create(path)?);
        match format {
            CsvFormat::Long => write_long_csv(&mut writer, &inner.rows)?,
            CsvFormat::Wide => write_wide_csv(&mut writer, &inner.rows)?,
        }
        writer.flush()
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn millis(value: Duration) -> String {
    format!("{:.3}", value.as_secs_f64() * 1_000.0)
}

fn write_long_csv(writer: &mut impl Write, rows: &[SampleRow]) -> io::Result<()> {
    writeln!(writer, "scenario,iteration,sample,value_ms")?;
    for row in rows {
        writeln!(
            writer,
            "{},{},{},{}",
            csv_field(&row.scenario),
            row.iteration,
            csv_field(&row.sample),
            millis(row.value)
        )?;
    }
    Ok(())
}

fn write_wide_csv(writer: &mut impl Write, rows: &[SampleRow]) -> io::Result<()> {
    let samples: BTreeSet<&str> = rows.iter().map(|row| row.sample.as_str()).collect();
    let mut cells: BTreeMap<(&str, usize), BTreeMap<&str, Duration>> = BTreeMap::new();
    for row in rows {
        cells
            .entry((row.scenario.as_str(), row.iteration))
            .or_default()
            .insert(row.sample.as_str(), row.value);
    }

    write!(writer, "scenario,iteration")?;
    for sample in &samples {
        write!(writer, ",{}", csv_field(sample))?;
    }
    writeln!(writer)?;
    for ((scenario, iteration), values) in &cells {
        write!(writer, "{},{iteration}", csv_field(scenario))?;
        for sample in &samples {
            match values.get(sample) {
                Some(value) => write!(writer, ",{}", millis(*value))?,
                None => write!(writer, ",")?,
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Reporting sink bound to one registered scenario.
#[derive(Debug)]
pub struct ScenarioReporter {
    inner: Arc<Mutex<CollectorInner>>,
    scenario: String,
    sample_kinds: Vec<SampleKind>,
    iteration: usize,
}

impl ScenarioReporter {
    /// Records all configured sample kinds out of one raw iteration result.
    pub fn report(&mut self, result: &RawInvocationResult) {
        self.iteration += 1;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for kind in &self.sample_kinds {
            if let Some(value) = kind.extract(result) {
                inner.rows.push(SampleRow {
                    scenario: self.scenario.clone(),
                    iteration: self.iteration,
                    sample: kind.name().to_string(),
                    value,
                });
            }
        }
    }
}

/// Converts each raw per-iteration result into a measured operation, appending it to
/// the shared results list and forwarding the raw result to the collector's reporter.
///
/// Called exactly once per completed measured iteration, in iteration order, from the
/// execution engine's thread. A malformed sample (one without an execution time) is
/// dropped with a recorded count instead of aborting the scenario; the dropped
/// iteration still consumes its index so later samples stay correlated.
#[derive(Debug)]
pub struct SampleRelay<'a> {
    results: &'a mut MeasuredOperationList,
    reporter: ScenarioReporter,
    iteration: usize,
    dropped_samples: usize,
}

impl<'a> SampleRelay<'a> {
    /// Creates a relay writing into `results` and forwarding to `reporter`.
    #[must_use]
    pub fn new(results: &'a mut MeasuredOperationList, reporter: ScenarioReporter) -> Self {
        Self {
            results,
            reporter,
            iteration: 0,
            dropped_samples: 0,
        }
    }

    /// Number of malformed samples dropped so far.
    #[must_use]
    pub fn dropped_samples(&self) -> usize {
        self.dropped_samples
    }
}

impl SampleSink for SampleRelay<'_> {
    fn on_iteration(&mut self, result: &RawInvocationResult) {
        self.iteration += 1;
        let Some(execution_time) = result.execution_time else {
            self.dropped_samples += 1;
            log::warn!(
                "dropping malformed sample for {} (no execution time), continuing...",
                result.display_name
            );
            return;
        };
        self.results.append(MeasuredOperation {
            iteration: self.iteration,
            execution_time,
            build_operations: result.build_operations.clone(),
            successful: result.successful,
        });
        self.reporter.report(result);
    }
}
