use std::{fs, path::PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use sysinfo::{CpuExt, System, SystemExt};

use build_bench::engine::CommandLineInvoker;
use build_bench::flamegraph::NoProfilerGraphGenerator;
use build_bench::logging;
use build_bench::results::CsvFormat;
use build_bench::runners::{
    run_experiment, GradleExperimentRunner, MavenExperimentRunner,
};
use build_bench::{
    BenchmarkResultCollector, ExperimentRunner, ExperimentSpec, MeasuredOperationList,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a directory containing experiment metadata files
    #[arg(short, long, default_value = "experiments")]
    experiments: PathBuf,

    /// Path to a directory to dump outputs in
    #[arg(short, long, default_value = "results")]
    output: PathBuf,

    /// If true, collects system information (e.g. CPU, memory, etc...) in the output
    #[arg(long)]
    collect_sysinfo: bool,
}

fn runner_for(spec: &ExperimentSpec) -> Box<dyn ExperimentRunner> {
    match spec {
        ExperimentSpec::Gradle(gradle) => {
            let program = gradle
                .invocation
                .distribution
                .home
                .join("bin")
                .join("gradle");
            Box::new(GradleExperimentRunner::new(Box::new(
                CommandLineInvoker::new(program),
            )))
        }
        ExperimentSpec::Maven(maven) => {
            let program = maven.invocation.installation.home.join("bin").join("mvn");
            Box::new(MavenExperimentRunner::new(Box::new(
                CommandLineInvoker::new(program),
            )))
        }
    }
}

fn collect_host_info() -> serde_json::Value {
    let mut system = System::new_all();
    system.refresh_all();
    json!({
        "os": system.long_os_version(),
        "cpu": system.cpus().first().map(|cpu| cpu.brand()),
        "cpu_count": system.cpus().len(),
        "total_memory_bytes": system.total_memory(),
    })
}

fn main() -> anyhow::Result<()> {
    human_panic::setup_panic!();
    logging::init();

    let args = Args::parse();

    let start_time = Utc::now();

    let specs = build_bench::load_all(
        &args
            .experiments
            .canonicalize()
            .context("could not canonicalize experiments directory")?,
    )?;
    if specs.is_empty() {
        log::warn!("no experiments found, nothing to do");
        return Ok(());
    }

    let collector = BenchmarkResultCollector::new();
    let mut flame_graphs = NoProfilerGraphGenerator::new(args.output.join("flame-graphs"));

    log::info!("running {} experiments...", specs.len());
    let mut runs = Vec::new();
    for spec in &specs {
        let mut results = MeasuredOperationList::new();
        let mut runner = runner_for(spec);
        match run_experiment(
            runner.as_mut(),
            spec,
            &collector,
            &mut flame_graphs,
            &mut results,
        ) {
            Ok(()) => log::debug!("[{}] experiment run recorded", spec.display_name()),
            Err(err) => log::warn!(
                "[{}] experiment failed: {err:#}, continuing...",
                spec.display_name()
            ),
        }
        runs.push(json!({
            "name": spec.display_name().to_string(),
            "backend": spec.kind(),
            "operations": results,
        }));
    }

    let mut output = json!({ "runs": runs });
    if args.collect_sysinfo {
        output["system"] = collect_host_info();
    }
    let output = serde_json::to_string_pretty(&output)?;

    let timestamp = start_time.format("%Y-%m-%dT%H-%M-%S%z");
    let output_file_path = args.output.join(format!("results.{timestamp}.json"));
    log::info!(
        "writing result output to {}...",
        output_file_path.to_string_lossy()
    );
    fs::create_dir_all(&args.output).context("could not create output directory structure")?;
    fs::write(&output_file_path, output).context(format!(
        "could not write to output file {}",
        output_file_path.to_string_lossy()
    ))?;

    let csv_file_path = args.output.join(format!("samples.{timestamp}.csv"));
    log::info!(
        "writing sample output to {}...",
        csv_file_path.to_string_lossy()
    );
    collector
        .write_csv(&csv_file_path, CsvFormat::Long)
        .context("could not write sample CSV")?;

    Ok(())
}
