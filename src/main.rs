use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use trunkpeak::{
    call_record::CallRecord,
    cli::{Cli, OutputFormat},
    config::ReportConfig,
    csv_output::CsvSink,
    error::ReportError,
    json_output::JsonReport,
    pipeline::{ReportPipeline, RunReport, SinkFailure},
    sink::{ResultSink, SqliteSink},
    source::TwilioSource,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; warnings always, everything with --debug
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One line per eligible call in --verbose mode
fn print_call(record: &CallRecord) {
    let interval = record.to_interval().ok();
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    println!(
        "{} {} {} {} {} {} {} {} {} {} {} {}",
        record.sid,
        interval.as_ref().map(|i| i.start_epoch.to_string()).unwrap_or_default(),
        interval.as_ref().map(|i| i.end_epoch.to_string()).unwrap_or_default(),
        interval.as_ref().map(|i| i.duration_secs().to_string()).unwrap_or_default(),
        field(&record.date_created),
        field(&record.start_time),
        field(&record.end_time),
        field(&record.to_formatted),
        field(&record.from_formatted),
        record.direction,
        field(&record.duration),
        record.status
    );
}

/// Print the top seconds table and run summary
fn print_text_report(report: &RunReport, config: &ReportConfig, database_written: bool) {
    if config.output.verbose {
        for record in &report.records {
            print_call(record);
        }
    }

    println!("\nTop seconds in epoch which incurred the most concurrent calls:\n");
    println!("TIMESTAMP    COUNT");
    for entry in &report.top_k {
        println!("{}   {}", entry.epoch, entry.count);
    }

    let outcome = &report.outcome;
    println!(
        "\n{} calls fetched, {} trunking calls eligible, {} counted",
        report.fetched, report.eligible, outcome.counted
    );
    if !outcome.rejected.is_empty() {
        println!("{} calls rejected (end before start)", outcome.rejected.len());
    }
    if !report.unusable.is_empty() {
        println!("{} calls skipped (missing timestamps)", report.unusable.len());
    }
    if outcome.skipped_zero_duration > 0 {
        println!(
            "{} zero-duration calls excluded",
            outcome.skipped_zero_duration
        );
    }

    for failure in &report.persistence_failures {
        eprintln!(
            "Failed to write {} to {}: {}",
            failure.stage, failure.sink, failure.error
        );
    }

    if database_written {
        println!(
            "\nThe following sqlite3 database file has been written to disk for data analysis:\n{}\nTo save space, you may want to delete this.\n",
            config.database_path().display()
        );
    }
}

/// Open the run's sinks; a sink that cannot be opened is reported as a failure
fn open_sinks(config: &ReportConfig) -> (Vec<Box<dyn ResultSink>>, Vec<SinkFailure>) {
    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();
    let mut failures = Vec::new();

    match SqliteSink::open(config.database_path(), config.output.verbose) {
        Ok(sink) => sinks.push(Box::new(sink)),
        Err(error) => {
            tracing::error!("cannot open run database: {}", error);
            failures.push(SinkFailure {
                sink: "sqlite".to_string(),
                stage: "open",
                error,
            });
        }
    }
    if config.output.export_csv {
        sinks.push(Box::new(CsvSink::new(config.csv_path())));
    }

    (sinks, failures)
}

/// Fetch, count, persist and print; returns the run's first persistence error
fn run(args: &Cli) -> Result<Option<ReportError>> {
    let config = args.to_config()?;
    tracing::debug!(?config, "run configuration");

    let source = TwilioSource::new(config.provider.clone()).map_err(ReportError::from)?;

    // Nothing is written unless the whole call log was fetched
    let mut report =
        ReportPipeline::from_config(&config).run_with(&source, || open_sinks(&config))?;
    let database_written = !report
        .persistence_failures
        .iter()
        .any(|failure| failure.stage == "open");

    match args.format {
        OutputFormat::Text => print_text_report(&report, &config, database_written),
        OutputFormat::Json => {
            let csv = config
                .output
                .export_csv
                .then(|| config.csv_path().display().to_string());
            let database =
                database_written.then(|| config.database_path().display().to_string());
            let json = JsonReport::from_run(&report)
                .with_artifacts(database, csv)
                .to_json()
                .context("Failed to serialize JSON report")?;
            println!("{}", json);
        }
    }

    Ok(report.persistence_error())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    init_tracing(args.debug);

    match run(&args) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(err)) => {
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code())
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            match err.downcast_ref::<ReportError>() {
                Some(report_err) => ExitCode::from(report_err.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}
