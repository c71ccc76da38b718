//! table-export - Bulk partition export from a cloud table store
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use table_export::config::{CliArgs, ExportConfig};
use table_export::export::{ExportCoordinator, RunStatus};
use table_export::keys::KeySource;
use table_export::progress::{print_header, print_summary, ProgressReporter};
use table_export::table::{
    AzureCliTokenProvider, HttpTableClient, StaticTokenProvider, TokenProvider,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<RunStatus> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = ExportConfig::from_args(args).context("Invalid configuration")?;

    let keys = KeySource::from_path(&config.input_path).context("Failed to load partition keys")?;

    if config.show_progress {
        print_header(
            &config.table_url.to_display_string(),
            config.worker_count,
            keys.len(),
            &config.output_path.display().to_string(),
        );
    }

    let credentials: Arc<dyn TokenProvider> = match &config.token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(AzureCliTokenProvider::new(config.tenant_id.clone())),
    };

    let transport = HttpTableClient::new(config.table_url.clone(), config.api_version.clone())
        .context("Failed to build HTTP client")?;

    let show_progress = config.show_progress;
    let mut coordinator = ExportCoordinator::new(config, Arc::new(transport), credentials);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight requests...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = show_progress.then(ProgressReporter::new);
    if let Some(p) = &progress {
        p.set_status("Checking credentials...");
        let reporter = p.clone();
        coordinator = coordinator.with_progress(move |snapshot| reporter.update(snapshot));
    }

    let result = coordinator.run(keys);

    if let Some(p) = &progress {
        match &result {
            Ok(report) => p.finish(&format!("Export {}", report.status.label())),
            Err(_) => p.finish_and_clear(),
        }
    }

    let report = result.context("Export failed")?;

    print_summary(&report);

    match report.status {
        RunStatus::Complete => {}
        RunStatus::CompletedWithErrors => {
            info!(failed = report.failed, partial = report.partial, "Export completed with errors")
        }
        RunStatus::Cancelled => info!("Export was interrupted before completion"),
    }

    Ok(report.status)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("table_export=debug,warn")
    } else {
        EnvFilter::new("table_export=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
