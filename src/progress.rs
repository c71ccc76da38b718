//! Progress reporting for the exporter
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::export::{ExportProgress, ExportReport, RunStatus};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Failures listed individually in the summary
const MAX_LISTED_FAILURES: usize = 20;

/// Progress reporter that displays export status
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ExportProgress) {
        let mut msg = format!(
            "Keys: {}/{} ({:.1}/s) | Entities: {} ({:.0}/s) | Downloaded: {} | Workers: {}/{}",
            format_number(progress.keys_done),
            format_number(progress.total_keys as u64),
            progress.keys_per_second(),
            format_number(progress.entities),
            progress.entities_per_second(),
            format_size(progress.bytes, BINARY),
            progress.active_workers,
            progress.total_workers,
        );
        if progress.failures > 0 {
            msg.push_str(&format!(" | Failed: {}", format_number(progress.failures)));
        }

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the export
pub fn print_summary(report: &ExportReport) {
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        report.entities_exported as f64 / duration_secs
    } else {
        0.0
    };

    let title = match report.status {
        RunStatus::Complete => style("Export Complete").green().bold(),
        RunStatus::CompletedWithErrors => style("Export Completed With Errors").yellow().bold(),
        RunStatus::Cancelled => style("Export Cancelled").red().bold(),
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Keys:").bold(), format_number(report.total_keys as u64));
    println!(
        "  {} {}",
        style("Succeeded:").bold(),
        format_number(report.succeeded as u64)
    );
    if report.partial > 0 {
        println!(
            "  {} {}",
            style("Partial:").yellow().bold(),
            format_number(report.partial as u64)
        );
    }
    if report.failed > 0 {
        println!(
            "  {} {}",
            style("Failed:").yellow().bold(),
            format_number(report.failed as u64)
        );
    }
    if report.not_attempted > 0 {
        println!(
            "  {} {}",
            style("Not attempted:").yellow().bold(),
            format_number(report.not_attempted as u64)
        );
    }
    println!(
        "  {} {} ({} columns)",
        style("Entities:").bold(),
        format_number(report.entities_exported),
        report.columns
    );
    println!("  {} {}", style("Downloaded:").bold(), format_size(report.bytes, BINARY));
    if report.retries > 0 {
        println!("  {} {}", style("Retries:").bold(), format_number(report.retries));
    }
    println!(
        "  {} {:.1}s ({:.0} entities/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    println!(
        "  {} {} ({})",
        style("Output:").bold(),
        report.output_path.display(),
        format_size(report.output_bytes, BINARY)
    );

    let listed: Vec<_> = report
        .problems
        .iter()
        .filter_map(|(key, status)| status.reason().map(|reason| (key, reason)))
        .collect();
    if !listed.is_empty() {
        println!();
        println!("  {}", style("Failed keys:").yellow().bold());
        for (key, reason) in listed.iter().take(MAX_LISTED_FAILURES) {
            println!("    {} {}", style(key).bold(), style(reason).dim());
        }
        if listed.len() > MAX_LISTED_FAILURES {
            println!("    ... and {} more", listed.len() - MAX_LISTED_FAILURES);
        }
    }
    println!();
}

/// Print a header at the start of the export
pub fn print_header(table: &str, workers: usize, keys: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("table-export").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Table:").bold(), table);
    println!("  {} {}", style("Keys:").bold(), format_number(keys as u64));
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
