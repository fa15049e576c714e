//! Output rendering and progress display.
//!
//! Tables go through `tabled`, JSON through serde. Progress and status
//! lines go to stderr so stdout stays scriptable.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tabled::{Table, Tabled, settings::Style};

use mandelbox_core::LaunchStage;

use crate::cli::OutputFormat;
use crate::error::CliError;

// ── Render dispatchers ───────────────────────────────────────────────

/// Render rows as a table or as a JSON array.
pub fn render_list<R>(format: OutputFormat, rows: &[R]) -> Result<String, CliError>
where
    R: Tabled + serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(render_table(rows)),
        OutputFormat::Json => {
            serde_json::to_string_pretty(rows).map_err(|e| CliError::Render(e.to_string()))
        }
    }
}

pub fn render_table<R: Tabled>(rows: &[R]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    println!("{output}");
}

// ── Progress ─────────────────────────────────────────────────────────

/// A stderr spinner, hidden in quiet mode.
pub fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// What the spinner says while the launcher sits in `stage`.
pub fn stage_message(stage: &LaunchStage) -> &'static str {
    match stage {
        LaunchStage::Idle => "Starting",
        LaunchStage::Authenticating => "Signing in",
        LaunchStage::CheckingPayment => "Checking subscription",
        LaunchStage::AwaitingPayment => "Waiting for a paid plan",
        LaunchStage::FindingRegions => "Finding the nearest region",
        LaunchStage::CreatingMandelbox => "Requesting a browser",
        LaunchStage::SpinningUpHost => "Waiting for the host",
        LaunchStage::Ready => "Connecting",
        LaunchStage::Failed(_) => "Failed",
        LaunchStage::UpdatePending => "Waiting for an update",
        LaunchStage::SignedOut => "Signed out",
        LaunchStage::Stopped => "Stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled, serde::Serialize)]
    struct Row {
        name: &'static str,
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(render_table::<Row>(&[]), "");
    }

    #[test]
    fn json_rows_are_an_array() {
        let out = render_list(OutputFormat::Json, &[Row { name: "a" }]);
        assert!(matches!(out, Ok(ref s) if s.starts_with('[') && s.contains("\"name\": \"a\"")));
    }
}
