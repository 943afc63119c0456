//! Ingest and replay commands

use crate::error::Result;
use crate::ingest::{ingest, replay_file, IngestOutcome, IngestReport, LineStats};
use crate::progress::{advance_progress, finish_progress, start_progress_bar};
use crate::schema::StoreRegistry;
use crate::template::TemplateStore;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Source name recorded for lines passed on the command line
pub const CLI_SOURCE: &str = "cli";

/// Ingest a single raw line with a stored template
pub async fn cmd_ingest(
    templates: &TemplateStore,
    registry: &StoreRegistry,
    template: &str,
    line: &str,
) -> Result<IngestReport> {
    let template = templates.load(template)?;
    Ok(ingest(registry, &template, CLI_SOURCE, line).await)
}

/// Replay a captured log file line by line
pub async fn cmd_replay(
    templates: &TemplateStore,
    registry: &StoreRegistry,
    template: &str,
    path: &Path,
    show_progress: bool,
) -> Result<LineStats> {
    let template = templates.load(template)?;

    let progress = if show_progress {
        start_progress_bar(count_lines(path)?, "Replaying lines")
    } else {
        None
    };

    let stats = replay_file(registry, &template, path, |_| advance_progress(&progress)).await?;
    finish_progress(progress, "Lines replayed");

    info!(
        template = %template.name,
        lines = stats.lines,
        rows = stats.rows_inserted,
        "Replay finished"
    );
    Ok(stats)
}

fn count_lines(path: &Path) -> Result<u64> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut count = 0;
    for line in reader.split(b'\n') {
        if !line?.iter().all(u8::is_ascii_whitespace) {
            count += 1;
        }
    }
    Ok(count)
}

pub fn print_ingest_report(report: &IngestReport) {
    let status = match report.outcome {
        IngestOutcome::Stored => "✓ Stored",
        IngestOutcome::Empty => "⚠ No sensor data in line",
        IngestOutcome::NoKnownSensors => "⚠ No sensor in line is known to the template",
        IngestOutcome::Failed => "✗ Ingest failed",
        IngestOutcome::StorageUnavailable => "✗ Storage unavailable",
    };
    println!("{}", status);
    println!("  Template: {}", report.template);
    println!("  Rows inserted: {}", report.rows_inserted);
    if !report.unknown_sensors.is_empty() {
        println!("  Unknown sensors: {}", report.unknown_sensors.join(", "));
    }
    for error in &report.errors {
        if error.sensor_id.is_empty() {
            println!("  Error: {}", error.message);
        } else {
            println!("  Error ({}): {}", error.sensor_id, error.message);
        }
    }
}

pub fn print_line_stats(stats: &LineStats) {
    println!("\n✓ Replay complete");
    println!("  Lines read: {}", stats.lines);
    println!("  Lines stored: {}", stats.stored_lines);
    println!("  Rows inserted: {}", stats.rows_inserted);
    println!("  Empty lines: {}", stats.empty_lines);
    println!("  Lines with only unknown sensors: {}", stats.unknown_only_lines);
    println!("  Failed lines: {}", stats.failed_lines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::Error;
    use crate::template::tests::weather_template;
    use tempfile::TempDir;

    fn setup() -> (TemplateStore, StoreRegistry, TempDir) {
        let tmp = TempDir::new().unwrap();
        let templates = TemplateStore::open(tmp.path().join("templates")).unwrap();
        templates.save(&weather_template()).unwrap();
        let registry = StoreRegistry::new(tmp.path().join("databases"), StorageConfig::default());
        (templates, registry, tmp)
    }

    #[tokio::test]
    async fn test_cmd_ingest() {
        let (templates, registry, _tmp) = setup();

        let report = cmd_ingest(&templates, &registry, "weather", "Sensor:outdoor_01;T:15.3;P:1013.2")
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.source, CLI_SOURCE);

        let missing = cmd_ingest(&templates, &registry, "garden", "Sensor:x;T:1").await;
        assert!(matches!(missing, Err(Error::TemplateNotFound(_))));
    }

    #[tokio::test]
    async fn test_cmd_replay() {
        let (templates, registry, tmp) = setup();
        let log = tmp.path().join("capture.log");
        std::fs::write(&log, "Sensor:outdoor_01;T:1;P:2\n\nSensor:indoor_01;T:20\n").unwrap();
        assert_eq!(count_lines(&log).unwrap(), 2);

        let stats = cmd_replay(&templates, &registry, "weather", &log, false).await.unwrap();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.rows_inserted, 2);
    }
}
