//! Line ingestion
//!
//! Parses one raw line with its template, resolves each sensor to its table
//! and commits one row per known sensor. Per-line and per-sensor problems are
//! absorbed here and returned as an `IngestReport`; they never abort a caller's
//! poll loop.

use crate::error::{Error, Result};
use crate::parse::parse_line;
use crate::schema::StoreRegistry;
use crate::template::Template;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, warn};

/// Overall result of ingesting one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// At least one row was committed
    Stored,
    /// The line carried no sensor data
    Empty,
    /// Every sensor in the line is unknown to the template
    NoKnownSensors,
    /// Every known sensor's insert failed
    Failed,
    /// The template's store could not be reached; retry next cycle
    StorageUnavailable,
}

/// A per-sensor failure recorded while ingesting a line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorError {
    pub sensor_id: String,
    pub message: String,
}

/// What happened to one raw line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub template: String,
    pub outcome: IngestOutcome,
    pub rows_inserted: usize,
    pub unknown_sensors: Vec<String>,
    pub errors: Vec<SensorError>,
}

impl IngestReport {
    fn new(source: &str, template: &str) -> Self {
        Self {
            source: source.to_string(),
            template: template.to_string(),
            outcome: IngestOutcome::Empty,
            rows_inserted: 0,
            unknown_sensors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == IngestOutcome::Stored
    }
}

/// Ingest one raw line stamped with the current time
pub async fn ingest(
    registry: &StoreRegistry,
    template: &Template,
    source: &str,
    raw_line: &str,
) -> IngestReport {
    ingest_at(registry, template, source, raw_line, Utc::now()).await
}

/// Ingest one raw line with an explicit row timestamp
pub async fn ingest_at(
    registry: &StoreRegistry,
    template: &Template,
    source: &str,
    raw_line: &str,
    timestamp: DateTime<Utc>,
) -> IngestReport {
    let mut report = IngestReport::new(source, &template.name);

    let parsed = parse_line(raw_line, &template.parsing);
    if parsed.is_empty() {
        debug!(source = %source, template = %template.name, "Line carried no sensor data");
        return report;
    }

    let mut known = Vec::with_capacity(parsed.sensors.len());
    for reading in &parsed.sensors {
        match template.sensor(&reading.sensor_id) {
            Some(sensor) => known.push((sensor, reading)),
            None => {
                warn!(
                    source = %source,
                    template = %template.name,
                    sensor = %reading.sensor_id,
                    "Unknown sensor, skipping"
                );
                report.unknown_sensors.push(reading.sensor_id.clone());
            }
        }
    }
    if known.is_empty() {
        report.outcome = IngestOutcome::NoKnownSensors;
        return report;
    }

    let store = match registry.ensure_database(template).await {
        Ok(store) => store,
        Err(e) => {
            error!(source = %source, template = %template.name, "Cannot open store: {}", e);
            // unreachable stores are retried next cycle; anything else is permanent
            report.outcome = match e {
                Error::StorageUnavailable(_) => IngestOutcome::StorageUnavailable,
                _ => IngestOutcome::Failed,
            };
            report.errors.push(SensorError {
                sensor_id: String::new(),
                message: e.to_string(),
            });
            return report;
        }
    };

    let mut storage_down = false;
    for (sensor, reading) in known {
        let inserted = async {
            let table = store.ensure_table(sensor).await?;
            let values = table.encode_row(reading, &timestamp);
            store.insert_row(&table, values).await
        }
        .await;

        match inserted {
            Ok(id) => {
                debug!(sensor = %sensor.sensor_id, table = %sensor.table_name, id, "Stored row");
                report.rows_inserted += 1;
            }
            Err(e) => {
                error!(
                    source = %source,
                    template = %template.name,
                    sensor = %sensor.sensor_id,
                    table = %sensor.table_name,
                    line = %raw_line.trim(),
                    "Insert failed: {}",
                    e
                );
                storage_down |= matches!(e, Error::StorageUnavailable(_));
                report.errors.push(SensorError {
                    sensor_id: sensor.sensor_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    report.outcome = if report.rows_inserted > 0 {
        IngestOutcome::Stored
    } else if storage_down {
        IngestOutcome::StorageUnavailable
    } else {
        IngestOutcome::Failed
    };
    report
}

/// Per-outcome line counters, aggregated over a replay or a live source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub lines: usize,
    pub stored_lines: usize,
    pub rows_inserted: usize,
    pub empty_lines: usize,
    pub unknown_only_lines: usize,
    pub failed_lines: usize,
}

impl LineStats {
    pub fn add(&mut self, report: &IngestReport) {
        self.lines += 1;
        self.rows_inserted += report.rows_inserted;
        match report.outcome {
            IngestOutcome::Stored => self.stored_lines += 1,
            IngestOutcome::NoKnownSensors => self.unknown_only_lines += 1,
            IngestOutcome::Empty => self.empty_lines += 1,
            IngestOutcome::Failed | IngestOutcome::StorageUnavailable => self.failed_lines += 1,
        }
    }
}

/// Ingest every line of a captured log file in order.
///
/// `on_line` is called after each line, e.g. to advance a progress bar.
pub async fn replay_file<F>(
    registry: &StoreRegistry,
    template: &Template,
    path: &Path,
    mut on_line: F,
) -> Result<LineStats>
where
    F: FnMut(&IngestReport),
{
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let source = path.display().to_string();
    let mut stats = LineStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let report = ingest(registry, template, &source, &line).await;
        stats.add(&report);
        on_line(&report);
    }

    Ok(stats)
}
