//! Read-side commands: tables, schema, rows and changelog

use crate::changes::{ChangeTracker, ChangelogEntry};
use crate::commands::sync::print_change;
use crate::error::Result;
use crate::query::{QueryFacade, TableInfo};
use crate::schema::{StoredRow, StoredValue};
use std::collections::BTreeMap;

/// Tables per template; all templates when `template` is `None`
pub async fn cmd_tables(
    query: &QueryFacade<'_>,
    template: Option<&str>,
) -> Result<BTreeMap<String, Vec<String>>> {
    match template {
        Some(name) => {
            let tables = query.list_tables(name).await?;
            Ok(BTreeMap::from([(name.to_string(), tables)]))
        }
        None => query.all_databases().await,
    }
}

pub async fn cmd_schema(query: &QueryFacade<'_>, template: &str, table: &str) -> Result<TableInfo> {
    query.table_info(template, table).await
}

/// Rows of a table, or of one sensor's table when `sensor` is given
pub async fn cmd_rows(
    query: &QueryFacade<'_>,
    template: &str,
    table: Option<&str>,
    sensor: Option<&str>,
    limit: usize,
) -> Result<Vec<StoredRow>> {
    match (table, sensor) {
        (_, Some(sensor_id)) => query.latest_sensor_rows(template, sensor_id, limit).await,
        (Some(table), None) => query.fetch_rows(template, table, limit).await,
        (None, None) => Err(crate::error::Error::Config(
            "either a table or --sensor is required".to_string(),
        )),
    }
}

pub fn cmd_changelog(tracker: &ChangeTracker, template: &str) -> Result<Vec<ChangelogEntry>> {
    tracker.history(template)
}

pub fn print_tables(databases: &BTreeMap<String, Vec<String>>) {
    println!("\n🗄  Stores\n");
    if databases.is_empty() {
        println!("No templates stored.");
        return;
    }
    for (template, tables) in databases {
        println!("• {}", template);
        if tables.is_empty() {
            println!("  (no tables yet, run 'sensorhub sync')");
        }
        for table in tables {
            println!("  - {}", table);
        }
    }
}

pub fn print_table_info(info: &TableInfo) {
    println!("\nTable {} ({})\n", info.table, info.template);
    println!("  {:<24} {:<16} {:<8} {}", "COLUMN", "TYPE", "NULL", "KEY");
    for column in &info.columns {
        println!(
            "  {:<24} {:<16} {:<8} {}",
            column.name,
            column.column_type,
            if column.nullable { "yes" } else { "no" },
            if column.primary_key { "PK" } else { "" }
        );
    }
    if !info.indexes.is_empty() {
        println!("\n  Indexes: {}", info.indexes.join(", "));
    }
}

pub fn print_rows(rows: &[StoredRow]) {
    let Some(first) = rows.first() else {
        println!("No rows.");
        return;
    };

    let header: Vec<&str> = first.columns.iter().map(|(name, _)| name.as_str()).collect();
    println!("{}", header.join("\t"));
    for row in rows {
        let cells: Vec<String> = row
            .columns
            .iter()
            .map(|(_, value)| match value {
                StoredValue::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

pub fn print_changelog(template: &str, entries: &[ChangelogEntry]) {
    println!("\n📜 Changelog for {}\n", template);
    if entries.is_empty() {
        println!("No entries recorded. Run 'sensorhub sync' first.");
        return;
    }
    for entry in entries {
        println!(
            "• {} [{}] v{} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            entry.template_version,
            &entry.template_hash[..entry.template_hash.len().min(12)]
        );
        for change in &entry.changes {
            print_change(change);
        }
    }
}
