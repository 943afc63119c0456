//! Sync command: bring template stores in line with their templates

use crate::changes::{ChangeRecord, ChangeTracker, SyncStats};
use crate::error::Result;
use crate::schema::StoreRegistry;
use crate::template::TemplateStore;
use tracing::info;

/// Sync all templates, or just `only` when given
pub async fn cmd_sync(
    templates: &TemplateStore,
    tracker: &ChangeTracker,
    registry: &StoreRegistry,
    only: Option<&str>,
) -> Result<SyncStats> {
    let selected = match only {
        Some(name) => vec![templates.load(name)?],
        None => templates.load_all()?,
    };
    info!("Syncing {} template(s)", selected.len());
    Ok(tracker.sync_all(registry, &selected).await)
}

fn describe(change: &ChangeRecord) -> String {
    match change {
        ChangeRecord::CreateTable { db_name, sensors_count } => {
            format!("created store {} with {} sensor table(s)", db_name, sensors_count)
        }
        ChangeRecord::AddSensor { sensor_id, table_name } => {
            format!("added sensor {} -> {}", sensor_id, table_name)
        }
        ChangeRecord::RemoveSensor { sensor_id, table_name } => {
            format!("removed sensor {} (table {} kept)", sensor_id, table_name)
        }
        ChangeRecord::AddField { table_name, field, db_type } => {
            format!("added column {}.{} {}", table_name, field, db_type)
        }
        ChangeRecord::RemoveField { table_name, field } => {
            format!("dropped field {}.{} (column kept)", table_name, field)
        }
        ChangeRecord::RetypeField { table_name, field, from, to } => {
            format!("retyped {}.{} {} -> {}", table_name, field, from, to)
        }
        ChangeRecord::UpdateTable { changes, .. } => changes.clone(),
    }
}

pub fn print_change(change: &ChangeRecord) {
    println!("    - {}", describe(change));
}

pub fn print_sync_stats(stats: &SyncStats) {
    println!("\n✓ Sync complete");
    println!("  Templates synced: {}", stats.synced.len());
    println!("  Templates changed: {}", stats.changed());

    for outcome in stats.synced.iter().filter(|o| o.action.is_some()) {
        if let Some(action) = outcome.action {
            println!("  • {} [{}]", outcome.template, action);
        }
        for change in &outcome.changes {
            print_change(change);
        }
    }

    if !stats.failed.is_empty() {
        println!("\n✗ Failed:");
        for failure in &stats.failed {
            println!("  • {}: {}", failure.template, failure.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::Error;
    use crate::template::tests::weather_template;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cmd_sync() {
        let tmp = TempDir::new().unwrap();
        let templates = TemplateStore::open(tmp.path().join("templates")).unwrap();
        let tracker = ChangeTracker::open(tmp.path().join("changelog")).unwrap();
        let registry = StoreRegistry::new(tmp.path().join("databases"), StorageConfig::default());
        templates.save(&weather_template()).unwrap();

        let stats = cmd_sync(&templates, &tracker, &registry, None).await.unwrap();
        assert_eq!(stats.changed(), 1);
        assert!(tmp.path().join("databases/weather.db").exists());

        let stats = cmd_sync(&templates, &tracker, &registry, Some("weather")).await.unwrap();
        assert_eq!(stats.changed(), 0);

        let missing = cmd_sync(&templates, &tracker, &registry, Some("nope")).await;
        assert!(matches!(missing, Err(Error::TemplateNotFound(_))));
    }

    #[test]
    fn test_describe_changes() {
        let change = ChangeRecord::AddField {
            table_name: "outdoor".to_string(),
            field: "wind".to_string(),
            db_type: "REAL".to_string(),
        };
        assert_eq!(describe(&change), "added column outdoor.wind REAL");
    }
}
