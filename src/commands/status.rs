//! Status command implementation

use crate::changes::{fingerprint, ChangeAction, ChangeTracker};
use crate::config::{Config, SourceConfig};
use crate::error::Result;
use crate::query::QueryFacade;
use crate::schema::StoreRegistry;
use crate::template::TemplateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// Per-template status
#[derive(Debug, Clone, Serialize)]
pub struct TemplateStatus {
    pub name: String,
    pub version: String,
    pub db_name: String,
    pub db_exists: bool,
    pub sensors: usize,
    pub rows: i64,
    pub last_change: Option<DateTime<Utc>>,
    pub last_action: Option<ChangeAction>,
    /// Template differs from its last changelog entry; `sync` will record it
    pub pending_sync: bool,
}

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub base_dir: String,
    pub templates: Vec<TemplateStatus>,
    pub sources: Vec<SourceConfig>,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    templates: &TemplateStore,
    tracker: &ChangeTracker,
    registry: &StoreRegistry,
) -> Result<StatusInfo> {
    info!("Getting status");

    let query = QueryFacade::new(templates, registry);
    let mut statuses = Vec::new();

    for template in templates.load_all()? {
        let latest = tracker.latest(&template.name)?;
        let pending_sync = match &latest {
            Some(entry) => entry.template_hash != fingerprint(&template)?,
            None => true,
        };

        // only read stores that already exist; status must not create files
        let db_exists = registry.database_path(&template).exists();
        let rows = if db_exists {
            match query.database_stats(&template.name).await {
                Ok(stats) => stats.tables.iter().map(|t| t.rows).sum(),
                Err(e) => {
                    debug!(template = %template.name, "Store stats error: {:?}", e);
                    0
                }
            }
        } else {
            0
        };

        statuses.push(TemplateStatus {
            version: template.version.clone(),
            db_name: template.database.db_name.clone(),
            db_exists,
            sensors: template.sensors.len(),
            rows,
            last_change: latest.as_ref().map(|e| e.timestamp),
            last_action: latest.as_ref().map(|e| e.action),
            pending_sync,
            name: template.name,
        });
    }

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        base_dir: config.paths.base_dir.display().to_string(),
        templates: statuses,
        sources: config.sources.clone(),
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 sensorhub Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Data directory: {}", status.base_dir);

    println!("\nTemplates:");
    if status.templates.is_empty() {
        println!("  None stored. Use 'sensorhub templates import' to add one.");
    }
    for template in &status.templates {
        println!("  • {} (v{})", template.name, template.version);
        let store = if template.db_exists {
            "✓ Created"
        } else {
            "⚠ Not created (run 'sensorhub sync')"
        };
        println!("    Store: {} {}", template.db_name, store);
        println!("    Sensors: {}, Rows: {}", template.sensors, template.rows);
        match (template.last_change, template.last_action) {
            (Some(at), Some(action)) => {
                println!("    Last change: {} [{}]", at.format("%Y-%m-%d %H:%M:%S"), action)
            }
            _ => println!("    Last change: never recorded"),
        }
        if template.pending_sync {
            println!("    ⚠ Template changed since last sync");
        }
    }

    println!("\nSources:");
    if status.sources.is_empty() {
        println!("  None configured. Add [[sources]] entries to the config file.");
    }
    for source in &status.sources {
        println!(
            "  • {} → {} [{}]",
            source.name,
            source.path.display(),
            source.template.as_deref().unwrap_or("auto-detect")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::weather_template;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_tracks_sync_state() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.ensure_dirs().unwrap();

        let templates = TemplateStore::open(&config.paths.templates_dir).unwrap();
        let tracker = ChangeTracker::open(&config.paths.changelog_dir).unwrap();
        let registry = StoreRegistry::new(&config.paths.databases_dir, config.storage.clone());
        templates.save(&weather_template()).unwrap();

        let before = cmd_status(&config, &templates, &tracker, &registry).await.unwrap();
        assert!(before.templates[0].pending_sync);
        assert!(!before.templates[0].db_exists);
        assert!(!registry.database_path(&weather_template()).exists());

        tracker.sync(&registry, &weather_template()).await.unwrap();
        let after = cmd_status(&config, &templates, &tracker, &registry).await.unwrap();
        assert!(!after.templates[0].pending_sync);
        assert!(after.templates[0].db_exists);
        assert_eq!(after.templates[0].last_action, Some(ChangeAction::Create));
    }
}
