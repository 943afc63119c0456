//! Template fingerprints and the changelog
//!
//! Every time a template's fingerprint differs from the last recorded one, an
//! entry is appended under `<changelog_dir>/<name>_<timestamp>.json`. Entries
//! carry a snapshot of the template so the next change can be described
//! against it. Entries are never rewritten.

use crate::error::{Error, Result};
use crate::schema::{ColumnKind, StoreRegistry};
use crate::template::{Template, TemplateStore};
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Why a changelog entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Update => write!(f, "update"),
        }
    }
}

/// One described difference between two template versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeRecord {
    CreateTable {
        db_name: String,
        sensors_count: usize,
    },
    AddSensor {
        sensor_id: String,
        table_name: String,
    },
    RemoveSensor {
        sensor_id: String,
        table_name: String,
    },
    AddField {
        table_name: String,
        field: String,
        db_type: String,
    },
    RemoveField {
        table_name: String,
        field: String,
    },
    RetypeField {
        table_name: String,
        field: String,
        from: String,
        to: String,
    },
    /// Fingerprint changed without a structural difference
    UpdateTable { db_name: String, changes: String },
}

/// A persisted changelog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub timestamp: DateTime<Utc>,
    pub template_name: String,
    pub template_hash: String,
    pub action: ChangeAction,
    pub changes: Vec<ChangeRecord>,
    pub template_version: String,
    /// Snapshot used to describe the next change; absent in foreign entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}

/// Result of comparing a template against its last changelog entry
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeStatus {
    Unchanged(Box<Template>),
    NotFound,
    Changed {
        action: ChangeAction,
        template: Box<Template>,
        previous: Option<Box<Template>>,
    },
}

impl ChangeStatus {
    pub fn has_changes(&self) -> bool {
        matches!(self, ChangeStatus::Changed { .. })
    }
}

/// Outcome of syncing one template to its store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ChangeAction>,
    pub changes: Vec<ChangeRecord>,
    pub tables: usize,
}

/// A template that could not be synced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub template: String,
    pub error: String,
}

/// Result of syncing a set of templates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub synced: Vec<SyncOutcome>,
    pub failed: Vec<SyncFailure>,
}

impl SyncStats {
    pub fn changed(&self) -> usize {
        self.synced.iter().filter(|o| o.action.is_some()).count()
    }

    pub fn is_synced(&self, template: &str) -> bool {
        self.synced.iter().any(|o| o.template == template)
    }
}

/// Deterministic fingerprint: BLAKE3 over the template's canonical JSON.
///
/// Converting to `serde_json::Value` first sorts object keys, so field order
/// in the source document never affects the hash.
pub fn fingerprint(template: &Template) -> Result<String> {
    let canonical = serde_json::to_value(template)?;
    let mut hasher = Hasher::new();
    hasher.update(serde_json::to_string(&canonical)?.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}

/// Describe what changed between two template versions.
///
/// This never rejects a change; it only produces the changelog description.
pub fn validate_changes(template: &Template, previous: Option<&Template>) -> Vec<ChangeRecord> {
    let Some(previous) = previous else {
        return vec![ChangeRecord::CreateTable {
            db_name: template.database.db_name.clone(),
            sensors_count: template.sensors.len(),
        }];
    };

    let mut changes = Vec::new();
    for sensor in &template.sensors {
        let Some(old) = previous.sensor(&sensor.sensor_id) else {
            changes.push(ChangeRecord::AddSensor {
                sensor_id: sensor.sensor_id.clone(),
                table_name: sensor.table_name.clone(),
            });
            continue;
        };

        for field in &sensor.fields {
            match old.field(&field.name) {
                None => changes.push(ChangeRecord::AddField {
                    table_name: sensor.table_name.clone(),
                    field: field.name.clone(),
                    db_type: field.db_type.clone(),
                }),
                Some(old_field)
                    if ColumnKind::from_db_type(&old_field.db_type)
                        != ColumnKind::from_db_type(&field.db_type) =>
                {
                    changes.push(ChangeRecord::RetypeField {
                        table_name: sensor.table_name.clone(),
                        field: field.name.clone(),
                        from: old_field.db_type.clone(),
                        to: field.db_type.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for old_field in &old.fields {
            if sensor.field(&old_field.name).is_none() {
                changes.push(ChangeRecord::RemoveField {
                    table_name: sensor.table_name.clone(),
                    field: old_field.name.clone(),
                });
            }
        }
    }

    for old in &previous.sensors {
        if template.sensor(&old.sensor_id).is_none() {
            changes.push(ChangeRecord::RemoveSensor {
                sensor_id: old.sensor_id.clone(),
                table_name: old.table_name.clone(),
            });
        }
    }

    if changes.is_empty() {
        changes.push(ChangeRecord::UpdateTable {
            db_name: template.database.db_name.clone(),
            changes: "Template updated".to_string(),
        });
    }
    changes
}

/// Changelog directory handle
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    dir: PathBuf,
}

impl ChangeTracker {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Config(format!("cannot create changelog directory {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compare the stored template `name` against its last recorded fingerprint
    pub fn check(&self, templates: &TemplateStore, name: &str) -> Result<ChangeStatus> {
        match templates.load(name) {
            Ok(template) => self.check_template(template),
            Err(Error::TemplateNotFound(_)) => Ok(ChangeStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Compare an in-memory template against its last recorded fingerprint
    pub fn check_template(&self, template: Template) -> Result<ChangeStatus> {
        let current = fingerprint(&template)?;
        let status = match self.latest(&template.name)? {
            None => ChangeStatus::Changed {
                action: ChangeAction::Create,
                template: Box::new(template),
                previous: None,
            },
            Some(entry) if entry.template_hash != current => ChangeStatus::Changed {
                action: ChangeAction::Update,
                template: Box::new(template),
                previous: entry.template.map(Box::new),
            },
            Some(_) => ChangeStatus::Unchanged(Box::new(template)),
        };
        Ok(status)
    }

    /// Append a changelog entry for a template
    pub fn record(
        &self,
        template: &Template,
        action: ChangeAction,
        changes: Vec<ChangeRecord>,
    ) -> Result<ChangelogEntry> {
        let timestamp = Utc::now();
        let entry = ChangelogEntry {
            timestamp,
            template_name: template.name.clone(),
            template_hash: fingerprint(template)?,
            action,
            changes,
            template_version: template.version.clone(),
            template: Some(template.clone()),
        };

        let path = self.entry_path(&template.name, &timestamp);
        std::fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
        info!(
            template = %template.name,
            action = %action,
            "Recorded changelog entry {:?}",
            path.file_name().unwrap_or_default()
        );
        Ok(entry)
    }

    fn entry_path(&self, name: &str, timestamp: &DateTime<Utc>) -> PathBuf {
        let stem = format!("{}_{}", name, timestamp.format("%Y%m%d_%H%M%S_%6f"));
        let mut path = self.dir.join(format!("{}.json", stem));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.json", stem, n));
            n += 1;
        }
        path
    }

    /// All entries for a template, oldest first
    pub fn history(&self, name: &str) -> Result<Vec<ChangelogEntry>> {
        let mut entries = self.read_entries(name)?;
        entries.sort_by(|(a, a_file), (b, b_file)| {
            a.timestamp.cmp(&b.timestamp).then_with(|| a_file.cmp(b_file))
        });
        Ok(entries.into_iter().map(|(entry, _)| entry).collect())
    }

    /// Most recent entry for a template
    pub fn latest(&self, name: &str) -> Result<Option<ChangelogEntry>> {
        Ok(self.history(name)?.pop())
    }

    fn read_entries(&self, name: &str) -> Result<Vec<(ChangelogEntry, String)>> {
        let prefix = format!("{}_", name);
        let mut entries = Vec::new();

        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".json") {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|s| serde_json::from_str::<ChangelogEntry>(&s).map_err(Error::from));
            match parsed {
                // prefixes overlap between e.g. `weather` and `weather_station`
                Ok(entry) if entry.template_name == name => {
                    entries.push((entry, file_name.to_string()))
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable changelog entry {:?}: {}", path, e),
            }
        }
        Ok(entries)
    }

    /// Bring one template's store in line with the template and record the change.
    ///
    /// Materialization runs even when the fingerprint is unchanged so a
    /// deleted database file is recreated; only a change is recorded.
    pub async fn sync(&self, registry: &StoreRegistry, template: &Template) -> Result<SyncOutcome> {
        let status = self.check_template(template.clone())?;
        registry.materialize(template).await?;

        let mut outcome = SyncOutcome {
            template: template.name.clone(),
            action: None,
            changes: Vec::new(),
            tables: template.sensors.len(),
        };

        if let ChangeStatus::Changed { action, previous, .. } = status {
            let changes = validate_changes(template, previous.as_deref());
            self.record(template, action, changes.clone())?;
            outcome.action = Some(action);
            outcome.changes = changes;
        } else {
            debug!(template = %template.name, "Template unchanged");
        }
        Ok(outcome)
    }

    /// Sync every template; failures are logged and collected, not raised
    pub async fn sync_all(&self, registry: &StoreRegistry, templates: &[Template]) -> SyncStats {
        let mut stats = SyncStats::default();
        for template in templates {
            match self.sync(registry, template).await {
                Ok(outcome) => stats.synced.push(outcome),
                Err(e) => {
                    error!(template = %template.name, "Sync failed: {}", e);
                    stats.failed.push(SyncFailure {
                        template: template.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::template::tests::weather_template;
    use crate::template::FieldSpec;
    use tempfile::TempDir;

    fn setup_tracker() -> (ChangeTracker, TemplateStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let tracker = ChangeTracker::open(tmp.path().join("changelog")).unwrap();
        let templates = TemplateStore::open(tmp.path().join("templates")).unwrap();
        (tracker, templates, tmp)
    }

    #[test]
    fn test_fingerprint_stable() {
        let template = weather_template();
        assert_eq!(fingerprint(&template).unwrap(), fingerprint(&template).unwrap());

        let mut changed = weather_template();
        changed.sensors[0].fields[0].source = "TEMP".to_string();
        assert_ne!(fingerprint(&template).unwrap(), fingerprint(&changed).unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_document_key_order() {
        let a: Template = toml::from_str(
            "template_name = \"t\"\ntemplate_version = \"1.0\"\n[database]\ndb_name = \"t.db\"\ndriver = \"sqlite\"\n",
        )
        .unwrap();
        let b: Template = toml::from_str(
            "template_version = \"1.0\"\ntemplate_name = \"t\"\n[database]\ndriver = \"sqlite\"\ndb_name = \"t.db\"\n",
        )
        .unwrap();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_check_lifecycle() {
        let (tracker, templates, _tmp) = setup_tracker();
        assert_eq!(tracker.check(&templates, "weather").unwrap(), ChangeStatus::NotFound);

        let mut template = weather_template();
        templates.save(&template).unwrap();

        let status = tracker.check(&templates, "weather").unwrap();
        assert!(status.has_changes());
        assert!(matches!(
            status,
            ChangeStatus::Changed { action: ChangeAction::Create, previous: None, .. }
        ));

        tracker
            .record(&template, ChangeAction::Create, validate_changes(&template, None))
            .unwrap();
        assert!(matches!(
            tracker.check(&templates, "weather").unwrap(),
            ChangeStatus::Unchanged(_)
        ));

        template.version = "1.1".to_string();
        templates.save(&template).unwrap();
        match tracker.check(&templates, "weather").unwrap() {
            ChangeStatus::Changed { action, previous, .. } => {
                assert_eq!(action, ChangeAction::Update);
                assert_eq!(previous.unwrap().version, "1.0");
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_changes_describes_differences() {
        let old = weather_template();
        assert_eq!(
            validate_changes(&old, None),
            vec![ChangeRecord::CreateTable {
                db_name: "weather.db".to_string(),
                sensors_count: 2,
            }]
        );

        let mut new = weather_template();
        new.sensors[0].fields.push(FieldSpec::new("wind", "W", "REAL"));
        new.sensors[1].fields.retain(|f| f.name != "status");
        new.sensors[1].fields[1].db_type = "TEXT".to_string();
        new.sensors.remove(0);

        let changes = validate_changes(&new, Some(&old));
        assert!(changes.contains(&ChangeRecord::RemoveSensor {
            sensor_id: "outdoor_01".to_string(),
            table_name: "outdoor".to_string(),
        }));
        assert!(changes.contains(&ChangeRecord::RemoveField {
            table_name: "indoor".to_string(),
            field: "status".to_string(),
        }));
        assert!(changes.iter().any(|c| matches!(c, ChangeRecord::RetypeField { field, .. } if field == "humidity")));

        let mut touched = weather_template();
        touched.description = Some("roof station".to_string());
        assert!(matches!(
            validate_changes(&touched, Some(&old))[..],
            [ChangeRecord::UpdateTable { .. }]
        ));
    }

    #[test]
    fn test_latest_and_history_order() {
        let (tracker, _templates, _tmp) = setup_tracker();
        let mut template = weather_template();

        tracker.record(&template, ChangeAction::Create, vec![]).unwrap();
        template.version = "2.0".to_string();
        tracker.record(&template, ChangeAction::Update, vec![]).unwrap();

        let history = tracker.history("weather").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, ChangeAction::Create);

        let latest = tracker.latest("weather").unwrap().unwrap();
        assert_eq!(latest.template_version, "2.0");
        assert_eq!(latest.template_hash, fingerprint(&template).unwrap());
    }

    #[test]
    fn test_overlapping_names_kept_apart() {
        let (tracker, _templates, _tmp) = setup_tracker();
        let mut other = weather_template();
        other.name = "weather_station".to_string();
        tracker.record(&other, ChangeAction::Create, vec![]).unwrap();

        assert!(tracker.latest("weather").unwrap().is_none());
        assert_eq!(tracker.history("weather_station").unwrap().len(), 1);
    }

    #[test]
    fn test_entry_format() {
        let (tracker, _templates, _tmp) = setup_tracker();
        let template = weather_template();
        tracker
            .record(&template, ChangeAction::Create, validate_changes(&template, None))
            .unwrap();

        let file = std::fs::read_dir(tracker.dir()).unwrap().next().unwrap().unwrap().path();
        let name = file.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("weather_") && name.ends_with(".json"));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(value["template_name"], "weather");
        assert_eq!(value["action"], "create");
        assert_eq!(value["template_version"], "1.0");
        assert_eq!(value["changes"][0]["type"], "create_table");
        assert_eq!(value["changes"][0]["sensors_count"], 2);
    }

    #[tokio::test]
    async fn test_sync_records_only_changes() {
        let (tracker, _templates, tmp) = setup_tracker();
        let registry = StoreRegistry::new(tmp.path().join("databases"), StorageConfig::default());
        let mut template = weather_template();

        let first = tracker.sync(&registry, &template).await.unwrap();
        assert_eq!(first.action, Some(ChangeAction::Create));

        let second = tracker.sync(&registry, &template).await.unwrap();
        assert_eq!(second.action, None);
        assert_eq!(tracker.history("weather").unwrap().len(), 1);

        template.sensors[0].fields.push(FieldSpec::new("wind", "W", "REAL"));
        let third = tracker.sync(&registry, &template).await.unwrap();
        assert_eq!(third.action, Some(ChangeAction::Update));
        assert_eq!(
            third.changes,
            vec![ChangeRecord::AddField {
                table_name: "outdoor".to_string(),
                field: "wind".to_string(),
                db_type: "REAL".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_sync_all_collects_failures() {
        let (tracker, _templates, tmp) = setup_tracker();
        let registry = StoreRegistry::new(tmp.path().join("databases"), StorageConfig::default());

        let good = weather_template();
        let mut bad = weather_template();
        bad.name = "legacy".to_string();
        bad.database.driver = "mysql".to_string();

        let stats = tracker.sync_all(&registry, &[good, bad]).await;
        assert_eq!(stats.changed(), 1);
        assert!(stats.is_synced("weather"));
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].template, "legacy");
        assert!(tracker.latest("legacy").unwrap().is_none());
    }
}
