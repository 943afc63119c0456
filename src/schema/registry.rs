//! Per-template SQLite stores
//!
//! The registry owns one connection pool per database file and hands out
//! shared `SensorStore` handles. Each store serializes its writes behind a
//! mutex, so concurrent sources bound to the same template never interleave
//! a DDL change with an insert.

use super::{quote_ident, ColumnDef, ColumnKind, StoredRow, StoredValue, TableDescriptor};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::template::{SensorSpec, Template};
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row, Sqlite, ValueRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SUPPORTED_DRIVER: &str = "sqlite";

/// Column metadata as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Registry of open template stores
pub struct StoreRegistry {
    databases_dir: PathBuf,
    storage: StorageConfig,
    stores: RwLock<HashMap<PathBuf, Arc<SensorStore>>>,
}

impl StoreRegistry {
    pub fn new(databases_dir: impl Into<PathBuf>, storage: StorageConfig) -> Self {
        Self {
            databases_dir: databases_dir.into(),
            storage,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn databases_dir(&self) -> &Path {
        &self.databases_dir
    }

    /// Database file backing a template
    pub fn database_path(&self, template: &Template) -> PathBuf {
        self.databases_dir.join(&template.database.db_name)
    }

    /// Open (or reuse) the store declared by a template
    pub async fn ensure_database(&self, template: &Template) -> Result<Arc<SensorStore>> {
        if !template.database.driver.eq_ignore_ascii_case(SUPPORTED_DRIVER) {
            return Err(Error::UnsupportedDriver(template.database.driver.clone()));
        }

        let path = self.database_path(template);
        if let Some(store) = self.stores.read().await.get(&path) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(&path) {
            return Ok(store.clone());
        }

        let store = Arc::new(SensorStore::open(&path, &self.storage).await?);
        info!(template = %template.name, "Opened store {:?}", path);
        stores.insert(path, store.clone());
        Ok(store)
    }

    /// The template's store if its database file exists; never creates one
    pub async fn open_existing(&self, template: &Template) -> Result<Option<Arc<SensorStore>>> {
        if !template.database.driver.eq_ignore_ascii_case(SUPPORTED_DRIVER) {
            return Err(Error::UnsupportedDriver(template.database.driver.clone()));
        }
        if !self.database_path(template).exists() {
            return Ok(None);
        }
        self.ensure_database(template).await.map(Some)
    }

    /// Ensure the store and every sensor table of a template exist
    pub async fn materialize(&self, template: &Template) -> Result<Arc<SensorStore>> {
        let store = self.ensure_database(template).await?;
        for sensor in &template.sensors {
            store.ensure_table(sensor).await?;
        }
        Ok(store)
    }

    /// Close every open pool
    pub async fn close(&self) {
        let stores: Vec<Arc<SensorStore>> = self.stores.write().await.drain().map(|(_, s)| s).collect();
        for store in stores {
            store.pool.close().await;
        }
    }
}

/// One SQLite database holding the sensor tables of a template
pub struct SensorStore {
    path: PathBuf,
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
    tables: Mutex<HashMap<String, TableDescriptor>>,
}

impl SensorStore {
    /// Connect to a database file, creating it if missing
    pub async fn open(path: &Path, storage: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(storage.busy_timeout_ms));

        debug!("Connecting to SQLite database at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(storage.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cached(&self, table: &str) -> Option<TableDescriptor> {
        self.tables.lock().ok().and_then(|t| t.get(table).cloned())
    }

    fn remember(&self, descriptor: &TableDescriptor) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(descriptor.table_name.clone(), descriptor.clone());
        }
    }

    /// Ensure a sensor's table exists with a compatible shape.
    ///
    /// Missing tables are created. Existing tables are inspected: new field
    /// columns are added, columns the template no longer declares are left in
    /// place, and a column whose type family changed is a `SchemaConflict`.
    pub async fn ensure_table(&self, sensor: &SensorSpec) -> Result<TableDescriptor> {
        let descriptor = TableDescriptor::for_sensor(sensor);
        if self.cached(&descriptor.table_name).as_ref() == Some(&descriptor) {
            return Ok(descriptor);
        }

        let _guard = self.write_lock.lock().await;
        let existing = self.columns(&descriptor.table_name).await?;

        if existing.is_empty() {
            sqlx::query(&descriptor.create_sql())
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
            info!(table = %descriptor.table_name, sensor = %sensor.sensor_id, "Created table");
        } else {
            let missing = plan_additions(&descriptor, &existing)?;
            for column in &missing {
                sqlx::query(&descriptor.add_column_sql(column))
                    .execute(&self.pool)
                    .await
                    .map_err(storage_error)?;
                info!(
                    table = %descriptor.table_name,
                    column = %column.name,
                    "Added column {}",
                    column.kind
                );
            }
            if missing.is_empty() {
                debug!(table = %descriptor.table_name, "Table already matches template");
            }
        }

        self.remember(&descriptor);
        Ok(descriptor)
    }

    /// Insert one row in its own transaction; returns the new row id
    pub async fn insert_row(&self, table: &TableDescriptor, values: Vec<StoredValue>) -> Result<i64> {
        let sql = table.insert_sql();
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        let result = query.execute(&mut *tx).await.map_err(|e| match storage_error(e) {
            Error::Database(e) => Error::InsertFailed {
                table: table.table_name.clone(),
                reason: e.to_string(),
            },
            other => other,
        })?;
        tx.commit().await.map_err(storage_error)?;

        Ok(result.last_insert_rowid())
    }

    /// User tables in this store, sorted by name
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(names)
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(found.is_some())
    }

    /// Columns of a table in declaration order; empty when the table is absent
    pub async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    column_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                    nullable: not_null == 0 && pk == 0,
                    primary_key: pk > 0,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    pub async fn index_names(&self, table: &str) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_index_list(?)")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(names)
    }

    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count)
    }

    /// Newest rows first, optionally restricted to one sensor id
    pub async fn fetch_rows(
        &self,
        table: &str,
        sensor_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRow>> {
        let filter = if sensor_id.is_some() {
            " WHERE \"sensor_id\" = ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY \"timestamp\" DESC, \"id\" DESC LIMIT ?",
            quote_ident(table),
            filter
        );

        let mut query = sqlx::query(&sql);
        if let Some(sensor_id) = sensor_id {
            query = query.bind(sensor_id);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        // SQLite keeps booleans as 0/1; the declared type says which ones they are
        let booleans: Vec<String> = self
            .columns(table)
            .await?
            .into_iter()
            .filter(|c| ColumnKind::Boolean.matches_declared(&c.column_type))
            .map(|c| c.name)
            .collect();

        rows.iter().map(|row| decode_row(row, &booleans)).collect()
    }
}

/// Columns to add so an existing table can hold the descriptor's rows
fn plan_additions(descriptor: &TableDescriptor, existing: &[ColumnInfo]) -> Result<Vec<ColumnDef>> {
    let mut missing = Vec::new();
    for (idx, column) in descriptor.columns().into_iter().enumerate() {
        let found = existing
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&column.name));
        match found {
            Some(info) if column.kind.matches_declared(&info.column_type) => {}
            Some(info) => {
                return Err(Error::SchemaConflict {
                    table: descriptor.table_name.clone(),
                    reason: format!(
                        "column '{}' is declared {} but the template wants {}",
                        column.name, info.column_type, column.kind
                    ),
                });
            }
            // the three fixed columns cannot be retrofitted
            None if idx < 3 => {
                return Err(Error::SchemaConflict {
                    table: descriptor.table_name.clone(),
                    reason: format!("fixed column '{}' is missing", column.name),
                });
            }
            None => missing.push(column),
        }
    }

    for info in existing {
        if !descriptor
            .columns()
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&info.name))
        {
            warn!(
                table = %descriptor.table_name,
                column = %info.name,
                "Column no longer declared by template; keeping it"
            );
        }
    }

    Ok(missing)
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: StoredValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        StoredValue::Null => query.bind(Option::<String>::None),
        StoredValue::Integer(v) => query.bind(v),
        StoredValue::Float(v) => query.bind(v),
        StoredValue::Boolean(v) => query.bind(v),
        StoredValue::Text(v) => query.bind(v),
    }
}

fn decode_row(row: &SqliteRow, booleans: &[String]) -> Result<StoredRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(idx)?.is_null() {
            StoredValue::Null
        } else if let Ok(v) = row.try_get::<i64, _>(idx) {
            let is_boolean = booleans.iter().any(|b| b.eq_ignore_ascii_case(column.name()));
            match v {
                0 | 1 if is_boolean => StoredValue::Boolean(v == 1),
                v => StoredValue::Integer(v),
            }
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            StoredValue::Float(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            StoredValue::Text(v)
        } else {
            let bytes: Vec<u8> = row.try_get(idx)?;
            StoredValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(StoredRow { columns })
}

/// Classify sqlx errors: unreachable or locked stores become `StorageUnavailable`
fn storage_error(err: sqlx::Error) -> Error {
    let unavailable = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN
            .map(|code| matches!(code & 0xff, 5 | 6 | 14))
            .unwrap_or(false),
        _ => false,
    };

    if unavailable {
        Error::StorageUnavailable(err.to_string())
    } else {
        Error::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_line;
    use crate::template::tests::weather_template;
    use crate::template::{FieldSpec, ParsingConfig};
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup_registry() -> (StoreRegistry, TempDir) {
        let tmp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(tmp.path().join("databases"), StorageConfig::default());
        (registry, tmp)
    }

    #[tokio::test]
    async fn test_materialize_creates_tables() {
        let (registry, _tmp) = setup_registry();
        let template = weather_template();

        let store = registry.materialize(&template).await.unwrap();
        assert_eq!(store.table_names().await.unwrap(), vec!["indoor", "outdoor"]);
        assert!(registry.database_path(&template).exists());

        let columns = store.columns("indoor").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "timestamp", "sensor_id", "temperature", "humidity", "status"]
        );
        assert!(columns[0].primary_key);
        assert_eq!(columns[4].column_type, "INTEGER");
        assert_eq!(columns[5].column_type, "VARCHAR(255)");
    }

    #[tokio::test]
    async fn test_rematerialize_is_idempotent() {
        let (registry, _tmp) = setup_registry();
        let template = weather_template();
        let store = registry.materialize(&template).await.unwrap();

        let table = store.ensure_table(&template.sensors[0]).await.unwrap();
        let reading = parse_line("Sensor:outdoor_01;T:1;P:2", &ParsingConfig::default());
        store
            .insert_row(&table, table.encode_row(&reading.sensors[0], &Utc::now()))
            .await
            .unwrap();

        // fresh registry forces the on-disk shape check instead of the cache
        let again = StoreRegistry::new(registry.databases_dir(), StorageConfig::default());
        let store = again.materialize(&template).await.unwrap();
        store.ensure_table(&template.sensors[0]).await.unwrap();

        assert_eq!(store.table_names().await.unwrap().len(), 2);
        assert_eq!(store.row_count("outdoor").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_field_adds_column() {
        let (registry, _tmp) = setup_registry();
        let mut template = weather_template();
        registry.materialize(&template).await.unwrap();

        template.sensors[0]
            .fields
            .push(FieldSpec::new("wind_speed", "W", "REAL"));
        let fresh = StoreRegistry::new(registry.databases_dir(), StorageConfig::default());
        let store = fresh.materialize(&template).await.unwrap();

        let columns = store.columns("outdoor").await.unwrap();
        assert_eq!(columns.last().unwrap().name, "wind_speed");
        assert_eq!(columns.last().unwrap().column_type, "REAL");
    }

    #[tokio::test]
    async fn test_retyped_field_is_conflict() {
        let (registry, _tmp) = setup_registry();
        let mut template = weather_template();
        registry.materialize(&template).await.unwrap();

        template.sensors[0].fields[0].db_type = "TEXT".to_string();
        let fresh = StoreRegistry::new(registry.databases_dir(), StorageConfig::default());
        let result = fresh.materialize(&template).await;
        assert!(matches!(result, Err(Error::SchemaConflict { .. })));
    }

    #[tokio::test]
    async fn test_removed_field_keeps_column() {
        let (registry, _tmp) = setup_registry();
        let mut template = weather_template();
        registry.materialize(&template).await.unwrap();

        template.sensors[0].fields.pop();
        let fresh = StoreRegistry::new(registry.databases_dir(), StorageConfig::default());
        let store = fresh.materialize(&template).await.unwrap();
        assert_eq!(store.columns("outdoor").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_insert_and_fetch_rows() {
        let (registry, _tmp) = setup_registry();
        let template = weather_template();
        let store = registry.materialize(&template).await.unwrap();
        let table = store.ensure_table(&template.sensors[1]).await.unwrap();

        let parsed = parse_line("Sensor:indoor_01;T:21.5;S:ok", &ParsingConfig::default());
        let id = store
            .insert_row(&table, table.encode_row(&parsed.sensors[0], &Utc::now()))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let rows = store.fetch_rows("indoor", None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id(), Some(1));
        assert_eq!(row.get("sensor_id"), Some(&StoredValue::Text("indoor_01".to_string())));
        assert_eq!(row.get("temperature"), Some(&StoredValue::Float(21.5)));
        assert_eq!(row.get("humidity"), Some(&StoredValue::Null));
        assert_eq!(row.get("status"), Some(&StoredValue::Text("ok".to_string())));

        let none = store.fetch_rows("indoor", Some("other"), 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_driver() {
        let (registry, _tmp) = setup_registry();
        let mut template = weather_template();
        template.database.driver = "postgresql".to_string();
        assert!(matches!(
            registry.ensure_database(&template).await,
            Err(Error::UnsupportedDriver(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let registry = StoreRegistry::new(blocker.join("databases"), StorageConfig::default());

        let result = registry.ensure_database(&weather_template()).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_boolean_column_reads_back_as_bool() {
        let (registry, _tmp) = setup_registry();
        let mut template = weather_template();
        template.sensors.push(SensorSpec::new(
            "g",
            "garage",
            vec![
                FieldSpec::new("door", "D", "BOOLEAN"),
                FieldSpec::new("code", "C", "TEXT"),
            ],
        ));
        let store = registry.materialize(&template).await.unwrap();
        let table = store.ensure_table(&template.sensors[2]).await.unwrap();

        let parsed = parse_line("Sensor:g;D:true;C:007", &ParsingConfig::default());
        store
            .insert_row(&table, table.encode_row(&parsed.sensors[0], &Utc::now()))
            .await
            .unwrap();

        let row = store.fetch_rows("garage", None, 1).await.unwrap().remove(0);
        assert_eq!(row.get("door"), Some(&StoredValue::Boolean(true)));
        assert_eq!(row.get("id"), Some(&StoredValue::Integer(1)));

        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains(r#""door":true"#));
    }

    #[tokio::test]
    async fn test_timestamp_assigned_when_omitted() {
        let (registry, _tmp) = setup_registry();
        let store = registry.materialize(&weather_template()).await.unwrap();

        sqlx::query(r#"INSERT INTO "outdoor" ("sensor_id") VALUES ('outdoor_01')"#)
            .execute(&store.pool)
            .await
            .unwrap();

        let row = store.fetch_rows("outdoor", None, 1).await.unwrap().remove(0);
        let ts = row.get("timestamp").and_then(|v| v.as_str()).unwrap();
        assert_eq!(ts.len(), "2025-02-01T12:00:00.000000Z".len());
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn test_open_existing_does_not_create() {
        let (registry, _tmp) = setup_registry();
        let template = weather_template();

        assert!(registry.open_existing(&template).await.unwrap().is_none());
        assert!(!registry.database_path(&template).exists());

        registry.materialize(&template).await.unwrap();
        let store = registry.open_existing(&template).await.unwrap().unwrap();
        assert_eq!(store.table_names().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_store_handle() {
        let (registry, _tmp) = setup_registry();
        let template = weather_template();
        let a = registry.ensure_database(&template).await.unwrap();
        let b = registry.ensure_database(&template).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
