//! Read-side queries over templates and their stores
//!
//! Every call takes template and table names and returns plain data; framing
//! (CLI tables, JSON) is left to the caller. Missing templates and tables are
//! reported as `TemplateNotFound` / `TableNotFound`. Reads never create a
//! store: a template that was never synced has no tables.

use crate::error::{Error, Result};
use crate::schema::{ColumnInfo, SensorStore, StoreRegistry, StoredRow};
use crate::template::{Template, TemplateStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Column and index metadata of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub template: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<String>,
}

/// Size summary of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub columns: usize,
    pub rows: i64,
}

/// Size summary of one template store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub template: String,
    pub db_name: String,
    pub tables: Vec<TableStats>,
}

/// Query entry point bound to a template store and a store registry
pub struct QueryFacade<'a> {
    templates: &'a TemplateStore,
    registry: &'a StoreRegistry,
}

impl<'a> QueryFacade<'a> {
    pub fn new(templates: &'a TemplateStore, registry: &'a StoreRegistry) -> Self {
        Self { templates, registry }
    }

    pub fn list_templates(&self) -> Result<Vec<String>> {
        Ok(self.templates.list()?.into_iter().collect())
    }

    /// Load a template and its store; `None` until the store has been created
    async fn open(&self, template: &str) -> Result<(Template, Option<Arc<SensorStore>>)> {
        let template = self.templates.load(template)?;
        let store = self.registry.open_existing(&template).await?;
        Ok((template, store))
    }

    async fn require_table(
        &self,
        template: &str,
        store: Option<Arc<SensorStore>>,
        table: &str,
    ) -> Result<Arc<SensorStore>> {
        if let Some(store) = store {
            if store.table_exists(table).await? {
                return Ok(store);
            }
        }
        Err(Error::TableNotFound {
            template: template.to_string(),
            table: table.to_string(),
        })
    }

    /// Tables present in a template's store
    pub async fn list_tables(&self, template: &str) -> Result<Vec<String>> {
        match self.open(template).await? {
            (_, Some(store)) => store.table_names().await,
            (_, None) => Ok(Vec::new()),
        }
    }

    /// Every readable template with its tables; unreadable stores are skipped
    pub async fn all_databases(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut databases = BTreeMap::new();
        for name in self.list_templates()? {
            match self.list_tables(&name).await {
                Ok(tables) => {
                    databases.insert(name, tables);
                }
                Err(e) => warn!(template = %name, "Skipping store: {}", e),
            }
        }
        Ok(databases)
    }

    pub async fn table_info(&self, template: &str, table: &str) -> Result<TableInfo> {
        let (_, store) = self.open(template).await?;
        let store = self.require_table(template, store, table).await?;
        Ok(TableInfo {
            template: template.to_string(),
            table: table.to_string(),
            columns: store.columns(table).await?,
            indexes: store.index_names(table).await?,
        })
    }

    /// Newest rows of a table
    pub async fn fetch_rows(&self, template: &str, table: &str, limit: usize) -> Result<Vec<StoredRow>> {
        let (_, store) = self.open(template).await?;
        let store = self.require_table(template, store, table).await?;
        store.fetch_rows(table, None, limit).await
    }

    /// Newest rows reported by one sensor, read from the sensor's own table
    pub async fn latest_sensor_rows(
        &self,
        template: &str,
        sensor_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredRow>> {
        let (spec, store) = self.open(template).await?;
        let sensor = spec.sensor(sensor_id).ok_or_else(|| Error::TableNotFound {
            template: template.to_string(),
            table: format!("<sensor {}>", sensor_id),
        })?;
        let store = self.require_table(template, store, &sensor.table_name).await?;
        store.fetch_rows(&sensor.table_name, Some(sensor_id), limit).await
    }

    pub async fn database_stats(&self, template: &str) -> Result<DatabaseStats> {
        let (spec, store) = self.open(template).await?;
        let mut tables = Vec::new();
        if let Some(store) = store {
            for table in store.table_names().await? {
                tables.push(TableStats {
                    columns: store.columns(&table).await?.len(),
                    rows: store.row_count(&table).await?,
                    table,
                });
            }
        }
        Ok(DatabaseStats {
            template: spec.name,
            db_name: spec.database.db_name,
            tables,
        })
    }
}
