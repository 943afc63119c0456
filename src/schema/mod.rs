//! Table descriptors derived from templates
//!
//! Every sensor maps to one table: the fixed columns `id`, `timestamp` and
//! `sensor_id`, followed by one column per declared field. Rows are plain
//! ordered column/value lists; there are no per-table generated types.

mod registry;

pub use registry::*;

use crate::parse::{FieldValue, SensorReading};
use crate::template::SensorSpec;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tracing::warn;

/// Width of text columns declared by fields
pub const TEXT_COLUMN_WIDTH: u32 = 255;

/// Width of the fixed `sensor_id` column
pub const SENSOR_ID_WIDTH: u32 = 50;

/// Store-side `timestamp` for rows inserted without one, same shape as `format_timestamp`
const TIMESTAMP_DEFAULT: &str = "strftime('%Y-%m-%dT%H:%M:%f000Z', 'now')";

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Float,
    Integer,
    Text(u32),
    Boolean,
    DateTime,
}

impl ColumnKind {
    /// Map a template `db_type`; `None` when the name is not recognized
    pub fn from_db_type(db_type: &str) -> Option<Self> {
        match db_type.trim().to_ascii_uppercase().as_str() {
            "REAL" | "FLOAT" => Some(ColumnKind::Float),
            "INTEGER" => Some(ColumnKind::Integer),
            "TEXT" | "STRING" => Some(ColumnKind::Text(TEXT_COLUMN_WIDTH)),
            "BOOLEAN" => Some(ColumnKind::Boolean),
            "DATETIME" => Some(ColumnKind::DateTime),
            _ => None,
        }
    }

    /// Map a template `db_type`, falling back to bounded text
    pub fn for_field(db_type: &str) -> Self {
        Self::from_db_type(db_type).unwrap_or_else(|| {
            warn!("Unknown db_type '{}', storing as VARCHAR({})", db_type, TEXT_COLUMN_WIDTH);
            ColumnKind::Text(TEXT_COLUMN_WIDTH)
        })
    }

    /// Declared SQL type used in DDL
    pub fn sql_type(&self) -> String {
        match self {
            ColumnKind::Float => "REAL".to_string(),
            ColumnKind::Integer => "INTEGER".to_string(),
            ColumnKind::Text(width) => format!("VARCHAR({})", width),
            ColumnKind::Boolean => "BOOLEAN".to_string(),
            ColumnKind::DateTime => "DATETIME".to_string(),
        }
    }

    /// Whether a declared type found in an existing table stores this kind.
    ///
    /// Comparison is by type family so tables declared as e.g. `FLOAT` or
    /// `VARCHAR(100)` by other tools are still accepted.
    pub fn matches_declared(&self, declared: &str) -> bool {
        let declared = declared.to_ascii_uppercase();
        let family = if declared.contains("BOOL") {
            ColumnKind::Boolean
        } else if declared.contains("INT") {
            ColumnKind::Integer
        } else if declared.contains("CHAR") || declared.contains("CLOB") || declared.contains("TEXT")
        {
            ColumnKind::Text(0)
        } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB")
        {
            ColumnKind::Float
        } else if declared.contains("DATE") || declared.contains("TIME") {
            ColumnKind::DateTime
        } else {
            return false;
        };

        match (self, family) {
            (ColumnKind::Text(_), ColumnKind::Text(_)) => true,
            (kind, family) => *kind == family,
        }
    }

    /// Convert a parsed value for storage in a column of this kind.
    ///
    /// Values that do not fit the column are stored as they came rather than dropped.
    pub fn encode(&self, value: Option<&FieldValue>) -> StoredValue {
        let Some(value) = value else {
            return StoredValue::Null;
        };

        match (self, value) {
            (ColumnKind::Text(_), v) => StoredValue::Text(v.to_string()),
            (ColumnKind::Float, FieldValue::Integer(v)) => StoredValue::Float(*v as f64),
            (ColumnKind::Integer, FieldValue::Float(v))
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 =>
            {
                StoredValue::Integer(*v as i64)
            }
            (ColumnKind::Boolean, v) => match boolean_of(v) {
                Some(b) => StoredValue::Boolean(b),
                None => StoredValue::from(v),
            },
            (ColumnKind::DateTime, FieldValue::Integer(secs)) => {
                match DateTime::<Utc>::from_timestamp(*secs, 0) {
                    Some(dt) => StoredValue::Text(format_timestamp(&dt)),
                    None => StoredValue::Integer(*secs),
                }
            }
            (_, v) => StoredValue::from(v),
        }
    }
}

fn boolean_of(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Integer(0) => Some(false),
        FieldValue::Integer(1) => Some(true),
        FieldValue::Text(t) => match t.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" => Some(true),
            "false" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Table layout for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table_name: String,
    /// Field columns in template order; fixed columns are implicit
    pub fields: Vec<ColumnDef>,
    /// Raw-line key feeding each field column, index-aligned with `fields`
    pub sources: Vec<String>,
}

impl TableDescriptor {
    /// Derive the table layout for a sensor
    pub fn for_sensor(sensor: &SensorSpec) -> Self {
        Self {
            table_name: sensor.table_name.clone(),
            fields: sensor
                .fields
                .iter()
                .map(|f| ColumnDef::new(&f.name, ColumnKind::for_field(&f.db_type)))
                .collect(),
            sources: sensor.fields.iter().map(|f| f.source.clone()).collect(),
        }
    }

    /// Fixed columns followed by field columns
    pub fn columns(&self) -> Vec<ColumnDef> {
        let mut columns = vec![
            ColumnDef::new("id", ColumnKind::Integer),
            ColumnDef::new("timestamp", ColumnKind::DateTime),
            ColumnDef::new("sensor_id", ColumnKind::Text(SENSOR_ID_WIDTH)),
        ];
        columns.extend(self.fields.iter().cloned());
        columns
    }

    pub fn create_sql(&self) -> String {
        let mut defs = vec![
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            format!("\"timestamp\" DATETIME DEFAULT ({})", TIMESTAMP_DEFAULT),
            format!("\"sensor_id\" VARCHAR({})", SENSOR_ID_WIDTH),
        ];
        defs.extend(
            self.fields
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.kind.sql_type())),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table_name),
            defs.join(", ")
        )
    }

    pub fn add_column_sql(&self, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(&self.table_name),
            quote_ident(&column.name),
            column.kind.sql_type()
        )
    }

    /// INSERT statement for `timestamp`, `sensor_id` and every field column
    pub fn insert_sql(&self) -> String {
        let mut names = vec![quote_ident("timestamp"), quote_ident("sensor_id")];
        names.extend(self.fields.iter().map(|c| quote_ident(&c.name)));
        let placeholders = vec!["?"; names.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table_name),
            names.join(", "),
            placeholders
        )
    }

    /// Build the values bound by `insert_sql`; absent fields become NULL
    pub fn encode_row(&self, reading: &SensorReading, timestamp: &DateTime<Utc>) -> Vec<StoredValue> {
        let mut values = Vec::with_capacity(self.fields.len() + 2);
        values.push(StoredValue::Text(format_timestamp(timestamp)));
        values.push(StoredValue::Text(reading.sensor_id.clone()));
        for (column, source) in self.fields.iter().zip(&self.sources) {
            values.push(column.kind.encode(reading.values.get(source)));
        }
        values
    }
}

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A value as bound to or read from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl StoredValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoredValue::Integer(v) => Some(*v as f64),
            StoredValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&FieldValue> for StoredValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(v) => StoredValue::Integer(*v),
            FieldValue::Float(v) => StoredValue::Float(*v),
            FieldValue::Text(v) => StoredValue::Text(v.clone()),
        }
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Null => write!(f, "NULL"),
            StoredValue::Integer(v) => write!(f, "{}", v),
            StoredValue::Float(v) => write!(f, "{}", v),
            StoredValue::Boolean(v) => write!(f, "{}", v),
            StoredValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// One row read back from a sensor table, columns in table order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRow {
    pub columns: Vec<(String, StoredValue)>,
}

impl StoredRow {
    pub fn get(&self, column: &str) -> Option<&StoredValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn id(&self) -> Option<i64> {
        match self.get("id") {
            Some(StoredValue::Integer(id)) => Some(*id),
            _ => None,
        }
    }
}

impl Serialize for StoredRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_line, FieldValue};
    use crate::template::{FieldSpec, ParsingConfig};
    use chrono::TimeZone;

    fn outdoor_sensor() -> SensorSpec {
        SensorSpec::new(
            "outdoor_01",
            "outdoor",
            vec![
                FieldSpec::new("temperature", "T", "REAL"),
                FieldSpec::new("pressure", "P", "real"),
                FieldSpec::new("wind_dir", "W", "COMPASS"),
            ],
        )
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(ColumnKind::from_db_type("REAL"), Some(ColumnKind::Float));
        assert_eq!(ColumnKind::from_db_type("float"), Some(ColumnKind::Float));
        assert_eq!(ColumnKind::from_db_type("INTEGER"), Some(ColumnKind::Integer));
        assert_eq!(ColumnKind::from_db_type("STRING"), Some(ColumnKind::Text(255)));
        assert_eq!(ColumnKind::from_db_type("BOOLEAN"), Some(ColumnKind::Boolean));
        assert_eq!(ColumnKind::from_db_type("DATETIME"), Some(ColumnKind::DateTime));
        assert_eq!(ColumnKind::from_db_type("COMPASS"), None);
        assert_eq!(ColumnKind::for_field("COMPASS"), ColumnKind::Text(255));
    }

    #[test]
    fn test_descriptor_columns() {
        let table = TableDescriptor::for_sensor(&outdoor_sensor());
        let names: Vec<String> = table.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["id", "timestamp", "sensor_id", "temperature", "pressure", "wind_dir"]
        );
        assert_eq!(table.fields[2].kind, ColumnKind::Text(255));
    }

    #[test]
    fn test_create_sql() {
        let table = TableDescriptor::for_sensor(&outdoor_sensor());
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE IF NOT EXISTS \"outdoor\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"timestamp\" DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%f000Z', 'now')), \
             \"sensor_id\" VARCHAR(50), \"temperature\" REAL, \
             \"pressure\" REAL, \"wind_dir\" VARCHAR(255))"
        );
        assert_eq!(
            table.insert_sql(),
            "INSERT INTO \"outdoor\" (\"timestamp\", \"sensor_id\", \"temperature\", \"pressure\", \"wind_dir\") VALUES (?, ?, ?, ?, ?)"
        );
    }

    #[test]
    fn test_encode_row_defaults_missing_to_null() {
        let table = TableDescriptor::for_sensor(&outdoor_sensor());
        let parsed = parse_line("Sensor:outdoor_01;T:15;X:9", &ParsingConfig::default());
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();

        let values = table.encode_row(&parsed.sensors[0], &ts);
        assert_eq!(
            values,
            vec![
                StoredValue::Text("2025-02-01T12:00:00.000000Z".to_string()),
                StoredValue::Text("outdoor_01".to_string()),
                StoredValue::Float(15.0),
                StoredValue::Null,
                StoredValue::Null,
            ]
        );
    }

    #[test]
    fn test_encode_by_column_kind() {
        let int = FieldValue::Integer(1);
        let float = FieldValue::Float(3.0);
        let text = FieldValue::Text("on".to_string());

        assert_eq!(ColumnKind::Text(255).encode(Some(&int)), StoredValue::Text("1".to_string()));
        assert_eq!(ColumnKind::Integer.encode(Some(&float)), StoredValue::Integer(3));
        assert_eq!(
            ColumnKind::Integer.encode(Some(&FieldValue::Float(3.5))),
            StoredValue::Float(3.5)
        );
        assert_eq!(ColumnKind::Boolean.encode(Some(&int)), StoredValue::Boolean(true));
        assert_eq!(ColumnKind::Boolean.encode(Some(&text)), StoredValue::Boolean(true));
        assert_eq!(
            ColumnKind::Float.encode(Some(&FieldValue::Text("N/A".to_string()))),
            StoredValue::Text("N/A".to_string())
        );
        assert_eq!(
            ColumnKind::DateTime.encode(Some(&FieldValue::Integer(0))),
            StoredValue::Text("1970-01-01T00:00:00.000000Z".to_string())
        );
        assert_eq!(ColumnKind::Float.encode(None), StoredValue::Null);
    }

    #[test]
    fn test_text_column_stores_coerced_form() {
        let text = ColumnKind::Text(255);
        assert_eq!(
            text.encode(Some(&FieldValue::coerce("007"))),
            StoredValue::Text("7".to_string())
        );
        assert_eq!(
            text.encode(Some(&FieldValue::coerce("15.30"))),
            StoredValue::Text("15.3".to_string())
        );
        assert_eq!(
            text.encode(Some(&FieldValue::coerce("NNE"))),
            StoredValue::Text("NNE".to_string())
        );
    }

    #[test]
    fn test_declared_type_families() {
        assert!(ColumnKind::Float.matches_declared("FLOAT"));
        assert!(ColumnKind::Float.matches_declared("REAL"));
        assert!(ColumnKind::Text(255).matches_declared("VARCHAR(100)"));
        assert!(ColumnKind::Integer.matches_declared("integer"));
        assert!(ColumnKind::Boolean.matches_declared("BOOLEAN"));
        assert!(ColumnKind::DateTime.matches_declared("DATETIME"));
        assert!(!ColumnKind::Float.matches_declared("VARCHAR(255)"));
        assert!(!ColumnKind::Integer.matches_declared(""));
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let row = StoredRow {
            columns: vec![
                ("id".to_string(), StoredValue::Integer(1)),
                ("sensor_id".to_string(), StoredValue::Text("s1".to_string())),
                ("humidity".to_string(), StoredValue::Null),
            ],
        };
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"id":1,"sensor_id":"s1","humidity":null}"#
        );
        assert_eq!(row.id(), Some(1));
    }
}
