//! Device templates
//!
//! A template declares what one device reports and where it is stored:
//! - the target store (database name + driver)
//! - how raw lines are tokenized (delimiter + key/value separator)
//! - the sensors, each bound to a table, and the typed fields they carry

mod store;

pub use store::*;

use crate::config::{
    default_db_driver, default_db_name, default_db_type, default_delimiter,
    default_key_value_separator, default_template_version,
};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Columns every sensor table carries ahead of its declared fields
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "timestamp", "sensor_id"];

/// A device template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique template name, also the document key in the store
    #[serde(rename = "template_name")]
    pub name: String,

    /// Informational version string
    #[serde(rename = "template_version", default = "default_template_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub database: DatabaseSpec,

    #[serde(default)]
    pub parsing: ParsingConfig,

    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

/// Target store of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    #[serde(default = "default_db_name")]
    pub db_name: String,

    #[serde(default = "default_db_driver")]
    pub driver: String,
}

/// Tokenization settings for raw lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default = "default_key_value_separator")]
    pub key_value_separator: String,
}

/// One sensor reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Value of the `Sensor` marker in raw lines
    pub sensor_id: String,

    /// Storage table for this sensor's readings
    pub table_name: String,

    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// One typed datum reported by a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Destination column
    pub name: String,

    /// Key expected in the raw line
    pub source: String,

    /// Column type name; unrecognized names are stored as text
    #[serde(default = "default_db_type")]
    pub db_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for DatabaseSpec {
    fn default() -> Self {
        Self {
            db_name: default_db_name(),
            driver: default_db_driver(),
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            key_value_separator: default_key_value_separator(),
        }
    }
}

impl FieldSpec {
    pub fn new(name: &str, source: &str, db_type: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            db_type: db_type.to_string(),
            unit: None,
            description: None,
        }
    }
}

impl SensorSpec {
    pub fn new(sensor_id: &str, table_name: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            table_name: table_name.to_string(),
            fields,
        }
    }

    /// Look up a field by its destination column
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl Template {
    /// Create an empty template with default database and parsing settings
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: default_template_version(),
            description: None,
            database: DatabaseSpec::default(),
            parsing: ParsingConfig::default(),
            sensors: Vec::new(),
        }
    }

    /// Find the sensor bound to a `Sensor` marker value
    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorSpec> {
        self.sensors.iter().find(|s| s.sensor_id == sensor_id)
    }

    /// All raw-line keys this template expects, in declaration order
    pub fn field_sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sensors
            .iter()
            .flat_map(|s| s.fields.iter())
            .map(|f| f.source.as_str())
            .filter(|source| seen.insert(*source))
            .collect()
    }

    /// Structural validation applied before a template is stored.
    ///
    /// `db_type` is deliberately not checked: unknown types fall back to text.
    pub fn validate(&self) -> Result<()> {
        if !is_template_name(&self.name) {
            return Err(invalid(format!(
                "template name '{}' must be non-empty and use only letters, digits, '_' or '-'",
                self.name
            )));
        }

        if self.parsing.delimiter.is_empty() || self.parsing.key_value_separator.is_empty() {
            return Err(invalid("delimiter and key_value_separator must not be empty"));
        }
        if self.parsing.delimiter == self.parsing.key_value_separator {
            return Err(invalid("delimiter and key_value_separator must differ"));
        }

        if self.database.db_name.trim().is_empty()
            || self.database.db_name.contains(['/', '\\'])
        {
            return Err(invalid(format!(
                "database name '{}' must be a plain file name",
                self.database.db_name
            )));
        }

        let mut sensor_ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.sensor_id.is_empty() {
                return Err(invalid("sensor_id must not be empty"));
            }
            if !sensor_ids.insert(sensor.sensor_id.as_str()) {
                return Err(invalid(format!("duplicate sensor_id '{}'", sensor.sensor_id)));
            }
            if !is_identifier(&sensor.table_name) {
                return Err(invalid(format!(
                    "table name '{}' of sensor '{}' is not a valid identifier",
                    sensor.table_name, sensor.sensor_id
                )));
            }

            let mut field_names = HashSet::new();
            for field in &sensor.fields {
                if !is_identifier(&field.name) {
                    return Err(invalid(format!(
                        "field name '{}' of sensor '{}' is not a valid identifier",
                        field.name, sensor.sensor_id
                    )));
                }
                if RESERVED_COLUMNS.contains(&field.name.to_ascii_lowercase().as_str()) {
                    return Err(invalid(format!(
                        "field name '{}' of sensor '{}' shadows a fixed column",
                        field.name, sensor.sensor_id
                    )));
                }
                if !field_names.insert(field.name.to_ascii_lowercase()) {
                    return Err(invalid(format!(
                        "duplicate field '{}' in sensor '{}'",
                        field.name, sensor.sensor_id
                    )));
                }
                if field.source.is_empty() {
                    return Err(invalid(format!(
                        "field '{}' of sensor '{}' has an empty source key",
                        field.name, sensor.sensor_id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::TemplateInvalid(reason.into())
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

fn template_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").expect("valid name regex"))
}

/// True for names that can be used as SQL table or column identifiers
pub fn is_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// True for names that can key a template document
pub fn is_template_name(name: &str) -> bool {
    template_name_regex().is_match(name)
}
