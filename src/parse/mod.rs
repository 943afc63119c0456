//! Raw telemetry line parsing
//!
//! A line is a sequence of `key<sep>value` tokens joined by a delimiter, e.g.
//! `Sensor:outdoor_01;T:15.3;P:1013.2`. A `Sensor` token opens a record for
//! that sensor id and every following token is attached to it until the next
//! `Sensor` token. Values are coerced to integer, then float, then kept as text.

use crate::template::ParsingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key that marks the start of a sensor's readings
pub const SENSOR_MARKER: &str = "Sensor";

/// A parsed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Coerce a raw token value: integer, else finite float, else text
    pub fn coerce(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            return FieldValue::Integer(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Float(v),
            _ => FieldValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Readings attached to one sensor within a line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Raw line key -> coerced value
    pub values: BTreeMap<String, FieldValue>,
}

/// Result of parsing one raw line, sensors in order of first appearance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedLine {
    pub sensors: Vec<SensorReading>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorReading> {
        self.sensors.iter().find(|s| s.sensor_id == sensor_id)
    }

    /// Open a fresh record for a sensor; a repeated marker discards earlier readings
    fn open(&mut self, sensor_id: &str) -> usize {
        if let Some(idx) = self.sensors.iter().position(|s| s.sensor_id == sensor_id) {
            self.sensors[idx].values.clear();
            return idx;
        }
        self.sensors.push(SensorReading {
            sensor_id: sensor_id.to_string(),
            values: BTreeMap::new(),
        });
        self.sensors.len() - 1
    }
}

/// Parse one raw line according to a template's parsing settings.
///
/// Never fails: malformed tokens are dropped and an unusable line yields an
/// empty result. Field filtering against the template happens downstream.
pub fn parse_line(raw: &str, parsing: &ParsingConfig) -> ParsedLine {
    let mut parsed = ParsedLine::default();
    if parsing.delimiter.is_empty() || parsing.key_value_separator.is_empty() {
        return parsed;
    }

    let line: String = raw.trim().chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let mut current: Option<usize> = None;

    for token in line
        .split(parsing.delimiter.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let Some((key, value)) = token.split_once(parsing.key_value_separator.as_str()) else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        if key == SENSOR_MARKER {
            // an empty sensor id closes the context instead of opening one
            current = (!value.is_empty()).then(|| parsed.open(value));
        } else if let Some(idx) = current {
            if !key.is_empty() {
                parsed.sensors[idx]
                    .values
                    .insert(key.to_string(), FieldValue::coerce(value));
            }
        }
    }

    parsed
}
