//! Default values for configuration

/// Default delay between polls of an idle source (milliseconds)
pub fn default_poll_interval_ms() -> u64 {
    2000
}

/// Default time to wait for a line before reporting an empty poll (milliseconds)
pub fn default_read_timeout_ms() -> u64 {
    1000
}

/// Service lines emitted by device firmware that never carry readings
pub fn default_skip_markers() -> Vec<String> {
    vec!["HANDSHAKE".to_string(), "ARDUINO_READY".to_string()]
}

/// Default number of lines sampled for template detection
pub fn default_detect_sample_lines() -> usize {
    3
}

/// Default sampling window for template detection (seconds)
pub fn default_detect_timeout_secs() -> u64 {
    5
}

/// Minimum detection score (0.0 - 1.0)
pub fn default_detect_min_score() -> f32 {
    0.3
}

/// One connection per store keeps each template single-writer
pub fn default_storage_max_connections() -> u32 {
    1
}

/// Default SQLite busy timeout (milliseconds)
pub fn default_storage_busy_timeout_ms() -> u64 {
    5000
}

/// Default database file name for templates that do not declare one
pub fn default_db_name() -> String {
    "sensors.db".to_string()
}

/// Default storage driver
pub fn default_db_driver() -> String {
    "sqlite".to_string()
}

/// Default template version
pub fn default_template_version() -> String {
    "1.0".to_string()
}

/// Default column type for fields that do not declare one
pub fn default_db_type() -> String {
    "REAL".to_string()
}

/// Default delimiter between tokens of a raw line
pub fn default_delimiter() -> String {
    ";".to_string()
}

/// Default separator between key and value inside a token
pub fn default_key_value_separator() -> String {
    ":".to_string()
}

/// Default row limit for table reads
pub fn default_row_limit() -> usize {
    100
}
