//! sensorhub: template-driven ingestion of serial sensor telemetry
//!
//! Device templates describe which sensors a line source reports and how
//! their fields map onto columns. Each template owns one SQLite store with a
//! table per sensor; stores are created and evolved from the template and
//! every schema change is recorded in a JSON changelog.

pub mod changes;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
pub mod ingest;
pub mod parse;
pub mod progress;
pub mod query;
pub mod schema;
pub mod source;
pub mod template;
