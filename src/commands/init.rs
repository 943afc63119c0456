//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::template::{FieldSpec, SensorSpec, Template, TemplateStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
    /// Write the example weather-station template when no templates exist
    pub example_template: bool,
}

/// What `init` created
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub templates_dir: String,
    pub databases_dir: String,
    pub changelog_dir: String,
    pub example_template: Option<String>,
}

/// Template written by `init` so a fresh install has something to ingest with
pub fn example_template() -> Template {
    let mut template = Template::new("weather_station");
    template.description = Some("Outdoor and indoor climate sensors".to_string());
    template.database.db_name = "weather_station.db".to_string();

    let mut temperature = FieldSpec::new("temperature", "T", "REAL");
    temperature.unit = Some("°C".to_string());
    let mut pressure = FieldSpec::new("pressure", "P", "REAL");
    pressure.unit = Some("hPa".to_string());
    let mut humidity = FieldSpec::new("humidity", "H", "REAL");
    humidity.unit = Some("%".to_string());

    template.sensors = vec![
        SensorSpec::new(
            "outdoor_01",
            "outdoor_climate",
            vec![temperature.clone(), pressure, humidity.clone()],
        ),
        SensorSpec::new("indoor_01", "indoor_climate", vec![temperature, humidity]),
    ];
    template
}

/// Initialize sensorhub configuration and data directories
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions {
        base_dir,
        config_path,
        force,
        example_template: with_example,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;

    config.validate()?;
    config.save()?;
    config.ensure_dirs()?;
    info!("Created data directories under {:?}", config.paths.base_dir);

    let templates = TemplateStore::open(&config.paths.templates_dir)?;
    let mut example = None;
    if with_example && templates.list()?.is_empty() {
        let template = example_template();
        templates.save(&template)?;
        example = Some(template.name);
    }

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        templates_dir: config.paths.templates_dir.display().to_string(),
        databases_dir: config.paths.databases_dir.display().to_string(),
        changelog_dir: config.paths.changelog_dir.display().to_string(),
        example_template: example,
    })
}

pub fn print_init_report(report: &InitReport) {
    println!("✓ sensorhub initialized successfully");
    println!("  Config: {}", report.config_path);
    println!("  Templates: {}", report.templates_dir);
    println!("  Databases: {}", report.databases_dir);
    if let Some(name) = &report.example_template {
        println!("  Example template: {}", name);
    }
    println!("\nNext steps:");
    println!("  1. Add device templates: sensorhub templates import <file.toml>");
    println!("  2. Add [[sources]] entries to the config file");
    println!("  3. Start collecting: sensorhub run");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(tmp: &TempDir, force: bool) -> InitOptions {
        InitOptions {
            base_dir: tmp.path().to_path_buf(),
            config_path: tmp.path().join("config.toml"),
            force,
            example_template: true,
        }
    }

    #[tokio::test]
    async fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let report = cmd_init(options(&tmp, false)).await.unwrap();

        assert!(tmp.path().join("config.toml").exists());
        assert!(tmp.path().join("templates").is_dir());
        assert!(tmp.path().join("databases").is_dir());
        assert!(tmp.path().join("changelog").is_dir());
        assert_eq!(report.example_template.as_deref(), Some("weather_station"));

        let config = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(config.is_initialized());
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        cmd_init(options(&tmp, false)).await.unwrap();

        let again = cmd_init(options(&tmp, false)).await;
        assert!(matches!(again, Err(Error::AlreadyInitialized(_))));

        let forced = cmd_init(options(&tmp, true)).await.unwrap();
        // existing templates are left alone
        assert!(forced.example_template.is_none());
    }

    #[test]
    fn test_example_template_is_valid() {
        assert!(example_template().validate().is_ok());
    }
}
