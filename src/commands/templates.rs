//! Template management commands

use crate::error::{Error, Result};
use crate::template::{Template, TemplateStore};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Short description of a stored template
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub db_name: String,
    pub sensors: usize,
    pub fields: usize,
}

impl From<&Template> for TemplateSummary {
    fn from(template: &Template) -> Self {
        Self {
            name: template.name.clone(),
            version: template.version.clone(),
            description: template.description.clone(),
            db_name: template.database.db_name.clone(),
            sensors: template.sensors.len(),
            fields: template.sensors.iter().map(|s| s.fields.len()).sum(),
        }
    }
}

pub fn cmd_list_templates(templates: &TemplateStore) -> Result<Vec<TemplateSummary>> {
    Ok(templates.load_all()?.iter().map(TemplateSummary::from).collect())
}

pub fn cmd_show_template(templates: &TemplateStore, name: &str) -> Result<Template> {
    templates.load(name)
}

pub fn cmd_import_template(templates: &TemplateStore, path: &Path) -> Result<Template> {
    let template = templates.import(path)?;
    info!(template = %template.name, "Imported template from {:?}", path);
    Ok(template)
}

/// Delete a template document; its store and changelog are kept
pub fn cmd_remove_template(templates: &TemplateStore, name: &str) -> Result<()> {
    if templates.delete(name)? {
        Ok(())
    } else {
        Err(Error::TemplateNotFound(name.to_string()))
    }
}

pub fn print_templates(templates: &[TemplateSummary]) {
    println!("\n📋 Templates\n");

    if templates.is_empty() {
        println!("No templates stored. Use 'sensorhub templates import' to add one.");
        return;
    }

    for template in templates {
        println!("• {} (v{})", template.name, template.version);
        if let Some(description) = &template.description {
            println!("  {}", description);
        }
        println!("  Database: {}", template.db_name);
        println!("  Sensors: {}, Fields: {}", template.sensors, template.fields);
        println!();
    }
}

pub fn print_template(template: &Template) -> Result<()> {
    print!("{}", toml::to_string_pretty(template)?);
    Ok(())
}
