//! File-backed template documents (`<templates_dir>/<name>.toml`)

use super::{is_template_name, Template};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TEMPLATE_EXTENSION: &str = "toml";

/// Template document store handle
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    /// Open the store, creating its directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Config(format!("cannot create templates directory {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if !is_template_name(name) {
            return Err(Error::TemplateNotFound(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", name, TEMPLATE_EXTENSION)))
    }

    /// Validate and persist a template, replacing any previous version
    pub fn save(&self, template: &Template) -> Result<()> {
        template.validate()?;
        let path = self.path_for(&template.name)?;
        let content = toml::to_string_pretty(template)?;
        std::fs::write(&path, content)?;
        info!(template = %template.name, "Saved template to {:?}", path);
        Ok(())
    }

    /// Load a template by name
    pub fn load(&self, name: &str) -> Result<Template> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(Error::TemplateNotFound(name.to_string()));
        }

        debug!(template = %name, "Loading template from {:?}", path);
        let content = std::fs::read_to_string(&path)?;
        let template: Template = toml::from_str(&content)?;

        if template.name != name {
            warn!(
                "Template file {:?} declares name '{}'; it is addressed as '{}'",
                path, template.name, name
            );
        }
        Ok(template)
    }

    /// Read a template document from an arbitrary file and store it
    pub fn import(&self, path: &Path) -> Result<Template> {
        let content = std::fs::read_to_string(path)?;
        let template: Template = toml::from_str(&content)?;
        self.save(&template)?;
        Ok(template)
    }

    /// Names of all stored templates
    pub fn list(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(names)
    }

    /// Load every template that parses; broken documents are logged and skipped
    pub fn load_all(&self) -> Result<Vec<Template>> {
        let mut templates = Vec::new();
        for name in self.list()? {
            match self.load(&name) {
                Ok(template) => templates.push(template),
                Err(e) => warn!(template = %name, "Skipping unreadable template: {}", e),
            }
        }
        Ok(templates)
    }

    /// Delete a template; returns false when it did not exist
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = match self.path_for(name) {
            Ok(path) => path,
            Err(_) => return Ok(false),
        };
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        info!(template = %name, "Deleted template");
        Ok(true)
    }
}
