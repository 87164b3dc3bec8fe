// ABOUTME: Parses restore filter configuration files
// ABOUTME: Converts TOML selection, rename and logging settings into filter inputs

use crate::filters::{RenameDirective, SelectionSet};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
pub struct FilterConfig {
    /// Qualified names, same syntax as table-file lines
    #[serde(default)]
    pub tables: Vec<String>,
    /// Whole schemas to restore
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub change_schema: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when RUST_LOG is unset
    #[serde(default)]
    pub filter: Option<String>,
}

impl FilterConfig {
    pub fn selection(&self) -> Result<SelectionSet> {
        let mut selection =
            SelectionSet::from_entries(&self.tables).context("Invalid entry in config 'tables'")?;
        for schema in &self.schemas {
            selection
                .add_schema(schema)
                .context("Invalid entry in config 'schemas'")?;
        }
        Ok(selection)
    }

    pub fn rename(&self) -> Result<Option<RenameDirective>> {
        self.change_schema
            .as_deref()
            .map(|schema| RenameDirective::new(schema))
            .transpose()
            .context("Invalid 'change_schema' in config")
    }
}

pub fn load_filter_config(path: &Path) -> Result<FilterConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let parsed: FilterConfig = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse TOML config at {}", path.display()))?;
    Ok(parsed)
}
