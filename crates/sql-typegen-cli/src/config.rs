//! The project configuration file (`sql-typegen.yaml`).

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "sql-typegen.yaml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub package: Package,
    #[serde(default)]
    pub queries: Vec<QueryPath>,
    #[serde(default)]
    pub migrations: Vec<MigrationPath>,
    #[serde(default)]
    pub models: Vec<ModelSource>,
}

#[derive(Debug, Deserialize)]
pub struct Package {
    /// Directory the generated module is written to, relative to the
    /// project directory.
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryPath {
    /// Glob pattern for query files, relative to the project directory.
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MigrationPath {
    /// Glob pattern for migration files, relative to the project directory.
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelSource {
    #[serde(rename = "openApi")]
    pub open_api: OpenApiPath,
    pub package: Package,
}

#[derive(Debug, Deserialize)]
pub struct OpenApiPath {
    pub path: String,
}

pub fn read(config_path: &Path) -> anyhow::Result<Config> {
    let data = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file \"{}\"", config_path.display()))?;

    serde_yaml::from_str(&data)
        .with_context(|| format!("failed to parse config file \"{}\"", config_path.display()))
}
