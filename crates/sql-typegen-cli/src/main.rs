//! The sql-typegen command line front end.
//!
//! Reads the project config, applies migrations to a fresh catalog, loads
//! models, analyzes every query file and reconciles it against its models,
//! then emits the generated module.

mod config;
mod emit;
mod openapi;

use anyhow::{bail, Context};
use clap::Parser;
use sql_typegen::{match_input, match_output, migrate, parse_query, Catalog, Model, Query};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "sql-typegen", about = "Generate typed database access code from SQL files")]
struct Args {
    /// Project directory containing the config file.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Config file name inside the project directory.
    #[arg(long, default_value = config::CONFIG_FILE)]
    config: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    run(&args.dir, &args.config)
}

fn run(project_dir: &Path, config_name: &str) -> anyhow::Result<()> {
    let config = config::read(&project_dir.join(config_name))?;

    let catalog = apply_migrations(project_dir, &config)?;
    let models = read_models(project_dir, &config)?;
    let queries = parse_queries(project_dir, &config, &catalog)?;

    for query in &queries {
        reconcile(query, &models)?;
    }

    let out_path = emit::generate(&config, project_dir, &models, &queries)?;
    println!("generated {}", out_path.display());
    Ok(())
}

fn apply_migrations(project_dir: &Path, config: &config::Config) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::new();

    for migration in &config.migrations {
        for path in glob_paths(project_dir, &migration.path)? {
            let sql = std::fs::read_to_string(&path).with_context(|| {
                format!("failed to read migration file \"{}\"", path.display())
            })?;

            tracing::debug!(file = %path.display(), "applying migration");
            migrate(&mut catalog, &sql).with_context(|| {
                format!("failed to apply migration file \"{}\"", path.display())
            })?;
        }
    }

    Ok(catalog)
}

/// Load every configured OpenAPI document and key the models by their
/// package-qualified name (`api.Person`).
fn read_models(
    project_dir: &Path,
    config: &config::Config,
) -> anyhow::Result<BTreeMap<String, Model>> {
    let mut models = BTreeMap::new();

    for source in &config.models {
        let paths = glob_paths(project_dir, &source.open_api.path)?;
        let loaded = openapi::read_models(&paths)?;

        for (_, file_models) in loaded {
            for (name, schema) in file_models {
                let model = Model {
                    name,
                    package: source.package.path.clone(),
                    schema,
                };
                models.insert(model.qualified_name(), model);
            }
        }
    }

    Ok(models)
}

fn parse_queries(
    project_dir: &Path,
    config: &config::Config,
    catalog: &Catalog,
) -> anyhow::Result<Vec<Query>> {
    let mut queries = Vec::new();

    for query_config in &config.queries {
        for path in glob_paths(project_dir, &query_config.path)? {
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read query file \"{}\"", path.display()))?;

            let query = parse_query(catalog, &sql)
                .with_context(|| format!("failed to parse file \"{}\"", path.display()))?;
            queries.push(query);
        }
    }

    Ok(queries)
}

fn reconcile(query: &Query, models: &BTreeMap<String, Model>) -> anyhow::Result<()> {
    if let Some(input) = &query.input {
        let model = models.get(&input.model).with_context(|| {
            format!("query {}: unknown input model \"{}\"", query.name, input.model)
        })?;
        match_input(input, &model.schema)
            .with_context(|| format!("in query {}", query.name))?;
    }

    if let Some(output) = &query.output {
        let model = models.get(&output.model).with_context(|| {
            format!(
                "query {}: unknown output model \"{}\"",
                query.name, output.model
            )
        })?;
        match_output(&output.table, &model.schema)
            .with_context(|| format!("in query {}", query.name))?;
    }

    Ok(())
}

fn glob_paths(project_dir: &Path, pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let full = project_dir.join(pattern);
    let Some(full) = full.to_str() else {
        bail!("non-utf8 path pattern \"{}\"", full.display());
    };

    let mut paths = Vec::new();
    for entry in
        glob::glob(full).with_context(|| format!("failed to resolve glob \"{pattern}\""))?
    {
        paths.push(entry.with_context(|| format!("failed to resolve glob \"{pattern}\""))?);
    }

    paths.sort();
    Ok(paths)
}
