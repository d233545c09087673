//! Loads application models from OpenAPI-style component documents.
//!
//! Only the `components.schemas` section is read. `$ref` values may point
//! at schemas in the same document (`#/components/schemas/X`) or in a
//! sibling document (`other.yaml#/components/schemas/X`).

use anyhow::{bail, Context};
use serde::Deserialize;
use sql_typegen::{Schema, SchemaType};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    components: Components,
}

#[derive(Debug, Default, Deserialize)]
struct Components {
    #[serde(default)]
    schemas: BTreeMap<String, RawSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSchema {
    #[serde(rename = "type")]
    ty: Option<String>,
    #[serde(rename = "$ref")]
    reference: Option<String>,
    format: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, RawSchema>,
    items: Option<Box<RawSchema>>,
    #[serde(default)]
    required: Vec<String>,
}

const REF_PATH: &str = "#/components/schemas/";

#[derive(Default)]
struct Resolver {
    documents: BTreeMap<PathBuf, Document>,
    resolved: BTreeMap<PathBuf, BTreeMap<String, Schema>>,
}

/// Read every document and resolve all named schemas in each, following
/// references across files. Returns, per file, the models by name.
pub fn read_models(
    file_paths: &[PathBuf],
) -> anyhow::Result<BTreeMap<PathBuf, BTreeMap<String, Schema>>> {
    let mut resolver = Resolver::default();

    for path in file_paths {
        resolver.load_file(path)?;
    }

    Ok(resolver.resolved)
}

impl Resolver {
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        if self.documents.contains_key(path) {
            return Ok(());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read OpenAPI file \"{}\"", path.display()))?;
        let document: Document = serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse OpenAPI file \"{}\"", path.display()))?;

        let names: Vec<String> = document.components.schemas.keys().cloned().collect();
        self.documents.insert(path.to_path_buf(), document);
        self.resolved.entry(path.to_path_buf()).or_default();

        for name in names {
            self.resolve_named(path, &name)?;
        }

        Ok(())
    }

    fn resolve_named(&mut self, path: &Path, name: &str) -> anyhow::Result<Schema> {
        if let Some(schema) = self.resolved.get(path).and_then(|m| m.get(name)) {
            return Ok(schema.clone());
        }

        let raw = self
            .documents
            .get(path)
            .and_then(|d| d.components.schemas.get(name))
            .cloned()
            .with_context(|| {
                format!(
                    "unknown model \"{name}\" in OpenAPI file \"{}\"",
                    path.display()
                )
            })?;

        let schema = self.resolve_schema(path, &raw)?;
        self.resolved
            .entry(path.to_path_buf())
            .or_default()
            .insert(name.to_string(), schema.clone());

        Ok(schema)
    }

    fn resolve_schema(&mut self, path: &Path, raw: &RawSchema) -> anyhow::Result<Schema> {
        if let Some(reference) = &raw.reference {
            return self.resolve_reference(path, reference);
        }

        let ty = raw
            .ty
            .as_deref()
            .context("OpenAPI schema has neither a type nor a $ref")?;

        match ty {
            "object" => {
                let mut properties = BTreeMap::new();
                for (name, property) in &raw.properties {
                    properties.insert(name.clone(), self.resolve_schema(path, property)?);
                }

                Ok(Schema::object(properties, raw.required.iter().cloned()))
            }
            "array" => {
                let items = raw
                    .items
                    .as_deref()
                    .context("OpenAPI array schema is missing items")?;
                Ok(Schema::array(self.resolve_schema(path, items)?))
            }
            _ => Ok(Schema::primitive(primitive_type(ty, raw.format.as_deref())?)),
        }
    }

    fn resolve_reference(&mut self, path: &Path, reference: &str) -> anyhow::Result<Schema> {
        let Some((file_part, name)) = reference.split_once(REF_PATH) else {
            bail!("couldn't parse reference \"{reference}\"");
        };
        let name = name.to_string();

        if file_part.is_empty() {
            return self.resolve_named(path, &name);
        }

        let referenced = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(file_part);
        self.load_file(&referenced)?;
        self.resolve_named(&referenced, &name)
    }
}

fn primitive_type(ty: &str, format: Option<&str>) -> anyhow::Result<SchemaType> {
    Ok(match (ty, format) {
        ("string", Some("date-time")) => SchemaType::Time,
        ("string", _) => SchemaType::String,
        ("integer", Some("int32")) => SchemaType::Int32,
        ("integer", Some("int64")) => SchemaType::Int64,
        ("integer", _) => SchemaType::Int,
        ("number", Some("float")) => SchemaType::Float32,
        ("number", _) => SchemaType::Float64,
        ("boolean", _) => SchemaType::Bool,
        other => bail!("unsupported OpenAPI schema type \"{}\"", other.0),
    })
}
