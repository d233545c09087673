//! Structural reconciliation between inferred query shapes and application
//! models.
//!
//! Matching is name-based with a normalization that depends on the axis:
//! SQL columns compare case-insensitively with underscores stripped (so
//! `first_name` matches `firstName`), while fields of JSON records compare
//! case-insensitively only.

use crate::catalog::{DataType, Table};
use crate::error::{Error, Result};
use crate::model::{Schema, SchemaType};
use crate::query::QueryInput;

/// Which normalization rule is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Comparing model properties against SQL columns.
    Column,
    /// Comparing model properties against JSON record fields.
    Json,
}

/// Normalize a property or column name for comparison on the given axis.
pub fn normalize(axis: Axis, name: &str) -> String {
    match axis {
        Axis::Column => name.replace('_', "").to_lowercase(),
        Axis::Json => name.to_lowercase(),
    }
}

/// The result of resolving a dotted reference against a model schema:
/// the traversed property names with their original casing, the resolved
/// schema node and its parent object (for nullability).
#[derive(Debug)]
pub struct SchemaPath<'a> {
    pub path: Vec<String>,
    pub schema: &'a Schema,
    pub parent: Option<&'a Schema>,
}

impl SchemaPath<'_> {
    pub fn last_part(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Whether the resolved property is nullable in its parent object.
    pub fn nullable(&self) -> bool {
        match self.parent {
            Some(parent) => parent.nullable(self.last_part()),
            None => false,
        }
    }
}

/// Render a property path the way generated code will spell it
/// (`address.postalCode` becomes `Address.PostalCode`).
fn display_path(path: &[String]) -> String {
    path.iter()
        .map(|p| title_case(p))
        .collect::<Vec<_>>()
        .join(".")
}

fn title_case(property: &str) -> String {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn reconcile_error(path: &[String], message: String) -> Error {
    Error::Reconcile {
        message,
        path: path.to_vec(),
    }
}

/// Resolve a dotted reference like `person.address.city` against a schema.
/// Each segment matches a property by SQL-axis normalization.
pub fn resolve_ref<'a>(schema: &'a Schema, reference: &str) -> Result<SchemaPath<'a>> {
    let mut path = Vec::new();
    let mut parent = None;
    let mut current = schema;

    for segment in reference.split('.') {
        let normalized = normalize(Axis::Column, segment);

        let found = current
            .properties
            .iter()
            .find(|(name, _)| normalize(Axis::Column, name) == normalized);

        match found {
            Some((name, property)) => {
                path.push(name.clone());
                parent = Some(current);
                current = property;
            }
            None => {
                let message = match path.last() {
                    Some(last) => format!(
                        "failed to resolve reference \"{reference}\": could not resolve \
                         property \"{segment}\" of object \"{last}\""
                    ),
                    None => format!(
                        "failed to resolve reference \"{reference}\": could not resolve \
                         property \"{segment}\""
                    ),
                };
                return Err(reconcile_error(&path, message));
            }
        }
    }

    Ok(SchemaPath {
        path,
        schema: current,
        parent,
    })
}

/// Check that the query's result table populates every property of the
/// output model, recursing into nested json records.
pub fn match_output(table: &Table, schema: &Schema) -> Result<()> {
    let mut path = Vec::new();
    table_populates_model(Axis::Column, table, schema, &mut path)
}

fn table_populates_model(
    axis: Axis,
    table: &Table,
    schema: &Schema,
    path: &mut Vec<String>,
) -> Result<()> {
    for (property_name, property) in &schema.properties {
        let normalized = normalize(axis, property_name);
        let column = table
            .columns()
            .iter()
            .find(|c| normalize(axis, &c.name) == normalized);

        path.push(property_name.clone());

        let Some(column) = column else {
            return Err(reconcile_error(
                path,
                format!(
                    "selection missing for output property {}",
                    display_path(path)
                ),
            ));
        };

        match property.ty {
            SchemaType::Object => {
                if !column.ty.is_json() {
                    return Err(reconcile_error(
                        path,
                        format!(
                            "invalid selection type \"{}\" for an object output property {}",
                            column.ty,
                            display_path(path)
                        ),
                    ));
                }

                if column.ty.record_is_array {
                    return Err(reconcile_error(
                        path,
                        format!(
                            "array selected for object output property {}",
                            display_path(path)
                        ),
                    ));
                }

                if let Some(record) = &column.ty.record {
                    table_populates_model(Axis::Json, record, property, path)?;
                }
            }
            SchemaType::Array => {
                if !column.ty.array && !column.ty.is_json() {
                    return Err(reconcile_error(
                        path,
                        format!(
                            "invalid selection type \"{}\" for an array output property {}",
                            column.ty,
                            display_path(path)
                        ),
                    ));
                }

                if let Some(record) = &column.ty.record {
                    if !column.ty.record_is_array {
                        return Err(reconcile_error(
                            path,
                            format!(
                                "object selected for array output property {}",
                                display_path(path)
                            ),
                        ));
                    }

                    let items = property.items.as_deref().ok_or_else(|| {
                        reconcile_error(
                            path,
                            format!(
                                "array output property {} has no item schema",
                                display_path(path)
                            ),
                        )
                    })?;

                    table_populates_model(Axis::Json, record, items, path)?;
                }
            }
            // Primitive coercion rules are deferred; a matching column
            // is enough.
            _ => {}
        }

        path.pop();
    }

    Ok(())
}

/// Check every input parameter against the input model: the reference must
/// resolve, and parameters inferred to carry a json record shape must agree
/// with the model property they point at.
pub fn match_input(input: &QueryInput, schema: &Schema) -> Result<()> {
    for param in &input.params {
        let resolved = resolve_ref(schema, &param.reference)?;

        let Some(ty) = &param.ty else {
            continue;
        };
        let Some(record) = &ty.record else {
            continue;
        };

        record_matches_property(&param.reference, ty, record, &resolved)?;
    }

    Ok(())
}

fn record_matches_property(
    reference: &str,
    ty: &DataType,
    record: &Table,
    resolved: &SchemaPath<'_>,
) -> Result<()> {
    let mut path = resolved.path.clone();

    if ty.record_is_array {
        if resolved.schema.ty != SchemaType::Array {
            return Err(reconcile_error(
                &path,
                format!(
                    "input \"{reference}\" is used as an array of records but property {} \
                     is not an array",
                    display_path(&path)
                ),
            ));
        }

        let items = resolved.schema.items.as_deref().ok_or_else(|| {
            reconcile_error(
                &path,
                format!("array input property {} has no item schema", display_path(&path)),
            )
        })?;
        if items.ty != SchemaType::Object {
            return Err(reconcile_error(
                &path,
                format!(
                    "input \"{reference}\" is used as an array of records but property {} \
                     is not an array of objects",
                    display_path(&path)
                ),
            ));
        }

        table_populates_model(Axis::Column, record, items, &mut path)
    } else {
        if resolved.schema.ty != SchemaType::Object {
            return Err(reconcile_error(
                &path,
                format!(
                    "input \"{reference}\" is used as a record but property {} is not \
                     an object",
                    display_path(&path)
                ),
            ));
        }

        table_populates_model(Axis::Column, record, resolved.schema, &mut path)
    }
}
