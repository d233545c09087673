//! Language-agnostic application data models.
//!
//! Models come from OpenAPI-style component documents; the core only sees
//! this reduced form. A property is nullable iff it is absent from its
//! parent object's `required` set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Bool,
    String,
    Int,
    Int32,
    Int64,
    Float32,
    Float64,
    Time,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub ty: SchemaType,

    /// Property schemas by name. Only meaningful for objects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,

    /// Names of required (non-nullable) properties.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required: BTreeSet<String>,

    /// The element schema. Only meaningful for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

impl Schema {
    pub fn primitive(ty: SchemaType) -> Self {
        Schema {
            ty,
            properties: BTreeMap::new(),
            required: BTreeSet::new(),
            items: None,
        }
    }

    pub fn object(
        properties: impl IntoIterator<Item = (String, Schema)>,
        required: impl IntoIterator<Item = String>,
    ) -> Self {
        Schema {
            ty: SchemaType::Object,
            properties: properties.into_iter().collect(),
            required: required.into_iter().collect(),
            items: None,
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema {
            ty: SchemaType::Array,
            properties: BTreeMap::new(),
            required: BTreeSet::new(),
            items: Some(Box::new(items)),
        }
    }

    /// Whether the named property is nullable in this object.
    pub fn nullable(&self, property: &str) -> bool {
        !self.required.contains(property)
    }
}

/// A named model inside a package, as referenced by `:in`/`:out` directives
/// (`package.Name`).
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub package: String,
    pub schema: Schema,
}

impl Model {
    /// The package-qualified name queries refer to the model by.
    pub fn qualified_name(&self) -> String {
        let package = self.package.rsplit('/').next().unwrap_or(&self.package);
        format!("{package}.{name}", name = self.name)
    }
}
