//! The recognized PostgreSQL type names and their Rust mappings.

use crate::catalog::DataType;
use std::fmt;

pub const DATA_TYPE_JSON: &str = "json";
pub const DATA_TYPE_JSONB: &str = "jsonb";
pub const DATA_TYPE_RECORD: &str = "record";

/// The closed set of type names the analyzer and the parameter rewriter
/// recognize. Multi-word spellings are included so that casts like
/// `::double precision` are picked up.
pub const DATA_TYPES: &[&str] = &[
    "text",
    "varchar",
    "char",
    "character",
    "character varying",
    "smallint",
    "int2",
    "int",
    "integer",
    "int4",
    "bigint",
    "int8",
    "smallserial",
    "serial2",
    "serial",
    "serial4",
    "bigserial",
    "serial8",
    "double precision",
    "float8",
    "real",
    "float4",
    "numeric",
    "decimal",
    "money",
    "bool",
    "boolean",
    "time without time zone",
    "time",
    "time with time zone",
    "timetz",
    "timestamp without time zone",
    "timestamp",
    "timestamp with time zone",
    "timestamptz",
    "date",
    "interval",
    "uuid",
    "bit",
    "bit varying",
    "varbit",
    "bytea",
    DATA_TYPE_JSON,
    DATA_TYPE_JSONB,
    DATA_TYPE_RECORD,
];

/// Whether `name` (already lowercased) is a recognized type name.
pub fn is_data_type(name: &str) -> bool {
    DATA_TYPES.contains(&name)
}

/// Convert a parsed SQL type into a catalog [`DataType`].
///
/// Names are canonicalized to their short lowercase spellings so that later
/// base-name comparisons don't have to deal with aliases. Unrecognized types
/// keep their lowercased textual name.
pub(crate) fn data_type_from_ast(dt: &sqlparser::ast::DataType) -> DataType {
    use sqlparser::ast::{ArrayElemTypeDef, DataType as Ast, TimezoneInfo};

    let mut out = DataType::default();
    out.name = match dt {
        Ast::SmallInt(_) => "int2".to_string(),
        Ast::Int(_) | Ast::Integer(_) => "int4".to_string(),
        Ast::BigInt(_) => "int8".to_string(),
        Ast::Real => "float4".to_string(),
        Ast::Double(_) | Ast::DoublePrecision => "float8".to_string(),
        Ast::Numeric(_) | Ast::Decimal(_) => "numeric".to_string(),
        Ast::Text => "text".to_string(),
        Ast::Varchar(_) | Ast::CharacterVarying(_) => "varchar".to_string(),
        Ast::Char(_) | Ast::Character(_) => "char".to_string(),
        Ast::Bytea => "bytea".to_string(),
        Ast::Boolean | Ast::Bool => "bool".to_string(),
        Ast::Timestamp(_, tz) => {
            if matches!(tz, TimezoneInfo::WithTimeZone | TimezoneInfo::Tz) {
                "timestamptz".to_string()
            } else {
                "timestamp".to_string()
            }
        }
        Ast::Date => "date".to_string(),
        Ast::Time(_, tz) => {
            if matches!(tz, TimezoneInfo::WithTimeZone | TimezoneInfo::Tz) {
                "timetz".to_string()
            } else {
                "time".to_string()
            }
        }
        Ast::Interval { .. } => "interval".to_string(),
        Ast::Uuid => "uuid".to_string(),
        Ast::JSON => DATA_TYPE_JSON.to_string(),
        Ast::JSONB => DATA_TYPE_JSONB.to_string(),
        Ast::Array(elem) => {
            let inner = match elem {
                ArrayElemTypeDef::AngleBracket(inner)
                | ArrayElemTypeDef::SquareBracket(inner, _)
                | ArrayElemTypeDef::Parenthesis(inner) => data_type_from_ast(inner),
                ArrayElemTypeDef::None => DataType::default(),
            };
            out.array = true;
            out.schema = inner.schema;
            inner.name
        }
        Ast::Custom(name, _) => {
            let parts: Vec<String> = name
                .0
                .iter()
                .filter_map(|p| p.as_ident().map(|i| i.value.to_lowercase()))
                .collect();
            match parts.as_slice() {
                [schema, name] => {
                    out.schema = Some(schema.clone());
                    name.clone()
                }
                [name] => name.clone(),
                _ => name.to_string().to_lowercase(),
            }
        }
        other => other.to_string().to_lowercase(),
    };

    out
}

/// Rust types the code emitter maps result columns and parameters onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RustType {
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    String,
    VecU8,
    Bool,
    DateTime,
    Date,
    Time,
    Duration,
    Uuid,
    JsonValue,
    Vec(Box<RustType>),
    Option(Box<RustType>),
    Custom(String),
}

impl RustType {
    /// Wrap this type in Option if nullable.
    pub fn nullable(self) -> Self {
        RustType::Option(Box::new(self))
    }

    /// Returns the Rust type path for code generation.
    pub fn type_path(&self) -> String {
        match self {
            RustType::I16 => "i16".to_string(),
            RustType::I32 => "i32".to_string(),
            RustType::I64 => "i64".to_string(),
            RustType::F32 => "f32".to_string(),
            RustType::F64 => "f64".to_string(),
            RustType::Decimal => "rust_decimal::Decimal".to_string(),
            RustType::String => "String".to_string(),
            RustType::VecU8 => "Vec<u8>".to_string(),
            RustType::Bool => "bool".to_string(),
            RustType::DateTime => "chrono::DateTime<chrono::Utc>".to_string(),
            RustType::Date => "chrono::NaiveDate".to_string(),
            RustType::Time => "chrono::NaiveTime".to_string(),
            RustType::Duration => "chrono::Duration".to_string(),
            RustType::Uuid => "uuid::Uuid".to_string(),
            RustType::JsonValue => "serde_json::Value".to_string(),
            RustType::Vec(inner) => format!("Vec<{}>", inner.type_path()),
            RustType::Option(inner) => format!("Option<{}>", inner.type_path()),
            RustType::Custom(name) => name.clone(),
        }
    }
}

impl fmt::Display for RustType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_path())
    }
}

/// Map a catalog data type onto the Rust type the emitter should use,
/// ignoring nullability (callers wrap in Option from `not_null` / `required`).
pub fn rust_type_for(ty: &DataType) -> RustType {
    let base = match ty.name.as_str() {
        "int2" | "smallint" | "smallserial" | "serial2" => RustType::I16,
        "int4" | "int" | "integer" | "serial" | "serial4" => RustType::I32,
        "int8" | "bigint" | "bigserial" | "serial8" => RustType::I64,
        "float4" | "real" => RustType::F32,
        "float8" | "double precision" => RustType::F64,
        "numeric" | "decimal" | "money" => RustType::Decimal,
        "text" | "varchar" | "char" | "character" | "character varying" | "bit"
        | "bit varying" | "varbit" => RustType::String,
        "bytea" => RustType::VecU8,
        "bool" | "boolean" => RustType::Bool,
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" => RustType::DateTime,
        "date" => RustType::Date,
        "time" | "timetz" | "time without time zone" | "time with time zone" => RustType::Time,
        "interval" => RustType::Duration,
        "uuid" => RustType::Uuid,
        DATA_TYPE_JSON | DATA_TYPE_JSONB | DATA_TYPE_RECORD => RustType::JsonValue,
        other => RustType::Custom(other.to_string()),
    };

    if ty.array {
        RustType::Vec(Box::new(base))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_type_names() {
        assert!(is_data_type("int"));
        assert!(is_data_type("jsonb"));
        assert!(is_data_type("double precision"));
        assert!(!is_data_type("INT"));
        assert!(!is_data_type("tsvector"));
    }

    #[test]
    fn test_rust_type_mapping() {
        let mut ty = DataType::default();
        ty.name = "int8".to_string();
        assert_eq!(rust_type_for(&ty), RustType::I64);

        ty.array = true;
        assert_eq!(rust_type_for(&ty), RustType::Vec(Box::new(RustType::I64)));

        ty.name = "jsonb".to_string();
        ty.array = false;
        assert_eq!(rust_type_for(&ty), RustType::JsonValue);
    }

    #[test]
    fn test_rust_type_path() {
        assert_eq!(RustType::I32.type_path(), "i32");
        assert_eq!(RustType::JsonValue.type_path(), "serde_json::Value");
        assert_eq!(
            RustType::Option(Box::new(RustType::String)).type_path(),
            "Option<String>"
        );
    }
}
