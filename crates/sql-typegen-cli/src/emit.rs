//! Emits the generated Rust module: one struct per model, one row struct
//! per query with typed output, and a `Queries` wrapper over
//! `tokio_postgres` with one async method per query.

use crate::config::Config;
use anyhow::Context;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sql_typegen::{rust_type_for, Model, Query, QueryParam, RustType, Schema, SchemaType};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Generate the queries module and write it under the configured package
/// path. Returns the path of the written file.
pub fn generate(
    config: &Config,
    project_dir: &Path,
    models: &BTreeMap<String, Model>,
    queries: &[Query],
) -> anyhow::Result<PathBuf> {
    let mut items: Vec<TokenStream> = Vec::new();

    for model in models.values() {
        model_structs(&model.name, &model.schema, &mut items);
    }

    for query in queries {
        if let Some(output) = &query.output {
            items.push(row_struct(&query.name, &output.table));
        }
    }

    items.push(queries_struct(models, queries));

    let tokens = quote! { #(#items)* };
    let file = syn::parse2::<syn::File>(tokens).context("generated code failed to parse")?;
    let mut rendered = String::from(
        "// Code generated by sql-typegen. Do not edit.\n\
         #![allow(dead_code)]\n\n",
    );
    rendered.push_str(&prettyplease::unparse(&file));

    let out_dir = project_dir.join(&config.package.path);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create output directory \"{}\"", out_dir.display()))?;

    let out_path = out_dir.join("queries.rs");
    std::fs::write(&out_path, rendered)
        .with_context(|| format!("failed to write \"{}\"", out_path.display()))?;

    tracing::debug!(path = %out_path.display(), "wrote generated queries");
    Ok(out_path)
}

/// Emit a struct for an object model, recursing into nested objects and
/// array items, which get structs named after their position
/// (`Person` -> `PersonAddress`).
fn model_structs(name: &str, schema: &Schema, items: &mut Vec<TokenStream>) {
    if schema.ty != SchemaType::Object {
        return;
    }

    let ident = format_ident!("{}", to_pascal_case(name));
    let mut fields = Vec::new();

    for (prop_name, prop) in &schema.properties {
        let field = format_ident!("{}", sanitize_field_name(&to_snake_case(prop_name)));
        let mut ty = property_type(name, prop_name, prop, items);
        if schema.nullable(prop_name) {
            ty = quote! { Option<#ty> };
        }

        fields.push(quote! {
            #[serde(rename = #prop_name)]
            pub #field: #ty
        });
    }

    items.push(quote! {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        pub struct #ident {
            #(#fields),*
        }
    });
}

fn property_type(
    parent: &str,
    prop_name: &str,
    schema: &Schema,
    items: &mut Vec<TokenStream>,
) -> TokenStream {
    match schema.ty {
        SchemaType::Bool => quote! { bool },
        SchemaType::String => quote! { String },
        SchemaType::Int | SchemaType::Int64 => quote! { i64 },
        SchemaType::Int32 => quote! { i32 },
        SchemaType::Float32 => quote! { f32 },
        SchemaType::Float64 => quote! { f64 },
        SchemaType::Time => quote! { chrono::DateTime<chrono::Utc> },
        SchemaType::Object => {
            let nested = format!("{}{}", to_pascal_case(parent), to_pascal_case(prop_name));
            model_structs(&nested, schema, items);
            let ident = format_ident!("{nested}");
            quote! { #ident }
        }
        SchemaType::Array => match &schema.items {
            Some(item) => {
                let inner = property_type(parent, prop_name, item, items);
                quote! { Vec<#inner> }
            }
            None => quote! { Vec<serde_json::Value> },
        },
    }
}

/// The typed row struct for a query's inferred result columns.
fn row_struct(query_name: &str, table: &sql_typegen::Table) -> TokenStream {
    let ident = format_ident!("{}Row", to_pascal_case(query_name));

    let fields: Vec<TokenStream> = table
        .columns()
        .iter()
        .map(|col| {
            let name = format_ident!("{}", sanitize_field_name(&col.name));
            let mut ty = rust_type_to_tokens(&rust_type_for(&col.ty));
            if !col.ty.not_null {
                ty = quote! { Option<#ty> };
            }
            quote! { pub #name: #ty }
        })
        .collect();

    quote! {
        #[derive(Debug)]
        pub struct #ident {
            #(#fields),*
        }
    }
}

fn queries_struct(models: &BTreeMap<String, Model>, queries: &[Query]) -> TokenStream {
    let methods: Vec<TokenStream> = queries
        .iter()
        .map(|q| query_method(models, q))
        .collect();

    quote! {
        pub struct Queries<'a> {
            client: &'a tokio_postgres::Client,
        }

        impl<'a> Queries<'a> {
            pub fn new(client: &'a tokio_postgres::Client) -> Self {
                Self { client }
            }

            #(#methods)*
        }
    }
}

fn query_method(models: &BTreeMap<String, Model>, query: &Query) -> TokenStream {
    let fn_name = format_ident!("{}", sanitize_field_name(&to_snake_case(&query.name)));
    let sql = &query.sql;

    let input_arg = query.input.as_ref().map(|input| {
        let model = format_ident!("{}", model_type_name(models, &input.model));
        quote! { , input: &#model }
    });

    let binds: Vec<TokenStream> = query
        .input
        .iter()
        .flat_map(|input| input.params.iter())
        .map(param_binding)
        .collect();

    match &query.output {
        Some(output) => {
            let row = format_ident!("{}Row", to_pascal_case(&query.name));
            let getters: Vec<TokenStream> = output
                .table
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| {
                    let field = format_ident!("{}", sanitize_field_name(&col.name));
                    let idx = syn::Index::from(idx);
                    quote! { #field: row.get(#idx) }
                })
                .collect();

            quote! {
                pub async fn #fn_name(&self #input_arg) -> Result<Vec<#row>, tokio_postgres::Error> {
                    let rows = self.client.query(#sql, &[#(#binds),*]).await?;
                    Ok(rows
                        .iter()
                        .map(|row| #row { #(#getters),* })
                        .collect())
                }
            }
        }
        None => quote! {
            pub async fn #fn_name(&self #input_arg) -> Result<u64, tokio_postgres::Error> {
                self.client.execute(#sql, &[#(#binds),*]).await
            }
        },
    }
}

/// The expression bound for one `$N` placeholder. Parameters that were
/// inferred to carry a record shape are serialized to a json value; plain
/// parameters bind the referenced input field directly.
fn param_binding(param: &QueryParam) -> TokenStream {
    let path: Vec<_> = param
        .reference
        .split('.')
        .map(|segment| format_ident!("{}", sanitize_field_name(&to_snake_case(segment))))
        .collect();

    let is_record = param
        .ty
        .as_ref()
        .map(|ty| ty.record.is_some())
        .unwrap_or(false);

    if is_record {
        quote! {
            &serde_json::to_value(&input.#(#path).*)
                .expect("failed to serialize query input")
        }
    } else {
        quote! { &input.#(#path).* }
    }
}

/// `package.Name` directives refer to models loaded from config; fall back
/// to the bare name when the model wasn't loaded (the reconciler will have
/// reported that already).
fn model_type_name(models: &BTreeMap<String, Model>, qualified: &str) -> String {
    match models.get(qualified) {
        Some(model) => to_pascal_case(&model.name),
        None => to_pascal_case(qualified.rsplit('.').next().unwrap_or(qualified)),
    }
}

fn rust_type_to_tokens(ty: &RustType) -> TokenStream {
    match ty {
        RustType::I16 => quote! { i16 },
        RustType::I32 => quote! { i32 },
        RustType::I64 => quote! { i64 },
        RustType::F32 => quote! { f32 },
        RustType::F64 => quote! { f64 },
        RustType::Decimal => quote! { rust_decimal::Decimal },
        RustType::String => quote! { String },
        RustType::VecU8 => quote! { Vec<u8> },
        RustType::Bool => quote! { bool },
        RustType::DateTime => quote! { chrono::DateTime<chrono::Utc> },
        RustType::Date => quote! { chrono::NaiveDate },
        RustType::Time => quote! { chrono::NaiveTime },
        RustType::Duration => quote! { chrono::Duration },
        RustType::Uuid => quote! { uuid::Uuid },
        RustType::JsonValue => quote! { serde_json::Value },
        RustType::Vec(inner) => {
            let inner = rust_type_to_tokens(inner);
            quote! { Vec<#inner> }
        }
        RustType::Option(inner) => {
            let inner = rust_type_to_tokens(inner);
            quote! { Option<#inner> }
        }
        RustType::Custom(name) => {
            let ident = format_ident!("{name}");
            quote! { #ident }
        }
    }
}

/// Sanitize a column name to be a valid Rust identifier.
fn sanitize_field_name(name: &str) -> String {
    let name = name.replace(|c: char| !c.is_alphanumeric() && c != '_', "_");

    match name.as_str() {
        "type" => "r#type".to_string(),
        "match" => "r#match".to_string(),
        "ref" => "r#ref".to_string(),
        "loop" => "r#loop".to_string(),
        _ => {
            if name.chars().next().map(|c| c.is_numeric()).unwrap_or(false) {
                format!("_{name}")
            } else {
                name
            }
        }
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_pascal_case(name: &str) -> String {
    name.split(['_', '.', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
