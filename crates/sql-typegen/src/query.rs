//! Query files: the header directive, named-parameter rewriting and the
//! parsed query description handed to collaborators.

use crate::analyze::analyze;
use crate::catalog::{Catalog, DataType, Table};
use crate::error::{Error, Result};
use crate::types::DATA_TYPES;
use once_cell::sync::Lazy;
use regex::Regex;

/// A fully analyzed query file.
#[derive(Debug, Clone)]
pub struct Query {
    pub name: String,
    /// The SQL with named references rewritten to `$N` placeholders.
    pub sql: String,
    pub input: Option<QueryInput>,
    pub output: Option<QueryOutput>,
}

/// The typed-input side of a query, present when the header carries `:in`.
#[derive(Debug, Clone)]
pub struct QueryInput {
    /// Package-qualified model name, e.g. `api.NewPerson`.
    pub model: String,
    /// Parameters in order of first occurrence.
    pub params: Vec<QueryParam>,
}

/// One named input parameter.
#[derive(Debug, Clone)]
pub struct QueryParam {
    /// The reference as written in the SQL, e.g. `person.firstName`.
    pub reference: String,
    /// 1-based index of the `$N` placeholder the reference was rewritten to.
    pub placeholder_index: usize,
    /// The inferred type, when a cast or a `json_to_record[set]` call site
    /// revealed one.
    pub ty: Option<DataType>,
}

/// The typed-output side of a query, present when the header carries `:out`.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    /// Package-qualified model name, e.g. `api.Person`.
    pub model: String,
    /// The inferred result columns in projection order.
    pub table: Table,
}

#[derive(Debug, Default)]
struct Header {
    name: Option<String>,
    in_model: Option<String>,
    out_model: Option<String>,
}

/// Parse a query file against the catalog.
///
/// The catalog is cloned internally; analysis never mutates it.
pub fn parse_query(catalog: &Catalog, sql: &str) -> Result<Query> {
    let header = parse_header(sql)?;
    let name = header.name.ok_or(Error::MissingQueryName)?;

    let mut params = Vec::new();
    let sql = parametrize_inputs(sql, &mut params);

    if header.in_model.is_none() && !params.is_empty() {
        return Err(Error::analysis(format!(
            "query \"{name}\" uses input references but its header declares no :in model"
        )));
    }

    tracing::debug!(query = %name, params = params.len(), "analyzing query");
    let table = analyze(catalog, &sql, &mut params)?;

    Ok(Query {
        name,
        sql,
        input: header.in_model.map(|model| QueryInput { model, params }),
        output: header.out_model.map(|model| QueryOutput { model, table }),
    })
}

/// Read the `-- :name N [:in M] [:out M]` directive from the first header
/// line, if any.
fn parse_header(sql: &str) -> Result<Header> {
    let mut header = Header::default();

    for line in sql.lines() {
        let line = line.trim();
        if !line.starts_with("-- :name") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        for (field, value) in fields.iter().zip(fields.iter().skip(1)) {
            match *field {
                ":name" => header.name = Some((*value).to_string()),
                ":in" => header.in_model = Some((*value).to_string()),
                ":out" => header.out_model = Some((*value).to_string()),
                _ => {}
            }
        }

        break;
    }

    Ok(header)
}

/// Matches `:ref.path::TYPE[]` runs outside comments. The leading non-colon
/// character distinguishes references from `::` cast syntax; the cast type
/// alternation is restricted to the recognized type names, longest first so
/// multi-word names win.
static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    let mut names: Vec<&str> = DATA_TYPES.to_vec();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let types = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(
        r"[^:]:([\w]+(?:\.[\w]+)*)(::(?i:({types}))(\[\])?)?"
    ))
    .expect("parameter regex must compile")
});

/// Rewrite `:name[.path][::type[\[\]]]` references to postgres placeholders,
/// appending newly seen references to `params`. Casts fix a parameter's type
/// on first sight; later occurrences never overwrite it.
///
/// Casts are detected here rather than in the AST walk because finding every
/// reference would otherwise require a full traversal of the statement tree.
fn parametrize_inputs(sql: &str, params: &mut Vec<QueryParam>) -> String {
    let mut lines_out = Vec::new();

    for raw in sql.lines() {
        if raw.trim_start().starts_with("--") {
            lines_out.push(raw.to_string());
            continue;
        }

        let mut line = raw.to_string();
        let captures: Vec<_> = PARAM_REGEX.captures_iter(raw).collect();

        // First pass, in textual order: assign placeholder indexes and
        // capture cast types on first occurrence.
        for caps in &captures {
            let reference = caps.get(1).unwrap().as_str();
            let cast_type = caps.get(3).map(|m| m.as_str());
            let cast_is_array = caps.get(4).is_some();

            let index = match params.iter().position(|p| p.reference == reference) {
                Some(i) => i,
                None => {
                    params.push(QueryParam {
                        reference: reference.to_string(),
                        placeholder_index: params.len() + 1,
                        ty: None,
                    });
                    params.len() - 1
                }
            };

            if let (Some(cast_type), None) = (cast_type, &params[index].ty) {
                let mut ty = DataType::named(cast_type.to_lowercase());
                ty.array = cast_is_array;
                params[index].ty = Some(ty);
            }
        }

        // Second pass, right-to-left, so earlier match offsets stay valid
        // while the placeholders are substituted in.
        for caps in captures.iter().rev() {
            let whole = caps.get(0).unwrap();
            let reference = caps.get(1).unwrap().as_str();
            let cast = caps.get(2).map(|m| m.as_str());

            let param = params
                .iter()
                .find(|p| p.reference == reference)
                .expect("registered in the first pass");

            let mut replaced = line[..whole.start() + 1].to_string();
            replaced.push('$');
            replaced.push_str(&param.placeholder_index.to_string());
            if let Some(cast) = cast {
                replaced.push_str(cast);
            }
            replaced.push_str(&line[whole.end()..]);
            line = replaced;
        }

        lines_out.push(line);
    }

    lines_out.join("\n")
}
