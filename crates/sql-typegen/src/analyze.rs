//! The SQL analyzer: walks a parsed statement against a catalog snapshot and
//! produces the typed result-set table.
//!
//! Analysis operates on a clone of the catalog so synthetic tables derived
//! from CTEs, subqueries and range functions never leak out. Scope is an
//! ordered stack of joined tables; every subquery level clones the context
//! and bumps the depth of the tables already in scope, which keeps outer
//! tables visible for correlated references while excluding them from
//! unqualified `*` expansion.

use crate::catalog::{Catalog, Column, DataType, Table, TableName};
use crate::error::{Error, Result};
use crate::migrate::table_name;
use crate::query::QueryParam;
use crate::types::{data_type_from_ast, DATA_TYPE_JSON, DATA_TYPE_JSONB, DATA_TYPE_RECORD};
use sqlparser::ast::{
    CaseWhen, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectName, Query,
    Select, SelectItem, SelectItemQualifiedWildcardKind, SetExpr, Spanned, Statement, TableAlias,
    TableFactor, TableFunctionArgs, TableObject, TableWithJoins, UpdateTableFromKind, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Analyze a single rewritten SQL statement. Returns the result-set table
/// (empty for statements without a `RETURNING` clause) and fills in
/// parameter types discovered at `json_to_record[set]` call sites.
pub(crate) fn analyze(
    catalog: &Catalog,
    sql: &str,
    params: &mut Vec<QueryParam>,
) -> Result<Table> {
    let dialect = PostgreSqlDialect {};
    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| Error::Parse(e.to_string()))?;

    if statements.len() > 1 {
        return Err(Error::analysis("only one SQL query per file is supported"));
    }

    let statement = statements
        .first()
        .ok_or_else(|| Error::analysis("expected a SQL statement"))?;

    let ctx = ParseContext {
        catalog: catalog.clone(),
        joined: Vec::new(),
    };

    parse_stmt(&ctx, params, statement)
}

/// The analysis scope: a catalog snapshot plus the stack of joined tables.
#[derive(Debug, Clone)]
struct ParseContext {
    catalog: Catalog,
    joined: Vec<JoinedTable>,
}

/// One in-scope table. `depth` is 0 for tables introduced at the current
/// subquery level and grows as scopes nest.
#[derive(Debug, Clone)]
struct JoinedTable {
    table: TableName,
    alias: TableName,
    depth: u32,
}

impl ParseContext {
    fn clone_for_subquery(&self) -> Self {
        ParseContext {
            catalog: self.catalog.clone(),
            joined: self
                .joined
                .iter()
                .map(|jt| JoinedTable {
                    table: jt.table.clone(),
                    alias: jt.alias.clone(),
                    depth: jt.depth + 1,
                })
                .collect(),
        }
    }

    /// Bring a table into scope. New tables are prepended so the most
    /// recently introduced table wins name resolution.
    fn push_joined(&mut self, table: TableName, alias: TableName) {
        self.joined.insert(
            0,
            JoinedTable {
                table,
                alias,
                depth: 0,
            },
        );
    }
}

/// A resolved projection item: either a single named column or a whole
/// table of columns from a star expansion.
enum Selection {
    Column(Column),
    Table(Table),
}

impl Selection {
    fn add_to(self, table: &mut Table) {
        match self {
            Selection::Column(col) => table.add_column(col),
            Selection::Table(t) => {
                for col in t.columns() {
                    table.add_column(col.clone());
                }
            }
        }
    }
}

fn parse_stmt(ctx: &ParseContext, params: &mut Vec<QueryParam>, stmt: &Statement) -> Result<Table> {
    match stmt {
        Statement::Query(query) => parse_query_stmt(ctx, params, query),
        Statement::Insert(insert) => parse_insert(ctx.clone_for_subquery(), params, insert),
        Statement::Update {
            table,
            from,
            returning,
            ..
        } => parse_update(ctx.clone_for_subquery(), params, table, from, returning),
        Statement::Delete(delete) => parse_delete(ctx.clone_for_subquery(), params, delete),
        other => Err(Error::analysis(format!(
            "unhandled statement type \"{}\"",
            statement_kind(other)
        ))),
    }
}

fn parse_query_stmt(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    query: &Query,
) -> Result<Table> {
    let mut ctx = ctx.clone_for_subquery();

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let mut table = parse_query_stmt(&ctx, params, &cte.query)?;
            table.name = Some(TableName::new(cte.alias.name.value.clone()));
            ctx.catalog.add_table(table);
        }
    }

    match query.body.as_ref() {
        SetExpr::Select(select) => parse_select(&mut ctx, params, select),
        SetExpr::Insert(Statement::Insert(insert)) => parse_insert(ctx, params, insert),
        SetExpr::Update(Statement::Update {
            table,
            from,
            returning,
            ..
        }) => parse_update(ctx, params, table, from, returning),
        SetExpr::Delete(Statement::Delete(delete)) => parse_delete(ctx, params, delete),
        other => Err(Error::analysis(format!(
            "unhandled query body \"{}\"",
            node_kind(other)
        ))),
    }
}

fn parse_select(
    ctx: &mut ParseContext,
    params: &mut Vec<QueryParam>,
    select: &Select,
) -> Result<Table> {
    for twj in &select.from {
        add_tables_from_join(ctx, params, twj)?;
    }

    parse_target_list(ctx, params, &select.projection)
}

fn parse_insert(
    mut ctx: ParseContext,
    params: &mut Vec<QueryParam>,
    insert: &sqlparser::ast::Insert,
) -> Result<Table> {
    let relation = match &insert.table {
        TableObject::TableName(name) => name,
        other => {
            return Err(Error::analysis(format!(
                "unhandled insert target \"{}\"",
                node_kind(other)
            )))
        }
    };
    add_range_var(&mut ctx, relation, &None)?;

    // An `INSERT ... SELECT` brings the select's FROM tables into scope.
    if let Some(source) = &insert.source {
        if let SetExpr::Select(select) = source.body.as_ref() {
            for twj in &select.from {
                add_tables_from_join(&mut ctx, params, &twj)?;
            }
        }
    }

    parse_returning(&ctx, params, insert.returning.as_deref())
}

fn parse_update(
    mut ctx: ParseContext,
    params: &mut Vec<QueryParam>,
    table: &TableWithJoins,
    from: &Option<UpdateTableFromKind>,
    returning: &Option<Vec<SelectItem>>,
) -> Result<Table> {
    add_tables_from_join(&mut ctx, params, table)?;

    match from {
        Some(UpdateTableFromKind::BeforeSet(tables))
        | Some(UpdateTableFromKind::AfterSet(tables)) => {
            for twj in tables {
                add_tables_from_join(&mut ctx, params, twj)?;
            }
        }
        None => {}
    }

    parse_returning(&ctx, params, returning.as_deref())
}

fn parse_delete(
    mut ctx: ParseContext,
    params: &mut Vec<QueryParam>,
    delete: &sqlparser::ast::Delete,
) -> Result<Table> {
    let from = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    for twj in from {
        add_tables_from_join(&mut ctx, params, twj)?;
    }

    if let Some(using) = &delete.using {
        for twj in using {
            add_tables_from_join(&mut ctx, params, twj)?;
        }
    }

    parse_returning(&ctx, params, delete.returning.as_deref())
}

fn parse_returning(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    returning: Option<&[SelectItem]>,
) -> Result<Table> {
    match returning {
        Some(items) => parse_target_list(ctx, params, items),
        None => Ok(Table::new()),
    }
}

fn add_tables_from_join(
    ctx: &mut ParseContext,
    params: &mut Vec<QueryParam>,
    twj: &TableWithJoins,
) -> Result<()> {
    add_table_factor(ctx, params, &twj.relation)?;

    for join in &twj.joins {
        add_table_factor(ctx, params, &join.relation)?;
    }

    Ok(())
}

fn add_table_factor(
    ctx: &mut ParseContext,
    params: &mut Vec<QueryParam>,
    factor: &TableFactor,
) -> Result<()> {
    match factor {
        TableFactor::Table {
            name,
            alias,
            args: Some(args),
            ..
        } => add_table_from_function(ctx, params, name, args, alias),
        TableFactor::Table { name, alias, .. } => add_range_var(ctx, name, alias),
        TableFactor::Derived {
            subquery, alias, ..
        } => add_table_from_subselect(ctx, params, subquery, alias),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => add_tables_from_join(ctx, params, table_with_joins),
        other => Err(Error::analysis(format!(
            "failed to add tables from a \"{}\" clause",
            node_kind(other)
        ))),
    }
}

fn add_range_var(
    ctx: &mut ParseContext,
    name: &ObjectName,
    alias: &Option<TableAlias>,
) -> Result<()> {
    let name = table_name(name)?;
    if ctx.catalog.get(&name).is_none() {
        return Err(Error::analysis(format!("could not find table \"{name}\"")));
    }

    let alias = match alias {
        Some(a) => TableName::new(a.name.value.clone()),
        None => name.clone(),
    };

    ctx.push_joined(name, alias);
    Ok(())
}

fn add_table_from_subselect(
    ctx: &mut ParseContext,
    params: &mut Vec<QueryParam>,
    subquery: &Query,
    alias: &Option<TableAlias>,
) -> Result<()> {
    if let SetExpr::Select(select) = subquery.body.as_ref() {
        if select.projection.is_empty() {
            return Err(Error::analysis("failed to add table for a subselect"));
        }
    }

    let alias = alias
        .as_ref()
        .ok_or_else(|| Error::analysis("subquery must have an alias"))?;

    let mut table = parse_query_stmt(ctx, params, subquery)?;
    let name = TableName::new(alias.name.value.clone());
    table.name = Some(name.clone());

    ctx.catalog.add_table_to_front(table);
    ctx.push_joined(name.clone(), name);
    Ok(())
}

/// The only range functions accepted are `{json,jsonb}_to_record{,set}`,
/// which require an alias and a column-definition list. When the argument
/// is a parameter whose type isn't known yet, the synthetic record is
/// back-propagated into the parameter list.
fn add_table_from_function(
    ctx: &mut ParseContext,
    params: &mut [QueryParam],
    name: &ObjectName,
    args: &TableFunctionArgs,
    alias: &Option<TableAlias>,
) -> Result<()> {
    let func_name = table_name(name)?.name.to_lowercase();

    let record_is_array = match func_name.as_str() {
        "json_to_record" | "jsonb_to_record" => false,
        "json_to_recordset" | "jsonb_to_recordset" => true,
        _ => return Err(Error::analysis("unsupported range function")),
    };

    let alias = alias
        .as_ref()
        .ok_or_else(|| Error::analysis("range function didn't have an alias"))?;
    if alias.columns.is_empty() {
        return Err(Error::analysis(
            "range function didn't have column definitions",
        ));
    }

    let mut table = Table::named(TableName::new(alias.name.value.clone()));
    for coldef in &alias.columns {
        let data_type = coldef.data_type.as_ref().ok_or_else(|| {
            Error::analysis(format!(
                "range function column \"{}\" needs a type",
                coldef.name.value
            ))
        })?;
        table.add_column(Column::new(
            coldef.name.value.clone(),
            data_type_from_ast(data_type),
        ));
    }

    if let [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] = args.args.as_slice() {
        if let Some(index) = placeholder_index(arg) {
            if let Some(param) = params.iter_mut().find(|p| p.placeholder_index == index) {
                if param.ty.is_none() {
                    let mut ty = DataType::named(if func_name.starts_with("jsonb") {
                        DATA_TYPE_JSONB
                    } else {
                        DATA_TYPE_JSON
                    });
                    ty.not_null = true;
                    ty.record_is_array = record_is_array;
                    ty.record = Some(Box::new(table.clone()));
                    param.ty = Some(ty);
                }
            }
        }
    }

    let name = TableName::new(alias.name.value.clone());
    ctx.catalog.add_table_to_front(table);
    ctx.push_joined(name.clone(), name);
    Ok(())
}

fn placeholder_index(expr: &Expr) -> Option<usize> {
    if let Expr::Value(ValueWithSpan {
        value: Value::Placeholder(placeholder),
        ..
    }) = expr
    {
        placeholder.strip_prefix('$').and_then(|n| n.parse().ok())
    } else {
        None
    }
}

fn parse_target_list(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    items: &[SelectItem],
) -> Result<Table> {
    let mut table = Table::new();

    for item in items {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                parse_selection(ctx, params, expr, None)?.add_to(&mut table);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                parse_selection(ctx, params, expr, Some(&alias.value))?.add_to(&mut table);
            }
            SelectItem::Wildcard(_) => {
                expand_star(ctx)?.add_to(&mut table);
            }
            SelectItem::QualifiedWildcard(kind, _) => {
                expand_qualified_star(ctx, kind)?.add_to(&mut table);
            }
        }
    }

    Ok(table)
}

/// Unqualified `*`: concatenate the columns of every depth-0 table in FROM
/// order, de-duplicated by name with the first occurrence winning.
fn expand_star(ctx: &ParseContext) -> Result<Selection> {
    let mut out = Table::new();

    for jt in ctx.joined.iter().rev() {
        if jt.depth != 0 {
            continue;
        }

        let Some(table) = ctx.catalog.get(&jt.table) else {
            continue;
        };
        for col in table.columns() {
            if !out.has_column(&col.name) {
                out.add_column(col.clone());
            }
        }
    }

    if out.columns().is_empty() {
        return Err(Error::analysis("unknown column \"*\""));
    }

    Ok(Selection::Table(out))
}

/// Qualified `t.*`: the referenced table's columns, cloned.
fn expand_qualified_star(
    ctx: &ParseContext,
    kind: &SelectItemQualifiedWildcardKind,
) -> Result<Selection> {
    let reference = match kind {
        SelectItemQualifiedWildcardKind::ObjectName(name) => table_name(name)?,
        SelectItemQualifiedWildcardKind::Expr(_) => {
            return Err(Error::analysis("unhandled star selection expression"));
        }
    };

    for jt in &ctx.joined {
        if jt.depth != 0 {
            continue;
        }
        if !alias_matches(&reference, &jt.alias) {
            continue;
        }

        let Some(table) = ctx.catalog.get(&jt.table) else {
            continue;
        };
        let mut out = Table::new();
        for col in table.columns() {
            out.add_column(col.clone());
        }
        return Ok(Selection::Table(out));
    }

    Err(Error::analysis(format!(
        "unknown column \"{reference}.*\""
    )))
}

/// A two-part reference only compares names; a schema-qualified reference
/// must match the alias exactly.
fn alias_matches(reference: &TableName, alias: &TableName) -> bool {
    if reference.has_schema() {
        reference == alias
    } else {
        reference.name == alias.name
    }
}

fn parse_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    expr: &Expr,
    alias: Option<&str>,
) -> Result<Selection> {
    let mut sel = parse_selection_expr(ctx, params, expr)?;

    if let (Selection::Column(col), Some(alias)) = (&mut sel, alias) {
        col.name = alias.to_string();
    }

    if let Selection::Column(col) = &sel {
        if !col.has_name() {
            return Err(Error::analysis("failed to determine name for a selection")
                .with_line(expr.span().start.line));
        }
    }

    Ok(sel)
}

fn parse_selection_expr(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    expr: &Expr,
) -> Result<Selection> {
    let result = match expr {
        Expr::Identifier(ident) => column_ref_selection(ctx, &[ident.value.clone()]),
        Expr::CompoundIdentifier(idents) => {
            let parts: Vec<String> = idents.iter().map(|i| i.value.clone()).collect();
            column_ref_selection(ctx, &parts)
        }
        Expr::Subquery(query) => subquery_selection(ctx, params, query),
        Expr::Cast {
            expr: inner,
            data_type,
            ..
        } => cast_selection(ctx, params, inner, data_type),
        Expr::Function(func) => function_selection(ctx, params, func),
        Expr::Case {
            conditions,
            else_result,
            ..
        } => case_selection(ctx, params, conditions, else_result.as_deref()),
        Expr::Value(value) => constant_selection(value),
        Expr::Nested(inner) => parse_selection_expr(ctx, params, inner),
        Expr::BinaryOp { .. } | Expr::UnaryOp { .. } => Err(Error::analysis(
            "expression selections need an explicit type cast",
        )),
        other => Err(Error::analysis(format!(
            "unhandled selection \"{}\"",
            node_kind(other)
        ))),
    };

    result.map_err(|e| e.with_line(expr.span().start.line))
}

fn column_ref_selection(ctx: &ParseContext, parts: &[String]) -> Result<Selection> {
    let (column, reference) = match parts {
        [column] => (column.clone(), None),
        [table, column] => (column.clone(), Some(TableName::new(table.clone()))),
        [schema, table, column] => (
            column.clone(),
            Some(TableName::with_schema(table.clone(), schema.clone())),
        ),
        _ => {
            return Err(Error::analysis(format!(
                "unexpected number of parts ({}) in a column reference",
                parts.len()
            )))
        }
    };

    // Scan front to back; the first match wins, which gives the most
    // recently introduced table priority.
    for jt in &ctx.joined {
        if let Some(reference) = &reference {
            if !alias_matches(reference, &jt.alias) {
                continue;
            }
        }

        let Some(table) = ctx.catalog.get(&jt.table) else {
            continue;
        };
        if let Some(col) = table.column(&column) {
            return Ok(Selection::Column(col.clone()));
        }
    }

    // A bare reference that names a whole table selects the row as a record.
    if reference.is_none() {
        if let Some(table) = resolve_table(ctx, &column) {
            let mut ty = DataType::named(DATA_TYPE_RECORD);
            ty.not_null = true;
            ty.record_is_array = true;
            ty.record = Some(Box::new(table.clone()));
            return Ok(Selection::Column(Column::new(column, ty)));
        }
    }

    match reference {
        Some(reference) => Err(Error::analysis(format!(
            "unknown column \"{reference}.{column}\""
        ))),
        None => Err(Error::analysis(format!("unknown column \"{column}\""))),
    }
}

fn resolve_table<'a>(ctx: &'a ParseContext, name: &str) -> Option<&'a Table> {
    for jt in &ctx.joined {
        if jt.alias.name == name {
            return ctx.catalog.get(&jt.table);
        }
    }

    ctx.catalog.get(&TableName::new(name))
}

fn subquery_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    query: &Query,
) -> Result<Selection> {
    let table = parse_query_stmt(ctx, params, query)?;

    if table.columns().len() != 1 {
        return Err(Error::analysis("subqueries must only select one column"));
    }

    Ok(Selection::Column(table.columns()[0].clone()))
}

fn cast_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    inner: &Expr,
    data_type: &sqlparser::ast::DataType,
) -> Result<Selection> {
    let cast = data_type_from_ast(data_type);

    // A plain expression or parameter carries no type of its own; the cast
    // is what retains it. The column stays unnamed until an alias applies.
    if expression_form(inner) {
        return Ok(Selection::Column(Column::new("", cast)));
    }

    match parse_selection_expr(ctx, params, inner)? {
        Selection::Column(mut col) => {
            col.ty.name = cast.name;
            col.ty.schema = cast.schema;
            col.ty.array = cast.array;
            Ok(Selection::Column(col))
        }
        Selection::Table(_) => Err(Error::analysis("can't cast a star selection")),
    }
}

fn expression_form(expr: &Expr) -> bool {
    match expr {
        Expr::Nested(inner) => expression_form(inner),
        Expr::BinaryOp { .. } | Expr::UnaryOp { .. } => true,
        Expr::Value(ValueWithSpan {
            value: Value::Placeholder(_),
            ..
        }) => true,
        _ => false,
    }
}

fn function_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    func: &sqlparser::ast::Function,
) -> Result<Selection> {
    let name = func
        .name
        .0
        .last()
        .and_then(|part| part.as_ident())
        .map(|i| i.value.to_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "json_agg" | "jsonb_agg" => json_selection(ctx, params, func, &name, true),
        "to_json" | "to_jsonb" => json_selection(ctx, params, func, &name, false),
        "json_build_object" | "jsonb_build_object" => {
            json_build_object_selection(ctx, params, func, &name)
        }
        "coalesce" => coalesce_selection(ctx, params, func),
        _ => Err(Error::analysis(format!(
            "failed to parse function \"{name}\" call selection"
        ))),
    }
}

fn function_args<'a>(func: &'a sqlparser::ast::Function, name: &str) -> Result<Vec<&'a Expr>> {
    let FunctionArguments::List(list) = &func.args else {
        return Err(Error::analysis(format!(
            "unsupported argument list for function \"{name}\""
        )));
    };

    list.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
            _ => Err(Error::analysis(format!(
                "unsupported argument for function \"{name}\""
            ))),
        })
        .collect()
}

/// `json_agg`/`jsonb_agg` (array of records) and `to_json`/`to_jsonb`
/// (single record). A table or record argument contributes its record
/// shape; a plain column stays opaque json.
fn json_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    func: &sqlparser::ast::Function,
    name: &str,
    record_is_array: bool,
) -> Result<Selection> {
    let args = function_args(func, name)?;
    if args.len() != 1 {
        return Err(Error::analysis(format!(
            "{name} expects one argument, got {}",
            args.len()
        )));
    }

    let arg = match parse_selection_expr(ctx, params, args[0])? {
        Selection::Column(col) => col,
        Selection::Table(_) => {
            return Err(Error::analysis(format!(
                "can't apply {name} to a star selection"
            )))
        }
    };

    let mut ty = DataType::named(if name.contains("jsonb") {
        DATA_TYPE_JSONB
    } else {
        DATA_TYPE_JSON
    });
    ty.record_is_array = record_is_array;
    ty.record = arg.ty.record;

    Ok(Selection::Column(Column::new(name, ty)))
}

fn json_build_object_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    func: &sqlparser::ast::Function,
    name: &str,
) -> Result<Selection> {
    let args = function_args(func, name)?;
    if args.len() % 2 != 0 {
        return Err(Error::analysis(format!(
            "{name} expects an even number of arguments, got {}",
            args.len()
        )));
    }

    let mut record = Table::new();
    for pair in args.chunks(2) {
        let key = match pair[0] {
            Expr::Value(ValueWithSpan {
                value: Value::SingleQuotedString(key),
                ..
            }) => key.clone(),
            _ => {
                return Err(Error::analysis(format!(
                    "{name} keys must be string constants"
                )))
            }
        };

        match parse_selection_expr(ctx, params, pair[1])? {
            Selection::Column(col) => record.add_column(Column::new(key, col.ty)),
            Selection::Table(_) => {
                return Err(Error::analysis(format!(
                    "{name} values must be single columns"
                )))
            }
        }
    }

    let mut ty = DataType::named(if name.starts_with("jsonb") {
        DATA_TYPE_JSONB
    } else {
        DATA_TYPE_JSON
    });
    ty.not_null = true;
    ty.record = Some(Box::new(record));

    Ok(Selection::Column(Column::new(name, ty)))
}

fn coalesce_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    func: &sqlparser::ast::Function,
) -> Result<Selection> {
    let args = function_args(func, "coalesce")?;

    let fallback_is_constant = matches!(
        args.as_slice(),
        [_, Expr::Value(ValueWithSpan { value, .. })] if !matches!(value, Value::Null)
    );
    if !fallback_is_constant {
        return Err(Error::analysis(
            "only coalesce expressions with two args (expression and a non-null constant) \
             are supported in selections",
        ));
    }

    let mut sel = parse_selection_expr(ctx, params, args[0])?;
    if let Selection::Column(col) = &mut sel {
        // Not strictly true when every argument is null, but good enough
        // for a non-null constant fallback.
        col.ty.not_null = true;
    }

    Ok(sel)
}

fn case_selection(
    ctx: &ParseContext,
    params: &mut Vec<QueryParam>,
    conditions: &[CaseWhen],
    else_result: Option<&Expr>,
) -> Result<Selection> {
    let mut arms: Vec<&Expr> = conditions.iter().map(|cw| &cw.result).collect();
    if let Some(else_result) = else_result {
        arms.push(else_result);
    }

    let first = arms
        .first()
        .ok_or_else(|| Error::analysis("case expression has no result arms"))?;

    let mut column = match parse_selection_expr(ctx, params, first)? {
        Selection::Column(col) => col,
        Selection::Table(_) => {
            return Err(Error::analysis("can't use a star selection in a case arm"))
        }
    };

    for arm in &arms[1..] {
        let arm = match parse_selection_expr(ctx, params, arm)? {
            Selection::Column(col) => col,
            Selection::Table(_) => {
                return Err(Error::analysis("can't use a star selection in a case arm"))
            }
        };

        if arm.ty.name != column.ty.name {
            return Err(Error::analysis(format!(
                "case arms must share a base type, got \"{}\" and \"{}\"",
                column.ty.name, arm.ty.name
            )));
        }
    }

    column.name = "case".to_string();
    Ok(Selection::Column(column))
}

fn constant_selection(value: &ValueWithSpan) -> Result<Selection> {
    let mut ty = DataType::default();
    ty.not_null = !matches!(value.value, Value::Null);

    ty.name = match &value.value {
        Value::Placeholder(_) => {
            return Err(Error::analysis(
                "parameter selections need an explicit type cast",
            ))
        }
        Value::SingleQuotedString(_) => "text".to_string(),
        Value::Boolean(_) => "bool".to_string(),
        Value::Number(number, _) => {
            if number.contains(['.', 'e', 'E']) {
                "float8".to_string()
            } else {
                "int8".to_string()
            }
        }
        _ => "text".to_string(),
    };

    Ok(Selection::Column(Column::new("", ty)))
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A short kind name for error messages, derived from the debug rendering
/// (the variant name is its first token).
fn node_kind<T: std::fmt::Debug>(node: &T) -> String {
    let debug = format!("{node:?}");
    debug
        .split(['(', '{', ' '])
        .next()
        .unwrap_or("expression")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;

    fn test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        migrate(
            &mut catalog,
            r#"
            CREATE TABLE person (
                id text PRIMARY KEY,
                first_name text NOT NULL,
                last_name text
            );

            CREATE TABLE pets (
                id text PRIMARY KEY,
                owner_id text NOT NULL,
                name text NOT NULL
            );
            "#,
        )
        .unwrap();
        catalog
    }

    fn analyze_ok(sql: &str) -> Table {
        let mut params = Vec::new();
        analyze(&test_catalog(), sql, &mut params).unwrap()
    }

    fn analyze_err(sql: &str) -> Error {
        let mut params = Vec::new();
        analyze(&test_catalog(), sql, &mut params).unwrap_err()
    }

    fn column_names(table: &Table) -> Vec<&str> {
        table.columns().iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_select_star() {
        let table = analyze_ok("SELECT * FROM person");
        assert_eq!(column_names(&table), vec!["id", "first_name", "last_name"]);
        assert!(table.column("id").unwrap().ty.not_null);
        assert!(!table.column("last_name").unwrap().ty.not_null);
    }

    #[test]
    fn test_star_expansion_order_and_dedup() {
        let mut catalog = Catalog::new();
        migrate(
            &mut catalog,
            "CREATE TABLE a (a int, b int); CREATE TABLE b (b text, c text);",
        )
        .unwrap();

        let mut params = Vec::new();
        let table = analyze(&catalog, "SELECT * FROM a JOIN b ON true", &mut params).unwrap();

        assert_eq!(column_names(&table), vec!["a", "b", "c"]);
        // The first `b` in FROM order wins.
        assert_eq!(table.column("b").unwrap().ty.name, "int4");
    }

    #[test]
    fn test_qualified_star() {
        let table = analyze_ok("SELECT p.* FROM person p JOIN pets ON true");
        assert_eq!(column_names(&table), vec!["id", "first_name", "last_name"]);
    }

    #[test]
    fn test_column_resolution_prefers_most_recent_table() {
        // Both tables have an `id`; pets was introduced last.
        let table = analyze_ok("SELECT id FROM person, pets");
        assert_eq!(column_names(&table), vec!["id"]);

        let table = analyze_ok("SELECT person.id FROM person, pets");
        assert_eq!(column_names(&table), vec!["id"]);
    }

    #[test]
    fn test_qualified_refs() {
        let table = analyze_ok("SELECT p.first_name FROM person p");
        assert_eq!(column_names(&table), vec!["first_name"]);

        let err = analyze_err("SELECT q.first_name FROM person p");
        assert!(err.to_string().contains("unknown column \"q.first_name\""));
    }

    #[test]
    fn test_alias_renames_selection() {
        let table = analyze_ok("SELECT first_name AS given FROM person");
        assert_eq!(column_names(&table), vec!["given"]);
    }

    #[test]
    fn test_unknown_column_is_decorated_with_line() {
        let err = analyze_err("SELECT\n  nope\nFROM person");
        let message = err.to_string();
        assert!(message.contains("unknown column \"nope\""), "{message}");
        assert!(message.contains("near line 2"), "{message}");
    }

    #[test]
    fn test_constants() {
        let table = analyze_ok("SELECT 1 AS n, 1.5 AS f, true AS b, 'x' AS s FROM person");
        assert_eq!(table.column("n").unwrap().ty.name, "int8");
        assert_eq!(table.column("f").unwrap().ty.name, "float8");
        assert_eq!(table.column("b").unwrap().ty.name, "bool");
        assert_eq!(table.column("s").unwrap().ty.name, "text");
        assert!(table.column("n").unwrap().ty.not_null);
    }

    #[test]
    fn test_unnamed_constant_is_an_error() {
        let err = analyze_err("SELECT 1 FROM person");
        assert!(err
            .to_string()
            .contains("failed to determine name for a selection"));
    }

    #[test]
    fn test_cast_replaces_type_name() {
        let table = analyze_ok("SELECT id::int FROM person");
        assert_eq!(table.column("id").unwrap().ty.name, "int4");
        assert!(table.column("id").unwrap().ty.not_null);
    }

    #[test]
    fn test_cast_retains_expressions() {
        let table = analyze_ok("SELECT (1 + 2)::int AS sum FROM person");
        let sum = table.column("sum").unwrap();
        assert_eq!(sum.ty.name, "int4");
        assert!(!sum.ty.not_null);
    }

    #[test]
    fn test_bare_expression_is_an_error() {
        let err = analyze_err("SELECT 1 + 2 AS sum FROM person");
        assert!(err
            .to_string()
            .contains("expression selections need an explicit type cast"));
    }

    #[test]
    fn test_coalesce() {
        let table = analyze_ok("SELECT coalesce(last_name, '') AS last_name FROM person");
        let col = table.column("last_name").unwrap();
        assert_eq!(col.ty.name, "text");
        assert!(col.ty.not_null);

        let err = analyze_err("SELECT coalesce(last_name, first_name) AS x FROM person");
        assert!(err.to_string().contains("coalesce"));
    }

    #[test]
    fn test_case_selection() {
        let table =
            analyze_ok("SELECT CASE WHEN true THEN first_name ELSE 'n/a' END FROM person");
        assert_eq!(column_names(&table), vec!["case"]);
        assert_eq!(table.column("case").unwrap().ty.name, "text");

        let err = analyze_err("SELECT CASE WHEN true THEN first_name ELSE 1 END FROM person");
        assert!(err.to_string().contains("case arms must share a base type"));
    }

    #[test]
    fn test_scalar_subquery() {
        let table = analyze_ok(
            "SELECT (SELECT name FROM pets WHERE pets.owner_id = person.id) AS pet_name \
             FROM person",
        );
        assert_eq!(column_names(&table), vec!["pet_name"]);
        assert_eq!(table.column("pet_name").unwrap().ty.name, "text");

        let err = analyze_err("SELECT (SELECT id, name FROM pets) AS x FROM person");
        assert!(err
            .to_string()
            .contains("subqueries must only select one column"));
    }

    #[test]
    fn test_subselect_in_from() {
        let table = analyze_ok(
            "SELECT sub.given FROM (SELECT first_name AS given FROM person) AS sub",
        );
        assert_eq!(column_names(&table), vec!["given"]);

        let err = analyze_err("SELECT x FROM (SELECT first_name FROM person)");
        assert!(err.to_string().contains("subquery must have an alias"));
    }

    #[test]
    fn test_cte() {
        let table = analyze_ok(
            "WITH names AS (SELECT first_name FROM person) SELECT first_name FROM names",
        );
        assert_eq!(column_names(&table), vec!["first_name"]);
    }

    #[test]
    fn test_cte_shadows_real_table() {
        let table = analyze_ok(
            "WITH person AS (SELECT id FROM pets) SELECT * FROM person",
        );
        assert_eq!(column_names(&table), vec!["id"]);
    }

    #[test]
    fn test_json_agg() {
        let table = analyze_ok("SELECT json_agg(pets) AS pets FROM pets");
        let col = table.column("pets").unwrap();
        assert_eq!(col.ty.name, "json");
        assert!(col.ty.record_is_array);

        let record = col.ty.record.as_ref().unwrap();
        let names: Vec<&str> = record.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "owner_id", "name"]);
    }

    #[test]
    fn test_jsonb_agg_over_alias() {
        let table = analyze_ok("SELECT jsonb_agg(p) AS pets FROM pets p");
        let col = table.column("pets").unwrap();
        assert_eq!(col.ty.name, "jsonb");
        assert!(col.ty.record.is_some());
    }

    #[test]
    fn test_json_agg_over_plain_column_is_opaque() {
        let table = analyze_ok("SELECT json_agg(name) AS names FROM pets");
        let col = table.column("names").unwrap();
        assert_eq!(col.ty.name, "json");
        assert!(col.ty.record.is_none());
    }

    #[test]
    fn test_to_json() {
        let table = analyze_ok("SELECT to_json(pets) AS pet FROM pets");
        let col = table.column("pet").unwrap();
        assert_eq!(col.ty.name, "json");
        assert!(!col.ty.record_is_array);
        assert!(col.ty.record.is_some());
    }

    #[test]
    fn test_json_build_object() {
        let table = analyze_ok(
            "SELECT json_build_object('id', id, 'fullName', first_name) AS person FROM person",
        );
        let col = table.column("person").unwrap();
        assert_eq!(col.ty.name, "json");

        let record = col.ty.record.as_ref().unwrap();
        let names: Vec<&str> = record.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "fullName"]);
        assert_eq!(record.column("id").unwrap().ty.name, "text");
    }

    #[test]
    fn test_json_build_object_odd_args() {
        let err = analyze_err("SELECT json_build_object('id', id, 'x') AS o FROM person");
        assert!(err.to_string().contains("even number of arguments"));
    }

    #[test]
    fn test_whole_table_selection() {
        let table = analyze_ok("SELECT pets FROM pets");
        let col = table.column("pets").unwrap();
        assert_eq!(col.ty.name, "record");
        assert!(col.ty.not_null);
        assert!(col.ty.record_is_array);
        assert!(col.ty.record.is_some());
    }

    #[test]
    fn test_insert_returning() {
        let table = analyze_ok(
            "INSERT INTO person (id, first_name) VALUES ($1, $2) RETURNING id, first_name",
        );
        assert_eq!(column_names(&table), vec!["id", "first_name"]);
        assert!(table.column("id").unwrap().ty.not_null);
    }

    #[test]
    fn test_insert_without_returning_has_no_columns() {
        let table = analyze_ok("INSERT INTO person (id, first_name) VALUES ($1, $2)");
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_update_returning() {
        let table = analyze_ok("UPDATE person SET first_name = $1 RETURNING id");
        assert_eq!(column_names(&table), vec!["id"]);
    }

    #[test]
    fn test_delete_using_returning() {
        let table = analyze_ok(
            "DELETE FROM pets USING person \
             WHERE pets.owner_id = person.id RETURNING pets.name, person.first_name",
        );
        assert_eq!(column_names(&table), vec!["name", "first_name"]);
    }

    #[test]
    fn test_unknown_table() {
        let err = analyze_err("SELECT * FROM missing");
        assert!(err.to_string().contains("could not find table \"missing\""));
    }

    #[test]
    fn test_unhandled_statement() {
        let err = analyze_err("TRUNCATE TABLE person");
        assert!(err.to_string().contains("unhandled statement type"));
    }

    #[test]
    fn test_multiple_statements() {
        let err = analyze_err("SELECT * FROM person; SELECT * FROM pets");
        assert!(err
            .to_string()
            .contains("only one SQL query per file is supported"));
    }

    #[test]
    fn test_recordset_back_propagation() {
        let mut params = vec![QueryParam {
            reference: "people".to_string(),
            placeholder_index: 1,
            ty: None,
        }];

        analyze(
            &test_catalog(),
            "SELECT r.x, r.y FROM jsonb_to_recordset($1) AS r (x int, y text)",
            &mut params,
        )
        .unwrap();

        let ty = params[0].ty.as_ref().unwrap();
        assert_eq!(ty.name, "jsonb");
        assert!(ty.not_null);
        assert!(ty.record_is_array);

        let record = ty.record.as_ref().unwrap();
        assert_eq!(record.columns().len(), 2);
        assert_eq!(record.column("x").unwrap().ty.name, "int4");
        assert_eq!(record.column("y").unwrap().ty.name, "text");
    }

    #[test]
    fn test_record_back_propagation_is_not_an_array() {
        let mut params = vec![QueryParam {
            reference: "p".to_string(),
            placeholder_index: 1,
            ty: None,
        }];

        analyze(
            &test_catalog(),
            "SELECT r.x FROM json_to_record($1) AS r (x int)",
            &mut params,
        )
        .unwrap();

        let ty = params[0].ty.as_ref().unwrap();
        assert_eq!(ty.name, "json");
        assert!(!ty.record_is_array);
    }

    #[test]
    fn test_back_propagation_keeps_existing_type() {
        let mut ty = DataType::named("jsonb");
        ty.not_null = true;
        let mut params = vec![QueryParam {
            reference: "p".to_string(),
            placeholder_index: 1,
            ty: Some(ty),
        }];

        analyze(
            &test_catalog(),
            "SELECT r.x FROM jsonb_to_recordset($1) AS r (x int)",
            &mut params,
        )
        .unwrap();

        assert!(params[0].ty.as_ref().unwrap().record.is_none());
    }

    #[test]
    fn test_unsupported_range_function() {
        let err = analyze_err("SELECT x FROM generate_series(1, 10) AS g (x int)");
        assert!(err.to_string().contains("unsupported range function"));
    }

    #[test]
    fn test_catalog_is_not_mutated_by_analysis() {
        let catalog = test_catalog();
        let mut params = Vec::new();
        analyze(
            &catalog,
            "WITH extra AS (SELECT id FROM person) SELECT * FROM extra",
            &mut params,
        )
        .unwrap();

        assert!(catalog.get(&TableName::new("extra")).is_none());
    }

    #[test]
    fn test_correlated_subquery_sees_outer_tables_but_star_does_not() {
        // The inner star only expands pets; person is at depth 1 inside the
        // subquery even though it remains referenceable.
        let table = analyze_ok(
            "SELECT (SELECT json_agg(pets) FROM pets WHERE pets.owner_id = person.id) AS pets, \
             first_name FROM person",
        );
        assert_eq!(column_names(&table), vec!["pets", "first_name"]);
    }
}
