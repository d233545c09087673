//! The DDL interpreter: builds the catalog from migration files.
//!
//! Migrations are applied in the order given. Statements that don't shape
//! tables (DML, extension calls, index maintenance) are skipped silently,
//! since migration files routinely contain them.

use crate::catalog::{Catalog, Column, Table, TableName};
use crate::error::{Error, Result};
use crate::types::data_type_from_ast;
use sqlparser::ast::{
    AlterColumnOperation, AlterTableOperation, ColumnDef, ColumnOption, CreateTable, ObjectName,
    ObjectType, Statement,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

const DOWN_MIGRATION_MARKER: &str = "-- +goose Down";

/// Apply a migration file's statements to the catalog.
///
/// Everything from the first `-- +goose Down` line onwards is ignored so
/// that files written for the goose migration tool can be consumed without
/// interpreting rollbacks.
pub fn migrate(catalog: &mut Catalog, sql: &str) -> Result<()> {
    let up = omit_down_migration(sql);

    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, &up).map_err(|e| Error::Parse(e.to_string()))?;

    for statement in statements {
        match statement {
            Statement::CreateTable(create) => create_table(catalog, &create)?,
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                ..
            } => drop_tables(catalog, &names)?,
            Statement::AlterTable {
                name, operations, ..
            } => alter_table(catalog, &name, &operations)?,
            other => {
                tracing::debug!(statement = %statement_kind(&other), "skipping migration statement");
            }
        }
    }

    Ok(())
}

fn create_table(catalog: &mut Catalog, create: &CreateTable) -> Result<()> {
    let name = table_name(&create.name)?;

    let mut table = Table::named(name);
    for def in &create.columns {
        table.add_column(column_from_def(def)?);
    }

    if let Some(like) = &create.like {
        let like_table = match like {
            sqlparser::ast::CreateTableLikeKind::Parenthesized(t)
            | sqlparser::ast::CreateTableLikeKind::Plain(t) => t,
        };
        let like_name = table_name(&like_table.name)?;
        let source = catalog.get(&like_name).ok_or_else(|| {
            Error::schema(format!(
                "tried to create a table using like clause with unknown table \"{like_name}\""
            ))
        })?;

        for column in source.columns().to_vec() {
            table.add_column(column);
        }
    }

    // Table-level PRIMARY KEY constraints imply NOT NULL on their columns.
    for constraint in &create.constraints {
        if let sqlparser::ast::TableConstraint::PrimaryKey { columns, .. } = constraint {
            for pk_col in columns {
                if let sqlparser::ast::Expr::Identifier(ident) = &pk_col.column.expr {
                    if let Some(col) = table.column_mut(&ident.value) {
                        col.ty.not_null = true;
                    }
                }
            }
        }
    }

    catalog.add_table(table);
    Ok(())
}

fn column_from_def(def: &ColumnDef) -> Result<Column> {
    let mut ty = data_type_from_ast(&def.data_type);
    ty.not_null = is_not_null(def);

    Ok(Column::new(def.name.value.clone(), ty))
}

fn is_not_null(def: &ColumnDef) -> bool {
    def.options.iter().any(|opt| {
        matches!(
            opt.option,
            ColumnOption::NotNull | ColumnOption::Unique { is_primary: true, .. }
        )
    })
}

fn drop_tables(catalog: &mut Catalog, names: &[ObjectName]) -> Result<()> {
    for name in names {
        let name = table_name(name)?;
        if catalog.get(&name).is_none() {
            return Err(Error::schema(format!("unknown table \"{name}\"")));
        }

        catalog.remove_table(&name);
    }

    Ok(())
}

fn alter_table(
    catalog: &mut Catalog,
    name: &ObjectName,
    operations: &[AlterTableOperation],
) -> Result<()> {
    // Tracked across operations since a RENAME TO changes the lookup key.
    let mut name = table_name(name)?;
    if catalog.get(&name).is_none() {
        return Err(Error::schema(format!("table \"{name}\" hasn't been created")));
    }

    for op in operations {
        match op {
            AlterTableOperation::AddColumn { column_def, .. } => {
                let column = column_from_def(column_def)?;
                lookup_table(catalog, &name)?.add_column(column);
            }
            AlterTableOperation::DropColumn { column_names, .. } => {
                for column_name in column_names {
                    remove_column(catalog, &name, &column_name.value)?;
                }
            }
            AlterTableOperation::AlterColumn { column_name, op } => {
                alter_column(catalog, &name, &column_name.value, op)?;
            }
            AlterTableOperation::RenameColumn {
                old_column_name,
                new_column_name,
            } => {
                let table = lookup_table(catalog, &name)?;
                if !table.has_column(&old_column_name.value) {
                    return Err(Error::schema(format!(
                        "unknown column \"{}\" in table \"{name}\"",
                        old_column_name.value
                    )));
                }
                table.rename_column(&old_column_name.value, &new_column_name.value);
            }
            AlterTableOperation::RenameTable { table_name: new } => {
                let new_object_name = match new {
                    sqlparser::ast::RenameTableNameKind::As(n)
                    | sqlparser::ast::RenameTableNameKind::To(n) => n,
                };
                let new_name = table_name(new_object_name)?;
                catalog.rename_table(&name, new_name.clone());
                name = new_name;
            }
            _ => {
                tracing::debug!(table = %name, "skipping unsupported alter table operation");
            }
        }
    }

    Ok(())
}

fn lookup_table<'a>(catalog: &'a mut Catalog, name: &TableName) -> Result<&'a mut Table> {
    catalog
        .get_mut(name)
        .ok_or_else(|| Error::schema(format!("unknown table \"{name}\"")))
}

fn remove_column(catalog: &mut Catalog, table: &TableName, column: &str) -> Result<()> {
    let t = lookup_table(catalog, table)?;
    if !t.has_column(column) {
        return Err(Error::schema(format!(
            "could not find column \"{column}\" in table \"{table}\""
        )));
    }

    t.remove_column(column);
    Ok(())
}

fn alter_column(
    catalog: &mut Catalog,
    table: &TableName,
    column: &str,
    op: &AlterColumnOperation,
) -> Result<()> {
    let t = lookup_table(catalog, table)?;
    let col = t.column_mut(column).ok_or_else(|| {
        Error::schema(format!(
            "could not find column \"{column}\" in table \"{table}\""
        ))
    })?;

    match op {
        AlterColumnOperation::SetNotNull => col.ty.not_null = true,
        AlterColumnOperation::DropNotNull => col.ty.not_null = false,
        AlterColumnOperation::SetDataType { data_type, .. } => {
            let new = data_type_from_ast(data_type);
            col.ty.name = new.name;
            col.ty.schema = new.schema;
            col.ty.array = new.array;
        }
        _ => {
            tracing::debug!(table = %table, column, "skipping unsupported alter column operation");
        }
    }

    Ok(())
}

/// Resolve a possibly schema-qualified object name into a [`TableName`].
pub(crate) fn table_name(name: &ObjectName) -> Result<TableName> {
    let parts: Vec<String> = name
        .0
        .iter()
        .filter_map(|p| p.as_ident().map(|i| i.value.clone()))
        .collect();

    match parts.as_slice() {
        [name] if !name.is_empty() => Ok(TableName::new(name.clone())),
        [schema, name] if !name.is_empty() => {
            Ok(TableName::with_schema(name.clone(), schema.clone()))
        }
        _ => Err(Error::schema("empty table name")),
    }
}

fn omit_down_migration(sql: &str) -> String {
    sql.lines()
        .take_while(|line| !line.starts_with(DOWN_MIGRATION_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(migrations: &[&str]) -> Catalog {
        let mut catalog = Catalog::new();
        for m in migrations {
            migrate(&mut catalog, m).unwrap();
        }
        catalog
    }

    #[test]
    fn test_create_table() {
        let catalog = apply(&[r#"
            CREATE TABLE person (
                id text PRIMARY KEY,
                first_name text NOT NULL,
                last_name text
            );
        "#]);

        let person = catalog.get(&TableName::new("person")).unwrap();
        let names: Vec<&str> = person.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "first_name", "last_name"]);

        assert!(person.column("id").unwrap().ty.not_null);
        assert!(person.column("first_name").unwrap().ty.not_null);
        assert!(!person.column("last_name").unwrap().ty.not_null);
    }

    #[test]
    fn test_create_table_with_schema_and_arrays() {
        let catalog = apply(&["CREATE TABLE app.tag (id uuid NOT NULL, labels text[]);"]);

        let tag = catalog
            .get(&TableName::with_schema("tag", "app"))
            .unwrap();
        let labels = tag.column("labels").unwrap();
        assert_eq!(labels.ty.name, "text");
        assert!(labels.ty.array);
    }

    #[test]
    fn test_alter_table_add_drop_and_type() {
        let catalog = apply(&[
            "CREATE TABLE person (id text PRIMARY KEY, last_name text);",
            "ALTER TABLE person DROP COLUMN last_name;",
            "ALTER TABLE person ADD COLUMN age int;",
            "ALTER TABLE person ALTER COLUMN age TYPE bigint;",
        ]);

        let person = catalog.get(&TableName::new("person")).unwrap();
        assert!(!person.has_column("last_name"));
        assert_eq!(person.column("age").unwrap().ty.name, "int8");
    }

    #[test]
    fn test_alter_not_null() {
        let catalog = apply(&[
            "CREATE TABLE person (id text PRIMARY KEY, email text);",
            "ALTER TABLE person ALTER COLUMN email SET NOT NULL;",
        ]);
        assert!(catalog
            .get(&TableName::new("person"))
            .unwrap()
            .column("email")
            .unwrap()
            .ty
            .not_null);

        let catalog = apply(&[
            "CREATE TABLE person (id text PRIMARY KEY, email text NOT NULL);",
            "ALTER TABLE person ALTER COLUMN email DROP NOT NULL;",
        ]);
        assert!(!catalog
            .get(&TableName::new("person"))
            .unwrap()
            .column("email")
            .unwrap()
            .ty
            .not_null);
    }

    #[test]
    fn test_renames() {
        let catalog = apply(&[
            "CREATE TABLE person (id text PRIMARY KEY, last_name text);",
            "ALTER TABLE person RENAME COLUMN last_name TO surname;",
            "ALTER TABLE person RENAME TO people;",
        ]);

        assert!(catalog.get(&TableName::new("person")).is_none());
        let people = catalog.get(&TableName::new("people")).unwrap();
        assert!(people.has_column("surname"));
    }

    #[test]
    fn test_drop_table() {
        let catalog = apply(&[
            "CREATE TABLE person (id text PRIMARY KEY);",
            "DROP TABLE person;",
        ]);
        assert!(catalog.get(&TableName::new("person")).is_none());
    }

    #[test]
    fn test_unknown_table_errors() {
        let mut catalog = Catalog::new();

        let err = migrate(&mut catalog, "DROP TABLE missing;").unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "got {err}");

        let err = migrate(&mut catalog, "ALTER TABLE missing ADD COLUMN x int;").unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "got {err}");
    }

    #[test]
    fn test_unknown_column_errors() {
        let mut catalog = Catalog::new();
        migrate(&mut catalog, "CREATE TABLE person (id text PRIMARY KEY);").unwrap();

        let err = migrate(&mut catalog, "ALTER TABLE person DROP COLUMN ghost;").unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "got {err}");
    }

    #[test]
    fn test_unrelated_statements_are_skipped() {
        let catalog = apply(&[r#"
            CREATE TABLE person (id text PRIMARY KEY);
            CREATE INDEX person_id_idx ON person (id);
            INSERT INTO person (id) VALUES ('bootstrap');
        "#]);

        assert!(catalog.get(&TableName::new("person")).is_some());
    }

    #[test]
    fn test_down_migration_is_ignored() {
        let catalog = apply(&[
            "-- +goose Up\nCREATE TABLE person (id text PRIMARY KEY);\n-- +goose Down\nDROP TABLE person;",
        ]);

        assert!(catalog.get(&TableName::new("person")).is_some());
    }

    #[test]
    fn test_migration_order_independence_for_unrelated_tables() {
        let a = [
            "CREATE TABLE a (id int PRIMARY KEY);",
            "CREATE TABLE b (id int PRIMARY KEY);",
            "ALTER TABLE a ADD COLUMN x text;",
            "ALTER TABLE b ADD COLUMN y text;",
        ];
        let b = [a[1], a[0], a[3], a[2]];

        let left = apply(&a);
        let right = apply(&b);

        for name in ["a", "b"] {
            let lt = left.get(&TableName::new(name)).unwrap();
            let rt = right.get(&TableName::new(name)).unwrap();
            assert_eq!(lt.to_string(), rt.to_string());
        }
    }
}
