//! The simulated database catalog: tables, columns and data types.
//!
//! The catalog is built by the DDL interpreter and cloned by the analyzer for
//! every query, so synthetic tables introduced by CTEs and subqueries never
//! leak between queries.

use crate::types::{DATA_TYPE_JSON, DATA_TYPE_JSONB};
use std::collections::HashMap;
use std::fmt;

/// An ordered collection of tables with a constant-time lookup by
/// qualified name. Order matters: synthetic tables added at the front
/// shadow earlier tables of the same name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Vec<Table>,
    index: HashMap<TableName, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a table. A table with the same name shadows the previous one
    /// in the lookup index.
    pub fn add_table(&mut self, table: Table) {
        let name = table.name.clone().expect("catalog tables must be named");
        self.tables.push(table);
        self.index.insert(name, self.tables.len() - 1);
    }

    /// Prepend a table so it shadows everything already present.
    pub fn add_table_to_front(&mut self, table: Table) {
        let name = table.name.clone().expect("catalog tables must be named");
        self.tables.insert(0, table);
        self.reindex();
        self.index.insert(name, 0);
    }

    pub fn remove_table(&mut self, name: &TableName) {
        self.tables.retain(|t| t.name.as_ref() != Some(name));
        self.reindex();
    }

    pub fn rename_table(&mut self, name: &TableName, new_name: TableName) {
        if let Some(&idx) = self.index.get(name) {
            self.tables[idx].name = Some(new_name);
            self.reindex();
        }
    }

    pub fn get(&self, name: &TableName) -> Option<&Table> {
        self.index.get(name).map(|&idx| &self.tables[idx])
    }

    pub fn get_mut(&mut self, name: &TableName) -> Option<&mut Table> {
        self.index.get(name).map(|&idx| &mut self.tables[idx])
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (idx, t) in self.tables.iter().enumerate() {
            if let Some(name) = &t.name {
                // Later tables win, except that a front-inserted table is
                // re-registered by its caller afterwards.
                self.index.insert(name.clone(), idx);
            }
        }
    }
}

/// A qualified table name. An empty schema means the default schema or
/// "not applicable"; it is a plain value so the name can be used as a map key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TableName {
    pub name: String,
    pub schema: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName {
            name: name.into(),
            schema: String::new(),
        }
    }

    pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
        TableName {
            name: name.into(),
            schema: schema.into(),
        }
    }

    pub fn has_schema(&self) -> bool {
        !self.schema.is_empty()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_schema() {
            write!(f, "{}.{}", self.schema, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// A database table, or any ordered set of named, typed values such as a
/// query's selection list. Selection sets have no name.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: Option<TableName>,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: TableName) -> Self {
        Table {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// Append a column, preserving insertion order. A column with the same
    /// name shadows the previous one in the lookup index.
    pub fn add_column(&mut self, column: Column) {
        self.column_index
            .insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
    }

    pub fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c.name != name);
        self.reindex();
    }

    pub fn rename_column(&mut self, name: &str, new_name: &str) {
        if let Some(&idx) = self.column_index.get(name) {
            self.columns[idx].name = new_name.to_string();
            self.reindex();
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index.get(name).map(|&idx| &self.columns[idx])
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.column_index
            .get(name)
            .map(|&idx| &mut self.columns[idx])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    /// The columns in SQL projection order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn reindex(&mut self) {
        self.column_index.clear();
        for (idx, c) in self.columns.iter().enumerate() {
            self.column_index.insert(c.name.clone(), idx);
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize, omit_name: bool) -> fmt::Result {
        if let (Some(name), false) = (&self.name, omit_name) {
            write!(f, "{name} ")?;
        }

        writeln!(f, "(")?;
        for (i, c) in self.columns.iter().enumerate() {
            write!(f, "{:width$}", "", width = (indent + 1) * 4)?;
            c.ty.write_indented(f, indent + 1, Some(&c.name))?;
            if i != self.columns.len() - 1 {
                write!(f, ",")?;
            }
            writeln!(f)?;
        }
        write!(f, "{:width$})", "", width = indent * 4)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0, false)
    }
}

/// A table column or any named property that has a type, such as a selection.
#[derive(Debug, Clone, Default)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Column {
            name: name.into(),
            ty,
        }
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)
    }
}

/// A postgres data type as the analyzer sees it.
#[derive(Debug, Clone, Default)]
pub struct DataType {
    /// Lowercase base type name (`int4`, `text`, `jsonb`, ...).
    pub name: String,
    /// Optional schema qualifier for user-defined types.
    pub schema: Option<String>,
    pub not_null: bool,
    /// True for a postgres array of the base type, as in `INT[]`.
    pub array: bool,
    /// The nested record shape of a `record`, `json` or `jsonb` value.
    pub record: Option<Box<Table>>,
    /// Distinguishes a json array of records from a single record.
    /// Only meaningful when `record` is set.
    pub record_is_array: bool,
}

impl DataType {
    pub fn named(name: impl Into<String>) -> Self {
        DataType {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_json(&self) -> bool {
        self.name == DATA_TYPE_JSON || self.name == DATA_TYPE_JSONB
    }

    fn write_indented(
        &self,
        f: &mut fmt::Formatter<'_>,
        indent: usize,
        column_name: Option<&str>,
    ) -> fmt::Result {
        if let Some(name) = column_name {
            write!(f, "{name} ")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        write!(f, "{}", self.name)?;
        if self.array {
            write!(f, "[]")?;
        }
        if self.not_null {
            write!(f, " not null")?;
        }
        if let Some(record) = &self.record {
            write!(f, " ")?;
            record.write_indented(f, indent, true)?;
        }
        Ok(())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Table {
        let mut t = Table::named(TableName::new("person"));
        let mut id = DataType::named("text");
        id.not_null = true;
        t.add_column(Column::new("id", id));
        t.add_column(Column::new("last_name", DataType::named("text")));
        t
    }

    #[test]
    fn test_column_order_survives_clone() {
        let mut t = person();
        t.add_column(Column::new("age", DataType::named("int4")));

        let clone = t.clone();
        let names: Vec<&str> = clone.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "last_name", "age"]);
        assert!(clone.column("age").is_some());
    }

    #[test]
    fn test_catalog_clone_is_isolated() {
        let mut catalog = Catalog::new();
        catalog.add_table(person());

        let mut clone = catalog.clone();
        let mut synthetic = Table::named(TableName::new("cte"));
        synthetic.add_column(Column::new("n", DataType::named("int8")));
        clone.add_table_to_front(synthetic);
        clone
            .get_mut(&TableName::new("person"))
            .unwrap()
            .remove_column("last_name");

        assert!(catalog.get(&TableName::new("cte")).is_none());
        assert!(catalog
            .get(&TableName::new("person"))
            .unwrap()
            .has_column("last_name"));
    }

    #[test]
    fn test_front_insertion_shadows() {
        let mut catalog = Catalog::new();
        catalog.add_table(person());

        let mut shadow = Table::named(TableName::new("person"));
        shadow.add_column(Column::new("only", DataType::named("int4")));
        catalog.add_table_to_front(shadow);

        let resolved = catalog.get(&TableName::new("person")).unwrap();
        assert_eq!(resolved.columns().len(), 1);
        assert_eq!(resolved.columns()[0].name, "only");
    }

    #[test]
    fn test_rename_and_remove() {
        let mut catalog = Catalog::new();
        catalog.add_table(person());

        catalog.rename_table(&TableName::new("person"), TableName::new("people"));
        assert!(catalog.get(&TableName::new("person")).is_none());

        let people = catalog.get_mut(&TableName::new("people")).unwrap();
        people.rename_column("last_name", "surname");
        assert!(people.has_column("surname"));
        assert!(!people.has_column("last_name"));

        catalog.remove_table(&TableName::new("people"));
        assert!(catalog.get(&TableName::new("people")).is_none());
    }

    #[test]
    fn test_display_rendering() {
        let t = person();
        let rendered = t.to_string();
        assert!(rendered.starts_with("person ("));
        assert!(rendered.contains("id text not null,"));
        assert!(rendered.contains("last_name text"));
    }
}
