//! Table and column definitions.
//!
//! Identifiers are matched ASCII case-insensitively, like SQL identifiers.
//! Lookups return the name as declared.

use crate::error::{CodecError, CodecResult};
use crate::value::ScalarType;
use std::collections::BTreeMap;
use std::fmt;

/// How a column stores values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// A required (NOT NULL) scalar.
    Scalar(ScalarType),
    /// A scalar that may be NULL.
    NullableScalar(ScalarType),
    /// A nullable timestamp column that may only be set to the commit
    /// timestamp of the writing transaction.
    CommitTimestamp,
}

impl ColumnKind {
    /// Returns the scalar type stored in the column.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ColumnKind::Scalar(ty) | ColumnKind::NullableScalar(ty) => *ty,
            ColumnKind::CommitTimestamp => ScalarType::Timestamp,
        }
    }

    /// Returns true if the column accepts NULL.
    pub fn is_nullable(&self) -> bool {
        !matches!(self, ColumnKind::Scalar(_))
    }

    /// Returns true for commit-timestamp columns.
    pub fn is_commit_timestamp(&self) -> bool {
        matches!(self, ColumnKind::CommitTimestamp)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Scalar(ty) => write!(f, "{ty} NOT NULL"),
            ColumnKind::NullableScalar(ty) => write!(f, "{ty}"),
            ColumnKind::CommitTimestamp => {
                f.write_str("TIMESTAMP OPTIONS (allow_commit_timestamp=true)")
            }
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    name: String,
    kind: ColumnKind,
}

impl ColumnSchema {
    /// Creates a column definition.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Returns the column name as declared.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column kind.
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }
}

/// A table definition with a single-column primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnSchema>,
    primary_key: String,
}

impl TableSchema {
    /// Starts building a table definition.
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    /// Returns the table name as declared.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the primary-key column name.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns the kind of a column, if it exists.
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        self.column(name).map(ColumnSchema::kind)
    }

    /// Returns all columns in declaration order.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Returns all column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Returns true if `name` is the primary-key column.
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.eq_ignore_ascii_case(name)
    }
}

/// Builder for [`TableSchema`].
#[derive(Debug)]
pub struct TableSchemaBuilder {
    name: String,
    columns: Vec<ColumnSchema>,
    primary_key: Option<String>,
}

impl TableSchemaBuilder {
    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnSchema::new(name, kind));
        self
    }

    /// Adds a NOT NULL column.
    #[must_use]
    pub fn required(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.column(name, ColumnKind::Scalar(ty))
    }

    /// Adds a nullable column.
    #[must_use]
    pub fn nullable(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.column(name, ColumnKind::NullableScalar(ty))
    }

    /// Adds a commit-timestamp column.
    #[must_use]
    pub fn commit_timestamp(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnKind::CommitTimestamp)
    }

    /// Declares the primary-key column.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Validates and builds the table definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the primary key is missing, undeclared,
    /// nullable or a commit-timestamp column, or if a column is declared twice.
    pub fn build(self) -> CodecResult<TableSchema> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(CodecError::invalid_schema(format!(
                    "column `{}` declared twice in table `{}`",
                    column.name, self.name
                )));
            }
        }

        let pk = self.primary_key.ok_or_else(|| {
            CodecError::invalid_schema(format!("table `{}` has no primary key", self.name))
        })?;
        let pk_column = self
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&pk))
            .ok_or_else(|| {
                CodecError::invalid_schema(format!(
                    "primary key `{pk}` is not a column of `{}`",
                    self.name
                ))
            })?;
        if !matches!(pk_column.kind, ColumnKind::Scalar(_)) {
            return Err(CodecError::invalid_schema(format!(
                "primary key `{pk}` must be a NOT NULL scalar column"
            )));
        }
        let primary_key = pk_column.name.clone();

        Ok(TableSchema {
            name: self.name,
            columns: self.columns,
            primary_key,
        })
    }
}

/// The set of tables known to a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Tables keyed by lower-cased name.
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, builder style.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if a table with the same name exists.
    pub fn with_table(mut self, table: TableSchema) -> CodecResult<Self> {
        self.add_table(table)?;
        Ok(self)
    }

    /// Adds a table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if a table with the same name exists.
    pub fn add_table(&mut self, table: TableSchema) -> CodecResult<()> {
        let key = table.name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(CodecError::invalid_schema(format!(
                "table `{}` declared twice",
                table.name
            )));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    /// Returns the kind of `table.column`, if both exist.
    pub fn column_kind(&self, table: &str, column: &str) -> Option<ColumnKind> {
        self.table(table)?.column_kind(column)
    }

    /// Iterates over all tables.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_table() -> TableSchema {
        TableSchema::builder("test")
            .required("id", ScalarType::String)
            .commit_timestamp("t1")
            .commit_timestamp("t2")
            .primary_key("id")
            .build()
            .unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = test_table();
        assert_eq!(table.column("ID").unwrap().name(), "id");
        assert_eq!(table.column_kind("T1"), Some(ColumnKind::CommitTimestamp));
        assert!(table.is_primary_key("Id"));
        assert!(table.column("t3").is_none());
    }

    #[test]
    fn schema_column_kind() {
        let schema = Schema::new().with_table(test_table()).unwrap();
        assert_eq!(
            schema.column_kind("TEST", "id"),
            Some(ColumnKind::Scalar(ScalarType::String))
        );
        assert_eq!(schema.column_kind("other", "id"), None);
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut schema = Schema::new();
        schema.add_table(test_table()).unwrap();
        assert!(matches!(
            schema.add_table(test_table()),
            Err(CodecError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn primary_key_must_be_required_scalar() {
        let result = TableSchema::builder("t")
            .commit_timestamp("ts")
            .primary_key("ts")
            .build();
        assert!(matches!(result, Err(CodecError::InvalidSchema { .. })));

        let result = TableSchema::builder("t")
            .nullable("id", ScalarType::String)
            .primary_key("id")
            .build();
        assert!(matches!(result, Err(CodecError::InvalidSchema { .. })));
    }

    #[test]
    fn missing_primary_key_rejected() {
        let result = TableSchema::builder("t")
            .required("id", ScalarType::Int64)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_column_rejected() {
        let result = TableSchema::builder("t")
            .required("id", ScalarType::Int64)
            .nullable("ID", ScalarType::String)
            .primary_key("id")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn commit_timestamp_kind() {
        let kind = ColumnKind::CommitTimestamp;
        assert!(kind.is_nullable());
        assert!(kind.is_commit_timestamp());
        assert_eq!(kind.scalar_type(), ScalarType::Timestamp);
        assert!(!ColumnKind::Scalar(ScalarType::Bool).is_nullable());
    }
}
