//! Resolves parsed statements against the schema and parameters.

use super::parser::{parse, Ast, CompareOp, Expr, Predicate};
use super::Statement;
use crate::error::{CoreError, CoreResult};
use commitdb_codec::{ColumnSchema, ColumnValue, Row, Schema, TableSchema, Value};
use std::cmp::Ordering;

/// A statement whose identifiers, parameters and types have been checked.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundStatement {
    /// A query.
    Select(BoundSelect),
    /// A predicate update.
    Update(BoundUpdate),
    /// A multi-row insert.
    Insert(BoundInsert),
    /// A predicate delete.
    Delete(BoundDelete),
}

impl BoundStatement {
    /// Returns the declared name of the target table.
    pub fn table(&self) -> &str {
        match self {
            BoundStatement::Select(s) => &s.table,
            BoundStatement::Update(u) => &u.table,
            BoundStatement::Insert(i) => &i.table,
            BoundStatement::Delete(d) => &d.table,
        }
    }

    /// Returns true for SELECT.
    pub fn is_query(&self) -> bool {
        matches!(self, BoundStatement::Select(_))
    }
}

/// A bound `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSelect {
    /// Target table.
    pub table: String,
    /// Projected columns, in output order.
    pub columns: Vec<String>,
    /// Row filter.
    pub filter: Filter,
}

/// A bound `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundUpdate {
    /// Target table.
    pub table: String,
    /// Column assignments; commit-timestamp columns hold NULL or the
    /// pending marker.
    pub assignments: Vec<(String, ColumnValue)>,
    /// Row filter.
    pub filter: Filter,
}

/// A bound `INSERT`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundInsert {
    /// Target table.
    pub table: String,
    /// Rows to insert, each carrying the primary key.
    pub rows: Vec<Row<ColumnValue>>,
}

/// A bound `DELETE`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundDelete {
    /// Target table.
    pub table: String,
    /// Row filter.
    pub filter: Filter,
}

/// A conjunction of column predicates. An empty filter matches every row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    predicates: Vec<BoundPredicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum BoundPredicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

impl Filter {
    /// A filter matching rows whose `column` equals `value`.
    pub fn equals(column: impl Into<String>, value: Value) -> Self {
        Self {
            predicates: vec![BoundPredicate::Compare {
                column: column.into(),
                op: CompareOp::Eq,
                value,
            }],
        }
    }

    /// Returns true if `row` satisfies every predicate.
    ///
    /// Comparisons involving NULL never match, as in SQL.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| match p {
            BoundPredicate::IsNull { column, negated } => {
                let is_null = row.get(column).map_or(true, Value::is_null);
                is_null != *negated
            }
            BoundPredicate::Compare { column, op, value } => {
                let Some(left) = row.get(column) else {
                    return false;
                };
                if left.is_null() || value.is_null() {
                    return false;
                }
                let ord = left.cmp(value);
                match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::NotEq => ord != Ordering::Equal,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                }
            }
        })
    }

    /// Returns the columns the filter reads.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|p| match p {
            BoundPredicate::Compare { column, .. } | BoundPredicate::IsNull { column, .. } => {
                column.as_str()
            }
        })
    }

    /// Returns true if the filter has no predicates.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Binds `statement` against `schema`.
///
/// Binding is pure: the same statement and schema always produce the same
/// result.
///
/// # Errors
///
/// - `Syntax` if the text does not parse
/// - `UnboundParameter` if an `@name` has no value
/// - `Schema` for undeclared tables or columns, or a misplaced
///   `PENDING_COMMIT_TIMESTAMP()`
/// - `SchemaMismatch` for type or nullability violations
/// - `InvalidCommitTimestampLiteral` if a non-null concrete value is
///   assigned to a commit-timestamp column
pub fn bind(statement: &Statement, schema: &Schema) -> CoreResult<BoundStatement> {
    let ast = parse(statement.sql())?;
    let binder = Binder { statement, schema };
    match ast {
        Ast::Select {
            columns,
            table,
            filter,
        } => binder.bind_select(columns, &table, &filter),
        Ast::Update {
            table,
            assignments,
            filter,
        } => binder.bind_update(&table, &assignments, &filter),
        Ast::Insert {
            table,
            columns,
            rows,
        } => binder.bind_insert(&table, &columns, &rows),
        Ast::Delete { table, filter } => {
            let table = binder.table(&table)?;
            Ok(BoundStatement::Delete(BoundDelete {
                table: table.name().to_string(),
                filter: binder.bind_filter(table, &filter)?,
            }))
        }
    }
}

struct Binder<'a> {
    statement: &'a Statement,
    schema: &'a Schema,
}

impl<'a> Binder<'a> {
    fn table(&self, name: &str) -> CoreResult<&'a TableSchema> {
        self.schema
            .table(name)
            .ok_or_else(|| CoreError::schema(format!("table not found: {name}")))
    }

    fn column(table: &'a TableSchema, name: &str) -> CoreResult<&'a ColumnSchema> {
        table.column(name).ok_or_else(|| {
            CoreError::schema(format!(
                "column `{name}` not found in table `{}`",
                table.name()
            ))
        })
    }

    fn operand(&self, expr: &Expr) -> CoreResult<Option<Value>> {
        match expr {
            Expr::Param(name) => self
                .statement
                .param(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| CoreError::unbound_parameter(name.as_str())),
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::PendingCommitTimestamp => Ok(None),
        }
    }

    /// Binds a value written into `column` by SET or VALUES.
    fn assigned(&self, column: &ColumnSchema, expr: &Expr) -> CoreResult<ColumnValue> {
        let kind = column.kind();
        let Some(value) = self.operand(expr)? else {
            return if kind.is_commit_timestamp() {
                Ok(ColumnValue::PendingCommitTimestamp)
            } else {
                Err(CoreError::schema(format!(
                    "PENDING_COMMIT_TIMESTAMP() assigned to `{}`, which is not a commit timestamp column",
                    column.name()
                )))
            };
        };

        if kind.is_commit_timestamp() {
            if value.is_null() {
                return Ok(ColumnValue::Concrete(Value::Null));
            }
            return Err(CoreError::invalid_commit_timestamp_literal(column.name()));
        }
        check_type(column, &value)?;
        Ok(ColumnValue::Concrete(value))
    }

    fn bind_filter(&self, table: &'a TableSchema, predicates: &[Predicate]) -> CoreResult<Filter> {
        let mut bound = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            bound.push(match predicate {
                Predicate::IsNull { column, negated } => BoundPredicate::IsNull {
                    column: Self::column(table, column)?.name().to_string(),
                    negated: *negated,
                },
                Predicate::Compare {
                    column,
                    op,
                    operand,
                } => {
                    let column = Self::column(table, column)?;
                    let value = self.operand(operand)?.ok_or_else(|| {
                        CoreError::schema(
                            "PENDING_COMMIT_TIMESTAMP() is only allowed in SET or VALUES",
                        )
                    })?;
                    if !value.is_null() && !value.is_compatible_with(column.kind().scalar_type()) {
                        return Err(CoreError::schema_mismatch(format!(
                            "cannot compare column `{}` ({}) with {value}",
                            column.name(),
                            column.kind().scalar_type()
                        )));
                    }
                    BoundPredicate::Compare {
                        column: column.name().to_string(),
                        op: *op,
                        value,
                    }
                }
            });
        }
        Ok(Filter { predicates: bound })
    }

    fn bind_select(
        &self,
        columns: Option<Vec<String>>,
        table: &str,
        filter: &[Predicate],
    ) -> CoreResult<BoundStatement> {
        let table = self.table(table)?;
        let columns = match columns {
            None => table.column_names(),
            Some(names) => names
                .iter()
                .map(|name| Self::column(table, name).map(|c| c.name().to_string()))
                .collect::<CoreResult<_>>()?,
        };
        Ok(BoundStatement::Select(BoundSelect {
            table: table.name().to_string(),
            columns,
            filter: self.bind_filter(table, filter)?,
        }))
    }

    fn bind_update(
        &self,
        table: &str,
        assignments: &[(String, Expr)],
        filter: &[Predicate],
    ) -> CoreResult<BoundStatement> {
        let table = self.table(table)?;
        let mut bound: Vec<(String, ColumnValue)> = Vec::with_capacity(assignments.len());
        for (name, expr) in assignments {
            let column = Self::column(table, name)?;
            if table.is_primary_key(column.name()) {
                return Err(CoreError::schema(format!(
                    "primary key column `{}` cannot be updated",
                    column.name()
                )));
            }
            if bound.iter().any(|(c, _)| c == column.name()) {
                return Err(CoreError::schema(format!(
                    "column `{}` assigned more than once",
                    column.name()
                )));
            }
            bound.push((column.name().to_string(), self.assigned(column, expr)?));
        }
        Ok(BoundStatement::Update(BoundUpdate {
            table: table.name().to_string(),
            assignments: bound,
            filter: self.bind_filter(table, filter)?,
        }))
    }

    fn bind_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Expr>],
    ) -> CoreResult<BoundStatement> {
        let table = self.table(table)?;
        let mut targets: Vec<&ColumnSchema> = Vec::with_capacity(columns.len());
        for name in columns {
            let column = Self::column(table, name)?;
            if targets.iter().any(|c| c.name() == column.name()) {
                return Err(CoreError::schema(format!(
                    "column `{}` listed more than once",
                    column.name()
                )));
            }
            targets.push(column);
        }
        if let Some(missing) = table
            .columns()
            .iter()
            .find(|c| !c.kind().is_nullable() && !targets.iter().any(|t| t.name() == c.name()))
        {
            return Err(CoreError::schema_mismatch(format!(
                "column `{}` is NOT NULL and has no value",
                missing.name()
            )));
        }

        let mut bound = Vec::with_capacity(rows.len());
        for exprs in rows {
            let mut row = Row::with_capacity(targets.len());
            for (column, expr) in targets.iter().zip(exprs) {
                row.set(column.name(), self.assigned(column, expr)?);
            }
            bound.push(row);
        }
        Ok(BoundStatement::Insert(BoundInsert {
            table: table.name().to_string(),
            rows: bound,
        }))
    }
}

fn check_type(column: &ColumnSchema, value: &Value) -> CoreResult<()> {
    let kind = column.kind();
    if value.is_null() {
        if kind.is_nullable() {
            return Ok(());
        }
        return Err(CoreError::schema_mismatch(format!(
            "column `{}` is NOT NULL",
            column.name()
        )));
    }
    if value.is_compatible_with(kind.scalar_type()) {
        Ok(())
    } else {
        Err(CoreError::schema_mismatch(format!(
            "column `{}` expects {}, got {value}",
            column.name(),
            kind.scalar_type()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitdb_codec::{ScalarType, Timestamp};

    fn schema() -> Schema {
        Schema::new()
            .with_table(
                TableSchema::builder("test")
                    .required("id", ScalarType::String)
                    .nullable("n", ScalarType::Int64)
                    .commit_timestamp("t1")
                    .commit_timestamp("t2")
                    .primary_key("id")
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn select_star_expands_columns() {
        let stmt = Statement::new("SELECT * FROM TEST WHERE ID = @ID").with_param("ID", "x");
        let BoundStatement::Select(select) = bind(&stmt, &schema()).unwrap() else {
            panic!("expected select");
        };
        assert_eq!(select.table, "test");
        assert_eq!(select.columns, vec!["id", "n", "t1", "t2"]);
        assert!(select.filter.matches(&Row::new().with("id", "x")));
        assert!(!select.filter.matches(&Row::new().with("id", "y")));
    }

    #[test]
    fn pending_commit_timestamp_update() {
        let stmt = Statement::new(
            "UPDATE test SET t1=PENDING_COMMIT_TIMESTAMP(), t2=PENDING_COMMIT_TIMESTAMP() WHERE id = @id",
        )
        .with_param("id", "x");
        let BoundStatement::Update(update) = bind(&stmt, &schema()).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(
            update.assignments,
            vec![
                ("t1".to_string(), ColumnValue::PendingCommitTimestamp),
                ("t2".to_string(), ColumnValue::PendingCommitTimestamp),
            ]
        );
    }

    #[test]
    fn concrete_commit_timestamp_rejected() {
        let stmt = Statement::new("UPDATE test SET t1=@t1, t2=@t2 WHERE id = @id")
            .with_param("id", "x")
            .with_param("t1", Timestamp::from_unix_nanos(5))
            .with_param("t2", Timestamp::from_unix_nanos(5));
        assert_eq!(
            bind(&stmt, &schema()),
            Err(CoreError::invalid_commit_timestamp_literal("t1"))
        );

        // Regardless of the value's type.
        let stmt = Statement::new("INSERT test (id, t2) VALUES ('x', 'yesterday')");
        assert_eq!(
            bind(&stmt, &schema()),
            Err(CoreError::invalid_commit_timestamp_literal("t2"))
        );
    }

    #[test]
    fn null_into_commit_timestamp_is_allowed() {
        let stmt = Statement::new("UPDATE test SET t1 = @t WHERE id = 'x'").with_param("t", Value::Null);
        assert!(bind(&stmt, &schema()).is_ok());
    }

    #[test]
    fn pending_commit_timestamp_misplaced() {
        let stmt = Statement::new("UPDATE test SET n = PENDING_COMMIT_TIMESTAMP() WHERE id = 'x'");
        assert!(matches!(bind(&stmt, &schema()), Err(CoreError::Schema { .. })));

        let stmt = Statement::new("SELECT * FROM test WHERE t1 = PENDING_COMMIT_TIMESTAMP()");
        assert!(matches!(bind(&stmt, &schema()), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn unbound_parameter() {
        let stmt = Statement::new("SELECT * FROM test WHERE id = @ID");
        assert_eq!(
            bind(&stmt, &schema()),
            Err(CoreError::unbound_parameter("ID"))
        );
    }

    #[test]
    fn extra_parameters_are_ignored() {
        let stmt = Statement::new("DELETE FROM test")
            .with_param("unused", 1i64);
        assert!(bind(&stmt, &schema()).is_ok());
    }

    #[test]
    fn unknown_identifiers() {
        for sql in [
            "SELECT * FROM nope",
            "SELECT missing FROM test",
            "UPDATE test SET missing = 1",
            "DELETE FROM test WHERE missing = 1",
        ] {
            assert!(
                matches!(bind(&Statement::new(sql), &schema()), Err(CoreError::Schema { .. })),
                "{sql}"
            );
        }
    }

    #[test]
    fn type_mismatches() {
        for sql in [
            "UPDATE test SET n = 'three' WHERE id = 'x'",
            "SELECT * FROM test WHERE n = 'three'",
            "INSERT test (id) VALUES (1)",
            "INSERT test (n) VALUES (1)",
            "INSERT test (id, n) VALUES (NULL, 1)",
        ] {
            assert!(
                matches!(
                    bind(&Statement::new(sql), &schema()),
                    Err(CoreError::SchemaMismatch { .. })
                ),
                "{sql}"
            );
        }
    }

    #[test]
    fn primary_key_is_immutable() {
        let stmt = Statement::new("UPDATE test SET id = 'y' WHERE id = 'x'");
        assert!(matches!(bind(&stmt, &schema()), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn insert_rows_carry_values() {
        let stmt = Statement::new(
            "INSERT INTO test (id, t1) VALUES ('a', PENDING_COMMIT_TIMESTAMP()), (@b, NULL)",
        )
        .with_param("b", "b");
        let BoundStatement::Insert(insert) = bind(&stmt, &schema()).unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(insert.rows.len(), 2);
        assert!(insert.rows[0].has_pending());
        assert_eq!(
            insert.rows[1].get("id"),
            Some(&ColumnValue::Concrete(Value::from("b")))
        );
    }

    #[test]
    fn null_comparisons_never_match() {
        let stmt = Statement::new("SELECT * FROM test WHERE n = NULL");
        let BoundStatement::Select(select) = bind(&stmt, &schema()).unwrap() else {
            panic!("expected select");
        };
        assert!(!select.filter.matches(&Row::new().with("n", Value::Null)));

        let stmt = Statement::new("SELECT * FROM test WHERE n IS NULL AND id != 'z'");
        let BoundStatement::Select(select) = bind(&stmt, &schema()).unwrap() else {
            panic!("expected select");
        };
        assert!(select
            .filter
            .matches(&Row::new().with("id", "a").with("n", Value::Null)));
    }

    #[test]
    fn binding_is_idempotent() {
        let stmt = Statement::new("UPDATE test SET n = @n, t1 = PENDING_COMMIT_TIMESTAMP() WHERE id = @id")
            .with_param("n", 1i64)
            .with_param("id", "x");
        assert_eq!(bind(&stmt, &schema()), bind(&stmt, &schema()));
    }
}
