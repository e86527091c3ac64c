//! SQL statements and parameter binding.
//!
//! Supported forms (keywords are case-insensitive):
//!
//! ```text
//! SELECT (* | col, ...) FROM table [WHERE cond]
//! UPDATE table SET col = expr, ... [WHERE cond]
//! INSERT [INTO] table (col, ...) VALUES (expr, ...), ...
//! DELETE [FROM] table [WHERE cond]
//!
//! cond    := pred [AND pred]*
//! pred    := col op operand | col IS [NOT] NULL
//! expr    := operand | PENDING_COMMIT_TIMESTAMP()
//! operand := @name | 'text' | integer | TRUE | FALSE | NULL
//! ```

mod binder;
mod lexer;
mod parser;

pub use binder::{
    bind, BoundDelete, BoundInsert, BoundSelect, BoundStatement, BoundUpdate, Filter,
};

use commitdb_codec::{Schema, Value};
use std::collections::BTreeMap;

use crate::error::CoreResult;

/// SQL text plus named parameter values.
///
/// Parameter names are given without the leading `@` and are matched
/// case-insensitively when exact lookup fails. Parameters the text does
/// not reference are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: BTreeMap<String, Value>,
}

impl Statement {
    /// Creates a statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter, builder style.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Sets a parameter, replacing any previous value.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        self.params.insert(name, value.into());
    }

    /// Returns the SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Looks up a parameter value.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).or_else(|| {
            self.params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// Returns all parameters.
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Binds this statement against `schema`. See [`bind`].
    ///
    /// # Errors
    ///
    /// See [`bind`].
    pub fn bind(&self, schema: &Schema) -> CoreResult<BoundStatement> {
        bind(self, schema)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
