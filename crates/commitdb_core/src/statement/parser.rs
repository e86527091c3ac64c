//! Recursive-descent parser for the supported statement forms.

use super::lexer::{tokenize, Token};
use crate::error::{CoreError, CoreResult};
use commitdb_codec::Value;

const PENDING_COMMIT_TIMESTAMP_FN: &str = "PENDING_COMMIT_TIMESTAMP";

/// A value position in a statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Param(String),
    Literal(Value),
    PendingCommitTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        operand: Expr,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ast {
    Select {
        /// `None` for `*`.
        columns: Option<Vec<String>>,
        table: String,
        filter: Vec<Predicate>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Vec<Predicate>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Expr>>,
    },
    Delete {
        table: String,
        filter: Vec<Predicate>,
    },
}

pub(crate) fn parse(sql: &str) -> CoreResult<Ast> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_statement()?;
    if parser.current() == &Token::Semicolon {
        parser.advance();
    }
    if parser.current() != &Token::Eof {
        return Err(CoreError::syntax(format!(
            "unexpected {} after statement",
            parser.current().describe()
        )));
    }
    Ok(ast)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // The token stream always ends with `Eof` and `advance` never moves past it.
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> CoreResult<()> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(CoreError::syntax(format!(
                "expected {}, got {}",
                expected.describe(),
                self.current().describe()
            )))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.current() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> CoreResult<String> {
        match self.advance() {
            Token::Identifier(name) => Ok(name),
            other => Err(CoreError::syntax(format!(
                "expected identifier, got {}",
                other.describe()
            ))),
        }
    }

    fn parse_statement(&mut self) -> CoreResult<Ast> {
        match self.current() {
            Token::Select => self.parse_select(),
            Token::Update => self.parse_update(),
            Token::Insert => self.parse_insert(),
            Token::Delete => self.parse_delete(),
            other => Err(CoreError::syntax(format!(
                "expected SELECT, UPDATE, INSERT or DELETE, got {}",
                other.describe()
            ))),
        }
    }

    fn parse_select(&mut self) -> CoreResult<Ast> {
        self.expect(&Token::Select)?;
        let columns = if self.eat(&Token::Star) {
            None
        } else {
            let mut columns = vec![self.identifier()?];
            while self.eat(&Token::Comma) {
                columns.push(self.identifier()?);
            }
            Some(columns)
        };
        self.expect(&Token::From)?;
        let table = self.identifier()?;
        let filter = self.parse_where()?;
        Ok(Ast::Select {
            columns,
            table,
            filter,
        })
    }

    fn parse_update(&mut self) -> CoreResult<Ast> {
        self.expect(&Token::Update)?;
        let table = self.identifier()?;
        self.expect(&Token::Set)?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect(&Token::Eq)?;
            assignments.push((column, self.parse_expr()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Ast::Update {
            table,
            assignments,
            filter,
        })
    }

    fn parse_insert(&mut self) -> CoreResult<Ast> {
        self.expect(&Token::Insert)?;
        self.eat(&Token::Into);
        let table = self.identifier()?;

        self.expect(&Token::LParen)?;
        let mut columns = vec![self.identifier()?];
        while self.eat(&Token::Comma) {
            columns.push(self.identifier()?);
        }
        self.expect(&Token::RParen)?;

        self.expect(&Token::Values)?;
        let mut rows = Vec::new();
        loop {
            self.expect(&Token::LParen)?;
            let mut row = vec![self.parse_expr()?];
            while self.eat(&Token::Comma) {
                row.push(self.parse_expr()?);
            }
            self.expect(&Token::RParen)?;
            if row.len() != columns.len() {
                return Err(CoreError::syntax(format!(
                    "INSERT lists {} columns but a row has {} values",
                    columns.len(),
                    row.len()
                )));
            }
            rows.push(row);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Ast::Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_delete(&mut self) -> CoreResult<Ast> {
        self.expect(&Token::Delete)?;
        self.eat(&Token::From);
        let table = self.identifier()?;
        let filter = self.parse_where()?;
        Ok(Ast::Delete { table, filter })
    }

    fn parse_where(&mut self) -> CoreResult<Vec<Predicate>> {
        if !self.eat(&Token::Where) {
            return Ok(Vec::new());
        }
        let mut predicates = vec![self.parse_predicate()?];
        while self.eat(&Token::And) {
            predicates.push(self.parse_predicate()?);
        }
        Ok(predicates)
    }

    fn parse_predicate(&mut self) -> CoreResult<Predicate> {
        let column = self.identifier()?;
        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(&Token::Null)?;
            return Ok(Predicate::IsNull { column, negated });
        }
        let op = match self.advance() {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            other => {
                return Err(CoreError::syntax(format!(
                    "expected comparison operator, got {}",
                    other.describe()
                )))
            }
        };
        let operand = self.parse_expr()?;
        Ok(Predicate::Compare {
            column,
            op,
            operand,
        })
    }

    fn parse_expr(&mut self) -> CoreResult<Expr> {
        match self.advance() {
            Token::Param(name) => Ok(Expr::Param(name)),
            Token::StringLit(s) => Ok(Expr::Literal(Value::String(s))),
            Token::IntLit(n) => Ok(Expr::Literal(Value::Int64(n))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Identifier(name) if name.eq_ignore_ascii_case(PENDING_COMMIT_TIMESTAMP_FN) => {
                self.expect(&Token::LParen)?;
                self.expect(&Token::RParen)?;
                Ok(Expr::PendingCommitTimestamp)
            }
            other => Err(CoreError::syntax(format!(
                "expected a value, got {}",
                other.describe()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_select_star() {
        let ast = parse("SELECT * FROM test WHERE id = @ID").unwrap();
        assert_eq!(
            ast,
            Ast::Select {
                columns: None,
                table: "test".into(),
                filter: vec![Predicate::Compare {
                    column: "id".into(),
                    op: CompareOp::Eq,
                    operand: Expr::Param("ID".into()),
                }],
            }
        );
    }

    #[test]
    fn parse_update_with_pending_commit_timestamp() {
        let ast = parse(
            "UPDATE test SET t1=PENDING_COMMIT_TIMESTAMP(), t2=pending_commit_timestamp() WHERE id = @id;",
        )
        .unwrap();
        let Ast::Update {
            table,
            assignments,
            filter,
        } = ast
        else {
            panic!("expected update");
        };
        assert_eq!(table, "test");
        assert_eq!(
            assignments,
            vec![
                ("t1".to_string(), Expr::PendingCommitTimestamp),
                ("t2".to_string(), Expr::PendingCommitTimestamp),
            ]
        );
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn parse_insert_multi_row() {
        let ast = parse("INSERT INTO test (id, t1) VALUES ('a', NULL), (@b, NULL)").unwrap();
        let Ast::Insert { columns, rows, .. } = ast else {
            panic!("expected insert");
        };
        assert_eq!(columns, vec!["id", "t1"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Expr::Param("b".into()));
    }

    #[test]
    fn parse_delete_and_predicates() {
        let ast = parse("DELETE test WHERE t1 IS NOT NULL AND n >= 3 AND t2 IS NULL").unwrap();
        let Ast::Delete { filter, .. } = ast else {
            panic!("expected delete");
        };
        assert_eq!(
            filter,
            vec![
                Predicate::IsNull {
                    column: "t1".into(),
                    negated: true
                },
                Predicate::Compare {
                    column: "n".into(),
                    op: CompareOp::Ge,
                    operand: Expr::Literal(Value::Int64(3)),
                },
                Predicate::IsNull {
                    column: "t2".into(),
                    negated: false
                },
            ]
        );
    }

    #[test]
    fn syntax_errors() {
        for sql in [
            "",
            "SELECT FROM test",
            "UPDATE test WHERE id = 1",
            "INSERT test (id) VALUES (1, 2)",
            "SELECT * FROM test WHERE id",
            "SELECT * FROM test extra",
            "UPDATE test SET t1 = NOW()",
        ] {
            assert!(
                matches!(parse(sql), Err(CoreError::Syntax { .. })),
                "{sql} should not parse"
            );
        }
    }
}
