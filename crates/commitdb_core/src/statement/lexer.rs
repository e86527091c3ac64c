//! SQL tokenizer.

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    // Keywords
    Select,
    From,
    Where,
    And,
    Is,
    Not,
    Null,
    True,
    False,
    Update,
    Set,
    Insert,
    Into,
    Values,
    Delete,
    // Symbols
    Star,
    Comma,
    LParen,
    RParen,
    Semicolon,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    // Literals
    Identifier(String),
    Param(String),
    StringLit(String),
    IntLit(i64),
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Identifier(s) => format!("identifier `{s}`"),
            Token::Param(s) => format!("parameter @{s}"),
            Token::StringLit(s) => format!("string '{s}'"),
            Token::IntLit(n) => format!("integer {n}"),
            Token::Eof => "end of statement".to_string(),
            other => format!("{other:?}").to_uppercase(),
        }
    }
}

pub(crate) fn tokenize(sql: &str) -> CoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Line comments
        if c == '-' && i + 1 < len && chars[i + 1] == '-' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let single = match c {
            '*' => Some(Token::Star),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ';' => Some(Token::Semicolon),
            '=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }

        if c == '!' && i + 1 < len && chars[i + 1] == '=' {
            tokens.push(Token::NotEq);
            i += 2;
            continue;
        }
        if c == '<' {
            match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Le);
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::NotEq);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            continue;
        }
        if c == '>' {
            if chars.get(i + 1) == Some(&'=') {
                tokens.push(Token::Ge);
                i += 2;
            } else {
                tokens.push(Token::Gt);
                i += 1;
            }
            continue;
        }

        // String literals; a doubled quote stands for itself.
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(CoreError::syntax("unterminated string literal"));
                    }
                    Some(&ch) if ch == quote => {
                        if chars.get(i + 1) == Some(&quote) {
                            s.push(quote);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::StringLit(s));
            continue;
        }

        // Quoted identifiers
        if c == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '`')
                .map(|p| start + p)
                .ok_or_else(|| CoreError::syntax("unterminated quoted identifier"))?;
            tokens.push(Token::Identifier(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }

        // Integers, with an optional leading minus
        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<i64>()
                .map_err(|_| CoreError::syntax(format!("integer out of range: {text}")))?;
            tokens.push(Token::IntLit(n));
            continue;
        }

        if c == '@' {
            let start = i + 1;
            i = start;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i == start {
                return Err(CoreError::syntax("expected a parameter name after `@`"));
            }
            tokens.push(Token::Param(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.to_ascii_uppercase().as_str() {
                "SELECT" => Token::Select,
                "FROM" => Token::From,
                "WHERE" => Token::Where,
                "AND" => Token::And,
                "IS" => Token::Is,
                "NOT" => Token::Not,
                "NULL" => Token::Null,
                "TRUE" => Token::True,
                "FALSE" => Token::False,
                "UPDATE" => Token::Update,
                "SET" => Token::Set,
                "INSERT" => Token::Insert,
                "INTO" => Token::Into,
                "VALUES" => Token::Values,
                "DELETE" => Token::Delete,
                _ => Token::Identifier(word),
            };
            tokens.push(token);
            continue;
        }

        return Err(CoreError::syntax(format!("unexpected character `{c}`")));
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}
