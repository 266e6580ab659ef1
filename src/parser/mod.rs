//! SQL Parser module
//!
//! Wraps sqlparser-rs to parse table queries into an AST. Versioned table
//! references such as `syn123.4` are quoted before tokenizing so they stay a
//! single table name.

mod ast;
mod dialect;

pub use ast::*;
pub use dialect::{multi_value_operator, TableQueryDialect, HAS, HAS_LIKE};

use crate::error::{QueryError, Result};
use sqlparser::dialect::{Dialect, GenericDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// Parse a table query. Exactly one SELECT statement is accepted.
pub fn parse_query(sql: &str) -> Result<Query> {
    parse_single_query(&TableQueryDialect, &quote_versioned_tables(sql))
}

/// Parse backing-index SQL, bind placeholders included
pub fn parse_internal_query(sql: &str) -> Result<Query> {
    parse_single_query(&GenericDialect {}, sql)
}

fn parse_single_query(dialect: &dyn Dialect, sql: &str) -> Result<Query> {
    let mut statements = Parser::parse_sql(dialect, sql)?;

    if statements.is_empty() {
        return Err(QueryError::Parse("Empty SQL statement".to_string()));
    }

    if statements.len() > 1 {
        return Err(QueryError::Parse(
            "Multiple statements not supported".to_string(),
        ));
    }

    match statements.remove(0) {
        Statement::Query(query) => Ok(*query),
        _ => Err(QueryError::Parse(
            "Only SELECT statements are supported".to_string(),
        )),
    }
}

/// Parse a single expression written in the public query language
pub fn parse_expr(text: &str) -> Result<Expr> {
    parse_expr_with(&TableQueryDialect, text)
}

/// Parse a single expression of backing-index SQL
pub fn parse_internal_expr(text: &str) -> Result<Expr> {
    parse_expr_with(&GenericDialect {}, text)
}

fn parse_expr_with(dialect: &dyn Dialect, text: &str) -> Result<Expr> {
    let mut parser = Parser::new(dialect).try_with_sql(text)?;
    let expr = parser.parse_expr()?;
    let next = parser.next_token();
    if next.token != Token::EOF {
        return Err(QueryError::Parse(format!(
            "Unexpected {} after expression: {}",
            next.token, text
        )));
    }
    Ok(expr)
}

/// Parse a comma separated select list such as `"foo", t."bar"`
pub fn parse_select_list(text: &str) -> Result<Vec<SelectItem>> {
    let query = parse_query(&format!("SELECT {} FROM T0", text))?;
    Ok(select_of(&query)?.projection.clone())
}

/// Parse a comma separated sort specification such as `"foo" DESC, bar`
pub fn parse_order_by(text: &str) -> Result<OrderBy> {
    let query = parse_query(&format!("SELECT 1 FROM T0 ORDER BY {}", text))?;
    query
        .order_by
        .ok_or_else(|| QueryError::Parse(format!("Invalid sort specification: {}", text)))
}

/// Quote `syn123.4` table references so the tokenizer does not split off
/// `.4` as a number. Quoted strings and identifiers are left untouched.
fn quote_versioned_tables(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' || c == '`' {
            let end = closing_quote(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
        } else if is_word_char(c) {
            let end = versioned_reference_end(&chars, i).unwrap_or_else(|| word_end(&chars, i));
            let word: String = chars[i..end].iter().collect();
            if word.contains('.') {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            } else {
                out.push_str(&word);
            }
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn word_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_word_char(chars[end]) {
        end += 1;
    }
    end
}

fn digits_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    end
}

/// End of a `syn<digits>.<digits>` word starting at `start`, if there is one
fn versioned_reference_end(chars: &[char], start: usize) -> Option<usize> {
    let prefix: String = chars.get(start..start + 3)?.iter().collect();
    if !prefix.eq_ignore_ascii_case("syn") {
        return None;
    }
    let id_end = digits_end(chars, start + 3);
    if id_end == start + 3 || chars.get(id_end) != Some(&'.') {
        return None;
    }
    let version_end = digits_end(chars, id_end + 1);
    if version_end == id_end + 1 {
        return None;
    }
    match chars.get(version_end) {
        Some(c) if is_word_char(*c) => None,
        _ => Some(version_end),
    }
}

/// Index just past the quote that closes the one at `start`
fn closing_quote(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut j = start + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}
