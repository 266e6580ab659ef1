//! SQL dialect for table queries
//!
//! Generic SQL plus the multi-value list operators `HAS` and `HAS_LIKE`:
//! `"tags" HAS ('a', 'b')`. They parse into a binary operation whose
//! operator is `BinaryOperator::Custom("HAS")` and whose right side is a tuple.

use sqlparser::ast::{BinaryOperator, Expr};
use sqlparser::dialect::Dialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;

pub const HAS: &str = "HAS";
pub const HAS_LIKE: &str = "HAS_LIKE";

/// Binds tighter than AND/OR and looser than arithmetic, like LIKE.
const MULTI_VALUE_PRECEDENCE: u8 = 19;

#[derive(Debug, Default, Clone, Copy)]
pub struct TableQueryDialect;

/// `HAS` or `HAS_LIKE`, upper-cased
pub fn multi_value_operator(word: &str) -> Option<&'static str> {
    if word.eq_ignore_ascii_case(HAS) {
        Some(HAS)
    } else if word.eq_ignore_ascii_case(HAS_LIKE) {
        Some(HAS_LIKE)
    } else {
        None
    }
}

impl Dialect for TableQueryDialect {
    fn is_identifier_start(&self, ch: char) -> bool {
        ch.is_alphabetic() || ch == '_' || ch == '#' || ch == '@'
    }

    fn is_identifier_part(&self, ch: char) -> bool {
        ch.is_alphabetic() || ch.is_ascii_digit() || ch == '@' || ch == '$' || ch == '#' || ch == '_'
    }

    fn is_delimited_identifier_start(&self, ch: char) -> bool {
        ch == '"' || ch == '`'
    }

    fn get_next_precedence(&self, parser: &Parser) -> Option<Result<u8, ParserError>> {
        match parser.peek_token().token {
            Token::Word(w) if w.quote_style.is_none() && multi_value_operator(&w.value).is_some() => {
                Some(Ok(MULTI_VALUE_PRECEDENCE))
            }
            _ => None,
        }
    }

    fn parse_infix(
        &self,
        parser: &mut Parser,
        expr: &Expr,
        _precedence: u8,
    ) -> Option<Result<Expr, ParserError>> {
        let operator = match parser.peek_token().token {
            Token::Word(w) if w.quote_style.is_none() => multi_value_operator(&w.value)?,
            _ => return None,
        };
        parser.next_token();
        Some(parse_value_list(parser).map(|values| Expr::BinaryOp {
            left: Box::new(expr.clone()),
            op: BinaryOperator::Custom(operator.to_string()),
            right: Box::new(Expr::Tuple(values)),
        }))
    }
}

fn parse_value_list(parser: &mut Parser) -> Result<Vec<Expr>, ParserError> {
    parser.expect_token(&Token::LParen)?;
    let values = parser.parse_comma_separated(Parser::parse_expr)?;
    parser.expect_token(&Token::RParen)?;
    Ok(values)
}
