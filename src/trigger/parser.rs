use std::str::FromStr;

use crate::error::WeirError;
use crate::metrics::MetricName;
use crate::trigger::ast::{CompareOp, Expr, LogicOp};
use crate::trigger::lexer::{lex, Token};

/// Parse a trigger expression into its AST.
///
/// Grammar (recursive descent, one token lookahead):
///
/// ```text
/// expression := and_expr ( OR and_expr )*
/// and_expr   := term ( AND term )*
/// term       := '(' expression ')' | condition
/// condition  := Identifier Operator Number
/// ```
///
/// `AND` binds tighter than `OR`; chains at the same level associate left.
/// Identifiers must name a known metric, and the whole input must be
/// consumed.
pub fn parse_trigger(src: &str) -> Result<Expr, WeirError> {
    let tokens = lex(src)?;
    let mut parser = TriggerParser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(WeirError::invalid(format!(
            "unexpected {} `{}` after expression",
            tok.kind(),
            tok.lexeme()
        ))),
    }
}

struct TriggerParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TriggerParser {
    fn parse_expression(&mut self) -> Result<Expr, WeirError> {
        let mut left = self.parse_and()?;
        while self.peek_logical() == Some(LogicOp::Or) {
            self.consume();
            let right = self.parse_and()?;
            left = Expr::Logical { op: LogicOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, WeirError> {
        let mut left = self.parse_term()?;
        while self.peek_logical() == Some(LogicOp::And) {
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Logical { op: LogicOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, WeirError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.consume();
            let expr = self.parse_expression()?;
            match self.peek() {
                Some(Token::RParen) => {
                    self.consume();
                    Ok(expr)
                }
                Some(tok) => {
                    Err(WeirError::invalid(format!("expected `)` but got {}", tok.kind())))
                }
                None => Err(WeirError::invalid("expected `)` but input ended")),
            }
        } else {
            self.parse_condition()
        }
    }

    fn parse_condition(&mut self) -> Result<Expr, WeirError> {
        let field = match self.peek() {
            Some(Token::Identifier(name)) => MetricName::from_str(name)
                .map_err(|_| WeirError::invalid(format!("expected metrics field, got `{}`", name)))?,
            Some(tok) => {
                return Err(WeirError::invalid(format!("expected identifier, got {}", tok.kind())))
            }
            None => return Err(WeirError::invalid("expected identifier, got end of input")),
        };
        self.consume();

        let op = match self.peek() {
            Some(Token::Operator(sym)) => CompareOp::from_str(sym)?,
            Some(tok) => {
                return Err(WeirError::invalid(format!("expected operator, got {}", tok.kind())))
            }
            None => return Err(WeirError::invalid("expected operator, got end of input")),
        };
        self.consume();

        let value = match self.peek() {
            Some(Token::Number(lit)) => lit.parse::<f64>().map_err(|_| {
                WeirError::invalid(format!("expected number, got `{}`", lit))
            })?,
            Some(tok) => {
                return Err(WeirError::invalid(format!("expected number, got {}", tok.kind())))
            }
            None => return Err(WeirError::invalid("expected number, got end of input")),
        };
        self.consume();

        Ok(Expr::Condition { field, op, value })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_logical(&self) -> Option<LogicOp> {
        match self.peek() {
            Some(Token::LogicalOp(op)) if op == "AND" => Some(LogicOp::And),
            Some(Token::LogicalOp(_)) => Some(LogicOp::Or),
            _ => None,
        }
    }

    fn consume(&mut self) {
        self.pos += 1;
    }
}
