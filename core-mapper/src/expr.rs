//! Expression language: lexer, parser, evaluator.
//!
//! A small jq-flavored language covering what mapping configurations
//! actually use: dot-path navigation with index access, literals, equality
//! comparison, and boolean connectives.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | cmp
//! cmp     := primary (("==" | "!=") primary)?
//! primary := path | literal | "(" expr ")"
//! path    := "." | "." segment ("." segment | "[" int "]")*
//! ```

use serde_json::Value;
use std::sync::Arc;

use crate::error::{MapperError, Result};

/// A compiled expression, cheap to clone and share.
pub type CompiledExpr = Arc<Expr>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Bare `.` - the whole input
    Identity,
    /// `.foo.bar[0]`
    Field(Vec<PathSeg>),
    /// String, number, boolean, or null literal
    Literal(Value),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Normalize quote characters at token boundaries.
///
/// Single-quoted string literals become double-quoted ones so configs may
/// use either style. Content inside a literal is untouched; inner double
/// quotes get escaped during the rewrite.
pub fn normalize_quotes(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                // Copy a double-quoted literal verbatim, respecting escapes.
                out.push('"');
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '\\' {
                        if let Some(next) = chars.next() {
                            out.push(next);
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\'' => {
                            out.push('"');
                            break;
                        }
                        '"' => out.push_str("\\\""),
                        '\\' => {
                            out.push('\\');
                            if let Some(next) = chars.next() {
                                out.push(next);
                            }
                        }
                        other => out.push(other),
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let err = |message: String| MapperError::Parse {
        expression: expr.to_string(),
        message,
    };

    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(err("expected '=='".to_string()));
                }
                tokens.push(Token::EqEq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(err("expected '!='".to_string()));
                }
                tokens.push(Token::NotEq);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(err("unterminated escape".to_string())),
                        },
                        Some(other) => s.push(other),
                        None => return Err(err("unterminated string literal".to_string())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let mut num = String::new();
                num.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if num.contains('.') {
                    let f: f64 = num
                        .parse()
                        .map_err(|_| err(format!("invalid number '{}'", num)))?;
                    tokens.push(Token::Float(f));
                } else {
                    let i: i64 = num
                        .parse()
                        .map_err(|_| err(format!("invalid number '{}'", num)))?;
                    tokens.push(Token::Int(i));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '-' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(err(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expr: &'a str,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> MapperError {
        MapperError::Parse {
            expression: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        match self.peek() {
            Some(Token::EqEq) => {
                self.next();
                let rhs = self.parse_primary()?;
                Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)))
            }
            Some(Token::NotEq) => {
                self.next();
                let rhs = self.parse_primary()?;
                Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Dot) => self.parse_path(),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::from(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if self.next() != Some(Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }

    /// Called with the leading dot already consumed.
    fn parse_path(&mut self) -> Result<Expr> {
        let mut segs = Vec::new();

        // `.` alone is the identity expression.
        match self.peek() {
            Some(Token::Ident(_)) => {
                if let Some(Token::Ident(name)) = self.next() {
                    segs.push(PathSeg::Key(name));
                }
            }
            _ => return Ok(Expr::Identity),
        }

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(name)) => segs.push(PathSeg::Key(name)),
                        other => {
                            return Err(self.error(format!(
                                "expected field name after '.', got {:?}",
                                other
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    let index = match self.next() {
                        Some(Token::Int(i)) if i >= 0 => i as usize,
                        other => {
                            return Err(
                                self.error(format!("expected array index, got {:?}", other))
                            )
                        }
                    };
                    if self.next() != Some(Token::RBracket) {
                        return Err(self.error("expected ']'"));
                    }
                    segs.push(PathSeg::Index(index));
                }
                _ => break,
            }
        }

        Ok(Expr::Field(segs))
    }
}

/// Parse one expression into its AST.
///
/// Callers normally go through the processor's memoizing `compile` instead.
pub fn parse(expr: &str) -> Result<Expr> {
    let normalized = normalize_quotes(expr);
    let tokens = lex(&normalized)?;
    if tokens.is_empty() {
        return Err(MapperError::Parse {
            expression: expr.to_string(),
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        expr,
    };
    let parsed = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens after expression"));
    }
    Ok(parsed)
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Evaluate a compiled expression against a record.
///
/// Missing fields and out-of-range indexes evaluate to `Null`, matching the
/// tolerant navigation mapping configs rely on.
pub fn eval(expr: &Expr, data: &Value) -> Value {
    match expr {
        Expr::Identity => data.clone(),
        Expr::Literal(v) => v.clone(),
        Expr::Field(segs) => {
            let mut current = data;
            for seg in segs {
                current = match seg {
                    PathSeg::Key(key) => match current.get(key) {
                        Some(v) => v,
                        None => return Value::Null,
                    },
                    PathSeg::Index(i) => match current.get(i) {
                        Some(v) => v,
                        None => return Value::Null,
                    },
                };
            }
            current.clone()
        }
        Expr::Eq(l, r) => Value::Bool(eval(l, data) == eval(r, data)),
        Expr::Ne(l, r) => Value::Bool(eval(l, data) != eval(r, data)),
        Expr::And(l, r) => Value::Bool(truthy(&eval(l, data)) && truthy(&eval(r, data))),
        Expr::Or(l, r) => Value::Bool(truthy(&eval(l, data)) || truthy(&eval(r, data))),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, data))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_str(expr: &str, data: &Value) -> Value {
        eval(&parse(expr).unwrap(), data)
    }

    #[test]
    fn test_normalize_single_quotes() {
        assert_eq!(normalize_quotes("'WORKING'"), "\"WORKING\"");
        assert_eq!(
            normalize_quotes(".status == 'WORKING'"),
            ".status == \"WORKING\""
        );
    }

    #[test]
    fn test_normalize_preserves_content() {
        // A single quote inside a double-quoted literal is content.
        assert_eq!(normalize_quotes("\"it's fine\""), "\"it's fine\"");
        // A double quote inside a single-quoted literal gets escaped.
        assert_eq!(normalize_quotes("'say \"hi\"'"), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_path_navigation() {
        let data = json!({"a": {"b": [{"c": 7}]}});
        assert_eq!(eval_str(".a.b[0].c", &data), json!(7));
        assert_eq!(eval_str(".a.missing", &data), Value::Null);
        assert_eq!(eval_str(".a.b[9]", &data), Value::Null);
    }

    #[test]
    fn test_identity() {
        let data = json!({"x": 1});
        assert_eq!(eval_str(".", &data), data);
    }

    #[test]
    fn test_equality_with_either_quote_style() {
        let data = json!({"status": "WORKING"});
        assert_eq!(eval_str(".status == \"WORKING\"", &data), json!(true));
        assert_eq!(eval_str(".status == 'WORKING'", &data), json!(true));
        assert_eq!(eval_str(".status != 'BROKEN'", &data), json!(true));
    }

    #[test]
    fn test_boolean_connectives() {
        let data = json!({"a": 1, "b": "x"});
        assert_eq!(eval_str(".a == 1 and .b == 'x'", &data), json!(true));
        assert_eq!(eval_str(".a == 2 or .b == 'x'", &data), json!(true));
        assert_eq!(eval_str("not (.a == 1)", &data), json!(false));
    }

    #[test]
    fn test_missing_field_compares_as_null() {
        let data = json!({});
        assert_eq!(eval_str(".gone == null", &data), json!(true));
        assert_eq!(eval_str(".gone == 'x'", &data), json!(false));
    }

    #[test]
    fn test_numeric_and_literal_values() {
        let data = json!({"n": 42, "f": 1.5, "t": true});
        assert_eq!(eval_str(".n == 42", &data), json!(true));
        assert_eq!(eval_str(".f == 1.5", &data), json!(true));
        assert_eq!(eval_str(".t == true", &data), json!(true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse(".a ==").is_err());
        assert!(parse(".a = 1").is_err());
        assert!(parse("(.a == 1").is_err());
        assert!(parse(".a == 1 extra").is_err());
    }

    #[test]
    fn test_hyphenated_keys() {
        let data = json!({"x-kind": "svc"});
        assert_eq!(eval_str(".x-kind == 'svc'", &data), json!(true));
    }
}
