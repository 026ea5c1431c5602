//! Condition evaluation for `when`, `changed_when`, and `failed_when`.
//!
//! Expressions are parsed into a small tagged AST (literals, dotted variable
//! references, comparisons, membership, definedness tests, boolean
//! combinators) and evaluated against a merged [`Context`]. Evaluation is
//! pure: no side effects, no module invocation, no templating.
//!
//! A bare reference to an undefined variable surfaces
//! [`Error::UndefinedVariable`]; the executor turns that into a skip unless
//! the expression tests definedness first (`my_var is defined`).

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::vars::{truthy, Context};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value (string, number, bool, null)
    Literal(JsonValue),
    /// A dotted variable reference
    Var(String),
    /// Logical negation
    Not(Box<Expr>),
    /// Both sides must be true
    And(Box<Expr>, Box<Expr>),
    /// Either side may be true
    Or(Box<Expr>, Box<Expr>),
    /// Comparison of two values
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    /// Membership test: element in list, substring in string, key in map
    In(Box<Expr>, Box<Expr>),
    /// `path is defined`
    IsDefined(String),
    /// `path is not defined`
    IsNotDefined(String),
}

impl Expr {
    /// Parse an expression from text.
    pub fn parse(input: &str) -> Result<Expr> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::condition_parse(input, "trailing tokens"));
        }
        Ok(expr)
    }

    /// Evaluate to a value against the context.
    pub fn evaluate(&self, ctx: &Context) -> Result<JsonValue> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(path) => ctx
                .lookup(path)
                .cloned()
                .ok_or_else(|| Error::UndefinedVariable(path.clone())),
            Expr::Not(inner) => Ok(JsonValue::Bool(!truthy(&inner.evaluate(ctx)?))),
            Expr::And(left, right) => {
                if !truthy(&left.evaluate(ctx)?) {
                    return Ok(JsonValue::Bool(false));
                }
                Ok(JsonValue::Bool(truthy(&right.evaluate(ctx)?)))
            }
            Expr::Or(left, right) => {
                if truthy(&left.evaluate(ctx)?) {
                    return Ok(JsonValue::Bool(true));
                }
                Ok(JsonValue::Bool(truthy(&right.evaluate(ctx)?)))
            }
            Expr::Compare(op, left, right) => {
                let lhs = left.evaluate(ctx)?;
                let rhs = right.evaluate(ctx)?;
                compare(*op, &lhs, &rhs).map(JsonValue::Bool)
            }
            Expr::In(needle, haystack) => {
                let needle = needle.evaluate(ctx)?;
                let haystack = haystack.evaluate(ctx)?;
                membership(&needle, &haystack).map(JsonValue::Bool)
            }
            Expr::IsDefined(path) => Ok(JsonValue::Bool(ctx.is_defined(path))),
            Expr::IsNotDefined(path) => Ok(JsonValue::Bool(!ctx.is_defined(path))),
        }
    }

    /// Evaluate to a boolean via the fixed truthiness table.
    pub fn evaluate_bool(&self, ctx: &Context) -> Result<bool> {
        Ok(truthy(&self.evaluate(ctx)?))
    }
}

/// Evaluate a single expression string against a context.
pub fn eval(expr: &str, ctx: &Context) -> Result<bool> {
    Expr::parse(expr)?.evaluate_bool(ctx)
}

/// Evaluate multiple `when` entries, AND-combined: all must be true.
pub fn eval_all(exprs: &[String], ctx: &Context) -> Result<bool> {
    for expr in exprs {
        if !eval(expr, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare(op: CmpOp, lhs: &JsonValue, rhs: &JsonValue) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(values_equal(lhs, rhs)),
        CmpOp::Ne => Ok(!values_equal(lhs, rhs)),
        _ => {
            let ordering = match (lhs, rhs) {
                (JsonValue::Number(a), JsonValue::Number(b)) => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    a.partial_cmp(&b).ok_or_else(|| {
                        Error::condition_eval(format!("{lhs} {op} {rhs}"), "not comparable")
                    })?
                }
                (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
                _ => {
                    return Err(Error::condition_eval(
                        format!("{lhs} {op} {rhs}"),
                        "ordering requires two numbers or two strings",
                    ))
                }
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            })
        }
    }
}

/// Equality with numeric normalization (1 == 1.0).
fn values_equal(lhs: &JsonValue, rhs: &JsonValue) -> bool {
    match (lhs, rhs) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            a.as_f64().zip(b.as_f64()).map(|(a, b)| a == b).unwrap_or(false)
        }
        _ => lhs == rhs,
    }
}

fn membership(needle: &JsonValue, haystack: &JsonValue) -> Result<bool> {
    match haystack {
        JsonValue::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        JsonValue::String(s) => match needle {
            JsonValue::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(Error::condition_eval(
                format!("{needle} in {haystack}"),
                "substring test requires a string needle",
            )),
        },
        JsonValue::Object(map) => match needle {
            JsonValue::String(key) => Ok(map.contains_key(key)),
            _ => Err(Error::condition_eval(
                format!("{needle} in {haystack}"),
                "key test requires a string needle",
            )),
        },
        _ => Err(Error::condition_eval(
            format!("{needle} in {haystack}"),
            "membership requires a list, string, or map",
        )),
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(JsonValue),
    Op(CmpOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two = if i + 1 < chars.len() && chars[i + 1] == '=' {
                    true
                } else {
                    false
                };
                let op = match (c, two) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', true) => CmpOp::Le,
                    ('>', true) => CmpOp::Ge,
                    ('<', false) => CmpOp::Lt,
                    ('>', false) => CmpOp::Gt,
                    _ => {
                        return Err(Error::condition_parse(
                            input,
                            format!("unexpected character '{c}'"),
                        ))
                    }
                };
                tokens.push(Token::Op(op));
                i += if two { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j == chars.len() {
                    return Err(Error::condition_parse(input, "unterminated string literal"));
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = if text.contains('.') {
                    text.parse::<f64>().ok().and_then(|f| {
                        serde_json::Number::from_f64(f).map(JsonValue::Number)
                    })
                } else {
                    text.parse::<i64>().ok().map(JsonValue::from)
                };
                match value {
                    Some(v) => tokens.push(Token::Num(v)),
                    None => {
                        return Err(Error::condition_parse(
                            input,
                            format!("invalid number '{text}'"),
                        ))
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::condition_parse(
                    input,
                    format!("unexpected character '{other}'"),
                ))
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser (recursive descent: or > and > not > comparison > primary)
// ============================================================================

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(id)) if id == kw)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_keyword("not") {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;

        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_primary()?;
                Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
            }
            Some(Token::Ident(id)) if id == "in" => {
                self.pos += 1;
                let right = self.parse_primary()?;
                Ok(Expr::In(Box::new(left), Box::new(right)))
            }
            Some(Token::Ident(id)) if id == "is" => {
                self.pos += 1;
                let negated = if self.peek_keyword("not") {
                    self.pos += 1;
                    true
                } else {
                    false
                };
                if !self.peek_keyword("defined") {
                    return Err(Error::condition_parse(
                        self.input,
                        "expected 'defined' after 'is'",
                    ));
                }
                self.pos += 1;
                let path = match left {
                    Expr::Var(path) => path,
                    _ => {
                        return Err(Error::condition_parse(
                            self.input,
                            "definedness test requires a variable reference",
                        ))
                    }
                };
                Ok(if negated {
                    Expr::IsNotDefined(path)
                } else {
                    Expr::IsDefined(path)
                })
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(Error::condition_parse(self.input, "expected ')'")),
                }
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(JsonValue::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(n)),
            Some(Token::Ident(id)) => match id.as_str() {
                "true" | "True" => Ok(Expr::Literal(JsonValue::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(JsonValue::Bool(false))),
                "null" | "none" | "None" => Ok(Expr::Literal(JsonValue::Null)),
                _ => Ok(Expr::Var(id)),
            },
            other => Err(Error::condition_parse(
                self.input,
                format!("unexpected token {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    fn ctx(pairs: &[(&str, JsonValue)]) -> Context {
        let mut map = IndexMap::new();
        for (key, value) in pairs {
            map.insert(key.to_string(), value.clone());
        }
        Context::from_map(map)
    }

    #[test]
    fn test_literals() {
        let ctx = ctx(&[]);
        assert!(eval("true", &ctx).unwrap());
        assert!(!eval("false", &ctx).unwrap());
        assert!(eval("1", &ctx).unwrap());
        assert!(!eval("0", &ctx).unwrap());
        assert!(!eval("''", &ctx).unwrap());
    }

    #[test]
    fn test_comparisons() {
        let ctx = ctx(&[("env", json!("staging")), ("port", json!(80))]);
        assert!(eval("env == 'staging'", &ctx).unwrap());
        assert!(!eval("env == 'prod'", &ctx).unwrap());
        assert!(eval("env != 'prod'", &ctx).unwrap());
        assert!(eval("port >= 80", &ctx).unwrap());
        assert!(eval("port < 443", &ctx).unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        let ctx = ctx(&[("a", json!(true)), ("b", json!(false))]);
        assert!(eval("a and not b", &ctx).unwrap());
        assert!(eval("b or a", &ctx).unwrap());
        assert!(!eval("a and b", &ctx).unwrap());
        assert!(eval("not (a and b)", &ctx).unwrap());
    }

    #[test]
    fn test_undefined_variable_errors() {
        let ctx = ctx(&[]);
        assert!(matches!(
            eval("missing == 1", &ctx),
            Err(Error::UndefinedVariable(_))
        ));
        // Short-circuit: the right side of a false `and` is never evaluated.
        assert!(!eval("false and missing == 1", &ctx).unwrap());
    }

    #[test]
    fn test_is_defined() {
        let ctx = ctx(&[("present", json!(1))]);
        assert!(eval("present is defined", &ctx).unwrap());
        assert!(!eval("missing is defined", &ctx).unwrap());
        assert!(eval("missing is not defined", &ctx).unwrap());
        // The documented guard pattern: definedness first, then use.
        assert!(!eval("missing is defined and missing == 1", &ctx).unwrap());
    }

    #[test]
    fn test_membership() {
        let ctx = ctx(&[
            ("ports", json!([80, 443])),
            ("name", json!("webserver")),
            ("attrs", json!({"role": "db"})),
        ]);
        assert!(eval("80 in ports", &ctx).unwrap());
        assert!(!eval("8080 in ports", &ctx).unwrap());
        assert!(eval("'web' in name", &ctx).unwrap());
        assert!(eval("'role' in attrs", &ctx).unwrap());
    }

    #[test]
    fn test_dotted_paths() {
        let ctx = ctx(&[("r", json!({"rc": 0, "results": [{"failed": true}]}))]);
        assert!(eval("r.rc == 0", &ctx).unwrap());
        assert!(eval("r.results.0.failed", &ctx).unwrap());
    }

    #[test]
    fn test_eval_all_and_combined() {
        let ctx = ctx(&[("a", json!(true)), ("b", json!(true))]);
        assert!(eval_all(&["a".into(), "b".into()], &ctx).unwrap());
        assert!(!eval_all(&["a".into(), "not b".into()], &ctx).unwrap());
        assert!(eval_all(&[], &ctx).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Expr::parse("env == "),
            Err(Error::ConditionParse { .. })
        ));
        assert!(matches!(
            Expr::parse("'unterminated"),
            Err(Error::ConditionParse { .. })
        ));
    }

    #[test]
    fn test_numeric_normalization() {
        let ctx = ctx(&[("x", json!(1.0))]);
        assert!(eval("x == 1", &ctx).unwrap());
    }
}
