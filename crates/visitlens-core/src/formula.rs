//! Metric formula language.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | FIELD | FUNC '(' expr (',' expr)* ')' | '(' expr ')'
//! FUNC    := min | max | avg
//! ```
//!
//! Identifiers resolve against the closed [`Field`] set at parse time.
//! Division by zero evaluates to 0. Sources longer than
//! [`MAX_FORMULA_LEN`] characters or nested deeper than [`MAX_DEPTH`] are
//! syntax errors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TotalViews,
    UniqueVisitors,
    AvgTimeOnPage,
    BounceRate,
    ConversionRate,
    UniquePages,
    TotalVisitors,
    NewVisitors,
    ReturningVisitors,
    AuthenticatedVisitors,
    TotalConversions,
    ConversionValue,
    TotalEvents,
    TotalSessions,
    AvgSessionDuration,
    PagesPerSession,
    ReturnRate,
    EngagementScore,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::TotalViews,
        Field::UniqueVisitors,
        Field::AvgTimeOnPage,
        Field::BounceRate,
        Field::ConversionRate,
        Field::UniquePages,
        Field::TotalVisitors,
        Field::NewVisitors,
        Field::ReturningVisitors,
        Field::AuthenticatedVisitors,
        Field::TotalConversions,
        Field::ConversionValue,
        Field::TotalEvents,
        Field::TotalSessions,
        Field::AvgSessionDuration,
        Field::PagesPerSession,
        Field::ReturnRate,
        Field::EngagementScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::TotalViews => "total_views",
            Field::UniqueVisitors => "unique_visitors",
            Field::AvgTimeOnPage => "avg_time_on_page",
            Field::BounceRate => "bounce_rate",
            Field::ConversionRate => "conversion_rate",
            Field::UniquePages => "unique_pages",
            Field::TotalVisitors => "total_visitors",
            Field::NewVisitors => "new_visitors",
            Field::ReturningVisitors => "returning_visitors",
            Field::AuthenticatedVisitors => "authenticated_visitors",
            Field::TotalConversions => "total_conversions",
            Field::ConversionValue => "conversion_value",
            Field::TotalEvents => "total_events",
            Field::TotalSessions => "total_sessions",
            Field::AvgSessionDuration => "avg_session_duration",
            Field::PagesPerSession => "pages_per_session",
            Field::ReturnRate => "return_rate",
            Field::EngagementScore => "engagement_score",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == raw)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest accepted formula source, in characters.
pub const MAX_FORMULA_LEN: usize = 1_000;

/// Deepest accepted nesting of parentheses, calls and unary minus.
pub const MAX_DEPTH: usize = 64;

/// Named numeric inputs a formula is evaluated against.
pub type FieldSet = BTreeMap<Field, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Min,
    Max,
    Avg,
}

impl Func {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "avg" => Some(Func::Avg),
            _ => None,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Avg => args.iter().sum::<f64>() / args.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Field(Field),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> CoreResult<Vec<(usize, Token)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let token = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value: f64 = literal.parse().map_err(|_| {
                    CoreError::FormulaSyntax(format!("invalid number '{literal}' at {start}"))
                })?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
                continue;
            }
            other => {
                return Err(CoreError::FormulaSyntax(format!(
                    "unexpected character '{other}' at {start}"
                )))
            }
        };
        tokens.push((start, token));
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> CoreResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CoreError::FormulaSyntax(
                "formula nested too deeply".to_string(),
            ));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, expected: Token) -> CoreResult<()> {
        match self.next() {
            Some((_, ref t)) if *t == expected => Ok(()),
            Some((at, t)) => Err(CoreError::FormulaSyntax(format!(
                "expected {expected:?}, found {t:?} at {at}"
            ))),
            None => Err(CoreError::FormulaSyntax(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn expr(&mut self) -> CoreResult<Expr> {
        self.descend()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> CoreResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> CoreResult<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> CoreResult<Expr> {
        match self.next() {
            Some((_, Token::Number(value))) => Ok(Expr::Number(value)),
            Some((_, Token::LParen)) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some((at, Token::Ident(name))) => {
                if self.peek() == Some(&Token::LParen) {
                    let func = Func::parse(&name).ok_or_else(|| {
                        CoreError::FormulaSyntax(format!("unknown function '{name}' at {at}"))
                    })?;
                    self.pos += 1;
                    let mut args = vec![self.expr()?];
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Call(func, args));
                }
                Field::parse(&name)
                    .map(Expr::Field)
                    .ok_or(CoreError::UnknownField(name))
            }
            Some((at, t)) => Err(CoreError::FormulaSyntax(format!(
                "unexpected {t:?} at {at}"
            ))),
            None => Err(CoreError::FormulaSyntax("unexpected end of input".to_string())),
        }
    }
}

/// A parsed formula, ready to be evaluated against any [`FieldSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> CoreResult<Self> {
        if source.chars().count() > MAX_FORMULA_LEN {
            return Err(CoreError::FormulaSyntax(format!(
                "formula longer than {MAX_FORMULA_LEN} characters"
            )));
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(CoreError::FormulaSyntax("empty formula".to_string()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some((at, t)) = parser.next() {
            return Err(CoreError::FormulaSyntax(format!(
                "unexpected trailing {t:?} at {at}"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fields referenced anywhere in the formula.
    pub fn fields(&self) -> BTreeSet<Field> {
        fn walk(expr: &Expr, out: &mut BTreeSet<Field>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Field(f) => {
                    out.insert(*f);
                }
                Expr::Neg(inner) => walk(inner, out),
                Expr::Binary(_, l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Expr::Call(_, args) => args.iter().for_each(|a| walk(a, out)),
            }
        }
        let mut out = BTreeSet::new();
        walk(&self.root, &mut out);
        out
    }

    pub fn evaluate(&self, fields: &FieldSet) -> CoreResult<f64> {
        eval(&self.root, fields)
    }
}

fn eval(expr: &Expr, fields: &FieldSet) -> CoreResult<f64> {
    Ok(match expr {
        Expr::Number(v) => *v,
        Expr::Field(f) => *fields
            .get(f)
            .ok_or_else(|| CoreError::UnknownField(f.as_str().to_string()))?,
        Expr::Neg(inner) => -eval(inner, fields)?,
        Expr::Binary(op, l, r) => {
            let l = eval(l, fields)?;
            let r = eval(r, fields)?;
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div if r == 0.0 => 0.0,
                BinOp::Div => l / r,
            }
        }
        Expr::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, fields))
                .collect::<CoreResult<Vec<f64>>>()?;
            func.apply(&values)
        }
    })
}

/// Stored metric configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub formula: String,
}

impl MetricConfig {
    pub fn from_value(value: &serde_json::Value) -> CoreResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::FormulaSyntax(format!("invalid metric configuration: {e}")))
    }

    pub fn compile(&self) -> CoreResult<Formula> {
        Formula::parse(&self.formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldSet {
        FieldSet::from([
            (Field::TotalConversions, 5.0),
            (Field::TotalVisitors, 20.0),
            (Field::BounceRate, 40.0),
            (Field::ReturnRate, 10.0),
        ])
    }

    fn eval_str(src: &str) -> CoreResult<f64> {
        Formula::parse(src)?.evaluate(&fields())
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(eval_str("1 + 2 * 3").ok(), Some(7.0));
        assert_eq!(eval_str("(1 + 2) * 3").ok(), Some(9.0));
        assert_eq!(eval_str("10 - 4 - 3").ok(), Some(3.0));
        assert_eq!(eval_str("-2 * -3").ok(), Some(6.0));
    }

    #[test]
    fn fields_and_functions() {
        assert_eq!(
            eval_str("total_conversions / total_visitors * 100").ok(),
            Some(25.0)
        );
        assert_eq!(eval_str("max(bounce_rate, return_rate, 0.5)").ok(), Some(40.0));
        assert_eq!(eval_str("min(bounce_rate, return_rate)").ok(), Some(10.0));
        assert_eq!(eval_str("avg(bounce_rate, return_rate)").ok(), Some(25.0));
    }

    #[test]
    fn division_by_zero_is_zero() {
        assert_eq!(eval_str("total_visitors / 0").ok(), Some(0.0));
        assert_eq!(eval_str("1 / (bounce_rate - 40)").ok(), Some(0.0));
    }

    #[test]
    fn malformed_input_is_syntax_error() {
        for src in ["", "1 +", "(1 + 2", "min()", "2 ** 3", "1 2", "sqrt(4)", "1..2", "a $ b"] {
            assert!(
                matches!(Formula::parse(src), Err(CoreError::FormulaSyntax(_))),
                "{src} should be a syntax error"
            );
        }
    }

    #[test]
    fn deep_nesting_is_syntax_error_not_overflow() {
        let negations = format!("{}1", "-".repeat(200));
        let parens = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let calls = format!("{}1{}", "max(".repeat(100), ")".repeat(100));
        for src in [&negations, &parens, &calls] {
            assert!(matches!(
                Formula::parse(src),
                Err(CoreError::FormulaSyntax(msg)) if msg.contains("nested too deeply")
            ));
        }
        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(eval_str(&shallow).ok(), Some(1.0));
        assert_eq!(eval_str("--1").ok(), Some(1.0));
    }

    #[test]
    fn oversized_source_is_rejected_before_parsing() {
        let huge = format!("{}1", "-".repeat(200_000));
        assert!(matches!(
            Formula::parse(&huge),
            Err(CoreError::FormulaSyntax(msg)) if msg.contains("longer than")
        ));
        let long_sum = vec!["1"; MAX_FORMULA_LEN].join("+");
        assert!(Formula::parse(&long_sum).is_err());
        let fits = vec!["1"; 400].join("+");
        assert_eq!(eval_str(&fits).ok(), Some(400.0));
    }

    #[test]
    fn unknown_identifier_is_unknown_field() {
        assert!(matches!(
            Formula::parse("revenue * 2"),
            Err(CoreError::UnknownField(name)) if name == "revenue"
        ));
    }

    #[test]
    fn absent_field_is_unknown_field_at_evaluation() {
        let formula = Formula::parse("engagement_score + 1").unwrap();
        assert!(matches!(
            formula.evaluate(&fields()),
            Err(CoreError::UnknownField(name)) if name == "engagement_score"
        ));
    }

    #[test]
    fn referenced_fields_are_collected() {
        let formula = Formula::parse("avg(bounce_rate, -return_rate) / total_visitors").unwrap();
        assert_eq!(
            formula.fields(),
            BTreeSet::from([Field::BounceRate, Field::ReturnRate, Field::TotalVisitors])
        );
    }

    #[test]
    fn config_rejects_unknown_keys() {
        let value = serde_json::json!({"formula": "1", "extra": true});
        assert!(MetricConfig::from_value(&value).is_err());
        let ok = MetricConfig::from_value(&serde_json::json!({"formula": "bounce_rate"})).unwrap();
        assert_eq!(ok.compile().unwrap().source(), "bounce_rate");
    }
}
