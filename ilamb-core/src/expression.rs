//! Algebraic expressions over model variables.
//!
//! A model that does not write a variable directly can often provide it as
//! a combination of others, e.g. `gpp` as `nee + reco` or `rsns` as
//! `rsds - rsus`. An [`Expression`] is parsed once and evaluated over masked
//! arrays, carrying units alongside the values:
//!
//! * `+` and `-` convert the right operand into the unit of the left;
//! * `*` and `/` multiply and divide units;
//! * `^` takes a constant exponent, which must be an integer unless the
//!   base is dimensionless;
//! * bare numbers take the unit of whatever they are added to.
//!
//! `abs`, `sqrt`, `exp` and `log` are available as functions.
//!
//! ```
//! use ilamb_core::expression::Expression;
//!
//! let expr = Expression::parse("(rsds - rsus) / 2").unwrap();
//! assert_eq!(expr.variables(), vec!["rsds", "rsus"]);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayD, Zip};

use crate::errors::{IlambError, IlambResult};
use crate::masked::MaskedArray;
use crate::units::{ParsedUnit, Unit};
use crate::variable::Variable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Log,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Self::Abs),
            "sqrt" => Some(Self::Sqrt),
            "exp" => Some(Self::Exp),
            "log" | "ln" => Some(Self::Log),
            _ => None,
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Abs => x.abs(),
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Box<Expr>),
}

/// An expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// [`IlambError::Expression`] on a syntax error or an unknown function.
    pub fn parse(source: &str) -> IlambResult<Self> {
        let mut parser = ExprParser::new(source);
        let root = parser.parse_sum()?;
        parser.skip_whitespace();
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("unexpected '{c}' at position {}", parser.pos)));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Variable names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        fn walk<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Variable(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Neg(inner) | Expr::Call(_, inner) => walk(inner, out),
                Expr::Binary(_, lhs, rhs) => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Evaluates the expression over `inputs`, keyed by variable name.
    ///
    /// Returns the values, masked wherever an input is masked or the result
    /// is not finite, and the unit of the result.
    ///
    /// # Errors
    ///
    /// [`IlambError::Expression`] for missing inputs, mismatched shapes,
    /// or unit combinations that have no meaning; unit errors when an input
    /// unit cannot be parsed or converted.
    pub fn evaluate(&self, inputs: &BTreeMap<String, Variable>) -> IlambResult<(MaskedArray, String)> {
        let value = self.eval(&self.root, inputs)?;
        let unit = value.unit.map_or_else(|| "1".to_string(), |u| cf_unit(&u));
        let data = match value.field {
            Field::Array(data) => data,
            Field::Scalar(_) => {
                return Err(self.error("expression does not reference any variable".into()));
            }
        };
        Ok((data, unit))
    }

    fn error(&self, reason: String) -> IlambError {
        IlambError::Expression {
            expression: self.source.clone(),
            reason,
        }
    }

    fn eval(&self, expr: &Expr, inputs: &BTreeMap<String, Variable>) -> IlambResult<Value> {
        match expr {
            Expr::Number(x) => Ok(Value {
                field: Field::Scalar(*x),
                unit: None,
            }),
            Expr::Variable(name) => {
                let input = inputs
                    .get(name)
                    .ok_or_else(|| self.error(format!("no input named '{name}'")))?;
                Ok(Value {
                    field: Field::Array(input.data.clone()),
                    unit: Some(ParsedUnit::parse(&input.unit)?),
                })
            }
            Expr::Neg(inner) => {
                let value = self.eval(inner, inputs)?;
                Ok(Value {
                    field: value.field.map(|x| -x),
                    unit: value.unit,
                })
            }
            Expr::Call(function, inner) => {
                let value = self.eval(inner, inputs)?;
                let unit = match (function, value.unit) {
                    (Function::Abs, unit) => unit,
                    (_, None) => None,
                    (Function::Sqrt, Some(unit)) => Some(self.root_unit(&unit)?),
                    (Function::Exp | Function::Log, Some(unit)) => {
                        if !unit.is_dimensionless()? {
                            return Err(self.error(format!("{function:?} of a quantity in '{unit}'")));
                        }
                        Some(ParsedUnit::dimensionless())
                    }
                };
                Ok(Value {
                    field: value.field.map(|x| function.apply(x)),
                    unit,
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, inputs)?;
                let rhs = self.eval(rhs, inputs)?;
                self.binary(*op, lhs, rhs)
            }
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, mut rhs: Value) -> IlambResult<Value> {
        let unit = match op {
            BinaryOp::Add | BinaryOp::Sub => match (lhs.unit, rhs.unit.take()) {
                (Some(left), Some(right)) => {
                    if left != right {
                        let conversion = Unit::parse(&cf_unit(&right))?
                            .conversion_to(&Unit::parse(&cf_unit(&left))?)?;
                        rhs.field = rhs.field.map(|x| conversion.apply(x));
                    }
                    Some(left)
                }
                (left, right) => left.or(right),
            },
            BinaryOp::Mul => merge_units(lhs.unit, rhs.unit, |a, b| a.multiply(b)),
            BinaryOp::Div => merge_units(lhs.unit, rhs.unit, |a, b| a.divide(b)),
            BinaryOp::Pow => {
                let Field::Scalar(exponent) = rhs.field else {
                    return Err(self.error("exponents must be constant".into()));
                };
                match lhs.unit {
                    Some(unit) if !unit.is_dimensionless()? => {
                        if exponent.fract() != 0.0 {
                            return Err(self.error(format!("non-integer power of '{unit}'")));
                        }
                        Some(unit.pow(exponent as i32))
                    }
                    unit => unit,
                }
            }
        };

        let f: fn(f64, f64) -> f64 = match op {
            BinaryOp::Add => |a, b| a + b,
            BinaryOp::Sub => |a, b| a - b,
            BinaryOp::Mul => |a, b| a * b,
            BinaryOp::Div => |a, b| a / b,
            BinaryOp::Pow => f64::powf,
        };
        let field = Field::combine(lhs.field, rhs.field, f).map_err(|reason| self.error(reason))?;
        Ok(Value { field, unit })
    }

    /// Unit of the square root of `unit`; every exponent must be even.
    fn root_unit(&self, unit: &ParsedUnit) -> IlambResult<ParsedUnit> {
        if unit.components().values().any(|e| e % 2 != 0) {
            return Err(self.error(format!("square root of '{unit}'")));
        }
        let halved = unit
            .components()
            .iter()
            .map(|(symbol, e)| (symbol.clone(), e / 2))
            .collect();
        Ok(ParsedUnit::from_components(halved))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn merge_units(
    lhs: Option<ParsedUnit>,
    rhs: Option<ParsedUnit>,
    f: impl Fn(&ParsedUnit, &ParsedUnit) -> ParsedUnit,
) -> Option<ParsedUnit> {
    match (lhs, rhs) {
        (None, None) => None,
        (a, b) => Some(f(
            &a.unwrap_or_else(ParsedUnit::dimensionless),
            &b.unwrap_or_else(ParsedUnit::dimensionless),
        )),
    }
}

/// CF spelling of a unit, `kg m^-2 s^-1`.
fn cf_unit(unit: &ParsedUnit) -> String {
    if unit.has_no_components() {
        return "1".to_string();
    }
    unit.components()
        .iter()
        .map(|(symbol, e)| if *e == 1 { symbol.clone() } else { format!("{symbol}^{e}") })
        .collect::<Vec<_>>()
        .join(" ")
}

struct Value {
    field: Field,
    /// `None` for bare numbers.
    unit: Option<ParsedUnit>,
}

enum Field {
    Scalar(f64),
    Array(MaskedArray),
}

impl Field {
    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Self::Scalar(x) => Self::Scalar(f(x)),
            Self::Array(a) => {
                let (data, mask) = a.into_parts();
                Self::Array(finish(data.mapv(f), mask))
            }
        }
    }

    fn combine(lhs: Self, rhs: Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, String> {
        match (lhs, rhs) {
            (Self::Scalar(a), Self::Scalar(b)) => Ok(Self::Scalar(f(a, b))),
            (Self::Array(a), Self::Scalar(b)) => Ok(Self::Array(a).map(|x| f(x, b))),
            (Self::Scalar(a), Self::Array(b)) => Ok(Self::Array(b).map(|x| f(a, x))),
            (Self::Array(a), Self::Array(b)) => {
                if a.shape() != b.shape() {
                    return Err(format!("shapes {:?} and {:?} differ", a.shape(), b.shape()));
                }
                let data = Zip::from(a.data()).and(b.data()).map_collect(|&x, &y| f(x, y));
                let mask = Zip::from(a.mask()).and(b.mask()).map_collect(|&x, &y| x || y);
                Ok(Self::Array(finish(data, mask)))
            }
        }
    }
}

/// Masks non-finite results and zeroes them, so no NaN is ever written.
fn finish(mut data: ArrayD<f64>, mut mask: ArrayD<bool>) -> MaskedArray {
    Zip::from(&mut data).and(&mut mask).for_each(|v, m| {
        if !v.is_finite() {
            *m = true;
            *v = 0.0;
        }
    });
    MaskedArray::new(data, mask)
}

struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: String) -> IlambError {
        IlambError::Expression {
            expression: self.input.to_string(),
            reason,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn parse_sum(&mut self) -> IlambResult<Expr> {
        let mut lhs = self.parse_product()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> IlambResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let rest = &self.input[self.pos..];
            let op = if rest.starts_with('*') && !rest.starts_with("**") {
                BinaryOp::Mul
            } else if rest.starts_with('/') {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> IlambResult<Expr> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some('+') => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// `^` and `**` bind tighter than unary minus on their left and are
    /// right-associative.
    fn parse_power(&mut self) -> IlambResult<Expr> {
        let base = self.parse_atom()?;
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let marker = if rest.starts_with("**") {
            2
        } else if rest.starts_with('^') {
            1
        } else {
            return Ok(base);
        };
        self.pos += marker;
        let exponent = self.parse_unary()?;
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    fn parse_atom(&mut self) -> IlambResult<Expr> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_sum()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.parse_identifier();
                self.skip_whitespace();
                if self.peek() != Some('(') {
                    return Ok(Expr::Variable(name));
                }
                let function = Function::from_name(&name)
                    .ok_or_else(|| self.error(format!("unknown function '{name}'")))?;
                self.advance();
                let argument = self.parse_sum()?;
                self.expect(')')?;
                Ok(Expr::Call(function, Box::new(argument)))
            }
            Some(c) => Err(self.error(format!("unexpected '{c}' at position {}", self.pos))),
            None => Err(self.error("unexpected end of expression".into())),
        }
    }

    fn expect(&mut self, close: char) -> IlambResult<()> {
        self.skip_whitespace();
        if self.peek() != Some(close) {
            return Err(self.error(format!("expected '{close}' at position {}", self.pos)));
        }
        self.advance();
        Ok(())
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_number(&mut self) -> IlambResult<Expr> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.advance();
        }
        // Exponent only when digits follow, so `2e` stays a syntax error
        // rather than swallowing a variable named `e`.
        let rest = &self.input[self.pos..];
        if let Some(tail) = rest.strip_prefix(|c: char| c == 'e' || c == 'E') {
            let digits = tail.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(tail);
            if digits.starts_with(|c: char| c.is_ascii_digit()) {
                self.pos += rest.len() - digits.len();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let text = &self.input[start..self.pos];
        text.parse()
            .map(Expr::Number)
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }
}
