//! Unit string parser with normalization.
//!
//! Model output spells the same unit in several ways; the parser accepts:
//!
//! - CF exponents: `m-2`, `s-1`, `m2`
//! - Caret exponents: `m^2`, `m**2`, `m^-2`
//! - Multiplication: `kg m`, `kg*m`, `kg·m`, `kg.m`
//! - Division: `kg/m2/s`, `W per m^2`
//! - Percentages: `%`
//!
//! # Grammar
//!
//! ```text
//! unit_expr  = term (('/' | 'per') term)*
//! term       = factor (('*' | '·' | '.' | ' ') factor)*
//! factor     = (base_unit | '(' unit_expr ')') ('^' | '**')? exponent?
//! base_unit  = [a-zA-Z_]+ [0-9]* | '%'
//! exponent   = '-'? [0-9]+
//! ```

use super::dimension::Dimension;
use super::registry::UNIT_REGISTRY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error type for unit parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    EmptyUnit,
    UnknownUnit(String),
    InvalidExponent(String),
    ParseFailed(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUnit => write!(f, "empty unit string"),
            Self::UnknownUnit(u) => write!(f, "unknown unit: '{u}'"),
            Self::InvalidExponent(e) => write!(f, "invalid exponent: '{e}'"),
            Self::ParseFailed(msg) => write!(f, "parse failed: {msg}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A unit as a product of registered symbols with integer exponents.
///
/// `kg m-2 s-1` is `{kg: 1, m: -2, s: -1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedUnit {
    /// BTreeMap for deterministic ordering.
    components: BTreeMap<String, i32>,
}

impl ParsedUnit {
    #[must_use]
    pub fn dimensionless() -> Self {
        Self {
            components: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_components(components: BTreeMap<String, i32>) -> Self {
        let components = components
            .into_iter()
            .filter(|(_, exp)| *exp != 0)
            .collect();
        Self { components }
    }

    /// Parses a unit string into a `ParsedUnit`.
    ///
    /// ```
    /// use ilamb_core::units::parser::ParsedUnit;
    ///
    /// let cf = ParsedUnit::parse("kg m-2 s-1").unwrap();
    /// let slashed = ParsedUnit::parse("kg/m2/s").unwrap();
    /// assert_eq!(cf, slashed);
    /// ```
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::EmptyUnit);
        }

        if input == "1" || input.eq_ignore_ascii_case("dimensionless") {
            return Ok(Self::dimensionless());
        }

        let mut parser = UnitParser::new(input);
        let parsed = parser.parse_expression()?;
        parser.skip_whitespace();
        if let Some(c) = parser.peek() {
            return Err(ParseError::ParseFailed(format!(
                "unexpected character '{c}' in '{input}'"
            )));
        }
        Ok(parsed)
    }

    #[must_use]
    pub fn components(&self) -> &BTreeMap<String, i32> {
        &self.components
    }

    /// True if the unit has no components at all.
    ///
    /// `%` has a component but is still physically dimensionless; see
    /// [`ParsedUnit::dimension`].
    #[must_use]
    pub fn has_no_components(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_dimensionless(&self) -> Result<bool, ParseError> {
        Ok(self.dimension()?.is_dimensionless())
    }

    pub fn dimension(&self) -> Result<Dimension, ParseError> {
        let mut result = Dimension::dimensionless();
        for (symbol, &exp) in &self.components {
            let info = UNIT_REGISTRY
                .lookup(symbol)
                .ok_or_else(|| ParseError::UnknownUnit(symbol.clone()))?;
            let exp = i8::try_from(exp)
                .map_err(|_| ParseError::InvalidExponent(exp.to_string()))?;
            result = result + info.dimension.pow(exp);
        }
        Ok(result)
    }

    /// Multiplier converting a value in this unit to SI base units.
    pub fn to_si_factor(&self) -> Result<f64, ParseError> {
        let mut factor = 1.0;
        for (symbol, &exp) in &self.components {
            let info = UNIT_REGISTRY
                .lookup(symbol)
                .ok_or_else(|| ParseError::UnknownUnit(symbol.clone()))?;
            factor *= info.to_si_factor.powi(exp);
        }
        Ok(factor)
    }

    /// Additive offset to SI.
    ///
    /// Offsets only apply to a lone symbol with exponent one (`degC`); in any
    /// compound (`degC / yr`) the unit denotes a difference and has none.
    pub fn to_si_offset(&self) -> Result<f64, ParseError> {
        match self.components.iter().next() {
            Some((symbol, 1)) if self.components.len() == 1 => UNIT_REGISTRY
                .lookup(symbol)
                .map(|info| info.to_si_offset)
                .ok_or_else(|| ParseError::UnknownUnit(symbol.clone())),
            _ => Ok(0.0),
        }
    }

    #[must_use]
    pub fn multiply(&self, other: &Self) -> Self {
        let mut components = self.components.clone();
        for (symbol, exp) in &other.components {
            *components.entry(symbol.clone()).or_insert(0) += exp;
        }
        Self::from_components(components)
    }

    #[must_use]
    pub fn divide(&self, other: &Self) -> Self {
        self.multiply(&other.pow(-1))
    }

    #[must_use]
    pub fn pow(&self, exp: i32) -> Self {
        let components = self
            .components
            .iter()
            .map(|(k, v)| (k.clone(), v * exp))
            .collect();
        Self::from_components(components)
    }

    /// Canonical form: positive exponents alphabetically, then `/`, then
    /// negative exponents alphabetically.
    #[must_use]
    pub fn normalized(&self) -> String {
        let format_part = |parts: Vec<(&str, i32)>| -> String {
            parts
                .iter()
                .map(|(s, e)| {
                    if *e == 1 {
                        (*s).to_string()
                    } else {
                        format!("{s}^{e}")
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        };

        let numerator: Vec<(&str, i32)> = self
            .components
            .iter()
            .filter(|(_, &e)| e > 0)
            .map(|(s, &e)| (s.as_str(), e))
            .collect();
        let denominator: Vec<(&str, i32)> = self
            .components
            .iter()
            .filter(|(_, &e)| e < 0)
            .map(|(s, &e)| (s.as_str(), -e))
            .collect();

        let num_str = format_part(numerator);
        let den_str = format_part(denominator);

        match (num_str.is_empty(), den_str.is_empty()) {
            (true, true) => "1".to_string(),
            (false, true) => num_str,
            (true, false) => format!("1 / {den_str}"),
            (false, false) => format!("{num_str} / {den_str}"),
        }
    }
}

impl fmt::Display for ParsedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

struct UnitParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> UnitParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expression(&mut self) -> Result<ParsedUnit, ParseError> {
        self.skip_whitespace();
        let mut result = self.parse_term()?;

        loop {
            self.skip_whitespace();
            if self.peek() == Some('/') {
                self.advance();
            } else if self.check_keyword("per") {
                self.pos += "per".len();
            } else {
                break;
            }
            self.skip_whitespace();
            let divisor = self.parse_factor()?;
            result = result.divide(&divisor);
            // Terms after a division belong to the numerator again only when
            // written explicitly, so `kg/m2 s` is `kg m-2 s`.
            result = result.multiply(&self.parse_trailing_factors()?);
        }

        Ok(result)
    }

    fn parse_term(&mut self) -> Result<ParsedUnit, ParseError> {
        let first = self.parse_factor()?;
        Ok(first.multiply(&self.parse_trailing_factors()?))
    }

    fn parse_trailing_factors(&mut self) -> Result<ParsedUnit, ParseError> {
        let mut result = ParsedUnit::dimensionless();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('*' | '\u{00B7}' | '.') => {
                    self.advance();
                    self.skip_whitespace();
                    result = result.multiply(&self.parse_factor()?);
                }
                Some(c) if self.is_unit_start(c) && !self.check_keyword("per") => {
                    result = result.multiply(&self.parse_factor()?);
                }
                _ => break,
            }
        }

        Ok(result)
    }

    fn parse_factor(&mut self) -> Result<ParsedUnit, ParseError> {
        self.skip_whitespace();

        if self.peek() == Some('(') {
            self.advance();
            let inner = self.parse_expression()?;
            self.skip_whitespace();
            if self.peek() != Some(')') {
                return Err(ParseError::ParseFailed(
                    "missing closing parenthesis".into(),
                ));
            }
            self.advance();
            let exp = self.parse_optional_exponent()?;
            return Ok(inner.pow(exp));
        }

        let symbol = self.parse_symbol()?;
        let exp = self.parse_optional_exponent()?;

        let mut components = BTreeMap::new();
        components.insert(symbol, exp);
        Ok(ParsedUnit::from_components(components))
    }

    fn parse_symbol(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();

        if self.peek() == Some('%') {
            self.advance();
            return Ok("%".to_string());
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        if self.pos == start {
            return Err(ParseError::ParseFailed(format!(
                "expected unit symbol at position {start} in '{}'",
                self.input
            )));
        }

        let full_symbol = &self.input[start..self.pos];

        // Trailing digits are an exponent unless they belong to a known
        // symbol: "m2" is m^2 but "CO2" stays CO2.
        if let Some(last_letter_idx) = full_symbol.rfind(|c: char| c.is_ascii_alphabetic()) {
            let trailing = &full_symbol[last_letter_idx + 1..];
            if !trailing.is_empty() && UNIT_REGISTRY.lookup(full_symbol).is_none() {
                self.pos = start + last_letter_idx + 1;
                return Ok(full_symbol[..=last_letter_idx].to_string());
            }
        }

        Ok(full_symbol.to_string())
    }

    fn parse_optional_exponent(&mut self) -> Result<i32, ParseError> {
        // Caret markers may be padded ("m ^ 2"); bare digits may not.
        let before_ws = self.pos;
        self.skip_whitespace();
        let has_marker = if self.input[self.pos..].starts_with("**") {
            self.pos += 2;
            true
        } else if self.peek() == Some('^') {
            self.advance();
            true
        } else {
            self.pos = before_ws;
            false
        };

        if has_marker {
            self.skip_whitespace();
        }

        match self.peek() {
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.parse_exponent(),
            _ if has_marker => Err(ParseError::ParseFailed("expected exponent after ^".into())),
            _ => Ok(1),
        }
    }

    fn parse_exponent(&mut self) -> Result<i32, ParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.advance();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        let exp_str = &self.input[start..self.pos];
        exp_str
            .parse()
            .map_err(|_| ParseError::InvalidExponent(exp_str.to_string()))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
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

    fn is_unit_start(&self, c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || c == '(' || c == '%'
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let rest = &self.input[self.pos..];
        rest.len() >= keyword.len()
            && rest[..keyword.len()].eq_ignore_ascii_case(keyword)
            && rest[keyword.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_ascii_alphanumeric())
    }
}
