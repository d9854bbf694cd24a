//! Confrontation configuration.
//!
//! A configuration file groups confrontations under headings:
//!
//! ```text
//! [h1: Ecosystem and Carbon Cycle]
//!
//! [h2: Gross Primary Productivity]
//! variable       = "gpp"
//! alternate_vars = "GPP"
//!
//! [FLUXNET]
//! source = "DATA/gpp/FLUXNET/gpp.nc"
//! weight = 9
//! ```
//!
//! `[h1: ...]` opens a section and `[h2: ...]` a variable group whose keys
//! are inherited by the confrontations below it. Any other `[Name]` opens a
//! confrontation. Values are TOML scalars; `True`/`False` are accepted as
//! booleans.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::errors::{IlambError, IlambResult};
use crate::model::ExtractOptions;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+|[A-Za-z_][A-Za-z0-9_]*")
        .expect("token pattern is valid")
});

/// Variables a confrontation needs from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Satisfied when at least one is present.
    AnyOf(Vec<String>),
    /// Satisfied only when every one is present.
    AllOf(Vec<String>),
}

impl Requirement {
    pub fn names(&self) -> &[String] {
        match self {
            Self::AnyOf(names) | Self::AllOf(names) => names,
        }
    }

    pub fn is_satisfied(&self, present: impl Fn(&str) -> bool) -> bool {
        match self {
            Self::AnyOf(names) => names.iter().any(|n| present(n)),
            Self::AllOf(names) => names.iter().all(|n| present(n)),
        }
    }

    /// Word joining the names when displayed.
    pub fn conjunction(&self) -> &'static str {
        match self {
            Self::AnyOf(_) => "or",
            Self::AllOf(_) => "and",
        }
    }
}

/// Identifiers in an algebraic expression, excluding function names.
pub fn expression_variables(expression: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for token in TOKEN_RE.find_iter(expression) {
        let text = token.as_str();
        if !text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            continue;
        }
        let is_call = expression[token.end()..].trim_start().starts_with('(');
        if !is_call && seen.insert(text.to_string()) {
            names.push(text.to_string());
        }
    }
    names
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SectionBody {
    variable: Option<String>,
    alternate_vars: Option<String>,
    derived: Option<String>,
    source: Option<String>,
    weight: Option<f64>,
}

impl SectionBody {
    /// Fills keys missing here from the enclosing variable group.
    fn inherit(mut self, group: &SectionBody) -> Self {
        self.variable = self.variable.or_else(|| group.variable.clone());
        self.alternate_vars = self.alternate_vars.or_else(|| group.alternate_vars.clone());
        self.derived = self.derived.or_else(|| group.derived.clone());
        self
    }
}

/// One configured comparison against an observational dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Confrontation {
    pub name: String,
    /// `<variable group>/<name>`, used for display.
    pub longname: String,
    pub variable: String,
    pub alternate_vars: Vec<String>,
    pub derived: Option<String>,
    pub source: Option<String>,
    pub weight: f64,
    /// Where this confrontation's results are built.
    pub output_path: PathBuf,
}

impl Confrontation {
    /// All identifiers of the derived expression if there is one, otherwise
    /// any of the variable and its alternates.
    pub fn requirement(&self) -> Requirement {
        match self.derived.as_deref().map(expression_variables) {
            Some(names) if !names.is_empty() => Requirement::AllOf(names),
            _ => {
                let mut names = vec![self.variable.clone()];
                names.extend(self.alternate_vars.iter().cloned());
                Requirement::AnyOf(names)
            }
        }
    }

    /// Extraction options reading this confrontation's variable, its
    /// alternates, and the derived expression as a last resort.
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            alt_vars: self.alternate_vars.clone(),
            expression: self.derived.clone(),
            ..ExtractOptions::default()
        }
    }
}

/// All confrontations of a configuration file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Scoreboard {
    pub confrontations: Vec<Confrontation>,
}

enum Header {
    Section(String),
    Group(String),
    Confrontation(String),
}

fn parse_header(line: &str) -> Option<Header> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    let titled = |prefix: &str| {
        inner
            .strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches(':').trim().to_string())
    };
    Some(if let Some(title) = titled("h1:") {
        Header::Section(title)
    } else if let Some(title) = titled("h2:") {
        Header::Group(title)
    } else {
        Header::Confrontation(inner.to_string())
    })
}

/// Parses a value as TOML, accepting Python-style booleans and falling
/// back to the raw text.
fn parse_value(raw: &str) -> toml::Value {
    let raw = raw.trim();
    let normalised = match raw {
        "True" => "true",
        "False" => "false",
        other => other,
    };
    toml::from_str::<toml::Table>(&format!("v = {normalised}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.trim_matches('"').to_string()))
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|s| {
            s.split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Scoreboard {
    pub fn from_file(path: &Path, build_dir: &Path) -> IlambResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| IlambError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path, build_dir)
    }

    /// Parses configuration `text`; `path` is used in error messages only.
    pub fn parse(text: &str, path: &Path, build_dir: &Path) -> IlambResult<Self> {
        let config_error = |reason: String| IlambError::Config {
            path: path.to_path_buf(),
            reason,
        };

        // (header, body) in file order
        let mut sections: Vec<(Header, toml::Table)> = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = parse_header(line) {
                sections.push((header, toml::Table::new()));
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(config_error(format!("line {}: expected 'key = value'", number + 1)));
            };
            let Some((_, body)) = sections.last_mut() else {
                return Err(config_error(format!("line {}: key outside of a section", number + 1)));
            };
            body.insert(key.trim().to_string(), parse_value(value));
        }

        let mut confrontations = Vec::new();
        let mut group_name = String::new();
        let mut group = SectionBody::default();
        for (header, table) in sections {
            let body: SectionBody = toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| config_error(e.to_string()))?;
            match header {
                Header::Section(_) => {
                    group_name.clear();
                    group = SectionBody::default();
                }
                Header::Group(title) => {
                    group_name = title;
                    group = body;
                }
                Header::Confrontation(name) => {
                    let body = body.inherit(&group);
                    let variable = body.variable.ok_or_else(|| {
                        config_error(format!("confrontation '{name}' has no variable"))
                    })?;
                    let longname = if group_name.is_empty() {
                        name.clone()
                    } else {
                        format!("{group_name}/{name}")
                    };
                    let output_path = build_dir
                        .join(group_name.replace(' ', ""))
                        .join(&name);
                    confrontations.push(Confrontation {
                        longname,
                        variable,
                        alternate_vars: split_list(body.alternate_vars),
                        derived: body.derived.filter(|d| !d.trim().is_empty()),
                        source: body.source,
                        weight: body.weight.unwrap_or(1.0),
                        output_path,
                        name,
                    });
                }
            }
        }
        Ok(Self { confrontations })
    }

    /// Keeps only confrontations named in `names` (by name or long name).
    /// An empty list keeps everything.
    pub fn restrict(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        self.confrontations
            .retain(|c| names.iter().any(|n| *n == c.name || *n == c.longname));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[h1: Ecosystem and Carbon Cycle]
bgcolor = "#ECFFE6"

[h2: Gross Primary Productivity]
variable       = "gpp"
alternate_vars = "GPP, gpp_total"
weight         = 5

[FLUXNET]
source   = "DATA/gpp/FLUXNET/gpp.nc" # site data
weight   = 9
skip_iav = True

[h2: Net Ecosystem Carbon Balance]
variable = "nbp"
derived  = "gpp-ra-rh"

[Hoffman]
source = "DATA/nbp/HOFFMAN/nbp_1850-2010.nc"

[h1: Forcings]

[h2: Surface Air Temperature]
variable = "tas"

[CRU]
"#;

    fn scoreboard() -> Scoreboard {
        Scoreboard::parse(CONFIG, Path::new("test.cfg"), Path::new("_build")).unwrap()
    }

    #[test]
    fn test_parse_confrontations_with_inheritance() {
        let board = scoreboard();
        assert_eq!(board.confrontations.len(), 3);

        let fluxnet = &board.confrontations[0];
        assert_eq!(fluxnet.longname, "Gross Primary Productivity/FLUXNET");
        assert_eq!(fluxnet.variable, "gpp");
        assert_eq!(fluxnet.alternate_vars, vec!["GPP", "gpp_total"]);
        assert_eq!(fluxnet.source.as_deref(), Some("DATA/gpp/FLUXNET/gpp.nc"));
        assert_eq!(fluxnet.weight, 9.0);
        assert_eq!(
            fluxnet.output_path,
            Path::new("_build/GrossPrimaryProductivity/FLUXNET")
        );

        let cru = &board.confrontations[2];
        assert_eq!(cru.variable, "tas");
        assert_eq!(cru.weight, 1.0);
    }

    #[test]
    fn test_extract_options_carry_alternates_and_derivation() {
        let board = scoreboard();
        let fluxnet = board.confrontations[0].extract_options();
        assert_eq!(fluxnet.alt_vars, vec!["GPP", "gpp_total"]);
        assert!(fluxnet.expression.is_none());

        let hoffman = board.confrontations[1].extract_options();
        assert_eq!(hoffman.expression.as_deref(), Some("gpp-ra-rh"));
        assert_eq!(hoffman.initial_time, -1e20);
    }

    #[test]
    fn test_requirement_kinds() {
        let board = scoreboard();
        assert_eq!(
            board.confrontations[0].requirement(),
            Requirement::AnyOf(vec!["gpp".into(), "GPP".into(), "gpp_total".into()])
        );
        assert_eq!(
            board.confrontations[1].requirement(),
            Requirement::AllOf(vec!["gpp".into(), "ra".into(), "rh".into()])
        );
    }

    #[test]
    fn test_requirement_evaluation() {
        let present = |n: &str| n == "gpp" || n == "tas";
        assert!(Requirement::AnyOf(vec!["gpp".into(), "nee".into()]).is_satisfied(present));
        assert!(!Requirement::AllOf(vec!["tas".into(), "pr".into()]).is_satisfied(present));
    }

    #[test]
    fn test_expression_variables_skip_functions_and_numbers() {
        assert_eq!(
            expression_variables("abs(hfls + 2.5e3*hfss) / sqrt(rsds)"),
            vec!["hfls", "hfss", "rsds"]
        );
        assert_eq!(expression_variables("gpp - gpp"), vec!["gpp"]);
    }

    #[test]
    fn test_restrict() {
        let mut board = scoreboard();
        board.restrict(&["CRU".to_string(), "Net Ecosystem Carbon Balance/Hoffman".to_string()]);
        let names: Vec<&str> = board.confrontations.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Hoffman", "CRU"]);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = Scoreboard::parse("[Lonely]\nsource = \"x.nc\"\n", Path::new("c.cfg"), Path::new("_build"))
            .unwrap_err();
        assert!(err.to_string().contains("Lonely"));
    }
}
