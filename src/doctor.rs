//! Variable-availability report.
//!
//! For every model and confrontation, shows whether the model output holds
//! the variables the confrontation needs.

use crossterm::style::{Color, Stylize};
use ilamb_core::confrontation::{Confrontation, Requirement};
use ilamb_core::ModelResult;

/// Availability of one confrontation's variables in one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub confrontation: String,
    pub model: String,
    pub color: [u8; 3],
    pub requirement: Requirement,
    /// Each required variable and whether the model has it.
    pub variables: Vec<(String, bool)>,
    pub satisfied: bool,
}

impl ReportLine {
    pub fn new(model: &ModelResult, confrontation: &Confrontation) -> Self {
        let requirement = confrontation.requirement();
        let variables = requirement
            .names()
            .iter()
            .map(|name| (name.clone(), model.has_variable(name)))
            .collect();
        let satisfied = requirement.is_satisfied(|name| model.has_variable(name));
        Self {
            confrontation: confrontation.longname.clone(),
            model: model.name.clone(),
            color: model.color,
            requirement,
            variables,
            satisfied,
        }
    }

    /// The line as printed, with terminal colours.
    pub fn render(&self) -> String {
        let [r, g, b] = self.color;
        let model = format!("{:<20}", self.model).with(Color::Rgb { r, g, b });
        let marker = if self.satisfied {
            "present".green().bold()
        } else {
            "missing".red().bold()
        };
        let variables = self
            .variables
            .iter()
            .map(|(name, present)| {
                if *present {
                    name.as_str().green().to_string()
                } else {
                    name.as_str().red().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(format!(" {} ", self.requirement.conjunction()).as_str());
        format!("{:>45} {model} {marker} {variables}", self.confrontation)
    }
}

/// One line per (model, confrontation) pair, models outermost.
pub fn report(models: &[ModelResult], confrontations: &[Confrontation]) -> Vec<ReportLine> {
    models
        .iter()
        .flat_map(|model| confrontations.iter().map(move |c| ReportLine::new(model, c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn confrontation(variable: &str, alternates: &[&str], derived: Option<&str>) -> Confrontation {
        Confrontation {
            name: "Bench".to_string(),
            longname: format!("Group/{variable}"),
            variable: variable.to_string(),
            alternate_vars: alternates.iter().map(|s| s.to_string()).collect(),
            derived: derived.map(str::to_string),
            source: None,
            weight: 1.0,
            output_path: PathBuf::from("_build/Group/Bench"),
        }
    }

    fn model_with(variables: &[&str]) -> ModelResult {
        let dir = tempfile::TempDir::new().unwrap();
        let mut model =
            ModelResult::new(dir.path(), "CLM", &ilamb_core::ModelOptions::default()).unwrap();
        for v in variables {
            model.variables.insert(v.to_string(), vec![PathBuf::from("x.nc")]);
        }
        model
    }

    #[test]
    fn test_any_of_highlights_present_variable() {
        let model = model_with(&["gpp"]);
        let line = ReportLine::new(&model, &confrontation("gpp", &["nee"], None));
        assert!(line.satisfied);
        assert_eq!(
            line.variables,
            vec![("gpp".to_string(), true), ("nee".to_string(), false)]
        );
        let rendered = line.render();
        assert!(rendered.contains("Group/gpp"));
        assert!(rendered.contains(" or "));
    }

    #[test]
    fn test_all_of_needs_every_variable() {
        let model = model_with(&["tas"]);
        let line = ReportLine::new(&model, &confrontation("x", &[], Some("tas * pr")));
        assert!(!line.satisfied);
        assert_eq!(line.requirement, Requirement::AllOf(vec!["tas".into(), "pr".into()]));
        assert!(line.render().contains(" and "));
    }

    #[test]
    fn test_report_covers_every_pair() {
        let models = vec![model_with(&["tas"]), model_with(&[])];
        let confrontations = vec![confrontation("tas", &[], None), confrontation("pr", &[], None)];
        let lines = report(&models, &confrontations);
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines.iter().map(|l| l.satisfied).collect::<Vec<_>>(),
            vec![true, false, false, false]
        );
    }
}
