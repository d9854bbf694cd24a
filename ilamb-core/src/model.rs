//! Model results and their discovery on disk.
//!
//! A [`ModelResult`] indexes every NetCDF file below one model directory by
//! the variables the file contains, and holds the model's grid information
//! (cell areas and land fractions). Variables are read on demand through
//! [`ModelResult::extract_time_series`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use walkdir::WalkDir;

use crate::calendar::model_year_shift;
use crate::errors::{IlambError, IlambResult};
use crate::expression::Expression;
use crate::grid::cell_areas;
use crate::interpolate::wrap_longitude;
use crate::masked::MaskedArray;
use crate::netcdf_io::{list_variables, read_array, read_variable};
use crate::variable::{combine, Variable};

/// Variable holding cell areas.
pub const CELL_AREA_VARIABLE: &str = "areacella";

/// Variable holding land fractions.
pub const LAND_FRACTION_VARIABLE: &str = "sftlf";

/// Extents closer than this many degrees to the globe's edge snap to it.
const EXTENT_SNAP: f64 = 5.0;

/// How to select files and shift time for one model directory.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Substring every indexed file name must contain.
    pub filter: String,
    /// Pattern every indexed file name must match, if given.
    pub regex: Option<Regex>,
    /// `(y0, yf)` maps model year `y0` onto `yf`; other lengths mean no shift.
    pub model_year: Vec<i32>,
}

/// Sites from site data match a requested location within this many degrees.
pub const SAME_SITE_EPSILON: f64 = 0.1;

/// Options for [`ModelResult::extract_time_series`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub alt_vars: Vec<String>,
    pub initial_time: f64,
    pub final_time: f64,
    /// Builds the variable from others when no file provides it.
    pub expression: Option<String>,
    /// Site latitudes; given together with `lons`.
    pub lats: Option<Vec<f64>>,
    pub lons: Option<Vec<f64>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            alt_vars: Vec::new(),
            initial_time: -1e20,
            final_time: 1e20,
            expression: None,
            lats: None,
            lons: None,
        }
    }
}

impl ExtractOptions {
    /// The requested sites, if any.
    ///
    /// # Errors
    ///
    /// Fails when only one of `lats` and `lons` is given, or their lengths
    /// differ.
    pub fn sites(&self) -> IlambResult<Option<(&[f64], &[f64])>> {
        match (&self.lats, &self.lons) {
            (None, None) => Ok(None),
            (Some(lats), Some(lons)) if lats.len() == lons.len() => Ok(Some((lats, lons))),
            _ => Err(IlambError::Error(
                "site latitudes and longitudes must be given together and match in length".into(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelResult {
    pub name: String,
    pub path: PathBuf,
    /// Display colour, assigned by the caller.
    pub color: [u8; 3],
    pub filter: String,
    pub regex: Option<Regex>,
    /// Days added to every extracted time.
    pub shift: f64,
    /// Variable name to the files containing it, in discovery order.
    pub variables: BTreeMap<String, Vec<PathBuf>>,
    /// Variable name to its long or standard name.
    pub names: BTreeMap<String, String>,
    /// `[[lat_min, lat_max], [lon_min, lon_max]]` covered by the output.
    pub extents: [[f64; 2]; 2],
    pub cell_areas: Option<MaskedArray>,
    /// Land fraction as a fraction, not a percentage.
    pub land_fraction: Option<Variable>,
    pub land_areas: Option<MaskedArray>,
    /// Total land area in m2.
    pub land_area: Option<f64>,
}

impl ModelResult {
    /// Indexes the NetCDF files under `path`.
    ///
    /// Files that cannot be opened are skipped. Grid information is loaded
    /// if the output has it.
    pub fn new(path: &Path, name: &str, options: &ModelOptions) -> IlambResult<Self> {
        let mut model = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            color: [0, 0, 0],
            filter: options.filter.clone(),
            regex: options.regex.clone(),
            shift: model_year_shift(&options.model_year),
            variables: BTreeMap::new(),
            names: BTreeMap::new(),
            extents: [[-90.0, 90.0], [-180.0, 180.0]],
            cell_areas: None,
            land_fraction: None,
            land_areas: None,
            land_area: None,
        };
        model.find_variables();
        model.find_extents();
        model.load_grid_information()?;
        Ok(model)
    }

    fn accepts(&self, file_name: &str) -> bool {
        file_name.ends_with(".nc")
            && file_name.contains(&self.filter)
            && self.regex.as_ref().map_or(true, |re| re.is_match(file_name))
    }

    fn find_variables(&mut self) {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.path)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.accepts(&e.file_name().to_string_lossy()))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let listing = match list_variables(&file) {
                Ok(listing) => listing,
                Err(e) => {
                    debug!("[{}] Error opening file {}: {e}", self.name, file.display());
                    continue;
                }
            };
            for (key, description) in listing {
                self.variables.entry(key.clone()).or_default().push(file.clone());
                if let Some(description) = description {
                    self.names.entry(key).or_insert(description);
                }
            }
        }
    }

    /// Narrows the extents to the coordinate ranges found in the output.
    fn find_extents(&mut self) {
        let is_lat = |k: &str| k.starts_with("lat") || k.ends_with("lat");
        let is_lon = |k: &str| k.starts_with("lon") || k.ends_with("lon") || k.ends_with("long");

        for (key, files) in &self.variables {
            let lower = key.to_ascii_lowercase();
            let axis = if is_lat(&lower) {
                0
            } else if is_lon(&lower) {
                1
            } else {
                continue;
            };
            for file in files {
                let Ok(values) = read_array(file, key) else { continue };
                if values.ndim() > 2 || values.count_unmasked() <= 1 {
                    continue;
                }
                let mut values = values;
                if axis == 1 {
                    values.map_inplace(wrap_longitude);
                }
                let (data, mask) = values.into_parts();
                let unmasked = data.iter().zip(mask.iter()).filter(|(_, m)| !**m).map(|(v, _)| *v);
                let (lo, hi) = unmasked.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
                self.extents[axis][0] = self.extents[axis][0].max(lo);
                self.extents[axis][1] = self.extents[axis][1].min(hi);
            }
        }

        let edges = [[-90.0, 90.0], [-180.0, 180.0]];
        for (extent, edge) in self.extents.iter_mut().zip(edges) {
            if extent[0] < edge[0] + EXTENT_SNAP {
                extent[0] = edge[0];
            }
            if extent[1] > edge[1] - EXTENT_SNAP {
                extent[1] = edge[1];
            }
        }
    }

    fn first_file(&self, variable: &str) -> Option<&Path> {
        self.variables.get(variable)?.first().map(PathBuf::as_path)
    }

    fn load_grid_information(&mut self) -> IlambResult<()> {
        self.cell_areas = if let Some(file) = self.first_file(CELL_AREA_VARIABLE) {
            Some(read_array(file, CELL_AREA_VARIABLE)?.squeeze_leading())
        } else if let (Some(lat_file), Some(lon_file)) =
            (self.first_file("lat_bnds"), self.first_file("lon_bnds"))
        {
            let lat_bnds = pairs(&read_array(lat_file, "lat_bnds")?);
            let lon_bnds = pairs(&read_array(lon_file, "lon_bnds")?);
            Some(cell_areas(&lat_bnds, &lon_bnds))
        } else {
            None
        };

        if let Some(file) = self.first_file(LAND_FRACTION_VARIABLE) {
            let mut fraction = read_variable(file, LAND_FRACTION_VARIABLE)?;
            fraction.data = fraction.data.squeeze_leading();
            if fraction.data.max().is_some_and(|m| m > 1.0) {
                fraction.data.map_inplace(|v| v * 0.01);
                fraction.unit = "1".to_string();
            }
            self.land_areas = match &self.cell_areas {
                Some(areas) if areas.shape() == fraction.data.shape() => {
                    Some(areas.multiply(&fraction.data))
                }
                Some(areas) => {
                    debug!(
                        "[{}] land fraction shape {:?} differs from cell areas {:?}",
                        self.name,
                        fraction.data.shape(),
                        areas.shape()
                    );
                    None
                }
                None => None,
            };
            fraction.area = self.cell_areas.clone();
            self.land_fraction = Some(fraction);
        } else {
            self.land_areas = self.cell_areas.clone();
        }
        self.land_area = self.land_areas.as_ref().map(MaskedArray::sum);
        Ok(())
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Reads `variable`, or the first of the alternates present, from every
    /// file that lists it and joins the pieces along time.
    ///
    /// Files entirely outside `[initial_time, final_time]` are skipped, and
    /// the model-year shift is applied to the result. With sites requested,
    /// gridded fields are sampled at the nearest cells and site data keeps
    /// only the sites matching a request. When nothing provides the variable
    /// and an expression is given, it is derived from other variables.
    ///
    /// # Errors
    ///
    /// [`IlambError::VarNotInModel`] when no candidate yields any data;
    /// other variants when a file that lists the variable cannot be read.
    pub fn extract_time_series(&self, variable: &str, options: &ExtractOptions) -> IlambResult<Variable> {
        let t0 = options.initial_time - self.shift;
        let tf = options.final_time - self.shift;
        let sites = options.sites()?;

        let candidates = std::iter::once(variable).chain(options.alt_vars.iter().map(String::as_str));
        for candidate in candidates {
            let Some(files) = self.variables.get(candidate) else {
                continue;
            };
            let mut pieces = Vec::new();
            for file in files {
                let mut piece = read_variable(file, candidate)?;
                if let Some((lo, hi)) = piece.time_extent() {
                    if hi < t0 || lo > tf {
                        continue;
                    }
                    piece.trim_time(t0, tf);
                }
                if let Some((lats, lons)) = sites {
                    if piece.ndata.is_some() {
                        let Some(selected) = piece.select_sites(lats, lons, SAME_SITE_EPSILON) else {
                            continue;
                        };
                        piece = selected;
                    } else if piece.spatial() {
                        piece = piece.extract_sites(lats, lons)?;
                    }
                }
                pieces.push(piece);
            }
            if pieces.is_empty() {
                continue;
            }

            let mut combined = combine(pieces)?;
            combined.name = variable.to_string();
            combined.shift_time(self.shift);
            if combined.spatial() && combined.area.is_none() {
                combined.area = self
                    .land_areas
                    .as_ref()
                    .filter(|a| combined.data.shape().ends_with(a.shape()))
                    .cloned();
            }
            return Ok(combined);
        }

        if let Some(expression) = &options.expression {
            return self.derived_variable(variable, expression, options);
        }
        debug!(
            "[{}] Could not find [{}] in the model results",
            self.name,
            std::iter::once(variable.to_string())
                .chain(options.alt_vars.iter().cloned())
                .collect::<Vec<_>>()
                .join(",")
        );
        Err(IlambError::VarNotInModel {
            model: self.name.clone(),
            variable: variable.to_string(),
        })
    }
}

impl ModelResult {
    /// Builds `variable` from `expression` over other variables of this
    /// model, extracted with the same time window and sites.
    ///
    /// # Errors
    ///
    /// [`IlambError::VarNotInModel`] when an operand is missing,
    /// [`IlambError::GridMismatch`] when operands disagree on their axes, and
    /// expression or unit errors from the evaluation.
    pub fn derived_variable(
        &self,
        variable: &str,
        expression: &str,
        options: &ExtractOptions,
    ) -> IlambResult<Variable> {
        let parsed = Expression::parse(expression)?;
        let operand_options = ExtractOptions {
            alt_vars: Vec::new(),
            expression: None,
            ..options.clone()
        };

        let mut inputs: BTreeMap<String, Variable> = BTreeMap::new();
        let mut template: Option<Variable> = None;
        for name in parsed.variables() {
            let input = self.extract_time_series(name, &operand_options)?;
            if let Some(reference) = &template {
                input
                    .check_same_grid(reference)
                    .map_err(|axis| IlambError::GridMismatch {
                        model: self.name.clone(),
                        axis: axis.to_string(),
                    })?;
            } else {
                template = Some(input.clone());
            }
            inputs.insert(name.to_string(), input);
        }
        let Some(template) = template else {
            return Err(IlambError::Expression {
                expression: expression.to_string(),
                reason: "expression does not reference any variable".into(),
            });
        };

        let (data, unit) = parsed.evaluate(&inputs)?;
        debug!("[{}] derived {variable} as {expression} in '{unit}'", self.name);
        Ok(Variable {
            name: variable.to_string(),
            unit,
            data,
            ..template
        })
    }
}

/// Bounds arrays are `(n, 2)`.
fn pairs(bounds: &MaskedArray) -> Vec<[f64; 2]> {
    bounds
        .data()
        .iter()
        .copied()
        .collect::<Vec<_>>()
        .chunks_exact(2)
        .map(|c| [c[0], c[1]])
        .collect()
}

/// Which models to build from the subdirectories of a root.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Allow-list of subdirectory names; empty allows all.
    pub models: Vec<String>,
    pub model: ModelOptions,
}

/// Builds a [`ModelResult`] for each immediate subdirectory of `root`,
/// sorted case-insensitively by name.
///
/// # Errors
///
/// Fails when `root` cannot be listed or a model's grid information is
/// unreadable.
pub fn discover_models(root: &Path, options: &DiscoveryOptions) -> IlambResult<Vec<ModelResult>> {
    let entries = fs::read_dir(root).map_err(|source| IlambError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut models = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IlambError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !options.models.is_empty() && !options.models.contains(&name) {
            continue;
        }
        models.push(ModelResult::new(&path, &name, &options.model)?);
    }
    models.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accepts_filter_and_regex() {
        let dir = TempDir::new().unwrap();
        let options = ModelOptions {
            filter: "Amon".to_string(),
            regex: Some(Regex::new(r"_r1i1p1_").unwrap()),
            model_year: vec![],
        };
        let model = ModelResult::new(dir.path(), "m", &options).unwrap();
        assert!(model.accepts("tas_Amon_m_r1i1p1_185001-200512.nc"));
        assert!(!model.accepts("tas_Lmon_m_r1i1p1_185001-200512.nc"));
        assert!(!model.accepts("tas_Amon_m_r2i1p1_185001-200512.nc"));
        assert!(!model.accepts("tas_Amon_m_r1i1p1_185001-200512.nc4"));
    }

    #[test]
    fn test_empty_directory_has_no_grid() {
        let dir = TempDir::new().unwrap();
        let model = ModelResult::new(dir.path(), "empty", &ModelOptions::default()).unwrap();
        assert!(model.variables.is_empty());
        assert!(model.cell_areas.is_none());
        assert_eq!(model.extents, [[-90.0, 90.0], [-180.0, 180.0]]);
        assert!(matches!(
            model.extract_time_series("tas", &ExtractOptions::default()),
            Err(IlambError::VarNotInModel { .. })
        ));
    }

    #[test]
    fn test_discovery_sorts_case_insensitively() {
        let root = TempDir::new().unwrap();
        for name in ["modelB", "ModelA", "cesm"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("README"), "not a model").unwrap();

        let models = discover_models(root.path(), &DiscoveryOptions::default()).unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["cesm", "ModelA", "modelB"]);
    }

    #[test]
    fn test_discovery_allow_list_and_shift() {
        let root = TempDir::new().unwrap();
        for name in ["ModelA", "modelB"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        let options = DiscoveryOptions {
            models: vec!["modelB".to_string()],
            model: ModelOptions {
                model_year: vec![1850, 1851],
                ..Default::default()
            },
        };
        let models = discover_models(root.path(), &options).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "modelB");
        assert_eq!(models[0].shift, 365.0);
    }
}
