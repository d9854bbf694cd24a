use std::path::PathBuf;
use thiserror::Error;

use crate::units::{ConversionError, ParseError};

/// Error type for model-result and variable operations.
#[derive(Error, Debug)]
pub enum IlambError {
    #[error("{0}")]
    Error(String),
    #[error("Variable '{variable}' not found in model '{model}'")]
    VarNotInModel { model: String, variable: String },
    #[error("NetCDF error in {path}: {source}")]
    Netcdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unit error: {0}")]
    Units(#[from] ConversionError),
    #[error("Grid of model '{model}' does not match the reference grid on axis '{axis}'")]
    GridMismatch { model: String, axis: String },
    #[error("Unsupported shape for '{variable}': {reason}")]
    UnsupportedShape { variable: String, reason: String },
    #[error("Cannot interpret time units '{0}'")]
    TimeUnits(String),
    #[error("Cannot evaluate '{expression}': {reason}")]
    Expression { expression: String, reason: String },
    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl IlambError {
    /// True for the "model does not provide this variable" case, as opposed
    /// to a failure while reading something that is there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VarNotInModel { .. })
    }

    pub(crate) fn netcdf(path: impl Into<PathBuf>, source: netcdf::Error) -> Self {
        Self::Netcdf {
            path: path.into(),
            source,
        }
    }
}

impl From<ParseError> for IlambError {
    fn from(e: ParseError) -> Self {
        Self::Units(ConversionError::ParseError(e))
    }
}

/// Convenience type for `Result<T, IlambError>`.
pub type IlambResult<T> = Result<T, IlambError>;
