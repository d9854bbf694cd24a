pub mod calendar;
pub mod confrontation;
pub mod expression;
pub mod grid;
pub mod interpolate;
pub mod masked;
pub mod model;
pub mod netcdf_io;
pub mod units;
pub mod variable;

pub mod errors;

pub use errors::{IlambError, IlambResult};
pub use expression::Expression;
pub use masked::MaskedArray;
pub use model::{discover_models, DiscoveryOptions, ExtractOptions, ModelOptions, ModelResult};
pub use variable::Variable;
