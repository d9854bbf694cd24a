//! Multi-model means and variable-availability reports over ILAMB model
//! output. The two binaries, `ilamb-mean` and `ilamb-doctor`, are thin
//! drivers over this library and [`ilamb_core`].

pub mod cli;
pub mod doctor;
pub mod mean;
pub mod palette;
