#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Cost functions and numerical differentiation.
pub mod cost;

/// Levenberg-Marquardt minimizer.
pub mod levenberg_marquardt;

pub use cost::{numerical_jacobian, CostFunction};
pub use levenberg_marquardt::{
    LevenbergMarquardt, OptimizerError, OptimizerResult, TerminationReason,
};
