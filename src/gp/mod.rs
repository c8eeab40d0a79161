//! Gaussian-process motion model.
//!
//! - [`prior`]: the white-noise-on-acceleration prior over one knot interval
//! - [`interpolation`]: pose/twist interpolation between two knots and its Jacobians

pub mod interpolation;
pub mod prior;

pub use interpolation::{GpInterpolation, GpInterpolator, GpJacobians, Matrix6x12};
pub use prior::{Matrix12, WnoaPrior};
