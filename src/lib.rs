//! # LiDAR GP Odometry
//!
//! Residuals and bookkeeping for continuous-time LiDAR odometry with a Gaussian-process
//! motion prior. The crate supplies what an external nonlinear least-squares solver
//! needs to refine a trajectory of knot states from point-to-line correspondences.
//!
//! ## Features
//!
//! - **Lie groups**: SO(3)/SE(3) with analytic left-perturbation Jacobians
//! - **GP motion prior**: white-noise-on-acceleration interpolation between knots
//! - **Point-to-line residual**: 2-D weighted residual with exact Jacobians for the four
//!   boundary states of the point's knot interval
//! - **Prior factor**: 12-D WNOA residual between consecutive knots
//! - **Feature tracks**: sliding-window observation bookkeeping and post-solve point
//!   Jacobian storage
//! - **Parallel evaluation**: residuals evaluated with rayon
//!
//! ## Conventions
//!
//! - Tangent vectors are ordered `[ρ (translation); θ (rotation)]`
//! - Poses map sensor-frame points into the map frame
//! - Perturbations are left: `T ← exp(δ^) T`
//! - Knot velocities are spatial twists, `Ṫ = ϖ^ T`

pub mod config;
pub mod error;
pub mod factors;
pub mod gp;
pub mod logger;
pub mod manifold;
pub mod odometry;

pub use config::{GpPriorConfig, OdometryConfig};
pub use error::{OdometryError, OdometryResult};
pub use factors::{
    CostFunction, FactorEvaluation, GpOperatingPoint, GpPriorFactor, LineWeighting,
    PointToLineGp,
};
pub use gp::{GpInterpolation, GpInterpolator, GpJacobians, WnoaPrior};
pub use logger::{init_logger, init_logger_with_level};
pub use manifold::{se3::SE3, se3::SE3Tangent, so3::SO3, so3::SO3Tangent, LieGroup, Tangent};
pub use odometry::{
    FeatureTrack, JacobianStore, KnotPerturbation, LineProblem, Mapping, Scan, ScanMap,
    ScanWindow, Trajectory, TrajectoryState,
};
