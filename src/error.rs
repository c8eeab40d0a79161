//! Error types for the lidar-gp-odometry library
//!
//! Every failure in this crate happens at construction or setup time (building a
//! residual, binding a Jacobian store, validating a configuration). Residual evaluation
//! itself is total and never returns an error.

use thiserror::Error;

/// Main result type used throughout the crate
pub type OdometryResult<T> = Result<T, OdometryError>;

/// Main error type for the crate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OdometryError {
    /// Caller supplied an argument that violates a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A Jacobian-producing call was made before a Jacobian source was bound
    #[error("Jacobian source not bound: {0}")]
    NotBound(String),

    /// The two line points coincide, so the line direction is undefined
    #[error("Degenerate line: {0}")]
    DegenerateLine(String),

    /// A numeric parameter is outside its valid domain
    #[error("Domain error: {0}")]
    DomainError(String),
}
